//! fhir-core: FHIR R4 document model for the REST client
//!
//! Untyped resources and identity helpers, Bundle and OperationOutcome
//! shapes, the search and JSON Patch builders, and the partial-precision
//! date/dateTime parser.

pub mod bundle;
pub mod capability;
pub mod datetime;
pub mod error;
pub mod outcome;
pub mod patch;
pub mod resource;
pub mod search;

pub use bundle::{
    Bundle, BundleEntry, BundleEntryRequest, BundleEntryResponse, BundleEntrySearch, BundleLink,
    BundleType, HttpVerb, SearchEntryMode,
};
pub use capability::CapabilityStatement;
pub use datetime::{FhirDateTime, Flavour};
pub use error::FhirError;
pub use outcome::{IssueSeverity, IssueType, OperationOutcome, OperationOutcomeIssue};
pub use patch::{PatchBody, PatchBuilder, PatchOperation};
pub use resource::{
    FhirResource, Reference, Resource, ResourceKey, ResourceKind, Retrieved, ToResourceKey, Typed,
    TypedResource, id_of, typed,
};
pub use search::{SearchBuilder, SearchParameters, SearchPrefix};
