use thiserror::Error;

/// Errors raised while building or interpreting FHIR documents
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FhirError {
    #[error("Missing resourceType")]
    MissingResourceType,

    #[error("Invalid resource: {0}")]
    Invalid(String),

    #[error("Resource {0} has no id")]
    MissingId(String),

    #[error("Unresolvable reference: {0}")]
    UnresolvableReference(String),

    #[error("Unknown time zone: {0}")]
    InvalidTimeZone(String),
}
