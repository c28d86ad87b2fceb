//! fhir-client: async REST client for FHIR R4 servers
//!
//! [`FhirClient`] turns typed calls (read, search, update, patch, history,
//! batch, `$operations`, ...) into HTTP exchanges through a pluggable
//! [`Transport`]. Search and history results come back as a
//! [`BundleNavigator`] that follows pagination links and resolves references.
//! The `fhir-client` binary in `main.rs` wraps a few of these calls.

pub mod auth;
pub mod client;
pub mod config;
pub mod error;
pub mod executor;
pub mod instrumentation;
pub mod navigator;
pub mod operation;
pub mod options;
pub mod transport;

#[cfg(test)]
mod test_support;

pub use auth::{AuthSupplier, AuthorizationCallback};
pub use client::{FHIR_JSON, FhirClient, JSON_PATCH};
pub use config::ClientConfig;
pub use error::{ClientError, ErrorKind};
pub use executor::{BundleExecutor, BundleResponse, EntryHandle};
pub use navigator::{BundleNavigator, WithReferences};
pub use operation::{Everything, Operation, OperationParameters, Validate};
pub use options::{CapabilityMode, HistoryParameters, HistoryScope, RequestOptions};
pub use transport::{BoxError, HttpRequest, HttpResponse, ReqwestTransport, Transport};

pub use fhir_core;
pub use tokio_util::sync::CancellationToken;
