//! Error types shared across the crate.
//!
//! Application-facing seams (handlers, background tasks, nested fetches) use
//! boxed error aliases so instrumented code never has to know about this
//! crate's error types; instrumentation-owned failures use concrete
//! `thiserror` enums.

use thiserror::Error;

/// Error produced by an instrumented handler's primary response path.
pub type HandlerError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Error produced by a background task registered through `wait_until`.
pub type TaskError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Error produced by a nested fetch call through an environment binding.
pub type FetchError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Transport-level error from an [`HttpClient`](crate::export::HttpClient).
pub type HttpError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Result of handing a batch of events to an exporter.
pub type ExportResult = Result<(), ExportError>;

/// Failure while rendering or transmitting exportable events.
///
/// Export errors are owned by the instrumentation layer: they are logged and
/// swallowed, never surfaced to request handling.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ExportError {
    /// The transport could not complete the request.
    #[error("export transport failed")]
    Transport(#[source] HttpError),

    /// The backend answered with a non-success status.
    #[error("backend rejected events with status {0}")]
    Rejected(http::StatusCode),

    /// The event batch could not be serialized.
    #[error("failed to serialize events: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The dataset name cannot be used to build a request target.
    #[error("invalid dataset name: {0:?}")]
    InvalidDataset(String),
}
