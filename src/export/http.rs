//! HTTP transport surface for event export.
//!
//! The actual network client is injected through [`HttpClient`], so embedders
//! bring whatever client their runtime provides.

use std::fmt::Debug;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use http::{header, Method, Request, Response};
use percent_encoding::{utf8_percent_encode, NON_ALPHANUMERIC};

use crate::error::{ExportError, ExportResult, HttpError};

use super::{EventExporter, ExportTarget, SpanEvent};

/// Header carrying the backend access credential.
pub(crate) const CREDENTIAL_HEADER: &str = "x-trace-team";
/// Header carrying the event's own timestamp.
pub(crate) const EVENT_TIME_HEADER: &str = "x-trace-event-time";

/// A minimal interface necessary for sending requests over HTTP.
///
/// Users sometimes choose HTTP clients tied to a particular async runtime;
/// this trait lets them bring their own.
#[async_trait]
pub trait HttpClient: Debug + Send + Sync {
    /// Send the specified HTTP request with `Bytes` payload.
    ///
    /// Returns the HTTP response including the status code and body, or an
    /// error if the request could not be completed.
    async fn send_bytes(&self, request: Request<Bytes>) -> Result<Response<Bytes>, HttpError>;
}

/// Event exporter that POSTs each span event to
/// `{endpoint}/1/events/{dataset}` as a JSON document.
#[derive(Clone, Debug)]
pub struct HttpEventExporter {
    client: Arc<dyn HttpClient>,
    endpoint: String,
}

impl HttpEventExporter {
    /// Create an exporter sending through `client` to the backend at
    /// `endpoint` (scheme + authority, no trailing path).
    pub fn new(client: Arc<dyn HttpClient>, endpoint: impl Into<String>) -> Self {
        HttpEventExporter {
            client,
            endpoint: endpoint.into(),
        }
    }

    fn event_url(&self, dataset: &str) -> Result<String, ExportError> {
        if dataset.is_empty() {
            return Err(ExportError::InvalidDataset(dataset.to_owned()));
        }
        let encoded = utf8_percent_encode(dataset, NON_ALPHANUMERIC);
        Ok(format!(
            "{}/1/events/{}",
            self.endpoint.trim_end_matches('/'),
            encoded
        ))
    }
}

#[async_trait]
impl EventExporter for HttpEventExporter {
    async fn export(&self, target: &ExportTarget, batch: Vec<SpanEvent>) -> ExportResult {
        let url = self.event_url(&target.dataset)?;
        for event in batch {
            let body = serde_json::to_vec(&event)?;
            let request = Request::builder()
                .method(Method::POST)
                .uri(&url)
                .header(header::ACCEPT, "application/json")
                .header(header::CONTENT_TYPE, "application/json")
                .header(CREDENTIAL_HEADER, &target.api_key)
                .header(EVENT_TIME_HEADER, event.timestamp.to_string())
                .body(Bytes::from(body))
                .map_err(|err| ExportError::Transport(Box::new(err)))?;

            let response = self
                .client
                .send_bytes(request)
                .await
                .map_err(ExportError::Transport)?;
            if !response.status().is_success() {
                return Err(ExportError::Rejected(response.status()));
            }
        }
        Ok(())
    }
}
