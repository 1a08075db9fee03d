//! Instrumentation for module-style fetch handlers.
//!
//! Module-style entry points receive the request and a [`FetchContext`] and
//! return the response directly. The wrapper builds the span tree around the
//! handler, defers export through the runtime's deferred-execution facility
//! when one is available, and services the out-of-band flush side channel
//! used by upstream services in a distributed trace.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use http::{Request, Response, StatusCode};

use crate::cache::TraceTokenCache;
use crate::config::TracerConfig;
use crate::error::HandlerError;
use crate::export::{EventExporter, SpanEvent};
use crate::trace::RequestTracer;

use super::FetchContext;

/// Reserved path for out-of-band trace event submission. Requests to this
/// path are consumed by the wrapper and never reach the handler.
pub const FLUSH_EVENT_PATH: &str = "/_send_trace_event";

/// A module-style fetch handler.
#[async_trait]
pub trait ModuleHandler: Send + Sync {
    async fn fetch(
        &self,
        request: Request<Bytes>,
        cx: &FetchContext,
    ) -> Result<Response<Bytes>, HandlerError>;
}

/// Instrumented wrapper around a module-style handler.
#[derive(Debug)]
pub struct WrappedModule<H> {
    config: TracerConfig,
    exporter: Arc<dyn EventExporter>,
    cache: Arc<dyn TraceTokenCache>,
    handler: H,
}

/// Wrap a module-style handler. The token `cache` backs verification of
/// flush-channel submissions; use a shared cache when upstream services run
/// in other processes.
pub fn wrap_module<H>(
    config: TracerConfig,
    exporter: Arc<dyn EventExporter>,
    cache: Arc<dyn TraceTokenCache>,
    handler: H,
) -> WrappedModule<H>
where
    H: ModuleHandler,
{
    WrappedModule {
        config,
        exporter,
        cache,
        handler,
    }
}

impl<H> WrappedModule<H>
where
    H: ModuleHandler,
{
    /// Dispatch one inbound request.
    pub async fn fetch(
        &self,
        request: Request<Bytes>,
        cx: FetchContext,
    ) -> Result<Response<Bytes>, HandlerError> {
        if request.uri().path() == FLUSH_EVENT_PATH {
            return Ok(self.handle_flush(request, &cx).await);
        }

        let resolved = match self.config.resolve(Some(cx.env())) {
            Some(resolved) => resolved,
            None => {
                tracing::warn!("credential or dataset unavailable, request not instrumented");
                return self.handler.fetch(request, &cx).await;
            }
        };

        let tracer = RequestTracer::new(&request, &resolved, Arc::clone(&self.exporter));

        // Part of a distributed trace: park the id so the upstream service's
        // flush submission can be verified.
        if tracer.context().parent_id().is_some() {
            self.cache.put(tracer.context().trace_id());
        }

        let instrumented = cx.instrumented(&tracer);
        let result = self.handler.fetch(request, &instrumented).await;
        match &result {
            Ok(response) => tracer.finish_response(Some(response), None),
            Err(error) => tracer.finish_response(None, Some(error.as_ref())),
        }

        match cx.execution() {
            Some(execution) => {
                let tracer = tracer.clone();
                execution.wait_until(Box::pin(async move {
                    tracer.send_events(&[]).await;
                }));
            }
            None => tracer.send_events(&[]).await,
        }

        result
    }

    /// Service one flush-channel submission. Always answers; a bad submission
    /// is reported in the response, never raised.
    async fn handle_flush(&self, request: Request<Bytes>, cx: &FetchContext) -> Response<Bytes> {
        let event: SpanEvent = match serde_json::from_slice(request.body()) {
            Ok(event) => event,
            Err(error) => {
                tracing::warn!(error = %error, "malformed flush submission");
                return text_response(StatusCode::BAD_REQUEST, "malformed trace event");
            }
        };

        if !self.cache.take(event.trace_id) {
            return text_response(
                StatusCode::OK,
                format!("no trace found with ID: {}", event.trace_id),
            );
        }

        let resolved = match self.config.resolve(Some(cx.env())) {
            Some(resolved) => resolved,
            None => {
                tracing::warn!("credential or dataset unavailable, dropping flush submission");
                return text_response(StatusCode::OK, "tracing is not configured");
            }
        };

        match self.exporter.export(&resolved.target, vec![event]).await {
            Ok(()) => text_response(StatusCode::OK, "ok"),
            Err(error) => {
                tracing::warn!(error = %error, "failed to export flushed event");
                text_response(StatusCode::BAD_GATEWAY, "failed to export trace event")
            }
        }
    }
}

fn text_response(status: StatusCode, body: impl Into<Bytes>) -> Response<Bytes> {
    let mut response = Response::new(body.into());
    *response.status_mut() = status;
    response
}
