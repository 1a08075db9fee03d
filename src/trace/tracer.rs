//! Request-level span aggregation and export.

use std::sync::{Arc, Mutex};
use std::time::SystemTime;

use bytes::Bytes;
use http::{Request, Response};
use serde_json::{Map, Value};

use crate::config::ResolvedConfig;
use crate::export::{EventExporter, ExportTarget, SpanEvent};

use super::{SpanHandle, TraceContext};

/// Owns the root span of one request plus every child span created during the
/// request's lifetime, and renders the finished tree into exportable events.
///
/// Cheap to clone; clones share the same span tree. Each request gets its own
/// tracer, so no state crosses request boundaries.
#[derive(Clone, Debug)]
pub struct RequestTracer {
    inner: Arc<TracerInner>,
}

#[derive(Debug)]
struct TracerInner {
    root: SpanHandle,
    children: Mutex<Vec<SpanHandle>>,
    target: ExportTarget,
    exporter: Arc<dyn EventExporter>,
}

impl RequestTracer {
    pub(crate) fn new(
        request: &Request<Bytes>,
        config: &ResolvedConfig,
        exporter: Arc<dyn EventExporter>,
    ) -> Self {
        let context = if config.accept_trace_context {
            TraceContext::from_headers(request.headers())
        } else {
            TraceContext::root()
        };
        let root = SpanHandle::new(
            context,
            request.uri().path().to_string(),
            config.service_name.clone(),
        );
        root.add_request(request);
        RequestTracer {
            inner: Arc::new(TracerInner {
                root,
                children: Mutex::new(Vec::new()),
                target: config.target.clone(),
                exporter,
            }),
        }
    }

    /// The root span's trace context.
    pub fn context(&self) -> TraceContext {
        self.inner.root.context()
    }

    /// The root span.
    pub fn root_span(&self) -> SpanHandle {
        self.inner.root.clone()
    }

    /// Merge data into the root span.
    pub fn add_data(&self, data: Map<String, Value>) {
        self.inner.root.add_data(data);
    }

    /// Start a child span of the request's root span. The caller is
    /// responsible for eventually calling [`SpanHandle::finish`]; a span left
    /// unfinished is stamped at export time instead of blocking export.
    pub fn start_child_span(
        &self,
        name: impl Into<String>,
        service_name: impl Into<String>,
    ) -> SpanHandle {
        let span = SpanHandle::new(self.context().child(), name, service_name);
        if let Ok(mut children) = self.inner.children.lock() {
            children.push(span.clone());
        }
        span
    }

    /// Finalize the root span for the primary response path: exactly one of
    /// `response` or `error` is expected.
    pub fn finish_response(
        &self,
        response: Option<&Response<Bytes>>,
        error: Option<&(dyn std::error::Error + 'static)>,
    ) {
        if let Some(response) = response {
            self.inner.root.add_response(response);
        } else if let Some(error) = error {
            self.inner.root.add_error(error);
        }
        self.inner.root.finish();
    }

    /// Render every span in the tree (skipping spans named in
    /// `exclude_names`) and forward the batch to the exporter. Spans that
    /// were never finished are rendered as ending now. Exporter failures are
    /// logged and swallowed.
    pub async fn send_events(&self, exclude_names: &[&str]) {
        let now = SystemTime::now();
        let mut spans = vec![self.inner.root.clone()];
        if let Ok(children) = self.inner.children.lock() {
            spans.extend(children.iter().cloned());
        }

        let batch: Vec<SpanEvent> = spans
            .iter()
            .filter(|span| !exclude_names.contains(&span.name().as_str()))
            .filter_map(|span| span.render(now))
            .collect();

        if let Err(error) = self
            .inner
            .exporter
            .export(&self.inner.target, batch)
            .await
        {
            tracing::warn!(error = %error, "failed to export trace events");
        }
    }
}
