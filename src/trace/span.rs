//! Single timed unit of work within a trace.

use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use bytes::Bytes;
use http::{Request, Response};
use serde_json::{json, Map, Value};

use crate::export::SpanEvent;

use super::TraceContext;

#[derive(Debug)]
struct SpanState {
    context: TraceContext,
    name: String,
    service_name: String,
    start: SystemTime,
    end: Option<SystemTime>,
    data: Map<String, Value>,
}

/// Thread safe handle to one span.
///
/// Created when a traced operation begins, mutated through [`add_data`] and
/// the request/response recorders, and finalized exactly once by [`finish`].
/// Clones share the same underlying span.
///
/// [`add_data`]: SpanHandle::add_data
/// [`finish`]: SpanHandle::finish
#[derive(Clone, Debug)]
pub struct SpanHandle {
    inner: Arc<Mutex<SpanState>>,
}

impl SpanHandle {
    pub(crate) fn new(
        context: TraceContext,
        name: impl Into<String>,
        service_name: impl Into<String>,
    ) -> Self {
        SpanHandle {
            inner: Arc::new(Mutex::new(SpanState {
                context,
                name: name.into(),
                service_name: service_name.into(),
                start: SystemTime::now(),
                end: None,
                data: Map::new(),
            })),
        }
    }

    fn with_state<T>(&self, f: impl FnOnce(&mut SpanState) -> T) -> Option<T> {
        self.inner.lock().ok().map(|mut state| f(&mut state))
    }

    /// The span's own trace context.
    pub fn context(&self) -> TraceContext {
        self.inner
            .lock()
            .map(|state| state.context.clone())
            .unwrap_or_else(|_| TraceContext::root())
    }

    /// The span name.
    pub fn name(&self) -> String {
        self.with_state(|state| state.name.clone()).unwrap_or_default()
    }

    /// Merge keys into the span's attached data, last write per key wins.
    /// Ignored once the span is finished.
    pub fn add_data(&self, data: Map<String, Value>) {
        self.with_state(|state| {
            if state.end.is_none() {
                for (key, value) in data {
                    state.data.insert(key, value);
                }
            }
        });
    }

    /// Record request metadata. The body is never read.
    pub fn add_request(&self, request: &Request<Bytes>) {
        let mut data = Map::new();
        data.insert("request.method".into(), json!(request.method().as_str()));
        data.insert("request.url".into(), json!(request.uri().to_string()));
        data.insert("request.path".into(), json!(request.uri().path()));
        if let Some(host) = request.uri().host() {
            data.insert("request.host".into(), json!(host));
        }
        if let Some(agent) = header_str(request.headers(), http::header::USER_AGENT) {
            data.insert("request.user_agent".into(), json!(agent));
        }
        self.add_data(data);
    }

    /// Record response metadata. The body is never read.
    pub fn add_response(&self, response: &Response<Bytes>) {
        let mut data = Map::new();
        data.insert("response.status".into(), json!(response.status().as_u16()));
        if let Some(length) = header_str(response.headers(), http::header::CONTENT_LENGTH) {
            data.insert("response.content_length".into(), json!(length));
        }
        self.add_data(data);
    }

    /// Record an error and its source chain on the span.
    pub fn add_error(&self, error: &(dyn std::error::Error + 'static)) {
        let mut data = Map::new();
        data.insert("exception".into(), json!(true));
        data.insert("error".into(), json!(error.to_string()));
        let chain = error_chain(error);
        if !chain.is_empty() {
            data.insert("error.chain".into(), json!(chain));
        }
        self.add_data(data);
    }

    /// Stamp the end time and freeze the span. Idempotent: calls after the
    /// first are no-ops and the first stamp wins.
    pub fn finish(&self) {
        self.with_state(|state| {
            if state.end.is_none() {
                state.end = Some(SystemTime::now());
            }
        });
    }

    /// Whether [`finish`](SpanHandle::finish) has been called.
    pub fn is_finished(&self) -> bool {
        self.with_state(|state| state.end.is_some()).unwrap_or(false)
    }

    /// Move the start stamp to now. Used for the synthetic background-work
    /// span, which is created eagerly but only starts counting when the
    /// background primitive is first used.
    pub(crate) fn restart(&self) {
        self.with_state(|state| {
            if state.end.is_none() {
                state.start = SystemTime::now();
            }
        });
    }

    /// Render the span into an exportable event document. An unfinished span
    /// is rendered as if it ended at `fallback_end`.
    pub(crate) fn render(&self, fallback_end: SystemTime) -> Option<SpanEvent> {
        self.with_state(|state| {
            let end = state.end.unwrap_or(fallback_end);
            let duration = end
                .duration_since(state.start)
                .unwrap_or(Duration::ZERO);
            SpanEvent {
                timestamp: epoch_millis(state.start),
                trace_id: state.context.trace_id(),
                span_id: state.context.span_id(),
                parent_id: state.context.parent_id(),
                name: state.name.clone(),
                service_name: state.service_name.clone(),
                duration_ms: duration.as_secs_f64() * 1000.0,
                sampled: state.context.sampled(),
                data: state.data.clone(),
            }
        })
    }
}

fn header_str(headers: &http::HeaderMap, name: http::header::HeaderName) -> Option<&str> {
    headers.get(name).and_then(|value| value.to_str().ok())
}

fn error_chain(error: &(dyn std::error::Error + 'static)) -> Vec<String> {
    let mut chain = Vec::new();
    let mut source = error.source();
    while let Some(cause) = source {
        chain.push(cause.to_string());
        source = cause.source();
    }
    chain
}

fn epoch_millis(time: SystemTime) -> u64 {
    time.duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::ZERO)
        .as_millis() as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_span() -> SpanHandle {
        SpanHandle::new(TraceContext::root(), "test", "worker")
    }

    #[test]
    fn add_data_merges_last_write_wins() {
        let span = test_span();
        span.add_data(Map::from_iter([("a".into(), json!(1)), ("b".into(), json!("x"))]));
        span.add_data(Map::from_iter([("a".into(), json!(2))]));
        let event = span.render(SystemTime::now()).unwrap();
        assert_eq!(event.data["a"], json!(2));
        assert_eq!(event.data["b"], json!("x"));
    }

    #[test]
    fn finish_is_idempotent_and_freezes() {
        let span = test_span();
        span.finish();
        let first = span.render(SystemTime::now()).unwrap().duration_ms;
        span.add_data(Map::from_iter([("late".into(), json!(true))]));
        std::thread::sleep(Duration::from_millis(5));
        span.finish();
        let event = span.render(SystemTime::now()).unwrap();
        assert_eq!(event.duration_ms, first);
        assert!(!event.data.contains_key("late"));
    }

    #[test]
    fn unfinished_span_renders_with_fallback_end() {
        let span = test_span();
        let event = span
            .render(SystemTime::now() + Duration::from_millis(250))
            .unwrap();
        assert!(event.duration_ms >= 250.0);
    }

    #[test]
    fn request_and_response_metadata() {
        let span = test_span();
        let request = Request::builder()
            .method("POST")
            .uri("https://service.example.com/items?q=1")
            .header(http::header::USER_AGENT, "edge-trace-test")
            .body(Bytes::new())
            .unwrap();
        span.add_request(&request);
        let response = Response::builder()
            .status(204)
            .header(http::header::CONTENT_LENGTH, "0")
            .body(Bytes::new())
            .unwrap();
        span.add_response(&response);

        let event = span.render(SystemTime::now()).unwrap();
        assert_eq!(event.data["request.method"], json!("POST"));
        assert_eq!(event.data["request.path"], json!("/items"));
        assert_eq!(event.data["request.host"], json!("service.example.com"));
        assert_eq!(event.data["request.user_agent"], json!("edge-trace-test"));
        assert_eq!(event.data["response.status"], json!(204));
    }

    #[test]
    fn add_error_records_chain() {
        let inner = std::io::Error::new(std::io::ErrorKind::Other, "socket closed");
        let outer = crate::error::ExportError::Transport(Box::new(inner));
        let span = test_span();
        span.add_error(&outer);
        let event = span.render(SystemTime::now()).unwrap();
        assert_eq!(event.data["exception"], json!(true));
        assert_eq!(event.data["error.chain"], json!(["socket closed"]));
    }
}
