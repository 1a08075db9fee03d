//! Exportable event documents and the exporter seam.
//!
//! The tracer renders every span of a finished request into [`SpanEvent`]
//! documents and hands the batch to an [`EventExporter`]. Transmitting the
//! batch to a backend is entirely the exporter's concern; failures there are
//! logged and never reach request handling.

mod http;

pub use self::http::{HttpClient, HttpEventExporter};

use std::fmt::Debug;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::ExportResult;
use crate::trace::{SpanId, TraceId};

/// One exportable span document.
///
/// `timestamp` is the span start in integer milliseconds since the Unix
/// epoch; `duration_ms` is computed at render time. Attached data is
/// flattened into the top-level object.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SpanEvent {
    pub timestamp: u64,
    #[serde(rename = "trace.trace_id")]
    pub trace_id: TraceId,
    #[serde(rename = "trace.span_id")]
    pub span_id: SpanId,
    #[serde(rename = "trace.parent_id", skip_serializing_if = "Option::is_none", default)]
    pub parent_id: Option<SpanId>,
    pub name: String,
    #[serde(rename = "service.name")]
    pub service_name: String,
    pub duration_ms: f64,
    pub sampled: bool,
    #[serde(flatten)]
    pub data: Map<String, Value>,
}

/// Destination for one export: the resolved credential and dataset.
#[derive(Clone, PartialEq, Eq)]
pub struct ExportTarget {
    pub api_key: String,
    pub dataset: String,
}

impl Debug for ExportTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExportTarget")
            .field("api_key", &"<redacted>")
            .field("dataset", &self.dataset)
            .finish()
    }
}

/// Transmits rendered span events to a tracing backend.
///
/// Implementations must tolerate concurrent independent submissions from
/// unrelated requests; no coordination is provided between them.
#[async_trait]
pub trait EventExporter: Debug + Send + Sync {
    /// Export a batch of events to `target`.
    async fn export(&self, target: &ExportTarget, batch: Vec<SpanEvent>) -> ExportResult;
}

/// An in-memory event exporter that stores exported events.
///
/// Useful for testing and debugging; events can be retrieved with
/// [`get_finished_events`](InMemoryEventExporter::get_finished_events).
#[derive(Clone, Debug, Default)]
pub struct InMemoryEventExporter {
    events: Arc<Mutex<Vec<SpanEvent>>>,
}

impl InMemoryEventExporter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the events exported so far.
    pub fn get_finished_events(&self) -> Vec<SpanEvent> {
        self.events
            .lock()
            .map(|events| events.clone())
            .unwrap_or_default()
    }

    /// Clears the stored events.
    pub fn reset(&self) {
        if let Ok(mut events) = self.events.lock() {
            events.clear();
        }
    }
}

#[async_trait]
impl EventExporter for InMemoryEventExporter {
    async fn export(&self, _target: &ExportTarget, mut batch: Vec<SpanEvent>) -> ExportResult {
        if let Ok(mut events) = self.events.lock() {
            events.append(&mut batch);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample_event() -> SpanEvent {
        SpanEvent {
            timestamp: 1_700_000_000_000,
            trace_id: TraceId::from(0x4bf9_2f35_77b3_4da6_a3ce_929d_0e0e_4736),
            span_id: SpanId::from(0x00f0_67aa_0ba9_02b7),
            parent_id: None,
            name: "/items".into(),
            service_name: "worker".into(),
            duration_ms: 12.5,
            sampled: true,
            data: Map::from_iter([("request.method".into(), json!("GET"))]),
        }
    }

    #[test]
    fn event_serializes_flat_document() {
        let value = serde_json::to_value(sample_event()).unwrap();
        assert_eq!(value["trace.trace_id"], json!("4bf92f3577b34da6a3ce929d0e0e4736"));
        assert_eq!(value["trace.span_id"], json!("00f067aa0ba902b7"));
        assert_eq!(value["service.name"], json!("worker"));
        assert_eq!(value["request.method"], json!("GET"));
        assert!(value.get("trace.parent_id").is_none());
    }

    #[test]
    fn event_round_trips_through_json() {
        let mut event = sample_event();
        event.parent_id = Some(SpanId::from(7));
        let json = serde_json::to_string(&event).unwrap();
        let back: SpanEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(back, event);
    }

    #[tokio::test]
    async fn in_memory_exporter_accumulates() {
        let exporter = InMemoryEventExporter::new();
        let target = ExportTarget {
            api_key: "key".into(),
            dataset: "dataset".into(),
        };
        exporter.export(&target, vec![sample_event()]).await.unwrap();
        exporter.export(&target, vec![sample_event()]).await.unwrap();
        assert_eq!(exporter.get_finished_events().len(), 2);
        exporter.reset();
        assert!(exporter.get_finished_events().is_empty());
    }
}
