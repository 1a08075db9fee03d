//! End-to-end trace flow across service boundaries: a module-style gateway
//! calls a stateful object through a service binding, and every span of the
//! resulting distributed trace lands in one exporter under one trace id.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use edge_trace::cache::InMemoryTraceCache;
use edge_trace::error::{FetchError, HandlerError};
use edge_trace::export::InMemoryEventExporter;
use edge_trace::harness::{
    wrap_durable_object, wrap_module, FetchService, ModuleHandler, ObjectHandler, WrappedObject,
};
use edge_trace::{Env, FetchContext, TracerConfig};
use http::{Request, Response};

#[derive(Debug)]
struct Counter;

#[async_trait]
impl ObjectHandler for Counter {
    async fn fetch(
        &self,
        _request: Request<Bytes>,
        _cx: &FetchContext,
    ) -> Result<Response<Bytes>, HandlerError> {
        Ok(Response::builder().status(200).body(Bytes::from_static(b"1"))?)
    }
}

/// Service binding that routes into a wrapped stateful object, the way a
/// namespace stub does in production.
#[derive(Debug)]
struct ObjectBinding {
    object: Arc<WrappedObject<Counter>>,
}

#[async_trait]
impl FetchService for ObjectBinding {
    async fn fetch(&self, request: Request<Bytes>) -> Result<Response<Bytes>, FetchError> {
        self.object
            .fetch(request, FetchContext::new(Env::default()))
            .await
    }
}

#[derive(Debug)]
struct Gateway;

#[async_trait]
impl ModuleHandler for Gateway {
    async fn fetch(
        &self,
        _request: Request<Bytes>,
        cx: &FetchContext,
    ) -> Result<Response<Bytes>, HandlerError> {
        let counter = cx.env().service("COUNTER").ok_or("missing COUNTER binding")?;
        let request = Request::builder()
            .uri("https://counter.internal/increment")
            .body(Bytes::new())?;
        Ok(counter.fetch(request).await?)
    }
}

#[tokio::test]
async fn distributed_trace_spans_share_one_trace() {
    let exporter = Arc::new(InMemoryEventExporter::new());

    let object = Arc::new(wrap_durable_object(
        TracerConfig::new("counter")
            .with_api_key("key")
            .with_dataset("dataset"),
        exporter.clone() as Arc<dyn edge_trace::export::EventExporter>,
        Counter,
    ));

    let gateway = wrap_module(
        TracerConfig::new("gateway")
            .with_api_key("key")
            .with_dataset("dataset"),
        exporter.clone() as Arc<dyn edge_trace::export::EventExporter>,
        Arc::new(InMemoryTraceCache::default()),
        Gateway,
    );

    let env = Env::builder()
        .service("COUNTER", Arc::new(ObjectBinding { object }))
        .build();
    let request = Request::builder()
        .uri("https://example.com/orders")
        .body(Bytes::new())
        .unwrap();

    let response = gateway
        .fetch(request, FetchContext::new(env))
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    assert_eq!(response.body(), "1");

    let events = exporter.get_finished_events();
    assert_eq!(events.len(), 3);

    let gateway_root = events
        .iter()
        .find(|event| event.service_name == "gateway")
        .unwrap();
    let nested_call = events
        .iter()
        .find(|event| event.service_name == "COUNTER")
        .unwrap();
    let object_root = events
        .iter()
        .find(|event| event.service_name == "counter")
        .unwrap();

    assert_eq!(gateway_root.name, "/orders");
    assert_eq!(gateway_root.parent_id, None);
    assert_eq!(nested_call.trace_id, gateway_root.trace_id);
    assert_eq!(nested_call.parent_id, Some(gateway_root.span_id));
    assert_eq!(object_root.trace_id, gateway_root.trace_id);
    assert_eq!(object_root.parent_id, Some(nested_call.span_id));
    assert_eq!(object_root.name, "/increment");
}
