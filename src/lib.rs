//! Request tracing instrumentation for edge service handlers.
//!
//! `edge-trace` wraps the three handler shapes an edge runtime dispatches to
//! (callback-style fetch listeners, module-style handlers, and stateful
//! objects) so that each inbound request becomes a tree of spans: one root
//! span for the request itself and a child span for every nested call the
//! handler makes through its environment bindings. When the request has
//! fully settled, including background work scheduled past the response, the
//! tree is rendered into flat event documents and exported.
//!
//! Traces cross service boundaries through the W3C `traceparent` header:
//! nested calls carry it outward automatically, and entry points opt in to
//! honoring it inbound via [`TracerConfig::with_accept_trace_context`]
//! (stateful objects always honor it).
//!
//! Handlers never observe the instrumentation. They receive the same
//! request, environment, and context surfaces they would without it, and a
//! missing credential or dataset simply disables tracing for that call.
//!
//! ```
//! use std::sync::Arc;
//!
//! use bytes::Bytes;
//! use edge_trace::export::InMemoryEventExporter;
//! use edge_trace::{wrap_event_listener, TracerConfig};
//! use http::{Request, Response};
//!
//! # async fn run() {
//! let config = TracerConfig::new("my-worker")
//!     .with_api_key("api-key")
//!     .with_dataset("production");
//! let exporter = Arc::new(InMemoryEventExporter::new());
//!
//! let mut listener = wrap_event_listener(config, exporter, |event| {
//!     event.respond_with(async {
//!         Ok(Response::builder().status(200).body(Bytes::new())?)
//!     });
//!     Ok(())
//! });
//!
//! let request = Request::builder()
//!     .uri("https://example.com/")
//!     .body(Bytes::new())
//!     .unwrap();
//! let outcome = listener.handle(request);
//! # let _ = outcome;
//! # }
//! ```

#![warn(missing_debug_implementations, rust_2018_idioms, unreachable_pub)]
#![cfg_attr(docsrs, feature(doc_cfg))]

pub mod cache;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod export;
pub mod harness;
pub mod trace;

pub use config::TracerConfig;
pub use harness::{
    wrap_durable_object, wrap_event_listener, wrap_module, Env, FetchContext, FetchEvent,
};
pub use trace::{RequestTracer, SpanHandle, TraceContext};
