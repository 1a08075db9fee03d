//! Instrumentation for stateful-object fetch handlers.
//!
//! Objects are only ever reached through a namespace binding, so every
//! inbound request is part of a larger trace. The wrapper therefore always
//! honors the inbound propagation header, regardless of configuration, and
//! exports inline before returning: objects have no deferred-execution
//! facility that outlives the call.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use http::{Request, Response};

use crate::config::TracerConfig;
use crate::error::HandlerError;
use crate::export::EventExporter;
use crate::trace::RequestTracer;

use super::FetchContext;

/// A stateful object's fetch handler.
#[async_trait]
pub trait ObjectHandler: Send + Sync {
    async fn fetch(
        &self,
        request: Request<Bytes>,
        cx: &FetchContext,
    ) -> Result<Response<Bytes>, HandlerError>;

    /// Service label for this object's spans when the configuration leaves it
    /// empty. Defaults to the implementing type's name.
    fn service_name(&self) -> String {
        std::any::type_name::<Self>()
            .rsplit("::")
            .next()
            .unwrap_or("object")
            .to_string()
    }
}

/// Instrumented wrapper around a stateful-object handler.
#[derive(Debug)]
pub struct WrappedObject<O> {
    config: TracerConfig,
    exporter: Arc<dyn EventExporter>,
    object: O,
}

/// Wrap a stateful-object handler. The configuration's `accept_trace_context`
/// flag is ignored here; objects always join the caller's trace.
pub fn wrap_durable_object<O>(
    config: TracerConfig,
    exporter: Arc<dyn EventExporter>,
    object: O,
) -> WrappedObject<O>
where
    O: ObjectHandler,
{
    WrappedObject {
        config,
        exporter,
        object,
    }
}

impl<O> WrappedObject<O>
where
    O: ObjectHandler,
{
    /// Dispatch one inbound request.
    pub async fn fetch(
        &self,
        request: Request<Bytes>,
        cx: FetchContext,
    ) -> Result<Response<Bytes>, HandlerError> {
        let mut resolved = match self.config.resolve(Some(cx.env())) {
            Some(resolved) => resolved,
            None => {
                tracing::warn!("credential or dataset unavailable, request not instrumented");
                return self.object.fetch(request, &cx).await;
            }
        };
        resolved.accept_trace_context = true;
        if resolved.service_name.is_empty() {
            resolved.service_name = self.object.service_name();
        }

        let tracer = RequestTracer::new(&request, &resolved, Arc::clone(&self.exporter));
        let instrumented = cx.instrumented(&tracer);
        let result = self.object.fetch(request, &instrumented).await;
        match &result {
            Ok(response) => tracer.finish_response(Some(response), None),
            Err(error) => tracer.finish_response(None, Some(error.as_ref())),
        }
        tracer.send_events(&[]).await;
        result
    }
}
