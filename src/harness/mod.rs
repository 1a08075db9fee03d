//! Instrumentation wrappers for the three entry-point shapes.
//!
//! Each wrapper takes the original handler as a value and returns a wrapper
//! of the same capability signature; handlers are never mutated in place and
//! never need to know they are traced. Collaborators (exporter, token cache,
//! deferred-execution facility) are injected explicitly.

mod env;
mod event;
mod module;
mod object;

pub use env::{Env, EnvBuilder, FetchService, ObjectNamespace};
pub use event::{
    wrap_event_listener, BackgroundHandle, EventOutcome, FetchEvent, ResponseFuture, TaskFuture,
    WrappedListener, RESPONSE_SETTLE_GRACE,
};
pub use module::{wrap_module, ModuleHandler, WrappedModule, FLUSH_EVENT_PATH};
pub use object::{wrap_durable_object, ObjectHandler, WrappedObject};

use std::sync::Arc;

use futures_util::future::BoxFuture;

use crate::trace::RequestTracer;

/// The surrounding runtime's deferred-execution facility: keeps the request's
/// execution context alive until the given future settles.
pub trait ExecutionContext: Send + Sync {
    fn wait_until(&self, task: BoxFuture<'static, ()>);
}

/// Per-call context handed to module- and object-style handlers alongside the
/// request.
///
/// An instrumented call carries a traced environment and a [`RequestTracer`]
/// handle; an uninstrumented call carries the originals and no tracer, so
/// handlers behave identically either way.
#[derive(Clone)]
pub struct FetchContext {
    env: Env,
    execution: Option<Arc<dyn ExecutionContext>>,
    trace: Option<RequestTracer>,
}

impl std::fmt::Debug for FetchContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FetchContext")
            .field("env", &self.env)
            .field("instrumented", &self.trace.is_some())
            .finish_non_exhaustive()
    }
}

impl FetchContext {
    pub fn new(env: Env) -> Self {
        FetchContext {
            env,
            execution: None,
            trace: None,
        }
    }

    /// Attach the runtime's deferred-execution facility.
    pub fn with_execution(mut self, execution: Arc<dyn ExecutionContext>) -> Self {
        self.execution = Some(execution);
        self
    }

    /// The environment bindings visible to the handler.
    pub fn env(&self) -> &Env {
        &self.env
    }

    /// The deferred-execution facility, when the entry point has one.
    pub fn execution(&self) -> Option<&Arc<dyn ExecutionContext>> {
        self.execution.as_ref()
    }

    /// The request's tracer, present only on instrumented calls. Handlers may
    /// use it to attach data to the root span.
    pub fn trace(&self) -> Option<&RequestTracer> {
        self.trace.as_ref()
    }

    /// Derive the context handed to the wrapped handler: same execution
    /// facility, traced environment, tracer attached.
    pub(crate) fn instrumented(&self, tracer: &RequestTracer) -> FetchContext {
        FetchContext {
            env: self.env.traced(tracer),
            execution: self.execution.clone(),
            trace: Some(tracer.clone()),
        }
    }
}
