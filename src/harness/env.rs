//! Environment bindings and their traced decorators.
//!
//! An [`Env`] is what the surrounding runtime hands a handler: named
//! variables, named fetch-capable service bindings, and named stateful-object
//! namespaces. The harness decorates a copy of the environment so that every
//! nested call a handler makes through a binding automatically becomes a
//! child span carrying the propagation header.

use std::collections::HashMap;
use std::fmt::Debug;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use http::{Request, Response};

use crate::error::FetchError;
use crate::trace::RequestTracer;

/// A fetch-capable binding: an internal service, an external origin, or a
/// stateful-object stub.
#[async_trait]
pub trait FetchService: Debug + Send + Sync {
    async fn fetch(&self, request: Request<Bytes>) -> Result<Response<Bytes>, FetchError>;
}

/// A namespace of stateful objects addressable by id.
pub trait ObjectNamespace: Debug + Send + Sync {
    fn get(&self, id: &str) -> Arc<dyn FetchService>;
}

/// Named bindings visible to a handler.
#[derive(Clone, Debug, Default)]
pub struct Env {
    vars: HashMap<String, String>,
    services: HashMap<String, Arc<dyn FetchService>>,
    namespaces: HashMap<String, Arc<dyn ObjectNamespace>>,
}

impl Env {
    pub fn builder() -> EnvBuilder {
        EnvBuilder::default()
    }

    /// Look up a named variable.
    pub fn var(&self, name: &str) -> Option<&str> {
        self.vars.get(name).map(String::as_str)
    }

    /// Look up a named fetch binding.
    pub fn service(&self, name: &str) -> Option<Arc<dyn FetchService>> {
        self.services.get(name).cloned()
    }

    /// Look up a named object namespace.
    pub fn namespace(&self, name: &str) -> Option<Arc<dyn ObjectNamespace>> {
        self.namespaces.get(name).cloned()
    }

    /// A copy of this environment with every fetch-capable binding wrapped so
    /// its calls become child spans of `tracer`'s root span. Variables pass
    /// through untouched.
    pub(crate) fn traced(&self, tracer: &RequestTracer) -> Env {
        let services = self
            .services
            .iter()
            .map(|(name, service)| {
                let traced: Arc<dyn FetchService> = Arc::new(TracedFetch {
                    inner: Arc::clone(service),
                    tracer: tracer.clone(),
                    service_name: name.clone(),
                });
                (name.clone(), traced)
            })
            .collect();
        let namespaces = self
            .namespaces
            .iter()
            .map(|(name, namespace)| {
                let traced: Arc<dyn ObjectNamespace> = Arc::new(TracedNamespace {
                    inner: Arc::clone(namespace),
                    tracer: tracer.clone(),
                    service_name: name.clone(),
                });
                (name.clone(), traced)
            })
            .collect();
        Env {
            vars: self.vars.clone(),
            services,
            namespaces,
        }
    }
}

/// Builder for [`Env`].
#[derive(Debug, Default)]
pub struct EnvBuilder {
    env: Env,
}

impl EnvBuilder {
    pub fn var(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.vars.insert(name.into(), value.into());
        self
    }

    pub fn service(mut self, name: impl Into<String>, service: Arc<dyn FetchService>) -> Self {
        self.env.services.insert(name.into(), service);
        self
    }

    pub fn namespace(mut self, name: impl Into<String>, namespace: Arc<dyn ObjectNamespace>) -> Self {
        self.env.namespaces.insert(name.into(), namespace);
        self
    }

    pub fn build(self) -> Env {
        self.env
    }
}

/// Decorator that opens a child span around every call through a binding and
/// forwards the propagation header on the outgoing request.
#[derive(Debug)]
struct TracedFetch {
    inner: Arc<dyn FetchService>,
    tracer: RequestTracer,
    service_name: String,
}

#[async_trait]
impl FetchService for TracedFetch {
    async fn fetch(&self, mut request: Request<Bytes>) -> Result<Response<Bytes>, FetchError> {
        let span = self
            .tracer
            .start_child_span(request.uri().to_string(), self.service_name.as_str());
        span.context().inject(request.headers_mut());
        span.add_request(&request);

        match self.inner.fetch(request).await {
            Ok(response) => {
                span.add_response(&response);
                span.finish();
                Ok(response)
            }
            Err(error) => {
                span.add_error(error.as_ref());
                span.finish();
                Err(error)
            }
        }
    }
}

#[derive(Debug)]
struct TracedNamespace {
    inner: Arc<dyn ObjectNamespace>,
    tracer: RequestTracer,
    service_name: String,
}

impl ObjectNamespace for TracedNamespace {
    fn get(&self, id: &str) -> Arc<dyn FetchService> {
        Arc::new(TracedFetch {
            inner: self.inner.get(id),
            tracer: self.tracer.clone(),
            service_name: self.service_name.clone(),
        })
    }
}
