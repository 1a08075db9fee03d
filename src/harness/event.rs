//! Instrumentation for callback-style fetch listeners.
//!
//! The runtime delivers a [`FetchEvent`] carrying the request plus two
//! capabilities: publishing the response and scheduling background work that
//! outlives the response. [`wrap_event_listener`] decorates a listener so
//! that both capabilities are observed, the request becomes a span tree, and
//! export happens exactly once after everything has settled.

use std::future::{ready, Future};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures_channel::oneshot;
use futures_timer::Delay;
use futures_util::future::BoxFuture;
use http::{Request, Response};
use serde_json::{json, Map};

use crate::config::{ResolvedConfig, TracerConfig};
use crate::coordinator::CompletionCoordinator;
use crate::error::{HandlerError, TaskError};
use crate::export::EventExporter;
use crate::trace::RequestTracer;

/// Pause between the response settling and the request being considered
/// fully settled, so background work scheduled right after the response
/// resolves is still captured.
pub const RESPONSE_SETTLE_GRACE: Duration = Duration::from_millis(1);

/// Name of the synthetic span covering background work. Only exported when
/// the background primitive was actually used.
const BACKGROUND_SPAN_NAME: &str = "waitUntil";

/// The response promise a listener publishes.
pub type ResponseFuture = BoxFuture<'static, Result<Response<Bytes>, HandlerError>>;

/// A unit of background work scheduled by a listener.
pub type TaskFuture = BoxFuture<'static, Result<(), TaskError>>;

/// Capability for scheduling background work past the response.
///
/// Cloneable so listeners can hand it to spawned work; tasks registered
/// through any clone delay settlement of the originating request.
#[derive(Clone)]
pub struct BackgroundHandle {
    sink: Arc<dyn Fn(TaskFuture) + Send + Sync>,
}

impl BackgroundHandle {
    /// Schedule background work. The request is not considered settled until
    /// the task completes.
    pub fn schedule<F>(&self, task: F)
    where
        F: Future<Output = Result<(), TaskError>> + Send + 'static,
    {
        (self.sink)(Box::pin(task));
    }
}

impl std::fmt::Debug for BackgroundHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackgroundHandle").finish_non_exhaustive()
    }
}

/// One inbound request as seen by a callback-style listener.
pub struct FetchEvent {
    request: Request<Bytes>,
    respond: Option<Box<dyn FnOnce(ResponseFuture) + Send>>,
    background: BackgroundHandle,
}

impl FetchEvent {
    /// The inbound request.
    pub fn request(&self) -> &Request<Bytes> {
        &self.request
    }

    /// Publish the response. Only the first call has any effect.
    pub fn respond_with<F>(&mut self, response: F)
    where
        F: Future<Output = Result<Response<Bytes>, HandlerError>> + Send + 'static,
    {
        match self.respond.take() {
            Some(respond) => respond(Box::pin(response)),
            None => tracing::debug!("response already published, ignoring"),
        }
    }

    /// Schedule background work that outlives the response.
    pub fn wait_until<F>(&self, task: F)
    where
        F: Future<Output = Result<(), TaskError>> + Send + 'static,
    {
        self.background.schedule(task);
    }

    /// A cloneable handle for scheduling background work after the listener
    /// returns.
    pub fn background(&self) -> BackgroundHandle {
        self.background.clone()
    }
}

impl std::fmt::Debug for FetchEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FetchEvent")
            .field("request", &self.request)
            .field("responded", &self.respond.is_none())
            .finish_non_exhaustive()
    }
}

/// What one dispatched event produced.
///
/// The runtime must drive both futures: `response` yields the published
/// response (absent when the listener never responded), and `settled`
/// resolves once all background work has run and the trace is exported.
/// The two make progress together, so poll them concurrently.
pub struct EventOutcome {
    pub response: Option<ResponseFuture>,
    pub settled: BoxFuture<'static, ()>,
}

impl std::fmt::Debug for EventOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventOutcome")
            .field("responded", &self.response.is_some())
            .finish_non_exhaustive()
    }
}

/// Instrumented wrapper around a callback-style listener.
pub struct WrappedListener<L> {
    config: TracerConfig,
    exporter: Arc<dyn EventExporter>,
    listener: L,
}

impl<L> std::fmt::Debug for WrappedListener<L> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WrappedListener")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

/// Wrap a callback-style listener. The listener receives the same
/// [`FetchEvent`] surface it would without instrumentation.
pub fn wrap_event_listener<L>(
    config: TracerConfig,
    exporter: Arc<dyn EventExporter>,
    listener: L,
) -> WrappedListener<L>
where
    L: FnMut(&mut FetchEvent) -> Result<(), HandlerError>,
{
    WrappedListener {
        config,
        exporter,
        listener,
    }
}

impl<L> WrappedListener<L>
where
    L: FnMut(&mut FetchEvent) -> Result<(), HandlerError>,
{
    /// Dispatch one inbound request to the listener.
    pub fn handle(&mut self, request: Request<Bytes>) -> EventOutcome {
        let coordinator = CompletionCoordinator::new();
        match self.config.resolve(None) {
            Some(resolved) => self.handle_instrumented(request, resolved, coordinator),
            None => {
                tracing::warn!("credential or dataset unavailable, request not instrumented");
                self.handle_passthrough(request, coordinator)
            }
        }
    }

    fn handle_instrumented(
        &mut self,
        request: Request<Bytes>,
        resolved: ResolvedConfig,
        coordinator: CompletionCoordinator,
    ) -> EventOutcome {
        let tracer = RequestTracer::new(&request, &resolved, Arc::clone(&self.exporter));
        let background_span =
            tracer.start_child_span(BACKGROUND_SPAN_NAME, resolved.service_name.clone());
        let background_used = Arc::new(AtomicBool::new(false));

        let (tx, rx) = oneshot::channel::<Result<Response<Bytes>, HandlerError>>();

        let respond: Box<dyn FnOnce(ResponseFuture) + Send> = {
            let coordinator = coordinator.clone();
            let tracer = tracer.clone();
            Box::new(move |future| {
                let settle = coordinator.clone();
                coordinator.register(async move {
                    let result = future.await;
                    let root = tracer.root_span();
                    match &result {
                        Ok(response) => root.add_response(response),
                        Err(error) => root.add_error(error.as_ref()),
                    }
                    let _ = tx.send(result);
                    // Finalize after the settle window so instrumentation
                    // racing the response can still land on the root span.
                    Delay::new(RESPONSE_SETTLE_GRACE).await;
                    root.finish();
                    settle.mark_primary_settled();
                });
            })
        };

        let background = {
            let coordinator = coordinator.clone();
            let tracer = tracer.clone();
            let span = background_span.clone();
            let used = Arc::clone(&background_used);
            BackgroundHandle {
                sink: Arc::new(move |task: TaskFuture| {
                    // The span's clock starts at first use, not at wrap time.
                    if !used.swap(true, Ordering::AcqRel) {
                        span.restart();
                    }
                    let tracer = tracer.clone();
                    let span = span.clone();
                    coordinator.register(async move {
                        if let Err(error) = task.await {
                            span.add_error(error.as_ref());
                            tracer.add_data(Map::from_iter([
                                ("exception".into(), json!(true)),
                                ("wait_until_exception".into(), json!(error.to_string())),
                            ]));
                            tracing::warn!(error = %error, "background task failed");
                        }
                    });
                }),
            }
        };

        let mut event = FetchEvent {
            request,
            respond: Some(respond),
            background,
        };
        let listener_result = (self.listener)(&mut event);
        let responded = event.respond.is_none();
        drop(event);

        let response: Option<ResponseFuture> = match (responded, listener_result) {
            (true, Ok(())) => Some(awaited(rx)),
            (true, Err(error)) => {
                tracer.root_span().add_error(error.as_ref());
                tracing::warn!(error = %error, "listener failed after responding");
                Some(awaited(rx))
            }
            (false, Ok(())) => {
                tracer.finish_response(None, None);
                coordinator.mark_primary_settled();
                None
            }
            (false, Err(error)) => {
                tracer.finish_response(None, Some(error.as_ref()));
                coordinator.mark_primary_settled();
                Some(Box::pin(ready(Err(error))))
            }
        };

        let settled: BoxFuture<'static, ()> = {
            let completion = coordinator.completion();
            Box::pin(async move {
                completion.await;
                background_span.finish();
                if background_used.load(Ordering::Acquire) {
                    tracer.send_events(&[]).await;
                } else {
                    tracer.send_events(&[BACKGROUND_SPAN_NAME]).await;
                }
            })
        };

        EventOutcome { response, settled }
    }

    fn handle_passthrough(
        &mut self,
        request: Request<Bytes>,
        coordinator: CompletionCoordinator,
    ) -> EventOutcome {
        let (tx, rx) = oneshot::channel::<Result<Response<Bytes>, HandlerError>>();

        let respond: Box<dyn FnOnce(ResponseFuture) + Send> = {
            let coordinator = coordinator.clone();
            Box::new(move |future| {
                let settle = coordinator.clone();
                coordinator.register(async move {
                    let _ = tx.send(future.await);
                    settle.mark_primary_settled();
                });
            })
        };

        let background = {
            let coordinator = coordinator.clone();
            BackgroundHandle {
                sink: Arc::new(move |task: TaskFuture| {
                    coordinator.register(async move {
                        if let Err(error) = task.await {
                            tracing::warn!(error = %error, "background task failed");
                        }
                    });
                }),
            }
        };

        let mut event = FetchEvent {
            request,
            respond: Some(respond),
            background,
        };
        let listener_result = (self.listener)(&mut event);
        let responded = event.respond.is_none();
        drop(event);

        let response: Option<ResponseFuture> = match (responded, listener_result) {
            (true, _) => Some(awaited(rx)),
            (false, Ok(())) => {
                coordinator.mark_primary_settled();
                None
            }
            (false, Err(error)) => {
                coordinator.mark_primary_settled();
                Some(Box::pin(ready(Err(error))))
            }
        };

        let completion = coordinator.completion();
        EventOutcome {
            response,
            settled: Box::pin(completion),
        }
    }
}

fn awaited(rx: oneshot::Receiver<Result<Response<Bytes>, HandlerError>>) -> ResponseFuture {
    Box::pin(async move {
        rx.await
            .unwrap_or_else(|_| Err("response task dropped before settling".into()))
    })
}
