//! Settlement tracking for a request's asynchronous work.
//!
//! One [`CompletionCoordinator`] exists per instrumented request. The harness
//! registers every unit of in-flight work (the primary response path and each
//! background task) and awaits [`completion`], which resolves exactly once:
//! when the primary path has settled and every registered task has run, or
//! immediately after primary settlement if no task was ever registered.
//!
//! [`completion`]: CompletionCoordinator::completion

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::task::{Context, Poll, Waker};

use futures_util::future::BoxFuture;
use futures_util::stream::{FuturesUnordered, StreamExt};

struct Inner {
    inbox: Vec<BoxFuture<'static, ()>>,
    registered: usize,
    primary_settled: bool,
    waker: Option<Waker>,
}

/// Tracks the open set of in-flight tasks for one request.
///
/// Clones share the same state. Registered tasks are driven by the
/// [`Completion`] future; they are not polled until it is.
#[derive(Clone)]
pub struct CompletionCoordinator {
    inner: Arc<Mutex<Inner>>,
}

/// Handle to one registered task.
#[derive(Clone, Debug)]
pub struct TaskHandle {
    settled: Arc<AtomicBool>,
}

impl TaskHandle {
    /// Whether the task has run to completion.
    pub fn is_settled(&self) -> bool {
        self.settled.load(Ordering::Acquire)
    }
}

impl CompletionCoordinator {
    pub fn new() -> Self {
        CompletionCoordinator {
            inner: Arc::new(Mutex::new(Inner {
                inbox: Vec::new(),
                registered: 0,
                primary_settled: false,
                waker: None,
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Register a unit of asynchronous work. The task's own failures must be
    /// handled inside the future; the coordinator only observes settlement.
    ///
    /// Tasks may be registered at any point before full settlement, including
    /// from within other registered tasks.
    pub fn register<F>(&self, task: F) -> TaskHandle
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let settled = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&settled);
        let task = Box::pin(async move {
            task.await;
            flag.store(true, Ordering::Release);
        });

        let mut inner = self.lock();
        inner.inbox.push(task);
        inner.registered += 1;
        if let Some(waker) = inner.waker.take() {
            waker.wake();
        }
        TaskHandle { settled }
    }

    /// Number of tasks registered so far.
    pub fn registered_tasks(&self) -> usize {
        self.lock().registered
    }

    /// Record that the primary response path has settled. Completion is never
    /// reported before this, even with an empty task set.
    pub fn mark_primary_settled(&self) {
        let mut inner = self.lock();
        inner.primary_settled = true;
        if let Some(waker) = inner.waker.take() {
            waker.wake();
        }
    }

    /// The aggregate settlement future. Drives all registered tasks and
    /// resolves once the termination rule is met.
    pub fn completion(&self) -> Completion {
        Completion {
            coordinator: self.clone(),
            running: FuturesUnordered::new(),
        }
    }
}

impl Default for CompletionCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for CompletionCoordinator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.lock();
        f.debug_struct("CompletionCoordinator")
            .field("registered", &inner.registered)
            .field("pending", &inner.inbox.len())
            .field("primary_settled", &inner.primary_settled)
            .finish()
    }
}

/// Future returned by [`CompletionCoordinator::completion`].
#[must_use = "futures do nothing unless polled"]
pub struct Completion {
    coordinator: CompletionCoordinator,
    running: FuturesUnordered<BoxFuture<'static, ()>>,
}

impl fmt::Debug for Completion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Completion")
            .field("running", &self.running.len())
            .finish()
    }
}

impl Future for Completion {
    type Output = ();

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        let this = self.get_mut();
        loop {
            {
                let mut inner = this.coordinator.lock();
                for task in inner.inbox.drain(..) {
                    this.running.push(task);
                }
                inner.waker = Some(cx.waker().clone());
            }

            match this.running.poll_next_unpin(cx) {
                Poll::Ready(Some(())) => continue,
                Poll::Ready(None) => {
                    let inner = this.coordinator.lock();
                    if !inner.inbox.is_empty() {
                        continue;
                    }
                    if inner.primary_settled {
                        return Poll::Ready(());
                    }
                    return Poll::Pending;
                }
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}
