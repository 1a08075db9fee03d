//! Best-effort anti-spoofing cache for distributed-trace tokens.
//!
//! When a request is part of a larger distributed trace, its trace id is
//! parked here so that a later out-of-band flush call can be verified as
//! corresponding to a request that was actually observed. The check is
//! best-effort: a miss blocks the flush side channel, never normal export.

use std::collections::HashMap;
use std::fmt::Debug;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use crate::trace::TraceId;

/// How long a parked token stays valid.
pub const DEFAULT_TOKEN_TTL: Duration = Duration::from_secs(90);

/// Short-lived key/value store for observed trace ids.
pub trait TraceTokenCache: Debug + Send + Sync {
    /// Park a trace id.
    fn put(&self, trace_id: TraceId);

    /// Consume a parked trace id: returns `true` and removes the entry if it
    /// was present and unexpired.
    fn take(&self, trace_id: TraceId) -> bool;
}

/// In-process [`TraceTokenCache`] with TTL-based expiry.
#[derive(Debug)]
pub struct InMemoryTraceCache {
    ttl: Duration,
    entries: Mutex<HashMap<TraceId, Instant>>,
}

impl InMemoryTraceCache {
    pub fn new(ttl: Duration) -> Self {
        InMemoryTraceCache {
            ttl,
            entries: Mutex::new(HashMap::new()),
        }
    }
}

impl Default for InMemoryTraceCache {
    fn default() -> Self {
        Self::new(DEFAULT_TOKEN_TTL)
    }
}

impl TraceTokenCache for InMemoryTraceCache {
    fn put(&self, trace_id: TraceId) {
        if let Ok(mut entries) = self.entries.lock() {
            let now = Instant::now();
            // Opportunistic sweep so abandoned tokens don't accumulate.
            entries.retain(|_, expires| *expires > now);
            entries.insert(trace_id, now + self.ttl);
        }
    }

    fn take(&self, trace_id: TraceId) -> bool {
        self.entries
            .lock()
            .ok()
            .and_then(|mut entries| entries.remove(&trace_id))
            .map(|expires| expires > Instant::now())
            .unwrap_or(false)
    }
}
