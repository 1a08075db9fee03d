//! Tracer configuration and per-call resolution.

use crate::export::ExportTarget;
use crate::harness::Env;

/// Environment binding that overrides the configured access credential.
pub const API_KEY_VAR: &str = "TRACE_API_KEY";
/// Environment binding that overrides the configured dataset.
pub const DATASET_VAR: &str = "TRACE_DATASET";

/// User-supplied tracing configuration.
///
/// The credential and dataset may instead arrive through environment bindings
/// at call time ([`API_KEY_VAR`] / [`DATASET_VAR`]); environment values win.
/// If either is missing after resolution, instrumentation is disabled for
/// that call and the wrapped handler runs untouched.
#[derive(Clone, Debug, Default)]
pub struct TracerConfig {
    pub api_key: Option<String>,
    pub dataset: Option<String>,
    pub service_name: String,
    /// Honor an inbound `traceparent` header when building the root context.
    /// Off by default for entry points exposed to untrusted callers; forced
    /// on for stateful objects, which are always part of a larger trace.
    pub accept_trace_context: bool,
}

impl TracerConfig {
    /// Create a configuration with the given service label.
    pub fn new(service_name: impl Into<String>) -> Self {
        TracerConfig {
            service_name: service_name.into(),
            ..Default::default()
        }
    }

    /// Set the backend access credential.
    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    /// Set the destination dataset.
    pub fn with_dataset(mut self, dataset: impl Into<String>) -> Self {
        self.dataset = Some(dataset.into());
        self
    }

    /// Honor inbound `traceparent` headers.
    pub fn with_accept_trace_context(mut self, accept: bool) -> Self {
        self.accept_trace_context = accept;
        self
    }

    /// Resolve the effective configuration for one call, applying environment
    /// overrides. Returns `None` when credential or dataset is unavailable.
    pub(crate) fn resolve(&self, env: Option<&Env>) -> Option<ResolvedConfig> {
        let api_key = env
            .and_then(|env| env.var(API_KEY_VAR))
            .map(str::to_owned)
            .or_else(|| self.api_key.clone())?;
        let dataset = env
            .and_then(|env| env.var(DATASET_VAR))
            .map(str::to_owned)
            .or_else(|| self.dataset.clone())?;
        Some(ResolvedConfig {
            target: ExportTarget { api_key, dataset },
            service_name: self.service_name.clone(),
            accept_trace_context: self.accept_trace_context,
        })
    }
}

/// Effective configuration for one instrumented call.
#[derive(Clone, Debug)]
pub(crate) struct ResolvedConfig {
    pub(crate) target: ExportTarget,
    pub(crate) service_name: String,
    pub(crate) accept_trace_context: bool,
}
