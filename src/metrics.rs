//! Pluggable metrics for evaluations and reloads.
//!
//! The engine reports to a process-wide [`MetricsSink`]. Until one is set
//! with [`set_sink`], events are dropped.
//!
//! ```ignore
//! use canopy_core::metrics::{MetricsSink, EvaluationStats, ReloadStats};
//! use std::sync::atomic::{AtomicU64, Ordering};
//! use std::sync::Arc;
//!
//! struct Counter(AtomicU64);
//!
//! impl MetricsSink for Counter {
//!     fn on_evaluation(&self, _stats: &EvaluationStats) {
//!         self.0.fetch_add(1, Ordering::Relaxed);
//!     }
//!
//!     fn on_reload(&self, _stats: &ReloadStats) {}
//! }
//!
//! canopy_core::metrics::set_sink(Arc::new(Counter(AtomicU64::new(0))));
//! ```

use std::sync::{Arc, OnceLock};
use std::time::{Duration, SystemTime};

use serde::Serialize;
use tracing::warn;

use crate::types::PolicyVersion;

/// One completed evaluation.
#[derive(Debug, Clone, Serialize)]
pub struct EvaluationStats {
    pub duration: Duration,
    pub allowed: bool,
    pub principal_id: String,
    pub action_id: String,
    /// Ids of the policies that determined the decision.
    pub reasons: Vec<String>,
    /// Number of policies that raised an evaluation error.
    pub errors: usize,
}

/// Where the time of one evaluation went, in milliseconds.
#[derive(Debug, Clone, Default, Serialize)]
pub struct EvaluationPhases {
    pub validate_request_ms: f64,
    pub scope_ms: f64,
    pub conditions_ms: f64,
    pub total_ms: f64,
}

impl EvaluationPhases {
    /// Time not attributed to any phase: locking, logging, bookkeeping.
    pub fn overhead_ms(&self) -> f64 {
        self.total_ms - (self.validate_request_ms + self.scope_ms + self.conditions_ms)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ReloadStats {
    pub reload_time: SystemTime,
    pub version: PolicyVersion,
    pub policies: usize,
}

pub trait MetricsSink: Send + Sync {
    fn on_evaluation(&self, stats: &EvaluationStats);

    fn on_reload(&self, stats: &ReloadStats);

    fn on_evaluation_phases(&self, _stats: &EvaluationStats, _phases: &EvaluationPhases) {}
}

static SINK: OnceLock<Arc<dyn MetricsSink>> = OnceLock::new();

/// Install the global sink. Only the first call takes effect.
pub fn set_sink(sink: Arc<dyn MetricsSink>) {
    if SINK.set(sink).is_err() {
        warn!(
            event = "Metrics",
            "Metrics sink was already initialized. Ignoring subsequent set_sink call."
        );
    }
}

pub(crate) fn record_evaluation(stats: EvaluationStats, phases: EvaluationPhases) {
    if let Some(sink) = SINK.get() {
        sink.on_evaluation(&stats);
        sink.on_evaluation_phases(&stats, &phases);
    }
}

pub(crate) fn record_reload(version: PolicyVersion, policies: usize) {
    if let Some(sink) = SINK.get() {
        sink.on_reload(&ReloadStats {
            reload_time: SystemTime::now(),
            version,
            policies,
        });
    }
}
