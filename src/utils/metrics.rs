use std::collections::HashMap;
use std::sync::Arc;
use parking_lot::Mutex;
use lazy_static::lazy_static;

pub const VOTES_ACCEPTED: &str = "votes_accepted";
pub const VOTES_REJECTED: &str = "votes_rejected";
pub const PROPOSALS_ACCEPTED: &str = "proposals_accepted";
pub const PROPOSALS_REJECTED: &str = "proposals_rejected";
pub const BLOCKS_NOTARIZED: &str = "blocks_notarized";
pub const ITERATIONS_TIMED_OUT: &str = "iterations_timed_out";
pub const FINALIZE_RECEIVED: &str = "finalize_received";
pub const MESSAGES_FAILED: &str = "messages_failed";
pub const ITERATION: &str = "iteration";

/// Metrics registry (simple, Prometheus-style)
#[derive(Clone, Default)]
pub struct MetricsRegistry {
    counters: Arc<Mutex<HashMap<String, u64>>>,
    gauges: Arc<Mutex<HashMap<String, f64>>>,
}

impl MetricsRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn inc_counter(&self, name: &str) {
        let mut counters = self.counters.lock();
        *counters.entry(name.to_string()).or_insert(0) += 1;
    }

    pub fn set_gauge(&self, name: &str, val: f64) {
        self.gauges.lock().insert(name.to_string(), val);
    }

    pub fn counter(&self, name: &str) -> u64 {
        self.counters.lock().get(name).copied().unwrap_or(0)
    }

    pub fn gauge(&self, name: &str) -> Option<f64> {
        self.gauges.lock().get(name).copied()
    }

    pub fn snapshot(&self) -> (HashMap<String, u64>, HashMap<String, f64>) {
        (self.counters.lock().clone(), self.gauges.lock().clone())
    }
}

lazy_static! {
    pub static ref METRICS: MetricsRegistry = MetricsRegistry::new();
}
