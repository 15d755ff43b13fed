//! In-process operation metrics.
//!
//! Every recorded event is also emitted as a `tracing` debug event, so a log
//! pipeline sees the same data the aggregated snapshot reports.

use std::collections::BTreeMap;
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Success,
    Failure,
}

impl Outcome {
    pub fn from_result<T, E>(result: &Result<T, E>) -> Self {
        if result.is_ok() { Outcome::Success } else { Outcome::Failure }
    }
}

/// Aggregate for one `(component, operation)` pair.
#[derive(Debug, Clone, Default, PartialEq, Serialize, schemars::JsonSchema)]
pub struct OperationStats {
    pub component: String,
    pub operation: String,
    pub count: u64,
    pub errors: u64,
    pub total_ms: f64,
    pub max_ms: f64,
}

impl OperationStats {
    pub fn mean_ms(&self) -> f64 {
        if self.count == 0 { 0.0 } else { self.total_ms / self.count as f64 }
    }
}

#[derive(Debug, Default)]
pub struct MetricsCollector {
    ops: Mutex<BTreeMap<(&'static str, &'static str), OperationStats>>,
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, component: &'static str, operation: &'static str, elapsed: Duration, outcome: Outcome) {
        let ms = elapsed.as_secs_f64() * 1_000.0;
        tracing::debug!(component, operation, elapsed_ms = ms, ok = outcome == Outcome::Success, "operation");

        let mut ops = self.ops.lock().unwrap_or_else(PoisonError::into_inner);
        let entry = ops.entry((component, operation)).or_insert_with(|| OperationStats {
            component: component.to_string(),
            operation: operation.to_string(),
            ..Default::default()
        });
        entry.count += 1;
        if outcome == Outcome::Failure {
            entry.errors += 1;
        }
        entry.total_ms += ms;
        entry.max_ms = entry.max_ms.max(ms);
    }

    /// Start timing an operation; call [`Timer::finish`] with its outcome.
    pub fn timer(&self, component: &'static str, operation: &'static str) -> Timer<'_> {
        Timer { collector: self, component, operation, started: Instant::now() }
    }

    /// All aggregates ordered by component then operation.
    pub fn snapshot(&self) -> Vec<OperationStats> {
        self.ops
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect()
    }
}

pub struct Timer<'a> {
    collector: &'a MetricsCollector,
    component: &'static str,
    operation: &'static str,
    started: Instant,
}

impl Timer<'_> {
    pub fn finish(self, outcome: Outcome) -> Duration {
        let elapsed = self.started.elapsed();
        self.collector.record(self.component, self.operation, elapsed, outcome);
        elapsed
    }
}
