//! Metrics sink for resize activity

use parking_lot::Mutex;
use tracing::{info, warn};

use crate::ids::PoolId;
use crate::resize::{ResizeOutcome, ResizePhase};

/// Receives resize phase transitions and one outcome per resize attempt
pub trait ResizeMetrics: Send + Sync {
    fn record_phase(&self, pool_id: PoolId, phase: ResizePhase);

    fn record_outcome(&self, outcome: &ResizeOutcome);
}

/// Emits structured tracing events
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingMetrics;

impl ResizeMetrics for TracingMetrics {
    fn record_phase(&self, pool_id: PoolId, phase: ResizePhase) {
        tracing::debug!(target: "poolshift::metrics", %pool_id, %phase, "resize phase");
    }

    fn record_outcome(&self, outcome: &ResizeOutcome) {
        let duration_ms = outcome.duration.as_millis() as u64;
        if outcome.success {
            info!(
                target: "poolshift::metrics",
                pool_id = %outcome.pool_id,
                new_pool_id = ?outcome.new_pool_id,
                from = outcome.old_capacity,
                to = outcome.new_capacity,
                migrated = outcome.migrated_count,
                discarded = outcome.discarded_count,
                retirement_deferred = outcome.retirement_deferred,
                duration_ms,
                "resize succeeded"
            );
        } else {
            warn!(
                target: "poolshift::metrics",
                pool_id = %outcome.pool_id,
                from = outcome.old_capacity,
                to = outcome.new_capacity,
                migrated = outcome.migrated_count,
                failure = ?outcome.failure,
                duration_ms,
                "resize failed"
            );
        }
    }
}

/// Keeps everything in memory for inspection
#[derive(Debug, Default)]
pub struct InMemoryMetrics {
    phases: Mutex<Vec<(PoolId, ResizePhase)>>,
    outcomes: Mutex<Vec<ResizeOutcome>>,
}

impl InMemoryMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Phase transitions recorded for `pool_id`, in order
    pub fn phases(&self, pool_id: PoolId) -> Vec<ResizePhase> {
        self.phases
            .lock()
            .iter()
            .filter(|(id, _)| *id == pool_id)
            .map(|(_, phase)| *phase)
            .collect()
    }

    pub fn outcomes(&self) -> Vec<ResizeOutcome> {
        self.outcomes.lock().clone()
    }

    pub fn success_count(&self) -> usize {
        self.outcomes.lock().iter().filter(|o| o.success).count()
    }

    pub fn failure_count(&self) -> usize {
        self.outcomes.lock().iter().filter(|o| !o.success).count()
    }

    pub fn clear(&self) {
        self.phases.lock().clear();
        self.outcomes.lock().clear();
    }
}

impl ResizeMetrics for InMemoryMetrics {
    fn record_phase(&self, pool_id: PoolId, phase: ResizePhase) {
        self.phases.lock().push((pool_id, phase));
    }

    fn record_outcome(&self, outcome: &ResizeOutcome) {
        self.outcomes.lock().push(outcome.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use std::time::Duration;

    fn outcome(pool_id: PoolId, success: bool) -> ResizeOutcome {
        ResizeOutcome {
            pool_id,
            new_pool_id: None,
            success,
            old_capacity: 1,
            new_capacity: 2,
            migrated_count: 0,
            discarded_count: 0,
            running_at_freeze: 0,
            retirement_deferred: false,
            duration: Duration::ZERO,
            failure: None,
            completed_at: Utc::now(),
        }
    }

    #[test]
    fn test_in_memory_metrics() {
        let metrics = InMemoryMetrics::new();
        let (a, b) = (PoolId::new(), PoolId::new());

        metrics.record_phase(a, ResizePhase::Resizing);
        metrics.record_phase(b, ResizePhase::Resizing);
        metrics.record_phase(a, ResizePhase::Ready);
        metrics.record_outcome(&outcome(a, true));
        metrics.record_outcome(&outcome(b, false));

        assert_eq!(metrics.phases(a), vec![ResizePhase::Resizing, ResizePhase::Ready]);
        assert_eq!(metrics.success_count(), 1);
        assert_eq!(metrics.failure_count(), 1);

        metrics.clear();
        assert!(metrics.outcomes().is_empty());
    }

    #[test]
    fn test_tracing_metrics_accepts_outcomes() {
        let metrics = TracingMetrics;
        metrics.record_phase(PoolId::new(), ResizePhase::Migrating);
        metrics.record_outcome(&outcome(PoolId::new(), true));
        metrics.record_outcome(&outcome(PoolId::new(), false));
    }
}
