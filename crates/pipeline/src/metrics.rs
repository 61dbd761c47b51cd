use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Atomic counters tracking submissions and message outcomes.
///
/// All counters use relaxed ordering. For a point-in-time view, call
/// [`snapshot`](Self::snapshot).
#[derive(Debug, Default)]
pub struct PipelineMetrics {
    /// Submissions received by the router.
    pub requests_received: AtomicU64,
    /// Submissions enqueued inline.
    pub routed_inline: AtomicU64,
    /// Submissions externalized to the object store.
    pub routed_overflow: AtomicU64,
    /// Submissions rejected for missing or malformed fields.
    pub rejected_validation: AtomicU64,
    /// Submissions rejected for a bad API key.
    pub rejected_unauthorized: AtomicU64,
    /// Submissions that failed to persist.
    pub route_failures: AtomicU64,
    /// Queue messages handed to the dispatcher.
    pub messages_processed: AtomicU64,
    /// Messages whose result was written to the destination.
    pub delivered: AtomicU64,
    pub dropped_malformed: AtomicU64,
    pub dropped_unauthorized: AtomicU64,
    pub dropped_unconfigured: AtomicU64,
    pub dropped_transform: AtomicU64,
    pub dropped_undeliverable: AtomicU64,
    /// Messages left on the queue for redelivery.
    pub retried: AtomicU64,
}

fn bump(counter: &AtomicU64) {
    counter.fetch_add(1, Ordering::Relaxed);
}

impl PipelineMetrics {
    pub fn increment_requests_received(&self) {
        bump(&self.requests_received);
    }

    pub fn increment_routed_inline(&self) {
        bump(&self.routed_inline);
    }

    pub fn increment_routed_overflow(&self) {
        bump(&self.routed_overflow);
    }

    pub fn increment_rejected_validation(&self) {
        bump(&self.rejected_validation);
    }

    pub fn increment_rejected_unauthorized(&self) {
        bump(&self.rejected_unauthorized);
    }

    pub fn increment_route_failures(&self) {
        bump(&self.route_failures);
    }

    pub fn increment_messages_processed(&self) {
        bump(&self.messages_processed);
    }

    pub fn increment_delivered(&self) {
        bump(&self.delivered);
    }

    pub fn increment_dropped_malformed(&self) {
        bump(&self.dropped_malformed);
    }

    pub fn increment_dropped_unauthorized(&self) {
        bump(&self.dropped_unauthorized);
    }

    pub fn increment_dropped_unconfigured(&self) {
        bump(&self.dropped_unconfigured);
    }

    pub fn increment_dropped_transform(&self) {
        bump(&self.dropped_transform);
    }

    pub fn increment_dropped_undeliverable(&self) {
        bump(&self.dropped_undeliverable);
    }

    pub fn increment_retried(&self) {
        bump(&self.retried);
    }

    /// Take a point-in-time snapshot of all counters.
    pub fn snapshot(&self) -> MetricsSnapshot {
        let load = |c: &AtomicU64| c.load(Ordering::Relaxed);
        MetricsSnapshot {
            requests_received: load(&self.requests_received),
            routed_inline: load(&self.routed_inline),
            routed_overflow: load(&self.routed_overflow),
            rejected_validation: load(&self.rejected_validation),
            rejected_unauthorized: load(&self.rejected_unauthorized),
            route_failures: load(&self.route_failures),
            messages_processed: load(&self.messages_processed),
            delivered: load(&self.delivered),
            dropped_malformed: load(&self.dropped_malformed),
            dropped_unauthorized: load(&self.dropped_unauthorized),
            dropped_unconfigured: load(&self.dropped_unconfigured),
            dropped_transform: load(&self.dropped_transform),
            dropped_undeliverable: load(&self.dropped_undeliverable),
            retried: load(&self.retried),
        }
    }
}

/// A plain data snapshot of [`PipelineMetrics`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub requests_received: u64,
    pub routed_inline: u64,
    pub routed_overflow: u64,
    pub rejected_validation: u64,
    pub rejected_unauthorized: u64,
    pub route_failures: u64,
    pub messages_processed: u64,
    pub delivered: u64,
    pub dropped_malformed: u64,
    pub dropped_unauthorized: u64,
    pub dropped_unconfigured: u64,
    pub dropped_transform: u64,
    pub dropped_undeliverable: u64,
    pub retried: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_is_zero() {
        assert_eq!(PipelineMetrics::default().snapshot(), MetricsSnapshot::default());
    }

    #[test]
    fn increment_and_snapshot() {
        let m = PipelineMetrics::default();
        m.increment_requests_received();
        m.increment_requests_received();
        m.increment_routed_overflow();
        m.increment_dropped_transform();
        m.increment_retried();

        let snap = m.snapshot();
        assert_eq!(snap.requests_received, 2);
        assert_eq!(snap.routed_overflow, 1);
        assert_eq!(snap.routed_inline, 0);
        assert_eq!(snap.dropped_transform, 1);
        assert_eq!(snap.retried, 1);
    }

    #[test]
    fn snapshot_serializes_flat() {
        let m = PipelineMetrics::default();
        m.increment_delivered();
        let json = serde_json::to_value(m.snapshot()).unwrap();
        assert_eq!(json["delivered"], 1);
        assert_eq!(json["messages_processed"], 0);
    }
}
