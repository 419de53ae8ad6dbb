//! Listener fan-out for finalized metric records.
//!
//! The core publishes every snapshot to registered sinks and knows nothing
//! about what they do with it. HTTP republishers, threshold watchers, and
//! the like live outside this crate and only implement [`MetricsSink`].

use crate::metrics::UpsMetrics;
use std::collections::VecDeque;

/// Consumer of finalized metric records.
///
/// # Contract
///
/// Sinks must not block: the dispatching loop calls them synchronously
/// between poll cycles. The return value is advisory, `true` when the
/// sink currently has an action in flight (a script running, an alert
/// raised); callers that don't fan out may ignore it.
pub trait MetricsSink: Send {
    fn on_metrics(&mut self, metrics: &UpsMetrics) -> bool;
}

/// Ordered collection of sinks.
///
/// Dispatch order is registration order; no guarantee beyond that.
#[derive(Default)]
pub struct SinkRegistry {
    sinks: Vec<Box<dyn MetricsSink>>,
}

impl SinkRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, sink: Box<dyn MetricsSink>) {
        self.sinks.push(sink);
    }

    /// Deliver a record to every sink. Returns `true` if any sink reported
    /// an active action.
    pub fn dispatch(&mut self, metrics: &UpsMetrics) -> bool {
        let mut active = false;
        for sink in &mut self.sinks {
            active |= sink.on_metrics(metrics);
        }
        active
    }

    pub fn len(&self) -> usize {
        self.sinks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }
}

/// Bounded ring of recent records.
pub struct HistorySink {
    records: VecDeque<UpsMetrics>,
    limit: usize,
}

impl HistorySink {
    pub fn new(limit: usize) -> Self {
        HistorySink {
            records: VecDeque::new(),
            limit: limit.max(1),
        }
    }

    /// Most recent record, if any poll has completed yet.
    pub fn latest(&self) -> Option<&UpsMetrics> {
        self.records.back()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

impl MetricsSink for HistorySink {
    fn on_metrics(&mut self, metrics: &UpsMetrics) -> bool {
        if self.records.len() == self.limit {
            self.records.pop_front();
        }
        self.records.push_back(metrics.clone());
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    struct Recorder {
        id: u8,
        order: Arc<Mutex<Vec<u8>>>,
        active: bool,
    }

    impl MetricsSink for Recorder {
        fn on_metrics(&mut self, _metrics: &UpsMetrics) -> bool {
            self.order.lock().unwrap().push(self.id);
            self.active
        }
    }

    #[test]
    fn test_dispatch_in_registration_order() {
        let order = Arc::new(Mutex::new(Vec::new()));
        let mut registry = SinkRegistry::new();
        for id in [1u8, 2, 3] {
            registry.register(Box::new(Recorder {
                id,
                order: Arc::clone(&order),
                active: false,
            }));
        }

        let active = registry.dispatch(&UpsMetrics::new());
        assert!(!active);
        assert_eq!(*order.lock().unwrap(), vec![1, 2, 3]);
    }

    #[test]
    fn test_dispatch_reports_any_active() {
        let order = Arc::new(Mutex::new(Vec::new()));
        let mut registry = SinkRegistry::new();
        registry.register(Box::new(Recorder {
            id: 1,
            order: Arc::clone(&order),
            active: false,
        }));
        registry.register(Box::new(Recorder {
            id: 2,
            order: Arc::clone(&order),
            active: true,
        }));

        // Every sink still runs even after one reports active.
        assert!(registry.dispatch(&UpsMetrics::new()));
        assert_eq!(order.lock().unwrap().len(), 2);
    }

    #[test]
    fn test_history_ring_caps_at_limit() {
        let mut history = HistorySink::new(3);
        for load in 0..5u8 {
            let mut m = UpsMetrics::new();
            m.load = load;
            history.on_metrics(&m);
        }

        assert_eq!(history.len(), 3);
        assert_eq!(history.latest().unwrap().load, 4);
    }

    #[test]
    fn test_history_limit_floor() {
        let mut history = HistorySink::new(0);
        history.on_metrics(&UpsMetrics::new());
        history.on_metrics(&UpsMetrics::new());
        assert_eq!(history.len(), 1);
    }
}
