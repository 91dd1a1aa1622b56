//! Event log aggregation and subscriber fan-out.
//!
//! Events are appended to the run's in-memory log under the per-run lock,
//! then fanned out to subscribers outside it. Each subscription owns a
//! bounded channel (capacity 100) plus a lock and closed flag so a racing
//! send never touches a closed channel: send and close both take the lock,
//! and send-after-close is a silent no-op. A send that would block is
//! dropped; the run's own log remains authoritative.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use chrono::Utc;
use dashmap::DashMap;
use maestro_types::event::{LogLevel, RunEvent};
use tokio::sync::mpsc;

use crate::run::Run;

/// Bounded capacity of each subscriber channel.
pub const SUBSCRIBER_CAPACITY: usize = 100;

// ---------------------------------------------------------------------------
// Subscription
// ---------------------------------------------------------------------------

/// One subscriber: a bounded sender behind a lock. `None` means closed.
struct Subscription {
    id: u64,
    sender: Mutex<Option<mpsc::Sender<RunEvent>>>,
}

impl Subscription {
    /// Non-blocking send; drops the event when the channel is full or the
    /// subscription is closed.
    fn send(&self, event: &RunEvent) {
        let guard = self.sender.lock().expect("subscription lock poisoned");
        if let Some(tx) = guard.as_ref() {
            if tx.try_send(event.clone()).is_err() {
                tracing::trace!(subscriber = self.id, "subscriber channel full, event dropped");
            }
        }
    }

    /// Close the channel. Safe to race with `send`.
    fn close(&self) {
        self.sender.lock().expect("subscription lock poisoned").take();
    }
}

/// Handle returned by `subscribe`; unsubscribes on drop or explicitly.
pub struct SubscriptionGuard {
    aggregator: Arc<LogAggregator>,
    run_id: String,
    id: u64,
}

impl SubscriptionGuard {
    /// Remove the subscription and close its channel.
    pub fn unsubscribe(self) {
        // Drop does the work.
    }
}

impl Drop for SubscriptionGuard {
    fn drop(&mut self) {
        self.aggregator.remove_subscriber(&self.run_id, self.id);
    }
}

// ---------------------------------------------------------------------------
// LogAggregator
// ---------------------------------------------------------------------------

/// Fans run events out to per-run subscriber lists.
pub struct LogAggregator {
    subscribers: DashMap<String, Vec<Arc<Subscription>>>,
    next_id: AtomicU64,
}

impl LogAggregator {
    pub fn new() -> Self {
        Self {
            subscribers: DashMap::new(),
            next_id: AtomicU64::new(1),
        }
    }

    /// Subscribe to all subsequent events of a run.
    ///
    /// The returned channel receives every event appended after this call,
    /// minus drops where the channel was full. Dropping the guard (or
    /// calling `unsubscribe`) removes the subscription and closes the
    /// channel.
    pub fn subscribe(
        self: &Arc<Self>,
        run_id: &str,
    ) -> (mpsc::Receiver<RunEvent>, SubscriptionGuard) {
        let (tx, rx) = mpsc::channel(SUBSCRIBER_CAPACITY);
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let subscription = Arc::new(Subscription {
            id,
            sender: Mutex::new(Some(tx)),
        });

        self.subscribers
            .entry(run_id.to_string())
            .or_default()
            .push(subscription);

        let guard = SubscriptionGuard {
            aggregator: Arc::clone(self),
            run_id: run_id.to_string(),
            id,
        };
        (rx, guard)
    }

    /// Append an event to the run's log, then fan out to subscribers.
    pub fn append(&self, run: &Run, event: RunEvent) {
        run.append_event(event.clone());

        // Copy the subscriber list under the aggregator lock, send outside.
        let targets: Option<Vec<Arc<Subscription>>> =
            self.subscribers.get(&run.id).map(|entry| entry.value().clone());
        if let Some(targets) = targets {
            for subscription in &targets {
                subscription.send(&event);
            }
        }
    }

    /// Convenience: append a `log` event.
    pub fn log(&self, run: &Run, level: LogLevel, message: impl Into<String>) {
        self.append(
            run,
            RunEvent::Log {
                correlation_id: run.correlation_id.clone(),
                timestamp: Utc::now(),
                level,
                message: message.into(),
                step_id: run.current_step(),
            },
        );
    }

    /// Number of live subscriptions for a run.
    pub fn subscriber_count(&self, run_id: &str) -> usize {
        self.subscribers
            .get(run_id)
            .map(|entry| entry.len())
            .unwrap_or(0)
    }

    /// Remove one subscription; drops the run's map entry when it was the
    /// last. The subscription is removed from the index before being closed.
    fn remove_subscriber(&self, run_id: &str, id: u64) {
        let mut removed: Option<Arc<Subscription>> = None;
        if let Some(mut entry) = self.subscribers.get_mut(run_id) {
            if let Some(position) = entry.iter().position(|s| s.id == id) {
                removed = Some(entry.remove(position));
            }
        }
        self.subscribers.remove_if(run_id, |_, list| list.is_empty());
        if let Some(subscription) = removed {
            subscription.close();
        }
    }
}

impl Default for LogAggregator {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use maestro_types::run::ResourceOverrides;

    fn test_run() -> Run {
        Run::new(
            "corr-1",
            "w",
            "manual",
            serde_json::Map::new(),
            ResourceOverrides::default(),
        )
    }

    fn log_event(n: usize) -> RunEvent {
        RunEvent::Log {
            correlation_id: "corr-1".to_string(),
            timestamp: Utc::now(),
            level: LogLevel::Info,
            message: format!("event {n}"),
            step_id: None,
        }
    }

    #[tokio::test]
    async fn test_subscriber_sees_events_in_order() {
        let aggregator = Arc::new(LogAggregator::new());
        let run = test_run();
        let (mut rx, _guard) = aggregator.subscribe(&run.id);

        for n in 0..5 {
            aggregator.append(&run, log_event(n));
        }

        for n in 0..5 {
            match rx.recv().await.unwrap() {
                RunEvent::Log { message, .. } => assert_eq!(message, format!("event {n}")),
                other => panic!("unexpected event: {other:?}"),
            }
        }
        assert_eq!(run.log_len(), 5);
    }

    #[tokio::test]
    async fn test_unsubscribe_closes_channel_and_clears_entry() {
        let aggregator = Arc::new(LogAggregator::new());
        let run = test_run();
        let (mut rx, guard) = aggregator.subscribe(&run.id);
        assert_eq!(aggregator.subscriber_count(&run.id), 1);

        guard.unsubscribe();
        assert_eq!(aggregator.subscriber_count(&run.id), 0);
        // Map entry removed entirely to prevent unbounded growth.
        assert!(aggregator.subscribers.get(&run.id).is_none());
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_send_after_unsubscribe_is_silent() {
        let aggregator = Arc::new(LogAggregator::new());
        let run = test_run();
        let (_rx, guard) = aggregator.subscribe(&run.id);
        guard.unsubscribe();

        // No subscriber left; append must not panic and still logs.
        aggregator.append(&run, log_event(0));
        assert_eq!(run.log_len(), 1);
    }

    #[tokio::test]
    async fn test_full_channel_drops_but_log_is_authoritative() {
        let aggregator = Arc::new(LogAggregator::new());
        let run = test_run();
        let (mut rx, _guard) = aggregator.subscribe(&run.id);

        let total = SUBSCRIBER_CAPACITY + 20;
        for n in 0..total {
            aggregator.append(&run, log_event(n));
        }

        // The run log holds everything.
        assert_eq!(run.log_len(), total);

        // The channel holds at most its capacity, in order.
        let mut received = Vec::new();
        while let Ok(ev) = rx.try_recv() {
            if let RunEvent::Log { message, .. } = ev {
                received.push(message);
            }
        }
        assert_eq!(received.len(), SUBSCRIBER_CAPACITY);
        for (i, message) in received.iter().enumerate() {
            assert_eq!(message, &format!("event {i}"));
        }
    }

    #[tokio::test]
    async fn test_multiple_subscribers_each_receive() {
        let aggregator = Arc::new(LogAggregator::new());
        let run = test_run();
        let (mut rx1, _g1) = aggregator.subscribe(&run.id);
        let (mut rx2, _g2) = aggregator.subscribe(&run.id);

        aggregator.append(&run, log_event(0));

        assert!(rx1.recv().await.is_some());
        assert!(rx2.recv().await.is_some());
    }

    #[tokio::test]
    async fn test_subscribe_after_events_sees_only_new_ones() {
        let aggregator = Arc::new(LogAggregator::new());
        let run = test_run();
        aggregator.append(&run, log_event(0));

        let (mut rx, _guard) = aggregator.subscribe(&run.id);
        aggregator.append(&run, log_event(1));

        match rx.recv().await.unwrap() {
            RunEvent::Log { message, .. } => assert_eq!(message, "event 1"),
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_log_convenience_carries_correlation_id() {
        let aggregator = Arc::new(LogAggregator::new());
        let run = test_run();
        let (mut rx, _guard) = aggregator.subscribe(&run.id);
        aggregator.log(&run, LogLevel::Warn, "careful");
        let ev = rx.recv().await.unwrap();
        assert_eq!(ev.correlation_id(), "corr-1");
    }
}
