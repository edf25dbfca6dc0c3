//! # Event bus
//!
//! Fans every published [`CircuitBreakerEvent`] out to the history store and
//! to any number of independent subscriptions.
//!
//! ```text
//! publish ──► [per-name lock] ──► sequence ──► history (sync append)
//!                                          └─► snapshot of subscribers ──► try_send ──► [bounded queue] ──► Subscription
//! ```
//!
//! ## Rules
//! - `publish` never waits: delivery uses `try_send` on each queue
//! - Queue capacity is per subscriber
//! - A full queue drops the **newest** event for that subscriber only and
//!   bumps its drop counter; other subscribers are unaffected
//! - The subscriber list is copy-on-write, so one publish sees one snapshot

use crate::events::{CircuitBreakerEvent, EventFilter};
use crate::history::EventHistory;
use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::task::{Context, Poll};
use tokio::sync::mpsc::{self, error::TryRecvError, error::TrySendError};
use tracing::{debug, info, trace, warn};

pub const DEFAULT_SUBSCRIBER_BUFFER_SIZE: usize = 256;

/// Identifier of a live subscription
pub type SubscriptionId = u64;

#[derive(Debug)]
struct Subscriber {
    id: SubscriptionId,
    filter: EventFilter,
    sender: mpsc::Sender<Arc<CircuitBreakerEvent>>,
    dropped: Arc<AtomicU64>,
}

#[derive(Debug)]
pub struct EventBus {
    subscribers: RwLock<Arc<Vec<Arc<Subscriber>>>>,
    history: Arc<EventHistory>,
    buffer_size: usize,
    next_id: AtomicU64,
    next_sequence: AtomicU64,
    published: AtomicU64,
    dropped: AtomicU64,
    shut_down: AtomicBool,
}

impl EventBus {
    /// Create a bus with its own history store
    pub fn new(history_capacity: usize, subscriber_buffer_size: usize) -> Arc<Self> {
        Self::with_history(
            Arc::new(EventHistory::new(history_capacity, history_capacity)),
            subscriber_buffer_size,
        )
    }

    pub fn with_history(history: Arc<EventHistory>, subscriber_buffer_size: usize) -> Arc<Self> {
        Arc::new(Self {
            subscribers: RwLock::new(Arc::new(Vec::new())),
            history,
            buffer_size: subscriber_buffer_size.max(1),
            next_id: AtomicU64::new(1),
            next_sequence: AtomicU64::new(0),
            published: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
            shut_down: AtomicBool::new(false),
        })
    }

    pub fn history(&self) -> &Arc<EventHistory> {
        &self.history
    }

    /// Publish an event
    ///
    /// Returns the number of subscriptions the event was delivered to.
    /// Sequencing, the history append and delivery happen under the history
    /// lock of the event's name, so every subscriber sees one name's events
    /// in sequence order.
    pub fn publish(&self, event: CircuitBreakerEvent) -> usize {
        let mut closed = Vec::new();

        let delivered = self.history.append_with(
            event,
            |event| {
                let sequence = self.next_sequence.fetch_add(1, Ordering::AcqRel) + 1;
                Arc::new(event.with_sequence(sequence))
            },
            |event| self.deliver(event, &mut closed),
        );
        self.published.fetch_add(1, Ordering::Relaxed);

        for id in closed {
            self.unsubscribe(id);
        }

        delivered
    }

    fn deliver(&self, event: &Arc<CircuitBreakerEvent>, closed: &mut Vec<SubscriptionId>) -> usize {
        let subscribers = Arc::clone(&self.subscribers.read());
        let mut delivered = 0;

        for subscriber in subscribers.iter().filter(|s| s.filter.matches(event)) {
            match subscriber.sender.try_send(Arc::clone(event)) {
                Ok(()) => delivered += 1,
                Err(TrySendError::Full(_)) => {
                    let dropped = subscriber.dropped.fetch_add(1, Ordering::AcqRel) + 1;
                    self.dropped.fetch_add(1, Ordering::Relaxed);
                    if dropped == 1 {
                        warn!(
                            subscription = subscriber.id,
                            capacity = self.buffer_size,
                            "Subscriber queue full, dropping newest events"
                        );
                    } else {
                        trace!(subscription = subscriber.id, dropped, "Event dropped");
                    }
                }
                Err(TrySendError::Closed(_)) => closed.push(subscriber.id),
            }
        }

        delivered
    }

    /// Subscribe to events matching a filter
    ///
    /// The subscription is removed from the bus when dropped.
    pub fn subscribe(self: &Arc<Self>, filter: EventFilter) -> Subscription {
        let (sender, receiver) = mpsc::channel(self.buffer_size);
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let dropped = Arc::new(AtomicU64::new(0));

        {
            let mut subscribers = self.subscribers.write();
            // After shutdown the sender is dropped here and the stream ends at once
            if !self.shut_down.load(Ordering::Acquire) {
                let mut next = Vec::with_capacity(subscribers.len() + 1);
                next.extend(subscribers.iter().cloned());
                next.push(Arc::new(Subscriber {
                    id,
                    filter: filter.clone(),
                    sender,
                    dropped: Arc::clone(&dropped),
                }));
                *subscribers = Arc::new(next);
            }
        }

        debug!(subscription = id, name = ?filter.name, event_type = ?filter.event_type, "New subscription created");

        Subscription {
            id,
            filter,
            receiver,
            dropped,
            bus: Arc::downgrade(self),
        }
    }

    /// Remove a subscription; returns `false` if it was already gone
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut subscribers = self.subscribers.write();
        if !subscribers.iter().any(|s| s.id == id) {
            return false;
        }
        let next: Vec<Arc<Subscriber>> = subscribers
            .iter()
            .filter(|s| s.id != id)
            .cloned()
            .collect();
        *subscribers = Arc::new(next);
        debug!(subscription = id, "Subscription removed");
        true
    }

    /// Close every subscription; live streams end after draining their queue
    ///
    /// Later publishes still reach the history store.
    pub fn shutdown(&self) {
        self.shut_down.store(true, Ordering::Release);
        let mut subscribers = self.subscribers.write();
        let closed = subscribers.len();
        *subscribers = Arc::new(Vec::new());
        info!(closed, "Event bus shut down");
    }

    pub fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::Acquire)
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.read().len()
    }

    /// Total events published
    pub fn events_published(&self) -> u64 {
        self.published.load(Ordering::Relaxed)
    }

    /// Total deliveries dropped across all subscribers
    pub fn events_dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

/// Errors from subscription operations
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SubscriptionError {
    /// The subscription was removed or the bus shut down
    #[error("subscription closed")]
    Closed,
}

/// A live registration on the bus
///
/// When dropped, the subscription is automatically removed from the bus.
#[derive(Debug)]
pub struct Subscription {
    id: SubscriptionId,
    filter: EventFilter,
    receiver: mpsc::Receiver<Arc<CircuitBreakerEvent>>,
    dropped: Arc<AtomicU64>,
    bus: Weak<EventBus>,
}

impl Subscription {
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    pub fn filter(&self) -> &EventFilter {
        &self.filter
    }

    /// Events dropped for this subscription because its queue was full
    pub fn dropped_events(&self) -> u64 {
        self.dropped.load(Ordering::Acquire)
    }

    /// Receive the next event
    ///
    /// Returns `None` once the subscription is closed and drained.
    pub async fn recv(&mut self) -> Option<Arc<CircuitBreakerEvent>> {
        self.receiver.recv().await
    }

    /// Receive without waiting
    ///
    /// - `Ok(Some(event))` - An event was queued
    /// - `Ok(None)` - Nothing queued yet
    /// - `Err(SubscriptionError::Closed)` - Closed and drained
    pub fn try_recv(&mut self) -> Result<Option<Arc<CircuitBreakerEvent>>, SubscriptionError> {
        match self.receiver.try_recv() {
            Ok(event) => Ok(Some(event)),
            Err(TryRecvError::Empty) => Ok(None),
            Err(TryRecvError::Disconnected) => Err(SubscriptionError::Closed),
        }
    }

    pub(crate) fn poll_recv(
        &mut self,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Arc<CircuitBreakerEvent>>> {
        self.receiver.poll_recv(cx)
    }

    /// Stop receiving new events; already queued events can still be read
    pub fn unsubscribe(&mut self) {
        if let Some(bus) = self.bus.upgrade() {
            bus.unsubscribe(self.id);
        }
        self.receiver.close();
    }

    /// Turn into a [`Stream`](futures::Stream) of events
    pub fn into_stream(self) -> crate::stream::EventStream {
        crate::stream::EventStream::new(self)
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(bus) = self.bus.upgrade() {
            bus.unsubscribe(self.id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{EventKind, EventType};
    use std::time::Duration;
    use tokio::time::timeout;

    fn success(name: &str) -> CircuitBreakerEvent {
        CircuitBreakerEvent::new(
            name,
            EventKind::Success {
                elapsed: Duration::from_millis(1),
            },
        )
    }

    fn error(name: &str) -> CircuitBreakerEvent {
        CircuitBreakerEvent::new(
            name,
            EventKind::Error {
                elapsed: Duration::from_millis(1),
                message: "boom".to_string(),
            },
        )
    }

    #[tokio::test]
    async fn test_subscription_recv() {
        let bus = EventBus::new(10, 8);
        let mut sub = bus.subscribe(EventFilter::all());

        assert_eq!(bus.publish(success("a")), 1);

        let received = timeout(Duration::from_millis(100), sub.recv())
            .await
            .expect("timeout")
            .expect("closed");
        assert_eq!(received.circuit_breaker_name(), "a");
        assert_eq!(received.sequence(), 1);
    }

    #[tokio::test]
    async fn test_publish_appends_history_without_subscribers() {
        let bus = EventBus::new(10, 8);
        assert_eq!(bus.publish(success("a")), 0);
        assert_eq!(bus.history().len("a"), 1);
        assert_eq!(bus.events_published(), 1);
    }

    #[tokio::test]
    async fn test_filters_and_order() {
        let bus = EventBus::new(100, 16);
        let mut all = bus.subscribe(EventFilter::all());
        let mut by_name = bus.subscribe(EventFilter::name("b"));
        let mut by_pair = bus.subscribe(EventFilter::name_and_type("b", EventType::Success));

        bus.publish(error("a"));
        bus.publish(error("b"));
        bus.publish(success("b"));
        bus.publish(success("a"));

        let mut seen = Vec::new();
        while let Ok(Some(e)) = all.try_recv() {
            seen.push(e.sequence());
        }
        assert_eq!(seen, vec![1, 2, 3, 4]);

        let first = by_name.try_recv().unwrap().unwrap();
        let second = by_name.try_recv().unwrap().unwrap();
        assert_eq!(
            (first.event_type(), second.event_type()),
            (EventType::Error, EventType::Success)
        );
        assert_eq!(by_name.try_recv(), Ok(None));

        let only = by_pair.try_recv().unwrap().unwrap();
        assert_eq!(only.circuit_breaker_name(), "b");
        assert_eq!(only.event_type(), EventType::Success);
        assert_eq!(by_pair.try_recv(), Ok(None));
    }

    #[tokio::test]
    async fn test_full_queue_drops_newest_without_blocking_others() {
        let bus = EventBus::new(100, 2);
        let slow = bus.subscribe(EventFilter::all());
        let mut fast = bus.subscribe(EventFilter::all());

        for i in 0..5 {
            bus.publish(success(&format!("cb-{}", i)));
            // Fast subscriber keeps up
            let e = fast.try_recv().unwrap().unwrap();
            assert_eq!(e.circuit_breaker_name(), format!("cb-{}", i));
        }

        assert_eq!(slow.dropped_events(), 3);
        assert_eq!(fast.dropped_events(), 0);
        assert_eq!(bus.events_dropped(), 3);

        // The oldest two were kept
        let mut slow = slow;
        assert_eq!(
            slow.try_recv().unwrap().unwrap().circuit_breaker_name(),
            "cb-0"
        );
        assert_eq!(
            slow.try_recv().unwrap().unwrap().circuit_breaker_name(),
            "cb-1"
        );
        assert_eq!(slow.try_recv(), Ok(None));
    }

    #[tokio::test]
    async fn test_drop_unsubscribes() {
        let bus = EventBus::new(10, 8);
        let sub = bus.subscribe(EventFilter::all());
        let id = sub.id();
        assert_eq!(bus.subscriber_count(), 1);

        drop(sub);
        assert_eq!(bus.subscriber_count(), 0);
        assert!(!bus.unsubscribe(id), "Unsubscribe is idempotent");
        assert_eq!(bus.publish(success("a")), 0);
    }

    #[tokio::test]
    async fn test_explicit_unsubscribe_keeps_queued_events() {
        let bus = EventBus::new(10, 8);
        let mut sub = bus.subscribe(EventFilter::all());

        bus.publish(success("a"));
        sub.unsubscribe();
        sub.unsubscribe();
        bus.publish(success("b"));

        assert_eq!(
            sub.recv().await.unwrap().circuit_breaker_name(),
            "a"
        );
        assert!(sub.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_shutdown_closes_subscriptions() {
        let bus = EventBus::new(10, 8);
        let mut sub = bus.subscribe(EventFilter::all());

        bus.shutdown();
        assert!(sub.recv().await.is_none());
        assert_eq!(sub.try_recv(), Err(SubscriptionError::Closed));

        // New subscriptions end immediately, history still records
        let mut late = bus.subscribe(EventFilter::all());
        bus.publish(success("a"));
        assert!(late.recv().await.is_none());
        assert_eq!(bus.history().len("a"), 1);
    }

    #[test]
    fn test_concurrent_publishers_keep_sequence_order() {
        let bus = EventBus::new(20_000, 20_000);
        let mut sub = bus.subscribe(EventFilter::name("a"));

        std::thread::scope(|scope| {
            for t in 0..8 {
                let bus = &bus;
                scope.spawn(move || {
                    for i in 0..2000 {
                        let name = if (i + t) % 4 == 0 { "b" } else { "a" };
                        bus.publish(success(name));
                    }
                });
            }
        });

        let history: Vec<u64> = bus
            .history()
            .query(Some("a"), None)
            .iter()
            .map(|e| e.sequence())
            .collect();
        assert_eq!(history.len(), 12_000);
        assert!(history.windows(2).all(|w| w[0] < w[1]));

        let mut delivered = Vec::new();
        while let Ok(Some(e)) = sub.try_recv() {
            delivered.push(e.sequence());
        }
        assert_eq!(delivered, history);

        let merged: Vec<u64> = bus
            .history()
            .query(None, None)
            .iter()
            .filter(|e| e.circuit_breaker_name() == "a")
            .map(|e| e.sequence())
            .collect();
        assert_eq!(merged, history[history.len() - merged.len()..]);
    }

    #[test]
    fn test_publish_without_runtime() {
        let bus = EventBus::new(10, 8);
        let mut sub = bus.subscribe(EventFilter::all());
        bus.publish(success("a"));
        assert!(sub.try_recv().unwrap().is_some());
    }

    #[tokio::test]
    async fn test_concurrent_subscribe_during_publish() {
        let bus = EventBus::new(10_000, 10_000);
        let publisher = {
            let bus = Arc::clone(&bus);
            std::thread::spawn(move || {
                for _ in 0..1000 {
                    bus.publish(success("a"));
                }
            })
        };

        let mut subs: Vec<Subscription> =
            (0..20).map(|_| bus.subscribe(EventFilter::all())).collect();
        publisher.join().unwrap();

        // Each subscription sees a contiguous tail of the publish sequence
        for sub in subs.iter_mut() {
            let mut sequences = Vec::new();
            while let Ok(Some(e)) = sub.try_recv() {
                sequences.push(e.sequence());
            }
            assert!(sequences.windows(2).all(|w| w[1] == w[0] + 1));
            if let Some(last) = sequences.last() {
                assert_eq!(*last, 1000);
            }
        }
    }
}
