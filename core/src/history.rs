//! Bounded in-memory event history
//!
//! One FIFO ring per circuit breaker name, each behind its own lock, so
//! appends for different names never contend. Unfiltered queries merge the
//! rings by publish sequence.

use crate::events::{CircuitBreakerEvent, EventType};
use dashmap::DashMap;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;

type Ring = Arc<Mutex<VecDeque<Arc<CircuitBreakerEvent>>>>;

#[derive(Debug)]
pub struct EventHistory {
    rings: DashMap<String, Ring>,
    /// Events retained per name
    capacity: usize,
    /// Events returned by an unfiltered query
    global_capacity: usize,
}

impl EventHistory {
    pub fn new(capacity: usize, global_capacity: usize) -> Self {
        Self {
            rings: DashMap::new(),
            capacity: capacity.max(1),
            global_capacity: global_capacity.max(1),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    fn ring(&self, name: &str) -> Ring {
        if let Some(ring) = self.rings.get(name) {
            return Arc::clone(ring.value());
        }
        Arc::clone(self.rings.entry(name.to_string()).or_default().value())
    }

    /// Append an event, evicting the oldest one for that name on overflow
    pub fn append(&self, event: Arc<CircuitBreakerEvent>) {
        // Shard guard is released before taking the ring lock
        let ring = self.ring(event.circuit_breaker_name());
        self.push(&mut ring.lock(), event);
    }

    /// Append the event `sequence` makes from `event`, then run `deliver`,
    /// holding the ring lock of its name throughout
    ///
    /// Events of one name are therefore sequenced, stored and delivered in
    /// the same order.
    pub(crate) fn append_with<R>(
        &self,
        event: CircuitBreakerEvent,
        sequence: impl FnOnce(CircuitBreakerEvent) -> Arc<CircuitBreakerEvent>,
        deliver: impl FnOnce(&Arc<CircuitBreakerEvent>) -> R,
    ) -> R {
        let ring = self.ring(event.circuit_breaker_name());
        let mut ring = ring.lock();
        let event = sequence(event);
        self.push(&mut ring, Arc::clone(&event));
        deliver(&event)
    }

    fn push(&self, ring: &mut VecDeque<Arc<CircuitBreakerEvent>>, event: Arc<CircuitBreakerEvent>) {
        if ring.len() >= self.capacity {
            ring.pop_front();
        }
        ring.push_back(event);
    }

    /// Point-in-time read, oldest first
    ///
    /// Unknown names yield an empty list.
    pub fn query(
        &self,
        name: Option<&str>,
        event_type: Option<EventType>,
    ) -> Vec<Arc<CircuitBreakerEvent>> {
        let events = match name {
            Some(name) => self.snapshot(name),
            None => self.merged(),
        };

        match event_type {
            Some(t) => events.into_iter().filter(|e| e.event_type() == t).collect(),
            None => events,
        }
    }

    fn snapshot(&self, name: &str) -> Vec<Arc<CircuitBreakerEvent>> {
        let Some(ring) = self.rings.get(name).map(|r| Arc::clone(r.value())) else {
            return Vec::new();
        };
        let ring = ring.lock();
        ring.iter().cloned().collect()
    }

    fn merged(&self) -> Vec<Arc<CircuitBreakerEvent>> {
        let rings: Vec<Ring> = self.rings.iter().map(|r| Arc::clone(r.value())).collect();

        let mut events: Vec<Arc<CircuitBreakerEvent>> = rings
            .iter()
            .flat_map(|ring| ring.lock().iter().cloned().collect::<Vec<_>>())
            .collect();
        events.sort_by_key(|e| e.sequence());

        let excess = events.len().saturating_sub(self.global_capacity);
        events.drain(..excess);
        events
    }

    /// Number of retained events for a name
    pub fn len(&self, name: &str) -> usize {
        self.rings
            .get(name)
            .map(|r| Arc::clone(r.value()))
            .map(|ring| ring.lock().len())
            .unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.rings.iter().all(|r| r.value().lock().is_empty())
    }

    /// Drop all events for a name
    pub fn clear(&self, name: &str) {
        self.rings.remove(name);
    }

    pub fn clear_all(&self) {
        self.rings.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventKind;
    use std::time::Duration;

    fn event(name: &str, sequence: u64, failed: bool) -> Arc<CircuitBreakerEvent> {
        let kind = if failed {
            EventKind::Error {
                elapsed: Duration::ZERO,
                message: "boom".to_string(),
            }
        } else {
            EventKind::Success {
                elapsed: Duration::ZERO,
            }
        };
        Arc::new(CircuitBreakerEvent::new(name, kind).with_sequence(sequence))
    }

    #[test]
    fn test_append_and_query_by_name() {
        let history = EventHistory::new(10, 100);

        history.append(event("a", 1, true));
        history.append(event("b", 2, false));
        history.append(event("a", 3, false));

        let a = history.query(Some("a"), None);
        assert_eq!(a.len(), 2);
        assert_eq!(a[0].sequence(), 1);
        assert_eq!(a[1].sequence(), 3);

        let a_success = history.query(Some("a"), Some(EventType::Success));
        assert_eq!(a_success.len(), 1);
        assert_eq!(a_success[0].sequence(), 3);
    }

    #[test]
    fn test_unknown_name_is_empty() {
        let history = EventHistory::new(10, 100);
        assert!(history.query(Some("missing"), None).is_empty());
        assert_eq!(history.len("missing"), 0);
        assert!(history.is_empty());
    }

    #[test]
    fn test_fifo_eviction_keeps_newest() {
        let history = EventHistory::new(3, 100);

        for seq in 1..=5 {
            history.append(event("a", seq, false));
        }

        let events = history.query(Some("a"), None);
        let sequences: Vec<u64> = events.iter().map(|e| e.sequence()).collect();
        assert_eq!(sequences, vec![3, 4, 5]);
    }

    #[test]
    fn test_global_query_merges_in_sequence_order() {
        let history = EventHistory::new(10, 4);

        history.append(event("a", 1, false));
        history.append(event("b", 2, false));
        history.append(event("a", 3, true));
        history.append(event("c", 4, false));
        history.append(event("b", 5, true));

        let all = history.query(None, None);
        let sequences: Vec<u64> = all.iter().map(|e| e.sequence()).collect();
        assert_eq!(sequences, vec![2, 3, 4, 5], "Oldest beyond global capacity dropped");

        let errors = history.query(None, Some(EventType::Error));
        assert_eq!(errors.len(), 2);
    }

    #[test]
    fn test_clear() {
        let history = EventHistory::new(10, 10);
        history.append(event("a", 1, false));
        history.append(event("b", 2, false));

        history.clear("a");
        assert_eq!(history.len("a"), 0);
        assert_eq!(history.len("b"), 1);

        history.clear_all();
        assert!(history.is_empty());
    }

    #[test]
    fn test_concurrent_appends_across_names() {
        let history = Arc::new(EventHistory::new(1000, 10_000));
        let handles: Vec<_> = (0..4)
            .map(|t| {
                let history = Arc::clone(&history);
                std::thread::spawn(move || {
                    for i in 0..250 {
                        history.append(event(&format!("cb-{}", t), (t * 1000 + i) as u64, false));
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        for t in 0..4 {
            assert_eq!(history.len(&format!("cb-{}", t)), 250);
        }
        assert_eq!(history.query(None, None).len(), 1000);
    }
}
