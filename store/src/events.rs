//! Bounded multi-subscriber event broadcaster.
//!
//! `std` has no multi-consumer broadcast channel, and the drop-oldest-on-
//! overflow semantics consumers need here (they always re-query on any
//! change, so losing an old event is harmless) don't map onto a generic
//! mpmc crate cleanly, so this is a small bespoke structure: one bounded
//! queue per subscription, guarded by a `Mutex` + `Condvar`.

use crate::record::RecordId;
use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

#[derive(Debug, Clone)]
pub enum Event {
    NewItem(RecordId),
    ItemUpdated(RecordId),
    ItemDeleted(RecordId),
    ThumbnailUpdated(RecordId, PathBuf),
    SettingsChanged,
}

struct Inbox {
    queue: VecDeque<Event>,
    closed: bool,
}

/// One subscriber's view of the bus. Dropping it unsubscribes.
pub struct Subscription {
    inbox: Arc<Mutex<Inbox>>,
    signal: Arc<Condvar>,
    bus: Arc<EventBusInner>,
    id: u64,
}

impl Subscription {
    /// Blocks until an event is available or the bus is closed.
    pub fn recv(&self) -> Option<Event> {
        let mut inbox = self.inbox.lock().unwrap();
        loop {
            if let Some(event) = inbox.queue.pop_front() {
                return Some(event);
            }
            if inbox.closed {
                return None;
            }
            inbox = self.signal.wait(inbox).unwrap();
        }
    }

    /// Blocks up to `timeout`, returning `None` on expiry with no event.
    pub fn recv_timeout(&self, timeout: Duration) -> Option<Event> {
        let mut inbox = self.inbox.lock().unwrap();
        loop {
            if let Some(event) = inbox.queue.pop_front() {
                return Some(event);
            }
            if inbox.closed {
                return None;
            }
            let (guard, result) = self.signal.wait_timeout(inbox, timeout).unwrap();
            inbox = guard;
            if result.timed_out() {
                return inbox.queue.pop_front();
            }
        }
    }

    /// Drains everything currently buffered without blocking.
    pub fn drain(&self) -> Vec<Event> {
        let mut inbox = self.inbox.lock().unwrap();
        inbox.queue.drain(..).collect()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.bus.unsubscribe(self.id);
    }
}

struct EventBusInner {
    subscribers: Mutex<Vec<(u64, Arc<Mutex<Inbox>>, Arc<Condvar>)>>,
    next_id: Mutex<u64>,
    capacity: usize,
}

impl EventBusInner {
    fn unsubscribe(&self, id: u64) {
        self.subscribers.lock().unwrap().retain(|(sid, _, _)| *sid != id);
    }
}

/// Ordered, lossy-buffered event stream: newest wins per subscription when a
/// subscriber's queue is full.
pub struct EventBus {
    inner: Arc<EventBusInner>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Arc::new(EventBusInner {
                subscribers: Mutex::new(Vec::new()),
                next_id: Mutex::new(0),
                capacity,
            }),
        }
    }

    pub fn subscribe(&self) -> Subscription {
        let inbox = Arc::new(Mutex::new(Inbox {
            queue: VecDeque::new(),
            closed: false,
        }));
        let signal = Arc::new(Condvar::new());

        let mut next_id = self.inner.next_id.lock().unwrap();
        let id = *next_id;
        *next_id += 1;
        drop(next_id);

        self.inner
            .subscribers
            .lock()
            .unwrap()
            .push((id, inbox.clone(), signal.clone()));

        Subscription {
            inbox,
            signal,
            bus: self.inner.clone(),
            id,
        }
    }

    /// Publishes an event to every live subscriber, dropping the oldest
    /// buffered event for any subscriber whose queue is at capacity.
    pub fn publish(&self, event: Event) {
        let subscribers = self.inner.subscribers.lock().unwrap();
        for (_, inbox, signal) in subscribers.iter() {
            let mut guard = inbox.lock().unwrap();
            if guard.queue.len() >= self.inner.capacity {
                guard.queue.pop_front();
            }
            guard.queue.push_back(event.clone());
            signal.notify_one();
        }
    }
}

impl Drop for EventBus {
    fn drop(&mut self) {
        for (_, inbox, signal) in self.inner.subscribers.lock().unwrap().iter() {
            inbox.lock().unwrap().closed = true;
            signal.notify_all();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subscriber_receives_published_events() {
        let bus = EventBus::new(8);
        let sub = bus.subscribe();
        bus.publish(Event::SettingsChanged);
        assert!(matches!(sub.recv_timeout(Duration::from_millis(100)), Some(Event::SettingsChanged)));
    }

    #[test]
    fn overflow_drops_oldest() {
        let bus = EventBus::new(2);
        let sub = bus.subscribe();
        bus.publish(Event::NewItem(RecordId::new()));
        bus.publish(Event::NewItem(RecordId::new()));
        bus.publish(Event::SettingsChanged);

        let drained = sub.drain();
        assert_eq!(drained.len(), 2);
        assert!(matches!(drained[1], Event::SettingsChanged));
    }

    #[test]
    fn independent_subscribers_each_see_every_event() {
        let bus = EventBus::new(8);
        let a = bus.subscribe();
        let b = bus.subscribe();
        bus.publish(Event::SettingsChanged);
        assert!(a.recv_timeout(Duration::from_millis(100)).is_some());
        assert!(b.recv_timeout(Duration::from_millis(100)).is_some());
    }
}
