// SPDX-License-Identifier: MIT

//! Event Bus (§4.1): synchronous-publish, asynchronous-deliver pub/sub
//! keyed by event type. Each subscriber owns its own bounded queue so a
//! slow subscriber can never starve the others, and `publish` never
//! blocks the caller — a full queue just drops the event for that one
//! subscriber and bumps a counter.
//!
//! Generalized from the teacher's WAL-coupled `EventBus` (which paired
//! every publish with an append to an on-disk log) into a pure fan-out
//! primitive: persistence is `mux-storage`'s job, reached by having the
//! Manager subscribe like any other consumer (§9: "State Machines only
//! publish to the Event Bus; Manager subscribes and performs
//! storage/config mutations").

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use mux_core::event::{Event, EventKind};
use tokio::sync::mpsc;

/// Queue depth for each subscriber's channel. Exceeding this drops events
/// for that subscriber only; it never slows down `publish`.
pub const DEFAULT_SUBSCRIBER_CAPACITY: usize = 256;

struct Subscriber {
    tx: mpsc::Sender<Event>,
    dropped: Arc<AtomicU64>,
}

struct Registry {
    by_kind: HashMap<EventKind, Vec<Subscriber>>,
    closed: bool,
}

impl Registry {
    fn new() -> Self {
        Self {
            by_kind: HashMap::new(),
            closed: false,
        }
    }
}

/// A handle to a live subscription. Dropping it unregisters nothing
/// automatically (the bus prunes dead senders lazily on next publish);
/// holding onto the `Receiver` is what keeps the subscription alive.
pub struct Subscription {
    pub rx: mpsc::Receiver<Event>,
    dropped: Arc<AtomicU64>,
}

impl Subscription {
    /// Count of events dropped for this subscriber because its queue was
    /// full at publish time.
    pub fn dropped_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    pub async fn recv(&mut self) -> Option<Event> {
        self.rx.recv().await
    }
}

/// Cheaply cloneable handle shared by every publisher (state machines,
/// the Manager, the Router) and every subscriber (storage writer, CLI/UI
/// forwarders).
#[derive(Clone)]
pub struct EventBus {
    registry: Arc<parking_lot::Mutex<Registry>>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    pub fn new() -> Self {
        Self {
            registry: Arc::new(parking_lot::Mutex::new(Registry::new())),
        }
    }

    /// Subscribe to events of one kind. Returns a bounded stream of
    /// matching events; events of other kinds never reach this receiver.
    pub fn subscribe(&self, kind: EventKind) -> Subscription {
        self.subscribe_with_capacity(kind, DEFAULT_SUBSCRIBER_CAPACITY)
    }

    pub fn subscribe_with_capacity(&self, kind: EventKind, capacity: usize) -> Subscription {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let dropped = Arc::new(AtomicU64::new(0));
        let mut registry = self.registry.lock();
        registry.by_kind.entry(kind).or_default().push(Subscriber {
            tx,
            dropped: dropped.clone(),
        });
        Subscription { rx, dropped }
    }

    /// Deliver `event` to every current subscriber of its kind using a
    /// non-blocking send. Never blocks the caller: a full subscriber
    /// queue drops the event for that subscriber only. Events from a
    /// single publisher are delivered in publish order to each
    /// subscriber (mpsc preserves FIFO per sender); there is no ordering
    /// guarantee across distinct publishers.
    pub fn publish(&self, event: Event) {
        let kind = event.kind();
        let mut registry = self.registry.lock();
        if registry.closed {
            return;
        }
        if let Some(subs) = registry.by_kind.get_mut(&kind) {
            subs.retain(|sub| match sub.tx.try_send(event.clone()) {
                Ok(()) => true,
                Err(mpsc::error::TrySendError::Full(_)) => {
                    sub.dropped.fetch_add(1, Ordering::Relaxed);
                    tracing::warn!(?kind, "event bus subscriber queue full, dropping event");
                    true
                }
                Err(mpsc::error::TrySendError::Closed(_)) => false,
            });
        }
    }

    /// Drains subscribers (drops all senders, closing their receivers)
    /// and marks the bus closed: subsequent `publish` calls are a no-op.
    pub fn close(&self) {
        let mut registry = self.registry.lock();
        registry.closed = true;
        registry.by_kind.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn sample_event(name: &str) -> Event {
        Event::ConnectionEstablished {
            server_name: name.into(),
            timestamp: Utc::now(),
        }
    }

    #[tokio::test]
    async fn subscriber_receives_only_its_kind() {
        let bus = EventBus::new();
        let mut conn = bus.subscribe(EventKind::ConnectionEstablished);
        let mut lost = bus.subscribe(EventKind::ConnectionLost);

        bus.publish(sample_event("a"));

        let got = conn.recv().await.expect("event delivered");
        assert_eq!(got.server_name(), Some("a"));
        assert!(lost.rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn full_queue_drops_for_that_subscriber_and_counts_it() {
        let bus = EventBus::new();
        let mut sub = bus.subscribe_with_capacity(EventKind::ConnectionEstablished, 1);

        bus.publish(sample_event("a"));
        bus.publish(sample_event("b")); // queue full, dropped
        bus.publish(sample_event("c")); // still full, dropped

        assert_eq!(sub.dropped_count(), 2);
        let got = sub.recv().await.unwrap();
        assert_eq!(got.server_name(), Some("a"));
    }

    #[tokio::test]
    async fn a_slow_subscriber_does_not_starve_a_fast_one() {
        let bus = EventBus::new();
        let slow = bus.subscribe_with_capacity(EventKind::ConnectionEstablished, 1);
        let mut fast = bus.subscribe_with_capacity(EventKind::ConnectionEstablished, 64);

        for i in 0..10 {
            bus.publish(sample_event(&format!("srv-{i}")));
        }

        for _ in 0..10 {
            assert!(fast.recv().await.is_some());
        }
        drop(slow);
    }

    #[tokio::test]
    async fn close_makes_subsequent_publish_a_no_op() {
        let bus = EventBus::new();
        let mut sub = bus.subscribe(EventKind::ConnectionEstablished);
        bus.close();
        bus.publish(sample_event("a"));
        assert!(sub.rx.recv().await.is_none());
    }
}
