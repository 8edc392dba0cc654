// SPDX-License-Identifier: MIT OR Apache-2.0
//! Runtime event distribution.
//!
//! Observers of the dispatcher subscribe here for lifecycle and failure
//! events.  Delivery rides a tokio broadcast channel and is strictly
//! fire-and-forget: publishing never blocks the dispatch path, an event
//! nobody is listening for is counted rather than buffered, and a slow
//! subscriber loses old events instead of slowing the bus down.

use loom_core::RuntimeEvent;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::{RecvError, TryRecvError};

/// Default broadcast channel capacity.
const DEFAULT_CAPACITY: usize = 256;

/// Fan-out channel for [`RuntimeEvent`]s.
///
/// The bus keeps two counters: everything ever published, and everything
/// that never reached a subscriber (published with nobody listening, or
/// skipped because a subscriber lagged past the channel capacity).
pub struct EventBus {
    sender: broadcast::Sender<RuntimeEvent>,
    published: AtomicU64,
    /// Shared with subscriptions so lag-skips land in the same counter.
    undelivered: Arc<AtomicU64>,
}

impl EventBus {
    /// A bus with the default capacity.
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    /// A bus whose channel buffers up to `capacity` events per subscriber.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender,
            published: AtomicU64::new(0),
            undelivered: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Publish an event to whoever is listening.
    ///
    /// Never blocks and never fails; with zero subscribers the event is
    /// dropped and counted.
    pub fn publish(&self, event: RuntimeEvent) {
        self.published.fetch_add(1, Ordering::Relaxed);
        let reached = self.sender.send(event).unwrap_or_default();
        if reached == 0 {
            self.undelivered.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Open a subscription receiving every event published from now on.
    #[must_use]
    pub fn subscribe(&self) -> EventSubscription {
        EventSubscription {
            rx: self.sender.subscribe(),
            undelivered: Arc::clone(&self.undelivered),
        }
    }

    /// Open a subscription that only yields events matching `filter`.
    #[must_use]
    pub fn subscribe_filtered(
        &self,
        filter: impl Fn(&RuntimeEvent) -> bool + Send + Sync + 'static,
    ) -> FilteredSubscription {
        FilteredSubscription {
            inner: self.subscribe(),
            filter: Box::new(filter),
        }
    }

    /// Counters plus the current subscriber count.
    #[must_use]
    pub fn stats(&self) -> EventBusStats {
        EventBusStats {
            total_published: self.published.load(Ordering::Relaxed),
            active_subscribers: self.sender.receiver_count(),
            dropped_events: self.undelivered.load(Ordering::Relaxed),
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

/// One subscriber's view of the bus.
pub struct EventSubscription {
    rx: broadcast::Receiver<RuntimeEvent>,
    undelivered: Arc<AtomicU64>,
}

impl EventSubscription {
    /// Wait for the next event.
    ///
    /// Resolves to `None` once the bus is gone.  Falling behind the channel
    /// capacity skips the lost events (counting them against the bus) and
    /// keeps going with the oldest one still buffered.
    pub async fn recv(&mut self) -> Option<RuntimeEvent> {
        loop {
            match self.rx.recv().await {
                Ok(event) => break Some(event),
                Err(RecvError::Closed) => break None,
                Err(RecvError::Lagged(skipped)) => {
                    self.undelivered.fetch_add(skipped, Ordering::Relaxed);
                }
            }
        }
    }

    /// Take an already-buffered event, if there is one.
    pub fn try_recv(&mut self) -> Option<RuntimeEvent> {
        loop {
            match self.rx.try_recv() {
                Ok(event) => break Some(event),
                Err(TryRecvError::Lagged(skipped)) => {
                    self.undelivered.fetch_add(skipped, Ordering::Relaxed);
                }
                Err(_) => break None,
            }
        }
    }

    /// Convert into a [`Stream`](tokio_stream::Stream) of events.
    ///
    /// Lagged gaps are skipped (and counted against the bus statistics by
    /// the broadcast channel itself).
    pub fn into_stream(self) -> impl tokio_stream::Stream<Item = RuntimeEvent> {
        use tokio_stream::StreamExt;
        tokio_stream::wrappers::BroadcastStream::new(self.rx).filter_map(Result::ok)
    }
}

/// An [`EventSubscription`] that discards events failing its predicate.
pub struct FilteredSubscription {
    inner: EventSubscription,
    filter: Box<dyn Fn(&RuntimeEvent) -> bool + Send + Sync>,
}

impl FilteredSubscription {
    /// Wait for the next event the predicate accepts.
    pub async fn recv(&mut self) -> Option<RuntimeEvent> {
        while let Some(event) = self.inner.recv().await {
            if (self.filter)(&event) {
                return Some(event);
            }
        }
        None
    }
}

/// Point-in-time counters for an [`EventBus`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventBusStats {
    /// Events published since the bus was created.
    pub total_published: u64,
    /// Subscriptions currently open.
    pub active_subscribers: usize,
    /// Events that never reached a subscriber (nobody listening, or lost
    /// to subscriber lag).
    pub dropped_events: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use loom_core::ActorRef;

    fn hydrated(actor_id: &str) -> RuntimeEvent {
        RuntimeEvent::ActorHydrated {
            actor_ref: ActorRef::new("t", "ty", actor_id),
            replayed_entries: 0,
        }
    }

    #[tokio::test]
    async fn subscribers_receive_published_events() {
        let bus = EventBus::new();
        let mut sub = bus.subscribe();
        bus.publish(hydrated("a-1"));
        match sub.recv().await {
            Some(RuntimeEvent::ActorHydrated { actor_ref, .. }) => {
                assert_eq!(actor_ref.actor_id, "a-1");
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[tokio::test]
    async fn publish_without_subscribers_counts_drops() {
        let bus = EventBus::new();
        bus.publish(hydrated("a-1"));
        let stats = bus.stats();
        assert_eq!(stats.total_published, 1);
        assert_eq!(stats.dropped_events, 1);
        assert_eq!(stats.active_subscribers, 0);
    }

    #[tokio::test]
    async fn filtered_subscription_skips_non_matching() {
        let bus = EventBus::new();
        let mut sub = bus.subscribe_filtered(|ev| {
            matches!(ev, RuntimeEvent::IdempotencyHit { .. })
        });
        bus.publish(hydrated("a-1"));
        bus.publish(RuntimeEvent::IdempotencyHit {
            actor_ref: ActorRef::new("t", "ty", "a-2"),
            idempotency_key: "k".into(),
        });
        match sub.recv().await {
            Some(RuntimeEvent::IdempotencyHit { idempotency_key, .. }) => {
                assert_eq!(idempotency_key, "k");
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[tokio::test]
    async fn try_recv_is_non_blocking() {
        let bus = EventBus::new();
        let mut sub = bus.subscribe();
        assert!(sub.try_recv().is_none());
        bus.publish(hydrated("a-1"));
        assert!(sub.try_recv().is_some());
    }

    #[tokio::test]
    async fn lagged_subscriber_skips_and_counts_lost_events() {
        let bus = EventBus::with_capacity(2);
        let mut sub = bus.subscribe();
        for i in 0..5 {
            bus.publish(hydrated(&format!("a-{i}")));
        }
        // The two newest events survive the lag; three were lost.
        let first = sub.recv().await.expect("buffered event");
        match first {
            RuntimeEvent::ActorHydrated { actor_ref, .. } => {
                assert_eq!(actor_ref.actor_id, "a-3");
            }
            other => panic!("unexpected event: {other:?}"),
        }
        assert!(sub.recv().await.is_some());
        assert_eq!(bus.stats().dropped_events, 3);
    }

    #[tokio::test]
    async fn subscription_converts_into_a_stream() {
        use tokio_stream::StreamExt;
        let bus = EventBus::new();
        let mut stream = Box::pin(bus.subscribe().into_stream());
        bus.publish(hydrated("a-1"));
        bus.publish(hydrated("a-2"));
        drop(bus);
        let mut ids = Vec::new();
        while let Some(ev) = stream.next().await {
            if let RuntimeEvent::ActorHydrated { actor_ref, .. } = ev {
                ids.push(actor_ref.actor_id);
            }
        }
        assert_eq!(ids, vec!["a-1", "a-2"]);
    }
}
