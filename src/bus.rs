//! A process-local event bus for cross-aggregate reactions.
//!
//! Unlike [`crate::store::EventStore`], the bus keeps no history: it only
//! fans events out to whoever is subscribed at publish time. It exists so a
//! [`ProcessManager`] can react to one aggregate's events by driving
//! commands against another, without the two aggregates depending on each
//! other directly.

use std::collections::HashMap;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::task::{Context as TaskContext, Poll};

use futures::{Stream, StreamExt};
use tokio::sync::mpsc;

use crate::aggregate::{Aggregate, Repository};
use crate::store::EventStore;
use crate::stream::StreamId;

type Dispatch<E> = Box<dyn Fn(&StreamId, &E) + Send + Sync>;

/// An in-process publish/subscribe channel for events of type `E`.
///
/// Delivery is at-most-once per live subscriber, in publish order per
/// publisher task: events published before a subscription exists are never
/// delivered to it. Each subscriber has its own unbounded `mpsc` channel, so
/// a slow subscriber cannot block `publish` or any other subscriber.
pub struct EventBus<E> {
    listeners: Arc<Mutex<HashMap<u64, Dispatch<E>>>>,
    next_id: AtomicU64,
}

impl<E> EventBus<E>
where
    E: Send + Sync + 'static,
{
    /// Builds an empty bus.
    #[must_use]
    pub fn new() -> Self {
        Self {
            listeners: Arc::new(Mutex::new(HashMap::new())),
            next_id: AtomicU64::new(0),
        }
    }

    /// Delivers `event` to every subscriber whose predicate accepts it.
    pub fn publish(&self, stream_id: &StreamId, event: &E) {
        let listeners = self.listeners.lock().unwrap_or_else(|poisoned| poisoned.into_inner());

        for dispatch in listeners.values() {
            dispatch(stream_id, event);
        }
    }

    /// Subscribes to events accepted by `predicate`, narrowing each to `T`.
    ///
    /// `predicate` is evaluated against every published event on this bus;
    /// returning `Some(t)` delivers `t` to this subscription, `None` skips
    /// it. This is the bus's "subscribe filtered by type" idiom: a
    /// predicate that matches one variant of an event enum and projects it
    /// out is the common case.
    pub fn subscribe<T>(
        &self,
        predicate: impl Fn(&StreamId, &E) -> Option<T> + Send + Sync + 'static,
    ) -> BusSubscription<E, T>
    where
        T: Send + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (sender, receiver) = mpsc::unbounded_channel();

        let dispatch: Dispatch<E> = Box::new(move |stream_id, event| {
            if let Some(item) = predicate(stream_id, event) {
                // A closed receiver means the subscription was already
                // dropped; the listener itself is removed from the map by
                // BusSubscription's Drop impl, this send is just stale.
                let _ = sender.send((stream_id.clone(), item));
            }
        });

        self.listeners
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(id, dispatch);

        BusSubscription {
            id,
            listeners: Arc::clone(&self.listeners),
            receiver,
        }
    }
}

impl<E> Default for EventBus<E>
where
    E: Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

/// A scoped subscription to an [`EventBus`], yielding `(StreamId, T)` pairs.
///
/// Dropping a [`BusSubscription`] unregisters it synchronously: the next
/// [`EventBus::publish`] call will not attempt to deliver to it.
pub struct BusSubscription<E, T> {
    id: u64,
    listeners: Arc<Mutex<HashMap<u64, Dispatch<E>>>>,
    receiver: mpsc::UnboundedReceiver<(StreamId, T)>,
}

impl<E, T> Stream for BusSubscription<E, T> {
    type Item = (StreamId, T);

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut TaskContext<'_>) -> Poll<Option<Self::Item>> {
        self.receiver.poll_recv(cx)
    }
}

impl<E, T> Drop for BusSubscription<E, T> {
    fn drop(&mut self) {
        let mut listeners = self
            .listeners
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        listeners.remove(&self.id);
    }
}

/// Drives a dependent [`Aggregate`] from events observed on a
/// [`BusSubscription`]: for each matching event, `react` decides which
/// events to record against which aggregate id, and the manager performs
/// the standard load-command-save loop on its behalf.
///
/// Handler failures are logged and do not stop the loop: one bad reaction
/// must not starve the rest of the subscription.
pub struct ProcessManager<A, S> {
    repository: Arc<Repository<A, S>>,
}

impl<A, S> ProcessManager<A, S>
where
    A: Aggregate,
    A::Id: Clone + Into<StreamId>,
    S: EventStore<Event = A::Event>,
{
    /// Builds a [`ProcessManager`] that commits reactions through
    /// `repository`.
    #[must_use]
    pub fn new(repository: Arc<Repository<A, S>>) -> Self {
        Self { repository }
    }

    /// Consumes `subscription`, calling `react` for each item and
    /// committing the resulting events to the aggregate it names.
    ///
    /// Returns once `subscription` ends (its [`EventBus`] was dropped, or
    /// the subscription itself was cancelled from elsewhere).
    pub async fn run<E, T, F, Fut>(&self, mut subscription: BusSubscription<E, T>, mut react: F)
    where
        T: Send,
        F: FnMut(StreamId, T) -> Fut + Send,
        Fut: std::future::Future<Output = anyhow::Result<Option<(A::Id, Vec<A::Event>)>>> + Send,
    {
        while let Some((stream_id, item)) = subscription.next().await {
            let reaction = match react(stream_id, item).await {
                Ok(reaction) => reaction,
                Err(error) => {
                    tracing::error!(%error, "process manager reaction failed");
                    continue;
                }
            };

            let Some((id, events)) = reaction else {
                continue;
            };

            if events.is_empty() {
                continue;
            }

            let mut root = match self.repository.load(&id).await {
                Ok(root) => root,
                Err(error) => {
                    tracing::error!(%error, "process manager failed to load dependent aggregate");
                    continue;
                }
            };

            let mut apply_failed = false;
            for event in events {
                if let Err(error) = root.record(event) {
                    tracing::error!(%error, "process manager failed to apply event to dependent aggregate");
                    apply_failed = true;
                    break;
                }
            }

            if apply_failed {
                continue;
            }

            if let Err(error) = self.repository.save(&mut root).await {
                tracing::error!(%error, "process manager failed to save dependent aggregate");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, PartialEq, Eq)]
    enum OrderEvent {
        Placed,
        Cancelled,
    }

    #[tokio::test]
    async fn subscribers_only_receive_events_matching_their_predicate() {
        let bus: EventBus<OrderEvent> = EventBus::new();
        let mut placed = bus.subscribe(|_stream_id, event| {
            matches!(event, OrderEvent::Placed).then_some(())
        });

        let stream_id = StreamId::new("orders-1").unwrap();
        bus.publish(&stream_id, &OrderEvent::Cancelled);
        bus.publish(&stream_id, &OrderEvent::Placed);

        let (received_stream_id, ()) = placed.next().await.unwrap();
        assert_eq!(received_stream_id, stream_id);
    }

    #[tokio::test]
    async fn dropping_a_subscription_unregisters_it() {
        let bus: EventBus<OrderEvent> = EventBus::new();
        let subscription = bus.subscribe(|_, _| Some(()));
        assert_eq!(bus.listeners.lock().unwrap().len(), 1);

        drop(subscription);
        assert_eq!(bus.listeners.lock().unwrap().len(), 0);
    }

    #[tokio::test]
    async fn events_published_before_subscribing_are_not_replayed() {
        let bus: EventBus<OrderEvent> = EventBus::new();
        bus.publish(&StreamId::new("orders-1").unwrap(), &OrderEvent::Placed);

        let mut subscription = bus.subscribe(|_, _| Some(()));
        bus.publish(&StreamId::new("orders-2").unwrap(), &OrderEvent::Placed);

        let (stream_id, ()) = subscription.next().await.unwrap();
        assert_eq!(stream_id, StreamId::new("orders-2").unwrap());
    }
}
