//! Reference [`EventStore`] backend: everything lives in process memory.
//!
//! Built around a `tokio::sync::broadcast` channel per [`StreamId`], so
//! history and live events share one ordered log instead of a single flat
//! global one.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use futures::StreamExt;
use tokio::sync::{broadcast, RwLock};

use crate::error::{ConcurrencyConflict, Operation, StoreError};
use crate::store::{AppendError, EventStore, EventStream, PersistedEvent, StreamError, Subscription};
use crate::stream::{EventNumber, Position, StreamId};

/// Default capacity of the per-stream broadcast channel. A subscriber that
/// falls behind this many not-yet-consumed events observes a lag error.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 1024;

struct StreamLog<E> {
    events: Vec<PersistedEvent<E>>,
    sender: broadcast::Sender<PersistedEvent<E>>,
}

impl<E> StreamLog<E>
where
    E: Clone,
{
    fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);

        Self {
            events: Vec::new(),
            sender,
        }
    }
}

/// An in-memory, process-local [`EventStore`].
///
/// Cloning shares the underlying log via `Arc`: all clones observe the same
/// streams and the same live subscriptions (exercised by the contract
/// suite's cross-instance propagation property).
pub struct InMemoryEventStore<E> {
    streams: Arc<RwLock<HashMap<StreamId, StreamLog<E>>>>,
    channel_capacity: usize,
}

impl<E> InMemoryEventStore<E> {
    /// Builds an empty store with the default broadcast channel capacity.
    #[must_use]
    pub fn new() -> Self {
        Self::with_channel_capacity(DEFAULT_CHANNEL_CAPACITY)
    }

    /// Builds an empty store whose per-stream broadcast channels hold at
    /// most `capacity` not-yet-consumed events per subscriber.
    #[must_use]
    pub fn with_channel_capacity(capacity: usize) -> Self {
        Self {
            streams: Arc::new(RwLock::new(HashMap::new())),
            channel_capacity: capacity,
        }
    }
}

impl<E> Default for InMemoryEventStore<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E> Clone for InMemoryEventStore<E> {
    fn clone(&self) -> Self {
        Self {
            streams: Arc::clone(&self.streams),
            channel_capacity: self.channel_capacity,
        }
    }
}

#[async_trait]
impl<E> EventStore for InMemoryEventStore<E>
where
    E: Clone + Send + Sync + 'static,
{
    type Event = E;

    async fn append(
        &self,
        to: Position,
        events: Vec<Self::Event>,
    ) -> Result<Position, AppendError> {
        if events.is_empty() {
            return Ok(to);
        }

        let stream_id = to.stream_id().clone();
        let expected = to.event_number();
        let capacity = self.channel_capacity;

        let mut streams = self.streams.write().await;
        let log = streams
            .entry(stream_id.clone())
            .or_insert_with(|| StreamLog::new(capacity));

        let actual = EventNumber::new(log.events.len() as u64);
        if actual != expected {
            return Err(ConcurrencyConflict {
                stream_id,
                expected,
                actual,
            }
            .into());
        }

        let mut event_number = expected;
        for event in events {
            event_number = event_number.next();
            let persisted = PersistedEvent::new(stream_id.clone(), event_number, event);
            log.events.push(persisted.clone());
            // No receivers is not an error: a stream with nobody subscribed
            // simply drops the notification.
            let _ = log.sender.send(persisted);
        }

        Ok(Position::new(stream_id, event_number))
    }

    fn read(&self, from: Position) -> EventStream<'_, Self::Event> {
        let streams = Arc::clone(&self.streams);
        let stream_id = from.stream_id().clone();
        let start = from.event_number();

        async_stream::try_stream! {
            let streams = streams.read().await;
            let snapshot = streams
                .get(&stream_id)
                .map(|log| log.events.clone())
                .unwrap_or_default();
            drop(streams);

            for event in snapshot {
                if event.event_number() > start {
                    yield event;
                }
            }
        }
        .boxed()
    }

    async fn subscribe(
        &self,
        from: Position,
    ) -> Result<Subscription<'static, Self::Event>, StoreError> {
        let stream_id = from.stream_id().clone();
        let start = from.event_number();
        let capacity = self.channel_capacity;

        // Register the live listener before taking the snapshot, under the
        // same write guard, so no append can land between the two steps.
        let mut streams = self.streams.write().await;
        let log = streams
            .entry(stream_id.clone())
            .or_insert_with(|| StreamLog::new(capacity));

        let mut receiver = log.sender.subscribe();
        let snapshot = log.events.clone();
        drop(streams);

        let snapshot_end = EventNumber::new(snapshot.len() as u64);
        let history = snapshot.into_iter().filter(move |event| event.event_number() > start);
        let subscribe_stream_id = stream_id.clone();

        let stream = async_stream::try_stream! {
            for event in history {
                yield event;
            }

            loop {
                match receiver.recv().await {
                    Ok(event) if event.event_number() > snapshot_end => yield event,
                    Ok(_) => continue,
                    Err(broadcast::error::RecvError::Closed) => break,
                    Err(err @ broadcast::error::RecvError::Lagged(_)) => {
                        Err(StoreError::new(
                            Operation::Subscribe,
                            Some(subscribe_stream_id.clone()),
                            err.to_string(),
                        ))?;
                    }
                }
            }
        };

        Ok(Subscription::without_cleanup(stream.boxed()))
    }
}
