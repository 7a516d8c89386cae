//! The Event Store contract: an append sink with optimistic concurrency, a
//! historical read, and a history-then-live subscription.
//!
//! Check out the [`EventStore`] trait for the three operations any backend
//! must expose, and [`crate::inmemory::InMemoryEventStore`] for the
//! reference implementation.

use std::pin::Pin;
use std::task::{Context as TaskContext, Poll};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::stream::BoxStream;
use futures::Stream;
use serde::{Deserialize, Serialize};

use crate::error::{ConcurrencyConflict, ParseError, StoreError};
use crate::stream::{EventNumber, Position, StreamId};

/// The one envelope shape this crate uses to pair an event payload with the
/// metadata common to event-sourced systems: when it happened, and who or
/// what caused it.
///
/// Consumers whose `Aggregate::Event` needs this metadata use
/// `EventRecord<TheirEventEnum, TheirOriginType>` as that associated type,
/// rather than inventing their own envelope; everything downstream (the
/// store, the codec layer, aggregates, projections) only ever sees the
/// whole record as an opaque `E` and never needs to know it is one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventRecord<E, O> {
    payload: E,
    occurred_at: DateTime<Utc>,
    origin: Option<O>,
}

impl<E, O> EventRecord<E, O> {
    /// Wraps `payload` with `occurred_at` and an optional `origin`.
    #[must_use]
    pub fn new(payload: E, occurred_at: DateTime<Utc>, origin: Option<O>) -> Self {
        Self {
            payload,
            occurred_at,
            origin,
        }
    }

    /// Returns a reference to the wrapped payload.
    #[must_use]
    pub fn payload(&self) -> &E {
        &self.payload
    }

    /// Returns when this event occurred.
    #[must_use]
    pub fn occurred_at(&self) -> DateTime<Utc> {
        self.occurred_at
    }

    /// Returns the event's origin, if any was recorded.
    #[must_use]
    pub fn origin(&self) -> Option<&O> {
        self.origin.as_ref()
    }

    /// Unwraps the record, discarding its metadata.
    #[must_use]
    pub fn into_payload(self) -> E {
        self.payload
    }
}

/// An [`Event`](EventStore::Event) wrapper for events that have been
/// successfully committed to an [`EventStore`], carrying the [`Position`]
/// at which they live.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PersistedEvent<E> {
    stream_id: StreamId,
    event_number: EventNumber,
    event: E,
}

impl<E> PersistedEvent<E> {
    /// Wraps `event` as having been persisted at `position`.
    #[must_use]
    pub fn new(stream_id: StreamId, event_number: EventNumber, event: E) -> Self {
        Self {
            stream_id,
            event_number,
            event,
        }
    }

    /// Returns the [`StreamId`] this event belongs to.
    #[must_use]
    pub fn stream_id(&self) -> &StreamId {
        &self.stream_id
    }

    /// Returns the [`EventNumber`] this event was assigned.
    #[must_use]
    pub fn event_number(&self) -> EventNumber {
        self.event_number
    }

    /// Returns the [`Position`] this event was persisted at.
    #[must_use]
    pub fn position(&self) -> Position {
        Position::new(self.stream_id.clone(), self.event_number)
    }

    /// Returns a reference to the wrapped event.
    #[must_use]
    pub fn event(&self) -> &E {
        &self.event
    }

    /// Unwraps the inner event, discarding its position.
    #[must_use]
    pub fn into_event(self) -> E {
        self.event
    }
}

/// Errors that can be returned while reading or subscribing to an Event
/// Stream.
#[derive(Debug, thiserror::Error)]
pub enum StreamError {
    /// The backend failed to serve the stream.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// A stored event could not be decoded.
    #[error(transparent)]
    Parse(#[from] ParseError),
}

/// Errors that can be returned by [`EventStore::append`].
#[derive(Debug, thiserror::Error)]
pub enum AppendError {
    /// The stream advanced past the expected version. Callers should reload
    /// and retry.
    #[error(transparent)]
    Conflict(#[from] ConcurrencyConflict),

    /// The backend failed to durably write the events.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// An event could not be encoded; nothing was written.
    #[error(transparent)]
    Parse(#[from] ParseError),
}

impl AppendError {
    /// Returns the [`ConcurrencyConflict`] carried by this error, if any.
    ///
    /// Concurrency conflicts are the one benign, always-retryable failure
    /// mode: callers can match on this instead of the whole error enum.
    #[must_use]
    pub fn as_conflict(&self) -> Option<&ConcurrencyConflict> {
        match self {
            AppendError::Conflict(conflict) => Some(conflict),
            _ => None,
        }
    }
}

/// Stream of [`PersistedEvent`]s returned by [`EventStore::read`] and
/// [`EventStore::subscribe`].
pub type EventStream<'a, E> = BoxStream<'a, Result<PersistedEvent<E>, StreamError>>;

/// An Event Store is an append-only, ordered list of [`Event`](EventStore::Event)s
/// for one or more Streams, identified by [`StreamId`].
#[async_trait]
pub trait EventStore: Send + Sync {
    /// Type of the events accepted and returned by this store.
    type Event: Send + Sync;

    /// Appends `events` to the stream addressed by `to`, starting right
    /// after `to.event_number()`.
    ///
    /// Returns the new end [`Position`] of the stream. Fails with
    /// [`AppendError::Conflict`] if the stream's current end does not match
    /// `to.event_number()`; in that case the store is left unchanged.
    ///
    /// An empty `events` vector is a no-op that returns `to` unchanged.
    async fn append(
        &self,
        to: Position,
        events: Vec<Self::Event>,
    ) -> Result<Position, AppendError>;

    /// Returns exactly the events on `from.stream_id()` with event number
    /// strictly greater than `from.event_number()`, in ascending order, then
    /// ends. Never blocks waiting for future events.
    fn read(&self, from: Position) -> EventStream<'_, Self::Event>;

    /// Returns a [`Subscription`] that first emits the same events as
    /// [`EventStore::read`], then continues with every event subsequently
    /// appended to `from.stream_id()`, until the subscription is dropped.
    ///
    /// Unlike [`EventStore::read`], the returned subscription is detached
    /// from `&self`'s borrow (`'static`): subscriptions are long-lived and
    /// routinely moved into their own task, so a backend must not tie their
    /// lifetime to the handle that created them (in practice this means
    /// backends are `Arc`-backed internally, as [`crate::inmemory::InMemoryEventStore`] is).
    async fn subscribe(&self, from: Position) -> Result<Subscription<'static, Self::Event>, StoreError>;

    /// Convenience: counts the historical events on `stream_id` and returns
    /// its current end [`Position`].
    async fn current_end(&self, stream_id: StreamId) -> Result<Position, StreamError> {
        use futures::TryStreamExt;

        let beginning = Position::beginning(stream_id.clone());
        let last = self
            .read(beginning)
            .try_fold(None, |_, event| async move { Ok(Some(event.event_number())) })
            .await?;

        Ok(Position::new(
            stream_id,
            last.unwrap_or(EventNumber::START),
        ))
    }
}

/// A scoped handle to a live [`EventStore::subscribe`] stream.
///
/// Dropping a [`Subscription`] synchronously releases any backend resources
/// registered on its behalf (e.g. a broadcast receiver, a LISTEN
/// registration). Dropping it more than once is not possible since `Drop`
/// consumes the value; unregistration itself is idempotent on the backend
/// side.
pub struct Subscription<'a, E> {
    inner: EventStream<'a, E>,
    on_drop: Option<Box<dyn FnOnce() + Send + 'a>>,
}

impl<'a, E> Subscription<'a, E> {
    /// Builds a new [`Subscription`] wrapping `inner`, running `on_drop`
    /// exactly once when the subscription is released.
    pub fn new(inner: EventStream<'a, E>, on_drop: impl FnOnce() + Send + 'a) -> Self {
        Self {
            inner,
            on_drop: Some(Box::new(on_drop)),
        }
    }

    /// Builds a [`Subscription`] with no backend cleanup to run on drop.
    pub fn without_cleanup(inner: EventStream<'a, E>) -> Self {
        Self {
            inner,
            on_drop: None,
        }
    }
}

impl<'a, E> Stream for Subscription<'a, E> {
    type Item = Result<PersistedEvent<E>, StreamError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut TaskContext<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.inner).poll_next(cx)
    }
}

impl<'a, E> Drop for Subscription<'a, E> {
    fn drop(&mut self) {
        if let Some(on_drop) = self.on_drop.take() {
            on_drop();
        }
    }
}

/// A read-only view of an [`EventStore`], narrowed to [`EventStore::read`].
///
/// Used by [`crate::projection::load_projection`], which never needs to
/// append or subscribe.
#[async_trait]
pub trait ProjectionEventStore: Send + Sync {
    /// Type of the events returned by this store.
    type Event: Send + Sync;

    /// See [`EventStore::read`].
    fn read(&self, from: Position) -> EventStream<'_, Self::Event>;
}

#[async_trait]
impl<S> ProjectionEventStore for S
where
    S: EventStore,
{
    type Event = S::Event;

    fn read(&self, from: Position) -> EventStream<'_, Self::Event> {
        EventStore::read(self, from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn persisted_event_exposes_its_position() {
        let stream_id = StreamId::new("orders-1").unwrap();
        let persisted = PersistedEvent::new(stream_id.clone(), EventNumber::new(3), "shipped");

        assert_eq!(persisted.position(), Position::new(stream_id, EventNumber::new(3)));
        assert_eq!(persisted.into_event(), "shipped");
    }

    #[cfg(feature = "serde-json")]
    #[test]
    fn event_record_round_trips_through_json() {
        let occurred_at = DateTime::parse_from_rfc3339("2024-01-01T00:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let record = EventRecord::new("order-placed", occurred_at, Some("customer-42"));

        let encoded = serde_json::to_string(&record).unwrap();
        let decoded: EventRecord<&str, &str> = serde_json::from_str(&encoded).unwrap();

        assert_eq!(decoded, record);
        assert_eq!(decoded.payload(), &"order-placed");
        assert_eq!(decoded.origin(), Some(&"customer-42"));
    }
}
