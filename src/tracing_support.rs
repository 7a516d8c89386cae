//! Instrumentation wrappers around the store and repository seams, using
//! the `tracing` crate.
//!
//! Each wrapper holds an inner implementation, instruments its operations
//! with a span, and otherwise delegates straight through.

use std::fmt::Debug;

use async_trait::async_trait;
use tracing::instrument;

use crate::aggregate::{Aggregate, RehydrateError, Repository};
use crate::store::{AppendError, EventStore, EventStream, StoreError, Subscription};
use crate::stream::{Position, StreamId};

/// [`EventStore`] wrapper that instruments `append` and `subscribe` with
/// `tracing` spans.
///
/// `read` is intentionally left uninstrumented at the call-establishing
/// site: it returns a lazy stream, and instrumenting the call itself would
/// measure nothing (the real work happens as the caller polls).
pub struct InstrumentedEventStore<S> {
    inner: S,
}

#[async_trait]
impl<S> EventStore for InstrumentedEventStore<S>
where
    S: EventStore,
    S::Event: Debug,
{
    type Event = S::Event;

    #[allow(clippy::blocks_in_conditions)]
    #[instrument(name = "EventStore::append", skip(self, events), fields(events = events.len()), err)]
    async fn append(
        &self,
        to: Position,
        events: Vec<Self::Event>,
    ) -> Result<Position, AppendError> {
        self.inner.append(to, events).await
    }

    fn read(&self, from: Position) -> EventStream<'_, Self::Event> {
        self.inner.read(from)
    }

    #[allow(clippy::blocks_in_conditions)]
    #[instrument(name = "EventStore::subscribe", skip(self), err)]
    async fn subscribe(
        &self,
        from: Position,
    ) -> Result<Subscription<'static, Self::Event>, StoreError> {
        self.inner.subscribe(from).await
    }
}

/// Extension trait adding `.with_tracing()` to any [`EventStore`].
pub trait EventStoreExt: EventStore + Sized {
    /// Wraps this store with `tracing` instrumentation.
    fn with_tracing(self) -> InstrumentedEventStore<Self> {
        InstrumentedEventStore { inner: self }
    }
}

impl<S> EventStoreExt for S where S: EventStore {}

/// [`Repository`] wrapper that instruments `load` and `save` with `tracing`
/// spans.
pub struct InstrumentedRepository<A, S> {
    inner: Repository<A, S>,
}

impl<A, S> InstrumentedRepository<A, S>
where
    A: Aggregate,
    A::Id: Into<StreamId> + Debug,
    S: EventStore<Event = A::Event>,
{
    /// Wraps `repository` with `tracing` instrumentation.
    pub fn new(repository: Repository<A, S>) -> Self {
        Self { inner: repository }
    }

    /// See [`Repository::load`].
    #[instrument(name = "Repository::load", skip(self), err)]
    pub async fn load(&self, id: &A::Id) -> Result<crate::aggregate::AggregateRoot<A>, RehydrateError<A::Error>> {
        self.inner.load(id).await
    }

    /// See [`Repository::save`].
    #[instrument(name = "Repository::save", skip(self, root), err)]
    pub async fn save(
        &self,
        root: &mut crate::aggregate::AggregateRoot<A>,
    ) -> Result<Position, AppendError> {
        self.inner.save(root).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inmemory::InMemoryEventStore;

    #[tokio::test]
    async fn instrumented_store_delegates_transparently() {
        let store = InMemoryEventStore::<&'static str>::new().with_tracing();
        let id = StreamId::new("orders-1").unwrap();

        let end = store
            .append(Position::beginning(id.clone()), vec!["created"])
            .await
            .unwrap();

        assert_eq!(end.event_number(), crate::stream::EventNumber::new(1));
    }
}
