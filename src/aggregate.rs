//! Aggregate roots: rehydration from an [`EventStore`] and the
//! load-command-commit loop built on top of it.
//!
//! Splits the pattern into an `Aggregate` (the pure apply fold), a
//! `Context` (ambient command metadata), an `AggregateRoot` (the live,
//! rehydrated instance with its buffered uncommitted events) and a
//! `Repository` (load/save against an `EventStore`).

use async_trait::async_trait;
use futures::StreamExt;

use crate::error::CommandContextError;
use crate::store::{AppendError, EventStore, StreamError};
use crate::stream::{EventNumber, Position, StreamId};

/// A fold from a stream of domain events to a consumer-defined aggregate
/// state.
///
/// `apply` must be *total* over any state reachable from a valid history
/// (it is run once per historical event during [`Repository::load`]) and
/// *deterministic*: the same `(state, event)` pair always produces the same
/// result. It may fail only when an event genuinely cannot be applied to
/// the given state (e.g. a non-create event arriving on `None`); such a
/// failure indicates a corrupted stream and propagates out of `load`.
pub trait Aggregate: Sized + Send + Sync {
    /// Identifier type, mapped to a [`StreamId`] by the [`Repository`].
    type Id: Clone + Send + Sync;
    /// Domain event type folded by [`Aggregate::apply`].
    type Event: Clone + Send + Sync;
    /// Error returned when an event cannot be applied.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Folds `event` onto `state`, producing the next state.
    fn apply(state: Option<Self>, event: Self::Event) -> Result<Self, Self::Error>;
}

/// Read-only snapshot of an [`AggregateRoot`]: the folded data (if any
/// create event has been observed) and the event number to use as the
/// expected version on the next commit.
#[derive(Debug, Clone)]
pub struct AggregateState<S> {
    data: Option<S>,
    next_event_number: EventNumber,
}

impl<S> AggregateState<S> {
    /// Returns the folded aggregate data, or `None` if no create event has
    /// been observed yet.
    #[must_use]
    pub fn data(&self) -> Option<&S> {
        self.data.as_ref()
    }

    /// Returns the event number to use as the expected version of the next
    /// commit against this aggregate's stream.
    #[must_use]
    pub fn next_event_number(&self) -> EventNumber {
        self.next_event_number
    }
}

/// Error returned by [`Repository::load`].
#[derive(Debug, thiserror::Error)]
pub enum RehydrateError<E> {
    /// Reading the aggregate's stream failed.
    #[error(transparent)]
    Stream(#[from] StreamError),

    /// Folding a historical event onto the aggregate state failed.
    #[error("failed to apply event while rehydrating aggregate: {0}")]
    Apply(#[source] E),
}

/// A live aggregate instance: its current state, the event number to
/// commit at next, and any events recorded but not yet saved.
///
/// Built only through [`Repository::load`]: a root always starts from
/// rehydrated history, never from a bare consumer-constructed state.
pub struct AggregateRoot<A: Aggregate> {
    id: A::Id,
    state: Option<A>,
    next_event_number: EventNumber,
    uncommitted: Vec<A::Event>,
}

impl<A: Aggregate> AggregateRoot<A> {
    fn rehydrated(id: A::Id, state: Option<A>, next_event_number: EventNumber) -> Self {
        Self {
            id,
            state,
            next_event_number,
            uncommitted: Vec::new(),
        }
    }

    /// Returns this aggregate's identifier.
    #[must_use]
    pub fn id(&self) -> &A::Id {
        &self.id
    }

    /// Returns the current folded state, or `None` if no create event has
    /// been recorded or observed yet.
    #[must_use]
    pub fn state(&self) -> Option<&A> {
        self.state.as_ref()
    }

    /// Returns the event number to use as the expected version on the next
    /// [`Repository::save`].
    #[must_use]
    pub fn next_event_number(&self) -> EventNumber {
        self.next_event_number
    }

    /// Applies `event` immediately to the in-memory state and buffers it
    /// for the next [`Repository::save`].
    ///
    /// # Errors
    ///
    /// Returns `A::Error` if `event` cannot be applied to the current
    /// state.
    pub fn record(&mut self, event: A::Event) -> Result<(), A::Error> {
        let state = self.state.take();
        self.state = Some(A::apply(state, event.clone())?);
        self.next_event_number = self.next_event_number.next();
        self.uncommitted.push(event);

        Ok(())
    }

    fn take_uncommitted(&mut self) -> Vec<A::Event> {
        std::mem::take(&mut self.uncommitted)
    }
}

impl<A> AggregateRoot<A>
where
    A: Aggregate + Clone,
{
    /// Takes an immutable, owned snapshot of this root's state.
    #[must_use]
    pub fn to_state(&self) -> AggregateState<A> {
        AggregateState {
            data: self.state.clone(),
            next_event_number: self.next_event_number,
        }
    }
}

/// Loads and saves [`AggregateRoot`]s of `A` against an [`EventStore`] of
/// `A::Event`.
pub struct Repository<A, S> {
    store: S,
    _aggregate: std::marker::PhantomData<fn() -> A>,
}

impl<A, S> Repository<A, S>
where
    A: Aggregate,
    A::Id: Into<StreamId>,
    S: EventStore<Event = A::Event>,
{
    /// Builds a [`Repository`] backed by `store`.
    pub fn new(store: S) -> Self {
        Self {
            store,
            _aggregate: std::marker::PhantomData,
        }
    }

    /// Returns a reference to the backing store.
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Rehydrates the [`AggregateRoot`] identified by `id` by reading and
    /// folding its full history. Read-only; safe to call concurrently with
    /// any other operation.
    ///
    /// # Errors
    ///
    /// Returns [`RehydrateError::Stream`] if the read fails, or
    /// [`RehydrateError::Apply`] if a historical event cannot be applied to
    /// the folded state (a corrupted stream).
    pub async fn load(&self, id: &A::Id) -> Result<AggregateRoot<A>, RehydrateError<A::Error>> {
        let stream_id: StreamId = id.clone().into();
        let mut events = self.store.read(Position::beginning(stream_id));

        let mut state: Option<A> = None;
        let mut next_event_number = EventNumber::START;

        while let Some(item) = events.next().await {
            let persisted = item?;
            next_event_number = persisted.event_number();
            state = Some(A::apply(state, persisted.into_event()).map_err(RehydrateError::Apply)?);
        }

        Ok(AggregateRoot::rehydrated(id.clone(), state, next_event_number))
    }

    /// Commits `root`'s buffered events as a single atomic append at its
    /// current expected version, then advances `root`'s expected version to
    /// the new end.
    ///
    /// An empty buffer is a legal no-op: returns the root's current
    /// position without touching the store.
    ///
    /// # Errors
    ///
    /// Surfaces [`AppendError::Conflict`] unchanged so callers can reload
    /// and retry; other variants indicate a backend or codec failure.
    pub async fn save(&self, root: &mut AggregateRoot<A>) -> Result<Position, AppendError> {
        let stream_id: StreamId = root.id.clone().into();
        let to = Position::new(stream_id, root.next_event_number);

        let events = root.take_uncommitted();
        if events.is_empty() {
            return Ok(to);
        }

        let new_end = self.store.append(to, events).await?;
        root.next_event_number = new_end.event_number();

        Ok(new_end)
    }
}

/// Ambient context threaded explicitly through command handling: who is
/// asking, rather than thread-local or global state.
#[derive(Debug, Clone)]
pub struct Context<O = ()> {
    initiator: Option<O>,
}

impl<O> Context<O> {
    /// A context with no known initiator.
    #[must_use]
    pub fn anonymous() -> Self {
        Self { initiator: None }
    }

    /// A context carrying `initiator` as the command's source.
    #[must_use]
    pub fn with_initiator(initiator: O) -> Self {
        Self {
            initiator: Some(initiator),
        }
    }

    /// Returns the initiator, if any.
    #[must_use]
    pub fn initiator(&self) -> Option<&O> {
        self.initiator.as_ref()
    }

    /// Returns the initiator, or [`CommandContextError`] if this context is
    /// anonymous.
    ///
    /// # Errors
    ///
    /// Returns [`CommandContextError`] if no initiator was supplied.
    pub fn require_initiator(&self, command_name: &'static str) -> Result<&O, CommandContextError> {
        self.initiator
            .as_ref()
            .ok_or(CommandContextError { command_name })
    }
}

impl<O> Default for Context<O> {
    fn default() -> Self {
        Self::anonymous()
    }
}

/// A synchronous command handler: given the aggregate's current state (or
/// `None` for a not-yet-created aggregate), a command and a [`Context`],
/// decides which events to record.
///
/// Blanket-implemented for any `Fn` of this shape, so a plain function is
/// already a [`Handler`]. Returning an empty vector is a legal no-op
/// ("already in the desired state"): callers must branch on
/// `events.is_empty()` before calling [`Repository::save`].
pub trait Handler<Cmd, O = ()> {
    /// The aggregate this handler decides events for.
    type Aggregate: Aggregate;
    /// Error returned when the command cannot be handled.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Decides which events, if any, `command` should produce.
    fn handle(
        &self,
        state: Option<&Self::Aggregate>,
        command: Cmd,
        context: &Context<O>,
    ) -> Result<Vec<<Self::Aggregate as Aggregate>::Event>, Self::Error>;
}

impl<A, Cmd, O, Err, F> Handler<Cmd, O> for F
where
    A: Aggregate,
    Err: std::error::Error + Send + Sync + 'static,
    F: Fn(Option<&A>, Cmd, &Context<O>) -> Result<Vec<A::Event>, Err>,
{
    type Aggregate = A;
    type Error = Err;

    fn handle(
        &self,
        state: Option<&A>,
        command: Cmd,
        context: &Context<O>,
    ) -> Result<Vec<A::Event>, Err> {
        self(state, command, context)
    }
}

/// A command handler that itself needs to perform asynchronous work (e.g. a
/// uniqueness check against another aggregate) before deciding which events
/// to record.
#[async_trait]
pub trait AsyncHandler<Cmd, O = ()>: Send + Sync {
    /// The aggregate this handler decides events for.
    type Aggregate: Aggregate;
    /// Error returned when the command cannot be handled.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Decides which events, if any, `command` should produce.
    async fn handle(
        &self,
        state: Option<&Self::Aggregate>,
        command: Cmd,
        context: &Context<O>,
    ) -> Result<Vec<<Self::Aggregate as Aggregate>::Event>, Self::Error>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inmemory::InMemoryEventStore;

    #[derive(Debug, Clone, PartialEq, Eq)]
    enum CounterEvent {
        Created,
        Incremented,
    }

    #[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
    enum CounterError {
        #[error("counter already created")]
        AlreadyCreated,
        #[error("counter must be created before it can be incremented")]
        NotCreated,
    }

    #[derive(Debug, Clone, PartialEq, Eq)]
    struct Counter {
        value: u32,
    }

    impl Aggregate for Counter {
        type Id = StreamId;
        type Event = CounterEvent;
        type Error = CounterError;

        fn apply(state: Option<Self>, event: Self::Event) -> Result<Self, Self::Error> {
            match (state, event) {
                (None, CounterEvent::Created) => Ok(Counter { value: 0 }),
                (None, CounterEvent::Incremented) => Err(CounterError::NotCreated),
                (Some(_), CounterEvent::Created) => Err(CounterError::AlreadyCreated),
                (Some(counter), CounterEvent::Incremented) => Ok(Counter {
                    value: counter.value + 1,
                }),
            }
        }
    }

    fn create(
        state: Option<&Counter>,
        (): (),
        _ctx: &Context,
    ) -> Result<Vec<CounterEvent>, CommandContextError> {
        if state.is_some() {
            return Ok(vec![]);
        }

        Ok(vec![CounterEvent::Created])
    }

    #[tokio::test]
    async fn load_on_empty_stream_yields_no_state() {
        let store = InMemoryEventStore::<CounterEvent>::new();
        let repo: Repository<Counter, _> = Repository::new(store);

        let root = repo.load(&StreamId::new("counter-1").unwrap()).await.unwrap();

        assert!(root.state().is_none());
        assert_eq!(root.next_event_number(), EventNumber::START);
    }

    #[tokio::test]
    async fn record_and_save_roundtrips_through_load() {
        let store = InMemoryEventStore::<CounterEvent>::new();
        let repo: Repository<Counter, _> = Repository::new(store);

        let id = StreamId::new("counter-1").unwrap();
        let mut root = repo.load(&id).await.unwrap();

        let events = Handler::handle(&create, root.state(), (), &Context::anonymous()).unwrap();
        assert!(!events.is_empty());
        for event in events {
            root.record(event).unwrap();
        }

        repo.save(&mut root).await.unwrap();

        let reloaded = repo.load(&id).await.unwrap();
        assert_eq!(reloaded.state(), Some(&Counter { value: 0 }));
        assert_eq!(reloaded.next_event_number(), EventNumber::new(1));
    }

    #[tokio::test]
    async fn save_with_no_buffered_events_is_a_noop() {
        let store = InMemoryEventStore::<CounterEvent>::new();
        let repo: Repository<Counter, _> = Repository::new(store);

        let mut root = repo.load(&StreamId::new("counter-1").unwrap()).await.unwrap();
        let position = repo.save(&mut root).await.unwrap();

        assert_eq!(position.event_number(), EventNumber::START);
    }
}
