//! Test tooling: a generic conformance suite any [`crate::store::EventStore`]
//! backend can run against itself, and a Given/When/Then [`Scenario`] DSL
//! for aggregate command handlers.
//!
//! The contract suite and the `Scenario` builder below are meant to be
//! reusable the same way across any backend or aggregate.

use std::fmt::Debug;

use futures::{StreamExt, TryStreamExt};

use crate::aggregate::{Aggregate, Context, Handler, Repository};
use crate::inmemory::InMemoryEventStore;
use crate::store::EventStore;
use crate::stream::{EventNumber, Position, StreamId};

/// Behavioural conformance tests every [`EventStore`] backend is expected
/// to pass.
///
/// Each property is a standalone `async fn` so a backend crate can wire
/// them up as its own `#[tokio::test]` functions, supplying a fresh store
/// per test:
///
/// ```ignore
/// #[tokio::test]
/// async fn read_round_trip() {
///     eventually::testing::contract::p1_read_round_trip(MyStore::new()).await;
/// }
/// ```
pub mod contract {
    use super::*;

    fn stream(name: &str) -> StreamId {
        StreamId::new(name).unwrap()
    }

    /// P1: a read from the beginning returns exactly what was appended, in
    /// order.
    pub async fn p1_read_round_trip<S: EventStore<Event = u64>>(store: S) {
        let id = stream("p1");

        store
            .append(Position::beginning(id.clone()), vec![1, 2, 3])
            .await
            .expect("append should succeed");

        let read: Vec<_> = store
            .read(Position::beginning(id))
            .try_collect()
            .await
            .expect("read should succeed");

        let values: Vec<_> = read.iter().map(|e| *e.event()).collect();
        assert_eq!(values, vec![1, 2, 3]);
    }

    /// P2: a read from a nonzero position returns only the events after it.
    pub async fn p2_partial_read<S: EventStore<Event = u64>>(store: S) {
        let id = stream("p2");

        store
            .append(Position::beginning(id.clone()), vec![1, 2, 3, 4])
            .await
            .unwrap();

        let read: Vec<_> = store
            .read(Position::new(id, EventNumber::new(2)))
            .try_collect()
            .await
            .unwrap();

        let values: Vec<_> = read.iter().map(|e| *e.event()).collect();
        assert_eq!(values, vec![3, 4]);
    }

    /// P3: event numbers assigned by successive appends are contiguous and
    /// increasing.
    pub async fn p3_append_monotonicity<S: EventStore<Event = u64>>(store: S) {
        let id = stream("p3");

        let after_first = store
            .append(Position::beginning(id.clone()), vec![1, 2])
            .await
            .unwrap();
        assert_eq!(after_first.event_number(), EventNumber::new(2));

        let after_second = store.append(after_first, vec![3]).await.unwrap();
        assert_eq!(after_second.event_number(), EventNumber::new(3));
    }

    /// P4: an append with a stale expected version fails with a
    /// concurrency conflict and leaves the store unchanged.
    pub async fn p4_optimistic_concurrency<S: EventStore<Event = u64>>(store: S) {
        let id = stream("p4");

        store
            .append(Position::beginning(id.clone()), vec![1])
            .await
            .unwrap();

        let err = store
            .append(Position::beginning(id.clone()), vec![2])
            .await
            .expect_err("stale append should be rejected");

        let conflict = err.as_conflict().expect("error should be a concurrency conflict");
        assert_eq!(conflict.expected, EventNumber::new(0));
        assert_eq!(conflict.actual, EventNumber::new(1));

        let read: Vec<_> = store
            .read(Position::beginning(id))
            .try_collect()
            .await
            .unwrap();
        assert_eq!(read.len(), 1, "rejected append must not be partially visible");
    }

    /// P5: appending at an expected version ahead of the stream's actual
    /// end (including on a brand-new, empty stream) is also a conflict.
    pub async fn p5_wrong_end_on_empty<S: EventStore<Event = u64>>(store: S) {
        let id = stream("p5");

        let err = store
            .append(Position::new(id, EventNumber::new(1)), vec![1])
            .await
            .expect_err("append past the end of an empty stream should be rejected");

        assert!(err.as_conflict().is_some());
    }

    /// P6: reading a stream that was never appended to returns an empty
    /// stream rather than an error.
    pub async fn p6_nonexistent_read<S: EventStore<Event = u64>>(store: S) {
        let read: Vec<_> = store
            .read(Position::beginning(stream("p6-never-written")))
            .try_collect()
            .await
            .unwrap();

        assert!(read.is_empty());
    }

    /// P7: a subscription emits exactly the historical read, then
    /// continues with live appends, without gaps or duplicates.
    pub async fn p7_subscribe_is_history_then_live<S: EventStore<Event = u64>>(store: S) {
        let id = stream("p7");

        store
            .append(Position::beginning(id.clone()), vec![1, 2])
            .await
            .unwrap();

        let mut subscription = store.subscribe(Position::beginning(id.clone())).await.unwrap();

        let first = subscription.next().await.unwrap().unwrap();
        let second = subscription.next().await.unwrap().unwrap();
        assert_eq!((*first.event(), *second.event()), (1, 2));

        store
            .append(Position::new(id, EventNumber::new(2)), vec![3])
            .await
            .unwrap();

        let third = subscription.next().await.unwrap().unwrap();
        assert_eq!(*third.event(), 3);
    }

    /// P8: two independent subscribers on the same stream observe the same
    /// sequence.
    pub async fn p8_multi_subscriber_parity<S: EventStore<Event = u64>>(store: S) {
        let id = stream("p8");

        store
            .append(Position::beginning(id.clone()), vec![1])
            .await
            .unwrap();

        let mut subscriber_a = store.subscribe(Position::beginning(id.clone())).await.unwrap();
        let mut subscriber_b = store.subscribe(Position::beginning(id.clone())).await.unwrap();

        store
            .append(Position::new(id, EventNumber::new(1)), vec![2])
            .await
            .unwrap();

        for subscriber in [&mut subscriber_a, &mut subscriber_b] {
            let first = subscriber.next().await.unwrap().unwrap();
            let second = subscriber.next().await.unwrap().unwrap();
            assert_eq!((*first.event(), *second.event()), (1, 2));
        }
    }

    /// P9: once `append` returns, a subsequent `read` on the same store
    /// handle observes the write (no stale-read window).
    pub async fn p9_read_after_write_visibility<S: EventStore<Event = u64>>(store: S) {
        let id = stream("p9");

        store
            .append(Position::beginning(id.clone()), vec![1])
            .await
            .unwrap();

        let read: Vec<_> = store
            .read(Position::beginning(id))
            .try_collect()
            .await
            .unwrap();

        assert_eq!(read.len(), 1);
    }

    /// P10: round-tripping events through a [`crate::codec::Schema`] is
    /// transparent to ordering and content.
    pub async fn p10_codec_transparency<S, C>(store: crate::codec::EncodedEventStore<S, C, u64>)
    where
        S: EventStore,
        C: crate::codec::Schema<u64, S::Event> + 'static,
    {
        let id = stream("p10");

        store
            .append(Position::beginning(id.clone()), vec![10, 20, 30])
            .await
            .unwrap();

        let read: Vec<_> = store
            .read(Position::beginning(id))
            .try_collect()
            .await
            .unwrap();

        let values: Vec<_> = read.iter().map(|e| *e.event()).collect();
        assert_eq!(values, vec![10, 20, 30]);
    }

    /// P11: for backends with a shared external store, two handles
    /// constructed independently (or cloned, for the in-memory reference
    /// backend) observe each other's writes. Gated behind `shared_backend`
    /// since it does not apply to backend instances that share nothing.
    pub async fn p11_cross_instance_propagation<S>(store_a: S, store_b: S, shared_backend: bool)
    where
        S: EventStore<Event = u64>,
    {
        if !shared_backend {
            return;
        }

        let id = stream("p11");

        store_a
            .append(Position::beginning(id.clone()), vec![1])
            .await
            .unwrap();

        let read: Vec<_> = store_b
            .read(Position::beginning(id))
            .try_collect()
            .await
            .unwrap();

        assert_eq!(read.len(), 1, "the second handle should observe the first's write");
    }
}

/// Given/When/Then scenario builder for [`Handler`] implementations.
///
/// `given` seeds an [`InMemoryEventStore`] with raw historical facts
/// (bypassing [`Aggregate::apply`] validation, since history is assumed
/// already valid); `when` names the command under test; `then`/`then_fails`
/// assert on the events the handler decides to record.
pub struct Scenario<A: Aggregate> {
    id: A::Id,
}

impl<A: Aggregate> Scenario<A> {
    /// Starts a scenario for the aggregate instance identified by `id`.
    pub fn for_id(id: A::Id) -> Self {
        Self { id }
    }

    /// Seeds the aggregate's history with `events` before the command runs.
    pub fn given(self, events: Vec<A::Event>) -> ScenarioGiven<A> {
        ScenarioGiven {
            id: self.id,
            given: events,
        }
    }

    /// Skips seeding: the command runs against a brand-new aggregate.
    pub fn when<Cmd>(self, command: Cmd) -> ScenarioWhen<A, Cmd> {
        ScenarioWhen {
            id: self.id,
            given: Vec::new(),
            when: command,
        }
    }
}

/// A [`Scenario`] with its `given` history fixed.
pub struct ScenarioGiven<A: Aggregate> {
    id: A::Id,
    given: Vec<A::Event>,
}

impl<A: Aggregate> ScenarioGiven<A> {
    /// Names the command under test.
    pub fn when<Cmd>(self, command: Cmd) -> ScenarioWhen<A, Cmd> {
        ScenarioWhen {
            id: self.id,
            given: self.given,
            when: command,
        }
    }
}

/// A [`Scenario`] with its `given` history and `when` command fixed.
pub struct ScenarioWhen<A: Aggregate, Cmd> {
    id: A::Id,
    given: Vec<A::Event>,
    when: Cmd,
}

impl<A: Aggregate, Cmd> ScenarioWhen<A, Cmd> {
    /// Asserts the handler records exactly `events`, in order.
    pub fn then(self, events: Vec<A::Event>) -> ScenarioThen<A, Cmd> {
        ScenarioThen {
            id: self.id,
            given: self.given,
            when: self.when,
            expect: Expectation::Produces(events),
        }
    }

    /// Asserts the handler rejects the command.
    pub fn then_fails(self) -> ScenarioThen<A, Cmd> {
        ScenarioThen {
            id: self.id,
            given: self.given,
            when: self.when,
            expect: Expectation::Fails,
        }
    }
}

enum Expectation<E> {
    Produces(Vec<E>),
    Fails,
}

/// A fully-specified [`Scenario`], ready for [`ScenarioThen::assert_on`].
pub struct ScenarioThen<A: Aggregate, Cmd> {
    id: A::Id,
    given: Vec<A::Event>,
    when: Cmd,
    expect: Expectation<A::Event>,
}

impl<A, Cmd> ScenarioThen<A, Cmd>
where
    A: Aggregate + 'static,
    A::Id: Clone + Into<StreamId>,
    A::Event: Clone + PartialEq + Debug + 'static,
{
    /// Runs the scenario against `handler`: seeds the given history into a
    /// fresh [`InMemoryEventStore`], rehydrates the aggregate through a
    /// [`Repository`], invokes `handler` with the resulting state, and
    /// checks the outcome against the scenario's expectation.
    pub async fn assert_on<H>(self, handler: H)
    where
        H: Handler<Cmd, Aggregate = A>,
    {
        let store = InMemoryEventStore::<A::Event>::new();

        if !self.given.is_empty() {
            let stream_id: StreamId = self.id.clone().into();
            store
                .append(Position::beginning(stream_id), self.given)
                .await
                .expect("seeding 'given' history should not fail");
        }

        let repository: Repository<A, _> = Repository::new(store);
        let root = repository
            .load(&self.id)
            .await
            .expect("rehydrating the 'given' history should not fail");

        let result = handler.handle(root.state(), self.when, &Context::anonymous());

        match self.expect {
            Expectation::Produces(expected) => {
                let events = result.map_err(|e| format!("{e}")).expect("command should have succeeded");
                assert_eq!(events, expected);
            }
            Expectation::Fails => {
                assert!(result.is_err(), "command should have failed but produced events");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CommandContextError;

    #[derive(Debug, Clone, PartialEq, Eq)]
    enum TodoEvent {
        Added { title: String },
        Completed,
    }

    #[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
    enum TodoError {
        #[error("todo already added")]
        AlreadyAdded,
        #[error("todo must be added before it can be completed")]
        NotAdded,
    }

    #[derive(Debug, Clone, PartialEq, Eq)]
    struct Todo {
        title: String,
        completed: bool,
    }

    impl Aggregate for Todo {
        type Id = StreamId;
        type Event = TodoEvent;
        type Error = TodoError;

        fn apply(state: Option<Self>, event: Self::Event) -> Result<Self, Self::Error> {
            match (state, event) {
                (None, TodoEvent::Added { title }) => Ok(Todo { title, completed: false }),
                (None, TodoEvent::Completed) => Err(TodoError::NotAdded),
                (Some(_), TodoEvent::Added { .. }) => Err(TodoError::AlreadyAdded),
                (Some(todo), TodoEvent::Completed) => Ok(Todo { completed: true, ..todo }),
            }
        }
    }

    enum TodoCommand {
        Add { title: String },
        Complete,
    }

    fn handle(
        state: Option<&Todo>,
        command: TodoCommand,
        _ctx: &Context,
    ) -> Result<Vec<TodoEvent>, CommandContextError> {
        match command {
            TodoCommand::Add { title } if state.is_none() => Ok(vec![TodoEvent::Added { title }]),
            TodoCommand::Add { .. } => Ok(vec![]),
            TodoCommand::Complete if state.is_some_and(|t| !t.completed) => {
                Ok(vec![TodoEvent::Completed])
            }
            TodoCommand::Complete => Ok(vec![]),
        }
    }

    #[tokio::test]
    async fn adding_a_new_todo_records_one_event() {
        Scenario::<Todo>::for_id(StreamId::new("todo-1").unwrap())
            .when(TodoCommand::Add {
                title: "write tests".to_string(),
            })
            .then(vec![TodoEvent::Added {
                title: "write tests".to_string(),
            }])
            .assert_on(handle)
            .await;
    }

    #[tokio::test]
    async fn completing_an_already_completed_todo_is_a_noop() {
        Scenario::<Todo>::for_id(StreamId::new("todo-1").unwrap())
            .given(vec![
                TodoEvent::Added {
                    title: "write tests".to_string(),
                },
                TodoEvent::Completed,
            ])
            .when(TodoCommand::Complete)
            .then(vec![])
            .assert_on(handle)
            .await;
    }
}
