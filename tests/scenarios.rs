//! End-to-end scenarios against a minimal todo-list domain, exercising the
//! store, aggregate and subscription machinery together.

use std::time::Duration;

use eventually::aggregate::{Context, Handler, Repository};
use eventually::error::CommandContextError;
use eventually::inmemory::InMemoryEventStore;
use eventually::store::EventStore;
use eventually::stream::{EventNumber, Position, StreamId};
use eventually::Aggregate;
use futures::{StreamExt, TryStreamExt};

#[derive(Debug, Clone, PartialEq, Eq)]
enum TodoEvent {
    Created { title: String },
    Completed,
}

#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
enum TodoError {
    #[error("todo already created")]
    AlreadyCreated,
    #[error("todo must be created before it can be completed")]
    NotCreated,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Todo {
    title: String,
    completed: bool,
    deleted: bool,
}

impl Aggregate for Todo {
    type Id = StreamId;
    type Event = TodoEvent;
    type Error = TodoError;

    fn apply(state: Option<Self>, event: Self::Event) -> Result<Self, Self::Error> {
        match (state, event) {
            (None, TodoEvent::Created { title }) => Ok(Todo {
                title,
                completed: false,
                deleted: false,
            }),
            (None, TodoEvent::Completed) => Err(TodoError::NotCreated),
            (Some(_), TodoEvent::Created { .. }) => Err(TodoError::AlreadyCreated),
            (Some(todo), TodoEvent::Completed) => Ok(Todo {
                completed: true,
                ..todo
            }),
        }
    }
}

fn complete(
    state: Option<&Todo>,
    (): (),
    _ctx: &Context,
) -> Result<Vec<TodoEvent>, CommandContextError> {
    match state {
        Some(todo) if !todo.completed => Ok(vec![TodoEvent::Completed]),
        _ => Ok(vec![]),
    }
}

#[tokio::test]
async fn empty_append_is_a_noop() {
    let store = InMemoryEventStore::<TodoEvent>::new();
    let id = StreamId::new("a").unwrap();

    let end = store
        .append(Position::beginning(id.clone()), vec![])
        .await
        .unwrap();

    assert_eq!(end.event_number(), EventNumber::START);

    let read: Vec<_> = store
        .read(Position::beginning(id))
        .try_collect()
        .await
        .unwrap();

    assert!(read.is_empty());
}

#[tokio::test]
async fn create_then_complete() {
    let store = InMemoryEventStore::<TodoEvent>::new();
    let repository: Repository<Todo, _> = Repository::new(store);
    let id = StreamId::new("t1").unwrap();

    let mut root = repository.load(&id).await.unwrap();
    root.record(TodoEvent::Created {
        title: "buy milk".to_string(),
    })
    .unwrap();

    let position = repository.save(&mut root).await.unwrap();
    assert_eq!(position.event_number(), EventNumber::new(1));
    assert_eq!(
        root.state(),
        Some(&Todo {
            title: "buy milk".to_string(),
            completed: false,
            deleted: false,
        })
    );

    let events = Handler::handle(&complete, root.state(), (), &Context::anonymous()).unwrap();
    for event in events {
        root.record(event).unwrap();
    }

    let position = repository.save(&mut root).await.unwrap();
    assert_eq!(position.event_number(), EventNumber::new(2));

    let reloaded = repository.load(&id).await.unwrap();
    assert!(reloaded.state().unwrap().completed);
}

#[tokio::test]
async fn conflict_retry() {
    let store = InMemoryEventStore::<TodoEvent>::new();
    let id = StreamId::new("t1").unwrap();

    store
        .append(
            Position::beginning(id.clone()),
            vec![TodoEvent::Created {
                title: "buy milk".to_string(),
            }],
        )
        .await
        .unwrap();

    let both_loaded_at = Position::new(id.clone(), EventNumber::new(1));
    let first = store.append(both_loaded_at.clone(), vec![TodoEvent::Completed]).await;
    let second = store.append(both_loaded_at, vec![TodoEvent::Completed]).await;

    let (winner, loser) = match (first, second) {
        (Ok(position), Err(error)) => (position, error),
        (Err(error), Ok(position)) => (position, error),
        other => panic!("expected exactly one writer to win the race, got {other:?}"),
    };

    assert_eq!(winner.event_number(), EventNumber::new(2));
    let conflict = loser.as_conflict().expect("loser should see a concurrency conflict");
    assert_eq!(conflict.expected, EventNumber::new(1));
    assert_eq!(conflict.actual, EventNumber::new(2));

    let retried = store
        .append(Position::new(id, EventNumber::new(2)), vec![TodoEvent::Completed])
        .await
        .unwrap();
    assert_eq!(retried.event_number(), EventNumber::new(3));
}

#[tokio::test]
async fn idempotent_complete_is_a_noop() {
    let store = InMemoryEventStore::<TodoEvent>::new();
    let repository: Repository<Todo, _> = Repository::new(store);
    let id = StreamId::new("t1").unwrap();

    let mut root = repository.load(&id).await.unwrap();
    root.record(TodoEvent::Created {
        title: "buy milk".to_string(),
    })
    .unwrap();
    root.record(TodoEvent::Completed).unwrap();
    repository.save(&mut root).await.unwrap();

    let events = Handler::handle(&complete, root.state(), (), &Context::anonymous()).unwrap();
    assert!(events.is_empty(), "completing an already-completed todo must be a no-op");

    // The caller observes the empty batch and skips committing it; saving
    // an untouched root is itself also a legal no-op.
    let position = repository.save(&mut root).await.unwrap();
    assert_eq!(position.event_number(), EventNumber::new(2));
}

#[tokio::test]
async fn subscribe_bridges_history_and_live_without_duplicating_the_boundary() {
    let store = InMemoryEventStore::<TodoEvent>::new();
    let id = StreamId::new("t2").unwrap();

    store
        .append(
            Position::beginning(id.clone()),
            vec![TodoEvent::Created {
                title: "e1".to_string(),
            }],
        )
        .await
        .unwrap();

    let mut subscription = store.subscribe(Position::beginning(id.clone())).await.unwrap();

    store
        .append(
            Position::new(id, EventNumber::new(1)),
            vec![TodoEvent::Completed, TodoEvent::Completed],
        )
        .await
        .unwrap();

    let mut observed = Vec::new();
    for _ in 0..3 {
        let event = subscription
            .next()
            .await
            .expect("subscription should not end early")
            .expect("subscription should not fail");
        observed.push(event.event_number());
    }

    assert_eq!(
        observed,
        vec![EventNumber::new(1), EventNumber::new(2), EventNumber::new(3)]
    );
}

#[tokio::test]
async fn multiple_subscribers_one_slow_never_reorders() {
    const TOTAL: usize = 1000;

    let store = InMemoryEventStore::<TodoEvent>::with_channel_capacity(50);
    let id = StreamId::new("t3").unwrap();

    let mut fast = store.subscribe(Position::beginning(id.clone())).await.unwrap();
    let mut slow = store.subscribe(Position::beginning(id.clone())).await.unwrap();

    let writer_store = store.clone();
    let writer_id = id.clone();
    let writer = tokio::spawn(async move {
        // One append per event, with a yield after each: this gives the
        // subscriber tasks a chance to drain the channel between writes
        // instead of racing a single 1000-event batch to completion first.
        let mut at = EventNumber::START;
        for _ in 0..TOTAL {
            let to = Position::new(writer_id.clone(), at);
            at = writer_store
                .append(to, vec![TodoEvent::Completed])
                .await
                .unwrap()
                .event_number();
            tokio::task::yield_now().await;
        }
    });

    let fast_handle = tokio::spawn(async move {
        let mut numbers = Vec::with_capacity(TOTAL);
        while numbers.len() < TOTAL {
            match fast.next().await {
                Some(Ok(event)) => numbers.push(event.event_number()),
                Some(Err(_)) => break,
                None => break,
            }
        }
        numbers
    });

    writer.await.unwrap();
    let fast_numbers = fast_handle.await.unwrap();

    assert_eq!(fast_numbers.len(), TOTAL, "the fast subscriber must see every event");
    for (index, number) in fast_numbers.iter().enumerate() {
        assert_eq!(number.get(), (index + 1) as u64);
    }

    let mut slow_numbers = Vec::new();
    let mut slow_lagged = false;
    loop {
        // Deliberately slower than the writer, so the bounded channel
        // overflows before this subscriber catches up.
        tokio::time::sleep(Duration::from_micros(200)).await;

        match tokio::time::timeout(Duration::from_millis(200), slow.next()).await {
            Ok(Some(Ok(event))) => slow_numbers.push(event.event_number()),
            Ok(Some(Err(_))) => {
                slow_lagged = true;
                break;
            }
            Ok(None) | Err(_) => break,
        }

        if slow_numbers.len() == TOTAL {
            break;
        }
    }

    for pair in slow_numbers.windows(2) {
        assert!(pair[0] < pair[1], "the slow subscriber must never reorder events");
    }
    assert!(
        slow_lagged || slow_numbers.len() == TOTAL,
        "the slow subscriber must either keep up or observe a lag error, never silently drop events"
    );
}
