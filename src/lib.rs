//! An event-sourcing storage and subscription engine: append-only streams
//! with optimistic concurrency, a history-then-live subscription model,
//! aggregate roots, projections and a process-local event bus.
//!
//! Start with [`store::EventStore`] for the core contract,
//! [`inmemory::InMemoryEventStore`] for the reference backend, and
//! [`aggregate::Repository`] for the load-command-commit loop built on top
//! of it.

pub mod aggregate;
pub mod bus;
pub mod codec;
pub mod config;
pub mod error;
pub mod inmemory;
pub mod projection;
pub mod store;
pub mod stream;
pub mod testing;
pub mod tracing_support;

pub use aggregate::{Aggregate, AggregateRoot, AggregateState, Context, Repository};
pub use error::{
    CommandContextError, ConcurrencyConflict, ConnectionError, ParseError, ProjectionError,
    ResourceError, SnapshotError, SnapshotVersionError, StoreError,
};
pub use projection::{Projection, ProjectionState};
pub use store::{EventRecord, EventStore, PersistedEvent, ProjectionEventStore, Subscription};
pub use stream::{EventNumber, Position, StreamId};
