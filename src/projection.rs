//! Read-side projections: pure folds over a stream's full history, built
//! the same way an [`crate::aggregate::AggregateRoot`] is rehydrated but
//! never committed back.
//!
//! A projection starts from a natural zero (`State: Default`) rather than
//! an `Option`, since there is no "not yet created" concept on the read
//! side.

use futures::StreamExt;

use crate::error::{ProjectionError, ProjectionOperation};
use crate::store::ProjectionEventStore;
use crate::stream::{EventNumber, Position, StreamId};

/// An infallible fold from a stream of domain events to a read model.
pub trait Projection: Send + Sync {
    /// Identifier type, mapped to a [`StreamId`] by [`load_projection`].
    type Id: Clone + Send + Sync;
    /// Domain event type folded by [`Projection::apply`].
    type Event: Send + Sync;
    /// The read model produced by this projection.
    type State: Default + Send + Sync;

    /// Folds `event` onto `state`, producing the next state.
    fn apply(state: Self::State, event: Self::Event) -> Self::State;
}

/// Snapshot returned by [`load_projection`]: the folded read model and the
/// event number it reflects.
#[derive(Debug, Clone)]
pub struct ProjectionState<S> {
    data: S,
    next_event_number: EventNumber,
}

impl<S> ProjectionState<S> {
    /// Returns the folded read model.
    #[must_use]
    pub fn data(&self) -> &S {
        &self.data
    }

    /// Unwraps the folded read model, discarding the event number.
    #[must_use]
    pub fn into_data(self) -> S {
        self.data
    }

    /// Returns the event number reflected by this snapshot.
    #[must_use]
    pub fn next_event_number(&self) -> EventNumber {
        self.next_event_number
    }
}

/// Rebuilds `P`'s projection for `id` by reading and folding its full
/// history from `store`.
///
/// `store` is narrowed to [`ProjectionEventStore`] — a projection never
/// appends or subscribes, only reads.
///
/// # Errors
///
/// Returns [`ProjectionError`] if the underlying read fails or a stored
/// event cannot be decoded.
pub async fn load_projection<P, S>(
    store: &S,
    id: &P::Id,
) -> Result<ProjectionState<P::State>, ProjectionError>
where
    P: Projection,
    P::Id: Into<StreamId>,
    S: ProjectionEventStore<Event = P::Event> + ?Sized,
{
    let stream_id: StreamId = id.clone().into();
    let mut events = store.read(Position::beginning(stream_id));

    let mut data = P::State::default();
    let mut next_event_number = EventNumber::START;

    while let Some(item) = events.next().await {
        let persisted = item.map_err(|source| ProjectionError {
            projection_name: std::any::type_name::<P>().to_string(),
            operation: ProjectionOperation::Build,
            event_position: None,
            source: source.into(),
        })?;

        next_event_number = persisted.event_number();
        data = P::apply(data, persisted.into_event());
    }

    Ok(ProjectionState {
        data,
        next_event_number,
    })
}
