//! Decouples the engine from any one wire format.
//!
//! A [`Schema`] is a bijection (encode infallible in intent, decode
//! fallible) between a consumer's event type `E` and whatever form `I` a
//! backend actually stores (bytes, a JSON `Value`, a typed record). Wrapping
//! any [`EventStore<Event = I>`](crate::store::EventStore) in an
//! [`EncodedEventStore`] produces a store of `E`.

use std::marker::PhantomData;
use std::sync::Arc;

use async_trait::async_trait;
use futures::StreamExt;

use crate::error::ParseError;
use crate::store::{AppendError, EventStore, EventStream, PersistedEvent, StreamError, Subscription};
use crate::stream::Position;

/// Converts between a consumer event type `E` and a backend's stored
/// representation `I`.
pub trait Schema<E, I>: Send + Sync {
    /// Encodes `event` into its stored representation.
    ///
    /// # Errors
    ///
    /// Returns a [`ParseError`] if `event` cannot be represented in `I`.
    fn encode(&self, event: &E) -> Result<I, ParseError>;

    /// Decodes a stored representation back into `E`.
    ///
    /// # Errors
    ///
    /// Returns a [`ParseError`] if `record` is not a valid encoding.
    fn decode(&self, record: I) -> Result<E, ParseError>;
}

/// Wraps a store of `I` into a store of `E`, via `schema`.
#[must_use]
pub fn encoded_event_store<S, C, E>(inner: S, schema: C) -> EncodedEventStore<S, C, E>
where
    S: EventStore,
    C: Schema<E, S::Event>,
    E: Send + Sync,
{
    EncodedEventStore {
        inner,
        schema: Arc::new(schema),
        _event: PhantomData,
    }
}

/// An [`EventStore`] of `E`, backed by a store of `I` and a [`Schema<E, I>`].
pub struct EncodedEventStore<S, C, E> {
    inner: S,
    schema: Arc<C>,
    _event: PhantomData<fn() -> E>,
}

impl<S, C, E> EncodedEventStore<S, C, E> {
    /// Returns a reference to the wrapped store.
    pub fn inner(&self) -> &S {
        &self.inner
    }
}

fn decode_persisted<C, E, I>(
    schema: &C,
    persisted: PersistedEvent<I>,
) -> Result<PersistedEvent<E>, StreamError>
where
    C: Schema<E, I>,
{
    let stream_id = persisted.stream_id().clone();
    let event_number = persisted.event_number();
    let event = schema.decode(persisted.into_event())?;

    Ok(PersistedEvent::new(stream_id, event_number, event))
}

#[async_trait]
impl<S, C, E> EventStore for EncodedEventStore<S, C, E>
where
    S: EventStore,
    C: Schema<E, S::Event> + 'static,
    E: Send + Sync + 'static,
{
    type Event = E;

    async fn append(
        &self,
        to: Position,
        events: Vec<Self::Event>,
    ) -> Result<Position, AppendError> {
        let encoded = events
            .iter()
            .map(|event| self.schema.encode(event))
            .collect::<Result<Vec<_>, _>>()?;

        self.inner.append(to, encoded).await
    }

    fn read(&self, from: Position) -> EventStream<'_, Self::Event> {
        let schema = Arc::clone(&self.schema);
        let inner = self.inner.read(from);

        inner
            .map(move |item| {
                let persisted = item?;
                decode_persisted(schema.as_ref(), persisted)
            })
            .boxed()
    }

    async fn subscribe(
        &self,
        from: Position,
    ) -> Result<Subscription<'static, Self::Event>, crate::error::StoreError> {
        let schema = Arc::clone(&self.schema);
        let inner = self.inner.subscribe(from).await?;

        let decoded = inner
            .map(move |item| {
                let persisted = item?;
                decode_persisted(schema.as_ref(), persisted)
            })
            .boxed();

        Ok(Subscription::without_cleanup(decoded))
    }
}

#[cfg(feature = "serde-json")]
pub mod json {
    //! A [`Schema`] implementation backed by `serde_json`.

    use serde::de::DeserializeOwned;
    use serde::Serialize;

    use super::Schema;
    use crate::error::ParseError;

    /// Encodes events as [`serde_json::Value`], the typical "generic record"
    /// a document-oriented or text-column backend stores.
    #[derive(Debug, Default, Clone, Copy)]
    pub struct JsonSchema;

    impl<E> Schema<E, serde_json::Value> for JsonSchema
    where
        E: Serialize + DeserializeOwned + Send + Sync,
    {
        fn encode(&self, event: &E) -> Result<serde_json::Value, ParseError> {
            serde_json::to_value(event)
                .map_err(|e| ParseError::new("failed to encode event as JSON").with_source(e))
        }

        fn decode(&self, record: serde_json::Value) -> Result<E, ParseError> {
            serde_json::from_value(record)
                .map_err(|e| ParseError::new("failed to decode event from JSON").with_source(e))
        }
    }
}
