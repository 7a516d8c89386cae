//! Identifiers for Event Streams, and the positions used to address
//! individual Events inside of them.
//!
//! An Event Stream is uniquely identified by a [`StreamId`], and every
//! Event committed to it is addressed by an [`EventNumber`], starting at 1.
//! A [`Position`] pairs the two together.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Error returned when constructing a [`StreamId`] from an empty string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("stream id must not be empty")]
pub struct EmptyStreamId;

/// Unique identifier of a single, totally-ordered Event Stream.
///
/// A `StreamId` is always a non-empty string; it is branded distinct from a
/// raw [`String`] so that callers cannot accidentally pass an unvalidated
/// value where a Stream identity is expected.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StreamId(String);

impl StreamId {
    /// Validates and wraps a raw string as a [`StreamId`].
    ///
    /// # Errors
    ///
    /// Returns [`EmptyStreamId`] if the provided value is empty.
    pub fn new(value: impl Into<String>) -> Result<Self, EmptyStreamId> {
        let value = value.into();

        if value.is_empty() {
            return Err(EmptyStreamId);
        }

        Ok(Self(value))
    }

    /// Returns the stream id as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for StreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for StreamId {
    type Error = EmptyStreamId;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl TryFrom<&str> for StreamId {
    type Error = EmptyStreamId;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

/// A non-negative offset into an Event Stream.
///
/// `0` denotes the position *before* the first Event. The first Event ever
/// appended to a Stream is assigned `EventNumber(1)`.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventNumber(u64);

impl EventNumber {
    /// The position before the first Event of a Stream.
    pub const START: EventNumber = EventNumber(0);

    /// Builds an [`EventNumber`] from a raw, non-negative integer.
    #[must_use]
    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    /// Returns the raw integer value of this [`EventNumber`].
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }

    /// Returns the next [`EventNumber`] in sequence.
    #[must_use]
    pub fn next(self) -> Self {
        Self(self.0 + 1)
    }
}

impl fmt::Display for EventNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

impl From<u64> for EventNumber {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

/// A cursor into an Event Stream: the pair of the Stream it refers to, and
/// the [`EventNumber`] within that Stream.
///
/// Two [`Position`]s are only meaningfully comparable when they share the
/// same [`StreamId`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Position {
    stream_id: StreamId,
    event_number: EventNumber,
}

impl Position {
    /// Builds a new [`Position`] pointing at `event_number` within `stream_id`.
    #[must_use]
    pub fn new(stream_id: StreamId, event_number: EventNumber) -> Self {
        Self {
            stream_id,
            event_number,
        }
    }

    /// The position before the first Event of `stream_id`.
    #[must_use]
    pub fn beginning(stream_id: StreamId) -> Self {
        Self::new(stream_id, EventNumber::START)
    }

    /// Builds a [`Position`] from a raw event number. Infallible for `u64`,
    /// kept for symmetry with decode-style constructors elsewhere in the
    /// crate.
    #[must_use]
    pub fn from_event_number(stream_id: StreamId, n: u64) -> Self {
        Self::new(stream_id, EventNumber::new(n))
    }

    /// Returns the [`StreamId`] this position refers to.
    #[must_use]
    pub fn stream_id(&self) -> &StreamId {
        &self.stream_id
    }

    /// Returns the [`EventNumber`] of this position.
    #[must_use]
    pub fn event_number(&self) -> EventNumber {
        self.event_number
    }

    /// Returns a new [`Position`] on the same stream, at `event_number`.
    #[must_use]
    pub fn with_event_number(&self, event_number: EventNumber) -> Self {
        Self::new(self.stream_id.clone(), event_number)
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.stream_id, self.event_number)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stream_id_rejects_empty_strings() {
        assert_eq!(StreamId::new(""), Err(EmptyStreamId));
        assert!(StreamId::new("orders-1").is_ok());
    }

    #[test]
    fn beginning_is_event_number_zero() {
        let stream_id = StreamId::new("orders-1").unwrap();
        let position = Position::beginning(stream_id.clone());

        assert_eq!(position.stream_id(), &stream_id);
        assert_eq!(position.event_number(), EventNumber::START);
    }

    #[test]
    fn event_number_next_increments_by_one() {
        assert_eq!(EventNumber::new(0).next(), EventNumber::new(1));
        assert_eq!(EventNumber::new(41).next(), EventNumber::new(42));
    }

    #[test]
    fn from_event_number_matches_new() {
        let stream_id = StreamId::new("orders-1").unwrap();
        let position = Position::from_event_number(stream_id.clone(), 5);

        assert_eq!(position, Position::new(stream_id, EventNumber::new(5)));
    }
}
