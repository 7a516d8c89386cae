//! Tagged failure variants emitted by the engine, together with recovery
//! hints where the distinction matters to callers.

use crate::stream::{EventNumber, StreamId};

/// The operation that was being performed when a [`StoreError`] occurred.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    /// An [`crate::store::EventStore::append`] call.
    Append,
    /// An [`crate::store::EventStore::read`] call.
    Read,
    /// An [`crate::store::EventStore::subscribe`] call.
    Subscribe,
}

impl std::fmt::Display for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Operation::Append => "append",
            Operation::Read => "read",
            Operation::Subscribe => "subscribe",
        };

        f.write_str(name)
    }
}

/// A stream's end advanced since the caller took its expected version; this
/// is the only recoverable, benign error the engine emits. Callers are
/// expected to reload and retry.
#[derive(Debug, Clone, thiserror::Error)]
#[error("concurrency conflict on stream `{stream_id}`: expected version {expected}, actual {actual}")]
pub struct ConcurrencyConflict {
    /// The stream the conflicting append targeted.
    pub stream_id: StreamId,
    /// The version the caller expected the stream to be at.
    pub expected: EventNumber,
    /// The stream's actual current version.
    pub actual: EventNumber,
}

/// Operational failure raised by a backend while serving `append`, `read` or
/// `subscribe`.
#[derive(Debug, thiserror::Error)]
#[error("store error during {operation}{}: {details}", stream_id.as_ref().map(|s| format!(" on stream `{s}`")).unwrap_or_default())]
pub struct StoreError {
    /// Which operation failed.
    pub operation: Operation,
    /// The stream involved, if the failure is stream-scoped.
    pub stream_id: Option<StreamId>,
    /// Human-readable detail for logs.
    pub details: String,
    /// Underlying cause, if any.
    #[source]
    pub source: Option<anyhow::Error>,
}

impl StoreError {
    /// Builds a [`StoreError`] with no further cause attached.
    #[must_use]
    pub fn new(operation: Operation, stream_id: Option<StreamId>, details: impl Into<String>) -> Self {
        Self {
            operation,
            stream_id,
            details: details.into(),
            source: None,
        }
    }

    /// Attaches a causing error to this [`StoreError`].
    #[must_use]
    pub fn with_source(mut self, source: impl Into<anyhow::Error>) -> Self {
        self.source = Some(source.into());
        self
    }
}

/// A sub-kind of [`StoreError`] specific to networked backends, carrying
/// whether the failure is worth retrying.
#[derive(Debug, thiserror::Error)]
#[error("connection error during {operation}: {source}")]
pub struct ConnectionError {
    /// Which operation failed.
    pub operation: Operation,
    /// Underlying transport-level cause.
    #[source]
    pub source: anyhow::Error,
    /// Whether retrying the same operation might succeed.
    pub retryable: bool,
}

/// Backend resource exhaustion (e.g. connection pool, file descriptors,
/// subscriber buffer slots).
#[derive(Debug, thiserror::Error)]
#[error("resource error on {resource} during {operation}: {source}")]
pub struct ResourceError {
    /// Name of the exhausted resource.
    pub resource: String,
    /// Which operation triggered the exhaustion.
    pub operation: Operation,
    /// Underlying cause.
    #[source]
    pub source: anyhow::Error,
}

/// Codec encode/decode failure. From the engine's perspective this is
/// always stream-fatal: a subscription that hits a [`ParseError`] ends
/// rather than skipping the offending event.
#[derive(Debug, thiserror::Error)]
#[error("parse error: {details}")]
pub struct ParseError {
    /// Human-readable detail.
    pub details: String,
    /// Underlying cause, if any.
    #[source]
    pub source: Option<anyhow::Error>,
}

impl ParseError {
    /// Builds a [`ParseError`] with no further cause attached.
    #[must_use]
    pub fn new(details: impl Into<String>) -> Self {
        Self {
            details: details.into(),
            source: None,
        }
    }

    /// Attaches a causing error to this [`ParseError`].
    #[must_use]
    pub fn with_source(mut self, source: impl Into<anyhow::Error>) -> Self {
        self.source = Some(source.into());
        self
    }
}

/// The projection operation being performed when a [`ProjectionError`]
/// occurred.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProjectionOperation {
    /// First full build of a projection.
    Build,
    /// Rebuild from scratch.
    Rebuild,
    /// Incremental update from newly observed events.
    Update,
    /// A read-side query against the projection.
    Query,
}

impl std::fmt::Display for ProjectionOperation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ProjectionOperation::Build => "build",
            ProjectionOperation::Rebuild => "rebuild",
            ProjectionOperation::Update => "update",
            ProjectionOperation::Query => "query",
        };

        f.write_str(name)
    }
}

/// A projection's fold failed while applying a specific event.
#[derive(Debug, thiserror::Error)]
#[error("projection `{projection_name}` failed during {operation}: {source}")]
pub struct ProjectionError {
    /// Name of the projection that failed.
    pub projection_name: String,
    /// Which stage of the projection lifecycle failed.
    pub operation: ProjectionOperation,
    /// Position of the event being applied when the failure occurred, if any.
    pub event_position: Option<crate::stream::Position>,
    /// Underlying cause.
    #[source]
    pub source: anyhow::Error,
}

/// A key/version/blob snapshot store failure.
#[derive(Debug, thiserror::Error)]
#[error("snapshot error for key `{key}`: {source}")]
pub struct SnapshotError {
    /// Snapshot key.
    pub key: String,
    /// Underlying cause.
    #[source]
    pub source: anyhow::Error,
}

/// A snapshot was stored at a version older than the one already persisted.
#[derive(Debug, Clone, thiserror::Error)]
#[error("snapshot version error for key `{key}`: expected at least {expected}, found {actual}")]
pub struct SnapshotVersionError {
    /// Snapshot key.
    pub key: String,
    /// Minimum acceptable version.
    pub expected: EventNumber,
    /// Version actually found.
    pub actual: EventNumber,
}

/// A command handler required an ambient command initiator (the `origin` of
/// emitted metadata) that the caller did not supply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("command `{command_name}` requires a command initiator, none was supplied")]
pub struct CommandContextError {
    /// Name of the command that required an initiator.
    pub command_name: &'static str,
}
