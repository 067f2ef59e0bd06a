use std::error::Error;
use std::time::Duration;

use thiserror::Error;
use uuid::Uuid;

/// Errors raised by a unit of work or outbox store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store lock poisoned during {0}")]
    LockPoisoned(&'static str),
    #[error("record serialization failed for table {table}: {reason}")]
    Serialization { table: &'static str, reason: String },
    #[error("outbox message {0} not found")]
    MessageNotFound(Uuid),
    #[error("commit failed: {0}")]
    CommitFailed(String),
}

/// Payload encode/decode failures.
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("json codec: {0}")]
    Json(#[from] serde_json::Error),
    #[error("bitcode codec: {0}")]
    Bitcode(String),
}

impl From<bitcode::Error> for CodecError {
    fn from(err: bitcode::Error) -> Self {
        CodecError::Bitcode(err.to_string())
    }
}

/// Errors from the `event_type` registry.
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("no schema registered for event type {0}")]
    Unresolved(String),
    #[error("event type {0} registered twice")]
    Duplicate(&'static str),
    #[error("{event_type} could not be encoded: {source}")]
    Encode {
        event_type: &'static str,
        #[source]
        source: CodecError,
    },
    #[error("payload for {event_type} could not be decoded: {source}")]
    Decode {
        event_type: String,
        #[source]
        source: CodecError,
    },
}

/// Error returned by a broker when a publish is not acknowledged.
#[derive(Debug, Error)]
pub enum PublishError {
    #[error("broker unreachable: {0}")]
    Unreachable(String),
    #[error("message rejected: {0}")]
    Rejected(String),
    #[error("publish timed out after {0:?}")]
    Timeout(Duration),
    #[error("publish error: {0}")]
    Other(Box<dyn Error + Send + Sync>),
}

/// Error type returned by handlers.
#[derive(Debug, Error)]
pub enum HandlerError {
    /// Business logic rejected the message (validation, invariant violation).
    #[error("rejected: {0}")]
    Rejected(String),
    /// Aggregate or resource not found.
    #[error("not found: {0}")]
    NotFound(String),
    /// Input could not be interpreted.
    #[error("decode failed: {0}")]
    DecodeFailed(String),
    /// The handler needs a transaction but none is attached to its context.
    #[error("no transaction attached to the handler context")]
    NoTransaction,
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Codec(#[from] CodecError),
    /// A nested dispatch or notify failed.
    #[error(transparent)]
    Dispatch(Box<DispatchError>),
    #[error("handler error: {0}")]
    Other(Box<dyn Error + Send + Sync>),
}

impl From<DispatchError> for HandlerError {
    fn from(err: DispatchError) -> Self {
        HandlerError::Dispatch(Box::new(err))
    }
}

/// Errors surfaced to callers of the dispatcher.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("no handler registered for {message_type}")]
    HandlerNotFound { message_type: &'static str },
    #[error("handler for {message_type} failed: {source}")]
    Handler {
        message_type: &'static str,
        #[source]
        source: HandlerError,
    },
    #[error("{message_type} did not complete within {after:?}")]
    Timeout {
        message_type: &'static str,
        after: Duration,
    },
    #[error("handler for {message_type} returned an unexpected reply type")]
    ReplyType { message_type: &'static str },
    #[error("handler for {expected} received a {actual}")]
    MessageType {
        expected: &'static str,
        actual: &'static str,
    },
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Registry(#[from] RegistryError),
    #[error(transparent)]
    Codec(#[from] CodecError),
}

impl DispatchError {
    /// The handler error behind this dispatch failure, if any.
    pub fn handler_error(&self) -> Option<&HandlerError> {
        match self {
            DispatchError::Handler { source, .. } => Some(source),
            _ => None,
        }
    }
}

/// Startup configuration problems, reported by builders.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{0} already has a handler")]
    DuplicateHandler(&'static str),
    #[error("{message_type} passes through the outbox but is missing from the type registry")]
    Unregistered { message_type: &'static str },
    #[error(transparent)]
    Registry(#[from] RegistryError),
    #[error("invalid value {value:?} for {key}")]
    InvalidValue { key: &'static str, value: String },
}

/// Errors that abort a whole relay cycle.
#[derive(Debug, Error)]
pub enum RelayError {
    #[error(transparent)]
    Store(#[from] StoreError),
}
