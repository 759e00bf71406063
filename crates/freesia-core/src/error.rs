//! Error types for registration, dispatch and handler invocation.

use crate::handler::ExecutionMode;
use thiserror::Error;

/// Result alias for bus operations.
pub type BusResult<T> = Result<T, BusError>;

/// Structural and contract errors reported synchronously to the caller.
#[derive(Error, Debug)]
pub enum BusError {
    #[error("listener `{listener}` is already registered")]
    AlreadyRegistered { listener: &'static str },

    #[error("listener `{listener}` declares no handlers")]
    NoHandlers { listener: &'static str },

    #[error("listener `{listener}` is not registered")]
    UnknownListener { listener: &'static str },

    #[error("cannot post an absent `{event_type}` event")]
    InvalidEvent { event_type: &'static str },

    #[error(transparent)]
    Bind(#[from] BindError),

    #[error("failed to start the async handler pool: {0}")]
    WorkerPool(#[source] std::io::Error),
}

/// A handler table could not be turned into bound descriptors.
///
/// Raised while registering; the registration is abandoned as a whole.
#[derive(Error, Debug)]
pub enum BindError {
    #[error("listener `{listener}` failed to declare its handlers: {source}")]
    Declaration {
        listener: &'static str,
        #[source]
        source: anyhow::Error,
    },

    #[error("handler `{handler}` is bound to a receiver other than listener `{listener}`")]
    ForeignReceiver {
        handler: &'static str,
        listener: &'static str,
    },
}

impl BindError {
    pub fn declaration(listener: &'static str, source: impl Into<anyhow::Error>) -> Self {
        Self::Declaration {
            listener,
            source: source.into(),
        }
    }
}

/// Failure raised by a single handler invocation.
#[derive(Error, Debug)]
pub enum HandlerError {
    #[error("{0:#}")]
    Failed(anyhow::Error),

    #[error("handler panicked: {0}")]
    Panicked(String),

    #[error("filter panicked: {0}")]
    FilterPanicked(String),

    #[error("handler for `{expected}` received a different event type")]
    EventTypeMismatch { expected: &'static str },

    #[error("async handler could not be scheduled: {0}")]
    NotScheduled(String),
}

impl HandlerError {
    /// Build a `Panicked` error from a `catch_unwind` payload.
    pub(crate) fn from_panic(payload: Box<dyn std::any::Any + Send>) -> Self {
        Self::Panicked(panic_message(payload.as_ref()))
    }

    pub(crate) fn from_filter_panic(payload: Box<dyn std::any::Any + Send>) -> Self {
        Self::FilterPanicked(panic_message(payload.as_ref()))
    }
}

/// Text of a `catch_unwind` payload.
pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&'static str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

/// Report of a handler failure, as handed to the failure hook.
#[derive(Debug)]
pub struct HandlerFailure {
    pub handler: &'static str,
    pub event_type: &'static str,
    pub mode: ExecutionMode,
    pub error: HandlerError,
}
