//! Handler descriptors and the metadata attached to them.
//!
//! A [`HandlerDescriptor`] is the immutable record the bus keeps for one
//! discovered handler: the container that owns it, the event type it accepts,
//! its priority and execution mode, its filter chain, and a callable bound once
//! at registration time. Dispatch never re-resolves anything; invoking a
//! descriptor is a downcast plus a closure call.

use crate::error::HandlerError;
use crate::event::Event;
use crate::filter::{self, EventFilter, SharedFilter};
use crate::registry::ListenerId;
use std::any::{Any, TypeId};
use std::fmt;
use std::marker::PhantomData;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

/// Callable bound to its receiver and event type.
pub(crate) type Invoker = Arc<dyn Fn(&dyn Any) -> Result<(), HandlerError> + Send + Sync>;

/// Where a handler body runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ExecutionMode {
    /// Inline, on the thread calling `post`.
    #[default]
    Sync,
    /// On the shared worker pool; `post` does not wait for it.
    Async,
}

impl fmt::Display for ExecutionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Sync => write!(f, "sync"),
            Self::Async => write!(f, "async"),
        }
    }
}

/// What a handler body may return.
///
/// `()` always succeeds. `Result<(), E>` reports `Err` as a handler failure,
/// which is logged and isolated from sibling handlers.
pub trait HandlerOutcome {
    fn into_result(self) -> anyhow::Result<()>;
}

impl HandlerOutcome for () {
    fn into_result(self) -> anyhow::Result<()> {
        Ok(())
    }
}

impl<Err> HandlerOutcome for Result<(), Err>
where
    Err: Into<anyhow::Error>,
{
    fn into_result(self) -> anyhow::Result<()> {
        self.map_err(Into::into)
    }
}

/// Explicit metadata for one handler.
///
/// ```rust
/// use freesia_core::{ExecutionMode, HandlerConfig};
///
/// struct Saved;
/// impl freesia_core::Event for Saved {}
///
/// let config = HandlerConfig::<Saved>::new().priority(-100).run_async();
/// assert_eq!(config.priority_value(), -100);
/// assert_eq!(config.mode_value(), ExecutionMode::Async);
/// ```
pub struct HandlerConfig<E> {
    priority: i32,
    mode: ExecutionMode,
    filters: Vec<SharedFilter>,
    _event: PhantomData<fn(&E)>,
}

impl<E: Event> HandlerConfig<E> {
    /// Priority 0, synchronous, no filters.
    pub fn new() -> Self {
        Self {
            priority: 0,
            mode: ExecutionMode::Sync,
            filters: Vec::new(),
            _event: PhantomData,
        }
    }

    /// Higher priorities run first.
    pub fn priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn mode(mut self, mode: ExecutionMode) -> Self {
        self.mode = mode;
        self
    }

    /// Shorthand for `mode(ExecutionMode::Async)`.
    pub fn run_async(self) -> Self {
        self.mode(ExecutionMode::Async)
    }

    /// Append a filter. Filters run in the order they were added.
    pub fn filter<F>(mut self, filter: F) -> Self
    where
        F: EventFilter<E> + 'static,
    {
        self.filters.push(filter::erase::<E, F>(filter));
        self
    }

    pub fn priority_value(&self) -> i32 {
        self.priority
    }

    pub fn mode_value(&self) -> ExecutionMode {
        self.mode
    }

    pub fn filter_count(&self) -> usize {
        self.filters.len()
    }
}

impl<E: Event> Default for HandlerConfig<E> {
    fn default() -> Self {
        Self::new()
    }
}

/// Immutable record of a single registered handler.
pub struct HandlerDescriptor {
    owner: ListenerId,
    name: &'static str,
    event_type: TypeId,
    event_type_name: &'static str,
    priority: i32,
    mode: ExecutionMode,
    filters: Vec<SharedFilter>,
    invoke: Invoker,
}

impl HandlerDescriptor {
    /// Bind `handler` for events of type `E` on behalf of `owner`.
    ///
    /// The callable is erased here, once; later invocations only downcast.
    pub fn new<E, F, R>(
        owner: ListenerId,
        name: &'static str,
        config: HandlerConfig<E>,
        handler: F,
    ) -> Self
    where
        E: Event,
        F: Fn(&E) -> R + Send + Sync + 'static,
        R: HandlerOutcome,
    {
        let expected = std::any::type_name::<E>();
        let invoke: Invoker = Arc::new(move |event: &dyn Any| {
            let event = event
                .downcast_ref::<E>()
                .ok_or(HandlerError::EventTypeMismatch { expected })?;
            handler(event).into_result().map_err(HandlerError::Failed)
        });

        Self {
            owner,
            name,
            event_type: TypeId::of::<E>(),
            event_type_name: expected,
            priority: config.priority,
            mode: config.mode,
            filters: config.filters,
            invoke,
        }
    }

    pub fn owner(&self) -> ListenerId {
        self.owner
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn event_type(&self) -> TypeId {
        self.event_type
    }

    pub fn event_type_name(&self) -> &'static str {
        self.event_type_name
    }

    pub fn priority(&self) -> i32 {
        self.priority
    }

    pub fn mode(&self) -> ExecutionMode {
        self.mode
    }

    pub fn is_async(&self) -> bool {
        self.mode == ExecutionMode::Async
    }

    pub fn filter_count(&self) -> usize {
        self.filters.len()
    }

    /// Run the filter chain against `event`. A panicking filter is reported
    /// as an error and the handler is not invoked.
    pub(crate) fn accepts(&self, event: &dyn Any) -> Result<bool, HandlerError> {
        if self.filters.is_empty() {
            return Ok(true);
        }
        panic::catch_unwind(AssertUnwindSafe(|| filter::passes(&self.filters, self, event)))
            .map_err(HandlerError::from_filter_panic)
    }

    /// Invoke the bound callable, converting a panic into a `HandlerError`.
    pub(crate) fn invoke(&self, event: &dyn Any) -> Result<(), HandlerError> {
        panic::catch_unwind(AssertUnwindSafe(|| (self.invoke)(event)))
            .unwrap_or_else(|payload| Err(HandlerError::from_panic(payload)))
    }
}

impl fmt::Debug for HandlerDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerDescriptor")
            .field("owner", &self.owner)
            .field("name", &self.name)
            .field("event_type", &self.event_type_name)
            .field("priority", &self.priority)
            .field("mode", &self.mode)
            .field("filters", &self.filters.len())
            .finish()
    }
}
