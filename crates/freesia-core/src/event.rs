//! Event capabilities consumed by the dispatcher.
//!
//! Any `'static + Send + Sync` value can be published once it implements
//! [`Event`]. The only capability the bus inspects is cancellation: an event
//! that exposes a [`Cancellable`] view stops dispatch as soon as a handler
//! marks it cancelled.

use std::any::Any;
use std::sync::atomic::{AtomicBool, Ordering};

/// A value that can be published on an [`EventBus`](crate::EventBus).
///
/// Handlers are matched against the concrete type of the event, so two
/// distinct structs are always two distinct event types even when one wraps
/// the other.
pub trait Event: Any + Send + Sync {
    /// The cancellation view of this event, if it has one.
    ///
    /// The dispatcher reads this before every handler. It never sets it.
    fn as_cancellable(&self) -> Option<&dyn Cancellable> {
        None
    }
}

/// Mutable "is this delivery terminated" capability.
pub trait Cancellable: Send + Sync {
    fn is_cancelled(&self) -> bool;
}

/// Atomic cancellation flag to embed in cancellable events.
///
/// Handlers only ever see `&E`, so cancellation works through interior
/// mutability.
///
/// ```rust
/// use freesia_core::{CancelFlag, Cancellable, Event};
///
/// #[derive(Default)]
/// struct ToolCalled {
///     cancelled: CancelFlag,
/// }
///
/// impl Event for ToolCalled {
///     fn as_cancellable(&self) -> Option<&dyn Cancellable> {
///         Some(&self.cancelled)
///     }
/// }
/// ```
#[derive(Debug, Default)]
pub struct CancelFlag {
    cancelled: AtomicBool,
}

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark the delivery as terminated.
    pub fn cancel(&self) {
        self.set_cancelled(true);
    }

    /// Set or clear the flag. Clearing only affects handlers not yet reached.
    pub fn set_cancelled(&self, cancelled: bool) {
        self.cancelled.store(cancelled, Ordering::SeqCst);
    }
}

impl Cancellable for CancelFlag {
    fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

impl Clone for CancelFlag {
    fn clone(&self) -> Self {
        let flag = Self::new();
        flag.set_cancelled(self.is_cancelled());
        flag
    }
}

/// Whether `event` is currently cancelled. Non-cancellable events never are.
pub(crate) fn is_cancelled<E: Event + ?Sized>(event: &E) -> bool {
    event
        .as_cancellable()
        .is_some_and(|cancellable| cancellable.is_cancelled())
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Plain;
    impl Event for Plain {}

    #[derive(Default)]
    struct Stoppable {
        flag: CancelFlag,
    }

    impl Event for Stoppable {
        fn as_cancellable(&self) -> Option<&dyn Cancellable> {
            Some(&self.flag)
        }
    }

    #[test]
    fn test_plain_event_is_never_cancelled() {
        assert!(Plain.as_cancellable().is_none());
        assert!(!is_cancelled(&Plain));
    }

    #[test]
    fn test_cancel_flag_toggles() {
        let event = Stoppable::default();
        assert!(!is_cancelled(&event));

        event.flag.cancel();
        assert!(is_cancelled(&event));

        event.flag.set_cancelled(false);
        assert!(!is_cancelled(&event));
    }

    #[test]
    fn test_cancel_flag_clone_copies_state() {
        let flag = CancelFlag::new();
        flag.cancel();
        let copy = flag.clone();
        assert!(copy.is_cancelled());

        copy.set_cancelled(false);
        assert!(flag.is_cancelled());
    }
}
