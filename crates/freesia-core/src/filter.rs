//! Per-handler predicates gating invocation.
//!
//! Filters are attached through [`HandlerConfig::filter`](crate::HandlerConfig::filter)
//! and are evaluated on the publishing thread, in declaration order, on every
//! dispatch attempt. The first filter that rejects skips the handler; it does
//! not stop delivery to the rest of the bucket.

use crate::event::Event;
use crate::handler::HandlerDescriptor;
use std::any::Any;
use std::marker::PhantomData;
use std::sync::Arc;

/// Predicate over a handler and the event about to be delivered to it.
pub trait EventFilter<E>: Send + Sync {
    fn test(&self, handler: &HandlerDescriptor, event: &E) -> bool;
}

impl<E, F> EventFilter<E> for Arc<F>
where
    F: EventFilter<E> + ?Sized,
{
    fn test(&self, handler: &HandlerDescriptor, event: &E) -> bool {
        (**self).test(handler, event)
    }
}

/// Closure adapter created by [`filter_fn`].
pub struct FilterFn<F> {
    predicate: F,
}

/// Turn a closure into an [`EventFilter`].
///
/// ```rust
/// use freesia_core::{filter_fn, HandlerConfig};
///
/// struct Ping(u32);
/// impl freesia_core::Event for Ping {}
///
/// let config = HandlerConfig::<Ping>::new().filter(filter_fn(|_, ping: &Ping| ping.0 > 3));
/// assert_eq!(config.filter_count(), 1);
/// ```
pub fn filter_fn<E, F>(predicate: F) -> FilterFn<F>
where
    F: Fn(&HandlerDescriptor, &E) -> bool + Send + Sync,
{
    FilterFn { predicate }
}

impl<E, F> EventFilter<E> for FilterFn<F>
where
    F: Fn(&HandlerDescriptor, &E) -> bool + Send + Sync,
{
    fn test(&self, handler: &HandlerDescriptor, event: &E) -> bool {
        (self.predicate)(handler, event)
    }
}

/// Type-erased filter stored on a descriptor.
pub(crate) trait ErasedFilter: Send + Sync {
    fn test_erased(&self, handler: &HandlerDescriptor, event: &dyn Any) -> bool;
}

pub(crate) type SharedFilter = Arc<dyn ErasedFilter>;

struct TypedFilter<E, F> {
    filter: F,
    _event: PhantomData<fn(&E)>,
}

impl<E, F> ErasedFilter for TypedFilter<E, F>
where
    E: Event,
    F: EventFilter<E>,
{
    fn test_erased(&self, handler: &HandlerDescriptor, event: &dyn Any) -> bool {
        // A foreign event type never reaches a typed bucket; reject rather than guess.
        event
            .downcast_ref::<E>()
            .is_some_and(|event| self.filter.test(handler, event))
    }
}

pub(crate) fn erase<E, F>(filter: F) -> SharedFilter
where
    E: Event,
    F: EventFilter<E> + 'static,
{
    Arc::new(TypedFilter {
        filter,
        _event: PhantomData,
    })
}

/// Evaluate a filter chain in order. An empty chain always passes.
pub(crate) fn passes(filters: &[SharedFilter], handler: &HandlerDescriptor, event: &dyn Any) -> bool {
    filters
        .iter()
        .all(|filter| filter.test_erased(handler, event))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::{HandlerConfig, HandlerDescriptor};
    use crate::registry::ListenerId;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    struct Tick(u32);
    impl Event for Tick {}

    struct Tock;
    impl Event for Tock {}

    fn descriptor() -> HandlerDescriptor {
        HandlerDescriptor::new(
            ListenerId::from_raw(1),
            "tick_handler",
            HandlerConfig::<Tick>::new(),
            |_: &Tick| {},
        )
    }

    struct Toggle {
        allow: AtomicBool,
        calls: AtomicUsize,
    }

    impl EventFilter<Tick> for Toggle {
        fn test(&self, _handler: &HandlerDescriptor, _event: &Tick) -> bool {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.allow.load(Ordering::SeqCst)
        }
    }

    #[test]
    fn test_empty_chain_passes() {
        assert!(passes(&[], &descriptor(), &Tick(0)));
    }

    #[test]
    fn test_first_rejection_short_circuits() {
        let toggle = Arc::new(Toggle {
            allow: AtomicBool::new(true),
            calls: AtomicUsize::new(0),
        });
        let chain = vec![
            erase::<Tick, _>(filter_fn(|_, tick: &Tick| tick.0 > 5)),
            erase::<Tick, _>(Arc::clone(&toggle)),
        ];
        let handler = descriptor();

        assert!(!passes(&chain, &handler, &Tick(1)));
        assert_eq!(toggle.calls.load(Ordering::SeqCst), 0);

        assert!(passes(&chain, &handler, &Tick(10)));
        assert_eq!(toggle.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_filters_are_evaluated_fresh() {
        let toggle = Arc::new(Toggle {
            allow: AtomicBool::new(false),
            calls: AtomicUsize::new(0),
        });
        let chain = vec![erase::<Tick, _>(Arc::clone(&toggle))];
        let handler = descriptor();

        assert!(!passes(&chain, &handler, &Tick(0)));
        toggle.allow.store(true, Ordering::SeqCst);
        assert!(passes(&chain, &handler, &Tick(0)));
        assert_eq!(toggle.calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_foreign_event_type_is_rejected() {
        let chain = vec![erase::<Tick, _>(filter_fn(|_, _: &Tick| true))];
        assert!(!passes(&chain, &descriptor(), &Tock));
    }

    #[test]
    fn test_filter_sees_handler_metadata() {
        let chain = vec![erase::<Tick, _>(filter_fn(|handler: &HandlerDescriptor, _: &Tick| {
            handler.name() == "tick_handler"
        }))];
        assert!(passes(&chain, &descriptor(), &Tick(0)));
    }
}
