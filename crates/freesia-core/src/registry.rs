//! Bookkeeping of which container contributed which handlers.
//!
//! The registry is what makes `unregister` exact: it remembers the very
//! descriptors a container added to the type index, so removal is a
//! set-difference by identity rather than a scan by owner.

use crate::scanner::{HandlerMap, Listener};
use dashmap::DashMap;
use std::fmt;
use std::sync::Arc;

/// Identity of a listener container: the address of its `Arc` allocation.
///
/// Clones of one `Arc` share an identity; equal values in separate
/// allocations do not. The registry holds a strong reference for as long as
/// the container is registered, so an identity cannot be reused while it is
/// still a key.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ListenerId(usize);

impl ListenerId {
    pub fn of<L: ?Sized>(container: &Arc<L>) -> Self {
        Self(Arc::as_ptr(container) as *const () as usize)
    }

    /// Build an identity from a raw value. Only meaningful for descriptors
    /// that are never registered through a container.
    pub fn from_raw(raw: usize) -> Self {
        Self(raw)
    }
}

impl fmt::Debug for ListenerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ListenerId({:#x})", self.0)
    }
}

/// One container's contribution.
pub(crate) struct Registration {
    /// Keeps the container allocation (and therefore its identity) alive.
    _container: Arc<dyn Listener>,
    pub(crate) type_name: &'static str,
    pub(crate) handlers: HandlerMap,
}

impl Registration {
    pub(crate) fn new(container: Arc<dyn Listener>, type_name: &'static str, handlers: HandlerMap) -> Self {
        Self {
            _container: container,
            type_name,
            handlers,
        }
    }
}

/// Container identity → contributed handlers.
#[derive(Default)]
pub(crate) struct Registry {
    entries: DashMap<ListenerId, Registration>,
}

impl Registry {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn contains(&self, id: ListenerId) -> bool {
        self.entries.contains_key(&id)
    }

    /// Insert a registration. Returns `false` and leaves the existing entry
    /// untouched if `id` is already present.
    pub(crate) fn insert(&self, id: ListenerId, registration: Registration) -> bool {
        match self.entries.entry(id) {
            dashmap::mapref::entry::Entry::Occupied(_) => false,
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(registration);
                true
            }
        }
    }

    /// Run `f` against the registration for `id`, if any.
    pub(crate) fn with<R>(&self, id: ListenerId, f: impl FnOnce(&Registration) -> R) -> Option<R> {
        self.entries.get(&id).map(|entry| f(entry.value()))
    }

    pub(crate) fn remove(&self, id: ListenerId) -> Option<Registration> {
        self.entries.remove(&id).map(|(_, registration)| registration)
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    /// Descriptors contributed by `id`, flattened.
    #[cfg(test)]
    pub(crate) fn descriptors_of(&self, id: ListenerId) -> Vec<Arc<crate::handler::HandlerDescriptor>> {
        self.entries
            .get(&id)
            .map(|entry| entry.handlers.descriptors().cloned().collect())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::BindError;
    use crate::event::Event;
    use crate::handler::HandlerConfig;
    use crate::scanner::HandlerSet;

    struct Ping;
    impl Event for Ping {}

    struct Pinger;

    impl Pinger {
        fn on_ping(&self, _: &Ping) {}
    }

    impl Listener for Pinger {
        fn declare(self: Arc<Self>, handlers: &mut HandlerSet) -> Result<(), BindError> {
            handlers.bind(&self, HandlerConfig::new(), Self::on_ping)
        }
    }

    fn registration_for(container: &Arc<Pinger>) -> Registration {
        let mut set = HandlerSet::for_container(container);
        Arc::clone(container).declare(&mut set).unwrap();
        Registration::new(container.clone(), "Pinger", set.into_map())
    }

    #[test]
    fn test_identity_follows_allocation() {
        let a = Arc::new(Pinger);
        let b = Arc::new(Pinger);

        assert_eq!(ListenerId::of(&a), ListenerId::of(&Arc::clone(&a)));
        assert_ne!(ListenerId::of(&a), ListenerId::of(&b));

        let erased: Arc<dyn Listener> = a.clone();
        assert_eq!(ListenerId::of(&a), ListenerId::of(&erased));
    }

    #[test]
    fn test_insert_is_at_most_once() {
        let registry = Registry::new();
        let container = Arc::new(Pinger);
        let id = ListenerId::of(&container);

        assert!(registry.insert(id, registration_for(&container)));
        assert!(!registry.insert(id, registration_for(&container)));
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.descriptors_of(id).len(), 1);
    }

    #[test]
    fn test_remove_returns_contribution() {
        let registry = Registry::new();
        let container = Arc::new(Pinger);
        let id = ListenerId::of(&container);
        registry.insert(id, registration_for(&container));

        let removed = registry.remove(id).unwrap();
        assert_eq!(removed.handlers.handler_count(), 1);
        assert!(!registry.contains(id));
        assert!(registry.remove(id).is_none());
    }
}
