//! Handler discovery.
//!
//! The bus does not care how a container's handlers are found, only that a
//! [`HandlerScanner`] can turn the container into a [`HandlerMap`] of bound
//! descriptors. The default [`DeclaredScanner`] asks the container itself:
//! every [`Listener`] fills a [`HandlerSet`] with its handler table.
//!
//! ```rust
//! use freesia_core::{BindError, HandlerConfig, HandlerSet, Listener};
//! use std::sync::Arc;
//!
//! struct Saved;
//! impl freesia_core::Event for Saved {}
//!
//! struct Audit;
//!
//! impl Audit {
//!     fn on_saved(&self, _event: &Saved) {}
//! }
//!
//! impl Listener for Audit {
//!     fn declare(self: Arc<Self>, handlers: &mut HandlerSet) -> Result<(), BindError> {
//!         handlers.bind(&self, HandlerConfig::new().priority(100), Self::on_saved)?;
//!         handlers.on(HandlerConfig::new().run_async(), |_: &Saved| {
//!             // receiver-less handler
//!         });
//!         Ok(())
//!     }
//! }
//! ```

use crate::error::BindError;
use crate::event::Event;
use crate::handler::{HandlerConfig, HandlerDescriptor, HandlerOutcome};
use crate::registry::ListenerId;
use std::any::TypeId;
use std::collections::HashMap;
use std::sync::Arc;

/// A listener container.
///
/// Registration identity is the `Arc` allocation, not the value.
pub trait Listener: Send + Sync + 'static {
    /// Declare this container's handlers.
    ///
    /// Called once per registration attempt. An `Err` aborts the registration
    /// without touching the bus.
    fn declare(self: Arc<Self>, handlers: &mut HandlerSet) -> Result<(), BindError>;

    /// Name used in logs and errors.
    fn listener_name(&self) -> &'static str {
        std::any::type_name::<Self>()
    }
}

/// Event type → descriptors, in declaration order.
#[derive(Debug, Default)]
pub struct HandlerMap {
    by_type: HashMap<TypeId, Vec<Arc<HandlerDescriptor>>>,
}

impl HandlerMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, descriptor: HandlerDescriptor) {
        self.by_type
            .entry(descriptor.event_type())
            .or_default()
            .push(Arc::new(descriptor));
    }

    pub fn is_empty(&self) -> bool {
        self.by_type.values().all(Vec::is_empty)
    }

    /// Number of event types with at least one handler.
    pub fn event_type_count(&self) -> usize {
        self.by_type.values().filter(|handlers| !handlers.is_empty()).count()
    }

    pub fn handler_count(&self) -> usize {
        self.by_type.values().map(Vec::len).sum()
    }

    pub fn get(&self, event_type: TypeId) -> &[Arc<HandlerDescriptor>] {
        self.by_type.get(&event_type).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn iter(&self) -> impl Iterator<Item = (TypeId, &[Arc<HandlerDescriptor>])> {
        self.by_type
            .iter()
            .filter(|(_, handlers)| !handlers.is_empty())
            .map(|(event_type, handlers)| (*event_type, handlers.as_slice()))
    }

    pub fn descriptors(&self) -> impl Iterator<Item = &Arc<HandlerDescriptor>> {
        self.by_type.values().flatten()
    }
}

/// Builder a [`Listener`] fills while declaring its handlers.
pub struct HandlerSet {
    owner: ListenerId,
    listener: &'static str,
    map: HandlerMap,
}

impl HandlerSet {
    pub fn for_container<L: Listener + ?Sized>(container: &Arc<L>) -> Self {
        Self {
            owner: ListenerId::of(container),
            listener: container.listener_name(),
            map: HandlerMap::new(),
        }
    }

    /// Bind `method` to `receiver` for events of type `E`.
    ///
    /// `receiver` must be the container being registered; binding a method to
    /// any other allocation is rejected so that `unregister` can undo exactly
    /// what `register` did.
    pub fn bind<L, E, F, R>(
        &mut self,
        receiver: &Arc<L>,
        config: HandlerConfig<E>,
        method: F,
    ) -> Result<(), BindError>
    where
        L: Send + Sync + 'static,
        E: Event,
        F: Fn(&L, &E) -> R + Send + Sync + 'static,
        R: HandlerOutcome,
    {
        let name = std::any::type_name::<F>();
        if ListenerId::of(receiver) != self.owner {
            return Err(BindError::ForeignReceiver {
                handler: name,
                listener: self.listener,
            });
        }

        let receiver = Arc::clone(receiver);
        self.map.push(HandlerDescriptor::new(
            self.owner,
            name,
            config,
            move |event: &E| method(receiver.as_ref(), event),
        ));
        Ok(())
    }

    /// Add a handler that does not capture the receiver.
    pub fn on<E, F, R>(&mut self, config: HandlerConfig<E>, handler: F) -> &mut Self
    where
        E: Event,
        F: Fn(&E) -> R + Send + Sync + 'static,
        R: HandlerOutcome,
    {
        let name = std::any::type_name::<F>();
        self.map
            .push(HandlerDescriptor::new(self.owner, name, config, handler));
        self
    }

    pub fn owner(&self) -> ListenerId {
        self.owner
    }

    pub fn len(&self) -> usize {
        self.map.handler_count()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    pub fn into_map(self) -> HandlerMap {
        self.map
    }
}

/// Produces the handler table of a container.
///
/// Must be deterministic per container and must not touch bus state.
pub trait HandlerScanner: Send + Sync {
    fn locate(&self, container: &Arc<dyn Listener>) -> Result<HandlerMap, BindError>;
}

impl<S> HandlerScanner for Arc<S>
where
    S: HandlerScanner + ?Sized,
{
    fn locate(&self, container: &Arc<dyn Listener>) -> Result<HandlerMap, BindError> {
        (**self).locate(container)
    }
}

/// Scanner that delegates to [`Listener::declare`].
#[derive(Debug, Default, Clone, Copy)]
pub struct DeclaredScanner;

impl HandlerScanner for DeclaredScanner {
    fn locate(&self, container: &Arc<dyn Listener>) -> Result<HandlerMap, BindError> {
        let mut handlers = HandlerSet::for_container(container);
        Arc::clone(container).declare(&mut handlers)?;
        Ok(handlers.into_map())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::ExecutionMode;

    struct Opened;
    impl Event for Opened {}

    struct Closed;
    impl Event for Closed {}

    struct Door;

    impl Door {
        fn on_opened(&self, _: &Opened) {}
        fn on_closed(&self, _: &Closed) {}
    }

    impl Listener for Door {
        fn declare(self: Arc<Self>, handlers: &mut HandlerSet) -> Result<(), BindError> {
            handlers.bind(&self, HandlerConfig::new().priority(5), Self::on_opened)?;
            handlers.bind(&self, HandlerConfig::new(), Self::on_closed)?;
            handlers.on(HandlerConfig::new().run_async(), |_: &Opened| {});
            Ok(())
        }
    }

    struct Impostor {
        other: Arc<Door>,
    }

    impl Listener for Impostor {
        fn declare(self: Arc<Self>, handlers: &mut HandlerSet) -> Result<(), BindError> {
            handlers.bind(&self.other, HandlerConfig::new(), Door::on_opened)
        }
    }

    #[test]
    fn test_declared_scanner_groups_by_event_type() {
        let door: Arc<dyn Listener> = Arc::new(Door);
        let map = DeclaredScanner.locate(&door).unwrap();

        assert_eq!(map.handler_count(), 3);
        assert_eq!(map.event_type_count(), 2);

        let opened = map.get(TypeId::of::<Opened>());
        assert_eq!(opened.len(), 2);
        assert_eq!(opened[0].priority(), 5);
        assert!(opened[0].name().ends_with("on_opened"));
        assert_eq!(opened[1].mode(), ExecutionMode::Async);
        assert!(map
            .descriptors()
            .all(|descriptor| descriptor.owner() == ListenerId::of(&door)));
    }

    #[test]
    fn test_handler_set_tracks_owner_and_size() {
        let door = Arc::new(Door);
        let mut handlers = HandlerSet::for_container(&door);
        assert_eq!(handlers.owner(), ListenerId::of(&door));
        assert!(handlers.is_empty());

        Arc::clone(&door).declare(&mut handlers).unwrap();
        assert_eq!(handlers.len(), 3);
        assert!(!handlers.is_empty());
    }

    #[test]
    fn test_bind_rejects_foreign_receiver() {
        let impostor: Arc<dyn Listener> = Arc::new(Impostor {
            other: Arc::new(Door),
        });
        let err = DeclaredScanner.locate(&impostor).unwrap_err();

        assert!(matches!(err, BindError::ForeignReceiver { .. }));
    }

    #[test]
    fn test_empty_map() {
        let map = HandlerMap::new();
        assert!(map.is_empty());
        assert_eq!(map.handler_count(), 0);
        assert!(map.get(TypeId::of::<Opened>()).is_empty());
        assert_eq!(map.iter().count(), 0);
    }

    #[test]
    fn test_listener_name_defaults_to_type_name() {
        assert!(Door.listener_name().ends_with("Door"));
    }
}
