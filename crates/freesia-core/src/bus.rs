//! The event bus: registration lifecycle and dispatch.
//!
//! ## Registration
//!
//! `register`/`unregister` are serialized by one lock. Registration resolves
//! the container's handler table through the [`HandlerScanner`], merges each
//! event type's descriptors into the type index, then records the
//! contribution in the registry. Nothing is mutated unless every handler bound.
//!
//! ## Dispatch
//!
//! `post` takes a snapshot of the bucket for the event's concrete type and
//! walks it in stored order (descending priority, ties by insertion):
//!
//! ```text
//! for each descriptor:
//!     cancelled?  -> stop
//!     filters?    -> skip descriptor
//!     sync        -> invoke inline, log failure, continue
//!     async       -> submit to worker pool, continue
//! ```
//!
//! Handler failures (returned errors and panics) are logged and reported to
//! the optional failure hook; they never reach the publisher and never stop
//! delivery to the remaining handlers.

use crate::config::BusConfig;
use crate::error::{panic_message, BusError, BusResult, HandlerError, HandlerFailure};
use crate::event::{self, Event};
use crate::handler::{ExecutionMode, HandlerDescriptor};
use crate::index::{Bucket, TypeIndex};
use crate::pool::WorkerPool;
use crate::registry::{ListenerId, Registration, Registry};
use crate::scanner::{DeclaredScanner, HandlerScanner, Listener};
use crate::BindError;
use parking_lot::Mutex;
use std::any::{Any, TypeId};
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use tokio::runtime::Handle;
use tracing::{debug, error, trace, warn};

/// Callback receiving every handler failure, sync or async.
pub type FailureHook = Arc<dyn Fn(&HandlerFailure) + Send + Sync>;

/// Read-only view of a registered handler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandlerInfo {
    pub owner: ListenerId,
    pub name: &'static str,
    pub event_type: &'static str,
    pub priority: i32,
    pub mode: ExecutionMode,
    pub filters: usize,
}

impl From<&HandlerDescriptor> for HandlerInfo {
    fn from(descriptor: &HandlerDescriptor) -> Self {
        Self {
            owner: descriptor.owner(),
            name: descriptor.name(),
            event_type: descriptor.event_type_name(),
            priority: descriptor.priority(),
            mode: descriptor.mode(),
            filters: descriptor.filter_count(),
        }
    }
}

/// In-process event bus.
///
/// `EventBus` is `Send + Sync`; share it behind an `Arc` to publish from many
/// threads. Must not be re-entered from [`Listener::declare`], which runs
/// under the registration lock.
pub struct EventBus {
    index: TypeIndex,
    registry: Registry,
    registration: Mutex<()>,
    scanner: Arc<dyn HandlerScanner>,
    pool: WorkerPool,
    failure_hook: Option<FailureHook>,
    config: BusConfig,
}

impl EventBus {
    pub fn new() -> Self {
        Self::with_config(BusConfig::default())
    }

    pub fn with_config(config: BusConfig) -> Self {
        Self {
            index: TypeIndex::new(),
            registry: Registry::new(),
            registration: Mutex::new(()),
            scanner: Arc::new(DeclaredScanner),
            pool: WorkerPool::owned(config.workers.clone()),
            failure_hook: None,
            config,
        }
    }

    /// Replace the default [`DeclaredScanner`].
    pub fn with_scanner(mut self, scanner: impl HandlerScanner + 'static) -> Self {
        self.scanner = Arc::new(scanner);
        self
    }

    /// Run async handlers on an existing tokio runtime instead of an owned one.
    pub fn with_runtime(mut self, handle: Handle) -> Self {
        self.pool = WorkerPool::shared(self.config.workers.clone(), handle);
        self
    }

    pub fn with_failure_hook<F>(mut self, hook: F) -> Self
    where
        F: Fn(&HandlerFailure) + Send + Sync + 'static,
    {
        self.failure_hook = Some(Arc::new(hook));
        self
    }

    pub fn config(&self) -> &BusConfig {
        &self.config
    }

    // ------------------------------------------------------------------
    // Registration
    // ------------------------------------------------------------------

    /// Register `container`. Returns `false` without side effects if it is
    /// already registered, declares no handlers, or fails to bind.
    pub fn register<L: Listener>(&self, container: &Arc<L>) -> bool {
        let erased: Arc<dyn Listener> = container.clone();
        match self.register_dyn(erased) {
            Ok(_) => true,
            Err(BusError::Bind(err)) => {
                error!(error = %err, "failed to bind listener handlers");
                false
            }
            Err(err) => {
                debug!(error = %err, "listener not registered");
                false
            }
        }
    }

    /// Register `container`, returning the number of handlers bound.
    pub fn try_register<L: Listener>(&self, container: &Arc<L>) -> BusResult<usize> {
        self.register_dyn(container.clone())
    }

    fn register_dyn(&self, container: Arc<dyn Listener>) -> BusResult<usize> {
        let id = ListenerId::of(&container);
        let listener = container.listener_name();
        let guard = self.registration.lock();

        if self.registry.contains(id) {
            return Err(BusError::AlreadyRegistered { listener });
        }

        let handlers = self.scanner.locate(&container)?;
        if handlers.is_empty() {
            return Err(BusError::NoHandlers { listener });
        }
        if let Some(foreign) = handlers.descriptors().find(|d| d.owner() != id) {
            return Err(BindError::ForeignReceiver {
                handler: foreign.name(),
                listener,
            }
            .into());
        }

        for (event_type, descriptors) in handlers.iter() {
            self.index.merge(&guard, event_type, descriptors);
        }

        let count = handlers.handler_count();
        let event_types = handlers.event_type_count();
        self.registry
            .insert(id, Registration::new(container, listener, handlers));

        debug!(listener, handlers = count, event_types, "registered listener");
        Ok(count)
    }

    /// Unregister `container`. Returns `false` if it was never registered.
    pub fn unregister<L: Listener>(&self, container: &Arc<L>) -> bool {
        self.try_unregister(container).is_ok()
    }

    /// Unregister `container`, returning the number of handlers removed.
    pub fn try_unregister<L: Listener>(&self, container: &Arc<L>) -> BusResult<usize> {
        self.unregister_id(ListenerId::of(container), container.listener_name())
    }

    fn unregister_id(&self, id: ListenerId, listener: &'static str) -> BusResult<usize> {
        let guard = self.registration.lock();

        let removed = self
            .registry
            .with(id, |registration| {
                registration
                    .handlers
                    .iter()
                    .map(|(event_type, descriptors)| {
                        self.index.remove(&guard, event_type, descriptors)
                    })
                    .sum::<usize>()
            })
            .ok_or(BusError::UnknownListener { listener })?;

        let registration = self.registry.remove(id);
        drop(guard);

        debug!(
            listener = registration.as_ref().map_or(listener, |r| r.type_name),
            handlers = removed,
            "unregistered listener"
        );
        Ok(removed)
    }

    pub fn is_registered<L: Listener>(&self, container: &Arc<L>) -> bool {
        self.registry.contains(ListenerId::of(container))
    }

    // ------------------------------------------------------------------
    // Dispatch
    // ------------------------------------------------------------------

    /// Deliver `event` to every matching handler and hand it back.
    ///
    /// Matching is by the concrete type `E` only. With no handlers for `E`
    /// this is a no-op.
    pub fn post<E: Event>(&self, event: Arc<E>) -> Arc<E> {
        if let Some(bucket) = self.index.snapshot(TypeId::of::<E>()) {
            self.dispatch(&bucket, &event);
        }
        event
    }

    /// Like [`post`](Self::post), for call sites where the event may be absent.
    ///
    /// An absent event is a contract violation and is rejected before any
    /// handler runs.
    pub fn try_post<E: Event>(&self, event: Option<Arc<E>>) -> BusResult<Arc<E>> {
        let event = event.ok_or(BusError::InvalidEvent {
            event_type: std::any::type_name::<E>(),
        })?;
        Ok(self.post(event))
    }

    fn dispatch<E: Event>(&self, bucket: &Bucket, event: &Arc<E>) {
        let payload: &dyn Any = &**event;

        for descriptor in bucket.iter() {
            if event::is_cancelled(&**event) {
                trace!(
                    event_type = descriptor.event_type_name(),
                    next = descriptor.name(),
                    "event cancelled, stopping dispatch"
                );
                break;
            }

            match descriptor.accepts(payload) {
                Ok(true) => {}
                Ok(false) => {
                    trace!(handler = descriptor.name(), "filtered out");
                    continue;
                }
                Err(error) => {
                    report_failure(self.failure_hook.as_ref(), descriptor, error);
                    continue;
                }
            }

            trace!(
                handler = descriptor.name(),
                priority = descriptor.priority(),
                mode = %descriptor.mode(),
                "dispatching"
            );
            match descriptor.mode() {
                ExecutionMode::Sync => {
                    if let Err(error) = descriptor.invoke(payload) {
                        report_failure(self.failure_hook.as_ref(), descriptor, error);
                    }
                }
                ExecutionMode::Async => self.submit(descriptor, event),
            }
        }
    }

    fn submit<E: Event>(&self, descriptor: &Arc<HandlerDescriptor>, event: &Arc<E>) {
        let pending = PendingJob {
            descriptor: Arc::clone(descriptor),
            hook: self.failure_hook.clone(),
            started: false,
        };
        let job_event = Arc::clone(event);

        let submitted = self.pool.submit(move || {
            let mut pending = pending;
            pending.started = true;
            if let Err(error) = pending.descriptor.invoke(&*job_event) {
                report_failure(pending.hook.as_ref(), &pending.descriptor, error);
            }
        });

        // The dropped job has already reported itself as not scheduled.
        if let Err(err) = submitted {
            error!(handler = descriptor.name(), error = %err, "async handler pool unavailable");
        }
    }

    // ------------------------------------------------------------------
    // Introspection
    // ------------------------------------------------------------------

    /// Number of handlers currently registered for events of type `E`.
    pub fn handler_count<E: Event>(&self) -> usize {
        self.index.handler_count(TypeId::of::<E>())
    }

    /// Handlers for `E`, in dispatch order.
    pub fn handlers_for<E: Event>(&self) -> Vec<HandlerInfo> {
        self.index
            .snapshot(TypeId::of::<E>())
            .map(|bucket| {
                bucket
                    .iter()
                    .map(|descriptor| HandlerInfo::from(descriptor.as_ref()))
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn listener_count(&self) -> usize {
        self.registry.len()
    }

    /// Number of event types with at least one handler.
    pub fn event_type_count(&self) -> usize {
        self.index.bucket_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBus")
            .field("listeners", &self.registry.len())
            .field("event_types", &self.index.bucket_count())
            .field("pool_started", &self.pool.is_started())
            .field("config", &self.config)
            .finish()
    }
}

/// An async invocation in flight. Dropped without running (pool failed to
/// start, runtime shut down) it reports `NotScheduled`.
struct PendingJob {
    descriptor: Arc<HandlerDescriptor>,
    hook: Option<FailureHook>,
    started: bool,
}

impl Drop for PendingJob {
    fn drop(&mut self) {
        if !self.started {
            report_failure(
                self.hook.as_ref(),
                &self.descriptor,
                HandlerError::NotScheduled("job dropped before it ran".to_string()),
            );
        }
    }
}

fn report_failure(hook: Option<&FailureHook>, descriptor: &HandlerDescriptor, error: HandlerError) {
    warn!(
        handler = descriptor.name(),
        event_type = descriptor.event_type_name(),
        mode = %descriptor.mode(),
        error = %error,
        "event handler failed"
    );
    let Some(hook) = hook else {
        return;
    };

    let failure = HandlerFailure {
        handler: descriptor.name(),
        event_type: descriptor.event_type_name(),
        mode: descriptor.mode(),
        error,
    };
    if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(|| hook(&failure))) {
        error!(
            handler = failure.handler,
            panic = %panic_message(payload.as_ref()),
            "failure hook panicked"
        );
    }
}
