//! # freesia-core
//!
//! An in-process event dispatch engine. Listener containers declare handler
//! methods together with explicit metadata (event type, priority, sync/async
//! execution, filters); the [`EventBus`] indexes those handlers by the event
//! type they accept and, on every [`EventBus::post`], invokes the matching
//! handlers in descending priority order.
//!
//! # Architecture
//!
//! ```text
//! Listener ──declare──▶ HandlerScanner ──▶ HandlerMap
//!                                            │
//!                        ┌───────────────────┴──────────────┐
//!                        ▼                                  ▼
//!                    Registry                           TypeIndex
//!            (container → contributions)     (TypeId → priority-sorted bucket)
//!                                                           │
//!                                    EventBus::post ◀───────┘
//!                                      │        │
//!                              sync inline    async ──▶ WorkerPool
//! ```
//!
//! # Example
//!
//! ```rust
//! use freesia_core::{BindError, EventBus, HandlerConfig, HandlerSet, Listener};
//! use std::sync::atomic::{AtomicUsize, Ordering};
//! use std::sync::Arc;
//!
//! struct Greeted {
//!     name: String,
//! }
//! impl freesia_core::Event for Greeted {}
//!
//! #[derive(Default)]
//! struct Greeter {
//!     seen: AtomicUsize,
//! }
//!
//! impl Greeter {
//!     fn on_greeted(&self, _event: &Greeted) {
//!         self.seen.fetch_add(1, Ordering::SeqCst);
//!     }
//! }
//!
//! impl Listener for Greeter {
//!     fn declare(self: Arc<Self>, handlers: &mut HandlerSet) -> Result<(), BindError> {
//!         handlers.bind(&self, HandlerConfig::new().priority(10), Self::on_greeted)
//!     }
//! }
//!
//! let bus = EventBus::new();
//! let greeter = Arc::new(Greeter::default());
//! assert!(bus.register(&greeter));
//!
//! bus.post(Arc::new(Greeted { name: "freesia".into() }));
//! assert_eq!(greeter.seen.load(Ordering::SeqCst), 1);
//! ```

#![warn(clippy::all)]

pub mod bus;
pub mod config;
pub mod error;
pub mod event;
pub mod filter;
pub mod handler;
mod index;
mod pool;
pub mod registry;
pub mod scanner;

pub use bus::{EventBus, FailureHook, HandlerInfo};
pub use config::{BusConfig, ConfigError, WorkerConfig};
pub use error::{BindError, BusError, BusResult, HandlerError, HandlerFailure};
pub use event::{CancelFlag, Cancellable, Event};
pub use filter::{filter_fn, EventFilter, FilterFn};
pub use handler::{ExecutionMode, HandlerConfig, HandlerDescriptor, HandlerOutcome};
pub use registry::ListenerId;
pub use scanner::{DeclaredScanner, HandlerMap, HandlerScanner, HandlerSet, Listener};
