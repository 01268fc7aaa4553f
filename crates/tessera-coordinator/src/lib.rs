//! # tessera-coordinator: Placement coordination for `Tessera`
//!
//! Tracks which executors exist, where each region's replicas live, and
//! when regions should split.
//!
//! ```text
//! executor ──register──► PlacementCoordinator ──save──► Directory
//!                               │
//!                               └─► NotifyPool ─► TableScheduler::add_store
//!
//! executor ──report────► PlacementCoordinator ─► TableScheduler::process_stats
//!                                                      └─► SplitTask
//!
//! TableScheduler::execute_splits ─► StoreClient::region_split ─► Directory
//! ```
//!
//! - [`PlacementCoordinator`] keeps one [`TableScheduler`] per table in a
//!   concurrent map with atomic get-or-create.
//! - Registration writes the directory synchronously and notifies
//!   schedulers on a bounded [`NotifyPool`].
//! - Schedulers place replicas on the least-loaded stores and schedule a
//!   split when a region reports load over the configured thresholds.
//!   Executing a split moves the stored upper half before the directory
//!   publishes the new boundary.

mod api;
mod coordinator;
mod error;
mod notify;
mod scheduler;


pub use api::{ApiRegistry, LocalRegistry, ReportApi, ServerApi};
pub use coordinator::PlacementCoordinator;
pub use error::{CoordinatorError, Result};
pub use notify::NotifyPool;
pub use scheduler::{TableScheduler, choose_split_key};
