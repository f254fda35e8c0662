//! Port definitions (hexagonal architecture interfaces)
//!
//! Ports are the interfaces the synchronization components depend on,
//! with implementations living in adapter crates.
//!
//! ## Ports Overview
//!
//! - [`IObjectStore`] / [`IObjectStoreFactory`] - remote object storage
//! - [`IErrorLog`] - append-only log of failed transfers
//! - [`IStatusNotifier`] - push-style transfer transition events
//! - [`IWatchStore`] - persistence for watch entries
//! - [`IEventSource`] - runtime registration of monitored directories

pub mod error_log;
pub mod event_source;
pub mod notification;
pub mod object_store;
pub mod watch_store;

pub use error_log::{ErrorLogEntry, IErrorLog};
pub use event_source::IEventSource;
pub use notification::{IStatusNotifier, NullNotifier};
pub use object_store::{IObjectStore, IObjectStoreFactory};
pub use watch_store::IWatchStore;
