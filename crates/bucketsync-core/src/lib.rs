//! BucketSync Core - Domain types, ports and configuration
//!
//! This crate holds everything the synchronization components share:
//! - **Domain** - `WatchEntry`, `TransferStatus`, `TransferTemplate`, errors
//! - **Ports** - traits implemented by adapter crates: `IObjectStore`,
//!   `IErrorLog`, `IStatusNotifier`, `IWatchStore`, `IEventSource`
//! - **Configuration** - the typed YAML configuration file
//!
//! The domain module has no I/O beyond path canonicalization. Adapters
//! live in `bucketsync-s3`, `bucketsync-audit`, `bucketsync-sync` and the
//! daemon.

pub mod config;
pub mod domain;
pub mod ports;
