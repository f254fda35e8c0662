//! Status notifier port (driven/secondary port)
//!
//! The upload coordinator reports every transfer state transition through
//! this interface. Implementations relay the snapshot to whatever
//! presentation layer is attached (a UI process, a log, a test recorder).
//!
//! ## Design Notes
//!
//! - `notify` is synchronous and is called while the coordinator holds its
//!   record lock, so that transitions for one path are delivered in order.
//!   Implementations must not block and must not call back into the
//!   coordinator.
//! - Delivery is fire-and-forget; a notifier with no listeners simply
//!   drops the event.

use crate::domain::TransferTemplate;

/// Port trait for relaying transfer transitions
pub trait IStatusNotifier: Send + Sync {
    /// Called once per state transition with the record's new snapshot
    fn notify(&self, transfer: &TransferTemplate);
}

/// Notifier that discards every event
#[derive(Debug, Default, Clone, Copy)]
pub struct NullNotifier;

impl IStatusNotifier for NullNotifier {
    fn notify(&self, _transfer: &TransferTemplate) {}
}
