//! Watch store port (driven/secondary port)
//!
//! Persistence for the watch-entry list. The whole list is written on
//! every mutation, so a failed save is repaired by the next successful
//! one.

use crate::domain::WatchEntry;

/// Port trait for persisting watch entries
#[async_trait::async_trait]
pub trait IWatchStore: Send + Sync {
    /// Loads the persisted entries in their stored order
    async fn load_entries(&self) -> anyhow::Result<Vec<WatchEntry>>;

    /// Replaces the persisted entries with `entries`
    async fn save_entries(&self, entries: &[WatchEntry]) -> anyhow::Result<()>;
}
