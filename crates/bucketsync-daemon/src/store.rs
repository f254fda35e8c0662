//! Watch entries persisted in the `watchers` section of the config file
//!
//! Saving rewrites the whole file with the other sections untouched as
//! they are on disk at the time of the save.

use std::path::{Path, PathBuf};

use anyhow::Context;
use bucketsync_core::config::Config;
use bucketsync_core::domain::WatchEntry;
use bucketsync_core::ports::IWatchStore;
use tracing::debug;

pub struct ConfigWatchStore {
    path: PathBuf,
}

impl ConfigWatchStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Reads the file, or the defaults if it does not exist yet
    ///
    /// An unreadable or unparsable file is an error, so that a save never
    /// overwrites hand-edited content with defaults.
    fn read_config(path: &Path) -> anyhow::Result<Config> {
        if path.exists() {
            Config::load(path)
        } else {
            Ok(Config::default())
        }
    }
}

#[async_trait::async_trait]
impl IWatchStore for ConfigWatchStore {
    async fn load_entries(&self) -> anyhow::Result<Vec<WatchEntry>> {
        let path = self.path.clone();
        let config = tokio::task::spawn_blocking(move || Self::read_config(&path))
            .await
            .context("config read task panicked")??;
        Ok(config.watchers)
    }

    async fn save_entries(&self, entries: &[WatchEntry]) -> anyhow::Result<()> {
        let path = self.path.clone();
        let entries = entries.to_vec();
        let count = entries.len();
        tokio::task::spawn_blocking(move || {
            let mut config = Self::read_config(&path)?;
            config.watchers = entries;
            config.save(&path)
        })
        .await
        .context("config write task panicked")??;
        debug!(path = %self.path.display(), count, "Saved watch entries");
        Ok(())
    }
}
