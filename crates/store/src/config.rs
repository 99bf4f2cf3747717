//! Store configuration.

use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

/// Where a store lives and how it ages in-flight work.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Directory holding one subdirectory per namespace
    pub root: PathBuf,
    /// Namespace (a single directory name) owned by this store
    pub namespace: String,
    /// How long a `Processing` job may go untouched before it is re-driven
    pub stale_after: Duration,
}

impl StoreConfig {
    /// Default staleness threshold for `Processing` jobs.
    pub const DEFAULT_STALE_AFTER: Duration = Duration::from_secs(120);

    pub fn new(root: impl Into<PathBuf>, namespace: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            namespace: namespace.into(),
            stale_after: Self::DEFAULT_STALE_AFTER,
        }
    }

    pub fn with_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.root = root.into();
        self
    }

    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    pub fn with_stale_after(mut self, stale_after: Duration) -> Self {
        self.stale_after = stale_after;
        self
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self::new(default_root(), "default")
    }
}

/// `{app_data_dir}/upqueue`, falling back to `~/.local/share` and then the
/// temp directory.
pub fn default_root() -> PathBuf {
    dirs::data_dir()
        .or_else(|| {
            dirs::home_dir().map(|mut h| {
                h.push(".local");
                h.push("share");
                h
            })
        })
        .unwrap_or_else(std::env::temp_dir)
        .join("upqueue")
}
