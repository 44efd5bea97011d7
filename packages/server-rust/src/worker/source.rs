//! Configuration sources polled by the pool's refresh task.

use std::path::{Path, PathBuf};
use std::time::SystemTime;

use async_trait::async_trait;
use parking_lot::RwLock;

use super::config::PoolConfiguration;

/// Failure to check or read a configuration source.
#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    #[error("cannot read pool configuration {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid pool configuration {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Change detection and reload of a pool configuration.
#[async_trait]
pub trait ConfigSource: Send + Sync {
    /// Whether the configuration may have changed at or after `since`.
    async fn has_changed(&self, since: SystemTime) -> Result<bool, SourceError>;

    /// Read the full current configuration.
    async fn reload(&self) -> Result<PoolConfiguration, SourceError>;
}

// ---------------------------------------------------------------------------
// StaticConfigSource
// ---------------------------------------------------------------------------

/// In-memory configuration that can be swapped at runtime.
#[derive(Debug)]
pub struct StaticConfigSource {
    current: RwLock<(PoolConfiguration, SystemTime)>,
}

impl StaticConfigSource {
    #[must_use]
    pub fn new(config: PoolConfiguration) -> Self {
        Self {
            current: RwLock::new((config, SystemTime::now())),
        }
    }

    /// Replace the configuration and mark it changed.
    pub fn replace(&self, config: PoolConfiguration) {
        *self.current.write() = (config, SystemTime::now());
    }

    #[must_use]
    pub fn current(&self) -> PoolConfiguration {
        self.current.read().0.clone()
    }
}

#[async_trait]
impl ConfigSource for StaticConfigSource {
    async fn has_changed(&self, since: SystemTime) -> Result<bool, SourceError> {
        Ok(self.current.read().1 >= since)
    }

    async fn reload(&self) -> Result<PoolConfiguration, SourceError> {
        Ok(self.current())
    }
}

// ---------------------------------------------------------------------------
// FileConfigSource
// ---------------------------------------------------------------------------

/// A JSON pool configuration file, considered changed when its modification
/// time is not older than the last check.
#[derive(Debug, Clone)]
pub struct FileConfigSource {
    path: PathBuf,
}

impl FileConfigSource {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn io_error(&self, source: std::io::Error) -> SourceError {
        SourceError::Io {
            path: self.path.clone(),
            source,
        }
    }
}

#[async_trait]
impl ConfigSource for FileConfigSource {
    async fn has_changed(&self, since: SystemTime) -> Result<bool, SourceError> {
        let metadata = tokio::fs::metadata(&self.path)
            .await
            .map_err(|e| self.io_error(e))?;
        let modified = metadata.modified().map_err(|e| self.io_error(e))?;
        Ok(modified >= since)
    }

    async fn reload(&self) -> Result<PoolConfiguration, SourceError> {
        let raw = tokio::fs::read_to_string(&self.path)
            .await
            .map_err(|e| self.io_error(e))?;
        PoolConfiguration::from_json(&raw).map_err(|source| SourceError::Parse {
            path: self.path.clone(),
            source,
        })
    }
}
