//! File Position Backend
//!
//! Stores the feed position as a small JSON document under the XDG data
//! directory (`$XDG_DATA_HOME/stitchfeed/position.json`). Writes go to a
//! sibling temp file first and are renamed into place.

use std::path::{Path, PathBuf};

use async_trait::async_trait;

use super::traits::PositionBackend;
use crate::position::{FeedPosition, PositionError};

/// Position backend writing JSON with `tokio::fs`
#[derive(Clone, Debug)]
pub struct FilePositionBackend {
    path: PathBuf,
}

impl FilePositionBackend {
    /// Store the position at an explicit path
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Default location: `$XDG_DATA_HOME/stitchfeed/position.json`
    #[must_use]
    pub fn default_path() -> Option<PathBuf> {
        dirs::data_dir().map(|p| p.join("stitchfeed").join("position.json"))
    }

    /// Backend at the default location
    ///
    /// # Errors
    ///
    /// Returns `PositionError::NoDataDir` if the platform has no data dir.
    pub fn from_default_location() -> Result<Self, PositionError> {
        Self::default_path()
            .map(Self::new)
            .ok_or(PositionError::NoDataDir)
    }

    /// File this backend writes
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn io_error(&self, source: std::io::Error) -> PositionError {
        PositionError::Io {
            path: self.path.clone(),
            source,
        }
    }
}

#[async_trait]
impl PositionBackend for FilePositionBackend {
    fn name(&self) -> &'static str {
        "file"
    }

    async fn save(&self, position: &FeedPosition) -> Result<(), PositionError> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| self.io_error(e))?;
        }

        let json = serde_json::to_vec_pretty(position)?;
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, json)
            .await
            .map_err(|e| self.io_error(e))?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .map_err(|e| self.io_error(e))?;
        Ok(())
    }

    async fn load(&self) -> Result<Option<FeedPosition>, PositionError> {
        let bytes = match tokio::fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(self.io_error(e)),
        };
        Ok(Some(serde_json::from_slice(&bytes)?))
    }

    async fn clear(&self) -> Result<(), PositionError> {
        match tokio::fs::remove_file(&self.path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(self.io_error(e)),
        }
    }
}
