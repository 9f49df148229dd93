//! Stream configuration persistence
//!
//! Streams are persisted as a single JSON document, loaded at startup and
//! rewritten on every mutation. Only configuration is persisted —
//! operational state (samples, incidents, health) is rebuilt by observing.

use std::path::PathBuf;

use crate::errors::PersistenceError;
use crate::models::Stream;

pub struct StreamStore {
    path: PathBuf,
}

impl StreamStore {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    /// Read the persisted stream list. A missing file is an empty fleet,
    /// not an error.
    pub async fn load(&self) -> Result<Vec<Stream>, PersistenceError> {
        let path = self.path.display().to_string();
        match tokio::fs::read(&self.path).await {
            Ok(bytes) => serde_json::from_slice(&bytes)
                .map_err(|source| PersistenceError::Malformed { path, source }),
            Err(source) if source.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
            Err(source) => Err(PersistenceError::Io { path, source }),
        }
    }

    /// Rewrite the document. Written to a sibling temp file first so a
    /// crash mid-write never leaves a truncated document behind.
    pub async fn save(&self, streams: &[Stream]) -> Result<(), PersistenceError> {
        let path = self.path.display().to_string();
        let json = serde_json::to_vec_pretty(streams)
            .map_err(|source| PersistenceError::Malformed {
                path: path.clone(),
                source,
            })?;

        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|source| PersistenceError::Io {
                    path: path.clone(),
                    source,
                })?;
        }

        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, &json)
            .await
            .map_err(|source| PersistenceError::Io {
                path: path.clone(),
                source,
            })?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .map_err(|source| PersistenceError::Io { path, source })
    }
}
