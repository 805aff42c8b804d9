//! Durable storage for the seen-set.
//!
//! State lives in two tiers:
//!
//! 1. A local JSON file (`postedNews.json` by default), rewritten wholesale
//!    on every save through a temp-file-and-rename.
//! 2. A remote repository that receives a copy of that file after each
//!    local write; see [`remote`].
//!
//! The local write is never rolled back when the remote step fails. The next
//! run loads the local file, which already holds the merged state, and pushes
//! it again; since each push carries the full file, that retry is idempotent.

pub mod remote;

use crate::models::SeenSet;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use thiserror::Error;
use tokio::fs;
use tracing::{info, instrument, warn};

/// Errors raised while loading or saving the seen-set.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("io error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("state file {path} is corrupt: {source}")]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("could not serialize state: {0}")]
    Serialize(#[source] serde_json::Error),
    #[error("could not prepare a working directory for the remote sync: {0}")]
    Workspace(#[source] io::Error),
    #[error("could not run `git {step}`: {source}")]
    Spawn {
        step: &'static str,
        #[source]
        source: io::Error,
    },
    #[error("`git {step}` failed (exit code {code:?}): {stderr}")]
    Git {
        step: &'static str,
        code: Option<i32>,
        stderr: String,
    },
}

/// The remote half of a save: publish a freshly written state file.
pub trait RemoteSync {
    async fn publish(&self, file: &Path) -> Result<(), StoreError>;
}

/// Loads and saves the seen-set through a local file and a [`RemoteSync`].
#[derive(Debug)]
pub struct StateStore<R> {
    path: PathBuf,
    remote: R,
}

impl<R: RemoteSync> StateStore<R> {
    pub fn new(path: impl Into<PathBuf>, remote: R) -> Self {
        Self {
            path: path.into(),
            remote,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    #[cfg(test)]
    pub(crate) fn remote(&self) -> &R {
        &self.remote
    }

    /// Read the persisted seen-set; a missing file means a first run.
    ///
    /// A file that exists but cannot be parsed is an error. The ledger is
    /// never silently reset, since that would re-announce every item.
    #[instrument(level = "info", skip_all, fields(path = %self.path.display()))]
    pub async fn load(&self) -> Result<SeenSet, StoreError> {
        let bytes = match fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                info!("No state file yet; starting with an empty seen-set");
                return Ok(SeenSet::new());
            }
            Err(source) => {
                return Err(StoreError::Io {
                    path: self.path.clone(),
                    source,
                });
            }
        };

        let seen: SeenSet =
            serde_json::from_slice(&bytes).map_err(|source| StoreError::Corrupt {
                path: self.path.clone(),
                source,
            })?;

        let dupes = seen.duplicate_links();
        if !dupes.is_empty() {
            warn!(count = dupes.len(), links = ?dupes, "State file holds duplicate links; keeping them as stored");
        }
        info!(count = seen.len(), "Loaded seen-set");
        Ok(seen)
    }

    /// Overwrite the local state file with `seen`.
    #[instrument(level = "info", skip_all, fields(path = %self.path.display(), count = seen.len()))]
    pub async fn write_local(&self, seen: &SeenSet) -> Result<(), StoreError> {
        let json = serde_json::to_string_pretty(seen).map_err(StoreError::Serialize)?;
        let target = self.path.clone();
        tokio::task::spawn_blocking(move || write_atomic(&target, json.as_bytes()))
            .await
            .unwrap_or_else(|e| Err(io::Error::other(e)))
            .map_err(|source| StoreError::Io {
                path: self.path.clone(),
                source,
            })?;
        info!("Wrote local state file");
        Ok(())
    }

    /// Write `seen` locally, then publish the file to the remote.
    ///
    /// A remote failure is returned after the local file has already been
    /// replaced.
    pub async fn save(&self, seen: &SeenSet) -> Result<(), StoreError> {
        self.write_local(seen).await?;
        self.remote.publish(&self.path).await?;
        info!(path = %self.path.display(), "Remote state updated");
        Ok(())
    }
}

fn write_atomic(target: &Path, content: &[u8]) -> io::Result<()> {
    let dir = match target.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    let mut tmp = NamedTempFile::new_in(dir)?;
    tmp.write_all(content)?;
    tmp.flush()?;
    tmp.as_file_mut().sync_all()?;
    tmp.persist(target).map_err(|e| e.error)?;
    Ok(())
}
