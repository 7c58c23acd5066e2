//! Warm-start snapshots on local disk.
//!
//! A snapshot only shortens the time to first paint. Restored timelines are
//! treated as partial, so the first open still fetches the authoritative
//! history.

use std::{
    collections::HashMap,
    io,
    path::{Path, PathBuf},
    sync::Arc,
};

use serde::{Deserialize, Serialize};
use shared::models::{Participant, Timestamp};
use thiserror::Error;
use tokio::fs;
use tracing::debug;

use crate::{cache::Timeline, directory::ConversationDirectory, state::ChatState};

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("snapshot io failed: {0}")]
    Io(#[from] io::Error),
    #[error("snapshot is corrupt: {0}")]
    Corrupt(#[from] serde_json::Error),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    pub viewer_id: String,
    pub saved_at: Timestamp,
    pub timelines: HashMap<String, Timeline>,
    pub directory: ConversationDirectory,
}

impl Snapshot {
    #[must_use]
    pub fn capture(state: &ChatState, viewer_id: &str) -> Self {
        Self {
            viewer_id: viewer_id.to_string(),
            saved_at: Timestamp::now(),
            timelines: state
                .timelines
                .iter()
                .map(|(counterpart, timeline)| (counterpart.clone(), timeline.as_ref().clone()))
                .collect(),
            directory: state.directory.clone(),
        }
    }

    /// Rebuild a stale state from the snapshot.
    #[must_use]
    pub fn into_state(self, viewer: &Participant) -> ChatState {
        let timelines: HashMap<String, Arc<Timeline>> = self
            .timelines
            .into_iter()
            .map(|(counterpart, timeline)| (counterpart, Arc::new(timeline.mark_unloaded())))
            .collect();
        let directory = self.directory.rebased(&timelines, viewer);
        ChatState {
            timelines,
            directory,
            active: None,
            stale: true,
        }
    }
}

#[derive(Debug, Clone)]
pub struct WarmStartStore {
    directory: PathBuf,
}

impl WarmStartStore {
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self {
            directory: directory.into(),
        }
    }

    #[must_use]
    pub fn directory(&self) -> &Path {
        &self.directory
    }

    /// File holding `viewer_id`'s snapshot. Ids are reduced to a safe file name.
    #[must_use]
    pub fn path_for(&self, viewer_id: &str) -> PathBuf {
        let name: String = viewer_id
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
            .collect();
        self.directory.join(format!("{name}.json"))
    }

    /// # Errors
    /// Returns an error when the file exists but cannot be read or parsed.
    pub async fn load(&self, viewer_id: &str) -> Result<Option<Snapshot>, StorageError> {
        let path = self.path_for(viewer_id);
        let content = match fs::read_to_string(&path).await {
            Ok(content) => content,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(err.into()),
        };
        let snapshot: Snapshot = serde_json::from_str(&content)?;
        if snapshot.viewer_id != viewer_id {
            debug!(path = %path.display(), "ignoring snapshot of another viewer");
            return Ok(None);
        }
        Ok(Some(snapshot))
    }

    /// Write atomically through a temporary file.
    ///
    /// # Errors
    /// Returns an error when the directory or file cannot be written.
    pub async fn save(&self, snapshot: &Snapshot) -> Result<(), StorageError> {
        fs::create_dir_all(&self.directory).await?;
        let path = self.path_for(&snapshot.viewer_id);
        let staging = path.with_extension("json.tmp");
        fs::write(&staging, serde_json::to_vec(snapshot)?).await?;
        fs::rename(&staging, &path).await?;
        debug!(path = %path.display(), "snapshot saved");
        Ok(())
    }

    /// # Errors
    /// Returns an error when an existing snapshot cannot be removed.
    pub async fn clear(&self, viewer_id: &str) -> Result<(), StorageError> {
        match fs::remove_file(self.path_for(viewer_id)).await {
            Err(err) if err.kind() != io::ErrorKind::NotFound => Err(err.into()),
            _ => Ok(()),
        }
    }
}
