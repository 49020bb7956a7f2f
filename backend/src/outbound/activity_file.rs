//! JSON file adapter for the activity register.

use std::path::PathBuf;

use async_trait::async_trait;
use tracing::debug;

use super::snapshot_file::{SnapshotFile, SnapshotFileError};
use crate::domain::ActivitySnapshot;
use crate::domain::ports::{ActivitySnapshotStore, ActivitySnapshotStoreError};

/// File name of the register inside the data directory.
pub const ACTIVITY_FILENAME: &str = "activity.json";

/// Persists the activity register as `activity.json`.
#[derive(Debug)]
pub struct JsonActivityFile {
    file: SnapshotFile,
}

impl JsonActivityFile {
    /// Store the register inside `data_dir`.
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            file: SnapshotFile::new(data_dir.into(), ACTIVITY_FILENAME),
        }
    }
}

fn store_error(error: SnapshotFileError) -> ActivitySnapshotStoreError {
    match error {
        io @ SnapshotFileError::Io { .. } => ActivitySnapshotStoreError::io(io.to_string()),
        SnapshotFileError::Serialization(inner) => {
            ActivitySnapshotStoreError::serialization(inner.to_string())
        }
    }
}

#[async_trait]
impl ActivitySnapshotStore for JsonActivityFile {
    async fn load(&self) -> Result<Option<ActivitySnapshot>, ActivitySnapshotStoreError> {
        let snapshot: Option<ActivitySnapshot> = self.file.load().map_err(store_error)?;
        if let Some(snapshot) = &snapshot {
            debug!(users = snapshot.entries.len(), "activity register loaded");
        }
        Ok(snapshot)
    }

    async fn save(&self, snapshot: &ActivitySnapshot) -> Result<(), ActivitySnapshotStoreError> {
        self.file.save(snapshot).await.map_err(store_error)?;
        Ok(())
    }
}
