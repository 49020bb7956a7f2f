//! JSON file adapter for role snapshots.

use std::path::PathBuf;

use async_trait::async_trait;
use tracing::debug;

use super::snapshot_file::{SnapshotFile, SnapshotFileError};
use crate::domain::RoleSnapshot;
use crate::domain::ports::{RoleSnapshotStore, RoleSnapshotStoreError};

/// File name of the snapshot inside the data directory.
pub const ROLES_FILENAME: &str = "roles.json";

/// Persists role snapshots as `roles.json`, replaced atomically on save.
#[derive(Debug)]
pub struct JsonRoleFile {
    file: SnapshotFile,
}

impl JsonRoleFile {
    /// Store snapshots inside `data_dir`.
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            file: SnapshotFile::new(data_dir.into(), ROLES_FILENAME),
        }
    }
}

fn store_error(error: SnapshotFileError) -> RoleSnapshotStoreError {
    match error {
        io @ SnapshotFileError::Io { .. } => RoleSnapshotStoreError::io(io.to_string()),
        SnapshotFileError::Serialization(inner) => {
            RoleSnapshotStoreError::serialization(inner.to_string())
        }
    }
}

#[async_trait]
impl RoleSnapshotStore for JsonRoleFile {
    async fn load(&self) -> Result<Option<RoleSnapshot>, RoleSnapshotStoreError> {
        let snapshot: Option<RoleSnapshot> = self.file.load().map_err(store_error)?;
        if let Some(snapshot) = &snapshot {
            debug!(users = snapshot.assignments.len(), "role snapshot loaded");
        }
        Ok(snapshot)
    }

    async fn save(&self, snapshot: &RoleSnapshot) -> Result<(), RoleSnapshotStoreError> {
        self.file.save(snapshot).await.map_err(store_error)?;
        debug!(users = snapshot.assignments.len(), "role snapshot saved");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{AccessControlGate, Role, UserId};
    use crate::test_support::cap_fs::{path_exists, write_file};
    use tempfile::TempDir;

    #[tokio::test]
    async fn missing_file_loads_as_none() {
        let dir = TempDir::new().expect("temp dir");
        let store = JsonRoleFile::new(dir.path());
        assert_eq!(store.load().await.expect("load"), None);
    }

    #[tokio::test]
    async fn saved_snapshot_restores_assignments() {
        let dir = TempDir::new().expect("temp dir");
        let store = JsonRoleFile::new(dir.path());
        let admin = UserId::new(1);
        let gate = AccessControlGate::new(Some(admin));
        gate.assign_role(admin, UserId::new(2), Role::Moderator)
            .expect("grant");

        store.save(&gate.snapshot()).await.expect("save");
        assert!(path_exists(&dir.path().join(ROLES_FILENAME)));

        let loaded = store.load().await.expect("load").expect("snapshot");
        let restored = AccessControlGate::restore(Some(admin), loaded);
        assert!(restored.roles(UserId::new(2)).contains(Role::Moderator));
    }

    #[tokio::test]
    async fn unreadable_snapshot_is_a_serialization_error() {
        let dir = TempDir::new().expect("temp dir");
        write_file(&dir.path().join(ROLES_FILENAME), b"{ not json").expect("seed");
        let error = JsonRoleFile::new(dir.path())
            .load()
            .await
            .expect_err("corrupt snapshot");
        assert!(matches!(error, RoleSnapshotStoreError::Serialization { .. }));
    }
}
