//! Port for persisting role assignments across restarts.

use std::sync::Mutex;

use async_trait::async_trait;

use super::define_port_error;
use crate::domain::RoleSnapshot;

define_port_error! {
    /// Errors raised by role snapshot adapters.
    pub enum RoleSnapshotStoreError {
        /// Snapshot could not be read or written.
        Io { message: String } => "role snapshot i/o failed: {message}",
        /// Snapshot content is not valid.
        Serialization { message: String } => "role snapshot serialization failed: {message}",
    }
}

/// Port for loading and saving the role snapshot.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RoleSnapshotStore: Send + Sync {
    /// Load the last saved snapshot, if any.
    async fn load(&self) -> Result<Option<RoleSnapshot>, RoleSnapshotStoreError>;

    /// Replace the saved snapshot.
    async fn save(&self, snapshot: &RoleSnapshot) -> Result<(), RoleSnapshotStoreError>;
}

/// In-memory snapshot store for tests and ephemeral runs.
#[derive(Debug, Default)]
pub struct FixtureRoleSnapshotStore {
    saved: Mutex<Option<RoleSnapshot>>,
}

impl FixtureRoleSnapshotStore {
    /// Last saved snapshot.
    pub fn saved(&self) -> Option<RoleSnapshot> {
        self.saved.lock().ok().and_then(|saved| saved.clone())
    }
}

#[async_trait]
impl RoleSnapshotStore for FixtureRoleSnapshotStore {
    async fn load(&self) -> Result<Option<RoleSnapshot>, RoleSnapshotStoreError> {
        Ok(self.saved())
    }

    async fn save(&self, snapshot: &RoleSnapshot) -> Result<(), RoleSnapshotStoreError> {
        let mut saved = self
            .saved
            .lock()
            .map_err(|_| RoleSnapshotStoreError::io("fixture snapshot mutex poisoned"))?;
        *saved = Some(snapshot.clone());
        Ok(())
    }
}
