//! Port for persisting the activity register across restarts.

use std::sync::Mutex;

use async_trait::async_trait;

use super::define_port_error;
use crate::domain::ActivitySnapshot;

define_port_error! {
    /// Errors raised by activity snapshot adapters.
    pub enum ActivitySnapshotStoreError {
        /// Snapshot could not be read or written.
        Io { message: String } => "activity snapshot i/o failed: {message}",
        /// Snapshot content is not valid.
        Serialization { message: String } => "activity snapshot serialization failed: {message}",
    }
}

/// Port for loading and saving the activity register.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ActivitySnapshotStore: Send + Sync {
    /// Load the last saved snapshot, if any.
    async fn load(&self) -> Result<Option<ActivitySnapshot>, ActivitySnapshotStoreError>;

    /// Replace the saved snapshot.
    async fn save(&self, snapshot: &ActivitySnapshot) -> Result<(), ActivitySnapshotStoreError>;
}

/// In-memory activity store for tests and ephemeral runs.
#[derive(Debug, Default)]
pub struct FixtureActivitySnapshotStore {
    saved: Mutex<Option<ActivitySnapshot>>,
}

impl FixtureActivitySnapshotStore {
    /// Last saved snapshot.
    pub fn saved(&self) -> Option<ActivitySnapshot> {
        self.saved.lock().ok().and_then(|saved| saved.clone())
    }
}

#[async_trait]
impl ActivitySnapshotStore for FixtureActivitySnapshotStore {
    async fn load(&self) -> Result<Option<ActivitySnapshot>, ActivitySnapshotStoreError> {
        Ok(self.saved())
    }

    async fn save(&self, snapshot: &ActivitySnapshot) -> Result<(), ActivitySnapshotStoreError> {
        let mut saved = self
            .saved
            .lock()
            .map_err(|_| ActivitySnapshotStoreError::io("fixture activity mutex poisoned"))?;
        *saved = Some(snapshot.clone());
        Ok(())
    }
}
