//! Whole-file JSON snapshots inside the data directory.
//!
//! Saves go to a staging file that is then renamed over the target, so a
//! crash never leaves a half-written snapshot. Saves through one
//! [`SnapshotFile`] are serialised: two writers sharing the staging file
//! would otherwise rename each other's bytes into place.

use std::io;
use std::path::PathBuf;

use cap_std::{ambient_authority, fs::Dir};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::sync::Mutex;

/// Failure reading or writing a snapshot file.
#[derive(Debug, thiserror::Error)]
pub(crate) enum SnapshotFileError {
    #[error("{path}: {source}")]
    Io {
        path: String,
        #[source]
        source: io::Error,
    },
    #[error("{0}")]
    Serialization(#[from] serde_json::Error),
}

/// One JSON document stored as `file_name` under `data_dir`.
#[derive(Debug)]
pub(crate) struct SnapshotFile {
    data_dir: PathBuf,
    file_name: &'static str,
    write_lock: Mutex<()>,
}

impl SnapshotFile {
    pub(crate) fn new(data_dir: PathBuf, file_name: &'static str) -> Self {
        Self {
            data_dir,
            file_name,
            write_lock: Mutex::new(()),
        }
    }

    fn open_dir(&self) -> Result<Dir, SnapshotFileError> {
        Dir::create_ambient_dir_all(&self.data_dir, ambient_authority())
            .and_then(|()| Dir::open_ambient_dir(&self.data_dir, ambient_authority()))
            .map_err(|source| self.io_error(source))
    }

    fn io_error(&self, source: io::Error) -> SnapshotFileError {
        SnapshotFileError::Io {
            path: self.data_dir.join(self.file_name).display().to_string(),
            source,
        }
    }

    /// Decode the file, or `None` when it does not exist yet.
    pub(crate) fn load<T: DeserializeOwned>(&self) -> Result<Option<T>, SnapshotFileError> {
        let dir = self.open_dir()?;
        let contents = match dir.read_to_string(self.file_name) {
            Ok(contents) => contents,
            Err(error) if error.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(error) => return Err(self.io_error(error)),
        };
        Ok(Some(serde_json::from_str(&contents)?))
    }

    /// Replace the file with `value`.
    pub(crate) async fn save<T: Serialize + Sync>(&self, value: &T) -> Result<(), SnapshotFileError> {
        let encoded = serde_json::to_vec_pretty(value)?;
        let _guard = self.write_lock.lock().await;
        let dir = self.open_dir()?;
        let staging = format!(".{}.tmp", self.file_name);
        dir.write(&staging, &encoded)
            .and_then(|()| dir.rename(&staging, &dir, self.file_name))
            .map_err(|source| self.io_error(source))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::test_support::cap_fs::{path_exists, read_file_to_string};
    use tempfile::TempDir;

    #[tokio::test]
    async fn missing_file_loads_as_none() {
        let dir = TempDir::new().expect("temp dir");
        let file = SnapshotFile::new(dir.path().to_path_buf(), "state.json");
        let loaded: Option<Vec<u32>> = file.load().expect("load");
        assert_eq!(loaded, None);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_saves_leave_one_complete_document() {
        let dir = TempDir::new().expect("temp dir");
        let file = Arc::new(SnapshotFile::new(dir.path().to_path_buf(), "state.json"));
        let mut tasks = tokio::task::JoinSet::new();
        for value in 0..32_u32 {
            let file = file.clone();
            tasks.spawn(async move { file.save(&vec![value; 64]).await });
        }
        while let Some(joined) = tasks.join_next().await {
            joined.expect("task").expect("save");
        }

        let loaded: Vec<u32> = file.load().expect("load").expect("present");
        assert_eq!(loaded.len(), 64);
        assert!(loaded.iter().all(|value| *value == loaded[0]));
        assert!(!path_exists(&dir.path().join(".state.json.tmp")));
        assert!(read_file_to_string(&dir.path().join("state.json")).is_ok());
    }
}
