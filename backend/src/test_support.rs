//! Test utilities for the backend crate.
//!
//! This module provides shared helpers for both unit tests (in `src/`) and
//! integration tests (in `tests/`). It is only compiled for tests or with the
//! `test-support` feature.

pub mod cap_fs {
    //! Capability-safe filesystem helpers for tests.
    //!
    //! The backend forbids direct `std::fs` calls. These helpers read and
    //! write through `cap_std::fs::Dir` so test suites inspecting store files
    //! stay policy-compliant.

    use std::ffi::OsString;
    use std::io;
    use std::path::Path;

    use cap_std::{ambient_authority, fs::Dir};

    /// Read a UTF-8 text file through `cap_std`.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use invoice_backend::test_support::cap_fs::{read_file_to_string, write_file};
    ///
    /// let path = std::env::temp_dir().join("cap-fs-read-example.txt");
    /// write_file(&path, b"hello\n")?;
    ///
    /// let content = read_file_to_string(&path)?;
    /// assert_eq!(content, "hello\n");
    /// # Ok::<(), std::io::Error>(())
    /// ```
    pub fn read_file_to_string(path: &Path) -> io::Result<String> {
        let (parent, file_name) = parent_and_file_name(path)?;
        let directory = Dir::open_ambient_dir(parent, ambient_authority())?;
        directory.read_to_string(Path::new(&file_name))
    }

    /// Write bytes to a file through `cap_std`.
    pub fn write_file(path: &Path, contents: &[u8]) -> io::Result<()> {
        let (parent, file_name) = parent_and_file_name(path)?;
        let directory = Dir::open_ambient_dir(parent, ambient_authority())?;
        directory.write(Path::new(&file_name), contents)
    }

    /// Return true when `path` exists, false when it does not.
    pub fn path_exists(path: &Path) -> bool {
        let Ok((parent, file_name)) = parent_and_file_name(path) else {
            return false;
        };
        let Ok(directory) = Dir::open_ambient_dir(parent, ambient_authority()) else {
            return false;
        };
        directory.exists(Path::new(&file_name))
    }

    fn parent_and_file_name(path: &Path) -> io::Result<(&Path, OsString)> {
        let parent = path.parent().unwrap_or_else(|| Path::new("."));
        let file_name = path.file_name().ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::InvalidInput,
                "path must include a file or directory name",
            )
        })?;
        Ok((parent, file_name.to_os_string()))
    }
}

mod clocks;
mod invoices;

/// Fresh temporary data directory, removed when the handle drops.
///
/// # Panics
///
/// Panics when the system temporary directory is not writable.
pub fn temp_data_dir() -> tempfile::TempDir {
    tempfile::Builder::new()
        .prefix("nfe-bot-data")
        .tempdir()
        .unwrap_or_else(|error| panic!("temporary data directory: {error}"))
}

pub use clocks::{ImmediateSleeper, ManualMonotonicClock, MutableClock, NoJitter, RecordingSleeper};
pub use invoices::{
    SampleDocument, SampleItem, access_key, sample_key, sample_record, sample_reference,
    sample_url,
};
