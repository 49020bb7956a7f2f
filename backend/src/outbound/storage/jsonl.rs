//! Append-only JSON-lines invoice store.
//!
//! Every committed record is one line of `invoices.jsonl` inside the data
//! directory. Opening the store replays the file into memory; afterwards
//! reads are served from the index and only commits touch the file.
//! Concurrent puts of one fingerprint queue on a per-fingerprint async lock,
//! so exactly one of them appends.
//!
//! A failed append truncates the file back to its previous length. Lines
//! that still fail to decode on open are moved to `invoices.rejected.jsonl`
//! and the log is rewritten without them.

use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use cap_std::fs::{Dir, File, OpenOptions};
use cap_std::ambient_authority;
use dashmap::DashMap;
use tracing::{debug, info, warn};

use super::RecordIndex;
use crate::domain::ports::{InvoiceStore, InvoiceStoreError, PutOutcome, RecordSet, TimeRange};
use crate::domain::{AccessKey, Fingerprint, Invoice, LineItem, ReportScope, StoredRecord};

/// File name of the invoice log inside the data directory.
pub const INVOICES_FILENAME: &str = "invoices.jsonl";
/// Undecodable lines set aside while opening the log.
pub const REJECTED_FILENAME: &str = "invoices.rejected.jsonl";

#[derive(Debug)]
struct LogWriter {
    file: File,
    // A partial line could not be rolled back; start the next record on a
    // fresh line.
    needs_newline: bool,
}

/// Durable invoice store backed by a JSON-lines file.
#[derive(Debug)]
pub struct JsonlInvoiceStore {
    index: RecordIndex,
    slots: DashMap<Fingerprint, Arc<tokio::sync::Mutex<()>>>,
    writer: Mutex<LogWriter>,
    path: PathBuf,
}

impl JsonlInvoiceStore {
    /// Open (creating if needed) the store inside `data_dir`.
    ///
    /// # Errors
    ///
    /// Returns [`InvoiceStoreError::Io`] when the directory or file cannot
    /// be opened or repaired.
    pub fn open(data_dir: &Path) -> Result<Self, InvoiceStoreError> {
        Dir::create_ambient_dir_all(data_dir, ambient_authority())
            .map_err(|error| io_error(data_dir, &error))?;
        let dir = Dir::open_ambient_dir(data_dir, ambient_authority())
            .map_err(|error| io_error(data_dir, &error))?;
        let path = data_dir.join(INVOICES_FILENAME);

        let index = RecordIndex::default();
        match dir.read_to_string(INVOICES_FILENAME) {
            Ok(contents) => {
                let replayed = replay(&contents, &index);
                if !replayed.rejected.is_empty() {
                    set_aside(&dir, data_dir, &replayed.rejected)?;
                }
                if replayed.needs_rewrite {
                    rewrite(&dir, &path, &replayed.kept)?;
                }
            }
            Err(error) if error.kind() == io::ErrorKind::NotFound => {}
            Err(error) => return Err(io_error(&path, &error)),
        }

        let file = dir
            .open_with(
                INVOICES_FILENAME,
                OpenOptions::new().create(true).append(true),
            )
            .map_err(|error| io_error(&path, &error))?;
        info!(path = %path.display(), invoices = index.len(), "invoice store opened");

        Ok(Self {
            index,
            slots: DashMap::new(),
            writer: Mutex::new(LogWriter {
                file,
                needs_newline: false,
            }),
            path,
        })
    }

    fn append(&self, record: StoredRecord) -> Result<PutOutcome, InvoiceStoreError> {
        let encoded = serde_json::to_string(&record)
            .map_err(|error| InvoiceStoreError::serialization(error.to_string()))?;
        let mut writer = self
            .writer
            .lock()
            .map_err(|_| InvoiceStoreError::io("invoice writer lock poisoned"))?;
        let mut line = String::with_capacity(encoded.len() + 2);
        if writer.needs_newline {
            line.push('\n');
        }
        line.push_str(&encoded);
        line.push('\n');

        let length = writer
            .file
            .metadata()
            .map_err(|error| io_error(&self.path, &error))?
            .len();
        let written = writer
            .file
            .write_all(line.as_bytes())
            .and_then(|()| writer.file.flush())
            .and_then(|()| writer.file.sync_data());
        if let Err(error) = written {
            match writer.file.set_len(length) {
                Ok(()) => debug!(length, "rolled back partial invoice line"),
                Err(rollback) => {
                    warn!(%rollback, "partial invoice line could not be rolled back");
                    writer.needs_newline = true;
                }
            }
            return Err(io_error(&self.path, &error));
        }
        writer.needs_newline = false;
        drop(writer);

        Ok(self.index.insert_if_absent(record))
    }

    fn release_slot(&self, fingerprint: &Fingerprint, slot: Arc<tokio::sync::Mutex<()>>) {
        drop(slot);
        // Only the map still holds it: nobody else is queued.
        self.slots
            .remove_if(fingerprint, |_, slot| Arc::strong_count(slot) == 1);
    }
}

/// Outcome of replaying the log.
struct Replayed {
    /// Decodable lines, newline terminated.
    kept: String,
    /// Lines that failed to decode.
    rejected: String,
    needs_rewrite: bool,
}

/// Load every decodable record into `index`.
fn replay(contents: &str, index: &RecordIndex) -> Replayed {
    let mut kept = String::with_capacity(contents.len());
    let mut rejected = String::new();
    for (number, line) in contents
        .lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
    {
        match serde_json::from_str::<StoredRecord>(line) {
            Ok(record) => {
                index.insert_if_absent(record);
                kept.push_str(line);
                kept.push('\n');
            }
            Err(error) => {
                warn!(line = number + 1, %error, "setting aside undecodable invoice line");
                rejected.push_str(line);
                rejected.push('\n');
            }
        }
    }
    let unterminated = !contents.is_empty() && !contents.ends_with('\n');
    let needs_rewrite = unterminated || !rejected.is_empty();
    Replayed {
        kept,
        rejected,
        needs_rewrite,
    }
}

fn set_aside(dir: &Dir, data_dir: &Path, rejected: &str) -> Result<(), InvoiceStoreError> {
    let path = data_dir.join(REJECTED_FILENAME);
    let mut file = dir
        .open_with(
            REJECTED_FILENAME,
            OpenOptions::new().create(true).append(true),
        )
        .map_err(|error| io_error(&path, &error))?;
    file.write_all(rejected.as_bytes())
        .and_then(|()| file.sync_data())
        .map_err(|error| io_error(&path, &error))
}

fn rewrite(dir: &Dir, path: &Path, contents: &str) -> Result<(), InvoiceStoreError> {
    let staging = format!(".{INVOICES_FILENAME}.tmp");
    dir.write(&staging, contents.as_bytes())
        .and_then(|()| dir.rename(&staging, dir, INVOICES_FILENAME))
        .map_err(|error| io_error(path, &error))
}

fn io_error(path: &Path, error: &io::Error) -> InvoiceStoreError {
    InvoiceStoreError::io(format!("{}: {error}", path.display()))
}

#[async_trait]
impl InvoiceStore for JsonlInvoiceStore {
    async fn put(
        &self,
        invoice: Invoice,
        line_items: Vec<LineItem>,
    ) -> Result<PutOutcome, InvoiceStoreError> {
        let fingerprint = invoice.fingerprint.clone();
        if let Some(existing) = self.index.get(&fingerprint) {
            return Ok(PutOutcome::Duplicate(existing));
        }

        let slot = Arc::clone(self.slots.entry(fingerprint.clone()).or_default().value());
        let guard = slot.lock().await;
        let outcome = match self.index.get(&fingerprint) {
            Some(existing) => {
                debug!(%fingerprint, "fingerprint committed while waiting for its slot");
                Ok(PutOutcome::Duplicate(existing))
            }
            None => self.append(StoredRecord {
                invoice,
                line_items,
            }),
        };
        drop(guard);
        self.release_slot(&fingerprint, slot);
        outcome
    }

    async fn find_by_access_key(
        &self,
        key: &AccessKey,
    ) -> Result<Option<StoredRecord>, InvoiceStoreError> {
        Ok(self.index.find_by_access_key(key))
    }

    async fn query(
        &self,
        range: TimeRange,
        scope: ReportScope,
    ) -> Result<RecordSet, InvoiceStoreError> {
        Ok(self.index.query(range, scope))
    }

    async fn count(&self) -> Result<usize, InvoiceStoreError> {
        Ok(self.index.len())
    }
}
