//! Port abstraction for idempotent invoice persistence.
//!
//! [`InvoiceStore::put`] is an atomic put-if-absent keyed by the invoice
//! fingerprint. A second put of the same fingerprint returns the existing
//! record as [`PutOutcome::Duplicate`] and writes nothing.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::define_port_error;
use crate::domain::{AccessKey, Invoice, LineItem, ReportScope, StoredRecord};

define_port_error! {
    /// Errors raised by invoice store adapters.
    pub enum InvoiceStoreError {
        /// Underlying storage could not be read or written.
        Io { message: String } => "invoice store i/o failed: {message}",
        /// A row could not be encoded or decoded.
        Serialization { message: String } => "invoice store serialization failed: {message}",
    }
}

/// Result of a put-if-absent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PutOutcome {
    /// The record was written.
    Stored(StoredRecord),
    /// A record with the same fingerprint already existed; it is returned
    /// unchanged.
    Duplicate(StoredRecord),
}

impl PutOutcome {
    /// The stored (or pre-existing) record.
    pub fn record(&self) -> &StoredRecord {
        match self {
            Self::Stored(record) | Self::Duplicate(record) => record,
        }
    }

    /// Whether the put hit an existing record.
    pub fn is_duplicate(&self) -> bool {
        matches!(self, Self::Duplicate(_))
    }
}

/// Half-open time range `(start, end]` over emission timestamps.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeRange {
    /// Exclusive lower bound.
    pub start: DateTime<Utc>,
    /// Inclusive upper bound.
    pub end: DateTime<Utc>,
}

impl TimeRange {
    /// Whether `instant` falls inside the range.
    pub fn contains(&self, instant: DateTime<Utc>) -> bool {
        self.start < instant && instant <= self.end
    }
}

/// Finite, restartable sequence of records matching a query.
///
/// Every call to [`RecordSet::iter`] starts again from the first record of
/// the same snapshot.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecordSet {
    records: Arc<[StoredRecord]>,
}

impl RecordSet {
    /// Wrap a snapshot of records.
    pub fn new(records: Vec<StoredRecord>) -> Self {
        Self {
            records: records.into(),
        }
    }

    /// Iterate from the first record.
    pub fn iter(&self) -> std::slice::Iter<'_, StoredRecord> {
        self.records.iter()
    }

    /// Number of records.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether the set is empty.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

impl<'a> IntoIterator for &'a RecordSet {
    type Item = &'a StoredRecord;
    type IntoIter = std::slice::Iter<'a, StoredRecord>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// Port for fingerprint-keyed invoice storage.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait InvoiceStore: Send + Sync {
    /// Store an invoice unless its fingerprint is already present.
    async fn put(
        &self,
        invoice: Invoice,
        line_items: Vec<LineItem>,
    ) -> Result<PutOutcome, InvoiceStoreError>;

    /// Find a stored record by access key.
    async fn find_by_access_key(
        &self,
        key: &AccessKey,
    ) -> Result<Option<StoredRecord>, InvoiceStoreError>;

    /// Records emitted inside `range` and matching `scope`, oldest first.
    async fn query(
        &self,
        range: TimeRange,
        scope: ReportScope,
    ) -> Result<RecordSet, InvoiceStoreError>;

    /// Number of stored invoices.
    async fn count(&self) -> Result<usize, InvoiceStoreError>;
}

/// Fixture implementation that stores nothing and finds nothing.
#[derive(Debug, Default)]
pub struct FixtureInvoiceStore;

#[async_trait]
impl InvoiceStore for FixtureInvoiceStore {
    async fn put(
        &self,
        invoice: Invoice,
        line_items: Vec<LineItem>,
    ) -> Result<PutOutcome, InvoiceStoreError> {
        Ok(PutOutcome::Stored(StoredRecord {
            invoice,
            line_items,
        }))
    }

    async fn find_by_access_key(
        &self,
        _key: &AccessKey,
    ) -> Result<Option<StoredRecord>, InvoiceStoreError> {
        Ok(None)
    }

    async fn query(
        &self,
        _range: TimeRange,
        _scope: ReportScope,
    ) -> Result<RecordSet, InvoiceStoreError> {
        Ok(RecordSet::default())
    }

    async fn count(&self) -> Result<usize, InvoiceStoreError> {
        Ok(0)
    }
}
