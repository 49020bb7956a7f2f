//! Process-local invoice store.

use async_trait::async_trait;

use super::RecordIndex;
use crate::domain::ports::{InvoiceStore, InvoiceStoreError, PutOutcome, RecordSet, TimeRange};
use crate::domain::{AccessKey, Invoice, LineItem, ReportScope, StoredRecord};

/// Invoice store kept entirely in memory.
#[derive(Debug, Default)]
pub struct InMemoryInvoiceStore {
    index: RecordIndex,
}

impl InMemoryInvoiceStore {
    /// Empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl InvoiceStore for InMemoryInvoiceStore {
    async fn put(
        &self,
        invoice: Invoice,
        line_items: Vec<LineItem>,
    ) -> Result<PutOutcome, InvoiceStoreError> {
        Ok(self.index.insert_if_absent(StoredRecord {
            invoice,
            line_items,
        }))
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
