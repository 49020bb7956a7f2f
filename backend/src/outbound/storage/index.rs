//! Concurrent in-memory index of stored records.

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;

use crate::domain::ports::{PutOutcome, RecordSet, TimeRange};
use crate::domain::{AccessKey, Fingerprint, ReportScope, StoredRecord};

#[derive(Debug, Default)]
pub(crate) struct RecordIndex {
    by_fingerprint: DashMap<Fingerprint, StoredRecord>,
    by_access_key: DashMap<AccessKey, Fingerprint>,
}

impl RecordIndex {
    pub(crate) fn get(&self, fingerprint: &Fingerprint) -> Option<StoredRecord> {
        self.by_fingerprint
            .get(fingerprint)
            .map(|entry| entry.value().clone())
    }

    /// Insert `record` unless its fingerprint is present. The check and the
    /// insert happen under one shard lock.
    pub(crate) fn insert_if_absent(&self, record: StoredRecord) -> PutOutcome {
        match self.by_fingerprint.entry(record.invoice.fingerprint.clone()) {
            Entry::Occupied(existing) => PutOutcome::Duplicate(existing.get().clone()),
            Entry::Vacant(slot) => {
                slot.insert(record.clone());
                self.by_access_key.insert(
                    record.invoice.header.access_key.clone(),
                    record.invoice.fingerprint.clone(),
                );
                PutOutcome::Stored(record)
            }
        }
    }

    pub(crate) fn find_by_access_key(&self, key: &AccessKey) -> Option<StoredRecord> {
        let fingerprint = self.by_access_key.get(key)?.value().clone();
        self.get(&fingerprint)
    }

    pub(crate) fn query(&self, range: TimeRange, scope: ReportScope) -> RecordSet {
        let mut records: Vec<StoredRecord> = self
            .by_fingerprint
            .iter()
            .filter(|entry| range.contains(entry.invoice.header.emitted_at))
            .filter(|entry| scope.includes(entry.value()))
            .map(|entry| entry.value().clone())
            .collect();
        records.sort_by(|a, b| {
            a.invoice
                .header
                .emitted_at
                .cmp(&b.invoice.header.emitted_at)
                .then_with(|| a.invoice.fingerprint.cmp(&b.invoice.fingerprint))
        });
        RecordSet::new(records)
    }

    pub(crate) fn len(&self) -> usize {
        self.by_fingerprint.len()
    }
}
