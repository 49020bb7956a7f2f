//! Invoice store adapters.
//!
//! Both adapters share [`RecordIndex`], a concurrent fingerprint index with
//! an access-key side table. The JSON-lines adapter additionally appends
//! every committed record to `invoices.jsonl` and replays it on open.

mod index;
mod jsonl;
mod memory;

pub use jsonl::{INVOICES_FILENAME, JsonlInvoiceStore};
pub use memory::InMemoryInvoiceStore;

use index::RecordIndex;
