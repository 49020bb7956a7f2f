//! Domain ports and supporting types for the hexagonal boundary.
//!
//! Driven ports cover persistence (invoices, roles and activity), portal
//! access and the external collaborators (QR decoding, report rendering,
//! operator alerts, captured logs). Each port ships a fixture implementation
//! for tests and ephemeral runs; adapters live under `crate::outbound`.

mod macros;
pub(crate) use macros::define_port_error;

mod activity_snapshot_store;
mod invoice_store;
mod log_source;
mod operator_alerts;
mod portal_adapter;
mod qr_decoder;
mod report_renderer;
mod role_snapshot_store;

#[cfg(test)]
pub use activity_snapshot_store::MockActivitySnapshotStore;
pub use activity_snapshot_store::{
    ActivitySnapshotStore, ActivitySnapshotStoreError, FixtureActivitySnapshotStore,
};
#[cfg(test)]
pub use invoice_store::MockInvoiceStore;
pub use invoice_store::{
    FixtureInvoiceStore, InvoiceStore, InvoiceStoreError, PutOutcome, RecordSet, TimeRange,
};
#[cfg(test)]
pub use log_source::MockLogSource;
pub use log_source::{FixtureLogSource, LogSource};
#[cfg(test)]
pub use operator_alerts::MockOperatorAlerts;
pub use operator_alerts::{FixtureOperatorAlerts, OperatorAlerts, StorageAlert};
#[cfg(test)]
pub use portal_adapter::MockPortalAdapter;
pub use portal_adapter::{
    DocumentFormat, FixturePortalAdapter, PortalAdapter, PortalFetchError, RawDocument,
};
#[cfg(test)]
pub use qr_decoder::MockQrDecoder;
pub use qr_decoder::{FixtureQrDecoder, QrDecodeError, QrDecoder};
#[cfg(test)]
pub use report_renderer::MockReportRenderer;
pub use report_renderer::{
    FixtureReportRenderer, RenderedReport, ReportRenderError, ReportRenderer,
};
#[cfg(test)]
pub use role_snapshot_store::MockRoleSnapshotStore;
pub use role_snapshot_store::{
    FixtureRoleSnapshotStore, RoleSnapshotStore, RoleSnapshotStoreError,
};

#[cfg(test)]
mod tests;
