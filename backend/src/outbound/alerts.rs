//! Operator alerts delivered through the log pipeline.

use async_trait::async_trait;
use tracing::error;

use crate::domain::ports::{OperatorAlerts, StorageAlert};

/// Logs alerts at `error` under the `operator` target, so log routing can
/// page whoever watches that target.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingOperatorAlerts;

#[async_trait]
impl OperatorAlerts for TracingOperatorAlerts {
    async fn storage_failure(&self, alert: &StorageAlert) {
        error!(
            target: "operator",
            operation = %alert.operation,
            message = %alert.message,
            "storage failure needs operator attention"
        );
    }
}
