//! Port for escalating operationally fatal failures to operators.

use async_trait::async_trait;

/// Alert raised when persistence fails.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageAlert {
    /// Operation that failed (`put`, `query`, ...).
    pub operation: String,
    /// Adapter diagnostic.
    pub message: String,
}

/// Port for operator notifications.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait OperatorAlerts: Send + Sync {
    /// Report a storage failure.
    async fn storage_failure(&self, alert: &StorageAlert);
}

/// Fixture implementation that drops alerts.
#[derive(Debug, Clone, Copy, Default)]
pub struct FixtureOperatorAlerts;

#[async_trait]
impl OperatorAlerts for FixtureOperatorAlerts {
    async fn storage_failure(&self, _alert: &StorageAlert) {}
}
