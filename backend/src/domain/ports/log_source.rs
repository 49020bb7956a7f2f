//! Port exposing recently captured log lines.

/// Read access to the in-memory log buffer.
#[cfg_attr(test, mockall::automock)]
pub trait LogSource: Send + Sync {
    /// Up to `limit` most recent lines, oldest first.
    fn recent(&self, limit: usize) -> Vec<String>;
}

/// Fixture source with no lines.
#[derive(Debug, Clone, Copy, Default)]
pub struct FixtureLogSource;

impl LogSource for FixtureLogSource {
    fn recent(&self, _limit: usize) -> Vec<String> {
        Vec::new()
    }
}
