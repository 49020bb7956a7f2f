//! Bot configuration loaded via OrthoConfig.
//!
//! Values come from a configuration file, `NFBOT_*` environment variables
//! and CLI flags, later sources overriding earlier ones.

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use ortho_config::OrthoConfig;
use serde::Deserialize;

use crate::domain::{FetchRetryPolicy, UserId};

const DEFAULT_DATA_DIR: &str = "data";
const DEFAULT_FETCH_TIMEOUT_SECS: u64 = 15;

/// Configuration values consumed at startup.
#[derive(Clone, Deserialize, OrthoConfig)]
#[ortho_config(prefix = "NFBOT")]
pub struct BotSettings {
    /// Chat platform credential. Only checked for presence here.
    pub bot_token: Option<String>,
    /// User that always holds the admin role.
    pub seed_admin: Option<i64>,
    /// Directory holding `invoices.jsonl` and `roles.json`.
    pub data_dir: Option<PathBuf>,
    /// Per-request portal timeout in seconds.
    pub fetch_timeout_secs: Option<u64>,
    /// Portal attempts per submission, including the first.
    pub fetch_max_attempts: Option<u32>,
    /// First retry delay in milliseconds.
    pub fetch_initial_backoff_ms: Option<u64>,
    /// Retry delay cap in milliseconds.
    pub fetch_max_backoff_ms: Option<u64>,
}

impl fmt::Debug for BotSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BotSettings")
            .field("bot_token", &self.bot_token.as_ref().map(|_| "<redacted>"))
            .field("seed_admin", &self.seed_admin)
            .field("data_dir", &self.data_dir)
            .field("fetch_timeout_secs", &self.fetch_timeout_secs)
            .field("fetch_max_attempts", &self.fetch_max_attempts)
            .field("fetch_initial_backoff_ms", &self.fetch_initial_backoff_ms)
            .field("fetch_max_backoff_ms", &self.fetch_max_backoff_ms)
            .finish()
    }
}

impl BotSettings {
    /// Seed admin identity, if configured.
    pub fn seed_admin(&self) -> Option<UserId> {
        self.seed_admin.map(UserId::new)
    }

    /// Data directory, defaulting to `./data`.
    pub fn data_dir(&self) -> PathBuf {
        self.data_dir
            .clone()
            .unwrap_or_else(|| PathBuf::from(DEFAULT_DATA_DIR))
    }

    /// Portal request timeout.
    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(
            self.fetch_timeout_secs
                .unwrap_or(DEFAULT_FETCH_TIMEOUT_SECS)
                .max(1),
        )
    }

    /// Retry policy with configured overrides applied.
    pub fn retry_policy(&self) -> FetchRetryPolicy {
        let defaults = FetchRetryPolicy::default();
        FetchRetryPolicy {
            max_attempts: self.fetch_max_attempts.unwrap_or(defaults.max_attempts).max(1),
            initial_backoff: self
                .fetch_initial_backoff_ms
                .map_or(defaults.initial_backoff, Duration::from_millis),
            max_backoff: self
                .fetch_max_backoff_ms
                .map_or(defaults.max_backoff, Duration::from_millis),
        }
    }

    /// Whether a non-blank bot credential was supplied.
    pub fn has_bot_token(&self) -> bool {
        self.bot_token
            .as_deref()
            .is_some_and(|token| !token.trim().is_empty())
    }
}
