//! Tracing subscriber setup and the in-memory log ring.
//!
//! JSON events go to stderr, filtered by `RUST_LOG` (default `info`). The
//! same events are also formatted as single lines into a bounded
//! [`LogRing`], which backs the `view-logs` command.

use std::collections::VecDeque;
use std::fmt::{self, Write as _};
use std::sync::{Arc, Mutex};

use chrono::{SecondsFormat, Utc};
use tracing::field::{Field, Visit};
use tracing::{Event, Subscriber};
use tracing_subscriber::layer::{Context, SubscriberExt};
use tracing_subscriber::util::{SubscriberInitExt, TryInitError};
use tracing_subscriber::{EnvFilter, Layer, fmt as tracing_fmt};

use crate::domain::ports::LogSource;

/// Lines kept by [`LogRing::default`].
pub const DEFAULT_LOG_RING_CAPACITY: usize = 300;

/// Bounded buffer of recently formatted log lines.
#[derive(Debug, Clone)]
pub struct LogRing {
    lines: Arc<Mutex<VecDeque<String>>>,
    capacity: usize,
}

impl LogRing {
    /// Ring keeping the last `capacity` lines.
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            lines: Arc::new(Mutex::new(VecDeque::with_capacity(capacity))),
            capacity,
        }
    }

    fn push(&self, line: String) {
        let mut lines = match self.lines.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if lines.len() == self.capacity {
            lines.pop_front();
        }
        lines.push_back(line);
    }
}

impl Default for LogRing {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_LOG_RING_CAPACITY)
    }
}

impl LogSource for LogRing {
    fn recent(&self, limit: usize) -> Vec<String> {
        let lines = match self.lines.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let skip = lines.len().saturating_sub(limit);
        lines.iter().skip(skip).cloned().collect()
    }
}

#[derive(Default)]
struct LineVisitor {
    message: String,
    fields: String,
}

impl Visit for LineVisitor {
    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            self.message.push_str(value);
        } else {
            let _ignored = write!(self.fields, " {}={value}", field.name());
        }
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        if field.name() == "message" {
            let _ignored = write!(self.message, "{value:?}");
        } else {
            let _ignored = write!(self.fields, " {}={value:?}", field.name());
        }
    }
}

impl<S: Subscriber> Layer<S> for LogRing {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let mut visitor = LineVisitor::default();
        event.record(&mut visitor);
        let metadata = event.metadata();
        self.push(format!(
            "{} {:>5} {}: {}{}",
            Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
            metadata.level(),
            metadata.target(),
            visitor.message,
            visitor.fields
        ));
    }
}

/// Install the global subscriber: env filter, JSON to stderr, and `ring`.
///
/// # Errors
///
/// Returns an error when a global subscriber is already installed.
pub fn init_tracing(ring: LogRing) -> Result<(), TryInitError> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_fmt::layer().json().with_writer(std::io::stderr))
        .with(ring)
        .try_init()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing::{info, warn};
    use tracing_subscriber::registry;

    #[test]
    fn captures_formatted_events() {
        let ring = LogRing::default();
        let subscriber = registry().with(ring.clone());
        tracing::subscriber::with_default(subscriber, || {
            info!(user_id = 7, "invoice acknowledged");
            warn!(target: "operator", operation = "put", "storage failure");
        });

        let lines = ring.recent(10);
        assert_eq!(lines.len(), 2);
        assert!(lines[0].contains(" INFO "));
        assert!(lines[0].ends_with("invoice acknowledged user_id=7"));
        assert!(lines[1].contains("WARN operator: storage failure operation=put"));
    }

    #[test]
    fn keeps_only_the_newest_lines() {
        let ring = LogRing::with_capacity(3);
        let subscriber = registry().with(ring.clone());
        tracing::subscriber::with_default(subscriber, || {
            for n in 0..5 {
                info!("event {n}");
            }
        });

        let lines = ring.recent(10);
        assert_eq!(lines.len(), 3);
        assert!(lines[0].ends_with("event 2"));
        assert!(lines[2].ends_with("event 4"));
        assert_eq!(ring.recent(1).len(), 1);
        assert!(ring.recent(1)[0].ends_with("event 4"));
    }
}
