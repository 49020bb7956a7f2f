//! Line-oriented console transport.
//!
//! Each input line is one chat message. A line may start with `@<user-id>`
//! to act as another user; otherwise the driver's default user sends it.
//! Lines are handled concurrently and every reply is prefixed with the
//! `[n]` index of the line that produced it, so interleaved output stays
//! attributable.

use std::io;
use std::sync::Arc;

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::{debug, warn};

use super::chat::{parse_command, render_error, render_reply};
use crate::domain::{CommandRequest, CommandService, UserId};

const DISPLAY_NAME: &str = "console";

/// Drives a [`CommandService`] from a text stream.
pub struct ConsoleDriver {
    service: Arc<CommandService>,
    default_user: UserId,
}

impl ConsoleDriver {
    /// Driver sending lines as `default_user` unless they name another.
    pub fn new(service: Arc<CommandService>, default_user: UserId) -> Self {
        Self {
            service,
            default_user,
        }
    }

    /// Read lines until end of input, writing one reply block per line.
    ///
    /// # Errors
    ///
    /// Returns an error when reading input or writing output fails.
    pub async fn run<R, W>(&self, input: R, output: W) -> io::Result<()>
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let (tx, rx) = mpsc::unbounded_channel::<String>();
        let writer = tokio::spawn(write_replies(rx, output));

        let mut lines = input.lines();
        let mut handlers = JoinSet::new();
        let mut index = 0_usize;
        while let Some(line) = lines.next_line().await? {
            let line = line.trim().to_owned();
            if line.is_empty() {
                continue;
            }
            index += 1;
            reap_finished(&mut handlers);
            let service = self.service.clone();
            let tx = tx.clone();
            let default_user = self.default_user;
            handlers.spawn(async move {
                let reply = handle_line(&service, default_user, &line).await;
                if tx.send(format!("[{index}] {reply}")).is_err() {
                    debug!(index, "console output closed before reply was written");
                }
            });
        }

        while let Some(joined) = handlers.join_next().await {
            log_handler_failure(joined);
        }
        drop(tx);
        writer
            .await
            .map_err(|error| io::Error::other(error.to_string()))?
    }
}

/// Drop handlers that already finished so the set only holds live lines.
fn reap_finished(handlers: &mut JoinSet<()>) {
    while let Some(joined) = handlers.try_join_next() {
        log_handler_failure(joined);
    }
}

fn log_handler_failure(joined: Result<(), tokio::task::JoinError>) {
    if let Err(error) = joined {
        warn!(%error, "console handler task failed");
    }
}

async fn write_replies<W>(mut rx: mpsc::UnboundedReceiver<String>, mut output: W) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    while let Some(reply) = rx.recv().await {
        output.write_all(reply.as_bytes()).await?;
        output.write_all(b"\n").await?;
        output.flush().await?;
    }
    output.shutdown().await
}

async fn handle_line(service: &CommandService, default_user: UserId, line: &str) -> String {
    let (user, text) = split_sender(line, default_user);
    let command = match parse_command(text) {
        Ok(command) => command,
        Err(error) => return render_error(&error),
    };
    let request = CommandRequest {
        user,
        display_name: Some(DISPLAY_NAME.to_owned()),
        command,
    };
    match service.handle(request).await {
        Ok(reply) => render_reply(&reply),
        Err(error) => render_error(&error),
    }
}

/// Split an optional `@<user-id>` prefix off `line`.
fn split_sender(line: &str, default_user: UserId) -> (UserId, &str) {
    let Some(rest) = line.strip_prefix('@') else {
        return (default_user, line);
    };
    let (raw_id, text) = rest.split_once(char::is_whitespace).unwrap_or((rest, ""));
    match raw_id.parse::<i64>() {
        Ok(id) => (UserId::new(id), text.trim_start()),
        Err(_) => (default_user, line),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ports::{
        FixtureActivitySnapshotStore, FixtureInvoiceStore, FixtureLogSource,
        FixtureOperatorAlerts, FixtureQrDecoder, FixtureReportRenderer, FixtureRoleSnapshotStore,
    };
    use crate::domain::{
        AccessControlGate, ActivityTracker, CommandServiceParts, PortalRegistry,
        RateLimitIntervals, RateLimiter, ReportAggregator, SubmissionPipeline, SubmissionPorts,
    };
    use crate::test_support::{ManualMonotonicClock, MutableClock};
    use chrono::Utc;
    use mockable::Clock;
    use rstest::rstest;
    use tokio::io::{AsyncReadExt, BufReader};

    const ADMIN: UserId = UserId::new(1);

    fn service() -> Arc<CommandService> {
        let clock: Arc<dyn Clock> = Arc::new(MutableClock::new(Utc::now()));
        let gate = Arc::new(AccessControlGate::new(Some(ADMIN)));
        let limiter = Arc::new(RateLimiter::new(
            RateLimitIntervals::default(),
            Arc::new(ManualMonotonicClock::new()),
        ));
        let store = Arc::new(FixtureInvoiceStore);
        let alerts = Arc::new(FixtureOperatorAlerts);
        let pipeline = Arc::new(SubmissionPipeline::new(
            gate.clone(),
            limiter.clone(),
            Arc::new(PortalRegistry::builder().build(clock.clone())),
            SubmissionPorts::new(store.clone(), Arc::new(FixtureQrDecoder), alerts.clone()),
            clock.clone(),
        ));
        Arc::new(CommandService::new(CommandServiceParts {
            gate,
            limiter,
            activity: Arc::new(ActivityTracker::new()),
            activity_store: Arc::new(FixtureActivitySnapshotStore::default()),
            pipeline,
            aggregator: ReportAggregator::new(store, clock.clone()),
            renderer: Arc::new(FixtureReportRenderer),
            logs: Arc::new(FixtureLogSource),
            snapshots: Arc::new(FixtureRoleSnapshotStore::default()),
            alerts,
            clock,
        }))
    }

    async fn run_lines(input: &str) -> Vec<String> {
        let driver = ConsoleDriver::new(service(), ADMIN);
        let (output, mut reader) = tokio::io::duplex(64 * 1024);
        driver
            .run(BufReader::new(input.as_bytes()), output)
            .await
            .expect("console run");
        let mut written = String::new();
        reader
            .read_to_string(&mut written)
            .await
            .expect("read output");
        let mut blocks: Vec<String> = Vec::new();
        for line in written.lines() {
            if line.starts_with('[') || blocks.is_empty() {
                blocks.push(line.to_owned());
            } else if let Some(last) = blocks.last_mut() {
                last.push('\n');
                last.push_str(line);
            }
        }
        blocks.sort();
        blocks
    }

    #[rstest]
    #[case("@42 whoami", UserId::new(42), "whoami")]
    #[case("@42", UserId::new(42), "")]
    #[case("whoami", ADMIN, "whoami")]
    #[case("@bot whoami", ADMIN, "@bot whoami")]
    fn splits_optional_sender_prefix(
        #[case] line: &str,
        #[case] user: UserId,
        #[case] text: &str,
    ) {
        assert_eq!(split_sender(line, ADMIN), (user, text));
    }

    #[tokio::test]
    async fn replies_are_indexed_by_input_line() {
        let blocks = run_lines("whoami\n\n@42 whoami\n").await;
        assert_eq!(blocks.len(), 2);
        assert!(blocks[0].starts_with("[1] User 1"), "{blocks:?}");
        assert!(blocks[1].starts_with("[2] User 42"), "{blocks:?}");
    }

    #[tokio::test]
    async fn errors_are_rendered_with_their_code() {
        let blocks = run_lines("@42 grant-role 7 admin\nfrobnicate\n").await;
        assert_eq!(blocks.len(), 2);
        assert!(blocks[0].ends_with("[access_denied]"), "{blocks:?}");
        assert!(blocks[1].ends_with("[invalid_command]"), "{blocks:?}");
    }

    #[tokio::test]
    async fn empty_input_writes_nothing() {
        assert!(run_lines("").await.is_empty());
    }

    #[tokio::test]
    async fn finished_handlers_are_reaped_without_waiting() {
        let mut handlers = JoinSet::new();
        for _ in 0..3 {
            handlers.spawn(async {});
        }
        let pending = handlers.spawn(std::future::pending::<()>());
        while handlers.len() > 1 {
            tokio::task::yield_now().await;
            reap_finished(&mut handlers);
        }
        assert_eq!(handlers.len(), 1);
        pending.abort();
    }
}
