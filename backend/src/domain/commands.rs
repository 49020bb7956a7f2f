//! Command dispatcher.
//!
//! Every inbound command is recorded in the activity tracker, authorised,
//! rate limited where its action class requires it, and executed. The
//! result is a structured [`Reply`]; turning it into chat text or files is
//! the inbound adapter's job.

use std::sync::Arc;

use mockable::Clock;
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};

use super::access::{AccessControlGate, RoleChange};
use super::activity::{ActivityEntry, ActivityTracker};
use super::error::PipelineError;
use super::pipeline::{Acknowledgment, SubmissionInput, SubmissionPipeline};
use super::ports::{
    ActivitySnapshotStore, LogSource, OperatorAlerts, RenderedReport, ReportRenderer,
    RoleSnapshotStore, StorageAlert,
};
use super::rate_limit::{ActionClass, RateLimiter};
use super::report::{ReportAggregator, ReportPeriod, ReportScope, ReportSummary};
use super::user::{Action, Role, UserId};

/// Lines returned by `view-logs` without an explicit count.
pub const DEFAULT_LOG_LINES: usize = 20;
/// Upper bound for `view-logs`.
pub const MAX_LOG_LINES: usize = 100;

/// Typed command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Assign `role` to `target`.
    GrantRole {
        /// User receiving the role.
        target: UserId,
        /// Role to assign.
        role: Role,
    },
    /// Remove `role` from `target`.
    RevokeRole {
        /// User losing the role.
        target: UserId,
        /// Role to remove.
        role: Role,
    },
    /// Show captured log lines.
    ViewLogs {
        /// Requested line count.
        lines: Option<usize>,
    },
    /// List user activity.
    ViewUserActivity,
    /// Show usage statistics.
    ViewStats,
    /// Build a report.
    RequestReport {
        /// Window length.
        period: ReportPeriod,
        /// Restrict to the caller's own submissions.
        own_only: bool,
    },
    /// Ingest an invoice.
    SubmitInvoice(SubmissionInput),
    /// Show the caller's identity.
    WhoAmI,
    /// List available commands.
    Help,
}

impl Command {
    /// Action checked by the access gate.
    pub const fn action(&self) -> Action {
        match self {
            Self::GrantRole { .. } => Action::GrantRole,
            Self::RevokeRole { .. } => Action::RevokeRole,
            Self::ViewLogs { .. } => Action::ViewLogs,
            Self::ViewUserActivity => Action::ViewUserActivity,
            Self::ViewStats => Action::ViewStats,
            Self::RequestReport { .. } => Action::RequestReport,
            Self::SubmitInvoice(_) => Action::SubmitInvoice,
            Self::WhoAmI => Action::WhoAmI,
            Self::Help => Action::Help,
        }
    }
}

/// Command together with its caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandRequest {
    /// Caller identity.
    pub user: UserId,
    /// Caller display name, when the transport provides one.
    pub display_name: Option<String>,
    /// Parsed command.
    pub command: Command,
}

/// Usage line for one command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CommandHelp {
    /// Command name.
    pub command: &'static str,
    /// Argument synopsis.
    pub usage: &'static str,
    /// One-line description.
    pub summary: &'static str,
}

fn help_for(action: Action) -> CommandHelp {
    let (usage, summary) = match action {
        Action::SubmitInvoice => ("submit-invoice <qr-url>", "store an invoice from its QR code"),
        Action::RequestReport => (
            "request-report [day|week|biweek|month] [mine]",
            "summarise stored invoices",
        ),
        Action::WhoAmI => ("whoami", "show your id and roles"),
        Action::Help => ("help", "list the commands you can use"),
        Action::GrantRole => ("grant-role <user-id> <role>", "assign a role"),
        Action::RevokeRole => ("revoke-role <user-id> <role>", "remove a role"),
        Action::ViewLogs => ("view-logs [lines]", "show recent log lines"),
        Action::ViewUserActivity => ("view-user-activity", "list users by last activity"),
        Action::ViewStats => ("stats", "show bot usage statistics"),
    };
    CommandHelp {
        command: action.command_name(),
        usage,
        summary,
    }
}

/// Users whose most privileged role is `role`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RoleCount {
    /// Role.
    pub role: Role,
    /// Known users holding it as their highest role.
    pub users: usize,
}

/// Usage statistics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BotStats {
    /// Users who have interacted with the bot.
    pub users: usize,
    /// Commands received from them.
    pub messages: u64,
    /// Invoices in the store.
    pub invoices: usize,
    /// Highest-role distribution, most privileged first.
    pub roles: Vec<RoleCount>,
}

/// Structured result of a command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Reply {
    /// Role assignment changed (or already had the requested shape).
    RoleChanged {
        /// Target user.
        target: UserId,
        /// Role granted or revoked.
        role: Role,
        /// Whether anything changed.
        change: RoleChange,
        /// Target's roles afterwards.
        roles: Vec<Role>,
    },
    /// Recent log lines, oldest first.
    Logs {
        /// Captured lines.
        lines: Vec<String>,
    },
    /// Activity entries, most recent first.
    UserActivity {
        /// Entries.
        entries: Vec<ActivityEntry>,
    },
    /// Usage statistics.
    Stats {
        /// Counters.
        stats: BotStats,
    },
    /// Aggregated report.
    Report {
        /// Structured summary.
        summary: ReportSummary,
        /// Rendered artifact, absent when rendering failed.
        artifact: Option<RenderedReport>,
    },
    /// Invoice accepted (new or duplicate).
    InvoiceAccepted {
        /// Pipeline acknowledgment.
        acknowledgment: Acknowledgment,
    },
    /// Caller identity.
    WhoAmI {
        /// Caller.
        user: UserId,
        /// Roles held.
        roles: Vec<Role>,
        /// Actions available.
        capabilities: Vec<Action>,
    },
    /// Commands available to the caller.
    Help {
        /// Usage lines.
        commands: Vec<CommandHelp>,
    },
}

/// Collaborators of the [`CommandService`].
pub struct CommandServiceParts {
    /// Role registry.
    pub gate: Arc<AccessControlGate>,
    /// Rate limiter shared with the pipeline.
    pub limiter: Arc<RateLimiter>,
    /// Activity register.
    pub activity: Arc<ActivityTracker>,
    /// Activity persistence.
    pub activity_store: Arc<dyn ActivitySnapshotStore>,
    /// Submission pipeline.
    pub pipeline: Arc<SubmissionPipeline>,
    /// Report aggregator.
    pub aggregator: ReportAggregator,
    /// Report renderer.
    pub renderer: Arc<dyn ReportRenderer>,
    /// Captured logs.
    pub logs: Arc<dyn LogSource>,
    /// Role persistence.
    pub snapshots: Arc<dyn RoleSnapshotStore>,
    /// Operator escalation.
    pub alerts: Arc<dyn OperatorAlerts>,
    /// Wall clock.
    pub clock: Arc<dyn Clock>,
}

/// Executes typed commands.
pub struct CommandService {
    gate: Arc<AccessControlGate>,
    limiter: Arc<RateLimiter>,
    activity: Arc<ActivityTracker>,
    activity_store: Arc<dyn ActivitySnapshotStore>,
    pipeline: Arc<SubmissionPipeline>,
    aggregator: ReportAggregator,
    renderer: Arc<dyn ReportRenderer>,
    logs: Arc<dyn LogSource>,
    snapshots: Arc<dyn RoleSnapshotStore>,
    alerts: Arc<dyn OperatorAlerts>,
    clock: Arc<dyn Clock>,
    // Held from snapshot to completed save, so saves land in order.
    role_save: Mutex<()>,
    activity_save: Mutex<()>,
}

impl CommandService {
    /// Build the service.
    pub fn new(parts: CommandServiceParts) -> Self {
        Self {
            gate: parts.gate,
            limiter: parts.limiter,
            activity: parts.activity,
            activity_store: parts.activity_store,
            pipeline: parts.pipeline,
            aggregator: parts.aggregator,
            renderer: parts.renderer,
            logs: parts.logs,
            snapshots: parts.snapshots,
            alerts: parts.alerts,
            clock: parts.clock,
            role_save: Mutex::new(()),
            activity_save: Mutex::new(()),
        }
    }

    /// Execute `request`.
    ///
    /// # Errors
    ///
    /// Returns the [`PipelineError`] of the first failing step.
    #[instrument(skip(self, request), fields(user_id = %request.user, action = %request.command.action()))]
    pub async fn handle(&self, request: CommandRequest) -> Result<Reply, PipelineError> {
        let CommandRequest {
            user,
            display_name,
            command,
        } = request;
        self.activity.record(
            user,
            display_name.as_deref(),
            self.gate.highest_role(user),
            self.clock.utc(),
        );
        self.persist_activity().await;

        match command {
            Command::SubmitInvoice(input) => {
                let acknowledgment = self.pipeline.submit(user, input).await?;
                Ok(Reply::InvoiceAccepted { acknowledgment })
            }
            Command::GrantRole { target, role } => {
                self.gate.authorize(user, Action::GrantRole)?;
                let change = self.gate.assign_role(user, target, role)?;
                self.persist_roles(target, change).await;
                Ok(self.role_reply(target, role, change))
            }
            Command::RevokeRole { target, role } => {
                self.gate.authorize(user, Action::RevokeRole)?;
                let change = self.gate.revoke_role(user, target, role)?;
                self.persist_roles(target, change).await;
                Ok(self.role_reply(target, role, change))
            }
            Command::ViewLogs { lines } => {
                self.gate.authorize(user, Action::ViewLogs)?;
                let limit = lines
                    .unwrap_or(DEFAULT_LOG_LINES)
                    .clamp(1, MAX_LOG_LINES);
                Ok(Reply::Logs {
                    lines: self.logs.recent(limit),
                })
            }
            Command::ViewUserActivity => {
                self.gate.authorize(user, Action::ViewUserActivity)?;
                Ok(Reply::UserActivity {
                    entries: self.activity.entries(),
                })
            }
            Command::ViewStats => {
                self.gate.authorize(user, Action::ViewStats)?;
                Ok(Reply::Stats {
                    stats: self.stats().await?,
                })
            }
            Command::RequestReport { period, own_only } => {
                self.request_report(user, period, own_only).await
            }
            Command::WhoAmI => {
                self.gate.authorize(user, Action::WhoAmI)?;
                let roles = self.gate.roles(user);
                Ok(Reply::WhoAmI {
                    user,
                    roles: roles.iter().collect(),
                    capabilities: roles.capabilities(),
                })
            }
            Command::Help => {
                self.gate.authorize(user, Action::Help)?;
                let roles = self.gate.roles(user);
                let commands = Action::ALL
                    .into_iter()
                    .filter(|action| roles.permits(*action).is_some())
                    .map(help_for)
                    .collect();
                Ok(Reply::Help { commands })
            }
        }
    }

    async fn request_report(
        &self,
        user: UserId,
        period: ReportPeriod,
        own_only: bool,
    ) -> Result<Reply, PipelineError> {
        self.gate.authorize(user, Action::RequestReport)?;
        self.limiter
            .check(user, ActionClass::RequestReport, Some(period))?;
        let scope = if own_only {
            ReportScope::SubmittedBy(user)
        } else {
            ReportScope::All
        };
        let summary = match self.aggregator.aggregate(period, scope).await {
            Ok(summary) => summary,
            Err(error) => {
                if let PipelineError::StorageError { message } = &error {
                    self.alerts
                        .storage_failure(&StorageAlert {
                            operation: "query".to_owned(),
                            message: message.clone(),
                        })
                        .await;
                }
                return Err(error);
            }
        };
        let artifact = match self.renderer.render(&summary).await {
            Ok(artifact) => Some(artifact),
            Err(error) => {
                warn!(%error, %period, "report rendering failed; replying with summary only");
                None
            }
        };
        info!(%period, invoices = summary.invoice_count, "report produced");
        Ok(Reply::Report { summary, artifact })
    }

    async fn stats(&self) -> Result<BotStats, PipelineError> {
        let entries = self.activity.entries();
        let messages = entries
            .iter()
            .fold(0_u64, |sum, entry| sum.saturating_add(entry.message_count));
        let roles = Role::ALL
            .into_iter()
            .rev()
            .map(|role| RoleCount {
                role,
                users: entries
                    .iter()
                    .filter(|entry| self.gate.highest_role(entry.user) == role)
                    .count(),
            })
            .collect();
        let invoices = self.aggregator.stored_invoices().await?;
        Ok(BotStats {
            users: entries.len(),
            messages,
            invoices,
            roles,
        })
    }

    async fn persist_activity(&self) {
        let _guard = self.activity_save.lock().await;
        let snapshot = self.activity.snapshot();
        if let Err(error) = self.activity_store.save(&snapshot).await {
            // Counters keep growing in memory; the next save catches up.
            warn!(%error, "activity register not saved");
        }
    }

    async fn persist_roles(&self, target: UserId, change: RoleChange) {
        if change == RoleChange::Unchanged {
            return;
        }
        if self
            .activity
            .update_role(target, self.gate.highest_role(target))
        {
            self.persist_activity().await;
        }
        let result = {
            let _guard = self.role_save.lock().await;
            self.snapshots.save(&self.gate.snapshot()).await
        };
        match result {
            Ok(()) => debug!(%target, "role snapshot saved"),
            Err(error) => {
                // The in-memory assignment stays in effect until restart.
                self.alerts
                    .storage_failure(&StorageAlert {
                        operation: "save_roles".to_owned(),
                        message: error.to_string(),
                    })
                    .await;
            }
        }
    }

    fn role_reply(&self, target: UserId, role: Role, change: RoleChange) -> Reply {
        Reply::RoleChanged {
            target,
            role,
            change,
            roles: self.gate.roles(target).iter().collect(),
        }
    }
}

#[cfg(test)]
mod tests;
