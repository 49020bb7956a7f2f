//! Plain-text rendering of command replies and failures.

use std::fmt::Write as _;

use crate::domain::{PipelineError, Reply, RoleChange};

/// Render `reply` as chat text.
pub fn render_reply(reply: &Reply) -> String {
    let mut out = String::new();
    // Writing into a String cannot fail.
    let _ignored = write_reply(&mut out, reply);
    out
}

/// Render a failed command as chat text, tagged with its stable code.
pub fn render_error(error: &PipelineError) -> String {
    format!("{} [{}]", error.user_message(), error.code().as_str())
}

fn write_reply(out: &mut String, reply: &Reply) -> std::fmt::Result {
    match reply {
        Reply::RoleChanged {
            target,
            role,
            change,
            roles,
        } => {
            let verb = match change {
                RoleChange::Applied => "updated",
                RoleChange::Unchanged => "unchanged",
            };
            let held: Vec<&str> = roles.iter().map(|r| r.as_str()).collect();
            write!(out, "Roles of {target} {verb} ({role}): {}", held.join(", "))
        }
        Reply::Logs { lines } => {
            if lines.is_empty() {
                return out.write_str("No log lines captured yet.");
            }
            out.write_str(&lines.join("\n"))
        }
        Reply::UserActivity { entries } => {
            if entries.is_empty() {
                return out.write_str("No activity recorded yet.");
            }
            for entry in entries {
                writeln!(
                    out,
                    "{} {} [{}] last seen {} ({} commands)",
                    entry.user,
                    entry.display_name.as_deref().unwrap_or("-"),
                    entry.role,
                    entry.last_seen.format("%Y-%m-%d %H:%M UTC"),
                    entry.message_count
                )?;
            }
            Ok(())
        }
        Reply::Stats { stats } => {
            writeln!(out, "Users: {}", stats.users)?;
            writeln!(out, "Messages: {}", stats.messages)?;
            writeln!(out, "Stored invoices: {}", stats.invoices)?;
            let roles: Vec<String> = stats
                .roles
                .iter()
                .map(|count| format!("{} {}", count.role, count.users))
                .collect();
            write!(out, "Roles: {}", roles.join(", "))
        }
        Reply::Report { summary, artifact } => match artifact {
            Some(rendered) if rendered.media_type.starts_with("text/") => {
                out.write_str(&String::from_utf8_lossy(&rendered.bytes))
            }
            Some(rendered) => write!(
                out,
                "Report attached ({}, {} bytes): {} invoices, total R$ {:.2} ({}).",
                rendered.media_type,
                rendered.bytes.len(),
                summary.invoice_count,
                summary.grand_total,
                summary.period
            ),
            None => write!(
                out,
                "Report rendering failed: {} invoices, total R$ {:.2} ({}).",
                summary.invoice_count, summary.grand_total, summary.period
            ),
        },
        Reply::InvoiceAccepted { acknowledgment } => {
            let invoice = &acknowledgment.invoice;
            let lead = if acknowledgment.duplicate {
                "Invoice already stored"
            } else {
                "Invoice stored"
            };
            write!(
                out,
                "{lead}: {} no. {} series {} ({}), {} items, total R$ {:.2}, emitted {}. Fingerprint {}",
                invoice.issuer_name.as_deref().unwrap_or(&invoice.issuer_id),
                invoice.number,
                invoice.series,
                invoice.region,
                invoice.item_count,
                invoice.total,
                invoice.emitted_at.format("%Y-%m-%d %H:%M UTC"),
                acknowledgment.fingerprint
            )
        }
        Reply::WhoAmI {
            user,
            roles,
            capabilities,
        } => {
            let held: Vec<&str> = roles.iter().map(|r| r.as_str()).collect();
            let allowed: Vec<&str> = capabilities.iter().map(|a| a.command_name()).collect();
            write!(
                out,
                "User {user}\nRoles: {}\nCommands: {}",
                held.join(", "),
                allowed.join(", ")
            )
        }
        Reply::Help { commands } => {
            for help in commands {
                writeln!(out, "{:<48} {}", help.usage, help.summary)?;
            }
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Action, BotStats, Role, RoleCount, UserId};

    #[test]
    fn errors_carry_their_code() {
        let text = render_error(&PipelineError::RateLimited {
            retry_after_secs: 40,
        });
        assert_eq!(text, "Too many requests: try again in 40s. [rate_limited]");
    }

    #[test]
    fn whoami_lists_roles_and_commands() {
        let text = render_reply(&Reply::WhoAmI {
            user: UserId::new(7),
            roles: vec![Role::User],
            capabilities: vec![Action::WhoAmI, Action::Help],
        });
        assert_eq!(text, "User 7\nRoles: user\nCommands: whoami, help");
    }

    #[test]
    fn role_changes_name_the_outcome() {
        let text = render_reply(&Reply::RoleChanged {
            target: UserId::new(9),
            role: Role::Moderator,
            change: RoleChange::Unchanged,
            roles: vec![Role::User, Role::Moderator],
        });
        assert_eq!(text, "Roles of 9 unchanged (moderator): user, moderator");
    }

    #[test]
    fn empty_logs_say_so() {
        assert_eq!(
            render_reply(&Reply::Logs { lines: Vec::new() }),
            "No log lines captured yet."
        );
    }

    #[test]
    fn stats_list_counters_and_role_distribution() {
        let text = render_reply(&Reply::Stats {
            stats: BotStats {
                users: 3,
                messages: 17,
                invoices: 5,
                roles: vec![
                    RoleCount {
                        role: Role::Admin,
                        users: 1,
                    },
                    RoleCount {
                        role: Role::User,
                        users: 2,
                    },
                ],
            },
        });
        assert_eq!(
            text,
            "Users: 3\nMessages: 17\nStored invoices: 5\nRoles: admin 1, user 2"
        );
    }
}
