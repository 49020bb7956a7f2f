//! Chat command text parsing.
//!
//! Commands may start with `/` and may carry a `@botname` suffix. Both the
//! canonical hyphenated names and the short Portuguese-era aliases are
//! accepted. A message consisting only of a portal URL is a submission.

use std::str::FromStr;

use crate::domain::{Command, PipelineError, ReportPeriod, Role, SubmissionInput, UserId};

const DEFAULT_REPORT_PERIOD: ReportPeriod = ReportPeriod::Week;

/// Parse one chat message into a typed [`Command`].
///
/// # Errors
///
/// Returns [`PipelineError::InvalidCommand`] for empty text, unknown command
/// names, and missing, surplus or malformed arguments.
///
/// # Examples
///
/// ```
/// use invoice_backend::domain::{Command, ReportPeriod};
/// use invoice_backend::inbound::chat::parse_command;
///
/// let command = parse_command("/resume mes")?;
/// assert_eq!(
///     command,
///     Command::RequestReport { period: ReportPeriod::Month, own_only: false }
/// );
/// # Ok::<(), invoice_backend::domain::PipelineError>(())
/// ```
pub fn parse_command(text: &str) -> Result<Command, PipelineError> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Err(PipelineError::invalid_command("empty message"));
    }
    if looks_like_url(trimmed) {
        return Ok(Command::SubmitInvoice(SubmissionInput::Reference(
            trimmed.to_owned(),
        )));
    }

    let (head, rest) = match trimmed.split_once(char::is_whitespace) {
        Some((head, rest)) => (head, rest.trim()),
        None => (trimmed, ""),
    };
    let name = command_name(head);
    let args: Vec<&str> = rest.split_whitespace().collect();

    match name.as_str() {
        "grant-role" | "addrole" | "grant" => {
            let (target, role) = role_args(&name, &args)?;
            Ok(Command::GrantRole { target, role })
        }
        "revoke-role" | "removerole" | "revoke" => {
            let (target, role) = role_args(&name, &args)?;
            Ok(Command::RevokeRole { target, role })
        }
        "view-logs" | "logs" => {
            at_most(&name, &args, 1)?;
            let lines = args
                .first()
                .map(|raw| {
                    raw.parse::<usize>().map_err(|_| {
                        PipelineError::invalid_command(format!(
                            "{name}: line count must be a positive number, got `{raw}`"
                        ))
                    })
                })
                .transpose()?;
            Ok(Command::ViewLogs { lines })
        }
        "view-user-activity" | "users" | "activity" => {
            at_most(&name, &args, 0)?;
            Ok(Command::ViewUserActivity)
        }
        "stats" | "status" | "estatisticas" | "estatísticas" => {
            at_most(&name, &args, 0)?;
            Ok(Command::ViewStats)
        }
        "request-report" | "resume" | "resumo" | "report" | "relatorio" | "relatório" => {
            report_args(&name, &args)
        }
        "submit-invoice" | "nf" | "nota" => {
            if rest.is_empty() {
                return Err(PipelineError::invalid_command(format!(
                    "{name}: send the QR code link after the command"
                )));
            }
            Ok(Command::SubmitInvoice(SubmissionInput::Reference(
                rest.to_owned(),
            )))
        }
        "whoami" | "myid" | "eu" => {
            at_most(&name, &args, 0)?;
            Ok(Command::WhoAmI)
        }
        "help" | "start" | "ajuda" => Ok(Command::Help),
        other => Err(PipelineError::invalid_command(format!(
            "unknown command `{other}`; send help for the list"
        ))),
    }
}

fn looks_like_url(text: &str) -> bool {
    let lower = text.get(..8).unwrap_or(text).to_ascii_lowercase();
    (lower.starts_with("http://") || lower.starts_with("https://"))
        && !text.contains(char::is_whitespace)
}

/// `/Help@nfe_bot` becomes `help`.
fn command_name(head: &str) -> String {
    let without_slash = head.strip_prefix('/').unwrap_or(head);
    let without_bot = without_slash
        .split_once('@')
        .map_or(without_slash, |(name, _)| name);
    without_bot.to_lowercase().replace('_', "-")
}

fn at_most(name: &str, args: &[&str], max: usize) -> Result<(), PipelineError> {
    if args.len() > max {
        return Err(PipelineError::invalid_command(format!(
            "{name}: unexpected argument `{}`",
            args.get(max).copied().unwrap_or_default()
        )));
    }
    Ok(())
}

fn role_args(name: &str, args: &[&str]) -> Result<(UserId, Role), PipelineError> {
    let [raw_user, raw_role] = args else {
        return Err(PipelineError::invalid_command(format!(
            "{name}: expected <user-id> <role>"
        )));
    };
    let target = UserId::from_str(raw_user).map_err(|_| {
        PipelineError::invalid_command(format!("{name}: `{raw_user}` is not a user id"))
    })?;
    let role = Role::from_str(raw_role)
        .map_err(|error| PipelineError::invalid_command(format!("{name}: {error}")))?;
    Ok((target, role))
}

fn report_args(name: &str, args: &[&str]) -> Result<Command, PipelineError> {
    at_most(name, args, 2)?;
    let mut period = None;
    let mut own_only = false;
    for arg in args {
        match arg.to_lowercase().as_str() {
            "mine" | "meu" | "meus" | "minhas" => own_only = true,
            other => {
                if period.is_some() {
                    return Err(PipelineError::invalid_command(format!(
                        "{name}: unexpected argument `{arg}`"
                    )));
                }
                period = Some(ReportPeriod::from_str(other).map_err(|error| {
                    PipelineError::invalid_command(format!(
                        "{name}: {error} (expected day, week, biweek or month)"
                    ))
                })?);
            }
        }
    }
    Ok(Command::RequestReport {
        period: period.unwrap_or(DEFAULT_REPORT_PERIOD),
        own_only,
    })
}

#[cfg(test)]
mod tests {
    //! Command grammar coverage.

    use super::*;
    use crate::domain::ErrorCode;
    use crate::test_support::sample_url;
    use rstest::rstest;

    #[rstest]
    #[case::canonical("grant-role 42 moderator")]
    #[case::slash_alias("/addrole 42 mod")]
    #[case::bot_suffix("/addrole@nfe_bot 42 MODERATOR")]
    fn parses_role_grants(#[case] text: &str) {
        assert_eq!(
            parse_command(text).expect("command"),
            Command::GrantRole {
                target: UserId::new(42),
                role: Role::Moderator
            }
        );
    }

    #[test]
    fn parses_revocations() {
        assert_eq!(
            parse_command("/removerole 42 admin").expect("command"),
            Command::RevokeRole {
                target: UserId::new(42),
                role: Role::Admin
            }
        );
    }

    #[rstest]
    #[case("/logs", None)]
    #[case("view-logs 50", Some(50))]
    fn parses_log_requests(#[case] text: &str, #[case] lines: Option<usize>) {
        assert_eq!(
            parse_command(text).expect("command"),
            Command::ViewLogs { lines }
        );
    }

    #[rstest]
    #[case("/resume", ReportPeriod::Week, false)]
    #[case("/resume dia", ReportPeriod::Day, false)]
    #[case("request-report quinzena mine", ReportPeriod::Biweek, true)]
    #[case("report meu month", ReportPeriod::Month, true)]
    fn parses_report_requests(
        #[case] text: &str,
        #[case] period: ReportPeriod,
        #[case] own_only: bool,
    ) {
        assert_eq!(
            parse_command(text).expect("command"),
            Command::RequestReport { period, own_only }
        );
    }

    #[test]
    fn bare_urls_are_submissions() {
        let url = sample_url();
        assert_eq!(
            parse_command(&format!("  {url}\n")).expect("command"),
            Command::SubmitInvoice(SubmissionInput::Reference(url))
        );
    }

    #[test]
    fn nf_keeps_the_reference_text() {
        let url = sample_url();
        assert_eq!(
            parse_command(&format!("/nf {url}")).expect("command"),
            Command::SubmitInvoice(SubmissionInput::Reference(url))
        );
    }

    #[rstest]
    #[case("/myid", Command::WhoAmI)]
    #[case("whoami", Command::WhoAmI)]
    #[case("/start", Command::Help)]
    #[case("ajuda", Command::Help)]
    #[case("/users", Command::ViewUserActivity)]
    #[case("/stats", Command::ViewStats)]
    #[case("estatísticas", Command::ViewStats)]
    fn parses_argumentless_commands(#[case] text: &str, #[case] expected: Command) {
        assert_eq!(parse_command(text).expect("command"), expected);
    }

    #[rstest]
    #[case::empty("   ")]
    #[case::unknown("/dance")]
    #[case::missing_role("/addrole 42")]
    #[case::bad_user("/addrole alice moderator")]
    #[case::bad_role("/addrole 42 owner")]
    #[case::bad_count("/logs many")]
    #[case::bad_period("/resume year")]
    #[case::two_periods("/resume dia mes")]
    #[case::surplus("/whoami now")]
    #[case::stats_argument("/stats week")]
    #[case::missing_reference("/nf")]
    fn rejects_malformed_commands(#[case] text: &str) {
        let error = parse_command(text).expect_err("invalid");
        assert_eq!(error.code(), ErrorCode::InvalidCommand);
    }
}
