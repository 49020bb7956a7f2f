//! Pipeline error taxonomy.
//!
//! Every stage of the submission and report flows fails with a
//! [`PipelineError`]. Inbound adapters render [`PipelineError::user_message`]
//! and may branch on the stable [`ErrorCode`].

use serde::{Deserialize, Serialize};

use super::user::{Action, Role, UserId};

/// Stable machine-readable error code describing the failure category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[non_exhaustive]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    /// Caller lacks the capability for the requested action.
    AccessDenied,
    /// Caller must wait before repeating the action.
    RateLimited,
    /// The submitted text is not a recognisable invoice reference.
    InvalidInvoiceReference,
    /// No portal adapter serves the reference's region.
    UnsupportedPortal,
    /// The portal could not be reached or rejected the request.
    FetchFailed,
    /// The fetched document lacks a mandatory field.
    ParseFailed,
    /// Persistence failed; operators have been alerted.
    StorageFailed,
    /// Command text could not be understood.
    InvalidCommand,
    /// The role change targets a protected assignment.
    ProtectedRole,
}

impl ErrorCode {
    /// Snake-case name, identical to the serialised form.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::AccessDenied => "access_denied",
            Self::RateLimited => "rate_limited",
            Self::InvalidInvoiceReference => "invalid_invoice_reference",
            Self::UnsupportedPortal => "unsupported_portal",
            Self::FetchFailed => "fetch_failed",
            Self::ParseFailed => "parse_failed",
            Self::StorageFailed => "storage_failed",
            Self::InvalidCommand => "invalid_command",
            Self::ProtectedRole => "protected_role",
        }
    }
}

/// Whether a fetch failure may succeed when repeated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FetchFailureKind {
    /// Timeouts, resets, throttling and upstream 5xx responses.
    Transient,
    /// Client errors and malformed or empty responses.
    Permanent,
}

/// Failure raised by any stage of the pipeline.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PipelineError {
    /// Caller lacks the capability for `action`.
    #[error("user {user} may not perform {action}")]
    AccessDenied {
        /// Caller identity.
        user: UserId,
        /// Requested action.
        action: Action,
    },
    /// Caller must wait `retry_after_secs` before repeating the action.
    #[error("rate limited; retry after {retry_after_secs}s")]
    RateLimited {
        /// Whole seconds until the action is allowed again.
        retry_after_secs: u64,
    },
    /// Reference text failed validation before any network access.
    #[error("invalid invoice reference: {reason}")]
    InvalidInvoiceReference {
        /// Why the reference was rejected.
        reason: String,
    },
    /// No adapter is registered for the region.
    #[error("no portal adapter for region {region}")]
    UnsupportedPortal {
        /// Region abbreviation or raw code.
        region: String,
    },
    /// Portal fetch failed after retries (transient) or immediately
    /// (permanent).
    #[error("portal fetch failed ({kind:?}): {message}")]
    FetchError {
        /// Failure classification.
        kind: FetchFailureKind,
        /// Adapter diagnostic.
        message: String,
    },
    /// Mandatory field missing from the fetched document.
    #[error("document is missing mandatory field `{field}`")]
    ParseError {
        /// Missing field name.
        field: String,
    },
    /// Persistence failed.
    #[error("storage failure: {message}")]
    StorageError {
        /// Adapter diagnostic.
        message: String,
    },
    /// Command text or arguments could not be understood.
    #[error("invalid command: {message}")]
    InvalidCommand {
        /// What was wrong with the command.
        message: String,
    },
    /// Attempted to revoke a role that must stay assigned.
    #[error("role {role} of user {user} cannot be revoked")]
    ProtectedRole {
        /// Target identity.
        user: UserId,
        /// Protected role.
        role: Role,
    },
}

impl PipelineError {
    /// Build an [`PipelineError::InvalidInvoiceReference`].
    pub fn invalid_reference(reason: impl Into<String>) -> Self {
        Self::InvalidInvoiceReference {
            reason: reason.into(),
        }
    }

    /// Build a [`PipelineError::ParseError`] naming the missing field.
    pub fn parse(field: impl Into<String>) -> Self {
        Self::ParseError {
            field: field.into(),
        }
    }

    /// Build a [`PipelineError::StorageError`].
    pub fn storage(message: impl Into<String>) -> Self {
        Self::StorageError {
            message: message.into(),
        }
    }

    /// Build a [`PipelineError::InvalidCommand`].
    pub fn invalid_command(message: impl Into<String>) -> Self {
        Self::InvalidCommand {
            message: message.into(),
        }
    }

    /// Stable machine-readable code for this failure.
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::AccessDenied { .. } => ErrorCode::AccessDenied,
            Self::RateLimited { .. } => ErrorCode::RateLimited,
            Self::InvalidInvoiceReference { .. } => ErrorCode::InvalidInvoiceReference,
            Self::UnsupportedPortal { .. } => ErrorCode::UnsupportedPortal,
            Self::FetchError { .. } => ErrorCode::FetchFailed,
            Self::ParseError { .. } => ErrorCode::ParseFailed,
            Self::StorageError { .. } => ErrorCode::StorageFailed,
            Self::InvalidCommand { .. } => ErrorCode::InvalidCommand,
            Self::ProtectedRole { .. } => ErrorCode::ProtectedRole,
        }
    }

    /// Message safe to show the submitting user.
    ///
    /// Adapter diagnostics for storage failures stay in the logs.
    pub fn user_message(&self) -> String {
        match self {
            Self::AccessDenied { action, .. } => {
                format!("Access denied: you are not allowed to use {action}.")
            }
            Self::RateLimited { retry_after_secs } => {
                format!("Too many requests: try again in {retry_after_secs}s.")
            }
            Self::InvalidInvoiceReference { reason } => {
                format!("Invalid invoice reference: {reason}.")
            }
            Self::UnsupportedPortal { region } => {
                format!("Invoices issued in {region} are not supported yet.")
            }
            Self::FetchError {
                kind: FetchFailureKind::Transient,
                ..
            } => "The tax portal is unavailable right now; please retry later.".to_owned(),
            Self::FetchError {
                kind: FetchFailureKind::Permanent,
                ..
            } => "The tax portal rejected the invoice query.".to_owned(),
            Self::ParseError { field } => {
                format!("The invoice page could not be read: missing {field}.")
            }
            Self::StorageError { .. } => {
                "The invoice could not be saved; operators have been notified.".to_owned()
            }
            Self::InvalidCommand { message } => format!("Invalid command: {message}."),
            Self::ProtectedRole { role, .. } => {
                format!("The {role} role of this user cannot be revoked.")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    //! Regression coverage for error codes and user-facing messages.

    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(PipelineError::RateLimited { retry_after_secs: 40 }, ErrorCode::RateLimited)]
    #[case(PipelineError::parse("total"), ErrorCode::ParseFailed)]
    #[case(PipelineError::storage("disk full"), ErrorCode::StorageFailed)]
    #[case(PipelineError::invalid_reference("bad"), ErrorCode::InvalidInvoiceReference)]
    fn codes_follow_variants(#[case] error: PipelineError, #[case] expected: ErrorCode) {
        assert_eq!(error.code(), expected);
    }

    #[rstest]
    #[case(ErrorCode::AccessDenied)]
    #[case(ErrorCode::InvalidInvoiceReference)]
    #[case(ErrorCode::ProtectedRole)]
    fn code_names_match_serialised_form(#[case] code: ErrorCode) {
        let serialised = serde_json::to_string(&code).expect("serialise code");
        assert_eq!(serialised, format!("\"{}\"", code.as_str()));
    }

    #[test]
    fn storage_message_hides_adapter_details() {
        let message = PipelineError::storage("/var/data: permission denied").user_message();
        assert!(!message.contains("permission denied"));
        assert!(message.contains("operators"));
    }

    #[test]
    fn rate_limit_message_names_wait() {
        let message = PipelineError::RateLimited {
            retry_after_secs: 40,
        }
        .user_message();
        assert!(message.contains("40s"));
    }

    #[test]
    fn parse_error_names_field() {
        assert_eq!(
            PipelineError::parse("total").to_string(),
            "document is missing mandatory field `total`"
        );
    }
}
