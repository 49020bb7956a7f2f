//! User identity, roles and the static capability table.
//!
//! Authorisation is a pure function of the caller's [`RoleSet`] and the
//! requested [`Action`]; see [`RoleSet::permits`].

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Chat identity of a user. Group chats carry negative identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(i64);

impl UserId {
    /// Wrap a raw chat identifier.
    pub const fn new(raw: i64) -> Self {
        Self(raw)
    }

    /// Raw chat identifier.
    pub const fn get(self) -> i64 {
        self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for UserId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim().parse::<i64>().map(Self)
    }
}

/// Roles ordered from least to most privileged.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// Default role for every known user.
    User,
    /// May submit invoices and request reports.
    Moderator,
    /// Full access, including role management and diagnostics.
    Admin,
}

impl Role {
    /// Every role, least privileged first.
    pub const ALL: [Self; 3] = [Self::User, Self::Moderator, Self::Admin];

    /// Actions granted by this role alone.
    ///
    /// The tables are nested so that `Admin ⊇ Moderator ⊇ User`.
    pub const fn capabilities(self) -> &'static [Action] {
        match self {
            Self::User => USER_CAPABILITIES,
            Self::Moderator => MODERATOR_CAPABILITIES,
            Self::Admin => ADMIN_CAPABILITIES,
        }
    }

    /// Lower-case label used in commands and snapshots.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Moderator => "moderator",
            Self::Admin => "admin",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when parsing an unknown role label.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown role `{0}` (expected admin, moderator or user)")]
pub struct UnknownRole(pub String);

impl FromStr for Role {
    type Err = UnknownRole;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "user" => Ok(Self::User),
            "moderator" | "mod" => Ok(Self::Moderator),
            "admin" => Ok(Self::Admin),
            other => Err(UnknownRole(other.to_owned())),
        }
    }
}

/// Actions exposed through the command surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Action {
    /// Assign a role to a user.
    GrantRole,
    /// Remove a role from a user.
    RevokeRole,
    /// Read recent log lines.
    ViewLogs,
    /// List users who interacted with the bot.
    ViewUserActivity,
    /// Aggregate stored invoices over a window.
    RequestReport,
    /// Show usage statistics for the bot.
    ViewStats,
    /// Submit an invoice reference for ingestion.
    SubmitInvoice,
    /// Show the caller's identity and roles.
    WhoAmI,
    /// List commands available to the caller.
    Help,
}

const USER_CAPABILITIES: &[Action] = &[Action::WhoAmI, Action::Help];

const MODERATOR_CAPABILITIES: &[Action] = &[
    Action::WhoAmI,
    Action::Help,
    Action::RequestReport,
    Action::ViewStats,
    Action::SubmitInvoice,
];

const ADMIN_CAPABILITIES: &[Action] = &[
    Action::WhoAmI,
    Action::Help,
    Action::RequestReport,
    Action::ViewStats,
    Action::SubmitInvoice,
    Action::GrantRole,
    Action::RevokeRole,
    Action::ViewLogs,
    Action::ViewUserActivity,
];

impl Action {
    /// Every action in help-listing order.
    pub const ALL: [Self; 9] = [
        Self::SubmitInvoice,
        Self::RequestReport,
        Self::ViewStats,
        Self::WhoAmI,
        Self::Help,
        Self::GrantRole,
        Self::RevokeRole,
        Self::ViewLogs,
        Self::ViewUserActivity,
    ];

    /// Command name as typed by users.
    pub const fn command_name(self) -> &'static str {
        match self {
            Self::GrantRole => "grant-role",
            Self::RevokeRole => "revoke-role",
            Self::ViewLogs => "view-logs",
            Self::ViewUserActivity => "view-user-activity",
            Self::RequestReport => "request-report",
            Self::ViewStats => "stats",
            Self::SubmitInvoice => "submit-invoice",
            Self::WhoAmI => "whoami",
            Self::Help => "help",
        }
    }

    /// Least privileged role whose capability set contains this action.
    pub fn minimum_role(self) -> Role {
        Role::ALL
            .into_iter()
            .find(|role| role.capabilities().contains(&self))
            .unwrap_or(Role::Admin)
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.command_name())
    }
}

/// Roles held by one user. Always contains [`Role::User`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "Vec<Role>", into = "Vec<Role>")]
pub struct RoleSet(BTreeSet<Role>);

impl Default for RoleSet {
    fn default() -> Self {
        Self(BTreeSet::from([Role::User]))
    }
}

impl RoleSet {
    /// Role set holding `role` in addition to the implicit user role.
    pub fn with(role: Role) -> Self {
        let mut set = Self::default();
        set.insert(role);
        set
    }

    /// Add a role; returns `false` when it was already held.
    pub fn insert(&mut self, role: Role) -> bool {
        self.0.insert(role)
    }

    /// Remove a role; the implicit user role is never removed.
    pub fn remove(&mut self, role: Role) -> bool {
        if role == Role::User {
            return false;
        }
        self.0.remove(&role)
    }

    /// Whether `role` is held.
    pub fn contains(&self, role: Role) -> bool {
        self.0.contains(&role)
    }

    /// Most privileged role held.
    pub fn highest(&self) -> Role {
        self.0.iter().next_back().copied().unwrap_or(Role::User)
    }

    /// Roles held, least privileged first.
    pub fn iter(&self) -> impl Iterator<Item = Role> + '_ {
        self.0.iter().copied()
    }

    /// Return the role granting `action`, if any.
    ///
    /// # Examples
    ///
    /// ```
    /// use invoice_backend::domain::{Action, Role, RoleSet};
    ///
    /// let roles = RoleSet::with(Role::Moderator);
    /// assert_eq!(roles.permits(Action::SubmitInvoice), Some(Role::Moderator));
    /// assert_eq!(roles.permits(Action::GrantRole), None);
    /// ```
    pub fn permits(&self, action: Action) -> Option<Role> {
        self.0
            .iter()
            .copied()
            .find(|role| role.capabilities().contains(&action))
    }

    /// Union of the capability sets of all held roles.
    pub fn capabilities(&self) -> Vec<Action> {
        Action::ALL
            .into_iter()
            .filter(|action| self.permits(*action).is_some())
            .collect()
    }
}

impl From<Vec<Role>> for RoleSet {
    fn from(roles: Vec<Role>) -> Self {
        let mut set = Self::default();
        set.0.extend(roles);
        set
    }
}

impl From<RoleSet> for Vec<Role> {
    fn from(value: RoleSet) -> Self {
        value.0.into_iter().collect()
    }
}
