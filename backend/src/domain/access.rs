//! Access control gate.
//!
//! Holds the role assignments of every known user and answers authorisation
//! questions against the static capability table in [`super::user`]. Users
//! are registered with [`Role::User`] on first sight. The seed admin supplied
//! at startup always holds [`Role::Admin`].

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::error::PipelineError;
use super::user::{Action, Role, RoleSet, UserId};

/// Proof that a user may perform an action.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Capability {
    /// Authorised user.
    pub user: UserId,
    /// Authorised action.
    pub action: Action,
    /// Held role that grants the action.
    pub granted_by: Role,
}

/// Result of an idempotent role change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoleChange {
    /// The role set was modified.
    Applied,
    /// The role set already had the requested shape.
    Unchanged,
}

/// One user's persisted role assignment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleAssignment {
    /// Assigned user.
    pub user: UserId,
    /// Roles held.
    pub roles: RoleSet,
}

/// Serialisable copy of every role assignment.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleSnapshot {
    /// Assignments ordered by user identifier.
    pub assignments: Vec<RoleAssignment>,
}

/// Role registry and authoriser.
#[derive(Debug)]
pub struct AccessControlGate {
    users: DashMap<UserId, RoleSet>,
    seed_admin: Option<UserId>,
}

impl AccessControlGate {
    /// Build an empty gate, registering `seed_admin` as admin when present.
    pub fn new(seed_admin: Option<UserId>) -> Self {
        let users = DashMap::new();
        if let Some(admin) = seed_admin {
            users.insert(admin, RoleSet::with(Role::Admin));
        }
        Self { users, seed_admin }
    }

    /// Rebuild a gate from a persisted snapshot.
    ///
    /// The seed admin is re-granted admin even when the snapshot disagrees.
    pub fn restore(seed_admin: Option<UserId>, snapshot: RoleSnapshot) -> Self {
        let gate = Self::new(None);
        for assignment in snapshot.assignments {
            gate.users.insert(assignment.user, assignment.roles);
        }
        if let Some(admin) = seed_admin {
            gate.users.entry(admin).or_default().insert(Role::Admin);
        }
        Self {
            users: gate.users,
            seed_admin,
        }
    }

    /// Authorise `action` for `user`.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::AccessDenied`] when no held role grants the
    /// action.
    ///
    /// # Examples
    ///
    /// ```
    /// use invoice_backend::domain::{AccessControlGate, Action, UserId};
    ///
    /// let gate = AccessControlGate::new(Some(UserId::new(1)));
    /// assert!(gate.authorize(UserId::new(1), Action::GrantRole).is_ok());
    /// assert!(gate.authorize(UserId::new(2), Action::SubmitInvoice).is_err());
    /// ```
    pub fn authorize(&self, user: UserId, action: Action) -> Result<Capability, PipelineError> {
        let roles = self.roles(user);
        match roles.permits(action) {
            Some(granted_by) => Ok(Capability {
                user,
                action,
                granted_by,
            }),
            None => {
                debug!(user_id = %user, %action, "authorisation denied");
                Err(PipelineError::AccessDenied { user, action })
            }
        }
    }

    /// Grant `role` to `target` on behalf of `actor`.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::AccessDenied`] unless `actor` holds admin.
    pub fn assign_role(
        &self,
        actor: UserId,
        target: UserId,
        role: Role,
    ) -> Result<RoleChange, PipelineError> {
        self.require_admin(actor, Action::GrantRole)?;
        let inserted = self.users.entry(target).or_default().insert(role);
        let change = if inserted {
            RoleChange::Applied
        } else {
            RoleChange::Unchanged
        };
        info!(actor = %actor, target = %target, %role, ?change, "role granted");
        Ok(change)
    }

    /// Revoke `role` from `target` on behalf of `actor`.
    ///
    /// Revoking the implicit user role is a no-op.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::AccessDenied`] unless `actor` holds admin and
    /// [`PipelineError::ProtectedRole`] when revoking the seed admin's admin
    /// role.
    pub fn revoke_role(
        &self,
        actor: UserId,
        target: UserId,
        role: Role,
    ) -> Result<RoleChange, PipelineError> {
        self.require_admin(actor, Action::RevokeRole)?;
        if role == Role::Admin && self.seed_admin == Some(target) {
            return Err(PipelineError::ProtectedRole { user: target, role });
        }
        let removed = self
            .users
            .get_mut(&target)
            .is_some_and(|mut roles| roles.remove(role));
        let change = if removed {
            RoleChange::Applied
        } else {
            RoleChange::Unchanged
        };
        info!(actor = %actor, target = %target, %role, ?change, "role revoked");
        Ok(change)
    }

    /// Roles held by `user`, registering unknown users with the default set.
    pub fn roles(&self, user: UserId) -> RoleSet {
        self.users.entry(user).or_default().clone()
    }

    /// Highest role held by `user`.
    pub fn highest_role(&self, user: UserId) -> Role {
        self.roles(user).highest()
    }

    /// Whether `user` is the protected seed admin.
    pub fn is_seed_admin(&self, user: UserId) -> bool {
        self.seed_admin == Some(user)
    }

    /// Copy every assignment, ordered by user identifier.
    pub fn snapshot(&self) -> RoleSnapshot {
        let mut assignments: Vec<RoleAssignment> = self
            .users
            .iter()
            .map(|entry| RoleAssignment {
                user: *entry.key(),
                roles: entry.value().clone(),
            })
            .collect();
        assignments.sort_by_key(|assignment| assignment.user);
        RoleSnapshot { assignments }
    }

    fn require_admin(&self, actor: UserId, action: Action) -> Result<(), PipelineError> {
        if self.roles(actor).contains(Role::Admin) {
            Ok(())
        } else {
            Err(PipelineError::AccessDenied {
                user: actor,
                action,
            })
        }
    }
}
