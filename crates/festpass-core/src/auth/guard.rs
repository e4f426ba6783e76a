//! Access control for protected views.
//!
//! The guard keeps no state of its own: every decision is taken from the
//! session's current snapshot.

use thiserror::Error;

use super::session::{SessionManager, SessionSnapshot};

/// Where unauthenticated users are sent.
pub const LOGIN_ROUTE: &str = "/admin/login";

#[derive(Debug, Clone, PartialEq)]
pub enum Access {
    Granted(SessionSnapshot),
    Redirect(String),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GuardError {
    #[error("Not signed in - please log in first ({redirect})")]
    NotAuthenticated { redirect: String },

    #[error("Forbidden: {0}")]
    Forbidden(String),
}

#[derive(Debug, Clone)]
pub struct RouteGuard {
    login_route: String,
}

impl Default for RouteGuard {
    fn default() -> Self {
        Self::new()
    }
}

impl RouteGuard {
    pub fn new() -> Self {
        Self::with_login_route(LOGIN_ROUTE)
    }

    pub fn with_login_route(route: impl Into<String>) -> Self {
        Self {
            login_route: route.into(),
        }
    }

    pub fn login_route(&self) -> &str {
        &self.login_route
    }

    pub fn check(&self, session: &SessionManager) -> Access {
        self.check_snapshot(session.snapshot())
    }

    pub fn check_snapshot(&self, snapshot: SessionSnapshot) -> Access {
        if snapshot.is_authenticated() {
            Access::Granted(snapshot)
        } else {
            Access::Redirect(self.login_route.clone())
        }
    }

    pub fn require(&self, session: &SessionManager) -> Result<SessionSnapshot, GuardError> {
        match self.check(session) {
            Access::Granted(snapshot) => Ok(snapshot),
            Access::Redirect(redirect) => Err(GuardError::NotAuthenticated { redirect }),
        }
    }

    /// Like [`require`](Self::require), additionally demanding the Admin role or superuser flag.
    pub fn require_admin(&self, session: &SessionManager) -> Result<SessionSnapshot, GuardError> {
        let snapshot = self.require(session)?;
        let is_admin = snapshot.user.as_ref().map(|u| u.is_admin()).unwrap_or(false);
        if is_admin {
            Ok(snapshot)
        } else {
            let role = snapshot
                .user
                .as_ref()
                .map(|u| u.role_display())
                .unwrap_or_else(|| "unknown".to_string());
            Err(GuardError::Forbidden(format!(
                "this action requires the Admin role (current role: {})",
                role
            )))
        }
    }
}
