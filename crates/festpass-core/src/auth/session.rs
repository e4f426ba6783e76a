//! Session lifecycle: login, logout, silent refresh and startup rehydration.
//!
//! `SessionManager` owns the credential pair, the identity record and the
//! refresh timer. Everything else reads snapshots.
//!
//! ```text
//! Unauthenticated --login--> Authenticating --ok--> Authenticated
//!        ^                         |                  |      ^
//!        |                       error             timer/   ok
//!        +-------------------------+              on-demand  |
//!        |                                            v      |
//!        +---------------- failure --------------- Refreshing
//! ```
//!
//! Refreshes are single-flight. Login and logout bump a generation counter;
//! an async result whose generation is no longer current is discarded, so a
//! refresh finishing after logout can never bring the session back.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::Utc;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::api::{ApiClient, ApiError};

use super::claims;
use super::identity::{IdentityRecord, IdentityResolver};
use super::scheduler::{refresh_delay, RefreshScheduler};
use super::store::{CredentialPair, TokenStore};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    Unauthenticated,
    Authenticating,
    Authenticated,
    /// Background renewal in flight; the current access token stays usable
    Refreshing,
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionStatus::Unauthenticated => write!(f, "Unauthenticated"),
            SessionStatus::Authenticating => write!(f, "Authenticating"),
            SessionStatus::Authenticated => write!(f, "Authenticated"),
            SessionStatus::Refreshing => write!(f, "Refreshing"),
        }
    }
}

#[derive(Error, Debug)]
pub enum SessionError {
    /// Rejected credentials, with the server's message when it sent one
    #[error("Login failed: {0}")]
    Login(String),

    #[error("Login failed: {}", .0.user_message())]
    Transport(#[source] ApiError),

    #[error("No refresh token available - please log in again")]
    NoRefreshCredential,

    #[error("Token refresh failed: {0}")]
    RefreshRejected(#[source] ApiError),

    #[error("Session changed while the request was in flight")]
    Superseded,
}

/// Read-only copy of the session state handed to consumers.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionSnapshot {
    pub status: SessionStatus,
    pub credentials: Option<CredentialPair>,
    pub user: Option<IdentityRecord>,
    /// Time left until the pending refresh timer fires
    pub refresh_in: Option<Duration>,
}

impl SessionSnapshot {
    pub fn is_authenticated(&self) -> bool {
        matches!(
            self.status,
            SessionStatus::Authenticated | SessionStatus::Refreshing
        ) && self.credentials.is_some()
            && self.user.is_some()
    }

    pub fn access_token(&self) -> Option<&str> {
        self.credentials.as_ref().map(|c| c.access.as_str())
    }
}

struct SessionState {
    status: SessionStatus,
    credentials: Option<CredentialPair>,
    user: Option<IdentityRecord>,
    generation: u64,
}

struct Inner {
    api: ApiClient,
    resolver: IdentityResolver,
    store: TokenStore,
    state: Mutex<SessionState>,
    scheduler: RefreshScheduler,
    refresh_gate: tokio::sync::Mutex<()>,
}

/// Cheap-clone handle to one session. Create once at startup and pass it to
/// whatever needs the current user or credentials.
#[derive(Clone)]
pub struct SessionManager {
    inner: Arc<Inner>,
}

impl SessionManager {
    pub fn new(api: ApiClient, store: TokenStore) -> Self {
        let resolver = IdentityResolver::new(api.clone());
        Self {
            inner: Arc::new(Inner {
                api,
                resolver,
                store,
                state: Mutex::new(SessionState {
                    status: SessionStatus::Unauthenticated,
                    credentials: None,
                    user: None,
                    generation: 0,
                }),
                scheduler: RefreshScheduler::new(),
                refresh_gate: tokio::sync::Mutex::new(()),
            }),
        }
    }

    fn state(&self) -> MutexGuard<'_, SessionState> {
        self.inner
            .state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Reset to Unauthenticated: memory, storage and timer. Invalidates in-flight work.
    fn clear_locked(&self, state: &mut SessionState) {
        state.status = SessionStatus::Unauthenticated;
        state.credentials = None;
        state.user = None;
        state.generation += 1;
        self.inner.scheduler.cancel();
        self.inner.store.clear();
    }

    // =========================================================================
    // Reads
    // =========================================================================

    pub fn snapshot(&self) -> SessionSnapshot {
        let state = self.state();
        SessionSnapshot {
            status: state.status,
            credentials: state.credentials.clone(),
            user: state.user.clone(),
            refresh_in: self.inner.scheduler.remaining(),
        }
    }

    pub fn status(&self) -> SessionStatus {
        self.state().status
    }

    pub fn is_authenticated(&self) -> bool {
        self.snapshot().is_authenticated()
    }

    pub fn access_token(&self) -> Option<String> {
        self.state().credentials.as_ref().map(|c| c.access.clone())
    }

    pub fn current_user(&self) -> Option<IdentityRecord> {
        self.state().user.clone()
    }

    /// Value for an `Authorization` header, when signed in.
    pub fn auth_header(&self) -> Option<String> {
        self.access_token().map(|token| format!("Bearer {}", token))
    }

    /// API client carrying the current access token.
    pub fn authorized_client(&self) -> Option<ApiClient> {
        self.access_token().map(|token| self.inner.api.with_token(token))
    }

    pub fn refresh_pending(&self) -> bool {
        self.inner.scheduler.is_armed()
    }

    /// Storage failed and the session only lives in this process.
    pub fn is_memory_only(&self) -> bool {
        self.inner.store.is_degraded()
    }

    // =========================================================================
    // Login / logout
    // =========================================================================

    /// Exchange username and password for tokens, resolve the identity and arm the refresh timer.
    pub async fn login(&self, username: &str, password: &str) -> Result<SessionSnapshot, SessionError> {
        let generation = {
            let mut state = self.state();
            state.generation += 1;
            state.status = SessionStatus::Authenticating;
            state.generation
        };
        info!(username = username, "Logging in");

        let tokens = match self.inner.api.obtain_token(username, password).await {
            Ok(tokens) => tokens,
            Err(e) => {
                warn!(error = %e, "Login failed");
                self.clear_if_current(generation);
                return Err(match e {
                    ApiError::NetworkError(_) => SessionError::Transport(e),
                    other => SessionError::Login(other.user_message()),
                });
            }
        };

        let user = match self.inner.resolver.resolve(&tokens.access).await {
            Some(user) => user,
            None => {
                warn!("Issued access token has no resolvable identity");
                self.clear_if_current(generation);
                return Err(SessionError::Login(
                    "Server issued a token without a usable identity".to_string(),
                ));
            }
        };

        let credentials = CredentialPair {
            access: tokens.access,
            refresh: tokens.refresh,
        };
        {
            let mut state = self.state();
            if state.generation != generation {
                debug!("Login result discarded, session changed meanwhile");
                return Err(SessionError::Superseded);
            }
            self.inner.store.save(&credentials);
            self.inner.store.save_user(&user);
            self.arm_refresh(&credentials.access);
            state.credentials = Some(credentials);
            state.user = Some(user);
            state.status = SessionStatus::Authenticated;
        }

        info!(username = username, "Login successful");
        Ok(self.snapshot())
    }

    /// Drop every trace of the session. Safe to call at any time, any number of times.
    pub fn logout(&self) {
        let mut state = self.state();
        let was_signed_in = state.credentials.is_some();
        self.clear_locked(&mut state);
        if was_signed_in {
            info!("Logged out");
        }
    }

    fn clear_if_current(&self, generation: u64) {
        let mut state = self.state();
        if state.generation == generation {
            self.clear_locked(&mut state);
        }
    }

    // =========================================================================
    // Refresh
    // =========================================================================

    /// Renew the access token with the refresh token.
    ///
    /// Any failure is terminal: the session is cleared and the user has to log
    /// in again. Concurrent callers are serialized; a caller that waited on
    /// another refresh reuses its result.
    pub async fn refresh_access(&self) -> Result<String, SessionError> {
        let seen_access = self.access_token();
        let _gate = self.inner.refresh_gate.lock().await;

        let (refresh, previous_user, generation) = {
            let mut state = self.state();
            if let (Some(seen), Some(current)) = (seen_access.as_ref(), state.credentials.as_ref()) {
                if *seen != current.access && state.status == SessionStatus::Authenticated {
                    debug!("Access token renewed while waiting, reusing it");
                    return Ok(current.access.clone());
                }
            }
            match state.credentials.as_ref().and_then(|c| c.refresh.clone()) {
                Some(refresh) => {
                    state.status = SessionStatus::Refreshing;
                    (refresh, state.user.clone(), state.generation)
                }
                None => {
                    debug!("No refresh token held, clearing session");
                    self.clear_locked(&mut state);
                    return Err(SessionError::NoRefreshCredential);
                }
            }
        };

        let tokens = match self.inner.api.refresh_token(&refresh).await {
            Ok(tokens) => tokens,
            Err(e) => {
                warn!(error = %e, "Token refresh failed, ending session");
                self.clear_if_current(generation);
                return Err(SessionError::RefreshRejected(e));
            }
        };

        let resolved = self.inner.resolver.resolve(&tokens.access).await;

        let access = tokens.access.clone();
        {
            let mut state = self.state();
            if state.generation != generation {
                debug!("Refresh result discarded, session changed meanwhile");
                return Err(SessionError::Superseded);
            }
            let user = match resolved.or(previous_user) {
                Some(user) => user,
                None => {
                    warn!("Refreshed access token has no resolvable identity, ending session");
                    self.clear_locked(&mut state);
                    return Err(SessionError::RefreshRejected(ApiError::InvalidResponse(
                        "refreshed token has no usable identity".to_string(),
                    )));
                }
            };
            let credentials = CredentialPair {
                access: tokens.access,
                refresh: tokens.refresh.or(Some(refresh)),
            };
            self.inner.store.save(&credentials);
            self.inner.store.save_user(&user);
            self.arm_refresh(&credentials.access);
            state.credentials = Some(credentials);
            state.user = Some(user);
            state.status = SessionStatus::Authenticated;
        }

        info!("Access token refreshed");
        Ok(access)
    }

    /// Arm the refresh timer 60s before `access` expires (at least 1s from now),
    /// replacing any pending one. Returns the delay, or `None` when the token
    /// carries no readable expiry.
    pub fn schedule_refresh(&self, access: &str) -> Option<Duration> {
        let _state = self.state();
        self.arm_refresh(access)
    }

    /// Callers hold the state lock, so a concurrent clear either runs first
    /// (and the caller sees a new generation) or cancels this timer.
    fn arm_refresh(&self, access: &str) -> Option<Duration> {
        let exp = match claims::decode(access).and_then(|c| c.exp) {
            Some(exp) => exp,
            None => {
                debug!("Access token has no readable expiry, not scheduling refresh");
                return None;
            }
        };
        let delay = refresh_delay(exp, Utc::now());

        let session = Arc::downgrade(&self.inner);
        self.inner.scheduler.arm(delay, move || async move {
            let Some(inner) = session.upgrade() else {
                return;
            };
            let manager = SessionManager { inner };
            if let Err(e) = manager.refresh_access().await {
                debug!(error = %e, "Scheduled refresh did not complete");
            }
        });
        debug!(delay_secs = delay.as_secs(), "Token refresh scheduled");
        Some(delay)
    }

    // =========================================================================
    // Startup
    // =========================================================================

    /// Load the persisted session into memory without any network call.
    ///
    /// Returns false (and starts Unauthenticated) when no access token is stored.
    pub fn restore_cached(&self) -> bool {
        let stored = self.inner.store.load();
        let mut state = self.state();
        match stored.access {
            Some(access) => {
                state.credentials = Some(CredentialPair {
                    access,
                    refresh: stored.refresh,
                });
                state.status = if stored.user.is_some() {
                    SessionStatus::Authenticated
                } else {
                    SessionStatus::Refreshing
                };
                state.user = stored.user;
                debug!(has_user = state.user.is_some(), "Restored cached session");
                true
            }
            None => {
                state.status = SessionStatus::Unauthenticated;
                state.credentials = None;
                state.user = None;
                debug!("No stored session");
                false
            }
        }
    }

    /// Bring a restored session up to date with the server.
    ///
    /// An access token that is unreadable or already expired is refreshed
    /// right away, since the refresh token may still be valid. Otherwise the
    /// identity is re-resolved and the refresh timer armed.
    pub async fn revalidate(&self) {
        let (access, generation) = {
            let state = self.state();
            match state.credentials.as_ref() {
                Some(c) => (c.access.clone(), state.generation),
                None => return,
            }
        };

        let usable = match claims::decode(&access) {
            Some(claims) => !claims.is_expired_at(Utc::now()),
            None => false,
        };
        if !usable {
            info!("Stored access token unusable, refreshing");
            if let Err(e) = self.refresh_access().await {
                info!(error = %e, "Stored session could not be renewed");
            }
            return;
        }

        let resolved = self.inner.resolver.resolve(&access).await;
        {
            let mut state = self.state();
            if state.generation != generation {
                return;
            }
            match resolved {
                Some(user) => {
                    self.inner.store.save_user(&user);
                    state.user = Some(user);
                    state.status = SessionStatus::Authenticated;
                }
                None if state.user.is_none() => {
                    self.clear_locked(&mut state);
                    return;
                }
                None => {}
            }
            self.arm_refresh(&access);
        }
    }

    /// Startup: restore from storage, then revalidate.
    pub async fn rehydrate(&self) -> SessionSnapshot {
        if self.restore_cached() {
            self.revalidate().await;
        }
        self.snapshot()
    }

    /// Re-fetch the identity for the current access token.
    pub async fn reload_identity(&self) -> Option<IdentityRecord> {
        let (access, generation) = {
            let state = self.state();
            (state.credentials.as_ref()?.access.clone(), state.generation)
        };
        let user = self.inner.resolver.resolve(&access).await?;
        let mut state = self.state();
        if state.generation != generation {
            return None;
        }
        self.inner.store.save_user(&user);
        state.user = Some(user.clone());
        Some(user)
    }
}
