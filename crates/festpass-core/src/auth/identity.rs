//! Identity of the signed-in user.
//!
//! The identity endpoint is the source of truth for roles and permissions
//! (they may change after a token was issued). When it cannot be reached the
//! resolver falls back to the claims embedded in the access token, so the
//! client keeps working through short backend outages.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::debug;

use crate::api::{ApiClient, ApiError};

use super::claims::{self, Claims, DecodeError, RoleClaim};

/// Role name with full back-office rights.
pub const ADMIN_ROLE: &str = "Admin";

/// Normalized user identity used for role-gated actions.
///
/// Bodies from the identity endpoint are kept verbatim: fields this struct
/// does not name end up in `extra` and are written back unchanged.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct IdentityRecord {
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub role: Option<RoleClaim>,
    #[serde(default)]
    pub is_staff: bool,
    #[serde(default)]
    pub is_superuser: bool,
    /// Token payload the record was derived from, when it did not come from the server
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw_payload: Option<Map<String, Value>>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl IdentityRecord {
    /// Map decoded token claims onto the normalized shape.
    pub fn from_claims(claims: &Claims) -> Self {
        Self {
            username: claims.subject.clone(),
            email: claims.email.clone(),
            role: claims.role.clone(),
            is_staff: claims.is_staff,
            is_superuser: claims.is_superuser,
            raw_payload: Some(claims.raw.clone()),
            extra: Map::new(),
        }
    }

    /// Case-insensitive role check, also looking at a `roles` list the server may send.
    pub fn has_role(&self, role: &str) -> bool {
        if self.role.as_ref().map(|r| r.contains(role)).unwrap_or(false) {
            return true;
        }
        match self.extra.get("roles") {
            Some(Value::Array(roles)) => roles
                .iter()
                .filter_map(Value::as_str)
                .any(|r| r.trim().eq_ignore_ascii_case(role)),
            _ => false,
        }
    }

    pub fn is_admin(&self) -> bool {
        self.is_superuser || self.has_role(ADMIN_ROLE)
    }

    pub fn display_name(&self) -> &str {
        self.username
            .as_deref()
            .or(self.email.as_deref())
            .unwrap_or("unknown")
    }

    pub fn role_display(&self) -> String {
        match self.role {
            Some(ref role) => role.to_string(),
            None if self.is_superuser => "superuser".to_string(),
            None => "unknown".to_string(),
        }
    }
}

/// Which tier produced an identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdentitySource {
    Server,
    Token,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedIdentity {
    pub record: IdentityRecord,
    pub source: IdentitySource,
}

/// Both resolution tiers failed.
#[derive(Error, Debug)]
#[error("identity endpoint failed ({server}) and token could not be decoded ({decode})")]
pub struct ResolveError {
    pub server: ApiError,
    pub decode: DecodeError,
}

#[derive(Clone, Debug)]
pub struct IdentityResolver {
    api: ApiClient,
}

impl IdentityResolver {
    pub fn new(api: ApiClient) -> Self {
        Self { api }
    }

    /// Resolve the identity behind `access`: server first, token claims second.
    pub async fn resolve_tiered(&self, access: &str) -> Result<ResolvedIdentity, ResolveError> {
        let server = match self.api.fetch_me(access).await {
            Ok(record) => {
                return Ok(ResolvedIdentity {
                    record,
                    source: IdentitySource::Server,
                })
            }
            Err(e) => e,
        };
        debug!(error = %server, "Identity endpoint unavailable, falling back to token claims");

        match claims::try_decode(access) {
            Ok(claims) => Ok(ResolvedIdentity {
                record: IdentityRecord::from_claims(&claims),
                source: IdentitySource::Token,
            }),
            Err(decode) => Err(ResolveError { server, decode }),
        }
    }

    /// Resolve the identity behind `access`, or `None` when neither tier succeeds.
    pub async fn resolve(&self, access: &str) -> Option<IdentityRecord> {
        match self.resolve_tiered(access).await {
            Ok(resolved) => Some(resolved.record),
            Err(e) => {
                debug!(error = %e, "Identity could not be resolved");
                None
            }
        }
    }
}
