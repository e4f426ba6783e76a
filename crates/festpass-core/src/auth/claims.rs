//! Local inspection of bearer tokens.
//!
//! Access tokens are JWTs whose payload segment carries the expiry and a few
//! identity claims. The client never verifies signatures: decoded claims are
//! only used to schedule refreshes and as a fallback identity when the
//! identity endpoint is unreachable.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

#[cfg(feature = "ts")]
use ts_rs::TS;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("token has {0} segments, expected 2 or 3")]
    SegmentCount(usize),

    #[error("token payload segment is empty")]
    EmptyPayload,

    #[error("token payload is not valid base64url: {0}")]
    Base64(String),

    #[error("token payload is not valid UTF-8")]
    Utf8,

    #[error("token payload is not valid JSON: {0}")]
    Json(String),

    #[error("token payload is not a JSON object")]
    NotAnObject,
}

/// Role claim as issued: either one role name or a list of them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(TS), ts(export))]
#[serde(untagged)]
pub enum RoleClaim {
    Single(String),
    Many(Vec<String>),
}

impl RoleClaim {
    /// Case-insensitive membership test.
    pub fn contains(&self, role: &str) -> bool {
        match self {
            RoleClaim::Single(r) => r.trim().eq_ignore_ascii_case(role),
            RoleClaim::Many(roles) => roles.iter().any(|r| r.trim().eq_ignore_ascii_case(role)),
        }
    }

    fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::String(s) if !s.is_empty() => Some(RoleClaim::Single(s.clone())),
            Value::Array(items) => {
                let roles: Vec<String> = items
                    .iter()
                    .filter_map(|v| match v {
                        Value::String(s) => Some(s.clone()),
                        Value::Null => None,
                        other => Some(other.to_string()),
                    })
                    .collect();
                Some(RoleClaim::Many(roles))
            }
            _ => None,
        }
    }
}

impl std::fmt::Display for RoleClaim {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RoleClaim::Single(r) => write!(f, "{}", r),
            RoleClaim::Many(roles) => write!(f, "{}", roles.join(", ")),
        }
    }
}

/// Claims read from an access token payload. Derived data, never authoritative.
#[derive(Debug, Clone, PartialEq)]
pub struct Claims {
    /// Expiry as seconds since the Unix epoch
    pub exp: Option<i64>,
    pub subject: Option<String>,
    pub email: Option<String>,
    pub role: Option<RoleClaim>,
    pub is_staff: bool,
    pub is_superuser: bool,
    pub raw: Map<String, Value>,
}

impl Claims {
    fn from_payload(raw: Map<String, Value>) -> Self {
        let exp = raw.get("exp").and_then(|v| {
            v.as_i64().or_else(|| v.as_f64().map(|f| f.floor() as i64))
        });
        let subject = ["username", "user", "sub"]
            .iter()
            .find_map(|key| non_empty_string(raw.get(*key)));
        let email = non_empty_string(raw.get("email"));
        let role = ["role", "roles", "user_role"]
            .iter()
            .find_map(|key| raw.get(*key).and_then(RoleClaim::from_value));
        let is_staff = raw.get("is_staff").map(is_truthy).unwrap_or(false);
        let is_superuser = raw.get("is_superuser").map(is_truthy).unwrap_or(false);

        Self {
            exp,
            subject,
            email,
            role,
            is_staff,
            is_superuser,
            raw,
        }
    }

    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.exp.and_then(|exp| DateTime::<Utc>::from_timestamp(exp, 0))
    }

    /// True when the token carries an expiry that is not after `now`.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.exp.map(|exp| exp <= now.timestamp()).unwrap_or(false)
    }
}

fn non_empty_string(value: Option<&Value>) -> Option<String> {
    match value? {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(false),
        Value::String(s) => !s.is_empty(),
        Value::Null => false,
        Value::Array(_) | Value::Object(_) => true,
    }
}

/// Decode the payload of a JWT, reporting which step failed.
pub fn try_decode(token: &str) -> Result<Claims, DecodeError> {
    let segments: Vec<&str> = token.trim().split('.').collect();
    if !(2..=3).contains(&segments.len()) {
        return Err(DecodeError::SegmentCount(segments.len()));
    }
    let payload = segments[1];
    if payload.is_empty() {
        return Err(DecodeError::EmptyPayload);
    }

    // base64url -> standard alphabet, then restore the stripped padding
    let mut b64: String = payload
        .chars()
        .map(|c| match c {
            '-' => '+',
            '_' => '/',
            other => other,
        })
        .collect();
    let missing = (4 - b64.len() % 4) % 4;
    b64.extend(std::iter::repeat('=').take(missing));

    let bytes = STANDARD
        .decode(b64.as_bytes())
        .map_err(|e| DecodeError::Base64(e.to_string()))?;
    let json = String::from_utf8(bytes).map_err(|_| DecodeError::Utf8)?;
    let value: Value =
        serde_json::from_str(&json).map_err(|e| DecodeError::Json(e.to_string()))?;

    match value {
        Value::Object(map) => Ok(Claims::from_payload(map)),
        _ => Err(DecodeError::NotAnObject),
    }
}

/// Decode the payload of a JWT. Any malformed input yields `None`.
pub fn decode(token: &str) -> Option<Claims> {
    try_decode(token).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::engine::general_purpose::URL_SAFE_NO_PAD;
    use serde_json::json;

    fn token_with(payload: &Value) -> String {
        let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"HS256","typ":"JWT"}"#);
        let body = URL_SAFE_NO_PAD.encode(payload.to_string());
        format!("{}.{}.signature", header, body)
    }

    #[test]
    fn test_decode_valid_token() {
        let token = token_with(&json!({
            "sub": "42",
            "username": "olga",
            "email": "olga@ecofest.sn",
            "role": "Admin",
            "is_staff": true,
            "exp": 1_900_000_000
        }));
        let claims = decode(&token).expect("valid token should decode");
        assert_eq!(claims.exp, Some(1_900_000_000));
        assert_eq!(claims.subject.as_deref(), Some("olga"));
        assert_eq!(claims.email.as_deref(), Some("olga@ecofest.sn"));
        assert_eq!(claims.role, Some(RoleClaim::Single("Admin".to_string())));
        assert!(claims.is_staff);
        assert!(!claims.is_superuser);
        assert_eq!(claims.raw.get("sub"), Some(&json!("42")));
    }

    #[test]
    fn test_decode_role_fallbacks() {
        let token = token_with(&json!({"sub": "7", "roles": ["verificateur", "admin"]}));
        let claims = decode(&token).expect("decode");
        assert_eq!(claims.subject.as_deref(), Some("7"));
        let role = claims.role.expect("roles claim");
        assert!(role.contains("Admin"));
        assert!(!role.contains("Staff"));

        let token = token_with(&json!({"user_role": "Vérificateur", "role": ""}));
        let claims = decode(&token).expect("decode");
        assert_eq!(claims.role, Some(RoleClaim::Single("Vérificateur".to_string())));
    }

    #[test]
    fn test_decode_repairs_padding_and_url_alphabet() {
        // Payload lengths 1..=3 mod 3 exercise every padding amount; "?>" style
        // characters force '-' and '_' into the url-safe encoding.
        for subject in ["a", "ab", "abc", "??>>??>>"] {
            let token = token_with(&json!({ "sub": subject, "exp": 10 }));
            let claims = decode(&token).expect("decode");
            assert_eq!(claims.subject.as_deref(), Some(subject));
        }
    }

    #[test]
    fn test_decode_float_exp_and_two_segments() {
        let body = URL_SAFE_NO_PAD.encode(br#"{"exp": 1700000000.9}"#);
        let claims = decode(&format!("header.{}", body)).expect("decode");
        assert_eq!(claims.exp, Some(1_700_000_000));
    }

    #[test]
    fn test_decode_malformed_inputs_return_none() {
        let not_json = URL_SAFE_NO_PAD.encode(b"not json");
        let not_object = URL_SAFE_NO_PAD.encode(b"[1,2,3]");
        let not_utf8 = URL_SAFE_NO_PAD.encode([0xff, 0xfe, 0xfd]);
        let cases = [
            String::new(),
            "onesegment".to_string(),
            "a..c".to_string(),
            "a.b.c.d".to_string(),
            "a.!!!!.c".to_string(),
            "a.abcde.c".to_string(),
            format!("a.{}.c", not_json),
            format!("a.{}.c", not_object),
            format!("a.{}.c", not_utf8),
        ];
        for case in &cases {
            assert!(decode(case).is_none(), "expected None for {:?}", case);
        }
    }

    #[test]
    fn test_try_decode_reports_failing_step() {
        assert_eq!(try_decode("x"), Err(DecodeError::SegmentCount(1)));
        assert_eq!(try_decode("x..y"), Err(DecodeError::EmptyPayload));
        assert!(matches!(try_decode("x.@@@@.y"), Err(DecodeError::Base64(_))));
        let not_json = URL_SAFE_NO_PAD.encode(b"{oops");
        assert!(matches!(try_decode(&format!("x.{}.y", not_json)), Err(DecodeError::Json(_))));
    }

    #[test]
    fn test_expiry_helpers() {
        let token = token_with(&json!({"exp": 1_000}));
        let claims = decode(&token).expect("decode");
        let before = DateTime::<Utc>::from_timestamp(999, 0).expect("timestamp");
        let after = DateTime::<Utc>::from_timestamp(1_000, 0).expect("timestamp");
        assert!(!claims.is_expired_at(before));
        assert!(claims.is_expired_at(after));
        assert_eq!(claims.expires_at(), Some(after));

        let no_exp = decode(&token_with(&json!({"sub": "x"}))).expect("decode");
        assert!(!no_exp.is_expired_at(after));
        assert_eq!(no_exp.expires_at(), None);
    }
}
