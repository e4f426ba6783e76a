// Shared by several test binaries; not every binary uses every helper
#![allow(dead_code)]

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::Utc;
use serde_json::{json, Value};
use wiremock::MockServer;

use festpass_core::ApiClient;

/// Unsigned JWT with the given payload. The client never checks signatures.
pub fn jwt(payload: &Value) -> String {
    let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"HS256","typ":"JWT"}"#);
    let body = URL_SAFE_NO_PAD.encode(payload.to_string());
    format!("{}.{}.test-signature", header, body)
}

/// Access token for `username` expiring `secs` from now (negative for already expired).
pub fn access_token(username: &str, secs: i64) -> (String, i64) {
    let exp = Utc::now().timestamp() + secs;
    let token = jwt(&json!({
        "token_type": "access",
        "exp": exp,
        "username": username,
        "role": "Vérificateur",
        "is_staff": true,
    }));
    (token, exp)
}

pub fn identity_body(username: &str) -> Value {
    json!({
        "id": 1,
        "username": username,
        "email": format!("{}@ecofest.sn", username),
        "role": "Admin",
        "is_staff": true,
        "is_superuser": false,
    })
}

pub async fn backend() -> (MockServer, ApiClient) {
    let server = MockServer::start().await;
    let api = ApiClient::new(format!("{}/api", server.uri())).expect("client");
    (server, api)
}
