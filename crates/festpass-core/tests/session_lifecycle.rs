mod common;

use std::time::Duration;

use serde_json::json;
use wiremock::matchers::{body_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use festpass_core::auth::{
    claims, FileStore, IdentitySource, KeyValueStore, MemoryStore, SessionError, SessionStatus,
    TokenStore,
};
use festpass_core::{ApiClient, RouteGuard, SessionManager};

use common::{access_token, backend, identity_body};

async fn mount_login(server: &MockServer, access: &str, refresh: &str) {
    Mock::given(method("POST"))
        .and(path("/api/token/"))
        .and(body_json(json!({"username": "olga", "password": "changeme"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access": access,
            "refresh": refresh,
        })))
        .expect(1)
        .mount(server)
        .await;
}

async fn mount_identity(server: &MockServer, access: &str) {
    Mock::given(method("GET"))
        .and(path("/api/auth/me/"))
        .and(header("authorization", format!("Bearer {}", access).as_str()))
        .respond_with(ResponseTemplate::new(200).set_body_json(identity_body("olga")))
        .mount(server)
        .await;
}

async fn logged_in(server: &MockServer, api: ApiClient, store: TokenStore) -> (SessionManager, String) {
    let (access, _) = access_token("olga", 300);
    mount_login(server, &access, "r1").await;
    mount_identity(server, &access).await;
    let session = SessionManager::new(api, store);
    session.login("olga", "changeme").await.expect("login should succeed");
    (session, access)
}

fn assert_cleared(session: &SessionManager) {
    let snapshot = session.snapshot();
    assert_eq!(snapshot.status, SessionStatus::Unauthenticated);
    assert!(snapshot.credentials.is_none());
    assert!(snapshot.user.is_none());
    assert!(snapshot.refresh_in.is_none());
    assert!(!session.refresh_pending());
}

#[tokio::test]
async fn test_login_authenticates_and_arms_refresh() {
    let (server, api) = backend().await;
    let dir = tempfile::tempdir().expect("tempdir");
    let (access, exp) = access_token("olga", 300);
    mount_login(&server, &access, "r1").await;
    mount_identity(&server, &access).await;

    let session = SessionManager::new(api, TokenStore::new(FileStore::new(dir.path())));
    let snapshot = session.login("olga", "changeme").await.expect("login");

    assert_eq!(snapshot.status, SessionStatus::Authenticated);
    assert!(snapshot.is_authenticated());
    assert_eq!(session.auth_header(), Some(format!("Bearer {}", access)));

    // Identity came from /auth/me/, not from the token (which says Vérificateur)
    let user = snapshot.user.expect("identity resolved");
    assert!(user.is_admin());
    assert_eq!(user.email.as_deref(), Some("olga@ecofest.sn"));
    assert!(user.raw_payload.is_none());

    // 300s token -> refresh ~240s from now
    let refresh_in = snapshot.refresh_in.expect("refresh armed");
    assert!(refresh_in <= Duration::from_secs(240), "{:?}", refresh_in);
    assert!(refresh_in >= Duration::from_secs(235), "{:?}", refresh_in);

    // Persisted tokens decode back to the issued claims
    let stored = TokenStore::new(FileStore::new(dir.path())).load();
    let stored_access = stored.access.expect("access persisted");
    assert_eq!(stored_access, access);
    assert_eq!(stored.refresh.as_deref(), Some("r1"));
    let decoded = claims::decode(&stored_access).expect("stored access decodes");
    assert_eq!(decoded.exp, Some(exp));
    assert_eq!(decoded.subject.as_deref(), Some("olga"));
    assert_eq!(stored.user.and_then(|u| u.username).as_deref(), Some("olga"));

    assert!(RouteGuard::new().require_admin(&session).is_ok());
}

#[tokio::test]
async fn test_login_failure_surfaces_server_message_and_clears() {
    let (server, api) = backend().await;
    Mock::given(method("POST"))
        .and(path("/api/token/"))
        .respond_with(ResponseTemplate::new(401).set_body_json(json!({
            "detail": "No active account found with the given credentials"
        })))
        .mount(&server)
        .await;

    let backend = MemoryStore::new();
    backend.set("access", "stale").expect("set");
    backend.set("refresh", "stale").expect("set");
    let session = SessionManager::new(api, TokenStore::new(backend));
    session.restore_cached();

    let err = session.login("olga", "wrong").await.expect_err("login must fail");
    match err {
        SessionError::Login(message) => {
            assert_eq!(message, "No active account found with the given credentials")
        }
        other => panic!("unexpected error: {:?}", other),
    }
    assert_cleared(&session);
    assert!(RouteGuard::new().require(&session).is_err());
}

#[tokio::test]
async fn test_login_network_failure() {
    // Nothing listens on port 9
    let api = ApiClient::new("http://127.0.0.1:9/api").expect("client");
    let session = SessionManager::new(api, TokenStore::in_memory());
    let err = session.login("olga", "changeme").await.expect_err("login must fail");
    assert!(matches!(err, SessionError::Transport(_)), "{:?}", err);
    assert_cleared(&session);
}

#[tokio::test]
async fn test_identity_falls_back_to_token_claims() {
    let (server, api) = backend().await;
    let (access, _) = access_token("olga", 300);
    mount_login(&server, &access, "r1").await;
    Mock::given(method("GET"))
        .and(path("/api/auth/me/"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let resolver = festpass_core::auth::IdentityResolver::new(api.clone());
    let resolved = resolver.resolve_tiered(&access).await.expect("fallback tier");
    assert_eq!(resolved.source, IdentitySource::Token);

    let session = SessionManager::new(api, TokenStore::in_memory());
    let snapshot = session.login("olga", "changeme").await.expect("login");
    let user = snapshot.user.expect("identity from claims");
    assert_eq!(user.username.as_deref(), Some("olga"));
    assert!(user.has_role("vérificateur"));
    assert!(user.is_staff);
    assert!(user.raw_payload.is_some());
    assert!(RouteGuard::new().require_admin(&session).is_err());
}

#[tokio::test]
async fn test_resolve_fails_when_both_tiers_fail() {
    let (server, api) = backend().await;
    Mock::given(method("GET"))
        .and(path("/api/auth/me/"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>maintenance</html>"))
        .mount(&server)
        .await;

    let resolver = festpass_core::auth::IdentityResolver::new(api);
    let err = resolver.resolve_tiered("opaque-token").await.expect_err("both tiers fail");
    assert!(matches!(err.server, festpass_core::ApiError::InvalidResponse(_)));
    assert_eq!(err.decode, festpass_core::auth::DecodeError::SegmentCount(1));
    assert!(resolver.resolve("opaque-token").await.is_none());
}

#[tokio::test]
async fn test_logout_clears_everything() {
    let (server, api) = backend().await;
    let dir = tempfile::tempdir().expect("tempdir");
    let (session, _) = logged_in(&server, api, TokenStore::new(FileStore::new(dir.path()))).await;
    assert!(session.refresh_pending());

    session.logout();
    assert_cleared(&session);
    session.logout();
    assert_cleared(&session);

    let stored = TokenStore::new(FileStore::new(dir.path())).load();
    assert!(stored.access.is_none());
    assert!(stored.refresh.is_none());
    assert!(stored.user.is_none());
}

#[tokio::test]
async fn test_refresh_replaces_access_and_reschedules() {
    let (server, api) = backend().await;
    let (session, old_access) = logged_in(&server, api, TokenStore::in_memory()).await;
    let first_timer = session.snapshot().refresh_in.expect("armed");

    let (new_access, _) = access_token("olga", 600);
    Mock::given(method("POST"))
        .and(path("/api/token/refresh/"))
        .and(body_json(json!({"refresh": "r1"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"access": new_access})))
        .expect(1)
        .mount(&server)
        .await;
    mount_identity(&server, &new_access).await;

    let access = session.refresh_access().await.expect("refresh");
    assert_eq!(access, new_access);
    assert_ne!(access, old_access);

    let snapshot = session.snapshot();
    assert_eq!(snapshot.status, SessionStatus::Authenticated);
    let credentials = snapshot.credentials.expect("credentials");
    assert_eq!(credentials.access, new_access);
    // No rotation in the response: the old refresh token is kept
    assert_eq!(credentials.refresh.as_deref(), Some("r1"));
    assert!(snapshot.refresh_in.expect("re-armed") > first_timer);
}

#[tokio::test]
async fn test_refresh_rotation_is_persisted() {
    let (server, api) = backend().await;
    let dir = tempfile::tempdir().expect("tempdir");
    let (session, _) = logged_in(&server, api, TokenStore::new(FileStore::new(dir.path()))).await;

    let (new_access, _) = access_token("olga", 300);
    Mock::given(method("POST"))
        .and(path("/api/token/refresh/"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access": new_access,
            "refresh": "r2",
        })))
        .mount(&server)
        .await;
    mount_identity(&server, &new_access).await;

    session.refresh_access().await.expect("refresh");
    let stored = TokenStore::new(FileStore::new(dir.path())).load();
    assert_eq!(stored.access.as_deref(), Some(new_access.as_str()));
    assert_eq!(stored.refresh.as_deref(), Some("r2"));
}

#[tokio::test]
async fn test_failed_refresh_is_terminal() {
    let (server, api) = backend().await;
    let dir = tempfile::tempdir().expect("tempdir");
    let (session, _) = logged_in(&server, api, TokenStore::new(FileStore::new(dir.path()))).await;

    Mock::given(method("POST"))
        .and(path("/api/token/refresh/"))
        .respond_with(ResponseTemplate::new(401).set_body_json(json!({
            "detail": "Token is invalid or expired",
            "code": "token_not_valid"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let err = session.refresh_access().await.expect_err("refresh must fail");
    assert!(matches!(err, SessionError::RefreshRejected(_)), "{:?}", err);
    assert_cleared(&session);
    assert!(TokenStore::new(FileStore::new(dir.path())).load().access.is_none());

    // No retry on a second call: there is nothing left to refresh with
    let err = session.refresh_access().await.expect_err("nothing to refresh");
    assert!(matches!(err, SessionError::NoRefreshCredential));
}

#[tokio::test]
async fn test_refresh_response_without_access_is_terminal() {
    let (server, api) = backend().await;
    let (session, _) = logged_in(&server, api, TokenStore::in_memory()).await;
    Mock::given(method("POST"))
        .and(path("/api/token/refresh/"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"detail": "ok"})))
        .mount(&server)
        .await;

    assert!(session.refresh_access().await.is_err());
    assert_cleared(&session);
}

#[tokio::test]
async fn test_startup_with_expired_access_refreshes() {
    let (server, api) = backend().await;
    let (expired, _) = access_token("olga", -30);
    let (fresh, _) = access_token("olga", 300);

    let backend = MemoryStore::new();
    backend.set("access", &expired).expect("set");
    backend.set("refresh", "r1").expect("set");
    backend
        .set("user", &identity_body("olga").to_string())
        .expect("set");

    Mock::given(method("POST"))
        .and(path("/api/token/refresh/"))
        .and(body_json(json!({"refresh": "r1"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"access": fresh})))
        .expect(1)
        .mount(&server)
        .await;
    mount_identity(&server, &fresh).await;

    let session = SessionManager::new(api, TokenStore::new(backend));

    // Cached identity is available before any network call
    assert!(session.restore_cached());
    assert!(session.is_authenticated());
    assert_eq!(session.access_token().as_deref(), Some(expired.as_str()));

    session.revalidate().await;
    let snapshot = session.snapshot();
    assert_eq!(snapshot.status, SessionStatus::Authenticated);
    assert_eq!(snapshot.access_token(), Some(fresh.as_str()));
    assert!(snapshot.refresh_in.is_some());
}

#[tokio::test]
async fn test_startup_with_corrupt_access_refreshes() {
    let (server, api) = backend().await;
    let (fresh, _) = access_token("olga", 300);

    let backend = MemoryStore::new();
    backend.set("access", "%%corrupt%%").expect("set");
    backend.set("refresh", "r1").expect("set");

    Mock::given(method("POST"))
        .and(path("/api/token/refresh/"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"access": fresh})))
        .expect(1)
        .mount(&server)
        .await;
    mount_identity(&server, &fresh).await;

    let session = SessionManager::new(api, TokenStore::new(backend));
    let snapshot = session.rehydrate().await;
    assert!(snapshot.is_authenticated());
    assert_eq!(snapshot.access_token(), Some(fresh.as_str()));
}

#[tokio::test]
async fn test_startup_with_valid_access_resolves_identity() {
    let (server, api) = backend().await;
    let (access, _) = access_token("olga", 300);
    mount_identity(&server, &access).await;
    Mock::given(method("POST"))
        .and(path("/api/token/refresh/"))
        .respond_with(ResponseTemplate::new(500))
        .expect(0)
        .mount(&server)
        .await;

    let backend = MemoryStore::new();
    backend.set("access", &access).expect("set");
    backend.set("refresh", "r1").expect("set");

    let session = SessionManager::new(api, TokenStore::new(backend));
    let snapshot = session.rehydrate().await;
    assert_eq!(snapshot.status, SessionStatus::Authenticated);
    assert!(snapshot.user.expect("identity").is_admin());
    assert!(snapshot.refresh_in.is_some());
}

#[tokio::test]
async fn test_rapid_schedule_keeps_one_timer() {
    let (server, api) = backend().await;
    let (session, _) = logged_in(&server, api, TokenStore::in_memory()).await;

    let (short, _) = access_token("olga", 120);
    let (long, _) = access_token("olga", 3600);
    let first = session.schedule_refresh(&long).expect("armed");
    let second = session.schedule_refresh(&short).expect("armed");
    assert!(first > second);

    // Only the last timer is pending
    let remaining = session.snapshot().refresh_in.expect("armed");
    assert!(remaining <= second);
    assert!(remaining >= Duration::from_secs(55));
}

#[tokio::test]
async fn test_refresh_after_logout_does_not_resurrect_session() {
    let (server, api) = backend().await;
    let (session, _) = logged_in(&server, api, TokenStore::in_memory()).await;

    let (new_access, _) = access_token("olga", 300);
    Mock::given(method("POST"))
        .and(path("/api/token/refresh/"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"access": new_access}))
                .set_delay(Duration::from_millis(300)),
        )
        .mount(&server)
        .await;
    mount_identity(&server, &new_access).await;

    let in_flight = tokio::spawn({
        let session = session.clone();
        async move { session.refresh_access().await }
    });
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(session.status(), SessionStatus::Refreshing);
    session.logout();

    let result = in_flight.await.expect("task");
    assert!(matches!(result, Err(SessionError::Superseded)), "{:?}", result);
    assert_cleared(&session);
}

#[tokio::test]
async fn test_concurrent_refreshes_are_single_flight() {
    let (server, api) = backend().await;
    let (session, _) = logged_in(&server, api, TokenStore::in_memory()).await;

    let (new_access, _) = access_token("olga", 300);
    Mock::given(method("POST"))
        .and(path("/api/token/refresh/"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"access": new_access}))
                .set_delay(Duration::from_millis(100)),
        )
        .expect(1)
        .mount(&server)
        .await;
    mount_identity(&server, &new_access).await;

    let (a, b) = tokio::join!(session.refresh_access(), session.refresh_access());
    assert_eq!(a.expect("first refresh"), new_access);
    assert_eq!(b.expect("second refresh reuses the first"), new_access);
}

#[tokio::test]
async fn test_timer_driven_refresh_replaces_access() {
    let (server, api) = backend().await;
    // Expires 61s from now: the timer clamps to the 1s minimum
    let (short, _) = access_token("olga", 61);
    mount_login(&server, &short, "r1").await;
    mount_identity(&server, &short).await;

    let (fresh, _) = access_token("olga", 300);
    Mock::given(method("POST"))
        .and(path("/api/token/refresh/"))
        .and(body_json(json!({"refresh": "r1"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"access": fresh})))
        .expect(1)
        .mount(&server)
        .await;
    mount_identity(&server, &fresh).await;

    let session = SessionManager::new(api, TokenStore::in_memory());
    let snapshot = session.login("olga", "changeme").await.expect("login");
    assert!(snapshot.refresh_in.expect("armed") <= Duration::from_secs(1));

    tokio::time::sleep(Duration::from_millis(2500)).await;

    let snapshot = session.snapshot();
    assert_eq!(snapshot.status, SessionStatus::Authenticated);
    assert_eq!(snapshot.access_token(), Some(fresh.as_str()));
    assert!(snapshot.user.expect("identity kept").is_admin());
    // Re-armed for the new token
    let refresh_in = snapshot.refresh_in.expect("re-armed");
    assert!(refresh_in > Duration::from_secs(230), "{:?}", refresh_in);
}

#[tokio::test]
async fn test_timer_driven_refresh_failure_signs_out() {
    let (server, api) = backend().await;
    let dir = tempfile::tempdir().expect("tempdir");
    let (short, _) = access_token("olga", 61);
    mount_login(&server, &short, "r1").await;
    mount_identity(&server, &short).await;
    Mock::given(method("POST"))
        .and(path("/api/token/refresh/"))
        .respond_with(ResponseTemplate::new(401).set_body_json(json!({
            "detail": "Token is blacklisted",
            "code": "token_not_valid"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let session = SessionManager::new(api, TokenStore::new(FileStore::new(dir.path())));
    session.login("olga", "changeme").await.expect("login");
    assert!(session.refresh_pending());

    tokio::time::sleep(Duration::from_millis(2500)).await;

    assert_cleared(&session);
    let stored = TokenStore::new(FileStore::new(dir.path())).load();
    assert_eq!(stored, Default::default());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_logout_racing_refresh_never_leaves_a_timer() {
    let (server, api) = backend().await;
    let (access, _) = access_token("olga", 300);
    let (fresh, _) = access_token("olga", 600);
    Mock::given(method("POST"))
        .and(path("/api/token/"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access": access,
            "refresh": "r1",
        })))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/token/refresh/"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"access": fresh})))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/auth/me/"))
        .respond_with(ResponseTemplate::new(200).set_body_json(identity_body("olga")))
        .mount(&server)
        .await;

    let session = SessionManager::new(api, TokenStore::in_memory());
    for round in 0..20 {
        session.login("olga", "changeme").await.expect("login");
        let refresh = tokio::spawn({
            let session = session.clone();
            async move { session.refresh_access().await }
        });
        if round % 2 == 0 {
            tokio::task::yield_now().await;
        }
        session.logout();
        // Ok, Superseded or NoRefreshCredential depending on the interleaving
        let _ = refresh.await.expect("task");

        assert_eq!(session.status(), SessionStatus::Unauthenticated, "round {}", round);
        assert!(!session.refresh_pending(), "round {}", round);
        assert!(session.access_token().is_none(), "round {}", round);
    }
}

#[tokio::test]
async fn test_reload_identity_picks_up_role_change() {
    let (server, api) = backend().await;
    let dir = tempfile::tempdir().expect("tempdir");
    let (session, _) = logged_in(&server, api, TokenStore::new(FileStore::new(dir.path()))).await;
    assert!(session.current_user().expect("user").is_admin());

    // Demoted on the server after the token was issued
    let mut demoted = identity_body("olga");
    demoted["role"] = json!("Vérificateur");
    Mock::given(method("GET"))
        .and(path("/api/auth/me/"))
        .respond_with(ResponseTemplate::new(200).set_body_json(demoted))
        .with_priority(1)
        .mount(&server)
        .await;

    let user = session.reload_identity().await.expect("identity reloaded");
    assert!(!user.is_admin());
    assert!(!session.current_user().expect("user").is_admin());
    assert!(RouteGuard::new().require_admin(&session).is_err());

    let stored = TokenStore::new(FileStore::new(dir.path())).load();
    assert!(!stored.user.expect("cached identity").is_admin());

    session.logout();
    assert!(session.reload_identity().await.is_none());
}
