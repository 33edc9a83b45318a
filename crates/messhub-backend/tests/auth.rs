//! Integration tests for `RestBackend` authentication and session persistence.

use std::sync::Arc;

use messhub_backend::{AuthClient, BackendError, OtpKind, Query, RemoteBackend, RestBackend};
use messhub_core::{KeyValueStore, MemoryKeyValueStore};
use serde_json::json;
use wiremock::matchers::{body_json, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

const USER_ID: &str = "6f1c2d3e-4b5a-4c7d-8e9f-0a1b2c3d4e5f";

fn session_json(token: &str, expires_at: i64) -> serde_json::Value {
    json!({
        "access_token": token,
        "token_type": "bearer",
        "expires_in": 3600,
        "expires_at": expires_at,
        "refresh_token": "refresh",
        "user": { "id": USER_ID, "email": "cook@example.test", "role": "authenticated" }
    })
}

fn memory_backend(uri: &str) -> RestBackend {
    RestBackend::new(uri, "anon-key", 5, Arc::new(MemoryKeyValueStore::new())).unwrap()
}

fn far_future() -> i64 {
    chrono::Utc::now().timestamp() + 3_600
}

async fn mount_sign_in(server: &MockServer, token: &str) {
    Mock::given(method("POST"))
        .and(path("/auth/v1/token"))
        .and(query_param("grant_type", "password"))
        .and(body_json(json!({"email": "cook@example.test", "password": "pw"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(session_json(token, far_future())))
        .mount(server)
        .await;
}

#[tokio::test]
async fn sign_in_persists_session_and_notifies_watchers() {
    let server = MockServer::start().await;
    mount_sign_in(&server, "user-token").await;

    let kv = Arc::new(MemoryKeyValueStore::new());
    let backend = RestBackend::new(&server.uri(), "anon-key", 5, kv.clone()).unwrap();
    let mut changes = backend.on_auth_state_change();

    let session = backend
        .sign_in_with_password("cook@example.test", "pw")
        .await
        .expect("sign in should succeed");

    assert_eq!(session.user.id.to_string(), USER_ID);
    assert!(changes.has_changed().unwrap());
    assert_eq!(
        changes.borrow_and_update().as_ref().map(|s| s.access_token.as_str()),
        Some("user-token")
    );
    assert!(kv.get_item("messhub.auth.session").unwrap().is_some());
}

#[tokio::test]
async fn signed_in_requests_carry_the_access_token() {
    let server = MockServer::start().await;
    mount_sign_in(&server, "user-token").await;

    Mock::given(method("GET"))
        .and(path("/rest/v1/memberships"))
        .and(header("authorization", "Bearer user-token"))
        .and(header("apikey", "anon-key"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .expect(1)
        .mount(&server)
        .await;

    let backend = memory_backend(&server.uri());
    backend.sign_in_with_password("cook@example.test", "pw").await.unwrap();
    backend.select(&Query::table("memberships")).await.unwrap();
}

#[tokio::test]
async fn rejected_credentials_are_an_auth_api_error() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/auth/v1/token"))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({
            "error": "invalid_grant",
            "error_description": "Invalid login credentials"
        })))
        .mount(&server)
        .await;

    let backend = memory_backend(&server.uri());
    let err = backend
        .sign_in_with_password("cook@example.test", "wrong")
        .await
        .unwrap_err();

    match err {
        BackendError::Api { code, message, .. } => {
            assert_eq!(code, "invalid_grant");
            assert_eq!(message, "Invalid login credentials");
        }
        other => panic!("expected Api error, got {other:?}"),
    }
    assert!(backend.session().is_none());
}

#[tokio::test]
async fn sign_out_clears_local_session_even_when_remote_fails() {
    let server = MockServer::start().await;
    mount_sign_in(&server, "user-token").await;

    Mock::given(method("POST"))
        .and(path("/auth/v1/logout"))
        .respond_with(ResponseTemplate::new(500))
        .expect(1)
        .mount(&server)
        .await;

    let kv = Arc::new(MemoryKeyValueStore::new());
    let backend = RestBackend::new(&server.uri(), "anon-key", 5, kv.clone()).unwrap();
    backend.sign_in_with_password("cook@example.test", "pw").await.unwrap();

    backend.sign_out().await.expect("sign out should succeed");
    assert!(backend.session().is_none());
    assert!(kv.get_item("messhub.auth.session").unwrap().is_none());

    // second sign-out never reaches the server
    backend.sign_out().await.expect("sign out is idempotent");
}

#[tokio::test]
async fn restore_session_reads_persisted_value_and_drops_expired_ones() {
    let kv = Arc::new(MemoryKeyValueStore::new());
    let backend =
        RestBackend::new("http://127.0.0.1:9", "anon-key", 5, kv.clone()).unwrap();

    assert!(backend.restore_session().unwrap().is_none());

    kv.set_item(
        "messhub.auth.session",
        &session_json("stored", far_future()).to_string(),
    )
    .unwrap();
    let restored = backend.restore_session().unwrap().expect("session restored");
    assert_eq!(restored.access_token, "stored");
    assert_eq!(backend.session(), Some(restored));

    kv.set_item("messhub.auth.session", &session_json("old", 1).to_string())
        .unwrap();
    assert!(backend.restore_session().unwrap().is_none());
    assert!(backend.session().is_none());
    assert!(kv.get_item("messhub.auth.session").unwrap().is_none());
}

#[tokio::test]
async fn sign_up_without_confirmation_returns_user_only() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/auth/v1/signup"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": USER_ID,
            "email": "new@example.test",
            "confirmation_sent_at": "2026-10-16T09:00:00Z"
        })))
        .mount(&server)
        .await;

    let backend = memory_backend(&server.uri());
    let outcome = backend.sign_up("new@example.test", "pw").await.unwrap();
    assert!(outcome.session.is_none());
    assert_eq!(outcome.user.email.as_deref(), Some("new@example.test"));
    assert!(backend.session().is_none());
}

#[tokio::test]
async fn verify_otp_starts_a_session() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/auth/v1/verify"))
        .and(body_json(json!({
            "email": "cook@example.test",
            "token": "123456",
            "type": "signup"
        })))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(session_json("otp-token", far_future())),
        )
        .mount(&server)
        .await;

    let backend = memory_backend(&server.uri());
    let session = backend
        .verify_otp("cook@example.test", "123456", OtpKind::Signup)
        .await
        .unwrap();
    assert_eq!(session.access_token, "otp-token");
}

#[tokio::test]
async fn update_password_requires_a_session() {
    let backend = memory_backend("http://127.0.0.1:9");
    let err = backend.update_password("new-pw").await.unwrap_err();
    assert!(matches!(err, BackendError::Unauthenticated));
}

#[tokio::test]
async fn password_recovery_accepts_empty_body() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/auth/v1/recover"))
        .and(body_json(json!({"email": "cook@example.test"})))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let backend = memory_backend(&server.uri());
    backend
        .reset_password_for_email("cook@example.test")
        .await
        .unwrap();
}
