//! HTTP surface tests: routing, the credential gate, and admin revocation.

use std::sync::{Arc, Mutex};

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tokio::sync::broadcast;
use tower::ServiceExt;
use tracing::instrument::WithSubscriber;
use uuid::Uuid;

use keyfabric::config::Config;
use keyfabric::server::{build_router, AppState};

const ADMIN_TOKEN: &str = "test-admin-token";

struct TestApp {
    router: Router,
    api_key: String,
    api_secret: String,
    _dir: tempfile::TempDir,
}

fn test_app() -> TestApp {
    let dir = tempfile::tempdir().unwrap();
    let mut config = Config::default();
    config.jwt.key_path = dir
        .path()
        .join("signing-key.pem")
        .to_string_lossy()
        .into_owned();
    config.auth.admin_token = Some(ADMIN_TOKEN.to_string());

    let (shutdown, _) = broadcast::channel(1);
    let state = AppState::from_config(config, &shutdown).unwrap();
    let new = state.authenticator().create("svc-test", "test", None).unwrap();

    TestApp {
        router: build_router(state),
        api_key: new.credential.key,
        api_secret: new.secret,
        _dir: dir,
    }
}

async fn send(router: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, body)
}

fn authed_json_request(app: &TestApp, method: &str, uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .header("x-api-key", &app.api_key)
        .header("x-api-secret", &app.api_secret)
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn issue_body() -> Value {
    json!({
        "user_id": Uuid::new_v4(),
        "name": "alice",
        "role": "admin",
        "session_id": Uuid::new_v4(),
    })
}

#[tokio::test]
async fn health_and_jwks_are_public() {
    let app = test_app();

    let (status, body) = send(
        &app.router,
        Request::get("/health").body(Body::empty()).unwrap(),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");

    let (status, body) = send(
        &app.router,
        Request::get("/.well-known/jwks.json")
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let keys = body["keys"].as_array().unwrap();
    assert_eq!(keys.len(), 1);
    assert_eq!(keys[0]["kty"], "RSA");
    assert_eq!(keys[0]["alg"], "RS256");

    let (status, body) = send(
        &app.router,
        Request::get("/.well-known/jwks/health")
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert_eq!(body["algorithm"], "RS256");
    assert_eq!(body["kid"], keys[0]["kid"]);
}

#[tokio::test]
async fn token_issuance_requires_credentials() {
    let app = test_app();

    let bare = Request::post("/auth/token")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(issue_body().to_string()))
        .unwrap();
    let (status, body) = send(&app.router, bare).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    // The 401 body never says which check failed.
    assert_eq!(body["error"], "unauthorized");

    let (status, body) = send(
        &app.router,
        authed_json_request(&app, "POST", "/auth/token", issue_body()),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["token"].as_str().unwrap().contains('.'));
    assert!(body["jti"].as_str().is_some());
}

#[tokio::test]
async fn wrong_secret_gets_same_generic_401() {
    let app = test_app();

    let request = Request::post("/auth/token")
        .header(header::CONTENT_TYPE, "application/json")
        .header("x-api-key", &app.api_key)
        .header("x-api-secret", "wrong")
        .body(Body::from(issue_body().to_string()))
        .unwrap();

    let (status, body) = send(&app.router, request).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "unauthorized");
}

#[tokio::test]
async fn issued_token_validates_over_http() {
    let app = test_app();

    let (_, issued) = send(
        &app.router,
        authed_json_request(&app, "POST", "/auth/token", issue_body()),
    )
    .await;

    let (status, body) = send(
        &app.router,
        authed_json_request(
            &app,
            "POST",
            "/auth/validate",
            json!({"token": issued["token"]}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["username"], "alice");
    assert_eq!(body["jti"], issued["jti"]);
}

#[tokio::test]
async fn revocation_needs_admin_token_and_takes_effect() {
    let app = test_app();

    let (_, issued) = send(
        &app.router,
        authed_json_request(&app, "POST", "/auth/token", issue_body()),
    )
    .await;
    let jti = issued["jti"].as_str().unwrap().to_string();

    // Admin bearer missing.
    let (status, _) = send(
        &app.router,
        authed_json_request(&app, "DELETE", &format!("/auth/token/{jti}"), json!({})),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    // With the admin bearer.
    let mut request = authed_json_request(
        &app,
        "DELETE",
        &format!("/auth/token/{jti}"),
        json!({"expires_at": issued["expires_at"]}),
    );
    request.headers_mut().insert(
        header::AUTHORIZATION,
        format!("Bearer {ADMIN_TOKEN}").parse().unwrap(),
    );
    let (status, body) = send(&app.router, request).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["revoked"], jti);

    // The revoked token now fails validation, still as a generic 401.
    let (status, body) = send(
        &app.router,
        authed_json_request(
            &app,
            "POST",
            "/auth/validate",
            json!({"token": issued["token"]}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "unauthorized");
}

#[tokio::test]
async fn configured_credentials_are_provisioned_at_startup() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = Config::default();
    config.jwt.key_path = dir.path().join("k.pem").to_string_lossy().into_owned();
    config.auth.credentials = vec![keyfabric::config::CredentialSeed {
        client_id: "svc-seeded".to_string(),
        name: "from-config".to_string(),
        key: "kf_seeded".to_string(),
        secret: "seeded-secret".to_string(),
        valid_till: None,
    }];

    let (shutdown, _) = broadcast::channel(1);
    let state = AppState::from_config(config, &shutdown).unwrap();
    let router = build_router(state);

    let request = Request::post("/auth/token")
        .header(header::CONTENT_TYPE, "application/json")
        .header("x-api-key", "kf_seeded")
        .header("x-api-secret", "seeded-secret")
        .body(Body::from(issue_body().to_string()))
        .unwrap();
    let (status, body) = send(&router, request).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["token"].as_str().is_some());

    let wrong = Request::post("/auth/token")
        .header(header::CONTENT_TYPE, "application/json")
        .header("x-api-key", "kf_seeded")
        .header("x-api-secret", "not-the-secret")
        .body(Body::from(issue_body().to_string()))
        .unwrap();
    let (status, _) = send(&router, wrong).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[derive(Clone, Default)]
struct CaptureWriter(Arc<Mutex<Vec<u8>>>);

impl std::io::Write for CaptureWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

#[tokio::test]
async fn issuance_emits_audit_event() {
    let app = test_app();
    let writer = CaptureWriter::default();
    let buffer = Arc::clone(&writer.0);
    let subscriber = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .with_writer(move || writer.clone())
        .with_ansi(false)
        .finish();

    let (status, _) = async {
        send(
            &app.router,
            authed_json_request(&app, "POST", "/auth/token", issue_body()),
        )
        .await
    }
    .with_subscriber(subscriber)
    .await;
    assert_eq!(status, StatusCode::OK);

    let logs = String::from_utf8(buffer.lock().unwrap().clone()).unwrap();
    assert!(logs.contains("Issued token"));
    assert!(logs.contains("role=admin"));
    assert!(logs.contains("jti="));
}

#[tokio::test]
async fn admin_endpoint_disabled_without_configured_token() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = Config::default();
    config.jwt.key_path = dir.path().join("k.pem").to_string_lossy().into_owned();

    let (shutdown, _) = broadcast::channel(1);
    let state = AppState::from_config(config, &shutdown).unwrap();
    let new = state.authenticator().create("svc", "t", None).unwrap();
    let router = build_router(state);

    let request = Request::delete("/auth/token/some-jti")
        .header("x-api-key", &new.credential.key)
        .header("x-api-secret", &new.secret)
        .header(header::AUTHORIZATION, "Bearer anything")
        .body(Body::empty())
        .unwrap();

    let (status, body) = send(&router, request).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["error"], "admin_disabled");
}
