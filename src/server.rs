//! HTTP surface: JWKS publication, token issuance/validation/revocation,
//! all behind the API credential gate.
//!
//! Authentication failures at this boundary are deliberately uniform: a
//! generic 401 regardless of whether the key was unknown, the secret
//! wrong, or the token expired. The specific reason goes to the logs.

use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{Path, Request, State},
    http::{HeaderMap, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Json, Router,
};
use chrono::{TimeZone, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use subtle::ConstantTimeEq;
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::config::{CacheBackend, Config};
use crate::credentials::{ApiKeyAuthenticator, AuthenticatedClient, CredentialError};
use crate::keys::{
    JwksPublisher, JwksRefreshService, KeyResolver, KeyStore, LocalKeyResolver, MemoryKeyCache,
    RedisKeyCache, TokenIssuer, TokenValidator,
};
use crate::revocation::{MemoryRevocationStore, RedisRevocationStore, RevocationStore};
use crate::{Error, Result};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    publisher: JwksPublisher,
    issuer: TokenIssuer,
    validator: Arc<TokenValidator>,
    revocations: Arc<dyn RevocationStore>,
    authenticator: Arc<ApiKeyAuthenticator>,
    config: Arc<Config>,
}

impl AppState {
    /// Wire up all subsystems from configuration.
    ///
    /// When `jwks.authority_url` is set, validation resolves keys through
    /// the fetch/cache pipeline (consumer mode); otherwise it reads the
    /// co-located publisher directly.
    pub fn from_config(config: Config, shutdown: &broadcast::Sender<()>) -> Result<Self> {
        let key_store = Arc::new(KeyStore::load_or_generate(std::path::Path::new(
            &config.jwt.key_path,
        ))?);
        let publisher = JwksPublisher::new(Arc::clone(&key_store));
        let issuer = TokenIssuer::new(
            Arc::clone(&key_store),
            config.jwt.issuer.clone(),
            config.jwt.audience.clone(),
            config.jwt.token_ttl_secs,
        );

        let revocations: Arc<dyn RevocationStore> = match config.revocation.backend {
            CacheBackend::Memory => {
                let store = Arc::new(MemoryRevocationStore::new());
                let reaper = Arc::clone(&store);
                let rx = shutdown.subscribe();
                let interval = Duration::from_secs(config.revocation.reap_interval_secs);
                tokio::spawn(async move { reaper.run_reaper(interval, rx).await });
                store
            }
            CacheBackend::Redis => {
                let url = config.revocation.redis_url.as_deref().ok_or_else(|| {
                    Error::Config("revocation.redis_url required for redis backend".to_string())
                })?;
                Arc::new(RedisRevocationStore::new(url)?)
            }
        };

        let resolver: Arc<dyn KeyResolver> = if config.jwks.authority_url.is_empty() {
            Arc::new(LocalKeyResolver::new(publisher.clone()))
        } else {
            let refresh = Arc::new(build_refresh_service(&config)?);
            let looper = Arc::clone(&refresh);
            let rx = shutdown.subscribe();
            tokio::spawn(async move { looper.run(rx).await });
            refresh
        };

        let validator = Arc::new(TokenValidator::new(
            resolver,
            Arc::clone(&revocations),
            config.jwt.issuer.clone(),
            config.jwt.audience.clone(),
            config.jwt.clock_skew_secs,
        ));

        let authenticator = Arc::new(ApiKeyAuthenticator::new());
        for seed in &config.auth.credentials {
            authenticator.register(
                &seed.client_id,
                &seed.name,
                &seed.key,
                &seed.secret,
                seed.valid_till,
            )?;
        }
        if config.auth.credentials.is_empty() {
            tracing::warn!(
                "No API credentials provisioned; only public paths will be reachable"
            );
        } else {
            tracing::info!(
                count = config.auth.credentials.len(),
                "Provisioned API credentials from configuration"
            );
        }

        Ok(Self {
            publisher,
            issuer,
            validator,
            revocations,
            authenticator,
            config: Arc::new(config),
        })
    }

    /// The credential registry, for seeding at startup or from tests.
    pub fn authenticator(&self) -> &ApiKeyAuthenticator {
        &self.authenticator
    }
}

fn build_refresh_service(config: &Config) -> Result<JwksRefreshService> {
    let ttl = Duration::from_secs(config.jwks.cache_ttl_secs);
    let cache: Box<dyn crate::keys::JwksKeyCache> = match config.jwks.cache_backend {
        CacheBackend::Memory => Box::new(MemoryKeyCache::new(ttl)),
        CacheBackend::Redis => {
            let url = config.jwks.redis_url.as_deref().ok_or_else(|| {
                Error::Config("jwks.redis_url required for redis backend".to_string())
            })?;
            Box::new(RedisKeyCache::new(url, ttl)?)
        }
    };
    JwksRefreshService::new(
        config.jwks.authority_url.clone(),
        cache,
        Duration::from_secs(config.jwks.refresh_interval_secs),
        Duration::from_secs(config.jwks.fetch_timeout_secs),
    )
}

/// Build the router with all routes and the credential middleware.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/.well-known/jwks.json", get(jwks_document))
        .route("/.well-known/jwks/health", get(jwks_health))
        .route("/auth/token", post(issue_token))
        .route("/auth/validate", post(validate_token))
        .route("/auth/token/{jti}", delete(revoke_token))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            credential_middleware,
        ))
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .with_state(state)
}

/// Run the server until ctrl-c.
pub async fn run_server(config: Config) -> Result<()> {
    let addr = format!("{}:{}", config.server.host, config.server.port);
    let (shutdown_tx, _) = broadcast::channel(1);

    let state = AppState::from_config(config, &shutdown_tx)?;
    let app = build_router(state);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Listening on {addr}");

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("Shutdown signal received");
            let _ = shutdown_tx.send(());
        })
        .await?;

    Ok(())
}

// ---------------------------------------------------------------------------
// Middleware

fn is_public_path(path: &str, public_paths: &[String]) -> bool {
    public_paths.iter().any(|p| path.starts_with(p.as_str()))
}

/// Gate every non-public route behind the key/secret check. On success the
/// authenticated client rides along as a request extension.
async fn credential_middleware(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Response {
    let path = request.uri().path().to_string();
    if is_public_path(&path, &state.config.auth.public_paths) {
        return next.run(request).await;
    }

    let client = match check_credentials(&state, request.headers()) {
        Ok(client) => client,
        Err(e) => {
            tracing::warn!(%path, reason = %e, "API credential check failed");
            return unauthorized_response();
        }
    };

    tracing::debug!(client_id = %client.client_id, %path, "Authenticated service call");
    request.extensions_mut().insert(client);
    next.run(request).await
}

fn check_credentials(
    state: &AppState,
    headers: &HeaderMap,
) -> std::result::Result<AuthenticatedClient, CredentialError> {
    let key = header_str(headers, "x-api-key").ok_or(CredentialError::MissingCredential)?;
    let secret = header_str(headers, "x-api-secret").ok_or(CredentialError::MissingCredential)?;
    state.authenticator.authenticate(key, secret)
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

// ---------------------------------------------------------------------------
// Handlers

async fn health() -> impl IntoResponse {
    Json(json!({"status": "ok"}))
}

async fn jwks_document(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.publisher.document())
}

async fn jwks_health(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.publisher.health())
}

#[derive(Debug, Deserialize)]
struct IssueTokenRequest {
    user_id: Uuid,
    name: String,
    role: String,
    session_id: Uuid,
    /// Overrides the configured token lifetime when present.
    #[serde(default)]
    ttl_secs: Option<u64>,
}

#[derive(Debug, Serialize)]
struct IssueTokenResponse {
    token: String,
    jti: String,
    expires_at: i64,
}

async fn issue_token(
    State(state): State<AppState>,
    Json(req): Json<IssueTokenRequest>,
) -> Response {
    match state
        .issuer
        .issue_with_ttl(req.user_id, &req.name, &req.role, req.session_id, req.ttl_secs)
    {
        Ok(issued) => {
            tracing::info!(
                user_id = %req.user_id,
                role = %req.role,
                session_id = %req.session_id,
                jti = %issued.jti,
                "Issued token"
            );
            (
                StatusCode::OK,
                Json(IssueTokenResponse {
                    token: issued.token,
                    jti: issued.jti,
                    expires_at: issued.expires_at,
                }),
            )
                .into_response()
        }
        Err(e) => {
            tracing::error!("Token issuance failed: {e}");
            error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                "issuance_failed",
                "Could not issue token",
            )
        }
    }
}

#[derive(Debug, Deserialize)]
struct ValidateRequest {
    token: String,
}

#[derive(Debug, Serialize)]
struct ValidateResponse {
    user_id: Uuid,
    username: String,
    role: String,
    session_id: Uuid,
    jti: String,
    expires_at: i64,
}

async fn validate_token(
    State(state): State<AppState>,
    Json(req): Json<ValidateRequest>,
) -> Response {
    match state.validator.validate(&req.token).await {
        Ok(principal) => (
            StatusCode::OK,
            Json(ValidateResponse {
                user_id: principal.user_id,
                username: principal.username,
                role: principal.role,
                session_id: principal.session_id,
                jti: principal.jti,
                expires_at: principal.expires_at.timestamp(),
            }),
        )
            .into_response(),
        Err(e) => {
            tracing::warn!(reason = %e, "Token validation failed");
            unauthorized_response()
        }
    }
}

#[derive(Debug, Deserialize, Default)]
struct RevokeRequest {
    /// The token's `exp`; the entry is kept until then. Defaults to the
    /// configured token TTL from now when omitted.
    expires_at: Option<i64>,
}

async fn revoke_token(
    State(state): State<AppState>,
    Path(jti): Path<String>,
    headers: HeaderMap,
    body: Option<Json<RevokeRequest>>,
) -> Response {
    if let Err(resp) = check_admin_auth(&state, &headers) {
        return resp;
    }

    let ttl = i64::try_from(state.config.jwt.token_ttl_secs).unwrap_or(i64::MAX);
    let default_expiry = Utc::now() + chrono::Duration::seconds(ttl);
    let expiry = body
        .and_then(|Json(r)| r.expires_at)
        .and_then(|ts| Utc.timestamp_opt(ts, 0).single())
        .unwrap_or(default_expiry);

    match state.revocations.revoke(&jti, expiry).await {
        Ok(()) => {
            tracing::info!(%jti, "Token revoked");
            (StatusCode::OK, Json(json!({"revoked": jti}))).into_response()
        }
        Err(e) => {
            tracing::error!(%jti, "Revocation failed: {e}");
            error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                "revocation_failed",
                "Could not revoke token",
            )
        }
    }
}

fn check_admin_auth(state: &AppState, headers: &HeaderMap) -> std::result::Result<(), Response> {
    let Some(expected) = state.config.auth.admin_token.as_deref() else {
        return Err(error_response(
            StatusCode::SERVICE_UNAVAILABLE,
            "admin_disabled",
            "Admin operations are not configured",
        ));
    };

    let presented = header_str(headers, "authorization")
        .and_then(|v| v.strip_prefix("Bearer "))
        .unwrap_or("");

    if bool::from(presented.as_bytes().ct_eq(expected.as_bytes())) {
        Ok(())
    } else {
        Err(unauthorized_response())
    }
}

// ---------------------------------------------------------------------------
// Responses

fn error_response(status: StatusCode, error: &str, message: &str) -> Response {
    (status, Json(json!({"error": error, "message": message}))).into_response()
}

/// Deliberately reason-free 401.
fn unauthorized_response() -> Response {
    error_response(
        StatusCode::UNAUTHORIZED,
        "unauthorized",
        "Authentication required",
    )
}
