//! `POST /v1/auth/login`.
//!
//! Unknown users and wrong passwords get the same 401 body. A locked key gets
//! 429 with `Retry-After` and never reaches password verification. Failures
//! leave a flash on the caller's session, creating an anonymous one if needed.

use axum::{
    extract::{ConnectInfo, Extension},
    http::{header::RETRY_AFTER, HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Json, Response},
};
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use std::{net::SocketAddr, sync::Arc, time::Duration};
use tracing::{error, instrument, warn};
use utoipa::ToSchema;

use super::{cookie_headers, error_response, SessionGrant};
use crate::api::extract::{client_origin, extract_session_token};
use crate::api::AppState;
use crate::auth::{Flash, LoginError, SessionError};

pub(crate) const INVALID_CREDENTIALS: &str = "Invalid username or password";
pub(crate) const LOCKED_OUT: &str = "Too many failed attempts. Try again later.";

#[derive(ToSchema, Serialize, Deserialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

#[utoipa::path(
    post,
    path = "/v1/auth/login",
    request_body = LoginRequest,
    responses(
        (status = 200, description = "Logged in; session cookie set", body = SessionGrant),
        (status = 400, description = "Missing payload", body = super::ErrorBody),
        (status = 401, description = "Invalid username or password", body = super::ErrorBody),
        (status = 429, description = "Locked out; see Retry-After", body = super::ErrorBody),
        (status = 503, description = "Auth state unavailable", body = super::ErrorBody)
    ),
    tag = "auth"
)]
#[instrument(skip_all)]
pub async fn login(
    state: Extension<Arc<AppState>>,
    peer: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
    payload: Option<Json<LoginRequest>>,
) -> Response {
    let Some(Json(request)) = payload else {
        return error_response(StatusCode::BAD_REQUEST, "Missing payload");
    };
    let origin = client_origin(&headers, peer.map(|ConnectInfo(addr)| addr));
    let username = request.username.trim().to_string();
    let password = SecretString::from(request.password);

    match state.service().login(&username, &origin, &password).await {
        Ok(issued) => {
            // A new key on every login; the pre-login session is discarded.
            if let Some(previous) = extract_session_token(&headers) {
                if let Err(err) = state.service().logout(&previous).await {
                    warn!("Failed to discard pre-login session: {err}");
                }
            }
            let grant = SessionGrant {
                identity: issued.identity,
                token: issued.key.expose().to_string(),
                expires_in_seconds: state.config().session_ttl().as_secs(),
            };
            let headers = cookie_headers(state.config(), &issued.key);
            (StatusCode::OK, headers, Json(grant)).into_response()
        }
        Err(LoginError::InvalidCredentials) => {
            let headers = flash_failure(&state, &headers, INVALID_CREDENTIALS).await;
            with_headers(
                error_response(StatusCode::UNAUTHORIZED, INVALID_CREDENTIALS),
                headers,
            )
        }
        Err(LoginError::LockedOut { remaining }) => {
            let mut headers = flash_failure(&state, &headers, LOCKED_OUT).await;
            insert_retry_after(&mut headers, remaining);
            with_headers(
                error_response(StatusCode::TOO_MANY_REQUESTS, LOCKED_OUT),
                headers,
            )
        }
        Err(LoginError::Storage(err)) => {
            error!("Login failed closed on storage error: {err}");
            error_response(StatusCode::SERVICE_UNAVAILABLE, "Service unavailable")
        }
        Err(LoginError::Hashing(err)) => {
            error!("Password verification failed: {err}");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "Internal error")
        }
    }
}

pub(crate) fn insert_retry_after(headers: &mut HeaderMap, remaining: Duration) {
    if let Ok(value) = HeaderValue::from_str(&retry_after_seconds(remaining).to_string()) {
        headers.insert(RETRY_AFTER, value);
    }
}

/// Whole seconds, rounded up so clients never retry early.
fn retry_after_seconds(remaining: Duration) -> u64 {
    let secs = remaining.as_secs();
    if remaining.subsec_nanos() > 0 {
        secs + 1
    } else {
        secs
    }
}

/// Leave `message` as a flash on the caller's session. Returns the headers to
/// add, which set a cookie when an anonymous session had to be created.
async fn flash_failure(state: &AppState, headers: &HeaderMap, message: &str) -> HeaderMap {
    let flash = Flash::error(message);
    if let Some(key) = extract_session_token(headers) {
        match state.gate().set_flash(&key, flash.clone()).await {
            Ok(()) => return HeaderMap::new(),
            Err(SessionError::Absent) => {}
            Err(err) => {
                warn!("Failed to store flash: {err}");
                return HeaderMap::new();
            }
        }
    }

    let key = match state.service().start_anonymous().await {
        Ok(key) => key,
        Err(err) => {
            warn!("Failed to start anonymous session: {err}");
            return HeaderMap::new();
        }
    };
    if let Err(err) = state.gate().set_flash(&key, flash).await {
        warn!("Failed to store flash: {err}");
    }
    cookie_headers(state.config(), &key)
}

fn with_headers(response: Response, headers: HeaderMap) -> Response {
    (headers, response).into_response()
}
