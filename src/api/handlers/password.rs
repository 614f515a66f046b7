use axum::{
    extract::{ConnectInfo, Extension},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Json, Response},
};
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use std::{net::SocketAddr, sync::Arc};
use tracing::{error, instrument, warn};
use utoipa::ToSchema;

use super::login::{insert_retry_after, LOCKED_OUT};
use super::protected::AUTHENTICATION_REQUIRED;
use super::{cookie_headers, error_response, error_with_details, SessionGrant};
use crate::api::extract::{client_origin, extract_session_token};
use crate::api::AppState;
use crate::auth::{Flash, PasswordChangeError};

pub(crate) const PASSWORD_CHANGED: &str = "Password changed";

#[derive(ToSchema, Serialize, Deserialize)]
pub struct PasswordChangeRequest {
    pub current_password: String,
    pub new_password: String,
}

/// Every session of the caller, including this one, is revoked. The response
/// carries the replacement session. A wrong current password counts as a
/// failed login for the caller's lockout key.
#[utoipa::path(
    post,
    path = "/v1/auth/password",
    request_body = PasswordChangeRequest,
    responses(
        (status = 200, description = "Password changed; new session cookie set", body = SessionGrant),
        (status = 400, description = "New password rejected", body = super::ErrorBody),
        (status = 401, description = "Authentication required", body = super::ErrorBody),
        (status = 403, description = "Current password is incorrect", body = super::ErrorBody),
        (status = 429, description = "Locked out; see Retry-After", body = super::ErrorBody),
        (status = 503, description = "Auth state unavailable", body = super::ErrorBody)
    ),
    tag = "auth"
)]
#[instrument(skip_all)]
pub async fn change_password(
    state: Extension<Arc<AppState>>,
    peer: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
    payload: Option<Json<PasswordChangeRequest>>,
) -> Response {
    let Some(key) = extract_session_token(&headers) else {
        return error_response(StatusCode::UNAUTHORIZED, AUTHENTICATION_REQUIRED);
    };
    let Some(Json(request)) = payload else {
        return error_response(StatusCode::BAD_REQUEST, "Missing payload");
    };
    let origin = client_origin(&headers, peer.map(|ConnectInfo(addr)| addr));
    let current = SecretString::from(request.current_password);
    let new = SecretString::from(request.new_password);

    match state
        .service()
        .change_password(&key, &origin, &current, &new)
        .await
    {
        Ok(issued) => {
            if let Err(err) = state
                .gate()
                .set_flash(&issued.key, Flash::success(PASSWORD_CHANGED))
                .await
            {
                warn!("Failed to store flash: {err}");
            }
            let grant = SessionGrant {
                identity: issued.identity,
                token: issued.key.expose().to_string(),
                expires_in_seconds: state.config().session_ttl().as_secs(),
            };
            let headers = cookie_headers(state.config(), &issued.key);
            (StatusCode::OK, headers, Json(grant)).into_response()
        }
        Err(PasswordChangeError::Unauthenticated) => {
            error_response(StatusCode::UNAUTHORIZED, AUTHENTICATION_REQUIRED)
        }
        Err(PasswordChangeError::InvalidCredentials) => {
            error_response(StatusCode::FORBIDDEN, "Current password is incorrect")
        }
        Err(PasswordChangeError::LockedOut { remaining }) => {
            let mut headers = HeaderMap::new();
            insert_retry_after(&mut headers, remaining);
            (
                headers,
                error_response(StatusCode::TOO_MANY_REQUESTS, LOCKED_OUT),
            )
                .into_response()
        }
        Err(PasswordChangeError::WeakPassword(problems)) => {
            error_with_details(StatusCode::BAD_REQUEST, "Password rejected", problems)
        }
        Err(PasswordChangeError::Storage(err)) => {
            error!("Password change failed on storage error: {err}");
            error_response(StatusCode::SERVICE_UNAVAILABLE, "Service unavailable")
        }
        Err(PasswordChangeError::Hashing(err)) => {
            error!("Password hashing failed: {err}");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "Internal error")
        }
    }
}
