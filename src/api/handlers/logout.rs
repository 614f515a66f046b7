use axum::{
    extract::Extension,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
};
use std::sync::Arc;
use tracing::error;

use super::{clear_cookie_headers, error_response};
use crate::api::extract::extract_session_token;
use crate::api::AppState;

/// Unknown or absent sessions still get 204. A store failure is reported and
/// the cookie is kept, since the session may still be live.
#[utoipa::path(
    post,
    path = "/v1/auth/logout",
    responses(
        (status = 204, description = "Session cleared"),
        (status = 503, description = "Session could not be destroyed", body = super::ErrorBody)
    ),
    tag = "auth"
)]
pub async fn logout(state: Extension<Arc<AppState>>, headers: HeaderMap) -> Response {
    if let Some(key) = extract_session_token(&headers) {
        if let Err(err) = state.service().logout(&key).await {
            error!("Failed to delete session: {err}");
            return error_response(StatusCode::SERVICE_UNAVAILABLE, "Logout failed");
        }
    }

    (StatusCode::NO_CONTENT, clear_cookie_headers(state.config())).into_response()
}
