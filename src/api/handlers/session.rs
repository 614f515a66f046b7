use axum::{
    extract::Extension,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Json, Response},
};
use std::sync::Arc;
use tracing::error;

use super::SessionView;
use crate::api::extract::extract_session_token;
use crate::api::AppState;
use crate::auth::SessionError;

/// Who the caller is, plus the pending flash. Reading the flash clears it.
#[utoipa::path(
    get,
    path = "/v1/auth/session",
    responses(
        (status = 200, description = "Identity and/or a pending flash", body = SessionView),
        (status = 204, description = "No active session and nothing to report")
    ),
    tag = "auth"
)]
pub async fn session(state: Extension<Arc<AppState>>, headers: HeaderMap) -> Response {
    // Missing cookies are treated as "no session" to avoid leaking auth state.
    let Some(key) = extract_session_token(&headers) else {
        return StatusCode::NO_CONTENT.into_response();
    };

    let identity = state
        .gate()
        .authenticate(&key)
        .await
        .into_principal()
        .map(|principal| principal.identity);

    let flash = match state.gate().take_flash(&key).await {
        Ok(flash) => flash,
        Err(SessionError::Absent) => None,
        Err(err) => {
            error!("Failed to read flash: {err}");
            None
        }
    };

    if identity.is_none() && flash.is_none() {
        return StatusCode::NO_CONTENT.into_response();
    }
    (StatusCode::OK, Json(SessionView { identity, flash })).into_response()
}
