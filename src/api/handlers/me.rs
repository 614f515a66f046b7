use axum::{
    extract::Extension,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Json, Response},
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, warn};
use utoipa::ToSchema;

use super::error_response;
use super::protected::{require_auth, AUTHENTICATION_REQUIRED};
use crate::api::AppState;

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct AccountResponse {
    pub username: String,
    pub created_at: DateTime<Utc>,
    /// `null` until the first successful login.
    pub last_login: Option<DateTime<Utc>>,
}

#[utoipa::path(
    get,
    path = "/v1/auth/me",
    responses(
        (status = 200, description = "Account of the authenticated caller", body = AccountResponse),
        (status = 401, description = "Authentication required", body = super::ErrorBody),
        (status = 404, description = "Account no longer exists", body = super::ErrorBody),
        (status = 503, description = "Auth state unavailable", body = super::ErrorBody)
    ),
    tag = "auth"
)]
pub async fn me(state: Extension<Arc<AppState>>, headers: HeaderMap) -> Response {
    let Some(principal) = require_auth(state.gate(), &headers).await else {
        return error_response(StatusCode::UNAUTHORIZED, AUTHENTICATION_REQUIRED);
    };

    match state.service().profile(&principal.identity).await {
        Ok(Some(profile)) => (
            StatusCode::OK,
            Json(AccountResponse {
                username: profile.username,
                created_at: profile.created_at,
                last_login: profile.last_login,
            }),
        )
            .into_response(),
        Ok(None) => {
            warn!("session outlived its account");
            error_response(StatusCode::NOT_FOUND, "User not found")
        }
        Err(err) => {
            error!("Failed to load account: {err}");
            error_response(StatusCode::SERVICE_UNAVAILABLE, "Service unavailable")
        }
    }
}
