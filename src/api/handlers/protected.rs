use axum::{
    extract::Extension,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Json, Response},
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use utoipa::ToSchema;

use super::error_response;
use crate::api::extract::extract_session_token;
use crate::api::AppState;
use crate::auth::{AuthGate, Authentication, Principal};

pub(crate) const AUTHENTICATION_REQUIRED: &str = "Authentication required";

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct ProtectedResponse {
    pub identity: String,
    pub expires_at: DateTime<Utc>,
}

/// Resolve the request's session into a principal, or `None` for 401.
pub(crate) async fn require_auth(gate: &AuthGate, headers: &HeaderMap) -> Option<Principal> {
    let key = extract_session_token(headers)?;
    match gate.authenticate(&key).await {
        Authentication::Authenticated(principal) => Some(principal),
        Authentication::Unauthenticated => None,
    }
}

#[utoipa::path(
    get,
    path = "/v1/protected",
    responses(
        (status = 200, description = "Caller is authenticated", body = ProtectedResponse),
        (status = 401, description = "Authentication required", body = super::ErrorBody)
    ),
    tag = "auth"
)]
pub async fn protected(state: Extension<Arc<AppState>>, headers: HeaderMap) -> Response {
    let Some(principal) = require_auth(state.gate(), &headers).await else {
        return error_response(StatusCode::UNAUTHORIZED, AUTHENTICATION_REQUIRED);
    };
    (
        StatusCode::OK,
        Json(ProtectedResponse {
            identity: principal.identity,
            expires_at: principal.expires_at,
        }),
    )
        .into_response()
}
