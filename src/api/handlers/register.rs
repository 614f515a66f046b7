use axum::{
    extract::Extension,
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, instrument};
use utoipa::ToSchema;

use super::{error_response, error_with_details};
use crate::api::AppState;
use crate::auth::RegisterError;

#[derive(ToSchema, Serialize, Deserialize)]
pub struct RegisterRequest {
    pub username: String,
    pub password: String,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct RegisterResponse {
    pub username: String,
}

#[utoipa::path(
    post,
    path = "/v1/auth/register",
    request_body = RegisterRequest,
    responses(
        (status = 201, description = "User created", body = RegisterResponse),
        (status = 400, description = "Invalid username or password", body = super::ErrorBody),
        (status = 409, description = "Username already taken", body = super::ErrorBody),
        (status = 503, description = "User directory unavailable", body = super::ErrorBody)
    ),
    tag = "auth"
)]
#[instrument(skip_all)]
pub async fn register(
    state: Extension<Arc<AppState>>,
    payload: Option<Json<RegisterRequest>>,
) -> Response {
    let Some(Json(request)) = payload else {
        return error_response(StatusCode::BAD_REQUEST, "Missing payload");
    };
    let username = request.username.trim().to_string();
    let password = SecretString::from(request.password);

    match state.service().register(&username, &password).await {
        Ok(()) => (StatusCode::CREATED, Json(RegisterResponse { username })).into_response(),
        Err(err @ RegisterError::InvalidUsername) => {
            error_response(StatusCode::BAD_REQUEST, &err.to_string())
        }
        Err(RegisterError::WeakPassword(problems)) => {
            error_with_details(StatusCode::BAD_REQUEST, "Password rejected", problems)
        }
        Err(RegisterError::Conflict) => {
            error_response(StatusCode::CONFLICT, "Username already taken")
        }
        Err(RegisterError::Storage(err)) => {
            error!("Registration failed on storage error: {err}");
            error_response(StatusCode::SERVICE_UNAVAILABLE, "Service unavailable")
        }
        Err(RegisterError::Hashing(err)) => {
            error!("Password hashing failed: {err}");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "Internal error")
        }
    }
}
