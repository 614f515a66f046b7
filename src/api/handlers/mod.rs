//! Route handlers and the response shapes they share.

pub mod health;
pub mod login;
pub mod logout;
pub mod me;
pub mod password;
pub mod protected;
pub mod register;
pub mod session;

use axum::{
    http::{header::SET_COOKIE, HeaderMap, StatusCode},
    response::{IntoResponse, Json, Response},
};
use serde::{Deserialize, Serialize};
use tracing::error;
use utoipa::ToSchema;

use super::extract::{clear_session_cookie, session_cookie};
use crate::auth::{AuthConfig, Flash, SessionKey};

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct ErrorBody {
    pub error: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub details: Vec<String>,
}

/// Issued on successful login and password change. `token` is the same value
/// as the cookie, for bearer clients.
#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct SessionGrant {
    pub identity: String,
    pub token: String,
    pub expires_in_seconds: u64,
}

#[derive(ToSchema, Serialize, Deserialize, Debug, Default)]
pub struct SessionView {
    pub identity: Option<String>,
    pub flash: Option<Flash>,
}

pub(crate) fn error_response(status: StatusCode, message: &str) -> Response {
    (
        status,
        Json(ErrorBody {
            error: message.to_string(),
            details: Vec::new(),
        }),
    )
        .into_response()
}

pub(crate) fn error_with_details(
    status: StatusCode,
    message: &str,
    details: Vec<String>,
) -> Response {
    (
        status,
        Json(ErrorBody {
            error: message.to_string(),
            details,
        }),
    )
        .into_response()
}

/// `Set-Cookie` for `key`; an unencodable cookie is logged and skipped.
pub(crate) fn cookie_headers(config: &AuthConfig, key: &SessionKey) -> HeaderMap {
    let mut headers = HeaderMap::new();
    match session_cookie(config, key) {
        Ok(cookie) => {
            headers.insert(SET_COOKIE, cookie);
        }
        Err(err) => error!("Failed to build session cookie: {err}"),
    }
    headers
}

pub(crate) fn clear_cookie_headers(config: &AuthConfig) -> HeaderMap {
    let mut headers = HeaderMap::new();
    if let Ok(cookie) = clear_session_cookie(config) {
        headers.insert(SET_COOKIE, cookie);
    }
    headers
}
