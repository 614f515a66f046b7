use axum::response::Json;
use utoipa::OpenApi;

use super::chat::{self, ChatEvent};
use super::handlers::{
    self, health, login, logout, me, password, protected, register, session,
};
use crate::auth::{Flash, FlashLevel};

#[derive(OpenApi)]
#[openapi(
    info(title = "gatehouse", description = "Login lockout and session lifecycle service"),
    paths(
        health::health,
        register::register,
        login::login,
        logout::logout,
        session::session,
        me::me,
        password::change_password,
        protected::protected,
        chat::chat,
    ),
    components(schemas(
        health::Health,
        register::RegisterRequest,
        register::RegisterResponse,
        login::LoginRequest,
        password::PasswordChangeRequest,
        protected::ProtectedResponse,
        me::AccountResponse,
        handlers::ErrorBody,
        handlers::SessionGrant,
        handlers::SessionView,
        ChatEvent,
        Flash,
        FlashLevel,
    )),
    tags(
        (name = "health", description = "Service health"),
        (name = "auth", description = "Registration, login, sessions"),
        (name = "chat", description = "Authenticated real-time chat")
    )
)]
pub struct ApiDoc;

pub(super) async fn openapi_json() -> Json<utoipa::openapi::OpenApi> {
    Json(ApiDoc::openapi())
}
