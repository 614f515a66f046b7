//! HTTP and WebSocket boundary.
//!
//! Both layers share one [`AppState`]: the same `AuthService`, and through it
//! the same `AuthGate` and session store. A session created by `/v1/auth/login`
//! is therefore immediately valid on `/v1/chat`, and a logout or password
//! change through HTTP is observed by the socket on its next message.

use anyhow::Result;
use axum::{
    body::Body,
    extract::MatchedPath,
    http::{HeaderName, HeaderValue, Request},
    routing::{get, post},
    Extension, Router,
};
use std::{future::Future, net::SocketAddr, sync::Arc};
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::{
    request_id::PropagateRequestIdLayer, set_header::SetRequestHeaderLayer, trace::TraceLayer,
};
use tracing::{info, info_span, Span};
use ulid::Ulid;

use crate::auth::{AuthConfig, AuthGate, AuthService};

pub mod chat;
pub mod extract;
pub mod handlers;
mod openapi;

pub use chat::ChatHub;
pub use openapi::ApiDoc;

/// Shared, read-only state handed to every handler.
pub struct AppState {
    service: Arc<AuthService>,
    config: AuthConfig,
    hub: ChatHub,
}

impl AppState {
    #[must_use]
    pub fn new(service: Arc<AuthService>, config: AuthConfig) -> Self {
        Self {
            service,
            config,
            hub: ChatHub::default(),
        }
    }

    #[must_use]
    pub fn service(&self) -> &AuthService {
        &self.service
    }

    #[must_use]
    pub fn gate(&self) -> &AuthGate {
        self.service.gate()
    }

    #[must_use]
    pub fn config(&self) -> &AuthConfig {
        &self.config
    }

    #[must_use]
    pub fn hub(&self) -> &ChatHub {
        &self.hub
    }
}

/// Build the router with every route and the shared middleware stack.
#[must_use]
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(handlers::health::health))
        .route("/openapi.json", get(openapi::openapi_json))
        .route("/v1/auth/register", post(handlers::register::register))
        .route("/v1/auth/login", post(handlers::login::login))
        .route("/v1/auth/logout", post(handlers::logout::logout))
        .route("/v1/auth/session", get(handlers::session::session))
        .route("/v1/auth/me", get(handlers::me::me))
        .route("/v1/auth/password", post(handlers::password::change_password))
        .route("/v1/protected", get(handlers::protected::protected))
        .route("/v1/chat", get(chat::chat))
        .layer(
            ServiceBuilder::new()
                .layer(SetRequestHeaderLayer::if_not_present(
                    HeaderName::from_static("x-request-id"),
                    |_req: &_| HeaderValue::from_str(Ulid::new().to_string().as_str()).ok(),
                ))
                .layer(PropagateRequestIdLayer::new(HeaderName::from_static(
                    "x-request-id",
                )))
                .layer(TraceLayer::new_for_http().make_span_with(make_span))
                .layer(Extension(state)),
        )
}

/// Serve until `shutdown` resolves.
///
/// # Errors
/// Returns an error if the listener cannot be bound or the server fails.
pub async fn serve<F>(port: u16, state: Arc<AppState>, shutdown: F) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let app = router(state);
    let listener = TcpListener::bind(format!("::0:{port}")).await?;

    info!("Listening on [::]:{}", port);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown)
    .await?;

    Ok(())
}

fn make_span(request: &Request<Body>) -> Span {
    let request_id = request
        .headers()
        .get("x-request-id")
        .and_then(|val| val.to_str().ok())
        .unwrap_or("none");
    let matched_path = request
        .extensions()
        .get::<MatchedPath>()
        .map_or_else(|| request.uri().path(), MatchedPath::as_str);

    info_span!(
        "http.request",
        http.method = %request.method(),
        http.route = matched_path,
        request_id
    )
}
