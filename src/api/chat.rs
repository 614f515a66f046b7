//! Real-time chat over WebSocket, gated by the same session as the HTTP API.
//!
//! Flow Overview:
//! 1) The upgrade request's token is extracted exactly like an HTTP request's
//!    and resolved through the shared `AuthGate`.
//! 2) Unauthenticated sockets get one error event and are closed.
//! 3) Authenticated sockets join the broadcast hub. Every inbound message
//!    re-authenticates the key, which slides its expiry and ends the socket as
//!    soon as the session is destroyed elsewhere.
//! 4) Messages longer than `MAX_MESSAGE_CHARS` are refused with an error
//!    event to the sender only; nothing is broadcast.

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Extension,
    },
    http::HeaderMap,
    response::Response,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::select;
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::{debug, info, instrument, warn};
use utoipa::ToSchema;

use super::handlers::protected::{require_auth, AUTHENTICATION_REQUIRED};
use super::AppState;
use crate::auth::{AuthGate, Authentication, Principal};

const HUB_CAPACITY: usize = 256;
const MAX_MESSAGE_CHARS: usize = 500;
const MESSAGE_TOO_LONG: &str = "Message too long (max 500 characters)";

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ChatEvent {
    Joined { identity: String },
    Message { identity: String, text: String },
    Left { identity: String },
    Error { message: String },
}

/// Fan-out of chat events to every connected member.
#[derive(Clone, Debug)]
pub struct ChatHub {
    tx: broadcast::Sender<ChatEvent>,
}

impl Default for ChatHub {
    fn default() -> Self {
        Self::new(HUB_CAPACITY)
    }
}

impl ChatHub {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<ChatEvent> {
        self.tx.subscribe()
    }

    /// Returns how many members received the event.
    pub fn publish(&self, event: ChatEvent) -> usize {
        self.tx.send(event).unwrap_or(0)
    }
}

#[derive(Debug, PartialEq, Eq)]
enum Inbound<'a> {
    Blank,
    TooLong,
    Text(&'a str),
}

/// Trimmed length is measured in characters, not bytes.
fn classify(text: &str) -> Inbound<'_> {
    let text = text.trim();
    if text.is_empty() {
        Inbound::Blank
    } else if text.chars().count() > MAX_MESSAGE_CHARS {
        Inbound::TooLong
    } else {
        Inbound::Text(text)
    }
}

/// The upgrade-time authorization decision, shared with the HTTP layer.
pub async fn authorize_connection(gate: &AuthGate, headers: &HeaderMap) -> Option<Principal> {
    require_auth(gate, headers).await
}

#[utoipa::path(
    get,
    path = "/v1/chat",
    responses(
        (status = 101, description = "Switching protocols; events are ChatEvent JSON", body = ChatEvent)
    ),
    tag = "chat"
)]
pub async fn chat(
    Extension(state): Extension<Arc<AppState>>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> Response {
    let principal = authorize_connection(state.gate(), &headers).await;
    ws.on_upgrade(move |socket| async move {
        match principal {
            Some(principal) => serve_member(socket, state, principal).await,
            None => reject(socket).await,
        }
    })
}

async fn reject(mut socket: WebSocket) {
    debug!("rejecting unauthenticated socket");
    let event = ChatEvent::Error {
        message: AUTHENTICATION_REQUIRED.to_string(),
    };
    let _ = send_event(&mut socket, &event).await;
    let _ = socket.send(Message::Close(None)).await;
}

#[instrument(skip_all, fields(identity = %principal.identity))]
async fn serve_member(mut socket: WebSocket, state: Arc<AppState>, principal: Principal) {
    let hub = state.hub();
    let mut events = hub.subscribe();
    hub.publish(ChatEvent::Joined {
        identity: principal.identity.clone(),
    });
    info!("chat member joined");

    loop {
        select! {
            inbound = socket.recv() => match inbound {
                Some(Ok(Message::Text(text))) => {
                    let Authentication::Authenticated(current) =
                        state.gate().authenticate(&principal.session).await
                    else {
                        reject(socket).await;
                        hub.publish(ChatEvent::Left { identity: principal.identity.clone() });
                        info!("chat member dropped: session ended");
                        return;
                    };
                    match classify(&text) {
                        Inbound::Blank => {}
                        Inbound::TooLong => {
                            let event = ChatEvent::Error {
                                message: MESSAGE_TOO_LONG.to_string(),
                            };
                            if send_event(&mut socket, &event).await.is_err() {
                                break;
                            }
                        }
                        Inbound::Text(text) => {
                            hub.publish(ChatEvent::Message {
                                identity: current.identity,
                                text: text.to_string(),
                            });
                        }
                    }
                }
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(err)) => {
                    debug!("socket error: {err}");
                    break;
                }
            },
            event = events.recv() => match event {
                Ok(event) => {
                    if send_event(&mut socket, &event).await.is_err() {
                        break;
                    }
                }
                Err(RecvError::Lagged(skipped)) => warn!(skipped, "chat member lagging"),
                Err(RecvError::Closed) => break,
            },
        }
    }

    hub.publish(ChatEvent::Left {
        identity: principal.identity.clone(),
    });
    info!("chat member left");
}

async fn send_event(socket: &mut WebSocket, event: &ChatEvent) -> Result<(), axum::Error> {
    match serde_json::to_string(event) {
        Ok(json) => socket.send(Message::Text(json)).await,
        Err(err) => {
            warn!("Failed to encode chat event: {err}");
            Ok(())
        }
    }
}
