//! # Gatehouse
//!
//! Login lockout and session lifecycle service.
//!
//! A login first passes the lockout check, then password verification, and
//! its outcome is appended to the attempt log. A successful login creates a
//! session whose key is returned to the client as an opaque token. Every later
//! request, over HTTP or the WebSocket chat, presents that token and is
//! resolved by the same [`auth::AuthGate`] against the same session store.
//!
//! Storage is in-memory by default and PostgreSQL when a DSN is configured
//! (see `sql/schema.sql`).

pub mod api;
pub mod auth;
pub mod cli;

#[allow(clippy::doc_markdown, clippy::needless_raw_string_hashes)]
pub mod built_info {
    include!(concat!(env!("OUT_DIR"), "/built.rs"));
}

pub const GIT_COMMIT_HASH: &str = match built_info::GIT_COMMIT_HASH {
    Some(hash) => hash,
    None => "unknown",
};
