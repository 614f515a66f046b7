//! Session record and its serializable payload.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

use super::token::SessionKey;

/// Attribute slot holding the read-once flash message.
pub const FLASH_ATTRIBUTE: &str = "flash";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, utoipa::ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum FlashLevel {
    Success,
    Error,
    Info,
}

/// Short-lived message carried to the next request.
///
/// The store treats it as an ordinary attribute; read-once semantics are the
/// responsibility of whoever consumes it (see `AuthGate::take_flash`).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, utoipa::ToSchema)]
pub struct Flash {
    pub level: FlashLevel,
    pub message: String,
}

impl Flash {
    #[must_use]
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            level: FlashLevel::Error,
            message: message.into(),
        }
    }

    #[must_use]
    pub fn success(message: impl Into<String>) -> Self {
        Self {
            level: FlashLevel::Success,
            message: message.into(),
        }
    }
}

/// The mutable part of a session: who owns it and what it carries.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionPayload {
    pub identity: Option<String>,
    #[serde(default)]
    pub attributes: BTreeMap<String, Value>,
}

impl SessionPayload {
    #[must_use]
    pub fn for_identity(identity: Option<String>) -> Self {
        Self {
            identity,
            attributes: BTreeMap::new(),
        }
    }

    #[must_use]
    pub fn attribute(&self, name: &str) -> Option<&Value> {
        self.attributes.get(name)
    }

    pub fn set_attribute(&mut self, name: impl Into<String>, value: Value) {
        self.attributes.insert(name.into(), value);
    }

    pub fn remove_attribute(&mut self, name: &str) -> Option<Value> {
        self.attributes.remove(name)
    }

    pub fn set_flash(&mut self, flash: &Flash) {
        if let Ok(value) = serde_json::to_value(flash) {
            self.attributes.insert(FLASH_ATTRIBUTE.to_string(), value);
        }
    }

    /// Remove and return the flash; a malformed value is discarded.
    pub fn take_flash(&mut self) -> Option<Flash> {
        self.attributes
            .remove(FLASH_ATTRIBUTE)
            .and_then(|value| serde_json::from_value(value).ok())
    }
}

/// A live session as seen by one operation.
///
/// This is a snapshot; holding it across requests is not allowed, re-read it
/// through the store instead.
#[derive(Clone, Debug, PartialEq)]
pub struct SessionRecord {
    pub key: SessionKey,
    pub payload: SessionPayload,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl SessionRecord {
    #[must_use]
    pub fn identity(&self) -> Option<&str> {
        self.payload.identity.as_deref()
    }
}

/// In-place change applied by `SessionStore::update` while the store holds
/// the record exclusively.
pub type SessionMutator = Box<dyn FnOnce(&mut SessionPayload) + Send>;

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn flash_is_read_once() {
        let mut payload = SessionPayload::default();
        payload.set_flash(&Flash::error("Invalid username or password"));
        assert_eq!(
            payload.take_flash(),
            Some(Flash::error("Invalid username or password"))
        );
        assert_eq!(payload.take_flash(), None);
    }

    #[test]
    fn malformed_flash_is_dropped() {
        let mut payload = SessionPayload::default();
        payload.set_attribute(FLASH_ATTRIBUTE, json!("not a flash"));
        assert_eq!(payload.take_flash(), None);
        assert!(payload.attribute(FLASH_ATTRIBUTE).is_none());
    }

    #[test]
    fn payload_serializes_with_identity_and_attributes() -> Result<(), serde_json::Error> {
        let mut payload = SessionPayload::for_identity(Some("bob".to_string()));
        payload.set_attribute("reset_step", json!(2));
        let encoded = serde_json::to_string(&payload)?;
        let decoded: SessionPayload = serde_json::from_str(&encoded)?;
        assert_eq!(decoded, payload);

        let legacy: SessionPayload = serde_json::from_str(r#"{"identity":null}"#)?;
        assert!(legacy.attributes.is_empty());
        Ok(())
    }
}
