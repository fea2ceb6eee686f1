//! The notification envelope and its persistence attachment.

use chrono::Utc;
use serde_json::json;

use crate::error::CoreError;
use crate::recipient::Recipient;
use crate::types::Timestamp;

/// Maximum length of a persistency key.
const MAX_KEY_LEN: usize = 128;

// ---------------------------------------------------------------------------
// PersistencyKey
// ---------------------------------------------------------------------------

/// Opaque identifier under which at most one notification is "current" at
/// a time.
///
/// Publishing a second notification under an existing key supersedes the
/// first. Keys are compared exactly; administrative clears may match on a
/// plain string prefix.
#[derive(Debug, Clone, PartialEq, Eq, Hash, serde::Serialize)]
#[serde(transparent)]
pub struct PersistencyKey(String);

impl PersistencyKey {
    /// Create a key from a raw string.
    ///
    /// Rules:
    /// - Must not be empty.
    /// - Must not exceed `MAX_KEY_LEN` characters.
    /// - Must not contain control characters.
    pub fn new(raw: impl Into<String>) -> Result<Self, CoreError> {
        let raw = raw.into();
        if raw.is_empty() {
            return Err(CoreError::Validation(
                "Persistency key must not be empty".to_string(),
            ));
        }
        if raw.len() > MAX_KEY_LEN {
            return Err(CoreError::Validation(format!(
                "Persistency key must not exceed {MAX_KEY_LEN} characters"
            )));
        }
        if raw.chars().any(|c| c.is_control()) {
            return Err(CoreError::Validation(
                "Persistency key must not contain control characters".to_string(),
            ));
        }
        Ok(Self(raw))
    }

    /// The raw key string.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether this key starts with the given administrative prefix.
    pub fn has_prefix(&self, prefix: &str) -> bool {
        self.0.starts_with(prefix)
    }
}

impl std::fmt::Display for PersistencyKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

// ---------------------------------------------------------------------------
// Notification
// ---------------------------------------------------------------------------

/// Persistence attachment of a notification: the key it is current under
/// and the instant it expires.
///
/// A key without an expiration is unrepresentable; both are attached
/// together via [`Notification::persisted`].
#[derive(Debug, Clone)]
pub struct Persistence {
    /// Key this notification is current under.
    pub key: PersistencyKey,

    /// When the notification expires and is cleared automatically.
    pub expires_at: Timestamp,
}

/// An immutable notification envelope.
///
/// Constructed via [`Notification::new`] and enriched with the builder
/// methods [`with_payload`](Notification::with_payload) and
/// [`persisted`](Notification::persisted). Once published the engine only
/// ever shares clones, so a notification is never mutated in flight.
#[derive(Debug, Clone)]
pub struct Notification {
    /// Dot-separated notification name, e.g. `"chat.mention"`.
    pub kind: String,

    /// Who this notification is addressed to. Routing information only,
    /// never serialized to clients.
    pub recipient: Recipient,

    /// Free-form JSON payload carrying kind-specific data.
    pub payload: serde_json::Value,

    /// When the notification was created (UTC).
    pub created_at: Timestamp,

    /// Present when the notification is persisted until read-by-all,
    /// superseded, cleared, or expired.
    pub persistence: Option<Persistence>,
}

impl Notification {
    /// Create a transient notification with only the required `kind` and
    /// `recipient`.
    ///
    /// The payload defaults to an empty object.
    pub fn new(kind: impl Into<String>, recipient: Recipient) -> Self {
        Self {
            kind: kind.into(),
            recipient,
            payload: serde_json::Value::Object(Default::default()),
            created_at: Utc::now(),
            persistence: None,
        }
    }

    /// Set the JSON payload for the notification.
    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = payload;
        self
    }

    /// Persist this notification under `key` until it is read by all its
    /// recipients, superseded, cleared, or `expires_at` passes.
    ///
    /// An `expires_at` that already lies in the past is valid and behaves
    /// as an immediate expiry.
    pub fn persisted(mut self, key: PersistencyKey, expires_at: Timestamp) -> Self {
        self.persistence = Some(Persistence { key, expires_at });
        self
    }

    /// Whether this notification declares a persistency key.
    pub fn is_persistent(&self) -> bool {
        self.persistence.is_some()
    }

    /// The JSON wire representation sent to clients.
    ///
    /// The recipient is not part of the wire form; by the time a client
    /// sees a notification, routing has already happened.
    pub fn to_wire(&self) -> serde_json::Value {
        let mut wire = json!({
            "kind": self.kind,
            "payload": self.payload,
            "created_at": self.created_at,
        });
        if let Some(persistence) = &self.persistence {
            wire["persistency_key"] = json!(persistence.key);
            wire["expires_at"] = json!(persistence.expires_at);
        }
        wire
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
