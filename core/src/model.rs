//! The data model: sessions, snapshots, patches and their merge rules.
//!
//! The snapshot's inner maps are heterogeneously typed upstream (credentials and
//! per-keytype payloads). Rather than modelling every payload shape, the engine treats
//! them as opaque `serde_json::Value`s — only the [`Codec`](crate::codec) cares what's
//! inside, and even it never inspects anything but the top-level envelope.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Opaque, non-empty session identifier. The primary key of every record.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SessionId(String);

impl SessionId {
    pub fn new(id: impl Into<String>) -> Result<Self, crate::error::EngineError> {
        let id = id.into();
        if id.is_empty() {
            return Err(crate::error::EngineError::ValidationError(
                "session id must not be empty".into(),
            ));
        }
        Ok(SessionId(id))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl AsRef<str> for SessionId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// The fixed set of Signal-protocol key namespaces. Unknown namespaces round-trip
/// through `Other` so a forward-compatible client isn't rejected by an engine that
/// hasn't learned about a new key type yet.
///
/// Serializes as its bare kebab-case string (not an externally tagged object), since the
/// wire format is a plain `type → id → value` map keyed by these strings.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum KeyType {
    PreKey,
    Session,
    SenderKey,
    AppStateSyncKey,
    AppStateSyncVersion,
    SenderKeyMemory,
    Other(String),
}

impl KeyType {
    fn as_str(&self) -> &str {
        match self {
            KeyType::PreKey => "pre-key",
            KeyType::Session => "session",
            KeyType::SenderKey => "sender-key",
            KeyType::AppStateSyncKey => "app-state-sync-key",
            KeyType::AppStateSyncVersion => "app-state-sync-version",
            KeyType::SenderKeyMemory => "sender-key-memory",
            KeyType::Other(s) => s,
        }
    }

    fn from_str(s: &str) -> Self {
        match s {
            "pre-key" => KeyType::PreKey,
            "session" => KeyType::Session,
            "sender-key" => KeyType::SenderKey,
            "app-state-sync-key" => KeyType::AppStateSyncKey,
            "app-state-sync-version" => KeyType::AppStateSyncVersion,
            "sender-key-memory" => KeyType::SenderKeyMemory,
            other => KeyType::Other(other.to_string()),
        }
    }
}

impl fmt::Display for KeyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl Serialize for KeyType {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for KeyType {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Ok(KeyType::from_str(&s))
    }
}

pub type KeyId = String;

/// `keys[type][id]`, the two-level Signal-protocol key store.
pub type KeyMap = BTreeMap<KeyType, BTreeMap<KeyId, Value>>;

/// The full per-session state: credentials plus the namespaced key store.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    #[serde(default)]
    pub creds: Value,
    #[serde(default)]
    pub keys: KeyMap,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub app_state: Option<Value>,
}

/// A partial [`Snapshot`]. `null` at `keys[type][id]` denotes deletion of that entry;
/// an absent `keys[type]` entry is left untouched.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Patch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub creds: Option<Value>,
    #[serde(default)]
    pub keys: BTreeMap<KeyType, BTreeMap<KeyId, Option<Value>>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub app_state: Option<Value>,
}

impl Snapshot {
    /// Applies a patch: `creds` replaces wholesale, `keys[type]` merges key-by-key (a
    /// `None` entry deletes), `appState` replaces wholesale if present.
    pub fn apply(&mut self, patch: Patch) {
        if let Some(creds) = patch.creds {
            self.creds = creds;
        }
        for (key_type, entries) in patch.keys {
            let bucket = self.keys.entry(key_type).or_default();
            for (id, value) in entries {
                match value {
                    Some(v) => {
                        bucket.insert(id, v);
                    }
                    None => {
                        bucket.remove(&id);
                    }
                }
            }
        }
        if let Some(app_state) = patch.app_state {
            self.app_state = Some(app_state);
        }
    }
}

impl Patch {
    /// Combines two patches applied in sequence (`p1` then `p2`) into one patch with the
    /// same observable effect: `apply(apply(s, p1), p2) == apply(s, merge(p1, p2))`.
    /// A later patch always wins on conflicting fields, matching `apply`'s overwrite order.
    pub fn merge(mut self, other: Patch) -> Patch {
        if let Some(creds) = other.creds {
            self.creds = Some(creds);
        }
        for (key_type, entries) in other.keys {
            let bucket = self.keys.entry(key_type).or_default();
            for (id, value) in entries {
                bucket.insert(id, value);
            }
        }
        if let Some(app_state) = other.app_state {
            self.app_state = Some(app_state);
        }
        self
    }
}

/// `T` plus its monotonic version and last-write timestamp.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Versioned<T> {
    pub data: T,
    pub version: u64,
    pub updated_at: chrono::DateTime<chrono::Utc>,
}

impl<T> Versioned<T> {
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Versioned<U> {
        Versioned {
            data: f(self.data),
            version: self.version,
            updated_at: self.updated_at,
        }
    }
}

/// Metadata recorded alongside the encoded blob in both tiers.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RecordMeta {
    pub version: u64,
    pub fencing_token: Option<u64>,
    pub updated_at: chrono::DateTime<chrono::Utc>,
    pub expires_at: chrono::DateTime<chrono::Utc>,
}

/// Outcome of a coordinated [`crate::engine::HybridEngine::set`] call.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct VersionedResult {
    pub version: u64,
    pub updated_at: chrono::DateTime<chrono::Utc>,
    pub success: bool,
}
