//! # Message
//! A chat message, as the backend stores it and as the live-update channel delivers it.
//! Only `owner` and `body` are required. Locally-originated messages have no `created_at` until the
//! backend confirms them, and messages from older backends may have no `id`.

use std::fmt;

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Client-generated correlation id. Every local send carries one so that its confirmation can be matched
/// back to the optimistic copy.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClientId(Uuid);

impl ClientId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ClientId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    #[serde(
        default,
        deserialize_with = "deserialize_id",
        skip_serializing_if = "Option::is_none"
    )]
    pub id: Option<String>,
    pub owner: String,
    pub body: String,
    #[serde(
        default,
        deserialize_with = "deserialize_timestamp",
        skip_serializing_if = "Option::is_none"
    )]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_id: Option<ClientId>,
}

impl Message {
    /// A message that has not been through the backend yet.
    pub fn local(owner: impl Into<String>, body: impl Into<String>, client_id: ClientId) -> Self {
        Self {
            id: None,
            owner: owner.into(),
            body: body.into(),
            created_at: None,
            client_id: Some(client_id),
        }
    }

    pub fn stamp(&self) -> Stamp {
        match self.created_at {
            Some(timestamp) => Stamp::At(timestamp),
            None => Stamp::Unconfirmed,
        }
    }

    /// The key used to recognise a message we already hold.
    /// Messages with neither an id nor a timestamp can't be told apart from a legitimately repeated message, so they get no key.
    pub fn dedup_key(&self) -> Option<DedupKey> {
        if let Some(id) = &self.id {
            return Some(DedupKey::Id(id.clone()));
        }
        self.created_at.map(|created_at| DedupKey::Composite {
            owner: self.owner.clone(),
            body: self.body.clone(),
            created_at,
        })
    }
}

/// Sort position of a message. Unconfirmed messages sort after every timestamped one.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Stamp {
    At(DateTime<Utc>),
    Unconfirmed,
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum DedupKey {
    Id(String),
    Composite {
        owner: String,
        body: String,
        created_at: DateTime<Utc>,
    },
}

/// The payload of a create request.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewMessage {
    pub owner: String,
    pub body: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_id: Option<ClientId>,
}

impl From<&Message> for NewMessage {
    fn from(message: &Message) -> Self {
        Self {
            owner: message.owner.clone(),
            body: message.body.clone(),
            client_id: message.client_id,
        }
    }
}

// Row ids are bigints in most schemas and uuids in others
fn deserialize_id<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: serde::de::Deserializer<'de>,
{
    use serde::de::Error;

    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    match value {
        None | Some(serde_json::Value::Null) => Ok(None),
        Some(serde_json::Value::String(s)) => Ok(Some(s)),
        Some(serde_json::Value::Number(n)) => Ok(Some(n.to_string())),
        Some(other) => Err(D::Error::custom(format!(
            "Expected a string or number id, got `{other}`"
        ))),
    }
}

// `timestamptz` columns come back as RFC 3339, plain `timestamp` columns come back without an offset (we assume UTC)
fn deserialize_timestamp<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
where
    D: serde::de::Deserializer<'de>,
{
    use serde::de::Error;

    let Some(raw) = Option::<String>::deserialize(deserializer)? else {
        return Ok(None);
    };

    if let Ok(timestamp) = DateTime::parse_from_rfc3339(&raw) {
        return Ok(Some(timestamp.with_timezone(&Utc)));
    }

    NaiveDateTime::parse_from_str(&raw, "%Y-%m-%dT%H:%M:%S%.f")
        .or_else(|_| NaiveDateTime::parse_from_str(&raw, "%Y-%m-%d %H:%M:%S%.f"))
        .map(|naive| Some(naive.and_utc()))
        .map_err(|e| D::Error::custom(format!("Invalid timestamp `{raw}`: {e}")))
}
