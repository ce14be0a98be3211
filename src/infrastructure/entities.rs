//! Stored message entities

use crate::error::ValidationError;
use chrono::{DateTime, NaiveDate, NaiveDateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sqlx::FromRow;
use std::fmt::Display;
use std::str::FromStr;

/// Metadata keys written by the store itself; callers may not override them.
pub const RESERVED_METADATA_KEYS: [&str; 6] = [
    "conversation_id",
    "role",
    "timestamp",
    "content_length",
    "created_at",
    "is_first_message",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }

    /// Label used when flattening a conversation into a prompt.
    pub fn label(&self) -> &'static str {
        match self {
            Role::System => "System",
            Role::User => "User",
            Role::Assistant => "Assistant",
        }
    }
}

impl FromStr for Role {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "system" => Ok(Role::System),
            "user" => Ok(Role::User),
            "assistant" => Ok(Role::Assistant),
            _ => Err(ValidationError::InvalidRole(s.to_owned())),
        }
    }
}

impl Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A message as read back from a store.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StoredMessage {
    pub id: String,
    pub conversation_id: String,
    pub role: Role,
    pub content: String,
    pub timestamp: String,
}

/// A fully validated message about to be written.
#[derive(Debug, Clone)]
pub struct MessageRecord {
    pub id: String,
    pub conversation_id: String,
    pub role: Role,
    pub content: String,
    pub timestamp: String,
    pub created_at: String,
    pub is_first_message: bool,
    pub extra: Map<String, Value>,
}

impl MessageRecord {
    /// Flat metadata map as persisted alongside the document.
    pub fn metadata(&self) -> Map<String, Value> {
        let mut metadata = Map::new();
        metadata.insert("conversation_id".into(), self.conversation_id.clone().into());
        metadata.insert("role".into(), self.role.as_str().into());
        metadata.insert("timestamp".into(), self.timestamp.clone().into());
        metadata.insert(
            "content_length".into(),
            self.content.chars().count().into(),
        );
        metadata.insert("created_at".into(), self.created_at.clone().into());
        metadata.insert("is_first_message".into(), self.is_first_message.into());
        for (key, value) in &self.extra {
            metadata.insert(key.clone(), value.clone());
        }
        metadata
    }

    pub fn to_stored(&self) -> StoredMessage {
        StoredMessage {
            id: self.id.clone(),
            conversation_id: self.conversation_id.clone(),
            role: self.role,
            content: self.content.clone(),
            timestamp: self.timestamp.clone(),
        }
    }
}

/// Row of the local SQLite fallback table.
#[derive(Debug, FromRow)]
pub struct MessageRow {
    pub id: String,
    pub conversation_id: String,
    pub role: String,
    pub content: String,
    pub timestamp: String,
}

impl TryFrom<MessageRow> for StoredMessage {
    type Error = crate::error::StoreError;

    fn try_from(row: MessageRow) -> Result<Self, Self::Error> {
        let role = row
            .role
            .parse()
            .map_err(|e: ValidationError| crate::error::StoreError::CorruptRecord {
                id: row.id.clone(),
                reason: e.to_string(),
            })?;

        Ok(StoredMessage {
            id: row.id,
            conversation_id: row.conversation_id,
            role,
            content: row.content,
            timestamp: row.timestamp,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConversationStats {
    pub conversation_id: String,
    pub count: usize,
    pub user_messages: usize,
    pub assistant_messages: usize,
    pub system_messages: usize,
    pub first_timestamp: Option<String>,
    pub last_timestamp: Option<String>,
}

impl ConversationStats {
    /// Aggregates an already ordered message list.
    pub fn from_messages(conversation_id: &str, messages: &[StoredMessage]) -> Self {
        let by_role = |role: Role| messages.iter().filter(|m| m.role == role).count();

        ConversationStats {
            conversation_id: conversation_id.to_owned(),
            count: messages.len(),
            user_messages: by_role(Role::User),
            assistant_messages: by_role(Role::Assistant),
            system_messages: by_role(Role::System),
            first_timestamp: messages.first().map(|m| m.timestamp.clone()),
            last_timestamp: messages.last().map(|m| m.timestamp.clone()),
        }
    }
}

/// Current UTC time as an ISO 8601 string with a `Z` suffix.
pub fn now_timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true)
}

const OFFSET_FORMATS: [&str; 3] = [
    "%Y-%m-%dT%H:%M%:z",
    "%Y-%m-%dT%H:%M%z",
    "%Y-%m-%dT%H:%M:%S%.f%z",
];

const NAIVE_FORMATS: [&str; 4] = [
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M",
];

/// Accepts ISO 8601 date-times with or without seconds and offset, and plain
/// dates. Values without an offset are read as UTC, plain dates as midnight.
pub fn parse_timestamp(value: &str) -> Option<DateTime<Utc>> {
    let value = value.trim();
    if let Ok(ts) = DateTime::parse_from_rfc3339(value) {
        return Some(ts.with_timezone(&Utc));
    }
    if let Some(ts) = OFFSET_FORMATS
        .iter()
        .find_map(|fmt| DateTime::parse_from_str(value, fmt).ok())
    {
        return Some(ts.with_timezone(&Utc));
    }

    let naive = value.strip_suffix('Z').unwrap_or(value);
    NAIVE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(naive, fmt).ok())
        .or_else(|| {
            NaiveDate::parse_from_str(naive, "%Y-%m-%d")
                .ok()
                .and_then(|date| date.and_hms_opt(0, 0, 0))
        })
        .map(|naive| naive.and_utc())
}

/// Sorts ascending by timestamp and keeps the most recent `cap` messages.
pub fn order_and_cap(mut messages: Vec<StoredMessage>, cap: usize) -> Vec<StoredMessage> {
    messages.sort_by(|a, b| {
        parse_timestamp(&a.timestamp)
            .cmp(&parse_timestamp(&b.timestamp))
            .then_with(|| a.timestamp.cmp(&b.timestamp))
    });
    if messages.len() > cap {
        messages.drain(..messages.len() - cap);
    }
    messages
}
