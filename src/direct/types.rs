use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use tracing::warn;

/// The API sends ids as either JSON strings or numbers; both become opaque strings.
pub(crate) fn de_id<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::String(s) => Ok(s),
        Value::Number(n) => Ok(n.to_string()),
        other => Err(serde::de::Error::custom(format!(
            "expected string or number id, got {}",
            other
        ))),
    }
}

/// Like [`de_id`], but a null id reads as empty.
fn de_id_or_empty<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::Null => Ok(String::new()),
        Value::String(s) => Ok(s),
        Value::Number(n) => Ok(n.to_string()),
        other => Err(serde::de::Error::custom(format!(
            "expected string or number id, got {}",
            other
        ))),
    }
}

/// Drops items that do not parse instead of failing the whole thread.
fn de_items<'de, D>(deserializer: D) -> Result<Vec<MessageItem>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<Vec<Value>>::deserialize(deserializer)?.unwrap_or_default();
    Ok(raw
        .into_iter()
        .filter_map(|value| match serde_json::from_value::<MessageItem>(value) {
            Ok(item) => Some(item),
            Err(e) => {
                warn!("Skipping unparseable thread item: {}", e);
                None
            }
        })
        .collect())
}

fn de_timestamp<'de, D>(deserializer: D) -> Result<i64, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::Number(n) => n
            .as_i64()
            .ok_or_else(|| serde::de::Error::custom("timestamp out of range")),
        Value::String(s) => s.parse().map_err(serde::de::Error::custom),
        Value::Null => Ok(0),
        other => Err(serde::de::Error::custom(format!(
            "expected timestamp, got {}",
            other
        ))),
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ItemType {
    Text,
    Media,
    MediaShare,
    Reaction,
    ActionLog,
    Link,
    VoiceMedia,
    AnimatedMedia,
    Other(String),
}

impl From<String> for ItemType {
    fn from(s: String) -> Self {
        match s.as_str() {
            "text" => ItemType::Text,
            "media" => ItemType::Media,
            "media_share" => ItemType::MediaShare,
            "reaction" => ItemType::Reaction,
            "action_log" => ItemType::ActionLog,
            "link" => ItemType::Link,
            "voice_media" => ItemType::VoiceMedia,
            "animated_media" => ItemType::AnimatedMedia,
            _ => ItemType::Other(s),
        }
    }
}

impl From<ItemType> for String {
    fn from(t: ItemType) -> Self {
        t.to_string()
    }
}

impl fmt::Display for ItemType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ItemType::Text => "text",
            ItemType::Media => "media",
            ItemType::MediaShare => "media_share",
            ItemType::Reaction => "reaction",
            ItemType::ActionLog => "action_log",
            ItemType::Link => "link",
            ItemType::VoiceMedia => "voice_media",
            ItemType::AnimatedMedia => "animated_media",
            ItemType::Other(other) => other,
        };
        f.write_str(s)
    }
}

impl Default for ItemType {
    fn default() -> Self {
        ItemType::Text
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RepliedTo {
    #[serde(deserialize_with = "de_id")]
    pub item_id: String,
}

/// A single message or event inside a thread.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageItem {
    #[serde(deserialize_with = "de_id")]
    pub item_id: String,
    /// Empty when the API omits the sender, as on some placeholder items.
    #[serde(default, deserialize_with = "de_id_or_empty")]
    pub user_id: String,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default, deserialize_with = "de_timestamp")]
    pub timestamp: i64,
    #[serde(default)]
    pub item_type: ItemType,
    /// Back-reference only; the referenced item is not owned here.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replied_to_message: Option<RepliedTo>,
    /// Wire fields this crate does not model.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl MessageItem {
    pub fn text(item_id: &str, user_id: &str, text: &str, timestamp: i64) -> Self {
        Self {
            item_id: item_id.to_string(),
            user_id: user_id.to_string(),
            text: Some(text.to_string()),
            timestamp,
            item_type: ItemType::Text,
            replied_to_message: None,
            extra: Map::new(),
        }
    }

    pub fn replying_to(mut self, item_id: &str) -> Self {
        self.replied_to_message = Some(RepliedTo {
            item_id: item_id.to_string(),
        });
        self
    }

    pub fn replied_to_item_id(&self) -> Option<&str> {
        self.replied_to_message.as_ref().map(|r| r.item_id.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThreadUser {
    #[serde(deserialize_with = "de_id")]
    pub pk: String,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub full_name: Option<String>,
}

/// A conversation. Items are most-recent-first, as the API returns them.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Thread {
    pub thread_id: String,
    #[serde(default)]
    pub thread_title: Option<String>,
    #[serde(default)]
    pub users: Vec<ThreadUser>,
    #[serde(default, deserialize_with = "de_items")]
    pub items: Vec<MessageItem>,
    #[serde(default)]
    pub has_older: bool,
}

impl Thread {
    pub fn latest_item(&self) -> Option<&MessageItem> {
        self.items.first()
    }

    pub fn username_of(&self, user_id: &str) -> Option<&str> {
        self.users
            .iter()
            .find(|u| u.pk == user_id)
            .map(|u| u.username.as_str())
    }
}

/// Immutable result of one inbox fetch.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InboxSnapshot {
    #[serde(default)]
    pub threads: Vec<Thread>,
    #[serde(default)]
    pub has_older: bool,
    #[serde(default)]
    pub unseen_count: u32,
    #[serde(default)]
    pub pending_requests_total: u32,
}

impl InboxSnapshot {
    pub fn with_threads(threads: Vec<Thread>) -> Self {
        Self {
            threads,
            ..Default::default()
        }
    }

    /// Threads whose latest item was sent by someone other than `self_user_id`.
    pub fn unseen_from_others(&self, self_user_id: &str) -> usize {
        self.threads
            .iter()
            .filter(|t| {
                t.latest_item()
                    .map(|item| item.user_id != self_user_id)
                    .unwrap_or(false)
            })
            .count()
    }
}

/// Which inbox query shape to ask the transport for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InboxVariant {
    /// Full query with pagination and filter parameters.
    Full,
    /// Bare query with minimal parameters.
    Simplified,
}

/// Acknowledgement of an outbound item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SendResult {
    #[serde(deserialize_with = "de_id")]
    pub item_id: String,
    #[serde(default)]
    pub thread_id: Option<String>,
    #[serde(default)]
    pub client_context: Option<String>,
}

/// An account as returned by the user info and search endpoints.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UserProfile {
    #[serde(deserialize_with = "de_id")]
    pub pk: String,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub full_name: Option<String>,
    #[serde(default)]
    pub is_private: bool,
    #[serde(default)]
    pub is_verified: bool,
    #[serde(default)]
    pub profile_pic_url: Option<String>,
}

/// A recent message flattened out of its thread.
#[derive(Debug, Clone, PartialEq)]
pub struct RecentMessage {
    pub thread_id: String,
    pub thread_title: Option<String>,
    pub item_id: String,
    pub user_id: String,
    pub text: String,
    pub timestamp: i64,
}
