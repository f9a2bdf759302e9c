use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Store-assigned message identifier. Monotonic in insertion order.
pub type MessageId = i64;

/// Per-emoji reacting user ids. A user appears at most once under an emoji.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Reactions(BTreeMap<String, Vec<String>>);

impl Reactions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `user_id` under `emoji`. No-op if already present.
    pub fn add(&mut self, emoji: &str, user_id: &str) {
        let users = self.0.entry(emoji.to_string()).or_default();
        if !users.iter().any(|u| u == user_id) {
            users.push(user_id.to_string());
        }
    }

    /// Keep `emoji` as a key even when nobody reacts with it any more, so
    /// clients replacing their copy see the emoji cleared rather than missing.
    pub fn ensure_emoji(&mut self, emoji: &str) {
        self.0.entry(emoji.to_string()).or_default();
    }

    pub fn users(&self, emoji: &str) -> &[String] {
        self.0.get(emoji).map(Vec::as_slice).unwrap_or_default()
    }

    pub fn is_empty(&self) -> bool {
        self.0.values().all(Vec::is_empty)
    }
}

/// A persisted chat message as delivered to clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    pub message_id: MessageId,
    pub channel_id: String,
    pub user_id: String,
    pub username: String,
    pub text: String,
    pub image_path: Option<String>,
    pub reply_to: Option<MessageId>,
    pub reactions: Reactions,
    pub created_at: DateTime<Utc>,
}

/// A validated message waiting to be persisted. The store assigns the id
/// and the timestamp.
#[derive(Debug, Clone)]
pub struct NewMessage {
    pub channel_id: String,
    pub user_id: String,
    pub username: String,
    pub text: String,
    pub image_path: Option<String>,
    pub reply_to: Option<MessageId>,
}

/// Answer from the membership oracle for a (user, channel) pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelAccess {
    Granted,
    UnknownUser,
    UnknownChannel,
    UnknownGroup,
    NotMember,
    Banned,
}
