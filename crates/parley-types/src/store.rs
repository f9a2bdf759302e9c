use anyhow::Result;

use crate::models::{ChannelAccess, ChatMessage, MessageId, NewMessage, Reactions};

/// Durable per-channel message log.
///
/// Implementations are blocking; callers on an async runtime should run
/// them on a blocking thread.
pub trait MessageStore: Send + Sync {
    /// Persist a message, assigning its id and creation timestamp.
    fn insert_message(&self, message: &NewMessage) -> Result<ChatMessage>;

    /// At most `limit` most recent messages of a channel, newest first.
    fn recent_messages(&self, channel_id: &str, limit: u32) -> Result<Vec<ChatMessage>>;

    fn get_message(&self, message_id: MessageId) -> Result<Option<ChatMessage>>;

    /// Atomically flip `user_id` under `emoji` on a message and return the
    /// full reaction map after the change. `None` if the message is unknown.
    fn toggle_reaction(
        &self,
        message_id: MessageId,
        user_id: &str,
        emoji: &str,
    ) -> Result<Option<Reactions>>;
}

/// Answers whether a user may read a channel (group membership, channel
/// bans, super-admin override).
pub trait MembershipOracle: Send + Sync {
    fn channel_access(&self, user_id: &str, channel_id: &str) -> Result<ChannelAccess>;
}
