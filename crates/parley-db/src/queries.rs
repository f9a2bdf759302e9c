use std::collections::HashMap;

use anyhow::Result;
use chrono::{DateTime, SecondsFormat, SubsecRound, Utc};
use rusqlite::Connection;
use tracing::warn;

use parley_types::models::{ChannelAccess, ChatMessage, MessageId, NewMessage, Reactions};
use parley_types::store::{MembershipOracle, MessageStore};

use crate::Database;
use crate::models::{MessageRow, ReactionRow, UserRow};

const MESSAGE_COLUMNS: &str =
    "id, channel_id, user_id, username, text, image_path, reply_to, created_at";

impl Database {
    // -- Messages --

    pub fn insert_message(&self, message: &NewMessage) -> Result<ChatMessage> {
        // Millisecond precision, matching what is stored.
        let now = Utc::now().trunc_subsecs(3);
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO messages (channel_id, user_id, username, text, image_path, reply_to, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                rusqlite::params![
                    message.channel_id,
                    message.user_id,
                    message.username,
                    message.text,
                    message.image_path,
                    message.reply_to,
                    now.to_rfc3339_opts(SecondsFormat::Millis, true),
                ],
            )?;

            Ok(ChatMessage {
                message_id: conn.last_insert_rowid(),
                channel_id: message.channel_id.clone(),
                user_id: message.user_id.clone(),
                username: message.username.clone(),
                text: message.text.clone(),
                image_path: message.image_path.clone(),
                reply_to: message.reply_to,
                reactions: Reactions::new(),
                created_at: now,
            })
        })
    }

    /// Most recent messages of a channel, newest first, reactions included.
    pub fn recent_messages(&self, channel_id: &str, limit: u32) -> Result<Vec<ChatMessage>> {
        self.with_conn(|conn| {
            let rows = query_recent_messages(conn, channel_id, limit)?;
            let ids: Vec<i64> = rows.iter().map(|r| r.id).collect();
            let reactions = query_reactions_for_messages(conn, &ids)?;
            Ok(assemble(rows, reactions))
        })
    }

    pub fn get_message(&self, message_id: MessageId) -> Result<Option<ChatMessage>> {
        self.with_conn(|conn| {
            let Some(row) = query_message(conn, message_id)? else {
                return Ok(None);
            };
            let reactions = query_reactions_for_messages(conn, &[row.id])?;
            Ok(assemble(vec![row], reactions).pop())
        })
    }

    // -- Reactions --

    /// Toggle a reaction: removes if it exists, inserts if not. Runs in one
    /// transaction under the connection lock, so concurrent toggles on the
    /// same message cannot overwrite each other.
    ///
    /// Returns the message's full reaction map afterwards, or `None` if the
    /// message does not exist.
    pub fn toggle_reaction(
        &self,
        message_id: MessageId,
        user_id: &str,
        emoji: &str,
    ) -> Result<Option<Reactions>> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;

            if query_message(&tx, message_id)?.is_none() {
                return Ok(None);
            }

            let existing: Option<i64> = tx
                .query_row(
                    "SELECT id FROM reactions WHERE message_id = ?1 AND user_id = ?2 AND emoji = ?3",
                    rusqlite::params![message_id, user_id, emoji],
                    |row| row.get(0),
                )
                .optional()?;

            if let Some(existing_id) = existing {
                tx.execute("DELETE FROM reactions WHERE id = ?1", [existing_id])?;
            } else {
                tx.execute(
                    "INSERT INTO reactions (message_id, user_id, emoji) VALUES (?1, ?2, ?3)",
                    rusqlite::params![message_id, user_id, emoji],
                )?;
            }

            let mut reactions = Reactions::new();
            for row in query_reactions_for_messages(&tx, &[message_id])? {
                reactions.add(&row.emoji, &row.user_id);
            }
            reactions.ensure_emoji(emoji);

            tx.commit()?;
            Ok(Some(reactions))
        })
    }

    // -- Membership --

    pub fn get_user(&self, id: &str) -> Result<Option<UserRow>> {
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT id, username, is_super_admin FROM users WHERE id = ?1",
                [id],
                |row| {
                    Ok(UserRow {
                        id: row.get(0)?,
                        username: row.get(1)?,
                        is_super_admin: row.get(2)?,
                    })
                },
            )
            .optional()
        })
    }

    /// Resolve whether `user_id` may read `channel_id`.
    ///
    /// Super-admins bypass membership and bans; everyone else must belong to
    /// the channel's group and not be banned from the channel.
    pub fn channel_access(&self, user_id: &str, channel_id: &str) -> Result<ChannelAccess> {
        let Some(user) = self.get_user(user_id)? else {
            return Ok(ChannelAccess::UnknownUser);
        };

        self.with_conn(|conn| {
            let group_id: Option<String> = conn
                .query_row(
                    "SELECT group_id FROM channels WHERE id = ?1",
                    [channel_id],
                    |row| row.get(0),
                )
                .optional()?;
            let Some(group_id) = group_id else {
                return Ok(ChannelAccess::UnknownChannel);
            };

            if !exists(conn, "SELECT 1 FROM groups WHERE id = ?1", [&group_id])? {
                return Ok(ChannelAccess::UnknownGroup);
            }

            if user.is_super_admin {
                return Ok(ChannelAccess::Granted);
            }

            if exists(
                conn,
                "SELECT 1 FROM channel_bans WHERE channel_id = ?1 AND user_id = ?2",
                rusqlite::params![channel_id, user.id],
            )? {
                return Ok(ChannelAccess::Banned);
            }

            if exists(
                conn,
                "SELECT 1 FROM group_members WHERE group_id = ?1 AND user_id = ?2",
                rusqlite::params![group_id, user.id],
            )? {
                Ok(ChannelAccess::Granted)
            } else {
                Ok(ChannelAccess::NotMember)
            }
        })
    }
}

impl MessageStore for Database {
    fn insert_message(&self, message: &NewMessage) -> Result<ChatMessage> {
        Database::insert_message(self, message)
    }

    fn recent_messages(&self, channel_id: &str, limit: u32) -> Result<Vec<ChatMessage>> {
        Database::recent_messages(self, channel_id, limit)
    }

    fn get_message(&self, message_id: MessageId) -> Result<Option<ChatMessage>> {
        Database::get_message(self, message_id)
    }

    fn toggle_reaction(
        &self,
        message_id: MessageId,
        user_id: &str,
        emoji: &str,
    ) -> Result<Option<Reactions>> {
        Database::toggle_reaction(self, message_id, user_id, emoji)
    }
}

impl MembershipOracle for Database {
    fn channel_access(&self, user_id: &str, channel_id: &str) -> Result<ChannelAccess> {
        Database::channel_access(self, user_id, channel_id)
    }
}

fn exists(conn: &Connection, sql: &str, params: impl rusqlite::Params) -> Result<bool> {
    let found = conn
        .query_row(sql, params, |_| Ok(()))
        .optional()?;
    Ok(found.is_some())
}

fn map_message_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<MessageRow> {
    Ok(MessageRow {
        id: row.get(0)?,
        channel_id: row.get(1)?,
        user_id: row.get(2)?,
        username: row.get(3)?,
        text: row.get(4)?,
        image_path: row.get(5)?,
        reply_to: row.get(6)?,
        created_at: row.get(7)?,
    })
}

fn query_message(conn: &Connection, id: i64) -> Result<Option<MessageRow>> {
    let sql = format!("SELECT {MESSAGE_COLUMNS} FROM messages WHERE id = ?1");
    conn.query_row(&sql, [id], map_message_row).optional()
}

fn query_recent_messages(conn: &Connection, channel_id: &str, limit: u32) -> Result<Vec<MessageRow>> {
    // Ids are assigned in insertion order, which is the order clients must see.
    let sql = format!(
        "SELECT {MESSAGE_COLUMNS} FROM messages
         WHERE channel_id = ?1
         ORDER BY id DESC
         LIMIT ?2"
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(rusqlite::params![channel_id, limit], map_message_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Batch-fetch reactions for a set of message ids, in the order they were added.
fn query_reactions_for_messages(conn: &Connection, message_ids: &[i64]) -> Result<Vec<ReactionRow>> {
    if message_ids.is_empty() {
        return Ok(vec![]);
    }

    let placeholders: Vec<String> = (1..=message_ids.len()).map(|i| format!("?{}", i)).collect();
    let sql = format!(
        "SELECT message_id, user_id, emoji FROM reactions WHERE message_id IN ({}) ORDER BY id",
        placeholders.join(", ")
    );

    let mut stmt = conn.prepare(&sql)?;
    let params: Vec<&dyn rusqlite::ToSql> = message_ids
        .iter()
        .map(|id| id as &dyn rusqlite::ToSql)
        .collect();

    let rows = stmt
        .query_map(params.as_slice(), |row| {
            Ok(ReactionRow {
                message_id: row.get(0)?,
                user_id: row.get(1)?,
                emoji: row.get(2)?,
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    Ok(rows)
}

fn assemble(rows: Vec<MessageRow>, reaction_rows: Vec<ReactionRow>) -> Vec<ChatMessage> {
    let mut reaction_map: HashMap<i64, Reactions> = HashMap::new();
    for r in &reaction_rows {
        reaction_map.entry(r.message_id).or_default().add(&r.emoji, &r.user_id);
    }

    rows.into_iter()
        .map(|row| ChatMessage {
            created_at: parse_timestamp(&row.created_at).unwrap_or_else(|| {
                warn!("Corrupt created_at '{}' on message {}", row.created_at, row.id);
                DateTime::default()
            }),
            reactions: reaction_map.remove(&row.id).unwrap_or_default(),
            message_id: row.id,
            channel_id: row.channel_id,
            user_id: row.user_id,
            username: row.username,
            text: row.text,
            image_path: row.image_path,
            reply_to: row.reply_to,
        })
        .collect()
}

fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    raw.parse::<DateTime<Utc>>()
        .or_else(|_| {
            // Rows written by hand in the sqlite shell use "YYYY-MM-DD HH:MM:SS".
            chrono::NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S").map(|ndt| ndt.and_utc())
        })
        .ok()
}

/// Extension trait for optional query results
trait OptionalExt<T> {
    fn optional(self) -> Result<Option<T>>;
}

impl<T> OptionalExt<T> for std::result::Result<T, rusqlite::Error> {
    fn optional(self) -> Result<Option<T>> {
        match self {
            Ok(val) => Ok(Some(val)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}
