//! Shared fixtures for gateway tests: an in-memory database with one group
//! and a handful of users, plus helpers to drive fake connections.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Result, bail};
use tokio::sync::mpsc::UnboundedReceiver;
use uuid::Uuid;

use parley_db::Database;
use parley_db::seed::Seed;
use parley_types::events::{ClientEvent, JoinChannel, SendMessage, ServerEvent};
use parley_types::models::{ChatMessage, MessageId, NewMessage, Reactions};
use parley_types::rooms::RoomKey;
use parley_types::store::MessageStore;

use crate::gateway::Gateway;
use crate::registry::ConnectionId;

pub struct Harness {
    pub gateway: Gateway,
    pub db: Arc<Database>,
}

impl Harness {
    /// `u_ana`, `u_ben` and `u_dee` belong to `g_1`, which owns `c_1` and
    /// `c_2`; `u_dee` is banned from `c_1`; `u_cy` is a stranger; `u_root`
    /// is a super-admin.
    pub fn new() -> Self {
        Self::with_store(|db| db)
    }

    /// Same directory, but messages go through the store built by `wrap`.
    pub fn with_store<S>(wrap: impl FnOnce(Arc<Database>) -> Arc<S>) -> Self
    where
        S: MessageStore + 'static,
    {
        let db = Arc::new(Database::open_in_memory().unwrap());
        let seed: Seed = serde_json::from_value(serde_json::json!({
            "users": [
                { "id": "u_ana", "username": "ana", "roles": ["user"] },
                { "id": "u_ben", "username": "ben", "roles": ["user"] },
                { "id": "u_cy", "username": "cy", "roles": ["user"] },
                { "id": "u_dee", "username": "dee", "roles": ["user"] },
                { "id": "u_root", "username": "root", "roles": ["super_admin"] }
            ],
            "groups": [
                { "id": "g_1", "name": "crew", "memberIds": ["u_ana", "u_ben", "u_dee"] }
            ],
            "channels": [
                { "id": "c_1", "groupId": "g_1", "name": "general", "bannedUserIds": ["u_dee"] },
                { "id": "c_2", "groupId": "g_1", "name": "random" },
                { "id": "c_orphan", "groupId": "g_gone", "name": "orphan" }
            ]
        }))
        .unwrap();
        db.import_seed(&seed).unwrap();

        let gateway = Gateway::new(wrap(db.clone()), db.clone());
        Self { gateway, db }
    }

    pub fn conn(&self) -> (ConnectionId, UnboundedReceiver<ServerEvent>) {
        let conn = Uuid::new_v4();
        let rx = self.gateway.connect(conn);
        (conn, rx)
    }

    pub fn channel(&self) -> RoomKey {
        RoomKey::Channel("c_1".into())
    }
}

pub async fn join(h: &Harness, conn: ConnectionId, user_id: &str, username: &str) {
    join_in(h, conn, "c_1", user_id, username).await;
}

pub async fn join_in(h: &Harness, conn: ConnectionId, channel_id: &str, user_id: &str, username: &str) {
    let event = ClientEvent::Join(JoinChannel {
        channel_id: channel_id.into(),
        user_id: user_id.into(),
        username: username.into(),
    });
    h.gateway.handle(conn, event).await;
}

pub async fn say(h: &Harness, conn: ConnectionId, user_id: &str, username: &str, text: &str) {
    say_in(h, conn, "c_1", user_id, username, text).await;
}

pub async fn say_in(
    h: &Harness,
    conn: ConnectionId,
    channel_id: &str,
    user_id: &str,
    username: &str,
    text: &str,
) {
    let event = ClientEvent::Message(SendMessage {
        channel_id: channel_id.into(),
        user_id: user_id.into(),
        username: username.into(),
        text: text.into(),
        image_path: None,
        reply_to: None,
    });
    h.gateway.handle(conn, event).await;
}

pub fn drain(rx: &mut UnboundedReceiver<ServerEvent>) -> Vec<ServerEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

pub fn errors(events: &[ServerEvent]) -> Vec<String> {
    events
        .iter()
        .filter_map(|e| match e {
            ServerEvent::Error(err) => Some(err.message.clone()),
            _ => None,
        })
        .collect()
}

/// Message store that delays every call and can refuse writes.
pub struct FlakyStore {
    pub db: Arc<Database>,
    pub delay: Duration,
    pub fail_writes: bool,
}

impl FlakyStore {
    fn pause(&self) {
        // Runs on the blocking pool, so a thread sleep is what a slow disk looks like.
        std::thread::sleep(self.delay);
    }
}

impl MessageStore for FlakyStore {
    fn insert_message(&self, message: &NewMessage) -> Result<ChatMessage> {
        self.pause();
        if self.fail_writes {
            bail!("disk I/O error");
        }
        self.db.insert_message(message)
    }

    fn recent_messages(&self, channel_id: &str, limit: u32) -> Result<Vec<ChatMessage>> {
        self.pause();
        self.db.recent_messages(channel_id, limit)
    }

    fn get_message(&self, message_id: MessageId) -> Result<Option<ChatMessage>> {
        self.pause();
        self.db.get_message(message_id)
    }

    fn toggle_reaction(&self, message_id: MessageId, user_id: &str, emoji: &str) -> Result<Option<Reactions>> {
        self.pause();
        if self.fail_writes {
            bail!("disk I/O error");
        }
        self.db.toggle_reaction(message_id, user_id, emoji)
    }
}
