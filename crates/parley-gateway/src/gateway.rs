use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::mpsc;
use tracing::{error, info, warn};

use parley_types::events::{
    ClientEvent, GroupNotification, JoinGroup, JoinUser, LeaveGroup, MembershipApproved,
    PeerDisconnected, PresenceNotice, ServerEvent,
};
use parley_types::rooms::RoomKey;
use parley_types::store::{MembershipOracle, MessageStore};

use crate::error::{GatewayError, require};
use crate::registry::{ConnectionId, Participant, RoomRegistry};

/// Number of messages replayed to a connection joining a channel.
pub const DEFAULT_HISTORY_LIMIT: u32 = 50;

/// The realtime protocol: turns client events into room membership changes,
/// persistence, and fan-out.
///
/// Cheap to clone; all clones share one registry.
#[derive(Clone)]
pub struct Gateway {
    pub(crate) inner: Arc<GatewayInner>,
}

pub(crate) struct GatewayInner {
    pub(crate) registry: RoomRegistry,
    pub(crate) messages: Arc<dyn MessageStore>,
    pub(crate) oracle: Arc<dyn MembershipOracle>,
    pub(crate) history_limit: u32,

    /// Serializes persist-then-broadcast per channel so every member sees
    /// messages and reaction snapshots in the order they were stored.
    channel_locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl Gateway {
    pub fn new(messages: Arc<dyn MessageStore>, oracle: Arc<dyn MembershipOracle>) -> Self {
        Self::with_history_limit(messages, oracle, DEFAULT_HISTORY_LIMIT)
    }

    pub fn with_history_limit(
        messages: Arc<dyn MessageStore>,
        oracle: Arc<dyn MembershipOracle>,
        history_limit: u32,
    ) -> Self {
        Self {
            inner: Arc::new(GatewayInner {
                registry: RoomRegistry::new(),
                messages,
                oracle,
                history_limit,
                channel_locks: Mutex::new(HashMap::new()),
            }),
        }
    }

    pub fn registry(&self) -> &RoomRegistry {
        &self.inner.registry
    }

    /// Register a new connection. Events for it arrive on the returned receiver.
    pub fn connect(&self, conn: ConnectionId) -> mpsc::UnboundedReceiver<ServerEvent> {
        self.inner.registry.connect(conn)
    }

    /// Parse one text frame and handle it. Unparseable frames are answered
    /// with an `error` event.
    pub async fn handle_frame(&self, conn: ConnectionId, text: &str) {
        match serde_json::from_str::<ClientEvent>(text) {
            Ok(event) => self.handle(conn, event).await,
            Err(e) => {
                warn!(
                    "Connection {} bad event: {} -- raw: {}",
                    conn,
                    e,
                    text.chars().take(200).collect::<String>()
                );
                self.reject(conn, GatewayError::InvalidOperation(format!("Malformed event: {e}")));
            }
        }
    }

    /// Handle one client event to completion. Failures go to `conn` only.
    ///
    /// The work runs on its own task: dropping or aborting the caller does
    /// not cut a request between persisting and broadcasting.
    pub async fn handle(&self, conn: ConnectionId, event: ClientEvent) {
        let name = event.name();
        let gateway = self.clone();
        if let Err(e) = tokio::spawn(async move { gateway.dispatch(conn, event).await }).await {
            error!("Connection {} {} handler failed: {}", conn, name, e);
        }
    }

    async fn dispatch(&self, conn: ConnectionId, event: ClientEvent) {
        let name = event.name();
        let result = match event {
            ClientEvent::Join(req) => self.join_channel(conn, req).await,
            ClientEvent::Leave(req) => self.leave_channel(conn, req),
            ClientEvent::Message(req) => self.send_message(conn, req).await,
            ClientEvent::Reaction(req) => self.toggle_reaction(conn, req).await,
            ClientEvent::Typing(req) => self.typing(conn, req),
            ClientEvent::JoinUser(req) => self.join_user_room(conn, req),
            ClientEvent::JoinGroup(req) => self.join_group_room(conn, req),
            ClientEvent::LeaveGroup(req) => self.leave_group_room(conn, req),
            ClientEvent::JoinVideoRoom(req) => self.join_video_room(conn, req),
            ClientEvent::LeaveVideoRoom(req) => self.leave_video_room(conn, req),
        };

        if let Err(e) = result {
            warn!("Connection {} {} rejected ({}): {}", conn, name, e.kind(), e);
            self.reject(conn, e);
        }
    }

    fn reject(&self, conn: ConnectionId, error: GatewayError) {
        self.inner.registry.send_to(conn, ServerEvent::error(error.to_string()));
    }

    /// Transport-level teardown: evict `conn` from every room and tell the
    /// remaining members, as if it had left each room explicitly.
    pub async fn disconnect(&self, conn: ConnectionId) {
        let memberships = self.inner.registry.disconnect(conn);
        for (room, participant) in memberships {
            match &room {
                RoomKey::Channel(channel_id) => {
                    self.release_channel_lock(channel_id);
                    let username = participant.username.unwrap_or_default();
                    self.inner.registry.broadcast(
                        &room,
                        ServerEvent::UserLeft(PresenceNotice {
                            user_id: participant.user_id,
                            message: format!("{username} left the channel"),
                            username,
                        }),
                    );
                }
                RoomKey::Video(room_id) => {
                    self.inner.registry.broadcast(
                        &room,
                        ServerEvent::UserDisconnected(PeerDisconnected {
                            peer_id: participant.peer_id.unwrap_or_default(),
                            username: participant.username.unwrap_or_default(),
                        }),
                    );
                    self.video_room_vacated(room_id);
                }
                RoomKey::Group(_) | RoomKey::User(_) => {}
            }
        }
        info!("Connection {} disconnected", conn);
    }

    // -- User / group notification rooms --

    /// No identity check: whoever knows the user id may subscribe.
    pub(crate) fn join_user_room(&self, conn: ConnectionId, req: JoinUser) -> Result<(), GatewayError> {
        require(&req.user_id, "join-user")?;
        let room = RoomKey::User(req.user_id.clone());
        let joined = self.inner.registry.join(
            &room,
            conn,
            Participant {
                user_id: Some(req.user_id),
                ..Participant::default()
            },
        );
        if joined.is_some() {
            info!("Connection {} joined user room {}", conn, room);
        }
        Ok(())
    }

    /// No membership check: whoever knows the group id may subscribe.
    pub(crate) fn join_group_room(&self, conn: ConnectionId, req: JoinGroup) -> Result<(), GatewayError> {
        require(&req.group_id, "join-group")?;
        let room = RoomKey::Group(req.group_id);
        info!("{} ({}) joined group room {} via {}", req.username, req.user_id, room, conn);
        self.inner.registry.join(
            &room,
            conn,
            Participant {
                user_id: Some(req.user_id),
                username: Some(req.username),
                peer_id: None,
            },
        );
        Ok(())
    }

    pub(crate) fn leave_group_room(&self, conn: ConnectionId, req: LeaveGroup) -> Result<(), GatewayError> {
        require(&req.group_id, "leave-group")?;
        let room = RoomKey::Group(req.group_id);
        if self.inner.registry.leave(&room, conn).is_some() {
            info!("{} left group room {}", req.username, room);
        }
        Ok(())
    }

    /// Push a notification to everyone currently viewing a group. Returns
    /// the number of connections reached.
    pub fn notify_group_admins(&self, group_id: &str, notification: GroupNotification) -> usize {
        let kind = notification.kind.clone();
        let room = RoomKey::Group(group_id.to_string());
        let delivered = self
            .inner
            .registry
            .broadcast(&room, ServerEvent::GroupNotification(notification));
        info!("Notification {} sent to {} ({} connections)", kind, room, delivered);
        delivered
    }

    /// Tell a user their request to join a group was approved.
    pub fn notify_membership_approved(&self, user_id: &str, group_id: &str) -> usize {
        let room = RoomKey::User(user_id.to_string());
        let delivered = self.inner.registry.broadcast(
            &room,
            ServerEvent::MembershipApproved(MembershipApproved {
                group_id: group_id.to_string(),
            }),
        );
        info!("Membership approval for group {} sent to {} ({} connections)", group_id, room, delivered);
        delivered
    }

    // -- Shared helpers --

    pub(crate) fn channel_lock(&self, channel_id: &str) -> Arc<tokio::sync::Mutex<()>> {
        self.inner
            .channel_locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(channel_id.to_string())
            .or_default()
            .clone()
    }

    /// Forget a channel's lock once its room is empty and no request holds
    /// a handle to it. Handles are only cloned under the map lock, so a
    /// count of one means nobody else can be using it.
    pub(crate) fn release_channel_lock(&self, channel_id: &str) {
        if self.inner.registry.occupancy(&RoomKey::Channel(channel_id.to_string())) > 0 {
            return;
        }
        let mut locks = self
            .inner
            .channel_locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if locks.get(channel_id).is_some_and(|lock| Arc::strong_count(lock) == 1) {
            locks.remove(channel_id);
        }
    }

    /// Run a blocking storage call off the async runtime. Any failure is
    /// logged and surfaced to the client as `failure`.
    pub(crate) async fn storage<T, F>(&self, failure: &str, f: F) -> Result<T, GatewayError>
    where
        F: FnOnce(&GatewayInner) -> anyhow::Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let inner = self.inner.clone();
        match tokio::task::spawn_blocking(move || f(&inner)).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => {
                error!("{}: {:#}", failure, e);
                Err(GatewayError::Internal(failure.to_string()))
            }
            Err(e) => {
                error!("spawn_blocking join error: {}", e);
                Err(GatewayError::Internal(failure.to_string()))
            }
        }
    }
}
