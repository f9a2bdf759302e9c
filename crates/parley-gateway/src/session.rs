//! Channel rooms: join with authorization and history replay, messages,
//! reactions, typing and leave.

use tracing::{debug, info, trace};

use parley_types::events::{
    JoinChannel, LeaveChannel, PresenceNotice, ReactionsUpdated, SendMessage, ServerEvent,
    ToggleReaction, Typing, TypingNotice, VideoStatus,
};
use parley_types::models::{ChannelAccess, NewMessage};
use parley_types::rooms::RoomKey;

use crate::error::{GatewayError, require};
use crate::gateway::Gateway;
use crate::registry::{ConnectionId, Participant};

impl Gateway {
    pub(crate) async fn join_channel(
        &self,
        conn: ConnectionId,
        req: JoinChannel,
    ) -> Result<(), GatewayError> {
        require(&req.channel_id, "join")?;
        require(&req.user_id, "join")?;
        info!("{} ({}) joining channel {}", req.username, req.user_id, req.channel_id);

        let (user_id, channel_id) = (req.user_id.clone(), req.channel_id.clone());
        let access = self
            .storage("Failed to join channel", move |g| {
                g.oracle.channel_access(&user_id, &channel_id)
            })
            .await?;

        match access {
            ChannelAccess::Granted => {}
            ChannelAccess::UnknownUser => return Err(GatewayError::NotFound("User not found".into())),
            ChannelAccess::UnknownChannel => {
                return Err(GatewayError::NotFound("Channel not found".into()));
            }
            ChannelAccess::UnknownGroup => return Err(GatewayError::NotFound("Group not found".into())),
            ChannelAccess::NotMember => {
                return Err(GatewayError::Forbidden(
                    "You must be a member of the group to access this channel".into(),
                ));
            }
            ChannelAccess::Banned => {
                return Err(GatewayError::Forbidden("You are banned from this channel".into()));
            }
        }

        // Hold the channel lock across fetch and join so no message can be
        // stored in between: it would be missing from both the replay and
        // the live stream.
        let lock = self.channel_lock(&req.channel_id);
        let _guard = lock.lock().await;

        let channel_id = req.channel_id.clone();
        let mut history = self
            .storage("Failed to join channel", move |g| {
                g.messages.recent_messages(&channel_id, g.history_limit)
            })
            .await?;
        // Store hands back newest first; clients want oldest first.
        history.reverse();

        let registry = &self.inner.registry;
        let room = RoomKey::Channel(req.channel_id.clone());
        let Some(fresh) = registry.join(
            &room,
            conn,
            Participant {
                user_id: Some(req.user_id.clone()),
                username: Some(req.username.clone()),
                peer_id: None,
            },
        ) else {
            return Ok(());
        };

        debug!("Replaying {} messages of {} to {}", history.len(), room, conn);
        registry.send_to(conn, ServerEvent::History(history));

        let in_progress = registry.occupancy(&RoomKey::Video(req.channel_id.clone())) > 0;
        registry.send_to(
            conn,
            ServerEvent::VideoStatus(VideoStatus {
                room_id: req.channel_id.clone(),
                in_progress,
            }),
        );

        if fresh {
            registry.broadcast_except(
                &room,
                conn,
                ServerEvent::UserJoined(PresenceNotice {
                    user_id: Some(req.user_id),
                    message: format!("{} joined the channel", req.username),
                    username: req.username,
                }),
            );
        }

        Ok(())
    }

    pub(crate) async fn send_message(
        &self,
        conn: ConnectionId,
        req: SendMessage,
    ) -> Result<(), GatewayError> {
        require(&req.channel_id, "message")?;
        require(&req.user_id, "message")?;

        let image_path = req.image_path.filter(|p| !p.trim().is_empty());
        if req.text.trim().is_empty() && image_path.is_none() {
            return Err(GatewayError::InvalidOperation(
                "Message must contain text or an image".into(),
            ));
        }

        let room = RoomKey::Channel(req.channel_id.clone());
        if !self.inner.registry.contains(&room, conn) {
            return Err(GatewayError::Forbidden(
                "Join the channel before sending messages".into(),
            ));
        }

        let lock = self.channel_lock(&req.channel_id);
        let _guard = lock.lock().await;

        if let Some(reply_to) = req.reply_to {
            let parent = self
                .storage("Failed to send message", move |g| g.messages.get_message(reply_to))
                .await?
                .ok_or_else(|| GatewayError::NotFound("Reply target not found".into()))?;

            if parent.channel_id != req.channel_id {
                return Err(GatewayError::InvalidOperation(
                    "Reply target belongs to another channel".into(),
                ));
            }
            if parent.user_id == req.user_id {
                return Err(GatewayError::Forbidden("Cannot reply to your own message".into()));
            }
        }

        let new_message = NewMessage {
            channel_id: req.channel_id,
            user_id: req.user_id,
            username: req.username,
            text: req.text,
            image_path,
            reply_to: req.reply_to,
        };
        let message = self
            .storage("Failed to send message", move |g| {
                g.messages.insert_message(&new_message)
            })
            .await?;

        debug!(
            "Message {} from {} in {}: {}",
            message.message_id,
            message.username,
            room,
            if message.text.is_empty() { "[image]" } else { message.text.as_str() }
        );
        self.inner.registry.broadcast(&room, ServerEvent::Message(message));
        Ok(())
    }

    pub(crate) async fn toggle_reaction(
        &self,
        conn: ConnectionId,
        req: ToggleReaction,
    ) -> Result<(), GatewayError> {
        require(&req.channel_id, "reaction")?;
        require(&req.user_id, "reaction")?;
        require(&req.emoji, "reaction")?;

        let room = RoomKey::Channel(req.channel_id.clone());
        if !self.inner.registry.contains(&room, conn) {
            return Err(GatewayError::Forbidden(
                "Join the channel before reacting to messages".into(),
            ));
        }

        let lock = self.channel_lock(&req.channel_id);
        let _guard = lock.lock().await;

        let message_id = req.message_id;
        let message = self
            .storage("Failed to toggle reaction", move |g| g.messages.get_message(message_id))
            .await?
            .filter(|m| m.channel_id == req.channel_id)
            .ok_or_else(|| GatewayError::NotFound("Message not found for reaction".into()))?;

        if message.user_id == req.user_id {
            return Err(GatewayError::Forbidden("Cannot react to your own message".into()));
        }

        let (user_id, emoji) = (req.user_id.clone(), req.emoji.clone());
        let reactions = self
            .storage("Failed to toggle reaction", move |g| {
                g.messages.toggle_reaction(message_id, &user_id, &emoji)
            })
            .await?
            .ok_or_else(|| GatewayError::NotFound("Message not found for reaction".into()))?;

        debug!("{} toggled {} on message {}", req.user_id, req.emoji, message_id);
        self.inner.registry.broadcast(
            &room,
            ServerEvent::Reactions(ReactionsUpdated {
                message_id,
                reactions,
            }),
        );
        Ok(())
    }

    /// Leaving a room the connection is not in does nothing.
    pub(crate) fn leave_channel(&self, conn: ConnectionId, req: LeaveChannel) -> Result<(), GatewayError> {
        require(&req.channel_id, "leave")?;
        let room = RoomKey::Channel(req.channel_id.clone());
        let Some(participant) = self.inner.registry.leave(&room, conn) else {
            return Ok(());
        };
        self.release_channel_lock(&req.channel_id);

        info!("{} left channel {}", req.username, room);
        self.inner.registry.broadcast(
            &room,
            ServerEvent::UserLeft(PresenceNotice {
                user_id: participant.user_id,
                message: format!("{} left the channel", req.username),
                username: req.username,
            }),
        );
        Ok(())
    }

    /// Relayed only from connections inside the room; nothing is stored.
    pub(crate) fn typing(&self, conn: ConnectionId, req: Typing) -> Result<(), GatewayError> {
        let room = RoomKey::Channel(req.channel_id);
        if !self.inner.registry.contains(&room, conn) {
            trace!("Dropping typing from {} outside {}", conn, room);
            return Ok(());
        }
        self.inner.registry.broadcast_except(
            &room,
            conn,
            ServerEvent::UserTyping(TypingNotice {
                username: req.username,
            }),
        );
        Ok(())
    }
}
