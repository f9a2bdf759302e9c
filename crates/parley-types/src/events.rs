use serde::{Deserialize, Serialize};

use crate::models::{ChatMessage, MessageId, Reactions};

/// Events sent FROM client TO server over the gateway socket.
///
/// Frames look like `{"event": "join", "data": {...}}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum ClientEvent {
    /// Enter a channel room (authorized, replays history)
    #[serde(rename = "join")]
    Join(JoinChannel),

    #[serde(rename = "leave")]
    Leave(LeaveChannel),

    /// Post a new message to a channel
    #[serde(rename = "message")]
    Message(SendMessage),

    /// Toggle the sender's reaction on a message
    #[serde(rename = "message:reaction")]
    Reaction(ToggleReaction),

    #[serde(rename = "typing")]
    Typing(Typing),

    /// Subscribe to personal notifications
    #[serde(rename = "join-user")]
    JoinUser(JoinUser),

    /// Subscribe to group-wide notifications
    #[serde(rename = "join-group")]
    JoinGroup(JoinGroup),

    #[serde(rename = "leave-group")]
    LeaveGroup(LeaveGroup),

    #[serde(rename = "join-video-room")]
    JoinVideoRoom(JoinVideoRoom),

    #[serde(rename = "leave-video-room")]
    LeaveVideoRoom(LeaveVideoRoom),
}

impl ClientEvent {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Join(_) => "join",
            Self::Leave(_) => "leave",
            Self::Message(_) => "message",
            Self::Reaction(_) => "message:reaction",
            Self::Typing(_) => "typing",
            Self::JoinUser(_) => "join-user",
            Self::JoinGroup(_) => "join-group",
            Self::LeaveGroup(_) => "leave-group",
            Self::JoinVideoRoom(_) => "join-video-room",
            Self::LeaveVideoRoom(_) => "leave-video-room",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinChannel {
    pub channel_id: String,
    pub user_id: String,
    pub username: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LeaveChannel {
    pub channel_id: String,
    pub username: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendMessage {
    pub channel_id: String,
    pub user_id: String,
    pub username: String,
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub image_path: Option<String>,
    #[serde(default)]
    pub reply_to: Option<MessageId>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToggleReaction {
    pub channel_id: String,
    pub message_id: MessageId,
    pub user_id: String,
    pub emoji: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Typing {
    pub channel_id: String,
    pub username: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinUser {
    pub user_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinGroup {
    pub group_id: String,
    pub user_id: String,
    pub username: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LeaveGroup {
    pub group_id: String,
    pub username: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinVideoRoom {
    pub room_id: String,
    pub peer_id: String,
    pub user_id: String,
    pub username: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LeaveVideoRoom {
    pub room_id: String,
    pub peer_id: String,
    pub username: String,
}

/// Events sent FROM server TO client over the gateway socket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum ServerEvent {
    /// Recent channel messages, oldest first
    #[serde(rename = "history")]
    History(Vec<ChatMessage>),

    /// A message was persisted
    #[serde(rename = "message")]
    Message(ChatMessage),

    /// Full reaction map of one message after a toggle
    #[serde(rename = "message:reactions")]
    Reactions(ReactionsUpdated),

    #[serde(rename = "user-joined")]
    UserJoined(PresenceNotice),

    #[serde(rename = "user-left")]
    UserLeft(PresenceNotice),

    #[serde(rename = "user-typing")]
    UserTyping(TypingNotice),

    /// A request from this connection failed
    #[serde(rename = "error")]
    Error(ErrorNotice),

    #[serde(rename = "group-notification")]
    GroupNotification(GroupNotification),

    #[serde(rename = "group:membership-approved")]
    MembershipApproved(MembershipApproved),

    /// Whether a call is running in a channel
    #[serde(rename = "video-status")]
    VideoStatus(VideoStatus),

    /// A peer entered the call room
    #[serde(rename = "user-connected")]
    UserConnected(PeerConnected),

    /// A peer left the call room
    #[serde(rename = "user-disconnected")]
    UserDisconnected(PeerDisconnected),
}

impl ServerEvent {
    pub fn name(&self) -> &'static str {
        match self {
            Self::History(_) => "history",
            Self::Message(_) => "message",
            Self::Reactions(_) => "message:reactions",
            Self::UserJoined(_) => "user-joined",
            Self::UserLeft(_) => "user-left",
            Self::UserTyping(_) => "user-typing",
            Self::Error(_) => "error",
            Self::GroupNotification(_) => "group-notification",
            Self::MembershipApproved(_) => "group:membership-approved",
            Self::VideoStatus(_) => "video-status",
            Self::UserConnected(_) => "user-connected",
            Self::UserDisconnected(_) => "user-disconnected",
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::Error(ErrorNotice {
            message: message.into(),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReactionsUpdated {
    pub message_id: MessageId,
    pub reactions: Reactions,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PresenceNotice {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    pub username: String,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TypingNotice {
    pub username: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorNotice {
    pub message: String,
}

/// Group-scoped notification pushed by the rest of the system.
/// Everything besides `type` is passed through untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupNotification {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(flatten)]
    pub fields: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MembershipApproved {
    pub group_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoStatus {
    pub room_id: String,
    pub in_progress: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PeerConnected {
    pub peer_id: String,
    pub user_id: String,
    pub username: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PeerDisconnected {
    pub peer_id: String,
    pub username: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_reaction_event() {
        let raw = r#"{"event":"message:reaction","data":{"channelId":"c_1","messageId":7,"userId":"u_2","emoji":"👍"}}"#;
        let event: ClientEvent = serde_json::from_str(raw).unwrap();
        assert_eq!(
            event,
            ClientEvent::Reaction(ToggleReaction {
                channel_id: "c_1".into(),
                message_id: 7,
                user_id: "u_2".into(),
                emoji: "👍".into(),
            })
        );
    }

    #[test]
    fn message_optional_fields_default() {
        let raw = r#"{"event":"message","data":{"channelId":"c_1","userId":"u_1","username":"ana","text":"hi"}}"#;
        let ClientEvent::Message(msg) = serde_json::from_str(raw).unwrap() else {
            panic!("expected message event");
        };
        assert_eq!(msg.image_path, None);
        assert_eq!(msg.reply_to, None);
    }

    #[test]
    fn missing_required_field_is_rejected() {
        let raw = r#"{"event":"join","data":{"channelId":"c_1","username":"ana"}}"#;
        assert!(serde_json::from_str::<ClientEvent>(raw).is_err());
    }

    #[test]
    fn unknown_event_is_rejected() {
        let raw = r#"{"event":"shout","data":{}}"#;
        assert!(serde_json::from_str::<ClientEvent>(raw).is_err());
    }

    #[test]
    fn user_left_omits_user_id() {
        let event = ServerEvent::UserLeft(PresenceNotice {
            user_id: None,
            username: "ana".into(),
            message: "ana left the channel".into(),
        });
        assert_eq!(
            serde_json::to_value(&event).unwrap(),
            json!({
                "event": "user-left",
                "data": { "username": "ana", "message": "ana left the channel" }
            })
        );
    }

    #[test]
    fn group_notification_flattens_extra_fields() {
        let raw = json!({ "type": "new_interest", "userId": "u_4", "groupId": "g_1" });
        let notification: GroupNotification = serde_json::from_value(raw.clone()).unwrap();
        assert_eq!(notification.kind, "new_interest");
        let event = ServerEvent::GroupNotification(notification);
        assert_eq!(
            serde_json::to_value(&event).unwrap(),
            json!({ "event": "group-notification", "data": raw })
        );
    }

    #[test]
    fn video_status_uses_camel_case() {
        let event = ServerEvent::VideoStatus(VideoStatus {
            room_id: "c_1".into(),
            in_progress: true,
        });
        assert_eq!(
            serde_json::to_value(&event).unwrap(),
            json!({ "event": "video-status", "data": { "roomId": "c_1", "inProgress": true } })
        );
    }
}
