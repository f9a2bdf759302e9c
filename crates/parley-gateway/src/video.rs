//! Call rooms. Media is negotiated peer to peer elsewhere; here we only
//! track who is in the call and keep the parent channel's "call in
//! progress" badge accurate.

use tracing::info;

use parley_types::events::{
    JoinVideoRoom, LeaveVideoRoom, PeerConnected, PeerDisconnected, ServerEvent, VideoStatus,
};
use parley_types::rooms::RoomKey;

use crate::error::{GatewayError, require};
use crate::gateway::Gateway;
use crate::registry::{ConnectionId, Participant};

impl Gateway {
    pub(crate) fn join_video_room(
        &self,
        conn: ConnectionId,
        req: JoinVideoRoom,
    ) -> Result<(), GatewayError> {
        require(&req.room_id, "join-video-room")?;
        require(&req.peer_id, "join-video-room")?;

        let room = RoomKey::Video(req.room_id.clone());
        let joined = self.inner.registry.join(
            &room,
            conn,
            Participant {
                user_id: Some(req.user_id.clone()),
                username: Some(req.username.clone()),
                peer_id: Some(req.peer_id.clone()),
            },
        );
        if joined.is_none() {
            return Ok(());
        }
        info!("{} ({}) joined {}", req.username, req.peer_id, room);

        self.inner.registry.broadcast_except(
            &room,
            conn,
            ServerEvent::UserConnected(PeerConnected {
                peer_id: req.peer_id,
                user_id: req.user_id,
                username: req.username,
            }),
        );
        self.announce_video_status(&req.room_id, true);
        Ok(())
    }

    /// Leaving a call the connection is not in does nothing.
    pub(crate) fn leave_video_room(
        &self,
        conn: ConnectionId,
        req: LeaveVideoRoom,
    ) -> Result<(), GatewayError> {
        require(&req.room_id, "leave-video-room")?;

        let room = RoomKey::Video(req.room_id.clone());
        if self.inner.registry.leave(&room, conn).is_none() {
            return Ok(());
        }
        info!("{} ({}) left {}", req.username, req.peer_id, room);

        self.inner.registry.broadcast(
            &room,
            ServerEvent::UserDisconnected(PeerDisconnected {
                peer_id: req.peer_id,
                username: req.username,
            }),
        );
        self.video_room_vacated(&req.room_id);
        Ok(())
    }

    /// Announce the call to the parent channel, including members who have
    /// not joined the call themselves.
    pub(crate) fn announce_video_status(&self, room_id: &str, in_progress: bool) {
        self.inner.registry.broadcast(
            &RoomKey::Channel(room_id.to_string()),
            ServerEvent::VideoStatus(VideoStatus {
                room_id: room_id.to_string(),
                in_progress,
            }),
        );
    }

    /// After someone left a call: clear the badge if nobody is left.
    pub(crate) fn video_room_vacated(&self, room_id: &str) {
        if self.inner.registry.occupancy(&RoomKey::Video(room_id.to_string())) == 0 {
            self.announce_video_status(room_id, false);
        }
    }
}

#[cfg(test)]
mod tests {
    use parley_types::events::{ClientEvent, JoinVideoRoom, LeaveVideoRoom, ServerEvent, VideoStatus};

    use crate::testing::{Harness, drain, join};

    fn join_call(peer: &str, user: &str, name: &str) -> ClientEvent {
        ClientEvent::JoinVideoRoom(JoinVideoRoom {
            room_id: "c_1".into(),
            peer_id: peer.into(),
            user_id: user.into(),
            username: name.into(),
        })
    }

    fn leave_call(peer: &str, name: &str) -> ClientEvent {
        ClientEvent::LeaveVideoRoom(LeaveVideoRoom {
            room_id: "c_1".into(),
            peer_id: peer.into(),
            username: name.into(),
        })
    }

    fn status(in_progress: bool) -> ServerEvent {
        ServerEvent::VideoStatus(VideoStatus {
            room_id: "c_1".into(),
            in_progress,
        })
    }

    #[tokio::test]
    async fn call_lifecycle_updates_channel_badge() {
        let h = Harness::new();
        let (watcher, mut rx_watcher) = h.conn();
        let (a, mut rx_a) = h.conn();
        let (b, mut rx_b) = h.conn();
        join(&h, watcher, "u_root", "root").await;
        drain(&mut rx_watcher);

        h.gateway.handle(a, join_call("peer-a", "u_ana", "ana")).await;
        assert_eq!(drain(&mut rx_watcher), [status(true)]);
        assert!(drain(&mut rx_a).is_empty());

        h.gateway.handle(b, join_call("peer-b", "u_ben", "ben")).await;
        let to_a = drain(&mut rx_a);
        assert_eq!(
            serde_json::to_value(&to_a[0]).unwrap(),
            serde_json::json!({
                "event": "user-connected",
                "data": { "peerId": "peer-b", "userId": "u_ben", "username": "ben" }
            })
        );
        assert!(drain(&mut rx_b).is_empty());
        assert_eq!(drain(&mut rx_watcher), [status(true)]);

        h.gateway.handle(a, leave_call("peer-a", "ana")).await;
        let to_b = drain(&mut rx_b);
        assert!(matches!(&to_b[0], ServerEvent::UserDisconnected(p) if p.peer_id == "peer-a"));
        assert!(drain(&mut rx_watcher).is_empty());

        h.gateway.handle(b, leave_call("peer-b", "ben")).await;
        assert_eq!(drain(&mut rx_watcher), [status(false)]);
    }

    #[tokio::test]
    async fn joining_channel_reports_running_call() {
        let h = Harness::new();
        let (caller, _rx_caller) = h.conn();
        h.gateway.handle(caller, join_call("peer-a", "u_ben", "ben")).await;

        let (a, mut rx_a) = h.conn();
        join(&h, a, "u_ana", "ana").await;
        let events = drain(&mut rx_a);
        assert_eq!(events[1], status(true));
    }

    #[tokio::test]
    async fn disconnect_runs_video_leave() {
        let h = Harness::new();
        let (watcher, mut rx_watcher) = h.conn();
        let (a, mut rx_a) = h.conn();
        let (b, _rx_b) = h.conn();
        join(&h, watcher, "u_root", "root").await;
        h.gateway.handle(a, join_call("peer-a", "u_ana", "ana")).await;
        h.gateway.handle(b, join_call("peer-b", "u_ben", "ben")).await;
        drain(&mut rx_watcher);
        drain(&mut rx_a);

        h.gateway.disconnect(b).await;
        let to_a = drain(&mut rx_a);
        assert_eq!(
            serde_json::to_value(&to_a[0]).unwrap(),
            serde_json::json!({
                "event": "user-disconnected",
                "data": { "peerId": "peer-b", "username": "ben" }
            })
        );
        assert!(drain(&mut rx_watcher).is_empty());

        h.gateway.disconnect(a).await;
        assert_eq!(drain(&mut rx_watcher), [status(false)]);
    }

    #[tokio::test]
    async fn leaving_a_call_twice_is_a_no_op() {
        let h = Harness::new();
        let (watcher, mut rx_watcher) = h.conn();
        let (a, _rx_a) = h.conn();
        join(&h, watcher, "u_root", "root").await;
        h.gateway.handle(a, join_call("peer-a", "u_ana", "ana")).await;
        h.gateway.handle(a, leave_call("peer-a", "ana")).await;
        drain(&mut rx_watcher);

        h.gateway.handle(a, leave_call("peer-a", "ana")).await;
        assert!(drain(&mut rx_watcher).is_empty());
    }
}
