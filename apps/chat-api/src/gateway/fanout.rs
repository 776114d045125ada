//! Wake-up hub for gateway connections.
//!
//! Uses a single `tokio::sync::broadcast` channel. A notification only says
//! that something happened in a room; each connection filters by its own
//! room and pulls the actual delta through the engine.

use tokio::sync::broadcast;

/// Capacity of the broadcast channel. Slow receivers that fall behind will
/// skip notifications (RecvError::Lagged).
const BROADCAST_CAPACITY: usize = 4096;

/// Something was appended to a room's log.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RoomActivity {
    pub room_id: i64,
}

#[derive(Clone)]
pub struct GatewayBroadcast {
    sender: broadcast::Sender<RoomActivity>,
}

impl Default for GatewayBroadcast {
    fn default() -> Self {
        Self::new()
    }
}

impl GatewayBroadcast {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(BROADCAST_CAPACITY);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RoomActivity> {
        self.sender.subscribe()
    }

    /// Wake every connection attached to `room_id`.
    pub fn notify(&self, room_id: i64) {
        // No receivers is fine.
        let _ = self.sender.send(RoomActivity { room_id });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscribers_see_notifications() {
        let hub = GatewayBroadcast::new();
        let mut rx = hub.subscribe();
        hub.notify(3);
        assert_eq!(rx.recv().await.unwrap(), RoomActivity { room_id: 3 });
    }

    #[test]
    fn notify_without_subscribers_is_a_noop() {
        GatewayBroadcast::new().notify(1);
    }
}
