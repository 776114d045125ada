//! Read-only views over a room's history.

use crate::models::message::Message;

use super::segmenter::{self, ChatSession};
use super::{ChatEngine, ChatError};

impl ChatEngine {
    /// Partition the room's visible history into chat sessions.
    pub async fn sessions(
        &self,
        room_id: i64,
        group_id: i64,
        show_all: bool,
    ) -> Result<Vec<ChatSession>, ChatError> {
        let room = self.room(room_id).await?;
        let history = self.log.range(room.id, group_id, 0, 0).await?;
        Ok(segmenter::segment(
            &history,
            self.config.session_gap_secs,
            self.clock.now(),
            show_all,
        ))
    }

    /// Messages of one session, as bounded by [`ChatEngine::sessions`].
    pub async fn session_messages(
        &self,
        room_id: i64,
        start: i64,
        end: i64,
        group_id: i64,
    ) -> Result<Vec<Message>, ChatError> {
        let room = self.room(room_id).await?;
        self.log.range(room.id, group_id, start, end).await
    }
}
