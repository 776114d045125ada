//! Postgres [`ChatStore`] on diesel-async.

use async_trait::async_trait;
use diesel::prelude::*;
use diesel::result::{DatabaseErrorKind, OptionalExtension};
use diesel_async::pooled_connection::deadpool::PoolError;
use diesel_async::AsyncConnection;
use scoped_futures::ScopedFutureExt;

use crate::db::pool::DbPool;
use crate::db::schema::{chat_messages, chat_presence, chat_rooms};
use crate::db::store::{AppendOutcome, ChatStore, StoreError};
use crate::host::Clock;
use crate::models::message::{Message, NewMessage};
use crate::models::presence::PresenceEntry;
use crate::models::room::Room;

impl From<diesel::result::Error> for StoreError {
    fn from(err: diesel::result::Error) -> Self {
        tracing::error!(?err, "database error");
        StoreError::Database(err.to_string())
    }
}

impl From<PoolError> for StoreError {
    fn from(err: PoolError) -> Self {
        tracing::error!(?err, "pool error");
        StoreError::Pool(err.to_string())
    }
}

fn is_foreign_key_violation(err: &diesel::result::Error) -> bool {
    matches!(
        err,
        diesel::result::Error::DatabaseError(DatabaseErrorKind::ForeignKeyViolation, _)
    )
}

pub struct PgStore {
    pool: DbPool,
}

impl PgStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ChatStore for PgStore {
    async fn get_room(&self, room_id: i64) -> Result<Option<Room>, StoreError> {
        let mut conn = self.pool.get().await?;
        let room = diesel_async::RunQueryDsl::get_result(
            chat_rooms::table.find(room_id).select(Room::as_select()),
            &mut conn,
        )
        .await
        .optional()?;
        Ok(room)
    }

    async fn list_rooms(&self) -> Result<Vec<Room>, StoreError> {
        let mut conn = self.pool.get().await?;
        let rooms = diesel_async::RunQueryDsl::load(
            chat_rooms::table
                .order(chat_rooms::id.asc())
                .select(Room::as_select()),
            &mut conn,
        )
        .await?;
        Ok(rooms)
    }

    async fn upsert_room(&self, room: &Room) -> Result<(), StoreError> {
        let mut conn = self.pool.get().await?;
        diesel_async::RunQueryDsl::execute(
            diesel::insert_into(chat_rooms::table)
                .values(room)
                .on_conflict(chat_rooms::id)
                .do_update()
                .set((
                    chat_rooms::name.eq(&room.name),
                    chat_rooms::eviction_secs.eq(room.eviction_secs),
                    chat_rooms::keep_days.eq(room.keep_days),
                )),
            &mut conn,
        )
        .await?;
        Ok(())
    }

    async fn insert_presence(&self, entry: &PresenceEntry) -> Result<bool, StoreError> {
        let mut conn = self.pool.get().await?;
        let inserted = diesel_async::RunQueryDsl::execute(
            diesel::insert_into(chat_presence::table)
                .values(entry)
                .on_conflict(chat_presence::token)
                .do_nothing(),
            &mut conn,
        )
        .await;

        match inserted {
            Ok(rows) => Ok(rows > 0),
            Err(err) if is_foreign_key_violation(&err) => Err(StoreError::MissingRoom(entry.room_id)),
            Err(err) => Err(err.into()),
        }
    }

    async fn find_presence(&self, token: &str) -> Result<Option<PresenceEntry>, StoreError> {
        let mut conn = self.pool.get().await?;
        let entry = diesel_async::RunQueryDsl::get_result(
            chat_presence::table
                .find(token)
                .select(PresenceEntry::as_select()),
            &mut conn,
        )
        .await
        .optional()?;
        Ok(entry)
    }

    async fn touch_presence(
        &self,
        token: &str,
        heartbeat: i64,
        message_sent: Option<i64>,
    ) -> Result<bool, StoreError> {
        let mut conn = self.pool.get().await?;
        let target = chat_presence::table.find(token);
        let updated = match message_sent {
            Some(sent) => {
                diesel_async::RunQueryDsl::execute(
                    diesel::update(target).set((
                        chat_presence::last_heartbeat.eq(heartbeat),
                        chat_presence::last_message_sent.eq(sent),
                    )),
                    &mut conn,
                )
                .await?
            }
            None => {
                diesel_async::RunQueryDsl::execute(
                    diesel::update(target).set(chat_presence::last_heartbeat.eq(heartbeat)),
                    &mut conn,
                )
                .await?
            }
        };
        Ok(updated > 0)
    }

    async fn delete_presence(&self, token: &str) -> Result<Option<PresenceEntry>, StoreError> {
        let mut conn = self.pool.get().await?;
        let entry = diesel_async::RunQueryDsl::get_result(
            diesel::delete(chat_presence::table.find(token))
                .returning(PresenceEntry::as_returning()),
            &mut conn,
        )
        .await
        .optional()?;
        Ok(entry)
    }

    async fn delete_presence_if_stale(
        &self,
        token: &str,
        cutoff: i64,
    ) -> Result<Option<PresenceEntry>, StoreError> {
        let mut conn = self.pool.get().await?;
        let entry = diesel_async::RunQueryDsl::get_result(
            diesel::delete(
                chat_presence::table
                    .filter(chat_presence::token.eq(token))
                    .filter(chat_presence::last_heartbeat.lt(cutoff))
                    .filter(chat_presence::last_message_sent.lt(cutoff)),
            )
            .returning(PresenceEntry::as_returning()),
            &mut conn,
        )
        .await
        .optional()?;
        Ok(entry)
    }

    async fn list_presence(&self, room_id: i64) -> Result<Vec<PresenceEntry>, StoreError> {
        let mut conn = self.pool.get().await?;
        let entries = diesel_async::RunQueryDsl::load(
            chat_presence::table
                .filter(chat_presence::room_id.eq(room_id))
                .order((chat_presence::first_seen.asc(), chat_presence::token.asc()))
                .select(PresenceEntry::as_select()),
            &mut conn,
        )
        .await?;
        Ok(entries)
    }

    async fn append_message(&self, new: NewMessage, clock: &dyn Clock) -> Result<AppendOutcome, StoreError> {
        let mut conn = self.pool.get().await?;

        conn.transaction::<_, StoreError, _>(|conn| {
            async move {
                // Bumping the counter locks the room row, which serializes
                // appends and idempotency checks within the room.
                let (seq, last_ts): (i64, i64) = diesel_async::RunQueryDsl::get_result(
                    diesel::update(chat_rooms::table.find(new.room_id))
                        .set(chat_rooms::last_seq.eq(chat_rooms::last_seq + 1))
                        .returning((chat_rooms::last_seq, chat_rooms::last_ts)),
                    conn,
                )
                .await
                .optional()?
                .ok_or(StoreError::MissingRoom(new.room_id))?;

                if let Some(key) = new.idempotency_key.as_deref() {
                    let existing: Option<Message> = diesel_async::RunQueryDsl::get_result(
                        chat_messages::table
                            .filter(chat_messages::room_id.eq(new.room_id))
                            .filter(chat_messages::user_id.eq(new.user_id))
                            .filter(chat_messages::idempotency_key.eq(key))
                            .select(Message::as_select())
                            .limit(1),
                        conn,
                    )
                    .await
                    .optional()?;

                    // The bumped counter leaves a gap, which ordering tolerates.
                    if let Some(message) = existing {
                        return Ok(AppendOutcome {
                            message,
                            duplicate: true,
                        });
                    }
                }

                // Stamp only while the row lock is held.
                let timestamp = clock.now().max(last_ts);
                diesel_async::RunQueryDsl::execute(
                    diesel::update(chat_rooms::table.find(new.room_id))
                        .set(chat_rooms::last_ts.eq(timestamp)),
                    conn,
                )
                .await?;

                let message = new.into_message(seq, timestamp);
                diesel_async::RunQueryDsl::execute(
                    diesel::insert_into(chat_messages::table).values(&message),
                    conn,
                )
                .await?;

                Ok(AppendOutcome {
                    message,
                    duplicate: false,
                })
            }
            .scope_boxed()
        })
        .await
    }

    async fn latest_message(&self, room_id: i64, group_id: i64) -> Result<Option<Message>, StoreError> {
        let mut conn = self.pool.get().await?;
        let mut query = chat_messages::table
            .filter(chat_messages::room_id.eq(room_id))
            .order((chat_messages::sent_at.desc(), chat_messages::seq.desc()))
            .select(Message::as_select())
            .into_boxed();
        if group_id != 0 {
            query = query.filter(
                chat_messages::group_id
                    .eq(group_id)
                    .or(chat_messages::group_id.eq(0)),
            );
        }

        let message = diesel_async::RunQueryDsl::get_result(query.limit(1), &mut conn)
            .await
            .optional()?;
        Ok(message)
    }

    async fn messages_after(
        &self,
        room_id: i64,
        group_id: i64,
        after: i64,
    ) -> Result<Vec<Message>, StoreError> {
        let mut conn = self.pool.get().await?;
        let mut query = chat_messages::table
            .filter(chat_messages::room_id.eq(room_id))
            .filter(chat_messages::sent_at.gt(after))
            .order((chat_messages::sent_at.asc(), chat_messages::seq.asc()))
            .select(Message::as_select())
            .into_boxed();
        if group_id != 0 {
            query = query.filter(
                chat_messages::group_id
                    .eq(group_id)
                    .or(chat_messages::group_id.eq(0)),
            );
        }

        let messages = diesel_async::RunQueryDsl::load(query, &mut conn).await?;
        Ok(messages)
    }

    async fn messages_between(
        &self,
        room_id: i64,
        group_id: i64,
        start: i64,
        end: i64,
    ) -> Result<Vec<Message>, StoreError> {
        let mut conn = self.pool.get().await?;
        let mut query = chat_messages::table
            .filter(chat_messages::room_id.eq(room_id))
            .order((chat_messages::sent_at.asc(), chat_messages::seq.asc()))
            .select(Message::as_select())
            .into_boxed();
        if start != 0 {
            query = query.filter(chat_messages::sent_at.ge(start));
        }
        if end != 0 {
            query = query.filter(chat_messages::sent_at.le(end));
        }
        if group_id != 0 {
            query = query.filter(
                chat_messages::group_id
                    .eq(group_id)
                    .or(chat_messages::group_id.eq(0)),
            );
        }

        let messages = diesel_async::RunQueryDsl::load(query, &mut conn).await?;
        Ok(messages)
    }

    async fn purge_messages_before(&self, room_id: i64, cutoff: i64) -> Result<usize, StoreError> {
        let mut conn = self.pool.get().await?;
        let purged = diesel_async::RunQueryDsl::execute(
            diesel::delete(
                chat_messages::table
                    .filter(chat_messages::room_id.eq(room_id))
                    .filter(chat_messages::sent_at.lt(cutoff)),
            ),
            &mut conn,
        )
        .await?;
        Ok(purged)
    }
}
