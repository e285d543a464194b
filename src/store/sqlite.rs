//! SQLite-backed room store.

use async_trait::async_trait;
use chrono::Utc;
use diesel::prelude::*;
use diesel_migrations::{EmbeddedMigrations, MigrationHarness, embed_migrations};
use squarely_rules::{RoomId, RoomState};
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

use super::models::{RoomRow, column_revision};
use super::{RoomStore, StoreError, StoreFailure, expiry_for, schema};

const MIGRATIONS: EmbeddedMigrations = embed_migrations!("migrations");

/// Milliseconds SQLite waits on a locked database before failing.
const BUSY_TIMEOUT_MS: u32 = 5_000;

/// Room store persisted in a SQLite database file.
///
/// Each call opens its own connection on the blocking thread pool. Several
/// server processes may share one file: conditional writes compare the
/// `revision` column in a single statement, so a stale writer loses
/// instead of overwriting.
#[derive(Debug, Clone)]
pub struct SqliteRoomStore {
    db_path: String,
}

impl SqliteRoomStore {
    /// Opens (creating if needed) the database at `db_path` and applies
    /// pending migrations.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the database cannot be opened or migrated.
    #[instrument(skip(db_path), fields(db_path = %db_path))]
    pub fn open(db_path: String) -> Result<Self, StoreError> {
        info!(path = %db_path, "Opening SQLite room store");
        let store = Self { db_path };
        let mut conn = store.connection()?;
        let applied = conn
            .run_pending_migrations(MIGRATIONS)
            .map_err(|e| {
                StoreError::new(
                    StoreFailure::Unavailable,
                    format!("rooms table migrations failed: {}", e),
                )
            })?;
        info!(count = applied.len(), "Migrations applied");
        Ok(store)
    }

    /// Path of the database file.
    pub fn db_path(&self) -> &str {
        &self.db_path
    }

    /// Establishes a database connection.
    #[instrument(skip(self))]
    fn connection(&self) -> Result<SqliteConnection, StoreError> {
        debug!(path = %self.db_path, "Establishing connection");
        let mut conn = SqliteConnection::establish(&self.db_path).map_err(|e| {
            StoreError::new(
                StoreFailure::Unavailable,
                format!("cannot open room database '{}': {}", self.db_path, e),
            )
        })?;
        diesel::sql_query(format!("PRAGMA busy_timeout = {}", BUSY_TIMEOUT_MS))
            .execute(&mut conn)?;
        Ok(conn)
    }

    /// Runs `op` with a fresh connection off the async runtime.
    async fn with_connection<T, F>(&self, op: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: FnOnce(&mut SqliteConnection) -> Result<T, StoreError> + Send + 'static,
    {
        let store = self.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = store.connection()?;
            op(&mut conn)
        })
        .await?
    }
}

#[async_trait]
impl RoomStore for SqliteRoomStore {
    #[instrument(skip(self), fields(room_id = %room_id))]
    async fn get(&self, room_id: &RoomId) -> Result<Option<RoomState>, StoreError> {
        let key = room_id.to_string();
        let row = self
            .with_connection(move |conn| {
                use schema::rooms::dsl;
                Ok(dsl::rooms
                    .filter(dsl::room_id.eq(key))
                    .filter(dsl::expires_at.gt(Utc::now().timestamp_millis()))
                    .select(RoomRow::as_select())
                    .first(conn)
                    .optional()?)
            })
            .await?;
        row.map(|row| row.decode()).transpose()
    }

    #[instrument(skip(self, state), fields(room_id = %state.room_id()))]
    async fn set(&self, state: &RoomState, ttl: Duration) -> Result<(), StoreError> {
        let row = RoomRow::encode(state, expiry_for(state, ttl).timestamp_millis())?;
        self.with_connection(move |conn| {
            diesel::replace_into(schema::rooms::table)
                .values(&row)
                .execute(conn)?;
            debug!(expires_at = row.expires_at(), "Room stored");
            Ok(())
        })
        .await
    }

    #[instrument(skip(self, state), fields(room_id = %state.room_id()))]
    async fn insert(&self, state: &RoomState, ttl: Duration) -> Result<bool, StoreError> {
        let row = RoomRow::encode(state, expiry_for(state, ttl).timestamp_millis())?;
        self.with_connection(move |conn| {
            conn.immediate_transaction::<_, StoreError, _>(|conn| {
                use schema::rooms::dsl;
                let now = Utc::now().timestamp_millis();
                diesel::delete(
                    dsl::rooms
                        .filter(dsl::room_id.eq(row.room_id()))
                        .filter(dsl::expires_at.le(now)),
                )
                .execute(conn)?;
                let inserted = diesel::insert_or_ignore_into(schema::rooms::table)
                    .values(&row)
                    .execute(conn)?;
                debug!(inserted, "Room insert attempted");
                Ok(inserted == 1)
            })
        })
        .await
    }

    #[instrument(skip(self, state), fields(room_id = %state.room_id(), revision = *state.revision()))]
    async fn replace(
        &self,
        state: &RoomState,
        expected: u64,
        ttl: Duration,
    ) -> Result<bool, StoreError> {
        let row = RoomRow::encode(state, expiry_for(state, ttl).timestamp_millis())?;
        let expected = column_revision(expected)?;
        self.with_connection(move |conn| {
            use schema::rooms::dsl;
            let updated = diesel::update(
                dsl::rooms
                    .filter(dsl::room_id.eq(row.room_id()))
                    .filter(dsl::revision.eq(expected))
                    .filter(dsl::expires_at.gt(Utc::now().timestamp_millis())),
            )
            .set((
                dsl::state.eq(row.state()),
                dsl::expires_at.eq(*row.expires_at()),
                dsl::revision.eq(*row.revision()),
            ))
            .execute(conn)?;
            if updated == 0 {
                debug!(expected, "Stored room moved on");
            }
            Ok(updated == 1)
        })
        .await
    }

    #[instrument(skip(self), fields(room_id = %room_id))]
    async fn exists(&self, room_id: &RoomId) -> Result<bool, StoreError> {
        let key = room_id.to_string();
        self.with_connection(move |conn| {
            use schema::rooms::dsl;
            Ok(diesel::select(diesel::dsl::exists(
                dsl::rooms
                    .filter(dsl::room_id.eq(key))
                    .filter(dsl::expires_at.gt(Utc::now().timestamp_millis())),
            ))
            .get_result::<bool>(conn)?)
        })
        .await
    }

    #[instrument(skip(self), fields(room_id = %room_id))]
    async fn delete(&self, room_id: &RoomId) -> Result<bool, StoreError> {
        let key = room_id.to_string();
        self.with_connection(move |conn| {
            use schema::rooms::dsl;
            // Expired rows are removed too but do not count as a deletion.
            let now = Utc::now().timestamp_millis();
            let live = diesel::delete(
                dsl::rooms
                    .filter(dsl::room_id.eq(&key))
                    .filter(dsl::expires_at.gt(now)),
            )
            .execute(conn)?;
            diesel::delete(dsl::rooms.filter(dsl::room_id.eq(&key))).execute(conn)?;
            Ok(live > 0)
        })
        .await
    }

    #[instrument(skip(self))]
    async fn list_all(&self) -> Result<Vec<RoomState>, StoreError> {
        let rows = self
            .with_connection(|conn| {
                use schema::rooms::dsl;
                let now = Utc::now().timestamp_millis();
                let purged = diesel::delete(dsl::rooms.filter(dsl::expires_at.le(now)))
                    .execute(conn)?;
                if purged > 0 {
                    debug!(purged, "Purged expired rooms");
                }
                Ok(dsl::rooms.select(RoomRow::as_select()).load(conn)?)
            })
            .await?;

        let rooms: Vec<RoomState> = rows
            .iter()
            .filter_map(|row| {
                row.decode()
                    .inspect_err(|e| warn!(room_id = %row.room_id(), error = %e, "Skipping undecodable room"))
                    .ok()
            })
            .collect();
        debug!(count = rooms.len(), "Listed rooms");
        Ok(rooms)
    }
}
