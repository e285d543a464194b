//! Database rows for persisted rooms.

use derive_getters::Getters;
use derive_new::new;
use diesel::prelude::*;
use squarely_rules::RoomState;
use tracing::instrument;

use super::{StoreError, StoreFailure, schema};

/// A room as stored in SQLite: the serialized aggregate plus the columns
/// needed to filter by id, expiry and revision without decoding it.
#[derive(Debug, Clone, Queryable, Selectable, Insertable, Getters, new)]
#[diesel(table_name = schema::rooms)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct RoomRow {
    room_id: String,
    state: String,
    created_at: i64,
    expires_at: i64,
    revision: i64,
}

impl RoomRow {
    /// Serializes a room with its expiry timestamp (milliseconds).
    #[instrument(skip(state), fields(room_id = %state.room_id()))]
    pub fn encode(state: &RoomState, expires_at: i64) -> Result<Self, StoreError> {
        Ok(Self::new(
            state.room_id().to_string(),
            serde_json::to_string(state)?,
            state.created_at().timestamp_millis(),
            expires_at,
            column_revision(*state.revision())?,
        ))
    }

    /// Decodes the stored room.
    #[instrument(skip(self), fields(room_id = %self.room_id))]
    pub fn decode(&self) -> Result<RoomState, StoreError> {
        Ok(serde_json::from_str(&self.state)?)
    }
}

/// A room revision as the signed integer SQLite stores.
pub fn column_revision(revision: u64) -> Result<i64, StoreError> {
    i64::try_from(revision).map_err(|_| {
        StoreError::new(
            StoreFailure::Encoding,
            format!("room revision {} does not fit the revision column", revision),
        )
    })
}
