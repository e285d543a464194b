//! Keyed persistence of room state with a fixed expiry.
//!
//! The engine depends only on the [`RoomStore`] contract. Two backends
//! ship with the crate: an in-process map of serialized rooms and a
//! SQLite table.

mod error;
mod memory;
mod models;
mod schema; // Diesel generated schema - internal use only
mod sqlite;

pub use error::{StoreError, StoreFailure};
pub use memory::MemoryRoomStore;
pub use sqlite::SqliteRoomStore;

use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use squarely_rules::{RoomId, RoomState};
use std::time::Duration;

/// Default lifetime of a room: 24 hours from creation.
pub const DEFAULT_ROOM_TTL: Duration = Duration::from_secs(24 * 60 * 60);

/// Key-value storage for rooms.
///
/// Every operation is a single round trip. Read-modify-write goes through
/// [`insert`](RoomStore::insert) and [`replace`](RoomStore::replace), which
/// only write when the stored room is the one the caller started from, so
/// writers in different processes sharing one backend never overwrite each
/// other's commits. Expired rooms are invisible to all operations.
#[async_trait]
pub trait RoomStore: Send + Sync {
    /// Loads a room, or `None` if absent or expired.
    async fn get(&self, room_id: &RoomId) -> Result<Option<RoomState>, StoreError>;

    /// Writes a room unconditionally. The entry expires `ttl` after the
    /// room's creation time, however often it is rewritten.
    async fn set(&self, state: &RoomState, ttl: Duration) -> Result<(), StoreError>;

    /// Writes a new room unless a live one already holds its id. Returns
    /// whether it was written.
    async fn insert(&self, state: &RoomState, ttl: Duration) -> Result<bool, StoreError>;

    /// Writes `state` only if the live stored room is still at revision
    /// `expected`. Returns whether it was written; `false` means another
    /// writer got there first or the room is gone.
    async fn replace(
        &self,
        state: &RoomState,
        expected: u64,
        ttl: Duration,
    ) -> Result<bool, StoreError>;

    /// Whether a live entry exists for the id.
    async fn exists(&self, room_id: &RoomId) -> Result<bool, StoreError>;

    /// Removes a room. Returns whether an entry was removed.
    async fn delete(&self, room_id: &RoomId) -> Result<bool, StoreError>;

    /// Every live room, in no particular order.
    async fn list_all(&self) -> Result<Vec<RoomState>, StoreError>;
}

/// When a room written with `ttl` stops being visible.
pub fn expiry_for(state: &RoomState, ttl: Duration) -> DateTime<Utc> {
    TimeDelta::from_std(ttl)
        .ok()
        .and_then(|ttl| state.created_at().checked_add_signed(ttl))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}
