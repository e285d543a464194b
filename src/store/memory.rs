//! In-process room store.

use super::{RoomStore, StoreError, StoreFailure, expiry_for};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use squarely_rules::{RoomId, RoomState};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tracing::{debug, instrument, warn};

#[derive(Debug, Clone)]
struct StoredRoom {
    payload: String,
    revision: u64,
    expires_at: DateTime<Utc>,
}

impl StoredRoom {
    fn encode(state: &RoomState, ttl: Duration) -> Result<Self, StoreError> {
        Ok(Self {
            payload: serde_json::to_string(state)?,
            revision: *state.revision(),
            expires_at: expiry_for(state, ttl),
        })
    }

    fn is_live(&self, now: DateTime<Utc>) -> bool {
        self.expires_at > now
    }
}

/// Room store backed by a process-local map.
///
/// Rooms are kept as serialized JSON, the way an external key-value
/// store holds them, so callers never share a live copy of a room.
/// Expired entries are dropped lazily when touched.
#[derive(Debug, Clone, Default)]
pub struct MemoryRoomStore {
    entries: Arc<Mutex<HashMap<RoomId, StoredRoom>>>,
}

impl MemoryRoomStore {
    /// Creates an empty store.
    #[instrument]
    pub fn new() -> Self {
        debug!("Creating in-memory room store");
        Self::default()
    }

    fn entries(&self) -> Result<MutexGuard<'_, HashMap<RoomId, StoredRoom>>, StoreError> {
        self.entries
            .lock()
            .map_err(|_| StoreError::new(StoreFailure::Unavailable, "room table lock poisoned"))
    }
}

#[async_trait]
impl RoomStore for MemoryRoomStore {
    #[instrument(skip(self), fields(room_id = %room_id))]
    async fn get(&self, room_id: &RoomId) -> Result<Option<RoomState>, StoreError> {
        let mut entries = self.entries()?;
        let live = match entries.get(room_id) {
            Some(stored) => stored.is_live(Utc::now()),
            None => return Ok(None),
        };
        if !live {
            debug!("Room expired");
            entries.remove(room_id);
            return Ok(None);
        }
        entries
            .get(room_id)
            .map(|stored| serde_json::from_str(&stored.payload))
            .transpose()
            .map_err(StoreError::from)
    }

    #[instrument(skip(self, state), fields(room_id = %state.room_id()))]
    async fn set(&self, state: &RoomState, ttl: Duration) -> Result<(), StoreError> {
        let stored = StoredRoom::encode(state, ttl)?;
        debug!(expires_at = %stored.expires_at, "Storing room");
        self.entries()?.insert(state.room_id().clone(), stored);
        Ok(())
    }

    #[instrument(skip(self, state), fields(room_id = %state.room_id()))]
    async fn insert(&self, state: &RoomState, ttl: Duration) -> Result<bool, StoreError> {
        let stored = StoredRoom::encode(state, ttl)?;
        let now = Utc::now();
        let mut entries = self.entries()?;
        if entries
            .get(state.room_id())
            .is_some_and(|existing| existing.is_live(now))
        {
            debug!("Room id already taken");
            return Ok(false);
        }
        entries.insert(state.room_id().clone(), stored);
        Ok(true)
    }

    #[instrument(skip(self, state), fields(room_id = %state.room_id(), revision = *state.revision()))]
    async fn replace(
        &self,
        state: &RoomState,
        expected: u64,
        ttl: Duration,
    ) -> Result<bool, StoreError> {
        let stored = StoredRoom::encode(state, ttl)?;
        let now = Utc::now();
        let mut entries = self.entries()?;
        match entries.get_mut(state.room_id()) {
            Some(current) if current.is_live(now) && current.revision == expected => {
                *current = stored;
                Ok(true)
            }
            _ => {
                debug!(expected, "Stored room moved on");
                Ok(false)
            }
        }
    }

    #[instrument(skip(self), fields(room_id = %room_id))]
    async fn exists(&self, room_id: &RoomId) -> Result<bool, StoreError> {
        let now = Utc::now();
        Ok(self
            .entries()?
            .get(room_id)
            .is_some_and(|stored| stored.is_live(now)))
    }

    #[instrument(skip(self), fields(room_id = %room_id))]
    async fn delete(&self, room_id: &RoomId) -> Result<bool, StoreError> {
        let now = Utc::now();
        Ok(self
            .entries()?
            .remove(room_id)
            .is_some_and(|stored| stored.is_live(now)))
    }

    #[instrument(skip(self))]
    async fn list_all(&self) -> Result<Vec<RoomState>, StoreError> {
        let now = Utc::now();
        let mut entries = self.entries()?;
        entries.retain(|_, stored| stored.is_live(now));

        let mut rooms = Vec::with_capacity(entries.len());
        for (room_id, stored) in entries.iter() {
            match serde_json::from_str(&stored.payload) {
                Ok(state) => rooms.push(state),
                Err(e) => warn!(room_id = %room_id, error = %e, "Skipping undecodable room"),
            }
        }
        debug!(count = rooms.len(), "Listed rooms");
        Ok(rooms)
    }
}
