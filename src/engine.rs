//! Room engine: read-modify-write of rooms under a per-room lock.
//!
//! Every mutation loads the room from the [`RoomStore`], applies one
//! [`RoomState`] transition and writes it back while holding that room's
//! lock, so two participants acting on the same room never interleave.
//! A refused transition writes nothing.
//!
//! The lock only covers this process. Write-back is conditional on the
//! room's revision, so when another process sharing the store commits
//! first the transition is re-applied to the fresher room.
//!
//! A [`CommitListener`] hears about each commit before the room's lock is
//! released, so listeners see a room's commits in revision order.

use crate::store::{DEFAULT_ROOM_TTL, RoomStore, StoreError};
use chrono::{DateTime, Utc};
use derive_more::{Display, From};
use rand::Rng;
use serde::Serialize;
use squarely_rules::{
    ActionError, ConnectionId, GameRules, Participant, ROOM_ID_RANGE, Rect, RoomEvent, RoomId,
    RoomState, RoomSummary, Slot, Transition,
};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::OwnedMutexGuard;
use tracing::{debug, info, instrument, warn};

/// Candidate ids drawn before room creation gives up.
pub const MAX_ID_ATTEMPTS: usize = 32;

/// Conditional writes tried before a mutation gives up on a busy room.
pub const MAX_WRITE_ATTEMPTS: usize = 8;

/// Source of candidate room numbers.
pub type IdSource = Arc<dyn Fn() -> u32 + Send + Sync>;

/// Errors from engine operations.
#[derive(Debug, Clone, Display, From)]
pub enum EngineError {
    /// No live room has this id.
    #[display("Room {} not found", _0)]
    RoomNotFound(RoomId),

    /// The transition was refused; nothing was written.
    #[display("{}", _0)]
    #[from]
    Rejected(ActionError),

    /// The store could not be read or written.
    #[display("{}", _0)]
    #[from]
    Store(StoreError),

    /// Every candidate id was taken.
    #[display("No free room id after {} attempts", _0)]
    IdSpaceExhausted(usize),

    /// Other writers kept committing to the room first.
    #[display("Room still changing after {} write attempts", _0)]
    Contended(usize),
}

impl std::error::Error for EngineError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            EngineError::Rejected(e) => Some(e),
            EngineError::Store(e) => Some(e),
            EngineError::RoomNotFound(_)
            | EngineError::IdSpaceExhausted(_)
            | EngineError::Contended(_) => None,
        }
    }
}

impl EngineError {
    /// The `actionRejected` event to send back to the originator, if this
    /// error is one a participant should be told about.
    pub fn rejection(&self) -> Option<RoomEvent> {
        match self {
            EngineError::RoomNotFound(_) => Some(RoomEvent::ActionRejected {
                reason: "Room not found".to_string(),
            }),
            EngineError::Rejected(e) => Some(RoomEvent::ActionRejected {
                reason: e.to_string(),
            }),
            EngineError::Store(_) | EngineError::IdSpaceExhausted(_) | EngineError::Contended(_) => {
                None
            }
        }
    }
}

/// A persisted transition: the room as written plus the events it produced.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Committed {
    /// Room state after the transition.
    pub state: RoomState,
    /// Events in emission order.
    pub events: Vec<RoomEvent>,
}

/// Told about room changes while the room's lock is still held.
///
/// Calls for one room never overlap and arrive in commit order, so
/// implementations must not block or re-enter the engine.
pub trait CommitListener: Send + Sync {
    /// A transition was written.
    fn committed(&self, room_id: &RoomId, committed: &Committed);

    /// The room was deleted or has expired.
    fn closed(&self, room_id: &RoomId);
}

/// Lobby listing of every live room.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LobbySummary {
    /// Rooms, newest first.
    pub rooms: Vec<RoomSummary>,
    /// Number of rooms.
    pub total_rooms: usize,
    /// Seated players across all rooms.
    pub total_players: usize,
}

/// One async mutex per room id.
#[derive(Debug, Default)]
pub struct RoomLocks {
    locks: Mutex<HashMap<RoomId, Arc<tokio::sync::Mutex<()>>>>,
}

impl RoomLocks {
    /// Creates an empty lock table.
    pub fn new() -> Self {
        Self::default()
    }

    // The table only maps ids to mutexes, so a poisoned guard is still usable.
    fn table(&self) -> MutexGuard<'_, HashMap<RoomId, Arc<tokio::sync::Mutex<()>>>> {
        self.locks.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Waits for exclusive access to a room.
    #[instrument(skip(self), fields(room_id = %room_id))]
    pub async fn acquire(&self, room_id: &RoomId) -> OwnedMutexGuard<()> {
        let lock = self.table().entry(room_id.clone()).or_default().clone();
        lock.lock_owned().await
    }

    /// Drops the room's lock entry unless someone holds or awaits it.
    pub fn release_if_idle(&self, room_id: &RoomId) {
        let mut table = self.table();
        if table
            .get(room_id)
            .is_some_and(|lock| Arc::strong_count(lock) == 1)
        {
            table.remove(room_id);
        }
    }

    /// Drops every idle entry. Returns how many were removed.
    pub fn prune(&self) -> usize {
        let mut table = self.table();
        let before = table.len();
        table.retain(|_, lock| Arc::strong_count(lock) > 1);
        before - table.len()
    }

    /// Number of tracked rooms.
    pub fn len(&self) -> usize {
        self.table().len()
    }

    /// Whether no room is tracked.
    pub fn is_empty(&self) -> bool {
        self.table().is_empty()
    }
}

fn random_room_number() -> u32 {
    rand::thread_rng().gen_range(ROOM_ID_RANGE)
}

/// Applies room transitions against a [`RoomStore`].
///
/// Cheap to clone; clones share the store and the lock table.
#[derive(Clone)]
pub struct RoomEngine {
    store: Arc<dyn RoomStore>,
    locks: Arc<RoomLocks>,
    rules: GameRules,
    ttl: Duration,
    id_source: IdSource,
    listener: Option<Arc<dyn CommitListener>>,
}

impl std::fmt::Debug for RoomEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RoomEngine")
            .field("rules", &self.rules)
            .field("ttl", &self.ttl)
            .field("locked_rooms", &self.locks.len())
            .field("has_listener", &self.listener.is_some())
            .finish_non_exhaustive()
    }
}

impl RoomEngine {
    /// Creates an engine over `store`, creating rooms with `rules` that
    /// live for `ttl`.
    #[instrument(skip(store))]
    pub fn new(store: Arc<dyn RoomStore>, rules: GameRules, ttl: Duration) -> Self {
        info!("Creating room engine");
        Self {
            store,
            locks: Arc::new(RoomLocks::new()),
            rules,
            ttl,
            id_source: Arc::new(random_room_number),
            listener: None,
        }
    }

    /// Engine with default rules and the default 24 hour room lifetime.
    pub fn with_defaults(store: Arc<dyn RoomStore>) -> Self {
        Self::new(store, GameRules::default(), DEFAULT_ROOM_TTL)
    }

    /// Replaces the generator of candidate room numbers.
    pub fn with_id_source(mut self, source: impl Fn() -> u32 + Send + Sync + 'static) -> Self {
        self.id_source = Arc::new(source);
        self
    }

    /// Registers the listener told about every commit and closure.
    pub fn with_listener(mut self, listener: Arc<dyn CommitListener>) -> Self {
        self.listener = Some(listener);
        self
    }

    /// Rules for newly created rooms.
    pub fn rules(&self) -> GameRules {
        self.rules
    }

    /// Lifetime of a room.
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Creates a room under a fresh id.
    ///
    /// Candidates are drawn until one is free, checking and writing under
    /// the candidate's lock. The write itself only lands if the id is still
    /// free, so a room made meanwhile by another process is never replaced.
    ///
    /// # Errors
    ///
    /// [`EngineError::IdSpaceExhausted`] after [`MAX_ID_ATTEMPTS`] taken
    /// candidates, or [`EngineError::Store`].
    #[instrument(skip(self))]
    pub async fn create_room(&self) -> Result<RoomState, EngineError> {
        for attempt in 1..=MAX_ID_ATTEMPTS {
            let number = (self.id_source)();
            let Some(room_id) = RoomId::from_number(number) else {
                warn!(number, "Id source produced an out-of-range number");
                continue;
            };
            let _guard = self.locks.acquire(&room_id).await;
            if self.store.exists(&room_id).await? {
                debug!(%room_id, attempt, "Room id taken, drawing again");
                continue;
            }
            let state = RoomState::create(room_id, self.rules, Utc::now());
            if !self.store.insert(&state, self.ttl).await? {
                debug!(room_id = %state.room_id(), attempt, "Room id claimed elsewhere, drawing again");
                continue;
            }
            info!(room_id = %state.room_id(), attempt, "Room created");
            return Ok(state);
        }
        warn!(attempts = MAX_ID_ATTEMPTS, "Could not find a free room id");
        Err(EngineError::IdSpaceExhausted(MAX_ID_ATTEMPTS))
    }

    /// Loads a room.
    ///
    /// # Errors
    ///
    /// [`EngineError::RoomNotFound`] or [`EngineError::Store`].
    #[instrument(skip(self, room_id), fields(room_id = %room_id))]
    pub async fn fetch_room(&self, room_id: &RoomId) -> Result<RoomState, EngineError> {
        self.store
            .get(room_id)
            .await?
            .ok_or_else(|| EngineError::RoomNotFound(room_id.clone()))
    }

    /// Summarises every live room, newest first.
    ///
    /// # Errors
    ///
    /// [`EngineError::Store`].
    #[instrument(skip(self))]
    pub async fn list_rooms(&self) -> Result<LobbySummary, EngineError> {
        let mut rooms: Vec<(DateTime<Utc>, RoomSummary)> = self
            .store
            .list_all()
            .await?
            .iter()
            .map(|state| (*state.created_at(), state.summary()))
            .collect();
        rooms.sort_by(|a, b| b.0.cmp(&a.0));
        let rooms: Vec<RoomSummary> = rooms.into_iter().map(|(_, summary)| summary).collect();
        let total_players: usize = rooms.iter().map(|room| room.player_count).sum();

        let pruned = self.locks.prune();
        debug!(rooms = rooms.len(), pruned, "Listed rooms");
        Ok(LobbySummary {
            total_rooms: rooms.len(),
            total_players,
            rooms,
        })
    }

    /// Seats a participant, in `requested` if that slot is free.
    #[instrument(skip(self, room_id), fields(room_id = %room_id))]
    pub async fn join_room(
        &self,
        room_id: &RoomId,
        participant: Participant,
        requested: Option<Slot>,
    ) -> Result<Committed, EngineError> {
        self.mutate(room_id, move |state| state.join(&participant, requested))
            .await
    }

    /// Frees a participant's seat.
    #[instrument(skip(self, room_id), fields(room_id = %room_id))]
    pub async fn leave_room(
        &self,
        room_id: &RoomId,
        connection: &ConnectionId,
    ) -> Result<Committed, EngineError> {
        self.mutate(room_id, |state| state.leave(connection)).await
    }

    /// Places a number for the connection's slot.
    #[instrument(skip(self, room_id), fields(room_id = %room_id))]
    pub async fn place_number(
        &self,
        room_id: &RoomId,
        connection: &ConnectionId,
        row: usize,
        col: usize,
        value: u8,
    ) -> Result<Committed, EngineError> {
        self.mutate(room_id, |state| state.place_number(connection, row, col, value))
            .await
    }

    /// Circles an area for the connection's slot.
    #[instrument(skip(self, room_id), fields(room_id = %room_id))]
    pub async fn circle_area(
        &self,
        room_id: &RoomId,
        connection: &ConnectionId,
        rect: Rect,
    ) -> Result<Committed, EngineError> {
        self.mutate(room_id, |state| state.circle_area(connection, rect))
            .await
    }

    /// Ends the connection's turn without scoring.
    #[instrument(skip(self, room_id), fields(room_id = %room_id))]
    pub async fn skip_turn(
        &self,
        room_id: &RoomId,
        connection: &ConnectionId,
    ) -> Result<Committed, EngineError> {
        self.mutate(room_id, |state| state.skip_turn(connection)).await
    }

    /// Starts a fresh game in the room, keeping its players.
    #[instrument(skip(self, room_id), fields(room_id = %room_id))]
    pub async fn reset_room(&self, room_id: &RoomId) -> Result<Committed, EngineError> {
        self.mutate(room_id, |state| Ok(state.reset())).await
    }

    /// Deletes a room.
    ///
    /// # Errors
    ///
    /// [`EngineError::RoomNotFound`] if no live room had the id.
    #[instrument(skip(self, room_id), fields(room_id = %room_id))]
    pub async fn delete_room(&self, room_id: &RoomId) -> Result<(), EngineError> {
        let removed = {
            let _guard = self.locks.acquire(room_id).await;
            let removed = self.store.delete(room_id).await?;
            if removed {
                self.notify_closed(room_id);
            }
            removed
        };
        self.locks.release_if_idle(room_id);
        if !removed {
            return Err(EngineError::RoomNotFound(room_id.clone()));
        }
        info!("Room deleted");
        Ok(())
    }

    /// Tells the listener a room is closed if it no longer exists, whether
    /// deleted elsewhere or expired. Returns whether it was gone.
    ///
    /// # Errors
    ///
    /// [`EngineError::Store`].
    #[instrument(skip(self, room_id), fields(room_id = %room_id))]
    pub async fn close_if_gone(&self, room_id: &RoomId) -> Result<bool, EngineError> {
        let gone = {
            let _guard = self.locks.acquire(room_id).await;
            let gone = !self.store.exists(room_id).await?;
            if gone {
                self.notify_closed(room_id);
            }
            gone
        };
        self.locks.release_if_idle(room_id);
        if gone {
            info!("Room gone, closed");
        }
        Ok(gone)
    }

    /// Drops lock entries of rooms nobody is acting on.
    pub fn prune_locks(&self) -> usize {
        self.locks.prune()
    }

    fn notify_closed(&self, room_id: &RoomId) {
        if let Some(listener) = &self.listener {
            listener.closed(room_id);
        }
    }

    async fn mutate<F>(&self, room_id: &RoomId, apply: F) -> Result<Committed, EngineError>
    where
        F: Fn(&mut RoomState) -> Result<Transition, ActionError> + Send + Sync,
    {
        let _guard = self.locks.acquire(room_id).await;
        for attempt in 1..=MAX_WRITE_ATTEMPTS {
            let mut state = self
                .store
                .get(room_id)
                .await?
                .ok_or_else(|| EngineError::RoomNotFound(room_id.clone()))?;
            let expected = *state.revision();
            let transition = apply(&mut state).inspect_err(|e| {
                debug!(error = %e, kind = %e.kind(), "Transition refused");
            })?;
            state.advance_revision();
            if !self.store.replace(&state, expected, self.ttl).await? {
                warn!(attempt, expected, "Room changed underneath, reapplying");
                continue;
            }
            debug!(
                events = transition.events.len(),
                revision = *state.revision(),
                "Transition committed"
            );
            let committed = Committed {
                state,
                events: transition.events,
            };
            if let Some(listener) = &self.listener {
                listener.committed(room_id, &committed);
            }
            return Ok(committed);
        }
        warn!(attempts = MAX_WRITE_ATTEMPTS, "Gave up on a contended room");
        Err(EngineError::Contended(MAX_WRITE_ATTEMPTS))
    }
}
