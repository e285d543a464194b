//! Squarely - room server for a three-player perfect-square number game
//!
//! Game rules live in [`squarely_rules`]; this crate keeps rooms in a
//! store and serializes every change to a room.
//!
//! # Architecture
//!
//! - **Store**: keyed room persistence with a fixed expiry (memory or SQLite)
//! - **Engine**: per-room locked load, transition and revision-checked write-back
//! - **Hub**: broadcast of committed events to a room's subscribers, in commit order
//! - **Server**: axum routes for the lobby, player actions and event streams
//!
//! # Example
//!
//! ```no_run
//! use squarely::{MemoryRoomStore, RoomEngine};
//! use squarely_rules::Participant;
//! use std::sync::Arc;
//!
//! # async fn example() -> Result<(), squarely::EngineError> {
//! let engine = RoomEngine::with_defaults(Arc::new(MemoryRoomStore::new()));
//! let room = engine.create_room().await?;
//! engine
//!     .join_room(room.room_id(), Participant::new("conn-1", "Ada"), None)
//!     .await?;
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![forbid(unsafe_code)]

// Private module declarations
mod config;
mod engine;
mod hub;
mod server;
mod store;

// Crate-level exports - Configuration
pub use config::{ConfigError, ConfigOverrides, ServerConfig, StoreBackend};

// Crate-level exports - Engine
pub use engine::{
    CommitListener, Committed, EngineError, IdSource, LobbySummary, MAX_ID_ATTEMPTS,
    MAX_WRITE_ATTEMPTS, RoomEngine, RoomLocks,
};

// Crate-level exports - Event fan-out
pub use hub::{DEFAULT_CHANNEL_CAPACITY, RoomBroadcast, RoomHub};

// Crate-level exports - HTTP
pub use server::{
    AdminResponse, ApiError, AppState, CircleRequest, ConnectionRequest, CreateRoomResponse,
    JoinRequest, PlaceRequest, SweepReport, router, spawn_sweeper,
};

// Crate-level exports - Storage
pub use store::{
    DEFAULT_ROOM_TTL, MemoryRoomStore, RoomStore, SqliteRoomStore, StoreError, StoreFailure,
    expiry_for,
};
