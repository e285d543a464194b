//! Squarely rules - pure game logic for the three-player number grid.
//!
//! # Architecture
//!
//! - **Board**: write-once 8x8 grid of numbers owned by slots
//! - **Area**: square selection scoring (perfect-square sums, tied winners)
//! - **Game**: turn cycle of place, then circle or skip
//! - **Room**: aggregate of game, roster and identity; the unit of persistence
//!
//! Nothing here performs I/O. Transitions on [`RoomState`] either fail
//! without side effects or mutate the state and return the [`RoomEvent`]s
//! to announce.

#![warn(missing_docs)]
#![forbid(unsafe_code)]

mod area;
mod board;
mod error;
mod event;
mod game;
mod room;
mod room_id;
mod roster;
mod slot;

pub use area::{Rect, Rejection, ScoredArea, evaluate, is_perfect_square, isqrt, majority_slots};
pub use board::{Board, BoardError, Cell, DEFAULT_GRID_SIZE, MAX_VALUE, MIN_VALUE};
pub use error::{ActionError, ErrorKind, MoveFault};
pub use event::RoomEvent;
pub use game::{DEFAULT_TURN_LIMIT, GameRules, GameState, TurnPhase, TurnResolution};
pub use room::{PlayerSummary, RoomState, RoomSummary, Transition};
pub use room_id::{ROOM_ID_LEN, ROOM_ID_RANGE, RoomId, RoomIdError};
pub use roster::{ConnectionId, Participant, Roster, Seat};
pub use slot::{MAX_PLAYERS, Slot, SlotError};
