//! Reasons a player action is refused.

use crate::area::Rejection;
use crate::board::BoardError;
use crate::slot::Slot;
use derive_more::{Display, From};

/// Broad family an [`ActionError`] belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display, strum::AsRefStr)]
#[strum(serialize_all = "snake_case")]
pub enum ErrorKind {
    /// Seating problems: room full, unknown participant, duplicate join.
    Structural,
    /// Acting out of turn or out of phase.
    TurnOrdering,
    /// A circled area that cannot score. The player may retry or skip.
    Geometry,
}

/// Why a placement was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, From)]
pub enum MoveFault {
    /// The board refused the write.
    #[display("{}", _0)]
    #[from]
    Board(BoardError),

    /// The acting slot already placed a number this turn.
    #[display("a number was already placed this turn")]
    AlreadyPlaced,
}

/// A refused action. The room state is left unchanged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, From)]
pub enum ActionError {
    /// All three seats are taken.
    #[display("Room is full (3/3 players)")]
    RoomFull,

    /// The participant already holds a seat.
    #[display("Already registered as player {}", slot)]
    AlreadyRegistered {
        /// The seat the participant holds.
        slot: Slot,
    },

    /// The participant holds no seat in this room.
    #[display("Player not registered")]
    NotRegistered,

    /// Another slot is due to act.
    #[display("Not your turn (waiting for player {})", expected)]
    NotYourTurn {
        /// Slot whose turn it is.
        expected: Slot,
        /// Slot that tried to act.
        actual: Slot,
    },

    /// Circling or skipping before placing a number.
    #[display("Must place a number first")]
    MustPlaceFirst,

    /// Every slot has used all of its turns.
    #[display("Game is already over")]
    GameAlreadyOver,

    /// The placement itself is not allowed.
    #[display("Invalid move: {}", _0)]
    #[from]
    InvalidMove(MoveFault),

    /// The circled area does not score.
    #[display("{}", _0)]
    #[from]
    Geometry(Rejection),
}

impl ActionError {
    /// Classifies the error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            ActionError::RoomFull
            | ActionError::AlreadyRegistered { .. }
            | ActionError::NotRegistered => ErrorKind::Structural,
            ActionError::NotYourTurn { .. }
            | ActionError::MustPlaceFirst
            | ActionError::GameAlreadyOver
            | ActionError::InvalidMove(_) => ErrorKind::TurnOrdering,
            ActionError::Geometry(_) => ErrorKind::Geometry,
        }
    }
}

impl std::error::Error for MoveFault {}

impl std::error::Error for ActionError {}

impl From<BoardError> for ActionError {
    fn from(err: BoardError) -> Self {
        ActionError::InvalidMove(MoveFault::Board(err))
    }
}
