//! Announcements produced by room transitions.

use crate::area::Rect;
use crate::slot::{MAX_PLAYERS, Slot};
use serde::{Deserialize, Serialize};

/// What happened in a room.
///
/// Every committed transition yields one or more events for the room's
/// members; `ActionRejected` is addressed to the originating participant only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum RoomEvent {
    /// A participant took a seat.
    PlayerJoined {
        /// Seat taken.
        slot: Slot,
        /// Display name.
        name: String,
        /// Seated players after the join.
        total_players: usize,
    },
    /// A participant gave up their seat.
    PlayerLeft {
        /// Seat freed.
        slot: Slot,
        /// Display name.
        name: String,
        /// Seated players after the leave.
        total_players: usize,
    },
    /// A number went onto the board.
    NumberPlaced {
        /// Row.
        row: usize,
        /// Column.
        col: usize,
        /// Value placed.
        value: u8,
        /// Placing slot.
        slot: Slot,
        /// Placing player's name.
        name: String,
    },
    /// A circled square scored.
    AreaScored {
        /// Bounds of the square.
        rect: Rect,
        /// Sum of the values inside.
        sum: u32,
        /// Slots sharing the points.
        winners: Vec<Slot>,
        /// Cells owned per slot inside the square.
        counts: [u32; MAX_PLAYERS],
        /// Circling player's name.
        name: String,
    },
    /// A slot ended its turn without scoring.
    TurnSkipped {
        /// Skipping slot.
        slot: Slot,
        /// Skipping player's name.
        name: String,
    },
    /// The last turn was played.
    GameOver {
        /// Every slot tied at the top score.
        winners: Vec<Slot>,
        /// Final scores per slot.
        scores: [f64; MAX_PLAYERS],
    },
    /// An action was refused.
    ActionRejected {
        /// Human-readable reason.
        reason: String,
    },
    /// The room was reset to a fresh game.
    RoomReset,
    /// The room was deleted.
    RoomClosed,
}

impl RoomEvent {
    /// Wire name of the event, matching its serialized `type` tag.
    pub fn name(&self) -> &'static str {
        match self {
            RoomEvent::PlayerJoined { .. } => "playerJoined",
            RoomEvent::PlayerLeft { .. } => "playerLeft",
            RoomEvent::NumberPlaced { .. } => "numberPlaced",
            RoomEvent::AreaScored { .. } => "areaScored",
            RoomEvent::TurnSkipped { .. } => "turnSkipped",
            RoomEvent::GameOver { .. } => "gameOver",
            RoomEvent::ActionRejected { .. } => "actionRejected",
            RoomEvent::RoomReset => "roomReset",
            RoomEvent::RoomClosed => "roomClosed",
        }
    }
}
