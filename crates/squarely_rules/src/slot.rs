//! Player seats.

use derive_more::Display;
use serde::{Deserialize, Serialize};

/// Number of seats in every room.
pub const MAX_PLAYERS: usize = 3;

/// One of the three fixed seats in a room (0, 1 or 2).
///
/// A slot is distinct from a network connection: the roster maps
/// connections onto slots, and turn order cycles over slots.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Display, Serialize, Deserialize,
)]
#[serde(try_from = "u8", into = "u8")]
pub struct Slot(u8);

impl Slot {
    /// Every slot in turn order.
    pub const ALL: [Slot; MAX_PLAYERS] = [Slot(0), Slot(1), Slot(2)];

    /// The slot that acts first in a fresh game.
    pub const FIRST: Slot = Slot(0);

    /// Creates a slot from its index, if the index is in range.
    pub fn new(index: u8) -> Option<Self> {
        ((index as usize) < MAX_PLAYERS).then_some(Self(index))
    }

    /// Returns the slot index as a `usize`, for indexing per-slot arrays.
    pub fn index(self) -> usize {
        self.0 as usize
    }

    /// Returns the slot that acts after this one.
    pub fn next(self) -> Self {
        Self((self.0 + 1) % MAX_PLAYERS as u8)
    }
}

/// Slot index outside `0..3`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[display("slot index {} is out of range (0-2)", _0)]
pub struct SlotError(pub u8);

impl std::error::Error for SlotError {}

impl TryFrom<u8> for Slot {
    type Error = SlotError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Slot::new(value).ok_or(SlotError(value))
    }
}

impl From<Slot> for u8 {
    fn from(slot: Slot) -> Self {
        slot.0
    }
}
