//! Who sits in which slot.

use crate::error::ActionError;
use crate::slot::{MAX_PLAYERS, Slot};
use derive_getters::Getters;
use derive_more::{Display, From};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{info, instrument, warn};

/// Opaque identity of a connected participant (a socket or session id).
#[derive(
    Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Display, From, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct ConnectionId(String);

impl ConnectionId {
    /// Wraps a connection id.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for ConnectionId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

/// A participant asking for a seat.
#[derive(Debug, Clone, PartialEq, Eq, Getters)]
pub struct Participant {
    /// Connection the participant acts through.
    connection: ConnectionId,
    /// Display name; blank names fall back to "Player N".
    name: String,
}

impl Participant {
    /// Creates a participant.
    pub fn new(connection: impl Into<ConnectionId>, name: impl Into<String>) -> Self {
        Self {
            connection: connection.into(),
            name: name.into(),
        }
    }
}

/// An occupied slot.
#[derive(Debug, Clone, PartialEq, Eq, Getters, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Seat {
    /// The slot held.
    #[serde(rename = "playerIndex")]
    slot: Slot,
    /// Display name.
    name: String,
}

/// Mapping from connection to seat.
///
/// Invariants: at most one connection per slot, at most one slot per
/// connection, never more than three seats.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Roster {
    seats: BTreeMap<ConnectionId, Seat>,
}

impl Roster {
    /// Creates an empty roster.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of occupied seats.
    pub fn len(&self) -> usize {
        self.seats.len()
    }

    /// Whether nobody is seated.
    pub fn is_empty(&self) -> bool {
        self.seats.is_empty()
    }

    /// Whether all three seats are taken.
    pub fn is_full(&self) -> bool {
        self.seats.len() >= MAX_PLAYERS
    }

    /// The seat held by `connection`, if any.
    pub fn seat(&self, connection: &ConnectionId) -> Option<&Seat> {
        self.seats.get(connection)
    }

    /// The connection and seat occupying `slot`, if any.
    pub fn occupant(&self, slot: Slot) -> Option<(&ConnectionId, &Seat)> {
        self.seats.iter().find(|(_, seat)| seat.slot == slot)
    }

    /// Unoccupied slots, ascending.
    pub fn free_slots(&self) -> Vec<Slot> {
        Slot::ALL
            .into_iter()
            .filter(|slot| self.occupant(*slot).is_none())
            .collect()
    }

    /// Seats ordered by slot.
    pub fn seats_by_slot(&self) -> Vec<&Seat> {
        let mut seats: Vec<&Seat> = self.seats.values().collect();
        seats.sort_by_key(|seat| seat.slot);
        seats
    }

    /// Seats `participant`, preferring `requested` when it is free and
    /// otherwise taking the lowest free slot.
    ///
    /// # Errors
    ///
    /// - [`ActionError::AlreadyRegistered`] if the connection already holds a seat
    /// - [`ActionError::RoomFull`] if no slot is free
    #[instrument(skip(self), fields(seated = self.len()))]
    pub fn assign(
        &mut self,
        participant: &Participant,
        requested: Option<Slot>,
    ) -> Result<Seat, ActionError> {
        if let Some(seat) = self.seats.get(&participant.connection) {
            warn!(slot = %seat.slot, "Participant already seated");
            return Err(ActionError::AlreadyRegistered { slot: seat.slot });
        }

        let free = self.free_slots();
        let slot = requested
            .filter(|slot| free.contains(slot))
            .or_else(|| free.first().copied())
            .ok_or_else(|| {
                warn!("No free slot");
                ActionError::RoomFull
            })?;

        let name = match participant.name.trim() {
            "" => format!("Player {}", slot.index() + 1),
            name => name.to_string(),
        };
        let seat = Seat { slot, name };
        self.seats.insert(participant.connection.clone(), seat.clone());
        info!(%slot, name = %seat.name, "Participant seated");
        Ok(seat)
    }

    /// Frees the seat held by `connection`.
    ///
    /// # Errors
    ///
    /// Returns [`ActionError::NotRegistered`] if the connection holds no seat.
    #[instrument(skip(self))]
    pub fn release(&mut self, connection: &ConnectionId) -> Result<Seat, ActionError> {
        let seat = self
            .seats
            .remove(connection)
            .ok_or(ActionError::NotRegistered)?;
        info!(slot = %seat.slot, "Seat released");
        Ok(seat)
    }
}
