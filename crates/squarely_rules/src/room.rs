//! Room aggregate: game, roster and identity.
//!
//! [`RoomState`] is the unit of persistence. Its transitions are pure:
//! each one either fails without touching the state, or mutates it and
//! returns the events the room's members should hear about.

use crate::area::Rect;
use crate::error::ActionError;
use crate::event::RoomEvent;
use crate::game::{GameRules, GameState, TurnResolution};
use crate::room_id::RoomId;
use crate::roster::{ConnectionId, Participant, Roster, Seat};
use crate::slot::{MAX_PLAYERS, Slot};
use chrono::{DateTime, Utc};
use derive_getters::Getters;
use serde::{Deserialize, Serialize};
use tracing::{info, instrument};

/// Events produced by one committed transition, in emission order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Transition {
    /// The events.
    pub events: Vec<RoomEvent>,
}

impl Transition {
    fn single(event: RoomEvent) -> Self {
        Self {
            events: vec![event],
        }
    }
}

impl IntoIterator for Transition {
    type Item = RoomEvent;
    type IntoIter = std::vec::IntoIter<RoomEvent>;

    fn into_iter(self) -> Self::IntoIter {
        self.events.into_iter()
    }
}

/// Full state of one room.
#[derive(Debug, Clone, PartialEq, Getters, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomState {
    /// Six-digit room code.
    room_id: RoomId,
    /// When the room was created; fixes its expiry.
    created_at: DateTime<Utc>,
    /// Number of committed writes; bumped once per stored transition.
    #[serde(default)]
    revision: u64,
    /// Seated participants.
    #[serde(rename = "players")]
    roster: Roster,
    /// Board, turns and scores.
    game: GameState,
}

impl RoomState {
    /// Creates an empty room.
    #[instrument(skip(room_id), fields(room_id = %room_id))]
    pub fn create(room_id: RoomId, rules: GameRules, created_at: DateTime<Utc>) -> Self {
        info!(grid_size = rules.grid_size(), turn_limit = rules.turn_limit(), "Creating room");
        Self {
            room_id,
            created_at,
            revision: 0,
            roster: Roster::new(),
            game: GameState::new(rules),
        }
    }

    /// Marks the state as one write newer than the copy it was loaded from.
    pub fn advance_revision(&mut self) {
        self.revision = self.revision.saturating_add(1);
    }

    /// Seats a participant.
    ///
    /// # Errors
    ///
    /// [`ActionError::AlreadyRegistered`] or [`ActionError::RoomFull`].
    #[instrument(skip(self, participant), fields(room_id = %self.room_id, connection = %participant.connection()))]
    pub fn join(
        &mut self,
        participant: &Participant,
        requested: Option<Slot>,
    ) -> Result<Transition, ActionError> {
        let seat = self.roster.assign(participant, requested)?;
        Ok(Transition::single(RoomEvent::PlayerJoined {
            slot: *seat.slot(),
            name: seat.name().clone(),
            total_players: self.roster.len(),
        }))
    }

    /// Frees a participant's seat. Turn order is untouched, so play stalls
    /// if the freed slot is due to act until someone takes the seat.
    ///
    /// # Errors
    ///
    /// [`ActionError::NotRegistered`].
    #[instrument(skip(self), fields(room_id = %self.room_id))]
    pub fn leave(&mut self, connection: &ConnectionId) -> Result<Transition, ActionError> {
        let seat = self.roster.release(connection)?;
        Ok(Transition::single(RoomEvent::PlayerLeft {
            slot: *seat.slot(),
            name: seat.name().clone(),
            total_players: self.roster.len(),
        }))
    }

    /// Places a number for the connection's slot.
    ///
    /// # Errors
    ///
    /// [`ActionError::NotRegistered`] plus everything
    /// [`GameState::place_number`] refuses.
    #[instrument(skip(self), fields(room_id = %self.room_id))]
    pub fn place_number(
        &mut self,
        connection: &ConnectionId,
        row: usize,
        col: usize,
        value: u8,
    ) -> Result<Transition, ActionError> {
        let seat = self.seat_of(connection)?;
        self.game.place_number(*seat.slot(), row, col, value)?;
        Ok(Transition::single(RoomEvent::NumberPlaced {
            row,
            col,
            value,
            slot: *seat.slot(),
            name: seat.name().clone(),
        }))
    }

    /// Circles an area for the connection's slot.
    ///
    /// # Errors
    ///
    /// [`ActionError::NotRegistered`] plus everything
    /// [`GameState::circle_area`] refuses.
    #[instrument(skip(self), fields(room_id = %self.room_id))]
    pub fn circle_area(
        &mut self,
        connection: &ConnectionId,
        rect: Rect,
    ) -> Result<Transition, ActionError> {
        let seat = self.seat_of(connection)?;
        let resolution = self.game.circle_area(*seat.slot(), rect)?;
        Ok(self.announce(&seat, resolution))
    }

    /// Skips the rest of the connection's turn.
    ///
    /// # Errors
    ///
    /// [`ActionError::NotRegistered`] plus everything
    /// [`GameState::skip_turn`] refuses.
    #[instrument(skip(self), fields(room_id = %self.room_id))]
    pub fn skip_turn(&mut self, connection: &ConnectionId) -> Result<Transition, ActionError> {
        let seat = self.seat_of(connection)?;
        let resolution = self.game.skip_turn(*seat.slot())?;
        Ok(self.announce(&seat, resolution))
    }

    /// Starts a fresh game with the same rules. Room id, creation time and
    /// the roster are kept: seated players stay seated.
    #[instrument(skip(self), fields(room_id = %self.room_id))]
    pub fn reset(&mut self) -> Transition {
        self.game = GameState::new(self.game.rules());
        info!(seated = self.roster.len(), "Room reset");
        Transition::single(RoomEvent::RoomReset)
    }

    /// Lobby listing entry for this room.
    pub fn summary(&self) -> RoomSummary {
        let players: Vec<PlayerSummary> = self
            .roster
            .seats_by_slot()
            .into_iter()
            .map(|seat| PlayerSummary {
                name: seat.name().clone(),
                slot: *seat.slot(),
            })
            .collect();
        RoomSummary {
            room_id: self.room_id.clone(),
            player_count: players.len(),
            max_players: MAX_PLAYERS,
            players,
            game_started: self.game.started(),
            game_over: *self.game.game_over(),
            created_at: self.created_at,
        }
    }

    fn seat_of(&self, connection: &ConnectionId) -> Result<Seat, ActionError> {
        self.roster
            .seat(connection)
            .cloned()
            .ok_or(ActionError::NotRegistered)
    }

    fn announce(&self, seat: &Seat, resolution: TurnResolution) -> Transition {
        let name = seat.name().clone();
        let mut events = vec![match resolution.area {
            Some(area) => RoomEvent::AreaScored {
                rect: area.rect,
                sum: area.sum,
                winners: area.winners,
                counts: area.counts,
                name,
            },
            None => RoomEvent::TurnSkipped {
                slot: resolution.slot,
                name,
            },
        }];
        if let Some(winners) = resolution.game_winners {
            events.push(RoomEvent::GameOver {
                winners,
                scores: *self.game.scores(),
            });
        }
        Transition { events }
    }
}

/// A seated player as shown in the lobby.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerSummary {
    /// Display name.
    pub name: String,
    /// Seat held.
    #[serde(rename = "playerIndex")]
    pub slot: Slot,
}

/// Lobby listing entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomSummary {
    /// Room code.
    pub room_id: RoomId,
    /// Seated players.
    pub player_count: usize,
    /// Always three.
    pub max_players: usize,
    /// Seated players in slot order.
    pub players: Vec<PlayerSummary>,
    /// Whether any turn has been completed.
    pub game_started: bool,
    /// Whether the game has finished.
    pub game_over: bool,
    /// Creation time, used to sort newest first.
    pub created_at: DateTime<Utc>,
}
