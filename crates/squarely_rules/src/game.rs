//! Turn controller.
//!
//! A turn is: place one number, then either circle an area to score or
//! skip. Resolving the turn hands play to the next slot. The game ends
//! once every slot has taken `turn_limit` turns.
//!
//! Every operation validates before it mutates, so a refused action
//! leaves the state exactly as it was.

use crate::area::{self, Rect, ScoredArea};
use crate::board::{Board, Cell, DEFAULT_GRID_SIZE};
use crate::error::{ActionError, MoveFault};
use crate::slot::{MAX_PLAYERS, Slot};
use derive_getters::Getters;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

/// Default number of turns each slot takes.
pub const DEFAULT_TURN_LIMIT: u32 = 8;

/// Board size and game length.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Getters, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GameRules {
    /// Side length of the board.
    grid_size: usize,
    /// Turns per slot before the game ends.
    turn_limit: u32,
}

impl GameRules {
    /// Creates rules with the given board size and turn limit.
    pub fn new(grid_size: usize, turn_limit: u32) -> Self {
        Self {
            grid_size,
            turn_limit,
        }
    }
}

impl Default for GameRules {
    fn default() -> Self {
        Self::new(DEFAULT_GRID_SIZE, DEFAULT_TURN_LIMIT)
    }
}

/// Where the game is in the turn cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, strum::Display)]
pub enum TurnPhase {
    /// The current slot must place a number.
    AwaitingPlacement,
    /// The current slot placed a number and must circle or skip.
    AwaitingResolution,
    /// Every slot reached the turn limit.
    GameOver,
}

/// Result of a turn-ending action.
#[derive(Debug, Clone, PartialEq)]
pub struct TurnResolution {
    /// Slot whose turn ended.
    pub slot: Slot,
    /// Area scored by the turn, if it was a circle.
    pub area: Option<ScoredArea>,
    /// Final winners, present when this turn ended the game.
    pub game_winners: Option<Vec<Slot>>,
}

/// Board, turn order and scores for one game.
#[derive(Debug, Clone, PartialEq, Getters, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GameState {
    /// The shared grid.
    #[serde(rename = "grid")]
    board: Board,
    /// Slot due to act.
    #[serde(rename = "currentPlayer")]
    current_slot: Slot,
    /// Turns completed per slot.
    turns: [u32; MAX_PLAYERS],
    /// Cumulative points per slot; ties split points, so these are fractional.
    scores: [f64; MAX_PLAYERS],
    /// Scored areas in the order they were circled.
    #[serde(rename = "circledAreas")]
    areas: Vec<ScoredArea>,
    /// True between placing a number and resolving the turn.
    has_placed: bool,
    /// True once every slot has used all of its turns.
    game_over: bool,
    /// Turns per slot.
    turn_limit: u32,
}

impl GameState {
    /// Starts a fresh game: empty board, slot 0 to place.
    #[instrument]
    pub fn new(rules: GameRules) -> Self {
        Self {
            board: Board::new(rules.grid_size),
            current_slot: Slot::FIRST,
            turns: [0; MAX_PLAYERS],
            scores: [0.0; MAX_PLAYERS],
            areas: Vec::new(),
            has_placed: false,
            game_over: rules.turn_limit == 0,
            turn_limit: rules.turn_limit,
        }
    }

    /// Rules this game was started with.
    pub fn rules(&self) -> GameRules {
        GameRules::new(self.board.size(), self.turn_limit)
    }

    /// Current phase of the turn cycle.
    pub fn phase(&self) -> TurnPhase {
        if self.game_over {
            TurnPhase::GameOver
        } else if self.has_placed {
            TurnPhase::AwaitingResolution
        } else {
            TurnPhase::AwaitingPlacement
        }
    }

    /// Whether any slot has finished a turn.
    pub fn started(&self) -> bool {
        self.turns.iter().any(|&t| t > 0)
    }

    /// Places `value` at `(row, col)` for the acting slot.
    ///
    /// Does not advance the turn.
    ///
    /// # Errors
    ///
    /// - [`ActionError::NotYourTurn`] when `slot` is not the current slot
    /// - [`ActionError::GameAlreadyOver`] after the last turn
    /// - [`ActionError::InvalidMove`] when a number was already placed this
    ///   turn or the board refuses the write
    #[instrument(skip(self), fields(current = %self.current_slot))]
    pub fn place_number(
        &mut self,
        slot: Slot,
        row: usize,
        col: usize,
        value: u8,
    ) -> Result<Cell, ActionError> {
        self.ensure_turn(slot)?;
        if self.game_over {
            warn!("Placement after game over");
            return Err(ActionError::GameAlreadyOver);
        }
        if self.has_placed {
            warn!("Second placement in one turn");
            return Err(MoveFault::AlreadyPlaced.into());
        }

        let cell = self.board.place(row, col, value, slot)?;
        self.has_placed = true;
        debug!(row, col, value, "Number placed");
        Ok(cell)
    }

    /// Circles `rect` and, if it scores, ends the acting slot's turn.
    ///
    /// A rejected area leaves the turn open: the slot may circle again or skip.
    ///
    /// # Errors
    ///
    /// - [`ActionError::NotYourTurn`], [`ActionError::GameAlreadyOver`]
    /// - [`ActionError::MustPlaceFirst`] when no number was placed this turn
    /// - [`ActionError::Geometry`] when the area does not score
    #[instrument(skip(self, rect), fields(current = %self.current_slot, rect = %rect))]
    pub fn circle_area(&mut self, slot: Slot, rect: Rect) -> Result<TurnResolution, ActionError> {
        self.ensure_resolvable(slot)?;

        let scored = area::evaluate(&self.board, rect).inspect_err(|rejection| {
            debug!(%rejection, "Area rejected");
        })?;

        for winner in &scored.winners {
            self.scores[winner.index()] += scored.points_each;
        }
        self.areas.push(scored.clone());

        let game_winners = self.finish_turn(slot);
        Ok(TurnResolution {
            slot,
            area: Some(scored),
            game_winners,
        })
    }

    /// Ends the acting slot's turn without scoring.
    ///
    /// # Errors
    ///
    /// - [`ActionError::NotYourTurn`], [`ActionError::GameAlreadyOver`]
    /// - [`ActionError::MustPlaceFirst`] when no number was placed this turn
    #[instrument(skip(self), fields(current = %self.current_slot))]
    pub fn skip_turn(&mut self, slot: Slot) -> Result<TurnResolution, ActionError> {
        self.ensure_resolvable(slot)?;
        let game_winners = self.finish_turn(slot);
        Ok(TurnResolution {
            slot,
            area: None,
            game_winners,
        })
    }

    /// Every slot tied at the highest cumulative score.
    pub fn final_winners(&self) -> Vec<Slot> {
        let max = self.scores.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        Slot::ALL
            .into_iter()
            .filter(|slot| self.scores[slot.index()] == max)
            .collect()
    }

    fn ensure_turn(&self, slot: Slot) -> Result<(), ActionError> {
        if slot != self.current_slot {
            warn!(%slot, expected = %self.current_slot, "Action out of turn");
            return Err(ActionError::NotYourTurn {
                expected: self.current_slot,
                actual: slot,
            });
        }
        Ok(())
    }

    fn ensure_resolvable(&self, slot: Slot) -> Result<(), ActionError> {
        self.ensure_turn(slot)?;
        if self.game_over {
            return Err(ActionError::GameAlreadyOver);
        }
        if !self.has_placed {
            return Err(ActionError::MustPlaceFirst);
        }
        Ok(())
    }

    /// Advances to the next slot. Returns the final winners if the game ended.
    fn finish_turn(&mut self, slot: Slot) -> Option<Vec<Slot>> {
        self.turns[slot.index()] += 1;
        self.current_slot = self.current_slot.next();
        self.has_placed = false;
        self.game_over = self.turns.iter().all(|&t| t >= self.turn_limit);

        if self.game_over {
            let winners = self.final_winners();
            info!(?winners, scores = ?self.scores, "Game over");
            Some(winners)
        } else {
            debug!(next = %self.current_slot, turns = ?self.turns, "Turn passed");
            None
        }
    }
}

impl Default for GameState {
    fn default() -> Self {
        Self::new(GameRules::default())
    }
}
