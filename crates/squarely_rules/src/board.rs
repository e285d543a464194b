//! The number grid shared by all players in a room.

use crate::slot::Slot;
use derive_more::Display;
use serde::{Deserialize, Serialize};
use tracing::instrument;

/// Default board side length.
pub const DEFAULT_GRID_SIZE: usize = 8;

/// Smallest value a player may place.
pub const MIN_VALUE: u8 = 1;

/// Largest value a player may place.
pub const MAX_VALUE: u8 = 9;

/// A placed number and the slot that placed it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Cell {
    /// The number, 1-9.
    pub value: u8,
    /// The slot that owns this cell.
    #[serde(rename = "player")]
    pub owner: Slot,
}

/// Errors raised when writing to the board.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum BoardError {
    /// Coordinates fall outside the grid.
    #[display("cell ({}, {}) is outside the {}x{} board", row, col, size, size)]
    OutOfBounds {
        /// Requested row.
        row: usize,
        /// Requested column.
        col: usize,
        /// Board side length.
        size: usize,
    },

    /// The cell already holds a number.
    #[display("cell ({}, {}) is already occupied", row, col)]
    CellOccupied {
        /// Requested row.
        row: usize,
        /// Requested column.
        col: usize,
    },

    /// The value is not between 1 and 9.
    #[display("value {} is not between 1 and 9", _0)]
    ValueOutOfRange(u8),
}

impl std::error::Error for BoardError {}

/// Square grid of optional cells.
///
/// Cells are write-once: `place` never overwrites, and nothing clears a
/// cell short of building a new board.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Board {
    grid: Vec<Vec<Option<Cell>>>,
}

impl Board {
    /// Creates an empty `size`x`size` board.
    #[instrument]
    pub fn new(size: usize) -> Self {
        Self {
            grid: vec![vec![None; size]; size],
        }
    }

    /// Side length of the board.
    pub fn size(&self) -> usize {
        self.grid.len()
    }

    /// Whether `(row, col)` lies on the board.
    pub fn contains(&self, row: usize, col: usize) -> bool {
        row < self.size() && col < self.size()
    }

    /// Returns the cell at `(row, col)`, or `None` when empty or off the board.
    pub fn get(&self, row: usize, col: usize) -> Option<Cell> {
        self.grid.get(row).and_then(|r| r.get(col)).copied().flatten()
    }

    /// Checks whether a placement would succeed without performing it.
    pub fn check_place(&self, row: usize, col: usize, value: u8) -> Result<(), BoardError> {
        if !self.contains(row, col) {
            return Err(BoardError::OutOfBounds {
                row,
                col,
                size: self.size(),
            });
        }
        if !(MIN_VALUE..=MAX_VALUE).contains(&value) {
            return Err(BoardError::ValueOutOfRange(value));
        }
        if self.get(row, col).is_some() {
            return Err(BoardError::CellOccupied { row, col });
        }
        Ok(())
    }

    /// Writes `value` owned by `owner` into an empty cell.
    ///
    /// # Errors
    ///
    /// Returns [`BoardError`] if the cell is off the board, occupied, or the
    /// value is outside 1-9. The board is untouched on error.
    #[instrument(skip(self), fields(size = self.size()))]
    pub fn place(&mut self, row: usize, col: usize, value: u8, owner: Slot) -> Result<Cell, BoardError> {
        self.check_place(row, col, value)?;
        let cell = Cell { value, owner };
        self.grid[row][col] = Some(cell);
        Ok(cell)
    }

    /// Rows of the grid, top to bottom.
    pub fn rows(&self) -> &[Vec<Option<Cell>>] {
        &self.grid
    }

    /// Number of occupied cells.
    pub fn occupied_count(&self) -> usize {
        self.grid.iter().flatten().filter(|c| c.is_some()).count()
    }
}

impl Default for Board {
    fn default() -> Self {
        Self::new(DEFAULT_GRID_SIZE)
    }
}
