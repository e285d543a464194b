//! Square selection scoring.
//!
//! A player who has placed a number may circle a square region of the
//! board. The region scores when its cell values add up to a perfect
//! square; the points go to whichever slots own the most cells inside it.

use crate::board::Board;
use crate::slot::{MAX_PLAYERS, Slot};
use derive_more::Display;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

/// Inclusive rectangle of board coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Rect {
    /// Top row.
    pub min_row: usize,
    /// Bottom row.
    pub max_row: usize,
    /// Leftmost column.
    pub min_col: usize,
    /// Rightmost column.
    pub max_col: usize,
}

impl Rect {
    /// Creates a rectangle from its inclusive bounds.
    pub fn new(min_row: usize, max_row: usize, min_col: usize, max_col: usize) -> Self {
        Self {
            min_row,
            max_row,
            min_col,
            max_col,
        }
    }

    /// Square with top-left corner `(row, col)` and the given side.
    pub fn square(row: usize, col: usize, side: usize) -> Self {
        let extent = side.saturating_sub(1);
        Self::new(row, row.saturating_add(extent), col, col.saturating_add(extent))
    }

    /// Column span; zero or negative when the bounds are inverted.
    ///
    /// Saturates at the `i64` limits for coordinates far past any board.
    pub fn width(&self) -> i64 {
        span(self.min_col, self.max_col)
    }

    /// Row span; zero or negative when the bounds are inverted.
    ///
    /// Saturates at the `i64` limits for coordinates far past any board.
    pub fn height(&self) -> i64 {
        span(self.min_row, self.max_row)
    }

    /// Iterates the coordinates inside the rectangle in row-major order.
    pub fn cells(&self) -> impl Iterator<Item = (usize, usize)> + '_ {
        (self.min_row..=self.max_row)
            .flat_map(move |row| (self.min_col..=self.max_col).map(move |col| (row, col)))
    }
}

/// Inclusive length of `min..=max`, computed wide enough for any `usize`.
fn span(min: usize, max: usize) -> i64 {
    let wide = max as i128 - min as i128 + 1;
    i64::try_from(wide).unwrap_or(if wide < 0 { i64::MIN } else { i64::MAX })
}

impl std::fmt::Display for Rect {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "({}, {})-({}, {})",
            self.min_row, self.min_col, self.max_row, self.max_col
        )
    }
}

/// Why a circled rectangle cannot be scored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, Serialize, Deserialize)]
#[serde(tag = "rejection", rename_all = "camelCase")]
pub enum Rejection {
    /// Width and height differ.
    #[display("Selection is {}x{}, not a square", width, height)]
    NotSquare {
        /// Column span.
        width: i64,
        /// Row span.
        height: i64,
    },

    /// Side shorter than two cells.
    #[display("Square must be at least 2x2")]
    TooSmall {
        /// Side length of the selection.
        side: i64,
    },

    /// The rectangle reaches past the board edge.
    #[display("Selection {} extends past the board edge", _0)]
    OutOfBounds(Rect),

    /// No cell inside the rectangle holds a number.
    #[display("No numbers in selected area")]
    EmptyArea,

    /// The cell values do not add up to a perfect square.
    #[display("Sum {} is not a perfect square", sum)]
    SumNotPerfectSquare {
        /// Sum of the cell values.
        sum: u32,
    },
}

impl std::error::Error for Rejection {}

/// A validated square selection with its computed winners.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScoredArea {
    /// Bounds of the square.
    #[serde(flatten)]
    pub rect: Rect,
    /// Sum of the cell values when the area was scored.
    pub sum: u32,
    /// Cells owned by each slot inside the square.
    #[serde(rename = "playerCounts")]
    pub counts: [u32; MAX_PLAYERS],
    /// Slots tied for the most cells, ascending.
    pub winners: Vec<Slot>,
    /// Points credited to each winner.
    pub points_each: f64,
}

/// Integer square root, rounded down.
pub fn isqrt(n: u32) -> u32 {
    if n < 2 {
        return n;
    }
    // Newton iteration from ceil(n / 2) decreases monotonically to the root.
    let mut x = n;
    let mut y = (n >> 1) + (n & 1);
    while y < x {
        x = y;
        y = (x + n / x) / 2;
    }
    x
}

/// Whether `n` is the square of an integer.
pub fn is_perfect_square(n: u32) -> bool {
    let root = isqrt(n);
    root * root == n
}

/// Slots whose cell count equals the highest non-zero count.
pub fn majority_slots(counts: &[u32; MAX_PLAYERS]) -> Vec<Slot> {
    let max = counts.iter().copied().max().unwrap_or(0);
    if max == 0 {
        return Vec::new();
    }
    Slot::ALL
        .into_iter()
        .filter(|slot| counts[slot.index()] == max)
        .collect()
}

/// Decides whether `rect` can be scored on `board` and computes the result.
///
/// Checks run in order: shape, bounds, emptiness, perfect square. Ties
/// for the most cells are not broken; every tied slot wins an equal share.
///
/// # Errors
///
/// Returns the first [`Rejection`] that applies.
#[instrument(skip(board, rect), fields(rect = %rect))]
pub fn evaluate(board: &Board, rect: Rect) -> Result<ScoredArea, Rejection> {
    let (width, height) = (rect.width(), rect.height());
    if width != height {
        return Err(Rejection::NotSquare { width, height });
    }
    if width < 2 {
        return Err(Rejection::TooSmall { side: width });
    }
    if !board.contains(rect.max_row, rect.max_col) {
        return Err(Rejection::OutOfBounds(rect));
    }

    let mut sum = 0u32;
    let mut counts = [0u32; MAX_PLAYERS];
    for cell in rect.cells().filter_map(|(row, col)| board.get(row, col)) {
        sum += u32::from(cell.value);
        counts[cell.owner.index()] += 1;
    }

    if counts.iter().all(|&c| c == 0) {
        return Err(Rejection::EmptyArea);
    }
    if !is_perfect_square(sum) {
        return Err(Rejection::SumNotPerfectSquare { sum });
    }

    let winners = majority_slots(&counts);
    let points_each = f64::from(sum) / winners.len() as f64;
    debug!(sum, ?counts, ?winners, points_each, "Area scored");

    Ok(ScoredArea {
        rect,
        sum,
        counts,
        winners,
        points_each,
    })
}
