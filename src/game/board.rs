//! Board Logic
//!
//! The 3x3 board, its symbols, and the pure win/draw evaluation.

use serde::{Serialize, Deserialize};
use thiserror::Error;

/// Number of cells on the board.
pub const BOARD_CELLS: usize = 9;

/// All winning lines: 3 rows, 3 columns, 2 diagonals.
pub const WIN_LINES: [[usize; 3]; 8] = [
    [0, 1, 2], [3, 4, 5], [6, 7, 8],
    [0, 3, 6], [1, 4, 7], [2, 5, 8],
    [0, 4, 8], [2, 4, 6],
];

// =============================================================================
// SYMBOL
// =============================================================================

/// The mark a participant plays.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Symbol {
    /// First player, always moves first.
    X,
    /// Second player.
    O,
}

impl Symbol {
    /// The other symbol.
    #[inline]
    pub fn opponent(self) -> Symbol {
        match self {
            Symbol::X => Symbol::O,
            Symbol::O => Symbol::X,
        }
    }

    /// Symbol assigned to the n-th entrant (0-based), if any.
    pub fn for_seat(seat: usize) -> Option<Symbol> {
        match seat {
            0 => Some(Symbol::X),
            1 => Some(Symbol::O),
            _ => None,
        }
    }

    /// Single-letter form used on the wire.
    pub fn as_str(self) -> &'static str {
        match self {
            Symbol::X => "X",
            Symbol::O => "O",
        }
    }
}

impl std::fmt::Display for Symbol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// WINNER
// =============================================================================

/// Result of a finished game.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Winner {
    /// X completed a line.
    X,
    /// O completed a line.
    O,
    /// Board full, no line.
    #[serde(rename = "draw")]
    Draw,
}

impl From<Symbol> for Winner {
    fn from(symbol: Symbol) -> Self {
        match symbol {
            Symbol::X => Winner::X,
            Symbol::O => Winner::O,
        }
    }
}

// =============================================================================
// POSITION
// =============================================================================

/// Position outside the board.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("position {0} is outside the board")]
pub struct InvalidPosition(pub i64);

/// A validated cell index in 0..=8.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Position(u8);

impl Position {
    /// Validate a caller-supplied index.
    pub fn new(index: i64) -> Result<Self, InvalidPosition> {
        if (0..BOARD_CELLS as i64).contains(&index) {
            Ok(Self(index as u8))
        } else {
            Err(InvalidPosition(index))
        }
    }

    /// Index into the cell array.
    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

// =============================================================================
// BOARD
// =============================================================================

/// Nine cells, row-major, each empty or holding a symbol.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct Board {
    cells: [Option<Symbol>; BOARD_CELLS],
}

impl Board {
    /// Empty board.
    pub const fn new() -> Self {
        Self { cells: [None; BOARD_CELLS] }
    }

    /// Raw cells.
    pub fn cells(&self) -> &[Option<Symbol>; BOARD_CELLS] {
        &self.cells
    }

    /// Place a symbol into an empty cell.
    ///
    /// Returns false and leaves the board untouched if the cell is taken.
    pub fn place(&mut self, pos: Position, symbol: Symbol) -> bool {
        let cell = &mut self.cells[pos.index()];
        if cell.is_some() {
            return false;
        }
        *cell = Some(symbol);
        true
    }

    /// True if no empty cell remains.
    pub fn is_full(&self) -> bool {
        self.cells.iter().all(Option::is_some)
    }

    /// Number of occupied cells.
    pub fn occupied(&self) -> usize {
        self.cells.iter().filter(|c| c.is_some()).count()
    }

    /// Evaluate this board. See [`evaluate`].
    pub fn outcome(&self) -> Option<Winner> {
        evaluate(&self.cells)
    }
}

/// Evaluate a board for a winner or draw.
///
/// Returns the symbol owning any complete line, `Draw` for a full board
/// without a line, and `None` while the game can continue.
pub fn evaluate(cells: &[Option<Symbol>; BOARD_CELLS]) -> Option<Winner> {
    for [a, b, c] in WIN_LINES {
        if let Some(symbol) = cells[a] {
            if cells[b] == Some(symbol) && cells[c] == Some(symbol) {
                return Some(symbol.into());
            }
        }
    }

    if cells.iter().all(Option::is_some) {
        return Some(Winner::Draw);
    }

    None
}

// =============================================================================
// TESTS
// =============================================================================
