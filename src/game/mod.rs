//! Game Logic Module
//!
//! Everything that decides what a legal tic-tac-toe match looks like.
//! Synchronous and free of I/O.
//!
//! ## Module Structure
//!
//! - `board`: Board, symbols, positions, win/draw evaluation
//! - `match_id`: Shareable match codes
//! - `state`: Per-match state machine and its rejection reasons

pub mod board;
pub mod match_id;
pub mod state;

// Re-export key types
pub use board::{Board, Position, Symbol, Winner, evaluate};
pub use match_id::MatchId;
pub use state::{ConnectionId, MatchError, MatchPhase, MatchState, MoveOutcome, Player, RejoinToken, RestartOutcome};
