//! Match State Machine
//!
//! One match between up to two participants, and every rule that
//! decides which commands are legal. Pure and synchronous: locking and
//! delivery belong to the network layer.
//!
//! ```text
//! WaitingForOpponent --join--> InProgress --winning/drawing move--> Finished
//!                                   ^                                  |
//!                                   +------- unanimous restart --------+
//! ```

use std::collections::BTreeSet;
use serde::{Serialize, Deserialize};
use thiserror::Error;

use crate::game::board::{Board, InvalidPosition, Position, Symbol, Winner};
use crate::game::match_id::MatchId;

/// Maximum participants per match.
pub const MAX_PLAYERS: usize = 2;

/// Display names are trimmed and cut to this many characters.
pub const MAX_NAME_CHARS: usize = 32;

// =============================================================================
// CONNECTION ID
// =============================================================================

/// Identity of one live client connection (v4 UUID).
///
/// Public: sent to the client as `player_id` and shown in every snapshot.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConnectionId(pub uuid::Uuid);

impl ConnectionId {
    /// Mint a fresh id.
    pub fn new_v4() -> Self {
        Self(uuid::Uuid::new_v4())
    }

    /// Create from raw bytes.
    pub const fn from_bytes(bytes: [u8; 16]) -> Self {
        Self(uuid::Uuid::from_bytes(bytes))
    }

    /// First four bytes as hex, for log lines.
    pub fn short(&self) -> String {
        hex::encode(&self.0.as_bytes()[..4])
    }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// Secret that lets a dropped player reclaim their seat.
///
/// Handed only to the seat holder in `match_joined`; snapshots never carry it.
/// A fresh token is issued on every rejoin.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RejoinToken(pub uuid::Uuid);

impl RejoinToken {
    /// Mint a fresh token.
    pub fn new_v4() -> Self {
        Self(uuid::Uuid::new_v4())
    }
}

// =============================================================================
// ERRORS
// =============================================================================

/// Reasons a command against a match is rejected.
///
/// None of these mutate state.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MatchError {
    /// No live match with that id.
    #[error("Game not found")]
    NotFound,
    /// Both seats are taken.
    #[error("Game is full")]
    Full,
    /// Caller already holds a seat in this match.
    #[error("Already in this game")]
    AlreadyInMatch,
    /// Move attempted after a win or draw.
    #[error("Game is over")]
    GameOver,
    /// Restart vote before the game finished.
    #[error("Game is not over yet")]
    GameNotOver,
    /// Caller is not a participant.
    #[error("Player not found in this game")]
    PlayerNotInMatch,
    /// Move attempted before the second player joined.
    #[error("Waiting for an opponent to join")]
    WaitingForOpponent,
    /// Caller's symbol is not the one to move.
    #[error("Not your turn")]
    NotYourTurn,
    /// Target cell already holds a symbol.
    #[error("Position already taken")]
    CellOccupied,
    /// Target index outside 0..=8.
    #[error("Position out of range")]
    InvalidPosition,
    /// Rejoin attempted on a seat whose connection is still live.
    #[error("Player is still connected")]
    AlreadyConnected,
}

impl From<InvalidPosition> for MatchError {
    fn from(_: InvalidPosition) -> Self {
        MatchError::InvalidPosition
    }
}

// =============================================================================
// PLAYERS & PHASE
// =============================================================================

/// A seat in a match.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Player {
    /// Connection holding the seat.
    pub id: ConnectionId,
    /// Assigned symbol (join order).
    pub symbol: Symbol,
    /// Display name chosen by the player.
    pub name: String,
    /// False once the connection dropped, until a rejoin.
    pub connected: bool,
    /// Seat reclaim secret, known only to the seat holder.
    pub rejoin_token: RejoinToken,
}

impl Player {
    fn seat(id: ConnectionId, symbol: Symbol, name: String) -> Self {
        Self {
            id,
            symbol,
            name: clean_name(&name),
            connected: true,
            rejoin_token: RejoinToken::new_v4(),
        }
    }
}

fn clean_name(name: &str) -> String {
    name.trim().chars().take(MAX_NAME_CHARS).collect()
}

/// Derived lifecycle phase.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchPhase {
    /// Only the creator is seated.
    WaitingForOpponent,
    /// Both seated, no result yet.
    InProgress,
    /// Won or drawn; waiting for a unanimous restart.
    Finished,
}

/// Effect of an accepted move.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MoveOutcome {
    /// Turn passed to the given symbol.
    NextTurn(Symbol),
    /// The move ended the game.
    Finished(Winner),
}

/// Effect of an accepted restart vote.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RestartOutcome {
    /// Vote recorded, quorum not reached.
    Pending {
        /// Distinct voters so far.
        votes: usize,
        /// Voters required.
        needed: usize,
    },
    /// Everyone agreed; the match was reset.
    Reset,
}

// =============================================================================
// MATCH STATE
// =============================================================================

/// Complete state of a match.
#[derive(Clone, Debug)]
pub struct MatchState {
    /// Shareable match code.
    pub id: MatchId,
    board: Board,
    current_player: Symbol,
    players: Vec<Player>,
    winner: Option<Winner>,
    restart_votes: BTreeSet<ConnectionId>,
}

impl MatchState {
    /// Create a match with its creator seated as X.
    pub fn new(id: MatchId, creator: ConnectionId, name: impl Into<String>) -> Self {
        Self {
            id,
            board: Board::new(),
            current_player: Symbol::X,
            players: vec![Player::seat(creator, Symbol::X, name.into())],
            winner: None,
            restart_votes: BTreeSet::new(),
        }
    }

    /// Board contents.
    pub fn board(&self) -> &Board {
        &self.board
    }

    /// Symbol to move.
    pub fn current_player(&self) -> Symbol {
        self.current_player
    }

    /// Seated players in join order.
    pub fn players(&self) -> &[Player] {
        &self.players
    }

    /// Result, once finished.
    pub fn winner(&self) -> Option<Winner> {
        self.winner
    }

    /// True iff a result is set.
    pub fn is_over(&self) -> bool {
        self.winner.is_some()
    }

    /// Connections that voted to restart.
    pub fn restart_votes(&self) -> &BTreeSet<ConnectionId> {
        &self.restart_votes
    }

    /// Current phase.
    pub fn phase(&self) -> MatchPhase {
        if self.is_over() {
            MatchPhase::Finished
        } else if self.players.len() < MAX_PLAYERS {
            MatchPhase::WaitingForOpponent
        } else {
            MatchPhase::InProgress
        }
    }

    /// Look up a seated player.
    pub fn player(&self, id: &ConnectionId) -> Option<&Player> {
        self.players.iter().find(|p| p.id == *id)
    }

    /// True if the connection holds a seat.
    pub fn has_player(&self, id: &ConnectionId) -> bool {
        self.player(id).is_some()
    }

    /// True if any seat still has a live connection.
    pub fn any_connected(&self) -> bool {
        self.players.iter().any(|p| p.connected)
    }

    /// Seat a second player as O.
    pub fn join(&mut self, id: ConnectionId, name: impl Into<String>) -> Result<Symbol, MatchError> {
        if self.has_player(&id) {
            return Err(MatchError::AlreadyInMatch);
        }
        let symbol = Symbol::for_seat(self.players.len()).ok_or(MatchError::Full)?;

        self.players.push(Player::seat(id, symbol, name.into()));
        Ok(symbol)
    }

    /// Play `id`'s symbol at `position`.
    ///
    /// Checks run in a fixed order so the reported reason is stable:
    /// game over, participant, opponent present, turn, bounds, occupancy.
    pub fn make_move(&mut self, id: &ConnectionId, position: i64) -> Result<MoveOutcome, MatchError> {
        if self.is_over() {
            return Err(MatchError::GameOver);
        }
        let symbol = self.player(id).ok_or(MatchError::PlayerNotInMatch)?.symbol;
        if self.players.len() < MAX_PLAYERS {
            return Err(MatchError::WaitingForOpponent);
        }
        if symbol != self.current_player {
            return Err(MatchError::NotYourTurn);
        }
        let pos = Position::new(position)?;
        if !self.board.place(pos, symbol) {
            return Err(MatchError::CellOccupied);
        }

        match self.board.outcome() {
            Some(winner) => {
                self.winner = Some(winner);
                Ok(MoveOutcome::Finished(winner))
            }
            None => {
                self.current_player = symbol.opponent();
                Ok(MoveOutcome::NextTurn(self.current_player))
            }
        }
    }

    /// Record `id`'s vote to restart a finished match.
    ///
    /// Voting twice is a no-op. Resets once every seated player voted.
    pub fn vote_restart(&mut self, id: &ConnectionId) -> Result<RestartOutcome, MatchError> {
        if !self.is_over() {
            return Err(MatchError::GameNotOver);
        }
        if !self.has_player(id) {
            return Err(MatchError::PlayerNotInMatch);
        }

        self.restart_votes.insert(*id);

        let needed = self.players.len();
        let votes = self.restart_votes.len();
        if votes == needed {
            self.reset();
            Ok(RestartOutcome::Reset)
        } else {
            Ok(RestartOutcome::Pending { votes, needed })
        }
    }

    /// Fresh board, X to move, no result, no votes. Seats are kept.
    pub fn reset(&mut self) {
        self.board = Board::new();
        self.current_player = Symbol::X;
        self.winner = None;
        self.restart_votes.clear();
    }

    /// Mark a seat as disconnected. Returns false if not seated.
    pub fn mark_disconnected(&mut self, id: &ConnectionId) -> bool {
        match self.players.iter_mut().find(|p| p.id == *id) {
            Some(player) => {
                player.connected = false;
                true
            }
            None => false,
        }
    }

    /// Move a disconnected seat over to a new connection.
    ///
    /// The seat is found by its rejoin token, which is then replaced.
    /// A pending restart vote follows the seat.
    pub fn rebind(&mut self, token: &RejoinToken, new: ConnectionId) -> Result<Symbol, MatchError> {
        if self.has_player(&new) {
            return Err(MatchError::AlreadyInMatch);
        }
        let player = self
            .players
            .iter_mut()
            .find(|p| p.rejoin_token == *token)
            .ok_or(MatchError::PlayerNotInMatch)?;
        if player.connected {
            return Err(MatchError::AlreadyConnected);
        }

        let previous = player.id;
        player.id = new;
        player.connected = true;
        player.rejoin_token = RejoinToken::new_v4();
        let symbol = player.symbol;

        if self.restart_votes.remove(&previous) {
            self.restart_votes.insert(new);
        }
        Ok(symbol)
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn alice() -> ConnectionId {
        ConnectionId::from_bytes([1; 16])
    }

    fn bob() -> ConnectionId {
        ConnectionId::from_bytes([2; 16])
    }

    fn carol() -> ConnectionId {
        ConnectionId::from_bytes([3; 16])
    }

    fn new_match() -> MatchState {
        MatchState::new(MatchId::parse("ABCDE").unwrap(), alice(), "Alice")
    }

    fn full_match() -> MatchState {
        let mut state = new_match();
        state.join(bob(), "Bob").unwrap();
        state
    }

    /// Alternate moves starting with X.
    fn play(state: &mut MatchState, moves: &[i64]) {
        for (i, &pos) in moves.iter().enumerate() {
            let mover = if i % 2 == 0 { alice() } else { bob() };
            state.make_move(&mover, pos).unwrap();
        }
    }

    fn x_wins_column(state: &mut MatchState) {
        play(state, &[0, 1, 3, 4, 6]);
    }

    #[test]
    fn test_create_seats_creator_as_x() {
        let state = new_match();
        assert_eq!(state.players().len(), 1);
        assert_eq!(state.players()[0].symbol, Symbol::X);
        assert_eq!(state.players()[0].name, "Alice");
        assert_eq!(state.current_player(), Symbol::X);
        assert_eq!(state.board().occupied(), 0);
        assert_eq!(state.winner(), None);
        assert!(state.restart_votes().is_empty());
        assert_eq!(state.phase(), MatchPhase::WaitingForOpponent);
    }

    #[test]
    fn test_join_seats_second_player_as_o() {
        let mut state = new_match();
        assert_eq!(state.join(bob(), "Bob"), Ok(Symbol::O));
        assert_eq!(state.players()[1].name, "Bob");
        assert_eq!(state.phase(), MatchPhase::InProgress);
    }

    #[test]
    fn test_join_full_match_rejected() {
        let mut state = full_match();
        assert_eq!(state.join(carol(), "Carol"), Err(MatchError::Full));
        assert_eq!(state.players().len(), 2);
    }

    #[test]
    fn test_join_twice_rejected() {
        let mut state = new_match();
        assert_eq!(state.join(alice(), "Alice again"), Err(MatchError::AlreadyInMatch));
        assert_eq!(state.players().len(), 1);
    }

    #[test]
    fn test_column_win() {
        let mut state = full_match();
        x_wins_column(&mut state);

        assert_eq!(state.winner(), Some(Winner::X));
        assert!(state.is_over());
        assert_eq!(state.phase(), MatchPhase::Finished);
        // Turn does not flip on the winning move
        assert_eq!(state.current_player(), Symbol::X);
    }

    #[test]
    fn test_draw() {
        let mut state = full_match();
        // X:0,1,5,6,8 / O:2,3,4,7
        play(&mut state, &[0, 2, 1, 3, 5, 4, 6, 7, 8]);
        assert_eq!(state.winner(), Some(Winner::Draw));
        assert!(state.board().is_full());
    }

    #[test]
    fn test_turn_alternates() {
        let mut state = full_match();
        assert_eq!(state.make_move(&alice(), 4), Ok(MoveOutcome::NextTurn(Symbol::O)));
        assert_eq!(state.current_player(), Symbol::O);
        assert_eq!(state.make_move(&bob(), 0), Ok(MoveOutcome::NextTurn(Symbol::X)));
        assert_eq!(state.current_player(), Symbol::X);
    }

    #[test]
    fn test_not_your_turn_leaves_state() {
        let mut state = full_match();
        let before = *state.board();

        assert_eq!(state.make_move(&bob(), 0), Err(MatchError::NotYourTurn));
        assert_eq!(*state.board(), before);
        assert_eq!(state.current_player(), Symbol::X);
    }

    #[test]
    fn test_occupied_cell_rejected() {
        let mut state = full_match();
        state.make_move(&alice(), 4).unwrap();
        let before = *state.board();

        assert_eq!(state.make_move(&bob(), 4), Err(MatchError::CellOccupied));
        assert_eq!(*state.board(), before);
        assert_eq!(state.current_player(), Symbol::O);
    }

    #[test]
    fn test_out_of_range_rejected() {
        let mut state = full_match();
        for pos in [-1, 9, 100, i64::MIN] {
            assert_eq!(state.make_move(&alice(), pos), Err(MatchError::InvalidPosition));
        }
        assert_eq!(state.board().occupied(), 0);
        assert_eq!(state.current_player(), Symbol::X);
    }

    #[test]
    fn test_stranger_cannot_move() {
        let mut state = full_match();
        assert_eq!(state.make_move(&carol(), 0), Err(MatchError::PlayerNotInMatch));
    }

    #[test]
    fn test_move_before_opponent_joins() {
        let mut state = new_match();
        assert_eq!(state.make_move(&alice(), 0), Err(MatchError::WaitingForOpponent));
        assert_eq!(state.board().occupied(), 0);
    }

    #[test]
    fn test_move_after_game_over() {
        let mut state = full_match();
        x_wins_column(&mut state);
        let before = *state.board();

        assert_eq!(state.make_move(&bob(), 8), Err(MatchError::GameOver));
        assert_eq!(*state.board(), before);
        assert_eq!(state.winner(), Some(Winner::X));
    }

    #[test]
    fn test_vote_before_game_over() {
        let mut state = full_match();
        assert_eq!(state.vote_restart(&alice()), Err(MatchError::GameNotOver));
        assert!(state.restart_votes().is_empty());
    }

    #[test]
    fn test_vote_from_stranger_rejected() {
        let mut state = full_match();
        x_wins_column(&mut state);
        assert_eq!(state.vote_restart(&carol()), Err(MatchError::PlayerNotInMatch));
        assert!(state.restart_votes().is_empty());
    }

    #[test]
    fn test_unanimous_vote_resets() {
        let mut state = full_match();
        x_wins_column(&mut state);

        assert_eq!(
            state.vote_restart(&alice()),
            Ok(RestartOutcome::Pending { votes: 1, needed: 2 })
        );
        assert!(state.is_over());
        assert_eq!(state.vote_restart(&bob()), Ok(RestartOutcome::Reset));

        assert_eq!(state.board().occupied(), 0);
        assert_eq!(state.current_player(), Symbol::X);
        assert_eq!(state.winner(), None);
        assert!(state.restart_votes().is_empty());
        assert_eq!(state.phase(), MatchPhase::InProgress);
        assert_eq!(state.players().len(), 2);
    }

    #[test]
    fn test_double_vote_counts_once() {
        let mut state = full_match();
        x_wins_column(&mut state);

        state.vote_restart(&alice()).unwrap();
        assert_eq!(
            state.vote_restart(&alice()),
            Ok(RestartOutcome::Pending { votes: 1, needed: 2 })
        );
        assert!(state.is_over());
        assert_eq!(state.restart_votes().len(), 1);
    }

    #[test]
    fn test_reset_after_draw_allows_new_game() {
        let mut state = full_match();
        play(&mut state, &[0, 2, 1, 3, 5, 4, 6, 7, 8]);
        state.vote_restart(&bob()).unwrap();
        state.vote_restart(&alice()).unwrap();

        assert_eq!(state.make_move(&alice(), 4), Ok(MoveOutcome::NextTurn(Symbol::O)));
    }

    fn token_of(state: &MatchState, id: &ConnectionId) -> RejoinToken {
        state.player(id).unwrap().rejoin_token
    }

    #[test]
    fn test_disconnect_and_rebind() {
        let mut state = full_match();
        x_wins_column(&mut state);
        state.vote_restart(&bob()).unwrap();
        let token = token_of(&state, &bob());

        assert!(state.mark_disconnected(&bob()));
        assert!(!state.mark_disconnected(&carol()));
        assert!(!state.player(&bob()).unwrap().connected);

        assert_eq!(state.rebind(&token, carol()), Ok(Symbol::O));
        let player = state.player(&carol()).unwrap();
        assert!(player.connected);
        assert_eq!(player.name, "Bob");
        assert_ne!(player.rejoin_token, token);
        assert!(state.restart_votes().contains(&carol()));
        assert!(!state.restart_votes().contains(&bob()));

        // Migrated vote plus Alice's reaches quorum
        assert_eq!(state.vote_restart(&alice()), Ok(RestartOutcome::Reset));
    }

    #[test]
    fn test_rebind_connected_seat_rejected() {
        let mut state = full_match();
        let token = token_of(&state, &bob());
        assert_eq!(state.rebind(&token, carol()), Err(MatchError::AlreadyConnected));
        assert_eq!(state.rebind(&RejoinToken::new_v4(), carol()), Err(MatchError::PlayerNotInMatch));
        assert_eq!(state.rebind(&token, alice()), Err(MatchError::AlreadyInMatch));
    }

    #[test]
    fn test_rebind_needs_token_not_public_id() {
        let mut state = full_match();
        state.mark_disconnected(&alice());

        // The opponent's second socket knows Alice's connection id, not her token
        let guessed = RejoinToken(alice().0);
        assert_eq!(state.rebind(&guessed, carol()), Err(MatchError::PlayerNotInMatch));
        assert!(!state.player(&alice()).unwrap().connected);
        assert!(!state.has_player(&carol()));
    }

    #[test]
    fn test_used_token_cannot_be_replayed() {
        let mut state = full_match();
        let token = token_of(&state, &alice());
        state.mark_disconnected(&alice());
        state.rebind(&token, carol()).unwrap();
        state.mark_disconnected(&carol());

        let dave = ConnectionId::from_bytes([4; 16]);
        assert_eq!(state.rebind(&token, dave), Err(MatchError::PlayerNotInMatch));
    }

    #[test]
    fn test_restart_quorum_counts_disconnected_seat() {
        let mut state = full_match();
        x_wins_column(&mut state);
        let token = token_of(&state, &bob());
        state.mark_disconnected(&bob());

        assert_eq!(
            state.vote_restart(&alice()),
            Ok(RestartOutcome::Pending { votes: 1, needed: 2 })
        );
        assert!(state.is_over());

        state.rebind(&token, carol()).unwrap();
        assert_eq!(state.vote_restart(&carol()), Ok(RestartOutcome::Reset));
        assert!(!state.is_over());
    }

    #[test]
    fn test_names_trimmed_and_capped() {
        let long = format!("  {}  ", "n".repeat(500));
        let mut state = MatchState::new(MatchId::parse("ABCDE").unwrap(), alice(), long);
        state.join(bob(), "  Bob \n").unwrap();

        assert_eq!(state.players()[0].name.chars().count(), MAX_NAME_CHARS);
        assert_eq!(state.players()[1].name, "Bob");
    }

    #[test]
    fn test_any_connected() {
        let mut state = full_match();
        state.mark_disconnected(&alice());
        assert!(state.any_connected());
        state.mark_disconnected(&bob());
        assert!(!state.any_connected());
    }
}
