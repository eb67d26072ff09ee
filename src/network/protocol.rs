//! Protocol Messages
//!
//! Wire format for client-server communication over WebSocket.
//! Every message is a JSON object tagged by its `type` field.

use serde::{Serialize, Deserialize};

use crate::game::board::{Symbol, Winner, BOARD_CELLS};
use crate::game::match_id::MatchId;
use crate::game::state::{ConnectionId, MatchError, MatchPhase, MatchState, RejoinToken};

// =============================================================================
// CLIENT -> SERVER MESSAGES
// =============================================================================

/// Messages sent from client to server.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Open a new match and take the X seat.
    CreateMatch {
        /// Display name.
        player_name: String,
    },

    /// Take the O seat of an existing match.
    JoinMatch {
        /// Match code as typed by the player (case-insensitive).
        match_id: String,
        /// Display name.
        player_name: String,
    },

    /// Place the caller's symbol.
    MakeMove {
        /// Match code.
        match_id: String,
        /// Caller's id as the client knows it; must match the connection.
        #[serde(default)]
        player_id: Option<ConnectionId>,
        /// Cell index, 0..=8 row-major.
        position: i64,
    },

    /// Vote to restart a finished match.
    #[serde(alias = "restart_game")]
    VoteRestart {
        /// Match code.
        match_id: String,
        /// Caller's id as the client knows it; must match the connection.
        #[serde(default)]
        player_id: Option<ConnectionId>,
    },

    /// Reclaim a seat after a dropped connection.
    RejoinMatch {
        /// Match code.
        match_id: String,
        /// Token from the seat's last `match_joined`.
        rejoin_token: RejoinToken,
    },

    /// Ping for latency measurement.
    Ping {
        /// Client clock, echoed back.
        timestamp: u64,
    },
}

// =============================================================================
// SERVER -> CLIENT MESSAGES
// =============================================================================

/// Messages sent from server to client.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Caller now holds a seat.
    MatchJoined(JoinedInfo),

    /// Full match state after any change.
    State(MatchSnapshot),

    /// A command from this connection was rejected.
    Error(ServerError),

    /// Another participant's connection dropped.
    OpponentDisconnected {
        /// Affected match.
        match_id: MatchId,
        /// Human-readable notice.
        message: String,
    },

    /// Pong response.
    Pong {
        /// Timestamp from the ping.
        timestamp: u64,
        /// Server clock, Unix milliseconds.
        server_time: u64,
    },

    /// Server is shutting down.
    Shutdown {
        /// Human-readable reason.
        reason: String,
    },
}

/// Seat assignment sent to the caller of create/join/rejoin.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JoinedInfo {
    /// Match code to share.
    pub match_id: MatchId,
    /// Caller's public player id; may be echoed in later commands.
    pub player_id: ConnectionId,
    /// Symbol the caller plays.
    pub symbol: Symbol,
    /// Secret for `rejoin_match`; keep it private.
    pub rejoin_token: RejoinToken,
}

/// Observable state of a match.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchSnapshot {
    /// Match code.
    pub id: MatchId,
    /// Row-major cells: `""`, `"X"` or `"O"`.
    #[serde(with = "cells")]
    pub board: [Option<Symbol>; BOARD_CELLS],
    /// Symbol to move.
    pub current_player: Symbol,
    /// Seats in join order.
    pub players: Vec<PlayerInfo>,
    /// `"X"`, `"O"`, `"draw"` or null.
    pub winner: Option<Winner>,
    /// True iff `winner` is set.
    pub game_over: bool,
    /// Lifecycle phase.
    pub phase: MatchPhase,
    /// Ids that voted to restart.
    pub restart_votes: Vec<ConnectionId>,
}

/// One seat in a snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerInfo {
    /// Connection id of the seat holder.
    pub id: ConnectionId,
    /// Assigned symbol.
    pub symbol: Symbol,
    /// Display name.
    pub name: String,
    /// Whether the seat holder is online.
    pub connected: bool,
}

impl From<&MatchState> for MatchSnapshot {
    fn from(state: &MatchState) -> Self {
        Self {
            id: state.id.clone(),
            board: *state.board().cells(),
            current_player: state.current_player(),
            players: state
                .players()
                .iter()
                .map(|p| PlayerInfo {
                    id: p.id,
                    symbol: p.symbol,
                    name: p.name.clone(),
                    connected: p.connected,
                })
                .collect(),
            winner: state.winner(),
            game_over: state.is_over(),
            phase: state.phase(),
            restart_votes: state.restart_votes().iter().copied().collect(),
        }
    }
}

/// Board cells as the strings browser clients render.
mod cells {
    use serde::de::Error as _;
    use serde::{Deserialize, Deserializer, Serializer};

    use crate::game::board::{Symbol, BOARD_CELLS};

    pub fn serialize<S: Serializer>(
        cells: &[Option<Symbol>; BOARD_CELLS],
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(cells.iter().copied().map(|c| c.map_or("", Symbol::as_str)))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<[Option<Symbol>; BOARD_CELLS], D::Error> {
        let raw = <[String; BOARD_CELLS]>::deserialize(deserializer)?;
        let mut cells = [None; BOARD_CELLS];
        for (cell, text) in cells.iter_mut().zip(raw.iter()) {
            *cell = match text.as_str() {
                "" => None,
                "X" => Some(Symbol::X),
                "O" => Some(Symbol::O),
                other => return Err(D::Error::custom(format!("invalid cell {other:?}"))),
            };
        }
        Ok(cells)
    }
}

/// Server error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerError {
    /// Error code.
    pub code: ErrorCode,
    /// Human-readable message.
    pub message: String,
}

impl ServerError {
    /// Error for a frame that could not be decoded.
    pub fn invalid_message() -> Self {
        Self {
            code: ErrorCode::InvalidMessage,
            message: "Invalid message format".to_string(),
        }
    }
}

impl From<&MatchError> for ServerError {
    fn from(err: &MatchError) -> Self {
        Self {
            code: err.into(),
            message: err.to_string(),
        }
    }
}

/// Error codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    /// Unknown match id.
    MatchNotFound,
    /// Match already has two players.
    MatchFull,
    /// Caller already seated in the match.
    AlreadyInMatch,
    /// Move after the game ended.
    GameOver,
    /// Restart vote before the game ended.
    GameNotOver,
    /// Caller is not a participant.
    PlayerNotInMatch,
    /// Second player has not joined.
    WaitingForOpponent,
    /// Other player's turn.
    NotYourTurn,
    /// Cell already taken.
    CellOccupied,
    /// Cell index out of range.
    InvalidPosition,
    /// Seat is held by a live connection.
    AlreadyConnected,
    /// Frame could not be decoded.
    InvalidMessage,
}

impl From<&MatchError> for ErrorCode {
    fn from(err: &MatchError) -> Self {
        match err {
            MatchError::NotFound => ErrorCode::MatchNotFound,
            MatchError::Full => ErrorCode::MatchFull,
            MatchError::AlreadyInMatch => ErrorCode::AlreadyInMatch,
            MatchError::GameOver => ErrorCode::GameOver,
            MatchError::GameNotOver => ErrorCode::GameNotOver,
            MatchError::PlayerNotInMatch => ErrorCode::PlayerNotInMatch,
            MatchError::WaitingForOpponent => ErrorCode::WaitingForOpponent,
            MatchError::NotYourTurn => ErrorCode::NotYourTurn,
            MatchError::CellOccupied => ErrorCode::CellOccupied,
            MatchError::InvalidPosition => ErrorCode::InvalidPosition,
            MatchError::AlreadyConnected => ErrorCode::AlreadyConnected,
        }
    }
}

/// Notice text sent when a participant drops.
pub const OPPONENT_DISCONNECTED: &str = "Other player disconnected";

// =============================================================================
// SERIALIZATION HELPERS
// =============================================================================

impl ClientMessage {
    /// Serialize to JSON string.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Deserialize from JSON string.
    pub fn from_json(s: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }
}

impl ServerMessage {
    /// Serialize to JSON string.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Deserialize from JSON string.
    pub fn from_json(s: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};

    fn id(byte: u8) -> ConnectionId {
        ConnectionId::from_bytes([byte; 16])
    }

    #[test]
    fn test_parse_create_match() {
        let msg = ClientMessage::from_json(r#"{"type":"create_match","player_name":"Alice"}"#).unwrap();
        assert!(matches!(msg, ClientMessage::CreateMatch { ref player_name } if player_name == "Alice"));
    }

    #[test]
    fn test_parse_make_move_without_player_id() {
        let msg = ClientMessage::from_json(r#"{"type":"make_move","match_id":"abcde","position":4}"#).unwrap();
        match msg {
            ClientMessage::MakeMove { match_id, player_id, position } => {
                assert_eq!(match_id, "abcde");
                assert!(player_id.is_none());
                assert_eq!(position, 4);
            }
            other => panic!("Wrong message type: {:?}", other),
        }
    }

    #[test]
    fn test_negative_position_is_decoded_not_rejected() {
        // Range checks belong to the state machine, not the decoder
        let msg = ClientMessage::from_json(r#"{"type":"make_move","match_id":"ABCDE","position":-3}"#).unwrap();
        assert!(matches!(msg, ClientMessage::MakeMove { position: -3, .. }));
    }

    #[test]
    fn test_parse_rejoin_needs_token() {
        let token = "67e55044-10b1-426f-9247-bb680e5fe0c8";
        let msg = ClientMessage::from_json(&format!(
            r#"{{"type":"rejoin_match","match_id":"ABCDE","rejoin_token":"{}"}}"#,
            token
        ))
        .unwrap();
        match msg {
            ClientMessage::RejoinMatch { rejoin_token, .. } => {
                assert_eq!(rejoin_token.0.to_string(), token);
            }
            _ => panic!("Wrong message type"),
        }

        let by_player_id = format!(r#"{{"type":"rejoin_match","match_id":"ABCDE","player_id":"{}"}}"#, token);
        assert!(ClientMessage::from_json(&by_player_id).is_err());
    }

    #[test]
    fn test_restart_game_alias() {
        let msg = ClientMessage::from_json(r#"{"type":"restart_game","match_id":"ABCDE"}"#).unwrap();
        assert!(matches!(msg, ClientMessage::VoteRestart { player_id: None, .. }));
    }

    #[test]
    fn test_malformed_messages_rejected() {
        assert!(ClientMessage::from_json("not json").is_err());
        assert!(ClientMessage::from_json(r#"{"type":"teleport"}"#).is_err());
        assert!(ClientMessage::from_json(r#"{"type":"make_move","match_id":"ABCDE"}"#).is_err());
        assert!(ClientMessage::from_json(r#"{"type":"make_move","match_id":"ABCDE","position":"4"}"#).is_err());
    }

    #[test]
    fn test_snapshot_shape() {
        let mut state = MatchState::new(MatchId::parse("QWERT").unwrap(), id(1), "Alice");
        state.join(id(2), "Bob").unwrap();
        state.make_move(&id(1), 4).unwrap();

        let msg = ServerMessage::State(MatchSnapshot::from(&state));
        let value: Value = serde_json::from_str(&msg.to_json().unwrap()).unwrap();

        assert_eq!(value["type"], "state");
        assert_eq!(value["id"], "QWERT");
        assert_eq!(value["board"], json!(["", "", "", "", "X", "", "", "", ""]));
        assert_eq!(value["currentPlayer"], "O");
        assert_eq!(value["players"][0]["symbol"], "X");
        assert_eq!(value["players"][1]["name"], "Bob");
        assert_eq!(value["winner"], Value::Null);
        assert_eq!(value["gameOver"], false);
        assert_eq!(value["phase"], "in_progress");
        assert_eq!(value["restartVotes"], json!([]));
    }

    #[test]
    fn test_snapshot_roundtrip_preserves_board() {
        let mut state = MatchState::new(MatchId::parse("QWERT").unwrap(), id(1), "Alice");
        state.join(id(2), "Bob").unwrap();
        state.make_move(&id(1), 0).unwrap();
        state.make_move(&id(2), 8).unwrap();

        let snapshot = MatchSnapshot::from(&state);
        let json = ServerMessage::State(snapshot.clone()).to_json().unwrap();
        match ServerMessage::from_json(&json).unwrap() {
            ServerMessage::State(parsed) => assert_eq!(parsed, snapshot),
            other => panic!("Wrong message type: {:?}", other),
        }
    }

    #[test]
    fn test_error_codes() {
        let err = ServerError::from(&MatchError::NotYourTurn);
        let json = ServerMessage::Error(err).to_json().unwrap();
        assert!(json.contains("not_your_turn"));
        assert!(json.contains("Not your turn"));

        let err = ServerError::from(&MatchError::NotFound);
        assert_eq!(err.code, ErrorCode::MatchNotFound);
        assert_eq!(err.message, "Game not found");
    }

    #[test]
    fn test_opponent_disconnected_notice() {
        let msg = ServerMessage::OpponentDisconnected {
            match_id: MatchId::parse("ABCDE").unwrap(),
            message: OPPONENT_DISCONNECTED.to_string(),
        };
        let value: Value = serde_json::from_str(&msg.to_json().unwrap()).unwrap();
        assert_eq!(value["type"], "opponent_disconnected");
        assert_eq!(value["message"], "Other player disconnected");
    }
}
