//! Network Layer
//!
//! WebSocket server for real-time multiplayer communication.
//! All rules live in `game/`; this layer decodes commands, routes them to
//! the right match, and fans results back out to connections.

pub mod handler;
pub mod handshake;
pub mod protocol;
pub mod session;
pub mod server;

pub use handler::CommandHandler;
pub use handshake::{HandshakeError, OriginPolicy};
pub use protocol::{
    ClientMessage, ServerMessage, ErrorCode, JoinedInfo, MatchSnapshot, PlayerInfo, ServerError,
};
pub use session::{MatchRegistry, MatchSession, SharedSession};
pub use server::{GameServer, ServerConfig, GameServerError};
