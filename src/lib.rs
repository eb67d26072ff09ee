//! # Tic-Tac-Toe Relay Server
//!
//! Authoritative two-player tic-tac-toe over WebSockets. Browsers create
//! or join a match by its short code; the server validates every move and
//! pushes the full match state to both seats.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                  TIC-TAC-TOE RELAY SERVER                    │
//! ├─────────────────────────────────────────────────────────────┤
//! │  core/           - Shared primitives                         │
//! │  └── rng.rs      - Xorshift128+ PRNG for match codes         │
//! │                                                              │
//! │  game/           - Game logic (synchronous, no I/O)          │
//! │  ├── board.rs    - Cells, win lines, outcome evaluation      │
//! │  ├── match_id.rs - Five-character match codes                │
//! │  └── state.rs    - Per-match state machine                   │
//! │                                                              │
//! │  network/        - Networking                                │
//! │  ├── server.rs   - WebSocket server and config               │
//! │  ├── handshake.rs- Origin check on upgrade                   │
//! │  ├── handler.rs  - Command routing per connection            │
//! │  ├── protocol.rs - Message types                             │
//! │  └── session.rs  - Match registry and fan-out                │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Authority
//!
//! Clients only ever send intents (`make_move`, `vote_restart`, ...).
//! Turn order, cell occupancy and win/draw detection are decided by
//! [`game::MatchState`] and every accepted change is followed by a
//! `state` broadcast to all connected members of the match.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod core;
pub mod game;
pub mod network;

// Re-export commonly used types
pub use core::rng::DeterministicRng;
pub use game::board::{Board, Symbol, Winner};
pub use game::match_id::MatchId;
pub use game::state::{ConnectionId, MatchError, MatchState};
pub use network::server::{GameServer, ServerConfig};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
