//! Command Routing
//!
//! Bridges live connections to the match state machine. Each inbound
//! command is resolved to a match, applied under that match's lock, and
//! answered with a broadcast snapshot or a caller-only error. This is the
//! only place that knows which connection belongs to which matches.

use std::collections::{BTreeMap, BTreeSet};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Instant, SystemTime, UNIX_EPOCH};
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, info};

use crate::game::match_id::MatchId;
use crate::game::state::{ConnectionId, MatchError, MoveOutcome, RejoinToken, RestartOutcome};
use crate::network::protocol::{ClientMessage, ServerError, ServerMessage, OPPONENT_DISCONNECTED};
use crate::network::session::{deliver, MatchRegistry, MatchSession};

/// Connected client state.
#[derive(Debug)]
struct ConnectedClient {
    /// Remote address, if known.
    addr: Option<SocketAddr>,
    /// Matches this connection created, joined or rejoined.
    matches: BTreeSet<MatchId>,
    /// Outbound queue.
    sender: mpsc::Sender<ServerMessage>,
    /// Connection time.
    connected_at: Instant,
}

/// Routes client commands to matches and fans results back out.
pub struct CommandHandler {
    /// Owner of all matches.
    registry: Arc<MatchRegistry>,
    /// Live connections.
    clients: RwLock<BTreeMap<ConnectionId, ConnectedClient>>,
}

impl CommandHandler {
    /// Create a handler over a registry.
    pub fn new(registry: Arc<MatchRegistry>) -> Self {
        Self {
            registry,
            clients: RwLock::new(BTreeMap::new()),
        }
    }

    /// The match registry.
    pub fn registry(&self) -> &Arc<MatchRegistry> {
        &self.registry
    }

    /// Register a new connection and mint its id.
    pub async fn connect(
        &self,
        addr: Option<SocketAddr>,
        sender: mpsc::Sender<ServerMessage>,
    ) -> ConnectionId {
        let id = ConnectionId::new_v4();
        let mut clients = self.clients.write().await;
        clients.insert(id, ConnectedClient {
            addr,
            matches: BTreeSet::new(),
            sender,
            connected_at: Instant::now(),
        });
        id
    }

    /// Live connection count.
    pub async fn connection_count(&self) -> usize {
        self.clients.read().await.len()
    }

    /// Matches a connection is associated with.
    pub async fn matches_of(&self, id: &ConnectionId) -> Vec<MatchId> {
        let clients = self.clients.read().await;
        clients
            .get(id)
            .map(|c| c.matches.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Decode and handle one text frame.
    pub async fn handle_text(&self, id: ConnectionId, text: &str) {
        match ClientMessage::from_json(text) {
            Ok(message) => self.handle(id, message).await,
            Err(e) => {
                debug!("Invalid message from {}: {}", id.short(), e);
                if let Some(sender) = self.sender_of(&id).await {
                    deliver(&sender, ServerMessage::Error(ServerError::invalid_message()));
                }
            }
        }
    }

    /// Handle a decoded command from connection `id`.
    ///
    /// Rejections go back to `id` only and never change any match.
    pub async fn handle(&self, id: ConnectionId, message: ClientMessage) {
        let Some(sender) = self.sender_of(&id).await else {
            debug!("Message from unknown connection {}", id.short());
            return;
        };

        let result = match message {
            ClientMessage::CreateMatch { player_name } => {
                self.create_match(id, player_name, &sender).await;
                Ok(())
            }
            ClientMessage::JoinMatch { match_id, player_name } => {
                self.join_match(id, &match_id, player_name, &sender).await
            }
            ClientMessage::MakeMove { match_id, player_id, position } => {
                self.make_move(id, &match_id, player_id, position).await
            }
            ClientMessage::VoteRestart { match_id, player_id } => {
                self.vote_restart(id, &match_id, player_id).await
            }
            ClientMessage::RejoinMatch { match_id, rejoin_token } => {
                self.rejoin_match(id, &match_id, rejoin_token, &sender).await
            }
            ClientMessage::Ping { timestamp } => {
                deliver(&sender, ServerMessage::Pong {
                    timestamp,
                    server_time: unix_millis(),
                });
                Ok(())
            }
        };

        if let Err(err) = result {
            debug!("Rejected command from {}: {}", id.short(), err);
            deliver(&sender, ServerMessage::Error(ServerError::from(&err)));
        }
    }

    /// Tear down a connection: release its seats and notify opponents.
    ///
    /// Matches are kept so the player can rejoin. Returns the matches
    /// whose other participants were notified.
    pub async fn disconnect(&self, id: ConnectionId) -> Vec<MatchId> {
        let Some(client) = self.clients.write().await.remove(&id) else {
            return Vec::new();
        };

        let mut affected = Vec::new();
        for match_id in client.matches {
            let Some(session) = self.registry.get(&match_id).await else {
                continue;
            };
            let mut session = session.write().await;
            if session.disconnect(&id) {
                session.broadcast(&ServerMessage::OpponentDisconnected {
                    match_id: match_id.clone(),
                    message: OPPONENT_DISCONNECTED.to_string(),
                });
                session.broadcast_state();
                affected.push(match_id);
            }
        }

        info!(
            "Connection {} ({}) closed after {:?}, left {} match(es)",
            id.short(),
            client.addr.map(|a| a.to_string()).unwrap_or_else(|| "-".to_string()),
            client.connected_at.elapsed(),
            affected.len(),
        );
        affected
    }

    async fn create_match(
        &self,
        id: ConnectionId,
        player_name: String,
        sender: &mpsc::Sender<ServerMessage>,
    ) {
        let (match_id, session) = self.registry.create(id, player_name, sender.clone()).await;
        {
            let session = session.read().await;
            send_joined(&session, id, sender);
            session.broadcast_state();
        }
        self.associate(id, match_id.clone()).await;

        info!("Match {} created by {}", match_id, id.short());
    }

    async fn join_match(
        &self,
        id: ConnectionId,
        raw_match_id: &str,
        player_name: String,
        sender: &mpsc::Sender<ServerMessage>,
    ) -> Result<(), MatchError> {
        let session = self.registry.lookup(raw_match_id).await?;
        let match_id = {
            let mut session = session.write().await;
            let symbol = session.join(id, player_name, sender.clone())?;
            send_joined(&session, id, sender);
            session.broadcast_state();
            debug!("{} seated as {}", id.short(), symbol);
            session.id().clone()
        };
        self.associate(id, match_id.clone()).await;

        info!("{} joined match {}", id.short(), match_id);
        Ok(())
    }

    async fn make_move(
        &self,
        id: ConnectionId,
        raw_match_id: &str,
        claimed: Option<ConnectionId>,
        position: i64,
    ) -> Result<(), MatchError> {
        let session = self.registry.lookup(raw_match_id).await?;
        let mut session = session.write().await;
        verify_claim(id, claimed)?;

        let outcome = session.make_move(&id, position)?;
        session.broadcast_state();

        match outcome {
            MoveOutcome::Finished(winner) => {
                info!("Match {} finished: {:?}", session.id(), winner);
            }
            MoveOutcome::NextTurn(next) => {
                debug!("Match {}: {} played {}, {} to move", session.id(), id.short(), position, next);
            }
        }
        Ok(())
    }

    async fn vote_restart(
        &self,
        id: ConnectionId,
        raw_match_id: &str,
        claimed: Option<ConnectionId>,
    ) -> Result<(), MatchError> {
        let session = self.registry.lookup(raw_match_id).await?;
        let mut session = session.write().await;
        verify_claim(id, claimed)?;

        let outcome = session.vote_restart(&id)?;
        session.broadcast_state();

        match outcome {
            RestartOutcome::Reset => info!("Match {} restarted", session.id()),
            RestartOutcome::Pending { votes, needed } => {
                debug!("Match {}: restart vote {}/{}", session.id(), votes, needed);
            }
        }
        Ok(())
    }

    async fn rejoin_match(
        &self,
        id: ConnectionId,
        raw_match_id: &str,
        token: RejoinToken,
        sender: &mpsc::Sender<ServerMessage>,
    ) -> Result<(), MatchError> {
        let session = self.registry.lookup(raw_match_id).await?;
        let (match_id, symbol) = {
            let mut session = session.write().await;
            let symbol = session.rejoin(&token, id, sender.clone())?;
            send_joined(&session, id, sender);
            session.broadcast_state();
            (session.id().clone(), symbol)
        };
        self.associate(id, match_id.clone()).await;

        info!("{} rejoined match {} as {}", id.short(), match_id, symbol);
        Ok(())
    }

    async fn sender_of(&self, id: &ConnectionId) -> Option<mpsc::Sender<ServerMessage>> {
        let clients = self.clients.read().await;
        clients.get(id).map(|c| c.sender.clone())
    }

    async fn associate(&self, id: ConnectionId, match_id: MatchId) {
        let mut clients = self.clients.write().await;
        if let Some(client) = clients.get_mut(&id) {
            client.matches.insert(match_id);
        }
    }
}

/// Tell `id` which seat it holds.
fn send_joined(session: &MatchSession, id: ConnectionId, sender: &mpsc::Sender<ServerMessage>) {
    if let Some(info) = session.joined_info(&id) {
        deliver(sender, ServerMessage::MatchJoined(info));
    }
}

/// A payload may echo the caller's id; it must be the caller's own.
fn verify_claim(id: ConnectionId, claimed: Option<ConnectionId>) -> Result<(), MatchError> {
    match claimed {
        Some(claimed) if claimed != id => Err(MatchError::PlayerNotInMatch),
        _ => Ok(()),
    }
}

fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
