//! Match Session Management
//!
//! A `MatchSession` pairs one match's state machine with the outbound
//! channels of its connected members. The `MatchRegistry` owns every live
//! session; each sits behind its own lock so commands on one match are
//! serialized without blocking other matches.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, Mutex, RwLock};
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, warn};

use crate::core::rng::DeterministicRng;
use crate::game::board::Symbol;
use crate::game::match_id::MatchId;
use crate::game::state::{ConnectionId, MatchError, MatchState, MoveOutcome, RejoinToken, RestartOutcome};
use crate::network::protocol::{JoinedInfo, MatchSnapshot, ServerMessage};

/// Queue a message for one connection without waiting.
///
/// Delivery is fire-and-forget: a full or closed queue drops the message.
pub fn deliver(sender: &mpsc::Sender<ServerMessage>, message: ServerMessage) -> bool {
    match sender.try_send(message) {
        Ok(()) => true,
        Err(TrySendError::Full(_)) => {
            warn!("Outbound queue full, dropping message");
            false
        }
        Err(TrySendError::Closed(_)) => false,
    }
}

/// One live match and the connections watching it.
#[derive(Debug)]
pub struct MatchSession {
    /// Authoritative game state.
    state: MatchState,
    /// Outbound channels of currently connected members.
    members: BTreeMap<ConnectionId, mpsc::Sender<ServerMessage>>,
    /// When the last member disconnected, if nobody is left.
    abandoned_since: Option<Instant>,
    /// When the session was created.
    created_at: Instant,
}

impl MatchSession {
    /// Create a session with its creator seated as X.
    pub fn new(
        id: MatchId,
        creator: ConnectionId,
        name: impl Into<String>,
        sender: mpsc::Sender<ServerMessage>,
    ) -> Self {
        let mut members = BTreeMap::new();
        members.insert(creator, sender);

        Self {
            state: MatchState::new(id, creator, name),
            members,
            abandoned_since: None,
            created_at: Instant::now(),
        }
    }

    /// Match code.
    pub fn id(&self) -> &MatchId {
        &self.state.id
    }

    /// Read access to the state machine.
    pub fn state(&self) -> &MatchState {
        &self.state
    }

    /// Current observable state.
    pub fn snapshot(&self) -> MatchSnapshot {
        MatchSnapshot::from(&self.state)
    }

    /// Seat assignment for `id`, including its private rejoin token.
    pub fn joined_info(&self, id: &ConnectionId) -> Option<JoinedInfo> {
        self.state.player(id).map(|player| JoinedInfo {
            match_id: self.state.id.clone(),
            player_id: player.id,
            symbol: player.symbol,
            rejoin_token: player.rejoin_token,
        })
    }

    /// Seat a second player and start delivering to them.
    pub fn join(
        &mut self,
        id: ConnectionId,
        name: impl Into<String>,
        sender: mpsc::Sender<ServerMessage>,
    ) -> Result<Symbol, MatchError> {
        let symbol = self.state.join(id, name)?;
        self.members.insert(id, sender);
        Ok(symbol)
    }

    /// Play a move for `id`.
    pub fn make_move(&mut self, id: &ConnectionId, position: i64) -> Result<MoveOutcome, MatchError> {
        self.state.make_move(id, position)
    }

    /// Record a restart vote for `id`.
    pub fn vote_restart(&mut self, id: &ConnectionId) -> Result<RestartOutcome, MatchError> {
        self.state.vote_restart(id)
    }

    /// Hand a disconnected seat to a new connection.
    pub fn rejoin(
        &mut self,
        token: &RejoinToken,
        id: ConnectionId,
        sender: mpsc::Sender<ServerMessage>,
    ) -> Result<Symbol, MatchError> {
        let symbol = self.state.rebind(token, id)?;
        self.members.insert(id, sender);
        self.abandoned_since = None;
        Ok(symbol)
    }

    /// Mark `id`'s seat disconnected and stop delivering to it.
    ///
    /// Returns false if `id` holds no seat here.
    pub fn disconnect(&mut self, id: &ConnectionId) -> bool {
        if !self.state.mark_disconnected(id) {
            return false;
        }
        self.members.remove(id);
        if !self.state.any_connected() {
            self.abandoned_since = Some(Instant::now());
        }
        true
    }

    /// True if nobody has been connected for longer than `ttl`.
    pub fn is_abandoned(&self, ttl: Duration, now: Instant) -> bool {
        self.abandoned_since
            .is_some_and(|since| now.saturating_duration_since(since) >= ttl)
    }

    /// Age of the session.
    pub fn age(&self) -> Duration {
        self.created_at.elapsed()
    }

    /// Send a message to every connected member.
    pub fn broadcast(&self, message: &ServerMessage) -> usize {
        self.members
            .values()
            .filter(|sender| deliver(sender, message.clone()))
            .count()
    }

    /// Broadcast the current snapshot.
    pub fn broadcast_state(&self) -> usize {
        self.broadcast(&ServerMessage::State(self.snapshot()))
    }
}

/// Shared handle to a session.
pub type SharedSession = Arc<RwLock<MatchSession>>;

// =============================================================================
// MATCH REGISTRY
// =============================================================================

/// Owns every live match.
pub struct MatchRegistry {
    /// Active sessions by code.
    sessions: RwLock<BTreeMap<MatchId, SharedSession>>,
    /// Source of match codes.
    rng: Mutex<DeterministicRng>,
}

impl MatchRegistry {
    /// Create a registry drawing codes from fresh entropy.
    pub fn new() -> Self {
        Self::with_rng(DeterministicRng::from_entropy())
    }

    /// Create a registry with reproducible codes.
    pub fn with_seed(seed: u64) -> Self {
        Self::with_rng(DeterministicRng::new(seed))
    }

    fn with_rng(rng: DeterministicRng) -> Self {
        Self {
            sessions: RwLock::new(BTreeMap::new()),
            rng: Mutex::new(rng),
        }
    }

    /// Create a match with `creator` seated as X.
    ///
    /// Codes that collide with a live match are redrawn.
    pub async fn create(
        &self,
        creator: ConnectionId,
        name: impl Into<String>,
        sender: mpsc::Sender<ServerMessage>,
    ) -> (MatchId, SharedSession) {
        let mut sessions = self.sessions.write().await;
        let mut rng = self.rng.lock().await;

        let id = loop {
            let candidate = MatchId::generate(&mut rng);
            if !sessions.contains_key(&candidate) {
                break candidate;
            }
            debug!("Match code {} already live, redrawing", candidate);
        };

        let session = Arc::new(RwLock::new(MatchSession::new(id.clone(), creator, name, sender)));
        sessions.insert(id.clone(), session.clone());

        (id, session)
    }

    /// Get a session by code.
    pub async fn get(&self, id: &MatchId) -> Option<SharedSession> {
        let sessions = self.sessions.read().await;
        sessions.get(id).cloned()
    }

    /// Resolve a code typed by a player.
    pub async fn lookup(&self, raw: &str) -> Result<SharedSession, MatchError> {
        let id = MatchId::parse(raw).ok_or(MatchError::NotFound)?;
        self.get(&id).await.ok_or(MatchError::NotFound)
    }

    /// Remove a session.
    pub async fn remove(&self, id: &MatchId) -> bool {
        let mut sessions = self.sessions.write().await;
        sessions.remove(id).is_some()
    }

    /// Live match count.
    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    /// True if no match is live.
    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }

    /// Remove matches nobody has been connected to for `ttl`.
    pub async fn sweep_abandoned(&self, ttl: Duration) -> Vec<MatchId> {
        let now = Instant::now();
        let live: Vec<(MatchId, SharedSession)> = {
            let sessions = self.sessions.read().await;
            sessions.iter().map(|(id, s)| (id.clone(), s.clone())).collect()
        };

        let mut candidates = Vec::new();
        for (id, session) in live {
            let session = session.read().await;
            if session.is_abandoned(ttl, now) {
                debug!("Match {} abandoned at age {:?}", id, session.age());
                candidates.push(id);
            }
        }

        // Recheck without waiting; a busy match is not abandoned
        let mut sessions = self.sessions.write().await;
        candidates.retain(|id| {
            sessions
                .get(id)
                .and_then(|s| s.try_read().ok().map(|s| s.is_abandoned(ttl, now)))
                .unwrap_or(false)
        });
        for id in &candidates {
            sessions.remove(id);
        }

        candidates
    }

    #[cfg(test)]
    pub(crate) async fn reseed(&self, seed: u64) {
        *self.rng.lock().await = DeterministicRng::new(seed);
    }
}

impl Default for MatchRegistry {
    fn default() -> Self {
        Self::new()
    }
}
