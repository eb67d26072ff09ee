//! WebSocket Game Server
//!
//! Async WebSocket server for browser clients.
//! Accepts connections, checks the handshake origin, and pumps frames
//! between each socket and the command handler.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::str::FromStr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc};
use tokio::time::{interval, timeout, MissedTickBehavior};
use tokio_tungstenite::{accept_hdr_async, tungstenite::Message};
use tokio_tungstenite::tungstenite::handshake::server::{Request, Response};
use futures_util::{SinkExt, StreamExt};
use tracing::{info, warn, error, debug, instrument};

use crate::network::handler::CommandHandler;
use crate::network::handshake::OriginPolicy;
use crate::network::protocol::{ServerError, ServerMessage};
use crate::network::session::{deliver, MatchRegistry};

/// Default listen port.
pub const DEFAULT_PORT: u16 = 3001;

/// Per-connection outbound queue depth.
const OUTBOUND_QUEUE: usize = 64;

/// Floor for the sweep period; `interval` rejects zero.
const MIN_CLEANUP_INTERVAL: Duration = Duration::from_millis(100);

/// How long a closing connection may spend flushing its queue.
const FLUSH_GRACE: Duration = Duration::from_secs(1);

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Bind address.
    pub bind_addr: SocketAddr,
    /// Origins allowed to open a WebSocket.
    pub allowed_origin: OriginPolicy,
    /// Maximum concurrent connections.
    pub max_connections: usize,
    /// Time allowed for the WebSocket upgrade.
    pub handshake_timeout: Duration,
    /// How long a match with nobody connected survives.
    pub abandoned_match_ttl: Duration,
    /// How often abandoned matches are swept.
    pub cleanup_interval: Duration,
    /// Server version string.
    pub version: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), DEFAULT_PORT),
            allowed_origin: OriginPolicy::default(),
            max_connections: 1000,
            handshake_timeout: Duration::from_secs(10),
            abandoned_match_ttl: Duration::from_secs(600),
            cleanup_interval: Duration::from_secs(60),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

impl ServerConfig {
    /// Create config from environment variables.
    ///
    /// `HOST`, `PORT`, `FRONTEND_URL`, `MAX_CONNECTIONS`,
    /// `HANDSHAKE_TIMEOUT_SECS`, `ABANDONED_MATCH_TTL_SECS`,
    /// `CLEANUP_INTERVAL_SECS`. Unset or unparseable values keep defaults,
    /// as does a zero handshake timeout or cleanup interval.
    pub fn from_env() -> Self {
        Self::from_vars(|key| std::env::var(key).ok())
    }

    /// Create config from an arbitrary variable source.
    pub fn from_vars(var: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();

        let host = parse_var(&var, "HOST", defaults.bind_addr.ip());
        let port = parse_var(&var, "PORT", defaults.bind_addr.port());
        let secs = |key: &str, default: Duration| {
            Duration::from_secs(parse_var(&var, key, default.as_secs()))
        };
        let nonzero_secs = |key: &str, default: Duration| {
            let value = secs(key, default);
            if value.is_zero() {
                warn!("Ignoring zero {}, using {:?}", key, default);
                default
            } else {
                value
            }
        };

        Self {
            bind_addr: SocketAddr::new(host, port),
            allowed_origin: var("FRONTEND_URL")
                .map(|v| OriginPolicy::parse(&v))
                .unwrap_or(defaults.allowed_origin),
            max_connections: parse_var(&var, "MAX_CONNECTIONS", defaults.max_connections),
            handshake_timeout: nonzero_secs("HANDSHAKE_TIMEOUT_SECS", defaults.handshake_timeout),
            abandoned_match_ttl: secs("ABANDONED_MATCH_TTL_SECS", defaults.abandoned_match_ttl),
            cleanup_interval: nonzero_secs("CLEANUP_INTERVAL_SECS", defaults.cleanup_interval),
            version: defaults.version,
        }
    }
}

fn parse_var<T: FromStr>(var: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> T {
    match var(key) {
        Some(raw) => match raw.trim().parse() {
            Ok(value) => value,
            Err(_) => {
                warn!("Ignoring unparseable {}={:?}", key, raw);
                default
            }
        },
        None => default,
    }
}

/// One counted connection, from accept until its task ends.
struct ConnectionSlot(Arc<AtomicUsize>);

impl ConnectionSlot {
    /// Take a slot if fewer than `max` are held.
    fn acquire(active: &Arc<AtomicUsize>, max: usize) -> Option<Self> {
        active
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| (n < max).then_some(n + 1))
            .ok()
            .map(|_| Self(active.clone()))
    }
}

impl Drop for ConnectionSlot {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::AcqRel);
    }
}

/// Game server errors.
#[derive(Debug, thiserror::Error)]
pub enum GameServerError {
    /// Failed to bind to address.
    #[error("Failed to bind: {0}")]
    BindFailed(#[from] std::io::Error),
}

/// The game server.
pub struct GameServer {
    /// Server configuration.
    config: ServerConfig,
    /// Command routing and connection tracking.
    handler: Arc<CommandHandler>,
    /// Sockets accepted and not yet closed, handshakes included.
    active: Arc<AtomicUsize>,
    /// Shutdown signal.
    shutdown_tx: broadcast::Sender<()>,
}

impl GameServer {
    /// Create a new game server.
    pub fn new(config: ServerConfig) -> Self {
        Self::with_registry(config, Arc::new(MatchRegistry::new()))
    }

    /// Create a server over an existing registry.
    pub fn with_registry(config: ServerConfig, registry: Arc<MatchRegistry>) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);

        Self {
            config,
            handler: Arc::new(CommandHandler::new(registry)),
            active: Arc::new(AtomicUsize::new(0)),
            shutdown_tx,
        }
    }

    /// Bind the configured address and run until shutdown.
    pub async fn run(&self) -> Result<(), GameServerError> {
        let listener = TcpListener::bind(&self.config.bind_addr).await?;
        self.serve(listener).await
    }

    /// Serve connections from an already bound listener until shutdown.
    #[instrument(skip(self, listener))]
    pub async fn serve(&self, listener: TcpListener) -> Result<(), GameServerError> {
        info!("Game server listening on {}", listener.local_addr()?);

        let cleanup_registry = self.handler.registry().clone();
        let ttl = self.config.abandoned_match_ttl;
        let period = self.config.cleanup_interval;
        let cleanup_handle = tokio::spawn(async move {
            Self::run_cleanup_loop(cleanup_registry, ttl, period).await;
        });

        let mut shutdown_rx = self.shutdown_tx.subscribe();

        loop {
            tokio::select! {
                result = listener.accept() => {
                    match result {
                        Ok((stream, addr)) => {
                            let Some(slot) = ConnectionSlot::acquire(&self.active, self.config.max_connections) else {
                                warn!("Connection limit reached, rejecting {}", addr);
                                continue;
                            };

                            debug!("New connection from {}", addr);
                            self.handle_connection(stream, addr, slot);
                        }
                        Err(e) => {
                            error!("Accept error: {}", e);
                        }
                    }
                }
                _ = shutdown_rx.recv() => {
                    info!("Shutdown signal received");
                    break;
                }
            }
        }

        cleanup_handle.abort();
        self.wait_for_drain(Duration::from_secs(2)).await;

        Ok(())
    }

    /// Handle a new WebSocket connection.
    fn handle_connection(&self, stream: TcpStream, addr: SocketAddr, slot: ConnectionSlot) {
        let handler = self.handler.clone();
        let policy = self.config.allowed_origin.clone();
        let handshake_timeout = self.config.handshake_timeout;
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        tokio::spawn(async move {
            let _slot = slot;
            let handshake = accept_hdr_async(stream, move |request: &Request, response: Response| {
                policy.validate(request, response)
            });
            let ws_stream = match timeout(handshake_timeout, handshake).await {
                Ok(Ok(ws)) => ws,
                Ok(Err(e)) => {
                    warn!("WebSocket handshake failed for {}: {}", addr, e);
                    return;
                }
                Err(_) => {
                    warn!("WebSocket handshake timed out for {}", addr);
                    return;
                }
            };

            let (mut ws_sender, mut ws_receiver) = ws_stream.split();
            let (msg_tx, mut msg_rx) = mpsc::channel::<ServerMessage>(OUTBOUND_QUEUE);

            let conn = handler.connect(Some(addr), msg_tx.clone()).await;
            info!("Client {} connected from {}", conn.short(), addr);

            // Spawn message sender task
            let mut sender_task = tokio::spawn(async move {
                while let Some(msg) = msg_rx.recv().await {
                    let text = match msg.to_json() {
                        Ok(t) => t,
                        Err(e) => {
                            error!("Failed to serialize message: {}", e);
                            continue;
                        }
                    };
                    if ws_sender.send(Message::Text(text)).await.is_err() {
                        break;
                    }
                }
                let _ = ws_sender.close().await;
            });

            // Handle incoming messages
            loop {
                tokio::select! {
                    msg = ws_receiver.next() => {
                        match msg {
                            Some(Ok(Message::Text(text))) => {
                                handler.handle_text(conn, &text).await;
                            }
                            Some(Ok(Message::Binary(_))) => {
                                debug!("Binary frame from {} rejected", conn.short());
                                deliver(&msg_tx, ServerMessage::Error(ServerError::invalid_message()));
                            }
                            Some(Ok(Message::Close(_))) | None => {
                                debug!("Client {} disconnected", conn.short());
                                break;
                            }
                            Some(Err(e)) => {
                                error!("WebSocket error for {}: {}", conn.short(), e);
                                break;
                            }
                            _ => {}
                        }
                    }
                    _ = shutdown_rx.recv() => {
                        deliver(&msg_tx, ServerMessage::Shutdown {
                            reason: "Server shutting down".to_string(),
                        });
                        break;
                    }
                }
            }

            // Release seats; every other sender clone goes with them
            handler.disconnect(conn).await;
            drop(msg_tx);

            if timeout(FLUSH_GRACE, &mut sender_task).await.is_err() {
                sender_task.abort();
            }
        });
    }

    /// Periodically drop matches nobody has been connected to.
    async fn run_cleanup_loop(registry: Arc<MatchRegistry>, ttl: Duration, period: Duration) {
        let mut ticker = interval(period.max(MIN_CLEANUP_INTERVAL));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            ticker.tick().await;

            let removed = registry.sweep_abandoned(ttl).await;
            for id in &removed {
                info!("Removed abandoned match {}", id);
            }
        }
    }

    /// Wait until every connection task released its seats.
    async fn wait_for_drain(&self, limit: Duration) {
        let drained = timeout(limit, async {
            while self.active.load(Ordering::Acquire) > 0 {
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
        })
        .await;

        if drained.is_err() {
            warn!("{} connection(s) still open at shutdown", self.active.load(Ordering::Acquire));
        }
    }

    /// Shutdown the server.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
    }

    /// Server configuration.
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Get active connection count.
    pub async fn connection_count(&self) -> usize {
        self.handler.connection_count().await
    }

    /// Get live match count.
    pub async fn match_count(&self) -> usize {
        self.handler.registry().len().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn vars(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_server_config_default() {
        let config = ServerConfig::default();
        assert_eq!(config.bind_addr.port(), 3001);
        assert_eq!(config.max_connections, 1000);
        assert_eq!(config.allowed_origin, OriginPolicy::Only("http://localhost:5173".to_string()));
    }

    #[test]
    fn test_config_from_vars() {
        let config = ServerConfig::from_vars(vars(&[
            ("HOST", "127.0.0.1"),
            ("PORT", "8080"),
            ("FRONTEND_URL", "*"),
            ("MAX_CONNECTIONS", "10"),
            ("ABANDONED_MATCH_TTL_SECS", "5"),
        ]));

        assert_eq!(config.bind_addr, "127.0.0.1:8080".parse().unwrap());
        assert_eq!(config.allowed_origin, OriginPolicy::Any);
        assert_eq!(config.max_connections, 10);
        assert_eq!(config.abandoned_match_ttl, Duration::from_secs(5));
        assert_eq!(config.cleanup_interval, Duration::from_secs(60));
    }

    #[test]
    fn test_config_bad_values_fall_back() {
        let config = ServerConfig::from_vars(vars(&[("PORT", "not-a-port"), ("HOST", "???")]));
        assert_eq!(config.bind_addr, ServerConfig::default().bind_addr);
    }

    #[test]
    fn test_zero_durations_fall_back() {
        let config = ServerConfig::from_vars(vars(&[
            ("CLEANUP_INTERVAL_SECS", "0"),
            ("HANDSHAKE_TIMEOUT_SECS", "0"),
            ("ABANDONED_MATCH_TTL_SECS", "0"),
        ]));

        assert_eq!(config.cleanup_interval, Duration::from_secs(60));
        assert_eq!(config.handshake_timeout, Duration::from_secs(10));
        assert_eq!(config.abandoned_match_ttl, Duration::ZERO);
    }

    #[test]
    fn test_connection_slots_enforce_cap() {
        let active = Arc::new(AtomicUsize::new(0));

        let first = ConnectionSlot::acquire(&active, 2).unwrap();
        let second = ConnectionSlot::acquire(&active, 2).unwrap();
        assert!(ConnectionSlot::acquire(&active, 2).is_none());
        assert_eq!(active.load(Ordering::Acquire), 2);

        drop(first);
        let third = ConnectionSlot::acquire(&active, 2);
        assert!(third.is_some());

        drop(second);
        drop(third);
        assert_eq!(active.load(Ordering::Acquire), 0);
    }

    #[tokio::test]
    async fn test_cleanup_loop_sweeps_with_zero_period() {
        let registry = Arc::new(MatchRegistry::with_seed(9));
        let (tx, _rx) = mpsc::channel(4);
        let creator = crate::game::state::ConnectionId::new_v4();
        let (match_id, session) = registry.create(creator, "Alice", tx).await;
        session.write().await.disconnect(&creator);

        let sweeping = registry.clone();
        let handle = tokio::spawn(async move {
            GameServer::run_cleanup_loop(sweeping, Duration::ZERO, Duration::ZERO).await;
        });

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!handle.is_finished());
        assert!(registry.get(&match_id).await.is_none());
        handle.abort();
    }

    #[tokio::test]
    async fn test_server_creation() {
        let server = GameServer::new(ServerConfig::default());

        assert_eq!(server.connection_count().await, 0);
        assert_eq!(server.match_count().await, 0);
    }

    #[tokio::test]
    async fn test_server_shutdown() {
        let server = Arc::new(GameServer::new(ServerConfig::default()));
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();

        let running = server.clone();
        let handle = tokio::spawn(async move { running.serve(listener).await });

        tokio::time::sleep(Duration::from_millis(50)).await;
        server.shutdown();

        let result = timeout(Duration::from_secs(5), handle).await.unwrap().unwrap();
        assert!(result.is_ok());
    }
}
