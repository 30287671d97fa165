use std::{
    sync::{Arc, OnceLock},
    time::Duration,
};

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;
use tokio::sync::{mpsc, RwLock};
use tracing::{error, info, warn};

use crate::outbox::Outbox;
use crate::session::SessionJanitor;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("transport failed to connect: {0}")]
    Connect(String),
    #[error("transport read failed: {0}")]
    Receive(String),
    #[error("transport send failed: {0}")]
    Send(String),
    #[error("transport disconnect failed: {0}")]
    Disconnect(String),
}

/// A customer message as it arrives off the wire.
#[derive(Clone, Debug, PartialEq)]
pub struct InboundMessage {
    pub phone_number: String,
    pub body: String,
    pub received_at: DateTime<Utc>,
}

/// What the underlying client reports while the connection is pumped.
#[derive(Clone, Debug, PartialEq)]
pub enum TransportEvent {
    Up,
    AuthChallenge(String),
    AuthFailed(String),
    Down(String),
    Inbound(InboundMessage),
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    AwaitingAuth,
    Ready,
    Reconnecting,
}

#[derive(Clone, Debug, Default)]
pub struct TransportStatus {
    pub state: ConnectionState,
    pub has_pending_auth_challenge: bool,
}

impl TransportStatus {
    pub fn is_ready(&self) -> bool {
        matches!(self.state, ConnectionState::Ready)
    }
}

/// Shared with the outbox and the health endpoint.
pub type StatusHandle = Arc<RwLock<TransportStatus>>;

/// Fixed ladder of delays for the very first connection. When the ladder
/// runs out without a single successful connect, the manager gives up and
/// leaves the process alive in degraded mode.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StartupPolicy {
    pub delays: Vec<Duration>,
}

impl Default for StartupPolicy {
    fn default() -> Self {
        Self {
            delays: vec![
                Duration::from_secs(5),
                Duration::from_secs(15),
                Duration::from_secs(30),
            ],
        }
    }
}

impl StartupPolicy {
    fn delay(&self, attempt: u32) -> Option<Duration> {
        self.delays.get(attempt as usize).copied()
    }
}

/// Exponential backoff for reconnects after the link was up at least once.
/// The attempt counter resets every time the connection becomes ready.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self { max_retries: 10, base_delay_ms: 5_000, max_delay_ms: 60_000 }
    }
}

impl ReconnectPolicy {
    fn backoff(&self, attempt: u32) -> Option<Duration> {
        if attempt >= self.max_retries {
            return None;
        }
        let exponent = attempt.min(16);
        let multiplier = 1_u64 << exponent;
        let delay_ms = self.base_delay_ms.saturating_mul(multiplier).min(self.max_delay_ms);
        Some(Duration::from_millis(delay_ms))
    }
}

#[async_trait]
pub trait ChatTransport: Send + Sync {
    async fn connect(&self) -> Result<(), TransportError>;
    async fn next_event(&self) -> Result<Option<TransportEvent>, TransportError>;
    async fn send_text(&self, phone_number: &str, body: &str) -> Result<(), TransportError>;
    async fn disconnect(&self) -> Result<(), TransportError>;
}

#[derive(Default)]
pub struct NoopChatTransport;

#[async_trait]
impl ChatTransport for NoopChatTransport {
    async fn connect(&self) -> Result<(), TransportError> {
        Ok(())
    }

    async fn next_event(&self) -> Result<Option<TransportEvent>, TransportError> {
        Ok(None)
    }

    async fn send_text(&self, _phone_number: &str, _body: &str) -> Result<(), TransportError> {
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), TransportError> {
        Ok(())
    }
}

enum PumpExit {
    /// Event stream ended cleanly or the inbound consumer went away.
    Closed,
    /// Link dropped or authentication was rejected. `was_ready` says whether
    /// the connection had come up this round.
    Lost { was_ready: bool, reason: String, auth_failed: bool },
}

/// Owns the transport connection lifecycle and fans inbound messages out
/// to the engine through a channel.
pub struct ConnectionManager {
    transport: Arc<dyn ChatTransport>,
    inbound_tx: mpsc::Sender<InboundMessage>,
    status: StatusHandle,
    startup: StartupPolicy,
    reconnect: ReconnectPolicy,
    janitor: Option<SessionJanitor>,
    outbox: OnceLock<Arc<Outbox>>,
}

impl ConnectionManager {
    pub fn new(
        transport: Arc<dyn ChatTransport>,
        inbound_tx: mpsc::Sender<InboundMessage>,
        startup: StartupPolicy,
        reconnect: ReconnectPolicy,
    ) -> Self {
        Self {
            transport,
            inbound_tx,
            status: Arc::new(RwLock::new(TransportStatus::default())),
            startup,
            reconnect,
            janitor: None,
            outbox: OnceLock::new(),
        }
    }

    /// Run session cleanup before every connect attempt, not just the first.
    /// A crashed client can leave locks behind between reconnects too.
    pub fn with_janitor(mut self, janitor: SessionJanitor) -> Self {
        self.janitor = Some(janitor);
        self
    }

    /// Register the outbox so queued messages drain as soon as the link
    /// comes back, instead of waiting for the next periodic flush.
    pub fn attach_outbox(&self, outbox: Arc<Outbox>) {
        let _ = self.outbox.set(outbox);
    }

    pub fn status_handle(&self) -> StatusHandle {
        Arc::clone(&self.status)
    }

    pub async fn status(&self) -> TransportStatus {
        self.status.read().await.clone()
    }

    pub async fn start(&self) -> Result<()> {
        let mut attempt: u32 = 0;
        let mut ever_connected = false;

        loop {
            self.set_state(if ever_connected {
                ConnectionState::Reconnecting
            } else {
                ConnectionState::Connecting
            })
            .await;

            if let Some(janitor) = &self.janitor {
                if let Err(io_error) = janitor.prepare().await {
                    warn!(error = %io_error, "session cleanup failed, connecting anyway");
                }
            }

            if let Err(connect_error) = self.transport.connect().await {
                warn!(attempt, error = %connect_error, "transport connect failed");
                if !self.pause_before_retry(ever_connected, attempt).await {
                    warn!(
                        attempt,
                        "transport retries exhausted; continuing process without connection"
                    );
                    self.set_state(ConnectionState::Disconnected).await;
                    return Ok(());
                }
                attempt += 1;
                continue;
            }

            match self.pump().await {
                PumpExit::Closed => {
                    info!("transport event stream closed");
                    let _ = self.transport.disconnect().await;
                    self.set_state(ConnectionState::Disconnected).await;
                    return Ok(());
                }
                PumpExit::Lost { was_ready, reason, auth_failed } => {
                    if auth_failed {
                        error!(reason = %reason, "transport authentication failed; retrying with a clean session");
                        let _ = self.transport.disconnect().await;
                    } else {
                        warn!(reason = %reason, "transport connection lost");
                    }
                    if was_ready {
                        ever_connected = true;
                        attempt = 0;
                    } else {
                        attempt += 1;
                    }

                    if !self.pause_before_retry(ever_connected, attempt).await {
                        warn!("reconnect retries exhausted; staying disconnected");
                        self.set_state(ConnectionState::Disconnected).await;
                        return Ok(());
                    }
                }
            }
        }
    }

    /// Sleep out the backoff for this attempt. `false` means the policy has
    /// no more retries.
    async fn pause_before_retry(&self, ever_connected: bool, attempt: u32) -> bool {
        let delay = if ever_connected {
            self.reconnect.backoff(attempt)
        } else {
            self.startup.delay(attempt)
        };
        match delay {
            Some(delay) => {
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
                true
            }
            None => false,
        }
    }

    async fn pump(&self) -> PumpExit {
        let mut was_ready = false;

        loop {
            match self.transport.next_event().await {
                Ok(Some(TransportEvent::Up)) => {
                    info!("transport connection ready");
                    was_ready = true;
                    {
                        let mut status = self.status.write().await;
                        status.state = ConnectionState::Ready;
                        status.has_pending_auth_challenge = false;
                    }
                    // Messages that queued while the link was down.
                    if let Some(outbox) = self.outbox.get() {
                        outbox.flush().await;
                    }
                }
                Ok(Some(TransportEvent::AuthChallenge(challenge))) => {
                    info!(challenge_len = challenge.len(), "authentication challenge pending");
                    let mut status = self.status.write().await;
                    status.state = ConnectionState::AwaitingAuth;
                    status.has_pending_auth_challenge = true;
                }
                Ok(Some(TransportEvent::AuthFailed(reason))) => {
                    return PumpExit::Lost { was_ready, reason, auth_failed: true };
                }
                Ok(Some(TransportEvent::Down(reason))) => {
                    return PumpExit::Lost { was_ready, reason, auth_failed: false };
                }
                Ok(Some(TransportEvent::Inbound(message))) => {
                    if self.inbound_tx.send(message).await.is_err() {
                        warn!("inbound consumer dropped; closing transport loop");
                        return PumpExit::Closed;
                    }
                }
                Ok(None) => return PumpExit::Closed,
                Err(receive_error) => {
                    return PumpExit::Lost {
                        was_ready,
                        reason: receive_error.to_string(),
                        auth_failed: false,
                    };
                }
            }
        }
    }

    async fn set_state(&self, state: ConnectionState) {
        self.status.write().await.state = state;
    }
}
