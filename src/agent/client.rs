//! Agent WebSocket client
//!
//! Keeps one agent connected to the coordinator's `/ws/agent/{id}` endpoint
//! and bridges it to an `AgentWorker`. The worker outlives connections: on
//! reconnect the coordinator pushes a `resync` payload that rebuilds its
//! motion state. Reports produced while disconnected are dropped.

use futures_util::{SinkExt, StreamExt};
use rand::Rng;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tokio::time::interval;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, error, info, warn};
use url::Url;

use super::worker::AgentWorker;
use crate::config::AgentConfig;
use crate::coordinator::{AgentMessage, CoordinatorMessage};
use crate::error::{FieldError, Result};

/// How often to send ping frames
const PING_INTERVAL_SECS: u64 = 30;

/// Connection attempt timeout
const CONNECT_TIMEOUT_SECS: u64 = 10;

/// Worker channel capacity in each direction
const CHANNEL_CAPACITY: usize = 64;

/// Why a connection ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SessionEnd {
    /// Remote closed or stream ended; reconnect
    Closed,
    /// Local shutdown or worker gone; stop
    Stopped,
}

/// Exponential backoff: `base * 2^(attempt-1)`, capped at `max`
pub fn backoff_delay(base: Duration, max: Duration, attempt: u32) -> Duration {
    let exp = attempt.saturating_sub(1).min(16);
    base.saturating_mul(1u32 << exp).min(max)
}

pub struct AgentClient {
    agent_id: String,
    config: AgentConfig,
}

impl AgentClient {
    pub fn new(agent_id: impl Into<String>, config: AgentConfig) -> Self {
        Self {
            agent_id: agent_id.into(),
            config,
        }
    }

    /// Agent control-channel URL
    pub fn endpoint(&self) -> Result<Url> {
        let base = Url::parse(&self.config.coordinator_url)?;
        Ok(base.join(&format!("/ws/agent/{}", self.agent_id))?)
    }

    /// Run the worker and keep it connected until shutdown
    pub async fn run(self, worker: AgentWorker, mut shutdown_rx: broadcast::Receiver<()>) -> Result<()> {
        let url = self.endpoint()?;
        let (inbound_tx, inbound_rx) = mpsc::channel(CHANNEL_CAPACITY);
        let (outbound_tx, mut outbound_rx) = mpsc::channel(CHANNEL_CAPACITY);

        let worker_task = tokio::spawn(worker.run(inbound_rx, outbound_tx, shutdown_rx.resubscribe()));

        let base = Duration::from_millis(self.config.reconnect_delay_ms.max(1));
        let max = Duration::from_millis(self.config.max_reconnect_delay_ms.max(1));
        let mut attempt: u32 = 0;

        info!(agent_id = %self.agent_id, %url, "agent client starting");

        loop {
            match self
                .connect_and_stream(&url, &inbound_tx, &mut outbound_rx, &mut shutdown_rx, &mut attempt)
                .await
            {
                Ok(SessionEnd::Stopped) => break,
                Ok(SessionEnd::Closed) => {
                    info!(agent_id = %self.agent_id, "coordinator connection closed");
                }
                Err(e) => {
                    error!(agent_id = %self.agent_id, attempt, error = %e, "coordinator connection error");
                }
            }

            attempt += 1;
            let delay = backoff_delay(base, max, attempt);
            // Add jitter: up to +25%
            let jitter_ms = rand::thread_rng().gen_range(0..=(delay.as_millis() as u64 / 4));
            let final_delay = delay + Duration::from_millis(jitter_ms);

            info!(agent_id = %self.agent_id, ?final_delay, attempt, "reconnecting");
            tokio::select! {
                _ = tokio::time::sleep(final_delay) => {}
                _ = shutdown_rx.recv() => break,
            }

            let dropped = Self::drain(&mut outbound_rx);
            if dropped > 0 {
                warn!(agent_id = %self.agent_id, dropped, "dropped messages produced while disconnected");
            }
        }

        drop(inbound_tx);
        match worker_task.await {
            Ok(result) => result,
            Err(e) => Err(FieldError::Internal(format!("agent worker panicked: {}", e))),
        }
    }

    fn drain(outbound_rx: &mut mpsc::Receiver<AgentMessage>) -> usize {
        let mut dropped = 0;
        while outbound_rx.try_recv().is_ok() {
            dropped += 1;
        }
        dropped
    }

    async fn connect_and_stream(
        &self,
        url: &Url,
        inbound_tx: &mpsc::Sender<CoordinatorMessage>,
        outbound_rx: &mut mpsc::Receiver<AgentMessage>,
        shutdown_rx: &mut broadcast::Receiver<()>,
        attempt: &mut u32,
    ) -> Result<SessionEnd> {
        debug!(agent_id = %self.agent_id, %url, "connecting to coordinator");

        let (ws_stream, _) = tokio::time::timeout(
            Duration::from_secs(CONNECT_TIMEOUT_SECS),
            connect_async(url.as_str()),
        )
        .await
        .map_err(|_| FieldError::Internal("coordinator connection timeout".to_string()))?
        .map_err(FieldError::WebSocket)?;

        info!(agent_id = %self.agent_id, "connected to coordinator");
        *attempt = 0;

        // Anything queued before this connection predates the resync
        Self::drain(outbound_rx);

        let (mut write, mut read) = ws_stream.split();
        let mut ping_interval = interval(Duration::from_secs(PING_INTERVAL_SECS));

        loop {
            tokio::select! {
                msg = read.next() => {
                    match msg {
                        Some(Ok(Message::Text(text))) => {
                            match serde_json::from_str::<CoordinatorMessage>(&text) {
                                Ok(message) => {
                                    if inbound_tx.send(message).await.is_err() {
                                        return Ok(SessionEnd::Stopped);
                                    }
                                }
                                Err(e) => {
                                    warn!(agent_id = %self.agent_id, error = %e, "unparseable coordinator message");
                                }
                            }
                        }
                        Some(Ok(Message::Ping(data))) => {
                            write.send(Message::Pong(data)).await?;
                        }
                        Some(Ok(Message::Close(_))) | None => {
                            return Ok(SessionEnd::Closed);
                        }
                        Some(Err(e)) => {
                            return Err(FieldError::WebSocket(e));
                        }
                        _ => {}
                    }
                }

                out = outbound_rx.recv() => {
                    let Some(message) = out else {
                        let _ = write.send(Message::Close(None)).await;
                        return Ok(SessionEnd::Stopped);
                    };
                    let text = serde_json::to_string(&message)?;
                    write.send(Message::Text(text)).await?;
                }

                _ = ping_interval.tick() => {
                    write.send(Message::Ping(vec![])).await?;
                }

                _ = shutdown_rx.recv() => {
                    info!(agent_id = %self.agent_id, "agent client: shutdown signal received");
                    let _ = write.send(Message::Close(None)).await;
                    return Ok(SessionEnd::Stopped);
                }
            }
        }
    }
}
