//! Long-lived per-network sessions.
//!
//! Each configured network gets one tokio task owning its connection. Input
//! sessions feed received lines, strictly in arrival order, to a
//! [`LineHandler`]; output sessions drain an mpsc queue of lines to deliver.
//! Both reconnect after a fixed delay until shutdown is signalled.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::broadcast::OutboundLine;
use crate::config::{NetworkConfig, SessionConfig};

/// Depth of each output session's delivery queue.
const OUTBOUND_QUEUE_DEPTH: usize = 256;

/// One message received from a channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IncomingLine {
    pub channel: String,
    /// Nick of the sender, stripped of host/user parts.
    pub nick: String,
    pub text: String,
}

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("connection failed: {0}")]
    Connect(String),

    #[error("connection lost: {0}")]
    Io(String),

    #[error("unsupported transport: {0}")]
    Unsupported(String),
}

/// Connects to one network and joins its configured channels.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn connect(
        &self,
        network: &NetworkConfig,
    ) -> Result<Box<dyn Connection>, TransportError>;
}

/// One established connection. `next_line` returning `Ok(None)` means the
/// peer closed the connection cleanly; the session reconnects either way.
#[async_trait]
pub trait Connection: Send {
    async fn next_line(&mut self) -> Result<Option<IncomingLine>, TransportError>;

    async fn send_line(&mut self, channel: &str, text: &str) -> Result<(), TransportError>;
}

/// Consumes received lines. The session awaits each call, so a handler sees
/// one network's lines strictly in arrival order.
#[async_trait]
pub trait LineHandler: Send + Sync {
    async fn handle(&self, network: &str, line: IncomingLine);
}

/// Spawns and stops the per-network session tasks.
pub struct SessionManager {
    transport: Arc<dyn Transport>,
    reconnect_delay: Duration,
    shutdown_tx: broadcast::Sender<()>,
}

impl SessionManager {
    pub fn new(transport: Arc<dyn Transport>, config: &SessionConfig) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        Self {
            transport,
            reconnect_delay: Duration::from_secs(config.reconnect_delay_secs),
            shutdown_tx,
        }
    }

    /// Signal every session to stop. In-flight line handling finishes; no
    /// further reconnects are attempted.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
    }

    /// Shutdown receiver for auxiliary workers sharing the session lifecycle.
    pub fn subscribe_shutdown(&self) -> broadcast::Receiver<()> {
        self.shutdown_tx.subscribe()
    }

    /// Spawn the receive loop for one input network.
    pub fn spawn_input_session(
        &self,
        network: NetworkConfig,
        handler: Arc<dyn LineHandler>,
    ) -> JoinHandle<()> {
        let transport = Arc::clone(&self.transport);
        let reconnect_delay = self.reconnect_delay;
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        tokio::spawn(async move {
            info!(network = %network.name, "input session started");
            loop {
                match transport.connect(&network).await {
                    Ok(mut conn) => {
                        info!(network = %network.name, "connected");
                        loop {
                            tokio::select! {
                                _ = shutdown_rx.recv() => {
                                    info!(network = %network.name, "input session shutting down");
                                    return;
                                }
                                line = conn.next_line() => match line {
                                    Ok(Some(line)) => handler.handle(&network.name, line).await,
                                    Ok(None) => {
                                        warn!(network = %network.name, "connection closed");
                                        break;
                                    }
                                    Err(e) => {
                                        warn!(network = %network.name, "receive failed: {e}");
                                        break;
                                    }
                                }
                            }
                        }
                    }
                    Err(e) => {
                        warn!(network = %network.name, "connect failed: {e}");
                    }
                }

                tokio::select! {
                    _ = shutdown_rx.recv() => {
                        info!(network = %network.name, "input session shutting down");
                        return;
                    }
                    _ = tokio::time::sleep(reconnect_delay) => {
                        debug!(network = %network.name, "reconnecting");
                    }
                }
            }
        })
    }

    /// Spawn the delivery loop for one output network. Returns the sender the
    /// broadcaster queues lines into.
    pub fn spawn_output_session(
        &self,
        network: NetworkConfig,
    ) -> (mpsc::Sender<OutboundLine>, JoinHandle<()>) {
        let (tx, mut rx) = mpsc::channel::<OutboundLine>(OUTBOUND_QUEUE_DEPTH);
        let transport = Arc::clone(&self.transport);
        let reconnect_delay = self.reconnect_delay;
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        let handle = tokio::spawn(async move {
            info!(network = %network.name, "output session started");
            loop {
                match transport.connect(&network).await {
                    Ok(mut conn) => {
                        info!(network = %network.name, "connected");
                        loop {
                            tokio::select! {
                                _ = shutdown_rx.recv() => {
                                    info!(network = %network.name, "output session shutting down");
                                    return;
                                }
                                line = rx.recv() => match line {
                                    Some(line) => {
                                        if let Err(e) =
                                            conn.send_line(&line.channel, &line.text).await
                                        {
                                            // The line is lost; events are not replayed.
                                            warn!(
                                                network = %network.name,
                                                channel = %line.channel,
                                                "send failed, dropping line: {e}"
                                            );
                                            break;
                                        }
                                    }
                                    None => {
                                        info!(network = %network.name, "outbound queue closed");
                                        return;
                                    }
                                }
                            }
                        }
                    }
                    Err(e) => {
                        warn!(network = %network.name, "connect failed: {e}");
                    }
                }

                tokio::select! {
                    _ = shutdown_rx.recv() => {
                        info!(network = %network.name, "output session shutting down");
                        return;
                    }
                    _ = tokio::time::sleep(reconnect_delay) => {
                        debug!(network = %network.name, "reconnecting");
                    }
                }
            }
        });

        (tx, handle)
    }
}
