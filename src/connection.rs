//! Connection manager.
//!
//! Owns the single WebSocket connection of a bus. A background task holds
//! both socket halves and is the only writer; handles talk to it through an
//! unbounded queue and observe its lifecycle through a `watch` channel.
//!
//! # Lifecycle
//!
//! ```text
//!   Connecting ──handshake ok──► Open
//!       │                         │
//!       └──── failure / close ────┴──► Closed   (terminal)
//! ```
//!
//! There is no reconnect. A closed connection stays closed; build a new one
//! to talk to the server again.
//!
//! # Handlers
//!
//! Exactly one message handler and one close handler can be set, both on the
//! [`ConnectionBuilder`]. The message handler runs on the connection task for
//! every inbound text frame, in arrival order. The close handler runs once,
//! after the state has become [`ConnectionState::Closed`].

// Rust guideline compliant 2026-02

use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;

use crate::error::BusError;
use crate::ws::{self, WsMessage, WsReader, WsWriter};

/// Lifecycle state of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Handshake in progress.
    Connecting,
    /// Ready to send and receive.
    Open,
    /// Closed for good.
    Closed,
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Connecting => write!(f, "connecting"),
            Self::Open => write!(f, "open"),
            Self::Closed => write!(f, "closed"),
        }
    }
}

/// Why a connection closed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseReason {
    /// WebSocket close code, if a close frame was exchanged.
    pub code: Option<u16>,
    /// Human-readable reason.
    pub reason: String,
}

impl CloseReason {
    fn new(code: Option<u16>, reason: impl Into<String>) -> Self {
        Self {
            code,
            reason: reason.into(),
        }
    }
}

impl std::fmt::Display for CloseReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.code {
            Some(code) => write!(f, "{} ({})", self.reason, code),
            None => write!(f, "{}", self.reason),
        }
    }
}

/// Inbound text frame handler.
pub type MessageHandler = Box<dyn FnMut(String) + Send>;

/// Close handler, invoked once.
pub type CloseHandler = Box<dyn FnOnce(CloseReason) + Send>;

/// Builder for [`Connection`].
pub struct ConnectionBuilder {
    endpoint: String,
    connect_timeout: Option<Duration>,
    on_message: Option<MessageHandler>,
    on_close: Option<CloseHandler>,
}

impl std::fmt::Debug for ConnectionBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionBuilder")
            .field("endpoint", &self.endpoint)
            .field("connect_timeout", &self.connect_timeout)
            .field("on_message", &self.on_message.is_some())
            .field("on_close", &self.on_close.is_some())
            .finish()
    }
}

impl ConnectionBuilder {
    /// Abort the handshake if it has not completed after `timeout`.
    #[must_use]
    pub fn connect_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Set the inbound message handler.
    #[must_use]
    pub fn on_message<F>(mut self, handler: F) -> Self
    where
        F: FnMut(String) + Send + 'static,
    {
        self.on_message = Some(Box::new(handler));
        self
    }

    /// Set the close handler.
    #[must_use]
    pub fn on_close<F>(mut self, handler: F) -> Self
    where
        F: FnOnce(CloseReason) + Send + 'static,
    {
        self.on_close = Some(Box::new(handler));
        self
    }

    /// Spawn the connection task and return a handle in the `Connecting`
    /// state.
    ///
    /// Must be called from within a tokio runtime. Connect failures are not
    /// returned here; they close the connection and reach the close handler.
    pub fn connect(self) -> Connection {
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(ConnectionState::Connecting);
        let cancel = CancellationToken::new();
        let endpoint = ws::normalize_endpoint(&self.endpoint);

        let task = ConnectionTask {
            endpoint: endpoint.clone(),
            connect_timeout: self.connect_timeout,
            state_tx,
            outbound_rx,
            cancel: cancel.clone(),
            on_message: self.on_message.unwrap_or_else(|| Box::new(|_| {})),
            on_close: self.on_close,
        };
        tokio::spawn(task.run());

        Connection {
            endpoint,
            outbound_tx,
            state_rx,
            cancel,
        }
    }
}

/// Handle to a bus connection.
///
/// Cheap to clone. The connection task exits when [`Connection::close`] is
/// called, when the server goes away, or when every handle is dropped.
#[derive(Debug, Clone)]
pub struct Connection {
    endpoint: String,
    outbound_tx: mpsc::UnboundedSender<String>,
    state_rx: watch::Receiver<ConnectionState>,
    cancel: CancellationToken,
}

impl Connection {
    /// Start building a connection to `endpoint`.
    #[must_use]
    pub fn builder(endpoint: impl Into<String>) -> ConnectionBuilder {
        ConnectionBuilder {
            endpoint: endpoint.into(),
            connect_timeout: None,
            on_message: None,
            on_close: None,
        }
    }

    /// Connect to `endpoint` without handlers.
    pub fn connect(endpoint: impl Into<String>) -> Self {
        Self::builder(endpoint).connect()
    }

    /// Normalized endpoint URL.
    #[must_use]
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        *self.state_rx.borrow()
    }

    /// Whether the connection can accept writes right now.
    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.state() == ConnectionState::Open
    }

    /// Transmit `text` if the connection is open; drop it otherwise.
    ///
    /// Use [`crate::readiness::ReadinessWaiter`] to defer sends instead.
    pub fn send_raw(&self, text: String) {
        if !self.is_ready() {
            log::debug!(
                "[connection] Dropping send while {} ({} bytes)",
                self.state(),
                text.len()
            );
            return;
        }
        if self.outbound_tx.send(text).is_err() {
            log::debug!("[connection] Dropping send, connection task has exited");
        }
    }

    /// Wait until the connection is open.
    ///
    /// # Errors
    ///
    /// Returns [`BusError::Closed`] if the connection closes first.
    pub async fn wait_ready(&self) -> Result<(), BusError> {
        let mut state_rx = self.state_rx.clone();
        let open = state_rx
            .wait_for(|state| *state != ConnectionState::Connecting)
            .await
            .is_ok_and(|state| *state == ConnectionState::Open);
        if open {
            Ok(())
        } else {
            Err(BusError::Closed)
        }
    }

    /// Resolve once the connection is closed.
    pub async fn closed(&self) {
        let mut state_rx = self.state_rx.clone();
        // A dropped sender means the task is gone, which is also closed.
        let _ = state_rx
            .wait_for(|state| *state == ConnectionState::Closed)
            .await;
    }

    /// Close the connection.
    ///
    /// Sends a close frame if the socket is open. Idempotent.
    pub fn close(&self) {
        self.cancel.cancel();
    }
}

/// Background task state.
struct ConnectionTask {
    endpoint: String,
    connect_timeout: Option<Duration>,
    state_tx: watch::Sender<ConnectionState>,
    outbound_rx: mpsc::UnboundedReceiver<String>,
    cancel: CancellationToken,
    on_message: MessageHandler,
    on_close: Option<CloseHandler>,
}

impl ConnectionTask {
    async fn run(mut self) {
        log::info!("[connection] Connecting to {}", self.endpoint);

        let handshake = Self::handshake(&self.endpoint, self.connect_timeout, &self.cancel);
        let reason = match handshake.await {
            Ok((mut writer, mut reader)) => {
                log::info!("[connection] WebSocket connected");
                self.state_tx.send_replace(ConnectionState::Open);
                self.message_loop(&mut writer, &mut reader).await
            }
            Err(reason) => {
                log::warn!("[connection] Connection to {} failed: {}", self.endpoint, reason);
                reason
            }
        };

        self.state_tx.send_replace(ConnectionState::Closed);
        log::info!("[connection] Closed: {}", reason);

        if let Some(on_close) = self.on_close.take() {
            on_close(reason);
        }
    }

    async fn handshake(
        endpoint: &str,
        connect_timeout: Option<Duration>,
        cancel: &CancellationToken,
    ) -> Result<(WsWriter, WsReader), CloseReason> {
        let connect = async {
            match connect_timeout {
                Some(timeout) => tokio::time::timeout(timeout, ws::connect(endpoint))
                    .await
                    .unwrap_or_else(|_| {
                        Err(anyhow::anyhow!(
                            "handshake timed out after {}s",
                            timeout.as_secs()
                        ))
                    }),
                None => ws::connect(endpoint).await,
            }
        };

        tokio::select! {
            () = cancel.cancelled() => Err(CloseReason::new(None, "closed before open")),
            result = connect => result.map_err(|e| CloseReason::new(None, format!("{e:#}"))),
        }
    }

    async fn message_loop(&mut self, writer: &mut WsWriter, reader: &mut WsReader) -> CloseReason {
        loop {
            tokio::select! {
                () = self.cancel.cancelled() => {
                    let _ = writer.close().await;
                    return CloseReason::new(Some(1000), "client requested close");
                }

                frame = reader.recv() => match frame {
                    Some(Ok(WsMessage::Text(text))) => (self.on_message)(text),
                    Some(Ok(WsMessage::Binary(data))) => {
                        (self.on_message)(String::from_utf8_lossy(&data).into_owned());
                    }
                    Some(Ok(WsMessage::Ping(data))) => {
                        let _ = writer.send_pong(data).await;
                    }
                    Some(Ok(WsMessage::Pong(_))) => {}
                    Some(Ok(WsMessage::Close { code, reason })) => {
                        log::info!("[connection] Connection closed by server");
                        return CloseReason::new(Some(code), reason);
                    }
                    Some(Err(e)) => {
                        log::warn!("[connection] WebSocket error: {}", e);
                        return CloseReason::new(Some(1006), format!("{e:#}"));
                    }
                    None => {
                        log::info!("[connection] WebSocket stream ended");
                        return CloseReason::new(Some(1006), "stream ended");
                    }
                },

                outgoing = self.outbound_rx.recv() => match outgoing {
                    Some(text) => {
                        if let Err(e) = writer.send_text(&text).await {
                            log::warn!("[connection] Send failed: {}", e);
                            return CloseReason::new(Some(1006), format!("{e:#}"));
                        }
                        log::trace!("[connection] Sent {} bytes", text.len());
                    }
                    None => {
                        // Every handle was dropped.
                        let _ = writer.close().await;
                        return CloseReason::new(Some(1000), "all handles dropped");
                    }
                },
            }
        }
    }
}
