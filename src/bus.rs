//! Bus facade.
//!
//! Wires one [`Connection`], one [`Registry`], one [`Router`] and one
//! [`ReadinessWaiter`] together:
//!
//! ```text
//!   subscribe / request ──► Registry ◄── Router ◄── Connection (inbound)
//!   send / request ──► ReadinessWaiter ──► Connection (outbound)
//! ```
//!
//! # Usage
//!
//! ```ignore
//! let bus = Bus::builder(BusConfig::default())
//!     .on_close(|reason| log::warn!("bus closed: {reason}"))
//!     .connect();
//!
//! bus.subscribe("service-gameap-status", |id, code, value| {
//!     println!("{id}: {code} {value}");
//! });
//!
//! let reply = bus.call("node-info", "node-info").await?;
//! ```
//!
//! # Handles inside callbacks
//!
//! The connection closes when the last [`Bus`] handle is dropped. A callback
//! that needs the bus should capture a [`WeakBus`] from [`Bus::downgrade`];
//! a strong clone stored in the registry would keep the connection open
//! until [`Bus::close`] is called.

// Rust guideline compliant 2026-02

use std::sync::{Arc, Weak};

use serde_json::Value;

use crate::config::BusConfig;
use crate::connection::{CloseReason, Connection, ConnectionState};
use crate::error::BusError;
use crate::frame::Frame;
use crate::readiness::{Publish, ReadinessWaiter};
use crate::registry::{Registry, SubscriptionId};
use crate::request::{self, Reply, ReplyStream};
use crate::router::Router;

/// Topic the server treats as a shutdown request.
pub const EXIT_TOPIC: &str = "exit";

/// Builder for [`Bus`].
pub struct BusBuilder {
    config: BusConfig,
    on_close: Option<Box<dyn FnOnce(CloseReason) + Send>>,
}

impl std::fmt::Debug for BusBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BusBuilder")
            .field("config", &self.config)
            .field("on_close", &self.on_close.is_some())
            .finish()
    }
}

impl BusBuilder {
    /// Set the handler invoked once when the connection closes.
    #[must_use]
    pub fn on_close<F>(mut self, handler: F) -> Self
    where
        F: FnOnce(CloseReason) + Send + 'static,
    {
        self.on_close = Some(Box::new(handler));
        self
    }

    /// Start connecting and return the bus.
    ///
    /// Must be called from within a tokio runtime. The bus is usable at once;
    /// sends issued before the handshake completes are queued.
    pub fn connect(self) -> Bus {
        let registry = Registry::new();
        let router = Router::new(registry.clone(), self.config.parse_policy());

        let mut builder = Connection::builder(self.config.endpoint.clone())
            .connect_timeout(self.config.connect_timeout())
            .on_message(move |text| {
                router.route(&text);
            });
        if let Some(on_close) = self.on_close {
            builder = builder.on_close(on_close);
        }
        let connection = builder.connect();

        log::debug!("[bus] Created bus for {}", connection.endpoint());

        Bus {
            inner: Arc::new(BusInner {
                waiter: ReadinessWaiter::new(connection.clone()),
                connection,
                registry,
            }),
        }
    }
}

#[derive(Debug)]
struct BusInner {
    connection: Connection,
    registry: Registry,
    waiter: ReadinessWaiter,
}

impl Drop for BusInner {
    fn drop(&mut self) {
        log::debug!("[bus] Last handle dropped, closing {}", self.connection.endpoint());
        self.connection.close();
    }
}

/// Topic-multiplexed message bus over one connection.
///
/// Cheap to clone; clones share the connection and the registry. Dropping
/// the last clone closes the connection.
#[derive(Debug, Clone)]
pub struct Bus {
    inner: Arc<BusInner>,
}

/// Non-owning handle to a [`Bus`].
///
/// Does not keep the connection open. Meant to be captured by callbacks that
/// send or subscribe from inside dispatch.
#[derive(Debug, Clone)]
pub struct WeakBus {
    inner: Weak<BusInner>,
}

impl WeakBus {
    /// The bus, if any strong handle is still alive.
    #[must_use]
    pub fn upgrade(&self) -> Option<Bus> {
        self.inner.upgrade().map(|inner| Bus { inner })
    }
}

impl Bus {
    /// Start building a bus.
    #[must_use]
    pub fn builder(config: BusConfig) -> BusBuilder {
        BusBuilder {
            config,
            on_close: None,
        }
    }

    /// Connect with `config` and no close handler.
    pub fn connect(config: BusConfig) -> Self {
        Self::builder(config).connect()
    }

    /// Non-owning handle for use inside callbacks.
    #[must_use]
    pub fn downgrade(&self) -> WeakBus {
        WeakBus {
            inner: Arc::downgrade(&self.inner),
        }
    }

    /// Register `callback` for every frame on `topic`.
    pub fn subscribe<F>(&self, topic: impl Into<String>, callback: F) -> SubscriptionId
    where
        F: Fn(SubscriptionId, &str, &Value) + Send + Sync + 'static,
    {
        self.inner.registry.subscribe(topic, callback)
    }

    /// Remove a subscription. Unknown ids are ignored.
    pub fn unsubscribe(&self, id: SubscriptionId) {
        self.inner.registry.unsubscribe(id);
    }

    /// Publish a payload frame, deferring it until the connection is open.
    pub fn send(&self, topic: &str, message: impl Into<Value>) {
        self.inner.waiter.publish(Frame::payload(topic, message));
    }

    /// Publish `message` and run `callback` for the first reply on `topic`.
    pub fn request<F>(&self, topic: &str, message: impl Into<Value>, callback: F) -> SubscriptionId
    where
        F: FnOnce(&str, &Value) + Send + 'static,
    {
        request::request(&self.inner.registry, &self.inner.waiter, topic, message, callback)
    }

    /// Publish `message` and wait for the first reply on `topic`.
    ///
    /// # Errors
    ///
    /// [`BusError::Closed`] if the connection closes before a reply arrives.
    pub async fn call(&self, topic: &str, message: impl Into<Value>) -> Result<Reply, BusError> {
        request::call(
            &self.inner.registry,
            &self.inner.waiter,
            topic,
            message,
            self.inner.connection.closed(),
        )
        .await
    }

    /// Publish `message` and stream every reply on `topic` until `end`.
    ///
    /// gameapctl sends `end` frames without a `value` field. Under the
    /// default [`crate::ParsePolicy::Strict`] those frames are dropped as
    /// malformed and the stream only finishes when the connection closes; set
    /// [`BusConfig::accept_missing_value`] when talking to that server.
    pub fn stream(&self, topic: &str, message: impl Into<Value>) -> ReplyStream {
        let connection = self.inner.connection.clone();
        ReplyStream::open(&self.inner.registry, &self.inner.waiter, topic, message, async move {
            connection.closed().await;
        })
    }

    /// Ask the server to close the connection.
    pub fn exit(&self) {
        self.send(EXIT_TOPIC, Value::Null);
    }

    /// Current connection state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.inner.connection.state()
    }

    /// Whether the connection is open.
    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.inner.connection.is_ready()
    }

    /// Wait until the connection is open.
    ///
    /// # Errors
    ///
    /// [`BusError::Closed`] if it closes first.
    pub async fn wait_ready(&self) -> Result<(), BusError> {
        self.inner.connection.wait_ready().await
    }

    /// Resolve once the connection has closed.
    pub async fn closed(&self) {
        self.inner.connection.closed().await;
    }

    /// Close the connection.
    pub fn close(&self) {
        self.inner.connection.close();
    }

    /// The subscription registry of this bus.
    #[must_use]
    pub fn registry(&self) -> &Registry {
        &self.inner.registry
    }

    /// The underlying connection.
    #[must_use]
    pub fn connection(&self) -> &Connection {
        &self.inner.connection
    }
}
