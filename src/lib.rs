//! topicbus - a topic-multiplexed message bus over one WebSocket.
//!
//! Many logical conversations share a single duplex connection. Callers
//! publish a frame tagged with a topic and either wait for one reply on that
//! topic or subscribe to every future frame on it.
//!
//! # Architecture
//!
//! - **Connection** - owns the socket, lifecycle state and readiness
//! - **ReadinessWaiter** - queues sends until the connection opens
//! - **Registry** - subscription table (id -> topic, callback)
//! - **Router** - parses inbound frames and dispatches them to the registry
//! - **request** - one-shot request/response built on subscribe + send
//! - **Bus** - facade wiring the above together
//!
//! # Modules
//!
//! - [`bus`] - public entry point
//! - [`connection`] - connection manager
//! - [`frame`] - wire envelope
//! - [`config`] - configuration loading
//! - [`commands`] - CLI subcommands used by the `topicbus` binary

pub mod bus;
pub mod commands;
pub mod config;
pub mod connection;
pub mod error;
pub mod frame;
pub mod readiness;
pub mod registry;
pub mod request;
pub mod router;
pub mod ws;

pub use bus::{Bus, BusBuilder, WeakBus};
pub use config::BusConfig;
pub use connection::{CloseReason, Connection, ConnectionState};
pub use error::{BusError, FrameError};
pub use frame::{Frame, ParsePolicy};
pub use registry::{Registry, SubscriptionId};
pub use request::{Reply, ReplyStream};
