//! Readiness waiter.
//!
//! Defers outbound frames until the connection is open. Frames sent while the
//! connection is still connecting are queued and flushed in FIFO order by a
//! single task that awaits the connection's open event. Once the queue is
//! empty and the connection is open, sends go straight to the socket.
//!
//! Nothing here blocks the caller, and there is no retry cap while the
//! connection is connecting. If it closes instead of opening, the queue is
//! dropped with a warning.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use crate::connection::Connection;
use crate::frame::Frame;

/// Something that accepts outbound frames.
///
/// The request helpers publish through this seam so they can be exercised
/// without a socket.
pub trait Publish {
    /// Queue `frame` for transmission.
    fn publish(&self, frame: Frame);
}

#[derive(Debug, Default)]
struct Pending {
    frames: VecDeque<String>,
    flushing: bool,
}

/// Send-when-ready front end for a [`Connection`].
#[derive(Debug, Clone)]
pub struct ReadinessWaiter {
    connection: Connection,
    pending: Arc<Mutex<Pending>>,
}

impl ReadinessWaiter {
    /// Wrap `connection`.
    #[must_use]
    pub fn new(connection: Connection) -> Self {
        Self {
            connection,
            pending: Arc::new(Mutex::new(Pending::default())),
        }
    }

    /// Number of frames waiting for the connection to open.
    #[must_use]
    pub fn queued(&self) -> usize {
        self.pending
            .lock()
            .expect("Pending mutex poisoned")
            .frames
            .len()
    }

    /// Transmit `text` now if possible, otherwise once the connection opens.
    ///
    /// Must be called from within a tokio runtime.
    pub fn send_when_ready(&self, text: String) {
        let mut pending = self.pending.lock().expect("Pending mutex poisoned");

        if !pending.flushing && self.connection.is_ready() {
            self.connection.send_raw(text);
            return;
        }

        pending.frames.push_back(text);
        log::debug!(
            "[readiness] Queued send until connection is open ({} pending)",
            pending.frames.len()
        );

        if !pending.flushing {
            pending.flushing = true;
            tokio::spawn(flush(self.connection.clone(), Arc::clone(&self.pending)));
        }
    }
}

impl Publish for ReadinessWaiter {
    fn publish(&self, frame: Frame) {
        match frame.to_text() {
            Ok(text) => self.send_when_ready(text),
            Err(e) => log::error!("[readiness] Dropping frame for '{}': {}", frame.topic, e),
        }
    }
}

async fn flush(connection: Connection, pending: Arc<Mutex<Pending>>) {
    let ready = connection.wait_ready().await.is_ok();

    loop {
        let next = {
            let mut pending = pending.lock().expect("Pending mutex poisoned");
            if let Some(text) = pending.frames.pop_front() {
                text
            } else {
                pending.flushing = false;
                return;
            }
        };

        if ready {
            connection.send_raw(next);
        } else {
            log::warn!(
                "[readiness] Connection closed before opening, dropping queued send ({} bytes)",
                next.len()
            );
        }
    }
}
