//! Request/response on top of publish/subscribe.
//!
//! Replies are correlated by topic only, so every helper here subscribes
//! before it publishes:
//!
//! - [`request`] registers a single-fire subscription and publishes; the
//!   callback runs for the first reply and never again.
//! - [`call`] is the async form. Dropping its future removes the pending
//!   subscription, so wrapping it in `tokio::time::timeout` does not leak.
//! - [`ReplyStream`] collects every reply on a topic until the server sends
//!   an `end` frame.

use std::future::Future;
use std::pin::Pin;

use serde_json::Value;
use tokio::sync::{mpsc, oneshot};

use crate::error::BusError;
use crate::frame::{Frame, CODE_END, CODE_ERROR, CODE_PAYLOAD};
use crate::readiness::Publish;
use crate::registry::{Registry, SubscriptionId};

/// One reply frame, minus its topic.
#[derive(Debug, Clone, PartialEq)]
pub struct Reply {
    /// Status code as sent by the server.
    pub code: String,
    /// Reply payload.
    pub value: Value,
}

impl Reply {
    fn new(code: &str, value: &Value) -> Self {
        Self {
            code: code.to_string(),
            value: value.clone(),
        }
    }

    /// Normal payload delivery.
    #[must_use]
    pub fn is_payload(&self) -> bool {
        self.code == CODE_PAYLOAD
    }

    /// Server-side failure.
    #[must_use]
    pub fn is_error(&self) -> bool {
        self.code == CODE_ERROR
    }

    /// End of the replies for a command.
    #[must_use]
    pub fn is_end(&self) -> bool {
        self.code == CODE_END
    }

    /// The value as text: strings unquoted, anything else as JSON.
    #[must_use]
    pub fn value_text(&self) -> String {
        match &self.value {
            Value::String(s) => s.clone(),
            Value::Null => String::new(),
            other => other.to_string(),
        }
    }
}

/// Publish `message` on `topic` and run `callback` for the first reply.
///
/// The subscription is registered before the frame is published and is
/// removed by the registry before `callback` runs. If no reply ever arrives
/// the subscription stays until the returned id is unsubscribed.
pub fn request<P, F>(
    registry: &Registry,
    publisher: &P,
    topic: &str,
    message: impl Into<Value>,
    callback: F,
) -> SubscriptionId
where
    P: Publish + ?Sized,
    F: FnOnce(&str, &Value) + Send + 'static,
{
    let id = registry.subscribe_once(topic, move |_id, code, value| callback(code, value));
    publisher.publish(Frame::payload(topic, message));
    id
}

/// Publish `message` on `topic` and wait for the first reply.
///
/// `closed` should resolve when the connection closes.
///
/// # Errors
///
/// [`BusError::Closed`] if `closed` resolves first, [`BusError::Cancelled`]
/// if the subscription was removed by someone else.
pub async fn call<P, C>(
    registry: &Registry,
    publisher: &P,
    topic: &str,
    message: impl Into<Value>,
    closed: C,
) -> Result<Reply, BusError>
where
    P: Publish + ?Sized,
    C: Future<Output = ()>,
{
    let (reply_tx, reply_rx) = oneshot::channel();
    let id = request(registry, publisher, topic, message, move |code, value| {
        let _ = reply_tx.send(Reply::new(code, value));
    });
    let _guard = scopeguard::guard(registry.clone(), move |registry| {
        registry.unsubscribe(id);
    });

    tokio::select! {
        biased;
        reply = reply_rx => reply.map_err(|_dropped| BusError::Cancelled),
        () = closed => Err(BusError::Closed),
    }
}

/// Every reply to one command, in arrival order.
///
/// Ends at the first `end` frame or when the connection closes. Dropping the
/// stream unsubscribes.
///
/// The `end` frame only arrives here if the router accepted it. A server
/// that omits `value` on `end` needs [`crate::ParsePolicy::Lenient`]
/// (`accept_missing_value` in [`crate::BusConfig`]); otherwise the stream
/// runs until the connection closes.
pub struct ReplyStream {
    id: SubscriptionId,
    registry: Registry,
    replies: mpsc::UnboundedReceiver<Reply>,
    closed: Pin<Box<dyn Future<Output = ()> + Send>>,
    finished: bool,
}

impl std::fmt::Debug for ReplyStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReplyStream")
            .field("id", &self.id)
            .field("finished", &self.finished)
            .finish_non_exhaustive()
    }
}

impl ReplyStream {
    /// Subscribe to `topic`, then publish `message` on it.
    pub fn open<P, C>(
        registry: &Registry,
        publisher: &P,
        topic: &str,
        message: impl Into<Value>,
        closed: C,
    ) -> Self
    where
        P: Publish + ?Sized,
        C: Future<Output = ()> + Send + 'static,
    {
        let (reply_tx, replies) = mpsc::unbounded_channel();
        let id = registry.subscribe(topic, move |_id, code, value| {
            let _ = reply_tx.send(Reply::new(code, value));
        });
        publisher.publish(Frame::payload(topic, message));

        Self {
            id,
            registry: registry.clone(),
            replies,
            closed: Box::pin(closed),
            finished: false,
        }
    }

    /// Subscription backing this stream.
    #[must_use]
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    /// Next reply, or `None` once the command has ended or the connection
    /// has closed.
    pub async fn next(&mut self) -> Option<Reply> {
        if self.finished {
            return None;
        }

        let reply = tokio::select! {
            biased;
            reply = self.replies.recv() => reply,
            () = &mut self.closed => None,
        };

        match reply {
            Some(reply) if !reply.is_end() => Some(reply),
            _ => {
                self.finish();
                None
            }
        }
    }

    /// Drain the stream into a vector.
    pub async fn collect(mut self) -> Vec<Reply> {
        let mut replies = Vec::new();
        while let Some(reply) = self.next().await {
            replies.push(reply);
        }
        replies
    }

    fn finish(&mut self) {
        self.finished = true;
        self.registry.unsubscribe(self.id);
    }
}

impl Drop for ReplyStream {
    fn drop(&mut self) {
        self.registry.unsubscribe(self.id);
    }
}
