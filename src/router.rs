//! Message router.
//!
//! The single fan-in point for inbound frames: parse, validate, hand to the
//! registry. Malformed frames are logged and dropped here so they never reach
//! a subscriber.

use crate::frame::{Frame, ParsePolicy};
use crate::registry::Registry;

/// What happened to one inbound frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteOutcome {
    /// Delivered to this many subscribers.
    Delivered(usize),
    /// Well-formed, but nobody subscribes to its topic.
    Unmatched,
    /// Not a valid envelope; dropped.
    Malformed,
}

/// Routes inbound text frames into a [`Registry`].
#[derive(Debug, Clone)]
pub struct Router {
    registry: Registry,
    policy: ParsePolicy,
}

impl Router {
    /// Create a router over `registry`.
    #[must_use]
    pub fn new(registry: Registry, policy: ParsePolicy) -> Self {
        Self { registry, policy }
    }

    /// Parse `text` and dispatch it.
    pub fn route(&self, text: &str) -> RouteOutcome {
        let frame = match Frame::parse(text, self.policy) {
            Ok(frame) => frame,
            Err(e) => {
                log::warn!(
                    "[router] Dropping malformed frame ({}): {}",
                    e,
                    &text[..floor_char_boundary(text, 100)]
                );
                return RouteOutcome::Malformed;
            }
        };

        match self.registry.dispatch(&frame) {
            0 => {
                log::trace!("[router] No subscriber for topic '{}'", frame.topic);
                RouteOutcome::Unmatched
            }
            n => {
                log::trace!(
                    "[router] Delivered '{}' ({}) to {} subscriber(s)",
                    frame.topic,
                    frame.code,
                    n
                );
                RouteOutcome::Delivered(n)
            }
        }
    }
}

/// Largest index `<= max` that lies on a char boundary of `text`.
fn floor_char_boundary(text: &str, max: usize) -> usize {
    if max >= text.len() {
        return text.len();
    }
    (0..=max).rev().find(|&i| text.is_char_boundary(i)).unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};
    use std::sync::{Arc, Mutex};

    type Seen = Arc<Mutex<Vec<(String, Value)>>>;

    fn recording(registry: &Registry, topic: &str) -> Seen {
        let seen: Seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        registry.subscribe(topic, move |_, code, value| {
            sink.lock().unwrap().push((code.to_string(), value.clone()));
        });
        seen
    }

    #[test]
    fn test_routes_service_status_frame() {
        let registry = Registry::new();
        let seen = recording(&registry, "service-status gameap");
        let router = Router::new(registry, ParsePolicy::Strict);

        let outcome = router
            .route(r#"{"topic":"service-status gameap","code":"payload","value":"running"}"#);

        assert_eq!(outcome, RouteOutcome::Delivered(1));
        assert_eq!(
            *seen.lock().unwrap(),
            vec![("payload".to_string(), json!("running"))]
        );
    }

    #[test]
    fn test_malformed_frame_does_not_disturb_other_topics() {
        let registry = Registry::new();
        let seen = recording(&registry, "node-info");
        let router = Router::new(registry, ParsePolicy::Strict);

        assert_eq!(
            router.route(r#"{"code":"payload","value":"x"}"#),
            RouteOutcome::Malformed
        );
        assert_eq!(router.route("garbage"), RouteOutcome::Malformed);
        assert!(seen.lock().unwrap().is_empty());

        assert_eq!(
            router.route(r#"{"topic":"node-info","code":"payload","value":"ok"}"#),
            RouteOutcome::Delivered(1)
        );
        assert_eq!(seen.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_error_code_forwarded_literally() {
        let registry = Registry::new();
        let seen = recording(&registry, "gameap-install");
        let router = Router::new(registry, ParsePolicy::Lenient);

        router.route(r#"{"topic":"gameap-install","code":"error","value":"disk full"}"#);
        router.route(r#"{"topic":"gameap-install","code":"end"}"#);

        assert_eq!(
            *seen.lock().unwrap(),
            vec![
                ("error".to_string(), json!("disk full")),
                ("end".to_string(), Value::Null),
            ]
        );
    }

    #[test]
    fn test_unmatched_topic_is_not_an_error() {
        let router = Router::new(Registry::new(), ParsePolicy::Strict);
        assert_eq!(
            router.route(r#"{"topic":"nobody","code":"payload","value":1}"#),
            RouteOutcome::Unmatched
        );
    }

    #[test]
    fn test_floor_char_boundary_handles_multibyte() {
        let text = "ééé";
        assert_eq!(floor_char_boundary(text, 3), 2);
        assert_eq!(floor_char_boundary(text, 100), text.len());
    }
}
