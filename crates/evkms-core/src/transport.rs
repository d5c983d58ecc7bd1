//! Transport boundary: the abstract publish capability and a local bus
//!
//! The protocol core never talks to a broker directly. Every outbound
//! message goes through [`Publisher::publish`], a fire-and-forget send; every
//! inbound message is handed to the session by whatever loop owns the real
//! transport. [`LocalBus`] is an in-memory implementation with MQTT-style
//! `+` wildcard routing, used by the integration tests and the subset
//! simulation. A real broker client implements [`Publisher`] the same way
//! and feeds received messages into `DeviceSession::on_message`.

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::debug;

use crate::topics;

/// Fire-and-forget publish capability
///
/// Implementations must not block: the protocol handlers call this while
/// holding session state and expect it to return immediately.
pub trait Publisher: Send + Sync {
    /// Publish a UTF-8 JSON payload to a routing address
    fn publish(&self, topic: &str, payload: Vec<u8>);
}

/// A message delivered to a subscriber
#[derive(Debug, Clone)]
pub struct InboundMessage {
    /// The concrete topic the message was published on
    pub topic: String,
    /// Raw payload bytes
    pub payload: Vec<u8>,
}

struct Subscription {
    filters: Vec<String>,
    tx: mpsc::UnboundedSender<InboundMessage>,
}

/// In-memory pub/sub bus with single-level `+` wildcard filters
///
/// Published messages are queued per subscription; subscribers drain their
/// queue at their own pace, which keeps delivery non-reentrant with respect
/// to the publishing handler.
#[derive(Default)]
pub struct LocalBus {
    subscriptions: Mutex<Vec<Subscription>>,
}

impl LocalBus {
    /// Create a new bus
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Register a subscriber for a set of topic filters
    ///
    /// Returns the receive side of the subscriber's queue. Dropping the
    /// receiver unsubscribes; the dead entry is pruned on the next publish.
    pub fn subscribe(&self, filters: Vec<String>) -> mpsc::UnboundedReceiver<InboundMessage> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscriptions
            .lock()
            .push(Subscription { filters, tx });
        rx
    }
}

impl Publisher for LocalBus {
    fn publish(&self, topic: &str, payload: Vec<u8>) {
        let mut subs = self.subscriptions.lock();
        subs.retain(|sub| !sub.tx.is_closed());

        for sub in subs.iter() {
            if sub.filters.iter().any(|f| topics::matches(f, topic)) {
                let _ = sub.tx.send(InboundMessage {
                    topic: topic.to_string(),
                    payload: payload.clone(),
                });
            }
        }
        debug!(%topic, len = payload.len(), "Published message");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_routes_to_matching_filter() {
        let bus = LocalBus::new();
        let mut rx = bus.subscribe(vec!["iot_network/subsets/LR01/discovery".to_string()]);

        bus.publish("iot_network/subsets/LR01/discovery", b"hello".to_vec());

        let msg = rx.try_recv().unwrap();
        assert_eq!(msg.topic, "iot_network/subsets/LR01/discovery");
        assert_eq!(msg.payload, b"hello");
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_wildcard_filter_matches_any_gateway() {
        let bus = LocalBus::new();
        let mut rx = bus.subscribe(vec!["iot_network/+/devices/d@1/config".to_string()]);

        bus.publish("iot_network/gw-a/devices/d@1/config", b"1".to_vec());
        bus.publish("iot_network/gw-b/devices/d@1/config", b"2".to_vec());
        bus.publish("iot_network/gw-a/devices/d@2/config", b"3".to_vec());

        assert_eq!(rx.try_recv().unwrap().payload, b"1");
        assert_eq!(rx.try_recv().unwrap().payload, b"2");
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_multiple_subscribers_each_get_a_copy() {
        let bus = LocalBus::new();
        let mut rx1 = bus.subscribe(vec!["a/b".to_string()]);
        let mut rx2 = bus.subscribe(vec!["a/b".to_string()]);

        bus.publish("a/b", b"x".to_vec());

        assert!(rx1.try_recv().is_ok());
        assert!(rx2.try_recv().is_ok());
    }

    #[test]
    fn test_dropped_subscriber_is_pruned() {
        let bus = LocalBus::new();
        let rx = bus.subscribe(vec!["a/b".to_string()]);
        drop(rx);

        bus.publish("a/b", b"x".to_vec());
        assert!(bus.subscriptions.lock().is_empty());
    }
}
