use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::error::{SignalError, SignalResult};
use crate::types::{ServerMessage, SubscriberId};

/// One connected endpoint: frames pushed here are pumped to its socket by a
/// writer task. A closed channel means the endpoint is gone.
struct Subscriber {
    tx: mpsc::UnboundedSender<String>,
}

/// The set of live broadcast endpoints.
///
/// Mutated by connect/disconnect events and delivery-failure pruning, read by
/// every broadcast; it carries its own lock, independent of any session
/// state. Broadcast sweeps run over a snapshot so membership changes never
/// race the iteration.
#[derive(Clone)]
pub struct SubscriberRegistry {
    inner: Arc<RwLock<HashMap<SubscriberId, Subscriber>>>,
}

impl SubscriberRegistry {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Add a subscriber and immediately deliver the given greeting (the
    /// session state_sync). If that first delivery fails the subscriber is
    /// removed again; it is never left half-registered.
    pub fn register(
        &self,
        id: SubscriberId,
        tx: mpsc::UnboundedSender<String>,
        greeting: &ServerMessage,
    ) -> SignalResult<()> {
        self.inner.write().insert(id, Subscriber { tx });
        if let Err(e) = self.send_to(id, greeting) {
            warn!("dropping subscriber {id}: greeting failed");
            self.unregister(id);
            return Err(e);
        }
        debug!("subscriber {id} registered ({} total)", self.len());
        Ok(())
    }

    /// Idempotent removal.
    pub fn unregister(&self, id: SubscriberId) {
        let removed = self.inner.write().remove(&id).is_some();
        if removed {
            debug!("subscriber {id} unregistered ({} total)", self.len());
        }
    }

    /// Deliver to a single subscriber, pruning it on failure.
    pub fn send_to(&self, id: SubscriberId, message: &ServerMessage) -> SignalResult<()> {
        let payload = serialize(message)?;
        let delivered = match self.inner.read().get(&id) {
            Some(sub) => sub.tx.send(payload).is_ok(),
            None => return Err(SignalError::Delivery(format!("unknown subscriber {id}"))),
        };
        if !delivered {
            self.unregister(id);
            return Err(SignalError::Delivery(format!("subscriber {id} went away")));
        }
        Ok(())
    }

    /// Serialize once and attempt delivery to every current subscriber.
    /// Failed subscribers are collected during the sweep and pruned after
    /// it; the sweep itself never mutates the set it walks. Returns the
    /// number of successful sends.
    pub fn broadcast(&self, message: &ServerMessage) -> usize {
        let payload = match serialize(message) {
            Ok(p) => p,
            Err(e) => {
                warn!("broadcast serialization failed: {e}");
                return 0;
            }
        };

        let targets: Vec<(SubscriberId, mpsc::UnboundedSender<String>)> = self
            .inner
            .read()
            .iter()
            .map(|(id, sub)| (*id, sub.tx.clone()))
            .collect();

        let mut dead = Vec::new();
        let mut sent = 0;
        for (id, tx) in targets {
            if tx.send(payload.clone()).is_ok() {
                sent += 1;
            } else {
                dead.push(id);
            }
        }

        for id in dead {
            warn!("pruning unreachable subscriber {id}");
            self.unregister(id);
        }
        sent
    }

    pub fn len(&self) -> usize {
        self.inner.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().is_empty()
    }
}

impl Default for SubscriberRegistry {
    fn default() -> Self {
        Self::new()
    }
}

fn serialize(message: &ServerMessage) -> SignalResult<String> {
    serde_json::to_string(message).map_err(|e| SignalError::Delivery(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn greeting() -> ServerMessage {
        ServerMessage::StateSync {
            is_recording: false,
            mode: "normal".to_string(),
        }
    }

    fn add_subscriber(registry: &SubscriberRegistry) -> mpsc::UnboundedReceiver<String> {
        let (tx, rx) = mpsc::unbounded_channel();
        registry.register(Uuid::new_v4(), tx, &greeting()).unwrap();
        rx
    }

    #[test]
    fn register_delivers_state_sync_first() {
        let registry = SubscriberRegistry::new();
        let mut rx = add_subscriber(&registry);
        let frame = rx.try_recv().unwrap();
        assert!(frame.contains(r#""type":"state_sync""#));
    }

    #[test]
    fn register_with_dead_endpoint_fails_and_leaves_no_trace() {
        let registry = SubscriberRegistry::new();
        let (tx, rx) = mpsc::unbounded_channel();
        drop(rx);
        let result = registry.register(Uuid::new_v4(), tx, &greeting());
        assert!(matches!(result, Err(SignalError::Delivery(_))));
        assert!(registry.is_empty());
    }

    #[test]
    fn broadcast_reaches_every_accepting_subscriber_without_churn() {
        let registry = SubscriberRegistry::new();
        let mut receivers: Vec<_> = (0..5).map(|_| add_subscriber(&registry)).collect();

        let sent = registry.broadcast(&ServerMessage::RecordingStarted);
        assert_eq!(sent, 5);
        assert_eq!(registry.len(), 5);
        for rx in &mut receivers {
            let _greeting = rx.try_recv().unwrap();
            let frame = rx.try_recv().unwrap();
            assert!(frame.contains("recording_started"));
        }
    }

    #[test]
    fn failed_delivery_prunes_only_the_dead_subscriber() {
        let registry = SubscriberRegistry::new();
        let mut alive = add_subscriber(&registry);
        let dead = add_subscriber(&registry);
        drop(dead);

        let sent = registry.broadcast(&ServerMessage::RecordingStopped);
        assert_eq!(sent, 1);
        assert_eq!(registry.len(), 1);

        // The survivor still received the message that killed its peer
        let _greeting = alive.try_recv().unwrap();
        assert!(alive.try_recv().unwrap().contains("recording_stopped"));

        // Next broadcast no longer attempts the pruned endpoint
        assert_eq!(registry.broadcast(&ServerMessage::RecordingStopped), 1);
    }

    #[test]
    fn unregister_is_idempotent() {
        let registry = SubscriberRegistry::new();
        let id = Uuid::new_v4();
        let (tx, _rx) = mpsc::unbounded_channel();
        registry.register(id, tx, &greeting()).unwrap();
        registry.unregister(id);
        registry.unregister(id);
        assert!(registry.is_empty());
    }
}
