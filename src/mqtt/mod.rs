pub mod client;

use tokio::sync::mpsc;
use tracing::warn;

/// A message received on one of the subscribed control topics.
pub struct MqttMessage {
    pub topic: String,
    pub payload: String,
}

/// A state value to publish, addressed by prefix-relative topic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateUpdate {
    pub topic: String,
    pub payload: String,
}

/// Outbound side of the bus as seen by the gateway core.
///
/// Publishing never blocks and never fails towards the caller; a lost
/// update is the bus client's problem, not the core's.
pub trait StatePublisher {
    fn publish(&self, topic: &str, payload: &str);
}

impl StatePublisher for mpsc::Sender<StateUpdate> {
    fn publish(&self, topic: &str, payload: &str) {
        let update = StateUpdate {
            topic: topic.to_string(),
            payload: payload.to_string(),
        };
        if let Err(e) = self.try_send(update) {
            warn!("Dropping state update for {}: {}", topic, e);
        }
    }
}
