pub mod classify;
pub mod client;
pub mod codec;
pub mod commands;

use std::time::Duration;

use serde::Deserialize;
use serde_json::{Map, Value};

/// Method name of the liveness request. Sent without an id.
pub const PING_METHOD: &str = "internal.PING";
/// Method name the gateway answers a ping with.
pub const PONG_METHOD: &str = "internal.PONG";

/// Largest datagram the gateway has been seen to send.
pub const DATAGRAM_MAX_LEN: usize = 1480;

/// How long to wait for the reply to a request.
pub const REPLY_TIMEOUT: Duration = Duration::from_secs(2);
/// How long to wait for unsolicited reports when nothing is queued.
pub const IDLE_RECV_TIMEOUT: Duration = Duration::from_secs(1);
pub const PING_INTERVAL: Duration = Duration::from_secs(200);
/// The gateway counts as offline once no pong was seen for this long.
pub const PONG_TIMEOUT: Duration = Duration::from_secs(300);

/// A request for the gateway, built from a bus command.
#[derive(Debug, Clone, PartialEq)]
pub struct OutboundCommand {
    /// Bus topic (prefix-relative) the reply state is published under.
    pub topic: String,
    pub method: String,
    pub params: Option<Value>,
    /// Publish the first reply result element to `<topic>/state`.
    pub expects_state_publish: bool,
}

impl OutboundCommand {
    pub fn new(topic: &str, method: &str, params: Option<Value>, expects_state_publish: bool) -> Self {
        Self {
            topic: topic.to_string(),
            method: method.to_string(),
            params,
            expects_state_publish,
        }
    }

    pub fn is_ping(&self) -> bool {
        self.method == PING_METHOD
    }
}

/// One decoded JSON object from a gateway datagram.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ProtocolMessage {
    pub id: Option<u64>,
    pub method: Option<String>,
    pub params: Option<Value>,
    pub result: Option<Value>,
    /// Sub-device id, used as the base topic of its reports.
    pub sid: Option<String>,
    /// Present on reports coming from a sub-device.
    pub model: Option<Value>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}
