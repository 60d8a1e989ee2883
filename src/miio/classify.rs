//! Turns decoded gateway messages into bus state.
//!
//! Replies to our own requests publish their status under the request's
//! topic. Everything else is a report: property dumps are flattened into one
//! topic per key, events are translated into ON/OFF style states.

use std::time::Instant;

use serde_json::{Map, Value};
use tracing::debug;

use crate::mqtt::StatePublisher;
use crate::state::{BridgeState, DeviceState};

use super::{PONG_METHOD, ProtocolMessage};

const DEFAULT_TOPIC: &str = "internal/";

/// Brightness and color packed into a reported `rgb` value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RgbReport {
    pub brightness: u8,
    pub color: u32,
}

/// The gateway reports `rgb` as `brightness << 24 | (color ^ brightness)`.
pub fn unpack_rgb(value: u32) -> RgbReport {
    let brightness = value >> 24;
    let xored = value & 0xFF_FFFF;
    RgbReport {
        brightness: brightness as u8,
        color: xored ^ brightness,
    }
}

/// Bus payload for a reported value: strings upper-cased, everything else
/// in its JSON form upper-cased.
fn state_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.to_uppercase(),
        other => other.to_string().to_uppercase(),
    }
}

/// Handle the datagram that arrived in the reply window of a request
/// published under `topic`.
pub fn handle_reply<P: StatePublisher + ?Sized>(
    topic: &str,
    messages: Vec<ProtocolMessage>,
    expects_state_publish: bool,
    state: &mut BridgeState,
    publisher: &P,
    now: Instant,
) {
    for message in messages.into_iter().rev() {
        debug!("Reply {:?} in window of {}", message.id, topic);
        if message.method.as_deref() == Some(PONG_METHOD) {
            state.liveness.record_pong(now);
            debug!("PONG: liveness refreshed");
        }

        let status = message.result.as_ref().and_then(|result| match result {
            Value::Array(items) => items.first(),
            Value::Null => None,
            other => Some(other),
        });

        match status {
            Some(status) if expects_state_publish => {
                publisher.publish(&format!("{topic}/state"), &state_string(status));
            }
            _ => handle_msg(&message, state, publisher),
        }
    }
}

/// Handle an unsolicited report.
pub fn handle_msg<P: StatePublisher + ?Sized>(
    message: &ProtocolMessage,
    state: &mut BridgeState,
    publisher: &P,
) {
    let Some(method) = message.method.as_deref() else {
        return;
    };
    let mut topic = match &message.sid {
        Some(sid) => format!("{sid}/"),
        None => DEFAULT_TOPIC.to_string(),
    };

    let flatten = match method {
        "props" if message.model.is_none() => {
            topic = DEFAULT_TOPIC.to_string();
            true
        }
        "props" | "_otc.log" => true,
        _ => false,
    };
    if flatten {
        match &message.params {
            Some(Value::Object(params)) => msg_params(&topic, params, &mut state.device, publisher),
            Some(other) => debug!("Ignoring non-object {} params: {}", method, other),
            None => {}
        }
    }

    if method.contains("event.") {
        msg_event(&topic, method, message.params.as_ref(), publisher);
    }
}

/// Publish every leaf of a property tree under `<topic><path>/state`.
pub fn msg_params<P: StatePublisher + ?Sized>(
    topic: &str,
    params: &Map<String, Value>,
    device: &mut DeviceState,
    publisher: &P,
) {
    for (key, value) in params {
        if let Value::Object(group) = value {
            msg_params(&format!("{topic}{key}/"), group, device, publisher);
            continue;
        }

        let packed = value.as_u64().and_then(|v| u32::try_from(v).ok());
        match (key.as_str(), packed) {
            ("rgb", Some(packed)) => {
                let report = unpack_rgb(packed);
                device.brightness = report.brightness;
                device.light_rgb = report.color;
                publisher.publish(&format!("{topic}rgb/state"), &format!("{:X}", report.color));
                publisher.publish(
                    &format!("{topic}rgb/brightness/state"),
                    &report.brightness.to_string(),
                );
            }
            _ => publisher.publish(&format!("{topic}{key}/state"), &state_string(value)),
        }
    }
}

/// Translate an `event.*` report into a state under `topic`.
pub fn msg_event<P: StatePublisher + ?Sized>(
    topic: &str,
    event: &str,
    params: Option<&Value>,
    publisher: &P,
) {
    let name = event.split_once("event.").map_or(event, |(_, name)| name);
    let mut topic = topic.to_string();

    let value = match name {
        "keepalive" => return,
        "motion" => "ON".to_string(),
        "no_motion" => "OFF".to_string(),
        "close" => "CLOSED".to_string(),
        "alarm" => {
            topic = "alarm/".to_string();
            match params.and_then(|p| p.get(0)) {
                Some(Value::String(s)) if s == "all_off" => "OFF".to_string(),
                Some(v) => state_string(v),
                None => {
                    debug!("Alarm event without a value, ignoring");
                    return;
                }
            }
        }
        other => other.to_uppercase(),
    };

    let has_params = match params {
        Some(Value::Array(items)) => !items.is_empty(),
        Some(Value::Object(map)) => !map.is_empty(),
        Some(Value::Null) | None => false,
        Some(_) => true,
    };
    if let Some(params) = params.filter(|_| has_params) {
        publisher.publish(&format!("{topic}params"), &params.to_string());
    }
    publisher.publish(&format!("{topic}state"), &value);
}
