use serde::Serialize;
use serde_json::Value;
use tracing::{debug, warn};

use crate::error::Result;

use super::{OutboundCommand, ProtocolMessage};

/// Request id the gateway reserves; never handed out.
const RESERVED_ID: u64 = 12345;
/// Ids wrap back to 1 past this value.
const MAX_ID: u64 = 999_999_999;

#[derive(Serialize)]
struct Request<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    id: Option<u64>,
    method: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    params: Option<&'a Value>,
}

/// Turns commands into datagrams and datagrams into messages.
#[derive(Debug, Default)]
pub struct Codec {
    last_id: u64,
}

impl Codec {
    pub fn new() -> Self {
        Self::default()
    }

    fn next_id(&mut self) -> u64 {
        let mut id = self.last_id + 1;
        if id == RESERVED_ID {
            id += 1;
        }
        if id > MAX_ID {
            id = 1;
        }
        self.last_id = id;
        id
    }

    /// Serialize a command to compact JSON, `id` first, returning the id
    /// the reply will carry alongside the datagram.
    ///
    /// Pings go out without an id; the gateway matches them by method name.
    pub fn encode(&mut self, command: &OutboundCommand) -> Result<(Option<u64>, Vec<u8>)> {
        let id = (!command.is_ping()).then(|| self.next_id());
        let request = Request {
            id,
            method: &command.method,
            params: command.params.as_ref(),
        };
        Ok((id, serde_json::to_vec(&request)?))
    }
}

/// Parse one datagram into the messages it carries, in order.
///
/// The gateway may glue several objects together without a separator and
/// may terminate the datagram with a NUL. Anything unparseable yields no
/// messages.
pub fn decode(data: &[u8]) -> Vec<ProtocolMessage> {
    let data = data.strip_suffix(&[0u8]).unwrap_or(data);
    let text = String::from_utf8_lossy(data);
    debug!("Received: {}", text);

    let repaired = format!("[{}]", text.replace("}{", "},{"));
    match serde_json::from_str::<Vec<ProtocolMessage>>(&repaired) {
        Ok(messages) => messages,
        Err(e) => {
            warn!("Bad JSON received ({}): {}", e, text);
            Vec::new()
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::miio::PING_METHOD;

    fn command(method: &str) -> OutboundCommand {
        OutboundCommand::new("alarm", method, None, true)
    }

    fn encoded_id(codec: &mut Codec) -> u64 {
        let (id, bytes) = codec.encode(&command("get_arming")).unwrap();
        let value: Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(value["id"].as_u64(), id);
        value["id"].as_u64().unwrap()
    }

    #[test]
    fn ids_increase_and_skip_reserved() {
        let mut codec = Codec { last_id: RESERVED_ID - 3 };
        let ids: Vec<u64> = (0..4).map(|_| encoded_id(&mut codec)).collect();
        assert_eq!(ids, vec![12343, 12344, 12346, 12347]);
    }

    #[test]
    fn ids_wrap_past_ceiling() {
        let mut codec = Codec { last_id: MAX_ID - 1 };
        assert_eq!(encoded_id(&mut codec), MAX_ID);
        assert_eq!(encoded_id(&mut codec), 1);
        assert_eq!(encoded_id(&mut codec), 2);
    }

    #[test]
    fn ping_consumes_no_id() {
        let mut codec = Codec::new();
        assert_eq!(encoded_id(&mut codec), 1);

        let (id, ping) = codec.encode(&command(PING_METHOD)).unwrap();
        assert_eq!(id, None);
        assert_eq!(ping, br#"{"method":"internal.PING"}"#);

        assert_eq!(encoded_id(&mut codec), 2);
    }

    #[test]
    fn encode_puts_id_first_and_keeps_params() {
        let mut codec = Codec::new();
        let cmd = OutboundCommand::new("sound/volume", "set_gateway_volume", Some(json!([40])), true);
        let (_, bytes) = codec.encode(&cmd).unwrap();
        assert_eq!(bytes, br#"{"id":1,"method":"set_gateway_volume","params":[40]}"#);
    }

    #[test]
    fn decode_splits_concatenated_objects() {
        let messages = decode(br#"{"a":1}{"b":2}"#);
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].extra.get("a"), Some(&json!(1)));
        assert!(messages[0].extra.get("b").is_none());
        assert_eq!(messages[1].extra.get("b"), Some(&json!(2)));
    }

    #[test]
    fn decode_strips_trailing_nul() {
        let messages = decode(b"{\"id\":7,\"result\":[\"ok\"]}\0");
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].id, Some(7));
        assert_eq!(messages[0].result, Some(json!(["ok"])));
    }

    #[test]
    fn decode_malformed_yields_nothing() {
        assert!(decode(b"not json at all").is_empty());
        assert!(decode(b"{\"id\":").is_empty());
        assert!(decode(&[0xff, 0xfe, 0x00]).is_empty());
    }

    #[test]
    fn decode_reads_report_fields() {
        let messages = decode(
            br#"{"method":"props","model":"lumi.sensor_motion","sid":"158d0001","params":{"battery":95}}"#,
        );
        let msg = &messages[0];
        assert_eq!(msg.method.as_deref(), Some("props"));
        assert_eq!(msg.sid.as_deref(), Some("158d0001"));
        assert!(msg.model.is_some());
        assert_eq!(msg.params, Some(json!({"battery": 95})));
    }
}
