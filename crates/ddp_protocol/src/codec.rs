//! JSON text codec.

use crate::error::{ProtocolError, ProtocolResult};
use crate::messages::{ClientMessage, ServerMessage};
use serde::Serialize;
use serde_json::Value;

/// Encodes a message as a JSON text frame.
pub fn encode<M: Serialize>(message: &M) -> ProtocolResult<String> {
    serde_json::to_string(message).map_err(|e| ProtocolError::encode(e.to_string()))
}

/// Decodes a frame received from the server.
///
/// Frames that are JSON objects without a `msg` field (such as the
/// `server_id` greeting) decode to [`ServerMessage::Unknown`].
pub fn decode_server(frame: &str) -> ProtocolResult<ServerMessage> {
    let value = parse_object(frame)?;
    if value.get("msg").is_none() {
        return Ok(ServerMessage::Unknown);
    }
    serde_json::from_value(value).map_err(|e| ProtocolError::malformed(e.to_string()))
}

/// Decodes a frame sent by a client.
pub fn decode_client(frame: &str) -> ProtocolResult<ClientMessage> {
    let value = parse_object(frame)?;
    serde_json::from_value(value).map_err(|e| ProtocolError::malformed(e.to_string()))
}

fn parse_object(frame: &str) -> ProtocolResult<Value> {
    let value: Value =
        serde_json::from_str(frame).map_err(|e| ProtocolError::malformed(e.to_string()))?;
    if !value.is_object() {
        return Err(ProtocolError::malformed("frame is not a JSON object"));
    }
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::MethodError;
    use ddp_core::{DocumentId, Fields};
    use proptest::prelude::*;
    use serde_json::json;

    #[test]
    fn encode_method_uses_wire_names() {
        let frame = encode(&ClientMessage::Method {
            id: "1".into(),
            method: "addTask".into(),
            params: vec![json!("milk")],
            random_seed: Some("abc".into()),
        })
        .unwrap();

        let value: Value = serde_json::from_str(&frame).unwrap();
        assert_eq!(
            value,
            json!({"msg": "method", "id": "1", "method": "addTask", "params": ["milk"], "randomSeed": "abc"})
        );
    }

    #[test]
    fn encode_connect_omits_missing_session() {
        let frame = encode(&ClientMessage::Connect {
            version: "1".into(),
            support: vec!["1".into(), "pre2".into(), "pre1".into()],
            session: None,
        })
        .unwrap();

        let value: Value = serde_json::from_str(&frame).unwrap();
        assert_eq!(
            value,
            json!({"msg": "connect", "version": "1", "support": ["1", "pre2", "pre1"]})
        );
    }

    #[test]
    fn decode_data_messages() {
        let added = decode_server(
            r#"{"msg":"added","collection":"tasks","id":"t1","fields":{"title":"milk"}}"#,
        )
        .unwrap();
        let mut fields = Fields::new();
        fields.insert("title".into(), json!("milk"));
        assert_eq!(
            added,
            ServerMessage::Added {
                collection: "tasks".into(),
                id: DocumentId::new("t1"),
                fields,
            }
        );
        assert!(added.is_data());

        let changed =
            decode_server(r#"{"msg":"changed","collection":"tasks","id":"t1","cleared":["title"]}"#)
                .unwrap();
        assert_eq!(
            changed,
            ServerMessage::Changed {
                collection: "tasks".into(),
                id: DocumentId::new("t1"),
                fields: Fields::new(),
                cleared: vec!["title".into()],
            }
        );
    }

    #[test]
    fn decode_result_with_error() {
        let result = decode_server(
            r#"{"msg":"result","id":"3","error":{"error":403,"reason":"Denied","errorType":"Meteor.Error"}}"#,
        )
        .unwrap();
        assert_eq!(
            result,
            ServerMessage::Result {
                id: "3".into(),
                result: None,
                error: Some(MethodError::new(403, "Denied")),
            }
        );
    }

    #[test]
    fn decode_error_with_offending_message() {
        let error = decode_server(
            r#"{"msg":"error","reason":"Bad request","offendingMessage":{"msg":"nope"}}"#,
        )
        .unwrap();
        assert_eq!(
            error,
            ServerMessage::Error {
                reason: "Bad request".into(),
                offending_message: Some(json!({"msg": "nope"})),
            }
        );
    }

    #[test]
    fn unknown_kinds_and_greeting_are_tolerated() {
        assert_eq!(
            decode_server(r#"{"msg":"addedBefore","collection":"c","id":"1"}"#).unwrap(),
            ServerMessage::Unknown
        );
        assert_eq!(
            decode_server(r#"{"server_id":"0"}"#).unwrap(),
            ServerMessage::Unknown
        );
    }

    #[test]
    fn malformed_frames_are_rejected() {
        assert!(matches!(
            decode_server("not json"),
            Err(ProtocolError::Malformed { .. })
        ));
        assert!(matches!(
            decode_server("[1, 2]"),
            Err(ProtocolError::Malformed { .. })
        ));
        assert!(matches!(
            decode_server(r#"{"msg":"connected"}"#),
            Err(ProtocolError::Malformed { .. })
        ));
    }

    #[test]
    fn client_frames_decode() {
        let sub = decode_client(r#"{"msg":"sub","id":"s1","name":"tasks"}"#).unwrap();
        assert_eq!(
            sub,
            ClientMessage::Sub {
                id: "s1".into(),
                name: "tasks".into(),
                params: vec![],
            }
        );
    }

    proptest! {
        #[test]
        fn changed_fields_survive_the_wire(
            values in prop::collection::btree_map("[a-z]{1,8}", any::<i64>(), 0..8),
            cleared in prop::collection::vec("[A-Z]{1,8}", 0..4),
        ) {
            let fields: Fields = values.into_iter().map(|(k, v)| (k, json!(v))).collect();
            let message = ServerMessage::Changed {
                collection: "c".into(),
                id: DocumentId::new("d"),
                fields,
                cleared,
            };
            let frame = encode(&message).unwrap();
            prop_assert_eq!(decode_server(&frame).unwrap(), message);
        }
    }
}
