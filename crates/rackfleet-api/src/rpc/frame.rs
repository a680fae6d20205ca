use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::RemoteError;

/// One message on the wire.
///
/// Requests carry a per-connection id chosen by the caller; the matching
/// response echoes it. Exactly one of `ok` / `error` is set on a response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Frame {
    Request {
        id: u64,
        command: String,
        #[serde(default)]
        args: Value,
    },
    Response {
        id: u64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        ok: Option<Value>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<RemoteError>,
    },
}

impl Frame {
    pub fn response(id: u64, outcome: Result<Value, RemoteError>) -> Self {
        match outcome {
            Ok(value) => Self::Response {
                id,
                ok: Some(value),
                error: None,
            },
            Err(error) => Self::Response {
                id,
                ok: None,
                error: Some(error),
            },
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn request_shape() {
        let frame = Frame::Request {
            id: 7,
            command: "Ping".into(),
            args: json!({}),
        };
        assert_eq!(
            serde_json::to_value(&frame).unwrap(),
            json!({"type": "request", "id": 7, "command": "Ping", "args": {}})
        );
    }

    #[test]
    fn error_response_shape() {
        let frame = Frame::response(3, Err(RemoteError::new("CannotConfigureDHCP", "boom")));
        let value = serde_json::to_value(&frame).unwrap();
        assert_eq!(value["error"]["kind"], "CannotConfigureDHCP");
        assert!(value.get("ok").is_none());
        let back: Frame = serde_json::from_value(value).unwrap();
        assert_eq!(back, frame);
    }
}
