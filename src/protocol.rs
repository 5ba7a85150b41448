//! MPV JSON IPC protocol types.
//!
//! Reference: https://mpv.io/manual/master/#json-ipc

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Event name mpv uses for observed property updates.
pub const PROPERTY_CHANGE: &str = "property-change";

/// Command sent to MPV via IPC.
#[derive(Debug, Clone, Serialize)]
pub struct MpvCommand {
  pub request_id: i64,
  pub command: Vec<Value>,
}

impl MpvCommand {
  /// Build a command frame from its name and positional arguments.
  pub fn new(request_id: i64, name: &str, args: Vec<Value>) -> Self {
    let mut command = Vec::with_capacity(args.len() + 1);
    command.push(Value::from(name));
    command.extend(args);
    Self {
      request_id,
      command,
    }
  }

  /// The command name (first element of the command array).
  pub fn name(&self) -> &str {
    self.command.first().and_then(Value::as_str).unwrap_or_default()
  }
}

/// Response from MPV for a command.
#[derive(Debug, Clone, PartialEq)]
pub struct MpvResponse {
  /// Matching request ID.
  pub request_id: i64,
  /// "success" or error message.
  pub error: String,
  /// Response data (command-specific).
  pub data: Option<Value>,
}

impl MpvResponse {
  /// Check if the command succeeded.
  pub fn is_success(&self) -> bool {
    self.error == "success"
  }
}

/// Event pushed by MPV (property changes, playback events, etc.).
#[derive(Debug, Clone, PartialEq)]
pub struct MpvEvent {
  /// Event type (e.g., "property-change", "end-file", "client-message").
  pub name: String,
  /// Remaining fields of the frame, without the `event` key.
  pub body: Value,
}

/// Body of a `property-change` event.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct PropertyChange {
  /// Observer ID the property was registered with.
  pub id: Option<i64>,
  pub name: String,
  #[serde(default)]
  pub data: Value,
}

/// Message received from MPV IPC.
#[derive(Debug, Clone, PartialEq)]
pub enum MpvMessage {
  Response(MpvResponse),
  Event(MpvEvent),
  /// Valid JSON that is neither a response nor an event.
  Unknown(Value),
}

impl MpvMessage {
  /// Parse a JSON line from MPV.
  pub fn parse(line: &str) -> Result<Self, serde_json::Error> {
    serde_json::from_str::<Value>(line).map(Self::from_value)
  }

  /// Classify a decoded frame.
  ///
  /// A frame with an integer `request_id` and a string `error` is a
  /// response; otherwise a frame with a string `event` is an event.
  pub fn from_value(value: Value) -> Self {
    let Value::Object(mut map) = value else {
      return MpvMessage::Unknown(value);
    };

    let request_id = map.get("request_id").and_then(Value::as_i64);
    let error = map.get("error").and_then(Value::as_str).map(str::to_owned);
    if let (Some(request_id), Some(error)) = (request_id, error) {
      return MpvMessage::Response(MpvResponse {
        request_id,
        error,
        data: map.remove("data"),
      });
    }

    if let Some(Value::String(_)) = map.get("event") {
      if let Some(Value::String(name)) = map.remove("event") {
        return MpvMessage::Event(MpvEvent {
          name,
          body: Value::Object(map),
        });
      }
    }

    MpvMessage::Unknown(Value::Object(map))
  }
}

impl MpvEvent {
  /// Decode the body as a property change, if it is one.
  pub fn property_change(&self) -> Option<PropertyChange> {
    if self.name != PROPERTY_CHANGE {
      return None;
    }
    serde_json::from_value(self.body.clone()).ok()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  #[test]
  fn test_command_serialization() {
    let cmd = MpvCommand::new(7, "loadfile", vec!["http://example.com/video.mp4".into()]);
    let json = serde_json::to_value(&cmd).unwrap();
    assert_eq!(
      json,
      json!({"request_id": 7, "command": ["loadfile", "http://example.com/video.mp4"]})
    );
    assert_eq!(cmd.name(), "loadfile");
  }

  #[test]
  fn test_response_parsing() {
    let json = r#"{"error":"success","data":65637,"request_id":1}"#;
    let msg = MpvMessage::parse(json).unwrap();
    match msg {
      MpvMessage::Response(r) => {
        assert!(r.is_success());
        assert_eq!(r.request_id, 1);
        assert_eq!(r.data, Some(json!(65637)));
      }
      _ => panic!("Expected response"),
    }
  }

  #[test]
  fn test_error_response_without_data() {
    let json = r#"{"request_id":4,"error":"property not found"}"#;
    match MpvMessage::parse(json).unwrap() {
      MpvMessage::Response(r) => {
        assert!(!r.is_success());
        assert_eq!(r.error, "property not found");
        assert_eq!(r.data, None);
      }
      other => panic!("Expected response, got {:?}", other),
    }
  }

  #[test]
  fn test_event_parsing() {
    let json = r#"{"event":"property-change","id":1,"name":"pause","data":false}"#;
    let msg = MpvMessage::parse(json).unwrap();
    match msg {
      MpvMessage::Event(e) => {
        assert_eq!(e.name, "property-change");
        assert_eq!(e.body, json!({"id": 1, "name": "pause", "data": false}));
        let change = e.property_change().unwrap();
        assert_eq!(change.name, "pause");
        assert_eq!(change.id, Some(1));
        assert_eq!(change.data, json!(false));
      }
      _ => panic!("Expected event"),
    }
  }

  #[test]
  fn test_property_change_without_data_is_null() {
    let msg = MpvMessage::parse(r#"{"event":"property-change","id":2,"name":"path"}"#).unwrap();
    let MpvMessage::Event(event) = msg else {
      panic!("Expected event");
    };
    assert_eq!(event.property_change().unwrap().data, Value::Null);
  }

  #[test]
  fn test_unrecognized_frames() {
    assert!(matches!(
      MpvMessage::parse(r#"{"hello":"world"}"#).unwrap(),
      MpvMessage::Unknown(_)
    ));
    assert!(matches!(
      MpvMessage::parse("[1,2,3]").unwrap(),
      MpvMessage::Unknown(_)
    ));
    // request_id without an error field is not a response.
    assert!(matches!(
      MpvMessage::parse(r#"{"request_id":1}"#).unwrap(),
      MpvMessage::Unknown(_)
    ));
  }
}
