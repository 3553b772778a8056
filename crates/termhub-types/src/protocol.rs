//! Wire formats spoken over the shared connection
//!
//! Two kinds of traffic share one socket: channel frames routed by
//! `(namespace, command, correlation id)` and terminal control frames
//! discriminated by a `type` field. Raw shell bytes travel unframed.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::ProtocolError;
use crate::Geometry;

/// Caller-chosen token matching a response to the registration expecting it
///
/// Numeric strings are normalised to numbers, so `5` and `"5"` address the
/// same registration.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CorrelationId {
    Number(i64),
    Text(String),
}

impl CorrelationId {
    pub fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Number(n) => n.as_i64().map(CorrelationId::Number),
            Value::String(s) => Some(CorrelationId::from(s.as_str())),
            _ => None,
        }
    }
}

impl Default for CorrelationId {
    fn default() -> Self {
        CorrelationId::Number(0)
    }
}

impl From<i64> for CorrelationId {
    fn from(n: i64) -> Self {
        CorrelationId::Number(n)
    }
}

impl From<u64> for CorrelationId {
    fn from(n: u64) -> Self {
        match i64::try_from(n) {
            Ok(n) => CorrelationId::Number(n),
            Err(_) => CorrelationId::Text(n.to_string()),
        }
    }
}

impl From<&str> for CorrelationId {
    fn from(s: &str) -> Self {
        match s.parse::<i64>() {
            Ok(n) => CorrelationId::Number(n),
            Err(_) => CorrelationId::Text(s.to_string()),
        }
    }
}

impl From<String> for CorrelationId {
    fn from(s: String) -> Self {
        CorrelationId::from(s.as_str())
    }
}

impl std::fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CorrelationId::Number(n) => write!(f, "{}", n),
            CorrelationId::Text(s) => f.write_str(s),
        }
    }
}

/// Inbound frame in channel mode
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelFrame {
    #[serde(rename = "app", alias = "namespace")]
    pub namespace: String,
    #[serde(rename = "cmd", alias = "command")]
    pub command: String,
    #[serde(rename = "unique_id", alias = "correlationId")]
    pub correlation_id: CorrelationId,
    #[serde(default)]
    pub data: Value,
}

impl ChannelFrame {
    /// Parse a raw text frame, accepting both the long and the short field names
    pub fn parse(raw: &str) -> Result<Self, ProtocolError> {
        let value: Value =
            serde_json::from_str(raw).map_err(|e| ProtocolError::InvalidJson(e.to_string()))?;
        let fields = value
            .as_object()
            .ok_or_else(|| ProtocolError::InvalidJson("frame is not a JSON object".to_string()))?;

        let namespace = pick(fields, "namespace", &["namespace", "app"], as_string)?;
        let command = pick(fields, "command", &["command", "cmd"], as_string)?;
        let correlation_id = pick(
            fields,
            "correlationId",
            &["correlationId", "unique_id"],
            CorrelationId::from_value,
        )?;

        Ok(Self {
            namespace,
            command,
            correlation_id,
            data: fields.get("data").cloned().unwrap_or(Value::Null),
        })
    }
}

/// First alias whose value converts; a present but unusable field is `InvalidField`
fn pick<T>(
    fields: &Map<String, Value>,
    name: &'static str,
    keys: &[&str],
    convert: impl Fn(&Value) -> Option<T>,
) -> Result<T, ProtocolError> {
    let mut present = false;
    let found = keys.iter().find_map(|key| {
        let value = fields.get(*key)?;
        present = true;
        convert(value)
    });
    match found {
        Some(value) => Ok(value),
        None if present => Err(ProtocolError::InvalidField(name)),
        None => Err(ProtocolError::MissingField(name)),
    }
}

fn as_string(value: &Value) -> Option<String> {
    value.as_str().map(str::to_string)
}

/// Request body of an outbound `command` frame
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandRequest {
    pub func_name: String,
    #[serde(default)]
    pub func_args: Vec<Value>,
    #[serde(default)]
    pub func_kwargs: Map<String, Value>,
    pub unique_id: CorrelationId,
    pub timestamp: i64,
}

impl CommandRequest {
    pub fn new(func_name: impl Into<String>, unique_id: CorrelationId) -> Self {
        Self {
            func_name: func_name.into(),
            func_args: Vec::new(),
            func_kwargs: Map::new(),
            unique_id,
            timestamp: chrono::Utc::now().timestamp_millis(),
        }
    }

    pub fn with_args(mut self, args: Vec<Value>) -> Self {
        self.func_args = args;
        self
    }

    pub fn with_kwargs(mut self, kwargs: Map<String, Value>) -> Self {
        self.func_kwargs = kwargs;
        self
    }
}

/// Outbound frames carrying a `type` discriminator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ControlFrame {
    Resize { rows: u16, cols: u16 },
    Command { data: CommandRequest },
}

impl ControlFrame {
    pub fn resize(geometry: Geometry) -> Self {
        ControlFrame::Resize {
            rows: geometry.rows,
            cols: geometry.cols,
        }
    }

    pub fn to_json(&self) -> String {
        // Plain structs of strings and numbers always serialize
        serde_json::to_string(self).unwrap_or_default()
    }
}

/// Shell line sent once at attach time so the remote PTY starts at the right size
pub fn stty_command(geometry: Geometry) -> String {
    format!("stty rows {} cols {}\n", geometry.rows, geometry.cols)
}

/// How a PTY server interprets an inbound text frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShellInput<'a> {
    Keys(&'a str),
    Resize(Geometry),
    Empty,
}

impl<'a> ShellInput<'a> {
    /// Single characters are keystrokes, `{...}` is a resize request, anything else is input
    pub fn classify(text: &'a str) -> Self {
        if text.is_empty() {
            return ShellInput::Empty;
        }
        if text.chars().count() == 1 || !(text.starts_with('{') && text.ends_with('}')) {
            return ShellInput::Keys(text);
        }
        match serde_json::from_str::<ControlFrame>(text) {
            Ok(ControlFrame::Resize { rows, cols }) => ShellInput::Resize(Geometry::new(rows, cols)),
            _ => ShellInput::Keys(text),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn test_parse_short_field_names() {
        let frame =
            ChannelFrame::parse(r#"{"app":"files","cmd":"list","unique_id":7,"data":[1,2]}"#)
                .unwrap();
        assert_eq!(frame.namespace, "files");
        assert_eq!(frame.command, "list");
        assert_eq!(frame.correlation_id, CorrelationId::Number(7));
        assert_eq!(frame.data, json!([1, 2]));
    }

    #[test]
    fn test_parse_long_field_names() {
        let frame = ChannelFrame::parse(
            r#"{"namespace":"files","command":"list","correlationId":"abc","data":{"ok":true}}"#,
        )
        .unwrap();
        assert_eq!(frame.correlation_id, CorrelationId::Text("abc".to_string()));
        assert_eq!(frame.data, json!({"ok": true}));
    }

    #[test]
    fn test_parse_rejects_missing_routing_fields() {
        assert_eq!(
            ChannelFrame::parse(r#"{"cmd":"list","unique_id":1}"#),
            Err(ProtocolError::MissingField("namespace"))
        );
        assert_eq!(
            ChannelFrame::parse(r#"{"app":"files","unique_id":1}"#),
            Err(ProtocolError::MissingField("command"))
        );
        assert_eq!(
            ChannelFrame::parse(r#"{"app":"files","cmd":"list"}"#),
            Err(ProtocolError::MissingField("correlationId"))
        );
        assert!(matches!(
            ChannelFrame::parse("not json"),
            Err(ProtocolError::InvalidJson(_))
        ));
        assert!(matches!(
            ChannelFrame::parse("[1,2,3]"),
            Err(ProtocolError::InvalidJson(_))
        ));
    }

    #[test]
    fn test_parse_skips_aliases_of_the_wrong_type() {
        let frame = ChannelFrame::parse(
            r#"{"namespace":1,"app":"files","cmd":"list","correlationId":null,"unique_id":"9"}"#,
        )
        .unwrap();
        assert_eq!(frame.namespace, "files");
        assert_eq!(frame.correlation_id, CorrelationId::Number(9));
    }

    #[test]
    fn test_parse_reports_mistyped_routing_fields() {
        assert_eq!(
            ChannelFrame::parse(r#"{"app":"files","cmd":"list","unique_id":1.5}"#),
            Err(ProtocolError::InvalidField("correlationId"))
        );
        assert_eq!(
            ChannelFrame::parse(
                r#"{"app":"files","cmd":"list","unique_id":18446744073709551615}"#
            ),
            Err(ProtocolError::InvalidField("correlationId"))
        );
        assert_eq!(
            ChannelFrame::parse(r#"{"app":["files"],"cmd":"list","unique_id":1}"#),
            Err(ProtocolError::InvalidField("namespace"))
        );
    }

    #[test]
    fn test_numeric_string_ids_match_numbers() {
        assert_eq!(CorrelationId::from("42"), CorrelationId::Number(42));
        assert_eq!(CorrelationId::from(42u64), CorrelationId::Number(42));
        assert_eq!(CorrelationId::default(), CorrelationId::Number(0));
    }

    #[test]
    fn test_resize_frame_wire_format() {
        let frame = ControlFrame::resize(Geometry::new(40, 132));
        let value: Value = serde_json::from_str(&frame.to_json()).unwrap();
        assert_eq!(value, json!({"type": "resize", "rows": 40, "cols": 132}));
    }

    #[test]
    fn test_command_frame_wire_format() {
        let request = CommandRequest::new("list_files", CorrelationId::from("req-1"))
            .with_args(vec![json!("/tmp")]);
        let value: Value =
            serde_json::from_str(&ControlFrame::Command { data: request }.to_json()).unwrap();
        assert_eq!(value["type"], "command");
        assert_eq!(value["data"]["func_name"], "list_files");
        assert_eq!(value["data"]["func_args"], json!(["/tmp"]));
        assert_eq!(value["data"]["unique_id"], "req-1");
    }

    #[test]
    fn test_stty_command() {
        assert_eq!(stty_command(Geometry::new(24, 80)), "stty rows 24 cols 80\n");
    }

    #[test]
    fn test_classify_shell_input() {
        assert_eq!(ShellInput::classify(""), ShellInput::Empty);
        assert_eq!(ShellInput::classify("a"), ShellInput::Keys("a"));
        assert_eq!(ShellInput::classify("{"), ShellInput::Keys("{"));
        assert_eq!(ShellInput::classify("ls -la\n"), ShellInput::Keys("ls -la\n"));
        assert_eq!(
            ShellInput::classify(r#"{"type":"resize","rows":10,"cols":20}"#),
            ShellInput::Resize(Geometry::new(10, 20))
        );
        assert_eq!(
            ShellInput::classify("{not json}"),
            ShellInput::Keys("{not json}")
        );
    }
}
