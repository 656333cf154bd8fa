//! Inbound commands and outbound fault messages
//!
//! Commands are JSON arrays:
//!
//! - `["run", sourceText, sessionId]`
//! - `["input", value, sessionId]` (the id may be omitted when only one
//!   session is live on the connection)
//!
//! Engine faults are reported as `["fault", message, sessionId | null]`,
//! kept apart from the child's own `error` events.

use serde_json::{json, Value};
use thiserror::Error;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("Command is not valid JSON: {0}")]
    Json(String),

    #[error("Command must be a JSON array")]
    NotAnArray,

    #[error("Unknown command '{0}'")]
    UnknownCommand(String),

    #[error("Command '{command}' is missing {field}")]
    MissingField {
        command: &'static str,
        field: &'static str,
    },

    #[error("Command '{command}': {field} must be a string")]
    InvalidField {
        command: &'static str,
        field: &'static str,
    },
}

/// Command sent by a client
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Run { source: String, session_id: String },
    Input { value: String, session_id: Option<String> },
}

impl Command {
    pub fn parse(text: &str) -> Result<Self, ProtocolError> {
        let value: Value =
            serde_json::from_str(text).map_err(|e| ProtocolError::Json(e.to_string()))?;
        let items = value.as_array().ok_or(ProtocolError::NotAnArray)?;
        let name = items
            .first()
            .and_then(Value::as_str)
            .ok_or(ProtocolError::NotAnArray)?;

        match name {
            "run" => Ok(Command::Run {
                source: required_str(items, 1, "run", "source")?,
                session_id: required_str(items, 2, "run", "session id")?,
            }),
            "input" => Ok(Command::Input {
                value: required_str(items, 1, "input", "value")?,
                session_id: optional_str(items, 2, "input", "session id")?,
            }),
            other => Err(ProtocolError::UnknownCommand(other.to_string())),
        }
    }

    pub fn session_id(&self) -> Option<&str> {
        match self {
            Command::Run { session_id, .. } => Some(session_id),
            Command::Input { session_id, .. } => session_id.as_deref(),
        }
    }
}

fn required_str(
    items: &[Value],
    index: usize,
    command: &'static str,
    field: &'static str,
) -> Result<String, ProtocolError> {
    optional_str(items, index, command, field)?
        .ok_or(ProtocolError::MissingField { command, field })
}

fn optional_str(
    items: &[Value],
    index: usize,
    command: &'static str,
    field: &'static str,
) -> Result<Option<String>, ProtocolError> {
    match items.get(index) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.clone())),
        Some(_) => Err(ProtocolError::InvalidField { command, field }),
    }
}

/// Serialized fault message
pub fn fault_message(message: &str, session_id: Option<&str>) -> String {
    json!(["fault", message, session_id]).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_run() {
        let cmd = Command::parse(r#"["run", "print('hi')", "abc"]"#).unwrap();
        assert_eq!(
            cmd,
            Command::Run {
                source: "print('hi')".into(),
                session_id: "abc".into()
            }
        );
        assert_eq!(cmd.session_id(), Some("abc"));
    }

    #[test]
    fn test_parse_input_with_and_without_id() {
        assert_eq!(
            Command::parse(r#"["input", "Ada", "abc"]"#).unwrap(),
            Command::Input {
                value: "Ada".into(),
                session_id: Some("abc".into())
            }
        );
        assert_eq!(
            Command::parse(r#"["input", ""]"#).unwrap(),
            Command::Input {
                value: String::new(),
                session_id: None
            }
        );
    }

    #[test]
    fn test_parse_errors() {
        assert!(matches!(Command::parse("not json"), Err(ProtocolError::Json(_))));
        assert_eq!(Command::parse(r#"{"run": 1}"#), Err(ProtocolError::NotAnArray));
        assert_eq!(Command::parse("[]"), Err(ProtocolError::NotAnArray));
        assert_eq!(
            Command::parse(r#"["stop", "x"]"#),
            Err(ProtocolError::UnknownCommand("stop".into()))
        );
        assert_eq!(
            Command::parse(r#"["run", "code"]"#),
            Err(ProtocolError::MissingField {
                command: "run",
                field: "session id"
            })
        );
        assert_eq!(
            Command::parse(r#"["input", 42, "abc"]"#),
            Err(ProtocolError::InvalidField {
                command: "input",
                field: "value"
            })
        );
    }

    #[test]
    fn test_fault_message_shape() {
        let value: Value = serde_json::from_str(&fault_message("boom", Some("abc"))).unwrap();
        assert_eq!(value, json!(["fault", "boom", "abc"]));
        let value: Value = serde_json::from_str(&fault_message("bad", None)).unwrap();
        assert_eq!(value, json!(["fault", "bad", null]));
    }
}
