//! Event types
//!
//! Every event travels as a three element JSON array:
//! `[kind, payload, [line, column]]`.

use serde::ser::{Serialize, SerializeTuple, Serializer};

/// Rendering position attached to every event
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord)]
pub struct Position {
    pub line: u64,
    pub column: u64,
}

impl Position {
    pub const fn new(line: u64, column: u64) -> Self {
        Self { line, column }
    }
}

impl Serialize for Position {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut tuple = serializer.serialize_tuple(2)?;
        tuple.serialize_element(&self.line)?;
        tuple.serialize_element(&self.column)?;
        tuple.end()
    }
}

/// Event produced by a run before the cursor tracker positions it
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RawEvent {
    /// Chunk of the child's stdout
    Output(String),
    /// One line of the child's stderr
    Error(String),
    /// The child looks blocked on stdin and no input is queued
    ExpectingInput,
    /// The child exited; always the last event of a run
    Exit(i32),
}

impl RawEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            RawEvent::Output(_) => EventKind::Output,
            RawEvent::Error(_) => EventKind::Error,
            RawEvent::ExpectingInput => EventKind::ExpectingInput,
            RawEvent::Exit(_) => EventKind::Exit,
        }
    }
}

/// Event kind as named on the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Output,
    Error,
    ExpectingInput,
    Exit,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Output => "output",
            EventKind::Error => "error",
            EventKind::ExpectingInput => "expecting_input",
            EventKind::Exit => "exit",
        }
    }
}

/// Positioned event, ready for the transport
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Event {
    pub raw: RawEvent,
    pub pos: Position,
}

impl Event {
    pub fn new(raw: RawEvent, pos: Position) -> Self {
        Self { raw, pos }
    }

    pub fn kind(&self) -> EventKind {
        self.raw.kind()
    }

    /// Text payload of output and error events
    pub fn text(&self) -> Option<&str> {
        match &self.raw {
            RawEvent::Output(text) | RawEvent::Error(text) => Some(text),
            _ => None,
        }
    }

    /// Exit code of the terminal event
    pub fn exit_code(&self) -> Option<i32> {
        match self.raw {
            RawEvent::Exit(code) => Some(code),
            _ => None,
        }
    }

    pub fn is_exit(&self) -> bool {
        matches!(self.raw, RawEvent::Exit(_))
    }
}

impl Serialize for Event {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut tuple = serializer.serialize_tuple(3)?;
        tuple.serialize_element(self.kind().as_str())?;
        match &self.raw {
            RawEvent::Output(text) | RawEvent::Error(text) => tuple.serialize_element(text)?,
            RawEvent::ExpectingInput => tuple.serialize_element(&Option::<()>::None)?,
            RawEvent::Exit(code) => tuple.serialize_element(code)?,
        }
        tuple.serialize_element(&self.pos)?;
        tuple.end()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_output_wire_shape() {
        let event = Event::new(RawEvent::Output("hi\n".into()), Position::new(0, 0));
        assert_eq!(serde_json::to_value(&event).unwrap(), json!(["output", "hi\n", [0, 0]]));
    }

    #[test]
    fn test_expecting_input_has_null_payload() {
        let event = Event::new(RawEvent::ExpectingInput, Position::new(3, 2));
        assert_eq!(
            serde_json::to_value(&event).unwrap(),
            json!(["expecting_input", null, [3, 2]])
        );
    }

    #[test]
    fn test_exit_payload_is_integer() {
        let event = Event::new(RawEvent::Exit(-9), Position::new(1, 0));
        assert_eq!(serde_json::to_value(&event).unwrap(), json!(["exit", -9, [1, 0]]));
        assert_eq!(event.exit_code(), Some(-9));
        assert!(event.is_exit());
        assert_eq!(event.text(), None);
    }
}
