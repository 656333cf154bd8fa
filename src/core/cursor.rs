//! Cursor tracking
//!
//! Attaches a `(line, column)` position to each event. Columns count chunks,
//! not characters.

use super::event::{Event, Position, RawEvent};

/// Sequential position bookkeeping for one run
#[derive(Debug, Default)]
pub struct CursorTracker {
    pos: Position,
}

impl CursorTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current cursor position
    pub fn position(&self) -> Position {
        self.pos
    }

    /// Position `raw` at the current cursor, then advance
    pub fn annotate(&mut self, raw: RawEvent) -> Event {
        let pos = self.pos;
        match &raw {
            RawEvent::Output(text) if text.ends_with('\n') => self.newline(),
            RawEvent::Output(_) => self.pos.column += 1,
            // errors always end their line
            RawEvent::Error(_) => self.newline(),
            RawEvent::ExpectingInput | RawEvent::Exit(_) => {}
        }
        Event::new(raw, pos)
    }

    /// Queued input was written to the child; the renderer echoes it on its own line
    pub fn input_echoed(&mut self) {
        self.newline();
    }

    fn newline(&mut self) {
        self.pos.line += 1;
        self.pos.column = 0;
    }
}
