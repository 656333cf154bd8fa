//! Core execution engine.
//!
//! This module contains the run loop and everything it owns:
//!
//! - **process**: child interpreter with piped stdin/stdout/stderr
//! - **workspace**: per-session scratch directory holding the source file
//! - **input**: queued input and the blocked-on-stdin decision
//! - **cursor**: `(line, column)` bookkeeping for emitted events
//! - **event**: event types and their wire shape
//! - **session**: session + run combining all of the above
//!
//! # Architecture
//!
//! ```text
//! Session
//! ├── InputQueue (shared with the transport)
//! └── Run
//!     ├── Workspace (scratch dir, removed at run end)
//!     ├── ChildProcess (stdout probe, stdin writer)
//!     ├── stderr task (lines -> error buffer)
//!     ├── InputDetector
//!     └── CursorTracker
//! ```

pub mod cursor;
pub mod event;
pub mod input;
pub mod process;
pub mod session;
pub mod utf8;
pub mod workspace;

pub use cursor::CursorTracker;
pub use event::{Event, EventKind, Position, RawEvent};
pub use input::{InputDetector, InputQueue, ProbeDecision};
pub use process::{ChildProcess, ProcessError, ReadOutcome};
pub use session::{Run, Session, SessionError};
pub use workspace::Workspace;
