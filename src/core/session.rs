//! Execution session
//!
//! A [`Session`] turns one piece of source text into a [`Run`]: a scratch
//! workspace, a child interpreter and a pull-based event loop. Events come
//! out of [`Run::next_event`] strictly ordered, each positioned by the
//! cursor tracker, and the last one is always `Exit`.
//!
//! Loop order while the child runs:
//!
//! 1. pending stderr lines, then pending stdout chunks
//! 2. a bounded-time stdout probe; silence with no stderr waiting is a
//!    tentative input request. Once the child closes stdout the probe is a
//!    plain wait of the same length.
//! 3. exit check; on exit stdout and stderr are drained to completion
//! 4. a short idle sleep

use std::collections::VecDeque;
use std::io;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::mpsc::{self, UnboundedReceiver};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::cursor::CursorTracker;
use super::event::{Event, RawEvent};
use super::input::{InputDetector, InputQueue, ProbeDecision};
use super::process::{forward_lines, ChildProcess, ProcessError, ReadOutcome};
use super::utf8::Utf8Decoder;
use super::workspace::Workspace;
use crate::config::RunnerConfig;

/// Longest accepted session id
const MAX_SESSION_ID_LEN: usize = 128;

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("Invalid session id '{0}'")]
    InvalidSessionId(String),

    #[error("Session {0} has already been started")]
    AlreadyStarted(String),

    #[error("Workspace for session {0} is already in use")]
    WorkspaceInUse(String),

    #[error("Failed to prepare workspace: {0}")]
    Workspace(#[source] io::Error),

    #[error(transparent)]
    Process(#[from] ProcessError),
}

/// Session ids become directory names, so only a safe subset is accepted
pub fn validate_session_id(id: &str) -> Result<(), SessionError> {
    let valid = !id.is_empty()
        && id.len() <= MAX_SESSION_ID_LEN
        && id.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_');
    if valid {
        Ok(())
    } else {
        Err(SessionError::InvalidSessionId(id.to_string()))
    }
}

/// One logical run of user source
pub struct Session {
    id: String,
    settings: RunnerConfig,
    inputs: InputQueue,
    started: bool,
}

impl Session {
    pub fn new(id: impl Into<String>, settings: RunnerConfig) -> Result<Self, SessionError> {
        let id = id.into();
        validate_session_id(&id)?;
        Ok(Self {
            id,
            settings,
            inputs: InputQueue::new(),
            started: false,
        })
    }

    /// Handle for submitting input from elsewhere while the run is going
    pub fn inputs(&self) -> InputQueue {
        self.inputs.clone()
    }

    /// Queue a line of input. It is only consumed when the child looks blocked.
    pub fn submit_input(&self, value: impl Into<String>) {
        self.inputs.push(value);
    }

    /// Create the workspace, spawn the interpreter and start the stderr reader.
    ///
    /// Fails before any event exists if the workspace or the process cannot
    /// be set up. A session can only be run once.
    pub async fn run(&mut self, source: &str) -> Result<Run, SessionError> {
        if self.started {
            return Err(SessionError::AlreadyStarted(self.id.clone()));
        }
        self.started = true;

        let root = self.settings.scratch_dir().map_err(SessionError::Workspace)?;
        let workspace = Workspace::create(&root, &self.id, &self.settings.source_file, source)
            .map_err(|e| match e.kind() {
                io::ErrorKind::AlreadyExists => SessionError::WorkspaceInUse(self.id.clone()),
                _ => SessionError::Workspace(e),
            })?;

        // on failure the workspace is dropped and removed here
        let mut process = ChildProcess::spawn(
            &self.settings.interpreter,
            &self.settings.args,
            workspace.source_path(),
            workspace.path(),
        )?;
        let stderr = process
            .take_stderr()
            .ok_or(ProcessError::Capture("stderr"))?;

        let (stderr_tx, stderr_rx) = mpsc::unbounded_channel();
        let stderr_task = tokio::spawn(forward_lines(stderr, stderr_tx));

        info!(
            "Session {} started: {} (pid {:?})",
            self.id,
            self.settings.interpreter,
            process.pid()
        );

        Ok(Run {
            session_id: self.id.clone(),
            process,
            workspace: Some(workspace),
            stderr_rx,
            stderr_task: Some(stderr_task),
            inputs: self.inputs.clone(),
            detector: InputDetector::new(),
            cursor: CursorTracker::new(),
            decoder: Utf8Decoder::new(),
            output_buffer: VecDeque::new(),
            error_buffer: VecDeque::new(),
            stdout_closed: false,
            phase: Phase::Running,
            input_timeout: self.settings.input_timeout(),
            idle_sleep: self.settings.idle_sleep(),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Running,
    /// Child exited; remaining buffers are flushed, then `Exit(code)`
    Flushing(i32),
    Finished,
}

/// A started run. Dropping it kills the child and removes the workspace.
pub struct Run {
    session_id: String,
    // declared before the workspace so a dropped run kills the child first
    process: ChildProcess,
    workspace: Option<Workspace>,
    stderr_rx: UnboundedReceiver<Vec<u8>>,
    stderr_task: Option<JoinHandle<()>>,
    inputs: InputQueue,
    detector: InputDetector,
    cursor: CursorTracker,
    decoder: Utf8Decoder,
    output_buffer: VecDeque<String>,
    error_buffer: VecDeque<Vec<u8>>,
    stdout_closed: bool,
    phase: Phase,
    input_timeout: Duration,
    idle_sleep: Duration,
}

impl Run {
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn pid(&self) -> Option<u32> {
        self.process.pid()
    }

    /// Handle for submitting input to this run
    pub fn inputs(&self) -> InputQueue {
        self.inputs.clone()
    }

    /// Next positioned event, or `None` once `Exit` has been returned
    pub async fn next_event(&mut self) -> Option<Event> {
        let raw = self.next_raw().await?;
        Some(self.cursor.annotate(raw))
    }

    /// Drive the run to completion and collect every event
    pub async fn collect(mut self) -> Vec<Event> {
        let mut events = Vec::new();
        while let Some(event) = self.next_event().await {
            events.push(event);
        }
        events
    }

    /// Abandon the run: kill and reap the child, stop the reader, remove the workspace
    pub async fn cancel(mut self) {
        if self.phase == Phase::Finished {
            return;
        }
        match self.process.kill().await {
            Ok(code) => info!("Session {} cancelled (exit {})", self.session_id, code),
            Err(e) => warn!("Session {}: failed to kill child: {}", self.session_id, e),
        }
        if let Some(task) = self.stderr_task.take() {
            task.abort();
            let _ = task.await;
        }
        self.phase = Phase::Finished;
        self.cleanup();
    }

    async fn next_raw(&mut self) -> Option<RawEvent> {
        loop {
            match self.phase {
                Phase::Finished => return None,
                Phase::Flushing(code) => return Some(self.flush_one(code)),
                Phase::Running => {}
            }

            self.collect_stderr();
            if let Some(line) = self.error_buffer.pop_front() {
                return Some(RawEvent::Error(error_text(&line)));
            }
            if let Some(chunk) = self.output_buffer.pop_front() {
                return Some(RawEvent::Output(chunk));
            }

            // a child with stdout closed can still block on stdin
            let outcome = if self.stdout_closed {
                tokio::time::sleep(self.input_timeout).await;
                Ok(ReadOutcome::TimedOut)
            } else {
                self.process.read_chunk(self.input_timeout).await
            };

            match outcome {
                Ok(ReadOutcome::Data(bytes)) => {
                    self.detector.on_output();
                    if let Some(text) = self.decoder.push(&bytes) {
                        return Some(RawEvent::Output(text));
                    }
                }
                Ok(ReadOutcome::Closed) => self.stdout_closed = true,
                Ok(ReadOutcome::TimedOut) => {
                    // diagnostics written before blocking go out before the prompt
                    self.collect_stderr();
                    if !self.error_buffer.is_empty() {
                        continue;
                    }
                    if self.child_exited().await {
                        continue;
                    }
                    if let Some(raw) = self.on_probe_timeout().await {
                        return Some(raw);
                    }
                }
                Err(e) => {
                    warn!("Session {}: {}", self.session_id, e);
                    self.stdout_closed = true;
                }
            }

            if self.child_exited().await {
                continue;
            }
            tokio::time::sleep(self.idle_sleep).await;
        }
    }

    /// The stdout probe timed out while the child is still alive
    async fn on_probe_timeout(&mut self) -> Option<RawEvent> {
        match self.detector.on_timeout(&self.inputs) {
            ProbeDecision::Deliver(value) => {
                debug!(
                    "Session {}: delivering input ({} more queued)",
                    self.session_id,
                    self.inputs.len()
                );
                if let Err(e) = self.process.write_line(&value).await {
                    warn!("Session {}: input dropped: {}", self.session_id, e);
                    return None;
                }
                self.cursor.input_echoed();
                None
            }
            ProbeDecision::Signal => {
                debug!("Session {}: expecting input", self.session_id);
                Some(RawEvent::ExpectingInput)
            }
            ProbeDecision::Suppress => None,
        }
    }

    /// Check for exit; if the child is gone, drain both streams and switch to flushing
    async fn child_exited(&mut self) -> bool {
        let code = match self.process.try_exit() {
            Ok(Some(code)) => code,
            Ok(None) => return false,
            Err(e) => {
                warn!("Session {}: {}", self.session_id, e);
                match self.process.kill().await {
                    Ok(code) => code,
                    Err(_) => -1,
                }
            }
        };

        self.process.close_stdin();
        let stderr_task = self.stderr_task.take();
        let (lines, _) = tokio::join!(self.process.drain_stdout(), async move {
            if let Some(task) = stderr_task {
                if let Err(e) = task.await {
                    warn!("stderr reader failed: {}", e);
                }
            }
        });

        match lines {
            Ok(lines) => {
                for line in lines {
                    if let Some(text) = self.decoder.push(&line) {
                        self.output_buffer.push_back(text);
                    }
                }
            }
            Err(e) => warn!("Session {}: {}", self.session_id, e),
        }
        if let Some(text) = self.decoder.finish() {
            self.output_buffer.push_back(text);
        }
        self.collect_stderr();

        info!("Session {} exited with code {}", self.session_id, code);
        self.phase = Phase::Flushing(code);
        true
    }

    /// After exit: output buffer first, then error buffer, then `Exit`
    fn flush_one(&mut self, code: i32) -> RawEvent {
        if let Some(chunk) = self.output_buffer.pop_front() {
            return RawEvent::Output(chunk);
        }
        if let Some(line) = self.error_buffer.pop_front() {
            return RawEvent::Error(error_text(&line));
        }
        self.phase = Phase::Finished;
        self.cleanup();
        RawEvent::Exit(code)
    }

    fn collect_stderr(&mut self) {
        while let Ok(line) = self.stderr_rx.try_recv() {
            self.error_buffer.push_back(line);
        }
    }

    fn cleanup(&mut self) {
        if let Some(mut workspace) = self.workspace.take() {
            if let Err(e) = workspace.remove() {
                warn!(
                    "Session {}: failed to remove workspace {}: {}",
                    self.session_id,
                    workspace.path().display(),
                    e
                );
            }
        }
    }
}

impl Drop for Run {
    fn drop(&mut self) {
        if let Some(task) = self.stderr_task.take() {
            task.abort();
        }
        if self.phase != Phase::Finished {
            debug!("Session {} dropped before exit", self.session_id);
        }
        // the child is killed by kill_on_drop; the workspace removes itself
    }
}

/// Error line without its line terminator
fn error_text(line: &[u8]) -> String {
    let text = String::from_utf8_lossy(line);
    text.trim_end_matches(&['\n', '\r'][..]).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{EventKind, Position};

    #[test]
    fn test_session_id_validation() {
        assert!(validate_session_id("abc-DEF_123").is_ok());
        assert!(validate_session_id("").is_err());
        assert!(validate_session_id("..").is_err());
        assert!(validate_session_id("a/b").is_err());
        assert!(validate_session_id(&"x".repeat(MAX_SESSION_ID_LEN + 1)).is_err());
    }

    #[test]
    fn test_error_text_strips_terminator() {
        assert_eq!(error_text(b"boom\r\n"), "boom");
        assert_eq!(error_text(b"  indented\n"), "  indented");
        assert_eq!(error_text(b"no newline"), "no newline");
    }

    #[test]
    fn test_new_rejects_bad_id() {
        let err = Session::new("../etc", RunnerConfig::default()).err().unwrap();
        assert!(matches!(err, SessionError::InvalidSessionId(_)));
    }

    #[tokio::test]
    async fn test_pending_error_goes_before_pending_output() {
        let root = tempfile::TempDir::new().unwrap();
        let settings = RunnerConfig {
            interpreter: "sh".to_string(),
            args: Vec::new(),
            source_file: "script.sh".to_string(),
            scratch_root: root.path().to_path_buf(),
            input_timeout_ms: 100,
            idle_sleep_ms: 10,
        };
        let mut session = Session::new("priority", settings).unwrap();
        let mut run = session.run("exec sleep 30\n").await.unwrap();

        run.output_buffer.push_back("out\n".to_string());
        run.error_buffer.push_back(b"err\n".to_vec());

        let first = run.next_event().await.unwrap();
        assert_eq!(first.kind(), EventKind::Error);
        assert_eq!(first.text(), Some("err"));
        let second = run.next_event().await.unwrap();
        assert_eq!(second.kind(), EventKind::Output);
        assert_eq!(second.pos, Position::new(1, 0));

        run.cancel().await;
        assert!(!root.path().join("priority").exists());
    }

    #[test]
    fn test_submit_input_is_shared() {
        let session = Session::new("s1", RunnerConfig::default()).unwrap();
        let handle = session.inputs();
        session.submit_input("one");
        assert_eq!(handle.pop().as_deref(), Some("one"));
    }
}
