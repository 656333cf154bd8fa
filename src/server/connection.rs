//! Per-connection session registry
//!
//! A connection can drive several sessions, keyed by session id. Each live
//! run is pumped by its own task into the connection's outbound channel.
//! A bad command is answered with a fault and never ends the connection.

use std::collections::HashMap;

use thiserror::Error;
use tokio::sync::mpsc::UnboundedSender;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::protocol::{fault_message, Command, ProtocolError};
use crate::config::RunnerConfig;
use crate::core::{Event, InputQueue, Run, Session, SessionError};

#[derive(Error, Debug)]
pub enum ConnectionError {
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error(transparent)]
    Session(#[from] SessionError),

    #[error("Unknown session '{0}'")]
    UnknownSession(String),

    #[error("Input without a session id needs exactly one live session")]
    AmbiguousInput,

    #[error("Session '{0}' is already running")]
    DuplicateSession(String),
}

/// A live run owned by the connection
struct ActiveSession {
    inputs: InputQueue,
    cancel: Option<oneshot::Sender<()>>,
    task: JoinHandle<()>,
}

/// Command handling state for one client
pub struct Connection {
    settings: RunnerConfig,
    outbound: UnboundedSender<String>,
    sessions: HashMap<String, ActiveSession>,
}

impl Connection {
    pub fn new(settings: RunnerConfig, outbound: UnboundedSender<String>) -> Self {
        Self {
            settings,
            outbound,
            sessions: HashMap::new(),
        }
    }

    /// Handle one raw inbound message. Failures become fault messages.
    pub async fn handle_text(&mut self, text: &str) {
        let mut session_id = None;
        let result = match Command::parse(text) {
            Ok(command) => {
                session_id = command.session_id().map(str::to_string);
                self.dispatch(command).await
            }
            Err(e) => Err(e.into()),
        };

        if let Err(e) = result {
            warn!("Command rejected: {}", e);
            self.send_fault(&e.to_string(), session_id.as_deref());
        }
    }

    pub async fn dispatch(&mut self, command: Command) -> Result<(), ConnectionError> {
        self.prune();
        match command {
            Command::Run { source, session_id } => self.start(source, session_id).await,
            Command::Input { value, session_id } => self.submit_input(value, session_id.as_deref()),
        }
    }

    /// Number of sessions whose run has not finished
    pub fn live_sessions(&mut self) -> usize {
        self.prune();
        self.sessions.len()
    }

    /// Wait for every live run to reach its exit
    pub async fn wait(mut self) {
        for (id, session) in self.sessions.drain() {
            if let Err(e) = session.task.await {
                warn!("Session {} task failed: {}", id, e);
            }
        }
    }

    /// Cancel every live run and wait for its cleanup
    pub async fn close(mut self) {
        for (id, mut session) in self.sessions.drain() {
            if let Some(cancel) = session.cancel.take() {
                let _ = cancel.send(());
            }
            if let Err(e) = session.task.await {
                warn!("Session {} task failed: {}", id, e);
            }
        }
    }

    async fn start(&mut self, source: String, session_id: String) -> Result<(), ConnectionError> {
        if self.sessions.contains_key(&session_id) {
            return Err(ConnectionError::DuplicateSession(session_id));
        }

        let mut session = Session::new(session_id.clone(), self.settings.clone())?;
        let inputs = session.inputs();
        let run = session.run(&source).await?;

        let (cancel_tx, cancel_rx) = oneshot::channel();
        let task = tokio::spawn(pump(run, self.outbound.clone(), cancel_rx));
        self.sessions.insert(
            session_id,
            ActiveSession {
                inputs,
                cancel: Some(cancel_tx),
                task,
            },
        );
        Ok(())
    }

    fn submit_input(
        &mut self,
        value: String,
        session_id: Option<&str>,
    ) -> Result<(), ConnectionError> {
        let session = match session_id {
            Some(id) => self
                .sessions
                .get(id)
                .ok_or_else(|| ConnectionError::UnknownSession(id.to_string()))?,
            None if self.sessions.len() == 1 => self
                .sessions
                .values()
                .next()
                .ok_or(ConnectionError::AmbiguousInput)?,
            None => return Err(ConnectionError::AmbiguousInput),
        };
        session.inputs.push(value);
        Ok(())
    }

    fn prune(&mut self) {
        self.sessions.retain(|id, session| {
            let finished = session.task.is_finished();
            if finished {
                debug!("Session {} finished", id);
            }
            !finished
        });
    }

    fn send_fault(&self, message: &str, session_id: Option<&str>) {
        let _ = self.outbound.send(fault_message(message, session_id));
    }
}

enum Step {
    Event(Option<Event>),
    Cancel,
}

/// Forward a run's events until exit, cancellation or a closed outbound channel
async fn pump(mut run: Run, outbound: UnboundedSender<String>, mut cancel: oneshot::Receiver<()>) {
    loop {
        let step = tokio::select! {
            event = run.next_event() => Step::Event(event),
            _ = &mut cancel => Step::Cancel,
        };

        let event = match step {
            Step::Event(Some(event)) => event,
            Step::Event(None) => return,
            Step::Cancel => {
                info!("Cancelling session {}", run.session_id());
                run.cancel().await;
                return;
            }
        };

        match serde_json::to_string(&event) {
            Ok(text) => {
                if outbound.send(text).is_err() {
                    info!("Client gone, cancelling session {}", run.session_id());
                    run.cancel().await;
                    return;
                }
            }
            Err(e) => warn!("Failed to encode event: {}", e),
        }
    }
}
