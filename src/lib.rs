//! pyrunner - run user-supplied source in a child interpreter and stream it
//!
//! A run spawns the configured interpreter on a source file inside a
//! per-session scratch directory and turns the child's stdout, stderr and
//! exit status into an ordered sequence of positioned events. Input for the
//! child can be queued at any time; it is written to the child's stdin when
//! the engine decides the child is blocked on a read.
//!
//! # Events
//!
//! ```text
//! ["output", "hi\n", [0, 0]]
//! ["expecting_input", null, [1, 0]]
//! ["error", "Traceback (most recent call last):", [1, 0]]
//! ["exit", 1, [2, 0]]
//! ```
//!
//! # Commands
//!
//! ```text
//! ["run", "print('hi')", "session-id"]
//! ["input", "Ada", "session-id"]
//! ```
//!
//! # Example
//!
//! ```no_run
//! use pyrunner::config::RunnerConfig;
//! use pyrunner::core::Session;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let mut session = Session::new("demo", RunnerConfig::default())?;
//!     session.submit_input("Ada");
//!
//!     let mut run = session.run("name = input()\nprint('Hello', name)").await?;
//!     while let Some(event) = run.next_event().await {
//!         println!("{}", serde_json::to_string(&event)?);
//!     }
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod core;
pub mod server;
