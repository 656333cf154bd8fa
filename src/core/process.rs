//! Child interpreter process
//!
//! Spawns the interpreter with stdin, stdout and stderr piped and provides
//! the primitives the run loop is built from: a bounded-time stdout probe,
//! line writes to stdin, exit polling and the final stdout drain.

use std::io;
use std::path::Path;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command};
use tokio::sync::mpsc::UnboundedSender;

#[derive(Error, Debug)]
pub enum ProcessError {
    #[error("Failed to spawn {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },

    #[error("Failed to capture child {0}")]
    Capture(&'static str),

    #[error("Failed to read from child: {0}")]
    Read(#[source] io::Error),

    #[error("Failed to write to child: {0}")]
    Write(#[source] io::Error),

    #[error("Failed to wait for child: {0}")]
    Wait(#[source] io::Error),

    #[error("Child stdin is closed")]
    StdinClosed,
}

pub type Result<T> = std::result::Result<T, ProcessError>;

/// Capacity of the stdout read buffer; one pipe read fills at most this much
const STDOUT_BUFFER_SIZE: usize = 8 * 1024;

/// Result of one stdout probe
#[derive(Debug, PartialEq, Eq)]
pub enum ReadOutcome {
    /// Probe byte plus whatever arrived with it, up to the first line terminator
    Data(Vec<u8>),
    /// Nothing arrived within the timeout
    TimedOut,
    /// The child closed its stdout
    Closed,
}

/// Child process handle
pub struct ChildProcess {
    child: Child,
    pid: Option<u32>,
    stdin: Option<ChildStdin>,
    stdout: BufReader<ChildStdout>,
    stderr: Option<ChildStderr>,
}

impl ChildProcess {
    /// Spawn `program args... script` with `cwd` as working directory.
    ///
    /// The child is killed if the handle is dropped before it exits.
    pub fn spawn(program: &str, args: &[String], script: &Path, cwd: &Path) -> Result<Self> {
        let mut cmd = Command::new(program);
        cmd.args(args)
            .arg(script)
            .current_dir(cwd)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd.spawn().map_err(|source| ProcessError::Spawn {
            program: program.to_string(),
            source,
        })?;

        let stdin = child.stdin.take().ok_or(ProcessError::Capture("stdin"))?;
        let stdout = child.stdout.take().ok_or(ProcessError::Capture("stdout"))?;
        let stderr = child.stderr.take().ok_or(ProcessError::Capture("stderr"))?;

        Ok(Self {
            pid: child.id(),
            child,
            stdin: Some(stdin),
            stdout: BufReader::with_capacity(STDOUT_BUFFER_SIZE, stdout),
            stderr: Some(stderr),
        })
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Hand the stderr pipe to a reader task. Returns `None` after the first call.
    pub fn take_stderr(&mut self) -> Option<ChildStderr> {
        self.stderr.take()
    }

    /// Wait up to `timeout` for one byte of stdout.
    ///
    /// Bytes already buffered from the same pipe read are appended up to and
    /// including the first `\n`. Cancel safe: a dropped probe loses no data.
    pub async fn read_chunk(&mut self, timeout: Duration) -> Result<ReadOutcome> {
        let mut probe = [0u8; 1];
        let n = match tokio::time::timeout(timeout, self.stdout.read(&mut probe)).await {
            Err(_) => return Ok(ReadOutcome::TimedOut),
            Ok(result) => result.map_err(ProcessError::Read)?,
        };
        if n == 0 {
            return Ok(ReadOutcome::Closed);
        }

        let mut chunk = vec![probe[0]];
        if probe[0] != b'\n' {
            let buffered = self.stdout.buffer();
            let take = buffered
                .iter()
                .position(|&b| b == b'\n')
                .map(|i| i + 1)
                .unwrap_or(buffered.len());
            chunk.extend_from_slice(&buffered[..take]);
            self.stdout.consume(take);
        }
        Ok(ReadOutcome::Data(chunk))
    }

    /// Read stdout to EOF, split into lines (the last one may be unterminated)
    pub async fn drain_stdout(&mut self) -> Result<Vec<Vec<u8>>> {
        let mut lines = Vec::new();
        loop {
            let mut line = Vec::new();
            let n = self
                .stdout
                .read_until(b'\n', &mut line)
                .await
                .map_err(ProcessError::Read)?;
            if n == 0 {
                break;
            }
            lines.push(line);
        }
        Ok(lines)
    }

    /// Write `line` plus a terminator to the child's stdin and flush
    pub async fn write_line(&mut self, line: &str) -> Result<()> {
        let stdin = self.stdin.as_mut().ok_or(ProcessError::StdinClosed)?;
        stdin.write_all(line.as_bytes()).await.map_err(ProcessError::Write)?;
        stdin.write_all(b"\n").await.map_err(ProcessError::Write)?;
        stdin.flush().await.map_err(ProcessError::Write)?;
        Ok(())
    }

    /// Close the child's stdin so it sees EOF
    pub fn close_stdin(&mut self) {
        self.stdin = None;
    }

    /// Exit code if the child has exited, without blocking
    pub fn try_exit(&mut self) -> Result<Option<i32>> {
        let status = self.child.try_wait().map_err(ProcessError::Wait)?;
        Ok(status.map(exit_code))
    }

    /// Kill the child and reap it. A child that already exited is left alone.
    pub async fn kill(&mut self) -> Result<i32> {
        if let Some(code) = self.try_exit()? {
            return Ok(code);
        }
        self.child.kill().await.map_err(ProcessError::Wait)?;
        let status = self.child.wait().await.map_err(ProcessError::Wait)?;
        Ok(exit_code(status))
    }
}

/// Exit code of `status`; a signal death is reported as the negated signal number
pub fn exit_code(status: ExitStatus) -> i32 {
    if let Some(code) = status.code() {
        return code;
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return -signal;
        }
    }
    -1
}

/// Forward full lines from `stream` until EOF or until the receiver is gone
pub async fn forward_lines<R>(stream: R, tx: UnboundedSender<Vec<u8>>)
where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(stream);
    loop {
        let mut line = Vec::new();
        match reader.read_until(b'\n', &mut line).await {
            Ok(0) => break,
            Ok(_) => {
                if tx.send(line).is_err() {
                    break;
                }
            }
            Err(e) => {
                tracing::debug!("Line reader stopped: {}", e);
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;
    use tokio::sync::mpsc;

    fn script(dir: &TempDir, body: &str) -> std::path::PathBuf {
        let path = dir.path().join("script.sh");
        std::fs::write(&path, body).unwrap();
        path
    }

    async fn read_all(child: &mut ChildProcess) -> Vec<Vec<u8>> {
        let mut chunks = Vec::new();
        loop {
            match child.read_chunk(Duration::from_secs(5)).await.unwrap() {
                ReadOutcome::Data(chunk) => chunks.push(chunk),
                ReadOutcome::Closed => break,
                ReadOutcome::TimedOut => panic!("stdout stalled"),
            }
        }
        chunks
    }

    #[tokio::test]
    async fn test_spawn_missing_program() {
        let dir = TempDir::new().unwrap();
        let path = script(&dir, "");
        let err = ChildProcess::spawn("/nonexistent/interpreter", &[], &path, dir.path())
            .err()
            .unwrap();
        assert!(matches!(err, ProcessError::Spawn { .. }));
    }

    #[tokio::test]
    async fn test_chunks_stop_at_line_terminator() {
        let dir = TempDir::new().unwrap();
        let path = script(&dir, "printf 'one\\ntwo\\nthree'\n");
        let mut child = ChildProcess::spawn("sh", &[], &path, dir.path()).unwrap();

        let chunks = read_all(&mut child).await;
        for chunk in &chunks {
            let newlines = chunk.iter().filter(|&&b| b == b'\n').count();
            assert!(newlines <= 1);
            if newlines == 1 {
                assert_eq!(chunk.last(), Some(&b'\n'));
            }
        }
        assert_eq!(chunks.concat(), b"one\ntwo\nthree".to_vec());
        assert_eq!(child.kill().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_probe_times_out_while_blocked() {
        let dir = TempDir::new().unwrap();
        let path = script(&dir, "read line\necho \"got $line\"\n");
        let mut child = ChildProcess::spawn("sh", &[], &path, dir.path()).unwrap();

        let outcome = child.read_chunk(Duration::from_millis(100)).await.unwrap();
        assert_eq!(outcome, ReadOutcome::TimedOut);

        child.write_line("Ada").await.unwrap();
        let chunks = read_all(&mut child).await;
        assert_eq!(chunks.concat(), b"got Ada\n".to_vec());
    }

    #[tokio::test]
    async fn test_exit_code_and_drain() {
        let dir = TempDir::new().unwrap();
        let path = script(&dir, "echo a\necho b\nexit 3\n");
        let mut child = ChildProcess::spawn("sh", &[], &path, dir.path()).unwrap();

        let lines = child.drain_stdout().await.unwrap();
        assert_eq!(lines, vec![b"a\n".to_vec(), b"b\n".to_vec()]);

        let code = loop {
            if let Some(code) = child.try_exit().unwrap() {
                break code;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        };
        assert_eq!(code, 3);
    }

    #[tokio::test]
    async fn test_kill_reports_signal() {
        let dir = TempDir::new().unwrap();
        let path = script(&dir, "sleep 30\n");
        let mut child = ChildProcess::spawn("sh", &[], &path, dir.path()).unwrap();

        let code = child.kill().await.unwrap();
        assert_eq!(code, -9);
    }

    #[tokio::test]
    async fn test_forward_lines() {
        let dir = TempDir::new().unwrap();
        let path = script(&dir, "echo one >&2\necho two >&2\n");
        let mut child = ChildProcess::spawn("sh", &[], &path, dir.path()).unwrap();

        let (tx, mut rx) = mpsc::unbounded_channel();
        forward_lines(child.take_stderr().unwrap(), tx).await;
        assert_eq!(rx.recv().await.unwrap(), b"one\n".to_vec());
        assert_eq!(rx.recv().await.unwrap(), b"two\n".to_vec());
        assert_eq!(rx.recv().await, None);
        assert!(child.take_stderr().is_none());
    }
}
