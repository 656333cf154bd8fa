//! JSON-lines transport over stdin/stdout
//!
//! One command per input line, one message per output line. After EOF on
//! stdin no more input can arrive, so live runs are left to finish on their
//! own.

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;
use tracing::info;

use super::connection::Connection;
use crate::config::RunnerConfig;

/// Serve a single connection on the process's own stdin/stdout
pub async fn serve(runner: RunnerConfig) -> anyhow::Result<()> {
    serve_io(BufReader::new(tokio::io::stdin()), tokio::io::stdout(), runner).await
}

/// Serve a single connection on arbitrary line-oriented streams
pub async fn serve_io<R, W>(reader: R, mut writer: W, runner: RunnerConfig) -> anyhow::Result<()>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (out_tx, mut out_rx) = mpsc::unbounded_channel::<String>();
    let writer_task = tokio::spawn(async move {
        while let Some(text) = out_rx.recv().await {
            if writer.write_all(text.as_bytes()).await.is_err()
                || writer.write_all(b"\n").await.is_err()
                || writer.flush().await.is_err()
            {
                break;
            }
        }
    });

    let mut connection = Connection::new(runner, out_tx);
    let mut lines = reader.lines();
    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        connection.handle_text(&line).await;
    }

    info!("stdin closed, waiting for {} live session(s)", connection.live_sessions());
    connection.wait().await;
    let _ = writer_task.await;
    Ok(())
}
