//! WebSocket transport
//!
//! Clients connect to `ws://host:port/session` and exchange JSON array
//! messages (see [`super::protocol`]). Any other path is closed with code 4000.

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::accept_hdr_async;
use tokio_tungstenite::tungstenite::handshake::server::{
    Request as WsRequest, Response as WsResponse,
};
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tracing::{error, info, warn};

use super::connection::Connection;
use crate::config::{RunnerConfig, ServerConfig};

/// Path the session endpoint is served on
pub const SESSION_PATH: &str = "/session";

fn close_frame(code: u16, reason: impl Into<String>) -> CloseFrame<'static> {
    CloseFrame {
        code: CloseCode::from(code),
        reason: reason.into().into(),
    }
}

/// Accept connections until Ctrl+C
pub async fn serve(server: &ServerConfig, runner: RunnerConfig) -> anyhow::Result<()> {
    let listener = TcpListener::bind(server.bind_addr()).await?;
    info!("Listening on ws://{}{}", listener.local_addr()?, SESSION_PATH);
    serve_listener(listener, runner).await
}

/// Accept connections on an already bound listener until Ctrl+C
pub async fn serve_listener(listener: TcpListener, runner: RunnerConfig) -> anyhow::Result<()> {
    loop {
        tokio::select! {
            result = listener.accept() => {
                match result {
                    Ok((stream, addr)) => {
                        let runner = runner.clone();
                        tokio::spawn(async move {
                            if let Err(e) = handle_connection(stream, addr, runner).await {
                                error!("Connection {} failed: {}", addr, e);
                            }
                        });
                    }
                    Err(e) => error!("Failed to accept connection: {}", e),
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Shutting down");
                return Ok(());
            }
        }
    }
}

async fn handle_connection(
    stream: TcpStream,
    addr: SocketAddr,
    runner: RunnerConfig,
) -> anyhow::Result<()> {
    // capture the request path from the handshake
    let path_cell = Arc::new(Mutex::new(String::new()));
    let path_cell2 = Arc::clone(&path_cell);

    let ws_stream = accept_hdr_async(stream, move |req: &WsRequest, resp: WsResponse| {
        if let Ok(mut path) = path_cell2.lock() {
            *path = req.uri().path().to_string();
        }
        Ok(resp)
    })
    .await?;

    let path = path_cell
        .lock()
        .map(|p| p.clone())
        .unwrap_or_else(|_| "/".to_string());

    let (mut ws_tx, mut ws_rx) = ws_stream.split();

    if path != SESSION_PATH {
        warn!("Rejecting {} on invalid path {}", addr, path);
        let _ = ws_tx
            .send(Message::Close(Some(close_frame(
                4000,
                format!("Invalid URL. Use {}", SESSION_PATH),
            ))))
            .await;
        return Ok(());
    }

    info!("Client connected: {}", addr);

    let (out_tx, mut out_rx) = mpsc::unbounded_channel::<String>();
    let writer = tokio::spawn(async move {
        while let Some(text) = out_rx.recv().await {
            if ws_tx.send(Message::Text(text)).await.is_err() {
                break;
            }
        }
        let _ = ws_tx.close().await;
    });

    let mut connection = Connection::new(runner, out_tx);
    while let Some(message) = ws_rx.next().await {
        match message {
            Ok(Message::Text(text)) => connection.handle_text(&text).await,
            Ok(Message::Binary(bytes)) => match String::from_utf8(bytes) {
                Ok(text) => connection.handle_text(&text).await,
                Err(_) => warn!("Ignoring non UTF-8 binary message from {}", addr),
            },
            Ok(Message::Close(_)) => break,
            Ok(_) => {}
            Err(e) => {
                warn!("Read error from {}: {}", addr, e);
                break;
            }
        }
    }

    info!("Client disconnected: {}", addr);
    // cancels live runs; dropping the connection also closes the writer channel
    connection.close().await;
    let _ = writer.await;
    Ok(())
}
