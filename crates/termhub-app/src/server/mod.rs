//! PTY server for `termhub serve`
//!
//! Every WebSocket under `/{prefix}/...` gets its own shell. Binary frames and
//! single characters are keystrokes, a `{"type":"resize",...}` text frame
//! resizes the PTY, and shell output goes back as binary frames.

pub mod pty;

use std::collections::HashMap;
use std::io::Read;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::{
    extract::{
        ws::{Message, WebSocket},
        Path, Query, State, WebSocketUpgrade,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use colored::Colorize;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpListener;
use tokio::sync::mpsc;

use termhub_types::{Geometry, ShellInput, DEFAULT_COLS, DEFAULT_ROWS};

use crate::config::ServerSettings;
use pty::PtyProcess;

/// Bytes read from a PTY per output frame at most
const READ_CHUNK: usize = 4096;

#[derive(Clone)]
pub struct ServerState {
    shell: Arc<str>,
    token: Option<Arc<str>>,
}

/// Routes for the socket endpoints of `settings`
pub fn router(settings: &ServerSettings) -> Router {
    let state = ServerState {
        shell: Arc::from(settings.shell.as_str()),
        token: settings.token.as_deref().map(Arc::from),
    };
    let prefix = settings.prefix.trim_matches('/');
    let path = if prefix.is_empty() {
        "/*endpoint".to_string()
    } else {
        format!("/{}/*endpoint", prefix)
    };
    Router::new()
        .route(&path, get(socket_handler))
        .with_state(state)
}

pub async fn serve(settings: ServerSettings) -> Result<()> {
    let listener = TcpListener::bind(settings.bind)
        .await
        .with_context(|| format!("Failed to bind {}", settings.bind))?;
    println!(
        "{}",
        format!("termhub serving {} on ws://{}/{}/", settings.shell, settings.bind, settings.prefix)
            .bright_cyan()
    );
    serve_on(listener, settings).await
}

/// Serve on an already bound listener until Ctrl-C
pub async fn serve_on(listener: TcpListener, settings: ServerSettings) -> Result<()> {
    let app = router(&settings);
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if tokio::signal::ctrl_c().await.is_ok() {
                log::info!("Shutting down");
            }
        })
        .await
        .context("Server failed")
}

async fn socket_handler(
    ws: WebSocketUpgrade,
    State(state): State<ServerState>,
    Path(endpoint): Path<String>,
    Query(query): Query<HashMap<String, String>>,
) -> Response {
    if let Some(expected) = &state.token {
        if query.get("token").map(String::as_str) != Some(expected.as_ref()) {
            log::warn!("Rejecting connection to {} with a bad token", endpoint);
            return StatusCode::UNAUTHORIZED.into_response();
        }
    }
    ws.on_upgrade(move |socket| handle_socket(socket, state, endpoint))
}

async fn handle_socket(socket: WebSocket, state: ServerState, endpoint: String) {
    let mut pty = match PtyProcess::spawn(&state.shell, Geometry::new(DEFAULT_ROWS, DEFAULT_COLS))
    {
        Ok(pty) => pty,
        Err(e) => {
            log::error!("{:#}", e);
            return;
        }
    };
    let Some(reader) = pty.take_reader() else {
        return;
    };
    log::info!(
        "Shell {} started for {} (pid {:?})",
        state.shell,
        endpoint,
        pty.process_id()
    );

    let (output_tx, mut output_rx) = mpsc::channel::<Vec<u8>>(64);
    std::thread::spawn(move || pump_output(reader, output_tx));

    let (mut sink, mut stream) = socket.split();
    loop {
        tokio::select! {
            chunk = output_rx.recv() => match chunk {
                Some(bytes) => {
                    if sink.send(Message::Binary(bytes)).await.is_err() {
                        break;
                    }
                }
                None => {
                    log::info!("Shell for {} exited", endpoint);
                    let _ = sink.send(Message::Close(None)).await;
                    break;
                }
            },
            message = stream.next() => match message {
                Some(Ok(Message::Binary(bytes))) => write_input(&mut pty, &bytes),
                Some(Ok(Message::Text(text))) => match ShellInput::classify(&text) {
                    ShellInput::Keys(keys) => write_input(&mut pty, keys.as_bytes()),
                    ShellInput::Resize(geometry) => {
                        log::debug!("Resizing {} to {}", endpoint, geometry);
                        if let Err(e) = pty.resize(geometry) {
                            log::warn!("{:#}", e);
                        }
                    }
                    ShellInput::Empty => {}
                },
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    log::debug!("Socket for {} failed: {}", endpoint, e);
                    break;
                }
            },
        }
    }

    log::info!("Closing shell for {}", endpoint);
    // Termination waits briefly for the shell to exit
    let _ = tokio::task::spawn_blocking(move || drop(pty)).await;
}

fn write_input(pty: &mut PtyProcess, bytes: &[u8]) {
    if let Err(e) = pty.write(bytes) {
        log::warn!("{:#}", e);
    }
}

/// Forward blocking PTY reads until the shell goes away
fn pump_output(mut reader: Box<dyn Read + Send>, output: mpsc::Sender<Vec<u8>>) {
    let mut buf = [0u8; READ_CHUNK];
    loop {
        match reader.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => {
                if output.blocking_send(buf[..n].to_vec()).is_err() {
                    break;
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => {
                log::debug!("PTY read ended: {}", e);
                break;
            }
        }
    }
}
