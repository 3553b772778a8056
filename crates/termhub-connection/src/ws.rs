//! tokio-tungstenite implementation of [`Transport`]

use std::collections::HashMap;

use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};

use termhub_types::{AuthorizationError, TransportError};

use crate::transport::{Incoming, SocketEvent, SocketFailure, SocketId, Transport, TransportEvent};

enum Outbound {
    Frame(String),
    Close,
}

struct SocketTask {
    outbound: mpsc::UnboundedSender<Outbound>,
    handle: JoinHandle<()>,
}

/// One spawned task per socket; every event lands on the channel returned by [`WsTransport::new`]
pub struct WsTransport {
    events: mpsc::UnboundedSender<TransportEvent>,
    sockets: HashMap<SocketId, SocketTask>,
}

impl WsTransport {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<TransportEvent>) {
        let (events, rx) = mpsc::unbounded_channel();
        let transport = Self {
            events,
            sockets: HashMap::new(),
        };
        (transport, rx)
    }
}

impl Transport for WsTransport {
    fn open(&mut self, socket: SocketId, url: &str) {
        self.sockets.retain(|_, task| !task.handle.is_finished());
        let (outbound, rx) = mpsc::unbounded_channel();
        let handle = tokio::spawn(run_socket(
            socket,
            url.to_string(),
            rx,
            self.events.clone(),
        ));
        self.sockets.insert(socket, SocketTask { outbound, handle });
    }

    fn send(&mut self, socket: SocketId, frame: &str) -> Result<(), TransportError> {
        let task = self.sockets.get(&socket).ok_or(TransportError::NotOpen)?;
        task.outbound
            .send(Outbound::Frame(frame.to_string()))
            .map_err(|_| TransportError::NotOpen)
    }

    fn close(&mut self, socket: SocketId) {
        if let Some(task) = self.sockets.remove(&socket) {
            if task.outbound.send(Outbound::Close).is_err() {
                task.handle.abort();
            }
        }
    }
}

impl Drop for WsTransport {
    fn drop(&mut self) {
        for (_, task) in self.sockets.drain() {
            task.handle.abort();
        }
    }
}

async fn run_socket(
    socket: SocketId,
    url: String,
    mut outbound: mpsc::UnboundedReceiver<Outbound>,
    events: mpsc::UnboundedSender<TransportEvent>,
) {
    let emit = |event: SocketEvent| {
        let _ = events.send(TransportEvent::new(socket, event));
    };

    let stream = match connect_async(url.as_str()).await {
        Ok((stream, _response)) => stream,
        Err(e) => {
            emit(SocketEvent::Error(classify_connect_error(&url, e)));
            return;
        }
    };
    emit(SocketEvent::Opened);

    let (mut sink, mut stream) = stream.split();
    loop {
        tokio::select! {
            command = outbound.recv() => match command {
                Some(Outbound::Frame(text)) => {
                    if let Err(e) = sink.send(Message::Text(text.into())).await {
                        emit(SocketEvent::Error(SocketFailure::Transport(TransportError::Io(
                            e.to_string(),
                        ))));
                        return;
                    }
                }
                Some(Outbound::Close) | None => {
                    let _ = sink.send(Message::Close(None)).await;
                    let _ = sink.close().await;
                    emit(SocketEvent::Closed {
                        code: Some(1000),
                        reason: "closed by client".to_string(),
                    });
                    return;
                }
            },
            incoming = stream.next() => match incoming {
                Some(Ok(Message::Text(text))) => {
                    emit(SocketEvent::Message(Incoming::Text(text.as_str().to_owned())));
                }
                Some(Ok(Message::Binary(bytes))) => {
                    emit(SocketEvent::Message(Incoming::Binary(bytes.to_vec())));
                }
                Some(Ok(Message::Close(frame))) => {
                    let (code, reason) = match frame {
                        Some(frame) => (Some(u16::from(frame.code)), frame.reason.as_str().to_owned()),
                        None => (None, String::new()),
                    };
                    emit(SocketEvent::Closed { code, reason });
                    return;
                }
                // Ping/pong are answered by tungstenite itself
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    emit(SocketEvent::Error(SocketFailure::Transport(TransportError::Io(
                        e.to_string(),
                    ))));
                    return;
                }
                None => {
                    emit(SocketEvent::Closed {
                        code: None,
                        reason: String::new(),
                    });
                    return;
                }
            },
        }
    }
}

/// 401/403 handshake responses are authorization failures, everything else is retryable
fn classify_connect_error(url: &str, error: WsError) -> SocketFailure {
    if let WsError::Http(response) = &error {
        let status = response.status().as_u16();
        if status == 401 || status == 403 {
            return SocketFailure::Unauthorized(AuthorizationError {
                reason: format!("Unauthorized (HTTP {})", status),
            });
        }
    }
    SocketFailure::Transport(TransportError::Connect {
        url: url.to_string(),
        reason: error.to_string(),
    })
}
