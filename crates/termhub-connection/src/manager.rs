//! Single-socket connection with bounded automatic reconnection

use std::time::Duration;

use termhub_types::{
    AuthorizationError, ReadyState, TermhubError, DEFAULT_RECONNECT_INTERVAL_MS,
    DEFAULT_RECONNECT_LIMIT, TERMINAL_RECONNECT_INTERVAL_MS, TERMINAL_RECONNECT_LIMIT,
};

use crate::endpoint::EndpointResolver;
use crate::timer::{Scheduler, TimerId};
use crate::transport::{Incoming, SocketEvent, SocketFailure, SocketId, Transport, TransportEvent};

/// What inbound text on this connection means
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionMode {
    /// Raw shell output for the active terminal session
    #[default]
    Terminal,
    /// JSON frames for the command router
    Channel,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionOptions {
    pub reconnect_limit: u32,
    pub reconnect_interval: Duration,
    /// When set, nothing is opened until `connect()` is called
    pub manual: bool,
    pub mode: ConnectionMode,
}

impl Default for ConnectionOptions {
    fn default() -> Self {
        Self {
            reconnect_limit: DEFAULT_RECONNECT_LIMIT,
            reconnect_interval: Duration::from_millis(DEFAULT_RECONNECT_INTERVAL_MS),
            manual: false,
            mode: ConnectionMode::Terminal,
        }
    }
}

impl ConnectionOptions {
    /// Settings used by the terminal client: more patience, explicit connect
    pub fn terminal() -> Self {
        Self {
            reconnect_limit: TERMINAL_RECONNECT_LIMIT,
            reconnect_interval: Duration::from_millis(TERMINAL_RECONNECT_INTERVAL_MS),
            manual: true,
            mode: ConnectionMode::Terminal,
        }
    }
}

/// What the owner of the connection needs to react to
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionSignal {
    Opened,
    Message(Incoming),
    Closed { retrying: bool },
    Failed { error: TermhubError, retrying: bool },
    /// A reconnect timer fired and a new socket is being opened
    Reconnecting { attempt: u32 },
}

/// Narrow handle on the connection handed to the session layer
pub trait Link {
    /// Open the socket unless it is already open or opening
    fn request_open(&mut self);
    fn is_open(&self) -> bool;
    /// Send a frame if the socket is open; returns whether it was handed to the transport
    fn send_frame(&mut self, frame: &str) -> bool;
}

/// Keeps at most one live socket to the current endpoint
///
/// All socket callbacks arrive through [`ConnectionManager::handle_event`] and
/// all timer expiries through [`ConnectionManager::handle_timer`]. Events from a
/// socket other than the current one are ignored, which is what makes
/// `disconnect()` followed by `connect()` safe: the old socket's late close
/// can neither null out the new one nor schedule a reconnect.
pub struct ConnectionManager<T, S> {
    transport: T,
    scheduler: S,
    resolver: EndpointResolver,
    endpoint: String,
    options: ConnectionOptions,
    state: ReadyState,
    current: Option<SocketId>,
    next_socket: u64,
    reconnect_attempts: u32,
    reconnect_timer: Option<TimerId>,
}

impl<T: Transport, S: Scheduler> ConnectionManager<T, S> {
    pub fn new(
        transport: T,
        scheduler: S,
        resolver: EndpointResolver,
        endpoint: impl Into<String>,
        options: ConnectionOptions,
    ) -> Self {
        let mut manager = Self {
            transport,
            scheduler,
            resolver,
            endpoint: endpoint.into(),
            options,
            state: ReadyState::Closed,
            current: None,
            next_socket: 0,
            reconnect_attempts: 0,
            reconnect_timer: None,
        };
        if !manager.options.manual && !manager.endpoint.is_empty() {
            manager.connect();
        }
        manager
    }

    // ------------------------------------------------------------------
    // Commands
    // ------------------------------------------------------------------

    /// Open a socket to the current endpoint
    ///
    /// A no-op while a socket is already connecting or open. Otherwise the
    /// reconnect budget is reset and any pending reconnect is cancelled.
    pub fn connect(&mut self) {
        if self.current.is_some()
            && matches!(self.state, ReadyState::Connecting | ReadyState::Open)
        {
            log::debug!("connect() ignored, socket is {}", self.state);
            return;
        }
        self.reconnect_attempts = 0;
        self.open_socket();
    }

    /// Close the socket and suppress any further reconnection
    pub fn disconnect(&mut self) {
        self.cancel_reconnect();
        self.reconnect_attempts = self.options.reconnect_limit;
        if let Some(socket) = self.current.take() {
            log::info!("Closing socket {} to {}", socket, self.url());
            self.transport.close(socket);
        }
        self.state = ReadyState::Closed;
    }

    /// Point the connection at another endpoint and connect to it
    pub fn change_endpoint(&mut self, endpoint: impl Into<String>) {
        let endpoint = endpoint.into();
        log::info!("Changing endpoint to: {}", endpoint);
        if self.state != ReadyState::Closed {
            self.disconnect();
        }
        self.endpoint = endpoint;
        self.connect();
    }

    /// Send a text frame; dropped with a warning unless the socket is open
    pub fn send(&mut self, frame: &str) -> bool {
        let socket = match (self.state, self.current) {
            (ReadyState::Open, Some(socket)) => socket,
            _ => {
                log::warn!("Socket is not open ({}). Message not sent.", self.state);
                return false;
            }
        };
        match self.transport.send(socket, frame) {
            Ok(()) => true,
            Err(e) => {
                log::warn!("Send on socket {} failed: {}", socket, e);
                false
            }
        }
    }

    // ------------------------------------------------------------------
    // Events
    // ------------------------------------------------------------------

    pub fn handle_event(&mut self, event: TransportEvent) -> Option<ConnectionSignal> {
        let TransportEvent { socket, event } = event;
        if self.current != Some(socket) {
            log::debug!("Ignoring {} event from superseded socket {}", event.kind(), socket);
            return None;
        }

        match event {
            SocketEvent::Opened => {
                log::info!("WebSocket connection opened to {}", self.url());
                self.state = ReadyState::Open;
                self.reconnect_attempts = 0;
                Some(ConnectionSignal::Opened)
            }
            SocketEvent::Message(incoming) => Some(ConnectionSignal::Message(incoming)),
            SocketEvent::Closed { code, reason } => {
                log::info!(
                    "WebSocket connection closed (code {:?}, reason {:?})",
                    code,
                    reason
                );
                self.current = None;
                self.state = ReadyState::Closed;
                if is_unauthorized(&reason) {
                    let error = AuthorizationError { reason };
                    return Some(self.fail_permanently(error));
                }
                let retrying = self.schedule_reconnect();
                Some(ConnectionSignal::Closed { retrying })
            }
            SocketEvent::Error(failure) => {
                log::error!("WebSocket error on socket {}: {:?}", socket, failure);
                self.current = None;
                self.state = ReadyState::Closed;
                match failure {
                    SocketFailure::Unauthorized(error) => Some(self.fail_permanently(error)),
                    SocketFailure::Transport(error) => {
                        let retrying = self.schedule_reconnect();
                        Some(ConnectionSignal::Failed {
                            error: error.into(),
                            retrying,
                        })
                    }
                }
            }
        }
    }

    /// Fire a reconnect timer; unknown or cancelled timers are ignored
    pub fn handle_timer(&mut self, timer: TimerId) -> Option<ConnectionSignal> {
        if self.reconnect_timer != Some(timer) {
            log::debug!("Ignoring stale timer {:?}", timer);
            return None;
        }
        self.reconnect_timer = None;
        self.open_socket();
        self.reconnect_attempts += 1;
        log::info!(
            "Reconnect attempt {}/{} to {}",
            self.reconnect_attempts,
            self.options.reconnect_limit,
            self.url()
        );
        Some(ConnectionSignal::Reconnecting {
            attempt: self.reconnect_attempts,
        })
    }

    // ------------------------------------------------------------------
    // Observability
    // ------------------------------------------------------------------

    pub fn ready_state(&self) -> ReadyState {
        self.state
    }

    pub fn ready_state_str(&self) -> &'static str {
        self.state.as_str()
    }

    pub fn reconnect_attempts(&self) -> u32 {
        self.reconnect_attempts
    }

    pub fn has_pending_reconnect(&self) -> bool {
        self.reconnect_timer.is_some()
    }

    pub fn current_socket(&self) -> Option<SocketId> {
        self.current
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn url(&self) -> String {
        self.resolver.resolve(&self.endpoint)
    }

    pub fn options(&self) -> &ConnectionOptions {
        &self.options
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    pub fn scheduler(&self) -> &S {
        &self.scheduler
    }

    pub fn scheduler_mut(&mut self) -> &mut S {
        &mut self.scheduler
    }

    // ------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------

    fn open_socket(&mut self) {
        self.cancel_reconnect();
        if let Some(old) = self.current.take() {
            log::debug!("Closing leftover socket {}", old);
            self.transport.close(old);
        }
        self.next_socket += 1;
        let socket = SocketId(self.next_socket);
        let url = self.url();
        log::info!("Opening socket {} to {}", socket, url);
        self.current = Some(socket);
        self.state = ReadyState::Connecting;
        self.transport.open(socket, &url);
    }

    fn schedule_reconnect(&mut self) -> bool {
        if self.reconnect_attempts >= self.options.reconnect_limit {
            log::warn!("Reconnect limit reached. Stopping further attempts.");
            return false;
        }
        self.cancel_reconnect();
        let timer = self.scheduler.schedule(self.options.reconnect_interval);
        log::info!(
            "Reconnecting in {:?} (attempt {}/{})",
            self.options.reconnect_interval,
            self.reconnect_attempts + 1,
            self.options.reconnect_limit
        );
        self.reconnect_timer = Some(timer);
        true
    }

    fn cancel_reconnect(&mut self) {
        if let Some(timer) = self.reconnect_timer.take() {
            self.scheduler.cancel(timer);
        }
    }

    fn fail_permanently(&mut self, error: AuthorizationError) -> ConnectionSignal {
        log::error!("Unauthorized access. Stopping reconnection attempts.");
        self.cancel_reconnect();
        self.reconnect_attempts = self.options.reconnect_limit;
        ConnectionSignal::Failed {
            error: error.into(),
            retrying: false,
        }
    }
}

impl<T: Transport, S: Scheduler> Link for ConnectionManager<T, S> {
    fn request_open(&mut self) {
        self.connect();
    }

    fn is_open(&self) -> bool {
        self.state.is_open()
    }

    fn send_frame(&mut self, frame: &str) -> bool {
        self.send(frame)
    }
}

fn is_unauthorized(reason: &str) -> bool {
    reason.contains("Unauthorized")
}
