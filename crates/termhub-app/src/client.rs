//! Async client runtime
//!
//! One task owns the connection, the session registry, the command router and
//! the resize coordinator, and reacts to socket events, reconnect timers,
//! debounce deadlines and front-end commands from a single `select!` loop.
//! Nothing here is shared between tasks, so nothing is locked.

use std::time::Instant;

use serde_json::Value;
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender};

use termhub_connection::{
    CommandRouter, ConnectionManager, ConnectionMode, ConnectionSignal, DispatchOutcome,
    EndpointResolver, Incoming, Registration, RouteKey, TimerId, TokioScheduler, TransportEvent,
    WsTransport,
};
use termhub_terminal::{
    ContainerSize, KeyValueStore, PanelState, ResizeCoordinator, ScreenViewFactory, SessionId,
    SessionInfo, SessionRegistry,
};
use termhub_types::{ChannelFrame, CommandRequest, CorrelationId, ReadyState};

use crate::config::ClientSettings;

/// Height of the panel toggle button in pixels
const TOGGLE_BUTTON_HEIGHT: u32 = 40;

/// Requests from the front end
#[derive(Debug, Clone, PartialEq)]
pub enum ClientCommand {
    /// Keyboard input for the active session
    Input(String),
    NewSession,
    /// Switch to the session at this 1-based position
    Switch(usize),
    /// Close the session at this 1-based position, or the active one
    Close(Option<usize>),
    Reset,
    Stop,
    List,
    Reconnect,
    Endpoint(String),
    Resize(ContainerSize),
    TogglePanel,
    Call {
        namespace: String,
        func_name: String,
        args: Vec<Value>,
    },
    Quit,
}

/// Things the front end should show
#[derive(Debug, Clone, PartialEq)]
pub enum ClientEvent {
    /// Live output of the active session
    Output(Vec<u8>),
    /// Full screen of a session that just became active
    Redraw(String),
    Connection(ReadyState),
    Sessions {
        sessions: Vec<SessionInfo>,
        active: Option<SessionId>,
    },
    Reply {
        namespace: String,
        command: String,
        data: Value,
    },
    PanelVisible(bool),
    Notice(String),
}

pub struct ClientRuntime {
    connection: ConnectionManager<WsTransport, TokioScheduler>,
    socket_events: UnboundedReceiver<TransportEvent>,
    timers: UnboundedReceiver<TimerId>,
    registry: SessionRegistry,
    router: CommandRouter,
    resize: ResizeCoordinator,
    panel: PanelState,
    store: Box<dyn KeyValueStore>,
    events: UnboundedSender<ClientEvent>,
    mode: ConnectionMode,
    next_call: i64,
    /// Outstanding call replies and the session that was active when each was made
    pending_calls: Vec<(Option<SessionId>, RouteKey)>,
}

impl ClientRuntime {
    /// Must be called inside a tokio runtime; an auto-connecting client opens its socket here
    pub fn new(
        settings: &ClientSettings,
        store: Box<dyn KeyValueStore>,
        viewport: ContainerSize,
        events: UnboundedSender<ClientEvent>,
    ) -> Self {
        let (transport, socket_events) = WsTransport::new();
        let (scheduler, timers) = TokioScheduler::new();
        let resolver = EndpointResolver::new(settings.host.clone(), settings.secure)
            .with_prefix(settings.prefix.clone())
            .with_token(settings.token.clone());
        let connection = ConnectionManager::new(
            transport,
            scheduler,
            resolver,
            settings.endpoint.clone(),
            settings.connection_options(),
        );
        let mut registry =
            SessionRegistry::with_capacity(ScreenViewFactory::default(), settings.max_sessions);
        let mut resize = ResizeCoordinator::new(settings.resize_debounce);
        registry.set_surface(resize.observe(viewport, store.as_ref(), Instant::now()));
        let panel = PanelState::load(
            store.as_ref(),
            viewport.viewport_height_px,
            TOGGLE_BUTTON_HEIGHT,
            true,
        );

        Self {
            connection,
            socket_events,
            timers,
            registry,
            router: CommandRouter::new(),
            resize,
            panel,
            store,
            events,
            mode: settings.mode,
            next_call: 1,
            pending_calls: Vec::new(),
        }
    }

    pub async fn run(mut self, mut commands: UnboundedReceiver<ClientCommand>) {
        log::info!("Client runtime started for {}", self.connection.url());
        loop {
            let deadline = self.resize.deadline().map(tokio::time::Instant::from_std);
            tokio::select! {
                Some(event) = self.socket_events.recv() => {
                    if let Some(signal) = self.connection.handle_event(event) {
                        self.on_signal(signal);
                    }
                }
                Some(timer) = self.timers.recv() => {
                    if let Some(signal) = self.connection.handle_timer(timer) {
                        self.on_signal(signal);
                    }
                }
                _ = sleep_until(deadline) => {
                    self.resize.poll(Instant::now(), &mut self.registry, &mut self.connection);
                }
                command = commands.recv() => match command {
                    Some(ClientCommand::Quit) | None => break,
                    Some(command) => self.on_command(command),
                },
            }
        }
        self.shutdown();
    }

    fn shutdown(&mut self) {
        log::info!("Client runtime stopping");
        self.router.clear();
        if let Err(e) = self.registry.close_all() {
            log::warn!("{}", e);
        }
        self.connection.disconnect();
    }

    // ========================================================================
    // Connection signals
    // ========================================================================

    fn on_signal(&mut self, signal: ConnectionSignal) {
        match signal {
            ConnectionSignal::Opened => {
                self.registry.on_connection_open(&mut self.connection);
                self.emit(ClientEvent::Connection(ReadyState::Open));
            }
            ConnectionSignal::Message(incoming) => self.on_message(incoming),
            ConnectionSignal::Closed { retrying } => {
                self.emit(ClientEvent::Connection(ReadyState::Closed));
                if !retrying {
                    self.notice("Connection closed, not retrying. Use ~reconnect to try again.");
                }
            }
            ConnectionSignal::Failed { error, retrying } => {
                self.emit(ClientEvent::Connection(ReadyState::Closed));
                let suffix = if retrying { ", retrying" } else { "" };
                self.notice(format!("Connection failed: {}{}", error, suffix));
            }
            ConnectionSignal::Reconnecting { attempt } => {
                self.emit(ClientEvent::Connection(ReadyState::Connecting));
                log::info!("Reconnect attempt {}", attempt);
            }
        }
    }

    fn on_message(&mut self, incoming: Incoming) {
        match self.mode {
            ConnectionMode::Terminal => {
                self.registry.write_output(incoming.as_bytes());
                if self.panel.is_visible() && self.registry.active_session_id().is_some() {
                    self.emit(ClientEvent::Output(incoming.as_bytes().to_vec()));
                }
            }
            ConnectionMode::Channel => match incoming.as_text() {
                Some(text) => self.route(text),
                None => log::debug!("Ignoring binary frame in channel mode"),
            },
        }
    }

    /// Dispatch a channel frame; call replies are one-shot and deregistered on delivery
    fn route(&mut self, raw: &str) {
        let frame = match ChannelFrame::parse(raw) {
            Ok(frame) => frame,
            Err(e) => {
                log::warn!("Dropping malformed frame: {}", e);
                return;
            }
        };
        if self.router.dispatch_frame(&frame) == DispatchOutcome::Delivered {
            let key = RouteKey::new(frame.namespace, frame.command)
                .with_correlation(frame.correlation_id);
            self.router.deregister(&key);
            self.pending_calls.retain(|(_, pending)| pending != &key);
        }
    }

    // ========================================================================
    // Front-end commands
    // ========================================================================

    fn on_command(&mut self, command: ClientCommand) {
        let active_before = self.registry.active_session_id();
        self.apply(command);
        // Close, stop, reset and Ctrl-D can remove a background session too
        self.drop_orphaned_calls();
        if self.registry.active_session_id() != active_before {
            self.redraw();
        }
    }

    fn apply(&mut self, command: ClientCommand) {
        match command {
            ClientCommand::Input(text) => {
                if let Err(e) = self.registry.handle_input(&text, &mut self.connection) {
                    self.notice(e.to_string());
                }
            }
            ClientCommand::NewSession => match self.registry.create_session(&mut self.connection) {
                Ok(id) => {
                    self.sync_size();
                    self.notice(format!("Created session {}", id));
                }
                Err(e) => self.notice(e.to_string()),
            },
            ClientCommand::Switch(position) => match self.session_at(position) {
                Some(id) => {
                    if let Err(e) = self.registry.change_to_session(id, None) {
                        self.notice(e.to_string());
                    }
                    self.sync_size();
                }
                None => self.notice(format!("No session at position {}", position)),
            },
            ClientCommand::Close(position) => {
                let target = match position {
                    Some(position) => self.session_at(position),
                    None => self.registry.active_session_id(),
                };
                match target {
                    Some(id) => {
                        if let Err(e) = self.registry.close_session(id) {
                            self.notice(e.to_string());
                        }
                    }
                    None => self.notice("No session to close"),
                }
            }
            ClientCommand::Reset => match self.registry.reset_active(&mut self.connection) {
                Ok(id) => {
                    self.sync_size();
                    self.notice(format!("Reset to session {}", id));
                }
                Err(e) => self.notice(e.to_string()),
            },
            ClientCommand::Stop => {
                if let Err(e) = self.registry.stop_active() {
                    self.notice(e.to_string());
                }
            }
            ClientCommand::List => self.emit(ClientEvent::Sessions {
                sessions: self.registry.session_infos(),
                active: self.registry.active_session_id(),
            }),
            ClientCommand::Reconnect => {
                self.connection.connect();
                self.emit(ClientEvent::Connection(self.connection.ready_state()));
            }
            ClientCommand::Endpoint(endpoint) => {
                self.connection.change_endpoint(endpoint);
                self.emit(ClientEvent::Connection(self.connection.ready_state()));
            }
            ClientCommand::Resize(container) => {
                self.resize
                    .observe(container, self.store.as_ref(), Instant::now());
            }
            ClientCommand::TogglePanel => {
                let visible = self.panel.click(self.store.as_mut());
                self.emit(ClientEvent::PanelVisible(visible));
                if visible {
                    self.redraw();
                }
            }
            ClientCommand::Call {
                namespace,
                func_name,
                args,
            } => self.call(namespace, func_name, args),
            ClientCommand::Quit => {}
        }
    }

    fn call(&mut self, namespace: String, func_name: String, args: Vec<Value>) {
        let id = CorrelationId::from(self.next_call);
        self.next_call += 1;
        let request = CommandRequest::new(func_name.clone(), id).with_args(args);

        let events = self.events.clone();
        let reply_namespace = namespace.clone();
        let registration = Registration::new(move |data, _args| {
            let _ = events.send(ClientEvent::Reply {
                namespace: reply_namespace.clone(),
                command: func_name.clone(),
                data: data.clone(),
            });
        });

        let key = RouteKey::new(namespace.clone(), request.func_name.clone())
            .with_correlation(request.unique_id.clone());
        match self.router.request(namespace, request, registration) {
            Ok(frame) => {
                if self.connection.send(&frame) {
                    self.pending_calls
                        .push((self.registry.active_session_id(), key));
                } else {
                    self.router.deregister(&key);
                    self.notice("Not connected, call dropped");
                }
            }
            Err(e) => self.notice(e.to_string()),
        }
    }

    // ========================================================================
    // Helpers
    // ========================================================================

    /// Deregister replies owned by sessions that no longer exist
    fn drop_orphaned_calls(&mut self) {
        let registry = &self.registry;
        let router = &mut self.router;
        self.pending_calls.retain(|(owner, key)| match owner {
            Some(id) if registry.session(*id).is_none() => {
                router.deregister(key);
                false
            }
            _ => true,
        });
    }

    /// Registered reply handlers still waiting for a frame
    pub fn outstanding_calls(&self) -> usize {
        self.router.len()
    }

    fn session_at(&self, position: usize) -> Option<SessionId> {
        position
            .checked_sub(1)
            .and_then(|index| self.registry.sessions().get(index))
            .map(|s| s.id())
    }

    /// Refit the active session right away instead of waiting for the next resize
    fn sync_size(&mut self) {
        self.registry.handle_resize(&mut self.connection);
    }

    fn redraw(&mut self) {
        if !self.panel.is_visible() {
            return;
        }
        let screen = self
            .registry
            .active_session()
            .and_then(|s| s.contents())
            .unwrap_or_default();
        self.emit(ClientEvent::Redraw(screen));
    }

    fn notice(&self, message: impl Into<String>) {
        self.emit(ClientEvent::Notice(message.into()));
    }

    fn emit(&self, event: ClientEvent) {
        if self.events.send(event).is_err() {
            log::debug!("Front end is gone, dropping event");
        }
    }

    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    pub fn connection_state(&self) -> ReadyState {
        self.connection.ready_state()
    }
}

async fn sleep_until(deadline: Option<tokio::time::Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use tokio::sync::mpsc;

    use termhub_terminal::MemoryStore;

    fn runtime() -> (ClientRuntime, UnboundedReceiver<ClientEvent>) {
        let settings = ClientSettings {
            host: "127.0.0.1:9".to_string(),
            ..ClientSettings::default()
        };
        let (events, event_rx) = mpsc::unbounded_channel();
        let runtime = ClientRuntime::new(
            &settings,
            Box::new(MemoryStore::default()),
            ContainerSize::new(720, 408),
            events,
        );
        (runtime, event_rx)
    }

    #[tokio::test]
    async fn test_closing_background_session_drops_its_replies() {
        let (mut runtime, _events) = runtime();
        runtime.on_command(ClientCommand::NewSession);
        runtime.on_command(ClientCommand::NewSession);
        runtime.on_command(ClientCommand::Switch(1));
        let first = runtime.registry().active_session_id().unwrap();

        let key = RouteKey::new("jobs", "status").with_correlation(CorrelationId::from(7i64));
        runtime
            .router
            .register(key.clone(), Registration::new(|_, _| {}))
            .unwrap();
        runtime.pending_calls.push((Some(first), key));
        assert_eq!(runtime.outstanding_calls(), 1);

        runtime.on_command(ClientCommand::Switch(2));
        let active = runtime.registry().active_session_id();
        runtime.on_command(ClientCommand::Close(Some(1)));

        assert_eq!(runtime.registry().active_session_id(), active);
        assert!(runtime.registry().session(first).is_none());
        assert_eq!(runtime.outstanding_calls(), 0);
        assert!(runtime.pending_calls.is_empty());
    }

    #[tokio::test]
    async fn test_unsent_call_is_not_left_registered() {
        let (mut runtime, mut events) = runtime();
        assert_ne!(runtime.connection_state(), ReadyState::Open);

        runtime.on_command(ClientCommand::Call {
            namespace: "jobs".to_string(),
            func_name: "status".to_string(),
            args: vec![json!(1)],
        });

        assert_eq!(runtime.outstanding_calls(), 0);
        assert!(runtime.pending_calls.is_empty());
        let mut notices = Vec::new();
        while let Ok(event) = events.try_recv() {
            if let ClientEvent::Notice(text) = event {
                notices.push(text);
            }
        }
        assert!(notices.iter().any(|n| n == "Not connected, call dropped"));
    }
}
