//! Ordered set of terminal sessions sharing one connection

use termhub_connection::Link;
use termhub_types::protocol::stty_command;
use termhub_types::{
    CapacityError, ControlFrame, Geometry, ResourceDisposalError, DEFAULT_MAX_SESSIONS,
    SHELL_LABEL,
};
use thiserror::Error;

use crate::session::{SessionId, SessionInfo, TerminalSession};
use crate::view::{Surface, ViewFactory};

/// End-of-transmission; typed on its own it closes the active session
const CTRL_D: &str = "\x04";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    #[error("no session with id {0}")]
    UnknownSession(SessionId),
    #[error(transparent)]
    Disposal(#[from] ResourceDisposalError),
}

/// Owns every session and keeps exactly one of them active
///
/// Every mutation leaves either zero sessions (and no active one) or exactly
/// one active session with a live view. Inactive sessions carry only their
/// serialized buffer.
pub struct SessionRegistry {
    factory: Box<dyn ViewFactory>,
    sessions: Vec<TerminalSession>,
    max_sessions: usize,
    next_id: u64,
    active: Option<SessionId>,
    surface: Surface,
    tick: u64,
}

impl SessionRegistry {
    pub fn new(factory: impl ViewFactory + 'static) -> Self {
        Self::with_capacity(factory, DEFAULT_MAX_SESSIONS)
    }

    pub fn with_capacity(factory: impl ViewFactory + 'static, max_sessions: usize) -> Self {
        Self {
            factory: Box::new(factory),
            sessions: Vec::new(),
            max_sessions,
            next_id: 1,
            active: None,
            surface: Surface::default(),
            tick: 0,
        }
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Create a session and make it the active one
    ///
    /// Asks the link to open first; the handshake in
    /// [`SessionRegistry::on_connection_open`] sizes the remote PTY once it does.
    pub fn create_session(&mut self, link: &mut dyn Link) -> Result<SessionId, CapacityError> {
        if !self.can_create() {
            log::warn!(
                "Maximum number of sessions ({}) reached",
                self.max_sessions
            );
            return Err(CapacityError {
                max: self.max_sessions,
            });
        }

        link.request_open();
        let id = SessionId(self.next_id);
        self.next_id += 1;
        let name = session_name(self.sessions.len());
        log::info!("Creating session {} ({})", id, name);
        self.sessions.push(TerminalSession::new(id, name));

        if let Err(e) = self.switch(id, self.active) {
            log::error!("{}", e);
        }
        Ok(id)
    }

    /// Make `target` the active session
    ///
    /// `from` names the session whose screen is captured before its view is
    /// dropped; `None` captures whichever session is currently active.
    /// Switching to the already active session does nothing. A disposal
    /// failure is returned after the switch has completed.
    pub fn change_to_session(
        &mut self,
        target: SessionId,
        from: Option<SessionId>,
    ) -> Result<(), RegistryError> {
        if self.index_of(target).is_none() {
            log::warn!("Cannot switch to unknown session {}", target);
            return Err(RegistryError::UnknownSession(target));
        }
        if self.active == Some(target) {
            return Ok(());
        }
        self.switch(target, from.or(self.active))
    }

    /// Remove a session for good
    ///
    /// The session is removed even when its view fails to dispose. If it was
    /// active, the most recently used remaining session is promoted.
    pub fn close_session(&mut self, id: SessionId) -> Result<(), RegistryError> {
        let Some(index) = self.index_of(id) else {
            log::warn!("Cannot close unknown session {}", id);
            return Err(RegistryError::UnknownSession(id));
        };

        let mut session = self.sessions.remove(index);
        log::info!("Closing session {} ({})", id, session.name());
        let disposed = session.close().map_err(|e| {
            let error = ResourceDisposalError {
                session_id: id.0,
                reason: e.to_string(),
            };
            log::error!("{}", error);
            RegistryError::from(error)
        });

        if self.active == Some(id) {
            self.active = None;
            if let Some(next) = self.most_recently_used() {
                log::debug!("Promoting session {} after closing {}", next, id);
                if let Err(e) = self.switch(next, None) {
                    log::error!("{}", e);
                }
            }
        }
        disposed
    }

    /// Close every session, reporting the first disposal failure
    pub fn close_all(&mut self) -> Result<(), RegistryError> {
        let ids: Vec<SessionId> = self.sessions.iter().map(|s| s.id()).collect();
        let mut first_error = None;
        for id in ids {
            if let Err(e) = self.close_session(id) {
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    /// Close the active session, if any
    pub fn stop_active(&mut self) -> Result<(), RegistryError> {
        match self.active {
            Some(id) => self.close_session(id),
            None => Ok(()),
        }
    }

    /// Replace the active session with a fresh one
    pub fn reset_active(&mut self, link: &mut dyn Link) -> Result<SessionId, CapacityError> {
        if let Err(e) = self.stop_active() {
            log::warn!("{}", e);
        }
        self.create_session(link)
    }

    // ========================================================================
    // Traffic
    // ========================================================================

    /// Feed live output to the active view; dropped when nothing is active
    pub fn write_output(&mut self, bytes: &[u8]) {
        match self.active_view() {
            Some(view) => view.write(bytes),
            None => log::debug!("No active session, dropping {} bytes", bytes.len()),
        }
    }

    /// Forward keyboard input, except a lone Ctrl-D which closes the active session
    pub fn handle_input(&mut self, input: &str, link: &mut dyn Link) -> Result<(), RegistryError> {
        if input == CTRL_D {
            return self.stop_active();
        }
        link.send_frame(input);
        Ok(())
    }

    /// Refit the active view and tell the server its new size if the link is open
    pub fn handle_resize(&mut self, link: &mut dyn Link) -> Option<Geometry> {
        let surface = self.surface;
        let geometry = self.active_view()?.fit(surface);
        if link.is_open() {
            link.send_frame(&ControlFrame::resize(geometry).to_json());
        }
        Some(geometry)
    }

    /// Handshake run whenever the connection opens
    ///
    /// The newest session becomes active, its size is sent both as a resize
    /// frame and as an `stty` line, and the view is cleared of that echo.
    pub fn on_connection_open(&mut self, link: &mut dyn Link) {
        let Some(newest) = self.sessions.last().map(|s| s.id()) else {
            return;
        };
        if let Err(e) = self.change_to_session(newest, None) {
            log::error!("{}", e);
        }
        if let Some(geometry) = self.handle_resize(link) {
            link.send_frame(&stty_command(geometry));
        }
        if let Some(view) = self.active_view() {
            view.clear();
        }
    }

    // ========================================================================
    // Queries
    // ========================================================================

    pub fn active_session_id(&self) -> Option<SessionId> {
        self.active
    }

    pub fn active_session(&self) -> Option<&TerminalSession> {
        self.active.and_then(|id| self.session(id))
    }

    pub fn session(&self, id: SessionId) -> Option<&TerminalSession> {
        self.sessions.iter().find(|s| s.id() == id)
    }

    pub fn sessions(&self) -> &[TerminalSession] {
        &self.sessions
    }

    pub fn session_infos(&self) -> Vec<SessionInfo> {
        self.sessions.iter().map(|s| s.info()).collect()
    }

    /// Whether another session may be created
    pub fn can_create(&self) -> bool {
        self.sessions.len() < self.max_sessions
    }

    pub fn max_sessions(&self) -> usize {
        self.max_sessions
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    pub fn surface(&self) -> Surface {
        self.surface
    }

    /// Surface used the next time a view is opened or refitted
    pub fn set_surface(&mut self, surface: Surface) {
        self.surface = surface;
    }

    // ========================================================================
    // Internals
    // ========================================================================

    fn index_of(&self, id: SessionId) -> Option<usize> {
        self.sessions.iter().position(|s| s.id() == id)
    }

    fn active_view(&mut self) -> Option<&mut (dyn crate::view::TerminalView + 'static)> {
        let index = self.index_of(self.active?)?;
        self.sessions[index].view_mut()
    }

    fn most_recently_used(&self) -> Option<SessionId> {
        self.sessions
            .iter()
            .enumerate()
            .max_by_key(|(index, s)| (s.last_active(), *index))
            .map(|(_, s)| s.id())
    }

    /// Capture `from`, deactivate every other live session, then activate `target`
    fn switch(&mut self, target: SessionId, from: Option<SessionId>) -> Result<(), RegistryError> {
        let mut first_error = None;
        let capture = from
            .into_iter()
            .chain(self.sessions.iter().filter(|s| s.has_view()).map(|s| s.id()))
            .filter(|id| *id != target)
            .collect::<Vec<_>>();

        for id in capture {
            let Some(index) = self.index_of(id) else {
                continue;
            };
            let session = &mut self.sessions[index];
            if !session.has_view() && !session.is_active() {
                continue;
            }
            if let Err(e) = session.deactivate() {
                let error = ResourceDisposalError {
                    session_id: id.0,
                    reason: e.to_string(),
                };
                log::error!("{}", error);
                first_error.get_or_insert(RegistryError::from(error));
            }
        }

        if let Some(index) = self.index_of(target) {
            self.tick += 1;
            let view = self.factory.create();
            self.sessions[index].activate(view, self.surface, self.tick);
            self.active = Some(target);
            log::debug!("Session {} is now active", target);
        }
        first_error.map_or(Ok(()), Err)
    }
}

/// `/bin/zsh` for the first session, then `/bin/zsh (N)` with N the sessions already open
fn session_name(existing: usize) -> String {
    if existing == 0 {
        SHELL_LABEL.to_string()
    } else {
        format!("{} ({})", SHELL_LABEL, existing)
    }
}
