use serde::Serialize;

use termhub_types::Geometry;

use crate::view::{DisposeError, Snapshot, Surface, TerminalView};

/// Process-unique session id, never reused after a session closes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct SessionId(pub u64);

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionPhase {
    Created,
    Active,
    Inactive,
    Closed,
}

/// One interactive terminal
///
/// Holds a live view only while active; otherwise only the snapshot taken
/// when it was last deactivated.
pub struct TerminalSession {
    id: SessionId,
    name: String,
    phase: SessionPhase,
    buffer: Option<Snapshot>,
    view: Option<Box<dyn TerminalView>>,
    last_active: u64,
}

impl TerminalSession {
    pub(crate) fn new(id: SessionId, name: String) -> Self {
        Self {
            id,
            name,
            phase: SessionPhase::Created,
            buffer: None,
            view: None,
            last_active: 0,
        }
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn phase(&self) -> SessionPhase {
        self.phase
    }

    pub fn is_active(&self) -> bool {
        self.phase == SessionPhase::Active
    }

    pub fn has_view(&self) -> bool {
        self.view.is_some()
    }

    pub fn buffer(&self) -> Option<&Snapshot> {
        self.buffer.as_ref()
    }

    /// Visible text of the live view
    pub fn contents(&self) -> Option<String> {
        self.view.as_ref().map(|v| v.contents())
    }

    pub fn geometry(&self) -> Option<Geometry> {
        self.view.as_ref().map(|v| v.geometry())
    }

    pub(crate) fn last_active(&self) -> u64 {
        self.last_active
    }

    pub(crate) fn view_mut(&mut self) -> Option<&mut (dyn TerminalView + 'static)> {
        self.view.as_deref_mut()
    }

    /// Install a fresh view and replay the stored buffer into it
    pub(crate) fn activate(&mut self, mut view: Box<dyn TerminalView>, surface: Surface, tick: u64) {
        view.open(surface);
        if let Some(snapshot) = self.buffer.take() {
            view.write(snapshot.as_bytes());
        }
        self.view = Some(view);
        self.phase = SessionPhase::Active;
        self.last_active = tick;
    }

    /// Capture the screen and drop the view
    ///
    /// The snapshot is kept even when disposal fails.
    pub(crate) fn deactivate(&mut self) -> Result<(), DisposeError> {
        self.phase = SessionPhase::Inactive;
        match self.view.take() {
            Some(mut view) => {
                self.buffer = Some(view.serialize());
                view.dispose()
            }
            None => Ok(()),
        }
    }

    pub(crate) fn close(&mut self) -> Result<(), DisposeError> {
        self.phase = SessionPhase::Closed;
        self.buffer = None;
        match self.view.take() {
            Some(mut view) => view.dispose(),
            None => Ok(()),
        }
    }

    pub fn info(&self) -> SessionInfo {
        SessionInfo {
            id: self.id,
            name: self.name.clone(),
            phase: self.phase,
            has_buffer: self.buffer.is_some(),
        }
    }
}

impl std::fmt::Debug for TerminalSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TerminalSession")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("phase", &self.phase)
            .field("has_view", &self.view.is_some())
            .field("has_buffer", &self.buffer.is_some())
            .finish()
    }
}

/// Listing entry for session tabs
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionInfo {
    pub id: SessionId,
    pub name: String,
    pub phase: SessionPhase,
    pub has_buffer: bool,
}
