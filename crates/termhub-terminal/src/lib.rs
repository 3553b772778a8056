//! Terminal sessions multiplexed over one connection
//!
//! A [`SessionRegistry`] owns the sessions and decides which one is live; only
//! the active session holds a [`TerminalView`], the rest keep a serialized
//! [`Snapshot`] of their screen. The [`ResizeCoordinator`] and [`PanelState`]
//! cover the geometry and layout state around the terminal surface.

pub mod panel;
pub mod registry;
pub mod resize;
pub mod screen;
pub mod session;
pub mod storage;
pub mod view;

pub use panel::PanelState;
pub use registry::{RegistryError, SessionRegistry};
pub use resize::{ContainerSize, Debouncer, DragResize, ResizeCoordinator};
pub use screen::{ScreenView, ScreenViewFactory};
pub use session::{SessionId, SessionInfo, SessionPhase, TerminalSession};
pub use storage::{KeyValueStore, MemoryStore, StorageError};
pub use view::{CellMetrics, DisposeError, Snapshot, Surface, TerminalView, ViewFactory};

/// Scrollback kept by each live view
pub const DEFAULT_SCROLLBACK_LINES: usize = 1000;

/// Storage key of the persisted terminal height in pixels
pub const TERM_HEIGHT_KEY: &str = "term.height";

/// Storage key of the persisted panel visibility
pub const TERM_SHOW_KEY: &str = "term.show";

/// Storage key of the persisted toggle button position
pub const TERM_BUTTON_POS_KEY: &str = "term.btn.pos";

/// Smallest top offset the toggle button may be dragged to
pub const MIN_BUTTON_TOP: i32 = 60;
