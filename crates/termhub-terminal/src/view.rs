//! Capability interface of a terminal widget

use termhub_types::Geometry;
use thiserror::Error;

/// Pixel box a view is rendered into
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Surface {
    pub width_px: u32,
    pub height_px: u32,
}

impl Surface {
    pub fn new(width_px: u32, height_px: u32) -> Self {
        Self {
            width_px,
            height_px,
        }
    }

    /// Largest grid of cells that fits in this surface
    ///
    /// Never smaller than 2 columns by 1 row, so a collapsed surface still yields
    /// a usable PTY size.
    pub fn fit(&self, metrics: CellMetrics) -> Geometry {
        let cols = self.width_px / metrics.width_px.max(1);
        let rows = self.height_px / metrics.height_px.max(1);
        Geometry::new(clamp_u16(rows).max(1), clamp_u16(cols).max(2))
    }
}

fn clamp_u16(n: u32) -> u16 {
    u16::try_from(n).unwrap_or(u16::MAX)
}

/// Size of one character cell in pixels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CellMetrics {
    pub width_px: u32,
    pub height_px: u32,
}

impl Default for CellMetrics {
    fn default() -> Self {
        Self {
            width_px: 9,
            height_px: 17,
        }
    }
}

/// Opaque serialized screen buffer
///
/// Writing a snapshot into a fresh view of the same size reproduces the
/// screen it was taken from.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Snapshot(Vec<u8>);

impl Snapshot {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{0}")]
pub struct DisposeError(pub String);

/// A terminal widget owned by exactly one session
pub trait TerminalView: Send {
    /// Attach the view to a surface and size it to fit
    fn open(&mut self, surface: Surface);

    fn write(&mut self, bytes: &[u8]);

    /// Refit to `surface` and return the resulting grid size
    fn fit(&mut self, surface: Surface) -> Geometry;

    fn geometry(&self) -> Geometry;

    fn serialize(&self) -> Snapshot;

    fn clear(&mut self);

    /// Visible screen as plain text
    fn contents(&self) -> String;

    /// Release the view; a view is disposed at most once
    fn dispose(&mut self) -> Result<(), DisposeError>;

    fn is_disposed(&self) -> bool;
}

/// Creates a fresh view each time a session becomes active
pub trait ViewFactory: Send {
    fn create(&mut self) -> Box<dyn TerminalView>;
}

impl<F> ViewFactory for F
where
    F: FnMut() -> Box<dyn TerminalView> + Send,
{
    fn create(&mut self) -> Box<dyn TerminalView> {
        self()
    }
}
