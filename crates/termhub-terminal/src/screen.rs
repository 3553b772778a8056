use vt100::Parser;

use termhub_types::Geometry;

use crate::view::{CellMetrics, DisposeError, Snapshot, Surface, TerminalView, ViewFactory};
use crate::DEFAULT_SCROLLBACK_LINES;

/// Terminal view backed by a vt100 screen
pub struct ScreenView {
    parser: Option<Parser>,
    metrics: CellMetrics,
    scrollback_lines: usize,
    geometry: Geometry,
    disposed: bool,
}

impl ScreenView {
    pub fn new(metrics: CellMetrics, scrollback_lines: usize) -> Self {
        Self {
            parser: None,
            metrics,
            scrollback_lines,
            geometry: Geometry::default(),
            disposed: false,
        }
    }

    pub fn is_open(&self) -> bool {
        self.parser.is_some()
    }

    /// Cursor position (row, col)
    pub fn cursor_position(&self) -> Option<(u16, u16)> {
        self.parser.as_ref().map(|p| p.screen().cursor_position())
    }

    /// Rebuild the parser at a new size, replaying the visible screen
    fn resize(&mut self, geometry: Geometry) {
        let replay = self.parser.as_ref().map(|p| p.screen().contents_formatted());
        let mut parser = Parser::new(geometry.rows, geometry.cols, self.scrollback_lines);
        if let Some(bytes) = replay {
            parser.process(&bytes);
        }
        self.parser = Some(parser);
        self.geometry = geometry;
    }
}

impl Default for ScreenView {
    fn default() -> Self {
        Self::new(CellMetrics::default(), DEFAULT_SCROLLBACK_LINES)
    }
}

impl TerminalView for ScreenView {
    fn open(&mut self, surface: Surface) {
        if self.disposed {
            log::warn!("Ignoring open() on a disposed view");
            return;
        }
        let geometry = surface.fit(self.metrics);
        self.parser = Some(Parser::new(
            geometry.rows,
            geometry.cols,
            self.scrollback_lines,
        ));
        self.geometry = geometry;
    }

    fn write(&mut self, bytes: &[u8]) {
        match self.parser.as_mut() {
            Some(parser) => parser.process(bytes),
            None => log::debug!("Dropping {} bytes written to a closed view", bytes.len()),
        }
    }

    fn fit(&mut self, surface: Surface) -> Geometry {
        let geometry = surface.fit(self.metrics);
        if self.parser.is_some() && geometry != self.geometry {
            log::debug!("Refitting view from {} to {}", self.geometry, geometry);
            self.resize(geometry);
        }
        self.geometry
    }

    fn geometry(&self) -> Geometry {
        self.geometry
    }

    fn serialize(&self) -> Snapshot {
        let Some(parser) = self.parser.as_ref() else {
            return Snapshot::default();
        };
        let screen = parser.screen();
        let mut bytes = screen.contents_formatted();
        let (row, col) = screen.cursor_position();
        bytes.extend_from_slice(format!("\x1b[{};{}H", row + 1, col + 1).as_bytes());
        Snapshot::new(bytes)
    }

    fn clear(&mut self) {
        if let Some(parser) = self.parser.as_mut() {
            parser.process(b"\x1b[H\x1b[2J");
        }
    }

    fn contents(&self) -> String {
        self.parser
            .as_ref()
            .map(|p| p.screen().contents())
            .unwrap_or_default()
    }

    fn dispose(&mut self) -> Result<(), DisposeError> {
        if self.disposed {
            return Err(DisposeError("view already disposed".to_string()));
        }
        self.parser = None;
        self.disposed = true;
        Ok(())
    }

    fn is_disposed(&self) -> bool {
        self.disposed
    }
}

/// Produces [`ScreenView`]s sharing one cell size and scrollback depth
#[derive(Debug, Clone, Copy)]
pub struct ScreenViewFactory {
    pub metrics: CellMetrics,
    pub scrollback_lines: usize,
}

impl Default for ScreenViewFactory {
    fn default() -> Self {
        Self {
            metrics: CellMetrics::default(),
            scrollback_lines: DEFAULT_SCROLLBACK_LINES,
        }
    }
}

impl ViewFactory for ScreenViewFactory {
    fn create(&mut self) -> Box<dyn TerminalView> {
        Box::new(ScreenView::new(self.metrics, self.scrollback_lines))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open_view() -> ScreenView {
        let mut view = ScreenView::default();
        view.open(Surface::new(720, 408));
        view
    }

    #[test]
    fn test_open_fits_surface() {
        let view = open_view();
        assert_eq!(view.geometry(), Geometry::new(24, 80));
        assert!(view.is_open());
    }

    #[test]
    fn test_snapshot_restores_contents() {
        let mut view = open_view();
        view.write(b"hello\r\nworld");
        let snapshot = view.serialize();

        let mut restored = open_view();
        restored.write(snapshot.as_bytes());
        assert_eq!(restored.contents(), view.contents());
        assert_eq!(restored.cursor_position(), view.cursor_position());
    }

    #[test]
    fn test_fit_keeps_contents() {
        let mut view = open_view();
        view.write(b"keep me");
        let geometry = view.fit(Surface::new(900, 510));
        assert_eq!(geometry, Geometry::new(30, 100));
        assert!(view.contents().starts_with("keep me"));
    }

    #[test]
    fn test_clear() {
        let mut view = open_view();
        view.write(b"stty rows 24 cols 80");
        view.clear();
        assert_eq!(view.contents().trim(), "");
    }

    #[test]
    fn test_dispose_once() {
        let mut view = open_view();
        assert!(view.dispose().is_ok());
        assert!(view.is_disposed());
        assert!(view.dispose().is_err());

        view.write(b"ignored");
        assert_eq!(view.contents(), "");
        assert_eq!(view.serialize(), Snapshot::default());
    }
}
