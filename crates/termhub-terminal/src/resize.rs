//! Container geometry tracking and terminal height persistence

use std::time::{Duration, Instant};

use termhub_connection::Link;
use termhub_types::{Geometry, RESIZE_DEBOUNCE_MS};

use crate::registry::SessionRegistry;
use crate::storage::{self, KeyValueStore};
use crate::view::Surface;
use crate::TERM_HEIGHT_KEY;

/// Trailing-edge debounce driven by caller-supplied instants
#[derive(Debug, Clone)]
pub struct Debouncer {
    window: Duration,
    deadline: Option<Instant>,
}

impl Debouncer {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            deadline: None,
        }
    }

    /// Push the deadline out to `now + window`
    pub fn arm(&mut self, now: Instant) {
        self.deadline = Some(now + self.window);
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn is_armed(&self) -> bool {
        self.deadline.is_some()
    }

    /// True once per burst, when `now` has reached the deadline
    pub fn poll(&mut self, now: Instant) -> bool {
        match self.deadline {
            Some(deadline) if now >= deadline => {
                self.deadline = None;
                true
            }
            _ => false,
        }
    }
}

impl Default for Debouncer {
    fn default() -> Self {
        Self::new(Duration::from_millis(RESIZE_DEBOUNCE_MS))
    }
}

/// Observed size of the element hosting the terminal
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContainerSize {
    pub width_px: u32,
    pub viewport_height_px: u32,
}

impl ContainerSize {
    pub fn new(width_px: u32, viewport_height_px: u32) -> Self {
        Self {
            width_px,
            viewport_height_px,
        }
    }
}

/// Turns container resize bursts into a single refit of the active session
#[derive(Debug, Default)]
pub struct ResizeCoordinator {
    debouncer: Debouncer,
    pending: Option<Surface>,
}

impl ResizeCoordinator {
    pub fn new(window: Duration) -> Self {
        Self {
            debouncer: Debouncer::new(window),
            pending: None,
        }
    }

    /// Record a container change and restart the debounce window
    pub fn observe(
        &mut self,
        container: ContainerSize,
        store: &dyn KeyValueStore,
        now: Instant,
    ) -> Surface {
        let surface = surface_for(container, storage::load(store, TERM_HEIGHT_KEY));
        self.pending = Some(surface);
        self.debouncer.arm(now);
        surface
    }

    /// When the debounce has elapsed, apply the last observed surface
    ///
    /// The refit and the resize frame happen only while the link is open;
    /// the surface is remembered either way for the next handshake.
    pub fn poll(
        &mut self,
        now: Instant,
        registry: &mut SessionRegistry,
        link: &mut dyn Link,
    ) -> Option<Geometry> {
        if !self.debouncer.poll(now) {
            return None;
        }
        let surface = self.pending.take()?;
        registry.set_surface(surface);
        if !link.is_open() {
            log::debug!("Connection not open, deferring resize");
            return None;
        }
        registry.handle_resize(link)
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.debouncer.deadline()
    }
}

/// Width follows the container; height is the persisted one clamped to the
/// viewport, or the whole viewport when none was persisted
fn surface_for(container: ContainerSize, stored_height: Option<u32>) -> Surface {
    let height = match stored_height {
        Some(h) if h > 0 => h.min(container.viewport_height_px),
        _ => container.viewport_height_px,
    };
    Surface::new(container.width_px, height)
}

/// Pointer-driven height adjustment of the terminal panel
#[derive(Debug, Clone, Default)]
pub struct DragResize {
    pressed: bool,
    height: u32,
}

impl DragResize {
    pub fn new(height: u32) -> Self {
        Self {
            pressed: false,
            height,
        }
    }

    /// Start from the persisted height, if any
    pub fn load(store: &dyn KeyValueStore) -> Self {
        Self::new(storage::load(store, TERM_HEIGHT_KEY).unwrap_or(0))
    }

    pub fn press(&mut self) {
        self.pressed = true;
    }

    pub fn is_pressed(&self) -> bool {
        self.pressed
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    /// The panel is anchored to the bottom, so its height is the distance from
    /// the pointer to the bottom of the viewport
    pub fn drag_to(&mut self, pointer_y: i32, viewport_height: u32) -> Option<u32> {
        if !self.pressed {
            return None;
        }
        let viewport = i64::from(viewport_height);
        let delta = (viewport - i64::from(pointer_y)).clamp(0, viewport);
        self.height = u32::try_from(delta).unwrap_or(0);
        Some(self.height)
    }

    /// Finish the gesture and persist the final height
    pub fn release(&mut self, store: &mut dyn KeyValueStore) -> Option<u32> {
        if !self.pressed {
            return None;
        }
        self.pressed = false;
        storage::save(store, TERM_HEIGHT_KEY, self.height);
        Some(self.height)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::tests::BrokenStore;
    use crate::storage::MemoryStore;
    use crate::ScreenViewFactory;

    struct OpenLink {
        open: bool,
        frames: Vec<String>,
    }

    impl Link for OpenLink {
        fn request_open(&mut self) {}
        fn is_open(&self) -> bool {
            self.open
        }
        fn send_frame(&mut self, frame: &str) -> bool {
            self.frames.push(frame.to_string());
            true
        }
    }

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    #[test]
    fn test_debouncer_fires_once_after_quiet_period() {
        let start = Instant::now();
        let mut debouncer = Debouncer::default();
        assert!(!debouncer.poll(start));

        debouncer.arm(start);
        debouncer.arm(start + ms(400));
        assert!(!debouncer.poll(start + ms(700)));
        assert!(debouncer.poll(start + ms(1000)));
        assert!(!debouncer.poll(start + ms(2000)));
    }

    #[test]
    fn test_surface_height_rules() {
        let container = ContainerSize::new(800, 600);
        assert_eq!(surface_for(container, None), Surface::new(800, 600));
        assert_eq!(surface_for(container, Some(0)), Surface::new(800, 600));
        assert_eq!(surface_for(container, Some(250)), Surface::new(800, 250));
        assert_eq!(surface_for(container, Some(5000)), Surface::new(800, 600));
    }

    #[test]
    fn test_burst_produces_one_resize() {
        let start = Instant::now();
        let store = MemoryStore::default();
        let mut registry = SessionRegistry::new(ScreenViewFactory::default());
        let mut link = OpenLink {
            open: true,
            frames: Vec::new(),
        };
        registry.create_session(&mut link).unwrap();
        let mut coordinator = ResizeCoordinator::default();

        for (i, width) in [700u32, 710, 720].into_iter().enumerate() {
            let now = start + ms(100 * i as u64);
            coordinator.observe(ContainerSize::new(width, 408), &store, now);
            assert_eq!(coordinator.poll(now, &mut registry, &mut link), None);
        }

        let geometry = coordinator.poll(start + ms(800), &mut registry, &mut link);
        assert_eq!(geometry, Some(Geometry::new(24, 80)));
        assert_eq!(link.frames.len(), 1);
        assert_eq!(coordinator.poll(start + ms(5000), &mut registry, &mut link), None);
        assert_eq!(link.frames.len(), 1);
    }

    #[test]
    fn test_closed_link_defers_but_remembers_surface() {
        let start = Instant::now();
        let mut registry = SessionRegistry::new(ScreenViewFactory::default());
        let mut link = OpenLink {
            open: false,
            frames: Vec::new(),
        };
        let mut coordinator = ResizeCoordinator::default();
        coordinator.observe(ContainerSize::new(900, 510), &BrokenStore, start);

        assert_eq!(coordinator.poll(start + ms(600), &mut registry, &mut link), None);
        assert_eq!(registry.surface(), Surface::new(900, 510));
        assert!(link.frames.is_empty());
    }

    #[test]
    fn test_drag_resize_persists_on_release() {
        let mut store = MemoryStore::default();
        let mut drag = DragResize::load(&store);
        assert_eq!(drag.drag_to(100, 800), None);

        drag.press();
        assert_eq!(drag.drag_to(500, 800), Some(300));
        assert_eq!(drag.drag_to(900, 800), Some(0));
        assert_eq!(drag.drag_to(-50, 800), Some(800));
        assert_eq!(drag.drag_to(200, 800), Some(600));
        assert_eq!(drag.release(&mut store), Some(600));
        assert_eq!(drag.release(&mut store), None);

        assert_eq!(store.get(TERM_HEIGHT_KEY).unwrap().as_deref(), Some("600"));
        assert_eq!(DragResize::load(&store).height(), 600);
    }

    #[test]
    fn test_drag_resize_survives_broken_storage() {
        let mut drag = DragResize::load(&BrokenStore);
        drag.press();
        drag.drag_to(300, 800);
        assert_eq!(drag.release(&mut BrokenStore), Some(500));
    }
}
