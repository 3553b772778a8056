use crate::storage::{self, KeyValueStore};
use crate::{MIN_BUTTON_TOP, TERM_BUTTON_POS_KEY, TERM_SHOW_KEY};

/// Visibility of the terminal panel and the position of its toggle button
///
/// The button can be dragged vertically; a click that ends a drag does not
/// toggle the panel.
#[derive(Debug, Clone)]
pub struct PanelState {
    visible: bool,
    button_top: i32,
    button_height: u32,
    drag: Option<ButtonDrag>,
    dragged: bool,
}

#[derive(Debug, Clone, Copy)]
struct ButtonDrag {
    start_y: i32,
    start_top: i32,
}

impl PanelState {
    /// Restore persisted state; `default_visible` applies when nothing was stored
    pub fn load(
        store: &dyn KeyValueStore,
        viewport_height: u32,
        button_height: u32,
        default_visible: bool,
    ) -> Self {
        let visible = storage::load(store, TERM_SHOW_KEY).unwrap_or(default_visible);
        let default_top = i32::try_from(viewport_height / 2).unwrap_or(MIN_BUTTON_TOP);
        let top = storage::load(store, TERM_BUTTON_POS_KEY).unwrap_or(default_top);
        let mut state = Self {
            visible,
            button_top: 0,
            button_height,
            drag: None,
            dragged: false,
        };
        state.button_top = state.clamp_top(top, viewport_height);
        state
    }

    pub fn is_visible(&self) -> bool {
        self.visible
    }

    pub fn button_top(&self) -> i32 {
        self.button_top
    }

    pub fn set_visible(&mut self, visible: bool, store: &mut dyn KeyValueStore) {
        self.visible = visible;
        storage::save(store, TERM_SHOW_KEY, visible);
    }

    pub fn toggle(&mut self, store: &mut dyn KeyValueStore) -> bool {
        self.set_visible(!self.visible, store);
        self.visible
    }

    /// Click on the toggle button; ignored when it ends a drag
    pub fn click(&mut self, store: &mut dyn KeyValueStore) -> bool {
        if std::mem::take(&mut self.dragged) {
            return self.visible;
        }
        self.toggle(store)
    }

    pub fn press(&mut self, pointer_y: i32) {
        self.drag = Some(ButtonDrag {
            start_y: pointer_y,
            start_top: self.button_top,
        });
        self.dragged = false;
    }

    pub fn drag_to(&mut self, pointer_y: i32, viewport_height: u32) -> Option<i32> {
        let drag = self.drag?;
        self.dragged = true;
        let top = drag
            .start_top
            .saturating_add(pointer_y.saturating_sub(drag.start_y));
        self.button_top = self.clamp_top(top, viewport_height);
        Some(self.button_top)
    }

    /// End a drag, persisting the new position
    pub fn release(&mut self, store: &mut dyn KeyValueStore) {
        if self.drag.take().is_some() && self.dragged && self.button_top != 0 {
            storage::save(store, TERM_BUTTON_POS_KEY, self.button_top);
        }
    }

    fn clamp_top(&self, top: i32, viewport_height: u32) -> i32 {
        let viewport = i32::try_from(viewport_height).unwrap_or(i32::MAX);
        let button = i32::try_from(self.button_height).unwrap_or(0);
        let max = (viewport - button).max(MIN_BUTTON_TOP);
        top.clamp(MIN_BUTTON_TOP, max)
    }
}
