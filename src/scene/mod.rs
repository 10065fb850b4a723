//! Scene model
//!
//! Windows own ordered widget trees plus a private off-screen target. The
//! [`Scene`] is the bounded registry of client windows. Everything here is
//! plain data and mutation: no I/O, no GPU work. Painting lives in
//! [`crate::renderer`], texture and font storage in [`crate::renderer::Resources`].

use std::collections::HashSet;
use std::fmt;
use std::time::Duration;

use log::debug;
use serde::{Deserialize, Serialize};
use tiny_skia::Pixmap;

use crate::error::SceneError;

pub mod color;
mod widget;


pub use color::Color;
pub use widget::{
    Content, Geometry, GeometryPatch, Mutation, Parent, Widget, WidgetKind, MAX_WIDGET_ID_LEN,
};

/// Registry key of a client window. Allocated monotonically, never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WindowId(pub u32);

impl fmt::Display for WindowId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Handle to a loaded font at a fixed pixel size.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FontId(pub u32);

/// Handle to a loaded image texture.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TextureId(pub u32);

/// Fixed capacity policy. Appends beyond these ceilings are rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SceneLimits {
    /// Client windows in the registry
    pub max_windows: usize,
    /// Top-level widgets per window
    pub max_widgets: usize,
    /// Children per widget
    pub max_children: usize,
}

impl Default for SceneLimits {
    fn default() -> Self {
        Self {
            max_windows: 10,
            max_widgets: 256,
            max_children: 32,
        }
    }
}

/// Extent of a laid-out string. `visual_min_y` is the offset from the
/// baseline to the topmost inked row (negative above the baseline).
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct TextMetrics {
    pub width: f32,
    pub height: f32,
    pub visual_min_y: f32,
}

/// Measures text without drawing it.
pub trait TextMeasure {
    fn measure(&self, font: FontId, text: &str) -> Option<TextMetrics>;
}

/// Per-tick data handed to window frame hooks.
pub struct FrameContext<'a> {
    pub dt: Duration,
    pub screen: (u32, u32),
    pub text: &'a dyn TextMeasure,
}

/// Callback run once per tick while its window is visible.
pub type FrameHook = Box<dyn FnMut(&mut Window, &FrameContext<'_>)>;

pub struct Window {
    widgets: Vec<Widget>,
    visible: bool,
    target: Pixmap,
    limits: SceneLimits,
    hook: Option<FrameHook>,
}

impl fmt::Debug for Window {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Window")
            .field("widgets", &self.widgets)
            .field("visible", &self.visible)
            .field("target", &(self.target.width(), self.target.height()))
            .field("hook", &self.hook.is_some())
            .finish()
    }
}

impl Window {
    /// Create a hidden, empty window whose target matches the screen size.
    pub fn new(width: u32, height: u32, limits: SceneLimits) -> Result<Self, SceneError> {
        let target =
            Pixmap::new(width, height).ok_or(SceneError::TargetAllocation { width, height })?;

        Ok(Self {
            widgets: Vec::new(),
            visible: false,
            target,
            limits,
            hook: None,
        })
    }

    pub fn is_visible(&self) -> bool {
        self.visible
    }

    pub fn set_visible(&mut self, visible: bool) {
        self.visible = visible;
    }

    /// Top-level widgets in paint order.
    pub fn widgets(&self) -> &[Widget] {
        &self.widgets
    }

    pub fn target(&self) -> &Pixmap {
        &self.target
    }

    pub fn target_mut(&mut self) -> &mut Pixmap {
        &mut self.target
    }

    /// Split borrow used while painting: the tree and the target at once.
    pub fn parts_mut(&mut self) -> (&[Widget], &mut Pixmap) {
        (&self.widgets, &mut self.target)
    }

    pub fn set_frame_hook(&mut self, hook: FrameHook) {
        self.hook = Some(hook);
    }

    pub fn run_frame_hook(&mut self, ctx: &FrameContext<'_>) {
        if let Some(mut hook) = self.hook.take() {
            hook(self, ctx);
            // The hook may have installed a replacement for itself.
            if self.hook.is_none() {
                self.hook = Some(hook);
            }
        }
    }

    /// Recursive lookup through the whole tree.
    pub fn widget(&self, id: &str) -> Option<&Widget> {
        self.widgets.iter().find_map(|w| w.find(id))
    }

    pub fn widget_mut(&mut self, id: &str) -> Option<&mut Widget> {
        self.widgets.iter_mut().find_map(|w| w.find_mut(id))
    }

    fn widget_or_err(&mut self, id: &str) -> Result<&mut Widget, SceneError> {
        self.widget_mut(id)
            .ok_or_else(|| SceneError::UnknownWidget(id.to_string()))
    }

    /// Total number of widgets in the tree.
    pub fn widget_count(&self) -> usize {
        self.widgets.iter().map(Widget::subtree_len).sum()
    }

    /// Append a top-level widget, or replace the top-level widget with the
    /// same id. Returns textures owned by a replaced subtree.
    pub fn append_widget(&mut self, mut widget: Widget) -> Result<Vec<TextureId>, SceneError> {
        widget.set_parent(Parent::Window);
        let limit = self.limits.max_widgets;
        self.upsert(None, widget, limit)
    }

    /// Append `widget` as a child of `parent_id`, or replace that parent's
    /// existing child with the same id.
    pub fn append_child(
        &mut self,
        parent_id: &str,
        mut widget: Widget,
    ) -> Result<Vec<TextureId>, SceneError> {
        widget.set_parent(Parent::Widget(parent_id.to_string()));
        let limit = self.limits.max_children;
        self.upsert(Some(parent_id), widget, limit)
    }

    fn upsert(
        &mut self,
        parent_id: Option<&str>,
        widget: Widget,
        limit: usize,
    ) -> Result<Vec<TextureId>, SceneError> {
        if let Some(pid) = parent_id {
            if pid == widget.id() {
                return Err(SceneError::DuplicateWidget(widget.id().to_string()));
            }
        }

        // Ids are a flat namespace per window; only a sibling may be replaced.
        let existing_parent = self.widget(widget.id()).map(|w| w.parent().clone());
        let siblings = match parent_id {
            None => &mut self.widgets,
            Some(pid) => self.widget_or_err(pid)?.children_mut(),
        };

        if let Some(existing) = existing_parent {
            if existing != *widget.parent() {
                return Err(SceneError::DuplicateWidget(widget.id().to_string()));
            }
            if let Some(slot) = siblings.iter_mut().find(|w| w.id() == widget.id()) {
                let old = std::mem::replace(slot, widget);
                debug!("replaced widget '{}'", old.id());
                return Ok(old.owned_textures());
            }
        }

        if siblings.len() >= limit {
            return Err(SceneError::CapacityExceeded {
                what: if parent_id.is_some() { "children" } else { "widgets" },
                limit,
            });
        }
        siblings.push(widget);
        Ok(Vec::new())
    }

    /// Detach a widget and its subtree from wherever it sits. The relative
    /// order of its former siblings is not preserved.
    pub fn remove_widget(&mut self, id: &str) -> Result<Vec<TextureId>, SceneError> {
        let removed = match self.widgets.iter().position(|w| w.id() == id) {
            Some(pos) => Some(self.widgets.swap_remove(pos)),
            None => self
                .widgets
                .iter_mut()
                .find_map(|w| w.remove_descendant(id)),
        };

        removed
            .map(|w| w.owned_textures())
            .ok_or_else(|| SceneError::UnknownWidget(id.to_string()))
    }

    pub fn set_geometry(&mut self, id: &str, patch: GeometryPatch) -> Result<(), SceneError> {
        let widget = self.widget_or_err(id)?;
        patch.apply(&mut widget.geometry);
        Ok(())
    }

    pub fn set_color(&mut self, id: &str, hex: &str) -> Result<(), SceneError> {
        let color = Color::parse_hex(hex)?;
        self.widget_or_err(id)?.set_color(color);
        Ok(())
    }

    pub fn set_text(&mut self, id: &str, text: &str) -> Result<Mutation, SceneError> {
        Ok(self.widget_or_err(id)?.set_text(text))
    }

    pub fn set_font(&mut self, id: &str, font: FontId) -> Result<Mutation, SceneError> {
        Ok(self.widget_or_err(id)?.set_font(font))
    }

    pub fn set_image(&mut self, id: &str, texture: TextureId) -> Result<Mutation, SceneError> {
        Ok(self.widget_or_err(id)?.set_image(texture))
    }

    /// Window-space position of a widget, following parent back-references.
    pub fn world_position(&self, id: &str) -> Option<(f32, f32)> {
        let mut widget = self.widget(id)?;
        let (mut x, mut y) = (widget.geometry.x, widget.geometry.y);
        while let Parent::Widget(parent) = widget.parent() {
            widget = self.widget(parent)?;
            x += widget.geometry.x;
            y += widget.geometry.y;
        }
        Some((x, y))
    }

    pub fn collect_fonts(&self, out: &mut HashSet<FontId>) {
        for widget in &self.widgets {
            widget.collect_fonts(out);
        }
    }

    /// Drop every widget, returning the textures they owned (post-order).
    pub fn clear(&mut self) -> Vec<TextureId> {
        self.widgets
            .drain(..)
            .flat_map(|w| w.owned_textures())
            .collect()
    }
}

/// Bounded registry of client windows.
#[derive(Debug)]
pub struct Scene {
    windows: Vec<(WindowId, Window)>,
    next_id: u32,
    screen: (u32, u32),
    limits: SceneLimits,
}

impl Scene {
    pub fn new(screen: (u32, u32), limits: SceneLimits) -> Self {
        Self {
            windows: Vec::new(),
            next_id: 0,
            screen,
            limits,
        }
    }

    pub fn screen_size(&self) -> (u32, u32) {
        self.screen
    }

    pub fn limits(&self) -> SceneLimits {
        self.limits
    }

    /// Build a window sized to the screen that is not tracked by the
    /// registry. Used for the shell's own windows.
    pub fn detached_window(&self) -> Result<Window, SceneError> {
        Window::new(self.screen.0, self.screen.1, self.limits)
    }

    /// Register a new hidden window. The id is consumed only on success.
    pub fn create_window(&mut self) -> Result<WindowId, SceneError> {
        if self.windows.len() >= self.limits.max_windows {
            return Err(SceneError::CapacityExceeded {
                what: "windows",
                limit: self.limits.max_windows,
            });
        }

        let window = self.detached_window()?;
        let id = WindowId(self.next_id);
        self.next_id += 1;
        self.windows.push((id, window));
        debug!("created window {}", id);
        Ok(id)
    }

    /// Remove a window and free its widget tree. Returns released textures.
    pub fn destroy_window(&mut self, id: WindowId) -> Result<Vec<TextureId>, SceneError> {
        let pos = self
            .windows
            .iter()
            .position(|(wid, _)| *wid == id)
            .ok_or(SceneError::UnknownWindow(id))?;
        let (_, mut window) = self.windows.remove(pos);
        debug!("destroyed window {}", id);
        Ok(window.clear())
    }

    pub fn window(&self, id: WindowId) -> Option<&Window> {
        self.windows
            .iter()
            .find(|(wid, _)| *wid == id)
            .map(|(_, w)| w)
    }

    pub fn window_mut(&mut self, id: WindowId) -> Option<&mut Window> {
        self.windows
            .iter_mut()
            .find(|(wid, _)| *wid == id)
            .map(|(_, w)| w)
    }

    pub fn set_visible(&mut self, id: WindowId, visible: bool) -> Result<(), SceneError> {
        self.window_mut(id)
            .ok_or(SceneError::UnknownWindow(id))?
            .set_visible(visible);
        Ok(())
    }

    pub fn contains(&self, id: WindowId) -> bool {
        self.window(id).is_some()
    }

    pub fn len(&self) -> usize {
        self.windows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.windows.is_empty()
    }

    pub fn ids(&self) -> impl Iterator<Item = WindowId> + '_ {
        self.windows.iter().map(|(id, _)| *id)
    }

    /// Fonts referenced by any widget of any client window.
    pub fn fonts_in_use(&self) -> HashSet<FontId> {
        let mut out = HashSet::new();
        for (_, window) in &self.windows {
            window.collect_fonts(&mut out);
        }
        out
    }
}
