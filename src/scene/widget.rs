//! Widgets: the nodes of a window's scene tree

use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

use super::{Color, FontId, TextureId};
use crate::error::SceneError;

/// Longest accepted widget id, in bytes.
pub const MAX_WIDGET_ID_LEN: usize = 63;

/// Drawable variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WidgetKind {
    /// Filled rounded rectangle
    Rect,
    /// Rounded rectangle stroke of `border_width`
    Outline,
    /// Glyph run from a baked font
    Text,
    /// Rounded rectangle sampling a texture
    Image,
}

impl WidgetKind {
    pub fn name(self) -> &'static str {
        match self {
            WidgetKind::Rect => "RECT",
            WidgetKind::Outline => "OUTLINE",
            WidgetKind::Text => "TEXT",
            WidgetKind::Image => "IMAGE",
        }
    }
}

impl fmt::Display for WidgetKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for WidgetKind {
    type Err = String;

    /// Accepts the variant names and the legacy numeric codes 1..=4.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "RECT" | "RECTANGLE" | "1" => Ok(WidgetKind::Rect),
            "OUTLINE" | "2" => Ok(WidgetKind::Outline),
            "TEXT" | "3" => Ok(WidgetKind::Text),
            "IMAGE" | "4" => Ok(WidgetKind::Image),
            other => Err(format!("unknown widget type '{other}'")),
        }
    }
}

/// Position relative to the parent plus shape parameters, in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Geometry {
    pub x: f32,
    pub y: f32,
    pub w: f32,
    pub h: f32,
    pub radius: f32,
    pub border_width: f32,
}

/// Sparse geometry update. `None` fields keep their current value.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct GeometryPatch {
    pub x: Option<f32>,
    pub y: Option<f32>,
    pub w: Option<f32>,
    pub h: Option<f32>,
    pub radius: Option<f32>,
    pub border_width: Option<f32>,
}

impl GeometryPatch {
    /// Build a patch from raw wire values: anything below zero (or NaN) is
    /// the "leave unchanged" sentinel.
    pub fn from_raw(x: f32, y: f32, w: f32, h: f32, radius: f32, border_width: f32) -> Self {
        fn field(v: f32) -> Option<f32> {
            (v >= 0.0).then_some(v)
        }

        Self {
            x: field(x),
            y: field(y),
            w: field(w),
            h: field(h),
            radius: field(radius),
            border_width: field(border_width),
        }
    }

    /// Patch that only moves the widget.
    pub fn position(x: f32, y: f32) -> Self {
        Self {
            x: Some(x),
            y: Some(y),
            ..Self::default()
        }
    }

    pub fn apply(&self, geometry: &mut Geometry) {
        let fields = [
            (self.x, &mut geometry.x),
            (self.y, &mut geometry.y),
            (self.w, &mut geometry.w),
            (self.h, &mut geometry.h),
            (self.radius, &mut geometry.radius),
            (self.border_width, &mut geometry.border_width),
        ];
        for (value, slot) in fields {
            if let Some(v) = value {
                *slot = v;
            }
        }
    }
}

/// Kind-specific payload.
#[derive(Debug, Clone, PartialEq)]
pub enum Content {
    None,
    Text { text: String, font: Option<FontId> },
    Image(Option<TextureId>),
}

impl Content {
    fn for_kind(kind: WidgetKind) -> Self {
        match kind {
            WidgetKind::Rect | WidgetKind::Outline => Content::None,
            WidgetKind::Text => Content::Text {
                text: String::new(),
                font: None,
            },
            WidgetKind::Image => Content::Image(None),
        }
    }
}

/// Back-reference to the owner. Navigational only; ownership always flows
/// from the parent's child list down.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Parent {
    None,
    Window,
    Widget(String),
}

/// Result of a content setter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mutation {
    Applied,
    /// Applied, and the widget dropped its previous texture.
    Replaced(TextureId),
    /// Widget kind does not accept this content; nothing changed.
    Ignored,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Widget {
    id: String,
    kind: WidgetKind,
    pub geometry: Geometry,
    color: Option<Color>,
    content: Content,
    parent: Parent,
    children: Vec<Widget>,
}

impl Widget {
    pub fn new(id: impl Into<String>, kind: WidgetKind) -> Result<Self, SceneError> {
        let id = id.into();
        validate_id(&id)?;

        Ok(Self {
            id,
            kind,
            geometry: Geometry::default(),
            color: None,
            content: Content::for_kind(kind),
            parent: Parent::None,
            children: Vec::new(),
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn kind(&self) -> WidgetKind {
        self.kind
    }

    pub fn parent(&self) -> &Parent {
        &self.parent
    }

    pub fn children(&self) -> &[Widget] {
        &self.children
    }

    pub fn content(&self) -> &Content {
        &self.content
    }

    /// Fill color; white until one is set.
    pub fn color(&self) -> Color {
        self.color.unwrap_or(Color::WHITE)
    }

    pub fn has_color(&self) -> bool {
        self.color.is_some()
    }

    pub fn set_color(&mut self, color: Color) {
        self.color = Some(color);
    }

    pub fn with_geometry(mut self, geometry: Geometry) -> Self {
        self.geometry = geometry;
        self
    }

    pub fn with_color(mut self, color: Color) -> Self {
        self.color = Some(color);
        self
    }

    pub fn text(&self) -> Option<&str> {
        match &self.content {
            Content::Text { text, .. } => Some(text),
            _ => None,
        }
    }

    pub fn font(&self) -> Option<FontId> {
        match &self.content {
            Content::Text { font, .. } => *font,
            _ => None,
        }
    }

    pub fn texture(&self) -> Option<TextureId> {
        match &self.content {
            Content::Image(texture) => *texture,
            _ => None,
        }
    }

    pub fn set_text(&mut self, value: &str) -> Mutation {
        match &mut self.content {
            Content::Text { text, .. } => {
                text.clear();
                text.push_str(value);
                Mutation::Applied
            }
            _ => self.mismatch("text"),
        }
    }

    pub fn set_font(&mut self, value: FontId) -> Mutation {
        match &mut self.content {
            Content::Text { font, .. } => {
                *font = Some(value);
                Mutation::Applied
            }
            _ => self.mismatch("font"),
        }
    }

    pub fn set_image(&mut self, value: TextureId) -> Mutation {
        match &mut self.content {
            Content::Image(texture) => match texture.replace(value) {
                Some(old) if old != value => Mutation::Replaced(old),
                _ => Mutation::Applied,
            },
            _ => self.mismatch("image"),
        }
    }

    fn mismatch(&self, what: &str) -> Mutation {
        log::warn!(
            "widget '{}' is {} and does not take {}, ignoring",
            self.id,
            self.kind,
            what
        );
        Mutation::Ignored
    }

    pub(crate) fn set_parent(&mut self, parent: Parent) {
        self.parent = parent;
    }

    pub(crate) fn children_mut(&mut self) -> &mut Vec<Widget> {
        &mut self.children
    }

    /// Depth-first search of this subtree, including `self`.
    pub fn find(&self, id: &str) -> Option<&Widget> {
        if self.id == id {
            return Some(self);
        }
        self.children.iter().find_map(|child| child.find(id))
    }

    pub fn find_mut(&mut self, id: &str) -> Option<&mut Widget> {
        if self.id == id {
            return Some(self);
        }
        self.children.iter_mut().find_map(|child| child.find_mut(id))
    }

    /// Detach the descendant with `id` from wherever it sits in this subtree.
    pub(crate) fn remove_descendant(&mut self, id: &str) -> Option<Widget> {
        if let Some(pos) = self.children.iter().position(|c| c.id == id) {
            return Some(self.children.swap_remove(pos));
        }
        self.children
            .iter_mut()
            .find_map(|child| child.remove_descendant(id))
    }

    /// Textures owned by this subtree in post-order (children before parent).
    pub fn owned_textures(&self) -> Vec<TextureId> {
        let mut out = Vec::new();
        self.collect_textures(&mut out);
        out
    }

    fn collect_textures(&self, out: &mut Vec<TextureId>) {
        for child in &self.children {
            child.collect_textures(out);
        }
        if let Some(texture) = self.texture() {
            out.push(texture);
        }
    }

    /// Add every font referenced in this subtree to `out`.
    pub fn collect_fonts(&self, out: &mut HashSet<FontId>) {
        out.extend(self.font());
        for child in &self.children {
            child.collect_fonts(out);
        }
    }

    /// Number of widgets in this subtree, including `self`.
    pub fn subtree_len(&self) -> usize {
        1 + self.children.iter().map(Widget::subtree_len).sum::<usize>()
    }
}

fn validate_id(id: &str) -> Result<(), SceneError> {
    let printable = id.bytes().all(|b| b.is_ascii_graphic() || b == b' ');
    if id.is_empty() || id.len() > MAX_WIDGET_ID_LEN || !printable {
        return Err(SceneError::InvalidWidgetId(id.to_string()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_parses_names_and_codes() {
        assert_eq!("rect".parse::<WidgetKind>(), Ok(WidgetKind::Rect));
        assert_eq!("OUTLINE".parse::<WidgetKind>(), Ok(WidgetKind::Outline));
        assert_eq!("3".parse::<WidgetKind>(), Ok(WidgetKind::Text));
        assert_eq!("Image".parse::<WidgetKind>(), Ok(WidgetKind::Image));
        assert!("0".parse::<WidgetKind>().is_err());
        assert!("circle".parse::<WidgetKind>().is_err());
    }

    #[test]
    fn content_setters_respect_kind() {
        let mut rect = Widget::new("r", WidgetKind::Rect).unwrap();
        assert_eq!(rect.set_text("hello"), Mutation::Ignored);
        assert_eq!(rect.set_font(FontId(1)), Mutation::Ignored);
        assert_eq!(rect.set_image(TextureId(1)), Mutation::Ignored);
        assert_eq!(rect.content(), &Content::None);

        let mut text = Widget::new("t", WidgetKind::Text).unwrap();
        assert_eq!(text.set_text("hello"), Mutation::Applied);
        assert_eq!(text.set_font(FontId(2)), Mutation::Applied);
        assert_eq!(text.set_image(TextureId(1)), Mutation::Ignored);
        assert_eq!(text.text(), Some("hello"));
        assert_eq!(text.font(), Some(FontId(2)));
    }

    #[test]
    fn image_reports_replaced_texture() {
        let mut image = Widget::new("i", WidgetKind::Image).unwrap();
        assert_eq!(image.set_image(TextureId(1)), Mutation::Applied);
        assert_eq!(image.set_image(TextureId(2)), Mutation::Replaced(TextureId(1)));
        assert_eq!(image.set_image(TextureId(2)), Mutation::Applied);
        assert_eq!(image.texture(), Some(TextureId(2)));
    }

    #[test]
    fn rejects_bad_ids() {
        assert!(Widget::new("", WidgetKind::Rect).is_err());
        assert!(Widget::new("x".repeat(MAX_WIDGET_ID_LEN + 1), WidgetKind::Rect).is_err());
        assert!(Widget::new("tab\there", WidgetKind::Rect).is_err());
        assert!(Widget::new("menu-body", WidgetKind::Rect).is_ok());
    }

    #[test]
    fn patch_from_raw_treats_negatives_as_unchanged() {
        let mut g = Geometry {
            x: 1.0,
            y: 2.0,
            w: 3.0,
            h: 4.0,
            radius: 5.0,
            border_width: 6.0,
        };
        GeometryPatch::from_raw(10.0, -1.0, 30.0, -0.5, f32::NAN, 0.0).apply(&mut g);
        assert_eq!(
            g,
            Geometry {
                x: 10.0,
                y: 2.0,
                w: 30.0,
                h: 4.0,
                radius: 5.0,
                border_width: 0.0,
            }
        );
    }

    #[test]
    fn owned_textures_are_post_order() {
        let mut root = Widget::new("root", WidgetKind::Image).unwrap();
        root.set_image(TextureId(3));
        let mut child = Widget::new("child", WidgetKind::Image).unwrap();
        child.set_image(TextureId(1));
        let mut grandchild = Widget::new("grandchild", WidgetKind::Image).unwrap();
        grandchild.set_image(TextureId(0));
        child.children_mut().push(grandchild);
        root.children_mut().push(child);

        assert_eq!(
            root.owned_textures(),
            vec![TextureId(0), TextureId(1), TextureId(3)]
        );
        assert_eq!(root.subtree_len(), 3);
    }
}
