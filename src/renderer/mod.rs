//! Software renderer for Flux
//!
//! Each window's widget tree is painted into the window's private
//! premultiplied RGBA target, then the selected windows are composited in
//! order onto an opaque black screen frame that the presentation engine
//! uploads to scanout.
//!
//! Widgets are painted depth-first, pre-order, in list order (painter's
//! algorithm). A widget nested under another widget is clipped to its
//! immediate parent's rectangle.

use log::trace;
use tiny_skia::{Color as SkColor, Pixmap, PixmapPaint, Transform};

use crate::error::SceneError;
use crate::scene::{Parent, Widget, WidgetKind, Window};

pub mod sdf;
pub mod text;
pub mod texture;

pub use sdf::RoundedRect;
pub use text::{Font, Glyph, GlyphQuad};
pub use texture::{Resources, Texture};

/// Texels at or below this alpha are discarded rather than blended.
const GLYPH_ALPHA_CUTOFF: f32 = 0.01;

/// Integer pixel rectangle, half-open.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct ClipRect {
    x0: i32,
    y0: i32,
    x1: i32,
    y1: i32,
}

impl ClipRect {
    fn of_target(target: &Pixmap) -> Self {
        Self {
            x0: 0,
            y0: 0,
            x1: target.width() as i32,
            y1: target.height() as i32,
        }
    }

    /// Pixels whose centers fall inside the float rectangle.
    fn covering(x: f32, y: f32, w: f32, h: f32) -> Self {
        Self {
            x0: x.round() as i32,
            y0: y.round() as i32,
            x1: (x + w.max(0.0)).round() as i32,
            y1: (y + h.max(0.0)).round() as i32,
        }
    }

    /// Pixels touched by the float rectangle grown by `pad`.
    fn bounding(x: f32, y: f32, w: f32, h: f32, pad: f32) -> Self {
        Self {
            x0: (x - pad).floor() as i32,
            y0: (y - pad).floor() as i32,
            x1: (x + w.max(0.0) + pad).ceil() as i32,
            y1: (y + h.max(0.0) + pad).ceil() as i32,
        }
    }

    fn intersect(self, other: Self) -> Self {
        Self {
            x0: self.x0.max(other.x0),
            y0: self.y0.max(other.y0),
            x1: self.x1.min(other.x1),
            y1: self.y1.min(other.y1),
        }
    }

    fn is_empty(&self) -> bool {
        self.x0 >= self.x1 || self.y0 >= self.y1
    }
}

/// Source-over blend of a straight-alpha color into a premultiplied pixel.
fn blend(data: &mut [u8], width: u32, x: i32, y: i32, rgb: [f32; 3], alpha: f32) {
    let alpha = alpha.clamp(0.0, 1.0);
    if alpha <= 0.0 {
        return;
    }
    let i = (y as usize * width as usize + x as usize) * 4;
    let px = &mut data[i..i + 4];
    let keep = 1.0 - alpha;
    for c in 0..3 {
        let src = rgb[c].clamp(0.0, 1.0) * alpha * 255.0;
        px[c] = (src + px[c] as f32 * keep).round().min(255.0) as u8;
    }
    px[3] = (alpha * 255.0 + px[3] as f32 * keep).round().min(255.0) as u8;
}

/// Paints widget trees and composites windows into the screen frame.
#[derive(Debug)]
pub struct Renderer {
    frame: Pixmap,
}

impl Renderer {
    pub fn new(width: u32, height: u32) -> Result<Self, SceneError> {
        let mut frame =
            Pixmap::new(width, height).ok_or(SceneError::TargetAllocation { width, height })?;
        frame.fill(SkColor::BLACK);
        Ok(Self { frame })
    }

    pub fn size(&self) -> (u32, u32) {
        (self.frame.width(), self.frame.height())
    }

    /// The composited screen frame.
    pub fn frame(&self) -> &Pixmap {
        &self.frame
    }

    /// Clear the window's target and repaint its whole widget tree.
    pub fn paint_window(&self, window: &mut Window, resources: &Resources) {
        let (widgets, target) = window.parts_mut();
        target.fill(SkColor::TRANSPARENT);
        let bounds = ClipRect::of_target(target);
        for widget in widgets {
            paint_widget(target, widget, (0.0, 0.0), None, bounds, resources);
        }
    }

    /// Reset the screen frame to opaque black.
    pub fn begin_frame(&mut self) {
        self.frame.fill(SkColor::BLACK);
    }

    /// Composite a painted window over the current frame contents.
    pub fn compose(&mut self, window: &Window) {
        self.frame.draw_pixmap(
            0,
            0,
            window.target().as_ref(),
            &PixmapPaint::default(),
            Transform::identity(),
            None,
        );
    }
}

fn paint_widget(
    target: &mut Pixmap,
    widget: &Widget,
    origin: (f32, f32),
    parent_rect: Option<ClipRect>,
    bounds: ClipRect,
    resources: &Resources,
) {
    let g = widget.geometry;
    let (x, y) = (origin.0 + g.x, origin.1 + g.y);

    let clip = match (widget.parent(), parent_rect) {
        (Parent::Widget(_), Some(rect)) => bounds.intersect(rect),
        _ => bounds,
    };

    if !clip.is_empty() {
        match widget.kind() {
            WidgetKind::Rect => paint_shape(target, widget, x, y, clip, None),
            WidgetKind::Outline => {
                paint_shape(target, widget, x, y, clip, Some(g.border_width))
            }
            WidgetKind::Image => paint_image(target, widget, x, y, clip, resources),
            WidgetKind::Text => paint_text(target, widget, x, y, clip, resources),
        }
    }

    let own_rect = ClipRect::covering(x, y, g.w, g.h);
    for child in widget.children() {
        paint_widget(target, child, (x, y), Some(own_rect), bounds, resources);
    }
}

fn paint_shape(
    target: &mut Pixmap,
    widget: &Widget,
    x: f32,
    y: f32,
    clip: ClipRect,
    border: Option<f32>,
) {
    let g = widget.geometry;
    let shape = RoundedRect::new(x, y, g.w, g.h, g.radius);
    let [r, gr, b, a] = widget.color().to_f32();
    let area = ClipRect::bounding(x, y, g.w, g.h, 1.0).intersect(clip);
    let width = target.width();
    let data = target.data_mut();

    for py in area.y0..area.y1 {
        for px in area.x0..area.x1 {
            let (sx, sy) = (px as f32 + 0.5, py as f32 + 0.5);
            let cov = match border {
                Some(border) => shape.stroke(sx, sy, border),
                None => shape.fill(sx, sy),
            };
            if cov > 0.0 {
                blend(data, width, px, py, [r, gr, b], a * cov);
            }
        }
    }
}

fn paint_image(
    target: &mut Pixmap,
    widget: &Widget,
    x: f32,
    y: f32,
    clip: ClipRect,
    resources: &Resources,
) {
    let g = widget.geometry;
    let Some(texture) = widget.texture().and_then(|id| resources.texture(id)) else {
        trace!("image widget '{}' has no texture", widget.id());
        return;
    };
    if g.w <= 0.0 || g.h <= 0.0 {
        return;
    }

    let shape = RoundedRect::new(x, y, g.w, g.h, g.radius);
    let alpha = widget.color().to_f32()[3];
    let area = ClipRect::bounding(x, y, g.w, g.h, 1.0).intersect(clip);
    let width = target.width();
    let data = target.data_mut();

    for py in area.y0..area.y1 {
        for px in area.x0..area.x1 {
            let (sx, sy) = (px as f32 + 0.5, py as f32 + 0.5);
            let cov = shape.fill(sx, sy);
            if cov <= 0.0 {
                continue;
            }
            let texel = texture.sample((sx - x) / g.w, (sy - y) / g.h);
            blend(
                data,
                width,
                px,
                py,
                [texel[0], texel[1], texel[2]],
                alpha * cov * texel[3],
            );
        }
    }
}

fn paint_text(
    target: &mut Pixmap,
    widget: &Widget,
    x: f32,
    y: f32,
    clip: ClipRect,
    resources: &Resources,
) {
    let text = widget.text().unwrap_or_default();
    if text.is_empty() {
        return;
    }
    let Some(font) = widget.font().and_then(|id| resources.font(id)) else {
        trace!("text widget '{}' has no font", widget.id());
        return;
    };

    let [r, g, b, a] = widget.color().to_f32();
    let atlas = font.atlas();
    let inv_scale = 1.0 / font.scale();
    let width = target.width();
    let data = target.data_mut();

    for quad in font.layout(text) {
        let (qx, qy) = (x + quad.x0, y + quad.y0);
        let area = ClipRect::bounding(qx, qy, quad.x1 - quad.x0, quad.y1 - quad.y0, 0.0)
            .intersect(clip);

        for py in area.y0..area.y1 {
            for px in area.x0..area.x1 {
                let (sx, sy) = (px as f32 + 0.5, py as f32 + 0.5);
                let s = quad.s0 + (sx - qx) * inv_scale;
                let t = quad.t0 + (sy - qy) * inv_scale;
                if s < quad.s0 || s > quad.s1 || t < quad.t0 || t > quad.t1 {
                    continue;
                }
                let coverage = atlas.sample_texel(s, t)[3];
                if coverage <= GLYPH_ALPHA_CUTOFF {
                    continue;
                }
                blend(data, width, px, py, [r, g, b], a * coverage);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scene::{Color, Geometry, SceneLimits, TextureId};

    fn pixel(target: &Pixmap, x: u32, y: u32) -> [u8; 4] {
        let p = target.pixel(x, y).unwrap();
        [p.red(), p.green(), p.blue(), p.alpha()]
    }

    fn window_with(widgets: Vec<Widget>) -> Window {
        let mut window = Window::new(40, 30, SceneLimits::default()).unwrap();
        for w in widgets {
            window.append_widget(w).unwrap();
        }
        window
    }

    fn rect(id: &str, x: f32, y: f32, w: f32, h: f32, color: Color) -> Widget {
        Widget::new(id, WidgetKind::Rect)
            .unwrap()
            .with_geometry(Geometry {
                x,
                y,
                w,
                h,
                ..Geometry::default()
            })
            .with_color(color)
    }

    #[test]
    fn fills_rect_and_leaves_rest_transparent() {
        let red = Color::rgba(255, 0, 0, 255);
        let mut window = window_with(vec![rect("r", 10.0, 10.0, 10.0, 10.0, red)]);
        Renderer::new(40, 30)
            .unwrap()
            .paint_window(&mut window, &Resources::new());

        assert_eq!(pixel(window.target(), 15, 15), [255, 0, 0, 255]);
        assert_eq!(pixel(window.target(), 5, 5), [0, 0, 0, 0]);
        assert_eq!(pixel(window.target(), 25, 15), [0, 0, 0, 0]);
    }

    #[test]
    fn later_widgets_paint_on_top() {
        let mut window = window_with(vec![
            rect("under", 0.0, 0.0, 40.0, 30.0, Color::rgba(0, 0, 255, 255)),
            rect("over", 0.0, 0.0, 20.0, 30.0, Color::rgba(0, 255, 0, 255)),
        ]);
        Renderer::new(40, 30)
            .unwrap()
            .paint_window(&mut window, &Resources::new());

        assert_eq!(pixel(window.target(), 5, 15), [0, 255, 0, 255]);
        assert_eq!(pixel(window.target(), 35, 15), [0, 0, 255, 255]);
    }

    #[test]
    fn children_are_clipped_to_parent() {
        let mut window = window_with(vec![rect("panel", 10.0, 10.0, 10.0, 10.0, Color::BLACK)]);
        window
            .append_child(
                "panel",
                rect("wide", 0.0, 0.0, 30.0, 5.0, Color::rgba(255, 255, 255, 255)),
            )
            .unwrap();
        Renderer::new(40, 30)
            .unwrap()
            .paint_window(&mut window, &Resources::new());

        // Child is offset by the parent and cropped at the parent's right edge.
        assert_eq!(pixel(window.target(), 15, 12), [255, 255, 255, 255]);
        assert_eq!(pixel(window.target(), 25, 12), [0, 0, 0, 0]);
    }

    #[test]
    fn outline_leaves_center_empty() {
        let mut outline = Widget::new("o", WidgetKind::Outline)
            .unwrap()
            .with_color(Color::WHITE);
        outline.geometry = Geometry {
            x: 0.0,
            y: 0.0,
            w: 40.0,
            h: 30.0,
            radius: 0.0,
            border_width: 3.0,
        };
        let mut window = window_with(vec![outline]);
        Renderer::new(40, 30)
            .unwrap()
            .paint_window(&mut window, &Resources::new());

        assert_eq!(pixel(window.target(), 20, 15), [0, 0, 0, 0]);
        assert_eq!(pixel(window.target(), 1, 15)[3], 255);
    }

    #[test]
    fn image_multiplies_texel_alpha() {
        let mut resources = Resources::new();
        let tex = resources.insert_texture(Texture::solid(4, 4, [0, 0, 255, 128]).unwrap());
        let mut image = Widget::new("img", WidgetKind::Image)
            .unwrap()
            .with_geometry(Geometry {
                w: 40.0,
                h: 30.0,
                ..Geometry::default()
            });
        image.set_image(tex);
        let mut window = window_with(vec![image]);
        Renderer::new(40, 30).unwrap().paint_window(&mut window, &resources);

        let [r, g, b, a] = pixel(window.target(), 20, 15);
        assert_eq!((r, g), (0, 0));
        assert!((127..=129).contains(&a));
        assert_eq!(b, a);
    }

    #[test]
    fn image_without_texture_draws_nothing() {
        let mut image = Widget::new("img", WidgetKind::Image)
            .unwrap()
            .with_geometry(Geometry {
                w: 40.0,
                h: 30.0,
                ..Geometry::default()
            });
        image.set_image(TextureId(42));
        let mut window = window_with(vec![image]);
        Renderer::new(40, 30)
            .unwrap()
            .paint_window(&mut window, &Resources::new());
        assert_eq!(pixel(window.target(), 20, 15), [0, 0, 0, 0]);
    }

    #[test]
    fn text_draws_glyph_boxes_above_baseline() {
        let mut resources = Resources::new();
        let font = resources.insert_font(
            std::path::Path::new("block"),
            10.0,
            text::tests::block_font(10.0),
        );
        let mut label = Widget::new("label", WidgetKind::Text)
            .unwrap()
            .with_color(Color::WHITE)
            .with_geometry(Geometry {
                x: 2.0,
                y: 20.0,
                ..Geometry::default()
            });
        label.set_text("A");
        label.set_font(font);
        let mut window = window_with(vec![label]);
        Renderer::new(40, 30).unwrap().paint_window(&mut window, &resources);

        assert_eq!(pixel(window.target(), 5, 15), [255, 255, 255, 255]);
        assert_eq!(pixel(window.target(), 5, 22), [0, 0, 0, 0]);
        assert_eq!(pixel(window.target(), 15, 15), [0, 0, 0, 0]);
    }

    #[test]
    fn compose_stacks_windows_over_black() {
        let mut renderer = Renderer::new(40, 30).unwrap();
        let resources = Resources::new();
        let mut back = window_with(vec![rect("a", 0.0, 0.0, 40.0, 30.0, Color::rgba(255, 0, 0, 255))]);
        let mut front = window_with(vec![rect("b", 0.0, 0.0, 20.0, 30.0, Color::rgba(0, 0, 255, 255))]);
        renderer.paint_window(&mut back, &resources);
        renderer.paint_window(&mut front, &resources);

        renderer.begin_frame();
        renderer.compose(&back);
        renderer.compose(&front);

        assert_eq!(pixel(renderer.frame(), 5, 5), [0, 0, 255, 255]);
        assert_eq!(pixel(renderer.frame(), 35, 5), [255, 0, 0, 255]);

        renderer.begin_frame();
        assert_eq!(pixel(renderer.frame(), 35, 5), [0, 0, 0, 255]);
    }
}
