//! Signed-distance rounded rectangles
//!
//! Distances are negative inside the shape. Antialiasing width comes from
//! one-pixel forward differences of the field, the CPU counterpart of a
//! fragment shader's `fwidth`, so edges stay one device pixel soft at any
//! scale.

/// Exact signed distance from `(px, py)` to a rounded box centered on the
/// origin with half extents `(hw, hh)` and corner radius `r`.
pub fn rounded_box(px: f32, py: f32, hw: f32, hh: f32, r: f32) -> f32 {
    let qx = px.abs() - hw + r;
    let qy = py.abs() - hh + r;
    let outside = (qx.max(0.0).powi(2) + qy.max(0.0).powi(2)).sqrt();
    outside + qx.max(qy).min(0.0) - r
}

pub fn smoothstep(edge0: f32, edge1: f32, x: f32) -> f32 {
    let t = ((x - edge0) / (edge1 - edge0)).clamp(0.0, 1.0);
    t * t * (3.0 - 2.0 * t)
}

/// Fraction of a pixel covered at distance `d` given antialias width `aa`.
pub fn coverage(d: f32, aa: f32) -> f32 {
    if aa <= f32::EPSILON {
        return if d <= 0.0 { 1.0 } else { 0.0 };
    }
    1.0 - smoothstep(0.0, aa, d)
}

/// A rounded rectangle in window space.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RoundedRect {
    cx: f32,
    cy: f32,
    hw: f32,
    hh: f32,
    radius: f32,
}

impl RoundedRect {
    /// Radius is clamped to half the shorter side.
    pub fn new(x: f32, y: f32, w: f32, h: f32, radius: f32) -> Self {
        let hw = w.max(0.0) / 2.0;
        let hh = h.max(0.0) / 2.0;
        Self {
            cx: x + hw,
            cy: y + hh,
            hw,
            hh,
            radius: radius.clamp(0.0, hw.min(hh)),
        }
    }

    pub fn distance(&self, px: f32, py: f32) -> f32 {
        rounded_box(px - self.cx, py - self.cy, self.hw, self.hh, self.radius)
    }

    /// Distance plus screen-space antialias width at a sample point.
    fn sample(&self, px: f32, py: f32) -> (f32, f32) {
        let d = self.distance(px, py);
        let ddx = self.distance(px + 1.0, py) - d;
        let ddy = self.distance(px, py + 1.0) - d;
        (d, ddx.abs() + ddy.abs())
    }

    pub fn fill(&self, px: f32, py: f32) -> f32 {
        let (d, aa) = self.sample(px, py);
        coverage(d, aa)
    }

    /// Coverage of a band `border` pixels wide just inside the edge.
    pub fn stroke(&self, px: f32, py: f32, border: f32) -> f32 {
        let (d, aa) = self.sample(px, py);
        let outer = coverage(d, aa);
        let inner = coverage(d + border, aa);
        outer * (1.0 - inner)
    }
}
