use eframe::egui::{pos2, vec2, Pos2, Vec2};

pub const DEFAULT_ZOOM_MIN: f32 = 0.1;
pub const DEFAULT_ZOOM_MAX: f32 = 5.0;

/// Inclusive zoom range. Every stored zoom factor passes through [`ZoomLimits::clamp`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ZoomLimits {
    pub min: f32,
    pub max: f32,
}

impl Default for ZoomLimits {
    fn default() -> Self {
        Self {
            min: DEFAULT_ZOOM_MIN,
            max: DEFAULT_ZOOM_MAX,
        }
    }
}

impl ZoomLimits {
    pub fn new(min: f32, max: f32) -> Self {
        let min = if min.is_finite() && min > 0.0 {
            min
        } else {
            DEFAULT_ZOOM_MIN
        };
        let max = if max.is_finite() && max >= min {
            max
        } else {
            min.max(DEFAULT_ZOOM_MAX)
        };
        Self { min, max }
    }

    pub fn clamp(&self, zoom: f32) -> f32 {
        if zoom.is_nan() {
            return self.min.max(1.0).min(self.max);
        }
        zoom.clamp(self.min, self.max)
    }
}

/// Geometric and photometric display state of one pane.
///
/// Fields are read-only outside this module; every change goes through a named
/// operation so that each mutation maps to one user action.
#[derive(Debug, Clone, PartialEq)]
pub struct TransformState {
    zoom: f32,
    rotation_degrees: i32,
    flip_horizontal: bool,
    flip_vertical: bool,
    invert: bool,
    window_width: f32,
    window_center: f32,
    pan: Vec2,
}

impl Default for TransformState {
    fn default() -> Self {
        Self {
            zoom: 1.0,
            rotation_degrees: 0,
            flip_horizontal: false,
            flip_vertical: false,
            invert: false,
            window_width: 255.0,
            window_center: 127.5,
            pan: Vec2::ZERO,
        }
    }
}

impl TransformState {
    pub fn with_window(window_width: f32, window_center: f32, invert: bool) -> Self {
        Self {
            window_width: sanitize_width(window_width),
            window_center: sanitize_center(window_center),
            invert,
            ..Self::default()
        }
    }

    pub fn zoom(&self) -> f32 {
        self.zoom
    }

    pub fn rotation_degrees(&self) -> i32 {
        self.rotation_degrees
    }

    pub fn flip_horizontal(&self) -> bool {
        self.flip_horizontal
    }

    pub fn flip_vertical(&self) -> bool {
        self.flip_vertical
    }

    pub fn invert(&self) -> bool {
        self.invert
    }

    pub fn window_width(&self) -> f32 {
        self.window_width
    }

    pub fn window_center(&self) -> f32 {
        self.window_center
    }

    pub fn pan(&self) -> Vec2 {
        self.pan
    }

    pub fn toggle_invert(&mut self) {
        self.invert = !self.invert;
    }

    pub fn toggle_flip_horizontal(&mut self) {
        self.flip_horizontal = !self.flip_horizontal;
    }

    pub fn toggle_flip_vertical(&mut self) {
        self.flip_vertical = !self.flip_vertical;
    }

    /// Adds `delta_degrees` and normalises into `[0, 360)`.
    pub fn rotate(&mut self, delta_degrees: i32) {
        self.rotation_degrees = self.rotation_degrees.wrapping_add(delta_degrees).rem_euclid(360);
    }

    pub fn set_zoom(&mut self, zoom: f32, limits: &ZoomLimits) {
        self.zoom = limits.clamp(zoom);
    }

    /// Multiplies the zoom about `anchor` (canvas space) so the image point under the
    /// anchor stays put. Returns false when the clamped zoom did not change.
    pub fn zoom_about(
        &mut self,
        factor: f32,
        anchor: Pos2,
        canvas_size: Vec2,
        limits: &ZoomLimits,
    ) -> bool {
        if !factor.is_finite() || factor <= 0.0 {
            return false;
        }
        let old_zoom = self.zoom;
        let next_zoom = limits.clamp(old_zoom * factor);
        if (next_zoom - old_zoom).abs() <= f32::EPSILON {
            return false;
        }
        let canvas_center = (canvas_size * 0.5).to_pos2();
        let pointer_offset = anchor - (canvas_center + self.pan);
        let zoom_ratio = next_zoom / old_zoom;
        self.pan += pointer_offset * (1.0 - zoom_ratio);
        self.zoom = next_zoom;
        true
    }

    pub fn pan_by(&mut self, delta: Vec2) {
        if delta.x.is_finite() && delta.y.is_finite() {
            self.pan += delta;
        }
    }

    pub fn clear_pan(&mut self) {
        self.pan = Vec2::ZERO;
    }

    pub fn set_window(&mut self, window_width: f32, window_center: f32) {
        self.window_width = sanitize_width(window_width);
        self.window_center = sanitize_center(window_center);
    }

    pub fn adjust_window(&mut self, delta_width: f32, delta_center: f32) -> bool {
        let old = (self.window_width, self.window_center);
        self.set_window(
            self.window_width + delta_width,
            self.window_center + delta_center,
        );
        (self.window_width - old.0).abs() > f32::EPSILON
            || (self.window_center - old.1).abs() > f32::EPSILON
    }

    /// Image dimensions as seen after rotation (90/270 swap the axes).
    pub fn rotated_extent(&self, image_width: f32, image_height: f32) -> Vec2 {
        if self.rotation_degrees.rem_euclid(180) == 90 {
            vec2(image_height, image_width)
        } else {
            vec2(image_width, image_height)
        }
    }
}

fn sanitize_width(width: f32) -> f32 {
    if width.is_finite() {
        width.max(0.0)
    } else {
        0.0
    }
}

fn sanitize_center(center: f32) -> f32 {
    if center.is_finite() {
        center
    } else {
        0.0
    }
}

/// Zoom that makes the (rotated) image's longer side exactly fill the matching canvas
/// side.
pub fn fit_zoom(
    state: &TransformState,
    image_width: usize,
    image_height: usize,
    canvas_size: Vec2,
    limits: &ZoomLimits,
) -> Option<f32> {
    if image_width == 0 || image_height == 0 || canvas_size.x <= 0.0 || canvas_size.y <= 0.0 {
        return None;
    }
    let extent = state.rotated_extent(image_width as f32, image_height as f32);
    let zoom = if extent.x >= extent.y {
        canvas_size.x / extent.x
    } else {
        canvas_size.y / extent.y
    };
    Some(limits.clamp(zoom))
}

/// 2-D affine map: `x' = a*x + c*y + tx`, `y' = b*x + d*y + ty`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Affine2 {
    pub a: f32,
    pub b: f32,
    pub c: f32,
    pub d: f32,
    pub tx: f32,
    pub ty: f32,
}

impl Affine2 {
    pub const IDENTITY: Self = Self {
        a: 1.0,
        b: 0.0,
        c: 0.0,
        d: 1.0,
        tx: 0.0,
        ty: 0.0,
    };

    pub fn translation(offset: Vec2) -> Self {
        Self {
            tx: offset.x,
            ty: offset.y,
            ..Self::IDENTITY
        }
    }

    pub fn scale(sx: f32, sy: f32) -> Self {
        Self {
            a: sx,
            d: sy,
            ..Self::IDENTITY
        }
    }

    /// Clockwise on screen (y axis points down).
    pub fn rotation_degrees(degrees: i32) -> Self {
        // Exact values for the quarter turns keep edges on whole pixels.
        let (sin, cos) = match degrees.rem_euclid(360) {
            0 => (0.0, 1.0),
            90 => (1.0, 0.0),
            180 => (0.0, -1.0),
            270 => (-1.0, 0.0),
            other => (other as f32).to_radians().sin_cos(),
        };
        Self {
            a: cos,
            b: sin,
            c: -sin,
            d: cos,
            tx: 0.0,
            ty: 0.0,
        }
    }

    /// `self ∘ inner`: applies `inner` first, then `self`.
    pub fn then_apply(&self, inner: &Affine2) -> Affine2 {
        Affine2 {
            a: self.a * inner.a + self.c * inner.b,
            b: self.b * inner.a + self.d * inner.b,
            c: self.a * inner.c + self.c * inner.d,
            d: self.b * inner.c + self.d * inner.d,
            tx: self.a * inner.tx + self.c * inner.ty + self.tx,
            ty: self.b * inner.tx + self.d * inner.ty + self.ty,
        }
    }

    pub fn apply(&self, point: Pos2) -> Pos2 {
        pos2(
            self.a * point.x + self.c * point.y + self.tx,
            self.b * point.x + self.d * point.y + self.ty,
        )
    }

    pub fn apply_vec(&self, v: Vec2) -> Vec2 {
        vec2(self.a * v.x + self.c * v.y, self.b * v.x + self.d * v.y)
    }

    pub fn determinant(&self) -> f32 {
        self.a * self.d - self.b * self.c
    }

    pub fn inverse(&self) -> Option<Affine2> {
        let det = self.determinant();
        if det.abs() < 1e-12 || !det.is_finite() {
            return None;
        }
        let inv = 1.0 / det;
        let a = self.d * inv;
        let b = -self.b * inv;
        let c = -self.c * inv;
        let d = self.a * inv;
        Some(Affine2 {
            a,
            b,
            c,
            d,
            tx: -(a * self.tx + c * self.ty),
            ty: -(b * self.tx + d * self.ty),
        })
    }
}

/// Image pixel space -> canvas pixel space.
///
/// Composition is fixed: image centre to canvas centre (plus pan), rotate, scale,
/// flip. Rotation therefore always pivots about the image centre.
pub fn compute_canvas_transform(
    state: &TransformState,
    image_width: usize,
    image_height: usize,
    canvas_width: usize,
    canvas_height: usize,
) -> Affine2 {
    let image_center = vec2(image_width as f32 * 0.5, image_height as f32 * 0.5);
    let canvas_center = vec2(canvas_width as f32 * 0.5, canvas_height as f32 * 0.5);
    let zoom = state.zoom.max(f32::MIN_POSITIVE);
    let flip = Affine2::scale(
        if state.flip_horizontal { -1.0 } else { 1.0 },
        if state.flip_vertical { -1.0 } else { 1.0 },
    );

    Affine2::translation(canvas_center + state.pan)
        .then_apply(&Affine2::rotation_degrees(state.rotation_degrees))
        .then_apply(&Affine2::scale(zoom, zoom))
        .then_apply(&flip)
        .then_apply(&Affine2::translation(-image_center))
}

/// Linear window/level mapping to a display intensity.
///
/// A zero width is a hard threshold at the centre.
pub fn apply_window_level(raw: f32, window_width: f32, window_center: f32, invert: bool) -> u8 {
    let gray = if window_width <= 0.0 || !window_width.is_finite() {
        if raw < window_center {
            0
        } else {
            255
        }
    } else {
        let low = window_center - window_width / 2.0;
        let high = window_center + window_width / 2.0;
        if raw <= low {
            0
        } else if raw >= high {
            255
        } else {
            (((raw - low) / window_width) * 255.0).round().clamp(0.0, 255.0) as u8
        }
    };
    if invert {
        255 - gray
    } else {
        gray
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_pos_near(actual: Pos2, expected: Pos2) {
        assert!(
            (actual - expected).length() < 1e-3,
            "expected {expected:?}, got {actual:?}"
        );
    }

    #[test]
    fn zoom_is_clamped_into_limits() {
        let limits = ZoomLimits::default();
        let mut state = TransformState::default();
        for requested in [0.0, -3.0, 0.01, 0.1, 2.5, 5.0, 9.0, f32::INFINITY] {
            state.set_zoom(requested, &limits);
            assert!(state.zoom() >= 0.1 && state.zoom() <= 5.0, "{requested}");
        }
        state.set_zoom(f32::NAN, &limits);
        assert!(state.zoom() >= 0.1 && state.zoom() <= 5.0);
    }

    #[test]
    fn rotation_wraps_and_stays_on_quarter_turns() {
        let mut state = TransformState::default();
        let mut expected = 0;
        for delta in [90, 90, 90, 90, 270, -90, 450, -720] {
            state.rotate(delta);
            expected = (expected + delta).rem_euclid(360);
            assert_eq!(state.rotation_degrees(), expected);
            assert_eq!(state.rotation_degrees() % 90, 0);
        }
    }

    #[test]
    fn identity_state_centres_image() {
        let state = TransformState::default();
        let transform = compute_canvas_transform(&state, 100, 50, 300, 200);
        assert_pos_near(transform.apply(pos2(50.0, 25.0)), pos2(150.0, 100.0));
        assert_pos_near(transform.apply(pos2(0.0, 0.0)), pos2(100.0, 75.0));
    }

    #[test]
    fn rotation_pivots_about_image_centre() {
        let mut state = TransformState::default();
        state.rotate(90);
        state.toggle_flip_horizontal();
        state.set_zoom(2.0, &ZoomLimits::default());
        let transform = compute_canvas_transform(&state, 100, 50, 300, 200);
        assert_pos_near(transform.apply(pos2(50.0, 25.0)), pos2(150.0, 100.0));
    }

    #[test]
    fn quarter_turn_maps_top_left_to_top_right() {
        let mut state = TransformState::default();
        state.rotate(90);
        let transform = compute_canvas_transform(&state, 100, 50, 100, 100);
        // Image top-left lands at the right edge of the rotated footprint.
        assert_pos_near(transform.apply(pos2(0.0, 0.0)), pos2(75.0, 0.0));
    }

    #[test]
    fn flips_mirror_about_centre() {
        let mut state = TransformState::default();
        state.toggle_flip_horizontal();
        let transform = compute_canvas_transform(&state, 100, 100, 100, 100);
        assert_pos_near(transform.apply(pos2(10.0, 20.0)), pos2(90.0, 20.0));

        state.toggle_flip_horizontal();
        state.toggle_flip_vertical();
        let transform = compute_canvas_transform(&state, 100, 100, 100, 100);
        assert_pos_near(transform.apply(pos2(10.0, 20.0)), pos2(10.0, 80.0));
    }

    #[test]
    fn inverse_round_trips_points() {
        let mut state = TransformState::default();
        state.rotate(270);
        state.toggle_flip_vertical();
        state.set_zoom(1.7, &ZoomLimits::default());
        state.pan_by(vec2(12.0, -4.0));
        let transform = compute_canvas_transform(&state, 64, 48, 320, 240);
        let inverse = transform.inverse().expect("transform is invertible");
        let point = pos2(13.0, 40.0);
        assert_pos_near(inverse.apply(transform.apply(point)), point);
    }

    #[test]
    fn zoom_about_keeps_anchor_fixed() {
        let limits = ZoomLimits::default();
        let mut state = TransformState::default();
        let canvas = vec2(200.0, 200.0);
        let anchor = pos2(150.0, 60.0);
        let before = compute_canvas_transform(&state, 100, 100, 200, 200);
        let image_point = before.inverse().expect("invertible").apply(anchor);

        assert!(state.zoom_about(2.0, anchor, canvas, &limits));
        let after = compute_canvas_transform(&state, 100, 100, 200, 200);
        assert_pos_near(after.apply(image_point), anchor);
    }

    #[test]
    fn zoom_about_reports_no_change_at_limit() {
        let limits = ZoomLimits::default();
        let mut state = TransformState::default();
        state.set_zoom(5.0, &limits);
        assert!(!state.zoom_about(2.0, pos2(0.0, 0.0), vec2(10.0, 10.0), &limits));
        assert_eq!(state.zoom(), 5.0);
    }

    #[test]
    fn fit_zoom_uses_longer_dimension() {
        let limits = ZoomLimits::default();
        let mut state = TransformState::default();
        let zoom = fit_zoom(&state, 200, 100, vec2(400.0, 400.0), &limits);
        assert_eq!(zoom, Some(2.0));

        state.rotate(90);
        let zoom = fit_zoom(&state, 200, 100, vec2(400.0, 300.0), &limits);
        assert_eq!(zoom, Some(1.5));

        assert_eq!(fit_zoom(&state, 0, 100, vec2(400.0, 300.0), &limits), None);
        assert_eq!(fit_zoom(&state, 10, 100, vec2(0.0, 300.0), &limits), None);
    }

    #[test]
    fn window_level_linear_ramp() {
        assert_eq!(apply_window_level(0.0, 100.0, 50.0, false), 0);
        assert_eq!(apply_window_level(100.0, 100.0, 50.0, false), 255);
        assert_eq!(apply_window_level(50.0, 100.0, 50.0, false), 128);
        assert_eq!(apply_window_level(-20.0, 100.0, 50.0, false), 0);
        assert_eq!(apply_window_level(400.0, 100.0, 50.0, false), 255);
        assert_eq!(apply_window_level(0.0, 100.0, 50.0, true), 255);
        assert_eq!(apply_window_level(100.0, 100.0, 50.0, true), 0);
    }

    #[test]
    fn zero_width_window_is_a_threshold() {
        for raw in [-1000.0, 0.0, 127.0, 127.99] {
            assert_eq!(apply_window_level(raw, 0.0, 128.0, false), 0);
            assert_eq!(apply_window_level(raw, 0.0, 128.0, true), 255);
        }
        for raw in [128.0, 128.5, 255.0, 4000.0] {
            assert_eq!(apply_window_level(raw, 0.0, 128.0, false), 255);
            assert_eq!(apply_window_level(raw, 0.0, 128.0, true), 0);
        }
    }

    #[test]
    fn window_setters_reject_non_finite_values() {
        let mut state = TransformState::default();
        state.set_window(f32::NAN, f32::INFINITY);
        assert_eq!(state.window_width(), 0.0);
        assert_eq!(state.window_center(), 0.0);
        state.set_window(-10.0, 40.0);
        assert_eq!(state.window_width(), 0.0);
        assert!(state.adjust_window(80.0, 0.0));
        assert_eq!(state.window_width(), 80.0);
    }
}
