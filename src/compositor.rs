//! Software compositor producing the final canvas pixels of one pane.
//!
//! Every layer is given in image pixel coordinates and placed through the single
//! [`Affine2`] computed for the pass, so overlays stay registered under any zoom,
//! rotation or flip.

use ab_glyph::{point, Font, FontArc, GlyphId, ScaleFont};
use eframe::egui::{self, pos2, vec2, Color32, ColorImage, Pos2, Rect, Vec2};

use crate::analysis::{AnalysisOverlay, BoundingBox};
use crate::config::OverlayStyle;
use crate::loader::DecodedFrame;
use crate::measure::{MeasureKind, Measurement, MeasurementDraft};
use crate::renderer::{render_frame, Raster};
use crate::transform::{compute_canvas_transform, Affine2, TransformState};

const LABEL_PADDING: f32 = 3.0;
const ELLIPSE_SEGMENTS: usize = 48;
const PROBE_ARM: f32 = 5.0;

/// Everything one draw pass depends on.
pub struct CompositeInput<'a> {
    pub frame: &'a DecodedFrame,
    pub frame_index: usize,
    pub transform: &'a TransformState,
    pub canvas_size: [usize; 2],
    pub overlay: Option<&'a AnalysisOverlay>,
    pub show_overlays: bool,
    pub heatmap_opacity: f32,
    pub selected_box: Option<usize>,
    pub measurements: &'a [Measurement],
    pub draft: Option<&'a MeasurementDraft>,
}

pub struct OverlayCompositor {
    style: OverlayStyle,
    font: Option<FontArc>,
}

impl OverlayCompositor {
    pub fn new(style: OverlayStyle) -> Self {
        let font = default_label_font();
        if font.is_none() {
            log::warn!("No label font available; overlay captions are drawn without text");
        }
        Self { style, font }
    }

    pub fn style(&self) -> &OverlayStyle {
        &self.style
    }

    pub fn compose(&self, input: &CompositeInput<'_>) -> ColorImage {
        let [canvas_width, canvas_height] = input.canvas_size;
        let mut canvas = ColorImage::new(input.canvas_size, Color32::BLACK);
        if canvas_width == 0 || canvas_height == 0 {
            return canvas;
        }

        let frame = input.frame;
        let affine = compute_canvas_transform(
            input.transform,
            frame.width,
            frame.height,
            canvas_width,
            canvas_height,
        );

        let base = render_frame(frame, input.transform);
        blit(&mut canvas, &base, &affine, 1.0);

        let overlay = input.overlay.filter(|_| input.show_overlays);
        if let Some(overlay) = overlay {
            if let Some(heatmap) = overlay.heatmap() {
                let layer = heatmap.to_layer();
                let placement = stretch_to_frame(&affine, frame, layer.raster_size());
                blit(&mut canvas, &layer, &placement, input.heatmap_opacity.clamp(0.0, 1.0));
            }

            let scale = box_scale(overlay, frame.width, frame.height);
            for (index, bounding_box) in overlay.boxes().enumerate() {
                let selected = input.selected_box == Some(index);
                self.draw_box(&mut canvas, bounding_box, scale, &affine, selected);
            }

            if let Some(mask) = overlay.mask() {
                let layer = mask.to_layer(self.style.mask_color, self.style.mask_opacity);
                let placement = stretch_to_frame(&affine, frame, layer.raster_size());
                blit(&mut canvas, &layer, &placement, 1.0);
            }
        }

        for measurement in input
            .measurements
            .iter()
            .filter(|measurement| measurement.frame_index == input.frame_index)
        {
            self.draw_measurement_shape(
                &mut canvas,
                measurement.kind,
                &measurement.points,
                &affine,
            );
            if let Some(last) = measurement.points.last() {
                let anchor = affine.apply(*last) + vec2(6.0, -4.0);
                self.draw_label(
                    &mut canvas,
                    anchor,
                    &measurement.caption(),
                    [0, 0, 0],
                    self.style.measurement_color,
                );
            }
        }
        if let Some(draft) = input.draft {
            self.draw_measurement_shape(&mut canvas, draft.kind, &draft.points, &affine);
        }

        canvas
    }

    fn draw_box(
        &self,
        canvas: &mut ColorImage,
        bounding_box: &BoundingBox,
        scale: Vec2,
        affine: &Affine2,
        selected: bool,
    ) {
        let color = bounding_box.color();
        let stroke = if selected {
            self.style.selected_box_stroke
        } else {
            self.style.box_stroke
        };
        let corners = box_canvas_corners(bounding_box, scale, affine);
        stroke_polygon(canvas, &corners, stroke, color);

        let bounds = Rect::from_points(&corners);
        let text = text_color_on(color);
        self.draw_label(canvas, bounds.left_top(), &bounding_box.caption(), color, text);
        if let Some(area) = bounding_box.area_caption() {
            let anchor = bounds.left_bottom() + vec2(0.0, self.label_height());
            self.draw_label(canvas, anchor, &area, color, text);
        }
    }

    fn draw_measurement_shape(
        &self,
        canvas: &mut ColorImage,
        kind: MeasureKind,
        points: &[Pos2],
        affine: &Affine2,
    ) {
        let color = self.style.measurement_color;
        let stroke = self.style.measurement_stroke;
        let canvas_points: Vec<Pos2> = points.iter().map(|point| affine.apply(*point)).collect();
        match kind {
            MeasureKind::Length | MeasureKind::Angle => {
                for pair in canvas_points.windows(2) {
                    stroke_segment(canvas, pair[0], pair[1], stroke, color);
                }
            }
            MeasureKind::Rectangle => {
                if let [a, b, ..] = points {
                    let rect = Rect::from_two_pos(*a, *b);
                    let corners = [
                        rect.left_top(),
                        rect.right_top(),
                        rect.right_bottom(),
                        rect.left_bottom(),
                    ]
                    .map(|corner| affine.apply(corner));
                    stroke_polygon(canvas, &corners, stroke, color);
                }
            }
            MeasureKind::Ellipse => {
                if let [a, b, ..] = points {
                    let rect = Rect::from_two_pos(*a, *b);
                    let center = rect.center();
                    let (rx, ry) = (rect.width() / 2.0, rect.height() / 2.0);
                    let outline: Vec<Pos2> = (0..ELLIPSE_SEGMENTS)
                        .map(|step| {
                            let t = step as f32 / ELLIPSE_SEGMENTS as f32 * std::f32::consts::TAU;
                            affine.apply(center + vec2(rx * t.cos(), ry * t.sin()))
                        })
                        .collect();
                    stroke_polygon(canvas, &outline, stroke, color);
                }
            }
            MeasureKind::Probe => {
                if let Some(center) = canvas_points.first() {
                    let (h, v) = (vec2(PROBE_ARM, 0.0), vec2(0.0, PROBE_ARM));
                    stroke_segment(canvas, *center - h, *center + h, stroke, color);
                    stroke_segment(canvas, *center - v, *center + v, stroke, color);
                }
            }
        }
    }

    fn label_height(&self) -> f32 {
        self.style.label_font_px + 2.0 * LABEL_PADDING
    }

    /// Filled caption box whose bottom-left corner sits at `anchor`.
    fn draw_label(
        &self,
        canvas: &mut ColorImage,
        anchor: Pos2,
        text: &str,
        background: [u8; 3],
        foreground: [u8; 3],
    ) {
        let px = self.style.label_font_px.max(1.0);
        let text_width = match &self.font {
            Some(font) => text_advance(font, px, text),
            None => text.chars().count() as f32 * px * 0.6,
        };
        let size = vec2(text_width + 2.0 * LABEL_PADDING, self.label_height());
        let rect = Rect::from_min_size(anchor - vec2(0.0, size.y), size);
        fill_rect(canvas, rect, background);
        if let Some(font) = &self.font {
            let origin = rect.min + vec2(LABEL_PADDING, LABEL_PADDING);
            draw_text(canvas, font, px, origin, text, foreground);
        }
    }
}

/// First proportional font from egui's bundled definitions.
pub fn default_label_font() -> Option<FontArc> {
    let definitions = egui::FontDefinitions::default();
    let name = definitions
        .families
        .get(&egui::FontFamily::Proportional)?
        .first()?;
    let data = definitions.font_data.get(name)?;
    FontArc::try_from_vec(data.font.to_vec()).ok()
}

/// Factor from the boxes' declared resolution to the displayed frame.
pub fn box_scale(overlay: &AnalysisOverlay, frame_width: usize, frame_height: usize) -> Vec2 {
    match overlay.reference_size {
        Some([width, height]) if width > 0 && height > 0 => vec2(
            frame_width as f32 / width as f32,
            frame_height as f32 / height as f32,
        ),
        _ => Vec2::splat(1.0),
    }
}

/// Corners in canvas space, clockwise from the image-space top-left.
pub fn box_canvas_corners(bounding_box: &BoundingBox, scale: Vec2, affine: &Affine2) -> [Pos2; 4] {
    let left = bounding_box.x * scale.x;
    let top = bounding_box.y * scale.y;
    let right = (bounding_box.x + bounding_box.width) * scale.x;
    let bottom = (bounding_box.y + bounding_box.height) * scale.y;
    [
        pos2(left, top),
        pos2(right, top),
        pos2(right, bottom),
        pos2(left, bottom),
    ]
    .map(|corner| affine.apply(corner))
}

/// Index of the top-most box containing `canvas_point`.
pub fn hit_test_box(
    overlay: &AnalysisOverlay,
    frame_width: usize,
    frame_height: usize,
    affine: &Affine2,
    canvas_point: Pos2,
) -> Option<usize> {
    let image_point = affine.inverse()?.apply(canvas_point);
    let scale = box_scale(overlay, frame_width, frame_height);
    let boxes: Vec<&BoundingBox> = overlay.boxes().collect();
    boxes.iter().enumerate().rev().find_map(|(index, bounding_box)| {
        let rect = Rect::from_min_size(
            pos2(bounding_box.x * scale.x, bounding_box.y * scale.y),
            vec2(bounding_box.width * scale.x, bounding_box.height * scale.y),
        );
        rect.contains(image_point).then_some(index)
    })
}

/// Placement for a layer whose resolution differs from the frame: stretched over the
/// frame's footprint.
fn stretch_to_frame(affine: &Affine2, frame: &DecodedFrame, layer_size: [usize; 2]) -> Affine2 {
    let [width, height] = layer_size;
    if width == 0 || height == 0 || (width == frame.width && height == frame.height) {
        return *affine;
    }
    affine.then_apply(&Affine2::scale(
        frame.width as f32 / width as f32,
        frame.height as f32 / height as f32,
    ))
}

/// Draws `source` through `affine` with nearest-neighbour sampling at pixel centres.
fn blit(canvas: &mut ColorImage, source: &impl Raster, affine: &Affine2, opacity: f32) {
    let [source_width, source_height] = source.raster_size();
    if source_width == 0 || source_height == 0 || opacity <= 0.0 {
        return;
    }
    let Some(inverse) = affine.inverse() else {
        return;
    };
    let corners = [
        pos2(0.0, 0.0),
        pos2(source_width as f32, 0.0),
        pos2(source_width as f32, source_height as f32),
        pos2(0.0, source_height as f32),
    ]
    .map(|corner| affine.apply(corner));
    let Some((x_range, y_range)) = clip_to_canvas(canvas, Rect::from_points(&corners)) else {
        return;
    };

    for y in y_range {
        for x in x_range.clone() {
            let source_point = inverse.apply(pos2(x as f32 + 0.5, y as f32 + 0.5));
            if source_point.x < 0.0 || source_point.y < 0.0 {
                continue;
            }
            let (sx, sy) = (source_point.x as usize, source_point.y as usize);
            if sx >= source_width || sy >= source_height {
                continue;
            }
            let [r, g, b, a] = source.rgba_at(sx, sy);
            blend(canvas, x, y, [r, g, b], a as f32 / 255.0 * opacity);
        }
    }
}

fn clip_to_canvas(
    canvas: &ColorImage,
    bounds: Rect,
) -> Option<(std::ops::Range<usize>, std::ops::Range<usize>)> {
    let [width, height] = canvas.size;
    let finite = [bounds.min.x, bounds.min.y, bounds.max.x, bounds.max.y]
        .iter()
        .all(|value| value.is_finite());
    if !finite {
        return None;
    }
    let x0 = bounds.min.x.floor().max(0.0) as usize;
    let y0 = bounds.min.y.floor().max(0.0) as usize;
    let x1 = (bounds.max.x.ceil().max(0.0) as usize).min(width);
    let y1 = (bounds.max.y.ceil().max(0.0) as usize).min(height);
    (x0 < x1 && y0 < y1).then_some((x0..x1, y0..y1))
}

fn blend(canvas: &mut ColorImage, x: usize, y: usize, rgb: [u8; 3], alpha: f32) {
    if alpha <= 0.0 {
        return;
    }
    let width = canvas.size[0];
    let Some(pixel) = canvas.pixels.get_mut(y * width + x) else {
        return;
    };
    let alpha = alpha.min(1.0);
    let mix = |src: u8, dst: u8| (src as f32 * alpha + dst as f32 * (1.0 - alpha)).round() as u8;
    *pixel = Color32::from_rgb(
        mix(rgb[0], pixel.r()),
        mix(rgb[1], pixel.g()),
        mix(rgb[2], pixel.b()),
    );
}

fn fill_rect(canvas: &mut ColorImage, rect: Rect, rgb: [u8; 3]) {
    let Some((x_range, y_range)) = clip_to_canvas(canvas, rect) else {
        return;
    };
    for y in y_range {
        for x in x_range.clone() {
            if rect.contains(pos2(x as f32 + 0.5, y as f32 + 0.5)) {
                blend(canvas, x, y, rgb, 1.0);
            }
        }
    }
}

fn stroke_polygon(canvas: &mut ColorImage, points: &[Pos2], width: f32, rgb: [u8; 3]) {
    for index in 0..points.len() {
        let next = points[(index + 1) % points.len()];
        stroke_segment(canvas, points[index], next, width, rgb);
    }
}

fn stroke_segment(canvas: &mut ColorImage, a: Pos2, b: Pos2, width: f32, rgb: [u8; 3]) {
    let half = (width / 2.0).max(0.5);
    let bounds = Rect::from_two_pos(a, b).expand(half);
    let Some((x_range, y_range)) = clip_to_canvas(canvas, bounds) else {
        return;
    };
    let direction = b - a;
    let length_sq = direction.length_sq();
    for y in y_range {
        for x in x_range.clone() {
            let center = pos2(x as f32 + 0.5, y as f32 + 0.5);
            let t = if length_sq > 0.0 {
                ((center - a).dot(direction) / length_sq).clamp(0.0, 1.0)
            } else {
                0.0
            };
            if (center - (a + direction * t)).length() <= half {
                blend(canvas, x, y, rgb, 1.0);
            }
        }
    }
}

fn text_color_on(background: [u8; 3]) -> [u8; 3] {
    let [r, g, b] = background;
    let luma = 0.299 * r as f32 + 0.587 * g as f32 + 0.114 * b as f32;
    if luma > 150.0 {
        [0, 0, 0]
    } else {
        [255, 255, 255]
    }
}

fn text_advance(font: &FontArc, px: f32, text: &str) -> f32 {
    let scaled = font.as_scaled(px);
    let mut width = 0.0;
    let mut previous: Option<GlyphId> = None;
    for ch in text.chars() {
        let id = scaled.glyph_id(ch);
        if let Some(previous) = previous {
            width += scaled.kern(previous, id);
        }
        width += scaled.h_advance(id);
        previous = Some(id);
    }
    width
}

/// Rasterises `text` with its top-left at `origin`, blending by glyph coverage.
fn draw_text(
    canvas: &mut ColorImage,
    font: &FontArc,
    px: f32,
    origin: Pos2,
    text: &str,
    rgb: [u8; 3],
) {
    let scaled = font.as_scaled(px);
    let baseline = origin.y + scaled.ascent();
    let mut caret = origin.x;
    let mut previous: Option<GlyphId> = None;
    let [width, height] = canvas.size;
    for ch in text.chars() {
        let id = scaled.glyph_id(ch);
        if let Some(previous) = previous {
            caret += scaled.kern(previous, id);
        }
        let glyph = id.with_scale_and_position(px, point(caret, baseline));
        caret += scaled.h_advance(id);
        previous = Some(id);

        let Some(outlined) = font.outline_glyph(glyph) else {
            continue;
        };
        let bounds = outlined.px_bounds();
        outlined.draw(|gx, gy, coverage| {
            let x = bounds.min.x + gx as f32;
            let y = bounds.min.y + gy as f32;
            if x < 0.0 || y < 0.0 {
                return;
            }
            let (x, y) = (x as usize, y as usize);
            if x < width && y < height {
                blend(canvas, x, y, rgb, coverage);
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::{AnnotationShape, HeatmapOverlay, SegmentationMask};
    use crate::loader::Photometric;
    use crate::transform::ZoomLimits;

    fn flat_frame(size: usize, value: i32) -> DecodedFrame {
        DecodedFrame::mono(
            size,
            size,
            vec![value; size * size],
            Some((256.0, 128.0)),
            Photometric::Monochrome2,
            None,
        )
        .expect("frame builds")
    }

    fn tumor_box() -> BoundingBox {
        BoundingBox {
            x: 10.0,
            y: 10.0,
            width: 20.0,
            height: 10.0,
            label: "tumor".to_string(),
            confidence: Some(0.9),
            area_mm2: None,
        }
    }

    fn overlay_with(shapes: Vec<AnnotationShape>) -> AnalysisOverlay {
        AnalysisOverlay {
            shapes,
            reference_size: None,
            summary: String::new(),
        }
    }

    fn pixel(image: &ColorImage, x: usize, y: usize) -> Color32 {
        image.pixels[y * image.size[0] + x]
    }

    fn input<'a>(
        frame: &'a DecodedFrame,
        transform: &'a TransformState,
        overlay: Option<&'a AnalysisOverlay>,
    ) -> CompositeInput<'a> {
        CompositeInput {
            frame,
            frame_index: 0,
            transform,
            canvas_size: [200, 200],
            overlay,
            show_overlays: true,
            heatmap_opacity: 0.4,
            selected_box: None,
            measurements: &[],
            draft: None,
        }
    }

    #[test]
    fn base_frame_is_centred_on_black_canvas() {
        let frame = flat_frame(100, 128);
        let transform = TransformState::with_window(256.0, 128.0, false);
        let image = OverlayCompositor::new(OverlayStyle::default())
            .compose(&input(&frame, &transform, None));
        assert_eq!(image.size, [200, 200]);
        assert_eq!(pixel(&image, 10, 10), Color32::BLACK);
        assert_eq!(pixel(&image, 100, 100), Color32::from_gray(128));
    }

    #[test]
    fn box_width_tracks_zoom() {
        let mut transform = TransformState::default();
        transform.set_zoom(2.0, &ZoomLimits::default());
        let affine = compute_canvas_transform(&transform, 100, 100, 200, 200);
        let corners = box_canvas_corners(&tumor_box(), Vec2::splat(1.0), &affine);
        assert!((corners[1].x - corners[0].x - 40.0).abs() < 1e-3);
        assert!((corners[2].y - corners[1].y - 20.0).abs() < 1e-3);
        assert!((corners[0].x - 20.0).abs() < 1e-3);
    }

    #[test]
    fn box_stroke_lands_on_transformed_edge() {
        let frame = flat_frame(100, 128);
        let mut transform = TransformState::with_window(256.0, 128.0, false);
        transform.set_zoom(2.0, &ZoomLimits::default());
        let overlay = overlay_with(vec![AnnotationShape::BoundingBox(tumor_box())]);
        let image = OverlayCompositor::new(OverlayStyle::default())
            .compose(&input(&frame, &transform, Some(&overlay)));
        let [r, g, b] = tumor_box().color();
        assert_eq!(pixel(&image, 40, 20), Color32::from_rgb(r, g, b));
        assert_eq!(pixel(&image, 40, 30), Color32::from_gray(128));
    }

    #[test]
    fn hidden_overlays_leave_base_frame_untouched() {
        let frame = flat_frame(100, 128);
        let transform = TransformState::with_window(256.0, 128.0, false);
        let overlay = overlay_with(vec![AnnotationShape::BoundingBox(tumor_box())]);
        let mut hidden = input(&frame, &transform, Some(&overlay));
        hidden.show_overlays = false;
        let compositor = OverlayCompositor::new(OverlayStyle::default());
        assert_eq!(
            compositor.compose(&hidden),
            compositor.compose(&input(&frame, &transform, None))
        );
    }

    #[test]
    fn reference_size_rescales_boxes() {
        let mut overlay = overlay_with(vec![AnnotationShape::BoundingBox(tumor_box())]);
        overlay.reference_size = Some([50, 50]);
        assert_eq!(box_scale(&overlay, 100, 100), vec2(2.0, 2.0));
        overlay.reference_size = None;
        assert_eq!(box_scale(&overlay, 100, 100), vec2(1.0, 1.0));
    }

    #[test]
    fn hit_test_follows_rotation() {
        let overlay = overlay_with(vec![AnnotationShape::BoundingBox(tumor_box())]);
        let mut transform = TransformState::default();
        transform.rotate(90);
        let affine = compute_canvas_transform(&transform, 100, 100, 100, 100);
        let inside = affine.apply(pos2(20.0, 15.0));
        let outside = affine.apply(pos2(80.0, 80.0));
        assert_eq!(hit_test_box(&overlay, 100, 100, &affine, inside), Some(0));
        assert_eq!(hit_test_box(&overlay, 100, 100, &affine, outside), None);
    }

    #[test]
    fn mask_blends_only_labelled_pixels() {
        let frame = flat_frame(4, 0);
        let transform = TransformState::with_window(256.0, 128.0, false);
        let mask = SegmentationMask::from_rows(&[
            vec![1u8, 0, 0, 0],
            vec![0u8, 0, 0, 0],
            vec![0u8, 0, 0, 0],
            vec![0u8, 0, 0, 0],
        ])
        .expect("mask parses");
        let overlay = overlay_with(vec![AnnotationShape::SegmentationMask(mask)]);
        let mut pass = input(&frame, &transform, Some(&overlay));
        pass.canvas_size = [4, 4];
        let image = OverlayCompositor::new(OverlayStyle::default()).compose(&pass);
        assert_eq!(pixel(&image, 0, 0), Color32::from_rgb(128, 0, 0));
        assert_eq!(pixel(&image, 1, 0), Color32::from_gray(0));
    }

    #[test]
    fn zero_sized_canvas_is_empty() {
        let frame = flat_frame(4, 0);
        let transform = TransformState::default();
        let mut pass = input(&frame, &transform, None);
        pass.canvas_size = [0, 10];
        let image = OverlayCompositor::new(OverlayStyle::default()).compose(&pass);
        assert!(image.pixels.is_empty());
    }

    fn split_heatmap() -> AnalysisOverlay {
        let heatmap = HeatmapOverlay::from_json(&serde_json::json!([
            [[255, 0, 0], [0, 0, 255]]
        ]))
        .expect("heat-map parses");
        overlay_with(vec![AnnotationShape::HeatmapOverlay(heatmap)])
    }

    #[test]
    fn heatmap_opacity_spans_invisible_to_opaque() {
        let frame = flat_frame(4, 128);
        let transform = TransformState::with_window(256.0, 128.0, false);
        let overlay = split_heatmap();
        let compositor = OverlayCompositor::new(OverlayStyle::default());
        let pass = |opacity: f32| {
            let mut pass = input(&frame, &transform, Some(&overlay));
            pass.canvas_size = [4, 4];
            pass.heatmap_opacity = opacity;
            compositor.compose(&pass)
        };
        let mut bare = input(&frame, &transform, None);
        bare.canvas_size = [4, 4];

        assert_eq!(pass(0.0), compositor.compose(&bare));
        let opaque = pass(1.0);
        assert_eq!(pixel(&opaque, 0, 0), Color32::from_rgb(255, 0, 0));
        assert_eq!(pixel(&opaque, 3, 3), Color32::from_rgb(0, 0, 255));
        assert_eq!(pixel(&pass(0.5), 0, 0), Color32::from_rgb(192, 64, 64));
        assert_eq!(pass(7.0), opaque);
    }

    #[test]
    fn heatmap_is_stretched_over_the_zoomed_frame() {
        let frame = flat_frame(4, 128);
        let mut transform = TransformState::with_window(256.0, 128.0, false);
        transform.set_zoom(2.0, &ZoomLimits::default());
        let overlay = split_heatmap();
        let mut pass = input(&frame, &transform, Some(&overlay));
        pass.canvas_size = [16, 16];
        pass.heatmap_opacity = 1.0;
        let image = OverlayCompositor::new(OverlayStyle::default()).compose(&pass);

        // The frame covers canvas 4..12 on both axes.
        assert_eq!(pixel(&image, 4, 4), Color32::from_rgb(255, 0, 0));
        assert_eq!(pixel(&image, 7, 11), Color32::from_rgb(255, 0, 0));
        assert_eq!(pixel(&image, 8, 4), Color32::from_rgb(0, 0, 255));
        assert_eq!(pixel(&image, 11, 11), Color32::from_rgb(0, 0, 255));
        assert_eq!(pixel(&image, 3, 8), Color32::BLACK);
        assert_eq!(pixel(&image, 12, 8), Color32::BLACK);
    }

    #[test]
    fn heatmap_turns_with_the_frame() {
        let frame = flat_frame(4, 128);
        let mut transform = TransformState::with_window(256.0, 128.0, false);
        transform.set_zoom(2.0, &ZoomLimits::default());
        transform.rotate(90);
        let overlay = split_heatmap();
        let mut pass = input(&frame, &transform, Some(&overlay));
        pass.canvas_size = [16, 16];
        pass.heatmap_opacity = 1.0;
        let image = OverlayCompositor::new(OverlayStyle::default()).compose(&pass);

        let red = Color32::from_rgb(255, 0, 0);
        let blue = Color32::from_rgb(0, 0, 255);
        let top = pixel(&image, 5, 5);
        let bottom = pixel(&image, 5, 10);
        assert_eq!(pixel(&image, 10, 5), top);
        assert_eq!(pixel(&image, 10, 10), bottom);
        assert_ne!(top, bottom);
        assert!([red, blue].contains(&top) && [red, blue].contains(&bottom));
    }
}
