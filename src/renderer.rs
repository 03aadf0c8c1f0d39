use eframe::egui::{Color32, ColorImage};

use crate::loader::{DecodedFrame, FramePixels};
use crate::transform::{apply_window_level, TransformState};

pub fn render_window_level(
    width_px: usize,
    height_px: usize,
    frame_pixels: &[i32],
    invert: bool,
    center: f32,
    width: f32,
) -> ColorImage {
    let pixel_count = width_px.saturating_mul(height_px);
    let mut pixels = Vec::with_capacity(pixel_count);
    for &sample in frame_pixels.iter().take(pixel_count) {
        let gray = apply_window_level(sample as f32, width, center, invert);
        pixels.push(Color32::from_gray(gray));
    }
    if pixels.len() < pixel_count {
        pixels.resize(pixel_count, Color32::BLACK);
    }

    ColorImage {
        size: [width_px, height_px],
        pixels,
    }
}

pub fn render_rgb(
    width_px: usize,
    height_px: usize,
    frame_pixels: &[u8],
    invert: bool,
) -> ColorImage {
    let pixel_count = width_px.saturating_mul(height_px);
    let mut pixels = Vec::with_capacity(pixel_count);

    for chunk in frame_pixels.chunks_exact(3).take(pixel_count) {
        let [r, g, b] = [chunk[0], chunk[1], chunk[2]];
        pixels.push(if invert {
            Color32::from_rgb(255 - r, 255 - g, 255 - b)
        } else {
            Color32::from_rgb(r, g, b)
        });
    }

    if pixels.len() < pixel_count {
        pixels.resize(pixel_count, Color32::BLACK);
    }

    ColorImage {
        size: [width_px, height_px],
        pixels,
    }
}

/// Base frame at native resolution with the session's window/level and invert.
pub fn render_frame(frame: &DecodedFrame, transform: &TransformState) -> ColorImage {
    match &frame.pixels {
        FramePixels::Mono(samples) => render_window_level(
            frame.width,
            frame.height,
            samples,
            transform.invert(),
            transform.window_center(),
            transform.window_width(),
        ),
        FramePixels::Rgb(samples) => {
            render_rgb(frame.width, frame.height, samples, transform.invert())
        }
    }
}

/// Jet colormap, `t` in `[0, 1]`.
pub fn jet(t: f32) -> [u8; 3] {
    let t = if t.is_finite() { t.clamp(0.0, 1.0) } else { 0.0 };
    let channel = |offset: f32| {
        let value = 1.5 - (4.0 * t - offset).abs();
        (value.clamp(0.0, 1.0) * 255.0).round() as u8
    };
    [channel(3.0), channel(2.0), channel(1.0)]
}

/// Straight (non-premultiplied) RGBA raster used for overlay layers.
#[derive(Debug, Clone, PartialEq)]
pub struct RgbaLayer {
    pub size: [usize; 2],
    pub pixels: Vec<[u8; 4]>,
}

impl RgbaLayer {
    pub fn width(&self) -> usize {
        self.size[0]
    }

    pub fn height(&self) -> usize {
        self.size[1]
    }

    pub fn get(&self, x: usize, y: usize) -> Option<[u8; 4]> {
        if x >= self.size[0] || y >= self.size[1] {
            return None;
        }
        self.pixels.get(y * self.size[0] + x).copied()
    }
}

/// Source raster that can be drawn through a canvas transform.
pub trait Raster {
    fn raster_size(&self) -> [usize; 2];

    /// Straight RGBA at integer pixel coordinates (inside the raster).
    fn rgba_at(&self, x: usize, y: usize) -> [u8; 4];
}

impl Raster for RgbaLayer {
    fn raster_size(&self) -> [usize; 2] {
        self.size
    }

    fn rgba_at(&self, x: usize, y: usize) -> [u8; 4] {
        self.get(x, y).unwrap_or([0, 0, 0, 0])
    }
}

impl Raster for ColorImage {
    fn raster_size(&self) -> [usize; 2] {
        self.size
    }

    fn rgba_at(&self, x: usize, y: usize) -> [u8; 4] {
        self.pixels
            .get(y * self.size[0] + x)
            .map(|color| {
                if color.a() == 255 {
                    color.to_array()
                } else {
                    color.to_srgba_unmultiplied()
                }
            })
            .unwrap_or([0, 0, 0, 0])
    }
}

/// Min-max normalised intensities through the jet colormap, fully opaque.
pub fn colorize_intensities(width: usize, height: usize, values: &[f32]) -> RgbaLayer {
    let (low, high) = values
        .iter()
        .copied()
        .filter(|value| value.is_finite())
        .fold((f32::INFINITY, f32::NEG_INFINITY), |(low, high), value| {
            (low.min(value), high.max(value))
        });
    let range = (high - low).max(1e-8);
    let pixels = values
        .iter()
        .map(|value| {
            let [r, g, b] = jet((value - low) / range);
            [r, g, b, 255]
        })
        .collect();
    RgbaLayer {
        size: [width, height],
        pixels,
    }
}

pub fn rgb_layer(width: usize, height: usize, values: &[[u8; 3]]) -> RgbaLayer {
    RgbaLayer {
        size: [width, height],
        pixels: values.iter().map(|[r, g, b]| [*r, *g, *b, 255]).collect(),
    }
}

/// Non-zero labels become `color` at `opacity`; zero labels stay fully transparent.
pub fn rasterize_mask(
    width: usize,
    height: usize,
    labels: &[u32],
    color: [u8; 3],
    opacity: f32,
) -> RgbaLayer {
    let alpha = (opacity.clamp(0.0, 1.0) * 255.0).round() as u8;
    let [r, g, b] = color;
    RgbaLayer {
        size: [width, height],
        pixels: labels
            .iter()
            .map(|label| if *label == 0 { [0, 0, 0, 0] } else { [r, g, b, alpha] })
            .collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn window_level_render_matches_transform_mapping() {
        let image = render_window_level(2, 2, &[0, 50, 100, 200], false, 50.0, 100.0);
        assert_eq!(image.size, [2, 2]);
        assert_eq!(image.pixels[0], Color32::from_gray(0));
        assert_eq!(image.pixels[1], Color32::from_gray(128));
        assert_eq!(image.pixels[3], Color32::from_gray(255));
    }

    #[test]
    fn short_buffers_are_padded_black() {
        let image = render_window_level(2, 2, &[255], false, 128.0, 256.0);
        assert_eq!(image.pixels.len(), 4);
        assert_eq!(image.pixels[3], Color32::BLACK);
    }

    #[test]
    fn rgb_invert_flips_channels() {
        let image = render_rgb(1, 1, &[10, 20, 30], true);
        assert_eq!(image.pixels[0], Color32::from_rgb(245, 235, 225));
    }

    #[test]
    fn jet_runs_blue_to_red() {
        assert_eq!(jet(0.0), [0, 0, 128]);
        assert_eq!(jet(0.5), [128, 255, 128]);
        assert_eq!(jet(1.0), [128, 0, 0]);
    }

    #[test]
    fn mask_zero_is_transparent() {
        let layer = rasterize_mask(2, 1, &[0, 3], [255, 0, 0], 0.5);
        assert_eq!(layer.get(0, 0), Some([0, 0, 0, 0]));
        assert_eq!(layer.get(1, 0), Some([255, 0, 0, 128]));
        assert_eq!(layer.get(2, 0), None);
    }

    #[test]
    fn constant_heatmap_does_not_divide_by_zero() {
        let layer = colorize_intensities(2, 1, &[0.3, 0.3]);
        assert_eq!(layer.get(0, 0), Some([0, 0, 128, 255]));
        assert_eq!(layer.get(1, 0), layer.get(0, 0));
    }
}
