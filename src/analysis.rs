//! Analysis-result payload produced by the inference collaborator, and its
//! conversion into drawable annotation shapes.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::OverlayError;
use crate::renderer::{colorize_intensities, rasterize_mask, rgb_layer, RgbaLayer};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisResult {
    pub has_anomaly: bool,
    pub anomaly_class: Option<String>,
    pub confidence: Option<f32>,
    pub all_probabilities: BTreeMap<String, f32>,
    pub bounding_boxes: Vec<RawBoundingBox>,
    pub segmentation_mask: Option<Value>,
    pub visualization: Option<Value>,
    pub measurements: Option<AnalysisMeasurements>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RawBoundingBox {
    pub id: Option<u32>,
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub label: Option<String>,
    pub pathology: Option<String>,
    pub confidence: Option<f32>,
    pub severity: Option<String>,
    pub area_pixels: Option<f32>,
    pub area_mm2: Option<f32>,
    pub perimeter_mm: Option<f32>,
    pub width_mm: Option<f32>,
    pub height_mm: Option<f32>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageSize {
    pub width: usize,
    pub height: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisMeasurements {
    pub num_regions: Option<u32>,
    pub total_area_pixels: Option<f32>,
    pub total_area_mm2: Option<f32>,
    pub pixel_to_mm_ratio: Option<f32>,
    pub image_size: Option<ImageSize>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl AnalysisResult {
    pub fn from_json_str(text: &str) -> Result<Self> {
        serde_json::from_str(text).context("Invalid analysis result JSON")
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("Could not read analysis result {}", path.display()))?;
        Self::from_json_str(&text).with_context(|| format!("In {}", path.display()))
    }

    /// Converts into drawable shapes. Malformed mask or heat-map payloads are dropped
    /// with a warning; everything else is kept.
    pub fn to_overlay(&self) -> AnalysisOverlay {
        let mut shapes = Vec::new();
        let fallback_label = self.anomaly_class.as_deref().unwrap_or("finding");
        for raw in &self.bounding_boxes {
            if let Some(bounding_box) = BoundingBox::from_raw(raw, fallback_label) {
                shapes.push(AnnotationShape::BoundingBox(bounding_box));
            } else {
                log::warn!("Skipping bounding box with invalid geometry: {raw:?}");
            }
        }

        if let Some(value) = self.segmentation_mask.as_ref() {
            match SegmentationMask::from_json(value) {
                Ok(mask) => shapes.push(AnnotationShape::SegmentationMask(mask)),
                Err(err) => log::warn!("Malformed overlay data, mask not drawn: {err}"),
            }
        }

        if let Some(value) = self.visualization.as_ref() {
            match HeatmapOverlay::from_json(value) {
                Ok(heatmap) => shapes.push(AnnotationShape::HeatmapOverlay(heatmap)),
                Err(err) => log::warn!("Malformed overlay data, heat-map not drawn: {err}"),
            }
        }

        let reference_size = self
            .measurements
            .as_ref()
            .and_then(|measurements| measurements.image_size)
            .filter(|size| size.width > 0 && size.height > 0)
            .map(|size| [size.width, size.height]);

        AnalysisOverlay {
            shapes,
            reference_size,
            summary: self.summary(),
        }
    }

    pub fn summary(&self) -> String {
        if !self.has_anomaly {
            return "No anomaly detected".to_string();
        }
        let mut text = format!(
            "Anomaly: {}",
            self.anomaly_class.as_deref().unwrap_or("unknown")
        );
        if let Some(confidence) = self.confidence {
            text.push_str(&format!(" ({:.1}%)", confidence * 100.0));
        }
        let regions = self
            .measurements
            .as_ref()
            .and_then(|m| m.num_regions)
            .unwrap_or(self.bounding_boxes.len() as u32);
        text.push_str(&format!(" - {regions} region(s)"));
        if let Some(area) = self.measurements.as_ref().and_then(|m| m.total_area_mm2) {
            text.push_str(&format!(", total {area:.2} mm²"));
        }
        text
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub label: String,
    pub confidence: Option<f32>,
    pub area_mm2: Option<f32>,
}

impl BoundingBox {
    fn from_raw(raw: &RawBoundingBox, fallback_label: &str) -> Option<Self> {
        let finite = [raw.x, raw.y, raw.width, raw.height]
            .iter()
            .all(|value| value.is_finite());
        if !finite || raw.width <= 0.0 || raw.height <= 0.0 {
            return None;
        }
        let label = raw
            .pathology
            .as_deref()
            .or(raw.label.as_deref())
            .filter(|label| !label.trim().is_empty())
            .unwrap_or(fallback_label)
            .to_string();
        Some(Self {
            x: raw.x,
            y: raw.y,
            width: raw.width,
            height: raw.height,
            label,
            confidence: raw
                .confidence
                .filter(|value| value.is_finite())
                .map(|value| value.clamp(0.0, 1.0)),
            area_mm2: raw.area_mm2.filter(|value| value.is_finite() && *value >= 0.0),
        })
    }

    /// "class 87.5%"; the percentage is omitted without a confidence.
    pub fn caption(&self) -> String {
        match self.confidence {
            Some(confidence) => format!("{} {:.1}%", self.label, confidence * 100.0),
            None => self.label.clone(),
        }
    }

    pub fn area_caption(&self) -> Option<String> {
        self.area_mm2.map(|area| format!("{area:.1} mm²"))
    }

    pub fn color(&self) -> [u8; 3] {
        pathology_color(&self.label)
    }
}

pub fn pathology_color(label: &str) -> [u8; 3] {
    let label = label.to_ascii_lowercase();
    if label.contains("tumor") {
        [255, 0, 0]
    } else if label.contains("infection") {
        [255, 165, 0]
    } else if label.contains("hemorrhage") {
        [128, 0, 128]
    } else if label.contains("fracture") {
        [255, 255, 0]
    } else if label.contains("edema") {
        [0, 255, 255]
    } else if label.contains("normal") {
        [0, 255, 0]
    } else {
        [255, 0, 0]
    }
}

/// Per-pixel label ids at the analysed image's resolution.
#[derive(Debug, Clone, PartialEq)]
pub struct SegmentationMask {
    pub width: usize,
    pub height: usize,
    pub labels: Vec<u32>,
}

impl SegmentationMask {
    pub fn from_rows<T: Copy + Into<f64>>(rows: &[Vec<T>]) -> Result<Self, OverlayError> {
        const LAYER: &str = "segmentation mask";
        let width = rows.first().map(Vec::len).unwrap_or(0);
        if rows.is_empty() || width == 0 {
            return Err(OverlayError::Empty { layer: LAYER });
        }
        let mut labels = Vec::with_capacity(width * rows.len());
        for (row_index, row) in rows.iter().enumerate() {
            if row.len() != width {
                return Err(OverlayError::RaggedRow {
                    layer: LAYER,
                    row: row_index,
                    expected: width,
                    found: row.len(),
                });
            }
            labels.extend(row.iter().map(|value| {
                let value: f64 = (*value).into();
                if value.is_finite() && value > 0.0 {
                    value.round().max(1.0).min(u32::MAX as f64) as u32
                } else {
                    0
                }
            }));
        }
        Ok(Self {
            width,
            height: rows.len(),
            labels,
        })
    }

    /// Rows of numbers or booleans; any other cell rejects the whole mask.
    pub fn from_json(value: &Value) -> Result<Self, OverlayError> {
        const LAYER: &str = "segmentation mask";
        let rows = value
            .as_array()
            .ok_or(OverlayError::Empty { layer: LAYER })?;
        let mut parsed = Vec::with_capacity(rows.len());
        for (row_index, row) in rows.iter().enumerate() {
            let cells = row.as_array().ok_or(OverlayError::BadCell {
                layer: LAYER,
                row: row_index,
            })?;
            let values = cells
                .iter()
                .map(|cell| match cell {
                    Value::Number(number) => number.as_f64(),
                    Value::Bool(flag) => Some(if *flag { 1.0 } else { 0.0 }),
                    _ => None,
                })
                .collect::<Option<Vec<f64>>>()
                .ok_or(OverlayError::BadCell {
                    layer: LAYER,
                    row: row_index,
                })?;
            parsed.push(values);
        }
        Self::from_rows(&parsed)
    }

    pub fn to_layer(&self, color: [u8; 3], opacity: f32) -> RgbaLayer {
        rasterize_mask(self.width, self.height, &self.labels, color, opacity)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum HeatmapPixels {
    Gray(Vec<f32>),
    Rgb(Vec<[u8; 3]>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct HeatmapOverlay {
    pub width: usize,
    pub height: usize,
    pub pixels: HeatmapPixels,
}

impl HeatmapOverlay {
    /// Accepts rows of grayscale numbers or rows of `[r, g, b]` triples.
    pub fn from_json(value: &Value) -> Result<Self, OverlayError> {
        const LAYER: &str = "heat-map";
        let rows = value
            .as_array()
            .filter(|rows| !rows.is_empty())
            .ok_or(OverlayError::Empty { layer: LAYER })?;
        let mut width = None;
        let mut gray = Vec::new();
        let mut rgb = Vec::new();

        for (row_index, row) in rows.iter().enumerate() {
            let cells = row
                .as_array()
                .filter(|cells| !cells.is_empty())
                .ok_or(OverlayError::Empty { layer: LAYER })?;
            let expected = *width.get_or_insert(cells.len());
            if cells.len() != expected {
                return Err(OverlayError::RaggedRow {
                    layer: LAYER,
                    row: row_index,
                    expected,
                    found: cells.len(),
                });
            }
            for cell in cells {
                match cell {
                    Value::Number(number) => {
                        gray.push(number.as_f64().unwrap_or(0.0) as f32);
                    }
                    Value::Array(channels) if channels.len() == 3 => {
                        let mut pixel = [0u8; 3];
                        for (slot, channel) in pixel.iter_mut().zip(channels) {
                            *slot =
                                channel.as_f64().unwrap_or(0.0).round().clamp(0.0, 255.0) as u8;
                        }
                        rgb.push(pixel);
                    }
                    Value::Array(channels) => {
                        return Err(OverlayError::BadChannels {
                            layer: LAYER,
                            row: row_index,
                            found: channels.len(),
                        });
                    }
                    _ => {
                        return Err(OverlayError::BadChannels {
                            layer: LAYER,
                            row: row_index,
                            found: 0,
                        });
                    }
                }
            }
        }

        let width = width.unwrap_or(0);
        let height = rows.len();
        let pixels = match (gray.is_empty(), rgb.is_empty()) {
            (false, true) => HeatmapPixels::Gray(gray),
            (true, false) => HeatmapPixels::Rgb(rgb),
            _ => return Err(OverlayError::MixedChannels { layer: LAYER }),
        };
        Ok(Self {
            width,
            height,
            pixels,
        })
    }

    pub fn to_layer(&self) -> RgbaLayer {
        match &self.pixels {
            HeatmapPixels::Gray(values) => colorize_intensities(self.width, self.height, values),
            HeatmapPixels::Rgb(values) => rgb_layer(self.width, self.height, values),
        }
    }
}

/// One drawable element of an analysis result, in the analysed image's pixel space.
#[derive(Debug, Clone, PartialEq)]
pub enum AnnotationShape {
    BoundingBox(BoundingBox),
    SegmentationMask(SegmentationMask),
    HeatmapOverlay(HeatmapOverlay),
}

/// A session's own copy of the analysis it displays.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AnalysisOverlay {
    pub shapes: Vec<AnnotationShape>,
    /// Resolution the boxes were declared against, when the payload states it.
    pub reference_size: Option<[usize; 2]>,
    pub summary: String,
}

impl AnalysisOverlay {
    pub fn boxes(&self) -> impl Iterator<Item = &BoundingBox> {
        self.shapes.iter().filter_map(|shape| match shape {
            AnnotationShape::BoundingBox(bounding_box) => Some(bounding_box),
            _ => None,
        })
    }

    pub fn mask(&self) -> Option<&SegmentationMask> {
        self.shapes.iter().find_map(|shape| match shape {
            AnnotationShape::SegmentationMask(mask) => Some(mask),
            _ => None,
        })
    }

    pub fn heatmap(&self) -> Option<&HeatmapOverlay> {
        self.shapes.iter().find_map(|shape| match shape {
            AnnotationShape::HeatmapOverlay(heatmap) => Some(heatmap),
            _ => None,
        })
    }

    pub fn box_count(&self) -> usize {
        self.boxes().count()
    }
}
