//! Measurement shapes built from pointer samples in image pixel space.

use std::f32::consts::PI;

use eframe::egui::{pos2, Pos2, Rect};

use crate::loader::{DecodedFrame, PixelSpacing};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MeasureKind {
    Length,
    Angle,
    Rectangle,
    Ellipse,
    Probe,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DraftStatus {
    /// Needs more input (angle waiting for its third point).
    Pending,
    Complete,
    Cancelled,
}

/// In-progress measurement. Points are image-pixel coordinates.
#[derive(Debug, Clone, PartialEq)]
pub struct MeasurementDraft {
    pub kind: MeasureKind,
    pub points: Vec<Pos2>,
}

impl MeasurementDraft {
    pub fn begin(kind: MeasureKind, point: Pos2) -> Self {
        let points = match kind {
            MeasureKind::Probe => vec![point],
            _ => vec![point, point],
        };
        Self { kind, points }
    }

    /// A further press while the draft is pending moves the tracking point.
    pub fn press(&mut self, point: Pos2) {
        self.drag_to(point);
    }

    pub fn drag_to(&mut self, point: Pos2) {
        if let Some(last) = self.points.last_mut() {
            *last = point;
        }
    }

    pub fn release(&mut self, point: Pos2) -> DraftStatus {
        self.drag_to(point);
        match self.kind {
            MeasureKind::Probe => DraftStatus::Complete,
            MeasureKind::Angle if self.points.len() == 2 => {
                if is_degenerate(self.points[0], self.points[1]) {
                    DraftStatus::Cancelled
                } else {
                    self.points.push(point);
                    DraftStatus::Pending
                }
            }
            MeasureKind::Angle => {
                if is_degenerate(self.points[1], self.points[2]) {
                    DraftStatus::Pending
                } else {
                    DraftStatus::Complete
                }
            }
            _ => {
                if is_degenerate(self.points[0], self.points[1]) {
                    DraftStatus::Cancelled
                } else {
                    DraftStatus::Complete
                }
            }
        }
    }
}

fn is_degenerate(a: Pos2, b: Pos2) -> bool {
    (a - b).length() < 1e-3
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Unit {
    Millimetres,
    Pixels,
}

impl Unit {
    fn length_suffix(self) -> &'static str {
        match self {
            Self::Millimetres => "mm",
            Self::Pixels => "px",
        }
    }

    fn area_suffix(self) -> &'static str {
        match self {
            Self::Millimetres => "mm²",
            Self::Pixels => "px²",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RegionStats {
    pub mean: f32,
    pub std_dev: f32,
    pub min: f32,
    pub max: f32,
    pub pixel_count: usize,
    pub area: f32,
    pub unit: Unit,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MeasurementValue {
    Length { value: f32, unit: Unit },
    Angle { degrees: f32 },
    Region(RegionStats),
    Probe { x: usize, y: usize, raw: f32 },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Measurement {
    pub kind: MeasureKind,
    pub points: Vec<Pos2>,
    pub frame_index: usize,
    pub value: MeasurementValue,
}

impl Measurement {
    /// Computes the value against `frame`. Degenerate or off-image shapes yield `None`.
    pub fn finish(
        draft: MeasurementDraft,
        frame: &DecodedFrame,
        frame_index: usize,
        spacing: Option<PixelSpacing>,
    ) -> Option<Self> {
        let value = match draft.kind {
            MeasureKind::Length => {
                let [a, b] = [*draft.points.first()?, *draft.points.get(1)?];
                if is_degenerate(a, b) {
                    return None;
                }
                let (value, unit) = physical_length(a, b, spacing);
                MeasurementValue::Length { value, unit }
            }
            MeasureKind::Angle => {
                let [a, vertex, c] = [
                    *draft.points.first()?,
                    *draft.points.get(1)?,
                    *draft.points.get(2)?,
                ];
                MeasurementValue::Angle {
                    degrees: angle_degrees(a, vertex, c)?,
                }
            }
            MeasureKind::Rectangle | MeasureKind::Ellipse => {
                let rect = Rect::from_two_pos(*draft.points.first()?, *draft.points.get(1)?);
                if rect.width() <= 0.0 || rect.height() <= 0.0 {
                    return None;
                }
                let ellipse = draft.kind == MeasureKind::Ellipse;
                MeasurementValue::Region(region_stats(frame, rect, ellipse, spacing))
            }
            MeasureKind::Probe => {
                let point = *draft.points.first()?;
                if point.x < 0.0 || point.y < 0.0 {
                    return None;
                }
                let (x, y) = (point.x.floor() as usize, point.y.floor() as usize);
                MeasurementValue::Probe {
                    x,
                    y,
                    raw: frame.sample(x, y)?,
                }
            }
        };
        Some(Self {
            kind: draft.kind,
            points: draft.points,
            frame_index,
            value,
        })
    }

    pub fn caption(&self) -> String {
        match self.value {
            MeasurementValue::Length { value, unit } => {
                format!("{value:.2} {}", unit.length_suffix())
            }
            MeasurementValue::Angle { degrees } => format!("{degrees:.1}°"),
            MeasurementValue::Region(stats) => format!(
                "mean {:.1} sd {:.1} area {:.1} {}",
                stats.mean,
                stats.std_dev,
                stats.area,
                stats.unit.area_suffix()
            ),
            MeasurementValue::Probe { x, y, raw } => format!("({x}, {y}) = {raw:.1}"),
        }
    }
}

fn physical_length(a: Pos2, b: Pos2, spacing: Option<PixelSpacing>) -> (f32, Unit) {
    let delta = b - a;
    match spacing {
        Some(spacing) => (
            (delta.x * spacing.column_mm).hypot(delta.y * spacing.row_mm),
            Unit::Millimetres,
        ),
        None => (delta.length(), Unit::Pixels),
    }
}

fn angle_degrees(a: Pos2, vertex: Pos2, c: Pos2) -> Option<f32> {
    let first = a - vertex;
    let second = c - vertex;
    let norms = first.length() * second.length();
    if norms < 1e-6 {
        return None;
    }
    let cos = (first.dot(second) / norms).clamp(-1.0, 1.0);
    Some(cos.acos().to_degrees())
}

fn region_stats(
    frame: &DecodedFrame,
    rect: Rect,
    ellipse: bool,
    spacing: Option<PixelSpacing>,
) -> RegionStats {
    let center = rect.center();
    let (rx, ry) = (rect.width() / 2.0, rect.height() / 2.0);
    let x_start = rect.min.x.floor().max(0.0) as usize;
    let y_start = rect.min.y.floor().max(0.0) as usize;
    let x_end = (rect.max.x.ceil().max(0.0) as usize).min(frame.width);
    let y_end = (rect.max.y.ceil().max(0.0) as usize).min(frame.height);

    let mut count = 0usize;
    let mut sum = 0.0f64;
    let mut sum_sq = 0.0f64;
    let mut min = f32::INFINITY;
    let mut max = f32::NEG_INFINITY;
    for y in y_start..y_end {
        for x in x_start..x_end {
            let pixel_center = pos2(x as f32 + 0.5, y as f32 + 0.5);
            let inside = if ellipse {
                let dx = (pixel_center.x - center.x) / rx;
                let dy = (pixel_center.y - center.y) / ry;
                dx * dx + dy * dy <= 1.0
            } else {
                rect.contains(pixel_center)
            };
            if !inside {
                continue;
            }
            let Some(value) = frame.sample(x, y) else {
                continue;
            };
            count += 1;
            sum += value as f64;
            sum_sq += (value as f64) * (value as f64);
            min = min.min(value);
            max = max.max(value);
        }
    }

    let (mean, std_dev) = if count == 0 {
        (0.0, 0.0)
    } else {
        let mean = sum / count as f64;
        let variance = (sum_sq / count as f64 - mean * mean).max(0.0);
        (mean as f32, variance.sqrt() as f32)
    };
    if count == 0 {
        min = 0.0;
        max = 0.0;
    }

    let pixel_area = if ellipse {
        PI * rx * ry
    } else {
        rect.width() * rect.height()
    };
    let (area, unit) = match spacing {
        Some(spacing) => (pixel_area * spacing.pixel_area_mm2(), Unit::Millimetres),
        None => (pixel_area, Unit::Pixels),
    };

    RegionStats {
        mean,
        std_dev,
        min,
        max,
        pixel_count: count,
        area,
        unit,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loader::Photometric;

    fn gradient_frame() -> DecodedFrame {
        let mut samples = Vec::new();
        for y in 0..8 {
            for x in 0..8 {
                samples.push(10 * (x + y));
            }
        }
        DecodedFrame::mono(8, 8, samples, None, Photometric::Monochrome2, None)
            .expect("frame builds")
    }

    #[test]
    fn length_uses_pixel_spacing() {
        let frame = gradient_frame();
        let mut draft = MeasurementDraft::begin(MeasureKind::Length, pos2(0.0, 0.0));
        draft.drag_to(pos2(15.0, 10.0));
        assert_eq!(draft.release(pos2(30.0, 40.0)), DraftStatus::Complete);

        let measurement = Measurement::finish(draft, &frame, 3, PixelSpacing::new(0.5, 0.5))
            .expect("length measured");
        assert_eq!(measurement.frame_index, 3);
        assert_eq!(
            measurement.value,
            MeasurementValue::Length {
                value: 25.0,
                unit: Unit::Millimetres
            }
        );
        assert_eq!(measurement.caption(), "25.00 mm");
    }

    #[test]
    fn zero_length_drag_is_cancelled() {
        let mut draft = MeasurementDraft::begin(MeasureKind::Rectangle, pos2(2.0, 2.0));
        assert_eq!(draft.release(pos2(2.0, 2.0)), DraftStatus::Cancelled);
    }

    #[test]
    fn angle_needs_a_third_point() {
        let frame = gradient_frame();
        let mut draft = MeasurementDraft::begin(MeasureKind::Angle, pos2(10.0, 0.0));
        assert_eq!(draft.release(pos2(0.0, 0.0)), DraftStatus::Pending);
        draft.press(pos2(0.0, 5.0));
        assert_eq!(draft.release(pos2(0.0, 10.0)), DraftStatus::Complete);

        let measurement = Measurement::finish(draft, &frame, 0, None).expect("angle measured");
        let MeasurementValue::Angle { degrees } = measurement.value else {
            panic!("expected an angle");
        };
        assert!((degrees - 90.0).abs() < 1e-3);
        assert_eq!(measurement.caption(), "90.0°");
    }

    #[test]
    fn rectangle_statistics_cover_enclosed_pixels() {
        let frame = gradient_frame();
        let mut draft = MeasurementDraft::begin(MeasureKind::Rectangle, pos2(0.0, 0.0));
        assert_eq!(draft.release(pos2(2.0, 2.0)), DraftStatus::Complete);
        let measurement = Measurement::finish(draft, &frame, 0, None).expect("roi measured");
        let MeasurementValue::Region(stats) = measurement.value else {
            panic!("expected region stats");
        };
        assert_eq!(stats.pixel_count, 4);
        assert!((stats.mean - 10.0).abs() < 1e-4);
        assert!((stats.std_dev - 50f32.sqrt()).abs() < 1e-3);
        assert_eq!((stats.min, stats.max), (0.0, 20.0));
        assert_eq!(stats.area, 4.0);
        assert_eq!(stats.unit, Unit::Pixels);
    }

    #[test]
    fn ellipse_excludes_corners() {
        let frame = gradient_frame();
        let mut draft = MeasurementDraft::begin(MeasureKind::Ellipse, pos2(0.0, 0.0));
        draft.release(pos2(8.0, 8.0));
        let measurement = Measurement::finish(draft, &frame, 0, PixelSpacing::new(1.0, 2.0))
            .expect("roi measured");
        let MeasurementValue::Region(stats) = measurement.value else {
            panic!("expected region stats");
        };
        assert!(stats.pixel_count < 64);
        assert!(stats.pixel_count > 40);
        assert!((stats.area - PI * 16.0 * 2.0).abs() < 1e-3);
        assert_eq!(stats.unit, Unit::Millimetres);
    }

    #[test]
    fn probe_reads_raw_sample_and_rejects_off_image_points() {
        let frame = gradient_frame();
        let mut draft = MeasurementDraft::begin(MeasureKind::Probe, pos2(3.7, 2.2));
        assert_eq!(draft.release(pos2(3.7, 2.2)), DraftStatus::Complete);
        let measurement = Measurement::finish(draft, &frame, 0, None).expect("probe measured");
        assert_eq!(
            measurement.value,
            MeasurementValue::Probe {
                x: 3,
                y: 2,
                raw: 50.0
            }
        );

        let outside = MeasurementDraft::begin(MeasureKind::Probe, pos2(-1.0, 2.0));
        assert!(Measurement::finish(outside, &frame, 0, None).is_none());
        let outside = MeasurementDraft::begin(MeasureKind::Probe, pos2(9.0, 2.0));
        assert!(Measurement::finish(outside, &frame, 0, None).is_none());
    }
}
