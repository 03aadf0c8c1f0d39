//! One pane's addressable viewing state.
//!
//! A session owns its transform, tool activation, overlays and composited canvas.
//! Frame decodes are requested through [`DecodeRequest`]s tagged with a
//! per-session generation; only the outcome of the newest request is applied.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use eframe::egui::{vec2, ColorImage, Pos2, Vec2};

use crate::analysis::AnalysisOverlay;
use crate::compositor::{hit_test_box, CompositeInput, OverlayCompositor};
use crate::config::{Preset, ViewerConfig};
use crate::loader::{
    DecodeOutcome, DecodeRequest, DecodeToken, DecodedFrame, ImageStack, PixelSpacing,
};
use crate::measure::{DraftStatus, Measurement, MeasurementDraft};
use crate::snapshot::encode_png;
use crate::tools::{
    drag_effect, wheel_effect, PointerButton, ScrollAccumulator, ToolActivation, ToolEffect,
    ToolId, ToolRegistry,
};
use crate::transform::{compute_canvas_transform, fit_zoom, Affine2, TransformState, ZoomLimits};

static NEXT_SESSION_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// The displayed frame changed and has been drawn.
    FrameChanged { index: usize },
    /// The loader's message, unchanged.
    LoadFailed(String),
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct Gesture {
    tool: ToolId,
    origin: Pos2,
    last: Pos2,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct PendingDecode {
    generation: u64,
    frame_index: usize,
}

pub struct ViewportSession {
    id: u64,
    config: Arc<ViewerConfig>,
    compositor: Arc<OverlayCompositor>,
    limits: ZoomLimits,
    stack: Option<Arc<ImageStack>>,
    current_frame: usize,
    generation: u64,
    decode_token: DecodeToken,
    pending: Option<PendingDecode>,
    frame: Option<Arc<DecodedFrame>>,
    transform: TransformState,
    tools: ToolActivation,
    scroll: ScrollAccumulator,
    gesture: Option<Gesture>,
    ready: bool,
    dirty: bool,
    needs_fit: bool,
    announce_frame: bool,
    canvas_size: [usize; 2],
    canvas: Option<ColorImage>,
    analysis: Option<AnalysisOverlay>,
    show_overlays: bool,
    heatmap_opacity: f32,
    selected_box: Option<usize>,
    measurements: Vec<Measurement>,
    draft: Option<MeasurementDraft>,
    events: Vec<SessionEvent>,
    draw_count: u64,
    disposed: bool,
}

impl ViewportSession {
    pub fn new(config: Arc<ViewerConfig>, compositor: Arc<OverlayCompositor>) -> Self {
        let limits = config.zoom.limits();
        let scroll = ScrollAccumulator::new(
            config.stack_scroll.pixels_per_frame,
            config.stack_scroll.dead_zone,
        );
        let heatmap_opacity = config.overlay.heatmap_opacity.clamp(0.0, 1.0);
        Self {
            id: NEXT_SESSION_ID.fetch_add(1, Ordering::Relaxed),
            config,
            compositor,
            limits,
            stack: None,
            current_frame: 0,
            generation: 0,
            decode_token: DecodeToken::new(),
            pending: None,
            frame: None,
            transform: TransformState::default(),
            tools: ToolActivation::default(),
            scroll,
            gesture: None,
            ready: false,
            dirty: false,
            needs_fit: false,
            announce_frame: false,
            canvas_size: [0, 0],
            canvas: None,
            analysis: None,
            show_overlays: true,
            heatmap_opacity,
            selected_box: None,
            measurements: Vec::new(),
            draft: None,
            events: Vec::new(),
            draw_count: 0,
            disposed: false,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn stack(&self) -> Option<&Arc<ImageStack>> {
        self.stack.as_ref()
    }

    pub fn is_empty(&self) -> bool {
        self.stack.is_none()
    }

    pub fn frame_count(&self) -> usize {
        self.stack.as_ref().map_or(0, |stack| stack.len())
    }

    pub fn current_frame(&self) -> usize {
        self.current_frame
    }

    pub fn frame(&self) -> Option<&Arc<DecodedFrame>> {
        self.frame.as_ref()
    }

    pub fn transform(&self) -> &TransformState {
        &self.transform
    }

    pub fn active_tool(&self) -> ToolId {
        self.tools.active()
    }

    pub fn is_ready(&self) -> bool {
        self.ready
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn is_loading(&self) -> bool {
        self.pending.is_some()
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed
    }

    pub fn canvas_size(&self) -> [usize; 2] {
        self.canvas_size
    }

    /// Last composited canvas.
    pub fn canvas(&self) -> Option<&ColorImage> {
        self.canvas.as_ref()
    }

    pub fn draw_count(&self) -> u64 {
        self.draw_count
    }

    pub fn analysis(&self) -> Option<&AnalysisOverlay> {
        self.analysis.as_ref()
    }

    pub fn show_overlays(&self) -> bool {
        self.show_overlays
    }

    pub fn heatmap_opacity(&self) -> f32 {
        self.heatmap_opacity
    }

    pub fn selected_box(&self) -> Option<usize> {
        self.selected_box
    }

    pub fn measurements(&self) -> &[Measurement] {
        &self.measurements
    }

    pub fn draft(&self) -> Option<&MeasurementDraft> {
        self.draft.as_ref()
    }

    /// Replaces the displayed stack and requests its first frame. The previous
    /// stack's analysis and measurements go with it. An empty stack clears the session.
    pub fn load_stack(&mut self, stack: Arc<ImageStack>) -> Option<DecodeRequest> {
        if self.disposed {
            return None;
        }
        self.clear_view();
        if stack.is_empty() {
            log::debug!("Session {} cleared by an empty stack", self.id);
            return None;
        }
        self.stack = Some(stack);
        self.needs_fit = self.config.fit_on_load;
        self.request_frame(0)
    }

    fn clear_view(&mut self) {
        self.stack = None;
        self.current_frame = 0;
        self.pending = None;
        self.decode_token.set(0);
        self.frame = None;
        self.transform = TransformState::default();
        self.gesture = None;
        self.scroll.reset();
        self.ready = false;
        self.dirty = false;
        self.needs_fit = false;
        self.announce_frame = false;
        self.canvas = None;
        self.analysis = None;
        self.selected_box = None;
        self.measurements.clear();
        self.draft = None;
    }

    fn request_frame(&mut self, frame_index: usize) -> Option<DecodeRequest> {
        let frame = self.stack.as_ref()?.frame(frame_index)?.clone();
        self.generation += 1;
        self.decode_token.set(self.generation);
        self.pending = Some(PendingDecode {
            generation: self.generation,
            frame_index,
        });
        self.ready = false;
        Some(DecodeRequest {
            session_id: self.id,
            generation: self.generation,
            frame_index,
            frame,
            token: self.decode_token.clone(),
        })
    }

    /// Frame the session is heading to: the in-flight target, else the shown frame.
    fn target_frame(&self) -> usize {
        self.pending
            .map_or(self.current_frame, |pending| pending.frame_index)
    }

    /// Requests `index`. Out-of-range indices and the current target return `None`
    /// and leave the session unchanged.
    pub fn go_to_frame(&mut self, index: i64) -> Option<DecodeRequest> {
        if self.disposed {
            return None;
        }
        let count = self.frame_count();
        if index < 0 || index as u64 >= count as u64 {
            return None;
        }
        let index = index as usize;
        if index == self.target_frame() && (self.pending.is_some() || self.frame.is_some()) {
            return None;
        }
        self.draft = None;
        self.request_frame(index)
    }

    /// Moves by `steps`, clamped to the stack bounds.
    pub fn scroll_frames(&mut self, steps: i32) -> Option<DecodeRequest> {
        let count = self.frame_count();
        if steps == 0 || count == 0 || !self.has_frame() {
            return None;
        }
        let target = (self.target_frame() as i64 + steps as i64).clamp(0, count as i64 - 1);
        self.go_to_frame(target)
    }

    /// Applies a decode outcome. Returns false for outcomes that are stale, belong
    /// to another session, or arrive after disposal.
    pub fn finish_decode(&mut self, outcome: DecodeOutcome) -> bool {
        if self.disposed || outcome.session_id != self.id {
            return false;
        }
        let Some(pending) = self.pending else {
            log::debug!("Session {}: unexpected decode result dropped", self.id);
            return false;
        };
        if pending.generation != outcome.generation {
            log::debug!(
                "Session {}: stale decode for frame {} discarded (generation {} < {})",
                self.id,
                outcome.frame_index,
                outcome.generation,
                pending.generation
            );
            return false;
        }
        self.pending = None;

        match outcome.result {
            Ok(frame) => {
                let first = self.frame.is_none();
                if first {
                    self.transform = self.default_transform(&frame);
                }
                self.announce_frame = first || outcome.frame_index != self.current_frame;
                self.current_frame = outcome.frame_index;
                self.frame = Some(frame);
                self.dirty = true;
            }
            Err(message) => {
                log::warn!(
                    "Session {}: frame {} failed to decode: {message}",
                    self.id,
                    outcome.frame_index
                );
                self.events.push(SessionEvent::LoadFailed(message));
                // The last drawn frame stays on screen.
                self.ready = self.draw_count > 0 && self.frame.is_some();
            }
        }
        true
    }

    fn default_transform(&self, frame: &DecodedFrame) -> TransformState {
        TransformState::with_window(
            frame.window_width,
            frame.window_center,
            frame.default_invert(),
        )
    }

    /// Composites the canvas when something changed. Nothing is drawn while a decode
    /// is in flight, before a frame exists, or with a zero-sized canvas.
    pub fn redraw(&mut self) -> bool {
        if self.disposed || !self.dirty || self.pending.is_some() {
            return false;
        }
        let Some(frame) = self.frame.clone() else {
            return false;
        };
        let [width, height] = self.canvas_size;
        if width == 0 || height == 0 {
            return false;
        }
        if self.needs_fit {
            self.apply_fit(&frame);
            self.needs_fit = false;
        }

        let image = self.compositor.compose(&CompositeInput {
            frame: &frame,
            frame_index: self.current_frame,
            transform: &self.transform,
            canvas_size: self.canvas_size,
            overlay: self.analysis.as_ref(),
            show_overlays: self.show_overlays,
            heatmap_opacity: self.heatmap_opacity,
            selected_box: self.selected_box,
            measurements: &self.measurements,
            draft: self.draft.as_ref(),
        });
        self.canvas = Some(image);
        self.dirty = false;
        self.ready = true;
        self.draw_count += 1;
        if self.announce_frame {
            self.announce_frame = false;
            self.events.push(SessionEvent::FrameChanged {
                index: self.current_frame,
            });
        }
        true
    }

    fn has_frame(&self) -> bool {
        !self.disposed && self.frame.is_some()
    }

    fn mark_dirty(&mut self) -> bool {
        self.dirty = true;
        true
    }

    pub fn invert(&mut self) -> bool {
        if !self.has_frame() {
            return false;
        }
        self.transform.toggle_invert();
        self.mark_dirty()
    }

    pub fn flip_horizontal(&mut self) -> bool {
        if !self.has_frame() {
            return false;
        }
        self.transform.toggle_flip_horizontal();
        self.mark_dirty()
    }

    pub fn flip_vertical(&mut self) -> bool {
        if !self.has_frame() {
            return false;
        }
        self.transform.toggle_flip_vertical();
        self.mark_dirty()
    }

    pub fn rotate(&mut self, delta_degrees: i32) -> bool {
        if !self.has_frame() {
            return false;
        }
        self.transform.rotate(delta_degrees);
        self.mark_dirty()
    }

    /// Back to the frame's own window/level and photometric default.
    pub fn reset(&mut self) -> bool {
        let Some(frame) = self.frame.clone().filter(|_| !self.disposed) else {
            return false;
        };
        self.transform = self.default_transform(&frame);
        self.mark_dirty()
    }

    pub fn fit_to_window(&mut self) -> bool {
        let Some(frame) = self.frame.clone().filter(|_| !self.disposed) else {
            return false;
        };
        if !self.apply_fit(&frame) {
            return false;
        }
        self.mark_dirty()
    }

    fn apply_fit(&mut self, frame: &DecodedFrame) -> bool {
        let canvas = vec2(self.canvas_size[0] as f32, self.canvas_size[1] as f32);
        let Some(zoom) = fit_zoom(&self.transform, frame.width, frame.height, canvas, &self.limits)
        else {
            return false;
        };
        self.transform.set_zoom(zoom, &self.limits);
        self.transform.clear_pan();
        true
    }

    pub fn apply_preset(&mut self, preset: &Preset) -> bool {
        if !self.has_frame() {
            return false;
        }
        self.transform
            .set_window(preset.window_width, preset.window_center);
        self.mark_dirty()
    }

    pub fn zoom_by(&mut self, factor: f32, anchor: Pos2) -> bool {
        if !self.has_frame() {
            return false;
        }
        let canvas = vec2(self.canvas_size[0] as f32, self.canvas_size[1] as f32);
        if !self
            .transform
            .zoom_about(factor, anchor, canvas, &self.limits)
        {
            return false;
        }
        self.mark_dirty()
    }

    pub fn pan_by(&mut self, delta: Vec2) -> bool {
        if !self.has_frame() || delta == Vec2::ZERO {
            return false;
        }
        self.transform.pan_by(delta);
        self.mark_dirty()
    }

    pub fn adjust_window(&mut self, delta_width: f32, delta_center: f32) -> bool {
        if !self.has_frame() || !self.transform.adjust_window(delta_width, delta_center) {
            return false;
        }
        self.mark_dirty()
    }

    /// Rejected while the session is not ready; re-activating the current tool is a
    /// no-op.
    pub fn activate_tool(&mut self, registry: &ToolRegistry, tool: ToolId) -> bool {
        if !self.ready || self.disposed {
            return false;
        }
        if !self.tools.activate(registry, tool) {
            return false;
        }
        self.gesture = None;
        if self.draft.take().is_some() {
            self.dirty = true;
        }
        true
    }

    pub fn set_canvas_size(&mut self, size: [usize; 2]) {
        if size != self.canvas_size {
            self.canvas_size = size;
            self.dirty = true;
        }
    }

    pub fn set_analysis(&mut self, analysis: Option<AnalysisOverlay>) {
        self.analysis = analysis;
        self.selected_box = None;
        self.dirty = true;
    }

    /// Returns the new visibility.
    pub fn toggle_overlays(&mut self) -> bool {
        self.show_overlays = !self.show_overlays;
        self.dirty = true;
        self.show_overlays
    }

    pub fn set_heatmap_opacity(&mut self, opacity: f32) {
        let opacity = if opacity.is_finite() {
            opacity.clamp(0.0, 1.0)
        } else {
            self.heatmap_opacity
        };
        if (opacity - self.heatmap_opacity).abs() > f32::EPSILON {
            self.heatmap_opacity = opacity;
            self.dirty = true;
        }
    }

    pub fn clear_measurements(&mut self) {
        if !self.measurements.is_empty() || self.draft.is_some() {
            self.measurements.clear();
            self.draft = None;
            self.dirty = true;
        }
    }

    fn canvas_transform(&self) -> Option<Affine2> {
        let frame = self.frame.as_ref()?;
        Some(compute_canvas_transform(
            &self.transform,
            frame.width,
            frame.height,
            self.canvas_size[0],
            self.canvas_size[1],
        ))
    }

    pub fn canvas_to_image(&self, canvas_point: Pos2) -> Option<Pos2> {
        Some(self.canvas_transform()?.inverse()?.apply(canvas_point))
    }

    /// Selects the box under `canvas_point`, clearing the selection on a miss.
    pub fn select_box_at(&mut self, canvas_point: Pos2) -> Option<usize> {
        if !self.ready || self.disposed || !self.show_overlays {
            return None;
        }
        let frame = self.frame.as_ref()?;
        let affine = self.canvas_transform()?;
        let hit = self.analysis.as_ref().and_then(|overlay| {
            hit_test_box(overlay, frame.width, frame.height, &affine, canvas_point)
        });
        if hit != self.selected_box {
            self.selected_box = hit;
            self.dirty = true;
        }
        hit
    }

    pub fn pointer_pressed(
        &mut self,
        button: PointerButton,
        canvas_point: Pos2,
    ) -> Option<DecodeRequest> {
        if !self.has_frame() {
            return None;
        }
        let tool = self.tools.tool_for(button);
        self.gesture = Some(Gesture {
            tool,
            origin: canvas_point,
            last: canvas_point,
        });

        let kind = tool.measure_kind()?;
        if !self.ready {
            self.gesture = None;
            return None;
        }
        let image_point = self.canvas_to_image(canvas_point)?;
        let continues = self.draft.as_ref().is_some_and(|draft| draft.kind == kind);
        match self.draft.as_mut().filter(|_| continues) {
            Some(draft) => draft.press(image_point),
            None => self.draft = Some(MeasurementDraft::begin(kind, image_point)),
        }
        self.dirty = true;
        None
    }

    pub fn pointer_dragged(&mut self, canvas_point: Pos2) -> Option<DecodeRequest> {
        let mut gesture = self.gesture?;
        if !self.has_frame() {
            return None;
        }
        let delta = canvas_point - gesture.last;
        gesture.last = canvas_point;
        self.gesture = Some(gesture);

        if gesture.tool.measure_kind().is_some() {
            let image_point = self.canvas_to_image(canvas_point)?;
            if let Some(draft) = self.draft.as_mut() {
                draft.drag_to(image_point);
                self.dirty = true;
            }
            return None;
        }
        let sensitivity = self.frame.as_ref().map_or(1.0, |frame| {
            self.config
                .window_level
                .sensitivity(frame.min_value, frame.max_value)
        });
        let effect = drag_effect(gesture.tool, delta, gesture.origin, sensitivity, &self.config);
        self.apply_effect(effect)
    }

    pub fn pointer_released(&mut self, canvas_point: Pos2) {
        let Some(gesture) = self.gesture.take() else {
            return;
        };
        if gesture.tool.measure_kind().is_none() {
            return;
        }
        let Some(image_point) = self.canvas_to_image(canvas_point) else {
            return;
        };
        let Some(mut draft) = self.draft.take() else {
            return;
        };
        match draft.release(image_point) {
            DraftStatus::Pending => self.draft = Some(draft),
            DraftStatus::Cancelled => {}
            DraftStatus::Complete => {
                if let Some(measurement) = self.finish_measurement(draft) {
                    log::debug!("Session {}: {}", self.id, measurement.caption());
                    self.measurements.push(measurement);
                }
            }
        }
        self.dirty = true;
    }

    fn finish_measurement(&self, draft: MeasurementDraft) -> Option<Measurement> {
        let frame = self.frame.as_ref()?;
        Measurement::finish(draft, frame, self.current_frame, self.pixel_spacing())
    }

    fn pixel_spacing(&self) -> Option<PixelSpacing> {
        self.frame
            .as_ref()
            .and_then(|frame| frame.pixel_spacing)
            .or_else(|| {
                self.stack
                    .as_ref()
                    .and_then(|stack| stack.metadata.pixel_spacing)
            })
    }

    /// Wheel input in canvas pixels, routed to the wheel binding.
    pub fn wheel(&mut self, scroll: f32, anchor: Pos2) -> Option<DecodeRequest> {
        if !self.has_frame() {
            return None;
        }
        let effect = wheel_effect(self.tools.bindings().wheel, scroll, anchor, &self.config);
        self.apply_effect(effect)
    }

    fn apply_effect(&mut self, effect: ToolEffect) -> Option<DecodeRequest> {
        match effect {
            ToolEffect::None => {}
            ToolEffect::Pan(delta) => {
                self.pan_by(delta);
            }
            ToolEffect::ZoomAbout { factor, anchor } => {
                self.zoom_by(factor, anchor);
            }
            ToolEffect::WindowLevel {
                delta_width,
                delta_center,
            } => {
                self.adjust_window(delta_width, delta_center);
            }
            ToolEffect::Scroll(distance) => {
                let steps = self.scroll.step(distance);
                return self.scroll_frames(steps);
            }
        }
        None
    }

    /// PNG of the current canvas, or `None` while not ready or with no canvas area.
    pub fn export_snapshot(&mut self) -> Option<Vec<u8>> {
        if self.disposed || !self.ready {
            return None;
        }
        let [width, height] = self.canvas_size;
        if width == 0 || height == 0 {
            return None;
        }
        if self.dirty {
            self.redraw();
        }
        let canvas = self.canvas.as_ref()?;
        match encode_png(canvas) {
            Ok(png) => Some(png),
            Err(err) => {
                log::error!("Snapshot export failed: {err:#}");
                None
            }
        }
    }

    pub fn drain_events(&mut self) -> Vec<SessionEvent> {
        std::mem::take(&mut self.events)
    }

    /// Marks in-flight work stale and releases the canvas. A disposed session
    /// ignores every later call.
    pub fn dispose(&mut self) {
        if self.disposed {
            return;
        }
        log::debug!("Session {} disposed", self.id);
        self.clear_view();
        self.events.clear();
        self.disposed = true;
    }
}
