//! Tool identities, the process-wide registry, and per-session activation state.

use eframe::egui::{Pos2, Vec2};

use crate::config::ViewerConfig;
use crate::measure::MeasureKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ToolId {
    Pan,
    Zoom,
    WindowLevel,
    StackScroll,
    Length,
    Angle,
    RectangleRoi,
    EllipticalRoi,
    Probe,
}

impl ToolId {
    pub const ALL: [ToolId; 9] = [
        ToolId::Pan,
        ToolId::Zoom,
        ToolId::WindowLevel,
        ToolId::StackScroll,
        ToolId::Length,
        ToolId::Angle,
        ToolId::RectangleRoi,
        ToolId::EllipticalRoi,
        ToolId::Probe,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Self::Pan => "Pan",
            Self::Zoom => "Zoom",
            Self::WindowLevel => "Window/Level",
            Self::StackScroll => "Stack Scroll",
            Self::Length => "Length",
            Self::Angle => "Angle",
            Self::RectangleRoi => "Rectangle ROI",
            Self::EllipticalRoi => "Ellipse ROI",
            Self::Probe => "Probe",
        }
    }

    pub fn measure_kind(self) -> Option<MeasureKind> {
        match self {
            Self::Length => Some(MeasureKind::Length),
            Self::Angle => Some(MeasureKind::Angle),
            Self::RectangleRoi => Some(MeasureKind::Rectangle),
            Self::EllipticalRoi => Some(MeasureKind::Ellipse),
            Self::Probe => Some(MeasureKind::Probe),
            _ => None,
        }
    }
}

/// Tools available to every session, built once at startup and shared behind an
/// `Arc`. Registration is idempotent: registering a known tool changes nothing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ToolRegistry {
    tools: Vec<ToolId>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_default_tools() -> Self {
        let mut registry = Self::new();
        for tool in ToolId::ALL {
            registry.register(tool);
        }
        registry
    }

    /// Returns true when `tool` was not registered before.
    pub fn register(&mut self, tool: ToolId) -> bool {
        if self.tools.contains(&tool) {
            return false;
        }
        self.tools.push(tool);
        true
    }

    pub fn is_registered(&self, tool: ToolId) -> bool {
        self.tools.contains(&tool)
    }

    pub fn tools(&self) -> &[ToolId] {
        &self.tools
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PointerButton {
    Primary,
    Secondary,
    Middle,
}

/// Which tool each input channel drives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Bindings {
    pub primary: ToolId,
    pub secondary: ToolId,
    pub middle: ToolId,
    pub wheel: ToolId,
}

impl Bindings {
    fn for_active(active: ToolId) -> Self {
        Self {
            primary: active,
            secondary: ToolId::WindowLevel,
            middle: ToolId::Pan,
            wheel: if active == ToolId::Zoom {
                ToolId::Zoom
            } else {
                ToolId::StackScroll
            },
        }
    }
}

/// Exactly one active tool per session plus the bindings derived from it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolActivation {
    active: ToolId,
    bindings: Bindings,
}

impl Default for ToolActivation {
    fn default() -> Self {
        Self::new(ToolId::WindowLevel)
    }
}

impl ToolActivation {
    pub fn new(active: ToolId) -> Self {
        Self {
            active,
            bindings: Bindings::for_active(active),
        }
    }

    pub fn active(&self) -> ToolId {
        self.active
    }

    pub fn bindings(&self) -> Bindings {
        self.bindings
    }

    /// Swaps the active tool. Unregistered tools and re-activating the current tool
    /// return false and leave the bindings untouched.
    pub fn activate(&mut self, registry: &ToolRegistry, tool: ToolId) -> bool {
        if tool == self.active || !registry.is_registered(tool) {
            return false;
        }
        self.active = tool;
        self.bindings = Bindings::for_active(tool);
        true
    }

    pub fn tool_for(&self, button: PointerButton) -> ToolId {
        match button {
            PointerButton::Primary => self.bindings.primary,
            PointerButton::Secondary => self.bindings.secondary,
            PointerButton::Middle => self.bindings.middle,
        }
    }
}

/// What a drag or wheel gesture asks the session to do.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ToolEffect {
    None,
    Pan(Vec2),
    ZoomAbout { factor: f32, anchor: Pos2 },
    WindowLevel { delta_width: f32, delta_center: f32 },
    /// Scroll distance in canvas pixels; positive moves towards earlier frames.
    Scroll(f32),
}

/// Translates a drag step of `tool`. `anchor` is the canvas point where the drag
/// started; `sensitivity` is the window/level gain for the displayed frame.
pub fn drag_effect(
    tool: ToolId,
    delta: Vec2,
    anchor: Pos2,
    sensitivity: f32,
    config: &ViewerConfig,
) -> ToolEffect {
    if delta == Vec2::ZERO {
        return ToolEffect::None;
    }
    match tool {
        ToolId::Pan => ToolEffect::Pan(delta),
        ToolId::Zoom => ToolEffect::ZoomAbout {
            factor: (-delta.y * config.zoom.drag_rate).exp(),
            anchor,
        },
        ToolId::WindowLevel => ToolEffect::WindowLevel {
            delta_width: delta.y * sensitivity * config.window_level.width_sign,
            delta_center: delta.x * sensitivity * config.window_level.center_sign,
        },
        ToolId::StackScroll => ToolEffect::Scroll(-delta.y),
        _ => ToolEffect::None,
    }
}

pub fn wheel_effect(tool: ToolId, scroll: f32, anchor: Pos2, config: &ViewerConfig) -> ToolEffect {
    if scroll == 0.0 || !scroll.is_finite() {
        return ToolEffect::None;
    }
    match tool {
        ToolId::Zoom => ToolEffect::ZoomAbout {
            factor: (scroll * config.zoom.wheel_rate).exp(),
            anchor,
        },
        _ => ToolEffect::Scroll(scroll),
    }
}

/// Turns continuous scroll distance into whole frame steps.
#[derive(Debug, Clone, PartialEq)]
pub struct ScrollAccumulator {
    residual: f32,
    pixels_per_frame: f32,
    dead_zone: f32,
}

impl ScrollAccumulator {
    pub fn new(pixels_per_frame: f32, dead_zone: f32) -> Self {
        Self {
            residual: 0.0,
            pixels_per_frame: if pixels_per_frame > 0.0 {
                pixels_per_frame
            } else {
                30.0
            },
            dead_zone: dead_zone.max(0.0),
        }
    }

    pub fn reset(&mut self) {
        self.residual = 0.0;
    }

    /// Scrolling up (positive) steps back through the stack.
    pub fn step(&mut self, scroll: f32) -> i32 {
        if scroll.abs() <= self.dead_zone {
            return 0;
        }

        // Drop stale residuals when the direction reverses.
        if self.residual != 0.0 && scroll.signum() != self.residual.signum() {
            self.residual = 0.0;
        }
        self.residual += scroll;

        let raw_steps = (self.residual / self.pixels_per_frame).trunc() as i32;
        if raw_steps == 0 {
            return 0;
        }
        self.residual -= raw_steps as f32 * self.pixels_per_frame;
        -raw_steps
    }
}

#[cfg(test)]
mod tests {
    use eframe::egui::{pos2, vec2};

    use super::*;

    #[test]
    fn registration_is_idempotent() {
        let mut registry = ToolRegistry::new();
        assert!(registry.register(ToolId::Pan));
        assert!(!registry.register(ToolId::Pan));
        assert_eq!(registry.tools(), &[ToolId::Pan]);
        assert_eq!(ToolRegistry::with_default_tools().tools().len(), 9);
    }

    #[test]
    fn activation_is_exclusive() {
        let registry = ToolRegistry::with_default_tools();
        let mut activation = ToolActivation::default();
        for tool in ToolId::ALL {
            activation.activate(&registry, tool);
            assert_eq!(activation.active(), tool);
            assert_eq!(activation.tool_for(PointerButton::Primary), tool);
        }
    }

    #[test]
    fn reactivating_or_unknown_tool_is_a_no_op() {
        let mut registry = ToolRegistry::new();
        registry.register(ToolId::Pan);
        let mut activation = ToolActivation::new(ToolId::Pan);
        assert!(!activation.activate(&registry, ToolId::Pan));
        assert!(!activation.activate(&registry, ToolId::Zoom));
        assert_eq!(activation.active(), ToolId::Pan);
    }

    #[test]
    fn bindings_follow_active_tool() {
        let registry = ToolRegistry::with_default_tools();
        let mut activation = ToolActivation::new(ToolId::Pan);
        assert_eq!(activation.tool_for(PointerButton::Secondary), ToolId::WindowLevel);
        assert_eq!(activation.tool_for(PointerButton::Middle), ToolId::Pan);
        assert_eq!(activation.bindings().wheel, ToolId::StackScroll);

        activation.activate(&registry, ToolId::Zoom);
        assert_eq!(activation.bindings().wheel, ToolId::Zoom);
    }

    #[test]
    fn window_level_drag_maps_axes_through_config_signs() {
        let config = ViewerConfig::default();
        let effect =
            drag_effect(ToolId::WindowLevel, vec2(4.0, 10.0), pos2(0.0, 0.0), 2.0, &config);
        assert_eq!(
            effect,
            ToolEffect::WindowLevel {
                delta_width: -20.0,
                delta_center: 8.0
            }
        );
        assert_eq!(
            drag_effect(ToolId::Length, vec2(1.0, 1.0), pos2(0.0, 0.0), 1.0, &config),
            ToolEffect::None
        );
    }

    #[test]
    fn zoom_drag_up_zooms_in() {
        let config = ViewerConfig::default();
        let ToolEffect::ZoomAbout { factor, anchor } =
            drag_effect(ToolId::Zoom, vec2(0.0, -10.0), pos2(5.0, 6.0), 1.0, &config)
        else {
            panic!("expected zoom");
        };
        assert!(factor > 1.0);
        assert_eq!(anchor, pos2(5.0, 6.0));
    }

    #[test]
    fn scroll_accumulates_whole_steps() {
        let mut accumulator = ScrollAccumulator::new(30.0, 0.5);
        assert_eq!(accumulator.step(0.4), 0);
        assert_eq!(accumulator.step(20.0), 0);
        assert_eq!(accumulator.step(20.0), -1);
        assert_eq!(accumulator.step(-65.0), 2);
    }
}
