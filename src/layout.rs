//! Pane layout, cross-pane actions and keyboard routing.

use std::path::PathBuf;
use std::sync::Arc;

use eframe::egui::{Key, Modifiers};

use crate::analysis::AnalysisOverlay;
use crate::compositor::OverlayCompositor;
use crate::config::{Preset, ViewerConfig};
use crate::hanging::hanging_order;
use crate::loader::{DecodeDispatcher, DecodeRequest, FrameLoader, ImageStack, StackMetadata};
use crate::session::{SessionEvent, ViewportSession};
use crate::shortcuts::{shortcut_for, ShortcutCommand};
use crate::tools::{ToolId, ToolRegistry};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum LayoutMode {
    #[default]
    Single,
    SideBySide,
    Grid2x2,
}

impl LayoutMode {
    pub const ALL: [LayoutMode; 3] = [Self::Single, Self::SideBySide, Self::Grid2x2];

    pub fn cells(self) -> usize {
        match self {
            Self::Single => 1,
            Self::SideBySide => 2,
            Self::Grid2x2 => 4,
        }
    }

    /// `(columns, rows)`.
    pub fn grid(self) -> (usize, usize) {
        match self {
            Self::Single => (1, 1),
            Self::SideBySide => (2, 1),
            Self::Grid2x2 => (2, 2),
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Single => "1x1",
            Self::SideBySide => "1x2",
            Self::Grid2x2 => "2x2",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|mode| mode.label().eq_ignore_ascii_case(value.trim()))
    }

    /// Smallest mode with room for `count` panes.
    pub fn for_count(count: usize) -> Self {
        Self::ALL
            .into_iter()
            .find(|mode| mode.cells() >= count)
            .unwrap_or(Self::Grid2x2)
    }
}

/// Actions fanned out to every ready pane.
#[derive(Debug, Clone, PartialEq)]
pub enum BroadcastAction {
    Invert,
    FlipHorizontal,
    FlipVertical,
    Rotate(i32),
    Reset,
    FitToWindow,
    ToggleOverlays,
    ApplyPreset(Preset),
    ClearMeasurements,
}

impl BroadcastAction {
    fn apply(&self, session: &mut ViewportSession) -> bool {
        match self {
            Self::Invert => session.invert(),
            Self::FlipHorizontal => session.flip_horizontal(),
            Self::FlipVertical => session.flip_vertical(),
            Self::Rotate(degrees) => session.rotate(*degrees),
            Self::Reset => session.reset(),
            Self::FitToWindow => session.fit_to_window(),
            Self::ToggleOverlays => {
                session.toggle_overlays();
                true
            }
            Self::ApplyPreset(preset) => session.apply_preset(preset),
            Self::ClearMeasurements => {
                session.clear_measurements();
                true
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum KeyOutcome {
    ToolActivated { tool: ToolId, changed: bool },
    Broadcast { action: BroadcastAction, panes: usize },
    /// PNG bytes of the focused pane, `None` when export is unavailable.
    Snapshot(Option<Vec<u8>>),
}

pub struct LayoutSynchronizer {
    mode: LayoutMode,
    sessions: Vec<ViewportSession>,
    focused: usize,
    registry: Arc<ToolRegistry>,
    compositor: Arc<OverlayCompositor>,
    config: Arc<ViewerConfig>,
    dispatcher: DecodeDispatcher,
}

impl LayoutSynchronizer {
    pub fn new(
        config: Arc<ViewerConfig>,
        registry: Arc<ToolRegistry>,
        loader: Arc<dyn FrameLoader>,
    ) -> Self {
        let compositor = Arc::new(OverlayCompositor::new(config.overlay.clone()));
        let first = ViewportSession::new(Arc::clone(&config), Arc::clone(&compositor));
        Self {
            mode: LayoutMode::Single,
            sessions: vec![first],
            focused: 0,
            registry,
            compositor,
            config,
            dispatcher: DecodeDispatcher::new(loader),
        }
    }

    pub fn mode(&self) -> LayoutMode {
        self.mode
    }

    pub fn config(&self) -> &ViewerConfig {
        &self.config
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    pub fn sessions(&self) -> &[ViewportSession] {
        &self.sessions
    }

    pub fn session(&self, index: usize) -> Option<&ViewportSession> {
        self.sessions.get(index)
    }

    pub fn session_mut(&mut self, index: usize) -> Option<&mut ViewportSession> {
        self.sessions.get_mut(index)
    }

    pub fn focused(&self) -> usize {
        self.focused
    }

    pub fn focused_session(&self) -> Option<&ViewportSession> {
        self.sessions.get(self.focused)
    }

    pub fn focus(&mut self, index: usize) -> bool {
        if index >= self.sessions.len() || index == self.focused {
            return false;
        }
        self.focused = index;
        true
    }

    pub fn decodes_in_flight(&self) -> usize {
        self.dispatcher.in_flight()
    }

    /// Resizes to `mode`, keeping sessions at retained indices, adding empty ones
    /// and disposing the removed ones.
    pub fn set_layout(&mut self, mode: LayoutMode) -> bool {
        if mode == self.mode {
            return false;
        }
        let cells = mode.cells();
        while self.sessions.len() > cells {
            if let Some(mut session) = self.sessions.pop() {
                session.dispose();
            }
        }
        while self.sessions.len() < cells {
            self.sessions.push(ViewportSession::new(
                Arc::clone(&self.config),
                Arc::clone(&self.compositor),
            ));
        }
        self.focused = self.focused.min(cells - 1);
        log::debug!("Layout {} -> {}", self.mode.label(), mode.label());
        self.mode = mode;
        true
    }

    /// Loads `paths` through the loader and places the resulting stacks. Returns the
    /// load errors as messages.
    pub fn open_paths(&mut self, paths: &[PathBuf]) -> Vec<String> {
        let mut stacks = Vec::new();
        let mut errors = Vec::new();
        for result in self.dispatcher.load_stacks(paths) {
            match result {
                Ok(stack) => stacks.push(stack),
                Err(err) => {
                    log::warn!("Could not open stack: {err:#}");
                    errors.push(format!("{err:#}"));
                }
            }
        }
        self.assign_stacks(stacks);
        errors
    }

    /// Places stacks into panes, growing the layout when needed. Four stacks in a
    /// 2x2 layout hang in mammography order.
    pub fn assign_stacks(&mut self, stacks: Vec<ImageStack>) -> usize {
        if stacks.is_empty() {
            return 0;
        }
        if stacks.len() > self.mode.cells() {
            self.set_layout(LayoutMode::for_count(stacks.len()));
        }
        let cells = self.mode.cells();
        if stacks.len() > cells {
            log::warn!("Only {cells} of {} stacks fit the layout", stacks.len());
        }

        let metadata: Vec<&StackMetadata> = stacks.iter().map(|stack| &stack.metadata).collect();
        let order = hanging_order(&metadata, cells);
        let mut slots: Vec<Option<ImageStack>> = stacks.into_iter().map(Some).collect();
        let mut placed = 0;
        for (pane, stack_index) in order.into_iter().take(cells).enumerate() {
            if let Some(stack) = slots.get_mut(stack_index).and_then(Option::take) {
                if self.assign_stack(pane, stack) {
                    placed += 1;
                }
            }
        }
        placed
    }

    pub fn assign_stack(&mut self, index: usize, stack: ImageStack) -> bool {
        let Some(session) = self.sessions.get_mut(index) else {
            return false;
        };
        let request = session.load_stack(Arc::new(stack));
        let loaded = request.is_some();
        self.submit(request);
        loaded
    }

    pub fn submit(&mut self, request: Option<DecodeRequest>) {
        if let Some(request) = request {
            self.dispatcher.dispatch(request);
        }
    }

    /// Routes finished decodes to their sessions and redraws dirty panes. Returns
    /// true when any pane was redrawn.
    pub fn poll(&mut self) -> bool {
        for outcome in self.dispatcher.poll() {
            let session_id = outcome.session_id;
            match self
                .sessions
                .iter_mut()
                .find(|session| session.id() == session_id)
            {
                Some(session) => {
                    session.finish_decode(outcome);
                }
                None => log::debug!("Decode for removed session {session_id} dropped"),
            }
        }
        self.redraw()
    }

    pub fn redraw(&mut self) -> bool {
        let mut redrawn = false;
        for session in &mut self.sessions {
            redrawn |= session.redraw();
        }
        redrawn
    }

    /// Applies `action` to every ready pane; loading and empty panes are skipped.
    /// Returns how many panes changed.
    pub fn broadcast(&mut self, action: &BroadcastAction) -> usize {
        self.sessions
            .iter_mut()
            .filter(|session| session.is_ready())
            .map(|session| action.apply(session))
            .filter(|changed| *changed)
            .count()
    }

    pub fn activate_tool(&mut self, tool: ToolId) -> bool {
        let registry = Arc::clone(&self.registry);
        self.sessions
            .get_mut(self.focused)
            .is_some_and(|session| session.activate_tool(&registry, tool))
    }

    pub fn export_focused(&mut self) -> Option<Vec<u8>> {
        self.sessions.get_mut(self.focused)?.export_snapshot()
    }

    pub fn handle_key(&mut self, key: Key, modifiers: Modifiers) -> Option<KeyOutcome> {
        let outcome = match shortcut_for(key, modifiers)? {
            ShortcutCommand::ActivateTool(tool) => KeyOutcome::ToolActivated {
                tool,
                changed: self.activate_tool(tool),
            },
            ShortcutCommand::Broadcast(action) => {
                let panes = self.broadcast(&action);
                KeyOutcome::Broadcast { action, panes }
            }
            ShortcutCommand::ExportSnapshot => KeyOutcome::Snapshot(self.export_focused()),
        };
        Some(outcome)
    }

    /// Gives every pane showing a stack its own copy of `overlay`.
    pub fn set_analysis(&mut self, overlay: Option<AnalysisOverlay>) {
        for session in self.sessions.iter_mut().filter(|session| !session.is_empty()) {
            session.set_analysis(overlay.clone());
        }
    }

    pub fn set_heatmap_opacity(&mut self, opacity: f32) {
        for session in &mut self.sessions {
            session.set_heatmap_opacity(opacity);
        }
    }

    pub fn presets_for_focused(&self) -> &[Preset] {
        let modality = self
            .focused_session()
            .and_then(|session| session.stack())
            .and_then(|stack| stack.metadata.modality.as_deref());
        self.config.presets_for(modality)
    }

    pub fn drain_events(&mut self) -> Vec<(usize, SessionEvent)> {
        self.sessions
            .iter_mut()
            .enumerate()
            .flat_map(|(index, session)| {
                session
                    .drain_events()
                    .into_iter()
                    .map(move |event| (index, event))
            })
            .collect()
    }
}

impl Drop for LayoutSynchronizer {
    fn drop(&mut self) {
        for session in &mut self.sessions {
            session.dispose();
        }
    }
}
