use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use eframe::egui::{self, Pos2, Rect, Sense, TextureHandle, TextureOptions};

use crate::analysis::AnalysisResult;
use crate::config::ViewerConfig;
use crate::dicom::DicomLoader;
use crate::launch::LaunchRequest;
use crate::layout::{BroadcastAction, KeyOutcome, LayoutMode, LayoutSynchronizer};
use crate::session::SessionEvent;
use crate::shortcuts::tool_key_hint;
use crate::snapshot::write_snapshot;
use crate::tools::{PointerButton, ToolRegistry};

pub const APP_TITLE: &str = "Lumen View";
const PANE_GAP: f32 = 2.0;

struct PaneTexture {
    draw_count: u64,
    texture: TextureHandle,
}

pub struct LumenViewApp {
    layout: LayoutSynchronizer,
    config: Arc<ViewerConfig>,
    textures: HashMap<u64, PaneTexture>,
    pending_launch_request: Option<LaunchRequest>,
    heatmap_opacity: f32,
    status_line: String,
}

impl LumenViewApp {
    pub fn new(
        config: ViewerConfig,
        initial_request: Option<LaunchRequest>,
        initial_status: Option<String>,
    ) -> Self {
        let config = Arc::new(config);
        let heatmap_opacity = config.overlay.heatmap_opacity;
        let layout = LayoutSynchronizer::new(
            Arc::clone(&config),
            Arc::new(ToolRegistry::with_default_tools()),
            Arc::new(DicomLoader),
        );
        Self {
            layout,
            config,
            textures: HashMap::new(),
            pending_launch_request: initial_request,
            heatmap_opacity,
            status_line: initial_status.unwrap_or_else(|| "Open images to start.".to_string()),
        }
    }

    fn apply_black_background(ctx: &egui::Context) {
        let mut visuals = egui::Visuals::dark();
        let line_base = egui::Color32::from_gray(28);
        visuals.panel_fill = egui::Color32::BLACK;
        visuals.window_fill = egui::Color32::BLACK;
        visuals.extreme_bg_color = egui::Color32::BLACK;
        visuals.window_stroke = egui::Stroke::new(1.0, line_base);
        visuals.widgets.noninteractive.bg_stroke = egui::Stroke::new(1.0, line_base);
        ctx.set_visuals(visuals);
    }

    fn handle_launch_request(&mut self, request: LaunchRequest) {
        if let Some(mode) = request.layout {
            self.layout.set_layout(mode);
        }
        if !request.paths.is_empty() {
            self.open_paths(&request.paths);
        }
        if let Some(path) = request.analysis {
            self.load_analysis(path);
        }
    }

    fn open_paths(&mut self, paths: &[PathBuf]) {
        let errors = self.layout.open_paths(paths);
        self.status_line = match errors.first() {
            Some(first) if errors.len() > 1 => format!("{first} (+{} more)", errors.len() - 1),
            Some(first) => first.clone(),
            None => format!("Opened {} item(s).", paths.len()),
        };
    }

    fn open_files_dialog(&mut self) {
        let picked = rfd::FileDialog::new()
            .add_filter("DICOM", &["dcm", "dicom"])
            .add_filter("All files", &["*"])
            .pick_files();
        if let Some(paths) = picked {
            self.open_paths(&paths);
        }
    }

    fn open_folder_dialog(&mut self) {
        if let Some(folder) = rfd::FileDialog::new().pick_folder() {
            self.open_paths(&[folder]);
        }
    }

    fn open_analysis_dialog(&mut self) {
        let picked = rfd::FileDialog::new()
            .add_filter("Analysis result", &["json"])
            .pick_file();
        if let Some(path) = picked {
            self.load_analysis(path);
        }
    }

    fn load_analysis(&mut self, path: PathBuf) {
        match AnalysisResult::load(&path) {
            Ok(result) => {
                self.layout.set_analysis(Some(result.to_overlay()));
                self.status_line = result.summary();
            }
            Err(err) => {
                log::error!("{err:#}");
                self.status_line = format!("{err:#}");
            }
        }
    }

    fn export_snapshot(&mut self) {
        let png = self.layout.export_focused();
        self.save_snapshot(png);
    }

    fn save_snapshot(&mut self, png: Option<Vec<u8>>) {
        let Some(png) = png else {
            self.status_line = "Nothing to export yet.".to_string();
            return;
        };
        self.status_line = match write_snapshot(self.config.snapshot_dir.as_deref(), &png) {
            Ok(path) => format!("Saved {}", path.display()),
            Err(err) => {
                log::error!("{err:#}");
                format!("{err:#}")
            }
        };
    }

    fn handle_keys(&mut self, ctx: &egui::Context) {
        if ctx.wants_keyboard_input() {
            return;
        }
        let presses: Vec<(egui::Key, egui::Modifiers)> = ctx.input(|input| {
            input
                .events
                .iter()
                .filter_map(|event| match event {
                    egui::Event::Key {
                        key,
                        pressed: true,
                        repeat: false,
                        modifiers,
                        ..
                    } => Some((*key, *modifiers)),
                    _ => None,
                })
                .collect()
        });
        for (key, modifiers) in presses {
            match self.layout.handle_key(key, modifiers) {
                Some(KeyOutcome::Snapshot(png)) => self.save_snapshot(png),
                Some(KeyOutcome::ToolActivated {
                    tool,
                    changed: true,
                }) => self.status_line = format!("Tool: {}", tool.name()),
                Some(_) | None => {}
            }
        }
    }

    fn collect_events(&mut self) {
        for (pane, event) in self.layout.drain_events() {
            let frame_count = self
                .layout
                .session(pane)
                .map_or(0, |session| session.frame_count());
            self.status_line = describe_event(pane, &event, frame_count);
        }
    }

    fn sync_textures(&mut self, ctx: &egui::Context) {
        let live: Vec<u64> = self.layout.sessions().iter().map(|s| s.id()).collect();
        self.textures.retain(|id, _| live.contains(id));

        for session in self.layout.sessions() {
            let Some(canvas) = session.canvas() else {
                self.textures.remove(&session.id());
                continue;
            };
            let draw_count = session.draw_count();
            match self.textures.get_mut(&session.id()) {
                Some(pane) if pane.draw_count == draw_count => {}
                Some(pane) => {
                    pane.texture.set(canvas.clone(), TextureOptions::NEAREST);
                    pane.draw_count = draw_count;
                }
                None => {
                    let texture = ctx.load_texture(
                        format!("pane-{}", session.id()),
                        canvas.clone(),
                        TextureOptions::NEAREST,
                    );
                    self.textures.insert(
                        session.id(),
                        PaneTexture {
                            draw_count,
                            texture,
                        },
                    );
                }
            }
        }
    }

    fn show_toolbar(&mut self, ui: &mut egui::Ui) {
        ui.horizontal_wrapped(|ui| {
            if ui.button("Open…").clicked() {
                self.open_files_dialog();
            }
            if ui.button("Open folder…").clicked() {
                self.open_folder_dialog();
            }
            if ui.button("Analysis…").clicked() {
                self.open_analysis_dialog();
            }
            ui.separator();

            let current_mode = self.layout.mode();
            for mode in LayoutMode::ALL {
                if ui
                    .selectable_label(current_mode == mode, mode.label())
                    .clicked()
                {
                    self.layout.set_layout(mode);
                }
            }
            ui.separator();

            let active = self
                .layout
                .focused_session()
                .map(|session| session.active_tool());
            let tools = self.layout.registry().tools().to_vec();
            for tool in tools {
                let label = format!("{} ({})", tool.name(), tool_key_hint(tool));
                if ui.selectable_label(active == Some(tool), label).clicked() {
                    self.layout.activate_tool(tool);
                }
            }
            ui.separator();

            let operations = [
                ("Invert", BroadcastAction::Invert),
                ("Flip H", BroadcastAction::FlipHorizontal),
                ("Flip V", BroadcastAction::FlipVertical),
                ("Rotate", BroadcastAction::Rotate(90)),
                ("Fit", BroadcastAction::FitToWindow),
                ("Reset", BroadcastAction::Reset),
                ("Clear", BroadcastAction::ClearMeasurements),
            ];
            for (label, action) in operations {
                if ui.button(label).clicked() {
                    self.layout.broadcast(&action);
                }
            }

            let presets = self.layout.presets_for_focused().to_vec();
            ui.add_enabled_ui(!presets.is_empty(), |ui| {
                ui.menu_button("Presets", |ui| {
                    for preset in presets {
                        if ui.button(&preset.name).clicked() {
                            self.layout
                                .broadcast(&BroadcastAction::ApplyPreset(preset.clone()));
                            ui.close_menu();
                        }
                    }
                });
            });
            ui.separator();

            let overlays_shown = self
                .layout
                .focused_session()
                .is_some_and(|session| session.show_overlays());
            if ui.selectable_label(overlays_shown, "Overlays").clicked() {
                self.layout.broadcast(&BroadcastAction::ToggleOverlays);
            }
            let slider = egui::Slider::new(&mut self.heatmap_opacity, 0.0..=1.0).text("Heat-map");
            if ui.add(slider).changed() {
                self.layout.set_heatmap_opacity(self.heatmap_opacity);
            }
            if ui.button("Export").clicked() {
                self.export_snapshot();
            }
        });
    }

    fn show_panes(&mut self, ui: &mut egui::Ui, ctx: &egui::Context) {
        let rects = pane_rects(ui.available_rect_before_wrap(), self.layout.mode());
        ui.allocate_rect(ui.available_rect_before_wrap(), Sense::hover());

        for (index, rect) in rects.iter().enumerate() {
            let id = ui.id().with(("pane", index));
            let response = ui.interact(*rect, id, Sense::click_and_drag());
            self.forward_pane_input(ui, index, *rect, &response);
        }

        self.layout.redraw();
        self.sync_textures(ctx);

        let painter = ui.painter();
        for (index, rect) in rects.iter().enumerate() {
            painter.rect_filled(*rect, 0.0, egui::Color32::BLACK);
            let Some(session) = self.layout.session(index) else {
                continue;
            };
            if let Some(pane) = self.textures.get(&session.id()) {
                painter.image(
                    pane.texture.id(),
                    Rect::from_min_size(rect.min, pane.texture.size_vec2()),
                    Rect::from_min_max(Pos2::ZERO, egui::pos2(1.0, 1.0)),
                    egui::Color32::WHITE,
                );
            } else {
                let text = if session.is_loading() {
                    "Loading…"
                } else {
                    "Open images to start."
                };
                painter.text(
                    rect.center(),
                    egui::Align2::CENTER_CENTER,
                    text,
                    egui::FontId::proportional(14.0),
                    egui::Color32::from_gray(160),
                );
            }
            if self.layout.mode() != LayoutMode::Single && index == self.layout.focused() {
                painter.rect_stroke(
                    rect.shrink(1.0),
                    0.0,
                    egui::Stroke::new(1.0, egui::Color32::from_gray(110)),
                );
            }
        }
    }

    fn forward_pane_input(
        &mut self,
        ui: &egui::Ui,
        index: usize,
        rect: Rect,
        response: &egui::Response,
    ) {
        let canvas_size = [rect.width().max(0.0) as usize, rect.height().max(0.0) as usize];
        let local = |pos: Pos2| Pos2::new(pos.x - rect.min.x, pos.y - rect.min.y);

        if response.clicked() || response.drag_started() {
            self.layout.focus(index);
        }
        let Some(session) = self.layout.session_mut(index) else {
            return;
        };
        session.set_canvas_size(canvas_size);

        let mut requests = Vec::new();
        if response.drag_started() {
            let origin = ui
                .input(|input| input.pointer.press_origin())
                .or_else(|| response.interact_pointer_pos());
            if let (Some(button), Some(origin)) = (dragging_button(response), origin) {
                requests.push(session.pointer_pressed(button, local(origin)));
            }
        }
        if response.dragged() {
            if let Some(pos) = response.interact_pointer_pos() {
                requests.push(session.pointer_dragged(local(pos)));
            }
        }
        if response.drag_stopped() {
            let pos = response
                .interact_pointer_pos()
                .or_else(|| ui.input(|input| input.pointer.latest_pos()));
            if let Some(pos) = pos {
                session.pointer_released(local(pos));
            }
        }
        if response.clicked() {
            if let Some(pos) = response.interact_pointer_pos() {
                let point = local(pos);
                if session.select_box_at(point).is_none()
                    && session.active_tool().measure_kind().is_some()
                {
                    requests.push(session.pointer_pressed(PointerButton::Primary, point));
                    session.pointer_released(point);
                }
            }
        }
        if response.hovered() {
            let (raw_scroll, smooth_scroll) =
                ui.input(|input| (input.raw_scroll_delta, input.smooth_scroll_delta));
            let scroll = dominant_scroll_axis(raw_scroll, smooth_scroll);
            if scroll != 0.0 {
                let anchor = response
                    .hover_pos()
                    .map(local)
                    .unwrap_or_else(|| (rect.size() / 2.0).to_pos2());
                requests.push(session.wheel(scroll, anchor));
            }
        }

        for request in requests {
            self.layout.submit(request);
        }
    }
}

impl eframe::App for LumenViewApp {
    fn update(&mut self, ctx: &egui::Context, _frame: &mut eframe::Frame) {
        Self::apply_black_background(ctx);

        if let Some(request) = self.pending_launch_request.take() {
            self.handle_launch_request(request);
        }

        self.layout.poll();
        self.handle_keys(ctx);

        egui::TopBottomPanel::top("toolbar").show(ctx, |ui| {
            self.show_toolbar(ui);
        });

        egui::CentralPanel::default()
            .frame(egui::Frame::none().fill(egui::Color32::BLACK))
            .show(ctx, |ui| {
                self.show_panes(ui, ctx);
            });

        self.collect_events();
        egui::TopBottomPanel::bottom("status").show(ctx, |ui| {
            ui.label(&self.status_line);
        });

        if self.layout.decodes_in_flight() > 0 {
            ctx.set_cursor_icon(egui::CursorIcon::Progress);
            ctx.request_repaint_after(Duration::from_millis(16));
        }
    }
}

fn dragging_button(response: &egui::Response) -> Option<PointerButton> {
    if response.dragged_by(egui::PointerButton::Primary) {
        Some(PointerButton::Primary)
    } else if response.dragged_by(egui::PointerButton::Secondary) {
        Some(PointerButton::Secondary)
    } else if response.dragged_by(egui::PointerButton::Middle) {
        Some(PointerButton::Middle)
    } else {
        None
    }
}

fn dominant_scroll_axis(raw_scroll: egui::Vec2, smooth_scroll: egui::Vec2) -> f32 {
    let pick = |delta: egui::Vec2| {
        if delta.y.abs() >= delta.x.abs() {
            delta.y
        } else {
            delta.x
        }
    };

    if smooth_scroll != egui::Vec2::ZERO {
        pick(smooth_scroll)
    } else {
        pick(raw_scroll)
    }
}

/// Cell rectangles for `mode`, row-major, separated by a small gap.
fn pane_rects(area: Rect, mode: LayoutMode) -> Vec<Rect> {
    let (columns, rows) = mode.grid();
    let cell_width = ((area.width() - PANE_GAP * (columns - 1) as f32) / columns as f32).max(0.0);
    let cell_height = ((area.height() - PANE_GAP * (rows - 1) as f32) / rows as f32).max(0.0);
    (0..rows)
        .flat_map(|row| (0..columns).map(move |column| (row, column)))
        .map(|(row, column)| {
            let min = egui::pos2(
                area.min.x + column as f32 * (cell_width + PANE_GAP),
                area.min.y + row as f32 * (cell_height + PANE_GAP),
            );
            Rect::from_min_size(min, egui::vec2(cell_width, cell_height))
        })
        .collect()
}

fn describe_event(pane: usize, event: &SessionEvent, frame_count: usize) -> String {
    match event {
        SessionEvent::FrameChanged { index } => {
            format!("Pane {}: frame {}/{}", pane + 1, index + 1, frame_count)
        }
        SessionEvent::LoadFailed(message) => format!("Pane {}: {message}", pane + 1),
    }
}
