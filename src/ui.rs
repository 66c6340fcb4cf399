// src/ui.rs
use std::{
    path::{Path, PathBuf},
    sync::Arc,
    time::Instant,
};

use egui::{
    Align, Align2, Color32, ColorImage, ImageData, Layout, Pos2, Rect, RichText, TextureHandle,
    TextureOptions, Vec2,
};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

use crate::{
    camera::{CameraDevice, CaptureSettings, FrameSize, NokhwaCamera, PreviewWindow},
    config::Config,
    encoder::{ClockEncoder, EncoderPoller},
    error::Result,
    run_log::{with_default_extension, LogEntry, RunLog},
    session::{CaptureSession, OverlayStyle},
};

const BACKGROUND: Color32 = Color32::from_rgb(0xB4, 0x76, 0x76);
const BUTTON_TEXT_SIZE: f32 = 16.0;
const ENCODER_TEXT_SIZE: f32 = 48.0;
const DEFAULT_LOG_NAME: &str = "run.txt";
const DEFAULT_RECORDING_NAME: &str = "recording.mjpeg";

/// Survives restarts through eframe storage.
#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(default)]
struct Remembered {
    entry_location: String,
    last_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PromptPurpose {
    StartRun,
    OpenRun,
    Record,
}

impl PromptPurpose {
    fn title(self) -> &'static str {
        match self {
            PromptPurpose::StartRun => "Save new run as",
            PromptPurpose::OpenRun => "Open existing run",
            PromptPurpose::Record => "Record video to",
        }
    }
}

/// Path entry dialog; `None` on cancel.
struct PathPrompt {
    purpose: PromptPurpose,
    text: String,
}

/// Hint shown under the path field before the user confirms.
fn prompt_warning(purpose: PromptPurpose, text: &str) -> Option<&'static str> {
    let text = text.trim();
    match purpose {
        PromptPurpose::OpenRun if !text.is_empty() && !Path::new(text).is_file() => {
            Some("File not found. Marks will fail until it exists.")
        }
        PromptPurpose::StartRun if !text.is_empty() && Path::new(text).is_file() => {
            Some("File exists and will be overwritten.")
        }
        _ => None,
    }
}

#[derive(Debug, Clone, Copy)]
enum Action {
    StartRun,
    Mark,
    OpenRun,
    TogglePreview,
    ToggleOverlay,
    ToggleRecording,
}

pub struct FieldLoggerApp<D: CameraDevice = NokhwaCamera> {
    config: Config,
    session: CaptureSession<D>,
    run_log: RunLog,
    encoder: EncoderPoller,
    remembered: Remembered,
    comment: String,

    prompt: Option<PathPrompt>,
    alert: Option<String>,

    texture: Option<TextureHandle>,
    texture_size: Option<Vec2>,
    camera_status: Option<String>,
    preview_area: Vec2,
}

impl FieldLoggerApp<NokhwaCamera> {
    pub fn new(cc: &eframe::CreationContext<'_>, config: Config) -> Self {
        info!("Initializing FieldLoggerApp");
        let remembered: Remembered = cc
            .storage
            .and_then(|storage| eframe::get_value(storage, eframe::APP_KEY))
            .unwrap_or_default();
        let camera = NokhwaCamera::new(cc.egui_ctx.clone(), config.jpeg_quality);
        Self::with_device(config, camera, remembered)
    }
}

impl<D: CameraDevice> FieldLoggerApp<D> {
    fn with_device(config: Config, camera: D, remembered: Remembered) -> Self {
        let settings = CaptureSettings {
            camera_index: config.camera_index,
            resolution: FrameSize {
                width: config.resolution[0],
                height: config.resolution[1],
            },
            framerate: config.framerate,
        };
        let style = OverlayStyle {
            alpha: config.overlay_alpha,
            layer: config.overlay_layer,
        };

        Self {
            session: CaptureSession::new(camera, settings, style),
            run_log: RunLog::new(),
            encoder: EncoderPoller::new(Box::new(ClockEncoder), Instant::now()),
            remembered,
            comment: String::new(),
            prompt: None,
            alert: None,
            texture: None,
            texture_size: None,
            camera_status: None,
            preview_area: Vec2::ZERO,
            config,
        }
    }

    /// Turns a failed operation into an alert.
    fn report<T>(&mut self, result: Result<T>) -> Option<T> {
        match result {
            Ok(value) => Some(value),
            Err(e) => {
                warn!("{}", e);
                self.alert = Some(e.to_string());
                None
            }
        }
    }

    fn dispatch(&mut self, action: Action) {
        debug!("UI action {:?}", action);
        match action {
            Action::StartRun => {
                let valid = RunLog::validate_entry_location(&self.remembered.entry_location);
                if self.report(valid).is_some() {
                    self.open_prompt(PromptPurpose::StartRun, DEFAULT_LOG_NAME);
                }
            }
            Action::OpenRun => self.open_prompt(PromptPurpose::OpenRun, ""),
            Action::Mark => {
                let entry = LogEntry::new(self.encoder.read(Instant::now()), self.comment.clone());
                let marked = self.run_log.mark(&entry);
                if self.report(marked).is_some() {
                    self.comment.clear();
                }
            }
            Action::TogglePreview => {
                let window = PreviewWindow::centered(
                    self.preview_area.x,
                    self.preview_area.y,
                    self.config.resolution[0],
                    self.config.preview_height_ratio,
                );
                let toggled = self.session.toggle_preview(window);
                if let Some(false) = self.report(toggled) {
                    self.texture = None;
                    self.texture_size = None;
                }
            }
            Action::ToggleOverlay => {
                let toggled = self.session.toggle_overlay();
                self.report(toggled);
            }
            Action::ToggleRecording => {
                if self.session.recording_enabled() {
                    let toggled = self.session.toggle_recording(None);
                    self.report(toggled);
                } else {
                    self.open_prompt(PromptPurpose::Record, DEFAULT_RECORDING_NAME);
                }
            }
        }
    }

    fn open_prompt(&mut self, purpose: PromptPurpose, file_name: &str) {
        let text = match &self.remembered.last_dir {
            Some(dir) => dir.join(file_name).display().to_string(),
            None => file_name.to_string(),
        };
        self.prompt = Some(PathPrompt { purpose, text });
    }

    fn finish_prompt(&mut self, purpose: PromptPurpose, chosen: Option<PathBuf>) {
        let chosen = match (purpose, chosen) {
            (PromptPurpose::StartRun, Some(path)) => {
                Some(with_default_extension(path, &self.config.log_extension))
            }
            (_, chosen) => chosen,
        };
        let path = chosen.as_deref();

        let accepted = match purpose {
            PromptPurpose::StartRun => {
                let started = self
                    .run_log
                    .start_run(&self.remembered.entry_location, path);
                self.report(started)
            }
            PromptPurpose::OpenRun => {
                let opened = self.run_log.open_run(path);
                self.report(opened)
            }
            PromptPurpose::Record => {
                let toggled = self.session.toggle_recording(path);
                self.report(toggled)
            }
        };

        if accepted == Some(true) {
            self.remember_dir(path);
        }
    }

    fn remember_dir(&mut self, path: Option<&Path>) {
        if let Some(dir) = path.and_then(Path::parent) {
            if !dir.as_os_str().is_empty() {
                self.remembered.last_dir = Some(dir.to_path_buf());
            }
        }
    }

    fn update_preview_texture(&mut self, ctx: &egui::Context) {
        if let Some(err) = self.session.poll_device() {
            self.camera_status = Some(err);
        }
        if !self.session.preview_enabled() {
            self.texture = None;
            self.texture_size = None;
        }
        let Some(frame) = self.session.take_frame() else {
            return;
        };
        if !self.session.preview_enabled() {
            return;
        }
        self.camera_status = None;

        let size = [frame.width() as usize, frame.height() as usize];
        let frame_size_vec = Vec2::new(size[0] as f32, size[1] as f32);
        let image = Arc::new(ColorImage::from_rgb(size, frame.as_raw()));

        match self.texture {
            Some(ref mut texture) => {
                if self.texture_size != Some(frame_size_vec) {
                    debug!("Texture size changed to: {:?}", frame_size_vec);
                    self.texture_size = Some(frame_size_vec);
                }
                texture.set(ImageData::Color(image), TextureOptions::LINEAR);
            }
            None => {
                info!("Creating texture with size: {:?}", size);
                let new_texture =
                    ctx.load_texture("camera_preview", ImageData::Color(image), TextureOptions::LINEAR);
                self.texture_size = Some(frame_size_vec);
                self.texture = Some(new_texture);
            }
        }
    }

    fn controls(&mut self, ui: &mut egui::Ui) -> Option<Action> {
        let mut action = None;
        let enabled = self.prompt.is_none() && self.alert.is_none();
        ui.add_enabled_ui(enabled, |ui| {
            ui.horizontal_wrapped(|ui| {
                let mut button = |ui: &mut egui::Ui, label: &str, on_click: Action| {
                    if ui.button(RichText::new(label).size(BUTTON_TEXT_SIZE)).clicked() {
                        action = Some(on_click);
                    }
                };
                button(ui, "Start Run", Action::StartRun);
                button(ui, "Mark", Action::Mark);
                button(ui, "Open File", Action::OpenRun);

                ui.add_space(10.0);
                ui.label(RichText::new("Entry Location").size(BUTTON_TEXT_SIZE).strong());
                ui.text_edit_singleline(&mut self.remembered.entry_location);
                ui.add_space(10.0);

                button(ui, "Camera (On/Off)", Action::TogglePreview);
                button(ui, "Camera Overlay (On/Off)", Action::ToggleOverlay);
                button(ui, "Record (On/Off)", Action::ToggleRecording);
            });
        });

        ui.add_space(5.0);
        egui::Frame::default()
            .fill(Color32::GRAY)
            .show(ui, |ui| {
                ui.set_min_width(ui.available_width());
                ui.label(
                    RichText::new(self.encoder.displayed())
                        .size(ENCODER_TEXT_SIZE)
                        .strong()
                        .color(Color32::BLACK),
                );
            });
        action
    }

    fn show_alert(&mut self, ctx: &egui::Context) {
        let Some(message) = &self.alert else {
            return;
        };
        let mut dismissed = false;
        egui::Window::new("Alert")
            .collapsible(false)
            .resizable(false)
            .anchor(Align2::CENTER_CENTER, [0.0, 0.0])
            .show(ctx, |ui| {
                ui.label(message.as_str());
                ui.add_space(8.0);
                if ui.button("OK").clicked() {
                    dismissed = true;
                }
            });
        if dismissed {
            self.alert = None;
        }
    }

    fn show_prompt(&mut self, ctx: &egui::Context) {
        let Some(prompt) = &mut self.prompt else {
            return;
        };
        let mut outcome: Option<Option<PathBuf>> = None;
        egui::Window::new(prompt.purpose.title())
            .collapsible(false)
            .resizable(false)
            .anchor(Align2::CENTER_CENTER, [0.0, 0.0])
            .show(ctx, |ui| {
                ui.label("Path:");
                let field = ui.add(egui::TextEdit::singleline(&mut prompt.text).desired_width(400.0));
                if let Some(warning) = prompt_warning(prompt.purpose, &prompt.text) {
                    ui.colored_label(Color32::YELLOW, warning);
                }
                if prompt.purpose == PromptPurpose::StartRun {
                    ui.small("A name without an extension gets .txt");
                }
                let submitted = field.lost_focus() && ui.input(|i| i.key_pressed(egui::Key::Enter));
                ui.horizontal(|ui| {
                    if ui.button("OK").clicked() || submitted {
                        let text = prompt.text.trim();
                        outcome = Some((!text.is_empty()).then(|| PathBuf::from(text)));
                    }
                    if ui.button("Cancel").clicked() {
                        outcome = Some(None);
                    }
                });
            });

        if let Some(chosen) = outcome {
            if let Some(prompt) = self.prompt.take() {
                self.finish_prompt(prompt.purpose, chosen);
            }
        }
    }

    fn status_line(&self) -> String {
        let run = match self.run_log.file_path() {
            Some(path) if self.run_log.is_open_for_append() => format!("Run: {}", path.display()),
            Some(path) => format!("Run: {} (missing)", path.display()),
            None => "No run".to_string(),
        };
        let flag = |on: bool| if on { "on" } else { "off" };
        format!(
            "{}   |   Camera {}   Overlay {}   Recording {}",
            run,
            flag(self.session.preview_enabled()),
            flag(self.session.overlay_enabled()),
            flag(self.session.recording_enabled()),
        )
    }

    fn preview(&mut self, ui: &mut egui::Ui) {
        self.preview_area = ui.available_size();
        let origin = ui.max_rect().min;

        if let Some(err) = &self.camera_status {
            ui.colored_label(Color32::YELLOW, format!("Camera Status: {}", err));
        }

        let Some(window) = self.session.preview_geometry() else {
            return;
        };
        let target = Rect::from_min_size(
            origin + Vec2::new(window.x, window.y),
            Vec2::new(window.width, window.height),
        );

        match (&self.texture, self.texture_size) {
            (Some(texture), Some(tex_size)) => {
                let rect = fit_aspect(target, tex_size);
                let uv = Rect::from_min_max(Pos2::ZERO, Pos2::new(1.0, 1.0));
                ui.painter().image(texture.id(), rect, uv, Color32::WHITE);
            }
            _ => {
                ui.scope_builder(egui::UiBuilder::new().max_rect(target), |ui| {
                    ui.with_layout(Layout::top_down(Align::Center), |ui| {
                        ui.add_space(target.height() / 3.0);
                        ui.spinner();
                        ui.label("Initializing camera stream...");
                    });
                });
            }
        }
    }
}

/// Largest rect with the texture's aspect ratio centered inside `target`.
fn fit_aspect(target: Rect, tex_size: Vec2) -> Rect {
    let aspect_ratio = if tex_size.y > 0.0 {
        tex_size.x / tex_size.y
    } else {
        1.0
    };
    let mut image_width = target.width();
    let mut image_height = image_width / aspect_ratio;
    if image_height > target.height() {
        image_height = target.height();
        image_width = image_height * aspect_ratio;
    }
    Rect::from_center_size(target.center(), Vec2::new(image_width, image_height))
}

impl<D: CameraDevice> eframe::App for FieldLoggerApp<D> {
    fn update(&mut self, ctx: &egui::Context, _frame: &mut eframe::Frame) {
        let now = Instant::now();
        self.encoder.poll(now);
        ctx.request_repaint_after(self.encoder.until_next(now));

        self.update_preview_texture(ctx);

        let top_frame = egui::Frame::side_top_panel(&ctx.style()).fill(BACKGROUND);
        let action = egui::TopBottomPanel::top("controls")
            .frame(top_frame)
            .show(ctx, |ui| self.controls(ui))
            .inner;

        egui::TopBottomPanel::bottom("status")
            .resizable(false)
            .frame(top_frame)
            .show(ctx, |ui| {
                ui.label(self.status_line());
            });

        egui::SidePanel::left("comments")
            .resizable(true)
            .default_width(360.0)
            .frame(egui::Frame::side_top_panel(&ctx.style()).fill(BACKGROUND))
            .show(ctx, |ui| {
                ui.label(RichText::new("Comments").size(28.0).strong());
                ui.add_sized(
                    ui.available_size(),
                    egui::TextEdit::multiline(&mut self.comment)
                        .font(egui::FontId::proportional(BUTTON_TEXT_SIZE)),
                );
            });

        egui::CentralPanel::default()
            .frame(egui::Frame::central_panel(&ctx.style()).fill(BACKGROUND))
            .show(ctx, |ui| self.preview(ui));

        if let Some(action) = action {
            self.dispatch(action);
        }
        self.show_prompt(ctx);
        self.show_alert(ctx);
    }

    fn save(&mut self, storage: &mut dyn eframe::Storage) {
        eframe::set_value(storage, eframe::APP_KEY, &self.remembered);
    }

    fn on_exit(&mut self, _gl: Option<&eframe::glow::Context>) {
        info!("Exit requested. Releasing camera...");
        self.session.shutdown();
    }
}
