// src/camera.rs
use std::{
    path::Path,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex, MutexGuard, PoisonError,
    },
    thread::{self, JoinHandle},
    time::Duration,
};

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender, TryRecvError, TrySendError};
use image::RgbImage;
use log::{debug, error, info, warn};
use nokhwa::{
    pixel_format::{RgbFormat, YuyvFormat},
    utils::{CameraFormat, CameraIndex, FrameFormat, RequestedFormat, RequestedFormatType, Resolution},
    Camera, NokhwaError,
};

use crate::{
    error::{Error, Result},
    overlay::Overlay,
    recorder::MjpegSink,
};

// --- Constants ---
const STARTUP_TIMEOUT: Duration = Duration::from_secs(5);
const PREVIEW_QUEUE_DEPTH: usize = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameSize {
    pub width: u32,
    pub height: u32,
}

/// Display rectangle the preview is drawn into, relative to the preview area.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PreviewWindow {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl PreviewWindow {
    /// Horizontally centered, top aligned, `frame_width` wide (clamped to the
    /// available width) and `available_height / height_ratio` tall.
    pub fn centered(
        available_width: f32,
        available_height: f32,
        frame_width: u32,
        height_ratio: f32,
    ) -> Self {
        let available_width = available_width.max(0.0);
        let width = (frame_width as f32).min(available_width);
        Self {
            x: (available_width - width) / 2.0,
            y: 0.0,
            width,
            height: (available_height / height_ratio).max(0.0),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaptureSettings {
    pub camera_index: u32,
    pub resolution: FrameSize,
    pub framerate: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct OverlayHandle(pub u64);

/// The camera driver as seen by a capture session.
pub trait CameraDevice {
    /// Configures resolution and framerate and starts the preview.
    /// Returns the frame size the device actually delivers.
    fn start_preview(&mut self, settings: &CaptureSettings) -> Result<FrameSize>;
    fn stop_preview(&mut self) -> Result<()>;

    fn add_overlay(&mut self, overlay: Overlay) -> Result<OverlayHandle>;
    fn remove_overlay(&mut self, handle: OverlayHandle) -> Result<()>;

    fn start_recording(&mut self, settings: &CaptureSettings, path: &Path) -> Result<()>;
    fn stop_recording(&mut self) -> Result<()>;

    /// Whether frames are still flowing to the preview. Can drop to false
    /// on its own when the driver goes away.
    fn is_previewing(&self) -> bool;

    /// Whether a recording sink is still open. Can drop to false on its own
    /// when a write fails.
    fn is_recording(&self) -> bool;

    /// Latest preview frame since the last call, if any.
    fn take_frame(&mut self) -> Option<Arc<RgbImage>>;

    /// Asynchronous driver failure since the last call, if any.
    fn take_error(&mut self) -> Option<String> {
        None
    }
}

// --- Message from Camera Thread to UI Thread ---
#[derive(Debug)]
pub enum CameraThreadMsg {
    Frame(Arc<RgbImage>),
}

/// State the capture thread reads every frame.
#[derive(Default)]
struct StreamShared {
    preview: AtomicBool,
    overlays: Mutex<Vec<(OverlayHandle, Arc<Overlay>)>>,
    sink: Mutex<Option<MjpegSink>>,
    /// Failure raised on the capture thread, kept until the UI reads it.
    failure: Mutex<Option<String>>,
}

impl StreamShared {
    fn raise(&self, message: String) {
        *lock(&self.failure) = Some(message);
    }
}

struct Stream {
    handle: JoinHandle<()>,
    stop_signal: Arc<AtomicBool>,
    frame_rx: Receiver<CameraThreadMsg>,
    frame_size: FrameSize,
}

/// Camera backed by nokhwa. Capture runs on its own thread while either the
/// preview or a recording needs frames.
pub struct NokhwaCamera {
    shared: Arc<StreamShared>,
    stream: Option<Stream>,
    /// Capture thread that missed the startup deadline; must finish before
    /// another one may open the device.
    stalled_startup: Option<JoinHandle<()>>,
    next_overlay: u64,
    jpeg_quality: u8,
    last_error: Option<String>,
    ctx: egui::Context,
}

impl NokhwaCamera {
    pub fn new(ctx: egui::Context, jpeg_quality: u8) -> Self {
        Self {
            shared: Arc::new(StreamShared::default()),
            stream: None,
            stalled_startup: None,
            next_overlay: 0,
            jpeg_quality,
            last_error: None,
            ctx,
        }
    }

    fn ensure_stream(&mut self, settings: &CaptureSettings) -> Result<FrameSize> {
        if let Some(stream) = &self.stream {
            return Ok(stream.frame_size);
        }
        self.reap_stalled_startup()?;

        info!("Spawning camera capture thread.");
        let (ready_tx, ready_rx) = bounded(1);
        let (frame_tx, frame_rx) = bounded(PREVIEW_QUEUE_DEPTH);
        let stop_signal = Arc::new(AtomicBool::new(false));

        let thread_settings = *settings;
        let thread_shared = self.shared.clone();
        let thread_stop = stop_signal.clone();
        let ctx = self.ctx.clone();
        let handle = thread::spawn(move || {
            camera_capture_loop(thread_settings, thread_shared, ready_tx, frame_tx, thread_stop, ctx);
        });

        match ready_rx.recv_timeout(STARTUP_TIMEOUT) {
            Ok(Ok(frame_size)) => {
                self.stream = Some(Stream {
                    handle,
                    stop_signal,
                    frame_rx,
                    frame_size,
                });
                Ok(frame_size)
            }
            Ok(Err(msg)) => {
                if let Err(e) = handle.join() {
                    error!("Camera thread panicked: {:?}", e);
                }
                Err(Error::Device(msg))
            }
            Err(RecvTimeoutError::Timeout) => {
                stop_signal.store(true, Ordering::Relaxed);
                self.stalled_startup = Some(handle);
                Err(Error::Device("Timed out waiting for the camera to start".to_string()))
            }
            Err(RecvTimeoutError::Disconnected) => {
                let _ = handle.join();
                Err(Error::Device("Camera thread exited during startup".to_string()))
            }
        }
    }

    /// Joins a capture thread left over from a timed-out start, or refuses
    /// while it still holds the device.
    fn reap_stalled_startup(&mut self) -> Result<()> {
        let Some(handle) = self.stalled_startup.take() else {
            return Ok(());
        };
        if !handle.is_finished() {
            self.stalled_startup = Some(handle);
            return Err(Error::Device(
                "Camera is still busy with a previous start attempt".to_string(),
            ));
        }
        if let Err(e) = handle.join() {
            error!("Stalled camera thread panicked: {:?}", e);
        }
        Ok(())
    }

    /// Clears preview and recording after the capture thread died, so the
    /// next start begins from a clean device.
    fn reset_after_disconnect(&mut self) {
        self.shared.preview.store(false, Ordering::Relaxed);
        if let Some(sink) = lock(&self.shared.sink).take() {
            if let Err(e) = sink.finish() {
                error!("Failed to flush recording: {}", e);
            }
        }
        self.stop_stream();
    }

    fn stop_stream_if_idle(&mut self) {
        let idle = !self.shared.preview.load(Ordering::Relaxed) && lock(&self.shared.sink).is_none();
        if idle {
            self.stop_stream();
        }
    }

    fn stop_stream(&mut self) {
        if let Some(stream) = self.stream.take() {
            info!("Stopping camera capture thread...");
            stream.stop_signal.store(true, Ordering::Relaxed);
            if let Err(e) = stream.handle.join() {
                error!("Error joining camera thread: {:?}", e);
            } else {
                info!("Camera thread joined successfully.");
            }
        }
    }
}

impl CameraDevice for NokhwaCamera {
    fn start_preview(&mut self, settings: &CaptureSettings) -> Result<FrameSize> {
        if self.shared.preview.load(Ordering::Relaxed) {
            return Err(Error::Device("Preview is already running".to_string()));
        }
        let frame_size = self.ensure_stream(settings)?;
        self.shared.preview.store(true, Ordering::Relaxed);
        info!("Preview started at {}x{}", frame_size.width, frame_size.height);
        Ok(frame_size)
    }

    fn stop_preview(&mut self) -> Result<()> {
        self.shared.preview.store(false, Ordering::Relaxed);
        self.stop_stream_if_idle();
        info!("Preview stopped.");
        Ok(())
    }

    fn add_overlay(&mut self, overlay: Overlay) -> Result<OverlayHandle> {
        let handle = OverlayHandle(self.next_overlay);
        self.next_overlay += 1;
        let mut overlays = lock(&self.shared.overlays);
        overlays.push((handle, Arc::new(overlay)));
        overlays.sort_by_key(|(_, o)| o.layer);
        debug!("Registered overlay {:?}", handle);
        Ok(handle)
    }

    fn remove_overlay(&mut self, handle: OverlayHandle) -> Result<()> {
        let mut overlays = lock(&self.shared.overlays);
        let before = overlays.len();
        overlays.retain(|(h, _)| *h != handle);
        if overlays.len() == before {
            return Err(Error::Device(format!("Unknown overlay {:?}", handle)));
        }
        debug!("Removed overlay {:?}", handle);
        Ok(())
    }

    fn start_recording(&mut self, settings: &CaptureSettings, path: &Path) -> Result<()> {
        if lock(&self.shared.sink).is_some() {
            return Err(Error::Device("Already recording".to_string()));
        }
        self.ensure_stream(settings)?;
        match MjpegSink::create(path, self.jpeg_quality) {
            Ok(sink) => {
                *lock(&self.shared.sink) = Some(sink);
                info!("Recording to {}", path.display());
                Ok(())
            }
            Err(e) => {
                self.stop_stream_if_idle();
                Err(Error::Io(e))
            }
        }
    }

    fn stop_recording(&mut self) -> Result<()> {
        let sink = lock(&self.shared.sink).take();
        let result = match sink {
            Some(sink) => match sink.finish() {
                Ok(frames) => {
                    info!("Recording stopped after {} frames.", frames);
                    Ok(())
                }
                Err(e) => Err(Error::Io(e)),
            },
            None => Ok(()),
        };
        self.stop_stream_if_idle();
        result
    }

    fn take_frame(&mut self) -> Option<Arc<RgbImage>> {
        let mut latest = None;
        let mut disconnected = false;
        if let Some(stream) = &self.stream {
            loop {
                match stream.frame_rx.try_recv() {
                    Ok(CameraThreadMsg::Frame(frame)) => latest = Some(frame),
                    Err(TryRecvError::Empty) => break,
                    Err(TryRecvError::Disconnected) => {
                        disconnected = true;
                        break;
                    }
                }
            }
        }
        if disconnected {
            error!("Camera thread disconnected!");
            self.last_error = Some("Camera thread disconnected unexpectedly.".to_string());
            self.reset_after_disconnect();
        }
        latest
    }

    fn is_previewing(&self) -> bool {
        self.shared.preview.load(Ordering::Relaxed)
    }

    fn is_recording(&self) -> bool {
        lock(&self.shared.sink).is_some()
    }

    fn take_error(&mut self) -> Option<String> {
        lock(&self.shared.failure).take().or_else(|| self.last_error.take())
    }
}

impl Drop for NokhwaCamera {
    fn drop(&mut self) {
        self.reset_after_disconnect();
        if let Err(e) = self.reap_stalled_startup() {
            warn!("Leaving camera thread behind: {}", e);
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn camera_capture_loop(
    settings: CaptureSettings,
    shared: Arc<StreamShared>,
    ready_tx: Sender<std::result::Result<FrameSize, String>>,
    frame_tx: Sender<CameraThreadMsg>,
    stop_signal: Arc<AtomicBool>,
    ctx: egui::Context,
) {
    info!("Camera capture loop started. Requesting YUYV format.");
    let requested_resolution =
        Resolution::new(settings.resolution.width, settings.resolution.height);
    let requested_cam_format =
        CameraFormat::new(requested_resolution, FrameFormat::YUYV, settings.framerate);
    let requested_format =
        RequestedFormat::new::<YuyvFormat>(RequestedFormatType::Closest(requested_cam_format));
    info!("Requested camera format: {:?}", requested_format);

    // --- Initialize Camera ---
    let mut camera = match Camera::new(CameraIndex::Index(settings.camera_index), requested_format) {
        Ok(cam) => {
            info!("Camera initialized successfully.");
            cam
        }
        Err(err) => {
            let error_msg = format!("Failed to open camera: {}", err);
            error!("{}", error_msg);
            let _ = ready_tx.send(Err(error_msg));
            return;
        }
    };

    let camera_format = camera.camera_format();
    info!("Actual camera format received: {:?}", camera_format);
    if let Err(err) = camera.open_stream() {
        let error_msg = format!("Failed to open stream: {}", err);
        error!("{}", error_msg);
        let _ = ready_tx.send(Err(error_msg));
        return;
    }
    info!("Camera stream opened successfully.");

    let resolution = camera_format.resolution();
    let frame_size = FrameSize {
        width: resolution.width(),
        height: resolution.height(),
    };
    if ready_tx.send(Ok(frame_size)).is_err() {
        warn!("Camera startup was abandoned by the caller.");
        stop_signal.store(true, Ordering::Relaxed);
    }

    // --- Frame Capture Loop ---
    while !stop_signal.load(Ordering::Relaxed) {
        match camera.frame() {
            Ok(frame) => match frame.decode_image::<RgbFormat>() {
                Ok(decoded_rgb_image) => {
                    if !deliver_frame(decoded_rgb_image, &shared, &frame_tx, &ctx) {
                        info!("Preview receiver disconnected. Stopping camera loop.");
                        break;
                    }
                }
                Err(err) => {
                    warn!("Failed to decode frame to RGB: {}", err);
                    thread::sleep(Duration::from_millis(50));
                }
            },
            Err(err) => match err {
                NokhwaError::ReadFrameError(msg) if msg.contains("Timeout") => {
                    warn!("Camera frame read timeout.");
                    thread::sleep(Duration::from_millis(100));
                }
                _ => {
                    let error_msg = format!("Failed to capture frame: {}", err);
                    error!("{}", error_msg);
                    shared.raise(error_msg);
                    ctx.request_repaint();
                    thread::sleep(Duration::from_secs(1));
                }
            },
        }
    }
    // --- Cleanup ---
    info!("Camera capture loop stopping signal received.");
    if let Err(e) = camera.stop_stream() {
        error!("Failed to stop camera stream cleanly: {}", e);
    }
    info!("Camera capture loop finished.");
}

/// Records the raw frame, then composites overlays for the preview.
/// Returns false once the preview receiver is gone.
fn deliver_frame(
    mut frame: RgbImage,
    shared: &StreamShared,
    frame_tx: &Sender<CameraThreadMsg>,
    ctx: &egui::Context,
) -> bool {
    {
        let mut sink = lock(&shared.sink);
        if let Some(active) = sink.as_mut() {
            if let Err(e) = active.write_frame(&frame) {
                let error_msg = format!("Recording stopped: {}", e);
                error!("{}", error_msg);
                *sink = None;
                shared.raise(error_msg);
                ctx.request_repaint();
            }
        }
    }

    if !shared.preview.load(Ordering::Relaxed) {
        return true;
    }
    for (_, overlay) in lock(&shared.overlays).iter() {
        overlay.composite_onto(&mut frame);
    }
    match frame_tx.try_send(CameraThreadMsg::Frame(Arc::new(frame))) {
        Ok(()) => {
            ctx.request_repaint();
            true
        }
        // UI is behind; drop this frame.
        Err(TrySendError::Full(_)) => true,
        Err(TrySendError::Disconnected(_)) => false,
    }
}
