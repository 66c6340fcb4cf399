// src/session.rs
use std::{path::Path, sync::Arc};

use image::RgbImage;
use log::{info, warn};

use crate::{
    camera::{CameraDevice, CaptureSettings, FrameSize, OverlayHandle, PreviewWindow},
    error::{Error, Result},
    overlay::Overlay,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OverlayStyle {
    pub alpha: u8,
    pub layer: u8,
}

struct ActivePreview {
    window: PreviewWindow,
    frame_size: FrameSize,
}

/// Preview, overlay and recording state for the one camera.
///
/// Each capability flips between off and on through its toggle, or goes off
/// when the device drops it (seen by `poll_device`). A failed toggle leaves
/// every flag as it was. The overlay can only be on while the preview is.
pub struct CaptureSession<D: CameraDevice> {
    device: D,
    settings: CaptureSettings,
    overlay_style: OverlayStyle,
    preview: Option<ActivePreview>,
    overlay: Option<OverlayHandle>,
    recording: bool,
}

impl<D: CameraDevice> CaptureSession<D> {
    pub fn new(device: D, settings: CaptureSettings, overlay_style: OverlayStyle) -> Self {
        Self {
            device,
            settings,
            overlay_style,
            preview: None,
            overlay: None,
            recording: false,
        }
    }

    pub fn preview_enabled(&self) -> bool {
        self.preview.is_some()
    }

    pub fn overlay_enabled(&self) -> bool {
        self.overlay.is_some()
    }

    pub fn recording_enabled(&self) -> bool {
        self.recording
    }

    pub fn preview_geometry(&self) -> Option<PreviewWindow> {
        self.preview.as_ref().map(|p| p.window)
    }

    /// Starts the preview into `window`, or stops it if running.
    /// Returns whether the preview is now on.
    pub fn toggle_preview(&mut self, window: PreviewWindow) -> Result<bool> {
        if self.preview.is_none() {
            let frame_size = self.device.start_preview(&self.settings)?;
            self.preview = Some(ActivePreview { window, frame_size });
            info!("Camera preview on ({:?}).", window);
            return Ok(true);
        }

        self.device.stop_preview()?;
        self.preview = None;
        self.release_overlay();
        info!("Camera preview off.");
        Ok(false)
    }

    /// Drops the overlay along with a preview that is already gone.
    fn release_overlay(&mut self) {
        if let Some(handle) = self.overlay.take() {
            if let Err(e) = self.device.remove_overlay(handle) {
                warn!("Failed to remove overlay {:?}: {}", handle, e);
            }
        }
    }

    /// Registers the crosshair above the preview, or removes it.
    /// Returns whether the overlay is now on.
    pub fn toggle_overlay(&mut self) -> Result<bool> {
        if let Some(handle) = self.overlay {
            self.device.remove_overlay(handle)?;
            self.overlay = None;
            info!("Overlay off.");
            return Ok(false);
        }

        self.overlay = Some(self.register_crosshair()?);
        info!("Overlay on.");
        Ok(true)
    }

    fn register_crosshair(&mut self) -> Result<OverlayHandle> {
        let Some(FrameSize { width, height }) = self.preview.as_ref().map(|p| p.frame_size) else {
            return Err(Error::Validation(
                "Turn the camera on before enabling the overlay".to_string(),
            ));
        };
        let crosshair = Overlay::crosshair(
            width,
            height,
            self.overlay_style.alpha,
            self.overlay_style.layer,
        );
        self.device.add_overlay(crosshair)
    }

    /// Stops an active recording, or starts one into `destination`.
    ///
    /// `None` (prompt dismissed) is a no-op when not recording.
    /// Returns whether recording is now on.
    pub fn toggle_recording(&mut self, destination: Option<&Path>) -> Result<bool> {
        if self.recording {
            self.device.stop_recording()?;
            self.recording = false;
            info!("Recording off.");
            return Ok(false);
        }

        let Some(path) = destination else {
            return Ok(false);
        };
        self.device.start_recording(&self.settings, path)?;
        self.recording = true;
        info!("Recording on ({}).", path.display());
        Ok(true)
    }

    /// Latest frame for the display label while the preview is on.
    pub fn take_frame(&mut self) -> Option<Arc<RgbImage>> {
        self.device.take_frame()
    }

    /// Returns the latest driver failure and turns off whatever the device
    /// stopped on its own since the last poll.
    pub fn poll_device(&mut self) -> Option<String> {
        let error = self.device.take_error();
        if self.recording && !self.device.is_recording() {
            self.recording = false;
            warn!("Recording ended by the device.");
        }
        if self.preview.is_some() && !self.device.is_previewing() {
            self.preview = None;
            self.release_overlay();
            warn!("Camera preview ended by the device.");
        }
        error
    }

    /// Releases overlay, recording and preview. Safe to call more than once.
    pub fn shutdown(&mut self) {
        self.release_overlay();
        if self.recording {
            self.recording = false;
            if let Err(e) = self.device.stop_recording() {
                warn!("Failed to stop recording on shutdown: {}", e);
            }
        }
        if self.preview.take().is_some() {
            if let Err(e) = self.device.stop_preview() {
                warn!("Failed to stop preview on shutdown: {}", e);
            }
        }
    }
}

impl<D: CameraDevice> Drop for CaptureSession<D> {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
pub(crate) mod mock {
    use std::{
        cell::RefCell,
        collections::HashMap,
        path::PathBuf,
        rc::Rc,
        sync::Arc,
    };

    use image::RgbImage;

    use super::*;

    /// Which device call should fail next.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub enum Fail {
        StartPreview,
        StopPreview,
        AddOverlay,
        RemoveOverlay,
        StartRecording,
        StopRecording,
    }

    #[derive(Default)]
    pub struct MockState {
        pub preview_starts: u32,
        pub previewing: bool,
        pub overlays: HashMap<OverlayHandle, Overlay>,
        pub recording_to: Option<PathBuf>,
        /// Calls to reject, each once, in any order.
        pub fail: Vec<Fail>,
        pub pending_error: Option<String>,
        pub next_handle: u64,
    }

    /// In-memory camera whose state the test keeps a handle to.
    #[derive(Clone)]
    pub struct MockCamera {
        pub state: Rc<RefCell<MockState>>,
        pub frame_size: FrameSize,
    }

    impl MockCamera {
        pub fn new() -> Self {
            Self {
                state: Rc::default(),
                frame_size: FrameSize {
                    width: 1280,
                    height: 720,
                },
            }
        }

        fn check(&self, op: Fail) -> Result<()> {
            let mut state = self.state.borrow_mut();
            if let Some(at) = state.fail.iter().position(|f| *f == op) {
                state.fail.remove(at);
                return Err(Error::Device(format!("{:?} rejected", op)));
            }
            Ok(())
        }
    }

    impl CameraDevice for MockCamera {
        fn start_preview(&mut self, _settings: &CaptureSettings) -> Result<FrameSize> {
            self.check(Fail::StartPreview)?;
            let mut state = self.state.borrow_mut();
            assert!(!state.previewing, "device started twice");
            state.previewing = true;
            state.preview_starts += 1;
            Ok(self.frame_size)
        }

        fn stop_preview(&mut self) -> Result<()> {
            self.check(Fail::StopPreview)?;
            self.state.borrow_mut().previewing = false;
            Ok(())
        }

        fn add_overlay(&mut self, overlay: Overlay) -> Result<OverlayHandle> {
            self.check(Fail::AddOverlay)?;
            let mut state = self.state.borrow_mut();
            let handle = OverlayHandle(state.next_handle);
            state.next_handle += 1;
            state.overlays.insert(handle, overlay);
            Ok(handle)
        }

        fn remove_overlay(&mut self, handle: OverlayHandle) -> Result<()> {
            self.check(Fail::RemoveOverlay)?;
            self.state
                .borrow_mut()
                .overlays
                .remove(&handle)
                .map(|_| ())
                .ok_or_else(|| Error::Device("unknown overlay".into()))
        }

        fn start_recording(&mut self, _settings: &CaptureSettings, path: &Path) -> Result<()> {
            self.check(Fail::StartRecording)?;
            self.state.borrow_mut().recording_to = Some(path.to_path_buf());
            Ok(())
        }

        fn stop_recording(&mut self) -> Result<()> {
            self.check(Fail::StopRecording)?;
            self.state.borrow_mut().recording_to = None;
            Ok(())
        }

        fn is_previewing(&self) -> bool {
            self.state.borrow().previewing
        }

        fn is_recording(&self) -> bool {
            self.state.borrow().recording_to.is_some()
        }

        fn take_frame(&mut self) -> Option<Arc<RgbImage>> {
            let previewing = self.state.borrow().previewing;
            previewing.then(|| Arc::new(RgbImage::new(self.frame_size.width, self.frame_size.height)))
        }

        fn take_error(&mut self) -> Option<String> {
            self.state.borrow_mut().pending_error.take()
        }
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::{
        mock::{Fail, MockCamera},
        *,
    };

    fn settings() -> CaptureSettings {
        CaptureSettings {
            camera_index: 0,
            resolution: FrameSize {
                width: 1280,
                height: 720,
            },
            framerate: 30,
        }
    }

    fn window() -> PreviewWindow {
        PreviewWindow::centered(1920.0, 1080.0, 1280, 1.5)
    }

    fn session() -> (CaptureSession<MockCamera>, MockCamera) {
        let camera = MockCamera::new();
        let style = OverlayStyle { alpha: 64, layer: 3 };
        (CaptureSession::new(camera.clone(), settings(), style), camera)
    }

    #[test]
    fn preview_state_follows_call_parity() {
        let (mut session, camera) = session();
        for n in 1..=7 {
            let on = session.toggle_preview(window()).unwrap();
            assert_eq!(on, n % 2 == 1);
            assert_eq!(session.preview_enabled(), n % 2 == 1);
            assert_eq!(camera.state.borrow().previewing, n % 2 == 1);
        }
        assert_eq!(camera.state.borrow().preview_starts, 4);
    }

    #[test]
    fn preview_stores_geometry() {
        let (mut session, _) = session();
        assert_eq!(session.preview_geometry(), None);
        session.toggle_preview(window()).unwrap();
        assert_eq!(session.preview_geometry(), Some(window()));
        session.toggle_preview(window()).unwrap();
        assert_eq!(session.preview_geometry(), None);
    }

    #[test]
    fn overlay_requires_preview() {
        let (mut session, camera) = session();
        let err = session.toggle_overlay().unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
        assert!(!session.overlay_enabled());
        assert!(camera.state.borrow().overlays.is_empty());

        // Still refused after a full preview cycle.
        session.toggle_preview(window()).unwrap();
        session.toggle_preview(window()).unwrap();
        assert!(session.toggle_overlay().is_err());
        assert!(!session.overlay_enabled());
    }

    #[test]
    fn overlay_registers_full_frame_crosshair() {
        let (mut session, camera) = session();
        session.toggle_preview(window()).unwrap();
        assert!(session.toggle_overlay().unwrap());

        {
            let state = camera.state.borrow();
            assert_eq!(state.overlays.len(), 1);
            let overlay = state.overlays.values().next().unwrap();
            assert_eq!(overlay.layer, 3);
            assert_eq!(overlay.image.dimensions(), (1280, 720));
            assert_eq!(overlay.image.get_pixel(640, 10)[3], 64);
            assert_eq!(overlay.image.get_pixel(10, 360)[3], 64);
        }

        assert!(!session.toggle_overlay().unwrap());
        assert!(camera.state.borrow().overlays.is_empty());
        assert!(!session.overlay_enabled());
    }

    #[test]
    fn stopping_preview_drops_overlay() {
        let (mut session, camera) = session();
        session.toggle_preview(window()).unwrap();
        session.toggle_overlay().unwrap();

        assert!(!session.toggle_preview(window()).unwrap());
        assert!(!session.overlay_enabled());
        assert!(camera.state.borrow().overlays.is_empty());
    }

    #[test]
    fn failed_preview_start_changes_nothing() {
        let (mut session, camera) = session();
        camera.state.borrow_mut().fail.push(Fail::StartPreview);
        assert!(matches!(session.toggle_preview(window()), Err(Error::Device(_))));
        assert!(!session.preview_enabled());

        // Next attempt goes through.
        assert!(session.toggle_preview(window()).unwrap());
    }

    #[test]
    fn failed_preview_stop_keeps_preview_and_overlay() {
        let (mut session, camera) = session();
        session.toggle_preview(window()).unwrap();
        session.toggle_overlay().unwrap();
        let registered: Vec<_> = camera.state.borrow().overlays.keys().copied().collect();

        // A second failure queued for re-registration must never be reached.
        camera
            .state
            .borrow_mut()
            .fail
            .extend([Fail::StopPreview, Fail::AddOverlay]);
        assert!(matches!(session.toggle_preview(window()), Err(Error::Device(_))));
        assert!(session.preview_enabled());
        assert!(session.overlay_enabled());
        assert!(camera.state.borrow().previewing);
        let still: Vec<_> = camera.state.borrow().overlays.keys().copied().collect();
        assert_eq!(still, registered);
        assert_eq!(camera.state.borrow().fail, vec![Fail::AddOverlay]);

        camera.state.borrow_mut().fail.clear();
        assert!(!session.toggle_preview(window()).unwrap());
        assert!(camera.state.borrow().overlays.is_empty());
    }

    #[test]
    fn overlay_goes_with_preview_even_if_removal_fails() {
        let (mut session, camera) = session();
        session.toggle_preview(window()).unwrap();
        session.toggle_overlay().unwrap();

        camera.state.borrow_mut().fail.push(Fail::RemoveOverlay);
        assert!(!session.toggle_preview(window()).unwrap());
        assert!(!session.preview_enabled());
        assert!(!session.overlay_enabled());
        assert!(!camera.state.borrow().previewing);
    }

    #[test]
    fn failed_overlay_calls_change_nothing() {
        let (mut session, camera) = session();
        session.toggle_preview(window()).unwrap();

        camera.state.borrow_mut().fail.push(Fail::AddOverlay);
        assert!(session.toggle_overlay().is_err());
        assert!(!session.overlay_enabled());

        session.toggle_overlay().unwrap();
        camera.state.borrow_mut().fail.push(Fail::RemoveOverlay);
        assert!(session.toggle_overlay().is_err());
        assert!(session.overlay_enabled());
    }

    #[test]
    fn recording_toggles_with_destination() {
        let (mut session, camera) = session();
        let path = PathBuf::from("/tmp/clip.mjpeg");

        assert!(!session.toggle_recording(None).unwrap());
        assert!(camera.state.borrow().recording_to.is_none());

        assert!(session.toggle_recording(Some(&path)).unwrap());
        assert_eq!(camera.state.borrow().recording_to, Some(path.clone()));
        assert!(session.recording_enabled());

        assert!(!session.toggle_recording(None).unwrap());
        assert!(camera.state.borrow().recording_to.is_none());
        assert!(!session.recording_enabled());
    }

    #[test]
    fn recording_is_independent_of_preview() {
        let (mut session, _) = session();
        let path = PathBuf::from("/tmp/clip.mjpeg");
        session.toggle_recording(Some(&path)).unwrap();
        session.toggle_preview(window()).unwrap();
        session.toggle_preview(window()).unwrap();
        assert!(session.recording_enabled());
    }

    #[test]
    fn failed_recording_calls_change_nothing() {
        let (mut session, camera) = session();
        let path = PathBuf::from("/nowhere/clip.mjpeg");

        camera.state.borrow_mut().fail.push(Fail::StartRecording);
        assert!(session.toggle_recording(Some(&path)).is_err());
        assert!(!session.recording_enabled());

        session.toggle_recording(Some(&path)).unwrap();
        camera.state.borrow_mut().fail.push(Fail::StopRecording);
        assert!(session.toggle_recording(None).is_err());
        assert!(session.recording_enabled());
    }

    #[test]
    fn poll_picks_up_recording_lost_by_device() {
        let (mut session, camera) = session();
        session
            .toggle_recording(Some(&PathBuf::from("/tmp/clip.mjpeg")))
            .unwrap();
        assert!(session.poll_device().is_none());
        assert!(session.recording_enabled());

        {
            let mut state = camera.state.borrow_mut();
            state.recording_to = None;
            state.pending_error = Some("Recording stopped: disk full".to_string());
        }
        assert_eq!(
            session.poll_device().as_deref(),
            Some("Recording stopped: disk full")
        );
        assert!(!session.recording_enabled());

        // Next toggle starts a fresh recording rather than stopping a dead one.
        assert!(session
            .toggle_recording(Some(&PathBuf::from("/tmp/next.mjpeg")))
            .unwrap());
    }

    #[test]
    fn poll_picks_up_preview_lost_by_device() {
        let (mut session, camera) = session();
        session.toggle_preview(window()).unwrap();
        session.toggle_overlay().unwrap();

        camera.state.borrow_mut().previewing = false;
        session.poll_device();
        assert!(!session.preview_enabled());
        assert!(!session.overlay_enabled());
        assert!(camera.state.borrow().overlays.is_empty());

        assert!(session.toggle_preview(window()).unwrap());
    }

    #[test]
    fn frames_flow_only_while_previewing() {
        let (mut session, _) = session();
        assert!(session.take_frame().is_none());
        session.toggle_preview(window()).unwrap();
        assert_eq!(session.take_frame().unwrap().dimensions(), (1280, 720));
    }

    #[test]
    fn drop_releases_everything() {
        let (mut session, camera) = session();
        session.toggle_preview(window()).unwrap();
        session.toggle_overlay().unwrap();
        session
            .toggle_recording(Some(&PathBuf::from("/tmp/clip.mjpeg")))
            .unwrap();
        drop(session);

        let state = camera.state.borrow();
        assert!(!state.previewing);
        assert!(state.overlays.is_empty());
        assert!(state.recording_to.is_none());
    }
}
