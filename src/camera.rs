//! Caller-facing camera controller
//!
//! Composes selection, size negotiation, the device/session manager, the
//! still-capture correlator and the recording controller behind one
//! handle. The presentation layer owns a `CameraController` instead of
//! inheriting camera behaviour.

use crate::capture::{save_photo, CaptureCorrelator, CombinedCaptureResult, IMAGE_BUFFER_SIZE};
use crate::config::CrabCaptureConfig;
use crate::device::{select_camera, CameraEvent, DeviceHandle, DeviceSessionManager, SessionHandle};
use crate::errors::CameraError;
use crate::orientation::resolve_rotation;
use crate::platform::{
    CallbackContext, CameraProvider, DisplayProvider, OrientationSource, VideoEncoder,
};
use crate::recording::{RecordingController, RecordingSession, RecordingState, StopOutcome};
use crate::sizes::{negotiate, DisplaySizePolicy, PreviewSizePolicy, SizeSelection};
use crate::storage::{FileStorage, MediaStorage};
use crate::types::{CharacteristicsSnapshot, DeviceId, LensFacing, PixelFormat, Size, Surface};
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use tokio::sync::broadcast;

/// Builder for [`CameraController`].
pub struct CameraControllerBuilder {
    provider: Option<Arc<dyn CameraProvider>>,
    display: Option<Arc<dyn DisplayProvider>>,
    orientation: Option<Arc<dyn OrientationSource>>,
    encoder: Option<Arc<dyn VideoEncoder>>,
    storage: Option<Arc<dyn MediaStorage>>,
    policy: Arc<dyn PreviewSizePolicy>,
    config: CrabCaptureConfig,
}

impl Default for CameraControllerBuilder {
    fn default() -> Self {
        Self {
            provider: None,
            display: None,
            orientation: None,
            encoder: None,
            storage: None,
            policy: Arc::new(DisplaySizePolicy),
            config: CrabCaptureConfig::default(),
        }
    }
}

impl CameraControllerBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn provider(mut self, provider: Arc<dyn CameraProvider>) -> Self {
        self.provider = Some(provider);
        self
    }

    pub fn display(mut self, display: Arc<dyn DisplayProvider>) -> Self {
        self.display = Some(display);
        self
    }

    pub fn orientation_source(mut self, source: Arc<dyn OrientationSource>) -> Self {
        self.orientation = Some(source);
        self
    }

    pub fn encoder(mut self, encoder: Arc<dyn VideoEncoder>) -> Self {
        self.encoder = Some(encoder);
        self
    }

    /// Defaults to [`FileStorage`] over the configured output directory.
    pub fn storage(mut self, storage: Arc<dyn MediaStorage>) -> Self {
        self.storage = Some(storage);
        self
    }

    pub fn preview_policy(mut self, policy: Arc<dyn PreviewSizePolicy>) -> Self {
        self.policy = policy;
        self
    }

    pub fn config(mut self, config: CrabCaptureConfig) -> Self {
        self.config = config;
        self
    }

    /// Validate the composition and start the callback contexts.
    pub fn build(self) -> Result<CameraController, CameraError> {
        self.config.validate().map_err(CameraError::Config)?;

        let provider = self
            .provider
            .ok_or_else(|| CameraError::Config("a camera provider is required".to_string()))?;
        let display = self
            .display
            .ok_or_else(|| CameraError::Config("a display provider is required".to_string()))?;
        let storage = self
            .storage
            .unwrap_or_else(|| Arc::new(FileStorage::from_config(&self.config.storage)));

        let recorder = if self.config.features.video_recording {
            let encoder = self.encoder.ok_or_else(|| {
                CameraError::Config("video recording is enabled but no encoder was given".to_string())
            })?;
            Some(Arc::new(
                RecordingController::new(encoder, storage.clone())
                    .with_bitrate(self.config.recording.bitrate),
            ))
        } else {
            None
        };

        let ops = CallbackContext::spawn("ops")?;
        let images = CallbackContext::spawn("images")?;

        log::info!(
            "Camera controller ready (still: {}, video: {})",
            self.config.features.still_capture,
            self.config.features.video_recording
        );

        let manager = DeviceSessionManager::new(provider.clone(), ops);
        let preview = Arc::new(Mutex::new(None));
        manager.on_teardown(teardown_on_loss(
            Arc::downgrade(&preview),
            recorder.as_ref().map(Arc::downgrade),
        ));

        Ok(CameraController {
            manager,
            provider,
            display,
            orientation: self.orientation,
            storage,
            policy: self.policy,
            config: self.config,
            image_context: images,
            recorder,
            preview,
            activity: Mutex::new(None),
        })
    }
}

/// Drop the preview built on a lost device, end the still capture on it
/// and stop the encoder it was feeding.
fn teardown_on_loss(
    preview: Weak<Mutex<Option<PreviewState>>>,
    recorder: Option<Weak<RecordingController>>,
) -> impl Fn(&DeviceHandle) + Send + Sync + 'static {
    move |device| {
        let Some(preview) = preview.upgrade() else {
            return;
        };
        let lost = {
            let mut slot = preview.lock().unwrap_or_else(PoisonError::into_inner);
            match slot.as_ref() {
                Some(state) if state.device.generation() == device.generation() => slot.take(),
                _ => None,
            }
        };
        let Some(lost) = lost else {
            return;
        };

        log::warn!("Camera {} lost; tearing down preview", device.id());
        if let Some(correlator) = &lost.correlator {
            correlator.abort();
        }
        if let Some(recorder) = recorder.as_ref().and_then(Weak::upgrade) {
            recorder.abandon();
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Activity {
    Capture,
    RecordingStart,
}

/// Claims the controller for one still capture or one recording start.
struct ActivityGuard<'a> {
    slot: &'a Mutex<Option<Activity>>,
}

impl<'a> ActivityGuard<'a> {
    fn claim(slot: &'a Mutex<Option<Activity>>, activity: Activity) -> Result<Self, CameraError> {
        let mut current = slot.lock().unwrap_or_else(PoisonError::into_inner);
        match *current {
            Some(Activity::Capture) => Err(CameraError::CaptureInProgress),
            Some(Activity::RecordingStart) => Err(CameraError::InvalidState(
                "recording is starting".to_string(),
            )),
            None => {
                *current = Some(activity);
                Ok(Self { slot })
            }
        }
    }
}

impl Drop for ActivityGuard<'_> {
    fn drop(&mut self) {
        *self.slot.lock().unwrap_or_else(PoisonError::into_inner) = None;
    }
}

#[derive(Clone)]
struct PreviewState {
    device: DeviceHandle,
    characteristics: CharacteristicsSnapshot,
    sizes: SizeSelection,
    preview_surface: Surface,
    targets: Vec<Surface>,
    session: SessionHandle,
    correlator: Option<Arc<CaptureCorrelator>>,
}

pub struct CameraController {
    manager: DeviceSessionManager,
    provider: Arc<dyn CameraProvider>,
    display: Arc<dyn DisplayProvider>,
    orientation: Option<Arc<dyn OrientationSource>>,
    storage: Arc<dyn MediaStorage>,
    policy: Arc<dyn PreviewSizePolicy>,
    config: CrabCaptureConfig,
    image_context: CallbackContext,
    recorder: Option<Arc<RecordingController>>,
    preview: Arc<Mutex<Option<PreviewState>>>,
    activity: Mutex<Option<Activity>>,
}

impl CameraController {
    pub fn builder() -> CameraControllerBuilder {
        CameraControllerBuilder::new()
    }

    fn preview_lock(&self) -> MutexGuard<'_, Option<PreviewState>> {
        self.preview.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn current_preview(&self) -> Result<PreviewState, CameraError> {
        self.preview_lock()
            .clone()
            .ok_or_else(|| CameraError::InvalidState("preview is not open".to_string()))
    }

    pub fn config(&self) -> &CrabCaptureConfig {
        &self.config
    }

    pub fn manager(&self) -> &DeviceSessionManager {
        &self.manager
    }

    /// Device lifecycle events, including disconnects.
    pub fn subscribe(&self) -> broadcast::Receiver<CameraEvent> {
        self.manager.subscribe()
    }

    /// Sizes negotiated for the open camera.
    pub fn sizes(&self) -> Option<SizeSelection> {
        self.preview_lock().as_ref().map(|p| p.sizes)
    }

    pub fn characteristics(&self) -> Option<CharacteristicsSnapshot> {
        self.preview_lock().as_ref().map(|p| p.characteristics.clone())
    }

    pub fn camera_id(&self) -> Option<DeviceId> {
        self.preview_lock().as_ref().map(|p| p.device.id().to_string())
    }

    pub fn recording_state(&self) -> RecordingState {
        self.recorder
            .as_ref()
            .map_or(RecordingState::Idle, |recorder| recorder.state())
    }

    pub fn select_camera(&self, facing: LensFacing) -> Result<DeviceId, CameraError> {
        select_camera(self.provider.as_ref(), facing)
    }

    /// Open the camera facing the configured default direction.
    pub async fn open_default_preview(&self) -> Result<SizeSelection, CameraError> {
        let id = self.select_camera(self.config.camera.default_facing)?;
        self.open_preview(&id).await
    }

    /// Open `camera_id`, negotiate sizes for the current display and start
    /// the live preview. Replaces any preview already open.
    pub async fn open_preview(&self, camera_id: &str) -> Result<SizeSelection, CameraError> {
        if self.recording_state() != RecordingState::Idle {
            return Err(CameraError::InvalidState("recording in progress".to_string()));
        }

        let characteristics = self.provider.characteristics(camera_id)?;
        let sizes = negotiate(
            self.policy.as_ref(),
            &characteristics,
            self.display.display_size(),
            self.config.features.still_capture,
            self.config.features.video_recording,
        )?;

        self.preview_lock().take();
        let device = self.manager.open(camera_id).await?;

        match self.start_preview(device, characteristics, sizes).await {
            Ok(state) => {
                log::info!(
                    "Preview open on camera {} at {}",
                    state.device.id(),
                    state.sizes.preview
                );
                *self.preview_lock() = Some(state);
                Ok(sizes)
            }
            Err(e) => {
                log::error!("Failed to start preview on camera {}: {}", camera_id, e);
                self.manager.close().await;
                Err(e)
            }
        }
    }

    async fn start_preview(
        &self,
        device: DeviceHandle,
        characteristics: CharacteristicsSnapshot,
        sizes: SizeSelection,
    ) -> Result<PreviewState, CameraError> {
        let preview_surface = self.display.preview_surface(sizes.preview)?;
        let mut targets = vec![preview_surface];

        let correlator = match sizes.capture {
            Some(capture) => {
                let reader =
                    self.provider
                        .create_image_reader(capture, PixelFormat::Jpeg, IMAGE_BUFFER_SIZE)?;
                targets.push(reader.surface());
                let correlator = CaptureCorrelator::new(
                    reader,
                    self.image_context.clone(),
                    self.manager.operations_context().clone(),
                    characteristics.clone(),
                    self.display.clone(),
                )
                .with_orientation_source(self.orientation.clone())
                .with_timeout(self.config.camera.capture_timeout());
                Some(Arc::new(correlator))
            }
            None => None,
        };

        let session = self.manager.create_session(&device, targets.clone()).await?;
        self.manager
            .start_repeating_preview(&session, &[preview_surface])?;

        Ok(PreviewState {
            device,
            characteristics,
            sizes,
            preview_surface,
            targets,
            session,
            correlator,
        })
    }

    /// Stop any recording and close the camera. Safe to call repeatedly.
    pub async fn close_preview(&self) {
        if let Some(recorder) = &self.recorder {
            if let Err(e) = recorder.stop() {
                log::warn!("Error stopping recording on close: {}", e);
            }
        }
        self.preview_lock().take();
        self.manager.close().await;
    }

    /// Capture one still image. The caller owns the returned buffer.
    pub async fn capture_still(&self) -> Result<CombinedCaptureResult, CameraError> {
        if !self.config.features.still_capture {
            return Err(CameraError::Unsupported("still capture is disabled".to_string()));
        }
        let _capture = ActivityGuard::claim(&self.activity, Activity::Capture)?;
        if self.recording_state() != RecordingState::Idle {
            return Err(CameraError::InvalidState("recording in progress".to_string()));
        }

        let preview = self.current_preview()?;
        let correlator = preview
            .correlator
            .ok_or_else(|| CameraError::Unsupported("no still output configured".to_string()))?;
        correlator.capture_still(&preview.session).await
    }

    /// Capture, save with its EXIF orientation, and release the buffer.
    pub async fn capture_photo(&self) -> Result<PathBuf, CameraError> {
        let result = self.capture_still().await?;
        let saved = save_photo(&result, self.storage.as_ref());
        result.close();
        saved
    }

    /// Start recording at `fps` and `size` with the live (or fallback)
    /// orientation as playback hint.
    pub async fn start_recording(
        &self,
        fps: u32,
        size: Size,
    ) -> Result<RecordingSession, CameraError> {
        let recorder = self
            .recorder
            .as_ref()
            .ok_or_else(|| CameraError::Unsupported("video recording is disabled".to_string()))?;
        let _starting = ActivityGuard::claim(&self.activity, Activity::RecordingStart)?;
        let preview = self.current_preview()?;

        let rotation = resolve_rotation(
            self.orientation.as_deref(),
            self.display.rotation(),
            &preview.characteristics,
        );
        let session = recorder.configure(fps, size, rotation)?;

        if let Err(e) = recorder
            .start(&self.manager, &preview.device, preview.preview_surface)
            .await
        {
            if let Err(restore_err) = self.restore_preview().await {
                log::warn!("Could not restore preview: {}", restore_err);
            }
            return Err(e);
        }
        Ok(session)
    }

    /// Start recording with the negotiated record size and frame rate.
    pub async fn start_recording_default(&self) -> Result<RecordingSession, CameraError> {
        let sizes = self
            .sizes()
            .ok_or_else(|| CameraError::InvalidState("preview is not open".to_string()))?;
        let size = sizes
            .record
            .ok_or_else(|| CameraError::Unsupported("no record output negotiated".to_string()))?;
        self.start_recording(sizes.record_fps, size).await
    }

    /// Stop recording and bring the preview back. Stopping while idle is
    /// reported as [`StopOutcome::NotRecording`]. The stop result is
    /// returned even when the preview cannot be restored.
    pub async fn stop_recording(&self) -> Result<StopOutcome, CameraError> {
        let Some(recorder) = &self.recorder else {
            log::warn!("stop_recording() called with video recording disabled");
            return Ok(StopOutcome::NotRecording);
        };

        let stopped = recorder.stop();
        if matches!(stopped, Ok(StopOutcome::NotRecording)) {
            return stopped;
        }

        if let Err(e) = self.restore_preview().await {
            log::warn!("Recording stopped but preview was not restored: {}", e);
        }
        stopped
    }

    /// Recreate the preview session on the open device and restart the
    /// repeating preview.
    async fn restore_preview(&self) -> Result<(), CameraError> {
        let preview = self.current_preview()?;
        let session = self
            .manager
            .create_session(&preview.device, preview.targets.clone())
            .await?;
        self.manager
            .start_repeating_preview(&session, &[preview.preview_surface])?;

        if let Some(state) = self.preview_lock().as_mut() {
            if state.device.id() == preview.device.id() {
                state.session = session;
            }
        }
        log::debug!("Preview restored on camera {}", preview.device.id());
        Ok(())
    }
}
