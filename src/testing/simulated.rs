//! Scripted in-process camera backend
//!
//! Behaves like a callback-driven camera stack: every result is posted to
//! the context the caller supplied. Counters expose what the core did with
//! the hardware so tests can check resource discipline.

use super::synthetic_data::synthetic_jpeg;
use crate::errors::{CameraError, DeviceErrorCode};
use crate::orientation::ExifOrientation;
use crate::platform::{
    CallbackContext, CameraDevice, CameraProvider, CameraSession, CaptureCallback, CaptureEvent,
    DeviceStateCallback, DeviceStateEvent, DisplayProvider, EncoderSettings,
    ImageAvailableListener, ImageReader, OrientationSource, SessionStateCallback,
    SessionStateEvent, VideoEncoder,
};
use crate::storage::{MediaKind, MediaStorage};
use crate::types::{
    CaptureMetadata, CaptureRequest, CharacteristicsSnapshot, DeviceId, Image, PixelFormat,
    RequestTemplate, Rotation, Size, Surface, SurfaceKind,
};
use bytes::Bytes;
use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// How the next `open_camera` resolves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenBehavior {
    Succeed,
    Disconnect,
    Fail(DeviceErrorCode),
    /// Never call back until [`SimulatedProvider::complete_pending_open`].
    Hold,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigureBehavior {
    Succeed,
    Fail,
}

/// What a still-capture request produces.
#[derive(Debug, Clone, PartialEq)]
pub struct StillScript {
    /// Images delivered to the reader, in order, before the metadata.
    pub image_timestamps: Vec<i64>,
    pub image_format: PixelFormat,
    /// `None` never completes the request.
    pub metadata_timestamp: Option<i64>,
    /// Deliver a capture failure instead of metadata.
    pub failure: Option<String>,
}

impl StillScript {
    /// One image whose timestamp matches its metadata.
    pub fn matching(timestamp: i64) -> Self {
        Self {
            image_timestamps: vec![timestamp],
            image_format: PixelFormat::Jpeg,
            metadata_timestamp: Some(timestamp),
            failure: None,
        }
    }

    pub fn images(timestamps: &[i64], metadata_timestamp: i64) -> Self {
        Self {
            image_timestamps: timestamps.to_vec(),
            image_format: PixelFormat::Jpeg,
            metadata_timestamp: Some(metadata_timestamp),
            failure: None,
        }
    }

    pub fn with_format(mut self, format: PixelFormat) -> Self {
        self.image_format = format;
        self
    }

    pub fn failing(reason: &str) -> Self {
        Self {
            image_timestamps: vec![],
            image_format: PixelFormat::Jpeg,
            metadata_timestamp: None,
            failure: Some(reason.to_string()),
        }
    }
}

/// Counters shared by every simulated object of one provider.
#[derive(Debug, Default)]
pub struct SimulationStats {
    opens: AtomicUsize,
    device_closes: AtomicUsize,
    sessions_created: AtomicUsize,
    session_closes: AtomicUsize,
    still_requests: AtomicUsize,
    repeating_requests: AtomicUsize,
    images_acquired: AtomicUsize,
    images_released: AtomicUsize,
    last_repeating_template: Mutex<Option<RequestTemplate>>,
}

impl SimulationStats {
    pub fn opens(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    pub fn device_closes(&self) -> usize {
        self.device_closes.load(Ordering::SeqCst)
    }

    pub fn sessions_created(&self) -> usize {
        self.sessions_created.load(Ordering::SeqCst)
    }

    pub fn session_closes(&self) -> usize {
        self.session_closes.load(Ordering::SeqCst)
    }

    pub fn still_requests(&self) -> usize {
        self.still_requests.load(Ordering::SeqCst)
    }

    pub fn repeating_requests(&self) -> usize {
        self.repeating_requests.load(Ordering::SeqCst)
    }

    pub fn images_acquired(&self) -> usize {
        self.images_acquired.load(Ordering::SeqCst)
    }

    pub fn images_released(&self) -> usize {
        self.images_released.load(Ordering::SeqCst)
    }

    /// Buffers handed out and not yet given back.
    pub fn outstanding_images(&self) -> usize {
        self.images_acquired().saturating_sub(self.images_released())
    }

    pub fn last_repeating_template(&self) -> Option<RequestTemplate> {
        *lock(&self.last_repeating_template)
    }
}

struct Script {
    open: OpenBehavior,
    configure: ConfigureBehavior,
    stills: VecDeque<StillScript>,
}

struct HeldOpen {
    id: DeviceId,
    callback: Arc<DeviceStateCallback>,
    context: CallbackContext,
}

struct Shared {
    stats: Arc<SimulationStats>,
    script: Mutex<Script>,
    readers: Mutex<Vec<Arc<SimulatedImageReader>>>,
    next_timestamp: AtomicI64,
}

impl Shared {
    fn reader_for(&self, targets: &[Surface]) -> Option<Arc<SimulatedImageReader>> {
        lock(&self.readers)
            .iter()
            .find(|r| targets.iter().any(|t| t.id() == r.surface.id()))
            .cloned()
    }

    fn next_still(&self) -> StillScript {
        let scripted = lock(&self.script).stills.pop_front();
        scripted.unwrap_or_else(|| {
            StillScript::matching(self.next_timestamp.fetch_add(33_333_333, Ordering::SeqCst))
        })
    }
}

/// Camera subsystem backed by scripted behaviour.
pub struct SimulatedProvider {
    cameras: Vec<CharacteristicsSnapshot>,
    shared: Arc<Shared>,
    /// Device callbacks of opened (or held) devices, for later events
    callbacks: Mutex<Vec<HeldOpen>>,
    held: Mutex<Option<HeldOpen>>,
}

impl SimulatedProvider {
    pub fn new(cameras: Vec<CharacteristicsSnapshot>) -> Self {
        Self {
            cameras,
            shared: Arc::new(Shared {
                stats: Arc::new(SimulationStats::default()),
                script: Mutex::new(Script {
                    open: OpenBehavior::Succeed,
                    configure: ConfigureBehavior::Succeed,
                    stills: VecDeque::new(),
                }),
                readers: Mutex::new(Vec::new()),
                next_timestamp: AtomicI64::new(1_000_000),
            }),
            callbacks: Mutex::new(Vec::new()),
            held: Mutex::new(None),
        }
    }

    pub fn stats(&self) -> Arc<SimulationStats> {
        self.shared.stats.clone()
    }

    pub fn set_open_behavior(&self, behavior: OpenBehavior) {
        lock(&self.shared.script).open = behavior;
    }

    pub fn set_configure_behavior(&self, behavior: ConfigureBehavior) {
        lock(&self.shared.script).configure = behavior;
    }

    /// Queue the outcome of the next still capture. Unscripted captures
    /// deliver one matching image.
    pub fn script_still(&self, script: StillScript) {
        lock(&self.shared.script).stills.push_back(script);
    }

    /// Deliver the open held back by [`OpenBehavior::Hold`].
    pub fn complete_pending_open(&self) -> bool {
        let Some(held) = lock(&self.held).take() else {
            return false;
        };
        self.deliver_opened(held);
        true
    }

    /// Report a disconnect for every open of `id`.
    pub fn disconnect(&self, id: &str) {
        self.broadcast(id, || DeviceStateEvent::Disconnected);
    }

    /// Report a device error for every open of `id`.
    pub fn fail_device(&self, id: &str, code: DeviceErrorCode) {
        self.broadcast(id, move || DeviceStateEvent::Error(code));
    }

    /// Listeners currently installed across all readers.
    pub fn installed_listeners(&self) -> usize {
        lock(&self.shared.readers)
            .iter()
            .filter(|r| r.has_listener())
            .count()
    }

    /// Buffers produced but not yet acquired, across all readers.
    pub fn pending_images(&self) -> usize {
        lock(&self.shared.readers)
            .iter()
            .map(|r| r.pending())
            .sum()
    }

    fn broadcast(&self, id: &str, event: impl Fn() -> DeviceStateEvent + Send + Sync + 'static) {
        let callbacks = lock(&self.callbacks);
        let event = Arc::new(event);
        for held in callbacks.iter().filter(|h| h.id == id) {
            let callback = held.callback.clone();
            let event = event.clone();
            held.context.post(move || (callback.as_ref())(event()));
        }
    }

    fn deliver_opened(&self, held: HeldOpen) {
        let device: Arc<dyn CameraDevice> = Arc::new(SimulatedDevice {
            id: held.id.clone(),
            shared: self.shared.clone(),
            closed: AtomicBool::new(false),
        });
        let callback = held.callback.clone();
        held.context
            .post(move || (callback.as_ref())(DeviceStateEvent::Opened(device)));
        lock(&self.callbacks).push(held);
    }
}

impl CameraProvider for SimulatedProvider {
    fn camera_ids(&self) -> Result<Vec<DeviceId>, CameraError> {
        Ok(self.cameras.iter().map(|c| c.id.clone()).collect())
    }

    fn characteristics(&self, id: &str) -> Result<CharacteristicsSnapshot, CameraError> {
        self.cameras
            .iter()
            .find(|c| c.id == id)
            .cloned()
            .ok_or_else(|| CameraError::Backend(format!("unknown camera {}", id)))
    }

    fn open_camera(
        &self,
        id: &str,
        callback: DeviceStateCallback,
        context: &CallbackContext,
    ) -> Result<(), CameraError> {
        if !self.cameras.iter().any(|c| c.id == id) {
            return Err(CameraError::Backend(format!("unknown camera {}", id)));
        }
        self.shared.stats.opens.fetch_add(1, Ordering::SeqCst);

        let held = HeldOpen {
            id: id.to_string(),
            callback: Arc::new(callback),
            context: context.clone(),
        };
        let behavior = lock(&self.shared.script).open;
        match behavior {
            OpenBehavior::Succeed => self.deliver_opened(held),
            OpenBehavior::Disconnect => {
                let callback = held.callback;
                context.post(move || (callback.as_ref())(DeviceStateEvent::Disconnected));
            }
            OpenBehavior::Fail(code) => {
                let callback = held.callback;
                context.post(move || (callback.as_ref())(DeviceStateEvent::Error(code)));
            }
            OpenBehavior::Hold => *lock(&self.held) = Some(held),
        }
        Ok(())
    }

    fn create_image_reader(
        &self,
        size: Size,
        format: PixelFormat,
        max_images: usize,
    ) -> Result<Arc<dyn ImageReader>, CameraError> {
        let reader = Arc::new(SimulatedImageReader {
            surface: Surface::new(SurfaceKind::StillImage, size),
            format,
            max_images,
            stats: self.shared.stats.clone(),
            pending: Mutex::new(VecDeque::new()),
            listener: Mutex::new(None),
        });
        lock(&self.shared.readers).push(reader.clone());
        Ok(reader)
    }
}

pub struct SimulatedDevice {
    id: DeviceId,
    shared: Arc<Shared>,
    closed: AtomicBool,
}

impl CameraDevice for SimulatedDevice {
    fn id(&self) -> &str {
        &self.id
    }

    fn create_capture_session(
        &self,
        targets: Vec<Surface>,
        callback: SessionStateCallback,
        context: &CallbackContext,
    ) -> Result<(), CameraError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(CameraError::DeviceClosed);
        }
        let behavior = lock(&self.shared.script).configure;
        let event = match behavior {
            ConfigureBehavior::Succeed => {
                self.shared.stats.sessions_created.fetch_add(1, Ordering::SeqCst);
                SessionStateEvent::Configured(Arc::new(SimulatedSession {
                    targets,
                    shared: self.shared.clone(),
                    closed: AtomicBool::new(false),
                }))
            }
            ConfigureBehavior::Fail => SessionStateEvent::ConfigureFailed,
        };
        context.post(move || callback(event));
        Ok(())
    }

    fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.shared.stats.device_closes.fetch_add(1, Ordering::SeqCst);
        }
    }
}

pub struct SimulatedSession {
    targets: Vec<Surface>,
    shared: Arc<Shared>,
    closed: AtomicBool,
}

impl SimulatedSession {
    pub fn targets(&self) -> &[Surface] {
        &self.targets
    }
}

impl CameraSession for SimulatedSession {
    fn capture(
        &self,
        request: CaptureRequest,
        callback: CaptureCallback,
        context: &CallbackContext,
    ) -> Result<(), CameraError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(CameraError::SessionClosed);
        }
        self.shared.stats.still_requests.fetch_add(1, Ordering::SeqCst);

        let script = self.shared.next_still();
        let reader = self.shared.reader_for(&request.targets);
        let image_context = reader.as_ref().and_then(|r| r.listener_context());
        let completion_context = context.clone();

        let deliver = move || {
            if let Some(reader) = &reader {
                for &timestamp in &script.image_timestamps {
                    reader.produce(timestamp, script.image_format);
                }
            }
            let event = match (&script.failure, script.metadata_timestamp) {
                (Some(reason), _) => Some(CaptureEvent::Failed(reason.clone())),
                (None, Some(timestamp)) => Some(CaptureEvent::Completed(CaptureMetadata {
                    sensor_timestamp: timestamp,
                    frame_number: timestamp.unsigned_abs(),
                })),
                (None, None) => None,
            };
            if let Some(event) = event {
                completion_context.post(move || callback(event));
            }
        };

        // Images arrive on the listener's context ahead of the metadata
        match image_context {
            Some(image_context) => {
                image_context.post(deliver);
            }
            None => deliver(),
        }
        Ok(())
    }

    fn set_repeating_request(
        &self,
        request: CaptureRequest,
        _context: &CallbackContext,
    ) -> Result<(), CameraError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(CameraError::SessionClosed);
        }
        self.shared.stats.repeating_requests.fetch_add(1, Ordering::SeqCst);
        *lock(&self.shared.stats.last_repeating_template) = Some(request.template);
        Ok(())
    }

    fn stop_repeating(&self) -> Result<(), CameraError> {
        Ok(())
    }

    fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.shared.stats.session_closes.fetch_add(1, Ordering::SeqCst);
        }
    }
}

struct PendingBuffer {
    timestamp: i64,
    format: PixelFormat,
}

pub struct SimulatedImageReader {
    surface: Surface,
    format: PixelFormat,
    max_images: usize,
    stats: Arc<SimulationStats>,
    pending: Mutex<VecDeque<PendingBuffer>>,
    listener: Mutex<Option<(ImageAvailableListener, CallbackContext)>>,
}

impl SimulatedImageReader {
    pub fn has_listener(&self) -> bool {
        lock(&self.listener).is_some()
    }

    pub fn pending(&self) -> usize {
        lock(&self.pending).len()
    }

    fn listener_context(&self) -> Option<CallbackContext> {
        lock(&self.listener).as_ref().map(|(_, ctx)| ctx.clone())
    }

    /// Make a buffer available. Called on the listener's context, so the
    /// listener runs inline as the platform would invoke it there.
    fn produce(&self, timestamp: i64, format: PixelFormat) {
        {
            let mut pending = lock(&self.pending);
            if pending.len() >= self.max_images.max(1) {
                // Reader full: the producer drops its oldest unacquired buffer
                pending.pop_front();
            }
            pending.push_back(PendingBuffer { timestamp, format });
        }
        let listener = lock(&self.listener).as_ref().map(|(l, _)| l.clone());
        if let Some(listener) = listener {
            listener();
        }
    }
}

impl ImageReader for SimulatedImageReader {
    fn surface(&self) -> Surface {
        self.surface
    }

    fn image_format(&self) -> PixelFormat {
        self.format
    }

    fn acquire_next_image(&self) -> Option<Image> {
        let buffer = lock(&self.pending).pop_front()?;
        self.stats.images_acquired.fetch_add(1, Ordering::SeqCst);

        let size = self.surface.size;
        let planes = vec![Bytes::from(synthetic_jpeg(
            size.width.min(64),
            size.height.min(48),
            buffer.timestamp.unsigned_abs(),
        ))];
        let stats = self.stats.clone();
        Some(
            Image::new(buffer.timestamp, buffer.format, size, planes).with_release(move |_| {
                stats.images_released.fetch_add(1, Ordering::SeqCst);
            }),
        )
    }

    fn set_on_image_available(
        &self,
        listener: Option<ImageAvailableListener>,
        context: Option<&CallbackContext>,
    ) {
        let mut slot = lock(&self.listener);
        *slot = match (listener, context) {
            (Some(listener), Some(context)) => Some((listener, context.clone())),
            _ => None,
        };
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EncoderPhase {
    Idle,
    Configured,
    Prepared,
    Recording,
}

/// Recorder that tracks its lifecycle and can be told to fail.
pub struct SimulatedEncoder {
    phase: Mutex<EncoderPhase>,
    settings: Mutex<Option<EncoderSettings>>,
    fail_prepare: AtomicBool,
    fail_start: AtomicBool,
    starts: AtomicUsize,
    stops: AtomicUsize,
    resets: AtomicUsize,
}

impl Default for SimulatedEncoder {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulatedEncoder {
    pub fn new() -> Self {
        Self {
            phase: Mutex::new(EncoderPhase::Idle),
            settings: Mutex::new(None),
            fail_prepare: AtomicBool::new(false),
            fail_start: AtomicBool::new(false),
            starts: AtomicUsize::new(0),
            stops: AtomicUsize::new(0),
            resets: AtomicUsize::new(0),
        }
    }

    pub fn fail_prepare(&self, fail: bool) {
        self.fail_prepare.store(fail, Ordering::SeqCst);
    }

    pub fn fail_start(&self, fail: bool) {
        self.fail_start.store(fail, Ordering::SeqCst);
    }

    pub fn is_running(&self) -> bool {
        *lock(&self.phase) == EncoderPhase::Recording
    }

    pub fn last_settings(&self) -> Option<EncoderSettings> {
        lock(&self.settings).clone()
    }

    pub fn starts(&self) -> usize {
        self.starts.load(Ordering::SeqCst)
    }

    pub fn stops(&self) -> usize {
        self.stops.load(Ordering::SeqCst)
    }

    pub fn resets(&self) -> usize {
        self.resets.load(Ordering::SeqCst)
    }
}

impl VideoEncoder for SimulatedEncoder {
    fn configure(&self, settings: &EncoderSettings) -> Result<(), CameraError> {
        let mut phase = lock(&self.phase);
        if *phase != EncoderPhase::Idle {
            return Err(CameraError::InvalidState(format!("configure while {:?}", *phase)));
        }
        *lock(&self.settings) = Some(settings.clone());
        *phase = EncoderPhase::Configured;
        Ok(())
    }

    fn prepare(&self) -> Result<(), CameraError> {
        let mut phase = lock(&self.phase);
        if *phase != EncoderPhase::Configured {
            return Err(CameraError::InvalidState(format!("prepare while {:?}", *phase)));
        }
        if self.fail_prepare.load(Ordering::SeqCst) {
            return Err(CameraError::Io("output not writable".to_string()));
        }
        *phase = EncoderPhase::Prepared;
        Ok(())
    }

    fn surface(&self) -> Result<Surface, CameraError> {
        if *lock(&self.phase) == EncoderPhase::Idle {
            return Err(CameraError::InvalidState("encoder not prepared".to_string()));
        }
        let size = lock(&self.settings)
            .as_ref()
            .map(|s| s.size)
            .unwrap_or(Size::new(0, 0));
        Ok(Surface::new(SurfaceKind::Encoder, size))
    }

    fn start(&self) -> Result<(), CameraError> {
        let mut phase = lock(&self.phase);
        if *phase != EncoderPhase::Prepared {
            return Err(CameraError::InvalidState(format!("start while {:?}", *phase)));
        }
        if self.fail_start.load(Ordering::SeqCst) {
            return Err(CameraError::EncoderError("codec unavailable".to_string()));
        }
        self.starts.fetch_add(1, Ordering::SeqCst);
        *phase = EncoderPhase::Recording;
        Ok(())
    }

    fn stop(&self) -> Result<(), CameraError> {
        let mut phase = lock(&self.phase);
        if *phase != EncoderPhase::Recording {
            return Err(CameraError::InvalidState(format!("stop while {:?}", *phase)));
        }
        self.stops.fetch_add(1, Ordering::SeqCst);
        *phase = EncoderPhase::Prepared;
        Ok(())
    }

    fn reset(&self) {
        self.resets.fetch_add(1, Ordering::SeqCst);
        *lock(&self.phase) = EncoderPhase::Idle;
        *lock(&self.settings) = None;
    }
}

/// Display with a fixed rotation and size.
#[derive(Debug, Clone, Copy)]
pub struct StaticDisplay {
    pub rotation: Rotation,
    pub size: Size,
}

impl StaticDisplay {
    pub fn new(rotation: Rotation, size: Size) -> Self {
        Self { rotation, size }
    }

    /// Portrait phone at natural rotation with a 2400x1080 panel.
    pub fn phone() -> Self {
        Self::new(Rotation::Deg0, Size::new(1080, 2400))
    }
}

impl DisplayProvider for StaticDisplay {
    fn rotation(&self) -> Rotation {
        self.rotation
    }

    fn display_size(&self) -> Size {
        self.size
    }

    fn preview_surface(&self, size: Size) -> Result<Surface, CameraError> {
        Ok(Surface::new(SurfaceKind::Preview, size))
    }
}

/// Orientation source that always reports the same sample.
#[derive(Debug, Clone, Copy)]
pub struct FixedOrientation(pub Option<u32>);

impl OrientationSource for FixedOrientation {
    fn relative_rotation(&self) -> Option<u32> {
        self.0
    }
}

/// In-memory media storage.
#[derive(Default)]
pub struct MemoryStorage {
    files: Mutex<HashMap<PathBuf, Vec<u8>>>,
    orientations: Mutex<HashMap<PathBuf, ExifOrientation>>,
    counter: AtomicUsize,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contents(&self, path: &Path) -> Option<Vec<u8>> {
        lock(&self.files).get(path).cloned()
    }

    pub fn orientation(&self, path: &Path) -> Option<ExifOrientation> {
        lock(&self.orientations).get(path).copied()
    }

    pub fn file_count(&self) -> usize {
        lock(&self.files).len()
    }
}

impl MediaStorage for MemoryStorage {
    fn create_file(&self, kind: MediaKind) -> Result<PathBuf, CameraError> {
        let n = self.counter.fetch_add(1, Ordering::SeqCst);
        let prefix = match kind {
            MediaKind::Photo => "IMG",
            MediaKind::Video => "VID",
        };
        let path = PathBuf::from(format!("memory/{}_{:04}.{}", prefix, n, kind.extension()));
        lock(&self.files).insert(path.clone(), Vec::new());
        Ok(path)
    }

    fn write_bytes(&self, path: &Path, bytes: &[u8]) -> Result<(), CameraError> {
        match lock(&self.files).get_mut(path) {
            Some(file) => {
                *file = bytes.to_vec();
                Ok(())
            }
            None => Err(CameraError::Io(format!("{} was never created", path.display()))),
        }
    }

    fn set_exif_orientation(
        &self,
        path: &Path,
        orientation: ExifOrientation,
    ) -> Result<(), CameraError> {
        if !lock(&self.files).contains_key(path) {
            return Err(CameraError::Io(format!("{} was never created", path.display())));
        }
        lock(&self.orientations).insert(path.to_path_buf(), orientation);
        Ok(())
    }
}
