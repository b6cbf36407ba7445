//! Device and capture-session lifecycle
//!
//! The manager owns at most one open device and at most one active session
//! on it. Open and configure are single-flight; both suspend the caller
//! until the hardware callback lands on the operations context. Every
//! device and session handed out is closed exactly once, on the
//! operations context.

use super::bridge::{result_slot, ResultSlot};
use crate::errors::CameraError;
use crate::platform::{
    CallbackContext, CameraDevice, CameraProvider, CameraSession, CaptureCallback,
    DeviceStateCallback, DeviceStateEvent, SessionStateCallback, SessionStateEvent,
};
use crate::errors::DeviceErrorCode;
use crate::types::{AfMode, CaptureRequest, DeviceId, RequestTemplate, Surface};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use tokio::sync::broadcast;

const EVENT_CAPACITY: usize = 16;

/// Runs on the operations context after a device callback has closed the
/// current device and its session.
pub type TeardownHook = Box<dyn Fn(&DeviceHandle) + Send + Sync>;

/// Lifecycle notifications for whoever presents the camera.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CameraEvent {
    Opened(DeviceId),
    /// Fatal to the current consumer; the device and its session are
    /// already torn down when this is observed.
    Disconnected(DeviceId),
    DeviceError { id: DeviceId, code: DeviceErrorCode },
    Closed(DeviceId),
}

/// Session lifecycle as seen by callers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Configuring,
    Active,
    Closed,
}

struct DeviceInner {
    id: DeviceId,
    generation: u64,
    device: Arc<dyn CameraDevice>,
    closed: AtomicBool,
}

/// One open physical camera.
#[derive(Clone)]
pub struct DeviceHandle {
    inner: Arc<DeviceInner>,
}

impl DeviceHandle {
    fn new(id: DeviceId, generation: u64, device: Arc<dyn CameraDevice>) -> Self {
        Self {
            inner: Arc::new(DeviceInner {
                id,
                generation,
                device,
                closed: AtomicBool::new(false),
            }),
        }
    }

    pub fn id(&self) -> &str {
        &self.inner.id
    }

    /// False once closed, disconnected or failed.
    pub fn is_open(&self) -> bool {
        !self.inner.closed.load(Ordering::SeqCst)
    }

    pub(crate) fn generation(&self) -> u64 {
        self.inner.generation
    }

    fn raw(&self) -> &Arc<dyn CameraDevice> {
        &self.inner.device
    }

    /// Close the hardware device unless someone already did.
    fn close_now(&self) {
        if !self.inner.closed.swap(true, Ordering::SeqCst) {
            self.inner.device.close();
        }
    }
}

impl std::fmt::Debug for DeviceHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceHandle")
            .field("id", &self.inner.id)
            .field("open", &self.is_open())
            .finish()
    }
}

struct SessionInner {
    id: u64,
    device_id: DeviceId,
    session: Arc<dyn CameraSession>,
    targets: Vec<Surface>,
    closed: AtomicBool,
}

/// A configured session bound to one device and one set of targets.
#[derive(Clone)]
pub struct SessionHandle {
    inner: Arc<SessionInner>,
}

impl SessionHandle {
    fn new(
        id: u64,
        device_id: DeviceId,
        session: Arc<dyn CameraSession>,
        targets: Vec<Surface>,
    ) -> Self {
        Self {
            inner: Arc::new(SessionInner {
                id,
                device_id,
                session,
                targets,
                closed: AtomicBool::new(false),
            }),
        }
    }

    pub fn id(&self) -> u64 {
        self.inner.id
    }

    pub fn device_id(&self) -> &str {
        &self.inner.device_id
    }

    pub fn targets(&self) -> &[Surface] {
        &self.inner.targets
    }

    pub fn state(&self) -> SessionState {
        if self.inner.closed.load(Ordering::SeqCst) {
            SessionState::Closed
        } else {
            SessionState::Active
        }
    }

    pub fn is_active(&self) -> bool {
        self.state() == SessionState::Active
    }

    /// Submit a one-shot request; its result arrives on `context`.
    pub fn capture(
        &self,
        request: CaptureRequest,
        callback: CaptureCallback,
        context: &CallbackContext,
    ) -> Result<(), CameraError> {
        if !self.is_active() {
            return Err(CameraError::SessionClosed);
        }
        self.inner.session.capture(request, callback, context)
    }

    fn close_now(&self) {
        if !self.inner.closed.swap(true, Ordering::SeqCst) {
            let _ = self.inner.session.stop_repeating();
            self.inner.session.close();
        }
    }
}

impl std::fmt::Debug for SessionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionHandle")
            .field("id", &self.inner.id)
            .field("device", &self.inner.device_id)
            .field("state", &self.state())
            .finish()
    }
}

#[derive(Default)]
struct ManagerState {
    opening: bool,
    configuring: bool,
    device: Option<DeviceHandle>,
    session: Option<SessionHandle>,
}

struct Inner {
    provider: Arc<dyn CameraProvider>,
    ops: CallbackContext,
    state: Mutex<ManagerState>,
    events: broadcast::Sender<CameraEvent>,
    teardown_hooks: Mutex<Vec<TeardownHook>>,
    next_generation: AtomicU64,
    next_session: AtomicU64,
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, ManagerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn emit(&self, event: CameraEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }

    /// Tear down the device of `generation` (and its session) if it is
    /// still current. Called from device callbacks on the operations
    /// context.
    fn invalidate(&self, generation: u64, event: CameraEvent) {
        let (session, device) = {
            let mut state = self.lock();
            match &state.device {
                Some(device) if device.generation() == generation => {
                    (state.session.take(), state.device.take())
                }
                _ => (None, None),
            }
        };
        if let Some(session) = session {
            session.close_now();
        }
        if let Some(device) = device {
            device.close_now();
            let hooks = self
                .teardown_hooks
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            for hook in hooks.iter() {
                hook(&device);
            }
        }
        self.emit(event);
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        let state = self.state.get_mut().unwrap_or_else(PoisonError::into_inner);
        let session = state.session.take();
        let device = state.device.take();
        if session.is_none() && device.is_none() {
            return;
        }
        let posted = self.ops.post({
            let session = session.clone();
            let device = device.clone();
            move || {
                if let Some(session) = session {
                    session.close_now();
                }
                if let Some(device) = device {
                    device.close_now();
                }
            }
        });
        if !posted {
            log::warn!("Operations context gone; closing camera inline");
            if let Some(session) = session {
                session.close_now();
            }
            if let Some(device) = device {
                device.close_now();
            }
        }
    }
}

#[derive(Clone, Copy)]
enum InFlight {
    Open,
    Configure,
}

/// Resets a single-flight flag however the operation ends, including
/// when the awaiting future is dropped.
struct InFlightGuard<'a> {
    inner: &'a Inner,
    kind: InFlight,
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        let mut state = self.inner.lock();
        match self.kind {
            InFlight::Open => state.opening = false,
            InFlight::Configure => state.configuring = false,
        }
    }
}

/// Owns the open/close of the physical device and the
/// create/replace/close of its capture session.
#[derive(Clone)]
pub struct DeviceSessionManager {
    inner: Arc<Inner>,
}

impl DeviceSessionManager {
    /// `ops` is the context all device and session callbacks run on.
    pub fn new(provider: Arc<dyn CameraProvider>, ops: CallbackContext) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            inner: Arc::new(Inner {
                provider,
                ops,
                state: Mutex::new(ManagerState::default()),
                events,
                teardown_hooks: Mutex::new(Vec::new()),
                next_generation: AtomicU64::new(1),
                next_session: AtomicU64::new(1),
            }),
        }
    }

    pub fn provider(&self) -> &Arc<dyn CameraProvider> {
        &self.inner.provider
    }

    pub fn operations_context(&self) -> &CallbackContext {
        &self.inner.ops
    }

    pub fn subscribe(&self) -> broadcast::Receiver<CameraEvent> {
        self.inner.events.subscribe()
    }

    /// Register `hook` to run whenever a disconnect or device error tears
    /// down the current device. Hooks run before the matching event is
    /// published.
    pub fn on_teardown(&self, hook: impl Fn(&DeviceHandle) + Send + Sync + 'static) {
        self.inner
            .teardown_hooks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Box::new(hook));
    }

    pub fn current_device(&self) -> Option<DeviceHandle> {
        self.inner.lock().device.clone()
    }

    pub fn current_session(&self) -> Option<SessionHandle> {
        self.inner.lock().session.clone()
    }

    pub fn is_opening(&self) -> bool {
        self.inner.lock().opening
    }

    /// State of the session slot; `None` when no session exists.
    pub fn session_state(&self) -> Option<SessionState> {
        let state = self.inner.lock();
        if state.configuring {
            return Some(SessionState::Configuring);
        }
        state.session.as_ref().map(SessionHandle::state)
    }

    fn begin(&self, kind: InFlight) -> Result<InFlightGuard<'_>, CameraError> {
        let mut state = self.inner.lock();
        match kind {
            InFlight::Open => {
                if state.opening {
                    return Err(CameraError::OpenInProgress);
                }
                state.opening = true;
            }
            InFlight::Configure => {
                if state.configuring {
                    return Err(CameraError::ConfigurationInProgress);
                }
                state.configuring = true;
            }
        }
        Ok(InFlightGuard {
            inner: &self.inner,
            kind,
        })
    }

    /// Open `id`, closing any device this manager already holds.
    ///
    /// Resolves with the handle once the opened callback arrives, or with
    /// `Disconnected` / `DeviceError` if either lands first. A second call
    /// while one is outstanding fails with `OpenInProgress`.
    pub async fn open(&self, id: &str) -> Result<DeviceHandle, CameraError> {
        let _opening = self.begin(InFlight::Open)?;
        self.release_current().await?;

        let generation = self.inner.next_generation.fetch_add(1, Ordering::SeqCst);
        let (slot, pending) = result_slot::<DeviceHandle>("open");
        let callback = device_state_callback(
            Arc::downgrade(&self.inner),
            id.to_string(),
            generation,
            slot,
        );

        log::info!("Opening camera {}", id);
        self.inner
            .provider
            .open_camera(id, callback, &self.inner.ops)?;

        pending.await
    }

    /// Create a session on `device` targeting `targets`, replacing the
    /// active one. The prior session is fully closed before the new one is
    /// requested.
    pub async fn create_session(
        &self,
        device: &DeviceHandle,
        targets: Vec<Surface>,
    ) -> Result<SessionHandle, CameraError> {
        self.ensure_current(device)?;
        let _configuring = self.begin(InFlight::Configure)?;

        let prior = self.inner.lock().session.take();
        if let Some(prior) = prior {
            log::debug!("Replacing session {} on camera {}", prior.id(), device.id());
            self.inner.ops.run(move || prior.close_now()).await?;
        }

        let session_id = self.inner.next_session.fetch_add(1, Ordering::SeqCst);
        let (slot, pending) = result_slot::<Arc<dyn CameraSession>>("configure");
        let callback = session_state_callback(device.id().to_string(), slot);

        device
            .raw()
            .create_capture_session(targets.clone(), callback, &self.inner.ops)?;
        let raw = pending.await?;

        let handle = SessionHandle::new(session_id, device.id().to_string(), raw, targets);
        let still_current = {
            let mut state = self.inner.lock();
            let current = state
                .device
                .as_ref()
                .is_some_and(|d| d.generation() == device.generation() && d.is_open());
            if current {
                state.session = Some(handle.clone());
            }
            current
        };

        if !still_current {
            log::warn!("Camera {} went away while configuring", device.id());
            let orphan = handle.clone();
            self.inner.ops.run(move || orphan.close_now()).await?;
            return Err(CameraError::DeviceClosed);
        }

        log::info!(
            "Session {} active on camera {} with {} targets",
            handle.id(),
            device.id(),
            handle.targets().len()
        );
        Ok(handle)
    }

    /// Start the live preview on `session` with continuous-picture focus.
    pub fn start_repeating_preview(
        &self,
        session: &SessionHandle,
        targets: &[Surface],
    ) -> Result<(), CameraError> {
        self.start_repeating_preview_with(session, targets, AfMode::ContinuousPicture)
    }

    pub fn start_repeating_preview_with(
        &self,
        session: &SessionHandle,
        targets: &[Surface],
        af_mode: AfMode,
    ) -> Result<(), CameraError> {
        let request = CaptureRequest::new(RequestTemplate::Preview)
            .with_targets(targets.iter().copied())
            .with_af_mode(af_mode);
        self.set_repeating(session, request)
    }

    /// Submit a repeating request. Fire-and-forget: later failures surface
    /// through the backend's session error channel, not here. Refused while
    /// a reconfiguration is in flight or when `session` is not the active one.
    pub fn set_repeating(
        &self,
        session: &SessionHandle,
        request: CaptureRequest,
    ) -> Result<(), CameraError> {
        let state = self.inner.lock();
        if state.configuring {
            return Err(CameraError::ConfigurationInProgress);
        }
        let is_active = state
            .session
            .as_ref()
            .is_some_and(|s| s.id() == session.id() && s.is_active());
        if !is_active {
            return Err(CameraError::SessionClosed);
        }
        session
            .inner
            .session
            .set_repeating_request(request, &self.inner.ops)
    }

    /// Close the active session if it is `session`.
    pub async fn close_session(&self, session: &SessionHandle) -> Result<(), CameraError> {
        {
            let mut state = self.inner.lock();
            if state.session.as_ref().is_some_and(|s| s.id() == session.id()) {
                state.session = None;
            }
        }
        let session = session.clone();
        self.inner.ops.run(move || session.close_now()).await
    }

    /// Close the session and the device. Idempotent, and a no-op when
    /// nothing was ever opened.
    pub async fn close(&self) {
        if let Err(e) = self.release_current().await {
            log::warn!("Error closing camera: {}", e);
        }
    }

    fn ensure_current(&self, device: &DeviceHandle) -> Result<(), CameraError> {
        let state = self.inner.lock();
        let current = state
            .device
            .as_ref()
            .is_some_and(|d| d.generation() == device.generation());
        if current && device.is_open() {
            Ok(())
        } else {
            Err(CameraError::DeviceClosed)
        }
    }

    async fn release_current(&self) -> Result<(), CameraError> {
        let (session, device) = {
            let mut state = self.inner.lock();
            (state.session.take(), state.device.take())
        };
        if session.is_none() && device.is_none() {
            return Ok(());
        }

        let id = device.as_ref().map(|d| d.id().to_string());
        let closing = (session.clone(), device.clone());
        let ran = self
            .inner
            .ops
            .run(move || {
                let (session, device) = closing;
                if let Some(session) = session {
                    session.close_now();
                }
                if let Some(device) = device {
                    device.close_now();
                }
            })
            .await;

        if let Err(e) = ran {
            log::warn!("{}; closing camera inline", e);
            if let Some(session) = session {
                session.close_now();
            }
            if let Some(device) = device {
                device.close_now();
            }
        }

        if let Some(id) = id {
            log::info!("Closed camera {}", id);
            self.inner.emit(CameraEvent::Closed(id));
        }
        Ok(())
    }
}

fn device_state_callback(
    manager: Weak<Inner>,
    id: DeviceId,
    generation: u64,
    slot: ResultSlot<DeviceHandle>,
) -> DeviceStateCallback {
    Box::new(move |event| match event {
        DeviceStateEvent::Opened(device) => {
            let handle = DeviceHandle::new(id.clone(), generation, device);
            let manager = match manager.upgrade() {
                Some(manager) if slot.is_waiting() => manager,
                _ => {
                    log::warn!("Camera {} opened after its caller gave up; closing", id);
                    handle.close_now();
                    return;
                }
            };

            manager.lock().device = Some(handle.clone());
            if slot.fulfill(Ok(handle)).is_err() {
                log::warn!("Camera {} open result went unclaimed; closing", id);
                manager.invalidate(generation, CameraEvent::Closed(id.clone()));
                return;
            }
            log::info!("Camera {} opened", id);
            manager.emit(CameraEvent::Opened(id.clone()));
        }
        DeviceStateEvent::Disconnected => {
            log::warn!("Camera {} has been disconnected", id);
            let _ = slot.fulfill(Err(CameraError::Disconnected(id.clone())));
            if let Some(manager) = manager.upgrade() {
                manager.invalidate(generation, CameraEvent::Disconnected(id.clone()));
            }
        }
        DeviceStateEvent::Error(code) => {
            log::error!("Camera {} error: ({}) {}", id, code.code(), code);
            let _ = slot.fulfill(Err(CameraError::DeviceError {
                id: id.clone(),
                code,
            }));
            if let Some(manager) = manager.upgrade() {
                manager.invalidate(
                    generation,
                    CameraEvent::DeviceError {
                        id: id.clone(),
                        code,
                    },
                );
            }
        }
    })
}

fn session_state_callback(
    device_id: DeviceId,
    slot: ResultSlot<Arc<dyn CameraSession>>,
) -> SessionStateCallback {
    Box::new(move |event| match event {
        SessionStateEvent::Configured(session) => {
            if let Err(Ok(session)) = slot.fulfill(Ok(session)) {
                log::warn!(
                    "Session for camera {} configured after its caller gave up; closing",
                    device_id
                );
                session.close();
            }
        }
        SessionStateEvent::ConfigureFailed => {
            log::error!("Camera {} session configuration failed", device_id);
            let _ = slot.fulfill(Err(CameraError::ConfigurationFailed(device_id.clone())));
        }
    })
}
