//! Still-capture correlation
//!
//! A still capture produces two independent deliveries: the request's
//! metadata on the operations context and the image buffer on the
//! image-arrival context. The correlator pairs them by sensor timestamp
//! under a deadline and guarantees every buffer it touched is released.

use super::queue::{ImageQueue, QueueClosed, IMAGE_BUFFER_SIZE};
use crate::device::bridge::result_slot;
use crate::device::SessionHandle;
use crate::errors::CameraError;
use crate::orientation::{exif_for, resolve_rotation, ExifOrientation};
use crate::platform::{
    CallbackContext, CaptureCallback, CaptureEvent, DisplayProvider, ImageAvailableListener,
    ImageReader, OrientationSource,
};
use crate::types::{
    CaptureMetadata, CaptureRequest, CharacteristicsSnapshot, Image, PixelFormat,
    RequestTemplate,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::watch;

/// Maximum wait between capture completion and a matching image.
pub const IMAGE_CAPTURE_TIMEOUT: Duration = Duration::from_millis(5000);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureState {
    Idle,
    Capturing,
    Matching,
    TimedOut,
}

/// A matched still capture. The caller owns `image` and must release it
/// (`close()` or drop) exactly once.
#[derive(Debug)]
pub struct CombinedCaptureResult {
    pub image: Image,
    pub metadata: CaptureMetadata,
    pub orientation: ExifOrientation,
    /// Orientation the EXIF tag was resolved from, in degrees.
    pub rotation_degrees: u32,
    pub format: PixelFormat,
}

impl CombinedCaptureResult {
    pub fn close(self) {
        self.image.close();
    }
}

pub struct CaptureCorrelator {
    reader: Arc<dyn ImageReader>,
    image_context: CallbackContext,
    ops: CallbackContext,
    characteristics: CharacteristicsSnapshot,
    display: Arc<dyn DisplayProvider>,
    orientation: Option<Arc<dyn OrientationSource>>,
    timeout: Duration,
    state: Mutex<CaptureState>,
    in_flight: AtomicBool,
    aborts: watch::Sender<u64>,
}

impl CaptureCorrelator {
    pub fn new(
        reader: Arc<dyn ImageReader>,
        image_context: CallbackContext,
        ops: CallbackContext,
        characteristics: CharacteristicsSnapshot,
        display: Arc<dyn DisplayProvider>,
    ) -> Self {
        Self {
            reader,
            image_context,
            ops,
            characteristics,
            display,
            orientation: None,
            timeout: IMAGE_CAPTURE_TIMEOUT,
            state: Mutex::new(CaptureState::Idle),
            in_flight: AtomicBool::new(false),
            aborts: watch::channel(0).0,
        }
    }

    pub fn with_orientation_source(mut self, source: Option<Arc<dyn OrientationSource>>) -> Self {
        self.orientation = source;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn state(&self) -> CaptureState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn is_capturing(&self) -> bool {
        self.in_flight.load(Ordering::SeqCst)
    }

    pub fn reader(&self) -> &Arc<dyn ImageReader> {
        &self.reader
    }

    /// End the attempt in flight, if any, with `SessionClosed`. Its
    /// listener is removed and its buffers released as on any other exit.
    pub fn abort(&self) {
        if self.is_capturing() {
            log::warn!("Aborting still capture in flight");
        }
        self.aborts.send_modify(|epoch| *epoch = epoch.wrapping_add(1));
    }

    fn set_state(&self, state: CaptureState) {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner) = state;
    }

    /// Capture one still image on `session` and pair it with its metadata.
    ///
    /// Dropping the returned future before it resolves removes the arrival
    /// listener and releases every queued buffer.
    pub async fn capture_still(
        &self,
        session: &SessionHandle,
    ) -> Result<CombinedCaptureResult, CameraError> {
        let _flight = InFlightGuard::acquire(self)?;
        let mut aborted = self.aborts.subscribe();
        self.set_state(CaptureState::Capturing);

        let mut stale = 0;
        while let Some(image) = self.reader.acquire_next_image() {
            image.close();
            stale += 1;
        }
        if stale > 0 {
            log::debug!("Released {} leftover images", stale);
        }

        let queue = Arc::new(ImageQueue::new(IMAGE_BUFFER_SIZE));
        let listener = ListenerGuard::install(self.reader.clone(), queue.clone(), &self.image_context);

        let (slot, pending) = result_slot::<CaptureMetadata>("capture");
        let callback: CaptureCallback = Box::new(move |event| {
            let outcome = match event {
                CaptureEvent::Completed(metadata) => Ok(metadata),
                CaptureEvent::Failed(reason) => Err(CameraError::CaptureFailed(reason)),
            };
            let _ = slot.fulfill(outcome);
        });
        let request = CaptureRequest::new(RequestTemplate::StillCapture)
            .with_target(self.reader.surface());
        session.capture(request, callback, &self.ops)?;

        let metadata = tokio::select! {
            outcome = pending => outcome?,
            _ = aborted.changed() => return Err(CameraError::SessionClosed),
        };
        let expected = metadata.sensor_timestamp;
        log::debug!("Capture completed: {}", expected);

        self.set_state(CaptureState::Matching);
        let deadline = tokio::time::Instant::now() + self.timeout;

        loop {
            let popped = tokio::select! {
                popped = queue.pop_until(deadline) => popped,
                _ = aborted.changed() => return Err(CameraError::SessionClosed),
            };
            let image = match popped {
                Ok(Some(image)) => image,
                Ok(None) => {
                    log::warn!("Image dequeuing took too long");
                    self.set_state(CaptureState::TimedOut);
                    return Err(CameraError::Timeout(self.timeout));
                }
                Err(QueueClosed) => {
                    return Err(CameraError::CaptureFailed("image queue closed".to_string()));
                }
            };

            log::debug!("Image dequeued: {}", image.timestamp());
            if image.format() != PixelFormat::DepthJpeg && image.timestamp() != expected {
                image.close();
                continue;
            }

            // Match: stop listening and release whatever else arrived
            drop(listener);

            let rotation = resolve_rotation(
                self.orientation.as_deref(),
                self.display.rotation(),
                &self.characteristics,
            );
            let orientation = exif_for(&self.characteristics, rotation);
            self.set_state(CaptureState::Idle);

            return Ok(CombinedCaptureResult {
                format: image.format(),
                image,
                metadata,
                orientation,
                rotation_degrees: rotation,
            });
        }
    }
}

struct InFlightGuard<'a> {
    correlator: &'a CaptureCorrelator,
}

impl<'a> InFlightGuard<'a> {
    fn acquire(correlator: &'a CaptureCorrelator) -> Result<Self, CameraError> {
        if correlator.in_flight.swap(true, Ordering::SeqCst) {
            return Err(CameraError::CaptureInProgress);
        }
        Ok(Self { correlator })
    }
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        let mut state = self
            .correlator
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if matches!(*state, CaptureState::Capturing | CaptureState::Matching) {
            *state = CaptureState::Idle;
        }
        drop(state);
        self.correlator.in_flight.store(false, Ordering::SeqCst);
    }
}

/// Owns the installed arrival listener for one attempt. Dropping it
/// uninstalls the listener, closes the queue and releases what is left.
struct ListenerGuard {
    reader: Arc<dyn ImageReader>,
    queue: Arc<ImageQueue<Image>>,
}

impl ListenerGuard {
    fn install(
        reader: Arc<dyn ImageReader>,
        queue: Arc<ImageQueue<Image>>,
        context: &CallbackContext,
    ) -> Self {
        let weak_reader = Arc::downgrade(&reader);
        let sink = queue.clone();
        let listener: ImageAvailableListener = Arc::new(move || {
            let Some(reader) = weak_reader.upgrade() else {
                return;
            };
            if let Some(image) = reader.acquire_next_image() {
                if let Some(overflow) = sink.push(image) {
                    overflow.close();
                }
            }
        });
        reader.set_on_image_available(Some(listener), Some(context));
        Self { reader, queue }
    }
}

impl Drop for ListenerGuard {
    fn drop(&mut self) {
        self.reader.set_on_image_available(None, None);
        self.queue.close();
        for image in self.queue.drain() {
            image.close();
        }
    }
}
