//! Video recording state machine
//!
//! Idle → Preparing (`configure`) → Recording (`start`) → Stopping
//! (`stop`) → Idle. The encoder is never left running without a backing
//! capture session.

use super::config::{RecordingSession, RecordingStats, DEFAULT_VIDEO_BITRATE};
use crate::device::{DeviceHandle, DeviceSessionManager, SessionHandle};
use crate::errors::CameraError;
use crate::platform::VideoEncoder;
use crate::storage::{MediaKind, MediaStorage};
use crate::types::{CaptureRequest, RequestTemplate, Size, Surface};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RecordingState {
    Idle,
    Preparing,
    Recording,
    Stopping,
}

/// Result of a stop request
#[derive(Debug, Clone, PartialEq)]
pub enum StopOutcome {
    Stopped(RecordingStats),
    /// Nothing was recording; reported, not an error.
    NotRecording,
}

struct Active {
    phase: RecordingState,
    session: Option<RecordingSession>,
    capture_session: Option<SessionHandle>,
    started_at: Option<Instant>,
}

impl Active {
    fn idle() -> Self {
        Self {
            phase: RecordingState::Idle,
            session: None,
            capture_session: None,
            started_at: None,
        }
    }
}

pub struct RecordingController {
    encoder: Arc<dyn VideoEncoder>,
    storage: Arc<dyn MediaStorage>,
    bitrate: u32,
    active: Mutex<Active>,
}

impl RecordingController {
    pub fn new(encoder: Arc<dyn VideoEncoder>, storage: Arc<dyn MediaStorage>) -> Self {
        Self {
            encoder,
            storage,
            bitrate: DEFAULT_VIDEO_BITRATE,
            active: Mutex::new(Active::idle()),
        }
    }

    pub fn with_bitrate(mut self, bitrate: u32) -> Self {
        self.bitrate = bitrate;
        self
    }

    fn lock(&self) -> MutexGuard<'_, Active> {
        self.active.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn state(&self) -> RecordingState {
        self.lock().phase
    }

    pub fn is_recording(&self) -> bool {
        self.state() == RecordingState::Recording
    }

    /// Session being prepared or recorded, if any.
    pub fn current_session(&self) -> Option<RecordingSession> {
        self.lock().session.clone()
    }

    /// Capture session feeding the encoder while recording.
    pub fn capture_session(&self) -> Option<SessionHandle> {
        self.lock().capture_session.clone()
    }

    /// Configure and prepare the encoder for a new recording.
    pub fn configure(
        &self,
        fps: u32,
        size: Size,
        orientation_hint: u32,
    ) -> Result<RecordingSession, CameraError> {
        {
            let mut active = self.lock();
            if active.phase != RecordingState::Idle {
                return Err(CameraError::InvalidState(format!(
                    "cannot configure while {:?}",
                    active.phase
                )));
            }
            active.phase = RecordingState::Preparing;
        }

        match self.prepare(fps, size, orientation_hint) {
            Ok(session) => {
                log::info!(
                    "Recorder prepared: {} @ {}fps -> {}",
                    size,
                    fps,
                    session.output.display()
                );
                self.lock().session = Some(session.clone());
                Ok(session)
            }
            Err(e) => {
                log::error!("Recorder preparation failed: {}", e);
                self.encoder.reset();
                *self.lock() = Active::idle();
                Err(e)
            }
        }
    }

    fn prepare(
        &self,
        fps: u32,
        size: Size,
        orientation_hint: u32,
    ) -> Result<RecordingSession, CameraError> {
        let output = self
            .storage
            .create_file(MediaKind::Video)
            .map_err(|e| CameraError::EncoderPrepareFailed(e.to_string()))?;
        let session = RecordingSession {
            output,
            fps,
            size,
            orientation_hint,
        };
        self.encoder
            .configure(&session.encoder_settings(self.bitrate))
            .and_then(|_| self.encoder.prepare())
            .map_err(|e| CameraError::EncoderPrepareFailed(e.to_string()))?;
        Ok(session)
    }

    /// Bind the prepared encoder to a new session on `device` alongside
    /// `preview`, start the repeating record request, then start encoding.
    ///
    /// Any failure along the way resets the encoder, closes the session it
    /// created and returns to Idle.
    pub async fn start(
        &self,
        manager: &DeviceSessionManager,
        device: &DeviceHandle,
        preview: Surface,
    ) -> Result<SessionHandle, CameraError> {
        {
            let active = self.lock();
            if active.phase != RecordingState::Preparing || active.session.is_none() {
                return Err(CameraError::InvalidState(
                    "recorder has not been configured".to_string(),
                ));
            }
        }

        let mut abort = AbortOnDrop {
            controller: self,
            armed: true,
        };

        let encoder_surface = self.encoder.surface()?;
        let capture_session = manager
            .create_session(device, vec![preview, encoder_surface])
            .await?;

        let request = CaptureRequest::new(RequestTemplate::Record)
            .with_targets([preview, encoder_surface]);
        let started = manager
            .set_repeating(&capture_session, request)
            .and_then(|_| self.encoder.start());

        if let Err(e) = started {
            log::error!("Failed to start recording: {}", e);
            if let Err(close_err) = manager.close_session(&capture_session).await {
                log::warn!("Error closing recording session: {}", close_err);
            }
            return Err(e);
        }

        abort.armed = false;
        let mut active = self.lock();
        active.phase = RecordingState::Recording;
        active.capture_session = Some(capture_session.clone());
        active.started_at = Some(Instant::now());
        log::info!("Recording started on session {}", capture_session.id());
        Ok(capture_session)
    }

    /// Stop and reset the encoder. Stopping when nothing is recording is
    /// logged and reported as [`StopOutcome::NotRecording`].
    pub fn stop(&self) -> Result<StopOutcome, CameraError> {
        let (session, started_at) = {
            let mut active = self.lock();
            match active.phase {
                RecordingState::Recording => {
                    active.phase = RecordingState::Stopping;
                    (active.session.clone(), active.started_at)
                }
                RecordingState::Preparing => {
                    log::warn!("stop() called before recording started; discarding prepared recorder");
                    self.encoder.reset();
                    *active = Active::idle();
                    return Ok(StopOutcome::NotRecording);
                }
                phase => {
                    log::warn!("stop() called while {:?}", phase);
                    return Ok(StopOutcome::NotRecording);
                }
            }
        };

        let stopped = self.encoder.stop();
        self.encoder.reset();
        *self.lock() = Active::idle();

        if let Err(e) = stopped {
            log::error!("Encoder failed to stop: {}", e);
            return Err(CameraError::EncoderError(e.to_string()));
        }

        let duration = started_at.map(|t| t.elapsed().as_secs_f64()).unwrap_or(0.0);
        match session {
            Some(session) => {
                let stats = RecordingStats::from_session(&session, self.bitrate, duration);
                log::info!(
                    "Recording saved to {} ({:.1}s)",
                    stats.output_path,
                    stats.duration_secs
                );
                Ok(StopOutcome::Stopped(stats))
            }
            None => Ok(StopOutcome::NotRecording),
        }
    }

    /// Stop after the capture session feeding the encoder was torn down
    /// underneath it. Whatever was recorded so far is finalized.
    pub fn abandon(&self) {
        if self.state() == RecordingState::Idle {
            return;
        }
        match self.stop() {
            Ok(StopOutcome::Stopped(stats)) => log::warn!(
                "Recording to {} cut short after {:.1}s",
                stats.output_path,
                stats.duration_secs
            ),
            Ok(StopOutcome::NotRecording) => {}
            Err(e) => log::error!("Error stopping abandoned recording: {}", e),
        }
    }
}

/// Returns the controller to Idle when `start` exits early, including
/// when its future is dropped.
struct AbortOnDrop<'a> {
    controller: &'a RecordingController,
    armed: bool,
}

impl Drop for AbortOnDrop<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.controller.encoder.reset();
            *self.controller.lock() = Active::idle();
        }
    }
}
