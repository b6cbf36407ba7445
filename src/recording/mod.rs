//! Video recording for CrabCapture
//!
//! The controller drives an external [`VideoEncoder`] that consumes frames
//! from a surface; this module never touches encoded data itself.
//!
//! # Example
//! ```rust,ignore
//! use crabcapture::recording::RecordingController;
//!
//! let recorder = RecordingController::new(encoder, storage);
//! recorder.configure(30, size, orientation_hint)?;
//! let session = recorder.start(&manager, &device, preview).await?;
//!
//! // When done:
//! let outcome = recorder.stop()?;
//! ```
//!
//! [`VideoEncoder`]: crate::platform::VideoEncoder

mod config;
mod controller;

pub use config::{RecordingSession, RecordingStats, DEFAULT_VIDEO_BITRATE};
pub use controller::{RecordingController, RecordingState, StopOutcome};
