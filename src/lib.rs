//! CrabCapture: callback-driven camera capture core
//!
//! Drives a camera stack whose every operation completes through a
//! callback on another thread, and turns those callbacks into awaitable
//! results.
//!
//! # Features
//! - Camera selection by lens facing and baseline capability
//! - Preview/still/record size negotiation with exact aspect matching
//! - Single-flight device open and session configuration
//! - Still capture that pairs metadata and image buffers by timestamp
//! - Video recording against an external encoder
//! - A simulated backend for running everything offline
//!
//! # Usage
//! ```rust,ignore
//! use crabcapture::CameraController;
//!
//! let camera = CameraController::builder()
//!     .provider(provider)
//!     .display(display)
//!     .encoder(encoder)
//!     .build()?;
//!
//! camera.open_default_preview().await?;
//! let photo = camera.capture_photo().await?;
//! ```
pub mod camera;
pub mod capture;
pub mod config;
pub mod device;
pub mod errors;
pub mod orientation;
pub mod platform;
pub mod recording;
pub mod sizes;
pub mod storage;
pub mod types;

// Testing utilities - simulated hardware for offline runs
pub mod testing;

// Re-exports for convenience
pub use camera::{CameraController, CameraControllerBuilder};
pub use capture::{CaptureCorrelator, CombinedCaptureResult};
pub use config::CrabCaptureConfig;
pub use device::{CameraEvent, DeviceHandle, DeviceSessionManager, SessionHandle};
pub use errors::{CameraError, DeviceErrorCode};
pub use orientation::{ExifOrientation, OrientationTracker};
pub use recording::{RecordingController, RecordingState, StopOutcome};
pub use sizes::SizeSelection;
pub use types::{
    CharacteristicsSnapshot, DeviceId, Image, LensFacing, PixelFormat, Rotation, Size, Surface,
};

/// Initialize logging for the capture core
pub fn init_logging() {
    if std::env::var("RUST_LOG").is_err() {
        std::env::set_var("RUST_LOG", "crabcapture=info");
    }
    let _ = env_logger::try_init();
}

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const NAME: &str = env!("CARGO_PKG_NAME");
pub const DESCRIPTION: &str = env!("CARGO_PKG_DESCRIPTION");

/// Get crate information
pub fn get_info() -> CrateInfo {
    CrateInfo {
        name: NAME.to_string(),
        version: VERSION.to_string(),
        description: DESCRIPTION.to_string(),
    }
}

/// Crate information structure
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct CrateInfo {
    pub name: String,
    pub version: String,
    pub description: String,
}

#[cfg(test)]
mod lib_tests {
    use super::*;

    #[test]
    fn test_crate_info() {
        let info = get_info();
        assert_eq!(info.name, "crabcapture");
        assert!(!info.version.is_empty());
        assert!(!info.description.is_empty());
    }

    #[test]
    fn test_crate_info_serializes() {
        let json = serde_json::to_value(get_info()).unwrap();
        assert_eq!(json["name"], "crabcapture");
    }

    #[test]
    fn test_init_logging_is_idempotent() {
        init_logging();
        init_logging();
    }
}
