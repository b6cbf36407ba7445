use std::fmt;
use std::time::Duration;

use crate::types::{LensFacing, PixelFormat};

/// Error codes reported by the hardware through the device state callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum DeviceErrorCode {
    CameraInUse,
    MaxCamerasInUse,
    CameraDisabled,
    CameraDevice,
    CameraService,
    Unknown(i32),
}

impl DeviceErrorCode {
    /// Numeric code as reported by the camera subsystem.
    pub fn code(&self) -> i32 {
        match self {
            DeviceErrorCode::CameraInUse => 1,
            DeviceErrorCode::MaxCamerasInUse => 2,
            DeviceErrorCode::CameraDisabled => 3,
            DeviceErrorCode::CameraDevice => 4,
            DeviceErrorCode::CameraService => 5,
            DeviceErrorCode::Unknown(code) => *code,
        }
    }

    pub fn from_code(code: i32) -> Self {
        match code {
            1 => DeviceErrorCode::CameraInUse,
            2 => DeviceErrorCode::MaxCamerasInUse,
            3 => DeviceErrorCode::CameraDisabled,
            4 => DeviceErrorCode::CameraDevice,
            5 => DeviceErrorCode::CameraService,
            other => DeviceErrorCode::Unknown(other),
        }
    }
}

impl fmt::Display for DeviceErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let msg = match self {
            DeviceErrorCode::CameraDevice => "Fatal (device)",
            DeviceErrorCode::CameraDisabled => "Device policy",
            DeviceErrorCode::CameraInUse => "Camera in use",
            DeviceErrorCode::CameraService => "Fatal (service)",
            DeviceErrorCode::MaxCamerasInUse => "Maximum cameras in use",
            DeviceErrorCode::Unknown(_) => "Unknown",
        };
        write!(f, "{}", msg)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CameraError {
    #[error("Camera not found: no backward-compatible {0} camera")]
    NotFound(LensFacing),
    #[error("Size negotiation error: {0}")]
    NoCompatibleSize(String),
    #[error("Camera {0} has been disconnected")]
    Disconnected(String),
    #[error("Camera {id} error: ({}) {code}", .code.code())]
    DeviceError { id: String, code: DeviceErrorCode },
    #[error("Device open error: another open is already in flight")]
    OpenInProgress,
    #[error("Session error: a session configuration is already in flight")]
    ConfigurationInProgress,
    #[error("Camera {0} session configuration failed")]
    ConfigurationFailed(String),
    #[error("Device error: camera device is closed")]
    DeviceClosed,
    #[error("Session error: capture session is closed")]
    SessionClosed,
    #[error("Capture error: a still capture is already in flight")]
    CaptureInProgress,
    #[error("Capture error: {0}")]
    CaptureFailed(String),
    #[error("Capture error: image dequeuing took too long ({}ms)", .0.as_millis())]
    Timeout(Duration),
    #[error("Unknown image format: {0:?}")]
    UnsupportedFormat(PixelFormat),
    #[error("IO error: {0}")]
    Io(String),
    #[error("Encoder prepare failed: {0}")]
    EncoderPrepareFailed(String),
    #[error("Encoding error: {0}")]
    EncoderError(String),
    #[error("Invalid state: {0}")]
    InvalidState(String),
    #[error("Unsupported operation: {0}")]
    Unsupported(String),
    #[error("Execution context {0} is no longer running")]
    ContextClosed(String),
    #[error("Backend error: {0}")]
    Backend(String),
    #[error("Configuration error: {0}")]
    Config(String),
}

impl CameraError {
    /// Fatal errors end the current consumer; everything else is reported
    /// back to the caller and left to its discretion.
    pub fn is_fatal(&self) -> bool {
        matches!(self, CameraError::Disconnected(_))
    }
}

impl From<std::io::Error> for CameraError {
    fn from(err: std::io::Error) -> Self {
        CameraError::Io(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_device_error_messages() {
        let err = CameraError::DeviceError {
            id: "0".to_string(),
            code: DeviceErrorCode::CameraInUse,
        };
        assert_eq!(err.to_string(), "Camera 0 error: (1) Camera in use");

        let err = CameraError::DeviceError {
            id: "1".to_string(),
            code: DeviceErrorCode::Unknown(42),
        };
        assert_eq!(err.to_string(), "Camera 1 error: (42) Unknown");
    }

    #[test]
    fn test_code_round_trip() {
        for code in 1..=5 {
            assert_eq!(DeviceErrorCode::from_code(code).code(), code);
        }
        assert_eq!(DeviceErrorCode::from_code(99), DeviceErrorCode::Unknown(99));
    }

    #[test]
    fn test_only_disconnect_is_fatal() {
        assert!(CameraError::Disconnected("0".to_string()).is_fatal());
        assert!(!CameraError::Timeout(Duration::from_millis(5000)).is_fatal());
        assert!(!CameraError::ConfigurationFailed("0".to_string()).is_fatal());
    }

    #[test]
    fn test_io_conversion() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "missing");
        let err: CameraError = io.into();
        assert!(matches!(err, CameraError::Io(_)));
        assert!(err.to_string().contains("missing"));
    }
}
