#[cfg(test)]
mod error_tests {
    use crabcapture::errors::{CameraError, DeviceErrorCode};
    use crabcapture::types::{LensFacing, PixelFormat};
    use std::error::Error;
    use std::time::Duration;

    #[test]
    fn test_not_found_names_facing() {
        let error = CameraError::NotFound(LensFacing::Front);
        assert_eq!(
            error.to_string(),
            "Camera not found: no backward-compatible front camera"
        );
    }

    #[test]
    fn test_size_negotiation_error() {
        let error = CameraError::NoCompatibleSize("no still size with aspect ratio 4:3".to_string());
        assert!(error.to_string().contains("Size negotiation error"));
        assert!(error.to_string().contains("4:3"));
    }

    #[test]
    fn test_disconnected_message() {
        let error = CameraError::Disconnected("2".to_string());
        assert_eq!(error.to_string(), "Camera 2 has been disconnected");
        assert!(error.is_fatal());
    }

    #[test]
    fn test_device_error_codes() {
        let cases = [
            (DeviceErrorCode::CameraInUse, 1, "Camera in use"),
            (DeviceErrorCode::MaxCamerasInUse, 2, "Maximum cameras in use"),
            (DeviceErrorCode::CameraDisabled, 3, "Device policy"),
            (DeviceErrorCode::CameraDevice, 4, "Fatal (device)"),
            (DeviceErrorCode::CameraService, 5, "Fatal (service)"),
        ];
        for (code, number, message) in cases {
            assert_eq!(code.code(), number);
            assert_eq!(DeviceErrorCode::from_code(number), code);
            assert_eq!(code.to_string(), message);
        }
        assert_eq!(DeviceErrorCode::from_code(77), DeviceErrorCode::Unknown(77));
        assert_eq!(DeviceErrorCode::Unknown(77).to_string(), "Unknown");
    }

    #[test]
    fn test_device_error_is_not_fatal() {
        let error = CameraError::DeviceError {
            id: "0".to_string(),
            code: DeviceErrorCode::CameraService,
        };
        assert_eq!(error.to_string(), "Camera 0 error: (5) Fatal (service)");
        assert!(!error.is_fatal());
    }

    #[test]
    fn test_timeout_reports_milliseconds() {
        let error = CameraError::Timeout(Duration::from_millis(5000));
        assert_eq!(
            error.to_string(),
            "Capture error: image dequeuing took too long (5000ms)"
        );
    }

    #[test]
    fn test_unsupported_format_message() {
        let error = CameraError::UnsupportedFormat(PixelFormat::Yuv420);
        assert_eq!(error.to_string(), "Unknown image format: Yuv420");
    }

    #[test]
    fn test_in_flight_errors_are_distinct() {
        let open = CameraError::OpenInProgress.to_string();
        let configure = CameraError::ConfigurationInProgress.to_string();
        let capture = CameraError::CaptureInProgress.to_string();
        assert_ne!(open, configure);
        assert_ne!(configure, capture);
        assert!(capture.starts_with("Capture error"));
    }

    #[test]
    fn test_camera_error_debug_format() {
        let error = CameraError::EncoderPrepareFailed("output not writable".to_string());
        let debug_str = format!("{:?}", error);
        assert!(debug_str.contains("EncoderPrepareFailed"));
        assert!(debug_str.contains("output not writable"));
    }

    #[test]
    fn test_camera_error_implements_error_trait() {
        let error = CameraError::SessionClosed;
        let _error_trait: &dyn Error = &error;
        assert!(error.source().is_none());
    }

    #[test]
    fn test_io_error_conversion() {
        let io = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "read-only volume");
        let error: CameraError = io.into();
        assert!(matches!(error, CameraError::Io(ref msg) if msg.contains("read-only volume")));
    }

    #[test]
    fn test_error_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<CameraError>();
    }
}
