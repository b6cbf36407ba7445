//! End-to-end camera controller behaviour over the simulated backend

#[cfg(test)]
mod controller_tests {
    use crabcapture::config::CrabCaptureConfig;
    use crabcapture::storage::read_exif_orientation;
    use crabcapture::testing::{
        fixtures, ConfigureBehavior, FixedOrientation, MemoryStorage, SimulatedEncoder,
        SimulatedProvider, StaticDisplay, StillScript,
    };
    use crabcapture::types::{RequestTemplate, Size};
    use crabcapture::{
        CameraController, CameraError, CameraEvent, ExifOrientation, LensFacing, RecordingState,
        StopOutcome,
    };
    use futures::FutureExt;
    use std::sync::Arc;
    use std::time::Duration;
    use tempfile::tempdir;

    struct Rig {
        provider: Arc<SimulatedProvider>,
        encoder: Arc<SimulatedEncoder>,
        storage: Arc<MemoryStorage>,
        camera: CameraController,
    }

    fn rig_with(config: CrabCaptureConfig) -> Rig {
        let provider = Arc::new(SimulatedProvider::new(vec![
            fixtures::back_camera("0"),
            fixtures::front_camera("1"),
        ]));
        let encoder = Arc::new(SimulatedEncoder::new());
        let storage = Arc::new(MemoryStorage::new());
        let camera = CameraController::builder()
            .provider(provider.clone())
            .display(Arc::new(StaticDisplay::phone()))
            .encoder(encoder.clone())
            .storage(storage.clone())
            .config(config)
            .build()
            .unwrap();
        Rig {
            provider,
            encoder,
            storage,
            camera,
        }
    }

    fn rig() -> Rig {
        rig_with(CrabCaptureConfig::default())
    }

    fn never_completes() -> StillScript {
        StillScript {
            image_timestamps: vec![],
            image_format: crabcapture::types::PixelFormat::Jpeg,
            metadata_timestamp: None,
            failure: None,
        }
    }

    async fn wait_for(events: &mut tokio::sync::broadcast::Receiver<CameraEvent>, wanted: CameraEvent) {
        loop {
            let event = tokio::time::timeout(Duration::from_secs(5), events.recv())
                .await
                .unwrap()
                .unwrap();
            if event == wanted {
                return;
            }
        }
    }

    #[test]
    fn test_builder_requires_provider_and_display() {
        let err = CameraController::builder()
            .display(Arc::new(StaticDisplay::phone()))
            .build()
            .err()
            .unwrap();
        assert!(matches!(err, CameraError::Config(_)));

        let err = CameraController::builder()
            .provider(Arc::new(SimulatedProvider::new(vec![])))
            .build()
            .err()
            .unwrap();
        assert!(matches!(err, CameraError::Config(_)));
    }

    #[test]
    fn test_builder_requires_encoder_only_for_recording() {
        let build = |config: CrabCaptureConfig| {
            CameraController::builder()
                .provider(Arc::new(SimulatedProvider::new(vec![])))
                .display(Arc::new(StaticDisplay::phone()))
                .storage(Arc::new(MemoryStorage::new()))
                .config(config)
                .build()
        };

        assert!(matches!(
            build(CrabCaptureConfig::default()),
            Err(CameraError::Config(_))
        ));

        let mut stills_only = CrabCaptureConfig::default();
        stills_only.features.video_recording = false;
        assert!(build(stills_only).is_ok());
    }

    #[test]
    fn test_builder_rejects_invalid_config() {
        let mut config = CrabCaptureConfig::default();
        config.camera.capture_timeout_ms = 0;
        let result = CameraController::builder()
            .provider(Arc::new(SimulatedProvider::new(vec![])))
            .display(Arc::new(StaticDisplay::phone()))
            .encoder(Arc::new(SimulatedEncoder::new()))
            .config(config)
            .build();
        assert!(matches!(result, Err(CameraError::Config(_))));
    }

    #[tokio::test]
    async fn test_open_default_preview_negotiates_sizes() {
        let rig = rig();
        let sizes = rig.camera.open_default_preview().await.unwrap();

        assert_eq!(sizes.preview, Size::new(1920, 1080));
        assert_eq!(sizes.capture, Some(Size::new(1920, 1080)));
        assert_eq!(sizes.record, Some(Size::new(1920, 1080)));
        assert_eq!(sizes.record_fps, 30);
        assert_eq!(rig.camera.camera_id().as_deref(), Some("0"));
        assert_eq!(
            rig.provider.stats().last_repeating_template(),
            Some(RequestTemplate::Preview)
        );

        rig.camera.close_preview().await;
        rig.camera.close_preview().await;
        assert!(rig.camera.camera_id().is_none());
        assert_eq!(rig.provider.stats().device_closes(), 1);
    }

    #[tokio::test]
    async fn test_open_unknown_facing_fails() {
        let rig = rig();
        let err = rig.camera.select_camera(LensFacing::External).unwrap_err();
        assert!(matches!(err, CameraError::NotFound(LensFacing::External)));
    }

    #[tokio::test]
    async fn test_capture_photo_saves_with_orientation() {
        let rig = rig();
        rig.camera.open_preview("0").await.unwrap();

        let path = rig.camera.capture_photo().await.unwrap();
        let bytes = rig.storage.contents(&path).unwrap();
        assert_eq!(&bytes[..2], &[0xFF, 0xD8]);
        assert_eq!(rig.storage.orientation(&path), Some(ExifOrientation::Rotate90));
        assert_eq!(rig.provider.stats().outstanding_images(), 0);
    }

    #[tokio::test]
    async fn test_front_camera_photo_is_mirrored() {
        let rig = rig();
        rig.camera.open_preview("1").await.unwrap();

        let path = rig.camera.capture_photo().await.unwrap();
        // Front sensor at 270 with a portrait display resolves to 270
        assert_eq!(rig.storage.orientation(&path), Some(ExifOrientation::Transverse));
    }

    #[tokio::test]
    async fn test_live_orientation_is_used() {
        let provider = Arc::new(SimulatedProvider::new(vec![fixtures::back_camera("0")]));
        let storage = Arc::new(MemoryStorage::new());
        let camera = CameraController::builder()
            .provider(provider)
            .display(Arc::new(StaticDisplay::phone()))
            .orientation_source(Arc::new(FixedOrientation(Some(180))))
            .encoder(Arc::new(SimulatedEncoder::new()))
            .storage(storage.clone())
            .build()
            .unwrap();

        camera.open_default_preview().await.unwrap();
        let path = camera.capture_photo().await.unwrap();
        assert_eq!(storage.orientation(&path), Some(ExifOrientation::Rotate180));
    }

    #[tokio::test]
    async fn test_capture_photo_to_disk() {
        let dir = tempdir().unwrap();
        let mut config = CrabCaptureConfig::default();
        config.storage.output_directory = dir.path().to_string_lossy().into_owned();
        config.features.video_recording = false;

        let provider = Arc::new(SimulatedProvider::new(vec![fixtures::back_camera("0")]));
        let camera = CameraController::builder()
            .provider(provider)
            .display(Arc::new(StaticDisplay::phone()))
            .config(config)
            .build()
            .unwrap();

        camera.open_default_preview().await.unwrap();
        let first = camera.capture_photo().await.unwrap();
        let second = camera.capture_photo().await.unwrap();
        assert_ne!(first, second);

        let saved = std::fs::read(&first).unwrap();
        assert_eq!(read_exif_orientation(&saved), Some(ExifOrientation::Rotate90.code()));
        assert!(first.starts_with(dir.path()));
        assert_eq!(first.extension().unwrap(), "jpg");
    }

    #[tokio::test]
    async fn test_capture_before_preview_is_refused() {
        let rig = rig();
        let err = rig.camera.capture_still().await.unwrap_err();
        assert!(matches!(err, CameraError::InvalidState(_)));
    }

    #[tokio::test]
    async fn test_still_capture_disabled() {
        let mut config = CrabCaptureConfig::default();
        config.features.still_capture = false;
        let rig = rig_with(config);

        let sizes = rig.camera.open_default_preview().await.unwrap();
        assert_eq!(sizes.capture, None);
        let err = rig.camera.capture_still().await.unwrap_err();
        assert!(matches!(err, CameraError::Unsupported(_)));
    }

    #[tokio::test]
    async fn test_capture_failure_propagates() {
        let rig = rig();
        rig.camera.open_default_preview().await.unwrap();
        rig.provider.script_still(StillScript::failing("aborted"));

        let err = rig.camera.capture_photo().await.unwrap_err();
        assert!(matches!(err, CameraError::CaptureFailed(_)));
        assert_eq!(rig.storage.file_count(), 0);

        // The next capture is unaffected
        assert!(rig.camera.capture_photo().await.is_ok());
    }

    #[tokio::test]
    async fn test_record_round_trip_restores_preview() {
        let rig = rig();
        rig.camera.open_default_preview().await.unwrap();

        let session = rig.camera.start_recording_default().await.unwrap();
        assert_eq!(session.fps, 30);
        assert_eq!(session.size, Size::new(1920, 1080));
        assert_eq!(session.orientation_hint, 90);
        assert_eq!(rig.camera.recording_state(), RecordingState::Recording);
        assert!(rig.encoder.is_running());
        assert_eq!(
            rig.provider.stats().last_repeating_template(),
            Some(RequestTemplate::Record)
        );

        // No stills while the encoder owns the session
        let err = rig.camera.capture_still().await.unwrap_err();
        assert!(matches!(err, CameraError::InvalidState(_)));

        match rig.camera.stop_recording().await.unwrap() {
            StopOutcome::Stopped(stats) => {
                assert_eq!(stats.fps, 30);
                assert_eq!((stats.width, stats.height), (1920, 1080));
            }
            StopOutcome::NotRecording => panic!("recording should have stopped"),
        }
        assert_eq!(rig.camera.recording_state(), RecordingState::Idle);
        assert_eq!(
            rig.provider.stats().last_repeating_template(),
            Some(RequestTemplate::Preview)
        );

        // Stills work again on the restored session
        assert!(rig.camera.capture_photo().await.is_ok());
    }

    #[tokio::test]
    async fn test_stop_recording_while_idle() {
        let rig = rig();
        rig.camera.open_default_preview().await.unwrap();
        assert_eq!(
            rig.camera.stop_recording().await.unwrap(),
            StopOutcome::NotRecording
        );
        assert_eq!(rig.encoder.stops(), 0);
    }

    #[tokio::test]
    async fn test_failed_recording_start_restores_preview() {
        let rig = rig();
        rig.camera.open_default_preview().await.unwrap();
        rig.encoder.fail_start(true);

        let err = rig.camera.start_recording_default().await.unwrap_err();
        assert!(matches!(err, CameraError::EncoderError(_)));
        assert!(!rig.encoder.is_running());
        assert_eq!(rig.camera.recording_state(), RecordingState::Idle);
        assert_eq!(
            rig.provider.stats().last_repeating_template(),
            Some(RequestTemplate::Preview)
        );
        assert!(rig.camera.manager().current_session().unwrap().is_active());
    }

    #[tokio::test]
    async fn test_recording_disabled() {
        let mut config = CrabCaptureConfig::default();
        config.features.video_recording = false;
        let rig = rig_with(config);
        rig.camera.open_default_preview().await.unwrap();

        let err = rig.camera.start_recording(30, Size::new(1920, 1080)).await.unwrap_err();
        assert!(matches!(err, CameraError::Unsupported(_)));
        assert_eq!(
            rig.camera.stop_recording().await.unwrap(),
            StopOutcome::NotRecording
        );
    }

    #[tokio::test]
    async fn test_disconnect_is_surfaced() {
        let rig = rig();
        let mut events = rig.camera.subscribe();
        rig.camera.open_default_preview().await.unwrap();
        assert_eq!(events.recv().await.unwrap(), CameraEvent::Opened("0".to_string()));

        rig.provider.disconnect("0");
        assert_eq!(
            events.recv().await.unwrap(),
            CameraEvent::Disconnected("0".to_string())
        );
        assert!(rig.camera.manager().current_device().is_none());
        assert!(rig.camera.camera_id().is_none());

        let err = rig.camera.capture_still().await.unwrap_err();
        assert!(matches!(err, CameraError::InvalidState(_)));
    }

    #[tokio::test]
    async fn test_disconnect_while_recording_stops_encoder() {
        let rig = rig();
        let mut events = rig.camera.subscribe();
        rig.camera.open_default_preview().await.unwrap();
        rig.camera.start_recording_default().await.unwrap();
        assert!(rig.encoder.is_running());

        rig.provider.disconnect("0");
        wait_for(&mut events, CameraEvent::Disconnected("0".to_string())).await;

        assert!(!rig.encoder.is_running());
        assert_eq!(rig.encoder.stops(), 1);
        assert_eq!(rig.camera.recording_state(), RecordingState::Idle);
        assert!(rig.camera.camera_id().is_none());
        assert!(rig.camera.manager().current_session().is_none());
        assert_eq!(
            rig.camera.stop_recording().await.unwrap(),
            StopOutcome::NotRecording
        );

        // The controller is usable again
        rig.camera.open_default_preview().await.unwrap();
        assert!(rig.camera.capture_photo().await.is_ok());
    }

    #[tokio::test]
    async fn test_disconnect_ends_capture_in_flight() {
        let rig = rig();
        let mut events = rig.camera.subscribe();
        rig.camera.open_default_preview().await.unwrap();
        rig.provider.script_still(never_completes());

        let capture = rig.camera.capture_still();
        futures::pin_mut!(capture);
        assert!(capture.as_mut().now_or_never().is_none());

        rig.provider.disconnect("0");
        wait_for(&mut events, CameraEvent::Disconnected("0".to_string())).await;

        let err = tokio::time::timeout(Duration::from_secs(5), capture)
            .await
            .unwrap()
            .unwrap_err();
        assert!(matches!(err, CameraError::SessionClosed));
        assert_eq!(rig.provider.installed_listeners(), 0);
    }

    #[tokio::test]
    async fn test_stop_reports_stats_when_preview_restore_fails() {
        let rig = rig();
        rig.camera.open_default_preview().await.unwrap();
        rig.camera.start_recording_default().await.unwrap();
        rig.provider.set_configure_behavior(ConfigureBehavior::Fail);

        match rig.camera.stop_recording().await.unwrap() {
            StopOutcome::Stopped(stats) => assert_eq!(stats.fps, 30),
            StopOutcome::NotRecording => panic!("recording should have stopped"),
        }
        assert_eq!(rig.encoder.stops(), 1);
        assert!(!rig.encoder.is_running());
        assert_eq!(rig.camera.recording_state(), RecordingState::Idle);
    }

    #[tokio::test]
    async fn test_recording_refused_while_capture_in_flight() {
        let rig = rig();
        rig.camera.open_default_preview().await.unwrap();
        rig.provider.script_still(never_completes());

        let capture = rig.camera.capture_still();
        futures::pin_mut!(capture);
        assert!(capture.as_mut().now_or_never().is_none());

        let err = rig.camera.start_recording_default().await.unwrap_err();
        assert!(matches!(err, CameraError::CaptureInProgress));
        let err = rig.camera.capture_still().await.unwrap_err();
        assert!(matches!(err, CameraError::CaptureInProgress));
        assert_eq!(rig.encoder.starts(), 0);
        assert_eq!(rig.camera.recording_state(), RecordingState::Idle);
    }
}
