//! Characteristics of typical phone cameras

use crate::types::{
    Capability, CharacteristicsSnapshot, LensFacing, RecordStreamConfig, Size,
    StreamConfigurationMap,
};

const FRAME_30FPS_NS: u64 = 33_333_333;
const FRAME_60FPS_NS: u64 = 16_666_666;

fn stream_map() -> StreamConfigurationMap {
    StreamConfigurationMap {
        preview_sizes: vec![
            Size::new(1920, 1080),
            Size::new(1440, 1080),
            Size::new(1280, 720),
            Size::new(640, 480),
            Size::new(320, 240),
        ],
        still_sizes: vec![
            Size::new(4032, 3024),
            Size::new(4032, 2268),
            Size::new(1920, 1080),
            Size::new(640, 480),
        ],
        record_sizes: vec![
            RecordStreamConfig {
                size: Size::new(3840, 2160),
                min_frame_duration_ns: FRAME_30FPS_NS,
            },
            RecordStreamConfig {
                size: Size::new(1920, 1080),
                min_frame_duration_ns: FRAME_30FPS_NS,
            },
            RecordStreamConfig {
                size: Size::new(1280, 720),
                min_frame_duration_ns: FRAME_60FPS_NS,
            },
            RecordStreamConfig {
                size: Size::new(640, 480),
                min_frame_duration_ns: FRAME_30FPS_NS,
            },
        ],
    }
}

/// Rear camera mounted at 90 degrees.
pub fn back_camera(id: &str) -> CharacteristicsSnapshot {
    CharacteristicsSnapshot {
        id: id.to_string(),
        facing: LensFacing::Back,
        sensor_orientation: 90,
        capabilities: vec![
            Capability::BackwardCompatible,
            Capability::ManualSensor,
            Capability::BurstCapture,
        ],
        stream_map: stream_map(),
    }
}

/// Selfie camera mounted at 270 degrees.
pub fn front_camera(id: &str) -> CharacteristicsSnapshot {
    CharacteristicsSnapshot {
        id: id.to_string(),
        facing: LensFacing::Front,
        sensor_orientation: 270,
        capabilities: vec![Capability::BackwardCompatible],
        stream_map: stream_map(),
    }
}

/// Depth sensor without the baseline capability.
pub fn depth_camera(id: &str) -> CharacteristicsSnapshot {
    CharacteristicsSnapshot {
        id: id.to_string(),
        facing: LensFacing::Back,
        sensor_orientation: 90,
        capabilities: vec![Capability::DepthOutput],
        stream_map: StreamConfigurationMap {
            preview_sizes: vec![Size::new(640, 480)],
            still_sizes: vec![Size::new(640, 480)],
            record_sizes: vec![],
        },
    }
}
