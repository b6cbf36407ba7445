//! Recording configuration types

use crate::platform::{
    AudioCodec, AudioSource, EncoderSettings, OutputContainer, VideoCodec, VideoSource,
};
use crate::types::Size;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Default video encoding bitrate in bits per second
pub const DEFAULT_VIDEO_BITRATE: u32 = 10_000_000;

/// One configured recording: where it goes and how it is encoded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordingSession {
    /// Output file path
    pub output: PathBuf,
    /// Frames per second
    pub fps: u32,
    /// Video frame size
    pub size: Size,
    /// Rotation in degrees players should apply on playback
    pub orientation_hint: u32,
}

impl RecordingSession {
    /// Encoder settings for this session: surface video and microphone
    /// audio, H.264/AAC in MP4.
    pub fn encoder_settings(&self, bitrate: u32) -> EncoderSettings {
        EncoderSettings {
            video_source: VideoSource::Surface,
            audio_source: AudioSource::Microphone,
            container: OutputContainer::Mpeg4,
            video_codec: VideoCodec::H264,
            audio_codec: AudioCodec::Aac,
            output_path: self.output.clone(),
            bitrate,
            fps: self.fps,
            size: self.size,
            orientation_hint: self.orientation_hint,
        }
    }
}

/// Statistics returned after stopping a recording
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordingStats {
    /// Output file path
    pub output_path: String,
    /// Wall time between encoder start and stop, in seconds
    pub duration_secs: f64,
    pub fps: u32,
    pub width: u32,
    pub height: u32,
    pub bitrate: u32,
}

impl RecordingStats {
    pub fn from_session(session: &RecordingSession, bitrate: u32, duration_secs: f64) -> Self {
        Self {
            output_path: session.output.to_string_lossy().into_owned(),
            duration_secs,
            fps: session.fps,
            width: session.size.width,
            height: session.size.height,
            bitrate,
        }
    }

    /// Frames the encoder should have produced at the nominal rate
    pub fn expected_frames(&self) -> u64 {
        (self.duration_secs * self.fps as f64).round() as u64
    }
}
