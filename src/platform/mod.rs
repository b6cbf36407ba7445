//! Hardware collaborator interfaces
//!
//! The capture core never talks to a camera stack directly. A backend
//! implements these traits and delivers every asynchronous result through
//! a callback posted on the [`CallbackContext`] it was handed.

pub mod context;

pub use context::CallbackContext;

use crate::errors::{CameraError, DeviceErrorCode};
use crate::types::{
    CaptureMetadata, CaptureRequest, CharacteristicsSnapshot, DeviceId, Image, PixelFormat,
    Rotation, Size, Surface,
};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;

/// Device state notifications
pub enum DeviceStateEvent {
    Opened(Arc<dyn CameraDevice>),
    Disconnected,
    Error(DeviceErrorCode),
}

/// Session configuration notifications
pub enum SessionStateEvent {
    Configured(Arc<dyn CameraSession>),
    ConfigureFailed,
}

/// Per-request capture notifications
#[derive(Debug, Clone)]
pub enum CaptureEvent {
    Completed(CaptureMetadata),
    Failed(String),
}

/// Device callbacks may fire more than once (opened, then later
/// disconnected), so they are `Fn`.
pub type DeviceStateCallback = Box<dyn Fn(DeviceStateEvent) + Send + Sync>;
pub type SessionStateCallback = Box<dyn Fn(SessionStateEvent) + Send + Sync>;
pub type CaptureCallback = Box<dyn Fn(CaptureEvent) + Send + Sync>;
pub type ImageAvailableListener = Arc<dyn Fn() + Send + Sync>;

/// Entry point of the camera subsystem.
pub trait CameraProvider: Send + Sync {
    /// Device ids in the subsystem's enumeration order.
    fn camera_ids(&self) -> Result<Vec<DeviceId>, CameraError>;

    fn characteristics(&self, id: &str) -> Result<CharacteristicsSnapshot, CameraError>;

    /// Begin opening a device. Exactly one of opened / disconnected /
    /// error is later delivered on `context`; an `Err` return means the
    /// request was never submitted.
    fn open_camera(
        &self,
        id: &str,
        callback: DeviceStateCallback,
        context: &CallbackContext,
    ) -> Result<(), CameraError>;

    /// Create a reader that exposes still images as acquirable buffers.
    fn create_image_reader(
        &self,
        size: Size,
        format: PixelFormat,
        max_images: usize,
    ) -> Result<Arc<dyn ImageReader>, CameraError>;
}

/// An opened physical camera.
pub trait CameraDevice: Send + Sync {
    fn id(&self) -> &str;

    fn create_capture_session(
        &self,
        targets: Vec<Surface>,
        callback: SessionStateCallback,
        context: &CallbackContext,
    ) -> Result<(), CameraError>;

    fn close(&self);
}

/// A configured binding between a device and its output targets.
pub trait CameraSession: Send + Sync {
    fn capture(
        &self,
        request: CaptureRequest,
        callback: CaptureCallback,
        context: &CallbackContext,
    ) -> Result<(), CameraError>;

    fn set_repeating_request(
        &self,
        request: CaptureRequest,
        context: &CallbackContext,
    ) -> Result<(), CameraError>;

    fn stop_repeating(&self) -> Result<(), CameraError>;

    fn close(&self);
}

/// Source of still-image buffers.
pub trait ImageReader: Send + Sync {
    fn surface(&self) -> Surface;

    fn image_format(&self) -> PixelFormat;

    /// Take ownership of the next available buffer, if any.
    fn acquire_next_image(&self) -> Option<Image>;

    /// Install or clear (`None`) the listener invoked on `context` for
    /// every buffer that becomes available.
    fn set_on_image_available(
        &self,
        listener: Option<ImageAvailableListener>,
        context: Option<&CallbackContext>,
    );
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VideoSource {
    Surface,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AudioSource {
    Microphone,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OutputContainer {
    Mpeg4,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VideoCodec {
    H264,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AudioCodec {
    Aac,
}

/// Everything the recorder needs before `prepare`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncoderSettings {
    pub video_source: VideoSource,
    pub audio_source: AudioSource,
    pub container: OutputContainer,
    pub video_codec: VideoCodec,
    pub audio_codec: AudioCodec,
    pub output_path: PathBuf,
    pub bitrate: u32,
    pub fps: u32,
    pub size: Size,
    pub orientation_hint: u32,
}

/// Video/audio recorder fed from a surface.
pub trait VideoEncoder: Send + Sync {
    fn configure(&self, settings: &EncoderSettings) -> Result<(), CameraError>;

    fn prepare(&self) -> Result<(), CameraError>;

    /// Input surface; only valid after a successful `prepare`.
    fn surface(&self) -> Result<Surface, CameraError>;

    fn start(&self) -> Result<(), CameraError>;

    /// Fails when the encoder was never started.
    fn stop(&self) -> Result<(), CameraError>;

    fn reset(&self);
}

/// Display geometry and the preview target living on it.
pub trait DisplayProvider: Send + Sync {
    fn rotation(&self) -> Rotation;

    fn display_size(&self) -> Size;

    /// Size the preview target to `size` and hand it out.
    fn preview_surface(&self, size: Size) -> Result<Surface, CameraError>;
}

/// Live device orientation relative to the camera sensor.
pub trait OrientationSource: Send + Sync {
    /// Latest rotation sample in degrees, if one has been observed.
    fn relative_rotation(&self) -> Option<u32>;
}
