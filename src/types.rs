//! Core data types shared by every component: geometry, device
//! characteristics, output targets, requests and image buffers.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Identifier of a camera device as enumerated by the camera subsystem.
pub type DeviceId = String;

/// Output dimensions in pixels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Size {
    pub width: u32,
    pub height: u32,
}

impl Size {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub fn area(&self) -> u64 {
        self.width as u64 * self.height as u64
    }

    pub fn long_edge(&self) -> u32 {
        self.width.max(self.height)
    }

    pub fn short_edge(&self) -> u32 {
        self.width.min(self.height)
    }

    /// Exact aspect-ratio equality by cross multiplication.
    pub fn same_aspect_ratio(&self, other: &Size) -> bool {
        self.width as u64 * other.height as u64 == other.width as u64 * self.height as u64
    }

    /// Aspect ratio reduced to lowest terms, e.g. 1920x1080 -> (16, 9)
    pub fn aspect_fraction(&self) -> (u32, u32) {
        let divisor = gcd(self.width, self.height);
        if divisor == 0 {
            return (self.width, self.height);
        }
        (self.width / divisor, self.height / divisor)
    }
}

impl fmt::Display for Size {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

fn gcd(a: u32, b: u32) -> u32 {
    if b == 0 {
        a
    } else {
        gcd(b, a % b)
    }
}

/// Direction the lens faces relative to the screen
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LensFacing {
    Front,
    Back,
    External,
}

impl fmt::Display for LensFacing {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            LensFacing::Front => write!(f, "front"),
            LensFacing::Back => write!(f, "back"),
            LensFacing::External => write!(f, "external"),
        }
    }
}

/// Display rotation. The domain is closed over the four right angles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Rotation {
    Deg0,
    Deg90,
    Deg180,
    Deg270,
}

impl Rotation {
    pub fn degrees(&self) -> u32 {
        match self {
            Rotation::Deg0 => 0,
            Rotation::Deg90 => 90,
            Rotation::Deg180 => 180,
            Rotation::Deg270 => 270,
        }
    }

    /// Snap arbitrary degrees onto the nearest right angle.
    pub fn from_degrees(degrees: u32) -> Self {
        match ((degrees % 360) + 45) / 90 % 4 {
            0 => Rotation::Deg0,
            1 => Rotation::Deg90,
            2 => Rotation::Deg180,
            _ => Rotation::Deg270,
        }
    }
}

/// Pixel formats an image reader can produce
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PixelFormat {
    Jpeg,
    DepthJpeg,
    Yuv420,
    Raw16,
    Private,
}

impl PixelFormat {
    pub fn is_jpeg_family(&self) -> bool {
        matches!(self, PixelFormat::Jpeg | PixelFormat::DepthJpeg)
    }
}

/// Capability flags advertised by a device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Capability {
    BackwardCompatible,
    ManualSensor,
    ManualPostProcessing,
    Raw,
    BurstCapture,
    DepthOutput,
}

/// One recorder-compatible output size together with its fastest frame time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordStreamConfig {
    pub size: Size,
    /// Minimum frame duration in nanoseconds; zero when unknown.
    pub min_frame_duration_ns: u64,
}

/// Output sizes the sensor supports, per consumer
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamConfigurationMap {
    pub preview_sizes: Vec<Size>,
    pub still_sizes: Vec<Size>,
    pub record_sizes: Vec<RecordStreamConfig>,
}

/// Immutable per-device data, replaced whenever the selected device changes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CharacteristicsSnapshot {
    pub id: DeviceId,
    pub facing: LensFacing,
    /// Clockwise angle the sensor is mounted at, in degrees.
    pub sensor_orientation: u32,
    pub capabilities: Vec<Capability>,
    pub stream_map: StreamConfigurationMap,
}

impl CharacteristicsSnapshot {
    pub fn has_capability(&self, capability: Capability) -> bool {
        self.capabilities.contains(&capability)
    }

    pub fn is_front_facing(&self) -> bool {
        self.facing == LensFacing::Front
    }
}

static NEXT_SURFACE_ID: AtomicU64 = AtomicU64::new(1);

/// What an output target feeds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SurfaceKind {
    Preview,
    StillImage,
    Encoder,
}

/// An output target a capture session can render into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Surface {
    id: u64,
    pub kind: SurfaceKind,
    pub size: Size,
}

impl Surface {
    pub fn new(kind: SurfaceKind, size: Size) -> Self {
        Self {
            id: NEXT_SURFACE_ID.fetch_add(1, Ordering::Relaxed),
            kind,
            size,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }
}

/// Request templates understood by the camera subsystem
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RequestTemplate {
    Preview,
    StillCapture,
    Record,
}

/// Auto-focus modes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AfMode {
    Off,
    Auto,
    ContinuousVideo,
    ContinuousPicture,
}

/// A capture request: template plus the targets that receive its frames.
#[derive(Debug, Clone, PartialEq)]
pub struct CaptureRequest {
    pub template: RequestTemplate,
    pub targets: Vec<Surface>,
    pub af_mode: Option<AfMode>,
}

impl CaptureRequest {
    pub fn new(template: RequestTemplate) -> Self {
        Self {
            template,
            targets: Vec::new(),
            af_mode: None,
        }
    }

    pub fn with_target(mut self, target: Surface) -> Self {
        self.targets.push(target);
        self
    }

    pub fn with_targets(mut self, targets: impl IntoIterator<Item = Surface>) -> Self {
        self.targets.extend(targets);
        self
    }

    pub fn with_af_mode(mut self, mode: AfMode) -> Self {
        self.af_mode = Some(mode);
        self
    }
}

/// Per-request result data, delivered independently of the image buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaptureMetadata {
    /// Sensor start-of-exposure timestamp in nanoseconds.
    pub sensor_timestamp: i64,
    pub frame_number: u64,
}

type ReleaseHook = Box<dyn FnOnce(i64) + Send>;

/// An image buffer acquired from an image reader.
///
/// The owner must give the buffer back. `close()` does so explicitly;
/// dropping an unclosed image releases it as well, so the release hook
/// runs exactly once whichever path the buffer takes.
pub struct Image {
    timestamp: i64,
    format: PixelFormat,
    size: Size,
    planes: Vec<Bytes>,
    release: Option<ReleaseHook>,
}

impl Image {
    pub fn new(timestamp: i64, format: PixelFormat, size: Size, planes: Vec<Bytes>) -> Self {
        Self {
            timestamp,
            format,
            size,
            planes,
            release: None,
        }
    }

    /// Attach the hook that returns this buffer to its producer.
    pub fn with_release(mut self, hook: impl FnOnce(i64) + Send + 'static) -> Self {
        self.release = Some(Box::new(hook));
        self
    }

    pub fn timestamp(&self) -> i64 {
        self.timestamp
    }

    pub fn format(&self) -> PixelFormat {
        self.format
    }

    pub fn size(&self) -> Size {
        self.size
    }

    pub fn planes(&self) -> &[Bytes] {
        &self.planes
    }

    /// Release the buffer back to its producer.
    pub fn close(mut self) {
        self.release_buffer();
    }

    fn release_buffer(&mut self) {
        if let Some(hook) = self.release.take() {
            hook(self.timestamp);
        }
    }
}

impl Drop for Image {
    fn drop(&mut self) {
        self.release_buffer();
    }
}

impl fmt::Debug for Image {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Image")
            .field("timestamp", &self.timestamp)
            .field("format", &self.format)
            .field("size", &self.size)
            .field("planes", &self.planes.len())
            .finish()
    }
}
