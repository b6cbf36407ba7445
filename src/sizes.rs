//! Output size negotiation
//!
//! Preview comes from a display policy; still and record sizes must share
//! the preview's aspect ratio exactly. A missing same-ratio candidate is a
//! typed failure.

use crate::errors::CameraError;
use crate::types::{Capability, CharacteristicsSnapshot, RecordStreamConfig, Size};
use serde::{Deserialize, Serialize};

/// Display bound used when the screen is at least full HD.
pub const SIZE_1080P: Size = Size::new(1920, 1080);

/// Negotiated output dimensions for the selected device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SizeSelection {
    pub preview: Size,
    pub capture: Option<Size>,
    pub record: Option<Size>,
    pub record_fps: u32,
}

impl SizeSelection {
    /// Ratio from preview coordinates to still-capture coordinates, along
    /// the width. `None` without a capture size.
    pub fn capture_scale(&self) -> Option<f64> {
        let capture = self.capture?;
        if self.preview.width == 0 {
            return None;
        }
        Some(capture.width as f64 / self.preview.width as f64)
    }
}

/// Chooses the preview size for a display among sensor-supported sizes.
pub trait PreviewSizePolicy: Send + Sync {
    fn best_preview_size(&self, display: Size, candidates: &[Size]) -> Option<Size>;
}

/// Largest sensor size that fits the display, capped at 1080p.
#[derive(Debug, Clone, Copy, Default)]
pub struct DisplaySizePolicy;

impl DisplaySizePolicy {
    /// Long/short edge bound for `display`.
    pub fn bound_for(display: Size) -> Size {
        let hd_screen = display.long_edge() >= SIZE_1080P.long_edge()
            || display.short_edge() >= SIZE_1080P.short_edge();
        if hd_screen {
            SIZE_1080P
        } else {
            display
        }
    }
}

impl PreviewSizePolicy for DisplaySizePolicy {
    fn best_preview_size(&self, display: Size, candidates: &[Size]) -> Option<Size> {
        let bound = Self::bound_for(display);
        candidates
            .iter()
            .filter(|s| {
                s.long_edge() <= bound.long_edge() && s.short_edge() <= bound.short_edge()
            })
            .max_by_key(|s| s.area())
            .copied()
    }
}

/// Preview size for `characteristics` on a display of `display` pixels.
pub fn preview_size(
    policy: &dyn PreviewSizePolicy,
    characteristics: &CharacteristicsSnapshot,
    display: Size,
) -> Result<Size, CameraError> {
    policy
        .best_preview_size(display, &characteristics.stream_map.preview_sizes)
        .ok_or_else(|| {
            CameraError::NoCompatibleSize(format!(
                "no preview size of camera {} fits display {}",
                characteristics.id, display
            ))
        })
}

/// Pick the still-capture size matching `preview`'s aspect ratio.
///
/// An exact dimension match wins; otherwise the largest-area candidate of
/// equal ratio.
pub fn capture_size(still_sizes: &[Size], preview: Size) -> Result<Size, CameraError> {
    pick_same_ratio(still_sizes.iter().copied(), preview).ok_or_else(|| {
        CameraError::NoCompatibleSize(format!(
            "no still size with aspect ratio {}:{}",
            preview.aspect_fraction().0,
            preview.aspect_fraction().1
        ))
    })
}

/// Pick the record size matching `preview`'s aspect ratio and derive its
/// frame rate from the minimum frame duration.
pub fn record_size_and_fps(
    characteristics: &CharacteristicsSnapshot,
    preview: Size,
) -> Result<(Size, u32), CameraError> {
    if !characteristics.has_capability(Capability::BackwardCompatible) {
        return Err(CameraError::Unsupported(format!(
            "camera {} cannot record",
            characteristics.id
        )));
    }

    let configs = &characteristics.stream_map.record_sizes;
    let size = pick_same_ratio(configs.iter().map(|c| c.size), preview).ok_or_else(|| {
        CameraError::NoCompatibleSize(format!(
            "no record size with aspect ratio {}:{}",
            preview.aspect_fraction().0,
            preview.aspect_fraction().1
        ))
    })?;

    let fps = configs
        .iter()
        .find(|c| c.size == size)
        .map(|c: &RecordStreamConfig| fps_from_min_frame_duration(c.min_frame_duration_ns))
        .unwrap_or(0);
    Ok((size, fps))
}

/// `round(1 / seconds)`; zero when the duration is unknown.
pub fn fps_from_min_frame_duration(min_frame_duration_ns: u64) -> u32 {
    if min_frame_duration_ns == 0 {
        return 0;
    }
    (1_000_000_000f64 / min_frame_duration_ns as f64).round() as u32
}

/// Full negotiation for one device and display.
pub fn negotiate(
    policy: &dyn PreviewSizePolicy,
    characteristics: &CharacteristicsSnapshot,
    display: Size,
    still: bool,
    record: bool,
) -> Result<SizeSelection, CameraError> {
    let preview = preview_size(policy, characteristics, display)?;

    let capture = if still {
        Some(capture_size(&characteristics.stream_map.still_sizes, preview)?)
    } else {
        None
    };

    let (record, record_fps) = if record {
        let (size, fps) = record_size_and_fps(characteristics, preview)?;
        (Some(size), fps)
    } else {
        (None, 0)
    };

    let selection = SizeSelection {
        preview,
        capture,
        record,
        record_fps,
    };
    log::debug!("Negotiated sizes for camera {}: {:?}", characteristics.id, selection);
    Ok(selection)
}

fn pick_same_ratio(candidates: impl Iterator<Item = Size>, preview: Size) -> Option<Size> {
    let mut best: Option<Size> = None;
    for candidate in candidates.filter(|s| s.same_aspect_ratio(&preview)) {
        if candidate == preview {
            return Some(candidate);
        }
        if best.map_or(true, |b| candidate.area() > b.area()) {
            best = Some(candidate);
        }
    }
    best
}
