//! Orientation resolution
//!
//! A live sample from an [`OrientationSource`] wins. Without one the
//! orientation is derived from display rotation and sensor mount.

use crate::platform::OrientationSource;
use crate::types::{CharacteristicsSnapshot, LensFacing, Rotation};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;

/// EXIF orientation tag values
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u16)]
pub enum ExifOrientation {
    Undefined = 0,
    Normal = 1,
    FlipHorizontal = 2,
    Rotate180 = 3,
    FlipVertical = 4,
    Transpose = 5,
    Rotate90 = 6,
    Transverse = 7,
    Rotate270 = 8,
}

impl ExifOrientation {
    pub fn code(&self) -> u16 {
        *self as u16
    }
}

/// Offset applied to the display rotation before adding the sensor mount.
pub fn surface_rotation_offset(display_rotation: Rotation) -> u32 {
    match display_rotation {
        Rotation::Deg0 => 90,
        Rotation::Deg90 => 0,
        Rotation::Deg180 => 270,
        Rotation::Deg270 => 180,
    }
}

/// Fallback orientation in degrees when no live sample exists.
pub fn default_orientation(display_rotation: Rotation, sensor_orientation: u32) -> u32 {
    (surface_rotation_offset(display_rotation) + sensor_orientation + 270) % 360
}

/// Map a right-angle rotation and mirror flag to its EXIF tag.
pub fn compute_exif_orientation(rotation_degrees: u32, mirrored: bool) -> ExifOrientation {
    match (rotation_degrees, mirrored) {
        (0, false) => ExifOrientation::Normal,
        (0, true) => ExifOrientation::FlipHorizontal,
        (180, false) => ExifOrientation::Rotate180,
        (180, true) => ExifOrientation::FlipVertical,
        (90, false) => ExifOrientation::Rotate90,
        (90, true) => ExifOrientation::Transpose,
        (270, false) => ExifOrientation::Rotate270,
        (270, true) => ExifOrientation::Transverse,
        _ => ExifOrientation::Undefined,
    }
}

/// Rotation of the sensor image relative to how the device is held.
pub fn relative_rotation(characteristics: &CharacteristicsSnapshot, device_rotation: Rotation) -> u32 {
    let sensor = characteristics.sensor_orientation as i64;
    let sign = if characteristics.facing == LensFacing::Front {
        1
    } else {
        -1
    };
    ((sensor - device_rotation.degrees() as i64 * sign + 360).rem_euclid(360)) as u32
}

/// Resolve the capture orientation in degrees: live sample if present,
/// otherwise the display/sensor fallback.
pub fn resolve_rotation(
    source: Option<&dyn OrientationSource>,
    display_rotation: Rotation,
    characteristics: &CharacteristicsSnapshot,
) -> u32 {
    match source.and_then(|s| s.relative_rotation()) {
        Some(live) => live % 360,
        None => default_orientation(display_rotation, characteristics.sensor_orientation),
    }
}

/// EXIF tag for a capture from `characteristics` at `rotation_degrees`.
pub fn exif_for(characteristics: &CharacteristicsSnapshot, rotation_degrees: u32) -> ExifOrientation {
    compute_exif_orientation(rotation_degrees, characteristics.is_front_facing())
}

/// Publishes the latest relative rotation for one camera.
///
/// An external sensor feeds raw device angles through [`update`]; readers
/// see only distinct, snapped values.
///
/// [`update`]: OrientationTracker::update
pub struct OrientationTracker {
    characteristics: CharacteristicsSnapshot,
    sender: watch::Sender<Option<u32>>,
}

impl OrientationTracker {
    pub fn new(characteristics: CharacteristicsSnapshot) -> Self {
        let (sender, _) = watch::channel(None);
        Self {
            characteristics,
            sender,
        }
    }

    /// Feed a raw device angle in degrees.
    pub fn update(&self, device_degrees: u32) {
        let rotation = relative_rotation(&self.characteristics, Rotation::from_degrees(device_degrees));
        self.sender.send_if_modified(|current| {
            if *current == Some(rotation) {
                return false;
            }
            log::debug!("Relative rotation now {}", rotation);
            *current = Some(rotation);
            true
        });
    }

    pub fn subscribe(&self) -> watch::Receiver<Option<u32>> {
        self.sender.subscribe()
    }

    pub fn camera_id(&self) -> &str {
        &self.characteristics.id
    }
}

impl OrientationSource for OrientationTracker {
    fn relative_rotation(&self) -> Option<u32> {
        *self.sender.borrow()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::fixtures;

    #[test]
    fn test_default_orientation_table() {
        assert_eq!(default_orientation(Rotation::Deg0, 90), 90);
        assert_eq!(default_orientation(Rotation::Deg90, 90), 0);
        assert_eq!(default_orientation(Rotation::Deg180, 90), 270);
        assert_eq!(default_orientation(Rotation::Deg270, 90), 180);
        assert_eq!(default_orientation(Rotation::Deg0, 270), 270);
    }

    #[test]
    fn test_exif_mapping() {
        assert_eq!(compute_exif_orientation(0, false).code(), 1);
        assert_eq!(compute_exif_orientation(0, true).code(), 2);
        assert_eq!(compute_exif_orientation(180, false).code(), 3);
        assert_eq!(compute_exif_orientation(180, true).code(), 4);
        assert_eq!(compute_exif_orientation(90, true).code(), 5);
        assert_eq!(compute_exif_orientation(90, false).code(), 6);
        assert_eq!(compute_exif_orientation(270, true).code(), 7);
        assert_eq!(compute_exif_orientation(270, false).code(), 8);
        assert_eq!(compute_exif_orientation(45, false), ExifOrientation::Undefined);
    }

    #[test]
    fn test_relative_rotation_by_facing() {
        let back = fixtures::back_camera("0");
        assert_eq!(back.sensor_orientation, 90);
        assert_eq!(relative_rotation(&back, Rotation::Deg0), 90);
        assert_eq!(relative_rotation(&back, Rotation::Deg90), 180);

        let front = fixtures::front_camera("1");
        assert_eq!(front.sensor_orientation, 270);
        assert_eq!(relative_rotation(&front, Rotation::Deg90), 180);
        assert_eq!(relative_rotation(&front, Rotation::Deg180), 90);
    }

    #[test]
    fn test_tracker_publishes_distinct_values() {
        let tracker = OrientationTracker::new(fixtures::back_camera("0"));
        let mut rx = tracker.subscribe();
        assert_eq!(tracker.relative_rotation(), None);

        tracker.update(2);
        assert!(rx.has_changed().unwrap());
        assert_eq!(*rx.borrow_and_update(), Some(90));

        // Same snapped angle, no new value
        tracker.update(10);
        assert!(!rx.has_changed().unwrap());

        tracker.update(92);
        assert_eq!(tracker.relative_rotation(), Some(180));
    }

    #[test]
    fn test_resolve_prefers_live_sample() {
        let camera = fixtures::back_camera("0");
        let tracker = OrientationTracker::new(camera.clone());
        assert_eq!(resolve_rotation(Some(&tracker), Rotation::Deg0, &camera), 90);
        assert_eq!(resolve_rotation(None, Rotation::Deg90, &camera), 0);

        tracker.update(180);
        assert_eq!(resolve_rotation(Some(&tracker), Rotation::Deg90, &camera), 270);
    }
}
