//! Persisting a matched still capture

use super::correlator::CombinedCaptureResult;
use crate::errors::CameraError;
use crate::storage::{MediaKind, MediaStorage};
use std::path::PathBuf;

/// Write the first plane of `result` verbatim to a new photo file.
///
/// Only JPEG-family formats are accepted.
pub fn save_result(
    result: &CombinedCaptureResult,
    storage: &dyn MediaStorage,
) -> Result<PathBuf, CameraError> {
    if !result.format.is_jpeg_family() {
        log::error!("Unknown image format: {:?}", result.format);
        return Err(CameraError::UnsupportedFormat(result.format));
    }

    let bytes = result
        .image
        .planes()
        .first()
        .ok_or_else(|| CameraError::CaptureFailed("image has no planes".to_string()))?;

    let path = storage.create_file(MediaKind::Photo)?;
    storage.write_bytes(&path, bytes)?;
    log::info!("Saved {} bytes to {}", bytes.len(), path.display());
    Ok(path)
}

/// [`save_result`] followed by stamping the resolved EXIF orientation.
pub fn save_photo(
    result: &CombinedCaptureResult,
    storage: &dyn MediaStorage,
) -> Result<PathBuf, CameraError> {
    let path = save_result(result, storage)?;
    storage.set_exif_orientation(&path, result.orientation)?;
    log::debug!("EXIF orientation {:?} written to {}", result.orientation, path.display());
    Ok(path)
}
