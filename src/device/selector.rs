//! Camera selection by lens facing

use crate::errors::CameraError;
use crate::platform::CameraProvider;
use crate::types::{Capability, DeviceId, LensFacing};

/// Pick the first enumerated device that advertises the backward-compatible
/// capability and faces `facing`.
///
/// Devices whose characteristics cannot be read are skipped. The result
/// depends only on the provider's enumeration order; nothing is cached.
pub fn select_camera(
    provider: &dyn CameraProvider,
    facing: LensFacing,
) -> Result<DeviceId, CameraError> {
    let ids = provider.camera_ids()?;
    log::debug!("Selecting {} camera among {} devices", facing, ids.len());

    let compatible = ids.into_iter().filter_map(|id| {
        match provider.characteristics(&id) {
            Ok(characteristics) => Some(characteristics),
            Err(e) => {
                log::warn!("Skipping camera {}: {}", id, e);
                None
            }
        }
    });

    compatible
        .filter(|c| c.has_capability(Capability::BackwardCompatible))
        .find(|c| c.facing == facing)
        .map(|c| {
            log::info!("Selected {} camera {}", facing, c.id);
            c.id
        })
        .ok_or(CameraError::NotFound(facing))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{fixtures, SimulatedProvider};

    #[test]
    fn test_selects_first_matching_facing() {
        let provider = SimulatedProvider::new(vec![
            fixtures::front_camera("1"),
            fixtures::back_camera("0"),
            fixtures::back_camera("2"),
        ]);
        assert_eq!(select_camera(&provider, LensFacing::Back).unwrap(), "0");
        assert_eq!(select_camera(&provider, LensFacing::Front).unwrap(), "1");
    }

    #[test]
    fn test_skips_devices_without_baseline_capability() {
        let mut legacy = fixtures::back_camera("0");
        legacy.capabilities.clear();
        let provider = SimulatedProvider::new(vec![legacy, fixtures::back_camera("3")]);
        assert_eq!(select_camera(&provider, LensFacing::Back).unwrap(), "3");
    }

    #[test]
    fn test_not_found_is_typed() {
        let provider = SimulatedProvider::new(vec![fixtures::back_camera("0")]);
        let err = select_camera(&provider, LensFacing::Front).unwrap_err();
        assert!(matches!(err, CameraError::NotFound(LensFacing::Front)));
    }

    #[test]
    fn test_empty_enumeration() {
        let provider = SimulatedProvider::new(vec![]);
        assert!(select_camera(&provider, LensFacing::Back).is_err());
    }
}
