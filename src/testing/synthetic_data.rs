//! Synthetic capture data
//!
//! Real JPEG bytes for simulated still captures so saved files decode and
//! EXIF stamping operates on genuine segment layouts.

use image::{ImageBuffer, ImageFormat, Rgb};
use std::io::Cursor;

/// Encode a `width`x`height` gradient as JPEG. `seed` shifts the pattern so
/// consecutive frames differ.
pub fn synthetic_jpeg(width: u32, height: u32, seed: u64) -> Vec<u8> {
    let base = (seed % 256) as u8;
    let frame = ImageBuffer::from_fn(width.max(1), height.max(1), |x, y| {
        Rgb([
            base.wrapping_add((x % 256) as u8),
            base.wrapping_add((y % 256) as u8),
            base.wrapping_add(((x + y) % 256) as u8),
        ])
    });

    let mut buf = Cursor::new(Vec::new());
    match frame.write_to(&mut buf, ImageFormat::Jpeg) {
        Ok(()) => buf.into_inner(),
        Err(e) => {
            log::warn!("Synthetic JPEG encode failed: {}", e);
            // Bare SOI/EOI still identifies as JPEG
            vec![0xFF, 0xD8, 0xFF, 0xD9]
        }
    }
}

/// Sensor timestamp in nanoseconds for frame `n` at `fps`.
pub fn frame_timestamp(n: u64, fps: u32) -> i64 {
    if fps == 0 {
        return n as i64;
    }
    (n * 1_000_000_000 / fps as u64) as i64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_synthetic_jpeg_decodes() {
        let bytes = synthetic_jpeg(64, 48, 0);
        assert_eq!(&bytes[..2], &[0xFF, 0xD8]);
        let decoded = image::load_from_memory(&bytes).unwrap();
        assert_eq!(decoded.width(), 64);
        assert_eq!(decoded.height(), 48);
    }

    #[test]
    fn test_synthetic_frames_differ() {
        assert_ne!(synthetic_jpeg(32, 32, 0), synthetic_jpeg(32, 32, 100));
    }

    #[test]
    fn test_frame_timestamps() {
        assert_eq!(frame_timestamp(0, 30), 0);
        assert_eq!(frame_timestamp(30, 30), 1_000_000_000);
        assert_eq!(frame_timestamp(3, 0), 3);
    }
}
