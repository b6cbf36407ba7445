//! Media file storage
//!
//! Creates uniquely named output files, writes captured bytes verbatim and
//! stamps the EXIF orientation tag into saved JPEGs.

use crate::config::StorageConfig;
use crate::errors::CameraError;
use crate::orientation::ExifOrientation;
use serde::{Deserialize, Serialize};
use std::fs::{self, OpenOptions};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MediaKind {
    Photo,
    Video,
}

impl MediaKind {
    pub fn extension(&self) -> &'static str {
        match self {
            MediaKind::Photo => "jpg",
            MediaKind::Video => "mp4",
        }
    }
}

/// Where captured media ends up.
pub trait MediaStorage: Send + Sync {
    /// Create a new, uniquely named, empty file for `kind`.
    fn create_file(&self, kind: MediaKind) -> Result<PathBuf, CameraError>;

    fn write_bytes(&self, path: &Path, bytes: &[u8]) -> Result<(), CameraError>;

    fn set_exif_orientation(
        &self,
        path: &Path,
        orientation: ExifOrientation,
    ) -> Result<(), CameraError>;
}

/// Stores media in one directory as `<prefix>_<timestamp>.<ext>`.
#[derive(Debug, Clone)]
pub struct FileStorage {
    directory: PathBuf,
    photo_prefix: String,
    video_prefix: String,
    date_format: String,
}

impl FileStorage {
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self::from_config(&StorageConfig {
            output_directory: directory.into().to_string_lossy().into_owned(),
            ..StorageConfig::default()
        })
    }

    pub fn from_config(config: &StorageConfig) -> Self {
        Self {
            directory: PathBuf::from(&config.output_directory),
            photo_prefix: config.photo_prefix.clone(),
            video_prefix: config.video_prefix.clone(),
            date_format: config.file_date_format.clone(),
        }
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    fn file_name(&self, kind: MediaKind, suffix: Option<&str>) -> String {
        let prefix = match kind {
            MediaKind::Photo => &self.photo_prefix,
            MediaKind::Video => &self.video_prefix,
        };
        let stamp = chrono::Local::now().format(&self.date_format);
        match suffix {
            Some(suffix) => format!("{}_{}_{}.{}", prefix, stamp, suffix, kind.extension()),
            None => format!("{}_{}.{}", prefix, stamp, kind.extension()),
        }
    }
}

impl MediaStorage for FileStorage {
    fn create_file(&self, kind: MediaKind) -> Result<PathBuf, CameraError> {
        fs::create_dir_all(&self.directory)?;

        let mut suffix: Option<String> = None;
        loop {
            let path = self.directory.join(self.file_name(kind, suffix.as_deref()));
            match OpenOptions::new().write(true).create_new(true).open(&path) {
                Ok(_) => {
                    log::debug!("Created {}", path.display());
                    return Ok(path);
                }
                Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                    let short = uuid::Uuid::new_v4().simple().to_string();
                    suffix = Some(short[..8].to_string());
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    fn write_bytes(&self, path: &Path, bytes: &[u8]) -> Result<(), CameraError> {
        fs::write(path, bytes)?;
        Ok(())
    }

    fn set_exif_orientation(
        &self,
        path: &Path,
        orientation: ExifOrientation,
    ) -> Result<(), CameraError> {
        let jpeg = fs::read(path)?;
        let stamped = apply_exif_orientation(&jpeg, orientation)?;
        fs::write(path, stamped)?;
        Ok(())
    }
}

const EXIF_HEADER: &[u8; 6] = b"Exif\0\0";
const ORIENTATION_TAG: u16 = 0x0112;
const TYPE_SHORT: u16 = 3;

/// Return `jpeg` with its EXIF orientation set to `orientation`.
///
/// An existing orientation entry is patched in place. An Exif segment
/// without one gets the entry added to IFD0 with every other tag kept. A
/// JPEG without Exif gets a minimal segment after SOI.
pub fn apply_exif_orientation(
    jpeg: &[u8],
    orientation: ExifOrientation,
) -> Result<Vec<u8>, CameraError> {
    if jpeg.len() < 4 || jpeg[0] != 0xFF || jpeg[1] != 0xD8 {
        return Err(CameraError::Io("not a JPEG stream".to_string()));
    }

    let mut out = jpeg.to_vec();
    match find_exif_segment(jpeg) {
        Some(segment) => {
            let tiff_start = segment.start + 4 + EXIF_HEADER.len();
            let end = segment.start + 2 + segment.length;
            if patch_orientation(&mut out[tiff_start..end], orientation.code()) {
                return Ok(out);
            }
            let tiff = with_orientation_entry(&jpeg[tiff_start..end], orientation.code())
                .ok_or_else(|| CameraError::Io("malformed Exif segment".to_string()))?;
            out.splice(segment.start..end, exif_segment(&tiff)?);
        }
        None => {
            out.splice(2..2, minimal_exif_segment(orientation.code()));
        }
    }
    Ok(out)
}

/// Orientation code stored in `jpeg`, if any.
pub fn read_exif_orientation(jpeg: &[u8]) -> Option<u16> {
    let segment = find_exif_segment(jpeg)?;
    let tiff_start = segment.start + 4 + EXIF_HEADER.len();
    let tiff = &jpeg[tiff_start..segment.start + 2 + segment.length];
    let entry = find_orientation_entry(tiff)?;
    let order = ByteOrder::of(tiff)?;
    order.read_u16(tiff, entry + 8)
}

struct Segment {
    start: usize,
    /// Length field value, which includes its own two bytes
    length: usize,
}

fn find_exif_segment(jpeg: &[u8]) -> Option<Segment> {
    let mut i = 2;
    while i + 4 <= jpeg.len() {
        if jpeg[i] != 0xFF {
            return None;
        }
        let marker = jpeg[i + 1];
        match marker {
            0xFF => {
                // Fill byte
                i += 1;
                continue;
            }
            0x01 | 0xD0..=0xD7 => {
                i += 2;
                continue;
            }
            0xD9 | 0xDA => return None,
            _ => {}
        }
        let length = u16::from_be_bytes([jpeg[i + 2], jpeg[i + 3]]) as usize;
        if length < 2 || i + 2 + length > jpeg.len() {
            return None;
        }
        let payload = &jpeg[i + 4..i + 2 + length];
        if marker == 0xE1 && payload.len() >= 14 && payload.starts_with(EXIF_HEADER) {
            return Some(Segment { start: i, length });
        }
        i += 2 + length;
    }
    None
}

#[derive(Clone, Copy)]
enum ByteOrder {
    Little,
    Big,
}

impl ByteOrder {
    fn of(tiff: &[u8]) -> Option<Self> {
        match tiff.get(0..2)? {
            b"II" => Some(ByteOrder::Little),
            b"MM" => Some(ByteOrder::Big),
            _ => None,
        }
    }

    fn read_u16(self, data: &[u8], at: usize) -> Option<u16> {
        let bytes: [u8; 2] = data.get(at..at + 2)?.try_into().ok()?;
        Some(match self {
            ByteOrder::Little => u16::from_le_bytes(bytes),
            ByteOrder::Big => u16::from_be_bytes(bytes),
        })
    }

    fn read_u32(self, data: &[u8], at: usize) -> Option<u32> {
        let bytes: [u8; 4] = data.get(at..at + 4)?.try_into().ok()?;
        Some(match self {
            ByteOrder::Little => u32::from_le_bytes(bytes),
            ByteOrder::Big => u32::from_be_bytes(bytes),
        })
    }

    fn u16_bytes(self, value: u16) -> [u8; 2] {
        match self {
            ByteOrder::Little => value.to_le_bytes(),
            ByteOrder::Big => value.to_be_bytes(),
        }
    }

    fn u32_bytes(self, value: u32) -> [u8; 4] {
        match self {
            ByteOrder::Little => value.to_le_bytes(),
            ByteOrder::Big => value.to_be_bytes(),
        }
    }

    fn write_u16(self, data: &mut [u8], at: usize, value: u16) {
        data[at..at + 2].copy_from_slice(&self.u16_bytes(value));
    }

    fn write_u32(self, data: &mut [u8], at: usize, value: u32) {
        data[at..at + 4].copy_from_slice(&self.u32_bytes(value));
    }
}

/// Offset of the IFD0 entry for `tag` within `tiff`.
fn find_ifd0_entry(tiff: &[u8], tag: u16) -> Option<usize> {
    let order = ByteOrder::of(tiff)?;
    let ifd = order.read_u32(tiff, 4)? as usize;
    let count = order.read_u16(tiff, ifd)? as usize;
    (0..count)
        .map(|k| ifd + 2 + 12 * k)
        .take_while(|entry| entry + 12 <= tiff.len())
        .find(|&entry| order.read_u16(tiff, entry) == Some(tag))
}

fn find_orientation_entry(tiff: &[u8]) -> Option<usize> {
    let order = ByteOrder::of(tiff)?;
    let entry = find_ifd0_entry(tiff, ORIENTATION_TAG)?;
    (order.read_u16(tiff, entry + 2) == Some(TYPE_SHORT)).then_some(entry)
}

fn patch_orientation(tiff: &mut [u8], code: u16) -> bool {
    let (Some(order), Some(entry)) = (ByteOrder::of(tiff), find_orientation_entry(tiff)) else {
        return false;
    };
    order.write_u16(tiff, entry + 8, code);
    true
}

/// Copy of `tiff` whose IFD0 carries an orientation entry.
///
/// The rebuilt IFD0 is appended and the header repointed at it, so no
/// existing value moves and every offset in the block stays valid. Entries
/// stay sorted by tag; a non-SHORT orientation entry is replaced.
fn with_orientation_entry(tiff: &[u8], code: u16) -> Option<Vec<u8>> {
    let order = ByteOrder::of(tiff)?;
    let ifd = order.read_u32(tiff, 4)? as usize;
    let count = order.read_u16(tiff, ifd)? as usize;
    let entries_end = ifd + 2 + 12 * count;
    let entries = tiff.get(ifd + 2..entries_end)?;
    let next_ifd = tiff.get(entries_end..entries_end + 4)?;

    let kept: Vec<&[u8]> = entries
        .chunks_exact(12)
        .filter(|entry| order.read_u16(entry, 0) != Some(ORIENTATION_TAG))
        .collect();

    let mut orientation = Vec::with_capacity(12);
    orientation.extend_from_slice(&order.u16_bytes(ORIENTATION_TAG));
    orientation.extend_from_slice(&order.u16_bytes(TYPE_SHORT));
    orientation.extend_from_slice(&order.u32_bytes(1));
    orientation.extend_from_slice(&order.u16_bytes(code));
    orientation.extend_from_slice(&[0, 0]);

    let mut out = tiff.to_vec();
    // IFDs start on a word boundary
    if out.len() % 2 == 1 {
        out.push(0);
    }
    let new_ifd = u32::try_from(out.len()).ok()?;
    out.extend_from_slice(&order.u16_bytes(u16::try_from(kept.len() + 1).ok()?));

    let mut inserted = false;
    for entry in kept {
        if !inserted && order.read_u16(entry, 0)? > ORIENTATION_TAG {
            out.extend_from_slice(&orientation);
            inserted = true;
        }
        out.extend_from_slice(entry);
    }
    if !inserted {
        out.extend_from_slice(&orientation);
    }
    out.extend_from_slice(next_ifd);

    order.write_u32(&mut out, 4, new_ifd);
    Some(out)
}

fn exif_segment(tiff: &[u8]) -> Result<Vec<u8>, CameraError> {
    let length = u16::try_from(2 + EXIF_HEADER.len() + tiff.len())
        .map_err(|_| CameraError::Io("Exif segment too large to add orientation".to_string()))?;
    let mut segment = vec![0xFF, 0xE1];
    segment.extend_from_slice(&length.to_be_bytes());
    segment.extend_from_slice(EXIF_HEADER);
    segment.extend_from_slice(tiff);
    Ok(segment)
}

fn minimal_exif_segment(code: u16) -> Vec<u8> {
    let mut payload = Vec::with_capacity(32);
    payload.extend_from_slice(EXIF_HEADER);
    // Big-endian TIFF header, IFD0 at offset 8
    payload.extend_from_slice(b"MM\0\x2A\0\0\0\x08");
    payload.extend_from_slice(&1u16.to_be_bytes());
    payload.extend_from_slice(&ORIENTATION_TAG.to_be_bytes());
    payload.extend_from_slice(&TYPE_SHORT.to_be_bytes());
    payload.extend_from_slice(&1u32.to_be_bytes());
    payload.extend_from_slice(&code.to_be_bytes());
    payload.extend_from_slice(&[0, 0]);
    // No next IFD
    payload.extend_from_slice(&0u32.to_be_bytes());

    let mut segment = vec![0xFF, 0xE1];
    segment.extend_from_slice(&((payload.len() + 2) as u16).to_be_bytes());
    segment.extend_from_slice(&payload);
    segment
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::synthetic_data::synthetic_jpeg;
    use tempfile::TempDir;

    #[test]
    fn test_inserts_orientation_when_missing() {
        let jpeg = synthetic_jpeg(32, 24, 7);
        assert_eq!(read_exif_orientation(&jpeg), None);

        let stamped = apply_exif_orientation(&jpeg, ExifOrientation::Rotate90).unwrap();
        assert_eq!(read_exif_orientation(&stamped), Some(6));
        assert_eq!(&stamped[..2], &[0xFF, 0xD8]);
        // Still decodes
        assert!(image::load_from_memory(&stamped).is_ok());
    }

    #[test]
    fn test_patches_existing_orientation() {
        let jpeg = synthetic_jpeg(16, 16, 1);
        let first = apply_exif_orientation(&jpeg, ExifOrientation::Rotate90).unwrap();
        let second = apply_exif_orientation(&first, ExifOrientation::Rotate270).unwrap();
        assert_eq!(first.len(), second.len());
        assert_eq!(read_exif_orientation(&second), Some(8));
    }

    /// Little-endian Exif with Make (out of line) and Model (inline) but
    /// no orientation.
    fn exif_without_orientation() -> Vec<u8> {
        let mut tiff = Vec::new();
        tiff.extend_from_slice(b"II\x2A\0");
        tiff.extend_from_slice(&8u32.to_le_bytes());
        tiff.extend_from_slice(&2u16.to_le_bytes());
        // Make, ASCII, 5 bytes at offset 38
        tiff.extend_from_slice(&0x010Fu16.to_le_bytes());
        tiff.extend_from_slice(&2u16.to_le_bytes());
        tiff.extend_from_slice(&5u32.to_le_bytes());
        tiff.extend_from_slice(&38u32.to_le_bytes());
        // Model, ASCII, 4 bytes inline
        tiff.extend_from_slice(&0x0110u16.to_le_bytes());
        tiff.extend_from_slice(&2u16.to_le_bytes());
        tiff.extend_from_slice(&4u32.to_le_bytes());
        tiff.extend_from_slice(b"Pix\0");
        tiff.extend_from_slice(&0u32.to_le_bytes());
        tiff.extend_from_slice(b"Crab\0");

        let jpeg = synthetic_jpeg(16, 12, 5);
        let mut out = jpeg[..2].to_vec();
        out.extend_from_slice(&exif_segment(&tiff).unwrap());
        out.extend_from_slice(&jpeg[2..]);
        out
    }

    fn ifd0_ascii(jpeg: &[u8], tag: u16) -> Option<Vec<u8>> {
        let segment = find_exif_segment(jpeg)?;
        let tiff = &jpeg[segment.start + 4 + EXIF_HEADER.len()..segment.start + 2 + segment.length];
        let order = ByteOrder::of(tiff)?;
        let entry = find_ifd0_entry(tiff, tag)?;
        let count = order.read_u32(tiff, entry + 4)? as usize;
        let at = if count <= 4 {
            entry + 8
        } else {
            order.read_u32(tiff, entry + 8)? as usize
        };
        tiff.get(at..at + count).map(<[u8]>::to_vec)
    }

    #[test]
    fn test_adding_orientation_keeps_other_tags() {
        let jpeg = exif_without_orientation();
        assert_eq!(read_exif_orientation(&jpeg), None);
        assert_eq!(ifd0_ascii(&jpeg, 0x010F).as_deref(), Some(&b"Crab\0"[..]));

        let stamped = apply_exif_orientation(&jpeg, ExifOrientation::Rotate90).unwrap();
        assert_eq!(read_exif_orientation(&stamped), Some(6));
        assert_eq!(ifd0_ascii(&stamped, 0x010F).as_deref(), Some(&b"Crab\0"[..]));
        assert_eq!(ifd0_ascii(&stamped, 0x0110).as_deref(), Some(&b"Pix\0"[..]));
        assert!(image::load_from_memory(&stamped).is_ok());

        // A second stamp patches the entry it added
        let again = apply_exif_orientation(&stamped, ExifOrientation::Rotate180).unwrap();
        assert_eq!(again.len(), stamped.len());
        assert_eq!(read_exif_orientation(&again), Some(3));
    }

    #[test]
    fn test_malformed_exif_is_not_replaced() {
        let mut jpeg = exif_without_orientation();
        let segment = find_exif_segment(&jpeg).unwrap();
        // Corrupt the byte-order mark
        jpeg[segment.start + 4 + EXIF_HEADER.len()] = b'X';
        let err = apply_exif_orientation(&jpeg, ExifOrientation::Normal).unwrap_err();
        assert!(matches!(err, CameraError::Io(_)));
    }

    #[test]
    fn test_rejects_non_jpeg() {
        let err = apply_exif_orientation(b"not a jpeg", ExifOrientation::Normal).unwrap_err();
        assert!(matches!(err, CameraError::Io(_)));
    }

    #[test]
    fn test_file_names_are_unique() {
        let dir = TempDir::new().unwrap();
        let storage = FileStorage::new(dir.path());

        let a = storage.create_file(MediaKind::Photo).unwrap();
        let b = storage.create_file(MediaKind::Photo).unwrap();
        let c = storage.create_file(MediaKind::Video).unwrap();

        assert_ne!(a, b);
        assert!(a.exists() && b.exists() && c.exists());
        let name = a.file_name().unwrap().to_string_lossy().into_owned();
        assert!(name.starts_with("IMG_"));
        assert!(name.ends_with(".jpg"));
        assert!(c.to_string_lossy().ends_with(".mp4"));
    }

    #[test]
    fn test_write_then_stamp() {
        let dir = TempDir::new().unwrap();
        let storage = FileStorage::new(dir.path().join("nested"));
        let path = storage.create_file(MediaKind::Photo).unwrap();

        let jpeg = synthetic_jpeg(20, 10, 3);
        storage.write_bytes(&path, &jpeg).unwrap();
        assert_eq!(fs::read(&path).unwrap(), jpeg);

        storage
            .set_exif_orientation(&path, ExifOrientation::FlipHorizontal)
            .unwrap();
        assert_eq!(read_exif_orientation(&fs::read(&path).unwrap()), Some(2));
    }
}
