//! Snapshot cropping

use bytes::Bytes;
use hazard_core::BoundingBox;
use image::ImageFormat;
use std::io::Cursor;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SnapshotError {
    #[error("Bounding box lies outside the {width}x{height} frame")]
    EmptyCrop { width: u32, height: u32 },

    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),
}

pub type SnapshotResult<T> = Result<T, SnapshotError>;

/// Cut the bounding box out of a compressed frame and re-encode it as JPEG
pub fn crop_snapshot(frame: &[u8], bbox: &BoundingBox) -> SnapshotResult<Bytes> {
    let image = image::load_from_memory(frame)?;
    let (width, height) = (image.width(), image.height());

    let (x, y, w, h) = bbox
        .clip_to(width, height)
        .ok_or(SnapshotError::EmptyCrop { width, height })?;

    let cropped = image.crop_imm(x, y, w, h).to_rgb8();
    let mut out = Cursor::new(Vec::new());
    cropped.write_to(&mut out, ImageFormat::Jpeg)?;

    Ok(Bytes::from(out.into_inner()))
}

#[cfg(test)]
pub(crate) fn test_frame(width: u32, height: u32) -> Bytes {
    let image = image::RgbImage::from_pixel(width, height, image::Rgb([90, 120, 200]));
    let mut out = Cursor::new(Vec::new());
    image.write_to(&mut out, ImageFormat::Jpeg).unwrap();
    Bytes::from(out.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_crop_dimensions() {
        let frame = test_frame(64, 48);
        let crop = crop_snapshot(&frame, &BoundingBox::new(10.0, 8.0, 30.0, 40.0)).unwrap();

        let decoded = image::load_from_memory(&crop).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (20, 32));
    }

    #[test]
    fn test_crop_clamped_to_frame() {
        let frame = test_frame(64, 48);
        let crop = crop_snapshot(&frame, &BoundingBox::new(50.0, 40.0, 100.0, 100.0)).unwrap();

        let decoded = image::load_from_memory(&crop).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (14, 8));
    }

    #[test]
    fn test_crop_outside_frame() {
        let frame = test_frame(64, 48);
        let result = crop_snapshot(&frame, &BoundingBox::new(100.0, 100.0, 120.0, 120.0));
        assert!(matches!(result, Err(SnapshotError::EmptyCrop { .. })));
    }

    #[test]
    fn test_garbage_frame() {
        let result = crop_snapshot(b"not a jpeg", &BoundingBox::new(0.0, 0.0, 4.0, 4.0));
        assert!(matches!(result, Err(SnapshotError::Image(_))));
    }
}
