//! Bounded re-encoding of attachment photos before caching and upload.

use std::io::Cursor;

use image::{codecs::jpeg::JpegEncoder, imageops::FilterType, DynamicImage, GenericImageView};

use crate::{Error, Result};

/// Images are never shrunk below this edge length while hunting for a
/// small enough encoding.
const MIN_DIMENSION: u32 = 64;

/// Limits applied by [`prepare_image`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PrepareOptions {
    /// Encoded size ceiling in bytes.
    pub max_bytes: usize,
    /// Longest allowed edge in pixels.
    pub max_dimension: u32,
    /// JPEG quality of the first attempt.
    pub initial_quality: u8,
    /// Lowest JPEG quality tried before shrinking the image.
    pub min_quality: u8,
    /// Quality decrement between attempts.
    pub quality_step: u8,
}

impl Default for PrepareOptions {
    fn default() -> Self {
        Self {
            max_bytes: 900 * 1024,
            max_dimension: 1600,
            initial_quality: 85,
            min_quality: 25,
            quality_step: 10,
        }
    }
}

/// Re-encode `source_bytes` as a JPEG no larger than `options.max_bytes`.
///
/// The image is first bounded to `max_dimension` (never upscaled), then the
/// JPEG quality is lowered step by step; if the floor quality is still too
/// large the image is shrunk to three quarters and the search restarts. The
/// same input and options always produce the same bytes.
pub fn prepare_image(source_bytes: &[u8], options: PrepareOptions) -> Result<Vec<u8>> {
    if source_bytes.is_empty() {
        return Err(Error::InvalidInput(
            "Attachment bytes cannot be empty".to_string(),
        ));
    }
    if options.max_bytes == 0 || options.max_dimension == 0 || options.quality_step == 0 {
        return Err(Error::InvalidInput(
            "Attachment limits must be greater than zero".to_string(),
        ));
    }

    let source = image::load_from_memory(source_bytes).map_err(|error| {
        Error::InvalidInput(format!("Failed to decode attachment image: {error}"))
    })?;

    let (width, height) = source.dimensions();
    let mut image = if width <= options.max_dimension && height <= options.max_dimension {
        DynamicImage::ImageRgb8(source.to_rgb8())
    } else {
        DynamicImage::ImageRgb8(
            source
                .resize(options.max_dimension, options.max_dimension, FilterType::Triangle)
                .to_rgb8(),
        )
    };

    loop {
        let mut quality = options.initial_quality.clamp(1, 100);
        let floor = options.min_quality.clamp(1, quality);
        loop {
            let encoded = encode_jpeg(&image, quality)?;
            if encoded.len() <= options.max_bytes {
                tracing::debug!(
                    "Prepared attachment {}x{} at quality {} ({} bytes)",
                    image.width(),
                    image.height(),
                    quality,
                    encoded.len()
                );
                return Ok(encoded);
            }
            if quality == floor {
                break;
            }
            quality = quality.saturating_sub(options.quality_step).max(floor);
        }

        let (width, height) = image.dimensions();
        if width <= MIN_DIMENSION && height <= MIN_DIMENSION {
            return Err(Error::Storage(format!(
                "Attachment cannot be encoded below {} bytes",
                options.max_bytes
            )));
        }
        image = image.resize_exact(
            (width * 3 / 4).max(1),
            (height * 3 / 4).max(1),
            FilterType::Triangle,
        );
    }
}

fn encode_jpeg(image: &DynamicImage, quality: u8) -> Result<Vec<u8>> {
    let mut cursor = Cursor::new(Vec::new());
    let mut encoder = JpegEncoder::new_with_quality(&mut cursor, quality);
    encoder
        .encode_image(image)
        .map_err(|error| Error::Storage(format!("Failed to encode JPEG attachment: {error}")))?;
    Ok(cursor.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageBuffer, ImageFormat, Rgba};

    fn noisy_png(width: u32, height: u32) -> Vec<u8> {
        let mut state: u32 = 0x1234_5678;
        let image = ImageBuffer::<Rgba<u8>, Vec<u8>>::from_fn(width, height, |_x, _y| {
            state ^= state << 13;
            state ^= state >> 17;
            state ^= state << 5;
            let [r, g, b, _] = state.to_le_bytes();
            Rgba([r, g, b, 255])
        });

        let mut cursor = Cursor::new(Vec::new());
        DynamicImage::ImageRgba8(image)
            .write_to(&mut cursor, ImageFormat::Png)
            .unwrap();
        cursor.into_inner()
    }

    fn options(max_bytes: usize) -> PrepareOptions {
        PrepareOptions {
            max_bytes,
            max_dimension: 400,
            ..PrepareOptions::default()
        }
    }

    #[test]
    fn output_is_bounded_and_downscaled() {
        let source = noisy_png(800, 600);
        let prepared = prepare_image(&source, options(30_000)).unwrap();

        assert!(prepared.len() <= 30_000);
        let decoded = image::load_from_memory(&prepared).unwrap();
        assert!(decoded.width() <= 400 && decoded.height() <= 400);
    }

    #[test]
    fn preparation_is_deterministic() {
        let source = noisy_png(300, 200);
        let first = prepare_image(&source, options(20_000)).unwrap();
        let second = prepare_image(&source, options(20_000)).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn small_images_are_not_upscaled() {
        let source = noisy_png(40, 30);
        let prepared = prepare_image(&source, PrepareOptions::default()).unwrap();
        let decoded = image::load_from_memory(&prepared).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (40, 30));
    }

    #[test]
    fn unreachable_ceiling_is_an_error() {
        let source = noisy_png(200, 200);
        assert!(matches!(
            prepare_image(&source, options(10)),
            Err(Error::Storage(_))
        ));
    }

    #[test]
    fn rejects_invalid_source() {
        match prepare_image(b"not-an-image", PrepareOptions::default()).unwrap_err() {
            Error::InvalidInput(message) => assert!(message.contains("decode")),
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(prepare_image(&[], PrepareOptions::default()).is_err());
    }
}
