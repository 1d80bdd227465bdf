use std::io::Cursor;

use image::{
    imageops::FilterType, DynamicImage, ImageDecoder, ImageError, ImageFormat, ImageReader,
};

use crate::errors::{RembgError, Result};
use crate::traits::{ImageSegmentationModel, SegmentationOutput};

/// Declared content types accepted on upload.
pub const ALLOWED_CONTENT_TYPES: [&str; 4] = ["image/png", "image/jpeg", "image/jpg", "image/webp"];

/// PNG bytes ready to go out as a response body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedPng(Vec<u8>);

impl EncodedPng {
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn into_inner(self) -> Vec<u8> {
        self.0
    }
}

/// Checks the declared content type. The bytes themselves are not sniffed here.
pub fn check_content_type(content_type: Option<&str>) -> Result<()> {
    match content_type {
        Some(ct) if ALLOWED_CONTENT_TYPES.contains(&ct) => Ok(()),
        other => Err(RembgError::UnsupportedMediaType {
            content_type: other.map(str::to_string),
        }),
    }
}

/// Decodes `bytes` and bakes any EXIF orientation into the pixel data.
pub fn decode_image(bytes: &[u8]) -> Result<DynamicImage> {
    let mut decoder = ImageReader::new(Cursor::new(bytes))
        .with_guessed_format()
        .map_err(|e| decode_error(ImageError::IoError(e)))?
        .into_decoder()
        .map_err(decode_error)?;
    let orientation = decoder.orientation().map_err(decode_error)?;
    let mut image = DynamicImage::from_decoder(decoder).map_err(decode_error)?;
    image.apply_orientation(orientation);

    tracing::debug!(
        width = image.width(),
        height = image.height(),
        ?orientation,
        "decoded upload"
    );
    Ok(image)
}

/// Decoder allocation limits are a server-side refusal, not an unreadable file.
fn decode_error(err: ImageError) -> RembgError {
    match err {
        ImageError::Limits(_) => RembgError::image_processing("image decoding", err),
        source => RembgError::InvalidImage { source },
    }
}

/// Target size for an image whose longer side must not exceed `max_dimension`.
///
/// The longer side becomes exactly `max_dimension`; the shorter side is the floor of
/// the exact scaled length, never below one pixel.
pub fn bounded_dimensions(width: u32, height: u32, max_dimension: u32) -> (u32, u32) {
    let longest = width.max(height);
    if longest <= max_dimension {
        return (width, height);
    }

    let scale = |side: u32| {
        let scaled = u64::from(side) * u64::from(max_dimension) / u64::from(longest);
        (scaled as u32).max(1)
    };
    (scale(width), scale(height))
}

/// Downscales `image` so neither side exceeds `max_dimension`. Images that already
/// fit are returned untouched.
pub fn bound_size(image: DynamicImage, max_dimension: u32) -> DynamicImage {
    let (width, height) = (image.width(), image.height());
    let (new_width, new_height) = bounded_dimensions(width, height, max_dimension);
    if (new_width, new_height) == (width, height) {
        return image;
    }

    tracing::debug!(width, height, new_width, new_height, "downscaling upload");
    image.resize_exact(new_width, new_height, FilterType::Lanczos3)
}

pub fn encode_png(image: &DynamicImage) -> Result<EncodedPng> {
    let mut buffer = Cursor::new(Vec::new());
    image
        .write_to(&mut buffer, ImageFormat::Png)
        .map_err(|e| RembgError::image_processing("png encoding", e))?;
    Ok(EncodedPng(buffer.into_inner()))
}

/// Normalizes the capability's output into response bytes. Images are encoded,
/// already-encoded bytes pass through.
pub fn finish(output: SegmentationOutput) -> Result<EncodedPng> {
    match output {
        SegmentationOutput::Image(image) => encode_png(&image),
        SegmentationOutput::Encoded(bytes) => Ok(EncodedPng(bytes)),
    }
}

/// Runs the CPU-bound part of a request: decode, orient, bound, segment, encode.
///
/// Callers on an async runtime should run this on a blocking thread.
pub fn remove_background(
    bytes: &[u8],
    model: &dyn ImageSegmentationModel,
    max_dimension: u32,
) -> Result<EncodedPng> {
    let image = decode_image(bytes)?;
    let image = bound_size(image, max_dimension);

    let output = model.segment_image(&image).map_err(|e| match e {
        RembgError::Segmentation { .. } => e,
        other => RembgError::segmentation(other),
    })?;

    finish(output)
}
