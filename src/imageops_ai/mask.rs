use image::{GenericImageView, GrayImage, ImageBuffer, Luma, Rgb, Rgba, RgbaImage};
use ndarray::ArrayView2;

use crate::errors::{RembgError, Result};

/// Stretches a raw prediction plane to the full `0..=255` range.
///
/// A constant plane carries no foreground information and becomes fully transparent.
pub fn normalize_prediction(prediction: ArrayView2<f32>) -> Result<GrayImage> {
    let (height, width) = prediction.dim();
    let (min, max) = prediction
        .iter()
        .fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), &v| {
            (lo.min(v), hi.max(v))
        });
    let range = max - min;

    let pixels = prediction
        .iter()
        .map(|&v| {
            if range > f32::EPSILON {
                ((v - min) / range * 255.0).round().clamp(0.0, 255.0) as u8
            } else {
                0
            }
        })
        .collect();

    ImageBuffer::from_raw(width as u32, height as u32, pixels).ok_or_else(|| {
        RembgError::image_processing(
            "mask normalization",
            format!("prediction plane {width}x{height} does not fit an image buffer"),
        )
    })
}

/// Cuts the foreground out of `image`: color is kept, alpha comes from `mask`.
pub fn apply<I>(image: &I, mask: &GrayImage) -> Result<RgbaImage>
where
    I: GenericImageView<Pixel = Rgb<u8>>,
{
    if image.dimensions() != mask.dimensions() {
        let (iw, ih) = image.dimensions();
        let (mw, mh) = mask.dimensions();
        return Err(RembgError::image_processing(
            "mask application",
            format!("image is {iw}x{ih} but mask is {mw}x{mh}"),
        ));
    }

    let mut output = RgbaImage::new(image.width(), image.height());
    for ((_, _, Rgb([r, g, b])), (out, Luma([alpha]))) in image
        .pixels()
        .zip(output.pixels_mut().zip(mask.pixels().copied()))
    {
        *out = Rgba([r, g, b, alpha]);
    }
    Ok(output)
}
