use crate::errors::{RembgError, Result};
use crate::traits::{ImageSegmentationModel, SegmentationOutput};
use image::{DynamicImage, GenericImageView};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MockBehavior {
    Image,
    Encoded,
    Fail,
}

/// Test double for the segmentation capability.
///
/// Makes the top-left corner color transparent and records every invocation, so
/// tests can assert that rejected requests never reach the model.
#[derive(Debug)]
pub struct MockSegmentationModel {
    behavior: MockBehavior,
    calls: AtomicUsize,
    last_input: Mutex<Option<(u32, u32)>>,
}

impl MockSegmentationModel {
    pub const fn new() -> Self {
        Self::with_behavior(MockBehavior::Image)
    }

    /// Returns PNG bytes instead of an image, like capabilities that encode themselves.
    pub const fn encoding() -> Self {
        Self::with_behavior(MockBehavior::Encoded)
    }

    /// Fails every invocation.
    pub const fn failing() -> Self {
        Self::with_behavior(MockBehavior::Fail)
    }

    const fn with_behavior(behavior: MockBehavior) -> Self {
        Self {
            behavior,
            calls: AtomicUsize::new(0),
            last_input: parking_lot::const_mutex(None),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn last_input_dimensions(&self) -> Option<(u32, u32)> {
        *self.last_input.lock()
    }

    fn cut_out(img: &DynamicImage) -> DynamicImage {
        let mut rgba = img.to_rgba8();
        let background = *rgba.get_pixel(0, 0);
        for pixel in rgba.pixels_mut() {
            if *pixel == background {
                pixel.0[3] = 0;
            }
        }
        DynamicImage::ImageRgba8(rgba)
    }
}

impl Default for MockSegmentationModel {
    fn default() -> Self {
        Self::new()
    }
}

impl ImageSegmentationModel for MockSegmentationModel {
    fn segment_image(&self, img: &DynamicImage) -> Result<SegmentationOutput> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        *self.last_input.lock() = Some(img.dimensions());

        match self.behavior {
            MockBehavior::Image => Ok(SegmentationOutput::Image(Self::cut_out(img))),
            MockBehavior::Encoded => {
                let png = crate::image_processor::encode_png(&Self::cut_out(img))?;
                Ok(SegmentationOutput::Encoded(png.into_inner()))
            }
            MockBehavior::Fail => Err(RembgError::model(
                "mock inference",
                "mock model configured to fail",
            )),
        }
    }
}
