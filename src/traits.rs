use crate::errors::Result;
use image::DynamicImage;

/// What the segmentation capability hands back.
///
/// Implementations may produce a decoded image or bytes they already encoded; the
/// pipeline turns either into PNG bytes before responding.
#[derive(Debug, Clone)]
pub enum SegmentationOutput {
    Image(DynamicImage),
    Encoded(Vec<u8>),
}

/// Background segmentation behind a shared, read-only handle.
///
/// Handlers hold the model as `Arc<dyn ImageSegmentationModel>` and call it from
/// blocking worker threads, so implementations must be `Send + Sync` and serialize
/// internally if the underlying runtime needs exclusive access.
pub trait ImageSegmentationModel: Send + Sync {
    /// Returns `img` with the background made transparent. The output keeps the
    /// input's width and height.
    fn segment_image(&self, img: &DynamicImage) -> Result<SegmentationOutput>;
}
