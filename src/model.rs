use std::path::Path;

use crate::{
    errors::{RembgError, Result},
    imageops_ai::mask,
    traits::{ImageSegmentationModel, SegmentationOutput},
};
use image::{imageops, imageops::FilterType, DynamicImage, GrayImage, RgbImage};
use ndarray::prelude::*;
use nshare::AsNdarray3;
use ort::{
    execution_providers::CUDAExecutionProvider,
    session::{builder::GraphOptimizationLevel, Session},
    value::TensorRef,
};
use parking_lot::Mutex;

/// Input side length used when the model declares a dynamic spatial shape.
const DEFAULT_IMAGE_SIZE: u32 = 320;

const MEAN: [f32; 3] = [0.485, 0.456, 0.406];
const STD: [f32; 3] = [0.229, 0.224, 0.225];

/// U2-Net salient object segmentation running on ONNX Runtime.
///
/// Loaded once at startup and shared by every request. `Session::run` needs
/// exclusive access, so concurrent requests take turns on the mutex.
pub struct Model {
    pub image_size: u32,
    input_name: String,
    output_name: String,
    session: Mutex<Session>,
}

impl Model {
    pub fn new(model_path: &Path, num_threads: usize, device_id: Option<i32>) -> Result<Self> {
        let mut builder = Session::builder()
            .map_err(|e| RembgError::model("session builder", e.to_string()))?
            .with_optimization_level(GraphOptimizationLevel::Level3)
            .map_err(|e| RembgError::model("optimization level", e.to_string()))?
            .with_intra_threads(num_threads)
            .map_err(|e| RembgError::model("intra-op threads", e.to_string()))?;

        if let Some(device_id) = device_id {
            builder = builder
                .with_execution_providers([CUDAExecutionProvider::default()
                    .with_device_id(device_id)
                    .build()])
                .map_err(|e| RembgError::model("execution provider", e.to_string()))?;
        }

        let mut session = builder.commit_from_file(model_path).map_err(|e| {
            RembgError::model(
                format!("load model file {}", model_path.display()),
                e.to_string(),
            )
        })?;

        let input = session.inputs.first().ok_or_else(|| {
            RembgError::model("read model inputs", "model declares no inputs")
        })?;
        let input_name = input.name.clone();
        let image_size = input
            .input_type
            .tensor_shape()
            .and_then(|shape| shape.get(2).copied())
            .filter(|&dim| dim > 0)
            .map_or(DEFAULT_IMAGE_SIZE, |dim| dim as u32);
        let output_name = session
            .outputs
            .first()
            .map(|output| output.name.clone())
            .ok_or_else(|| RembgError::model("read model outputs", "model declares no outputs"))?;

        // warm up
        let data = Array4::<f32>::zeros((1, 3, image_size as usize, image_size as usize));
        session.run(ort::inputs![input_name.as_str() => TensorRef::from_array_view(&data)?])?;

        tracing::info!(
            path = %model_path.display(),
            image_size,
            input = %input_name,
            output = %output_name,
            "model loaded"
        );

        Ok(Self {
            image_size,
            input_name,
            output_name,
            session: Mutex::new(session),
        })
    }

    pub fn predict(&self, tensor: &Array4<f32>) -> Result<Array4<f32>> {
        let mut session = self.session.lock();
        let outputs = session.run(
            ort::inputs![self.input_name.as_str() => TensorRef::from_array_view(tensor)?],
        )?;
        let prediction = outputs[self.output_name.as_str()]
            .try_extract_array::<f32>()?
            .into_dimensionality::<Ix4>()?
            .to_owned();
        Ok(prediction)
    }
}

impl ImageSegmentationModel for Model {
    fn segment_image(&self, img: &DynamicImage) -> Result<SegmentationOutput> {
        let rgb = img.to_rgb8();
        let tensor = preprocess(&rgb, self.image_size);
        let prediction = self.predict(&tensor)?;
        let alpha = postprocess_mask(prediction.view(), rgb.width(), rgb.height())?;
        let output = mask::apply(&rgb, &alpha)?;
        Ok(SegmentationOutput::Image(DynamicImage::ImageRgba8(output)))
    }
}

/// Resizes to the model's square input and normalizes into an NCHW tensor.
pub fn preprocess(image: &RgbImage, image_size: u32) -> Array4<f32> {
    let resized = imageops::resize(image, image_size, image_size, FilterType::Lanczos3);
    let max = resized
        .as_raw()
        .iter()
        .copied()
        .max()
        .map_or(0.0, f32::from)
        .max(1e-6);

    // (c, h, w)
    let planes = resized.as_ndarray3();
    let mut tensor = Array4::<f32>::zeros((1, 3, image_size as usize, image_size as usize));
    let mut batch = tensor.index_axis_mut(Axis(0), 0);
    for (channel, (mut out, plane)) in batch
        .outer_iter_mut()
        .zip(planes.outer_iter())
        .enumerate()
    {
        out.zip_mut_with(&plane, |dst, &src| {
            *dst = (f32::from(src) / max - MEAN[channel]) / STD[channel];
        });
    }
    tensor
}

/// Turns the first prediction plane into an alpha mask at the original resolution.
pub fn postprocess_mask(prediction: ArrayView4<f32>, width: u32, height: u32) -> Result<GrayImage> {
    if prediction.shape()[0] == 0 || prediction.shape()[1] == 0 {
        return Err(RembgError::model(
            "read prediction",
            format!("empty prediction of shape {:?}", prediction.shape()),
        ));
    }
    let plane = prediction.slice(s![0, 0, .., ..]);
    let mask = mask::normalize_prediction(plane)?;
    Ok(imageops::resize(&mask, width, height, FilterType::Lanczos3))
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    #[test]
    fn test_preprocess_shape_and_normalization() {
        let image = RgbImage::from_pixel(40, 10, Rgb([255, 0, 255]));
        let tensor = preprocess(&image, 32);

        assert_eq!(tensor.shape(), &[1, 3, 32, 32]);
        let red = tensor[[0, 0, 16, 16]];
        let green = tensor[[0, 1, 16, 16]];
        assert!((red - (1.0 - MEAN[0]) / STD[0]).abs() < 1e-3);
        assert!((green - (0.0 - MEAN[1]) / STD[1]).abs() < 1e-3);
    }

    #[test]
    fn test_preprocess_black_image_does_not_divide_by_zero() {
        let image = RgbImage::new(8, 8);
        let tensor = preprocess(&image, 8);
        assert!(tensor.iter().all(|v| v.is_finite()));
    }

    #[test]
    fn test_postprocess_restores_original_size() -> Result<()> {
        let mut prediction = Array4::<f32>::zeros((1, 1, 16, 16));
        prediction.slice_mut(s![0, 0, 4..12, 4..12]).fill(1.0);

        let mask = postprocess_mask(prediction.view(), 50, 30)?;

        assert_eq!(mask.dimensions(), (50, 30));
        assert_eq!(mask.get_pixel(0, 0)[0], 0);
        assert_eq!(mask.get_pixel(25, 15)[0], 255);
        Ok(())
    }

    #[test]
    fn test_postprocess_rejects_empty_prediction() {
        let prediction = Array4::<f32>::zeros((0, 1, 16, 16));
        assert!(postprocess_mask(prediction.view(), 10, 10).is_err());
    }
}
