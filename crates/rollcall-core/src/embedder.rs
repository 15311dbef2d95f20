//! Face embedder via ONNX Runtime.
//!
//! Crops the detected region from the colour image, resizes it to the model
//! input and returns the raw 128-value descriptor. Distances between these
//! descriptors are calibrated for the fixed match threshold, so the output is
//! not re-normalized.

use crate::capability::{CapabilityError, FaceEmbedder};
use crate::types::{Embedding, FaceRegion, PixelBuffer, EMBEDDING_DIM};
use image::imageops::{self, FilterType};
use image::RgbImage;
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;

const EMBEDDER_INPUT_SIZE: u32 = 150;
const EMBEDDER_MEAN: f32 = 127.5;
const EMBEDDER_STD: f32 = 127.5;

/// 128-dimensional face embedder.
pub struct OnnxEmbedder {
    session: Session,
}

impl OnnxEmbedder {
    pub fn load(model_path: &Path, intra_threads: usize) -> Result<Self, CapabilityError> {
        if !model_path.exists() {
            return Err(CapabilityError::ModelNotFound(model_path.display().to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(intra_threads)
            .map_err(ort::Error::from)?
            .commit_from_file(model_path)?;

        tracing::info!(
            path = %model_path.display(),
            inputs = ?session.inputs().iter().map(|i| i.name()).collect::<Vec<_>>(),
            outputs = ?session.outputs().iter().map(|o| o.name()).collect::<Vec<_>>(),
            "loaded embedding model"
        );

        Ok(Self { session })
    }

    /// Resize a face crop into an NCHW float tensor.
    fn preprocess(crop: &RgbImage) -> Array4<f32> {
        let size = EMBEDDER_INPUT_SIZE as usize;
        let resized = imageops::resize(crop, EMBEDDER_INPUT_SIZE, EMBEDDER_INPUT_SIZE, FilterType::Triangle);

        let mut tensor = Array4::<f32>::zeros((1, 3, size, size));
        for (x, y, pixel) in resized.enumerate_pixels() {
            for c in 0..3 {
                tensor[[0, c, y as usize, x as usize]] =
                    (pixel.0[c] as f32 - EMBEDDER_MEAN) / EMBEDDER_STD;
            }
        }
        tensor
    }
}

impl FaceEmbedder for OnnxEmbedder {
    fn embed(&mut self, image: &PixelBuffer, face: &FaceRegion) -> Result<Embedding, CapabilityError> {
        let crop = image.crop(face).ok_or_else(|| {
            CapabilityError::InferenceFailed(format!(
                "face region {face:?} lies outside {}x{} image",
                image.width(),
                image.height()
            ))
        })?;

        let input = Self::preprocess(&crop);
        let outputs = self
            .session
            .run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

        let (_, raw) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| CapabilityError::InferenceFailed(format!("embedding extraction: {e}")))?;

        if raw.len() != EMBEDDING_DIM {
            return Err(CapabilityError::InferenceFailed(format!(
                "expected {EMBEDDING_DIM}-dim embedding, got {}",
                raw.len()
            )));
        }

        Ok(Embedding::new(raw.to_vec()))
    }
}
