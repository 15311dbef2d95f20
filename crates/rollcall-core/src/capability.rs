//! Seams for the external detection and embedding models, and the context
//! object that carries them into enrollment and recognition.

use crate::types::{Embedding, FaceRegion, PixelBuffer};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CapabilityError {
    #[error("face models unavailable: {0}")]
    Unavailable(String),
    #[error("model file not found: {0}; run `rollcall fetch-models` or set ROLLCALL_MODEL_DIR")]
    ModelNotFound(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// Pluggable face detection backend.
///
/// Receives a row-major luminance buffer of `width` × `height` bytes and
/// returns face boxes in that same pixel space. Order is backend-defined.
pub trait FaceDetector: Send {
    fn detect(
        &mut self,
        gray: &[u8],
        width: u32,
        height: u32,
    ) -> Result<Vec<FaceRegion>, CapabilityError>;
}

/// Pluggable face embedding backend.
pub trait FaceEmbedder: Send {
    fn embed(&mut self, image: &PixelBuffer, face: &FaceRegion)
        -> Result<Embedding, CapabilityError>;
}

/// Loaded detection and embedding models, or the reason they are missing.
///
/// Constructed once at startup and handed to the enrollment and recognition
/// paths; callers ask for the models through [`FaceModels::get`] instead of
/// checking for absent handles themselves.
pub enum FaceModels {
    Ready {
        detector: Box<dyn FaceDetector>,
        embedder: Box<dyn FaceEmbedder>,
    },
    Unavailable {
        reason: String,
    },
}

impl FaceModels {
    pub fn ready(detector: Box<dyn FaceDetector>, embedder: Box<dyn FaceEmbedder>) -> Self {
        Self::Ready { detector, embedder }
    }

    pub fn unavailable(reason: impl Into<String>) -> Self {
        Self::Unavailable {
            reason: reason.into(),
        }
    }

    pub fn is_loaded(&self) -> bool {
        matches!(self, Self::Ready { .. })
    }

    /// Borrow both models, or fail with [`CapabilityError::Unavailable`].
    pub fn get(
        &mut self,
    ) -> Result<(&mut dyn FaceDetector, &mut dyn FaceEmbedder), CapabilityError> {
        match self {
            Self::Ready { detector, embedder } => Ok((detector.as_mut(), embedder.as_mut())),
            Self::Unavailable { reason } => Err(CapabilityError::Unavailable(reason.clone())),
        }
    }

    pub fn detector(&mut self) -> Result<&mut dyn FaceDetector, CapabilityError> {
        self.get().map(|(detector, _)| detector)
    }
}
