//! rollcall-core — Face enrollment and recognition pipeline for classroom attendance.
//!
//! Decodes photos into a canonical RGB buffer, locates faces through a
//! pluggable detector, aggregates enrollment embeddings into per-student
//! centroids and matches group-photo faces against the registered population.

pub mod capability;
pub mod detector;
pub mod embedder;
pub mod enroll;
pub mod locator;
pub mod normalize;
pub mod recognize;
pub mod store;
pub mod types;

#[cfg(test)]
pub(crate) mod testing;

pub use capability::{CapabilityError, FaceDetector, FaceEmbedder, FaceModels};
pub use detector::ScrfdDetector;
pub use embedder::OnnxEmbedder;
pub use enroll::{EnrollError, EnrollmentAggregator, EnrollmentReport};
pub use locator::{FaceLocator, Framing};
pub use normalize::{decode_base64, decode_base64_image, decode_image, DecodeError};
pub use recognize::{
    confidence_for, EuclideanMatcher, Matcher, Nearest, RecognitionOutcome, RecognizeError,
    RecognitionMatcher, Registry, MATCH_THRESHOLD,
};
pub use store::{
    is_valid_student_name, photo_path, student_prefix, AttendanceLedger, ObjectEntry, PhotoStore,
    ProfileStore, StoreError, MAX_PHOTO_SLOTS,
};
pub use types::{
    AttendanceRecord, Embedding, FaceRegion, MatchResult, PercentBox, PixelBuffer, StudentProfile,
    EMBEDDING_DIM,
};

use std::path::PathBuf;

/// Default directory for ONNX model files: `$XDG_DATA_HOME/rollcall/models`.
pub fn default_model_dir() -> PathBuf {
    data_home().join("rollcall").join("models")
}

/// `$XDG_DATA_HOME`, falling back to `$HOME/.local/share`.
pub fn data_home() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".local/share")
        })
}
