//! Enrollment aggregation. Turns a student's stored photos into one centroid.
//!
//! Each photo is decoded, searched for a face and embedded independently.
//! Photos that fail any step are logged and left out of the mean; the
//! enrollment only fails when no photo yields an embedding.

use crate::capability::{CapabilityError, FaceDetector, FaceEmbedder, FaceModels};
use crate::locator::FaceLocator;
use crate::normalize::{decode_image, DecodeError};
use crate::store::{
    is_valid_student_name, slot_of, student_prefix, ObjectEntry, PhotoStore, ProfileStore,
    StoreError,
};
use crate::types::{Embedding, StudentProfile, EMBEDDING_DIM};
use chrono::Utc;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EnrollError {
    #[error("invalid student name: {0:?}")]
    InvalidStudentName(String),
    #[error("photo count must be at least 1")]
    InvalidPhotoCount,
    #[error("no photos found for student {0}")]
    NoPhotosFound(String),
    #[error("no valid face features could be extracted for {student} ({total} photos tried)")]
    NoValidEnrollmentPhotos { student: String, total: usize },
    #[error(transparent)]
    Capability(#[from] CapabilityError),
    #[error("listing photos failed: {0}")]
    Storage(StoreError),
    #[error("storing profile failed: {0}")]
    Persistence(StoreError),
}

/// Why a single photo was left out of the centroid.
#[derive(Error, Debug)]
enum PhotoError {
    #[error("download failed: {0}")]
    Download(#[from] StoreError),
    #[error("decode failed: {0}")]
    Decode(#[from] DecodeError),
    #[error("no face detected")]
    NoFace,
    #[error(transparent)]
    Capability(#[from] CapabilityError),
    #[error("embedding has {0} values, expected {EMBEDDING_DIM}")]
    Dimension(usize),
}

/// Outcome of a successful enrollment.
#[derive(Debug, Clone)]
pub struct EnrollmentReport {
    pub profile: StudentProfile,
    /// Photos that contributed an embedding to the centroid.
    pub valid_photos: usize,
    /// Photos considered (after limiting to the declared count).
    pub total_photos: usize,
}

impl EnrollmentReport {
    pub fn dimensions(&self) -> usize {
        self.profile.centroid.as_ref().map_or(0, Embedding::len)
    }
}

pub struct EnrollmentAggregator<'a> {
    models: &'a mut FaceModels,
    photos: &'a dyn PhotoStore,
    profiles: &'a dyn ProfileStore,
}

impl<'a> EnrollmentAggregator<'a> {
    pub fn new(
        models: &'a mut FaceModels,
        photos: &'a dyn PhotoStore,
        profiles: &'a dyn ProfileStore,
    ) -> Self {
        Self {
            models,
            photos,
            profiles,
        }
    }

    /// Enroll `student` from up to `photo_count` stored photos, replacing any
    /// previous centroid.
    pub fn enroll(
        &mut self,
        student: &str,
        photo_count: u32,
    ) -> Result<EnrollmentReport, EnrollError> {
        if !is_valid_student_name(student) {
            return Err(EnrollError::InvalidStudentName(student.to_string()));
        }
        if photo_count == 0 {
            return Err(EnrollError::InvalidPhotoCount);
        }

        let (detector, embedder) = self.models.get()?;

        let prefix = student_prefix(student);
        let mut entries = self.photos.list(&prefix).map_err(EnrollError::Storage)?;
        entries.sort_by(|a, b| {
            let key = |e: &ObjectEntry| slot_of(&e.name).unwrap_or(u32::MAX);
            key(a).cmp(&key(b)).then_with(|| a.name.cmp(&b.name))
        });
        entries.truncate(photo_count as usize);
        if entries.is_empty() {
            return Err(EnrollError::NoPhotosFound(student.to_string()));
        }

        tracing::info!(student, photos = entries.len(), "enroll: extracting features");

        let mut embeddings = Vec::with_capacity(entries.len());
        for entry in &entries {
            match embed_photo(detector, embedder, self.photos, entry) {
                Ok(embedding) => {
                    tracing::debug!(photo = %entry.name, "enroll: extracted features");
                    embeddings.push(embedding);
                }
                Err(err) => {
                    tracing::warn!(photo = %entry.name, error = %err, "enroll: skipping photo");
                }
            }
        }

        let centroid =
            Embedding::mean(&embeddings).ok_or_else(|| EnrollError::NoValidEnrollmentPhotos {
                student: student.to_string(),
                total: entries.len(),
            })?;

        let profile = StudentProfile {
            id: uuid::Uuid::new_v4().to_string(),
            name: student.to_string(),
            folder_path: prefix,
            photo_count,
            centroid: Some(centroid),
            enrolled_at: Some(Utc::now()),
        };
        self.profiles
            .upsert_profile(&profile)
            .map_err(EnrollError::Persistence)?;

        tracing::info!(
            student,
            valid = embeddings.len(),
            total = entries.len(),
            "enroll: stored centroid"
        );

        Ok(EnrollmentReport {
            profile,
            valid_photos: embeddings.len(),
            total_photos: entries.len(),
        })
    }
}

/// Download, decode, locate and embed the primary face of one photo.
fn embed_photo(
    detector: &mut dyn FaceDetector,
    embedder: &mut dyn FaceEmbedder,
    photos: &dyn PhotoStore,
    entry: &ObjectEntry,
) -> Result<Embedding, PhotoError> {
    let bytes = photos.download(&entry.path)?;
    let image = decode_image(&bytes)?;
    let faces = FaceLocator::locate(detector, &image)?;
    let primary = faces.first().ok_or(PhotoError::NoFace)?;
    let embedding = embedder.embed(&image, primary)?;
    if embedding.len() != EMBEDDING_DIM {
        return Err(PhotoError::Dimension(embedding.len()));
    }
    Ok(embedding)
}
