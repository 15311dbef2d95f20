//! Recognition matching: identify registered students in a group photo and
//! record their attendance.

use crate::capability::{CapabilityError, FaceModels};
use crate::locator::FaceLocator;
use crate::store::{AttendanceLedger, ProfileStore, StoreError};
use crate::types::{AttendanceRecord, Embedding, MatchResult, PixelBuffer, StudentProfile};
use chrono::Utc;
use thiserror::Error;

/// A face matches its nearest centroid only if the Euclidean distance is
/// strictly below this value.
pub const MATCH_THRESHOLD: f32 = 0.4;

#[derive(Error, Debug)]
pub enum RecognizeError {
    #[error("period must not be empty")]
    InvalidPeriod,
    #[error(transparent)]
    Capability(#[from] CapabilityError),
    #[error("loading registered students failed: {0}")]
    Registry(StoreError),
}

/// Map an accepted distance to a confidence in [0, 1].
///
/// Distance 0 gives 1.0; confidence falls linearly to 0 at [`MATCH_THRESHOLD`].
pub fn confidence_for(distance: f32) -> f32 {
    (1.0 - distance / MATCH_THRESHOLD).clamp(0.0, 1.0)
}

/// Whether a nearest-neighbour distance is close enough to count as a match.
pub fn is_match(distance: f32) -> bool {
    distance < MATCH_THRESHOLD
}

/// Closest gallery entry to a probe.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Nearest {
    pub index: usize,
    pub distance: f32,
}

/// Strategy for finding the registered centroid closest to a probe embedding.
pub trait Matcher {
    fn nearest(&self, probe: &Embedding, gallery: &[StudentProfile]) -> Option<Nearest>;
}

/// Linear scan by Euclidean distance.
///
/// Ties keep the earliest gallery entry. Profiles without a centroid, or
/// with a centroid of a different dimension, are skipped.
pub struct EuclideanMatcher;

impl Matcher for EuclideanMatcher {
    fn nearest(&self, probe: &Embedding, gallery: &[StudentProfile]) -> Option<Nearest> {
        let mut best: Option<Nearest> = None;

        for (index, profile) in gallery.iter().enumerate() {
            let Some(centroid) = profile.centroid.as_ref() else {
                continue;
            };
            if centroid.len() != probe.len() {
                tracing::warn!(
                    student = %profile.name,
                    expected = probe.len(),
                    actual = centroid.len(),
                    "skipping centroid with mismatched dimension"
                );
                continue;
            }

            let distance = probe.euclidean_distance(centroid);
            if distance.is_nan() {
                continue;
            }
            if best.map_or(true, |b| distance < b.distance) {
                best = Some(Nearest { index, distance });
            }
        }

        best
    }
}

/// Registered centroids, loaded once per recognition call and read-only
/// for its duration.
#[derive(Debug, Clone, Default)]
pub struct Registry {
    profiles: Vec<StudentProfile>,
}

impl Registry {
    pub fn from_profiles(profiles: Vec<StudentProfile>) -> Self {
        Self {
            profiles: profiles
                .into_iter()
                .filter(|p| p.centroid.is_some())
                .collect(),
        }
    }

    pub fn load(store: &dyn ProfileStore) -> Result<Self, StoreError> {
        store.load_registry().map(Self::from_profiles)
    }

    pub fn is_empty(&self) -> bool {
        self.profiles.is_empty()
    }

    pub fn len(&self) -> usize {
        self.profiles.len()
    }

    pub fn profiles(&self) -> &[StudentProfile] {
        &self.profiles
    }

    /// Nearest profile to `probe`, if it lies within [`MATCH_THRESHOLD`].
    pub fn identify(
        &self,
        matcher: &dyn Matcher,
        probe: &Embedding,
    ) -> Option<(&StudentProfile, f32)> {
        let nearest = matcher.nearest(probe, &self.profiles)?;
        if !is_match(nearest.distance) {
            return None;
        }
        let Some(profile) = self.profiles.get(nearest.index) else {
            tracing::warn!(
                index = nearest.index,
                len = self.profiles.len(),
                "matcher returned out-of-range index"
            );
            return None;
        };
        Some((profile, nearest.distance))
    }
}

/// Result of one recognition call.
#[derive(Debug, Clone, Default)]
pub struct RecognitionOutcome {
    pub matches: Vec<MatchResult>,
    pub faces_detected: usize,
    /// Attendance records durably written; 0 if persistence failed.
    pub attendance_written: usize,
    /// No students were registered, so detection was skipped.
    pub registry_empty: bool,
}

pub struct RecognitionMatcher<'a> {
    models: &'a mut FaceModels,
    profiles: &'a dyn ProfileStore,
    ledger: &'a dyn AttendanceLedger,
    matcher: Box<dyn Matcher + 'a>,
}

impl<'a> RecognitionMatcher<'a> {
    pub fn new(
        models: &'a mut FaceModels,
        profiles: &'a dyn ProfileStore,
        ledger: &'a dyn AttendanceLedger,
    ) -> Self {
        Self {
            models,
            profiles,
            ledger,
            matcher: Box::new(EuclideanMatcher),
        }
    }

    /// Replace the nearest-neighbour strategy.
    pub fn with_matcher(mut self, matcher: impl Matcher + 'a) -> Self {
        self.matcher = Box::new(matcher);
        self
    }

    /// Match every face in `image` against the registry and record attendance
    /// for `period`.
    ///
    /// Faces that fail to embed are skipped. Attendance write failures are
    /// logged and reflected in `attendance_written`; they never discard the
    /// matches.
    pub fn recognize(
        &mut self,
        image: &PixelBuffer,
        period: &str,
    ) -> Result<RecognitionOutcome, RecognizeError> {
        if period.trim().is_empty() {
            return Err(RecognizeError::InvalidPeriod);
        }

        let registry = Registry::load(self.profiles).map_err(RecognizeError::Registry)?;
        if registry.is_empty() {
            tracing::info!(period, "recognize: no registered students");
            return Ok(RecognitionOutcome {
                registry_empty: true,
                ..Default::default()
            });
        }

        let (detector, embedder) = self.models.get()?;
        let faces = FaceLocator::locate(detector, image)?;
        tracing::info!(period, faces = faces.len(), registered = registry.len(), "recognize: detected faces");

        let mut matches = Vec::new();
        for face in &faces {
            let embedding = match embedder.embed(image, face) {
                Ok(embedding) => embedding,
                Err(err) => {
                    tracing::warn!(error = %err, "recognize: skipping face");
                    continue;
                }
            };

            let Some((profile, distance)) = registry.identify(self.matcher.as_ref(), &embedding)
            else {
                continue;
            };
            let confidence = confidence_for(distance);
            tracing::info!(student = %profile.name, confidence, distance, "recognize: matched");

            matches.push(MatchResult {
                name: profile.name.clone(),
                confidence,
                distance,
                region: *face,
                position: face.to_percent(image.width(), image.height()),
            });
        }

        let records = attendance_records(&matches, period);
        let attendance_written = if records.is_empty() {
            0
        } else {
            match self.ledger.upsert_attendance(&records) {
                Ok(written) => written,
                Err(err) => {
                    tracing::error!(period, error = %err, "recognize: storing attendance failed");
                    0
                }
            }
        };

        Ok(RecognitionOutcome {
            matches,
            faces_detected: faces.len(),
            attendance_written,
            registry_empty: false,
        })
    }
}

/// One record per matched student, keeping the highest confidence when
/// several faces matched the same student.
fn attendance_records(matches: &[MatchResult], period: &str) -> Vec<AttendanceRecord> {
    let now = Utc::now();
    let mut records: Vec<AttendanceRecord> = Vec::new();

    for m in matches {
        match records.iter_mut().find(|r| r.student_name == m.name) {
            Some(existing) => existing.confidence = existing.confidence.max(m.confidence),
            None => records.push(AttendanceRecord {
                student_name: m.name.clone(),
                period: period.to_string(),
                confidence: m.confidence,
                recorded_at: now,
            }),
        }
    }

    records
}
