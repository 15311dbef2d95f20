//! Seams for the external object store and relational store, plus the
//! photo path layout shared by every implementation.

use crate::types::{AttendanceRecord, StudentProfile};
use thiserror::Error;

/// Highest photo slot index a student may fill (slots are 1-based).
pub const MAX_PHOTO_SLOTS: u32 = 10;

#[derive(Error, Debug)]
pub enum StoreError {
    /// Object store (photo) operation failed.
    #[error("storage error: {0}")]
    Storage(String),
    /// Relational store operation failed.
    #[error("persistence error: {0}")]
    Persistence(String),
    #[error("invalid object path: {0}")]
    InvalidPath(String),
}

/// One object returned by [`PhotoStore::list`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectEntry {
    /// File name within the listed prefix (e.g. `photo_3.jpg`).
    pub name: String,
    /// Full object path (e.g. `students/Ana/photo_3.jpg`).
    pub path: String,
}

/// Object store holding enrollment photos.
pub trait PhotoStore: Send + Sync {
    fn list(&self, prefix: &str) -> Result<Vec<ObjectEntry>, StoreError>;
    fn download(&self, path: &str) -> Result<Vec<u8>, StoreError>;
    /// Store `bytes` at `path`, replacing any existing object. Returns the stored path.
    fn upload(&self, path: &str, bytes: &[u8]) -> Result<String, StoreError>;
}

/// Relational store for student profiles.
pub trait ProfileStore: Send + Sync {
    /// Insert or replace the profile keyed by name. The centroid is replaced
    /// wholesale; an existing id is kept.
    fn upsert_profile(&self, profile: &StudentProfile) -> Result<(), StoreError>;
    /// Every profile that has a centroid, in a stable order.
    fn load_registry(&self) -> Result<Vec<StudentProfile>, StoreError>;
}

/// Relational store for attendance records.
pub trait AttendanceLedger: Send + Sync {
    /// Upsert records keyed by (student, period), replacing on conflict.
    /// Returns the number of records written.
    fn upsert_attendance(&self, records: &[AttendanceRecord]) -> Result<usize, StoreError>;
}

/// Whether `name` can be used as a student identifier and path segment.
pub fn is_valid_student_name(name: &str) -> bool {
    let trimmed = name.trim();
    !trimmed.is_empty()
        && trimmed == name
        && name != "."
        && name != ".."
        && !name.contains(['/', '\\', '\0'])
}

pub fn student_prefix(student: &str) -> String {
    format!("students/{student}")
}

pub fn photo_path(student: &str, slot: u32) -> String {
    format!("students/{student}/photo_{slot}.jpg")
}

/// Slot index encoded in a photo file name (`photo_<slot>.<ext>`).
pub fn slot_of(name: &str) -> Option<u32> {
    let stem = name.split('.').next()?;
    stem.strip_prefix("photo_")?.parse().ok()
}
