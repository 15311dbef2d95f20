//! Scripted models and in-memory stores for unit tests.

use crate::capability::{CapabilityError, FaceDetector, FaceEmbedder};
use crate::store::{AttendanceLedger, ObjectEntry, PhotoStore, ProfileStore, StoreError};
use crate::types::{AttendanceRecord, Embedding, FaceRegion, PixelBuffer, StudentProfile};
use image::{DynamicImage, ImageFormat, RgbImage};
use std::collections::{BTreeMap, HashMap};
use std::io::Cursor;
use std::sync::Mutex;

/// Encode a blank RGB PNG. Tests tell images apart by width.
pub fn png(width: u32, height: u32) -> Vec<u8> {
    let mut out = Cursor::new(Vec::new());
    DynamicImage::ImageRgb8(RgbImage::new(width, height))
        .write_to(&mut out, ImageFormat::Png)
        .unwrap();
    out.into_inner()
}

pub fn blank(width: u32, height: u32) -> PixelBuffer {
    PixelBuffer::from_rgb(RgbImage::new(width, height))
}

/// Embedding of `EMBEDDING_DIM` zeros with `head` written at the front.
pub fn embedding(head: &[f32]) -> Embedding {
    let mut values = vec![0.0; crate::types::EMBEDDING_DIM];
    values[..head.len()].copy_from_slice(head);
    Embedding::new(values)
}

/// Detector returning preset faces keyed by image width.
#[derive(Default)]
pub struct ScriptedDetector {
    faces: HashMap<u32, Vec<FaceRegion>>,
    pub last_gray_len: Option<usize>,
}

impl ScriptedDetector {
    pub fn with_faces(mut self, width: u32, faces: Vec<FaceRegion>) -> Self {
        self.faces.insert(width, faces);
        self
    }
}

impl FaceDetector for ScriptedDetector {
    fn detect(
        &mut self,
        gray: &[u8],
        width: u32,
        _height: u32,
    ) -> Result<Vec<FaceRegion>, CapabilityError> {
        self.last_gray_len = Some(gray.len());
        Ok(self.faces.get(&width).cloned().unwrap_or_default())
    }
}

/// Embedder returning preset embeddings keyed by (image width, face left edge).
#[derive(Default)]
pub struct ScriptedEmbedder {
    embeddings: HashMap<(u32, u32), Embedding>,
}

impl ScriptedEmbedder {
    pub fn with(mut self, width: u32, left: u32, embedding: Embedding) -> Self {
        self.embeddings.insert((width, left), embedding);
        self
    }
}

impl FaceEmbedder for ScriptedEmbedder {
    fn embed(
        &mut self,
        image: &PixelBuffer,
        face: &FaceRegion,
    ) -> Result<Embedding, CapabilityError> {
        self.embeddings
            .get(&(image.width(), face.left as u32))
            .cloned()
            .ok_or_else(|| CapabilityError::InferenceFailed("no scripted embedding".into()))
    }
}

#[derive(Default)]
pub struct MemoryPhotos {
    objects: Mutex<BTreeMap<String, Vec<u8>>>,
    broken: Vec<String>,
}

impl MemoryPhotos {
    /// Make downloads of `path` fail.
    pub fn with_broken(mut self, path: &str) -> Self {
        self.broken.push(path.to_string());
        self
    }

    pub fn insert(&self, path: &str, bytes: Vec<u8>) {
        self.objects.lock().unwrap().insert(path.to_string(), bytes);
    }
}

impl PhotoStore for MemoryPhotos {
    fn list(&self, prefix: &str) -> Result<Vec<ObjectEntry>, StoreError> {
        let dir = format!("{}/", prefix.trim_end_matches('/'));
        Ok(self
            .objects
            .lock()
            .unwrap()
            .keys()
            .filter_map(|path| {
                let name = path.strip_prefix(&dir)?;
                (!name.contains('/')).then(|| ObjectEntry {
                    name: name.to_string(),
                    path: path.clone(),
                })
            })
            .collect())
    }

    fn download(&self, path: &str) -> Result<Vec<u8>, StoreError> {
        if self.broken.iter().any(|p| p == path) {
            return Err(StoreError::Storage(format!("{path}: connection reset")));
        }
        self.objects
            .lock()
            .unwrap()
            .get(path)
            .cloned()
            .ok_or_else(|| StoreError::Storage(format!("{path}: not found")))
    }

    fn upload(&self, path: &str, bytes: &[u8]) -> Result<String, StoreError> {
        self.insert(path, bytes.to_vec());
        Ok(path.to_string())
    }
}

/// Profiles and attendance keyed the way the relational store keys them.
#[derive(Default)]
pub struct MemoryDb {
    pub profiles: Mutex<Vec<StudentProfile>>,
    pub attendance: Mutex<Vec<AttendanceRecord>>,
    pub fail_attendance: bool,
}

impl ProfileStore for MemoryDb {
    fn upsert_profile(&self, profile: &StudentProfile) -> Result<(), StoreError> {
        let mut profiles = self.profiles.lock().unwrap();
        match profiles.iter_mut().find(|p| p.name == profile.name) {
            Some(existing) => {
                let id = existing.id.clone();
                *existing = StudentProfile {
                    id,
                    ..profile.clone()
                };
            }
            None => profiles.push(profile.clone()),
        }
        Ok(())
    }

    fn load_registry(&self) -> Result<Vec<StudentProfile>, StoreError> {
        Ok(self
            .profiles
            .lock()
            .unwrap()
            .iter()
            .filter(|p| p.centroid.is_some())
            .cloned()
            .collect())
    }
}

impl AttendanceLedger for MemoryDb {
    fn upsert_attendance(&self, records: &[AttendanceRecord]) -> Result<usize, StoreError> {
        if self.fail_attendance {
            return Err(StoreError::Persistence("attendance table locked".into()));
        }
        let mut rows = self.attendance.lock().unwrap();
        for record in records {
            match rows
                .iter_mut()
                .find(|r| r.student_name == record.student_name && r.period == record.period)
            {
                Some(existing) => *existing = record.clone(),
                None => rows.push(record.clone()),
            }
        }
        Ok(records.len())
    }
}
