use chrono::{DateTime, Utc};
use image::RgbImage;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Length of every face embedding produced by the embedder.
pub const EMBEDDING_DIM: usize = 128;

/// A decoded image in canonical form: 3 channels, 8 bits per sample,
/// row-major and contiguous.
///
/// Every input format is normalized into this shape before detection,
/// so the fields stay private and the constructors enforce the layout.
#[derive(Clone, PartialEq, Eq)]
pub struct PixelBuffer {
    width: u32,
    height: u32,
    data: Vec<u8>,
}

impl PixelBuffer {
    pub const CHANNELS: usize = 3;

    pub fn from_rgb(image: RgbImage) -> Self {
        let (width, height) = image.dimensions();
        Self {
            width,
            height,
            data: image.into_raw(),
        }
    }

    /// Wrap raw interleaved RGB samples. Returns `None` if the length does
    /// not match `width * height * 3`.
    pub fn from_raw(width: u32, height: u32, data: Vec<u8>) -> Option<Self> {
        let expected = width as usize * height as usize * Self::CHANNELS;
        (data.len() == expected).then_some(Self { width, height, data })
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn channels(&self) -> usize {
        Self::CHANNELS
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn pixel(&self, x: u32, y: u32) -> [u8; 3] {
        let off = (y as usize * self.width as usize + x as usize) * Self::CHANNELS;
        [self.data[off], self.data[off + 1], self.data[off + 2]]
    }

    /// Grayscale projection using ITU-R BT.601 luma weights, one byte per pixel.
    pub fn luminance(&self) -> Vec<u8> {
        self.data
            .chunks_exact(Self::CHANNELS)
            .map(|px| {
                let y = 0.299 * px[0] as f32 + 0.587 * px[1] as f32 + 0.114 * px[2] as f32;
                y.round().clamp(0.0, 255.0) as u8
            })
            .collect()
    }

    /// Copy the part of `region` that lies inside the image.
    ///
    /// Returns `None` when the region does not overlap the image.
    pub fn crop(&self, region: &FaceRegion) -> Option<RgbImage> {
        let x0 = (region.left.max(0.0).floor() as u32).min(self.width);
        let y0 = (region.top.max(0.0).floor() as u32).min(self.height);
        let x1 = (region.right().max(0.0).ceil() as u32).min(self.width);
        let y1 = (region.bottom().max(0.0).ceil() as u32).min(self.height);
        if x1 <= x0 || y1 <= y0 {
            return None;
        }

        let (w, h) = (x1 - x0, y1 - y0);
        let mut out = Vec::with_capacity(w as usize * h as usize * Self::CHANNELS);
        let stride = self.width as usize * Self::CHANNELS;
        for y in y0..y1 {
            let start = y as usize * stride + x0 as usize * Self::CHANNELS;
            out.extend_from_slice(&self.data[start..start + w as usize * Self::CHANNELS]);
        }
        RgbImage::from_raw(w, h, out)
    }
}

impl fmt::Debug for PixelBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PixelBuffer")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("bytes", &self.data.len())
            .finish()
    }
}

/// Axis-aligned face box in the pixel space of one [`PixelBuffer`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FaceRegion {
    pub left: f32,
    pub top: f32,
    pub width: f32,
    pub height: f32,
    /// Detector score; only meaningful relative to the same detector.
    pub score: f32,
}

impl FaceRegion {
    pub fn new(left: f32, top: f32, width: f32, height: f32) -> Self {
        Self {
            left,
            top,
            width,
            height,
            score: 1.0,
        }
    }

    pub fn right(&self) -> f32 {
        self.left + self.width
    }

    pub fn bottom(&self) -> f32 {
        self.top + self.height
    }

    /// Express this box as percentages (0–100) of the image dimensions.
    pub fn to_percent(&self, image_width: u32, image_height: u32) -> PercentBox {
        PercentBox::of(self, image_width, image_height)
    }
}

/// A box expressed as percentages of the image width and height.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PercentBox {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl PercentBox {
    pub fn of(region: &FaceRegion, image_width: u32, image_height: u32) -> Self {
        let pct = |value: f32, extent: u32| {
            if extent == 0 {
                0.0
            } else {
                value as f64 * 100.0 / extent as f64
            }
        };
        Self {
            x: pct(region.left, image_width),
            y: pct(region.top, image_height),
            width: pct(region.width, image_width),
            height: pct(region.height, image_height),
        }
    }

    pub fn right(&self) -> f64 {
        self.x + self.width
    }

    pub fn bottom(&self) -> f64 {
        self.y + self.height
    }
}

/// Face embedding vector ([`EMBEDDING_DIM`] values for the bundled model).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Embedding {
    pub values: Vec<f32>,
}

impl Embedding {
    pub fn new(values: Vec<f32>) -> Self {
        Self { values }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Compute Euclidean distance between two embeddings.
    pub fn euclidean_distance(&self, other: &Embedding) -> f32 {
        self.values
            .iter()
            .zip(other.values.iter())
            .map(|(a, b)| (a - b).powi(2))
            .sum::<f32>()
            .sqrt()
    }

    /// Element-wise arithmetic mean (the centroid) of `embeddings`.
    ///
    /// All inputs must share one dimension. Sums are accumulated in `f64`
    /// so the result does not depend on input order at `f32` precision.
    pub fn mean(embeddings: &[Embedding]) -> Option<Embedding> {
        let first = embeddings.first()?;
        let mut sums = vec![0.0f64; first.len()];
        for embedding in embeddings {
            for (sum, value) in sums.iter_mut().zip(&embedding.values) {
                *sum += *value as f64;
            }
        }
        let n = embeddings.len() as f64;
        Some(Embedding::new(
            sums.into_iter().map(|sum| (sum / n) as f32).collect(),
        ))
    }
}

/// A registered student and their enrollment centroid.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StudentProfile {
    pub id: String,
    /// Unique display name; also the key for photo storage and attendance.
    pub name: String,
    pub folder_path: String,
    /// Photo count declared by the enrolling client.
    pub photo_count: u32,
    /// `None` until an enrollment succeeds.
    pub centroid: Option<Embedding>,
    pub enrolled_at: Option<DateTime<Utc>>,
}

/// One accepted face match from a recognition call.
#[derive(Debug, Clone, PartialEq)]
pub struct MatchResult {
    pub name: String,
    /// In [0, 1]; derived from distance, not a probability.
    pub confidence: f32,
    pub distance: f32,
    pub region: FaceRegion,
    pub position: PercentBox,
}

/// Persisted attendance; at most one per (student, period).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttendanceRecord {
    pub student_name: String,
    pub period: String,
    pub confidence: f32,
    pub recorded_at: DateTime<Utc>,
}
