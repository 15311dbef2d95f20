//! HTTP request surface.
//!
//! JSON in and out, camelCase field names. Model-backed requests go through
//! the engine thread; store reads run on the blocking pool.

use crate::engine::EngineError;
use crate::AppState;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::{DateTime, NaiveDate, Utc};
use rollcall_core::{
    decode_image, is_valid_student_name, photo_path, AttendanceRecord, CapabilityError,
    DecodeError, EnrollError, Framing, PercentBox, RecognizeError, StoreError, MAX_PHOTO_SLOTS,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use thiserror::Error;

/// Number of records returned by the recent-activity endpoint.
pub const RECENT_LIMIT: usize = 10;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    Unprocessable(String),
    #[error("{0}")]
    Unavailable(String),
    #[error("{0}")]
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Unprocessable(_) => StatusCode::UNPROCESSABLE_ENTITY,
            ApiError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status.is_server_error() {
            tracing::error!(%status, error = %self, "request failed");
        }
        let body = Json(json!({ "success": false, "error": self.to_string() }));
        (status, body).into_response()
    }
}

impl From<CapabilityError> for ApiError {
    fn from(e: CapabilityError) -> Self {
        match e {
            CapabilityError::Unavailable(_) | CapabilityError::ModelNotFound(_) => {
                ApiError::Unavailable(e.to_string())
            }
            CapabilityError::InferenceFailed(_) | CapabilityError::Ort(_) => {
                ApiError::Internal(e.to_string())
            }
        }
    }
}

impl From<StoreError> for ApiError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::InvalidPath(_) => ApiError::BadRequest(e.to_string()),
            StoreError::Storage(_) | StoreError::Persistence(_) => ApiError::Internal(e.to_string()),
        }
    }
}

impl From<DecodeError> for ApiError {
    fn from(e: DecodeError) -> Self {
        ApiError::BadRequest(e.to_string())
    }
}

impl From<EngineError> for ApiError {
    fn from(e: EngineError) -> Self {
        match e {
            EngineError::Decode(e) => e.into(),
            EngineError::Capability(e) => e.into(),
            EngineError::Enroll(e) => match e {
                EnrollError::InvalidStudentName(_) | EnrollError::InvalidPhotoCount => {
                    ApiError::BadRequest(e.to_string())
                }
                EnrollError::NoPhotosFound(_) => ApiError::NotFound(e.to_string()),
                EnrollError::NoValidEnrollmentPhotos { .. } => {
                    ApiError::Unprocessable(e.to_string())
                }
                EnrollError::Capability(e) => e.into(),
                EnrollError::Storage(e) | EnrollError::Persistence(e) => e.into(),
            },
            EngineError::Recognize(e) => match e {
                RecognizeError::InvalidPeriod => ApiError::BadRequest(e.to_string()),
                RecognizeError::Capability(e) => e.into(),
                RecognizeError::Registry(e) => e.into(),
            },
            EngineError::Spawn(_) | EngineError::ChannelClosed => {
                ApiError::Unavailable(e.to_string())
            }
        }
    }
}

pub type ApiResult<T> = Result<T, ApiError>;

/// Present and not blank, or a 400 naming the field.
fn required(value: Option<String>, field: &str) -> ApiResult<String> {
    value
        .filter(|v| !v.trim().is_empty())
        .ok_or_else(|| ApiError::BadRequest(format!("{field} is required")))
}

async fn blocking<T, F>(f: F) -> ApiResult<T>
where
    F: FnOnce() -> ApiResult<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| ApiError::Internal(format!("blocking task failed: {e}")))?
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub status: &'static str,
    pub models_loaded: bool,
    pub timestamp: DateTime<Utc>,
    pub uptime_seconds: u64,
}

/// GET /health
pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    let now = Utc::now();
    Json(HealthResponse {
        status: "ok",
        models_loaded: state.engine.models_loaded(),
        timestamp: now,
        uptime_seconds: now.signed_duration_since(state.started_at).num_seconds().max(0) as u64,
    })
}

#[derive(Debug, Deserialize)]
pub struct DetectRequest {
    #[serde(default)]
    pub image: Option<String>,
}

/// POST /detect-face
pub async fn detect_face(
    State(state): State<AppState>,
    Json(req): Json<DetectRequest>,
) -> ApiResult<Json<Framing>> {
    let image = required(req.image, "image")?;
    let framing = state.engine.detect(image).await?;
    Ok(Json(framing))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StorePhotoRequest {
    #[serde(default)]
    pub student_name: Option<String>,
    #[serde(default)]
    pub image_data: Option<String>,
    #[serde(default)]
    pub photo_index: Option<u32>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StorePhotoResponse {
    pub success: bool,
    pub file_path: String,
}

/// POST /store-photo
///
/// Stores the decoded bytes as given; the payload must decode as an image.
pub async fn store_photo(
    State(state): State<AppState>,
    Json(req): Json<StorePhotoRequest>,
) -> ApiResult<Json<StorePhotoResponse>> {
    let student = required(req.student_name, "studentName")?;
    let image_data = required(req.image_data, "imageData")?;
    let slot = req
        .photo_index
        .ok_or_else(|| ApiError::BadRequest("photoIndex is required".into()))?;

    if !is_valid_student_name(&student) {
        return Err(ApiError::BadRequest(format!("invalid student name: {student:?}")));
    }
    if !(1..=MAX_PHOTO_SLOTS).contains(&slot) {
        return Err(ApiError::BadRequest(format!(
            "photoIndex must be between 1 and {MAX_PHOTO_SLOTS}"
        )));
    }

    let photos = state.photos.clone();
    let path = photo_path(&student, slot);
    let file_path = blocking(move || {
        let bytes = rollcall_core::decode_base64(&image_data)?;
        decode_image(&bytes)?;
        Ok(photos.upload(&path, &bytes)?)
    })
    .await?;

    tracing::info!(student = %student, slot, path = %file_path, "photo stored");
    Ok(Json(StorePhotoResponse {
        success: true,
        file_path,
    }))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtractFeaturesRequest {
    #[serde(default)]
    pub student_name: Option<String>,
    #[serde(default)]
    pub photo_count: Option<u32>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtractFeaturesResponse {
    pub success: bool,
    pub message: String,
    pub valid_photos: usize,
    pub total_photos: usize,
    pub features_count: usize,
}

/// POST /extract-features
pub async fn extract_features(
    State(state): State<AppState>,
    Json(req): Json<ExtractFeaturesRequest>,
) -> ApiResult<Json<ExtractFeaturesResponse>> {
    let student = required(req.student_name, "studentName")?;
    let photo_count = req
        .photo_count
        .ok_or_else(|| ApiError::BadRequest("photoCount is required".into()))?;

    let report = state.engine.enroll(student.clone(), photo_count).await?;
    Ok(Json(ExtractFeaturesResponse {
        success: true,
        message: format!(
            "Enrolled {student} from {} of {} photos",
            report.valid_photos, report.total_photos
        ),
        valid_photos: report.valid_photos,
        total_photos: report.total_photos,
        features_count: report.dimensions(),
    }))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecognizeRequest {
    #[serde(default)]
    pub group_image: Option<String>,
    #[serde(default)]
    pub period: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct RecognizedStudent {
    pub name: String,
    pub confidence: f32,
    pub position: PercentBox,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecognizeResponse {
    pub success: bool,
    pub recognized_students: Vec<RecognizedStudent>,
    pub attendance_count: usize,
    pub period: String,
    pub faces_detected: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// POST /recognize-faces
pub async fn recognize_faces(
    State(state): State<AppState>,
    Json(req): Json<RecognizeRequest>,
) -> ApiResult<Json<RecognizeResponse>> {
    let image = required(req.group_image, "groupImage")?;
    let period = required(req.period, "period")?;

    let outcome = state.engine.recognize(image, period.clone()).await?;

    let message = if outcome.registry_empty {
        Some("No registered students found".to_string())
    } else if outcome.faces_detected == 0 {
        Some("No faces detected in image".to_string())
    } else {
        None
    };

    Ok(Json(RecognizeResponse {
        success: true,
        recognized_students: outcome
            .matches
            .into_iter()
            .map(|m| RecognizedStudent {
                name: m.name,
                confidence: m.confidence,
                position: m.position,
            })
            .collect(),
        attendance_count: outcome.attendance_written,
        period,
        faces_detected: outcome.faces_detected,
        message,
    }))
}

#[derive(Debug, Deserialize)]
pub struct AttendanceQuery {
    pub period: Option<String>,
    /// Calendar date (`YYYY-MM-DD`, UTC).
    pub date: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AttendanceEntry {
    pub student_name: String,
    pub period: String,
    pub confidence: f32,
    pub recorded_at: DateTime<Utc>,
}

impl From<AttendanceRecord> for AttendanceEntry {
    fn from(r: AttendanceRecord) -> Self {
        Self {
            student_name: r.student_name,
            period: r.period,
            confidence: r.confidence,
            recorded_at: r.recorded_at,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct AttendanceResponse {
    pub records: Vec<AttendanceEntry>,
}

impl AttendanceResponse {
    fn from_records(records: Vec<AttendanceRecord>) -> Self {
        Self {
            records: records.into_iter().map(AttendanceEntry::from).collect(),
        }
    }
}

/// GET /attendance?period=&date=
pub async fn attendance(
    State(state): State<AppState>,
    Query(query): Query<AttendanceQuery>,
) -> ApiResult<Json<AttendanceResponse>> {
    let period = query.period.filter(|p| !p.trim().is_empty());
    let date = query
        .date
        .filter(|d| !d.trim().is_empty())
        .map(|d| {
            NaiveDate::parse_from_str(&d, "%Y-%m-%d")
                .map_err(|_| ApiError::BadRequest(format!("invalid date {d:?}, expected YYYY-MM-DD")))
        })
        .transpose()?;

    let db = state.db.clone();
    let records = blocking(move || Ok(db.attendance(period.as_deref(), date)?)).await?;
    Ok(Json(AttendanceResponse::from_records(records)))
}

/// GET /attendance/recent
pub async fn recent_attendance(State(state): State<AppState>) -> ApiResult<Json<AttendanceResponse>> {
    let db = state.db.clone();
    let records = blocking(move || Ok(db.recent_attendance(RECENT_LIMIT)?)).await?;
    Ok(Json(AttendanceResponse::from_records(records)))
}

#[derive(Debug, Serialize)]
pub struct CountResponse {
    pub count: usize,
}

/// GET /students/count
pub async fn student_count(State(state): State<AppState>) -> ApiResult<Json<CountResponse>> {
    let db = state.db.clone();
    let count = blocking(move || Ok(db.student_count()?)).await?;
    Ok(Json(CountResponse { count }))
}
