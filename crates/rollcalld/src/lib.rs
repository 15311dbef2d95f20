//! rollcalld — HTTP daemon for classroom face-recognition attendance.
//!
//! Exposes the router and shared state so integration tests can drive the
//! service without binding a socket.

pub mod api;
pub mod config;
pub mod engine;

use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use axum::Router;
use chrono::{DateTime, Utc};
use engine::EngineHandle;
use rollcall_core::PhotoStore;
use rollcall_store::SqliteStore;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

/// Base64 group photos routinely exceed axum's 2 MiB default.
pub const MAX_BODY_BYTES: usize = 32 * 1024 * 1024;

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub engine: EngineHandle,
    pub photos: Arc<dyn PhotoStore>,
    pub db: Arc<SqliteStore>,
    pub started_at: DateTime<Utc>,
}

impl AppState {
    pub fn new(engine: EngineHandle, photos: Arc<dyn PhotoStore>, db: Arc<SqliteStore>) -> Self {
        Self {
            engine,
            photos,
            db,
            started_at: Utc::now(),
        }
    }
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(api::health))
        .route("/detect-face", post(api::detect_face))
        .route("/store-photo", post(api::store_photo))
        .route("/extract-features", post(api::extract_features))
        .route("/recognize-faces", post(api::recognize_faces))
        .route("/attendance", get(api::attendance))
        .route("/attendance/recent", get(api::recent_attendance))
        .route("/students/count", get(api::student_count))
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
