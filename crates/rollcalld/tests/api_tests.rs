//! HTTP surface tests: the full router over a scripted detector and embedder,
//! an in-memory database and a temporary photo directory.

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use base64::{engine::general_purpose, Engine as _};
use http_body_util::BodyExt;
use image::{DynamicImage, ImageFormat, RgbImage};
use rollcall_core::{
    CapabilityError, Embedding, FaceDetector, FaceEmbedder, FaceModels, FaceRegion, PixelBuffer,
    EMBEDDING_DIM,
};
use rollcall_store::{FsObjectStore, SqliteStore};
use rollcalld::engine::{spawn_engine, EngineStores};
use rollcalld::{build_router, AppState};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::io::Cursor;
use std::sync::Arc;
use tempfile::TempDir;
use tower::ServiceExt;

/// Faces keyed by image width.
#[derive(Default)]
struct FakeDetector {
    faces: HashMap<u32, Vec<FaceRegion>>,
}

impl FaceDetector for FakeDetector {
    fn detect(&mut self, _gray: &[u8], width: u32, _height: u32) -> Result<Vec<FaceRegion>, CapabilityError> {
        Ok(self.faces.get(&width).cloned().unwrap_or_default())
    }
}

/// Embeddings keyed by (image width, face left edge).
#[derive(Default)]
struct FakeEmbedder {
    embeddings: HashMap<(u32, u32), Embedding>,
}

impl FaceEmbedder for FakeEmbedder {
    fn embed(&mut self, image: &PixelBuffer, face: &FaceRegion) -> Result<Embedding, CapabilityError> {
        self.embeddings
            .get(&(image.width(), face.left as u32))
            .cloned()
            .ok_or_else(|| CapabilityError::InferenceFailed("unscripted face".into()))
    }
}

fn embedding(first: f32) -> Embedding {
    let mut values = vec![0.0; EMBEDDING_DIM];
    values[0] = first;
    Embedding::new(values)
}

fn png_b64(width: u32, height: u32) -> String {
    let mut out = Cursor::new(Vec::new());
    DynamicImage::ImageRgb8(RgbImage::new(width, height))
        .write_to(&mut out, ImageFormat::Png)
        .unwrap();
    general_purpose::STANDARD.encode(out.into_inner())
}

struct TestApp {
    router: Router,
    photo_dir: TempDir,
}

/// Image widths: 101 and 102 are Ana's enrollment photos, 103 is a photo with
/// no face, 200 a portrait for framing checks, 300 a group photo.
fn scripted_models() -> FaceModels {
    let face = |left: f32| FaceRegion::new(left, 10.0, 40.0, 40.0);
    let mut detector = FakeDetector::default();
    detector.faces.insert(101, vec![face(20.0)]);
    detector.faces.insert(102, vec![face(20.0)]);
    detector.faces.insert(200, vec![FaceRegion::new(10.0, 40.0, 100.0, 100.0)]);
    detector.faces.insert(300, vec![face(30.0), face(150.0)]);

    let mut embedder = FakeEmbedder::default();
    embedder.embeddings.insert((101, 20), embedding(0.1));
    embedder.embeddings.insert((102, 20), embedding(0.3));
    embedder.embeddings.insert((300, 30), embedding(0.3));
    embedder.embeddings.insert((300, 150), embedding(1.0));

    FaceModels::ready(Box::new(detector), Box::new(embedder))
}

fn test_app(models: FaceModels) -> TestApp {
    let photo_dir = tempfile::tempdir().unwrap();
    let db = Arc::new(SqliteStore::open_in_memory().unwrap());
    let photos = Arc::new(FsObjectStore::new(photo_dir.path()));
    let engine = spawn_engine(
        models,
        EngineStores {
            photos: photos.clone(),
            profiles: db.clone(),
            ledger: db.clone(),
        },
    )
    .unwrap();
    TestApp {
        router: build_router(AppState::new(engine, photos, db)),
        photo_dir,
    }
}

async fn send(app: &TestApp, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, body)
}

async fn post(app: &TestApp, uri: &str, body: Value) -> (StatusCode, Value) {
    let request = Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap();
    send(app, request).await
}

async fn get(app: &TestApp, uri: &str) -> (StatusCode, Value) {
    send(app, Request::builder().uri(uri).body(Body::empty()).unwrap()).await
}

async fn enroll_ana(app: &TestApp) {
    for (slot, width) in [(1, 101), (2, 102)] {
        let (status, _) = post(
            app,
            "/store-photo",
            json!({ "studentName": "Ana", "imageData": png_b64(width, 80), "photoIndex": slot }),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
    }
    let (status, body) = post(
        app,
        "/extract-features",
        json!({ "studentName": "Ana", "photoCount": 2 }),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{body}");
}

#[tokio::test]
async fn health_reports_model_state() {
    let app = test_app(scripted_models());
    let (status, body) = get(&app, "/health").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert_eq!(body["modelsLoaded"], true);
    assert!(body["timestamp"].is_string());

    let app = test_app(FaceModels::unavailable("det_10g.onnx missing"));
    let (_, body) = get(&app, "/health").await;
    assert_eq!(body["modelsLoaded"], false);
}

#[tokio::test]
async fn detect_face_reports_framing() {
    let app = test_app(scripted_models());
    let (status, body) = post(&app, "/detect-face", json!({ "image": png_b64(200, 200) })).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["faceDetected"], true);
    assert_eq!(body["faceCount"], 1);
    assert_eq!(body["boundingBox"]["x"], 5.0);
    assert_eq!(body["boundingBox"]["y"], 20.0);
    assert_eq!(body["outOfRange"], true);
}

#[tokio::test]
async fn detect_face_accepts_data_url_and_no_face() {
    let app = test_app(scripted_models());
    let image = format!("data:image/png;base64,{}", png_b64(64, 64));
    let (status, body) = post(&app, "/detect-face", json!({ "image": image })).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["faceDetected"], false);
    assert_eq!(body["faceCount"], 0);
    assert!(body.get("boundingBox").is_none());
    assert!(body.get("outOfRange").is_none());
}

#[tokio::test]
async fn detect_face_rejects_bad_input() {
    let app = test_app(scripted_models());
    let (status, _) = post(&app, "/detect-face", json!({})).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, body) = post(&app, "/detect-face", json!({ "image": "not base64!" })).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].is_string());

    let garbage = general_purpose::STANDARD.encode(b"definitely not an image");
    let (status, _) = post(&app, "/detect-face", json!({ "image": garbage })).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn models_unavailable_is_503() {
    let app = test_app(FaceModels::unavailable("det_10g.onnx missing"));
    let (status, body) = post(&app, "/detect-face", json!({ "image": png_b64(8, 8) })).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert!(body["error"].as_str().unwrap().contains("det_10g.onnx missing"));
}

#[tokio::test]
async fn store_photo_writes_slot() {
    let app = test_app(scripted_models());
    let (status, body) = post(
        &app,
        "/store-photo",
        json!({ "studentName": "Ana", "imageData": png_b64(10, 10), "photoIndex": 3 }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    assert_eq!(body["filePath"], "students/Ana/photo_3.jpg");
    assert!(app.photo_dir.path().join("students/Ana/photo_3.jpg").is_file());
}

#[tokio::test]
async fn store_photo_validates_request() {
    let app = test_app(scripted_models());
    for (name, slot) in [("Ana", 0), ("Ana", 11), ("../etc", 1), ("", 1)] {
        let (status, _) = post(
            &app,
            "/store-photo",
            json!({ "studentName": name, "imageData": png_b64(10, 10), "photoIndex": slot }),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "{name} slot {slot}");
    }

    let garbage = general_purpose::STANDARD.encode(b"not an image");
    let (status, _) = post(
        &app,
        "/store-photo",
        json!({ "studentName": "Ana", "imageData": garbage, "photoIndex": 1 }),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(!app.photo_dir.path().join("students/Ana").exists());
}

#[tokio::test]
async fn extract_features_builds_centroid() {
    let app = test_app(scripted_models());
    for (slot, width) in [(1, 101), (2, 102), (3, 103)] {
        post(
            &app,
            "/store-photo",
            json!({ "studentName": "Ana", "imageData": png_b64(width, 80), "photoIndex": slot }),
        )
        .await;
    }

    let (status, body) = post(
        &app,
        "/extract-features",
        json!({ "studentName": "Ana", "photoCount": 3 }),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["success"], true);
    assert_eq!(body["validPhotos"], 2);
    assert_eq!(body["totalPhotos"], 3);
    assert_eq!(body["featuresCount"], 128);

    let (_, body) = get(&app, "/students/count").await;
    assert_eq!(body["count"], 1);
}

#[tokio::test]
async fn extract_features_error_statuses() {
    let app = test_app(scripted_models());

    let (status, _) = post(&app, "/extract-features", json!({ "studentName": "Ghost", "photoCount": 2 })).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = post(&app, "/extract-features", json!({ "studentName": "Ana" })).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = post(&app, "/extract-features", json!({ "studentName": "Ana", "photoCount": 0 })).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    post(
        &app,
        "/store-photo",
        json!({ "studentName": "Bo", "imageData": png_b64(103, 80), "photoIndex": 1 }),
    )
    .await;
    let (status, body) = post(&app, "/extract-features", json!({ "studentName": "Bo", "photoCount": 1 })).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["success"], false);

    let (_, body) = get(&app, "/students/count").await;
    assert_eq!(body["count"], 0);
}

#[tokio::test]
async fn recognize_faces_records_attendance() {
    let app = test_app(scripted_models());
    enroll_ana(&app).await;

    let (status, body) = post(
        &app,
        "/recognize-faces",
        json!({ "groupImage": png_b64(300, 200), "period": "P1" }),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["success"], true);
    assert_eq!(body["facesDetected"], 2);
    assert_eq!(body["attendanceCount"], 1);
    assert_eq!(body["period"], "P1");

    let students = body["recognizedStudents"].as_array().unwrap();
    assert_eq!(students.len(), 1);
    assert_eq!(students[0]["name"], "Ana");
    let confidence = students[0]["confidence"].as_f64().unwrap();
    assert!((confidence - 0.75).abs() < 1e-3, "confidence {confidence}");
    assert_eq!(students[0]["position"]["x"], 10.0);

    // Same period again overwrites rather than duplicating.
    post(
        &app,
        "/recognize-faces",
        json!({ "groupImage": png_b64(300, 200), "period": "P1" }),
    )
    .await;
    let (status, body) = get(&app, "/attendance?period=P1").await;
    assert_eq!(status, StatusCode::OK);
    let records = body["records"].as_array().unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0]["studentName"], "Ana");

    let (_, body) = get(&app, "/attendance?period=P2").await;
    assert!(body["records"].as_array().unwrap().is_empty());

    let (_, body) = get(&app, "/attendance/recent").await;
    assert_eq!(body["records"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn recognize_faces_with_empty_registry() {
    let app = test_app(scripted_models());
    let (status, body) = post(
        &app,
        "/recognize-faces",
        json!({ "groupImage": png_b64(300, 200), "period": "P1" }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    assert_eq!(body["message"], "No registered students found");
    assert_eq!(body["attendanceCount"], 0);
    assert!(body["recognizedStudents"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn recognize_faces_requires_period() {
    let app = test_app(scripted_models());
    let (status, _) = post(&app, "/recognize-faces", json!({ "groupImage": png_b64(300, 200) })).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    let (status, _) = post(
        &app,
        "/recognize-faces",
        json!({ "groupImage": png_b64(300, 200), "period": "  " }),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn attendance_rejects_bad_date() {
    let app = test_app(scripted_models());
    let (status, _) = get(&app, "/attendance?date=03/02/2026").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let today = chrono::Utc::now().format("%Y-%m-%d").to_string();
    let (status, body) = get(&app, &format!("/attendance?date={today}")).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["records"].as_array().unwrap().is_empty());
}
