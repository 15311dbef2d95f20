//! Thin JSON client for the rollcalld HTTP API.

use anyhow::{anyhow, bail, Context, Result};
use base64::{engine::general_purpose, Engine as _};
use serde_json::{json, Value};
use std::path::Path;
use std::time::Duration;

const USER_AGENT: &str = concat!("rollcall/", env!("CARGO_PKG_VERSION"));

pub struct DaemonClient {
    http: reqwest::Client,
    base: String,
}

impl DaemonClient {
    pub fn new(server: &str) -> Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(Duration::from_secs(120))
            .build()
            .context("building HTTP client")?;
        Ok(Self {
            http,
            base: server.trim_end_matches('/').to_string(),
        })
    }

    pub async fn health(&self) -> Result<Value> {
        self.get("/health", &[]).await
    }

    pub async fn detect_face(&self, image: &Path) -> Result<Value> {
        self.post("/detect-face", json!({ "image": encode_file(image)? }))
            .await
    }

    pub async fn store_photo(&self, student: &str, slot: u32, image: &Path) -> Result<Value> {
        self.post(
            "/store-photo",
            json!({
                "studentName": student,
                "imageData": encode_file(image)?,
                "photoIndex": slot,
            }),
        )
        .await
    }

    pub async fn extract_features(&self, student: &str, photo_count: u32) -> Result<Value> {
        self.post(
            "/extract-features",
            json!({ "studentName": student, "photoCount": photo_count }),
        )
        .await
    }

    pub async fn recognize_faces(&self, image: &Path, period: &str) -> Result<Value> {
        self.post(
            "/recognize-faces",
            json!({ "groupImage": encode_file(image)?, "period": period }),
        )
        .await
    }

    pub async fn attendance(&self, period: Option<&str>, date: Option<&str>) -> Result<Value> {
        let mut query = Vec::new();
        if let Some(period) = period {
            query.push(("period", period));
        }
        if let Some(date) = date {
            query.push(("date", date));
        }
        self.get("/attendance", &query).await
    }

    pub async fn recent_attendance(&self) -> Result<Value> {
        self.get("/attendance/recent", &[]).await
    }

    pub async fn student_count(&self) -> Result<Value> {
        self.get("/students/count", &[]).await
    }

    async fn get(&self, path: &str, query: &[(&str, &str)]) -> Result<Value> {
        let url = format!("{}{path}", self.base);
        tracing::debug!(%url, "GET");
        let response = self
            .http
            .get(&url)
            .query(query)
            .send()
            .await
            .with_context(|| format!("cannot reach rollcalld at {}", self.base))?;
        read_json(response).await
    }

    async fn post(&self, path: &str, body: Value) -> Result<Value> {
        let url = format!("{}{path}", self.base);
        tracing::debug!(%url, "POST");
        let response = self
            .http
            .post(&url)
            .json(&body)
            .send()
            .await
            .with_context(|| format!("cannot reach rollcalld at {}", self.base))?;
        read_json(response).await
    }
}

async fn read_json(response: reqwest::Response) -> Result<Value> {
    let status = response.status();
    let body: Value = response
        .json()
        .await
        .map_err(|e| anyhow!("{status}: unreadable response body: {e}"))?;
    if !status.is_success() {
        let message = body["error"].as_str().unwrap_or("request failed");
        bail!("{status}: {message}");
    }
    Ok(body)
}

fn encode_file(path: &Path) -> Result<String> {
    let bytes = std::fs::read(path).with_context(|| format!("reading {}", path.display()))?;
    Ok(general_purpose::STANDARD.encode(bytes))
}
