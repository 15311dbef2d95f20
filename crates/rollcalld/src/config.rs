use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Daemon configuration.
///
/// Built from defaults, then an optional TOML file named by `ROLLCALL_CONFIG`,
/// then `ROLLCALL_*` environment variables. Later sources win.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Socket address the HTTP server binds to.
    pub listen: String,
    /// Directory containing ONNX model files.
    pub model_dir: PathBuf,
    /// Path to the SQLite database file.
    pub db_path: PathBuf,
    /// Root directory of the photo object store.
    pub photo_dir: PathBuf,
    /// Detector model file name inside `model_dir`.
    pub detector_model: String,
    /// Embedder model file name inside `model_dir`.
    pub embedder_model: String,
    /// ONNX Runtime intra-op threads per session.
    pub intra_threads: usize,
}

impl Default for Config {
    fn default() -> Self {
        let data_dir = rollcall_core::data_home().join("rollcall");
        Self {
            listen: "0.0.0.0:5000".to_string(),
            model_dir: rollcall_core::default_model_dir(),
            db_path: data_dir.join("rollcall.db"),
            photo_dir: data_dir.join("photos"),
            detector_model: "det_10g.onnx".to_string(),
            embedder_model: "face_embedding_128.onnx".to_string(),
            intra_threads: 2,
        }
    }
}

impl Config {
    /// Load configuration from the process environment.
    pub fn load() -> Result<Self> {
        let mut config = match std::env::var("ROLLCALL_CONFIG") {
            Ok(path) => Self::from_file(Path::new(&path))?,
            Err(_) => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok());
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        Self::from_toml(&contents).with_context(|| format!("parsing config {}", path.display()))
    }

    /// Parse a TOML document; keys it leaves out keep their defaults.
    pub fn from_toml(contents: &str) -> Result<Self> {
        Ok(toml::from_str(contents)?)
    }

    /// Override fields from `ROLLCALL_*` variables resolved through `lookup`.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(v) = lookup("ROLLCALL_LISTEN") {
            self.listen = v;
        }
        if let Some(v) = lookup("ROLLCALL_MODEL_DIR") {
            self.model_dir = PathBuf::from(v);
        }
        if let Some(v) = lookup("ROLLCALL_DB_PATH") {
            self.db_path = PathBuf::from(v);
        }
        if let Some(v) = lookup("ROLLCALL_PHOTO_DIR") {
            self.photo_dir = PathBuf::from(v);
        }
        if let Some(v) = lookup("ROLLCALL_DETECTOR_MODEL") {
            self.detector_model = v;
        }
        if let Some(v) = lookup("ROLLCALL_EMBEDDER_MODEL") {
            self.embedder_model = v;
        }
        self.intra_threads = env_usize(&lookup, "ROLLCALL_INTRA_THREADS", self.intra_threads);
    }

    /// Path to the face detection model.
    pub fn detector_model_path(&self) -> PathBuf {
        self.model_dir.join(&self.detector_model)
    }

    /// Path to the face embedding model.
    pub fn embedder_model_path(&self) -> PathBuf {
        self.model_dir.join(&self.embedder_model)
    }
}

fn env_usize(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: usize) -> usize {
    match lookup(key).map(|v| v.parse::<usize>()) {
        Some(Ok(n)) if n > 0 => n,
        Some(_) => {
            tracing::warn!(key, default, "ignoring invalid value");
            default
        }
        None => default,
    }
}
