//! One-time model download into the daemon's model directory.

use anyhow::{bail, Context, Result};
use std::path::{Path, PathBuf};

pub const DETECTOR_FILE: &str = "det_10g.onnx";
pub const EMBEDDER_FILE: &str = "face_embedding_128.onnx";

#[derive(Debug, PartialEq, Eq)]
pub enum Fetched {
    Downloaded { bytes: usize },
    AlreadyPresent,
}

/// Download `url` to `dir/file_name` unless the file already exists.
///
/// The body lands in a sibling temp file first and is renamed into place, so
/// an interrupted download never leaves a truncated model behind.
pub async fn fetch(http: &reqwest::Client, url: &str, dir: &Path, file_name: &str) -> Result<Fetched> {
    let target = dir.join(file_name);
    if target.exists() {
        tracing::info!(path = %target.display(), "model already present, skipping");
        return Ok(Fetched::AlreadyPresent);
    }

    std::fs::create_dir_all(dir).with_context(|| format!("creating {}", dir.display()))?;

    tracing::info!(%url, "downloading model");
    let response = http
        .get(url)
        .send()
        .await
        .with_context(|| format!("requesting {url}"))?;
    let status = response.status();
    if !status.is_success() {
        bail!("{url}: {status}");
    }
    let body = response
        .bytes()
        .await
        .with_context(|| format!("reading {url}"))?;
    if body.is_empty() {
        bail!("{url}: empty response body");
    }

    install(&body, &target)?;
    tracing::info!(path = %target.display(), bytes = body.len(), "model installed");
    Ok(Fetched::Downloaded { bytes: body.len() })
}

/// Write `bytes` to `target` through a `.part` file in the same directory.
fn install(bytes: &[u8], target: &Path) -> Result<()> {
    let partial = partial_path(target);
    let result = std::fs::write(&partial, bytes)
        .and_then(|()| std::fs::rename(&partial, target))
        .with_context(|| format!("writing {}", target.display()));
    if result.is_err() {
        let _ = std::fs::remove_file(&partial);
    }
    result
}

fn partial_path(target: &Path) -> PathBuf {
    let mut name = target.file_name().unwrap_or_default().to_os_string();
    name.push(".part");
    target.with_file_name(name)
}
