//! Input resolution: normalise a user-supplied path or URL to a local file.
//!
//! Rasterizers need a file-system path. A URL is downloaded into a `TempDir`
//! that lives as long as the [`ResolvedInput`], so the file is removed when
//! processing finishes, even on error.

use crate::error::PipelineError;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use tracing::{debug, info};

/// The resolved input: either a local path or a downloaded temp file.
#[derive(Debug)]
pub enum ResolvedInput {
    /// Input was already a local file.
    Local(PathBuf),
    /// Input was a URL. The `TempDir` keeps the download alive.
    Downloaded { path: PathBuf, _temp_dir: TempDir },
}

impl ResolvedInput {
    /// Path to the document regardless of how it was resolved.
    pub fn path(&self) -> &Path {
        match self {
            ResolvedInput::Local(p) => p,
            ResolvedInput::Downloaded { path, .. } => path,
        }
    }

    /// File name without extension; names the document's cache keys.
    pub fn document_stem(&self) -> String {
        self.path()
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "document".to_string())
    }

    /// Lower-cased extension, empty when there is none.
    pub fn extension(&self) -> String {
        self.path()
            .extension()
            .map(|e| e.to_string_lossy().to_lowercase())
            .unwrap_or_default()
    }
}

/// Check if the input string looks like a URL.
pub fn is_url(input: &str) -> bool {
    input.starts_with("http://") || input.starts_with("https://")
}

/// Resolve the input string to a readable, non-empty local file.
pub async fn resolve_input(input: &str, timeout_secs: u64) -> Result<ResolvedInput, PipelineError> {
    if input.trim().is_empty() {
        return Err(PipelineError::InvalidInput {
            input: input.to_string(),
        });
    }
    if is_url(input) {
        download_url(input, timeout_secs).await
    } else {
        resolve_local(input)
    }
}

/// Validate existence, read permission and size of a local file.
fn resolve_local(path_str: &str) -> Result<ResolvedInput, PipelineError> {
    let path = PathBuf::from(path_str);

    if !path.exists() {
        return Err(PipelineError::FileNotFound { path });
    }
    if path.is_dir() {
        return Err(PipelineError::InvalidInput {
            input: path_str.to_string(),
        });
    }

    // Check read permission by attempting to open
    let file = match std::fs::File::open(&path) {
        Ok(f) => f,
        Err(e) => return Err(io_to_input_error(e, path)),
    };

    let len = match file.metadata() {
        Ok(m) => m.len(),
        Err(e) => return Err(io_to_input_error(e, path)),
    };
    if len == 0 {
        return Err(PipelineError::EmptyDocument { path });
    }

    debug!("Resolved local document: {} ({} bytes)", path.display(), len);
    Ok(ResolvedInput::Local(path))
}

fn io_to_input_error(e: std::io::Error, path: PathBuf) -> PipelineError {
    if e.kind() == std::io::ErrorKind::PermissionDenied {
        PipelineError::PermissionDenied { path }
    } else {
        PipelineError::FileNotFound { path }
    }
}

/// Download a URL to a temporary directory and return the path.
async fn download_url(url: &str, timeout_secs: u64) -> Result<ResolvedInput, PipelineError> {
    info!("Downloading document from: {}", url);

    let client = reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(timeout_secs))
        .build()
        .map_err(|e| PipelineError::DownloadFailed {
            url: url.to_string(),
            reason: e.to_string(),
        })?;

    let response = client.get(url).send().await.map_err(|e| {
        if e.is_timeout() {
            PipelineError::DownloadTimeout {
                url: url.to_string(),
                secs: timeout_secs,
            }
        } else {
            PipelineError::DownloadFailed {
                url: url.to_string(),
                reason: e.to_string(),
            }
        }
    })?;

    if !response.status().is_success() {
        return Err(PipelineError::DownloadFailed {
            url: url.to_string(),
            reason: format!("HTTP {}", response.status()),
        });
    }

    let content_type = response
        .headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    let filename = extract_filename(url, content_type.as_deref());

    let temp_dir = TempDir::new().map_err(|e| PipelineError::Internal(e.to_string()))?;
    let file_path = temp_dir.path().join(&filename);

    let bytes = response.bytes().await.map_err(|e| {
        if e.is_timeout() {
            PipelineError::DownloadTimeout {
                url: url.to_string(),
                secs: timeout_secs,
            }
        } else {
            PipelineError::DownloadFailed {
                url: url.to_string(),
                reason: e.to_string(),
            }
        }
    })?;

    if bytes.is_empty() {
        return Err(PipelineError::EmptyDocument { path: file_path });
    }

    tokio::fs::write(&file_path, &bytes)
        .await
        .map_err(|e| PipelineError::Internal(format!("Failed to write temp file: {}", e)))?;

    info!("Downloaded {} bytes to: {}", bytes.len(), file_path.display());

    Ok(ResolvedInput::Downloaded {
        path: file_path,
        _temp_dir: temp_dir,
    })
}

/// Pick a file name from the URL path, else from the content type.
fn extract_filename(url: &str, content_type: Option<&str>) -> String {
    if let Ok(parsed) = reqwest::Url::parse(url) {
        if let Some(mut segments) = parsed.path_segments() {
            if let Some(last) = segments.next_back() {
                if !last.is_empty() && last.contains('.') {
                    return last.to_string();
                }
            }
        }
    }

    let ext = match content_type.map(|c| c.split(';').next().unwrap_or(c).trim()) {
        Some("image/png") => "png",
        Some("image/jpeg") => "jpg",
        _ => "pdf",
    };
    format!("downloaded.{ext}")
}
