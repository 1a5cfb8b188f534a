//! Video acquisition backends.
//!
//! Five independent strategies for obtaining a raw video file from a URL,
//! polymorphic over a single capability ([`VideoFetcher::fetch`]). The
//! [`chain::AcquisitionChain`] tries them in a fixed priority order; each
//! successive method is slower and less reliable, but harder for the source
//! platform to detect and block.

pub mod chain;
mod cobalt;
mod gui;
mod invidious;
mod piped;
mod ytdlp;

pub use chain::{AcquisitionChain, AllMethodsExhausted, Attempt, AttemptOutcome, ChainReport};
pub use cobalt::CobaltFetcher;
pub use gui::GuiFetcher;
pub use invidious::InvidiousFetcher;
pub use piped::PipedFetcher;
pub use ytdlp::YtDlpFetcher;

use crate::source::VideoRef;
use async_trait::async_trait;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tracing::debug;

/// Which backend produced a video file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceMethod {
    YtDlp,
    Invidious,
    Piped,
    Cobalt,
    Gui,
}

impl std::fmt::Display for SourceMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SourceMethod::YtDlp => write!(f, "ytdlp"),
            SourceMethod::Invidious => write!(f, "invidious"),
            SourceMethod::Piped => write!(f, "piped"),
            SourceMethod::Cobalt => write!(f, "cobalt"),
            SourceMethod::Gui => write!(f, "gui"),
        }
    }
}

/// A classified failure from one backend attempt.
#[derive(Debug, Clone)]
pub struct FetchError {
    pub kind: FetchErrorKind,
    pub message: String,
}

/// How the chain should treat a backend failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchErrorKind {
    /// Worth retrying on the same backend (rate limit, 5xx, timeout).
    Transient,
    /// This backend cannot get this video; move on (not found, auth).
    Permanent,
    /// The backend's capability is unavailable; move on immediately.
    Unsupported,
}

impl FetchError {
    pub fn transient(message: impl Into<String>) -> Self {
        Self {
            kind: FetchErrorKind::Transient,
            message: message.into(),
        }
    }

    pub fn permanent(message: impl Into<String>) -> Self {
        Self {
            kind: FetchErrorKind::Permanent,
            message: message.into(),
        }
    }

    pub fn unsupported(message: impl Into<String>) -> Self {
        Self {
            kind: FetchErrorKind::Unsupported,
            message: message.into(),
        }
    }
}

impl std::fmt::Display for FetchError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let kind = match self.kind {
            FetchErrorKind::Transient => "transient",
            FetchErrorKind::Permanent => "permanent",
            FetchErrorKind::Unsupported => "unsupported",
        };
        write!(f, "{}: {}", kind, self.message)
    }
}

impl std::error::Error for FetchError {}

/// Result of a single backend fetch.
pub type FetchResult = std::result::Result<PathBuf, FetchError>;

/// One successful acquisition. Produced exactly once per video and owned by
/// the pipeline until consumed.
#[derive(Debug, Clone)]
pub struct AcquisitionResult {
    pub video_path: PathBuf,
    pub source_method: SourceMethod,
    pub size_bytes: u64,
}

/// One concrete method of obtaining a video file from a URL.
#[async_trait]
pub trait VideoFetcher: Send + Sync {
    fn method(&self) -> SourceMethod;

    /// Per-backend timeout, enforced by the chain around `fetch`.
    fn timeout(&self) -> Duration;

    /// Fetch the video into `dest_dir` and return the downloaded path.
    ///
    /// Implementations must not leave partial files visible: write to a
    /// temporary name and rename on success.
    async fn fetch(&self, video: &VideoRef, dest_dir: &Path) -> FetchResult;
}

/// Stream an HTTP response body to `dest`, via a `.part` temporary name.
///
/// Classifies connection errors and 5xx as transient, other HTTP status
/// failures as permanent. A body below `min_bytes` is rejected as transient
/// (truncated transfer).
pub(crate) async fn download_to_file(
    client: &reqwest::Client,
    url: &str,
    dest: &Path,
    min_bytes: u64,
) -> std::result::Result<u64, FetchError> {
    let response = client
        .get(url)
        .send()
        .await
        .map_err(|e| FetchError::transient(format!("request failed: {}", e)))?;

    let status = response.status();
    if status.is_server_error() {
        return Err(FetchError::transient(format!("HTTP {}", status)));
    }
    if !status.is_success() {
        return Err(FetchError::permanent(format!("HTTP {}", status)));
    }

    let part = dest.with_extension("part");
    let mut file = tokio::fs::File::create(&part)
        .await
        .map_err(|e| FetchError::permanent(format!("cannot create {}: {}", part.display(), e)))?;

    let mut written: u64 = 0;
    let mut stream = response.bytes_stream();

    while let Some(chunk) = stream.next().await {
        let chunk = match chunk {
            Ok(c) => c,
            Err(e) => {
                drop(file);
                let _ = tokio::fs::remove_file(&part).await;
                return Err(FetchError::transient(format!("read failed: {}", e)));
            }
        };
        if let Err(e) = file.write_all(&chunk).await {
            drop(file);
            let _ = tokio::fs::remove_file(&part).await;
            return Err(FetchError::permanent(format!("write failed: {}", e)));
        }
        written += chunk.len() as u64;
    }

    file.flush()
        .await
        .map_err(|e| FetchError::permanent(format!("flush failed: {}", e)))?;
    drop(file);

    if written < min_bytes {
        let _ = tokio::fs::remove_file(&part).await;
        return Err(FetchError::transient(format!(
            "downloaded only {} bytes",
            written
        )));
    }

    tokio::fs::rename(&part, dest)
        .await
        .map_err(|e| FetchError::permanent(format!("rename failed: {}", e)))?;

    debug!("Downloaded {} bytes to {}", written, dest.display());
    Ok(written)
}
