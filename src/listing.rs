//! Channel video listing via yt-dlp's flat-playlist mode.
//!
//! Flat extraction reads only the channel index, one JSON object per line,
//! without resolving individual videos. Shorts are filtered out here so the
//! scheduler only ever sees regular uploads.

use crate::error::{Result, VokalError};
use async_trait::async_trait;
use serde::Deserialize;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, info, instrument};

/// Anything shorter is assumed to be a Short even when the URL doesn't say so.
const SHORTS_MAX_SECS: u64 = 60;

/// One entry from a channel listing.
#[derive(Debug, Clone, PartialEq)]
pub struct ChannelVideo {
    pub video_id: String,
    pub title: String,
    /// Flat extraction may not know the duration.
    pub duration_secs: Option<u64>,
    pub url: String,
}

/// Enumerates a channel's recent uploads, newest first.
#[async_trait]
pub trait ChannelLister: Send + Sync {
    async fn list(&self, channel: &str, limit: usize) -> Result<Vec<ChannelVideo>>;
}

pub struct YtDlpLister {
    timeout: Duration,
}

impl YtDlpLister {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

#[async_trait]
impl ChannelLister for YtDlpLister {
    #[instrument(skip(self))]
    async fn list(&self, channel: &str, limit: usize) -> Result<Vec<ChannelVideo>> {
        let url = normalize_channel_url(channel);
        info!("Listing uploads from {}", url);

        let invocation = Command::new("yt-dlp")
            .arg("--flat-playlist")
            .arg("--dump-json")
            .arg("--playlist-end").arg(limit.to_string())
            .arg("--quiet")
            .arg("--no-warnings")
            .arg(&url)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output();

        let output = match tokio::time::timeout(self.timeout, invocation).await {
            Ok(Ok(o)) => o,
            Ok(Err(e)) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(VokalError::ToolNotFound("yt-dlp".into()));
            }
            Ok(Err(e)) => {
                return Err(VokalError::Listing(format!("yt-dlp execution failed: {e}")));
            }
            Err(_) => {
                return Err(VokalError::Listing(format!(
                    "listing {} timed out after {}s",
                    channel,
                    self.timeout.as_secs()
                )));
            }
        };

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(VokalError::Listing(format!(
                "cannot list {}: {}",
                channel,
                stderr.trim()
            )));
        }

        let videos = parse_listing(&String::from_utf8_lossy(&output.stdout));
        info!("Found {} regular uploads on {}", videos.len(), channel);
        Ok(videos)
    }
}

/// Accepts a bare handle, a handle URL, or any full channel URL; always
/// targets the uploads tab.
fn normalize_channel_url(channel: &str) -> String {
    let base = if channel.starts_with("http://") || channel.starts_with("https://") {
        channel.trim_end_matches('/').to_string()
    } else if let Some(handle) = channel.strip_prefix('@') {
        format!("https://www.youtube.com/@{}", handle)
    } else {
        format!("https://www.youtube.com/@{}", channel)
    };

    if base.ends_with("/videos") {
        base
    } else {
        format!("{}/videos", base)
    }
}

#[derive(Deserialize)]
struct FlatEntry {
    id: String,
    title: Option<String>,
    duration: Option<f64>,
    url: Option<String>,
}

/// Parse yt-dlp's one-JSON-object-per-line flat output, dropping Shorts and
/// unparseable lines.
fn parse_listing(stdout: &str) -> Vec<ChannelVideo> {
    let mut videos = Vec::new();

    for line in stdout.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let entry: FlatEntry = match serde_json::from_str(line) {
            Ok(e) => e,
            Err(e) => {
                debug!("Skipping unparseable listing line: {}", e);
                continue;
            }
        };

        let url = entry
            .url
            .unwrap_or_else(|| format!("https://www.youtube.com/watch?v={}", entry.id));

        if url.contains("/shorts/") {
            continue;
        }
        if let Some(d) = entry.duration {
            if (d as u64) < SHORTS_MAX_SECS {
                continue;
            }
        }

        videos.push(ChannelVideo {
            video_id: entry.id,
            title: entry.title.unwrap_or_default(),
            duration_secs: entry.duration.map(|d| d as u64),
            url,
        });
    }

    videos
}
