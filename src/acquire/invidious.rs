//! Mirror backend: Invidious public API instances.
//!
//! Invidious is an open-source YouTube frontend whose public instances
//! resolve direct media URLs without triggering bot detection.

use super::{download_to_file, FetchError, FetchResult, SourceMethod, VideoFetcher};
use crate::source::VideoRef;
use async_trait::async_trait;
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info, warn};

pub struct InvidiousFetcher {
    client: reqwest::Client,
    instances: Vec<String>,
    timeout: Duration,
    min_file_bytes: u64,
}

impl InvidiousFetcher {
    pub fn new(instances: Vec<String>, timeout: Duration, min_file_bytes: u64) -> Self {
        Self {
            client: reqwest::Client::new(),
            instances,
            timeout,
            min_file_bytes,
        }
    }

    /// Query one instance for video info; returns the best mp4 stream URL.
    async fn resolve(&self, instance: &str, video_id: &str) -> Result<String, FetchError> {
        let api_url = format!("{}/api/v1/videos/{}", instance.trim_end_matches('/'), video_id);
        debug!("Trying Invidious API: {}", api_url);

        let response = self
            .client
            .get(&api_url)
            .timeout(Duration::from_secs(30))
            .send()
            .await
            .map_err(|e| FetchError::transient(format!("{}: {}", instance, e)))?;

        let status = response.status();
        if status.is_server_error() {
            return Err(FetchError::transient(format!("{}: HTTP {}", instance, status)));
        }
        if !status.is_success() {
            return Err(FetchError::permanent(format!("{}: HTTP {}", instance, status)));
        }

        let info: serde_json::Value = response
            .json()
            .await
            .map_err(|e| FetchError::transient(format!("{}: bad JSON: {}", instance, e)))?;

        let formats = info["adaptiveFormats"]
            .as_array()
            .filter(|f| !f.is_empty())
            .ok_or_else(|| {
                FetchError::permanent(format!("{}: no adaptive formats returned", instance))
            })?;

        // Prefer mp4 video streams, highest bitrate first
        let mut candidates: Vec<&serde_json::Value> = formats
            .iter()
            .filter(|f| {
                f["type"]
                    .as_str()
                    .map(|t| t.starts_with("video/mp4"))
                    .unwrap_or(false)
            })
            .collect();
        if candidates.is_empty() {
            candidates = formats
                .iter()
                .filter(|f| {
                    f["type"].as_str().map(|t| t.contains("video")).unwrap_or(false)
                })
                .collect();
        }
        candidates.sort_by_key(|f| {
            std::cmp::Reverse(
                f["bitrate"]
                    .as_str()
                    .and_then(|b| b.parse::<u64>().ok())
                    .or_else(|| f["bitrate"].as_u64())
                    .unwrap_or(0),
            )
        });

        candidates
            .first()
            .and_then(|f| f["url"].as_str())
            .map(|u| u.to_string())
            .ok_or_else(|| FetchError::permanent(format!("{}: no usable video URL", instance)))
    }
}

#[async_trait]
impl VideoFetcher for InvidiousFetcher {
    fn method(&self) -> SourceMethod {
        SourceMethod::Invidious
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    async fn fetch(&self, video: &VideoRef, dest_dir: &Path) -> FetchResult {
        info!("Downloading {} via Invidious", video.id);

        let mut last_error = FetchError::unsupported("no Invidious instances configured");

        for instance in &self.instances {
            let media_url = match self.resolve(instance, &video.id).await {
                Ok(url) => url,
                Err(e) => {
                    warn!("{}", e);
                    last_error = e;
                    continue;
                }
            };

            let dest = dest_dir.join(format!("{}.mp4", video.id));
            match download_to_file(&self.client, &media_url, &dest, self.min_file_bytes).await {
                Ok(_) => return Ok(dest),
                Err(e) => {
                    warn!("Download from {} failed: {}", instance, e);
                    last_error = e;
                }
            }
        }

        Err(last_error)
    }
}
