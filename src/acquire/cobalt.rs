//! Resolver backend: Cobalt API instances.
//!
//! Cobalt proxies the download through its own servers. Its API requires a
//! request-scoped session token; failing to obtain one is a permanent
//! failure for the instance (the chain moves on).

use super::{download_to_file, FetchError, FetchResult, SourceMethod, VideoFetcher};
use crate::source::VideoRef;
use async_trait::async_trait;
use serde_json::json;
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info, warn};

pub struct CobaltFetcher {
    client: reqwest::Client,
    instances: Vec<String>,
    timeout: Duration,
    min_file_bytes: u64,
}

impl CobaltFetcher {
    pub fn new(instances: Vec<String>, timeout: Duration, min_file_bytes: u64) -> Self {
        Self {
            client: reqwest::Client::new(),
            instances,
            timeout,
            min_file_bytes,
        }
    }

    /// Obtain a request-scoped bearer token from the instance.
    async fn session_token(&self, instance: &str) -> Result<String, FetchError> {
        let url = format!("{}/session", instance.trim_end_matches('/'));

        let response = self
            .client
            .post(&url)
            .timeout(Duration::from_secs(30))
            .send()
            .await
            .map_err(|e| FetchError::permanent(format!("{}: token request failed: {}", instance, e)))?;

        if !response.status().is_success() {
            return Err(FetchError::permanent(format!(
                "{}: token request returned HTTP {}",
                instance,
                response.status()
            )));
        }

        let body: serde_json::Value = response
            .json()
            .await
            .map_err(|e| FetchError::permanent(format!("{}: bad token response: {}", instance, e)))?;

        body["token"]
            .as_str()
            .map(|t| t.to_string())
            .ok_or_else(|| FetchError::permanent(format!("{}: token missing from response", instance)))
    }

    /// Resolve a direct (tunnel) download URL for the video.
    async fn resolve(&self, instance: &str, video: &VideoRef) -> Result<String, FetchError> {
        let token = self.session_token(instance).await?;

        let api_url = format!("{}/", instance.trim_end_matches('/'));
        debug!("Trying Cobalt API: {}", api_url);

        let response = self
            .client
            .post(&api_url)
            .bearer_auth(&token)
            .header("Accept", "application/json")
            .json(&json!({
                "url": video.url,
                "videoQuality": "1080",
                "youtubeVideoCodec": "h264",
                "downloadMode": "auto",
                "filenameStyle": "basic",
            }))
            .timeout(Duration::from_secs(30))
            .send()
            .await
            .map_err(|e| FetchError::transient(format!("{}: {}", instance, e)))?;

        let status = response.status();
        if status.is_server_error() {
            return Err(FetchError::transient(format!("{}: HTTP {}", instance, status)));
        }

        let body: serde_json::Value = response
            .json()
            .await
            .map_err(|e| FetchError::transient(format!("{}: bad JSON: {}", instance, e)))?;

        match body["status"].as_str() {
            Some("tunnel") | Some("redirect") => body["url"]
                .as_str()
                .map(|u| u.to_string())
                .ok_or_else(|| {
                    FetchError::permanent(format!("{}: no URL in tunnel response", instance))
                }),
            Some("picker") => body["picker"]
                .as_array()
                .and_then(|p| p.first())
                .and_then(|p| p["url"].as_str())
                .map(|u| u.to_string())
                .ok_or_else(|| {
                    FetchError::permanent(format!("{}: empty picker response", instance))
                }),
            Some("error") => {
                let code = body["error"]["code"].as_str().unwrap_or("unknown");
                Err(FetchError::permanent(format!(
                    "{}: API error: {}",
                    instance, code
                )))
            }
            other => Err(FetchError::permanent(format!(
                "{}: unexpected status: {:?}",
                instance, other
            ))),
        }
    }
}

#[async_trait]
impl VideoFetcher for CobaltFetcher {
    fn method(&self) -> SourceMethod {
        SourceMethod::Cobalt
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    async fn fetch(&self, video: &VideoRef, dest_dir: &Path) -> FetchResult {
        info!("Downloading {} via Cobalt", video.id);

        let mut last_error = FetchError::unsupported("no Cobalt instances configured");

        for instance in &self.instances {
            let media_url = match self.resolve(instance, video).await {
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
