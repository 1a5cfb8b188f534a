//! Primary download backend: yt-dlp.

use super::{FetchError, FetchResult, SourceMethod, VideoFetcher};
use crate::source::VideoRef;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, info};

/// Downloads via the yt-dlp tool, impersonating a mobile client and
/// optionally supplying browser-derived cookies and a proxy.
pub struct YtDlpFetcher {
    timeout: Duration,
    cookies_file: Option<PathBuf>,
    proxy: Option<String>,
}

impl YtDlpFetcher {
    pub fn new(timeout: Duration, cookies_file: Option<PathBuf>, proxy: Option<String>) -> Self {
        Self {
            timeout,
            cookies_file,
            proxy,
        }
    }

    /// Look for a cookies.txt in common locations when none is configured.
    fn discover_cookies(&self) -> Option<PathBuf> {
        if let Some(path) = &self.cookies_file {
            return path.exists().then(|| path.clone());
        }
        let candidates = [
            std::env::current_dir().ok()?.join("cookies.txt"),
            dirs::home_dir()?.join(".yt-dlp").join("cookies.txt"),
        ];
        candidates.into_iter().find(|p| p.exists())
    }

    /// Classify a yt-dlp stderr dump into the chain's failure taxonomy.
    fn classify(stderr: &str) -> FetchError {
        let lower = stderr.to_lowercase();

        if lower.contains("sign in to confirm") || lower.contains("not a bot") {
            return FetchError::unsupported(format!(
                "bot detection blocked all client variants: {}",
                last_line(stderr)
            ));
        }
        if lower.contains("video unavailable")
            || lower.contains("private video")
            || lower.contains("age-restricted")
            || lower.contains("age restricted")
        {
            return FetchError::permanent(last_line(stderr));
        }
        if lower.contains("429")
            || lower.contains("rate")
            || lower.contains("timed out")
            || lower.contains("http error 5")
            || lower.contains("connection")
        {
            return FetchError::transient(last_line(stderr));
        }

        FetchError::permanent(last_line(stderr))
    }
}

fn last_line(text: &str) -> String {
    text.lines()
        .rev()
        .find(|l| !l.trim().is_empty())
        .unwrap_or("yt-dlp failed with no diagnostic output")
        .to_string()
}

#[async_trait]
impl VideoFetcher for YtDlpFetcher {
    fn method(&self) -> SourceMethod {
        SourceMethod::YtDlp
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    async fn fetch(&self, video: &VideoRef, dest_dir: &Path) -> FetchResult {
        let template = dest_dir.join("%(id)s.%(ext)s");

        let mut cmd = Command::new("yt-dlp");
        cmd.arg("--format")
            .arg("bestvideo[ext=mp4]+bestaudio[ext=m4a]/bestvideo+bestaudio/best")
            .arg("--merge-output-format")
            .arg("mp4")
            .arg("--output")
            .arg(template.to_str().unwrap_or_default())
            .arg("--no-playlist")
            .arg("--quiet")
            .arg("--no-warnings")
            .arg("--retries")
            .arg("10")
            .arg("--fragment-retries")
            .arg("10")
            // Mobile clients see fewer JS challenges than the web player
            .arg("--extractor-args")
            .arg("youtube:player_client=ios,android");

        if let Some(cookies) = self.discover_cookies() {
            debug!("Using cookie file: {}", cookies.display());
            cmd.arg("--cookies").arg(cookies);
        }
        if let Some(proxy) = &self.proxy {
            cmd.arg("--proxy").arg(proxy);
        }

        cmd.arg(&video.url);

        info!("Downloading {} via yt-dlp", video.id);

        // The chain enforces this backend's timeout by dropping the fetch
        // future, so the child must die with it.
        let result = cmd
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await;

        let output = match result {
            Ok(o) => o,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(FetchError::unsupported("yt-dlp is not installed"));
            }
            Err(e) => {
                return Err(FetchError::transient(format!(
                    "yt-dlp execution failed: {}",
                    e
                )));
            }
        };

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(Self::classify(&stderr));
        }

        // yt-dlp merges into mp4, but may fall back to mkv/webm
        for ext in ["mp4", "mkv", "webm"] {
            let candidate = dest_dir.join(format!("{}.{}", video.id, ext));
            if candidate.exists() {
                return Ok(candidate);
            }
        }

        Err(FetchError::permanent(
            "yt-dlp reported success but no output file was found",
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::acquire::FetchErrorKind;

    #[test]
    fn test_classify_bot_detection_as_unsupported() {
        let err = YtDlpFetcher::classify(
            "ERROR: [youtube] abc: Sign in to confirm you're not a bot.",
        );
        assert_eq!(err.kind, FetchErrorKind::Unsupported);
    }

    #[test]
    fn test_classify_unavailable_as_permanent() {
        let err = YtDlpFetcher::classify("ERROR: [youtube] abc: Video unavailable");
        assert_eq!(err.kind, FetchErrorKind::Permanent);

        let err = YtDlpFetcher::classify("ERROR: Private video. Sign in if you have access");
        assert_eq!(err.kind, FetchErrorKind::Permanent);
    }

    #[test]
    fn test_classify_rate_limit_as_transient() {
        let err = YtDlpFetcher::classify("ERROR: HTTP Error 429: Too Many Requests");
        assert_eq!(err.kind, FetchErrorKind::Transient);

        let err = YtDlpFetcher::classify("ERROR: HTTP Error 503: Service Unavailable");
        assert_eq!(err.kind, FetchErrorKind::Transient);
    }

    #[test]
    fn test_classify_keeps_last_diagnostic_line() {
        let err = YtDlpFetcher::classify("WARNING: something\nERROR: Video unavailable\n");
        assert_eq!(err.message, "ERROR: Video unavailable");
    }
}
