//! Last-resort backend: driving an external GUI downloader application.
//!
//! The slowest and most fragile method. The configured desktop application
//! is launched with the video URL; the backend then watches the app's
//! download directories until a new file appears and its size is stable
//! across two samples 2 seconds apart, then moves it into the destination.

use super::{FetchError, FetchResult, SourceMethod, VideoFetcher};
use crate::source::VideoRef;
use async_trait::async_trait;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, info, warn};

/// Interval between scans of the watch directories.
const POLL_INTERVAL: Duration = Duration::from_secs(3);
/// Window between the two size samples that declare a file complete.
const STABLE_WINDOW: Duration = Duration::from_secs(2);

pub struct GuiFetcher {
    app_path: Option<PathBuf>,
    watch_dirs: Vec<PathBuf>,
    timeout: Duration,
    min_file_bytes: u64,
}

impl GuiFetcher {
    pub fn new(
        app_path: Option<PathBuf>,
        watch_dirs: Vec<PathBuf>,
        timeout: Duration,
        min_file_bytes: u64,
    ) -> Self {
        Self {
            app_path,
            watch_dirs,
            timeout,
            min_file_bytes,
        }
    }

    /// Snapshot of mp4 files currently present in the watch directories.
    fn snapshot(&self) -> HashSet<PathBuf> {
        let mut seen = HashSet::new();
        for dir in &self.watch_dirs {
            let Ok(entries) = std::fs::read_dir(dir) else {
                continue;
            };
            for entry in entries.flatten() {
                let path = entry.path();
                if path.extension().and_then(|e| e.to_str()) == Some("mp4") {
                    seen.insert(path);
                }
            }
        }
        seen
    }

    /// Check whether a candidate file has finished downloading: its size
    /// must be unchanged across two samples and above the minimum.
    async fn is_stable(&self, path: &Path) -> bool {
        let Ok(first) = std::fs::metadata(path).map(|m| m.len()) else {
            return false;
        };
        tokio::time::sleep(STABLE_WINDOW).await;
        let Ok(second) = std::fs::metadata(path).map(|m| m.len()) else {
            return false;
        };
        first == second && second >= self.min_file_bytes
    }

    /// Move a completed download into the destination directory.
    async fn collect(&self, found: &Path, dest_dir: &Path, video_id: &str) -> FetchResult {
        let dest = dest_dir.join(format!("{}.mp4", video_id));
        if tokio::fs::rename(found, &dest).await.is_err() {
            // Watch dir may be on another filesystem
            tokio::fs::copy(found, &dest)
                .await
                .map_err(|e| FetchError::permanent(format!("cannot move download: {}", e)))?;
            let _ = tokio::fs::remove_file(found).await;
        }
        Ok(dest)
    }
}

#[async_trait]
impl VideoFetcher for GuiFetcher {
    fn method(&self) -> SourceMethod {
        SourceMethod::Gui
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    async fn fetch(&self, video: &VideoRef, dest_dir: &Path) -> FetchResult {
        let Some(app_path) = &self.app_path else {
            return Err(FetchError::unsupported(
                "no GUI downloader application configured",
            ));
        };
        if !app_path.exists() {
            return Err(FetchError::unsupported(format!(
                "GUI downloader not found at {}",
                app_path.display()
            )));
        }
        if self.watch_dirs.is_empty() {
            return Err(FetchError::unsupported("no watch directories configured"));
        }

        let existing = self.snapshot();

        info!("Launching {} for {}", app_path.display(), video.id);
        let mut child = Command::new(app_path)
            .arg(&video.url)
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| FetchError::unsupported(format!("cannot launch downloader: {}", e)))?;

        let deadline = tokio::time::Instant::now() + self.timeout;

        loop {
            if tokio::time::Instant::now() >= deadline {
                warn!("GUI download timed out after {:?}", self.timeout);
                let _ = child.kill().await;
                return Err(FetchError::transient(format!(
                    "no completed download within {}s",
                    self.timeout.as_secs()
                )));
            }

            // An early exit with a failure status is the app reporting an
            // explicit error state
            if let Ok(Some(status)) = child.try_wait() {
                if !status.success() {
                    return Err(FetchError::permanent(format!(
                        "downloader exited with {}",
                        status
                    )));
                }
            }

            let current = self.snapshot();
            for candidate in current.difference(&existing) {
                debug!("New file appeared: {}", candidate.display());
                if self.is_stable(candidate).await {
                    info!("Download complete: {}", candidate.display());
                    let _ = child.kill().await;
                    return self.collect(candidate, dest_dir, &video.id).await;
                }
            }

            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::acquire::FetchErrorKind;

    #[tokio::test]
    async fn test_unconfigured_app_is_unsupported() {
        let fetcher = GuiFetcher::new(
            None,
            vec![PathBuf::from("/tmp")],
            Duration::from_secs(1),
            1,
        );
        let video = VideoRef::youtube("dQw4w9WgXcQ");
        let dir = tempfile::tempdir().unwrap();
        let err = fetcher.fetch(&video, dir.path()).await.unwrap_err();
        assert_eq!(err.kind, FetchErrorKind::Unsupported);
    }

    #[tokio::test]
    async fn test_missing_app_is_unsupported() {
        let fetcher = GuiFetcher::new(
            Some(PathBuf::from("/nonexistent/downloader")),
            vec![PathBuf::from("/tmp")],
            Duration::from_secs(1),
            1,
        );
        let video = VideoRef::youtube("dQw4w9WgXcQ");
        let dir = tempfile::tempdir().unwrap();
        let err = fetcher.fetch(&video, dir.path()).await.unwrap_err();
        assert_eq!(err.kind, FetchErrorKind::Unsupported);
    }

    #[tokio::test]
    async fn test_stability_check_rejects_growing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("grow.mp4");
        std::fs::write(&path, vec![0u8; 10]).unwrap();

        let fetcher = GuiFetcher::new(
            None,
            vec![dir.path().to_path_buf()],
            Duration::from_secs(5),
            1,
        );

        let grower = {
            let path = path.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(500)).await;
                std::fs::write(&path, vec![0u8; 20]).unwrap();
            })
        };

        assert!(!fetcher.is_stable(&path).await);
        grower.await.unwrap();
    }

    #[tokio::test]
    async fn test_stability_check_accepts_settled_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("done.mp4");
        std::fs::write(&path, vec![0u8; 64]).unwrap();

        let fetcher = GuiFetcher::new(
            None,
            vec![dir.path().to_path_buf()],
            Duration::from_secs(5),
            32,
        );
        assert!(fetcher.is_stable(&path).await);
    }
}
