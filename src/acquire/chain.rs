//! The acquisition chain: ordered backends tried until one succeeds.

use super::{
    AcquisitionResult, CobaltFetcher, FetchError, FetchErrorKind, GuiFetcher, InvidiousFetcher,
    PipedFetcher, SourceMethod, VideoFetcher, YtDlpFetcher,
};
use crate::config::AcquireSettings;
use crate::error::{Result, VokalError};
use crate::source::VideoRef;
use std::path::Path;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

/// Outcome of one backend invocation.
#[derive(Debug, Clone)]
pub enum AttemptOutcome {
    Succeeded,
    Failed(FetchError),
}

/// One entry in the chain's attempt log.
#[derive(Debug, Clone)]
pub struct Attempt {
    pub method: SourceMethod,
    pub outcome: AttemptOutcome,
}

impl std::fmt::Display for Attempt {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.outcome {
            AttemptOutcome::Succeeded => write!(f, "{}: ok", self.method),
            AttemptOutcome::Failed(e) => write!(f, "{}: {}", self.method, e),
        }
    }
}

/// Every backend was tried and none produced a video file.
///
/// Carries the ordered per-backend failure log so operators can see which
/// methods were tried and why each one failed.
#[derive(Debug)]
pub struct AllMethodsExhausted {
    pub video_id: String,
    pub attempts: Vec<Attempt>,
}

impl std::fmt::Display for AllMethodsExhausted {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(
            f,
            "All download methods exhausted for {} ({} attempts):",
            self.video_id,
            self.attempts.len()
        )?;
        for (i, attempt) in self.attempts.iter().enumerate() {
            writeln!(f, "  {}. {}", i + 1, attempt)?;
        }
        Ok(())
    }
}

impl std::error::Error for AllMethodsExhausted {}

/// A successful acquisition together with the full attempt log.
#[derive(Debug)]
pub struct ChainReport {
    pub result: AcquisitionResult,
    pub attempts: Vec<Attempt>,
}

/// Tries backends in a fixed priority order, applying per-backend timeout
/// and transient-retry policy, stopping at the first success.
pub struct AcquisitionChain {
    backends: Vec<Box<dyn VideoFetcher>>,
    transient_retries: u32,
    retry_backoff: Duration,
    cancel: CancellationToken,
}

impl AcquisitionChain {
    /// Build the standard five-backend chain from settings.
    pub fn from_settings(settings: &AcquireSettings, cancel: CancellationToken) -> Self {
        let http_timeout = Duration::from_secs(settings.http_timeout_secs);
        let expand = |dirs: &[String]| -> Vec<std::path::PathBuf> {
            dirs.iter()
                .map(|d| crate::config::Settings::expand_path(d))
                .collect()
        };

        let backends: Vec<Box<dyn VideoFetcher>> = vec![
            Box::new(YtDlpFetcher::new(
                Duration::from_secs(settings.ytdlp_timeout_secs),
                settings
                    .cookies_file
                    .as_deref()
                    .map(crate::config::Settings::expand_path),
                settings.proxy.clone(),
            )),
            Box::new(InvidiousFetcher::new(
                settings.invidious_instances.clone(),
                http_timeout,
                settings.min_file_bytes,
            )),
            Box::new(PipedFetcher::new(
                settings.piped_instances.clone(),
                http_timeout,
                settings.min_file_bytes,
            )),
            Box::new(CobaltFetcher::new(
                settings.cobalt_instances.clone(),
                http_timeout,
                settings.min_file_bytes,
            )),
            Box::new(GuiFetcher::new(
                settings
                    .gui_app_path
                    .as_deref()
                    .map(crate::config::Settings::expand_path),
                expand(&settings.gui_watch_dirs),
                Duration::from_secs(settings.gui_timeout_secs),
                settings.min_file_bytes,
            )),
        ];

        Self {
            backends,
            transient_retries: settings.transient_retries,
            retry_backoff: Duration::from_secs(settings.retry_backoff_secs),
            cancel,
        }
    }

    /// Build a chain over arbitrary backends (used by tests).
    pub fn with_backends(
        backends: Vec<Box<dyn VideoFetcher>>,
        transient_retries: u32,
        retry_backoff: Duration,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            backends,
            transient_retries,
            retry_backoff,
            cancel,
        }
    }

    /// Acquire a video, trying each backend in priority order.
    ///
    /// The first success short-circuits the chain. Transient failures are
    /// retried once per backend with a short backoff; permanent and
    /// unsupported failures advance to the next backend immediately.
    #[instrument(skip(self, dest_dir), fields(video_id = %video.id))]
    pub async fn acquire(&self, video: &VideoRef, dest_dir: &Path) -> Result<ChainReport> {
        let mut attempts: Vec<Attempt> = Vec::new();

        for backend in &self.backends {
            let method = backend.method();
            let mut tries = 0u32;

            loop {
                if self.cancel.is_cancelled() {
                    return Err(VokalError::Cancelled);
                }

                tries += 1;
                let error = match tokio::time::timeout(
                    backend.timeout(),
                    backend.fetch(video, dest_dir),
                )
                .await
                {
                    Ok(Ok(path)) => {
                        let size_bytes = std::fs::metadata(&path).map(|m| m.len()).unwrap_or(0);
                        info!("Acquired {} via {} ({} bytes)", video.id, method, size_bytes);
                        attempts.push(Attempt {
                            method,
                            outcome: AttemptOutcome::Succeeded,
                        });
                        return Ok(ChainReport {
                            result: AcquisitionResult {
                                video_path: path,
                                source_method: method,
                                size_bytes,
                            },
                            attempts,
                        });
                    }
                    Ok(Err(e)) => e,
                    Err(_) => FetchError::transient(format!(
                        "timed out after {}s",
                        backend.timeout().as_secs()
                    )),
                };

                warn!("{} attempt {} failed: {}", method, tries, error);
                let kind = error.kind;
                attempts.push(Attempt {
                    method,
                    outcome: AttemptOutcome::Failed(error),
                });

                // No retry budget for a backend already known to be blocked
                if kind == FetchErrorKind::Transient && tries <= self.transient_retries {
                    tokio::time::sleep(self.retry_backoff).await;
                    continue;
                }
                break;
            }
        }

        Err(AllMethodsExhausted {
            video_id: video.id.clone(),
            attempts,
        }
        .into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::acquire::FetchResult;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    /// Test backend that replays a scripted sequence of outcomes.
    struct ScriptedFetcher {
        method: SourceMethod,
        script: Mutex<Vec<std::result::Result<(), FetchError>>>,
        calls: Arc<AtomicUsize>,
        delay: Option<Duration>,
        timeout: Duration,
    }

    impl ScriptedFetcher {
        fn new(
            method: SourceMethod,
            script: Vec<std::result::Result<(), FetchError>>,
        ) -> (Box<Self>, Arc<AtomicUsize>) {
            let calls = Arc::new(AtomicUsize::new(0));
            (
                Box::new(Self {
                    method,
                    script: Mutex::new(script),
                    calls: calls.clone(),
                    delay: None,
                    timeout: Duration::from_secs(5),
                }),
                calls,
            )
        }

        fn slow(method: SourceMethod, delay: Duration, timeout: Duration) -> Box<Self> {
            Box::new(Self {
                method,
                script: Mutex::new(vec![]),
                calls: Arc::new(AtomicUsize::new(0)),
                delay: Some(delay),
                timeout,
            })
        }
    }

    #[async_trait]
    impl VideoFetcher for ScriptedFetcher {
        fn method(&self) -> SourceMethod {
            self.method
        }

        fn timeout(&self) -> Duration {
            self.timeout
        }

        async fn fetch(&self, video: &VideoRef, dest_dir: &Path) -> FetchResult {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            let next = self.script.lock().unwrap().remove(0);
            match next {
                Ok(()) => {
                    let path = dest_dir.join(format!("{}.mp4", video.id));
                    std::fs::write(&path, b"video bytes").unwrap();
                    Ok(path)
                }
                Err(e) => Err(e),
            }
        }
    }

    fn chain(backends: Vec<Box<dyn VideoFetcher>>) -> AcquisitionChain {
        AcquisitionChain::with_backends(
            backends,
            1,
            Duration::from_millis(1),
            CancellationToken::new(),
        )
    }

    #[tokio::test]
    async fn test_first_success_short_circuits() {
        let (b1, c1) = ScriptedFetcher::new(
            SourceMethod::YtDlp,
            vec![Err(FetchError::permanent("unavailable"))],
        );
        let (b2, c2) = ScriptedFetcher::new(SourceMethod::Invidious, vec![Ok(())]);
        let (b3, c3) = ScriptedFetcher::new(SourceMethod::Piped, vec![Ok(())]);

        let dir = tempfile::tempdir().unwrap();
        let video = VideoRef::youtube("dQw4w9WgXcQ");

        let report = chain(vec![b1, b2, b3])
            .acquire(&video, dir.path())
            .await
            .unwrap();

        assert_eq!(report.result.source_method, SourceMethod::Invidious);
        assert!(report.result.size_bytes > 0);
        assert_eq!(c1.load(Ordering::SeqCst), 1);
        assert_eq!(c2.load(Ordering::SeqCst), 1);
        // Later backends are never invoked after a success
        assert_eq!(c3.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_permanent_skips_retry_transient_retries_once() {
        // ytdlp: permanent (1 attempt), invidious: transient x2 (retries
        // exhausted), piped: success. Attempt log has 4 entries.
        let (b1, c1) = ScriptedFetcher::new(
            SourceMethod::YtDlp,
            vec![Err(FetchError::permanent("video unavailable"))],
        );
        let (b2, c2) = ScriptedFetcher::new(
            SourceMethod::Invidious,
            vec![
                Err(FetchError::transient("HTTP 503")),
                Err(FetchError::transient("HTTP 503")),
            ],
        );
        let (b3, _) = ScriptedFetcher::new(SourceMethod::Piped, vec![Ok(())]);

        let dir = tempfile::tempdir().unwrap();
        let video = VideoRef::youtube("dQw4w9WgXcQ");

        let report = chain(vec![b1, b2, b3])
            .acquire(&video, dir.path())
            .await
            .unwrap();

        assert_eq!(report.result.source_method, SourceMethod::Piped);
        assert_eq!(c1.load(Ordering::SeqCst), 1);
        assert_eq!(c2.load(Ordering::SeqCst), 2);
        assert_eq!(report.attempts.len(), 4);
        assert!(matches!(
            report.attempts[3].outcome,
            AttemptOutcome::Succeeded
        ));
    }

    #[tokio::test]
    async fn test_unsupported_advances_immediately() {
        let (b1, c1) = ScriptedFetcher::new(
            SourceMethod::Gui,
            vec![Err(FetchError::unsupported("not configured"))],
        );
        let (b2, _) = ScriptedFetcher::new(SourceMethod::YtDlp, vec![Ok(())]);

        let dir = tempfile::tempdir().unwrap();
        let video = VideoRef::youtube("dQw4w9WgXcQ");

        let report = chain(vec![b1, b2]).acquire(&video, dir.path()).await.unwrap();
        // Unsupported is never retried
        assert_eq!(c1.load(Ordering::SeqCst), 1);
        assert_eq!(report.result.source_method, SourceMethod::YtDlp);
    }

    #[tokio::test]
    async fn test_all_exhausted_carries_ordered_attempts() {
        let (b1, _) = ScriptedFetcher::new(
            SourceMethod::YtDlp,
            vec![Err(FetchError::permanent("unavailable"))],
        );
        let (b2, _) = ScriptedFetcher::new(
            SourceMethod::Invidious,
            vec![Err(FetchError::unsupported("down"))],
        );

        let dir = tempfile::tempdir().unwrap();
        let video = VideoRef::youtube("dQw4w9WgXcQ");

        let err = chain(vec![b1, b2])
            .acquire(&video, dir.path())
            .await
            .unwrap_err();

        match err {
            VokalError::Acquisition(exhausted) => {
                assert_eq!(exhausted.video_id, "dQw4w9WgXcQ");
                assert_eq!(exhausted.attempts.len(), 2);
                assert_eq!(exhausted.attempts[0].method, SourceMethod::YtDlp);
                assert_eq!(exhausted.attempts[1].method, SourceMethod::Invidious);
            }
            other => panic!("expected AllMethodsExhausted, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_backend_timeout_counts_as_transient() {
        let slow = ScriptedFetcher::slow(
            SourceMethod::YtDlp,
            Duration::from_secs(30),
            Duration::from_millis(20),
        );
        let (ok, _) = ScriptedFetcher::new(SourceMethod::Invidious, vec![Ok(())]);

        let dir = tempfile::tempdir().unwrap();
        let video = VideoRef::youtube("dQw4w9WgXcQ");

        // Timeout is transient: one retry on the slow backend, then advance
        let chain = AcquisitionChain::with_backends(
            vec![slow, ok],
            0,
            Duration::from_millis(1),
            CancellationToken::new(),
        );
        let report = chain.acquire(&video, dir.path()).await.unwrap();
        assert_eq!(report.result.source_method, SourceMethod::Invidious);
        assert_eq!(report.attempts.len(), 2);
    }

    #[tokio::test]
    async fn test_cancellation_checked_between_attempts() {
        let (b1, c1) = ScriptedFetcher::new(SourceMethod::YtDlp, vec![Ok(())]);
        let token = CancellationToken::new();
        token.cancel();

        let chain =
            AcquisitionChain::with_backends(vec![b1], 1, Duration::from_millis(1), token);

        let dir = tempfile::tempdir().unwrap();
        let video = VideoRef::youtube("dQw4w9WgXcQ");
        let err = chain.acquire(&video, dir.path()).await.unwrap_err();
        assert!(matches!(err, VokalError::Cancelled));
        assert_eq!(c1.load(Ordering::SeqCst), 0);
    }
}
