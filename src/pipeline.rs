//! The processing pipeline: extract audio, isolate vocals, remux.
//!
//! Each run works inside its own scratch directory so concurrent runs never
//! collide and a failed run can be cleaned up wholesale. The pipeline owns
//! the stage progression; the media and isolation work happens behind trait
//! seams.

use crate::config::Settings;
use crate::error::{Result, VokalError};
use crate::isolate::{IsolateError, VocalIsolator};
use crate::media::MediaTool;
use futures::{StreamExt, TryStreamExt};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};
use uuid::Uuid;

/// Where a run is in its stage progression.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Extracting,
    Isolating,
    Remuxing,
    Done,
    Failed,
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Stage::Extracting => write!(f, "extracting"),
            Stage::Isolating => write!(f, "isolating"),
            Stage::Remuxing => write!(f, "remuxing"),
            Stage::Done => write!(f, "done"),
            Stage::Failed => write!(f, "failed"),
        }
    }
}

/// Pipeline behavior knobs, resolved from settings at startup.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub temp_dir: PathBuf,
    pub output_dir: PathBuf,
    pub keep_intermediates: bool,
    pub chunked: bool,
    pub chunk_secs: u32,
    pub max_parallel_chunks: usize,
}

impl PipelineConfig {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            temp_dir: settings.temp_dir(),
            output_dir: settings.output_dir(),
            keep_intermediates: settings.general.keep_intermediates,
            chunked: settings.isolation.chunked,
            chunk_secs: settings.isolation.chunk_secs,
            max_parallel_chunks: settings.isolation.max_parallel_chunks.max(1),
        }
    }
}

pub struct Pipeline {
    media: Arc<dyn MediaTool>,
    isolator: Arc<dyn VocalIsolator>,
    config: PipelineConfig,
    cancel: CancellationToken,
}

impl Pipeline {
    pub fn new(
        media: Arc<dyn MediaTool>,
        isolator: Arc<dyn VocalIsolator>,
        config: PipelineConfig,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            media,
            isolator,
            config,
            cancel,
        }
    }

    /// Run the full pipeline on an acquired video. Returns the path of the
    /// finished output file.
    ///
    /// The run-scoped scratch directory is removed on both success and
    /// failure unless intermediate retention is enabled.
    #[instrument(skip(self, video_path), fields(video_id = %video_id))]
    pub async fn run(&self, video_path: &Path, video_id: &str) -> Result<PathBuf> {
        let run_dir = self.config.temp_dir.join(format!("run-{}", Uuid::new_v4()));
        std::fs::create_dir_all(&run_dir)?;

        let result = self.run_stages(video_path, video_id, &run_dir).await;

        match &result {
            Ok(output) => info!("Pipeline done: {}", output.display()),
            Err(e) => warn!("Pipeline failed: {}", e),
        }

        if self.config.keep_intermediates {
            info!("Keeping intermediates in {}", run_dir.display());
        } else if let Err(e) = std::fs::remove_dir_all(&run_dir) {
            warn!("Could not remove {}: {}", run_dir.display(), e);
        }

        result
    }

    async fn run_stages(&self, video_path: &Path, video_id: &str, run_dir: &Path) -> Result<PathBuf> {
        self.checkpoint()?;
        info!("Stage: {}", Stage::Extracting);
        let wav = run_dir.join(format!("{}.wav", video_id));
        self.media.extract_audio(video_path, &wav).await?;

        self.checkpoint()?;
        info!("Stage: {}", Stage::Isolating);
        let vocals = if self.config.chunked {
            self.isolate_chunked(&wav, run_dir).await?
        } else {
            self.isolate_with_retry(&wav, run_dir).await?
        };

        self.checkpoint()?;
        info!("Stage: {}", Stage::Remuxing);
        let staged = run_dir.join(format!("{}_vocals.mp4", video_id));
        self.media.remux(video_path, &vocals, &staged).await?;
        self.verify_output(&staged).await?;

        std::fs::create_dir_all(&self.config.output_dir)?;
        let output = self.config.output_dir.join(format!("{}_vocals.mp4", video_id));
        move_file(&staged, &output)?;

        info!("Stage: {}", Stage::Done);
        Ok(output)
    }

    /// Isolate the vocals stem, retrying once with reduced settings if the
    /// model ran out of resources.
    async fn isolate_with_retry(&self, wav: &Path, work_dir: &Path) -> Result<PathBuf> {
        match self.isolator.isolate(wav, work_dir, false).await {
            Ok(vocals) => Ok(vocals),
            Err(IsolateError::ResourceExhausted(msg)) => {
                warn!("Isolation hit resource limits ({}), retrying reduced", msg);
                self.checkpoint()?;
                self.isolator
                    .isolate(wav, work_dir, true)
                    .await
                    .map_err(map_isolate_error)
            }
            Err(e) => Err(map_isolate_error(e)),
        }
    }

    /// Chunked isolation for long inputs: split the waveform, isolate a
    /// bounded number of chunks concurrently, concatenate stems in order.
    async fn isolate_chunked(&self, wav: &Path, run_dir: &Path) -> Result<PathBuf> {
        let chunks = self
            .media
            .split_wav(wav, &run_dir.join("chunks"), self.config.chunk_secs)
            .await?;

        if chunks.len() == 1 {
            return self.isolate_with_retry(wav, run_dir).await;
        }

        info!("Isolating {} chunks", chunks.len());
        let stems: Vec<PathBuf> = futures::stream::iter(chunks.into_iter())
            .map(|chunk| async move { self.isolate_with_retry(&chunk, run_dir).await })
            .buffered(self.config.max_parallel_chunks)
            .try_collect()
            .await?;

        let joined = run_dir.join("vocals_joined.wav");
        self.media.concat_wav(&stems, &joined).await?;
        Ok(joined)
    }

    /// A finished output must be a playable file with both streams and a
    /// non-zero duration, otherwise the remux silently produced garbage.
    async fn verify_output(&self, output: &Path) -> Result<()> {
        let probe = self.media.probe(output).await?;
        if probe.duration_secs <= 0.0 || !probe.has_video || !probe.has_audio {
            return Err(VokalError::Remux {
                exit_code: None,
                stderr: format!(
                    "output failed verification (duration {:.1}s, video: {}, audio: {})",
                    probe.duration_secs, probe.has_video, probe.has_audio
                ),
            });
        }
        Ok(())
    }

    fn checkpoint(&self) -> Result<()> {
        if self.cancel.is_cancelled() {
            return Err(VokalError::Cancelled);
        }
        Ok(())
    }
}

fn map_isolate_error(e: IsolateError) -> VokalError {
    match e {
        IsolateError::ToolNotFound => VokalError::ToolNotFound("demucs".into()),
        IsolateError::ResourceExhausted(msg) => {
            VokalError::Isolation(format!("resource limits persisted after reduced retry: {msg}"))
        }
        IsolateError::Failed(msg) => VokalError::Isolation(msg),
    }
}

/// Rename, falling back to copy across filesystems.
fn move_file(from: &Path, to: &Path) -> Result<()> {
    if std::fs::rename(from, to).is_err() {
        std::fs::copy(from, to)?;
        let _ = std::fs::remove_file(from);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::isolate::IsolateResult;
    use crate::media::MediaProbe;
    use async_trait::async_trait;
    use std::sync::Mutex;

    struct FakeMedia {
        fail_extract: bool,
    }

    #[async_trait]
    impl MediaTool for FakeMedia {
        async fn extract_audio(&self, _video: &Path, wav_out: &Path) -> Result<()> {
            if self.fail_extract {
                return Err(VokalError::Extraction {
                    exit_code: Some(1),
                    stderr: "no audio stream".into(),
                });
            }
            std::fs::write(wav_out, b"wav").unwrap();
            Ok(())
        }

        async fn remux(&self, _video: &Path, _audio: &Path, out: &Path) -> Result<()> {
            std::fs::write(out, b"mp4").unwrap();
            Ok(())
        }

        async fn probe(&self, _path: &Path) -> Result<MediaProbe> {
            Ok(MediaProbe {
                duration_secs: 120.0,
                has_video: true,
                has_audio: true,
            })
        }

        async fn split_wav(
            &self,
            wav: &Path,
            _out_dir: &Path,
            _chunk_secs: u32,
        ) -> Result<Vec<PathBuf>> {
            Ok(vec![wav.to_path_buf()])
        }

        async fn concat_wav(&self, _parts: &[PathBuf], out: &Path) -> Result<()> {
            std::fs::write(out, b"wav").unwrap();
            Ok(())
        }
    }

    /// Isolator that replays scripted outcomes and records the reduced flag
    /// of every call.
    struct FakeIsolator {
        script: Mutex<Vec<std::result::Result<(), IsolateError>>>,
        reduced_calls: Mutex<Vec<bool>>,
    }

    impl FakeIsolator {
        fn new(script: Vec<std::result::Result<(), IsolateError>>) -> Self {
            Self {
                script: Mutex::new(script),
                reduced_calls: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl VocalIsolator for FakeIsolator {
        async fn isolate(&self, _wav: &Path, work_dir: &Path, reduced: bool) -> IsolateResult {
            self.reduced_calls.lock().unwrap().push(reduced);
            match self.script.lock().unwrap().remove(0) {
                Ok(()) => {
                    let vocals = work_dir.join("vocals.wav");
                    std::fs::write(&vocals, b"vocals").unwrap();
                    Ok(vocals)
                }
                Err(e) => Err(e),
            }
        }
    }

    /// Media fake that always splits into three chunks and records the
    /// order stems were concatenated in.
    struct ChunkingMedia {
        concat_order: Mutex<Vec<PathBuf>>,
    }

    #[async_trait]
    impl MediaTool for ChunkingMedia {
        async fn extract_audio(&self, _video: &Path, wav_out: &Path) -> Result<()> {
            std::fs::write(wav_out, b"wav").unwrap();
            Ok(())
        }

        async fn remux(&self, _video: &Path, _audio: &Path, out: &Path) -> Result<()> {
            std::fs::write(out, b"mp4").unwrap();
            Ok(())
        }

        async fn probe(&self, _path: &Path) -> Result<MediaProbe> {
            Ok(MediaProbe {
                duration_secs: 900.0,
                has_video: true,
                has_audio: true,
            })
        }

        async fn split_wav(
            &self,
            _wav: &Path,
            out_dir: &Path,
            _chunk_secs: u32,
        ) -> Result<Vec<PathBuf>> {
            std::fs::create_dir_all(out_dir).unwrap();
            let mut parts = Vec::new();
            for i in 0..3 {
                let part = out_dir.join(format!("chunk_{:04}.wav", i));
                std::fs::write(&part, b"chunk").unwrap();
                parts.push(part);
            }
            Ok(parts)
        }

        async fn concat_wav(&self, parts: &[PathBuf], out: &Path) -> Result<()> {
            self.concat_order.lock().unwrap().extend(parts.iter().cloned());
            std::fs::write(out, b"joined").unwrap();
            Ok(())
        }
    }

    /// Isolator that names each stem after its input chunk.
    struct EchoIsolator;

    #[async_trait]
    impl VocalIsolator for EchoIsolator {
        async fn isolate(&self, wav: &Path, work_dir: &Path, _reduced: bool) -> IsolateResult {
            let stem = wav.file_stem().and_then(|s| s.to_str()).unwrap();
            let out = work_dir.join(format!("{}_vocals.wav", stem));
            std::fs::write(&out, b"vocals").unwrap();
            Ok(out)
        }
    }

    fn pipeline(
        media: FakeMedia,
        isolator: FakeIsolator,
        temp: &Path,
        out: &Path,
        keep: bool,
    ) -> Pipeline {
        Pipeline::new(
            Arc::new(media),
            Arc::new(isolator),
            PipelineConfig {
                temp_dir: temp.to_path_buf(),
                output_dir: out.to_path_buf(),
                keep_intermediates: keep,
                chunked: false,
                chunk_secs: 300,
                max_parallel_chunks: 2,
            },
            CancellationToken::new(),
        )
    }

    fn run_dirs(temp: &Path) -> Vec<PathBuf> {
        std::fs::read_dir(temp)
            .map(|entries| entries.flatten().map(|e| e.path()).collect())
            .unwrap_or_default()
    }

    #[tokio::test]
    async fn test_successful_run_produces_output_and_cleans_up() {
        let temp = tempfile::tempdir().unwrap();
        let out = tempfile::tempdir().unwrap();
        let video = temp.path().join("input.mp4");
        std::fs::write(&video, b"video").unwrap();

        let p = pipeline(
            FakeMedia { fail_extract: false },
            FakeIsolator::new(vec![Ok(())]),
            temp.path(),
            out.path(),
            false,
        );

        let output = p.run(&video, "abc123").await.unwrap();
        assert_eq!(output, out.path().join("abc123_vocals.mp4"));
        assert!(output.exists());
        // Scratch dir removed; only the input file remains
        assert_eq!(run_dirs(temp.path()), vec![video]);
    }

    #[tokio::test]
    async fn test_failed_run_leaves_no_artifacts() {
        let temp = tempfile::tempdir().unwrap();
        let out = tempfile::tempdir().unwrap();
        let video = temp.path().join("input.mp4");
        std::fs::write(&video, b"video").unwrap();

        let p = pipeline(
            FakeMedia { fail_extract: true },
            FakeIsolator::new(vec![]),
            temp.path(),
            out.path(),
            false,
        );

        let err = p.run(&video, "abc123").await.unwrap_err();
        assert!(matches!(err, VokalError::Extraction { .. }));
        assert_eq!(run_dirs(temp.path()), vec![video]);
        assert!(run_dirs(out.path()).is_empty());
    }

    #[tokio::test]
    async fn test_retention_keeps_scratch_dir_on_failure() {
        let temp = tempfile::tempdir().unwrap();
        let out = tempfile::tempdir().unwrap();
        let video = temp.path().join("input.mp4");
        std::fs::write(&video, b"video").unwrap();

        let p = pipeline(
            FakeMedia { fail_extract: true },
            FakeIsolator::new(vec![]),
            temp.path(),
            out.path(),
            true,
        );

        p.run(&video, "abc123").await.unwrap_err();
        // Input plus the retained run directory
        assert_eq!(run_dirs(temp.path()).len(), 2);
    }

    #[tokio::test]
    async fn test_resource_exhaustion_retries_once_reduced_then_done() {
        let temp = tempfile::tempdir().unwrap();
        let out = tempfile::tempdir().unwrap();
        let video = temp.path().join("input.mp4");
        std::fs::write(&video, b"video").unwrap();

        let isolator = Arc::new(FakeIsolator::new(vec![
            Err(IsolateError::ResourceExhausted("CUDA out of memory".into())),
            Ok(()),
        ]));
        let p = Pipeline::new(
            Arc::new(FakeMedia { fail_extract: false }),
            isolator.clone(),
            PipelineConfig {
                temp_dir: temp.path().to_path_buf(),
                output_dir: out.path().to_path_buf(),
                keep_intermediates: false,
                chunked: false,
                chunk_secs: 300,
                max_parallel_chunks: 2,
            },
            CancellationToken::new(),
        );

        let output = p.run(&video, "abc123").await.unwrap();
        assert!(output.exists());
        // One full attempt, then exactly one reduced retry
        assert_eq!(*isolator.reduced_calls.lock().unwrap(), vec![false, true]);
    }

    #[tokio::test]
    async fn test_chunked_isolation_concatenates_in_order() {
        let temp = tempfile::tempdir().unwrap();
        let out = tempfile::tempdir().unwrap();
        let video = temp.path().join("input.mp4");
        std::fs::write(&video, b"video").unwrap();

        let media = Arc::new(ChunkingMedia {
            concat_order: Mutex::new(Vec::new()),
        });
        let p = Pipeline::new(
            media.clone(),
            Arc::new(EchoIsolator),
            PipelineConfig {
                temp_dir: temp.path().to_path_buf(),
                output_dir: out.path().to_path_buf(),
                keep_intermediates: false,
                chunked: true,
                chunk_secs: 300,
                max_parallel_chunks: 2,
            },
            CancellationToken::new(),
        );

        let output = p.run(&video, "abc123").await.unwrap();
        assert!(output.exists());

        // Stems joined in temporal order even with parallel isolation
        let names: Vec<String> = media
            .concat_order
            .lock()
            .unwrap()
            .iter()
            .map(|p| p.file_stem().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(
            names,
            vec![
                "chunk_0000_vocals",
                "chunk_0001_vocals",
                "chunk_0002_vocals"
            ]
        );
    }

    #[tokio::test]
    async fn test_isolation_failure_is_not_retried() {
        let temp = tempfile::tempdir().unwrap();
        let out = tempfile::tempdir().unwrap();
        let video = temp.path().join("input.mp4");
        std::fs::write(&video, b"video").unwrap();

        let p = pipeline(
            FakeMedia { fail_extract: false },
            FakeIsolator::new(vec![Err(IsolateError::Failed("bad input".into()))]),
            temp.path(),
            out.path(),
            false,
        );

        let err = p.run(&video, "abc123").await.unwrap_err();
        assert!(matches!(err, VokalError::Isolation(_)));
    }

    #[tokio::test]
    async fn test_cancellation_stops_before_first_stage() {
        let temp = tempfile::tempdir().unwrap();
        let out = tempfile::tempdir().unwrap();
        let video = temp.path().join("input.mp4");
        std::fs::write(&video, b"video").unwrap();

        let token = CancellationToken::new();
        token.cancel();
        let p = Pipeline::new(
            Arc::new(FakeMedia { fail_extract: false }),
            Arc::new(FakeIsolator::new(vec![])),
            PipelineConfig {
                temp_dir: temp.path().to_path_buf(),
                output_dir: out.path().to_path_buf(),
                keep_intermediates: false,
                chunked: false,
                chunk_secs: 300,
                max_parallel_chunks: 2,
            },
            token,
        );

        let err = p.run(&video, "abc123").await.unwrap_err();
        assert!(matches!(err, VokalError::Cancelled));
    }
}
