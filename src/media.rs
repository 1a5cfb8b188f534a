//! Media container operations via ffmpeg and ffprobe.
//!
//! Three concerns: extracting a processing-grade WAV from a video, remuxing
//! a replacement audio track back into the original video stream, and
//! splitting/concatenating waveforms for chunked isolation.

use crate::error::{Result, VokalError};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, info, instrument};

/// Stream-level facts about a media file.
#[derive(Debug, Clone, PartialEq)]
pub struct MediaProbe {
    pub duration_secs: f64,
    pub has_video: bool,
    pub has_audio: bool,
}

/// Container operations the pipeline needs. Trait seam so stages can be
/// tested without ffmpeg on the path.
#[async_trait]
pub trait MediaTool: Send + Sync {
    /// Decode the audio track to uncompressed stereo PCM WAV.
    async fn extract_audio(&self, video: &Path, wav_out: &Path) -> Result<()>;

    /// Copy the video stream untouched and replace the audio track.
    async fn remux(&self, video: &Path, audio: &Path, out: &Path) -> Result<()>;

    /// Duration and stream kinds of a media file.
    async fn probe(&self, path: &Path) -> Result<MediaProbe>;

    /// Split a WAV into fixed-length chunks, in order.
    async fn split_wav(&self, wav: &Path, out_dir: &Path, chunk_secs: u32) -> Result<Vec<PathBuf>>;

    /// Concatenate WAV chunks losslessly, in the order given.
    async fn concat_wav(&self, parts: &[PathBuf], out: &Path) -> Result<()>;
}

/// The real ffmpeg-backed implementation.
pub struct FfmpegTool {
    audio_bitrate: String,
    timeout: Duration,
}

impl FfmpegTool {
    pub fn new(audio_bitrate: impl Into<String>, timeout: Duration) -> Self {
        Self {
            audio_bitrate: audio_bitrate.into(),
            timeout,
        }
    }

    async fn run_ffmpeg<E>(&self, args: &[&str], err: E) -> Result<()>
    where
        E: Fn(Option<i32>, String) -> VokalError,
    {
        debug!("ffmpeg {}", args.join(" "));

        let invocation = Command::new("ffmpeg")
            .args(args)
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output();

        let output = match tokio::time::timeout(self.timeout, invocation).await {
            Ok(Ok(o)) => o,
            Ok(Err(e)) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(VokalError::ToolNotFound("ffmpeg".into()));
            }
            Ok(Err(e)) => {
                return Err(err(None, format!("ffmpeg execution failed: {e}")));
            }
            Err(_) => {
                return Err(err(
                    None,
                    format!("ffmpeg timed out after {}s", self.timeout.as_secs()),
                ));
            }
        };

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            return Err(err(output.status.code(), stderr));
        }

        Ok(())
    }
}

#[async_trait]
impl MediaTool for FfmpegTool {
    #[instrument(skip(self))]
    async fn extract_audio(&self, video: &Path, wav_out: &Path) -> Result<()> {
        info!("Extracting audio from {}", video.display());

        let video_s = video.to_string_lossy();
        let out_s = wav_out.to_string_lossy();

        self.run_ffmpeg(
            &[
                "-i", &video_s,
                "-vn",
                "-acodec", "pcm_s16le",
                "-ar", "44100",
                "-ac", "2",
                "-y",
                "-loglevel", "error",
                &out_s,
            ],
            |exit_code, stderr| VokalError::Extraction { exit_code, stderr },
        )
        .await?;

        if !wav_out.exists() {
            return Err(VokalError::Extraction {
                exit_code: None,
                stderr: "ffmpeg produced no output file".into(),
            });
        }
        Ok(())
    }

    #[instrument(skip(self))]
    async fn remux(&self, video: &Path, audio: &Path, out: &Path) -> Result<()> {
        info!("Remuxing {} with replaced audio", video.display());

        let video_s = video.to_string_lossy();
        let audio_s = audio.to_string_lossy();
        let out_s = out.to_string_lossy();

        // Video stream is copied bit-for-bit; only audio is re-encoded.
        // -shortest guards against a vocals track that outruns the video.
        self.run_ffmpeg(
            &[
                "-i", &video_s,
                "-i", &audio_s,
                "-map", "0:v",
                "-map", "1:a",
                "-c:v", "copy",
                "-c:a", "aac",
                "-b:a", &self.audio_bitrate,
                "-shortest",
                "-y",
                "-loglevel", "error",
                &out_s,
            ],
            |exit_code, stderr| VokalError::Remux { exit_code, stderr },
        )
        .await
    }

    async fn probe(&self, path: &Path) -> Result<MediaProbe> {
        let invocation = Command::new("ffprobe")
            .arg("-v").arg("quiet")
            .arg("-print_format").arg("json")
            .arg("-show_format")
            .arg("-show_streams")
            .arg(path)
            .kill_on_drop(true)
            .output();

        let output = match tokio::time::timeout(self.timeout, invocation).await {
            Ok(Ok(o)) => o,
            Ok(Err(e)) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(VokalError::ToolNotFound("ffprobe".into()));
            }
            Ok(Err(e)) => {
                return Err(VokalError::InvalidInput(format!("ffprobe failed: {e}")));
            }
            Err(_) => {
                return Err(VokalError::InvalidInput(format!(
                    "ffprobe timed out after {}s",
                    self.timeout.as_secs()
                )));
            }
        };

        if !output.status.success() {
            return Err(VokalError::InvalidInput(format!(
                "ffprobe cannot read {}",
                path.display()
            )));
        }

        parse_probe(&String::from_utf8_lossy(&output.stdout))
    }

    #[instrument(skip(self, wav))]
    async fn split_wav(&self, wav: &Path, out_dir: &Path, chunk_secs: u32) -> Result<Vec<PathBuf>> {
        std::fs::create_dir_all(out_dir)?;

        let total = self.probe(wav).await?.duration_secs;
        let chunk_len = chunk_secs as f64;

        if total <= chunk_len {
            return Ok(vec![wav.to_path_buf()]);
        }

        let wav_s = wav.to_string_lossy().to_string();
        let mut chunks = Vec::new();
        let mut offset = 0.0;
        let mut idx = 0u32;

        while offset < total {
            let chunk = out_dir.join(format!("chunk_{:04}.wav", idx));
            let chunk_s = chunk.to_string_lossy().to_string();
            let length = chunk_len.min(total - offset);

            self.run_ffmpeg(
                &[
                    "-ss", &format!("{:.3}", offset),
                    "-i", &wav_s,
                    "-t", &format!("{:.3}", length),
                    "-c", "copy",
                    "-y",
                    "-loglevel", "error",
                    &chunk_s,
                ],
                |exit_code, stderr| VokalError::Extraction { exit_code, stderr },
            )
            .await?;

            chunks.push(chunk);
            offset += chunk_len;
            idx += 1;
        }

        info!("Split waveform into {} chunks", chunks.len());
        Ok(chunks)
    }

    async fn concat_wav(&self, parts: &[PathBuf], out: &Path) -> Result<()> {
        if parts.is_empty() {
            return Err(VokalError::InvalidInput("nothing to concatenate".into()));
        }

        let list_path = out.with_extension("txt");
        std::fs::write(&list_path, concat_list(parts))?;

        let list_s = list_path.to_string_lossy().to_string();
        let out_s = out.to_string_lossy().to_string();

        let result = self
            .run_ffmpeg(
                &[
                    "-f", "concat",
                    "-safe", "0",
                    "-i", &list_s,
                    "-c", "copy",
                    "-y",
                    "-loglevel", "error",
                    &out_s,
                ],
                |exit_code, stderr| VokalError::Extraction { exit_code, stderr },
            )
            .await;

        let _ = std::fs::remove_file(&list_path);
        result
    }
}

/// Build a concat-demuxer file list. Single quotes in paths are escaped per
/// ffmpeg's quoting rules.
fn concat_list(parts: &[PathBuf]) -> String {
    let mut list = String::new();
    for part in parts {
        let escaped = part.to_string_lossy().replace('\'', "'\\''");
        list.push_str(&format!("file '{}'\n", escaped));
    }
    list
}

/// Parse ffprobe JSON output into stream facts.
fn parse_probe(json_str: &str) -> Result<MediaProbe> {
    let parsed: serde_json::Value = serde_json::from_str(json_str)
        .map_err(|_| VokalError::InvalidInput("invalid ffprobe output".into()))?;

    let duration_secs = parsed["format"]["duration"]
        .as_str()
        .and_then(|s| s.parse::<f64>().ok())
        .ok_or_else(|| VokalError::InvalidInput("no duration in ffprobe output".into()))?;

    let streams = parsed["streams"].as_array().cloned().unwrap_or_default();
    let has_kind = |kind: &str| {
        streams
            .iter()
            .any(|s| s["codec_type"].as_str() == Some(kind))
    };

    Ok(MediaProbe {
        duration_secs,
        has_video: has_kind("video"),
        has_audio: has_kind("audio"),
    })
}
