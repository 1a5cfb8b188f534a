//! Vocal isolation via the Demucs source-separation model.
//!
//! Demucs separates a waveform into stems; with `--two-stems vocals` it
//! produces exactly the vocals track we keep and the accompaniment we drop.
//! Running the model is by far the most resource-hungry stage, so failures
//! are classified: out-of-memory conditions are reported distinctly so the
//! pipeline can retry once with reduced settings.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::{info, instrument, warn};

/// Why an isolation attempt failed.
#[derive(Debug, thiserror::Error)]
pub enum IsolateError {
    /// The model ran out of memory (GPU or system). Worth one retry with
    /// reduced settings.
    #[error("isolation ran out of resources: {0}")]
    ResourceExhausted(String),

    /// The model rejected the input or crashed for a non-resource reason.
    #[error("vocal isolation failed: {0}")]
    Failed(String),

    #[error("demucs not found on PATH")]
    ToolNotFound,
}

pub type IsolateResult = std::result::Result<PathBuf, IsolateError>;

/// Separates vocals from a waveform. Trait seam so the pipeline can be
/// tested without the model installed.
#[async_trait]
pub trait VocalIsolator: Send + Sync {
    /// Isolate the vocals stem of `wav` into `work_dir`, returning the path
    /// to the vocals WAV. `reduced` requests a lower-resource configuration.
    async fn isolate(&self, wav: &Path, work_dir: &Path, reduced: bool) -> IsolateResult;
}

pub struct DemucsIsolator {
    model: String,
    device: String,
    reduced_segment_secs: u32,
    timeout: Duration,
}

impl DemucsIsolator {
    pub fn new(
        model: impl Into<String>,
        device: impl Into<String>,
        reduced_segment_secs: u32,
        timeout: Duration,
    ) -> Self {
        Self {
            model: model.into(),
            device: device.into(),
            reduced_segment_secs,
            timeout,
        }
    }

    /// Where demucs writes the vocals stem for a given input.
    fn expected_output(&self, wav: &Path, work_dir: &Path) -> PathBuf {
        let stem = wav
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("audio");
        work_dir.join(&self.model).join(stem).join("vocals.wav")
    }
}

/// Decide whether a demucs failure is a resource condition.
fn is_resource_exhaustion(stderr: &str) -> bool {
    let lower = stderr.to_lowercase();
    lower.contains("out of memory")
        || lower.contains("cuda error")
        || lower.contains("oom")
        || lower.contains("cannot allocate memory")
        || lower.contains("killed")
}

/// Last non-empty line of tool output, for compact error messages.
fn last_line(text: &str) -> String {
    text.lines()
        .rev()
        .map(str::trim)
        .find(|l| !l.is_empty())
        .unwrap_or("no output")
        .to_string()
}

#[async_trait]
impl VocalIsolator for DemucsIsolator {
    #[instrument(skip(self, work_dir), fields(model = %self.model))]
    async fn isolate(&self, wav: &Path, work_dir: &Path, reduced: bool) -> IsolateResult {
        std::fs::create_dir_all(work_dir)
            .map_err(|e| IsolateError::Failed(format!("cannot create work dir: {e}")))?;

        info!(
            "Isolating vocals from {}{}",
            wav.display(),
            if reduced { " (reduced settings)" } else { "" }
        );

        let mut cmd = Command::new("demucs");
        cmd.arg("--two-stems").arg("vocals")
            .arg("-n").arg(&self.model)
            .arg("-o").arg(work_dir);

        if reduced {
            // CPU inference with short segments keeps peak memory low
            cmd.arg("--device").arg("cpu");
            cmd.arg("--segment").arg(self.reduced_segment_secs.to_string());
        } else if self.device != "auto" {
            cmd.arg("--device").arg(&self.device);
        }

        let invocation = cmd
            .arg(wav)
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output();

        let output = match tokio::time::timeout(self.timeout, invocation).await {
            Ok(Ok(o)) => o,
            Ok(Err(e)) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(IsolateError::ToolNotFound);
            }
            Ok(Err(e)) => {
                return Err(IsolateError::Failed(format!("demucs execution failed: {e}")));
            }
            Err(_) => {
                return Err(IsolateError::Failed(format!(
                    "demucs timed out after {}s",
                    self.timeout.as_secs()
                )));
            }
        };

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            if is_resource_exhaustion(&stderr) {
                warn!("Demucs hit a resource limit: {}", last_line(&stderr));
                return Err(IsolateError::ResourceExhausted(last_line(&stderr)));
            }
            return Err(IsolateError::Failed(format!(
                "demucs exited with {}: {}",
                output.status,
                last_line(&stderr)
            )));
        }

        let vocals = self.expected_output(wav, work_dir);
        if !vocals.exists() {
            return Err(IsolateError::Failed(format!(
                "vocals stem missing at {}",
                vocals.display()
            )));
        }

        Ok(vocals)
    }
}
