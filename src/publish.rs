//! Optional republishing of finished videos through an external uploader.

use crate::error::{Result, VokalError};
use async_trait::async_trait;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::{info, instrument};

/// Uploads a finished video somewhere. Returns an upload identifier when
/// the target service reports one.
#[async_trait]
pub trait Publisher: Send + Sync {
    async fn publish(&self, video: &Path, title: &str) -> Result<Option<String>>;
}

/// Runs a user-configured shell command with `{video}`, `{title}` and
/// `{privacy}` placeholders substituted. The command's last stdout line,
/// if any, is taken as the upload identifier.
pub struct CommandPublisher {
    command: String,
    privacy: String,
    timeout: Duration,
}

impl CommandPublisher {
    pub fn new(command: impl Into<String>, privacy: impl Into<String>, timeout: Duration) -> Self {
        Self {
            command: command.into(),
            privacy: privacy.into(),
            timeout,
        }
    }
}

/// Single-quote a value for the shell. Titles come from channel listings,
/// so they are untrusted text and must never be interpreted.
fn shell_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', "'\\''"))
}

/// Substitute placeholders, shell-quoting every value.
fn substitute(template: &str, video: &Path, title: &str, privacy: &str) -> String {
    template
        .replace("{video}", &shell_quote(&video.to_string_lossy()))
        .replace("{title}", &shell_quote(title))
        .replace("{privacy}", &shell_quote(privacy))
}

#[async_trait]
impl Publisher for CommandPublisher {
    #[instrument(skip(self, video))]
    async fn publish(&self, video: &Path, title: &str) -> Result<Option<String>> {
        let command = substitute(&self.command, video, title, &self.privacy);
        info!("Publishing {} via uploader command", video.display());

        let invocation = Command::new("sh")
            .arg("-c")
            .arg(&command)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output();

        let output = match tokio::time::timeout(self.timeout, invocation).await {
            Ok(result) => result
                .map_err(|e| VokalError::Publish(format!("uploader execution failed: {e}")))?,
            Err(_) => {
                return Err(VokalError::Publish(format!(
                    "uploader timed out after {}s",
                    self.timeout.as_secs()
                )));
            }
        };

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(VokalError::Publish(format!(
                "uploader exited with {}: {}",
                output.status,
                stderr.trim()
            )));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let upload_id = stdout
            .lines()
            .rev()
            .map(str::trim)
            .find(|l| !l.is_empty())
            .map(|l| l.to_string());

        if let Some(id) = &upload_id {
            info!("Uploader reported id {}", id);
        }
        Ok(upload_id)
    }
}
