//! Pre-flight checks before expensive operations.
//!
//! Validates that required tools are available before starting operations
//! that would otherwise fail midway.

use crate::error::{Result, VokalError};
use std::process::Command;

/// Requirements for different operations.
#[derive(Debug, Clone, Copy)]
pub enum Operation {
    /// Processing a remote video needs the full toolchain.
    Process,
    /// A file already on disk skips the downloader.
    ProcessLocal,
    /// Scheduling lists channels and downloads, same toolchain as Process.
    Schedule,
    /// Listing the ledger has no external requirements.
    List,
}

/// Tools an operation cannot start without.
fn required_tools(operation: Operation) -> &'static [&'static str] {
    match operation {
        Operation::Process | Operation::Schedule => {
            &["yt-dlp", "ffmpeg", "ffprobe", "demucs"]
        }
        Operation::ProcessLocal => &["ffmpeg", "ffprobe", "demucs"],
        Operation::List => &[],
    }
}

/// Run pre-flight checks for the given operation.
///
/// Returns Ok(()) if all checks pass, or an error describing what's missing.
pub fn check(operation: Operation) -> Result<()> {
    for tool in required_tools(operation) {
        check_tool(tool)?;
    }
    Ok(())
}

/// Check if an external tool is available.
fn check_tool(name: &str) -> Result<()> {
    // ffmpeg/ffprobe use -version (single dash), others use --version
    let version_arg = match name {
        "ffmpeg" | "ffprobe" => "-version",
        _ => "--version",
    };
    match Command::new(name).arg(version_arg).output() {
        Ok(output) if output.status.success() => Ok(()),
        Ok(_) => Err(VokalError::ToolNotFound(format!(
            "{} is installed but not working correctly",
            name
        ))),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            Err(VokalError::ToolNotFound(name.to_string()))
        }
        Err(e) => Err(VokalError::ToolNotFound(format!("{}: {}", name, e))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_check_list_no_requirements() {
        assert!(check(Operation::List).is_ok());
    }

    #[test]
    fn test_local_processing_does_not_require_a_downloader() {
        assert!(!required_tools(Operation::ProcessLocal).contains(&"yt-dlp"));
        assert!(required_tools(Operation::ProcessLocal).contains(&"demucs"));
        assert!(required_tools(Operation::Process).contains(&"yt-dlp"));
    }
}
