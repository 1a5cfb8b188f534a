//! Video source identification.
//!
//! Resolves user input (YouTube URL, bare video ID, or local file path) into
//! a [`VideoRef`] whose `id` is the deduplication key used by the ledger.

use crate::error::{Result, VokalError};
use regex::Regex;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};

/// Supported video file extensions for local input.
const VIDEO_EXTENSIONS: &[&str] = &["mp4", "mkv", "webm", "mov", "avi", "m4v"];

/// Identifies a source video. Immutable once created.
///
/// `id` is the canonical YouTube video identifier, or a content hash for
/// local files.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VideoRef {
    pub id: String,
    pub url: String,
    pub channel: Option<String>,
}

impl VideoRef {
    /// Build a reference to a YouTube video from its canonical id.
    pub fn youtube(id: &str) -> Self {
        Self {
            id: id.to_string(),
            url: format!("https://www.youtube.com/watch?v={}", id),
            channel: None,
        }
    }

    pub fn with_channel(mut self, channel: &str) -> Self {
        self.channel = Some(channel.to_string());
        self
    }
}

/// Resolved user input for the process command.
#[derive(Debug, Clone)]
pub enum Input {
    /// A video already on disk, identified by content hash.
    Local { path: PathBuf, video: VideoRef },
    /// A YouTube video that must go through the acquisition chain.
    Remote(VideoRef),
}

/// Extract a YouTube video ID from a URL or bare 11-character ID.
pub fn extract_video_id(input: &str) -> Option<String> {
    // Matches various YouTube URL formats and bare video IDs
    let re = Regex::new(
        r"(?x)
        (?:
            (?:https?://)?
            (?:www\.|m\.)?
            (?:youtube\.com/watch\?v=|youtu\.be/|youtube\.com/embed/|youtube\.com/shorts/|youtube\.com/v/)
            ([a-zA-Z0-9_-]{11})
        )
        |
        ^([a-zA-Z0-9_-]{11})$
    ",
    )
    .expect("Invalid regex");

    let caps = re.captures(input.trim())?;
    caps.get(1)
        .or_else(|| caps.get(2))
        .map(|m| m.as_str().to_string())
}

/// Check whether input looks like a YouTube URL or video ID.
pub fn is_youtube_input(input: &str) -> bool {
    extract_video_id(input).is_some()
}

/// Check if a path has a recognized video extension.
pub fn is_video_file(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| VIDEO_EXTENSIONS.contains(&ext.to_lowercase().as_str()))
        .unwrap_or(false)
}

/// Compute a stable content-derived id for a local video file.
///
/// SHA-256 of the file content, truncated to 16 hex characters so ledger
/// ids stay readable next to 11-character YouTube ids.
pub fn local_file_id(path: &Path) -> Result<String> {
    let mut hasher = Sha256::new();
    let mut file = std::fs::File::open(path)?;
    std::io::copy(&mut file, &mut hasher)?;
    let digest = hasher.finalize();
    let hex: String = digest.iter().map(|b| format!("{:02x}", b)).collect();
    Ok(format!("local-{}", &hex[..16]))
}

/// Resolve user input into a local path or a remote video reference.
pub fn resolve_input(input: &str) -> Result<Input> {
    if let Some(id) = extract_video_id(input) {
        return Ok(Input::Remote(VideoRef::youtube(&id)));
    }

    let path = Path::new(input);
    if path.exists() {
        if !is_video_file(path) {
            return Err(VokalError::InvalidInput(format!(
                "Not a recognized video file: {}",
                input
            )));
        }
        let path = path.canonicalize()?;
        let id = local_file_id(&path)?;
        let url = path.to_string_lossy().to_string();
        return Ok(Input::Local {
            path,
            video: VideoRef {
                id,
                url,
                channel: None,
            },
        });
    }

    Err(VokalError::InvalidInput(format!(
        "Not a YouTube URL, video ID, or existing file: {}",
        input
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_extract_video_id() {
        assert_eq!(
            extract_video_id("https://www.youtube.com/watch?v=dQw4w9WgXcQ"),
            Some("dQw4w9WgXcQ".to_string())
        );
        assert_eq!(
            extract_video_id("https://youtu.be/dQw4w9WgXcQ"),
            Some("dQw4w9WgXcQ".to_string())
        );
        assert_eq!(
            extract_video_id("https://youtube.com/shorts/dQw4w9WgXcQ"),
            Some("dQw4w9WgXcQ".to_string())
        );
        assert_eq!(
            extract_video_id("dQw4w9WgXcQ"),
            Some("dQw4w9WgXcQ".to_string())
        );

        assert_eq!(extract_video_id("not-a-video-id"), None);
        assert_eq!(extract_video_id(""), None);
        assert_eq!(extract_video_id("/path/to/video.mp4"), None);
    }

    #[test]
    fn test_is_video_file() {
        assert!(is_video_file(Path::new("clip.mp4")));
        assert!(is_video_file(Path::new("clip.MKV")));
        assert!(!is_video_file(Path::new("audio.wav")));
        assert!(!is_video_file(Path::new("noext")));
    }

    #[test]
    fn test_local_file_id_is_content_stable() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("a.mp4");
        let b = dir.path().join("renamed.mp4");
        std::fs::File::create(&a)
            .unwrap()
            .write_all(b"same bytes")
            .unwrap();
        std::fs::File::create(&b)
            .unwrap()
            .write_all(b"same bytes")
            .unwrap();

        let id_a = local_file_id(&a).unwrap();
        let id_b = local_file_id(&b).unwrap();
        assert_eq!(id_a, id_b);
        assert!(id_a.starts_with("local-"));
        assert_eq!(id_a.len(), "local-".len() + 16);
    }

    #[test]
    fn test_resolve_input_rejects_unknown() {
        assert!(resolve_input("definitely/not/a/file.xyz").is_err());
    }
}
