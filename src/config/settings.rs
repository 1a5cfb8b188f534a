//! Configuration settings for Vokal.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Root configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub general: GeneralSettings,
    pub acquire: AcquireSettings,
    pub isolation: IsolationSettings,
    pub remux: RemuxSettings,
    pub scheduler: SchedulerSettings,
    pub publish: PublishSettings,
}

/// General application settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralSettings {
    /// Directory for storing application data (ledger, caches).
    pub data_dir: String,
    /// Directory for run-scoped intermediate files.
    pub temp_dir: String,
    /// Directory for final output videos.
    pub output_dir: String,
    /// Keep intermediate artifacts after a run (debug aid).
    pub keep_intermediates: bool,
}

impl Default for GeneralSettings {
    fn default() -> Self {
        Self {
            data_dir: "~/.vokal".to_string(),
            temp_dir: "/tmp/vokal".to_string(),
            output_dir: "./output".to_string(),
            keep_intermediates: false,
        }
    }
}

/// Acquisition chain and backend settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AcquireSettings {
    /// Timeout for the yt-dlp backend, in seconds.
    pub ytdlp_timeout_secs: u64,
    /// Timeout for HTTP mirror/resolver backends, in seconds.
    pub http_timeout_secs: u64,
    /// Timeout for the GUI-downloader backend, in seconds.
    pub gui_timeout_secs: u64,
    /// Retries per backend after a transient failure.
    pub transient_retries: u32,
    /// Delay before a transient retry, in seconds.
    pub retry_backoff_secs: u64,
    /// Netscape-format cookies file for yt-dlp (auto-discovered if unset).
    pub cookies_file: Option<String>,
    /// Proxy URL passed through to yt-dlp.
    pub proxy: Option<String>,
    /// Invidious API instances, tried in order.
    pub invidious_instances: Vec<String>,
    /// Piped API instances, tried in order.
    pub piped_instances: Vec<String>,
    /// Cobalt API instances, tried in order.
    pub cobalt_instances: Vec<String>,
    /// Path to the external GUI downloader application.
    pub gui_app_path: Option<String>,
    /// Directories the GUI application may save downloads into.
    pub gui_watch_dirs: Vec<String>,
    /// Minimum plausible size for a downloaded video, in bytes.
    pub min_file_bytes: u64,
}

impl Default for AcquireSettings {
    fn default() -> Self {
        Self {
            ytdlp_timeout_secs: 900,
            http_timeout_secs: 300,
            gui_timeout_secs: 600,
            transient_retries: 1,
            retry_backoff_secs: 2,
            cookies_file: None,
            proxy: None,
            invidious_instances: vec![
                "https://inv.nadeko.net".to_string(),
                "https://yewtu.be".to_string(),
                "https://invidious.nerdvpn.de".to_string(),
            ],
            piped_instances: vec![
                "https://pipedapi.kavin.rocks".to_string(),
                "https://pipedapi.adminforge.de".to_string(),
            ],
            cobalt_instances: vec![
                "https://cobalt-api.meowing.de".to_string(),
                "https://cobalt-backend.canine.tools".to_string(),
            ],
            gui_app_path: None,
            gui_watch_dirs: vec!["~/Downloads".to_string()],
            min_file_bytes: 1_000_000,
        }
    }
}

/// Vocal isolation settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IsolationSettings {
    /// Demucs model variant.
    pub model: String,
    /// Inference device (auto, cpu, cuda).
    pub device: String,
    /// Split length in seconds passed to demucs in reduced-resource mode.
    pub reduced_segment_secs: u32,
    /// Process a single long video's waveform in parallel chunks (opt-in).
    pub chunked: bool,
    /// Chunk length in seconds for chunked mode.
    pub chunk_secs: u32,
    /// Maximum chunks isolated concurrently in chunked mode.
    pub max_parallel_chunks: usize,
    /// Timeout for one demucs run, in seconds. Separation is slow on CPU,
    /// so this defaults generously.
    pub timeout_secs: u64,
}

impl Default for IsolationSettings {
    fn default() -> Self {
        Self {
            model: "htdemucs".to_string(),
            device: "auto".to_string(),
            reduced_segment_secs: 8,
            chunked: false,
            chunk_secs: 300,
            max_parallel_chunks: 2,
            timeout_secs: 7200,
        }
    }
}

/// Remux output settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RemuxSettings {
    /// AAC bitrate for the replaced audio stream.
    pub audio_bitrate: String,
    /// Timeout for any single ffmpeg/ffprobe invocation, in seconds.
    pub ffmpeg_timeout_secs: u64,
}

impl Default for RemuxSettings {
    fn default() -> Self {
        Self {
            audio_bitrate: "192k".to_string(),
            ffmpeg_timeout_secs: 600,
        }
    }
}

/// Scheduler settings for unattended batch runs.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerSettings {
    /// Path to the processed-video ledger database.
    pub ledger_path: String,
    /// Channels to scan (handles or full URLs).
    pub channels: Vec<String>,
    /// Videos to select per channel per run.
    pub videos_per_channel: usize,
    /// Minimum candidate duration, in seconds (inclusive).
    pub min_duration_secs: u32,
    /// Maximum candidate duration, in seconds (inclusive).
    pub max_duration_secs: u32,
    /// Maximum videos to scan from each channel listing.
    pub scan_limit: usize,
    /// Timeout for one channel listing call, in seconds.
    pub listing_timeout_secs: u64,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            ledger_path: "~/.vokal/ledger.db".to_string(),
            channels: Vec::new(),
            videos_per_channel: 1,
            min_duration_secs: 600,
            max_duration_secs: 3600,
            scan_limit: 200,
            listing_timeout_secs: 120,
        }
    }
}

/// Publish settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PublishSettings {
    /// Upload processed videos after the pipeline completes.
    pub enabled: bool,
    /// External uploader command. `{video}` and `{title}` are substituted.
    pub command: Option<String>,
    /// Privacy setting forwarded to the uploader.
    pub privacy: String,
    /// Timeout for one uploader run, in seconds.
    pub timeout_secs: u64,
}

impl Default for PublishSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            command: None,
            privacy: "unlisted".to_string(),
            timeout_secs: 1800,
        }
    }
}

impl Settings {
    /// Load settings from the default configuration file.
    pub fn load() -> crate::error::Result<Self> {
        Self::load_from(None)
    }

    /// Load settings from a specific path, or default location if None.
    pub fn load_from(path: Option<&PathBuf>) -> crate::error::Result<Self> {
        let config_path = match path {
            Some(p) => p.clone(),
            None => Self::default_config_path(),
        };

        if config_path.exists() {
            let content = std::fs::read_to_string(&config_path)?;
            let settings: Settings = toml::from_str(&content)?;
            Ok(settings)
        } else {
            Ok(Settings::default())
        }
    }

    /// Save settings to a specific path.
    pub fn save_to(&self, path: &PathBuf) -> crate::error::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)
            .map_err(|e| crate::error::VokalError::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Get the default configuration file path.
    pub fn default_config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("vokal")
            .join("config.toml")
    }

    /// Expand shell variables in paths (e.g., ~).
    pub fn expand_path(path: &str) -> PathBuf {
        PathBuf::from(shellexpand::tilde(path).to_string())
    }

    /// Get the expanded data directory path.
    pub fn data_dir(&self) -> PathBuf {
        Self::expand_path(&self.general.data_dir)
    }

    /// Get the expanded temp directory path.
    pub fn temp_dir(&self) -> PathBuf {
        Self::expand_path(&self.general.temp_dir)
    }

    /// Get the expanded output directory path.
    pub fn output_dir(&self) -> PathBuf {
        Self::expand_path(&self.general.output_dir)
    }

    /// Get the expanded ledger database path.
    pub fn ledger_path(&self) -> PathBuf {
        Self::expand_path(&self.scheduler.ledger_path)
    }
}
