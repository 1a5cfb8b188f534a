//! Vokal - Background-music removal for videos
//!
//! A CLI tool that acquires a video, separates the vocals from the
//! background music, and remuxes the untouched video stream with the
//! vocals-only track.
//!
//! # Overview
//!
//! Vokal allows you to:
//! - Process a YouTube URL or local video file in one command
//! - Fall back across five acquisition methods when a download is blocked
//! - Run unattended batches over configured channels, deduplicated by a
//!   persistent ledger
//! - Optionally republish finished videos through an external uploader
//!
//! # Architecture
//!
//! The library is organized into several modules:
//!
//! - `config` - Configuration management
//! - `source` - Input resolution (YouTube, local files)
//! - `acquire` - Acquisition backends and the fallback chain
//! - `media` - ffmpeg/ffprobe container operations
//! - `isolate` - Demucs vocal separation
//! - `pipeline` - Stage orchestration for one video
//! - `processor` - End-to-end composition (acquire, pipeline, publish)
//! - `ledger` - Persistent processed-video record
//! - `listing` - Channel upload enumeration
//! - `scheduler` - Batch planning and execution
//! - `publish` - External uploader integration
//!
//! # Example
//!
//! ```rust,no_run
//! use vokal::config::Settings;
//! use vokal::processor::{ChainProcessor, VideoProcessor};
//! use vokal::source::VideoRef;
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let settings = Settings::load()?;
//!     let processor = ChainProcessor::from_settings(&settings, CancellationToken::new())?;
//!
//!     let video = VideoRef::youtube("dQw4w9WgXcQ");
//!     let processed = processor.process(&video, "My video").await?;
//!     println!("Wrote {}", processed.output_path.display());
//!
//!     Ok(())
//! }
//! ```

pub mod acquire;
pub mod cli;
pub mod config;
pub mod error;
pub mod isolate;
pub mod ledger;
pub mod listing;
pub mod media;
pub mod pipeline;
pub mod processor;
pub mod publish;
pub mod scheduler;
pub mod source;

pub use error::{Result, VokalError};
