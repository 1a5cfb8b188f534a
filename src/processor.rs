//! End-to-end processing of one video: acquire, pipeline, publish.
//!
//! The scheduler and the one-off process command both drive this seam;
//! tests substitute it wholesale.

use crate::acquire::AcquisitionChain;
use crate::config::Settings;
use crate::error::{Result, VokalError};
use crate::isolate::DemucsIsolator;
use crate::media::FfmpegTool;
use crate::pipeline::{Pipeline, PipelineConfig};
use crate::publish::{CommandPublisher, Publisher};
use crate::source::VideoRef;
use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Outcome of processing one video end to end.
#[derive(Debug, Clone)]
pub struct ProcessedVideo {
    pub output_path: PathBuf,
    pub upload_id: Option<String>,
}

#[async_trait]
pub trait VideoProcessor: Send + Sync {
    async fn process(&self, video: &VideoRef, title: &str) -> Result<ProcessedVideo>;
}

/// The real composition: acquisition chain into pipeline, then the optional
/// publisher.
pub struct ChainProcessor {
    chain: AcquisitionChain,
    pipeline: Pipeline,
    publisher: Option<Arc<dyn Publisher>>,
    download_dir: PathBuf,
}

impl ChainProcessor {
    /// Assemble the standard composition from settings.
    pub fn from_settings(settings: &Settings, cancel: CancellationToken) -> Result<Self> {
        let media = Arc::new(FfmpegTool::new(
            &settings.remux.audio_bitrate,
            Duration::from_secs(settings.remux.ffmpeg_timeout_secs),
        ));
        let isolator = Arc::new(DemucsIsolator::new(
            &settings.isolation.model,
            &settings.isolation.device,
            settings.isolation.reduced_segment_secs,
            Duration::from_secs(settings.isolation.timeout_secs),
        ));
        let pipeline = Pipeline::new(
            media,
            isolator,
            PipelineConfig::from_settings(settings),
            cancel.clone(),
        );
        let chain = AcquisitionChain::from_settings(&settings.acquire, cancel);

        let publisher: Option<Arc<dyn Publisher>> = if settings.publish.enabled {
            let command = settings.publish.command.as_ref().ok_or_else(|| {
                VokalError::Config("publish.enabled is set but publish.command is not".into())
            })?;
            Some(Arc::new(CommandPublisher::new(
                command,
                &settings.publish.privacy,
                Duration::from_secs(settings.publish.timeout_secs),
            )))
        } else {
            None
        };

        Ok(Self {
            chain,
            pipeline,
            publisher,
            download_dir: settings.temp_dir().join("downloads"),
        })
    }

    pub fn new(
        chain: AcquisitionChain,
        pipeline: Pipeline,
        publisher: Option<Arc<dyn Publisher>>,
        download_dir: PathBuf,
    ) -> Self {
        Self {
            chain,
            pipeline,
            publisher,
            download_dir,
        }
    }

    /// Run the pipeline on a video file that is already on disk. Local
    /// inputs go through the same publish step as acquired ones.
    pub async fn process_local(
        &self,
        path: &std::path::Path,
        video_id: &str,
        title: &str,
    ) -> Result<ProcessedVideo> {
        let output_path = self.pipeline.run(path, video_id).await?;

        let upload_id = match &self.publisher {
            Some(publisher) => publisher.publish(&output_path, title).await?,
            None => None,
        };

        Ok(ProcessedVideo {
            output_path,
            upload_id,
        })
    }
}

#[async_trait]
impl VideoProcessor for ChainProcessor {
    async fn process(&self, video: &VideoRef, title: &str) -> Result<ProcessedVideo> {
        std::fs::create_dir_all(&self.download_dir)?;

        let report = self.chain.acquire(video, &self.download_dir).await?;
        info!(
            "Acquired {} via {} after {} attempt(s)",
            video.id,
            report.result.source_method,
            report.attempts.len()
        );

        let result = self.pipeline.run(&report.result.video_path, &video.id).await;

        // The raw download is scratch either way
        let _ = std::fs::remove_file(&report.result.video_path);
        let output_path = result?;

        let upload_id = match &self.publisher {
            Some(publisher) => publisher.publish(&output_path, title).await?,
            None => None,
        };

        Ok(ProcessedVideo {
            output_path,
            upload_id,
        })
    }
}
