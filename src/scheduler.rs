//! Unattended batch runs over configured channels.
//!
//! Planning and execution are separate: [`Scheduler::plan`] selects fresh
//! candidates from channel listings against the ledger and duration bounds,
//! [`Scheduler::run`] processes the plan one video at a time, recording
//! successes and tolerating per-video failures.

use crate::config::SchedulerSettings;
use crate::error::{Result, VokalError};
use crate::ledger::{Ledger, LedgerEntry};
use crate::listing::{ChannelLister, ChannelVideo};
use crate::processor::VideoProcessor;
use crate::source::VideoRef;
use chrono::Utc;
use std::collections::HashSet;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

/// One selected candidate with the channel it came from.
#[derive(Debug, Clone, PartialEq)]
pub struct PlannedVideo {
    pub channel: String,
    pub video: ChannelVideo,
}

/// What a batch run accomplished.
#[derive(Debug, Default)]
pub struct RunReport {
    pub processed: Vec<String>,
    pub failed: Vec<(String, String)>,
}

pub struct Scheduler {
    lister: Arc<dyn ChannelLister>,
    ledger: Arc<Ledger>,
    settings: SchedulerSettings,
}

impl Scheduler {
    pub fn new(
        lister: Arc<dyn ChannelLister>,
        ledger: Arc<Ledger>,
        settings: SchedulerSettings,
    ) -> Self {
        Self {
            lister,
            ledger,
            settings,
        }
    }

    /// Whether a candidate's duration falls inside the configured bounds.
    /// Both bounds are inclusive; an unknown duration never qualifies.
    fn duration_eligible(&self, video: &ChannelVideo) -> bool {
        match video.duration_secs {
            Some(d) => {
                d >= self.settings.min_duration_secs as u64
                    && d <= self.settings.max_duration_secs as u64
            }
            None => false,
        }
    }

    /// Select up to the per-channel quota of fresh candidates from each
    /// configured channel, preserving listing order.
    #[instrument(skip(self))]
    pub async fn plan(&self) -> Result<Vec<PlannedVideo>> {
        let mut planned = Vec::new();
        // A video can appear on more than one configured channel (topic
        // channels mirror uploads); the first listing wins.
        let mut selected = HashSet::new();

        for channel in &self.settings.channels {
            let listing = match self.lister.list(channel, self.settings.scan_limit).await {
                Ok(l) => l,
                Err(e) => {
                    warn!("Cannot list {}: {}", channel, e);
                    continue;
                }
            };

            let mut taken = 0usize;
            for video in listing {
                if taken >= self.settings.videos_per_channel {
                    break;
                }
                if !self.duration_eligible(&video) {
                    continue;
                }
                if self.ledger.contains(&video.video_id)? {
                    continue;
                }
                if !selected.insert(video.video_id.clone()) {
                    continue;
                }
                taken += 1;
                planned.push(PlannedVideo {
                    channel: channel.clone(),
                    video,
                });
            }

            info!("Selected {} candidate(s) from {}", taken, channel);
        }

        Ok(planned)
    }

    /// Process every planned video. One video failing never aborts the
    /// batch; cancellation does.
    #[instrument(skip_all)]
    pub async fn run(
        &self,
        processor: &dyn VideoProcessor,
        cancel: &CancellationToken,
    ) -> Result<RunReport> {
        let plan = self.plan().await?;
        info!("Batch run: {} video(s) planned", plan.len());

        let mut report = RunReport::default();

        for planned in plan {
            if cancel.is_cancelled() {
                return Err(VokalError::Cancelled);
            }

            let video =
                VideoRef::youtube(&planned.video.video_id).with_channel(&planned.channel);

            match processor.process(&video, &planned.video.title).await {
                Ok(processed) => {
                    let entry = LedgerEntry {
                        video_id: planned.video.video_id.clone(),
                        channel: Some(planned.channel.clone()),
                        title: Some(planned.video.title.clone()),
                        processed_at: Utc::now(),
                        upload_id: processed.upload_id,
                    };
                    if let Err(e) = self.ledger.record(&entry) {
                        warn!(
                            "Processed {} but could not record it: {}",
                            planned.video.video_id, e
                        );
                        report
                            .failed
                            .push((planned.video.video_id, e.to_string()));
                        continue;
                    }
                    info!(
                        "Processed {} -> {}",
                        planned.video.video_id,
                        processed.output_path.display()
                    );
                    report.processed.push(planned.video.video_id);
                }
                Err(e) => {
                    warn!("Skipping {} after failure: {}", planned.video.video_id, e);
                    report
                        .failed
                        .push((planned.video.video_id, e.to_string()));
                }
            }
        }

        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::processor::ProcessedVideo;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::path::PathBuf;

    struct FakeLister {
        channels: HashMap<String, Vec<ChannelVideo>>,
    }

    #[async_trait]
    impl ChannelLister for FakeLister {
        async fn list(&self, channel: &str, _limit: usize) -> Result<Vec<ChannelVideo>> {
            Ok(self.channels.get(channel).cloned().unwrap_or_default())
        }
    }

    /// Processor that fails for scripted IDs.
    struct FakeProcessor {
        fail_ids: Vec<String>,
    }

    #[async_trait]
    impl VideoProcessor for FakeProcessor {
        async fn process(&self, video: &VideoRef, _title: &str) -> Result<ProcessedVideo> {
            if self.fail_ids.contains(&video.id) {
                return Err(VokalError::Isolation("model crashed".into()));
            }
            Ok(ProcessedVideo {
                output_path: PathBuf::from(format!("/out/{}_vocals.mp4", video.id)),
                upload_id: None,
            })
        }
    }

    fn candidate(id: &str, duration: u64) -> ChannelVideo {
        ChannelVideo {
            video_id: id.to_string(),
            title: format!("Video {}", id),
            duration_secs: Some(duration),
            url: format!("https://www.youtube.com/watch?v={}", id),
        }
    }

    fn settings(channels: Vec<&str>, quota: usize) -> SchedulerSettings {
        SchedulerSettings {
            channels: channels.into_iter().map(String::from).collect(),
            videos_per_channel: quota,
            min_duration_secs: 600,
            max_duration_secs: 3600,
            ..SchedulerSettings::default()
        }
    }

    fn scheduler(
        listing: Vec<ChannelVideo>,
        ledger: Arc<Ledger>,
        quota: usize,
    ) -> Scheduler {
        let mut channels = HashMap::new();
        channels.insert("@ch".to_string(), listing);
        Scheduler::new(
            Arc::new(FakeLister { channels }),
            ledger,
            settings(vec!["@ch"], quota),
        )
    }

    fn processed(ledger: &Ledger, id: &str) {
        ledger
            .record(&LedgerEntry {
                video_id: id.to_string(),
                channel: None,
                title: None,
                processed_at: Utc::now(),
                upload_id: None,
            })
            .unwrap();
    }

    #[tokio::test]
    async fn test_plan_excludes_ledger_members() {
        let ledger = Arc::new(Ledger::in_memory().unwrap());
        processed(&ledger, "a");

        let s = scheduler(
            vec![candidate("a", 700), candidate("b", 700)],
            ledger,
            5,
        );
        let plan = s.plan().await.unwrap();
        let ids: Vec<&str> = plan.iter().map(|p| p.video.video_id.as_str()).collect();
        assert_eq!(ids, vec!["b"]);
    }

    #[tokio::test]
    async fn test_quota_skips_processed_and_fills_from_remainder() {
        // Four eligible candidates; 1 and 3 already processed; quota 2
        // selects exactly 2 and 4, in listing order.
        let ledger = Arc::new(Ledger::in_memory().unwrap());
        processed(&ledger, "v1");
        processed(&ledger, "v3");

        let s = scheduler(
            vec![
                candidate("v1", 700),
                candidate("v2", 700),
                candidate("v3", 700),
                candidate("v4", 700),
            ],
            ledger,
            2,
        );
        let plan = s.plan().await.unwrap();
        let ids: Vec<&str> = plan.iter().map(|p| p.video.video_id.as_str()).collect();
        assert_eq!(ids, vec!["v2", "v4"]);
    }

    #[tokio::test]
    async fn test_duration_bounds_are_inclusive() {
        let ledger = Arc::new(Ledger::in_memory().unwrap());
        let s = scheduler(
            vec![
                candidate("too_short", 599),
                candidate("at_min", 600),
                candidate("at_max", 3600),
                candidate("too_long", 3601),
            ],
            ledger,
            10,
        );
        let plan = s.plan().await.unwrap();
        let ids: Vec<&str> = plan.iter().map(|p| p.video.video_id.as_str()).collect();
        assert_eq!(ids, vec!["at_min", "at_max"]);
    }

    #[tokio::test]
    async fn test_unknown_duration_is_not_eligible() {
        let ledger = Arc::new(Ledger::in_memory().unwrap());
        let mut unknown = candidate("mystery", 0);
        unknown.duration_secs = None;

        let s = scheduler(vec![unknown, candidate("known", 700)], ledger, 10);
        let plan = s.plan().await.unwrap();
        assert_eq!(plan.len(), 1);
        assert_eq!(plan[0].video.video_id, "known");
    }

    #[tokio::test]
    async fn test_run_tolerates_single_failure_and_records_successes() {
        let ledger = Arc::new(Ledger::in_memory().unwrap());
        let s = scheduler(
            vec![candidate("ok1", 700), candidate("bad", 700), candidate("ok2", 700)],
            ledger.clone(),
            10,
        );

        let processor = FakeProcessor {
            fail_ids: vec!["bad".to_string()],
        };
        let report = s
            .run(&processor, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(report.processed, vec!["ok1", "ok2"]);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].0, "bad");

        // Only successes land in the ledger
        assert!(ledger.contains("ok1").unwrap());
        assert!(ledger.contains("ok2").unwrap());
        assert!(!ledger.contains("bad").unwrap());
    }

    #[tokio::test]
    async fn test_run_is_idempotent_across_batches() {
        let ledger = Arc::new(Ledger::in_memory().unwrap());
        let s = scheduler(vec![candidate("a", 700)], ledger.clone(), 10);
        let processor = FakeProcessor { fail_ids: vec![] };

        let first = s.run(&processor, &CancellationToken::new()).await.unwrap();
        assert_eq!(first.processed, vec!["a"]);

        // Second run sees the same listing but the ledger now filters it
        let second = s.run(&processor, &CancellationToken::new()).await.unwrap();
        assert!(second.processed.is_empty());
        assert!(second.failed.is_empty());
    }

    #[tokio::test]
    async fn test_same_video_on_two_channels_is_processed_once() {
        // Topic channels mirror uploads, so two listings can carry the
        // same id; the batch must not trip over its own ledger insert.
        let ledger = Arc::new(Ledger::in_memory().unwrap());
        let mut channels = HashMap::new();
        channels.insert("@a".to_string(), vec![candidate("dup", 700)]);
        channels.insert(
            "@b".to_string(),
            vec![candidate("dup", 700), candidate("solo", 700)],
        );
        let s = Scheduler::new(
            Arc::new(FakeLister { channels }),
            ledger.clone(),
            settings(vec!["@a", "@b"], 5),
        );

        let report = s
            .run(&FakeProcessor { fail_ids: vec![] }, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(report.processed, vec!["dup", "solo"]);
        assert!(report.failed.is_empty());
        assert!(ledger.contains("dup").unwrap());
    }

    #[tokio::test]
    async fn test_run_respects_cancellation() {
        let ledger = Arc::new(Ledger::in_memory().unwrap());
        let s = scheduler(vec![candidate("a", 700)], ledger, 10);
        let token = CancellationToken::new();
        token.cancel();

        let err = s
            .run(&FakeProcessor { fail_ids: vec![] }, &token)
            .await
            .unwrap_err();
        assert!(matches!(err, VokalError::Cancelled));
    }
}
