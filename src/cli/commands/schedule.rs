//! Schedule command - unattended batch run over configured channels.

use crate::cli::{format_duration, preflight, Output};
use crate::config::Settings;
use crate::ledger::Ledger;
use crate::listing::YtDlpLister;
use crate::processor::ChainProcessor;
use crate::scheduler::Scheduler;
use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Run the schedule command.
pub async fn run_schedule(dry_run: bool, settings: Settings) -> Result<()> {
    preflight::check(preflight::Operation::Schedule)?;

    if settings.scheduler.channels.is_empty() {
        Output::warning("No channels configured. Add them under [scheduler] in the config.");
        return Ok(());
    }

    let ledger = Arc::new(Ledger::new(&settings.ledger_path())?);
    let scheduler = Scheduler::new(
        Arc::new(YtDlpLister::new(Duration::from_secs(
            settings.scheduler.listing_timeout_secs,
        ))),
        ledger,
        settings.scheduler.clone(),
    );

    if dry_run {
        let plan = scheduler.plan().await?;
        if plan.is_empty() {
            Output::info("Nothing new to process.");
            return Ok(());
        }
        Output::header(&format!("Planned ({})", plan.len()));
        println!();
        for planned in &plan {
            let duration = planned
                .video
                .duration_secs
                .map(format_duration)
                .unwrap_or_else(|| "unknown".to_string());
            Output::video_info(
                &planned.video.title,
                &planned.video.video_id,
                &format!("{}, {}", planned.channel, duration),
            );
        }
        return Ok(());
    }

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                Output::warning("Interrupted, finishing the current video...");
                cancel.cancel();
            }
        });
    }

    let processor = ChainProcessor::from_settings(&settings, cancel.clone())?;
    let report = scheduler.run(&processor, &cancel).await?;

    println!();
    Output::kv("Processed", &report.processed.len().to_string());
    Output::kv("Failed", &report.failed.len().to_string());
    for (video_id, reason) in &report.failed {
        Output::warning(&format!("{}: {}", video_id, reason));
    }

    if report.failed.is_empty() {
        Output::success("Batch complete.");
    } else {
        Output::warning("Batch complete with failures.");
    }
    Ok(())
}
