//! Process command - run the pipeline on a single video.

use crate::cli::{preflight, Output};
use crate::config::Settings;
use crate::processor::{ChainProcessor, VideoProcessor};
use crate::source::{resolve_input, Input};
use anyhow::Result;
use tokio_util::sync::CancellationToken;

/// Run the process command.
pub async fn run_process(
    input: &str,
    title: Option<String>,
    publish: bool,
    keep: bool,
    mut settings: Settings,
) -> Result<()> {
    let resolved = resolve_input(input)?;
    let operation = match &resolved {
        Input::Local { .. } => preflight::Operation::ProcessLocal,
        Input::Remote(_) => preflight::Operation::Process,
    };
    preflight::check(operation)?;

    if keep {
        settings.general.keep_intermediates = true;
    }
    if publish {
        settings.publish.enabled = true;
    }

    let cancel = CancellationToken::new();
    spawn_ctrl_c_handler(cancel.clone());

    let processor = ChainProcessor::from_settings(&settings, cancel)?;

    let spinner = Output::spinner("Processing...");
    let result = match &resolved {
        Input::Local { path, video } => {
            Output::info(&format!("Processing local file {}", path.display()));
            let title = title.as_deref().unwrap_or(&video.id).to_string();
            processor.process_local(path, &video.id, &title).await
        }
        Input::Remote(video) => {
            Output::info(&format!("Processing {}", video.url));
            let title = title.as_deref().unwrap_or(&video.id).to_string();
            processor.process(video, &title).await
        }
    };
    spinner.finish_and_clear();

    match result {
        Ok(processed) => {
            Output::success(&format!("Wrote {}", processed.output_path.display()));
            if let Some(upload_id) = processed.upload_id {
                Output::kv("Upload id", &upload_id);
            }
            Ok(())
        }
        Err(e) => {
            Output::error(&format!("Processing failed: {}", e));
            Err(e.into())
        }
    }
}

/// Cancel in-flight work on Ctrl-C; a second Ctrl-C kills the process.
fn spawn_ctrl_c_handler(cancel: CancellationToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            Output::warning("Interrupted, stopping after the current step...");
            cancel.cancel();
        }
    });
}
