//! List command - show the processed-video ledger.

use crate::cli::Output;
use crate::config::Settings;
use crate::ledger::Ledger;
use anyhow::Result;

/// Run the list command.
pub fn run_list(settings: Settings) -> Result<()> {
    let ledger_path = settings.ledger_path();
    if !ledger_path.exists() {
        Output::info("No videos processed yet. Use 'vokal process <input>' to get started.");
        return Ok(());
    }

    let ledger = Ledger::new(&ledger_path)?;
    let entries = ledger.all()?;

    if entries.is_empty() {
        Output::info("The ledger is empty.");
        return Ok(());
    }

    Output::header(&format!("Processed Videos ({})", entries.len()));
    println!();

    for entry in &entries {
        let title = entry.title.as_deref().unwrap_or("(untitled)");
        let mut detail = entry.processed_at.format("%Y-%m-%d").to_string();
        if let Some(channel) = &entry.channel {
            detail = format!("{}, {}", channel, detail);
        }
        if entry.upload_id.is_some() {
            detail.push_str(", published");
        }
        Output::video_info(title, &entry.video_id, &detail);
    }

    Ok(())
}
