//! CLI module for Vokal.

pub mod commands;
mod output;
pub mod preflight;

pub use output::{format_duration, Output};

use clap::{Parser, Subcommand};

/// Vokal - Background-music removal for videos
///
/// Acquires a video from a URL or local file, strips the background music
/// while preserving the vocals, and writes a remuxed copy.
#[derive(Parser, Debug)]
#[command(name = "vokal")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Increase verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Path to configuration file
    #[arg(short, long, global = true)]
    pub config: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Process one video: acquire, isolate vocals, remux
    Process {
        /// YouTube URL/ID, or local video file path
        input: String,

        /// Title passed to the uploader when publishing
        #[arg(short, long)]
        title: Option<String>,

        /// Publish the finished video (requires publish.command in config)
        #[arg(short, long)]
        publish: bool,

        /// Keep the run's intermediate files for inspection
        #[arg(long)]
        keep: bool,
    },

    /// Run a batch over the configured channels
    Schedule {
        /// Show what would be processed without doing anything
        #[arg(long)]
        dry_run: bool,
    },

    /// List videos recorded in the ledger
    List,

    /// Check system requirements and configuration
    Doctor,

    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Show current configuration
    Show,

    /// Show configuration file path
    Path,

    /// Write a default configuration file
    Init,
}
