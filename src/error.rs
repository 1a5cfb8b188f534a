//! Error types for Vokal.

use thiserror::Error;

/// Library-level error type for Vokal operations.
#[derive(Error, Debug)]
pub enum VokalError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("External tool not found: {0}. Please install it and ensure it's in your PATH.")]
    ToolNotFound(String),

    #[error(transparent)]
    Acquisition(#[from] crate::acquire::AllMethodsExhausted),

    #[error("Audio extraction failed (exit code {exit_code:?}): {stderr}")]
    Extraction {
        exit_code: Option<i32>,
        stderr: String,
    },

    #[error("Vocal isolation failed: {0}")]
    Isolation(String),

    #[error("Remux failed (exit code {exit_code:?}): {stderr}")]
    Remux {
        exit_code: Option<i32>,
        stderr: String,
    },

    #[error("Video {0} is already recorded in the ledger")]
    DuplicateEntry(String),

    #[error("Channel listing failed: {0}")]
    Listing(String),

    #[error("Publish failed: {0}")]
    Publish(String),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),
}

/// Result type alias for Vokal operations.
pub type Result<T> = std::result::Result<T, VokalError>;
