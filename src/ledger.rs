//! The processed-video ledger.
//!
//! A persistent record of every video that completed the pipeline, keyed by
//! video ID. The scheduler consults it to skip videos across runs and
//! records each success exactly once; recording a duplicate is an error so
//! double-processing never passes silently.

use crate::error::{Result, VokalError};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};
use std::path::Path;
use std::sync::Mutex;
use tracing::{info, instrument};

/// One processed video.
#[derive(Debug, Clone, PartialEq)]
pub struct LedgerEntry {
    pub video_id: String,
    pub channel: Option<String>,
    pub title: Option<String>,
    pub processed_at: DateTime<Utc>,
    /// Identifier returned by the publisher, when publishing ran.
    pub upload_id: Option<String>,
}

pub struct Ledger {
    conn: Mutex<Connection>,
}

const SCHEMA: &str = r#"
    CREATE TABLE IF NOT EXISTS processed (
        video_id TEXT PRIMARY KEY,
        channel TEXT,
        title TEXT,
        processed_at TEXT NOT NULL,
        upload_id TEXT
    );

    CREATE INDEX IF NOT EXISTS idx_processed_channel ON processed(channel);
"#;

impl Ledger {
    /// Open (or create) the ledger database at `path`.
    #[instrument(skip_all)]
    pub fn new(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)?;

        // WAL so a crashed run never corrupts the ledger
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        conn.execute_batch(SCHEMA)?;

        info!("Opened ledger at {:?}", path);

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// In-memory ledger (useful for testing).
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Whether a video has already been processed.
    pub fn contains(&self, video_id: &str) -> Result<bool> {
        let conn = self.conn.lock().map_err(|_| poisoned())?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM processed WHERE video_id = ?1",
            params![video_id],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    /// Record a processed video. Recording an ID already in the ledger is a
    /// [`VokalError::DuplicateEntry`] and leaves the ledger unchanged.
    pub fn record(&self, entry: &LedgerEntry) -> Result<()> {
        let conn = self.conn.lock().map_err(|_| poisoned())?;
        let result = conn.execute(
            "INSERT INTO processed (video_id, channel, title, processed_at, upload_id)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                entry.video_id,
                entry.channel,
                entry.title,
                entry.processed_at.to_rfc3339(),
                entry.upload_id,
            ],
        );

        match result {
            Ok(_) => Ok(()),
            Err(rusqlite::Error::SqliteFailure(e, _))
                if e.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                Err(VokalError::DuplicateEntry(entry.video_id.clone()))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// All entries in insertion order.
    pub fn all(&self) -> Result<Vec<LedgerEntry>> {
        let conn = self.conn.lock().map_err(|_| poisoned())?;
        let mut stmt = conn.prepare(
            "SELECT video_id, channel, title, processed_at, upload_id
             FROM processed ORDER BY rowid",
        )?;

        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, Option<String>>(1)?,
                row.get::<_, Option<String>>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, Option<String>>(4)?,
            ))
        })?;

        let mut entries = Vec::new();
        for row in rows {
            let (video_id, channel, title, processed_at, upload_id) = row?;
            let processed_at = DateTime::parse_from_rfc3339(&processed_at)
                .map_err(|e| VokalError::Config(format!("corrupt ledger timestamp: {e}")))?
                .with_timezone(&Utc);
            entries.push(LedgerEntry {
                video_id,
                channel,
                title,
                processed_at,
                upload_id,
            });
        }
        Ok(entries)
    }

    /// Number of processed videos.
    pub fn len(&self) -> Result<usize> {
        let conn = self.conn.lock().map_err(|_| poisoned())?;
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM processed", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }
}

fn poisoned() -> VokalError {
    VokalError::Config("ledger lock poisoned".into())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(video_id: &str) -> LedgerEntry {
        LedgerEntry {
            video_id: video_id.to_string(),
            channel: Some("@somechannel".to_string()),
            title: Some("A title".to_string()),
            processed_at: Utc::now(),
            upload_id: None,
        }
    }

    #[test]
    fn test_record_then_contains() {
        let ledger = Ledger::in_memory().unwrap();
        assert!(!ledger.contains("abc123").unwrap());

        ledger.record(&entry("abc123")).unwrap();
        assert!(ledger.contains("abc123").unwrap());
        assert!(!ledger.contains("other").unwrap());
    }

    #[test]
    fn test_duplicate_record_is_rejected_and_ledger_unchanged() {
        let ledger = Ledger::in_memory().unwrap();
        ledger.record(&entry("abc123")).unwrap();

        let err = ledger.record(&entry("abc123")).unwrap_err();
        match err {
            VokalError::DuplicateEntry(id) => assert_eq!(id, "abc123"),
            other => panic!("expected DuplicateEntry, got {:?}", other),
        }

        assert_eq!(ledger.len().unwrap(), 1);
    }

    #[test]
    fn test_all_preserves_insertion_order() {
        let ledger = Ledger::in_memory().unwrap();
        for id in ["first", "second", "third"] {
            ledger.record(&entry(id)).unwrap();
        }

        let ids: Vec<String> = ledger
            .all()
            .unwrap()
            .into_iter()
            .map(|e| e.video_id)
            .collect();
        assert_eq!(ids, vec!["first", "second", "third"]);
    }

    #[test]
    fn test_timestamps_roundtrip() {
        let ledger = Ledger::in_memory().unwrap();
        let original = entry("abc123");
        ledger.record(&original).unwrap();

        let restored = &ledger.all().unwrap()[0];
        assert_eq!(
            restored.processed_at.timestamp(),
            original.processed_at.timestamp()
        );
        assert_eq!(restored.channel, original.channel);
    }
}
