// =============================================================================
// Order Journal - append-only daily record of order requests
// =============================================================================
//
// One block per request in `<log_dir>/orders_YYYY-MM-DD.txt` (UTC date):
//
//   ================================================================
//   Timestamp: 2025-01-01 12:00:00
//   Order Data: {...}
//   Result: {...}        or        ERROR: ...
//   ================================================================
// =============================================================================

use std::fs::OpenOptions;
use std::io::Write;
use std::path::PathBuf;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::Value;
use tracing::debug;

const RULE: &str =
    "================================================================================";

/// Tail of today's journal as served by `/api/logs`.
#[derive(Debug, Clone, Serialize)]
pub struct LogTail {
    pub log_file: String,
    pub total_lines: usize,
    pub returned_lines: usize,
    pub logs: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

pub struct OrderJournal {
    dir: PathBuf,
    write_lock: Mutex<()>,
}

impl OrderJournal {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            write_lock: Mutex::new(()),
        }
    }

    #[cfg(test)]
    pub fn dir(&self) -> &std::path::Path {
        &self.dir
    }

    pub fn file_for(&self, at: DateTime<Utc>) -> PathBuf {
        self.dir.join(format!("orders_{}.txt", at.format("%Y-%m-%d")))
    }

    /// Append one request block. `outcome` is the response on success or the
    /// error message on failure.
    pub fn record(&self, order_data: &Value, outcome: Result<&Value, &str>) -> Result<()> {
        self.record_at(Utc::now(), order_data, outcome)
    }

    pub fn record_at(
        &self,
        at: DateTime<Utc>,
        order_data: &Value,
        outcome: Result<&Value, &str>,
    ) -> Result<()> {
        let _guard = self.write_lock.lock();

        std::fs::create_dir_all(&self.dir)
            .with_context(|| format!("failed to create journal dir {}", self.dir.display()))?;

        let path = self.file_for(at);
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .with_context(|| format!("failed to open journal {}", path.display()))?;

        let mut block = format!(
            "\n{RULE}\nTimestamp: {}\nOrder Data: {}\n",
            at.format("%Y-%m-%d %H:%M:%S"),
            order_data
        );
        match outcome {
            Ok(result) => block.push_str(&format!("Result: {result}\n")),
            Err(error) => block.push_str(&format!("ERROR: {error}\n")),
        }
        block.push_str(RULE);
        block.push('\n');

        file.write_all(block.as_bytes())
            .with_context(|| format!("failed to append to journal {}", path.display()))?;

        debug!(path = %path.display(), "order journal entry written");
        Ok(())
    }

    /// Last `limit` lines of today's journal.
    pub fn read_recent(&self, limit: usize) -> Result<LogTail> {
        self.read_recent_at(Utc::now(), limit)
    }

    pub fn read_recent_at(&self, at: DateTime<Utc>, limit: usize) -> Result<LogTail> {
        let path = self.file_for(at);
        let log_file = path.display().to_string();

        if !path.exists() {
            return Ok(LogTail {
                log_file,
                total_lines: 0,
                returned_lines: 0,
                logs: String::new(),
                message: Some("No order log found for today".to_string()),
            });
        }

        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("failed to read journal {}", path.display()))?;
        let lines: Vec<&str> = content.lines().collect();
        let start = lines.len().saturating_sub(limit);
        let recent = &lines[start..];

        let mut logs = recent.join("\n");
        if !recent.is_empty() {
            logs.push('\n');
        }

        Ok(LogTail {
            log_file,
            total_lines: lines.len(),
            returned_lines: recent.len(),
            logs,
            message: None,
        })
    }
}

impl std::fmt::Debug for OrderJournal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OrderJournal").field("dir", &self.dir).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    fn temp_journal() -> OrderJournal {
        OrderJournal::new(std::env::temp_dir().join(format!("journal-{}", uuid::Uuid::new_v4())))
    }

    #[test]
    fn daily_file_name() {
        let journal = OrderJournal::new("logs");
        let at = Utc.with_ymd_and_hms(2025, 3, 9, 23, 59, 0).unwrap();
        assert_eq!(journal.file_for(at), PathBuf::from("logs/orders_2025-03-09.txt"));
    }

    #[test]
    fn records_success_and_error_blocks() {
        let journal = temp_journal();
        let at = Utc.with_ymd_and_hms(2025, 1, 2, 10, 0, 0).unwrap();
        let order = json!({ "symbol": "BTC", "side": "buy" });

        journal
            .record_at(at, &order, Ok(&json!({ "success": true })))
            .unwrap();
        journal
            .record_at(at, &order, Err("Error creating order: relay down"))
            .unwrap();

        let tail = journal.read_recent_at(at, 1_000).unwrap();
        assert!(tail.message.is_none());
        assert_eq!(tail.total_lines, 12);
        assert!(tail.logs.contains("Timestamp: 2025-01-02 10:00:00"));
        assert!(tail.logs.contains(r#"Result: {"success":true}"#));
        assert!(tail.logs.contains("ERROR: Error creating order: relay down"));

        let last_two = journal.read_recent_at(at, 2).unwrap();
        assert_eq!(last_two.returned_lines, 2);
        assert!(last_two.logs.starts_with("ERROR:"));

        std::fs::remove_dir_all(journal.dir()).unwrap();
    }

    #[test]
    fn missing_file_yields_empty_tail() {
        let journal = temp_journal();
        let tail = journal.read_recent(50).unwrap();
        assert_eq!(tail.total_lines, 0);
        assert!(tail.logs.is_empty());
        assert!(tail.message.is_some());
    }
}
