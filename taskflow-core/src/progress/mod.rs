//! Per-task progress log on Redis streams.
//!
//! Each task owns one append-only stream keyed `progress:<task_id>`. The
//! [`Publisher`] appends entries with an approximate length cap and a TTL
//! that is set once per key; the [`Subscriber`] blocks-and-reads, replays
//! history, and merges multiple task streams into a single tagged channel.
//!
//! Within one stream, entries are totally ordered by their stream id and at
//! most one entry carries `is_final=true`; nothing is published after it.

mod publisher;
mod subscriber;

pub use publisher::Publisher;
pub use subscriber::Subscriber;

use std::collections::HashMap;
use std::time::Duration;

use chrono::Utc;
use serde::Serialize;

pub(crate) fn stream_key(task_id: &str) -> String {
    format!("progress:{task_id}")
}

/// Stream tuning knobs; see `progress.{max_len,ttl,read_timeout}` config.
#[derive(Debug, Clone)]
pub struct StreamOptions {
    /// Approximate length cap; newest entries win.
    pub max_len: u64,
    /// Key TTL, set when the stream gets its first entry.
    pub ttl: Duration,
    /// Upper bound of one blocking read; the subscription re-polls after it.
    pub read_timeout: Duration,
}

impl Default for StreamOptions {
    fn default() -> Self {
        Self {
            max_len: 1000,
            ttl: Duration::from_secs(60 * 60),
            read_timeout: Duration::from_secs(30),
        }
    }
}

/// One progress report from a handler.
#[derive(Debug, Clone, Serialize)]
pub struct Progress {
    pub task_id: String,
    pub percentage: i32,
    pub stage: String,
    pub message: String,
    pub timestamp_ms: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<HashMap<String, String>>,
}

impl Progress {
    pub fn new(
        task_id: impl Into<String>,
        percentage: i32,
        stage: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            task_id: task_id.into(),
            percentage,
            stage: stage.into(),
            message: message.into(),
            timestamp_ms: Utc::now().timestamp_millis(),
            metadata: None,
        }
    }
}

/// Terminal status recorded by the final entry of a stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompletionStatus {
    Completed,
    Failed,
    Cancelled,
}

impl CompletionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CompletionStatus::Completed => "completed",
            CompletionStatus::Failed => "failed",
            CompletionStatus::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for CompletionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A parsed stream entry as delivered to subscribers.
#[derive(Debug, Clone, Serialize)]
pub struct ProgressEntry {
    pub stream_id: String,
    pub progress: Progress,
    pub is_final: bool,
    /// Terminal status; present only when `is_final` is set.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
}

/// Metadata about a task's stream.
#[derive(Debug, Clone, Serialize)]
pub struct StreamInfo {
    pub has_progress: bool,
    pub length: u64,
    pub first_entry: Option<String>,
    pub last_entry: Option<String>,
}

/// Tolerant decoding of a raw stream entry; malformed fields fall back to
/// defaults rather than failing the subscription.
pub(crate) fn parse_entry(
    task_id: &str,
    stream_id: &str,
    fields: &HashMap<String, redis::Value>,
) -> ProgressEntry {
    fn get_string(fields: &HashMap<String, redis::Value>, key: &str) -> Option<String> {
        fields
            .get(key)
            .and_then(|v| redis::from_redis_value::<String>(v).ok())
    }

    let percentage = get_string(fields, "percentage")
        .and_then(|v| v.parse().ok())
        .unwrap_or(0);
    let timestamp_ms = get_string(fields, "timestamp_ms")
        .and_then(|v| v.parse().ok())
        .unwrap_or(0);
    let metadata = get_string(fields, "metadata")
        .filter(|m| !m.is_empty())
        .and_then(|m| serde_json::from_str(&m).ok());

    let is_final = get_string(fields, "is_final").as_deref() == Some("true");
    let status = if is_final {
        get_string(fields, "status")
    } else {
        None
    };

    ProgressEntry {
        stream_id: stream_id.to_owned(),
        progress: Progress {
            task_id: task_id.to_owned(),
            percentage,
            stage: get_string(fields, "stage").unwrap_or_default(),
            message: get_string(fields, "message").unwrap_or_default(),
            timestamp_ms,
            metadata,
        },
        is_final,
        status,
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn value(s: &str) -> redis::Value {
        redis::Value::BulkString(s.as_bytes().to_vec())
    }

    #[test]
    fn parse_entry_reads_all_fields() {
        let mut fields = HashMap::new();
        fields.insert("percentage".to_owned(), value("60"));
        fields.insert("stage".to_owned(), value("working"));
        fields.insert("message".to_owned(), value("more than half"));
        fields.insert("timestamp_ms".to_owned(), value("1700000000000"));
        fields.insert("metadata".to_owned(), value(r#"{"node":"w1"}"#));

        let entry = parse_entry("t1", "1-0", &fields);
        assert_eq!(entry.progress.percentage, 60);
        assert_eq!(entry.progress.stage, "working");
        assert_eq!(entry.stream_id, "1-0");
        assert!(!entry.is_final);
        assert!(entry.status.is_none());
        assert_eq!(
            entry.progress.metadata.unwrap().get("node").map(String::as_str),
            Some("w1")
        );
    }

    #[test]
    fn parse_entry_detects_final_status() {
        let mut fields = HashMap::new();
        fields.insert("is_final".to_owned(), value("true"));
        fields.insert("status".to_owned(), value("failed"));

        let entry = parse_entry("t1", "2-0", &fields);
        assert!(entry.is_final);
        assert_eq!(entry.status.as_deref(), Some("failed"));
    }

    #[test]
    fn parse_entry_tolerates_garbage() {
        let mut fields = HashMap::new();
        fields.insert("percentage".to_owned(), value("not-a-number"));

        let entry = parse_entry("t1", "3-0", &fields);
        assert_eq!(entry.progress.percentage, 0);
        assert_eq!(entry.progress.stage, "");
    }

    #[test]
    fn status_only_surfaces_on_final_entries() {
        let mut fields = HashMap::new();
        fields.insert("status".to_owned(), value("completed"));

        let entry = parse_entry("t1", "4-0", &fields);
        assert!(entry.status.is_none());
    }

    #[test]
    fn stream_key_layout() {
        assert_eq!(stream_key("abc"), "progress:abc");
    }
}
