//! Broker adapter: asynq-shaped task queues on Redis.
//!
//! The broker owns every state transition. Each queue is a family of keys
//! under the `tq:` prefix:
//!
//! - `tq:{queue}:pending`    LIST, producers LPUSH / workers RPOP
//! - `tq:{queue}:active`     LIST of in-flight task ids
//! - `tq:{queue}:scheduled`  ZSET scored by dispatch time (unix ms)
//! - `tq:{queue}:retry`      ZSET scored by next retry time (unix ms)
//! - `tq:{queue}:archived`   ZSET scored by archive time
//! - `tq:{queue}:completed`  ZSET scored by completion time
//! - `tq:{queue}:paused`     flag key; present while the queue is paused
//! - `tq:task:{queue}:{id}`  HASH holding the task record
//! - `tq:queues`             SET of every queue ever seen
//! - `tq:unique:{digest}`    uniqueness-window guard (`SET NX PX`)
//!
//! Cancellation requests fan out on the `tq:cancel` pub/sub channel.

mod redis_broker;

pub use redis_broker::RedisBroker;

use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::task::TaskState;

pub(crate) const QUEUES_KEY: &str = "tq:queues";
pub(crate) const CANCEL_CHANNEL: &str = "tq:cancel";

/// How long terminal task records stay inspectable.
pub(crate) const RETENTION: Duration = Duration::from_secs(24 * 60 * 60);

pub(crate) fn pending_key(queue: &str) -> String {
    format!("tq:{queue}:pending")
}

pub(crate) fn active_key(queue: &str) -> String {
    format!("tq:{queue}:active")
}

pub(crate) fn scheduled_key(queue: &str) -> String {
    format!("tq:{queue}:scheduled")
}

pub(crate) fn retry_key(queue: &str) -> String {
    format!("tq:{queue}:retry")
}

pub(crate) fn archived_key(queue: &str) -> String {
    format!("tq:{queue}:archived")
}

pub(crate) fn completed_key(queue: &str) -> String {
    format!("tq:{queue}:completed")
}

pub(crate) fn paused_key(queue: &str) -> String {
    format!("tq:{queue}:paused")
}

pub(crate) fn task_key(queue: &str, id: &str) -> String {
    format!("tq:task:{queue}:{id}")
}

pub(crate) fn task_key_prefix(queue: &str) -> String {
    format!("tq:task:{queue}:")
}

pub(crate) fn unique_key(digest: &str) -> String {
    format!("tq:unique:{digest}")
}

/// Result of a successful enqueue.
#[derive(Debug, Clone)]
pub struct EnqueuedTask {
    pub id: String,
    pub queue: String,
    pub state: TaskState,
}

/// Snapshot of a task record as stored by the broker.
#[derive(Debug, Clone)]
pub struct TaskInfo {
    pub id: String,
    pub queue: String,
    pub kind: String,
    pub state: TaskState,
    pub max_retries: u32,
    pub retried: u32,
    pub last_err: Option<String>,
    /// Next dispatch time for scheduled / retry tasks.
    pub next_process_at: Option<DateTime<Utc>>,
}

/// A task leased to a worker; carries everything a handler needs.
#[derive(Debug, Clone)]
pub struct DequeuedTask {
    pub id: String,
    pub queue: String,
    pub kind: String,
    pub payload: Vec<u8>,
    pub max_retries: u32,
    pub retried: u32,
    pub timeout: Duration,
    pub metadata: HashMap<String, String>,
    pub cancel_requested: bool,
}

/// Per-state counts for one queue.
#[derive(Debug, Clone, serde::Serialize)]
pub struct QueueStats {
    pub queue: String,
    pub pending: u64,
    pub active: u64,
    pub scheduled: u64,
    pub retry: u64,
    pub archived: u64,
    pub completed: u64,
    pub paused: bool,
}

/// Deterministic retry backoff for the n-th failure (0-based).
///
/// Polynomial shape borrowed from asynq's default: `15 + (n+1)^4` seconds,
/// capped at 24 hours.
pub fn retry_backoff(retried: u32) -> Duration {
    let n = u64::from(retried) + 1;
    let secs = 15 + n.saturating_mul(n).saturating_mul(n).saturating_mul(n);
    Duration::from_secs(secs.min(24 * 60 * 60))
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn key_layout_is_stable() {
        assert_eq!(pending_key("default"), "tq:default:pending");
        assert_eq!(scheduled_key("critical"), "tq:critical:scheduled");
        assert_eq!(task_key("low", "abc"), "tq:task:low:abc");
        assert_eq!(task_key_prefix("low"), "tq:task:low:");
        assert_eq!(unique_key("deadbeef"), "tq:unique:deadbeef");
    }

    #[test]
    fn backoff_is_deterministic_and_monotonic() {
        assert_eq!(retry_backoff(0), Duration::from_secs(16));
        assert_eq!(retry_backoff(1), Duration::from_secs(31));
        assert_eq!(retry_backoff(2), Duration::from_secs(96));
        let mut prev = Duration::ZERO;
        for n in 0..20 {
            let d = retry_backoff(n);
            assert!(d >= prev);
            prev = d;
        }
    }

    #[test]
    fn backoff_is_capped_at_a_day() {
        assert_eq!(retry_backoff(1000), Duration::from_secs(24 * 60 * 60));
    }
}
