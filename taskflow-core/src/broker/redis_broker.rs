//! Redis implementation of the broker adapter.
//!
//! All multi-key transitions go through either an atomic pipeline or a small
//! Lua script where a read-modify-write cannot be expressed as a pipeline
//! (dequeue, due-forwarding, delete).

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{TimeZone, Utc};
use futures::{Stream, StreamExt};
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Script};
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::BrokerError;
use crate::task::{EnqueueOptions, NewTask, TaskState};

use super::{
    active_key, archived_key, completed_key, paused_key, pending_key, retry_key, scheduled_key,
    task_key, task_key_prefix, unique_key, CANCEL_CHANNEL, DequeuedTask, EnqueuedTask, QueueStats,
    QUEUES_KEY, RETENTION, TaskInfo,
};

/// Pops one pending task and moves it to the active list, unless the queue is
/// paused. KEYS: pending, active, paused; ARGV: task-key prefix.
const DEQUEUE_SCRIPT: &str = r#"
if redis.call('EXISTS', KEYS[3]) == 1 then
  return false
end
local id = redis.call('RPOP', KEYS[1])
if not id then
  return false
end
redis.call('LPUSH', KEYS[2], id)
redis.call('HSET', ARGV[1] .. id, 'state', 'active')
return id
"#;

/// Moves due members of the scheduled and retry sets back to pending.
/// KEYS: scheduled, retry, pending; ARGV: task-key prefix, now (unix ms).
const FORWARD_SCRIPT: &str = r#"
local moved = 0
for i = 1, 2 do
  local due = redis.call('ZRANGEBYSCORE', KEYS[i], '-inf', ARGV[2], 'LIMIT', 0, 100)
  for _, id in ipairs(due) do
    redis.call('ZREM', KEYS[i], id)
    redis.call('LPUSH', KEYS[3], id)
    redis.call('HSET', ARGV[1] .. id, 'state', 'pending')
    moved = moved + 1
  end
end
return moved
"#;

/// Removes a task from whichever container its state points at, then deletes
/// the record. Returns 1 on success, 0 when unknown, -1 when active.
/// KEYS: pending, scheduled, retry, archived, completed;
/// ARGV: task hash key, task id.
const DELETE_SCRIPT: &str = r#"
local state = redis.call('HGET', ARGV[1], 'state')
if not state then
  return 0
end
if state == 'active' then
  return -1
end
if state == 'pending' then
  redis.call('LREM', KEYS[1], 0, ARGV[2])
elseif state == 'scheduled' then
  redis.call('ZREM', KEYS[2], ARGV[2])
elseif state == 'retry' then
  redis.call('ZREM', KEYS[3], ARGV[2])
elseif state == 'archived' then
  redis.call('ZREM', KEYS[4], ARGV[2])
elseif state == 'completed' then
  redis.call('ZREM', KEYS[5], ARGV[2])
end
redis.call('DEL', ARGV[1])
return 1
"#;

/// Broker adapter backed by Redis.
///
/// Cloning is cheap; all clones share the underlying multiplexed connection.
#[derive(Clone)]
pub struct RedisBroker {
    client: redis::Client,
    conn: ConnectionManager,
    dequeue: Arc<Script>,
    forward: Arc<Script>,
    delete: Arc<Script>,
}

impl std::fmt::Debug for RedisBroker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisBroker").finish()
    }
}

impl RedisBroker {
    /// Connect to Redis at `addr` (host:port) using database `db`.
    pub async fn connect(addr: &str, password: &str, db: i64) -> Result<Self, BrokerError> {
        let url = if password.is_empty() {
            format!("redis://{addr}/{db}")
        } else {
            format!("redis://:{password}@{addr}/{db}")
        };
        let client = redis::Client::open(url)?;
        let conn = client.get_connection_manager().await?;
        info!(%addr, db, "connected to redis broker");
        Ok(Self {
            client,
            conn,
            dequeue: Arc::new(Script::new(DEQUEUE_SCRIPT)),
            forward: Arc::new(Script::new(FORWARD_SCRIPT)),
            delete: Arc::new(Script::new(DELETE_SCRIPT)),
        })
    }

    /// Handle to the shared multiplexed connection, for components living in
    /// the same store (progress publisher / subscriber).
    pub fn connection(&self) -> ConnectionManager {
        self.conn.clone()
    }

    /// The underlying client, for components that need dedicated connections
    /// (blocking stream reads, pub/sub).
    pub fn client(&self) -> redis::Client {
        self.client.clone()
    }

    /// Liveness probe used by health endpoints.
    pub async fn ping(&self) -> Result<(), BrokerError> {
        let mut conn = self.connection();
        redis::cmd("PING").query_async::<()>(&mut conn).await?;
        Ok(())
    }

    // ── Enqueue ──────────────────────────────────────────────────────────────

    /// Persist a task and place it in its queue.
    ///
    /// Fails with [`BrokerError::AlreadyExists`] when the id is already known
    /// or a uniqueness window for the same (kind, queue, payload) is live.
    pub async fn enqueue(
        &self,
        task: NewTask,
        opts: EnqueueOptions,
    ) -> Result<EnqueuedTask, BrokerError> {
        let id = task.id.unwrap_or_else(|| Uuid::new_v4().to_string());
        let queue = opts.queue.clone();
        let mut conn = self.connection();

        let key = task_key(&queue, &id);
        if conn.exists::<_, bool>(&key).await? {
            return Err(BrokerError::AlreadyExists);
        }

        if let Some(window) = opts.unique {
            let digest = unique_digest(task.kind.as_str(), &queue, &task.payload);
            let guard = unique_key(&digest);
            let claimed: Option<String> = redis::cmd("SET")
                .arg(&guard)
                .arg(&id)
                .arg("NX")
                .arg("PX")
                .arg(window.as_millis() as u64)
                .query_async(&mut conn)
                .await?;
            if claimed.is_none() {
                debug!(task_id = %id, %queue, "uniqueness window collision");
                return Err(BrokerError::AlreadyExists);
            }
        }

        let now = Utc::now();
        // Past dispatch times are clamped to immediate.
        let process_at = opts.process_at.filter(|at| *at > now);
        let state = if process_at.is_some() {
            TaskState::Scheduled
        } else {
            TaskState::Pending
        };

        let metadata = serde_json::to_string(&task.metadata)
            .map_err(|e| BrokerError::Corrupt(e.to_string()))?;
        let fields: Vec<(&str, String)> = vec![
            ("id", id.clone()),
            ("kind", task.kind.as_str().to_owned()),
            (
                "payload",
                String::from_utf8(task.payload.clone())
                    .map_err(|e| BrokerError::Corrupt(e.to_string()))?,
            ),
            ("state", state.as_str().to_owned()),
            ("max_retries", opts.max_retries.to_string()),
            ("retried", "0".to_owned()),
            ("timeout_ms", (opts.timeout.as_millis() as u64).to_string()),
            ("enqueued_at", now.timestamp_millis().to_string()),
            ("metadata", metadata),
            ("cancel_requested", "0".to_owned()),
        ];

        let mut pipe = redis::pipe();
        pipe.atomic();
        pipe.hset_multiple(&key, &fields).ignore();
        pipe.sadd(QUEUES_KEY, &queue).ignore();
        match process_at {
            Some(at) => {
                pipe.hset(&key, "process_at", at.timestamp_millis()).ignore();
                pipe.zadd(scheduled_key(&queue), &id, at.timestamp_millis())
                    .ignore();
            }
            None => {
                pipe.lpush(pending_key(&queue), &id).ignore();
            }
        }
        pipe.query_async::<()>(&mut conn).await?;

        debug!(task_id = %id, %queue, state = %state, "task enqueued");
        Ok(EnqueuedTask { id, queue, state })
    }

    // ── Worker-facing transitions ────────────────────────────────────────────

    /// Lease the next pending task from `queue`, if any.
    pub async fn dequeue(&self, queue: &str) -> Result<Option<DequeuedTask>, BrokerError> {
        let mut conn = self.connection();
        let id: Option<String> = self
            .dequeue
            .key(pending_key(queue))
            .key(active_key(queue))
            .key(paused_key(queue))
            .arg(task_key_prefix(queue))
            .invoke_async(&mut conn)
            .await?;

        let Some(id) = id else { return Ok(None) };

        let hash: HashMap<String, String> = conn.hgetall(task_key(queue, &id)).await?;
        if hash.is_empty() {
            // Orphaned id without a record; drop it from the active list.
            warn!(task_id = %id, %queue, "dequeued id without task record");
            let _: () = conn.lrem(active_key(queue), 0, &id).await?;
            return Ok(None);
        }
        Ok(Some(dequeued_from_hash(queue, &id, &hash)?))
    }

    /// Move due scheduled / retry tasks back to pending. Returns the number
    /// of tasks forwarded.
    pub async fn forward_due(&self, queue: &str) -> Result<u64, BrokerError> {
        let mut conn = self.connection();
        let moved: u64 = self
            .forward
            .key(scheduled_key(queue))
            .key(retry_key(queue))
            .key(pending_key(queue))
            .arg(task_key_prefix(queue))
            .arg(Utc::now().timestamp_millis())
            .invoke_async(&mut conn)
            .await?;
        if moved > 0 {
            debug!(%queue, moved, "forwarded due tasks");
        }
        Ok(moved)
    }

    /// Mark an active task as completed.
    pub async fn complete(&self, queue: &str, id: &str) -> Result<(), BrokerError> {
        let mut conn = self.connection();
        let key = task_key(queue, id);
        let mut pipe = redis::pipe();
        pipe.atomic();
        pipe.lrem(active_key(queue), 0, id).ignore();
        pipe.hset(&key, "state", TaskState::Completed.as_str()).ignore();
        pipe.hset(&key, "completed_at", Utc::now().timestamp_millis())
            .ignore();
        pipe.zadd(completed_key(queue), id, Utc::now().timestamp_millis())
            .ignore();
        pipe.expire(&key, RETENTION.as_secs() as i64).ignore();
        pipe.query_async::<()>(&mut conn).await?;
        Ok(())
    }

    /// Schedule a retry of an active task after `delay`, recording the error
    /// and incrementing the retry counter.
    pub async fn retry(
        &self,
        queue: &str,
        id: &str,
        err: &str,
        delay: Duration,
    ) -> Result<(), BrokerError> {
        let mut conn = self.connection();
        let key = task_key(queue, id);
        let next_at = Utc::now().timestamp_millis() + delay.as_millis() as i64;
        let mut pipe = redis::pipe();
        pipe.atomic();
        pipe.lrem(active_key(queue), 0, id).ignore();
        pipe.hincr(&key, "retried", 1).ignore();
        pipe.hset(&key, "state", TaskState::Retry.as_str()).ignore();
        pipe.hset(&key, "last_err", err).ignore();
        pipe.hset(&key, "process_at", next_at).ignore();
        pipe.zadd(retry_key(queue), id, next_at).ignore();
        pipe.query_async::<()>(&mut conn).await?;
        Ok(())
    }

    /// Archive an active task immediately (retry exhaustion or `SkipRetry`).
    pub async fn archive(&self, queue: &str, id: &str, err: &str) -> Result<(), BrokerError> {
        let mut conn = self.connection();
        let key = task_key(queue, id);
        let mut pipe = redis::pipe();
        pipe.atomic();
        pipe.lrem(active_key(queue), 0, id).ignore();
        pipe.hset(&key, "state", TaskState::Archived.as_str()).ignore();
        pipe.hset(&key, "last_err", err).ignore();
        pipe.zadd(archived_key(queue), id, Utc::now().timestamp_millis())
            .ignore();
        pipe.expire(&key, RETENTION.as_secs() as i64).ignore();
        pipe.query_async::<()>(&mut conn).await?;
        Ok(())
    }

    // ── Inspection ───────────────────────────────────────────────────────────

    /// Fetch a task record.
    pub async fn get(&self, queue: &str, id: &str) -> Result<TaskInfo, BrokerError> {
        let mut conn = self.connection();
        let hash: HashMap<String, String> = conn.hgetall(task_key(queue, id)).await?;
        if hash.is_empty() {
            return Err(BrokerError::NotFound);
        }
        task_info_from_hash(queue, id, &hash)
    }

    /// Signal cooperative cancellation of a task, wherever it lives.
    ///
    /// Idempotent; fails with `NotFound` only when no queue knows the id.
    pub async fn request_cancel(&self, id: &str) -> Result<(), BrokerError> {
        let mut conn = self.connection();
        let queues: Vec<String> = conn.smembers(QUEUES_KEY).await?;
        let mut found = false;
        for queue in &queues {
            let key = task_key(queue, id);
            if conn.exists::<_, bool>(&key).await? {
                let _: () = conn.hset(&key, "cancel_requested", 1).await?;
                found = true;
            }
        }
        if !found {
            return Err(BrokerError::NotFound);
        }
        let _: () = conn.publish(CANCEL_CHANNEL, id).await?;
        info!(task_id = %id, "cancellation requested");
        Ok(())
    }

    /// Delete a task from pending / scheduled / retry / archived / completed.
    pub async fn delete(&self, queue: &str, id: &str) -> Result<(), BrokerError> {
        let mut conn = self.connection();
        let outcome: i64 = self
            .delete
            .key(pending_key(queue))
            .key(scheduled_key(queue))
            .key(retry_key(queue))
            .key(archived_key(queue))
            .key(completed_key(queue))
            .arg(task_key(queue, id))
            .arg(id)
            .invoke_async(&mut conn)
            .await?;
        match outcome {
            1 => Ok(()),
            0 => Err(BrokerError::NotFound),
            _ => Err(BrokerError::InvalidState(
                "cannot delete an active task".to_owned(),
            )),
        }
    }

    /// List task records in `queue` with the given state, paginated
    /// (zero-based pages).
    pub async fn list(
        &self,
        queue: &str,
        state: TaskState,
        page: u64,
        size: u64,
    ) -> Result<Vec<TaskInfo>, BrokerError> {
        let size = size.max(1);
        let start = (page * size) as isize;
        let stop = start + size as isize - 1;
        let mut conn = self.connection();

        let ids: Vec<String> = match state {
            TaskState::Pending => conn.lrange(pending_key(queue), start, stop).await?,
            TaskState::Active => conn.lrange(active_key(queue), start, stop).await?,
            TaskState::Scheduled => conn.zrange(scheduled_key(queue), start, stop).await?,
            TaskState::Retry => conn.zrange(retry_key(queue), start, stop).await?,
            TaskState::Archived => conn.zrange(archived_key(queue), start, stop).await?,
            TaskState::Completed => conn.zrange(completed_key(queue), start, stop).await?,
        };

        let mut out = Vec::with_capacity(ids.len());
        for id in ids {
            let hash: HashMap<String, String> = conn.hgetall(task_key(queue, &id)).await?;
            if hash.is_empty() {
                continue;
            }
            out.push(task_info_from_hash(queue, &id, &hash)?);
        }
        Ok(out)
    }

    /// Per-state counts for a single queue.
    pub async fn queue_info(&self, queue: &str) -> Result<QueueStats, BrokerError> {
        let mut conn = self.connection();
        let (pending, active, scheduled, retry, archived, completed, paused): (
            u64,
            u64,
            u64,
            u64,
            u64,
            u64,
            bool,
        ) = redis::pipe()
            .llen(pending_key(queue))
            .llen(active_key(queue))
            .zcard(scheduled_key(queue))
            .zcard(retry_key(queue))
            .zcard(archived_key(queue))
            .zcard(completed_key(queue))
            .exists(paused_key(queue))
            .query_async(&mut conn)
            .await?;
        Ok(QueueStats {
            queue: queue.to_owned(),
            pending,
            active,
            scheduled,
            retry,
            archived,
            completed,
            paused,
        })
    }

    /// Stats for every queue the broker has seen.
    pub async fn all_queue_stats(&self) -> Result<Vec<QueueStats>, BrokerError> {
        let mut conn = self.connection();
        let mut queues: Vec<String> = conn.smembers(QUEUES_KEY).await?;
        queues.sort();
        let mut out = Vec::with_capacity(queues.len());
        for queue in queues {
            out.push(self.queue_info(&queue).await?);
        }
        Ok(out)
    }

    /// Pause dispatch from `queue`; active tasks are unaffected.
    pub async fn pause(&self, queue: &str) -> Result<(), BrokerError> {
        let mut conn = self.connection();
        let _: () = conn.set(paused_key(queue), 1).await?;
        info!(%queue, "queue paused");
        Ok(())
    }

    /// Resume dispatch from `queue`.
    pub async fn unpause(&self, queue: &str) -> Result<(), BrokerError> {
        let mut conn = self.connection();
        let _: () = conn.del(paused_key(queue)).await?;
        info!(%queue, "queue unpaused");
        Ok(())
    }

    /// Stream of task ids whose cancellation has been requested.
    ///
    /// Backed by a dedicated pub/sub connection; the stream ends when the
    /// connection drops.
    pub async fn cancellations(
        &self,
    ) -> Result<impl Stream<Item = String> + Send + 'static, BrokerError> {
        let mut pubsub = self.client.get_async_pubsub().await?;
        pubsub.subscribe(CANCEL_CHANNEL).await?;
        Ok(pubsub
            .into_on_message()
            .filter_map(|msg| async move { msg.get_payload::<String>().ok() }))
    }
}

fn unique_digest(kind: &str, queue: &str, payload: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(kind.as_bytes());
    hasher.update([0u8]);
    hasher.update(queue.as_bytes());
    hasher.update([0u8]);
    hasher.update(payload);
    let digest = hasher.finalize();
    let mut hex = String::with_capacity(digest.len() * 2);
    for b in digest {
        hex.push_str(&format!("{b:02x}"));
    }
    hex
}

fn parse_u32(hash: &HashMap<String, String>, field: &str) -> u32 {
    hash.get(field).and_then(|v| v.parse().ok()).unwrap_or(0)
}

fn task_info_from_hash(
    queue: &str,
    id: &str,
    hash: &HashMap<String, String>,
) -> Result<TaskInfo, BrokerError> {
    let state = hash
        .get("state")
        .and_then(|s| TaskState::parse(s))
        .ok_or_else(|| BrokerError::Corrupt(format!("task {id} has no valid state")))?;

    let next_process_at = match state {
        TaskState::Scheduled | TaskState::Retry => hash
            .get("process_at")
            .and_then(|v| v.parse::<i64>().ok())
            .and_then(|ms| Utc.timestamp_millis_opt(ms).single()),
        _ => None,
    };

    Ok(TaskInfo {
        id: id.to_owned(),
        queue: queue.to_owned(),
        kind: hash.get("kind").cloned().unwrap_or_default(),
        state,
        max_retries: parse_u32(hash, "max_retries"),
        retried: parse_u32(hash, "retried"),
        last_err: hash.get("last_err").filter(|s| !s.is_empty()).cloned(),
        next_process_at,
    })
}

fn dequeued_from_hash(
    queue: &str,
    id: &str,
    hash: &HashMap<String, String>,
) -> Result<DequeuedTask, BrokerError> {
    let metadata: HashMap<String, String> = hash
        .get("metadata")
        .and_then(|m| serde_json::from_str(m).ok())
        .unwrap_or_default();
    let timeout_ms: u64 = hash
        .get("timeout_ms")
        .and_then(|v| v.parse().ok())
        .unwrap_or(30 * 60 * 1000);

    Ok(DequeuedTask {
        id: id.to_owned(),
        queue: queue.to_owned(),
        kind: hash
            .get("kind")
            .cloned()
            .ok_or_else(|| BrokerError::Corrupt(format!("task {id} has no kind")))?,
        payload: hash.get("payload").cloned().unwrap_or_default().into_bytes(),
        max_retries: parse_u32(hash, "max_retries"),
        retried: parse_u32(hash, "retried"),
        timeout: Duration::from_millis(timeout_ms),
        metadata,
        cancel_requested: hash.get("cancel_requested").map(String::as_str) == Some("1"),
    })
}

#[cfg(test)]
mod test {
    use super::*;

    fn sample_hash() -> HashMap<String, String> {
        let mut h = HashMap::new();
        h.insert("id".into(), "t1".into());
        h.insert("kind".into(), "demo".into());
        h.insert("payload".into(), r#"{"message":"hi"}"#.into());
        h.insert("state".into(), "retry".into());
        h.insert("max_retries".into(), "5".into());
        h.insert("retried".into(), "2".into());
        h.insert("timeout_ms".into(), "60000".into());
        h.insert("process_at".into(), "1700000000000".into());
        h.insert("metadata".into(), r#"{"origin":"test"}"#.into());
        h.insert("cancel_requested".into(), "0".into());
        h
    }

    #[test]
    fn task_info_parses_state_and_counters() {
        let info = task_info_from_hash("default", "t1", &sample_hash()).unwrap();
        assert_eq!(info.state, TaskState::Retry);
        assert_eq!(info.max_retries, 5);
        assert_eq!(info.retried, 2);
        assert!(info.next_process_at.is_some());
    }

    #[test]
    fn task_info_hides_process_at_for_terminal_states() {
        let mut hash = sample_hash();
        hash.insert("state".into(), "completed".into());
        let info = task_info_from_hash("default", "t1", &hash).unwrap();
        assert!(info.next_process_at.is_none());
    }

    #[test]
    fn task_info_rejects_missing_state() {
        let mut hash = sample_hash();
        hash.remove("state");
        assert!(matches!(
            task_info_from_hash("default", "t1", &hash),
            Err(BrokerError::Corrupt(_))
        ));
    }

    #[test]
    fn dequeued_task_carries_payload_and_metadata() {
        let task = dequeued_from_hash("default", "t1", &sample_hash()).unwrap();
        assert_eq!(task.kind, "demo");
        assert_eq!(task.timeout, Duration::from_secs(60));
        assert_eq!(task.metadata.get("origin").map(String::as_str), Some("test"));
        assert!(!task.cancel_requested);
    }

    #[test]
    fn unique_digest_depends_on_all_parts() {
        let base = unique_digest("demo", "default", b"{}");
        assert_ne!(base, unique_digest("grpc_task", "default", b"{}"));
        assert_ne!(base, unique_digest("demo", "low", b"{}"));
        assert_ne!(base, unique_digest("demo", "default", b"{\"a\":1}"));
        assert_eq!(base, unique_digest("demo", "default", b"{}"));
    }
}
