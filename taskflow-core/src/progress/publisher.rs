//! Progress publisher: appends entries to a task's stream.

use redis::aio::ConnectionManager;
use redis::streams::StreamMaxlen;
use redis::AsyncCommands;
use tracing::{debug, error};

use crate::error::BrokerError;

use super::{stream_key, CompletionStatus, Progress, StreamOptions};

/// Appends progress entries to `progress:<task_id>` streams.
///
/// Publishing is observational: callers are expected to log and swallow
/// failures rather than fail the originating task.
#[derive(Clone)]
pub struct Publisher {
    conn: ConnectionManager,
    options: StreamOptions,
}

impl std::fmt::Debug for Publisher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Publisher").field("options", &self.options).finish()
    }
}

impl Publisher {
    pub fn new(conn: ConnectionManager, options: StreamOptions) -> Self {
        Self { conn, options }
    }

    /// Append one progress entry; returns the assigned stream id.
    pub async fn publish(&self, progress: &Progress) -> Result<String, BrokerError> {
        let key = stream_key(&progress.task_id);
        let mut fields: Vec<(&str, String)> = vec![
            ("task_id", progress.task_id.clone()),
            ("percentage", progress.percentage.to_string()),
            ("stage", progress.stage.clone()),
            ("message", progress.message.clone()),
            ("timestamp_ms", progress.timestamp_ms.to_string()),
        ];
        if let Some(meta) = &progress.metadata {
            if !meta.is_empty() {
                if let Ok(json) = serde_json::to_string(meta) {
                    fields.push(("metadata", json));
                }
            }
        }

        let id = self.append(&key, &fields).await?;
        debug!(
            task_id = %progress.task_id,
            stream_id = %id,
            percentage = progress.percentage,
            "progress published"
        );
        Ok(id)
    }

    /// Append the terminal entry carrying `is_final=true` and the final
    /// status.
    pub async fn publish_completion(
        &self,
        task_id: &str,
        status: CompletionStatus,
        message: &str,
    ) -> Result<String, BrokerError> {
        let key = stream_key(task_id);
        let fields: Vec<(&str, String)> = vec![
            ("task_id", task_id.to_owned()),
            ("percentage", "100".to_owned()),
            ("stage", "completed".to_owned()),
            ("message", message.to_owned()),
            ("status", status.as_str().to_owned()),
            (
                "timestamp_ms",
                chrono::Utc::now().timestamp_millis().to_string(),
            ),
            ("is_final", "true".to_owned()),
        ];

        let id = self.append(&key, &fields).await?;
        debug!(task_id = %task_id, status = %status, "completion published");
        Ok(id)
    }

    async fn append(&self, key: &str, fields: &[(&str, String)]) -> Result<String, BrokerError> {
        let mut conn = self.conn.clone();
        let id: String = if self.options.max_len > 0 {
            conn.xadd_maxlen(
                key,
                StreamMaxlen::Approx(self.options.max_len as usize),
                "*",
                fields,
            )
            .await?
        } else {
            conn.xadd(key, "*", fields).await?
        };
        self.ensure_ttl(&mut conn, key).await;
        Ok(id)
    }

    /// Set the key TTL once; a key that already has one keeps its deadline.
    async fn ensure_ttl(&self, conn: &mut ConnectionManager, key: &str) {
        if self.options.ttl.is_zero() {
            return;
        }
        let ttl: i64 = match conn.ttl(key).await {
            Ok(v) => v,
            Err(e) => {
                error!(%key, error = %e, "failed to read stream ttl");
                return;
            }
        };
        if ttl < 0 {
            if let Err(e) = conn
                .expire::<_, ()>(key, self.options.ttl.as_secs() as i64)
                .await
            {
                error!(%key, error = %e, "failed to set stream ttl");
            }
        }
    }

    /// Whether the last entry of the task's stream is terminal.
    pub async fn is_finalized(&self, task_id: &str) -> Result<bool, BrokerError> {
        let mut conn = self.conn.clone();
        let reply: redis::streams::StreamRangeReply = conn
            .xrevrange_count(stream_key(task_id), "+", "-", 1)
            .await?;
        Ok(reply.ids.first().is_some_and(|entry| {
            entry
                .map
                .get("is_final")
                .and_then(|v| redis::from_redis_value::<String>(v).ok())
                .as_deref()
                == Some("true")
        }))
    }

    /// Remove the task's stream entirely.
    pub async fn delete(&self, task_id: &str) -> Result<(), BrokerError> {
        let mut conn = self.conn.clone();
        let _: () = conn.del(stream_key(task_id)).await?;
        Ok(())
    }

    /// Whether the task has any progress entries.
    pub async fn exists(&self, task_id: &str) -> Result<bool, BrokerError> {
        let mut conn = self.conn.clone();
        Ok(conn.exists(stream_key(task_id)).await?)
    }
}
