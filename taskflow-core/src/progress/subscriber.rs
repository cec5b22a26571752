//! Progress subscriber: blocking reads, history replay, multi-task merging.

use std::collections::HashMap;

use redis::aio::ConnectionManager;
use redis::streams::{StreamReadOptions, StreamReadReply};
use redis::AsyncCommands;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

use crate::error::BrokerError;

use super::{parse_entry, stream_key, ProgressEntry, StreamInfo, StreamOptions};

/// Start-id sentinel meaning "only new entries".
pub const START_NEW: &str = "$";
/// Start-id sentinel meaning "from the beginning" (XRANGE form).
pub const START_BEGINNING: &str = "-";

/// Reads task progress streams.
///
/// Snapshot reads (history / latest / info) share the multiplexed
/// connection; each live subscription opens its own connection because a
/// blocking `XREAD` would stall every other command multiplexed onto it.
#[derive(Clone)]
pub struct Subscriber {
    client: redis::Client,
    conn: ConnectionManager,
    options: StreamOptions,
}

impl std::fmt::Debug for Subscriber {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscriber").field("options", &self.options).finish()
    }
}

impl Subscriber {
    pub fn new(client: redis::Client, conn: ConnectionManager, options: StreamOptions) -> Self {
        Self {
            client,
            conn,
            options,
        }
    }

    /// Subscribe to a task's stream starting at `start_id`.
    ///
    /// - `"$"` (or empty) yields only entries published after the call.
    /// - `"0"` / `"-"` replays from the beginning.
    /// - any other id yields entries strictly after it.
    ///
    /// The returned channel closes after the terminal (`is_final`) entry,
    /// when `cancel` fires, or when the receiver is dropped.
    pub fn subscribe(
        &self,
        cancel: CancellationToken,
        task_id: &str,
        start_id: &str,
    ) -> mpsc::Receiver<Result<ProgressEntry, BrokerError>> {
        let (tx, rx) = mpsc::channel(10);
        let client = self.client.clone();
        let key = stream_key(task_id);
        let task_id = task_id.to_owned();
        let block_ms = self.options.read_timeout.as_millis().max(1) as usize;
        let mut last_id = match start_id {
            "" => START_NEW.to_owned(),
            "-" => "0".to_owned(),
            other => other.to_owned(),
        };

        tokio::spawn(async move {
            // Dedicated connection; the blocking read must not share the
            // multiplexed one.
            let mut conn = match client.get_multiplexed_async_connection().await {
                Ok(conn) => conn,
                Err(e) => {
                    error!(task_id = %task_id, error = %e, "failed to open subscription connection");
                    let _ = tx.send(Err(e.into())).await;
                    return;
                }
            };

            let opts = StreamReadOptions::default().block(block_ms).count(10);
            loop {
                if tx.is_closed() {
                    return;
                }

                let keys = [key.as_str()];
                let ids = [last_id.as_str()];
                let reply = tokio::select! {
                    _ = cancel.cancelled() => {
                        debug!(task_id = %task_id, "subscription cancelled");
                        return;
                    }
                    r = conn.xread_options::<_, _, Option<StreamReadReply>>(&keys, &ids, &opts) => match r {
                        Ok(reply) => reply,
                        Err(e) => {
                            error!(task_id = %task_id, error = %e, "failed to read progress stream");
                            let _ = tx.send(Err(e.into())).await;
                            return;
                        }
                    },
                };

                // Block timeout with nothing new; poll again.
                let Some(reply) = reply else { continue };

                for stream in reply.keys {
                    for entry in stream.ids {
                        let fields: HashMap<String, redis::Value> = entry.map;
                        let parsed = parse_entry(&task_id, &entry.id, &fields);
                        last_id = entry.id;
                        let is_final = parsed.is_final;

                        if tx.send(Ok(parsed)).await.is_err() {
                            return;
                        }
                        if is_final {
                            debug!(task_id = %task_id, "final entry delivered, closing subscription");
                            return;
                        }
                    }
                }
            }
        });

        rx
    }

    /// Subscribe to up to `task_ids.len()` streams, merged into one channel
    /// tagged by task id. The channel closes once every per-task reader has
    /// terminated; one stream's failure does not end the others.
    pub fn subscribe_many(
        &self,
        cancel: CancellationToken,
        task_ids: &[String],
        start_id: &str,
    ) -> mpsc::Receiver<(String, Result<ProgressEntry, BrokerError>)> {
        let (tx, rx) = mpsc::channel(task_ids.len().max(1) * 10);

        for task_id in task_ids {
            let mut per_task = self.subscribe(cancel.child_token(), task_id, start_id);
            let tx = tx.clone();
            let task_id = task_id.clone();
            tokio::spawn(async move {
                while let Some(item) = per_task.recv().await {
                    if tx.send((task_id.clone(), item)).await.is_err() {
                        return;
                    }
                }
            });
        }

        rx
    }

    /// Finite slice of a task's history. `count == 0` means no limit.
    pub async fn history(
        &self,
        task_id: &str,
        start_id: &str,
        count: u64,
    ) -> Result<Vec<ProgressEntry>, BrokerError> {
        let mut conn = self.conn.clone();
        let key = stream_key(task_id);
        let start = if start_id.is_empty() {
            START_BEGINNING
        } else {
            start_id
        };

        let reply: redis::streams::StreamRangeReply = if count > 0 {
            conn.xrange_count(&key, start, "+", count).await?
        } else {
            conn.xrange(&key, start, "+").await?
        };

        Ok(reply
            .ids
            .iter()
            .map(|entry| parse_entry(task_id, &entry.id, &entry.map))
            .collect())
    }

    /// The most recent entry, if any.
    pub async fn latest(&self, task_id: &str) -> Result<Option<ProgressEntry>, BrokerError> {
        let mut conn = self.conn.clone();
        let reply: redis::streams::StreamRangeReply = conn
            .xrevrange_count(stream_key(task_id), "+", "-", 1)
            .await?;
        Ok(reply
            .ids
            .first()
            .map(|entry| parse_entry(task_id, &entry.id, &entry.map)))
    }

    /// Length and boundary ids of the task's stream.
    pub async fn info(&self, task_id: &str) -> Result<StreamInfo, BrokerError> {
        let mut conn = self.conn.clone();
        let key = stream_key(task_id);

        if !conn.exists::<_, bool>(&key).await? {
            return Ok(StreamInfo {
                has_progress: false,
                length: 0,
                first_entry: None,
                last_entry: None,
            });
        }

        let length: u64 = conn.xlen(&key).await?;
        let mut info = StreamInfo {
            has_progress: length > 0,
            length,
            first_entry: None,
            last_entry: None,
        };

        if length > 0 {
            let first: redis::streams::StreamRangeReply =
                conn.xrange_count(&key, "-", "+", 1).await?;
            info.first_entry = first.ids.first().map(|e| e.id.clone());
            let last: redis::streams::StreamRangeReply =
                conn.xrevrange_count(&key, "+", "-", 1).await?;
            info.last_entry = last.ids.first().map(|e| e.id.clone());
        }

        Ok(info)
    }
}
