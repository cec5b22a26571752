//! Task application service: validates API requests, builds broker calls,
//! and translates broker errors into stable API errors.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Deserialize;
use tracing::{error, info};
use uuid::Uuid;

use taskflow_core::broker::{EnqueuedTask, QueueStats, RedisBroker, TaskInfo};
use taskflow_core::task::{EnqueueOptions, NewTask, TaskKind};
use taskflow_core::BrokerError;

use crate::error::ApiError;

/// Body of `POST /api/v1/tasks`.
#[derive(Debug, Deserialize)]
pub struct CreateTaskRequest {
    #[serde(rename = "type")]
    pub task_type: String,
    pub payload: serde_json::Value,
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub queue: Option<String>,
    #[serde(default)]
    pub max_retries: Option<u32>,
    /// Duration string, e.g. `"10m"`.
    #[serde(default)]
    pub timeout: Option<String>,
    /// RFC3339 absolute time.
    #[serde(default)]
    pub process_at: Option<String>,
    /// Uniqueness window duration string, e.g. `"1h"`.
    #[serde(default)]
    pub unique: Option<String>,
    #[serde(default)]
    pub metadata: Option<HashMap<String, String>>,
}

#[derive(Clone)]
pub struct TaskService {
    broker: Arc<RedisBroker>,
}

impl TaskService {
    pub fn new(broker: Arc<RedisBroker>) -> Self {
        Self { broker }
    }

    /// Validate a create request and enqueue the task.
    pub async fn create(&self, req: CreateTaskRequest) -> Result<EnqueuedTask, ApiError> {
        let Some(kind) = TaskKind::parse(&req.task_type) else {
            return Err(ApiError::InvalidTaskType);
        };
        if req.payload.is_null() {
            return Err(ApiError::InvalidPayload);
        }
        let payload =
            serde_json::to_vec(&req.payload).map_err(|_| ApiError::InvalidPayload)?;
        if payload.is_empty() {
            return Err(ApiError::InvalidPayload);
        }

        let timeout = match &req.timeout {
            Some(raw) => Some(parse_duration(raw).ok_or(ApiError::InvalidTimeout)?),
            None => None,
        };
        let process_at = match &req.process_at {
            Some(raw) => Some(
                DateTime::parse_from_rfc3339(raw)
                    .map(|t| t.with_timezone(&Utc))
                    .map_err(|_| ApiError::InvalidProcessAt)?,
            ),
            None => None,
        };
        let unique = match &req.unique {
            Some(raw) => Some(parse_duration(raw).ok_or(ApiError::InvalidUnique)?),
            None => None,
        };

        let mut opts = EnqueueOptions {
            queue: req
                .queue
                .filter(|q| !q.is_empty())
                .unwrap_or_else(|| kind.home_queue().to_owned()),
            process_at,
            unique,
            ..EnqueueOptions::default()
        };
        if let Some(max_retries) = req.max_retries {
            opts.max_retries = max_retries;
        }
        if let Some(timeout) = timeout {
            opts.timeout = timeout;
        }

        let task = NewTask {
            id: Some(
                req.id
                    .filter(|id| !id.is_empty())
                    .unwrap_or_else(|| Uuid::new_v4().to_string()),
            ),
            kind,
            payload,
            metadata: req.metadata.unwrap_or_default(),
        };

        let enqueued = self.broker.enqueue(task, opts).await.map_err(|e| match e {
            BrokerError::AlreadyExists => ApiError::TaskAlreadyExists,
            other => {
                error!(error = %other, "failed to enqueue task");
                ApiError::Internal(other.to_string())
            }
        })?;

        info!(
            task_id = %enqueued.id,
            queue = %enqueued.queue,
            kind = %kind,
            "task created"
        );
        Ok(enqueued)
    }

    pub async fn get(&self, queue: &str, task_id: &str) -> Result<TaskInfo, ApiError> {
        self.broker.get(queue, task_id).await.map_err(|e| match e {
            BrokerError::NotFound => ApiError::TaskNotFound,
            other => ApiError::Internal(other.to_string()),
        })
    }

    pub async fn cancel(&self, task_id: &str) -> Result<(), ApiError> {
        self.broker.request_cancel(task_id).await.map_err(|e| match e {
            BrokerError::NotFound => ApiError::TaskNotFound,
            other => ApiError::CancelFailed(other.to_string()),
        })?;
        info!(task_id = %task_id, "task cancelled");
        Ok(())
    }

    pub async fn delete(&self, queue: &str, task_id: &str) -> Result<(), ApiError> {
        self.broker.delete(queue, task_id).await.map_err(|e| match e {
            BrokerError::NotFound => ApiError::TaskNotFound,
            other => ApiError::DeleteFailed(other.to_string()),
        })?;
        info!(task_id = %task_id, queue = %queue, "task deleted");
        Ok(())
    }

    /// Stats for one queue, or every queue when `queue` is `None`.
    pub async fn queue_stats(&self, queue: Option<&str>) -> Result<Vec<QueueStats>, ApiError> {
        let result = match queue {
            Some(q) => self.broker.queue_info(q).await.map(|s| vec![s]),
            None => self.broker.all_queue_stats().await,
        };
        result.map_err(|e| ApiError::StatsFailed(e.to_string()))
    }
}

/// Durations accept humantime forms (`90s`, `1h30m`).
fn parse_duration(raw: &str) -> Option<Duration> {
    humantime::parse_duration(raw).ok()
}

#[cfg(test)]
mod test {
    use super::*;

    fn request(json: &str) -> CreateTaskRequest {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn request_deserializes_minimal_body() {
        let req = request(r#"{"type":"demo","payload":{"message":"hi"}}"#);
        assert_eq!(req.task_type, "demo");
        assert!(req.queue.is_none());
        assert!(req.unique.is_none());
    }

    #[test]
    fn request_deserializes_full_body() {
        let req = request(
            r#"{
                "type": "grpc_task",
                "payload": {"service": "llm"},
                "queue": "high",
                "max_retries": 5,
                "timeout": "10m",
                "process_at": "2030-01-01T00:00:00Z",
                "unique": "1h",
                "metadata": {"origin": "test"}
            }"#,
        );
        assert_eq!(req.queue.as_deref(), Some("high"));
        assert_eq!(req.max_retries, Some(5));
        assert_eq!(parse_duration(req.timeout.as_deref().unwrap()).unwrap(), Duration::from_secs(600));
    }

    #[test]
    fn durations_parse_humantime_forms() {
        assert_eq!(parse_duration("30s"), Some(Duration::from_secs(30)));
        assert_eq!(parse_duration("1h"), Some(Duration::from_secs(3600)));
        assert_eq!(parse_duration("not-a-duration"), None);
    }
}
