//! Task management endpoints.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};

use taskflow_core::broker::{QueueStats, TaskInfo};

use crate::error::ApiError;
use crate::service::CreateTaskRequest;
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/tasks", post(create_task))
        .route("/tasks/{id}", get(get_task).delete(delete_task))
        .route("/tasks/{id}/cancel", post(cancel_task))
        .route("/queues/stats", get(queue_stats))
}

#[derive(Debug, Deserialize)]
pub struct QueueQuery {
    pub queue: Option<String>,
}

#[derive(Serialize)]
pub struct CreateTaskResponse {
    pub task_id: String,
    pub queue: String,
    pub status: String,
}

#[derive(Serialize)]
pub struct GetTaskResponse {
    pub id: String,
    pub queue: String,
    #[serde(rename = "type")]
    pub task_type: String,
    pub state: String,
    pub max_retry: u32,
    pub retried: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_err: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_process_at: Option<String>,
}

fn to_task_response(info: TaskInfo) -> GetTaskResponse {
    GetTaskResponse {
        id: info.id,
        queue: info.queue,
        task_type: info.kind,
        state: info.state.as_str().to_owned(),
        max_retry: info.max_retries,
        retried: info.retried,
        last_err: info.last_err,
        next_process_at: info.next_process_at.map(|t| t.to_rfc3339()),
    }
}

pub async fn create_task(
    State(state): State<Arc<AppState>>,
    Json(req): Json<CreateTaskRequest>,
) -> Result<(StatusCode, Json<CreateTaskResponse>), ApiError> {
    let enqueued = state.service.create(req).await?;
    Ok((
        StatusCode::CREATED,
        Json(CreateTaskResponse {
            task_id: enqueued.id,
            queue: enqueued.queue,
            status: enqueued.state.as_str().to_owned(),
        }),
    ))
}

pub async fn get_task(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Query(q): Query<QueueQuery>,
) -> Result<Json<GetTaskResponse>, ApiError> {
    let queue = q.queue.unwrap_or_else(|| "default".to_owned());
    let info = state.service.get(&queue, &id).await?;
    Ok(Json(to_task_response(info)))
}

pub async fn cancel_task(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    state.service.cancel(&id).await?;
    Ok(Json(serde_json::json!({"message": "task cancelled"})))
}

pub async fn delete_task(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Query(q): Query<QueueQuery>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let queue = q.queue.unwrap_or_else(|| "default".to_owned());
    state.service.delete(&queue, &id).await?;
    Ok(Json(serde_json::json!({"message": "task deleted"})))
}

#[derive(Serialize)]
pub struct QueueStatsResponse {
    pub queue: String,
    pub pending: u64,
    pub active: u64,
    pub scheduled: u64,
    pub retry: u64,
    pub archived: u64,
    pub completed: u64,
}

pub async fn queue_stats(
    State(state): State<Arc<AppState>>,
    Query(q): Query<QueueQuery>,
) -> Result<Json<Vec<QueueStatsResponse>>, ApiError> {
    let stats = state.service.queue_stats(q.queue.as_deref()).await?;
    Ok(Json(stats.into_iter().map(to_stats_response).collect()))
}

fn to_stats_response(s: QueueStats) -> QueueStatsResponse {
    QueueStatsResponse {
        queue: s.queue,
        pending: s.pending,
        active: s.active,
        scheduled: s.scheduled,
        retry: s.retry,
        archived: s.archived,
        completed: s.completed,
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use chrono::{TimeZone, Utc};
    use taskflow_core::task::TaskState;

    #[test]
    fn task_response_serializes_expected_shape() {
        let info = TaskInfo {
            id: "t1".into(),
            queue: "default".into(),
            kind: "demo".into(),
            state: TaskState::Retry,
            max_retries: 3,
            retried: 1,
            last_err: Some("boom".into()),
            next_process_at: Utc.timestamp_millis_opt(1_700_000_000_000).single(),
        };
        let body = serde_json::to_value(to_task_response(info)).unwrap();
        assert_eq!(body["state"], "retry");
        assert_eq!(body["type"], "demo");
        assert_eq!(body["max_retry"], 3);
        assert!(body["next_process_at"].is_string());
    }

    #[test]
    fn task_response_omits_empty_fields() {
        let info = TaskInfo {
            id: "t1".into(),
            queue: "default".into(),
            kind: "demo".into(),
            state: TaskState::Pending,
            max_retries: 3,
            retried: 0,
            last_err: None,
            next_process_at: None,
        };
        let body = serde_json::to_value(to_task_response(info)).unwrap();
        assert!(body.get("last_err").is_none());
        assert!(body.get("next_process_at").is_none());
    }
}
