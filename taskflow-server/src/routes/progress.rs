//! Progress endpoints: latest / history / info plus the live event streams.
//!
//! Event-stream framing: one frame per event, `event: <name>` +
//! `data: <json>`, flushed immediately. Names: `history` (preloaded
//! entries), `progress` (live entries), `done` (terminal status), `error`.

use std::convert::Infallible;
use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::response::sse::{Event, Sse};
use axum::routing::get;
use axum::{Json, Router};
use futures::stream::{self, Stream, StreamExt};
use serde::Deserialize;
use serde_json::json;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use taskflow_core::progress::ProgressEntry;
use taskflow_core::BrokerError;

use crate::error::ApiError;
use crate::state::AppState;

/// Default page size of the history endpoint.
const HISTORY_COUNT: u64 = 100;
/// Upper bound on merged subscriptions per connection.
const MAX_MULTI_TASKS: usize = 10;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/tasks/{id}/progress", get(latest_progress))
        .route("/tasks/{id}/progress/stream", get(stream_progress))
        .route("/tasks/{id}/progress/history", get(progress_history))
        .route("/tasks/{id}/progress/info", get(progress_info))
        .route("/progress/stream", get(stream_multi))
}

// ── Snapshot endpoints ────────────────────────────────────────────────────────

pub async fn latest_progress(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let latest = state
        .subscriber
        .latest(&id)
        .await
        .map_err(|e| ApiError::ProgressFetch(e.to_string()))?;

    let Some(entry) = latest else {
        return Err(ApiError::ProgressNotFound);
    };

    Ok(Json(json!({
        "progress": entry.progress,
        "is_final": entry.is_final,
        "status": entry.status,
        "stream_id": entry.stream_id,
    })))
}

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    pub start_id: Option<String>,
}

pub async fn progress_history(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Query(q): Query<HistoryQuery>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let start_id = q.start_id.unwrap_or_else(|| "-".to_owned());
    let entries = state
        .subscriber
        .history(&id, &start_id, HISTORY_COUNT)
        .await
        .map_err(|e| ApiError::ProgressHistory(e.to_string()))?;

    let items: Vec<serde_json::Value> = entries
        .iter()
        .map(|entry| {
            let mut item = json!({
                "stream_id": entry.stream_id,
                "progress": entry.progress,
                "is_final": entry.is_final,
            });
            if entry.is_final {
                item["status"] = json!(entry.status);
            }
            item
        })
        .collect();

    Ok(Json(json!({
        "task_id": id,
        "count": items.len(),
        "history": items,
    })))
}

pub async fn progress_info(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let info = state
        .subscriber
        .info(&id)
        .await
        .map_err(|e| ApiError::StreamInfo(e.to_string()))?;

    Ok(Json(json!({
        "task_id": id,
        "has_progress": info.has_progress,
        "length": info.length,
        "first_entry": info.first_entry,
        "last_entry": info.last_entry,
    })))
}

// ── Live streams ──────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct StreamQuery {
    pub start_id: Option<String>,
    pub history: Option<String>,
}

/// Single-task live stream with optional history preload.
pub async fn stream_progress(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Query(q): Query<StreamQuery>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ApiError> {
    let start_id = q.start_id.filter(|s| !s.is_empty()).unwrap_or_else(|| "$".to_owned());
    let include_history = q.history.as_deref() == Some("true");

    info!(
        task_id = %id,
        start_id = %start_id,
        include_history,
        "event-stream connection established"
    );

    let mut preload: Vec<Result<Event, Infallible>> = Vec::new();
    if include_history {
        match state.subscriber.history(&id, "-", 0).await {
            Ok(entries) => {
                for entry in &entries {
                    preload.push(Ok(data_event("history", &entry.progress)));
                }
            }
            Err(e) => warn!(task_id = %id, error = %e, "failed to preload history"),
        }
    }

    let cancel = CancellationToken::new();
    let rx = state.subscriber.subscribe(cancel.clone(), &id, &start_id);
    // Dropping the response stream (client gone) cancels the reader.
    let guard = cancel.drop_guard();
    let task_id = id.clone();

    let live = ReceiverStream::new(rx).flat_map(move |item| {
        let _guard = &guard;
        stream::iter(single_task_frames(&task_id, item))
    });

    Ok(Sse::new(stream::iter(preload).chain(live)))
}

/// Frames produced by one subscription item: the entry itself, plus `done`
/// after a terminal entry, or `error` on a failed read.
fn single_task_frames(
    task_id: &str,
    item: Result<ProgressEntry, BrokerError>,
) -> Vec<Result<Event, Infallible>> {
    match item {
        Ok(entry) => {
            let mut frames = vec![Ok(data_event("progress", &entry.progress))];
            if entry.is_final {
                frames.push(Ok(data_event(
                    "done",
                    &json!({
                        "task_id": task_id,
                        "status": entry.status.as_deref().unwrap_or("completed"),
                    }),
                )));
            }
            frames
        }
        Err(e) => vec![Ok(data_event("error", &json!({"message": e.to_string()})))],
    }
}

#[derive(Debug, Deserialize)]
pub struct MultiStreamQuery {
    pub task_ids: Option<String>,
}

/// Merged live stream over up to ten tasks, entries tagged by task id.
pub async fn stream_multi(
    State(state): State<Arc<AppState>>,
    Query(q): Query<MultiStreamQuery>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ApiError> {
    let raw = q
        .task_ids
        .filter(|s| !s.is_empty())
        .ok_or_else(|| ApiError::InvalidRequest("task_ids is required".to_owned()))?;

    let task_ids: Vec<String> = raw
        .split(',')
        .map(|s| s.trim().to_owned())
        .filter(|s| !s.is_empty())
        .collect();
    if task_ids.is_empty() {
        return Err(ApiError::InvalidRequest(
            "at least one task_id is required".to_owned(),
        ));
    }
    if task_ids.len() > MAX_MULTI_TASKS {
        return Err(ApiError::InvalidRequest(format!(
            "maximum {MAX_MULTI_TASKS} tasks can be subscribed at once"
        )));
    }

    info!(?task_ids, "multi-task event-stream connection established");

    let cancel = CancellationToken::new();
    let rx = state.subscriber.subscribe_many(cancel.clone(), &task_ids, "$");
    let guard = cancel.drop_guard();

    let stream = ReceiverStream::new(rx).map(move |(task_id, item)| {
        let _guard = &guard;
        Ok(multi_task_frame(&task_id, item))
    });

    Ok(Sse::new(stream))
}

/// One frame per merged item; per-task errors are tagged, not terminal for
/// the connection.
fn multi_task_frame(task_id: &str, item: Result<ProgressEntry, BrokerError>) -> Event {
    match item {
        Ok(entry) => {
            let mut data = json!({
                "task_id": task_id,
                "progress": entry.progress,
            });
            if entry.is_final {
                data["is_final"] = json!(true);
                data["status"] = json!(entry.status.as_deref().unwrap_or("completed"));
            }
            data_event("progress", &data)
        }
        Err(e) => data_event(
            "error",
            &json!({"task_id": task_id, "message": e.to_string()}),
        ),
    }
}

/// Build one `event: <name>` / `data: <json>` frame.
fn data_event<T: serde::Serialize>(name: &str, data: &T) -> Event {
    Event::default()
        .event(name)
        .data(serde_json::to_string(data).unwrap_or_else(|_| "{}".to_owned()))
}

#[cfg(test)]
mod test {
    use super::*;
    use taskflow_core::progress::Progress;

    fn entry(is_final: bool, status: Option<&str>) -> ProgressEntry {
        ProgressEntry {
            stream_id: "1-0".to_owned(),
            progress: Progress::new("t1", 50, "working", "half way"),
            is_final,
            status: status.map(str::to_owned),
        }
    }

    #[test]
    fn live_entry_produces_one_progress_frame() {
        let frames = single_task_frames("t1", Ok(entry(false, None)));
        assert_eq!(frames.len(), 1);
    }

    #[test]
    fn final_entry_is_followed_by_done() {
        let frames = single_task_frames("t1", Ok(entry(true, Some("completed"))));
        assert_eq!(frames.len(), 2);
    }

    #[test]
    fn read_errors_become_error_frames() {
        let frames = single_task_frames("t1", Err(BrokerError::NotFound));
        assert_eq!(frames.len(), 1);
    }

    #[test]
    fn multi_frame_tags_task_id() {
        // The Event API has no public accessor for the payload, so this only
        // exercises the construction paths.
        let _ = multi_task_frame("a", Ok(entry(true, Some("failed"))));
        let _ = multi_task_frame("b", Err(BrokerError::NotFound));
    }
}
