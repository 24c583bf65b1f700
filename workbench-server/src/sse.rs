//! Server-Sent Events stream of run events.

use std::convert::Infallible;
use std::time::Duration;

use axum::extract::{Query, State};
use axum::response::sse::{Event, KeepAlive, Sse};
use futures::stream::Stream;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::warn;
use workbench::core::run::{RunEvent, RunId, StreamKind};

use crate::state::AppState;

#[derive(Debug, Serialize, PartialEq)]
struct SsePayload {
    #[serde(rename = "type")]
    event_type: &'static str,
    run_id: RunId,
    #[serde(skip_serializing_if = "Option::is_none")]
    stream: Option<StreamKind>,
    /// Output bytes, decoded lossily. Chunks may split a multi-byte character.
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    code: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    reason: Option<String>,
}

impl From<&RunEvent> for SsePayload {
    fn from(event: &RunEvent) -> Self {
        let base = SsePayload {
            event_type: "",
            run_id: event.run_id(),
            stream: None,
            data: None,
            code: None,
            reason: None,
        };
        match event {
            RunEvent::Output { stream, data, .. } => SsePayload {
                event_type: "output",
                stream: Some(*stream),
                data: Some(String::from_utf8_lossy(data).into_owned()),
                ..base
            },
            RunEvent::Exited { code, .. } => SsePayload {
                event_type: "exited",
                code: *code,
                ..base
            },
            RunEvent::Killed { .. } => SsePayload {
                event_type: "killed",
                ..base
            },
            RunEvent::Failed { reason, .. } => SsePayload {
                event_type: "failed",
                reason: Some(reason.clone()),
                ..base
            },
        }
    }
}

#[derive(Deserialize)]
pub struct EventsQuery {
    /// Only forward events of this run.
    run: Option<RunId>,
}

/// SSE endpoint handler.
pub async fn events_handler(
    State(state): State<AppState>,
    Query(query): Query<EventsQuery>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let mut rx = state.workbench.subscribe();
    let filter = query.run;

    let stream = async_stream::stream! {
        yield Ok(Event::default().event("connected").data("{}"));

        loop {
            match rx.recv().await {
                Ok(run_event) => {
                    if filter.is_some_and(|id| id != run_event.run_id()) {
                        continue;
                    }
                    let payload = SsePayload::from(&run_event);
                    if let Ok(json) = serde_json::to_string(&payload) {
                        yield Ok(Event::default().event("run").data(json));
                    }
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!(skipped = n, "SSE client lagged, some run events dropped");
                }
                Err(broadcast::error::RecvError::Closed) => {
                    break;
                }
            }
        }
    };

    Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("ping"),
    )
}
