//! HTTP View Server
//!
//! Read-only routes over the view snapshot and history store.

use axum::{
    extract::{Path, State},
    http::{header, Method, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use ledger_types::EventKind;
use round_runtime::timer::format_remaining;
use round_runtime::{
    HistoryError, HistoryRecord, HistoryStore, Phase, Shutdown, ViewHandle, ViewSnapshot,
};
use serde::Serialize;
use serde_json::json;
use std::sync::Arc;
use tokio::task::JoinError;
use tower_http::cors::{Any, CorsLayer};

/// Shared state for the route handlers
#[derive(Clone)]
struct ServerContext {
    view: ViewHandle,
    history: Option<Arc<HistoryStore>>,
}

/// Snapshot plus display strings for `GET /round`
#[derive(Debug, Serialize)]
pub struct RoundView {
    #[serde(flatten)]
    pub snapshot: ViewSnapshot,
    pub pool_balance_display: String,
    pub remaining_display: Option<String>,
}

impl From<ViewSnapshot> for RoundView {
    fn from(snapshot: ViewSnapshot) -> Self {
        let remaining_display = match snapshot.phase {
            Some(Phase::NotStarted) => Some("READY TO START".to_string()),
            Some(Phase::Expired) => Some("TIME EXPIRED".to_string()),
            Some(Phase::Drawing) => Some("DRAWING...".to_string()),
            Some(Phase::Active) => snapshot.remaining.map(format_remaining),
            None => None,
        };

        Self {
            pool_balance_display: snapshot.pool_balance.format_ether(),
            remaining_display,
            snapshot,
        }
    }
}

/// HTTP view server
pub struct ViewServer {
    context: ServerContext,
}

impl ViewServer {
    /// Create a view server. Without a history store the history routes
    /// answer 404.
    pub fn new(view: ViewHandle, history: Option<Arc<HistoryStore>>) -> Self {
        Self {
            context: ServerContext { view, history },
        }
    }

    /// Create the Axum router
    pub fn router(self) -> Router {
        // Browser clients poll from other origins
        let cors = CorsLayer::new()
            .allow_origin(Any)
            .allow_methods([Method::GET, Method::OPTIONS])
            .allow_headers([header::CONTENT_TYPE, header::ACCEPT]);

        Router::new()
            .route("/health", get(handle_health))
            .route("/round", get(handle_round))
            .route("/history", get(handle_history))
            .route("/history/:kind", get(handle_history_kind))
            .layer(cors)
            .with_state(self.context)
    }

    /// Run the server until shutdown is signalled
    pub async fn run(self, addr: &str, mut shutdown: Shutdown) -> anyhow::Result<()> {
        let listener = tokio::net::TcpListener::bind(addr).await?;
        tracing::info!("View server listening on {}", addr);

        axum::serve(listener, self.router())
            .with_graceful_shutdown(async move {
                let _ = shutdown.changed().await;
            })
            .await?;

        tracing::info!("View server stopped");
        Ok(())
    }
}

async fn handle_health() -> impl IntoResponse {
    Json(json!({ "status": "ok" }))
}

async fn handle_round(State(context): State<ServerContext>) -> impl IntoResponse {
    Json(RoundView::from(context.view.snapshot()))
}

async fn handle_history(State(context): State<ServerContext>) -> Response {
    let Some(history) = context.history else {
        return not_found("history is not recorded in this mode");
    };
    respond_with(tokio::task::spawn_blocking(move || history.read_all()).await)
}

async fn handle_history_kind(
    State(context): State<ServerContext>,
    Path(kind): Path<String>,
) -> Response {
    let Some(kind) = EventKind::from_collection(&kind) else {
        return not_found(&format!("unknown history collection: {}", kind));
    };
    let Some(history) = context.history else {
        return not_found("history is not recorded in this mode");
    };
    respond_with(tokio::task::spawn_blocking(move || history.read_kind(kind)).await)
}

/// Render a history scan that ran on the blocking pool
fn respond_with(
    result: Result<Result<Vec<HistoryRecord>, HistoryError>, JoinError>,
) -> Response {
    match result {
        Ok(Ok(records)) => Json(records).into_response(),
        Ok(Err(e)) => internal_error(e),
        Err(e) => internal_error(e),
    }
}

fn not_found(message: &str) -> Response {
    (StatusCode::NOT_FOUND, Json(json!({ "error": message }))).into_response()
}

fn internal_error(err: impl std::fmt::Display) -> Response {
    tracing::error!("History read failed: {}", err);
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({ "error": err.to_string() })),
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use ledger_types::{Amount, DomainEvent, EventPayload, RoundState, SourcePosition};
    use serde_json::Value;
    use tower::ServiceExt;

    fn state(start_time: u64, drawing: bool) -> RoundState {
        RoundState {
            round_id: 2,
            start_time,
            duration: 600,
            participant_count: 3,
            pool_balance: Amount(3_000_000_000_000_000),
            drawing_in_progress: drawing,
            ..Default::default()
        }
    }

    fn event(block: u64, payload: EventPayload) -> HistoryRecord {
        HistoryRecord::new(
            DomainEvent {
                round_id: 1,
                source_position: SourcePosition::new(block, 0),
                payload,
            },
            chrono::Utc::now(),
        )
    }

    async fn get_json(router: Router, uri: &str) -> (StatusCode, Value) {
        let response = router
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&body).unwrap())
    }

    #[tokio::test]
    async fn test_health() {
        let router = ViewServer::new(ViewHandle::new(), None).router();
        let (status, body) = get_json(router, "/health").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
    }

    #[tokio::test]
    async fn test_round_display() {
        let view = ViewHandle::new();
        view.publish(ViewSnapshot::from_state(&state(1000, false), 1350));
        let router = ViewServer::new(view, None).router();

        let (status, body) = get_json(router, "/round").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["round_id"], 2);
        assert_eq!(body["phase"], "active");
        assert_eq!(body["remaining"], 250);
        assert_eq!(body["remaining_display"], "4m 10s");
        assert_eq!(body["pool_balance_display"], "0.003");
        assert_eq!(body["pool_balance"], "3000000000000000");
        assert_eq!(body["stale"], false);
    }

    #[test]
    fn test_remaining_display_by_phase() {
        let not_started = RoundView::from(ViewSnapshot::from_state(&state(0, false), 1350));
        assert_eq!(not_started.remaining_display.as_deref(), Some("READY TO START"));

        let expired = RoundView::from(ViewSnapshot::from_state(&state(1000, false), 1700));
        assert_eq!(expired.remaining_display.as_deref(), Some("TIME EXPIRED"));

        let drawing = RoundView::from(ViewSnapshot::from_state(&state(1000, true), 1700));
        assert_eq!(drawing.remaining_display.as_deref(), Some("DRAWING..."));

        let unknown = RoundView::from(ViewSnapshot::default());
        assert_eq!(unknown.remaining_display, None);
    }

    #[tokio::test]
    async fn test_history_routes() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(HistoryStore::open(dir.path()).unwrap());
        store
            .append(&event(
                10,
                EventPayload::EntryRecorded {
                    participant: "0x4ffAf25aC16311620f280c80c328694B4aa1f636".to_string(),
                    values: vec![1, 2, 3, 4, 5, 6, 7],
                },
            ))
            .unwrap();
        store
            .append(&event(
                11,
                EventPayload::RoundResolved {
                    winning_values: vec![7, 6, 5, 4, 3, 2, 1],
                    distributed: Amount(1_000_000_000_000_000),
                },
            ))
            .unwrap();

        let server = || ViewServer::new(ViewHandle::new(), Some(store.clone())).router();

        let (status, body) = get_json(server(), "/history").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body.as_array().unwrap().len(), 2);
        assert_eq!(body[0]["kind"], "entry_recorded");
        assert_eq!(body[1]["kind"], "round_resolved");

        let (_, body) = get_json(server(), "/history/resolutions").await;
        assert_eq!(body.as_array().unwrap().len(), 1);
        assert_eq!(body[0]["distributed"], "1000000000000000");

        let (status, _) = get_json(server(), "/history/tickets").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_history_without_store() {
        let router = ViewServer::new(ViewHandle::new(), None).router();
        let (status, body) = get_json(router, "/history").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert!(body["error"].is_string());
    }
}
