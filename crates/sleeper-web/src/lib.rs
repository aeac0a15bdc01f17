//! HTTP trigger boundary: `POST /sync/{entity_type}` enqueues a sync on the
//! worker pool and acknowledges immediately. `GET /ready` checks the database
//! and the Sleeper API; `GET /sync/status` lists per-key sync state.

use std::future::Future;
use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{Path as AxumPath, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use sha2::{Digest, Sha256};
use sleeper_core::{EntityKind, SyncMode};
use sleeper_sync::{
    DispatchError, DispatchOutcome, PlanRequest, StatusSource, SyncState, WorkerPool,
};
use tokio::net::TcpListener;
use tracing::{info, warn};

pub const CRATE_NAME: &str = "sleeper-web";

pub const SECRET_HEADER: &str = "x-sync-secret";

#[derive(Clone)]
pub struct AppState {
    pub pool: Arc<WorkerPool>,
    pub status: Arc<dyn StatusSource>,
    /// Without a configured secret every trigger is refused.
    pub secret: Option<String>,
}

impl AppState {
    pub fn new(
        pool: Arc<WorkerPool>,
        status: Arc<dyn StatusSource>,
        secret: Option<String>,
    ) -> Self {
        Self {
            pool,
            status,
            secret,
        }
    }

    fn authorized(&self, headers: &HeaderMap) -> bool {
        match (&self.secret, headers.get(SECRET_HEADER)) {
            (Some(expected), Some(provided)) => secrets_match(expected, provided.as_bytes()),
            _ => false,
        }
    }
}

#[derive(Debug, Deserialize)]
struct TriggerBody {
    entity_id: String,
    #[serde(default)]
    mode: Option<String>,
}

#[derive(Debug, Serialize)]
struct TriggerAck {
    accepted: bool,
    deduplicated: bool,
    entity_type: String,
    entity_id: String,
    mode: &'static str,
}

#[derive(Debug, Serialize)]
struct StatusView {
    in_flight: usize,
    accepting: bool,
    states: Vec<SyncState>,
}

pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/ready", get(ready_handler))
        .route("/sync/status", get(status_handler))
        .route("/sync/{entity_type}", post(sync_handler))
        .with_state(Arc::new(state))
}

pub async fn serve(
    state: AppState,
    port: u16,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> anyhow::Result<()> {
    let listener = TcpListener::bind(("0.0.0.0", port)).await?;
    info!(port, "trigger adapter listening");
    axum::serve(listener, app(state))
        .with_graceful_shutdown(shutdown)
        .await?;
    Ok(())
}

async fn health_handler() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

async fn ready_handler(State(state): State<Arc<AppState>>) -> Response {
    let checks = state.status.readiness().await;
    let code = if checks.is_ready() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (code, Json(json!({ "ready": checks.is_ready(), "checks": checks }))).into_response()
}

async fn status_handler(State(state): State<Arc<AppState>>, headers: HeaderMap) -> Response {
    if !state.authorized(&headers) {
        return error_response(StatusCode::UNAUTHORIZED, "invalid sync secret");
    }
    match state.status.sync_states().await {
        Ok(states) => Json(StatusView {
            in_flight: state.pool.in_flight_len(),
            accepting: !state.pool.is_closed(),
            states,
        })
        .into_response(),
        Err(err) => {
            warn!(error = %err, "could not list sync states");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "sync state unavailable")
        }
    }
}

/// Compares fixed-length digests so timing does not depend on where the
/// inputs first differ.
fn secrets_match(expected: &str, provided: &[u8]) -> bool {
    let (a, b) = (Sha256::digest(expected.as_bytes()), Sha256::digest(provided));
    a.iter().zip(b.iter()).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

fn error_response(status: StatusCode, message: impl Into<String>) -> Response {
    (status, Json(json!({ "error": message.into() }))).into_response()
}

fn parse_mode(raw: Option<&str>) -> Option<SyncMode> {
    match raw {
        None | Some("incremental") => Some(SyncMode::Incremental),
        Some("full") => Some(SyncMode::Full),
        Some(_) => None,
    }
}

async fn sync_handler(
    State(state): State<Arc<AppState>>,
    AxumPath(entity_type): AxumPath<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    if !state.authorized(&headers) {
        warn!(%entity_type, "rejected trigger with missing or wrong secret");
        return error_response(StatusCode::UNAUTHORIZED, "invalid sync secret");
    }

    let entity = match entity_type.parse::<EntityKind>() {
        Ok(entity) if entity.is_triggerable() => entity,
        _ => {
            return error_response(
                StatusCode::BAD_REQUEST,
                format!("unsupported entity type `{entity_type}`"),
            )
        }
    };
    let trigger: TriggerBody = match serde_json::from_slice(&body) {
        Ok(trigger) => trigger,
        Err(err) => return error_response(StatusCode::BAD_REQUEST, format!("malformed body: {err}")),
    };
    let entity_id = trigger.entity_id.trim().to_string();
    if entity_id.is_empty() {
        return error_response(StatusCode::BAD_REQUEST, "entity_id must not be empty");
    }
    let Some(mode) = parse_mode(trigger.mode.as_deref()) else {
        return error_response(StatusCode::BAD_REQUEST, "mode must be `full` or `incremental`");
    };

    let request = PlanRequest::for_entity(entity, entity_id.clone(), mode);
    match state.pool.dispatch(request) {
        Ok(outcome) => {
            let deduplicated = outcome == DispatchOutcome::Deduplicated;
            info!(%entity_type, %entity_id, mode = mode.as_str(), deduplicated, "trigger accepted");
            (
                StatusCode::ACCEPTED,
                Json(TriggerAck {
                    accepted: true,
                    deduplicated,
                    entity_type,
                    entity_id,
                    mode: mode.as_str(),
                }),
            )
                .into_response()
        }
        Err(DispatchError::QueueFull) => {
            error_response(StatusCode::TOO_MANY_REQUESTS, "sync queue is full; retry later")
        }
        Err(DispatchError::Closed) => {
            error_response(StatusCode::SERVICE_UNAVAILABLE, "sync workers are shutting down")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use axum::body::Body;
    use http_body_util::BodyExt;
    use chrono::{TimeZone, Utc};
    use sleeper_core::{EntityKind, SyncKey};
    use sleeper_sync::{Readiness, RunReport, SyncError, SyncRunner};
    use tokio::sync::Semaphore;
    use tower::ServiceExt;

    /// Holds every run until the test adds permits.
    struct HeldRunner(Semaphore);

    #[async_trait]
    impl SyncRunner for HeldRunner {
        async fn run(&self, _request: PlanRequest) -> Result<RunReport, SyncError> {
            if let Ok(permit) = self.0.acquire().await {
                permit.forget();
            }
            Ok(RunReport {
                run_id: Default::default(),
                deduplicated: false,
                lock_contended: false,
                tasks: Vec::new(),
            })
        }
    }

    struct FixedStatus {
        readiness: Readiness,
    }

    #[async_trait]
    impl StatusSource for FixedStatus {
        async fn readiness(&self) -> Readiness {
            self.readiness
        }

        async fn sync_states(&self) -> Result<Vec<SyncState>, SyncError> {
            let at = Utc.with_ymd_and_hms(2026, 10, 7, 12, 0, 0).single().expect("ts");
            Ok(vec![SyncState {
                key: SyncKey::new(EntityKind::Rosters, "784"),
                checksum: Some("abc".to_string()),
                last_synced_at: at,
                next_eligible_at: at,
            }])
        }
    }

    fn status(database: bool, sleeper_api: bool) -> Arc<dyn StatusSource> {
        Arc::new(FixedStatus {
            readiness: Readiness {
                database,
                sleeper_api,
            },
        })
    }

    fn state(pool: Arc<WorkerPool>, secret: Option<&str>) -> AppState {
        AppState::new(pool, status(true, true), secret.map(str::to_string))
    }

    fn get_request(uri: &str, secret: Option<&str>) -> axum::http::Request<Body> {
        let mut builder = axum::http::Request::builder().uri(uri);
        if let Some(secret) = secret {
            builder = builder.header(SECRET_HEADER, secret);
        }
        builder.body(Body::empty()).unwrap()
    }

    fn held_pool(workers: usize, queue: usize) -> (Arc<HeldRunner>, Arc<WorkerPool>) {
        let runner = Arc::new(HeldRunner(Semaphore::new(0)));
        let pool = WorkerPool::start(runner.clone(), workers, queue);
        (runner, pool)
    }

    fn trigger(entity_type: &str, secret: Option<&str>, body: &str) -> axum::http::Request<Body> {
        let mut builder = axum::http::Request::builder()
            .method("POST")
            .uri(format!("/sync/{entity_type}"))
            .header("content-type", "application/json");
        if let Some(secret) = secret {
            builder = builder.header(SECRET_HEADER, secret);
        }
        builder.body(Body::from(body.to_string())).unwrap()
    }

    async fn json_body(resp: Response) -> serde_json::Value {
        let bytes = resp.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn health_is_ok() {
        let (_runner, pool) = held_pool(1, 4);
        let resp = app(state(pool, None))
            .oneshot(axum::http::Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn secret_is_required() {
        let (_runner, pool) = held_pool(1, 4);
        let router = app(state(pool.clone(), Some("s3cret")));
        let body = r#"{"entity_id":"784"}"#;

        let missing = router.clone().oneshot(trigger("league", None, body)).await.unwrap();
        assert_eq!(missing.status(), StatusCode::UNAUTHORIZED);
        let wrong = router.oneshot(trigger("league", Some("guess"), body)).await.unwrap();
        assert_eq!(wrong.status(), StatusCode::UNAUTHORIZED);

        let unconfigured = app(state(pool, None))
            .oneshot(trigger("league", Some(""), body))
            .await
            .unwrap();
        assert_eq!(unconfigured.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn malformed_requests_are_rejected() {
        let (_runner, pool) = held_pool(1, 4);
        let router = app(state(pool, Some("k")));

        for (entity, body) in [
            ("leagues", r#"{"entity_id":"784"}"#),
            ("draft_picks", r#"{"entity_id":"784"}"#),
            ("league", r#"{"id":"784"}"#),
            ("league", r#"{"entity_id":"  "}"#),
            ("league", r#"{"entity_id":"784","mode":"partial"}"#),
            ("league", "not json"),
        ] {
            let resp = router.clone().oneshot(trigger(entity, Some("k"), body)).await.unwrap();
            assert_eq!(resp.status(), StatusCode::BAD_REQUEST, "{entity} {body}");
        }
    }

    #[tokio::test]
    async fn duplicate_trigger_is_acknowledged_as_deduplicated() {
        let (runner, pool) = held_pool(1, 4);
        let router = app(state(pool.clone(), Some("k")));
        let body = r#"{"entity_id":"784","mode":"full"}"#;

        let first = router.clone().oneshot(trigger("rosters", Some("k"), body)).await.unwrap();
        assert_eq!(first.status(), StatusCode::ACCEPTED);
        let ack = json_body(first).await;
        assert_eq!(ack["deduplicated"], json!(false));
        assert_eq!(ack["mode"], json!("full"));

        let second = router.oneshot(trigger("rosters", Some("k"), body)).await.unwrap();
        assert_eq!(second.status(), StatusCode::ACCEPTED);
        assert_eq!(json_body(second).await["deduplicated"], json!(true));

        runner.0.add_permits(4);
        pool.shutdown().await;
    }

    #[tokio::test]
    async fn full_queue_and_shutdown_map_to_status_codes() {
        let (runner, pool) = held_pool(1, 1);
        let router = app(state(pool.clone(), Some("k")));

        let mut statuses = Vec::new();
        for league in ["1", "2", "3"] {
            let body = format!(r#"{{"entity_id":"{league}"}}"#);
            let resp = router.clone().oneshot(trigger("league", Some("k"), &body)).await.unwrap();
            statuses.push(resp.status());
        }
        assert!(statuses.contains(&StatusCode::TOO_MANY_REQUESTS));

        runner.0.add_permits(8);
        pool.shutdown().await;
        let resp = router
            .oneshot(trigger("players", Some("k"), r#"{"entity_id":"nfl"}"#))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn ready_reflects_dependency_checks() {
        let (_runner, pool) = held_pool(1, 4);

        let ready = app(state(pool.clone(), None))
            .oneshot(get_request("/ready", None))
            .await
            .unwrap();
        assert_eq!(ready.status(), StatusCode::OK);
        let body = json_body(ready).await;
        assert_eq!(body["ready"], json!(true));
        assert_eq!(body["checks"]["sleeper_api"], json!(true));

        let down = app(AppState::new(pool, status(true, false), None))
            .oneshot(get_request("/ready", None))
            .await
            .unwrap();
        assert_eq!(down.status(), StatusCode::SERVICE_UNAVAILABLE);
        let body = json_body(down).await;
        assert_eq!(body["ready"], json!(false));
        assert_eq!(body["checks"]["database"], json!(true));
        assert_eq!(body["checks"]["sleeper_api"], json!(false));
    }

    #[tokio::test]
    async fn sync_status_needs_the_secret_and_lists_states() {
        let (_runner, pool) = held_pool(1, 4);
        let router = app(state(pool, Some("k")));

        let refused = router.clone().oneshot(get_request("/sync/status", None)).await.unwrap();
        assert_eq!(refused.status(), StatusCode::UNAUTHORIZED);

        let resp = router.oneshot(get_request("/sync/status", Some("k"))).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let body = json_body(resp).await;
        assert_eq!(body["accepting"], json!(true));
        assert_eq!(body["in_flight"], json!(0));
        assert_eq!(body["states"][0]["checksum"], json!("abc"));
        assert_eq!(body["states"][0]["key"]["entity_id"], json!("784"));
    }
}
