//! HTTP surface.
//!
//! Thin axum handlers: extract path, query, body and caller identity, then
//! hand off to `commands`. Bodies are taken as raw bytes so a malformed PMS
//! request still reaches the command layer and gets audited.

use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    routing::{get, post},
    Json, Router,
};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::info;

use crate::audit::SyncAuditLog;
use crate::commands::{self, CommandResponse};
use crate::db::DbState;
use crate::pms::PmsClient;
use crate::pms_sync::PmsSyncExecutor;
use crate::usage::local_now;

/// Header carrying the staff identity resolved by the fronting auth layer.
pub const STAFF_ID_HEADER: &str = "x-staff-id";

pub struct AppState<C, A> {
    pub db: Arc<DbState>,
    pub executor: Arc<PmsSyncExecutor<C, A>>,
}

impl<C, A> Clone for AppState<C, A> {
    fn clone(&self) -> Self {
        AppState {
            db: self.db.clone(),
            executor: self.executor.clone(),
        }
    }
}

impl<C: PmsClient, A: SyncAuditLog> AppState<C, A> {
    pub fn new(executor: PmsSyncExecutor<C, A>) -> Self {
        AppState {
            db: executor.db().clone(),
            executor: Arc::new(executor),
        }
    }
}

pub fn router<C, A>(state: AppState<C, A>) -> Router
where
    C: PmsClient + 'static,
    A: SyncAuditLog + 'static,
{
    Router::new()
        .route("/healthz", get(healthz))
        .route("/api/guest/minibar", get(guest_catalog::<C, A>))
        .route("/api/guest/minibar/usage", post(guest_usage::<C, A>))
        .route(
            "/api/staff/rooms/:room_id/minibar/usage",
            post(staff_usage::<C, A>),
        )
        .route("/api/pms/minibar", post(pms_minibar::<C, A>))
        .route("/api/pms/room-status", post(pms_room_status::<C, A>))
        .route("/api/pms/rooms/:room_id/minibar", post(pms_room_usage::<C, A>))
        .route("/api/pms/sync-log", get(pms_sync_log::<C, A>))
        .with_state(state)
}

/// Bind and serve until Ctrl-C.
pub async fn serve<C, A>(bind: SocketAddr, state: AppState<C, A>) -> std::io::Result<()>
where
    C: PmsClient + 'static,
    A: SyncAuditLog + 'static,
{
    let listener = tokio::net::TcpListener::bind(bind).await?;
    info!(addr = %listener.local_addr()?, "minibar sync service listening");
    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await
}

async fn shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_ok() {
        info!("shutdown requested");
    }
}

// ---------------------------------------------------------------------------
// Extraction helpers
// ---------------------------------------------------------------------------

fn reply((status, body): CommandResponse) -> (StatusCode, Json<Value>) {
    (status, Json(body))
}

fn staff_id(headers: &HeaderMap) -> Option<String> {
    headers
        .get(STAFF_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

fn query_value(query: &HashMap<String, String>, keys: &[&str]) -> Option<String> {
    keys.iter()
        .find_map(|k| query.get(*k))
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Raw body as JSON. Non-JSON text is kept as a string value so it fails
/// typed parsing downstream instead of here.
fn body_json(bytes: &Bytes) -> Value {
    if bytes.is_empty() {
        return Value::Null;
    }
    serde_json::from_slice(bytes)
        .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(bytes).into_owned()))
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

async fn healthz() -> (StatusCode, Json<Value>) {
    (
        StatusCode::OK,
        Json(json!({
            "status": "ok",
            "version": env!("CARGO_PKG_VERSION"),
            "gitSha": option_env!("BUILD_GIT_SHA").unwrap_or("unknown"),
            "buildTimestamp": option_env!("BUILD_TIMESTAMP").unwrap_or("unknown"),
        })),
    )
}

async fn guest_catalog<C, A>(
    State(state): State<AppState<C, A>>,
    Query(query): Query<HashMap<String, String>>,
) -> (StatusCode, Json<Value>)
where
    C: PmsClient + 'static,
    A: SyncAuditLog + 'static,
{
    let token = query_value(&query, &["roomToken", "room_token", "token"]);
    reply(commands::guest::guest_get_catalog(state.db, token, local_now()).await)
}

async fn guest_usage<C, A>(
    State(state): State<AppState<C, A>>,
    body: Bytes,
) -> (StatusCode, Json<Value>)
where
    C: PmsClient + 'static,
    A: SyncAuditLog + 'static,
{
    reply(commands::guest::guest_submit_usage(state.db, body_json(&body), local_now()).await)
}

async fn staff_usage<C, A>(
    State(state): State<AppState<C, A>>,
    Path(room_id): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> (StatusCode, Json<Value>)
where
    C: PmsClient + 'static,
    A: SyncAuditLog + 'static,
{
    reply(
        commands::staff::staff_record_usage(
            state.db,
            room_id,
            body_json(&body),
            staff_id(&headers),
            local_now(),
        )
        .await,
    )
}

async fn pms_minibar<C, A>(
    State(state): State<AppState<C, A>>,
    headers: HeaderMap,
    body: Bytes,
) -> (StatusCode, Json<Value>)
where
    C: PmsClient + 'static,
    A: SyncAuditLog + 'static,
{
    let initiated_by = staff_id(&headers);
    reply(
        commands::pms::pms_sync_minibar(&state.executor, body_json(&body), initiated_by.as_deref())
            .await,
    )
}

async fn pms_room_status<C, A>(
    State(state): State<AppState<C, A>>,
    headers: HeaderMap,
    body: Bytes,
) -> (StatusCode, Json<Value>)
where
    C: PmsClient + 'static,
    A: SyncAuditLog + 'static,
{
    let initiated_by = staff_id(&headers);
    reply(
        commands::pms::pms_sync_room_status(
            &state.executor,
            body_json(&body),
            initiated_by.as_deref(),
        )
        .await,
    )
}

async fn pms_room_usage<C, A>(
    State(state): State<AppState<C, A>>,
    Path(room_id): Path<String>,
    headers: HeaderMap,
) -> (StatusCode, Json<Value>)
where
    C: PmsClient + 'static,
    A: SyncAuditLog + 'static,
{
    let initiated_by = staff_id(&headers);
    reply(
        commands::pms::pms_push_room_usage(
            &state.executor,
            &room_id,
            local_now(),
            initiated_by.as_deref(),
        )
        .await,
    )
}

async fn pms_sync_log<C, A>(
    State(state): State<AppState<C, A>>,
    Query(query): Query<HashMap<String, String>>,
) -> (StatusCode, Json<Value>)
where
    C: PmsClient + 'static,
    A: SyncAuditLog + 'static,
{
    let hotel_id = query_value(&query, &["hotelId", "hotel_id"]);
    let limit = query_value(&query, &["limit"]).and_then(|v| v.parse::<i64>().ok());
    reply(commands::pms::pms_sync_log(state.db, hotel_id, limit).await)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::SqliteAuditLog;
    use crate::db::open_test_db;
    use crate::test_fixtures::{seed_hotel, seed_pms_settings, FakePms};
    use serial_test::serial;

    async fn spawn_app() -> String {
        let db = Arc::new(open_test_db());
        seed_hotel(&db);
        seed_pms_settings(&db, "h1", "https://pms.example");
        let executor =
            PmsSyncExecutor::new(db.clone(), FakePms::failing(&["Chips"]), SqliteAuditLog::new(db));
        let app = router(AppState::new(executor));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}")
    }

    #[tokio::test]
    async fn test_healthz_reports_version() {
        let base = spawn_app().await;
        let body: Value = reqwest::get(format!("{base}/healthz"))
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(body["status"], "ok");
        assert_eq!(body["version"], env!("CARGO_PKG_VERSION"));
    }

    #[tokio::test]
    async fn test_guest_routes_round_trip() {
        let base = spawn_app().await;
        let client = reqwest::Client::new();

        let missing = client.get(format!("{base}/api/guest/minibar")).send().await.unwrap();
        assert_eq!(missing.status(), reqwest::StatusCode::BAD_REQUEST);

        let catalog = client
            .get(format!("{base}/api/guest/minibar?roomToken=tok-r1"))
            .send()
            .await
            .unwrap();
        assert_eq!(catalog.status(), reqwest::StatusCode::OK);

        let submit = client
            .post(format!("{base}/api/guest/minibar/usage"))
            .json(&json!({ "roomToken": "tok-r1", "items": [{ "minibar_item_id": "I1", "quantity": 2 }] }))
            .send()
            .await
            .unwrap();
        assert_eq!(submit.status(), reqwest::StatusCode::OK);
        let body: Value = submit.json().await.unwrap();
        assert_eq!(body["inserted"], 1);

        let garbage = client
            .post(format!("{base}/api/guest/minibar/usage"))
            .body("not json")
            .send()
            .await
            .unwrap();
        assert_eq!(garbage.status(), reqwest::StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    #[serial]
    async fn test_pms_routes_carry_staff_identity() {
        let base = spawn_app().await;
        let client = reqwest::Client::new();

        let sync = client
            .post(format!("{base}/api/pms/minibar"))
            .header(STAFF_ID_HEADER, "staff-77")
            .json(&json!({
                "hotelId": "h1",
                "roomNumber": "R1",
                "items": [{ "item_name": "Soda", "quantity": 1 }, { "item_name": "Chips", "quantity": 1 }]
            }))
            .send()
            .await
            .unwrap();
        assert_eq!(sync.status(), reqwest::StatusCode::OK);
        let body: Value = sync.json().await.unwrap();
        assert_eq!(body["status"], "partial");

        let broken = client
            .post(format!("{base}/api/pms/room-status"))
            .body("{oops")
            .send()
            .await
            .unwrap();
        assert_eq!(broken.status(), reqwest::StatusCode::BAD_REQUEST);

        let log: Value = client
            .get(format!("{base}/api/pms/sync-log?limit=10"))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(log["count"], 2);
        assert_eq!(log["attempts"][0]["sync_type"], "status_update");
        assert_eq!(log["attempts"][1]["initiated_by"], "staff-77");
    }
}
