//! External Property Management System (PMS) client.
//!
//! Typed request/response schema for the two outbound calls the pipeline
//! makes (minibar charge posting and room status updates), credential
//! resolution per hotel, and the reqwest-backed HTTP implementation. The
//! [`PmsClient`] trait is the seam tests substitute a fake behind.

use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;
use base64::Engine as _;
use reqwest::{Client, Method, StatusCode};
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::future::Future;
use std::time::Duration;
use tracing::debug;
use zeroize::Zeroize;

use crate::db;
use crate::error::PipelineError;
use crate::storage;

const MINIBAR_CHARGE_PATH: &str = "/api/v1/minibar/charges";
const ROOM_STATUS_PATH: &str = "/api/v1/housekeeping/room-status";

// ---------------------------------------------------------------------------
// Wire schema
// ---------------------------------------------------------------------------

/// Room status vocabulary understood by the PMS.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PmsRoomStatus {
    Clean,
    Dirty,
}

impl PmsRoomStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PmsRoomStatus::Clean => "clean",
            PmsRoomStatus::Dirty => "dirty",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MinibarChargeRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub property_id: Option<String>,
    pub room_number: String,
    pub item_name: String,
    pub quantity: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unit_price: Option<f64>,
    pub posted_at: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RoomStatusRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub property_id: Option<String>,
    pub room_number: String,
    pub status: PmsRoomStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub assignment_id: Option<String>,
}

/// Acknowledgement body returned by the PMS. Every field is optional; an
/// empty 2xx body reads as a default acknowledgement.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PmsAck {
    #[serde(default)]
    pub success: Option<bool>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default, alias = "id", alias = "transactionId")]
    pub reference: Option<String>,
}

// ---------------------------------------------------------------------------
// Credentials
// ---------------------------------------------------------------------------

/// Resolved PMS endpoint and secret for one hotel. The key is wiped on drop.
pub struct PmsCredentials {
    pub base_url: String,
    pub api_key: String,
    pub property_id: Option<String>,
}

impl fmt::Debug for PmsCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PmsCredentials")
            .field("base_url", &self.base_url)
            .field("api_key", &"***")
            .field("property_id", &self.property_id)
            .finish()
    }
}

impl Drop for PmsCredentials {
    fn drop(&mut self) {
        self.api_key.zeroize();
    }
}

#[derive(Debug, Default, Deserialize)]
struct ConnectionStringPayload {
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    key: Option<String>,
    #[serde(default, alias = "propertyId")]
    property: Option<String>,
}

/// Decode a PMS connection string: raw JSON or base64/base64url JSON carrying
/// `url`, `key` and optionally `property`.
fn decode_connection_string(raw: &str) -> Option<ConnectionStringPayload> {
    let trimmed = raw.trim();
    if trimmed.starts_with('{') {
        return serde_json::from_str(trimmed).ok();
    }

    let compact: String = trimmed.chars().filter(|c| !c.is_whitespace()).collect();
    if compact.len() < 20 {
        return None;
    }

    let base64 = compact.replace('-', "+").replace('_', "/");
    let padded = format!(
        "{}{}",
        base64,
        "=".repeat((4usize.wrapping_sub(base64.len() % 4)) % 4)
    );
    let decoded = BASE64_STANDARD.decode(padded).ok()?;
    serde_json::from_slice(&decoded).ok()
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

/// Resolve PMS credentials for a hotel: OS keyring first, then the
/// `pms.{hotel}` local settings category, then whatever a connection string
/// stored as the API key carries.
pub fn resolve_credentials(
    conn: &Connection,
    hotel_id: &str,
) -> Result<PmsCredentials, PipelineError> {
    let hotel_id = hotel_id.trim();
    let category = format!("pms.{hotel_id}");

    let raw_key = non_empty(
        storage::get_credential(&storage::hotel_key(storage::KEY_PMS_API_KEY, hotel_id))
            .or_else(|| db::get_setting(conn, &category, "api_key")),
    )
    .ok_or_else(|| {
        PipelineError::Configuration(format!("missing PMS API key for hotel {hotel_id}"))
    })?;

    let decoded = decode_connection_string(&raw_key).unwrap_or_default();

    let base_url = non_empty(
        storage::get_credential(&storage::hotel_key(storage::KEY_PMS_BASE_URL, hotel_id))
            .or_else(|| db::get_setting(conn, &category, "base_url")),
    )
    .or_else(|| non_empty(decoded.url))
    .map(|url| normalize_pms_url(&url))
    .ok_or_else(|| {
        PipelineError::Configuration(format!("missing PMS base URL for hotel {hotel_id}"))
    })?;

    let property_id =
        non_empty(db::get_setting(conn, &category, "property_id")).or_else(|| non_empty(decoded.property));

    let api_key = non_empty(decoded.key).unwrap_or(raw_key);

    Ok(PmsCredentials {
        base_url,
        api_key,
        property_id,
    })
}

/// Normalise a PMS base URL: ensure a scheme (http only for local hosts) and
/// strip trailing slashes.
pub fn normalize_pms_url(url: &str) -> String {
    let mut url = url.trim().to_string();

    if !url.starts_with("http://") && !url.starts_with("https://") {
        if url.starts_with("localhost") || url.starts_with("127.0.0.1") {
            url = format!("http://{url}");
        } else {
            url = format!("https://{url}");
        }
    }

    while url.ends_with('/') {
        url.pop();
    }

    url
}

// ---------------------------------------------------------------------------
// Client seam
// ---------------------------------------------------------------------------

/// Outbound PMS operations. Errors are operator-facing messages.
pub trait PmsClient: Send + Sync {
    fn post_minibar_charge(
        &self,
        credentials: &PmsCredentials,
        request: &MinibarChargeRequest,
    ) -> impl Future<Output = Result<PmsAck, String>> + Send;

    fn post_room_status(
        &self,
        credentials: &PmsCredentials,
        request: &RoomStatusRequest,
    ) -> impl Future<Output = Result<PmsAck, String>> + Send;
}

/// Convert a `reqwest::Error` into an operator-readable message.
fn friendly_error(url: &str, err: &reqwest::Error) -> String {
    if err.is_connect() {
        return format!("Cannot reach PMS at {url}");
    }
    if err.is_timeout() {
        return format!("Connection to PMS at {url} timed out");
    }
    if err.is_builder() {
        return format!("Invalid PMS URL: {url}");
    }
    format!("Network error communicating with PMS at {url}: {err}")
}

/// Convert an HTTP status code into an operator-readable message.
fn status_error(status: StatusCode) -> String {
    match status.as_u16() {
        401 => "PMS API key is invalid or expired".to_string(),
        403 => "PMS rejected the credentials for this property".to_string(),
        404 => "PMS endpoint not found".to_string(),
        429 => "PMS rate limit exceeded".to_string(),
        s if s >= 500 => format!("PMS server error (HTTP {s})"),
        s => format!("Unexpected response from PMS (HTTP {s})"),
    }
}

/// Build the error detail for a non-2xx PMS response.
fn failure_detail(status: StatusCode, body_text: &str) -> String {
    let body_text = body_text.trim();
    if let Ok(json) = serde_json::from_str::<Value>(body_text) {
        let message = json
            .get("error")
            .or_else(|| json.get("message"))
            .and_then(Value::as_str)
            .map(|s| s.to_string())
            .unwrap_or_else(|| status_error(status));
        return format!("{message} (HTTP {})", status.as_u16());
    }
    if body_text.is_empty() {
        format!("{} (HTTP {})", status_error(status), status.as_u16())
    } else {
        format!(
            "{} (HTTP {}): {}",
            status_error(status),
            status.as_u16(),
            body_text
        )
    }
}

/// reqwest-backed PMS client.
#[derive(Clone)]
pub struct HttpPmsClient {
    client: Client,
}

impl HttpPmsClient {
    pub fn new(timeout: Duration) -> Result<Self, String> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| format!("Failed to create HTTP client: {e}"))?;
        Ok(HttpPmsClient { client })
    }

    async fn send_json<B: Serialize + Sync>(
        &self,
        credentials: &PmsCredentials,
        method: Method,
        path: &str,
        body: &B,
    ) -> Result<PmsAck, String> {
        let base = normalize_pms_url(&credentials.base_url);
        let full_url = format!("{base}{path}");

        let mut req = self
            .client
            .request(method, &full_url)
            .header("X-PMS-API-Key", credentials.api_key.as_str())
            .json(body);
        if let Some(property_id) = credentials.property_id.as_deref() {
            req = req.header("X-PMS-Property", property_id);
        }

        let resp = req.send().await.map_err(|e| friendly_error(&base, &e))?;
        let status = resp.status();
        let body_text = resp.text().await.unwrap_or_default();

        if !status.is_success() {
            return Err(failure_detail(status, &body_text));
        }

        if body_text.trim().is_empty() {
            return Ok(PmsAck::default());
        }
        let ack: PmsAck = serde_json::from_str(&body_text)
            .map_err(|e| format!("Invalid JSON from PMS: {e}"))?;
        if ack.success == Some(false) {
            return Err(ack
                .message
                .clone()
                .unwrap_or_else(|| "PMS rejected the request".to_string()));
        }

        debug!(path = %path, reference = ?ack.reference, "PMS call acknowledged");
        Ok(ack)
    }
}

impl PmsClient for HttpPmsClient {
    async fn post_minibar_charge(
        &self,
        credentials: &PmsCredentials,
        request: &MinibarChargeRequest,
    ) -> Result<PmsAck, String> {
        self.send_json(credentials, Method::POST, MINIBAR_CHARGE_PATH, request)
            .await
    }

    async fn post_room_status(
        &self,
        credentials: &PmsCredentials,
        request: &RoomStatusRequest,
    ) -> Result<PmsAck, String> {
        self.send_json(credentials, Method::PUT, ROOM_STATUS_PATH, request)
            .await
    }
}
