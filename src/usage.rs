//! Minibar usage recording.
//!
//! A (room, item, calendar day) combination carries at most one active charge.
//! Guest self-reports are checked against every non-cleared row for that
//! combination, whichever source recorded it, and skipped when one exists.
//! Staff entries take precedence: they override a guest row in place rather
//! than adding a second charge.
//!
//! Each line item is its own unit of work (an immediate transaction around
//! check-then-insert), backed by the partial unique index on
//! `(room_id, minibar_item_id, usage_day) WHERE is_cleared = 0`. A race that
//! slips past the existence check hits that index and is treated as a skip.

use chrono::{DateTime, FixedOffset, Local, NaiveDate, SecondsFormat, TimeZone, Utc};
use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use rusqlite::{params, Connection, TransactionBehavior};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::db::DbState;
use crate::error::PipelineError;
use crate::rooms::Room;

/// Bounds on the quantity of one usage line, guest or staff.
pub const MIN_QUANTITY: i64 = 1;
pub const MAX_QUANTITY: i64 = 50;

// ---------------------------------------------------------------------------
// Source
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UsageSource {
    Staff,
    Guest,
}

impl UsageSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            UsageSource::Staff => "staff",
            UsageSource::Guest => "guest",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim() {
            "staff" => Some(UsageSource::Staff),
            "guest" => Some(UsageSource::Guest),
            _ => None,
        }
    }
}

impl FromSql for UsageSource {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        let raw = value.as_str()?;
        UsageSource::parse(raw)
            .ok_or_else(|| FromSqlError::Other(format!("unknown usage source: {raw}").into()))
    }
}

impl ToSql for UsageSource {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.as_str()))
    }
}

// ---------------------------------------------------------------------------
// Day window
// ---------------------------------------------------------------------------

/// Wall-clock "now" in the server's local offset.
pub fn local_now() -> DateTime<FixedOffset> {
    let now = Local::now();
    now.with_timezone(now.offset())
}

/// Canonical stored timestamp format. Fixed width, so string comparison in
/// SQL orders the same way as time does.
pub fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Local calendar day containing a given instant, midnight to midnight.
///
/// The window is identified by its calendar date, the same `usage_day` bucket
/// the one-active-charge index keys on. The catalog's "already charged today"
/// view, guest deduplication, staff entry and the room usage push all select
/// rows by that bucket, so they agree with each other and with the index on
/// every day, including the 23h and 25h days of a DST transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DayWindow {
    pub day: NaiveDate,
}

impl DayWindow {
    pub fn containing<Tz: TimeZone>(now: &DateTime<Tz>) -> Self {
        DayWindow {
            day: now.date_naive(),
        }
    }

    /// Day bucket stored alongside each usage row.
    pub fn day_key(&self) -> String {
        self.day.format("%Y-%m-%d").to_string()
    }
}

// ---------------------------------------------------------------------------
// Records and lookups
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UsageRecord {
    pub id: String,
    pub room_id: String,
    pub minibar_item_id: String,
    pub item_name: String,
    pub quantity: i64,
    pub source: UsageSource,
    pub recorded_by: Option<String>,
    pub usage_date: String,
    pub is_cleared: bool,
}

const USAGE_SELECT: &str = "SELECT u.id, u.room_id, u.minibar_item_id, COALESCE(i.name, ''),
        u.quantity, u.source, u.recorded_by, u.usage_date, u.is_cleared
     FROM minibar_usage u
     LEFT JOIN minibar_items i ON i.id = u.minibar_item_id";

fn map_usage_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<UsageRecord> {
    Ok(UsageRecord {
        id: row.get(0)?,
        room_id: row.get(1)?,
        minibar_item_id: row.get(2)?,
        item_name: row.get(3)?,
        quantity: row.get(4)?,
        source: row.get(5)?,
        recorded_by: row.get(6)?,
        usage_date: row.get(7)?,
        is_cleared: row.get::<_, i64>(8)? != 0,
    })
}

/// Non-cleared usage rows for one (room, item) inside `window`, any source.
pub fn find_active_usage(
    conn: &Connection,
    room_id: &str,
    item_id: &str,
    window: &DayWindow,
) -> Result<Vec<UsageRecord>, PipelineError> {
    let sql = format!(
        "{USAGE_SELECT}
         WHERE u.room_id = ?1 AND u.minibar_item_id = ?2 AND u.is_cleared = 0
           AND u.usage_day = ?3
         ORDER BY u.usage_date"
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(params![room_id, item_id, window.day_key()], map_usage_row)?;
    let records = rows.collect::<Result<Vec<_>, _>>()?;
    Ok(records)
}

/// Non-cleared usage rows for a room inside `window`, any source.
pub fn list_active_usage(
    conn: &Connection,
    room_id: &str,
    window: &DayWindow,
) -> Result<Vec<UsageRecord>, PipelineError> {
    let sql = format!(
        "{USAGE_SELECT}
         WHERE u.room_id = ?1 AND u.is_cleared = 0
           AND u.usage_day = ?2
         ORDER BY u.usage_date, u.id"
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(params![room_id, window.day_key()], map_usage_row)?;
    let records = rows.collect::<Result<Vec<_>, _>>()?;
    Ok(records)
}

// ---------------------------------------------------------------------------
// Deduplication
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DedupDecision {
    Insert,
    Skip { existing_source: UsageSource },
}

/// Decide whether a guest line for (room, item) may be inserted today.
pub fn check_duplicate(
    conn: &Connection,
    room_id: &str,
    item_id: &str,
    window: &DayWindow,
) -> Result<DedupDecision, PipelineError> {
    let existing = find_active_usage(conn, room_id, item_id, window)?;
    Ok(match existing.first() {
        Some(record) => DedupDecision::Skip {
            existing_source: record.source,
        },
        None => DedupDecision::Insert,
    })
}

fn is_unique_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _)
            if e.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
    )
}

// ---------------------------------------------------------------------------
// Guest ingestion
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct GuestUsageLine {
    #[serde(alias = "minibarItemId", alias = "item_id")]
    pub minibar_item_id: String,
    pub quantity: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IngestOutcome {
    pub inserted_count: usize,
    pub skipped_count: usize,
    pub room_number: String,
}

/// Reject the whole batch on the first invalid line, before any write.
fn validate_guest_lines(
    conn: &Connection,
    room: &Room,
    lines: &[GuestUsageLine],
) -> Result<(), PipelineError> {
    if lines.is_empty() {
        return Err(PipelineError::invalid_input("No items provided"));
    }

    for (idx, line) in lines.iter().enumerate() {
        let position = idx + 1;
        let item_id = line.minibar_item_id.trim();
        if item_id.is_empty() {
            return Err(PipelineError::invalid_input(format!(
                "Item {position}: missing minibar_item_id"
            )));
        }
        if !(MIN_QUANTITY..=MAX_QUANTITY).contains(&line.quantity) {
            return Err(PipelineError::invalid_input(format!(
                "Item {position}: quantity must be between {MIN_QUANTITY} and {MAX_QUANTITY}"
            )));
        }
        let known: i64 = conn.query_row(
            "SELECT COUNT(*) FROM minibar_items WHERE id = ?1 AND hotel_id = ?2 AND is_active = 1",
            params![item_id, room.hotel_id],
            |row| row.get(0),
        )?;
        if known == 0 {
            return Err(PipelineError::invalid_input(format!(
                "Item {position}: unknown minibar item"
            )));
        }
    }

    Ok(())
}

/// Dedup-and-insert one guest line. Returns `true` when a row was written.
fn record_guest_line(
    conn: &mut Connection,
    room: &Room,
    line: &GuestUsageLine,
    window: &DayWindow,
    recorded_at: &str,
) -> Result<bool, PipelineError> {
    let item_id = line.minibar_item_id.trim();
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

    if let DedupDecision::Skip { existing_source } =
        check_duplicate(&tx, &room.id, item_id, window)?
    {
        debug!(
            room_id = %room.id,
            item_id = %item_id,
            existing_source = existing_source.as_str(),
            "guest usage skipped: active charge already recorded today"
        );
        return Ok(false);
    }

    let inserted = tx.execute(
        "INSERT INTO minibar_usage (id, room_id, minibar_item_id, quantity, source,
                                    recorded_by, usage_date, usage_day)
         VALUES (?1, ?2, ?3, ?4, ?5, NULL, ?6, ?7)",
        params![
            Uuid::new_v4().to_string(),
            room.id,
            item_id,
            line.quantity,
            UsageSource::Guest,
            recorded_at,
            window.day_key(),
        ],
    );

    match inserted {
        Ok(_) => {
            tx.commit()?;
            Ok(true)
        }
        Err(e) if is_unique_violation(&e) => {
            warn!(
                room_id = %room.id,
                item_id = %item_id,
                "guest usage skipped: concurrent charge won the insert"
            );
            Ok(false)
        }
        Err(e) => Err(e.into()),
    }
}

/// Persist the non-duplicate subset of a guest submission.
///
/// Lines are checked in submission order; a repeated item inside one batch is
/// skipped like any other duplicate.
pub fn ingest_guest_usage_at(
    db: &DbState,
    room: &Room,
    lines: &[GuestUsageLine],
    now: &DateTime<FixedOffset>,
) -> Result<IngestOutcome, PipelineError> {
    let mut conn = db
        .conn
        .lock()
        .map_err(|e| PipelineError::Storage(format!("db lock poisoned: {e}")))?;

    validate_guest_lines(&conn, room, lines)?;

    let window = DayWindow::containing(now);
    let recorded_at = format_timestamp(&now.with_timezone(&Utc));
    let mut inserted_count = 0;
    let mut skipped_items = Vec::new();

    for line in lines {
        if record_guest_line(&mut conn, room, line, &window, &recorded_at)? {
            inserted_count += 1;
        } else {
            skipped_items.push(line.minibar_item_id.trim().to_string());
        }
    }

    info!(
        room_id = %room.id,
        hotel_id = %room.hotel_id,
        inserted = inserted_count,
        skipped = skipped_items.len(),
        skipped_items = ?skipped_items,
        "guest minibar usage ingested"
    );

    Ok(IngestOutcome {
        inserted_count,
        skipped_count: skipped_items.len(),
        room_number: room.room_number.clone(),
    })
}

// ---------------------------------------------------------------------------
// Staff entry
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StaffUsageOutcome {
    Inserted,
    OverrodeGuest,
    Corrected,
}

/// Record consumption verified by staff in the room.
///
/// Staff records are authoritative: an active guest row for the same day is
/// taken over in place, and an existing staff row has its quantity corrected.
/// Neither path creates a second active charge.
pub fn record_staff_usage_at(
    db: &DbState,
    room_id: &str,
    item_id: &str,
    quantity: i64,
    staff_id: &str,
    now: &DateTime<FixedOffset>,
) -> Result<StaffUsageOutcome, PipelineError> {
    let item_id = item_id.trim();
    let staff_id = staff_id.trim();
    if item_id.is_empty() {
        return Err(PipelineError::invalid_input("Missing minibar_item_id"));
    }
    if staff_id.is_empty() {
        return Err(PipelineError::invalid_input("Missing staff identity"));
    }
    if !(MIN_QUANTITY..=MAX_QUANTITY).contains(&quantity) {
        return Err(PipelineError::invalid_input(format!(
            "quantity must be between {MIN_QUANTITY} and {MAX_QUANTITY}"
        )));
    }

    let mut conn = db
        .conn
        .lock()
        .map_err(|e| PipelineError::Storage(format!("db lock poisoned: {e}")))?;

    let window = DayWindow::containing(now);
    let recorded_at = format_timestamp(&now.with_timezone(&Utc));
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

    let known: i64 = tx.query_row(
        "SELECT COUNT(*) FROM rooms r
         JOIN minibar_items i ON i.hotel_id = r.hotel_id
         WHERE r.id = ?1 AND i.id = ?2",
        params![room_id, item_id],
        |row| row.get(0),
    )?;
    if known == 0 {
        return Err(PipelineError::invalid_input("Unknown room or minibar item"));
    }

    let existing = find_active_usage(&tx, room_id, item_id, &window)?;
    let outcome = match existing.first() {
        None => {
            tx.execute(
                "INSERT INTO minibar_usage (id, room_id, minibar_item_id, quantity, source,
                                            recorded_by, usage_date, usage_day)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    Uuid::new_v4().to_string(),
                    room_id,
                    item_id,
                    quantity,
                    UsageSource::Staff,
                    staff_id,
                    recorded_at,
                    window.day_key(),
                ],
            )?;
            StaffUsageOutcome::Inserted
        }
        Some(record) => {
            tx.execute(
                "UPDATE minibar_usage
                 SET source = ?1, recorded_by = ?2, quantity = ?3, updated_at = datetime('now')
                 WHERE id = ?4",
                params![UsageSource::Staff, staff_id, quantity, record.id],
            )?;
            match record.source {
                UsageSource::Guest => StaffUsageOutcome::OverrodeGuest,
                UsageSource::Staff => StaffUsageOutcome::Corrected,
            }
        }
    };
    tx.commit()?;

    info!(
        room_id = %room_id,
        item_id = %item_id,
        outcome = ?outcome,
        "staff minibar usage recorded"
    );
    Ok(outcome)
}
