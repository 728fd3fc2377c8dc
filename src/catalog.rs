//! Guest-facing minibar catalog.
//!
//! Assembles everything the in-room page shows after a QR scan: hotel
//! branding, the active item catalog, category ordering, promoted items, and
//! what has already been charged to the room today. The reads are independent
//! and are issued together on the blocking pool, but they share the single
//! `DbState` connection, so SQLite serves them one at a time behind its mutex.

use chrono::{DateTime, FixedOffset};
use rusqlite::{params, Connection, OptionalExtension};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::db::{run_blocking, DbState};
use crate::error::PipelineError;
use crate::rooms::Room;
use crate::usage::{list_active_usage, DayWindow, UsageRecord, UsageSource};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Branding {
    pub hotel_name: String,
    pub logo_url: Option<String>,
    pub primary_color: Option<String>,
    pub welcome_message: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MinibarItem {
    pub id: String,
    pub name: String,
    pub category: String,
    pub price: f64,
    pub is_active: bool,
    pub localized_names: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Recommendation {
    pub id: String,
    pub minibar_item_id: String,
    pub item_name: String,
    pub headline: Option<String>,
    pub sort_order: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GuestCatalog {
    pub room: Room,
    pub branding: Branding,
    pub items: Vec<MinibarItem>,
    pub category_order: Vec<String>,
    pub recommendations: Vec<Recommendation>,
    pub existing_usage: Vec<ChargedToday>,
}

/// A charge as the guest sees it. Who recorded it stays internal.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChargedToday {
    pub id: String,
    pub minibar_item_id: String,
    pub item_name: String,
    pub quantity: i64,
    pub source: UsageSource,
    pub usage_date: String,
}

impl From<UsageRecord> for ChargedToday {
    fn from(record: UsageRecord) -> Self {
        ChargedToday {
            id: record.id,
            minibar_item_id: record.minibar_item_id,
            item_name: record.item_name,
            quantity: record.quantity,
            source: record.source,
            usage_date: record.usage_date,
        }
    }
}

// ---------------------------------------------------------------------------
// Readers
// ---------------------------------------------------------------------------

fn load_branding(
    conn: &Connection,
    hotel_id: &str,
    fallback_name: &str,
) -> Result<Branding, PipelineError> {
    let row = conn
        .query_row(
            "SELECT display_name, logo_url, primary_color, welcome_message
             FROM hotel_branding WHERE hotel_id = ?1",
            params![hotel_id],
            |row| {
                Ok((
                    row.get::<_, Option<String>>(0)?,
                    row.get::<_, Option<String>>(1)?,
                    row.get::<_, Option<String>>(2)?,
                    row.get::<_, Option<String>>(3)?,
                ))
            },
        )
        .optional()?;

    let Some((display_name, logo_url, primary_color, welcome_message)) = row else {
        debug!(hotel_id = %hotel_id, "no branding record, using hotel name");
        return Ok(Branding {
            hotel_name: fallback_name.to_string(),
            logo_url: None,
            primary_color: None,
            welcome_message: None,
        });
    };

    let hotel_name = display_name
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| fallback_name.to_string());

    Ok(Branding {
        hotel_name,
        logo_url,
        primary_color,
        welcome_message,
    })
}

fn parse_localized_names(item_id: &str, raw: &str) -> BTreeMap<String, String> {
    match serde_json::from_str::<BTreeMap<String, String>>(raw) {
        Ok(map) => map,
        Err(e) => {
            warn!(item_id = %item_id, error = %e, "minibar item translations are not a string map");
            BTreeMap::new()
        }
    }
}

fn load_active_items(conn: &Connection, hotel_id: &str) -> Result<Vec<MinibarItem>, PipelineError> {
    let mut stmt = conn.prepare(
        "SELECT i.id, i.name, i.category, i.price, i.is_active, i.name_translations
         FROM minibar_items i
         LEFT JOIN minibar_categories c ON c.hotel_id = i.hotel_id AND c.name = i.category
         WHERE i.hotel_id = ?1 AND i.is_active = 1
         ORDER BY COALESCE(c.sort_order, 2147483647), i.category, i.name",
    )?;
    let rows = stmt.query_map(params![hotel_id], |row| {
        let id: String = row.get(0)?;
        let translations: String = row.get(5)?;
        Ok(MinibarItem {
            localized_names: parse_localized_names(&id, &translations),
            id,
            name: row.get(1)?,
            category: row.get(2)?,
            price: row.get(3)?,
            is_active: row.get::<_, i64>(4)? != 0,
        })
    })?;
    let items = rows.collect::<Result<Vec<_>, _>>()?;
    Ok(items)
}

fn load_category_order(conn: &Connection, hotel_id: &str) -> Result<Vec<String>, PipelineError> {
    let mut stmt = conn.prepare(
        "SELECT name FROM minibar_categories WHERE hotel_id = ?1 ORDER BY sort_order, name",
    )?;
    let rows = stmt.query_map(params![hotel_id], |row| row.get(0))?;
    let names = rows.collect::<Result<Vec<String>, _>>()?;
    Ok(names)
}

fn load_recommendations(
    conn: &Connection,
    hotel_id: &str,
) -> Result<Vec<Recommendation>, PipelineError> {
    let mut stmt = conn.prepare(
        "SELECT r.id, r.minibar_item_id, i.name, r.headline, r.sort_order
         FROM minibar_recommendations r
         JOIN minibar_items i ON i.id = r.minibar_item_id
         WHERE r.hotel_id = ?1 AND r.is_active = 1 AND i.is_active = 1
         ORDER BY r.sort_order, i.name",
    )?;
    let rows = stmt.query_map(params![hotel_id], |row| {
        Ok(Recommendation {
            id: row.get(0)?,
            minibar_item_id: row.get(1)?,
            item_name: row.get(2)?,
            headline: row.get(3)?,
            sort_order: row.get(4)?,
        })
    })?;
    let recommendations = rows.collect::<Result<Vec<_>, _>>()?;
    Ok(recommendations)
}

/// Categories configured for the hotel first, then any category used by an
/// active item but missing from the configuration, alphabetically.
fn complete_category_order(mut configured: Vec<String>, items: &[MinibarItem]) -> Vec<String> {
    let known: BTreeSet<String> = configured.iter().cloned().collect();
    let extra: BTreeSet<String> = items
        .iter()
        .map(|item| item.category.clone())
        .filter(|category| !known.contains(category))
        .collect();
    configured.extend(extra);
    configured
}

// ---------------------------------------------------------------------------
// Assembly
// ---------------------------------------------------------------------------

/// Build the guest catalog for an already resolved room.
pub async fn assemble_catalog(
    db: Arc<DbState>,
    room: Room,
    now: DateTime<FixedOffset>,
) -> Result<GuestCatalog, PipelineError> {
    let window = DayWindow::containing(&now);

    let branding = {
        let hotel_id = room.hotel_id.clone();
        let fallback = room.hotel_name.clone();
        run_blocking(db.clone(), move |conn| load_branding(conn, &hotel_id, &fallback))
    };
    let items = {
        let hotel_id = room.hotel_id.clone();
        run_blocking(db.clone(), move |conn| load_active_items(conn, &hotel_id))
    };
    let categories = {
        let hotel_id = room.hotel_id.clone();
        run_blocking(db.clone(), move |conn| load_category_order(conn, &hotel_id))
    };
    let recommendations = {
        let hotel_id = room.hotel_id.clone();
        run_blocking(db.clone(), move |conn| load_recommendations(conn, &hotel_id))
    };
    let existing_usage = {
        let room_id = room.id.clone();
        run_blocking(db, move |conn| list_active_usage(conn, &room_id, &window))
    };

    let (branding, items, categories, recommendations, existing_usage) =
        tokio::try_join!(branding, items, categories, recommendations, existing_usage)?;

    debug!(
        room_id = %room.id,
        items = items.len(),
        existing_usage = existing_usage.len(),
        "guest catalog assembled"
    );

    Ok(GuestCatalog {
        category_order: complete_category_order(categories, &items),
        room,
        branding,
        items,
        recommendations,
        existing_usage: existing_usage.into_iter().map(ChargedToday::from).collect(),
    })
}
