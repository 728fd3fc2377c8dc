//! Shared seed data for unit tests.

use rusqlite::params;
use std::collections::HashSet;
use std::sync::Mutex;
use std::time::Duration;

use crate::db::{self, DbState};
use crate::pms::{MinibarChargeRequest, PmsAck, PmsClient, PmsCredentials, RoomStatusRequest};

/// One hotel (`h1`) with two rooms, two categories and four items, one of
/// them inactive.
pub fn seed_hotel(db: &DbState) {
    let conn = db.conn.lock().unwrap();
    conn.execute_batch(
        "INSERT INTO hotels (id, organization_id, name) VALUES ('h1', 'org1', 'Harbor View');
         INSERT INTO rooms (id, hotel_id, organization_id, room_number, access_token)
            VALUES ('r1', 'h1', 'org1', 'R1', 'tok-r1');
         INSERT INTO rooms (id, hotel_id, organization_id, room_number, access_token)
            VALUES ('r2', 'h1', 'org1', 'R2', 'tok-r2');
         INSERT INTO minibar_categories (id, hotel_id, name, sort_order) VALUES ('c1', 'h1', 'drinks', 1);
         INSERT INTO minibar_categories (id, hotel_id, name, sort_order) VALUES ('c2', 'h1', 'snacks', 2);
         INSERT INTO minibar_items (id, hotel_id, name, category, price, name_translations)
            VALUES ('I1', 'h1', 'Soda', 'drinks', 3.5, '{\"el\":\"Αναψυκτικό\"}');
         INSERT INTO minibar_items (id, hotel_id, name, category, price)
            VALUES ('I2', 'h1', 'Chips', 'snacks', 4.0);
         INSERT INTO minibar_items (id, hotel_id, name, category, price)
            VALUES ('I3', 'h1', 'Water', 'drinks', 2.0);
         INSERT INTO minibar_items (id, hotel_id, name, category, price, is_active)
            VALUES ('I4', 'h1', 'Beer', 'drinks', 6.0, 0);",
    )
    .expect("seed hotel");
}

/// Insert a usage row directly, bypassing the pipeline.
pub fn insert_usage_row(
    db: &DbState,
    id: &str,
    room_id: &str,
    item_id: &str,
    quantity: i64,
    source: &str,
    usage_date: &str,
    usage_day: &str,
) {
    let conn = db.conn.lock().unwrap();
    conn.execute(
        "INSERT INTO minibar_usage (id, room_id, minibar_item_id, quantity, source, usage_date, usage_day)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![id, room_id, item_id, quantity, source, usage_date, usage_day],
    )
    .expect("insert usage row");
}

/// Store PMS credentials for `hotel_id` in local settings.
pub fn seed_pms_settings(db: &DbState, hotel_id: &str, base_url: &str) {
    let conn = db.conn.lock().unwrap();
    let category = format!("pms.{hotel_id}");
    db::set_setting(&conn, &category, "base_url", base_url).expect("base_url");
    db::set_setting(&conn, &category, "api_key", "test-key").expect("api_key");
}

pub fn count_usage_rows(db: &DbState, room_id: &str) -> i64 {
    let conn = db.conn.lock().unwrap();
    conn.query_row(
        "SELECT COUNT(*) FROM minibar_usage WHERE room_id = ?1",
        params![room_id],
        |row| row.get(0),
    )
    .unwrap()
}

/// In-memory PMS that records every call. Items named in `failing_items`
/// are rejected, items in `slow_items` stall for half a second.
#[derive(Default)]
pub struct FakePms {
    pub failing_items: HashSet<String>,
    pub slow_items: HashSet<String>,
    pub fail_status: bool,
    pub charges: Mutex<Vec<MinibarChargeRequest>>,
    pub statuses: Mutex<Vec<RoomStatusRequest>>,
}

impl FakePms {
    pub fn failing(items: &[&str]) -> Self {
        FakePms {
            failing_items: items.iter().map(|s| s.to_string()).collect(),
            ..Default::default()
        }
    }

    pub fn charged_items(&self) -> Vec<String> {
        self.charges
            .lock()
            .unwrap()
            .iter()
            .map(|c| c.item_name.clone())
            .collect()
    }
}

impl PmsClient for FakePms {
    async fn post_minibar_charge(
        &self,
        _credentials: &PmsCredentials,
        request: &MinibarChargeRequest,
    ) -> Result<PmsAck, String> {
        self.charges.lock().unwrap().push(request.clone());
        if self.slow_items.contains(&request.item_name) {
            tokio::time::sleep(Duration::from_millis(500)).await;
        }
        if self.failing_items.contains(&request.item_name) {
            return Err("PMS server error (HTTP 500)".to_string());
        }
        Ok(PmsAck {
            success: Some(true),
            message: None,
            reference: Some(format!("chg-{}", request.item_name)),
        })
    }

    async fn post_room_status(
        &self,
        _credentials: &PmsCredentials,
        request: &RoomStatusRequest,
    ) -> Result<PmsAck, String> {
        self.statuses.lock().unwrap().push(request.clone());
        if self.fail_status {
            return Err("Cannot reach PMS at https://pms.example".to_string());
        }
        Ok(PmsAck {
            success: Some(true),
            message: None,
            reference: Some("st-1".to_string()),
        })
    }
}
