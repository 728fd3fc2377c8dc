//! Minibar Sync - hotel minibar usage reconciliation and PMS sync backend.
//!
//! Guests scan the in-room QR code, see the minibar catalog and report what
//! they took. Reports are reconciled against staff entries so a room, item and
//! day carries at most one active charge. Staff or a scheduler then push usage
//! and room status changes to the hotel's property management system (PMS),
//! and every push is recorded in the sync audit log.

pub mod audit;
pub mod catalog;
pub mod commands;
pub mod config;
pub mod db;
pub mod error;
pub mod logging;
pub mod pms;
pub mod pms_sync;
pub mod rooms;
pub mod server;
pub mod storage;
pub mod usage;

#[cfg(test)]
mod test_fixtures;

pub use audit::{SqliteAuditLog, SyncAttempt, SyncAuditLog, SyncStatus, SyncType};
pub use config::AppConfig;
pub use db::DbState;
pub use error::PipelineError;
pub use pms::{HttpPmsClient, PmsClient};
pub use pms_sync::PmsSyncExecutor;

/// First non-blank string found under any of `keys`.
pub(crate) fn value_str(v: &serde_json::Value, keys: &[&str]) -> Option<String> {
    for key in keys {
        if let Some(s) = v.get(*key).and_then(|x| x.as_str()) {
            let trimmed = s.trim();
            if !trimmed.is_empty() {
                return Some(trimmed.to_string());
            }
        }
    }
    None
}
