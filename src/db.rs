//! Local SQLite database layer for the minibar sync service.
//!
//! Uses rusqlite with WAL mode. Provides schema migrations, settings helpers,
//! and the shared connection state handed to every pipeline entry point.

use rusqlite::{params, Connection};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing::{error, info, warn};

use crate::error::PipelineError;

/// Shared state holding the database connection.
pub struct DbState {
    pub conn: Mutex<Connection>,
    pub db_path: PathBuf,
}

impl DbState {
    /// Wrap an already configured connection (in-memory databases, tests).
    pub fn from_connection(conn: Connection, db_path: PathBuf) -> Self {
        DbState {
            conn: Mutex::new(conn),
            db_path,
        }
    }
}

/// Current schema version. Bump when adding new migrations.
const CURRENT_SCHEMA_VERSION: i32 = 2;

/// Initialize the database at `{data_dir}/minibar.db`.
///
/// Creates the directory if needed, opens the connection, sets pragmas,
/// and runs any pending migrations. On open failure, deletes the file and
/// retries once.
pub fn init(data_dir: &Path) -> Result<DbState, String> {
    fs::create_dir_all(data_dir).map_err(|e| format!("Failed to create data dir: {e}"))?;

    let db_path = data_dir.join("minibar.db");
    info!("Opening database at {}", db_path.display());

    let conn = match open_and_configure(&db_path) {
        Ok(c) => c,
        Err(first_err) => {
            warn!(
                "Database open failed ({}), deleting and retrying once",
                first_err
            );
            if db_path.exists() {
                let _ = fs::remove_file(&db_path);
                let _ = fs::remove_file(db_path.with_extension("db-wal"));
                let _ = fs::remove_file(db_path.with_extension("db-shm"));
            }
            open_and_configure(&db_path)
                .map_err(|e| format!("Database open failed after retry: {e}"))?
        }
    };

    run_migrations(&conn)?;

    info!("Database initialized (schema v{CURRENT_SCHEMA_VERSION})");

    Ok(DbState::from_connection(conn, db_path))
}

/// Open the database file and apply pragmas.
fn open_and_configure(path: &Path) -> Result<Connection, String> {
    let conn = Connection::open(path).map_err(|e| format!("sqlite open: {e}"))?;

    conn.execute_batch(
        "PRAGMA journal_mode = WAL;
         PRAGMA foreign_keys = ON;
         PRAGMA busy_timeout = 5000;
         PRAGMA synchronous = NORMAL;",
    )
    .map_err(|e| format!("pragma setup: {e}"))?;

    Ok(conn)
}

/// Run all pending migrations up to `CURRENT_SCHEMA_VERSION`.
pub(crate) fn run_migrations(conn: &Connection) -> Result<(), String> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            applied_at TEXT DEFAULT (datetime('now'))
        );",
    )
    .map_err(|e| format!("create schema_version: {e}"))?;

    let current: i32 = conn
        .query_row(
            "SELECT COALESCE(MAX(version), 0) FROM schema_version",
            [],
            |row| row.get(0),
        )
        .unwrap_or(0);

    if current >= CURRENT_SCHEMA_VERSION {
        info!("Database schema up to date (v{current})");
        return Ok(());
    }

    info!("Migrating database from v{current} to v{CURRENT_SCHEMA_VERSION}");

    if current < 1 {
        migrate_v1(conn)?;
    }
    if current < 2 {
        migrate_v2(conn)?;
    }

    Ok(())
}

/// Migration v1: rooms, minibar catalog, usage and PMS sync history.
fn migrate_v1(conn: &Connection) -> Result<(), String> {
    conn.execute_batch(
        "
        -- local_settings (category/key/value store)
        CREATE TABLE IF NOT EXISTS local_settings (
            id TEXT PRIMARY KEY DEFAULT (lower(hex(randomblob(16)))),
            setting_category TEXT NOT NULL,
            setting_key TEXT NOT NULL,
            setting_value TEXT NOT NULL,
            created_at TEXT DEFAULT (datetime('now')),
            updated_at TEXT DEFAULT (datetime('now')),
            UNIQUE(setting_category, setting_key)
        );

        CREATE TABLE IF NOT EXISTS hotels (
            id TEXT PRIMARY KEY,
            organization_id TEXT NOT NULL,
            name TEXT NOT NULL,
            created_at TEXT DEFAULT (datetime('now'))
        );

        CREATE TABLE IF NOT EXISTS hotel_branding (
            hotel_id TEXT PRIMARY KEY REFERENCES hotels(id) ON DELETE CASCADE,
            display_name TEXT,
            logo_url TEXT,
            primary_color TEXT,
            welcome_message TEXT,
            updated_at TEXT DEFAULT (datetime('now'))
        );

        CREATE TABLE IF NOT EXISTS rooms (
            id TEXT PRIMARY KEY,
            hotel_id TEXT NOT NULL REFERENCES hotels(id) ON DELETE CASCADE,
            organization_id TEXT NOT NULL,
            room_number TEXT NOT NULL,
            access_token TEXT NOT NULL UNIQUE,
            status TEXT NOT NULL DEFAULT 'clean',
            created_at TEXT DEFAULT (datetime('now')),
            UNIQUE(hotel_id, room_number)
        );

        CREATE TABLE IF NOT EXISTS minibar_categories (
            id TEXT PRIMARY KEY,
            hotel_id TEXT NOT NULL REFERENCES hotels(id) ON DELETE CASCADE,
            name TEXT NOT NULL,
            sort_order INTEGER NOT NULL DEFAULT 0,
            UNIQUE(hotel_id, name)
        );

        CREATE TABLE IF NOT EXISTS minibar_items (
            id TEXT PRIMARY KEY,
            hotel_id TEXT NOT NULL REFERENCES hotels(id) ON DELETE CASCADE,
            name TEXT NOT NULL,
            category TEXT NOT NULL DEFAULT 'other',
            price REAL NOT NULL DEFAULT 0,
            is_active INTEGER NOT NULL DEFAULT 1,
            name_translations TEXT NOT NULL DEFAULT '{}',
            created_at TEXT DEFAULT (datetime('now')),
            updated_at TEXT DEFAULT (datetime('now'))
        );

        CREATE TABLE IF NOT EXISTS minibar_recommendations (
            id TEXT PRIMARY KEY,
            hotel_id TEXT NOT NULL REFERENCES hotels(id) ON DELETE CASCADE,
            minibar_item_id TEXT NOT NULL REFERENCES minibar_items(id) ON DELETE CASCADE,
            headline TEXT,
            sort_order INTEGER NOT NULL DEFAULT 0,
            is_active INTEGER NOT NULL DEFAULT 1
        );

        -- minibar_usage (insert-heavy; only is_cleared is updated, by cleanup)
        CREATE TABLE IF NOT EXISTS minibar_usage (
            id TEXT PRIMARY KEY,
            room_id TEXT NOT NULL REFERENCES rooms(id) ON DELETE CASCADE,
            minibar_item_id TEXT NOT NULL REFERENCES minibar_items(id),
            quantity INTEGER NOT NULL CHECK (quantity > 0),
            source TEXT NOT NULL CHECK (source IN ('staff', 'guest')),
            recorded_by TEXT,
            usage_date TEXT NOT NULL,
            usage_day TEXT NOT NULL,
            is_cleared INTEGER NOT NULL DEFAULT 0,
            created_at TEXT DEFAULT (datetime('now')),
            updated_at TEXT DEFAULT (datetime('now'))
        );

        -- pms_sync_log (append-only)
        CREATE TABLE IF NOT EXISTS pms_sync_log (
            id TEXT PRIMARY KEY,
            sync_type TEXT NOT NULL CHECK (sync_type IN ('minibar', 'status_update')),
            direction TEXT NOT NULL DEFAULT 'to_pms',
            hotel_id TEXT,
            payload TEXT NOT NULL DEFAULT '{}',
            errors TEXT NOT NULL DEFAULT '[]',
            status TEXT NOT NULL CHECK (status IN ('success', 'partial', 'failed')),
            initiated_by TEXT,
            created_at TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_minibar_items_hotel ON minibar_items(hotel_id, is_active);
        CREATE INDEX IF NOT EXISTS idx_minibar_usage_room_date ON minibar_usage(room_id, usage_date);
        CREATE INDEX IF NOT EXISTS idx_pms_sync_log_hotel ON pms_sync_log(hotel_id, created_at);
        CREATE INDEX IF NOT EXISTS idx_local_settings_cat_key ON local_settings(setting_category, setting_key);

        INSERT INTO schema_version (version) VALUES (1);
        ",
    )
    .map_err(|e| {
        error!("Migration v1 failed: {e}");
        format!("migration v1: {e}")
    })?;

    info!("Applied migration v1");
    Ok(())
}

/// Migration v2: at most one active charge per (room, item, day).
fn migrate_v2(conn: &Connection) -> Result<(), String> {
    conn.execute_batch(
        "
        CREATE UNIQUE INDEX IF NOT EXISTS idx_minibar_usage_active_charge
            ON minibar_usage(room_id, minibar_item_id, usage_day)
            WHERE is_cleared = 0;

        INSERT INTO schema_version (version) VALUES (2);
        ",
    )
    .map_err(|e| {
        error!("Migration v2 failed: {e}");
        format!("migration v2: {e}")
    })?;

    info!("Applied migration v2 (active charge uniqueness)");
    Ok(())
}

// ---------------------------------------------------------------------------
// Blocking access from async handlers
// ---------------------------------------------------------------------------

/// Run `f` against the locked connection on tokio's blocking pool.
pub async fn run_blocking<T, F>(db: Arc<DbState>, f: F) -> Result<T, PipelineError>
where
    T: Send + 'static,
    F: FnOnce(&Connection) -> Result<T, PipelineError> + Send + 'static,
{
    tokio::task::spawn_blocking(move || {
        let conn = db
            .conn
            .lock()
            .map_err(|e| PipelineError::Storage(format!("db lock poisoned: {e}")))?;
        f(&conn)
    })
    .await
    .map_err(|e| PipelineError::Unexpected(format!("blocking task failed: {e}")))?
}

// ---------------------------------------------------------------------------
// Settings helpers
// ---------------------------------------------------------------------------

/// Get a single setting value.
pub fn get_setting(conn: &Connection, category: &str, key: &str) -> Option<String> {
    conn.query_row(
        "SELECT setting_value FROM local_settings WHERE setting_category = ?1 AND setting_key = ?2",
        params![category, key],
        |row| row.get(0),
    )
    .ok()
}

/// Insert or update a setting.
pub fn set_setting(
    conn: &Connection,
    category: &str,
    key: &str,
    value: &str,
) -> Result<(), String> {
    conn.execute(
        "INSERT INTO local_settings (setting_category, setting_key, setting_value, updated_at)
         VALUES (?1, ?2, ?3, datetime('now'))
         ON CONFLICT(setting_category, setting_key) DO UPDATE SET
            setting_value = excluded.setting_value,
            updated_at = excluded.updated_at",
        params![category, key, value],
    )
    .map_err(|e| format!("set_setting: {e}"))?;
    Ok(())
}

/// Delete all settings in a category.
pub fn delete_all_settings(conn: &Connection, category: &str) -> Result<(), String> {
    conn.execute(
        "DELETE FROM local_settings WHERE setting_category = ?1",
        params![category],
    )
    .map_err(|e| format!("delete_all_settings: {e}"))?;
    Ok(())
}

/// Open an in-memory database with all migrations applied (test helper).
#[cfg(test)]
pub fn open_test_db() -> DbState {
    let conn = Connection::open_in_memory().expect("open in-memory db");
    conn.execute_batch(
        "PRAGMA foreign_keys = ON;
         PRAGMA busy_timeout = 5000;
         PRAGMA synchronous = NORMAL;",
    )
    .expect("pragma setup");
    run_migrations(&conn).expect("run_migrations should succeed in test");
    DbState::from_connection(conn, PathBuf::from(":memory:"))
}

// ===========================================================================
// Tests
// ===========================================================================
