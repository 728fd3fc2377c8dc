use anyhow::{bail, Context, Result};
use std::sync::Arc;
use tracing::info;
use zeroize::Zeroizing;

use minibar_sync_lib::pms::normalize_pms_url;
use minibar_sync_lib::server::{self, AppState};
use minibar_sync_lib::storage::{self, KEY_PMS_API_KEY, KEY_PMS_BASE_URL};
use minibar_sync_lib::{db, logging, AppConfig, HttpPmsClient, PmsSyncExecutor, SqliteAuditLog};

const USAGE: &str = "usage:
  minibar-sync [serve]
  minibar-sync pms-credentials set <hotel_id> <api_key|connection_string> [base_url]
  minibar-sync pms-credentials clear <hotel_id>  (also removes stored pms.<hotel_id> settings)";

#[tokio::main]
async fn main() -> Result<()> {
    let args: Vec<String> = std::env::args().skip(1).collect();
    match args.first().map(String::as_str) {
        None | Some("serve") => serve().await,
        Some("pms-credentials") => pms_credentials(&args[1..]),
        Some("-h") | Some("--help") => {
            println!("{USAGE}");
            Ok(())
        }
        Some(other) => bail!("unknown command `{other}`\n{USAGE}"),
    }
}

async fn serve() -> Result<()> {
    let config = AppConfig::from_env();
    let _log_guard = logging::init_logging(&config.log_dir);

    info!(
        version = env!("CARGO_PKG_VERSION"),
        data_dir = %config.data_dir.display(),
        log_dir = %config.log_dir.display(),
        pms_timeout_secs = config.pms_timeout.as_secs(),
        "Starting Minibar Sync"
    );

    let db = Arc::new(
        db::init(&config.data_dir)
            .map_err(anyhow::Error::msg)
            .context("failed to initialize database")?,
    );
    let client = HttpPmsClient::new(config.pms_timeout)
        .map_err(anyhow::Error::msg)
        .context("failed to build PMS client")?;
    let executor = PmsSyncExecutor::new(db.clone(), client, SqliteAuditLog::new(db))
        .with_call_timeout(config.pms_timeout);

    server::serve(config.bind, AppState::new(executor))
        .await
        .context("HTTP server failed")?;

    info!("Minibar Sync stopped");
    Ok(())
}

/// Store or remove a hotel's PMS credentials in the OS credential store.
fn pms_credentials(args: &[String]) -> Result<()> {
    match args {
        [action, hotel_id, key, rest @ ..] if action == "set" && rest.len() <= 1 => {
            let key = Zeroizing::new(key.trim().to_string());
            if hotel_id.trim().is_empty() || key.is_empty() {
                bail!("hotel id and API key must not be empty\n{USAGE}");
            }
            storage::set_credential(&storage::hotel_key(KEY_PMS_API_KEY, hotel_id), &key)
                .map_err(anyhow::Error::msg)
                .context("failed to store PMS API key")?;
            if let Some(base_url) = rest.first() {
                storage::set_credential(
                    &storage::hotel_key(KEY_PMS_BASE_URL, hotel_id),
                    &normalize_pms_url(base_url),
                )
                .map_err(anyhow::Error::msg)
                .context("failed to store PMS base URL")?;
            }
            println!("PMS credentials stored for hotel {}", hotel_id.trim());
            Ok(())
        }
        [action, hotel_id] if action == "clear" => {
            for base in [KEY_PMS_API_KEY, KEY_PMS_BASE_URL] {
                storage::delete_credential(&storage::hotel_key(base, hotel_id))
                    .map_err(anyhow::Error::msg)
                    .with_context(|| format!("failed to delete {base}"))?;
            }
            let config = AppConfig::from_env();
            let db = db::init(&config.data_dir)
                .map_err(anyhow::Error::msg)
                .context("failed to open database")?;
            let conn = db
                .conn
                .lock()
                .map_err(|e| anyhow::anyhow!("db lock poisoned: {e}"))?;
            db::delete_all_settings(&conn, &format!("pms.{}", hotel_id.trim()))
                .map_err(anyhow::Error::msg)
                .context("failed to delete stored PMS settings")?;
            println!("PMS credentials cleared for hotel {}", hotel_id.trim());
            Ok(())
        }
        _ => bail!("{USAGE}"),
    }
}
