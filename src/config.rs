//! Process configuration from environment variables.
//!
//! Every value has a default. Values that do not parse or fall outside their
//! bounds are ignored in favour of the default.

use std::env;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

pub const ENV_BIND: &str = "MINIBAR_SYNC_BIND";
pub const ENV_DATA_DIR: &str = "MINIBAR_SYNC_DATA_DIR";
pub const ENV_LOG_DIR: &str = "MINIBAR_SYNC_LOG_DIR";
pub const ENV_PMS_TIMEOUT_SECS: &str = "MINIBAR_SYNC_PMS_TIMEOUT_SECS";

const DEFAULT_PMS_TIMEOUT_SECS: u64 = 15;
const PMS_TIMEOUT_RANGE_SECS: std::ops::RangeInclusive<u64> = 1..=120;
const APP_DIR_NAME: &str = "minibar-sync";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppConfig {
    pub bind: SocketAddr,
    pub data_dir: PathBuf,
    pub log_dir: PathBuf,
    pub pms_timeout: Duration,
}

impl AppConfig {
    pub fn from_env() -> Self {
        let var = |name: &str| env::var(name).ok();
        Self::from_values(
            var(ENV_BIND).as_deref(),
            var(ENV_DATA_DIR).as_deref(),
            var(ENV_LOG_DIR).as_deref(),
            var(ENV_PMS_TIMEOUT_SECS).as_deref(),
        )
    }

    fn from_values(
        bind: Option<&str>,
        data_dir: Option<&str>,
        log_dir: Option<&str>,
        pms_timeout_secs: Option<&str>,
    ) -> Self {
        let data_dir = parse_dir(data_dir).unwrap_or_else(default_data_dir);
        let log_dir = parse_dir(log_dir).unwrap_or_else(|| data_dir.join("logs"));
        AppConfig {
            bind: parse_bind(bind),
            data_dir,
            log_dir,
            pms_timeout: parse_pms_timeout(pms_timeout_secs),
        }
    }
}

fn default_bind() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 8080))
}

fn parse_bind(raw: Option<&str>) -> SocketAddr {
    raw.map(str::trim)
        .filter(|v| !v.is_empty())
        .and_then(|v| v.parse::<SocketAddr>().ok())
        .unwrap_or_else(default_bind)
}

fn parse_dir(raw: Option<&str>) -> Option<PathBuf> {
    raw.map(str::trim)
        .filter(|v| !v.is_empty())
        .map(PathBuf::from)
}

fn parse_pms_timeout(raw: Option<&str>) -> Duration {
    let secs = raw
        .and_then(|v| v.trim().parse::<u64>().ok())
        .filter(|v| PMS_TIMEOUT_RANGE_SECS.contains(v))
        .unwrap_or(DEFAULT_PMS_TIMEOUT_SECS);
    Duration::from_secs(secs)
}

/// Per-user application data directory.
fn default_data_dir() -> PathBuf {
    let base = env::var("LOCALAPPDATA")
        .or_else(|_| env::var("XDG_DATA_HOME"))
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            #[cfg(target_os = "windows")]
            {
                PathBuf::from(env::var("USERPROFILE").unwrap_or_else(|_| ".".into()))
                    .join("AppData")
                    .join("Local")
            }
            #[cfg(not(target_os = "windows"))]
            {
                PathBuf::from(env::var("HOME").unwrap_or_else(|_| ".".into()))
                    .join(".local")
                    .join("share")
            }
        });
    base.join(APP_DIR_NAME)
}
