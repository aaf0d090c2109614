use std::net::Ipv4Addr;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context};
use pixoo_core::validation::parse_device_ip;

/// Name of the data directory created under the user's home.
const DEFAULT_DATA_DIR_NAME: &str = ".pixoo_manager";

/// Daemon configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct DaemonConfig {
    /// Persisted state (last device IP, rotation config).
    pub data_dir: PathBuf,
    /// Gallery root holding `metadata.json` and `gifs/`.
    pub gallery_dir: PathBuf,
    /// Staged upload artifacts.
    pub temp_dir: PathBuf,
    /// Connect straight to this address instead of discovering.
    pub device_ip: Option<Ipv4Addr>,
    /// mDNS browse window.
    pub discovery_timeout: Duration,
    /// Per-attempt device command timeout.
    pub command_timeout: Duration,
    /// Resume the saved rotation at startup.
    pub resume_rotation: bool,
    /// Lifetime of staged uploads and unreferenced temp files.
    pub upload_ttl: Duration,
    /// Cadence of the temp-resource sweep.
    pub cleanup_interval: Duration,
    /// Emit JSON log lines instead of human-readable ones.
    pub log_json: bool,
}

impl DaemonConfig {
    /// Load configuration from the process environment.
    ///
    /// | Env Var                        | Default                       |
    /// |--------------------------------|-------------------------------|
    /// | `PIXOO_DATA_DIR`               | `~/.pixoo_manager`            |
    /// | `PIXOO_GALLERY_DIR`            | `<data dir>/gallery`          |
    /// | `PIXOO_TEMP_DIR`               | `<system temp>/pixoo_manager` |
    /// | `PIXOO_DEVICE_IP`              | unset (discover)              |
    /// | `PIXOO_DISCOVERY_TIMEOUT_SECS` | `3`                           |
    /// | `PIXOO_COMMAND_TIMEOUT_SECS`   | `120`                         |
    /// | `PIXOO_RESUME_ROTATION`        | `true`                        |
    /// | `PIXOO_UPLOAD_TTL_SECS`        | `3600`                        |
    /// | `PIXOO_CLEANUP_INTERVAL_SECS`  | `600`                         |
    /// | `LOG_FORMAT`                   | `text` (`json` for JSON)      |
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let var = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let data_dir = match var("PIXOO_DATA_DIR") {
            Some(dir) => PathBuf::from(dir),
            None => dirs::home_dir()
                .context("cannot determine home directory; set PIXOO_DATA_DIR")?
                .join(DEFAULT_DATA_DIR_NAME),
        };
        let gallery_dir = var("PIXOO_GALLERY_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| data_dir.join("gallery"));
        let temp_dir = var("PIXOO_TEMP_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| std::env::temp_dir().join("pixoo_manager"));

        let device_ip = var("PIXOO_DEVICE_IP")
            .map(|raw| parse_device_ip(&raw))
            .transpose()
            .context("PIXOO_DEVICE_IP")?;

        let secs = |key: &str, default: u64| -> anyhow::Result<Duration> {
            let value = match var(key) {
                Some(raw) => raw
                    .parse::<u64>()
                    .with_context(|| format!("{key} must be a whole number of seconds"))?,
                None => default,
            };
            if value == 0 {
                bail!("{key} must be greater than zero");
            }
            Ok(Duration::from_secs(value))
        };

        let resume_rotation = match var("PIXOO_RESUME_ROTATION").as_deref() {
            None => true,
            Some(raw) => parse_bool(raw)
                .with_context(|| format!("PIXOO_RESUME_ROTATION must be true or false, got '{raw}'"))?,
        };

        let log_json = var("LOG_FORMAT").is_some_and(|f| f.eq_ignore_ascii_case("json"));

        Ok(Self {
            data_dir,
            gallery_dir,
            temp_dir,
            device_ip,
            discovery_timeout: secs("PIXOO_DISCOVERY_TIMEOUT_SECS", 3)?,
            command_timeout: secs("PIXOO_COMMAND_TIMEOUT_SECS", 120)?,
            resume_rotation,
            upload_ttl: secs("PIXOO_UPLOAD_TTL_SECS", 3600)?,
            cleanup_interval: secs("PIXOO_CLEANUP_INTERVAL_SECS", 600)?,
            log_json,
        })
    }
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
