use anyhow::{Context, Result};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

const DEFAULT_TIMEOUT_SECS: u64 = 5;
const DEFAULT_BIND: &str = "127.0.0.1:5000";
const DEFAULT_LOG: &str = "info";

/// Runtime settings, read from the environment (and a `.env` file if one
/// exists) and then overridden by command-line flags.
///
/// | Env Var                | Default                           |
/// |------------------------|-----------------------------------|
/// | `JOBTRACK_DB`          | `<data dir>/jobtrack/jobtrack.db` |
/// | `JOBTRACK_API_URL`     | unset (use the local database)    |
/// | `JOBTRACK_TIMEOUT_SECS`| `5`                               |
/// | `JOBTRACK_BIND`        | `127.0.0.1:5000`                  |
/// | `JOBTRACK_LOG`         | `info`                            |
#[derive(Debug, Clone)]
pub struct Config {
    pub db_path: PathBuf,
    /// When set, records live behind this REST server instead of a local file.
    pub api_url: Option<String>,
    pub timeout: Duration,
    pub bind: SocketAddr,
    pub log_level: String,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let db_path = var("JOBTRACK_DB")
            .map(PathBuf::from)
            .unwrap_or_else(default_db_path);

        let timeout_secs = match var("JOBTRACK_TIMEOUT_SECS") {
            Some(raw) => raw
                .trim()
                .parse::<u64>()
                .with_context(|| format!("JOBTRACK_TIMEOUT_SECS must be a whole number of seconds, got '{}'", raw))?,
            None => DEFAULT_TIMEOUT_SECS,
        };

        let bind_raw = var("JOBTRACK_BIND").unwrap_or_else(|| DEFAULT_BIND.to_string());
        let bind = bind_raw
            .trim()
            .parse::<SocketAddr>()
            .with_context(|| format!("JOBTRACK_BIND must be host:port, got '{}'", bind_raw))?;

        Ok(Self {
            db_path,
            api_url: var("JOBTRACK_API_URL"),
            timeout: Duration::from_secs(timeout_secs),
            bind,
            log_level: var("JOBTRACK_LOG").unwrap_or_else(|| DEFAULT_LOG.to_string()),
        })
    }

    /// Applies command-line flags on top of the environment.
    pub fn with_overrides(mut self, db: Option<PathBuf>, api: Option<String>, timeout_secs: Option<u64>) -> Self {
        if let Some(db) = db {
            self.db_path = db;
        }
        if api.is_some() {
            self.api_url = api;
        }
        if let Some(secs) = timeout_secs {
            self.timeout = Duration::from_secs(secs);
        }
        self
    }

    /// Log destination while the terminal UI is open, next to the database.
    pub fn log_path(&self) -> PathBuf {
        self.db_path.with_extension("log")
    }
}

fn default_db_path() -> PathBuf {
    // XDG data directory, or the working directory as a fallback
    match directories::ProjectDirs::from("", "", "jobtrack") {
        Some(dirs) => dirs.data_dir().join("jobtrack.db"),
        None => PathBuf::from("jobtrack.db"),
    }
}
