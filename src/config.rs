use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};

/// Default executable used to drive the server.
pub const DEFAULT_EXECUTABLE: &str = "couchdb";

/// CouchDB supervisor configuration
#[derive(Debug, Clone, PartialEq)]
pub struct CouchDbConfig {
    /// Server launcher, looked up in `PATH` when relative
    pub executable: PathBuf,
    /// HTTP port; `0` lets the server choose one and report it in the URI file
    pub port: u16,
    /// Working directory; a temporary one is created (and removed) when unset
    pub directory: Option<PathBuf>,
    /// Delay between readiness probes
    pub poll_interval: Duration,
    /// Upper bound on the whole readiness wait
    pub startup_timeout: Duration,
}

impl Default for CouchDbConfig {
    fn default() -> Self {
        Self {
            executable: PathBuf::from(DEFAULT_EXECUTABLE),
            port: 0,
            directory: None,
            poll_interval: Duration::from_millis(100),
            startup_timeout: Duration::from_secs(30),
        }
    }
}

impl CouchDbConfig {
    /// Create a config for the given port and working directory
    pub fn new(port: u16, directory: Option<PathBuf>) -> Self {
        Self {
            port,
            directory,
            ..Self::default()
        }
    }

    pub fn with_executable(mut self, executable: impl Into<PathBuf>) -> Self {
        self.executable = executable.into();
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_startup_timeout(mut self, timeout: Duration) -> Self {
        self.startup_timeout = timeout;
        self
    }

    /// Build a config from `BEYOND_COUCHDB_*` environment variables, reading
    /// a `.env` file first if there is one.
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();

        let defaults = Self::default();
        Ok(Self {
            executable: env::var_os("BEYOND_COUCHDB_BIN")
                .map(PathBuf::from)
                .unwrap_or(defaults.executable),
            port: parse_var("BEYOND_COUCHDB_PORT")?.unwrap_or(defaults.port),
            directory: env::var_os("BEYOND_COUCHDB_DIR").map(PathBuf::from),
            poll_interval: parse_var("BEYOND_COUCHDB_POLL_INTERVAL_MS")?
                .map(Duration::from_millis)
                .unwrap_or(defaults.poll_interval),
            startup_timeout: parse_var("BEYOND_COUCHDB_STARTUP_TIMEOUT_SECS")?
                .map(Duration::from_secs)
                .unwrap_or(defaults.startup_timeout),
        })
    }
}

fn parse_var<T>(name: &str) -> Result<Option<T>>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(name) {
        Ok(value) => value
            .trim()
            .parse()
            .map(Some)
            .with_context(|| format!("invalid value for {name}: {value:?}")),
        Err(env::VarError::NotPresent) => Ok(None),
        Err(e) => Err(e).with_context(|| format!("invalid value for {name}")),
    }
}

/// Render the server's ini file. Data, views, log and the URI file all live
/// under `root`.
pub fn render_ini(root: &Path, port: u16) -> String {
    let root = root.display();
    format!(
        "[couchdb]\n\
         database_dir = {root}/db-data\n\
         view_index_dir = {root}/db-data\n\
         uri_file = {root}/couchdb.uri\n\
         \n\
         [httpd]\n\
         port = {port}\n\
         \n\
         [log]\n\
         file = {root}/db.log\n"
    )
}
