//! Engine configuration: environment-variable overrides with
//! `dirs`-resolved defaults, in the spirit of the teacher's
//! `SettingsManager`/`db_app_config` pair but scoped to what this engine
//! needs to boot standalone (no UI preferences to persist).

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use crate::infrastructure::database::Database;

const ENV_DB_PATH: &str = "FLEETWRIGHT_DB_PATH";
const ENV_BIND_ADDR: &str = "FLEETWRIGHT_BIND_ADDR";
const ENV_RECONCILE_INTERVAL_SECS: &str = "FLEETWRIGHT_RECONCILE_INTERVAL_SECS";

const DEFAULT_BIND_ADDR: &str = "127.0.0.1:7777";
const DEFAULT_RECONCILE_INTERVAL_SECS: u64 = 5;

#[derive(Debug, Clone)]
pub struct Config {
    pub db_path: PathBuf,
    pub bind_addr: SocketAddr,
    pub reconcile_interval: Duration,
}

impl Config {
    /// Build from environment variables, falling back to data-directory
    /// defaults. Fails only if an explicitly-set override doesn't parse.
    pub fn from_env() -> anyhow::Result<Self> {
        let db_path = match std::env::var(ENV_DB_PATH) {
            Ok(value) => PathBuf::from(value),
            Err(_) => Database::default_path(),
        };

        let bind_addr = match std::env::var(ENV_BIND_ADDR) {
            Ok(value) => value
                .parse()
                .map_err(|e| anyhow::anyhow!("invalid {ENV_BIND_ADDR} '{value}': {e}"))?,
            Err(_) => DEFAULT_BIND_ADDR.parse().expect("default bind addr is valid"),
        };

        let reconcile_interval = match std::env::var(ENV_RECONCILE_INTERVAL_SECS) {
            Ok(value) => {
                let secs: u64 = value
                    .parse()
                    .map_err(|e| anyhow::anyhow!("invalid {ENV_RECONCILE_INTERVAL_SECS} '{value}': {e}"))?;
                Duration::from_secs(secs)
            }
            Err(_) => Duration::from_secs(DEFAULT_RECONCILE_INTERVAL_SECS),
        };

        Ok(Self {
            db_path,
            bind_addr,
            reconcile_interval,
        })
    }

    /// Applies CLI flag overrides on top of the environment-derived config.
    pub fn apply_cli_overrides(mut self, cli: &crate::cli::Cli) -> Self {
        if let Some(db_path) = &cli.db_path {
            self.db_path = db_path.clone();
        }
        if let Some(bind_addr) = cli.bind_addr {
            self.bind_addr = bind_addr;
        }
        self
    }
}
