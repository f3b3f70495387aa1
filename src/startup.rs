//! Engine bootstrap: logging, database, schema, and the background
//! reconciliation tick, in the same order and call discipline as the
//! teacher's `startup.rs`, minus anything UI-specific.

use log::{info, warn};
use std::time::Duration;

use crate::config::Config;
use crate::infrastructure::database::{Database, initialize_schema};
use crate::infrastructure::events::EventBus;
use crate::service::EngineService;

pub fn load_config(cli: &crate::cli::Cli) -> anyhow::Result<Config> {
    Ok(Config::from_env()?.apply_cli_overrides(cli))
}

pub fn init_logging() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
}

pub fn build_service(config: &Config) -> anyhow::Result<EngineService> {
    let db = Database::new(&config.db_path)?;
    initialize_schema(&db)?;
    info!("database ready at {}", config.db_path.display());
    Ok(EngineService::new(db, EventBus::new()))
}

/// Runs `EngineService::reconcile_tick` on a fixed interval until the
/// process exits. Spawned once at startup; failures are logged and the
/// loop keeps going, mirroring the teacher's tolerance for a reconciler
/// pass that occasionally errors without taking down the whole app.
pub async fn run_reconciliation_loop(service: EngineService, interval: Duration) {
    let mut ticker = tokio::time::interval(interval);
    loop {
        ticker.tick().await;
        match service.reconcile_tick().await {
            Ok(count) => {
                if count > 0 {
                    info!("reconciliation tick: {count} live session(s) checked");
                }
            }
            Err(err) => warn!("reconciliation tick failed: {err}"),
        }
    }
}
