use clap::Parser;

use fleetwright::cli::Cli;
use fleetwright::http;
use fleetwright::startup;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    startup::init_logging();

    let cli = Cli::parse();
    let config = startup::load_config(&cli)?;
    let service = startup::build_service(&config)?;

    tokio::spawn(startup::run_reconciliation_loop(
        service.clone(),
        config.reconcile_interval,
    ));

    http::serve(config.bind_addr, service).await
}
