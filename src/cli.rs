//! Command-line surface: just enough to point the daemon at a database
//! path and bind address without reaching for `Config::from_env`'s
//! environment variables. Flags win over environment when both are set.

use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Parser, Debug)]
#[command(name = "fleetwrightd", version = VERSION, about = "Agent session lifecycle engine")]
pub struct Cli {
    /// Overrides FLEETWRIGHT_DB_PATH.
    #[arg(long)]
    pub db_path: Option<PathBuf>,

    /// Overrides FLEETWRIGHT_BIND_ADDR.
    #[arg(long)]
    pub bind_addr: Option<SocketAddr>,
}
