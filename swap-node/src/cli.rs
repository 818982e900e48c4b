use clap::Parser;
use log::LevelFilter;
use std::net::SocketAddr;
use std::path::PathBuf;

#[derive(Clone, Debug, Parser)]
#[command(name = "swap-node", version, about = "HTLC swap coordinator for ethereum and cosmos")]
pub struct Options {
    /// Path to a TOML configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Overrides the configured log level
    #[arg(long)]
    pub log_level: Option<LevelFilter>,

    /// Overrides the HTTP listen address
    #[arg(long)]
    pub listen: Option<SocketAddr>,

    /// Run against in-process simulated ledgers
    #[arg(long)]
    pub simulate: bool,

    /// Print the effective configuration and exit
    #[arg(long)]
    pub dump_config: bool,
}
