//! `clap`-derived CLI (§10 Ambient stack "CLI / process bootstrap").

use clap::Parser;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "resource-tuner", about = "Resource arbitration daemon")]
pub struct Cli {
    /// Path to the resource catalogue YAML. Defaults to the built-in
    /// catalogue location when absent.
    #[arg(long)]
    pub resource_config: Option<PathBuf>,

    /// Path to the target config YAML describing this device's cluster
    /// topology.
    #[arg(long)]
    pub target_config: Option<PathBuf>,

    /// Path to the daemon-level TOML config (pool sizes, persisted state
    /// file location).
    #[arg(long, default_value = "daemon.toml")]
    pub daemon_config: PathBuf,

    /// Repeat for more verbose logging: `-v` info, `-vv` debug, `-vvv`+
    /// trace.
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,
}
