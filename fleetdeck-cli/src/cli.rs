use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Debug, Parser, Clone)]
#[command(name = "fleetdeck")]
#[command(about = "Control a fleet of networked cameras and a local audio recorder")]
pub struct Cli {
    /// Config file (default: $FLEETDECK_CONFIG or ./fleetdeck.json).
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Override the coordinator WebSocket URL.
    #[arg(long)]
    pub coordinator: Option<String>,

    /// Override the HLS stream base URL.
    #[arg(long)]
    pub stream_base: Option<String>,

    /// Open live views in an external player.
    #[arg(long)]
    pub player: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Print the fleet once, or keep printing changes.
    Status {
        #[arg(long)]
        watch: bool,
    },

    /// Record on the given devices for a fixed time.
    Record {
        /// Comma-separated device addresses.
        #[arg(long, value_delimiter = ',', required = true)]
        devices: Vec<String>,

        /// Seconds to record.
        #[arg(long, default_value_t = 10)]
        duration: u64,
    },

    /// List local audio input devices known to the coordinator.
    AudioDevices,

    /// Interactive line console on stdin.
    Console,

    /// Write the effective config to the config path.
    InitConfig,
}
