use clap::{Parser, Subcommand};
use std::path::PathBuf;

use crate::resource::ResourceKind;

/// Bybit account watcher
///
/// Polls signed Bybit REST endpoints for balances, orders or trades and
/// emits one JSON event per new record.
#[derive(Parser, Debug)]
#[command(name = "bybit-watch")]
#[command(author, version, about, long_about = None)]
pub struct Args {
    #[command(subcommand)]
    pub command: Commands,

    /// Path to configuration file (defaults to the user config directory)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Write a configuration file
    Setup {
        /// Bybit API key
        #[arg(long)]
        api_key: String,

        /// Bybit API secret
        #[arg(long)]
        secret_key: String,

        /// Resource to poll: get_balances, order_history or trade_history
        #[arg(long)]
        resource: ResourceKind,

        /// Page size for order and trade history
        #[arg(long, default_value = "10")]
        limit: u32,

        /// Polling interval in seconds
        #[arg(long, default_value = "3600")]
        poll_interval: u64,

        /// Agent name (one state file per name)
        #[arg(long, default_value = "default")]
        name: String,

        /// Append events to this file instead of stdout
        #[arg(long)]
        events_file: Option<PathBuf>,

        /// Emit the whole response every cycle instead of only new records
        #[arg(long)]
        all_records: bool,
    },
    /// Run the polling daemon in the foreground
    Start,
    /// Run one poll cycle now
    CheckNow {
        /// Print events without updating the stored snapshot
        #[arg(short = 'n', long)]
        dry_run: bool,
    },
    /// Show agent health and last poll
    Status,
    /// Show the configuration with secrets masked
    ShowConfig,
}
