// Agent module: the polling daemon
//
// Each cycle signs a request for the configured resource, fetches it, diffs
// the records against the snapshot of the previous cycle and emits the new
// ones as events.

mod client;
mod config;
mod daemon;
mod scheduler;
mod signer;
mod state;

pub use config::{
    AgentConfig, AgentSettings, ExchangeConfig, LoggingConfig, OutputConfig, get_agent_config_path,
};
pub use daemon::{check_once, run_agent_daemon};
pub use state::{FileSnapshotStore, SnapshotStore};
