use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

use crate::agent::{self, AgentConfig, FileSnapshotStore, SnapshotStore};
use crate::cli::{Args, Commands};
use crate::resource::ResourceKind;

use super::utils::{format_duration, init_logging};

/// Dispatch a parsed command line
pub fn run_agent_command(args: Args) -> Result<()> {
    let config_path = match args.config {
        Some(path) => path,
        None => agent::get_agent_config_path()?,
    };

    match args.command {
        Commands::Setup {
            api_key,
            secret_key,
            resource,
            limit,
            poll_interval,
            name,
            events_file,
            all_records,
        } => {
            init_logging(args.verbose, "info");
            let mut settings = agent::AgentSettings::new(resource);
            settings.limit = limit;
            settings.poll_interval = poll_interval;
            settings.name = name;
            settings.changes_only = !all_records;

            let config = AgentConfig {
                exchange: agent::ExchangeConfig {
                    api_key,
                    secret_key,
                    ..Default::default()
                },
                agent: settings,
                logging: agent::LoggingConfig::default(),
                output: agent::OutputConfig { events_file },
            };
            setup(config, config_path)
        }
        Commands::Start => {
            let config = load_config(&config_path)?;
            init_logging(args.verbose || config.agent.debug, &config.logging.level);
            start(config)
        }
        Commands::CheckNow { dry_run } => {
            let config = load_config(&config_path)?;
            init_logging(args.verbose || config.agent.debug, &config.logging.level);
            check_now(&config, dry_run)
        }
        Commands::Status => {
            let config = load_config(&config_path)?;
            status(&config)
        }
        Commands::ShowConfig => {
            let config = load_config(&config_path)?;
            show_config(&config, &config_path)
        }
    }
}

fn load_config(path: &Path) -> Result<AgentConfig> {
    AgentConfig::load(path).with_context(|| {
        format!(
            "Failed to load configuration from {}. Run 'bybit-watch setup' first.",
            path.display()
        )
    })
}

/// Validate and save a new configuration
fn setup(config: AgentConfig, config_path: PathBuf) -> Result<()> {
    println!("Bybit Watch - Setup");
    println!("Version: {}", env!("CARGO_PKG_VERSION"));
    println!();

    config.validate().context("Invalid configuration")?;

    config.save(&config_path)?;
    println!("✓ Configuration saved to: {}", config_path.display());

    println!();
    println!("Next steps:");
    println!("  1. Try one cycle without touching state:");
    println!("     bybit-watch check-now --dry-run");
    println!("  2. Start the agent:");
    println!("     bybit-watch start");
    println!();
    println!(
        "The agent will poll {} every {} seconds.",
        config.agent.resource, config.agent.poll_interval
    );

    Ok(())
}

/// Run the daemon in the foreground
fn start(config: AgentConfig) -> Result<()> {
    let runtime = tokio::runtime::Runtime::new()?;
    runtime.block_on(agent::run_agent_daemon(config))
}

/// Run one cycle now
fn check_now(config: &AgentConfig, dry_run: bool) -> Result<()> {
    if dry_run {
        eprintln!("Dry run: state will not be updated");
    }

    let runtime = tokio::runtime::Runtime::new()?;
    let emitted = runtime.block_on(agent::check_once(config, dry_run))?;

    if emitted == 0 {
        eprintln!("✓ No new {} records", config.agent.resource);
    } else {
        eprintln!("✓ Emitted {} event(s)", emitted);
    }

    Ok(())
}

/// Show agent health
fn status(config: &AgentConfig) -> Result<()> {
    println!("Bybit Watch Status");
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    println!("Agent:         {}", config.agent.name);
    println!("Resource:      {}", config.agent.resource);
    println!("Poll Interval: {} seconds", config.agent.poll_interval);
    println!(
        "Mode:          {}",
        if config.agent.changes_only { "changes only" } else { "full response" }
    );

    let store = FileSnapshotStore::for_agent(&config.agent.name)?;
    let Some(state) = store.load()? else {
        println!();
        println!("No polls recorded yet ({})", store.path().display());
        return Ok(());
    };

    let now = chrono::Utc::now();
    println!();
    println!("Agent ID:      {}", state.agent_id);

    let print_time = |label: &str, at: Option<chrono::DateTime<chrono::Utc>>| match at {
        Some(at) => println!(
            "{:<15}{} ({} ago)",
            label,
            at.format("%Y-%m-%d %H:%M:%S %Z"),
            format_duration(now - at)
        ),
        None => println!("{:<15}never", label),
    };
    print_time("Last checked:", state.last_checked);
    print_time("Last success:", state.last_success);
    print_time("Last event:", state.last_event_at);

    if let Some(error) = &state.last_error {
        println!("Last error:    {}", error);
    }

    match state.snapshot_for(config.agent.resource) {
        Some(snapshot) => match snapshot.records() {
            Ok(records) => println!("Snapshot:      {} records", records.len()),
            Err(e) => println!("Snapshot:      unreadable ({})", e),
        },
        None => println!("Snapshot:      none for {}", config.agent.resource),
    }

    println!();
    let working = state.is_working(config.agent.expected_receive_period_in_days, now);
    println!(
        "Working:       {} (expects an event every {} day(s))",
        if working { "yes" } else { "no" },
        config.agent.expected_receive_period_in_days
    );

    Ok(())
}

/// Print the configuration with secrets masked
fn show_config(config: &AgentConfig, config_path: &Path) -> Result<()> {
    println!("# {}", config_path.display());
    let rendered =
        toml::to_string_pretty(&config.redacted()).context("Failed to serialize config")?;
    println!("{}", rendered);

    if config.agent.resource == ResourceKind::Balances && config.agent.limit != 10 {
        println!("# note: limit is ignored for {}", ResourceKind::Balances);
    }

    Ok(())
}
