use anyhow::Result;
use clap::Parser;

mod agent;
mod cli;
mod commands;
mod detector;
mod error;
mod platform;
mod records;
mod resource;
mod sink;

fn main() {
    if let Err(e) = run() {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let args = cli::Args::parse();
    commands::run_agent_command(args)
}
