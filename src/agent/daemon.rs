use anyhow::{Context, Result};
use serde_json::Value;

use super::client::{ExchangeClient, ResourceFetcher};
use super::config::{AgentConfig, AgentSettings, OutputConfig};
use super::scheduler::PollingScheduler;
use super::state::{FileSnapshotStore, MemorySnapshotStore, Snapshot, SnapshotStore};
use crate::detector;
use crate::error::ExchangeError;
use crate::sink::{Event, EventSink, JsonLinesSink};

/// Result of evaluating one response against the stored snapshot
#[derive(Debug)]
pub struct CycleOutcome {
    pub events: Vec<Event>,
    /// Replaces the stored snapshot
    pub snapshot: Snapshot,
}

/// Decide what to emit for a freshly fetched body
///
/// Pure: the previous snapshot goes in, the next one comes out. With
/// `changes_only` off the whole body is one event and no diff happens.
pub fn evaluate(
    agent_id: &str,
    settings: &AgentSettings,
    previous: Option<&Snapshot>,
    body: Value,
) -> Result<CycleOutcome, ExchangeError> {
    let kind = settings.resource;
    let snapshot = Snapshot::new(kind, body);

    if !settings.changes_only {
        let event = Event::new(agent_id, kind, snapshot.body.clone());
        return Ok(CycleOutcome {
            events: vec![event],
            snapshot,
        });
    }

    let current = snapshot.records()?;

    let previous_records = match previous.filter(|p| p.kind == kind) {
        Some(previous) => match previous.records() {
            Ok(records) => Some(records),
            Err(e) => {
                tracing::warn!("Stored snapshot is unreadable, treating as empty: {}", e);
                None
            }
        },
        None => {
            if settings.debug {
                tracing::info!("nothing to compare, emitting all {} records", current.len());
            }
            None
        }
    };

    let new_records = detector::diff(kind, previous_records.as_deref(), &current);

    if settings.debug {
        for record in &new_records {
            tracing::info!("new {} record {}: {}", kind, record.label(), record.to_payload());
        }
    }

    let events = new_records
        .iter()
        .map(|record| Event::new(agent_id, kind, record.to_payload()))
        .collect();

    Ok(CycleOutcome { events, snapshot })
}

/// Run one poll cycle: fetch, diff, emit, store
///
/// On a fetch or parse failure nothing is emitted and the stored snapshot
/// stays as it was; only the error bookkeeping is written. If the sink fails
/// partway, the new snapshot is still stored, so emission is at most once and
/// the undelivered records of that cycle are dropped. Returns the number of
/// events.
pub async fn run_cycle<F, S, E>(
    config: &AgentConfig,
    fetcher: &F,
    store: &mut S,
    sink: &mut E,
) -> Result<usize>
where
    F: ResourceFetcher,
    S: SnapshotStore + ?Sized,
    E: EventSink + ?Sized,
{
    let mut state = store.load()?.unwrap_or_default();
    let kind = config.agent.resource;

    let outcome = match fetcher.fetch(kind).await {
        Ok(response) => {
            tracing::debug!("{} responded with HTTP {}", kind, response.status);
            evaluate(
                &state.agent_id,
                &config.agent,
                state.snapshot_for(kind),
                response.body,
            )
        }
        Err(e) => Err(e),
    };

    match outcome {
        Ok(outcome) => {
            let mut delivered = 0;
            for event in &outcome.events {
                if let Err(e) = sink.emit(event) {
                    tracing::error!(
                        "Sink failed after {} of {} {} event(s): {:#}",
                        delivered,
                        outcome.events.len(),
                        kind,
                        e
                    );
                    state.update_emit_failed(outcome.snapshot, delivered, &e);
                    store.save(&state).context("Failed to save state")?;

                    return Err(e.context("Failed to emit events"));
                }
                delivered += 1;
            }

            state.update_polled(outcome.snapshot, delivered);
            store.save(&state).context("Failed to save state")?;

            Ok(delivered)
        }
        Err(e) => {
            tracing::error!("Polling {} failed ({}): {}", kind, e.kind(), e);
            state.update_failed(&e);
            store.save(&state).context("Failed to save state")?;

            Err(e.into())
        }
    }
}

/// Open the configured event sink
pub fn open_sink(output: &OutputConfig) -> Result<Box<dyn EventSink>> {
    match &output.events_file {
        Some(path) => Ok(Box::new(JsonLinesSink::append_to(path)?)),
        None => Ok(Box::new(JsonLinesSink::stdout())),
    }
}

/// Run the agent daemon until Ctrl-C
pub async fn run_agent_daemon(config: AgentConfig) -> Result<()> {
    tracing::info!("Starting agent '{}'", config.agent.name);
    tracing::info!("Resource: {}", config.agent.resource);
    tracing::info!(
        "Poll interval: {} seconds (+{} seconds jitter)",
        config.agent.poll_interval,
        config.agent.poll_jitter
    );

    let client = ExchangeClient::new(&config.exchange, config.agent.limit, config.agent.debug)?;
    let mut store = FileSnapshotStore::for_agent(&config.agent.name)?;
    let mut sink = open_sink(&config.output)?;
    let scheduler = PollingScheduler::new(config.agent.poll_interval, config.agent.poll_jitter);

    tracing::info!("State file: {}", store.path().display());

    poll_until(
        &config,
        &client,
        &mut store,
        sink.as_mut(),
        scheduler,
        tokio::signal::ctrl_c(),
    )
    .await
}

/// Run cycles on the schedule until `shutdown` completes
///
/// `shutdown` lives across cycles, so a signal that arrives mid-cycle ends
/// the loop once that cycle is done.
async fn poll_until<F, S, E, Q>(
    config: &AgentConfig,
    fetcher: &F,
    store: &mut S,
    sink: &mut E,
    mut scheduler: PollingScheduler,
    shutdown: Q,
) -> Result<()>
where
    F: ResourceFetcher,
    S: SnapshotStore + ?Sized,
    E: EventSink + ?Sized,
    Q: Future,
{
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = scheduler.tick() => {}
            _ = &mut shutdown => {
                tracing::info!("Shutting down");
                return Ok(());
            }
        }

        match run_cycle(config, fetcher, store, sink).await {
            Ok(0) => tracing::debug!("No new {} records", config.agent.resource),
            Ok(emitted) => tracing::info!("Emitted {} event(s)", emitted),
            Err(e) => {
                // Next trigger is the retry
                tracing::error!("Cycle failed: {:#}", e);
            }
        }

        let next_check = scheduler.next_poll_time();
        tracing::debug!("Next check at: {}", next_check.format("%Y-%m-%d %H:%M:%S %Z"));
    }
}

/// Run a single cycle now
///
/// A dry run prints events to stdout and leaves the state file untouched.
pub async fn check_once(config: &AgentConfig, dry_run: bool) -> Result<usize> {
    let client = ExchangeClient::new(&config.exchange, config.agent.limit, config.agent.debug)?;
    let store = FileSnapshotStore::for_agent(&config.agent.name)?;
    let mut sink: Box<dyn EventSink> = if dry_run {
        Box::new(JsonLinesSink::stdout())
    } else {
        open_sink(&config.output)?
    };

    check_with(config, &client, store, dry_run, sink.as_mut()).await
}

/// One cycle against `store`; a dry run works on an in-memory copy of it
async fn check_with<F, E>(
    config: &AgentConfig,
    fetcher: &F,
    mut store: FileSnapshotStore,
    dry_run: bool,
    sink: &mut E,
) -> Result<usize>
where
    F: ResourceFetcher,
    E: EventSink + ?Sized,
{
    if dry_run {
        let mut scratch = MemorySnapshotStore::new(store.load()?);
        return run_cycle(config, fetcher, &mut scratch, sink).await;
    }

    run_cycle(config, fetcher, &mut store, sink).await
}
