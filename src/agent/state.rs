use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::{Path, PathBuf};
use uuid::Uuid;

use crate::error::ExchangeError;
use crate::records::{Record, parse_records};
use crate::resource::ResourceKind;

/// Current state version
const STATE_VERSION: &str = "1.0";

/// Full response of the most recent successful poll
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct Snapshot {
    pub kind: ResourceKind,
    pub fetched_at: DateTime<Utc>,
    pub body: Value,
}

impl Snapshot {
    pub fn new(kind: ResourceKind, body: Value) -> Self {
        Self {
            kind,
            fetched_at: Utc::now(),
            body,
        }
    }

    pub fn records(&self) -> Result<Vec<Record>, ExchangeError> {
        parse_records(self.kind, &self.body)
    }
}

/// Persisted agent state: the snapshot slot plus health bookkeeping
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AgentState {
    pub version: String,

    /// Unique identifier for this agent instance
    pub agent_id: String,

    /// Most recent successful response
    #[serde(default)]
    pub snapshot: Option<Snapshot>,

    /// Last time a cycle ran, successful or not
    pub last_checked: Option<DateTime<Utc>>,

    pub last_success: Option<DateTime<Utc>>,

    /// Last time at least one event was emitted
    pub last_event_at: Option<DateTime<Utc>>,

    /// Error of the last cycle, cleared by the next successful one
    pub last_error: Option<String>,
}

impl AgentState {
    pub fn new() -> Self {
        Self {
            version: STATE_VERSION.to_string(),
            agent_id: Uuid::new_v4().to_string(),
            snapshot: None,
            last_checked: None,
            last_success: None,
            last_event_at: None,
            last_error: None,
        }
    }

    /// Snapshot to diff against when polling `kind`
    ///
    /// A snapshot of another kind has a different shape and counts as absent.
    pub fn snapshot_for(&self, kind: ResourceKind) -> Option<&Snapshot> {
        self.snapshot.as_ref().filter(|s| s.kind == kind)
    }

    /// Replace the snapshot after a successful cycle
    pub fn update_polled(&mut self, snapshot: Snapshot, events_emitted: usize) {
        let now = Utc::now();
        self.snapshot = Some(snapshot);
        self.last_checked = Some(now);
        self.last_success = Some(now);
        self.last_error = None;
        if events_emitted > 0 {
            self.last_event_at = Some(now);
        }
    }

    /// Record a failed cycle; the snapshot is left as it was
    pub fn update_failed(&mut self, error: &ExchangeError) {
        self.last_checked = Some(Utc::now());
        self.last_error = Some(format!("{}: {}", error.kind(), error));
    }

    /// Record a cycle whose sink failed after `delivered` events
    ///
    /// The new snapshot is kept so delivered records are never emitted again.
    /// Records after the failing one are not retried.
    pub fn update_emit_failed(
        &mut self,
        snapshot: Snapshot,
        delivered: usize,
        error: &anyhow::Error,
    ) {
        let now = Utc::now();
        self.snapshot = Some(snapshot);
        self.last_checked = Some(now);
        self.last_error = Some(format!("sink: {:#}", error));
        if delivered > 0 {
            self.last_event_at = Some(now);
        }
    }

    /// Whether the agent emitted within the expected period and its last cycle succeeded
    pub fn is_working(&self, expected_receive_period_in_days: u32, now: DateTime<Utc>) -> bool {
        let period = Duration::days(i64::from(expected_receive_period_in_days));
        let recent_event = self
            .last_event_at
            .map(|at| now - at <= period)
            .unwrap_or(false);

        recent_event && self.last_error.is_none()
    }
}

impl Default for AgentState {
    fn default() -> Self {
        Self::new()
    }
}

/// Single slot holding the agent state between cycles
pub trait SnapshotStore {
    fn load(&self) -> Result<Option<AgentState>>;
    fn save(&mut self, state: &AgentState) -> Result<()>;
}

/// State kept in a JSON file
pub struct FileSnapshotStore {
    path: PathBuf,
}

impl FileSnapshotStore {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    /// Store for the named agent in the default data directory
    pub fn for_agent(name: &str) -> Result<Self> {
        Ok(Self::new(get_agent_state_path(name)?))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl SnapshotStore for FileSnapshotStore {
    fn load(&self) -> Result<Option<AgentState>> {
        if !self.path.exists() {
            return Ok(None);
        }

        let content = std::fs::read_to_string(&self.path)
            .with_context(|| format!("Failed to read state file: {}", self.path.display()))?;

        let state: AgentState = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse state file: {}", self.path.display()))?;

        if state.version != STATE_VERSION {
            tracing::warn!(
                "State file version mismatch (expected {}, got {}). Treating as new state.",
                STATE_VERSION,
                state.version
            );
            return Ok(None);
        }

        Ok(Some(state))
    }

    fn save(&mut self, state: &AgentState) -> Result<()> {
        let content = serde_json::to_string_pretty(state).context("Failed to serialize state")?;

        crate::platform::atomic_write(&self.path, content.as_bytes())
            .with_context(|| format!("Failed to write state file: {}", self.path.display()))?;

        Ok(())
    }
}

/// State kept in memory, for dry runs and tests
#[derive(Default)]
pub struct MemorySnapshotStore {
    state: Option<AgentState>,
}

impl MemorySnapshotStore {
    pub fn new(state: Option<AgentState>) -> Self {
        Self { state }
    }
}

impl SnapshotStore for MemorySnapshotStore {
    fn load(&self) -> Result<Option<AgentState>> {
        Ok(self.state.clone())
    }

    fn save(&mut self, state: &AgentState) -> Result<()> {
        self.state = Some(state.clone());
        Ok(())
    }
}

/// State file path for the named agent
pub fn get_agent_state_path(name: &str) -> Result<PathBuf> {
    let dirs = directories::ProjectDirs::from("", "", "bybit-watch")
        .context("Could not determine state file location")?;
    Ok(dirs.data_local_dir().join(format!("state-{}.json", name)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn order_snapshot() -> Snapshot {
        Snapshot::new(
            ResourceKind::OrderHistory,
            json!({"retCode": 0, "result": {"list": [{"id": 1, "amt": 5}]}}),
        )
    }

    #[test]
    fn new_state_is_empty() {
        let state = AgentState::new();
        assert_eq!(state.version, "1.0");
        assert!(Uuid::parse_str(&state.agent_id).is_ok());
        assert!(state.snapshot.is_none());
        assert!(state.last_checked.is_none());
        assert!(state.last_error.is_none());
    }

    #[test]
    fn snapshot_of_other_kind_is_ignored() {
        let mut state = AgentState::new();
        state.update_polled(order_snapshot(), 1);

        assert!(state.snapshot_for(ResourceKind::OrderHistory).is_some());
        assert!(state.snapshot_for(ResourceKind::Balances).is_none());
    }

    #[test]
    fn failure_keeps_snapshot_and_records_error() {
        let mut state = AgentState::new();
        state.update_polled(order_snapshot(), 1);
        let before = state.snapshot.clone();

        state.update_failed(&ExchangeError::Transport("connection refused".to_string()));

        assert_eq!(state.snapshot, before);
        assert!(state.last_error.as_deref().unwrap().starts_with("transport:"));
    }

    #[test]
    fn success_clears_error_and_tracks_events() {
        let mut state = AgentState::new();
        state.update_failed(&ExchangeError::Parse("bad".to_string()));

        state.update_polled(order_snapshot(), 0);
        assert!(state.last_error.is_none());
        assert!(state.last_event_at.is_none());

        state.update_polled(order_snapshot(), 2);
        assert!(state.last_event_at.is_some());
    }

    #[test]
    fn emit_failure_keeps_new_snapshot_and_records_error() {
        let mut state = AgentState::new();
        let error = anyhow::anyhow!("broken pipe");

        let snapshot = order_snapshot();
        state.update_emit_failed(snapshot.clone(), 1, &error);

        assert_eq!(state.snapshot, Some(snapshot));
        assert_eq!(state.last_error.as_deref(), Some("sink: broken pipe"));
        assert!(state.last_success.is_none());
        assert!(state.last_event_at.is_some());
    }

    #[test]
    fn working_requires_recent_event_and_no_error() {
        let now = Utc::now();
        let mut state = AgentState::new();
        assert!(!state.is_working(2, now));

        state.last_event_at = Some(now - Duration::days(1));
        assert!(state.is_working(2, now));

        state.last_event_at = Some(now - Duration::days(3));
        assert!(!state.is_working(2, now));

        state.last_event_at = Some(now);
        state.last_error = Some("http: 500".to_string());
        assert!(!state.is_working(2, now));
    }

    #[test]
    fn file_store_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = FileSnapshotStore::new(dir.path().join("state-default.json"));
        assert!(store.load().unwrap().is_none());

        let mut state = AgentState::new();
        state.update_polled(order_snapshot(), 1);
        store.save(&state).unwrap();

        let loaded = store.load().unwrap().unwrap();
        assert_eq!(loaded.agent_id, state.agent_id);
        assert_eq!(loaded.snapshot, state.snapshot);
    }

    #[test]
    fn file_store_ignores_unknown_version() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        let mut state = AgentState::new();
        state.version = "0.1".to_string();
        std::fs::write(&path, serde_json::to_string(&state).unwrap()).unwrap();

        assert!(FileSnapshotStore::new(path).load().unwrap().is_none());
    }

    #[test]
    fn file_store_reports_corrupt_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        std::fs::write(&path, "{not json").unwrap();

        assert!(FileSnapshotStore::new(path).load().is_err());
    }

    #[test]
    fn snapshot_records_parse_body() {
        let records = order_snapshot().records().unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].to_payload(), json!({"id": 1, "amt": 5}));
    }
}
