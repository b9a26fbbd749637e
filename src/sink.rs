use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fs::OpenOptions;
use std::io::{self, Write};
use std::path::Path;

use crate::resource::ResourceKind;

/// One emitted observation
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct Event {
    pub agent_id: String,
    pub resource: ResourceKind,
    pub created_at: DateTime<Utc>,
    pub payload: Value,
}

impl Event {
    pub fn new(agent_id: &str, resource: ResourceKind, payload: Value) -> Self {
        Self {
            agent_id: agent_id.to_string(),
            resource,
            created_at: Utc::now(),
            payload,
        }
    }
}

/// Destination for emitted events
pub trait EventSink {
    fn emit(&mut self, event: &Event) -> Result<()>;
}

/// Writes one JSON document per line
pub struct JsonLinesSink<W: Write> {
    writer: W,
}

impl<W: Write> JsonLinesSink<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }
}

impl JsonLinesSink<io::Stdout> {
    pub fn stdout() -> Self {
        Self::new(io::stdout())
    }
}

impl JsonLinesSink<std::fs::File> {
    /// Append to an events file, creating it if needed
    pub fn append_to(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).with_context(|| {
                    format!("Failed to create events directory: {}", parent.display())
                })?;
            }
        }

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("Failed to open events file: {}", path.display()))?;

        Ok(Self::new(file))
    }
}

impl<W: Write> EventSink for JsonLinesSink<W> {
    fn emit(&mut self, event: &Event) -> Result<()> {
        let line = serde_json::to_string(event).context("Failed to serialize event")?;
        writeln!(self.writer, "{}", line).context("Failed to write event")?;
        self.writer.flush().context("Failed to flush events")?;
        Ok(())
    }
}

/// Collects events in memory
impl EventSink for Vec<Event> {
    fn emit(&mut self, event: &Event) -> Result<()> {
        self.push(event.clone());
        Ok(())
    }
}
