use std::collections::HashSet;

use crate::records::{Record, RecordId};
use crate::resource::{MatchRule, ResourceKind};

/// Records of `current` that are new relative to `previous`
///
/// With no previous list every current record is new. Output keeps the order
/// of `current`; neither input is modified.
pub fn diff(kind: ResourceKind, previous: Option<&[Record]>, current: &[Record]) -> Vec<Record> {
    let previous = previous.unwrap_or(&[]);

    let new_records: Vec<Record> = match kind.match_rule() {
        MatchRule::WholeRecord => current
            .iter()
            .filter(|record| !previous.contains(record))
            .cloned()
            .collect(),
        MatchRule::Identity => {
            let seen: HashSet<&RecordId> = previous.iter().filter_map(Record::id).collect();
            current
                .iter()
                .filter(|record| record.id().is_none_or(|id| !seen.contains(id)))
                .cloned()
                .collect()
        }
    };

    tracing::debug!(
        "{}: {} of {} records new ({} previous)",
        kind,
        new_records.len(),
        current.len(),
        previous.len()
    );

    new_records
}
