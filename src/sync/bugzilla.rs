//! Bug tracker sync state
//!
//! Each bug is a conversation. The tracker is asked for bugs changed since
//! our watermark and every hit is resynchronized.

use super::metrics::SyncMetrics;
use super::task::{SyncBugTask, SyncTask};
use super::{PassOutcome, SyncStateHelper};
use crate::config::SyncConfig;
use crate::util::dates::{make_days_ago, DateTs};
use crate::util::ids::make_conv_id;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BugzillaRawSyncState {
    /// How far back the first sync reaches
    pub range_oldest_ts: DateTs,
    /// Highest change timestamp synchronized so far, 0 before the first sync
    pub last_change_datestamp: DateTs,
}

impl BugzillaRawSyncState {
    pub fn with_config(config: &SyncConfig) -> Self {
        Self {
            range_oldest_ts: make_days_ago(config.bug_initial_sync_days),
            last_change_datestamp: 0,
        }
    }
}

impl Default for BugzillaRawSyncState {
    fn default() -> Self {
        Self::with_config(&SyncConfig::default())
    }
}

/// A bug reported by the change search
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BugObservation {
    pub bug_id: u64,
    pub last_change_ts: DateTs,
}

pub struct BugzillaSyncStateHelper {
    account_id: String,
    raw: BugzillaRawSyncState,
    highest_change: DateTs,
    tasks: Vec<SyncTask>,
    metrics: SyncMetrics,
}

impl BugzillaSyncStateHelper {
    pub fn new(account_id: &str, raw: Option<BugzillaRawSyncState>, config: &SyncConfig) -> Self {
        let raw = raw.unwrap_or_else(|| BugzillaRawSyncState::with_config(config));
        Self {
            account_id: account_id.to_string(),
            highest_change: raw.last_change_datestamp,
            raw,
            tasks: Vec::new(),
            metrics: SyncMetrics::default(),
        }
    }

    /// Lower bound for the "changed since" query
    pub fn change_start_date(&self) -> DateTs {
        if self.raw.last_change_datestamp > 0 {
            self.raw.last_change_datestamp
        } else {
            self.raw.range_oldest_ts
        }
    }

    pub fn found_bug(&mut self, bug_id: u64, last_change_ts: DateTs) {
        debug!("Bug {} changed at {}", bug_id, last_change_ts);
        self.metrics.record_useful();
        self.highest_change = self.highest_change.max(last_change_ts);
        self.tasks.push(SyncTask::SyncBug(SyncBugTask {
            account_id: self.account_id.clone(),
            conv_id: make_conv_id(&self.account_id, &bug_id.to_string()),
            bug_id,
            most_recent: last_change_ts,
        }));
    }
}

impl SyncStateHelper for BugzillaSyncStateHelper {
    type RawState = BugzillaRawSyncState;
    type Observation = BugObservation;

    fn ingest(&mut self, observation: BugObservation) {
        self.found_bug(observation.bug_id, observation.last_change_ts);
    }

    fn finalize(&mut self) {
        self.raw.last_change_datestamp = self.raw.last_change_datestamp.max(self.highest_change);
        info!(
            "Bug sync pass for account {} finished: {} bugs, watermark {}",
            self.account_id,
            self.tasks.len(),
            self.raw.last_change_datestamp
        );
    }

    fn tasks_to_schedule(&self) -> Vec<SyncTask> {
        self.tasks.clone()
    }

    fn raw_state(&self) -> &BugzillaRawSyncState {
        &self.raw
    }

    fn metrics(&self) -> SyncMetrics {
        self.metrics
    }

    fn into_outcome(self) -> PassOutcome<BugzillaRawSyncState> {
        PassOutcome {
            raw_state: self.raw,
            tasks: self.tasks,
            metrics: self.metrics,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_sync_uses_range_start() {
        let raw = BugzillaRawSyncState {
            range_oldest_ts: 500,
            last_change_datestamp: 0,
        };
        let helper = BugzillaSyncStateHelper::new("3", Some(raw), &SyncConfig::default());
        assert_eq!(helper.change_start_date(), 500);
    }

    #[test]
    fn test_found_bugs_emit_tasks_and_advance_watermark() {
        let raw = BugzillaRawSyncState {
            range_oldest_ts: 500,
            last_change_datestamp: 1_000,
        };
        let mut helper = BugzillaSyncStateHelper::new("3", Some(raw), &SyncConfig::default());
        helper.ingest(BugObservation {
            bug_id: 42,
            last_change_ts: 3_000,
        });
        helper.ingest(BugObservation {
            bug_id: 7,
            last_change_ts: 2_000,
        });
        helper.finalize();

        let outcome = helper.into_outcome();
        assert_eq!(outcome.raw_state.last_change_datestamp, 3_000);
        assert_eq!(outcome.tasks.len(), 2);
        assert_eq!(outcome.tasks[0].conv_id(), Some("3.42"));
        assert_eq!(outcome.tasks[0].most_recent(), Some(3_000));
    }

    #[test]
    fn test_watermark_never_regresses() {
        let raw = BugzillaRawSyncState {
            range_oldest_ts: 500,
            last_change_datestamp: 5_000,
        };
        let mut helper = BugzillaSyncStateHelper::new("3", Some(raw), &SyncConfig::default());
        helper.found_bug(1, 4_000);
        helper.finalize();
        assert_eq!(helper.raw_state().last_change_datestamp, 5_000);
        assert_eq!(helper.change_start_date(), 5_000);
    }
}
