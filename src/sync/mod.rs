//! Sync state reconciliation
//!
//! One helper per protocol family. A helper owns the persisted raw state of a
//! single binding (account or folder), ingests remote observations, and
//! produces the updated state plus the tasks the executor should schedule.
//! Helpers never perform I/O; the drivers in [`crate::tasks`] feed them.

pub mod bugzilla;
pub mod criteria;
pub mod flag_slots;
pub mod gmail;
pub mod ical;
pub mod metrics;
pub mod pop3;
pub mod probe;
pub mod task;
pub mod vanilla;

pub use bugzilla::{BugObservation, BugzillaRawSyncState, BugzillaSyncStateHelper};
pub use gmail::{
    ConvStash, GmailMessageObservation, GmailObservation, GmailRawSyncState,
    GmailSyncStateHelper, StashLifecycle,
};
pub use ical::{IcalRawSyncState, IcalSyncStateHelper};
pub use metrics::SyncMetrics;
pub use pop3::{Pop3MessageInfo, Pop3RawSyncState, Pop3SyncStateHelper};
pub use task::*;
pub use vanilla::{VanillaObservation, VanillaRawSyncState, VanillaSyncStateHelper};

use crate::error::SyncResult;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// What kind of pass a helper is running
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncMode {
    /// Steady-state delta check
    Refresh,
    /// Expanding the synchronized date range
    Grow,
    /// Enrolling the messages of a newly fetched conversation
    Conv,
}

/// Everything a finished pass produces, committed atomically by the driver
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PassOutcome<S> {
    pub raw_state: S,
    pub tasks: Vec<SyncTask>,
    pub metrics: SyncMetrics,
}

impl<S: Serialize> PassOutcome<S> {
    /// The raw state in the opaque form handed to the store
    pub fn raw_state_json(&self) -> SyncResult<serde_json::Value> {
        Ok(serde_json::to_value(&self.raw_state)?)
    }
}

/// Common capability set of the per-protocol helpers
pub trait SyncStateHelper {
    /// Persisted state, opaque to the store
    type RawState: Serialize + DeserializeOwned + Default + Clone;
    /// One remote fact the helper classifies
    type Observation;

    /// Classify one remote observation
    fn ingest(&mut self, observation: Self::Observation);

    /// Apply end-of-pass bookkeeping. Must be called once, after all
    /// observations were ingested.
    fn finalize(&mut self);

    /// Tasks produced so far
    fn tasks_to_schedule(&self) -> Vec<SyncTask>;

    fn raw_state(&self) -> &Self::RawState;

    fn metrics(&self) -> SyncMetrics {
        SyncMetrics::default()
    }

    /// Consume the helper
    fn into_outcome(self) -> PassOutcome<Self::RawState>;
}

/// Decode a raw state handed out by the store; `None` means first sync.
pub fn load_raw_state<S: DeserializeOwned>(value: Option<&serde_json::Value>) -> SyncResult<Option<S>> {
    match value {
        None | Some(serde_json::Value::Null) => Ok(None),
        Some(value) => Ok(Some(S::deserialize(value)?)),
    }
}
