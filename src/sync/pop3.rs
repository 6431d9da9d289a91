//! POP3 sync state
//!
//! POP3 gives us a flat list of UIDLs and sizes. New UIDLs are synchronized
//! up to a per-pass budget; the rest wait in an overflow bucket until a grow
//! drains them. UIDLs that vanish from the maildrop are simply forgotten,
//! since the server may have a retention horizon of its own.

use super::metrics::SyncMetrics;
use super::task::{SyncMessageTask, SyncTask, UmidLocation, UmidLocationWrites, UmidNameWrites};
use super::{PassOutcome, SyncMode, SyncStateHelper};
use crate::util::a64;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, info, warn};

/// One LIST/UIDL entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pop3MessageInfo {
    pub uidl: String,
    #[serde(default)]
    pub size: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Pop3RawSyncState {
    pub next_umid_suffix: u64,
    /// Synchronized messages, including those with a pending sync_message
    pub uidl_to_umid: BTreeMap<String, String>,
    /// Messages we deleted locally and must not treat as new
    pub deleted_uidls: BTreeSet<String>,
    /// Messages we have not synchronized yet
    pub overflow_uidls_to_size: BTreeMap<String, Option<u64>>,
}

impl Default for Pop3RawSyncState {
    fn default() -> Self {
        Self {
            next_umid_suffix: 1,
            uidl_to_umid: BTreeMap::new(),
            deleted_uidls: BTreeSet::new(),
            overflow_uidls_to_size: BTreeMap::new(),
        }
    }
}

pub struct Pop3SyncStateHelper {
    account_id: String,
    mode: SyncMode,
    raw: Pop3RawSyncState,
    max_new_messages: usize,
    tasks: Vec<SyncTask>,
    umid_name_writes: UmidNameWrites,
    umid_location_writes: UmidLocationWrites,
    metrics: SyncMetrics,
}

impl Pop3SyncStateHelper {
    pub fn new(
        account_id: &str,
        raw: Option<Pop3RawSyncState>,
        mode: SyncMode,
        max_new_messages: usize,
    ) -> Self {
        let raw = raw.unwrap_or_else(|| {
            debug!("Creating default POP3 sync state for account {}", account_id);
            Pop3RawSyncState::default()
        });
        Self {
            account_id: account_id.to_string(),
            mode,
            raw,
            max_new_messages,
            tasks: Vec::new(),
            umid_name_writes: BTreeMap::new(),
            umid_location_writes: BTreeMap::new(),
            metrics: SyncMetrics::default(),
        }
    }

    pub fn mode(&self) -> SyncMode {
        self.mode
    }

    fn issue_unique_message_id(&mut self) -> String {
        let umid = format!("{}.{}", self.account_id, a64::encode_int(self.raw.next_umid_suffix));
        self.raw.next_umid_suffix += 1;
        umid
    }

    /// Reconcile the complete maildrop listing against what we know
    pub fn delta_check_uidls(&mut self, messages: &[Pop3MessageInfo]) {
        let mut unseen_synced: BTreeSet<String> = self.raw.uidl_to_umid.keys().cloned().collect();
        let mut unseen_deleted = self.raw.deleted_uidls.clone();
        let mut unseen_overflow: BTreeSet<String> =
            self.raw.overflow_uidls_to_size.keys().cloned().collect();

        let mut budget = self.max_new_messages;
        for message in messages {
            let uidl = &message.uidl;
            if self.raw.uidl_to_umid.contains_key(uidl) {
                unseen_synced.remove(uidl);
                continue;
            }
            if self.raw.deleted_uidls.contains(uidl) {
                unseen_deleted.remove(uidl);
                continue;
            }
            if self.raw.overflow_uidls_to_size.contains_key(uidl) {
                unseen_overflow.remove(uidl);
                continue;
            }

            if budget > 0 {
                budget -= 1;
                self.new_message_to_sync(uidl, message.size);
            } else {
                self.new_overflow_message(uidl, message.size);
            }
        }

        self.cleanup_unseen_synced_messages(unseen_synced);
        for uidl in unseen_deleted {
            self.raw.deleted_uidls.remove(&uidl);
        }
        for uidl in unseen_overflow {
            self.raw.overflow_uidls_to_size.remove(&uidl);
        }
    }

    pub fn new_message_to_sync(&mut self, uidl: &str, size: Option<u64>) {
        let umid = self.issue_unique_message_id();
        debug!("Synchronizing uidl {} as {}", uidl, umid);
        self.metrics.record_useful();
        self.umid_location_writes.insert(
            umid.clone(),
            Some(UmidLocation::Pop3 {
                uidl: uidl.to_string(),
            }),
        );
        self.tasks.push(SyncTask::SyncMessage(SyncMessageTask::pop3(
            &self.account_id,
            uidl,
            umid.clone(),
            size,
        )));
        self.raw.uidl_to_umid.insert(uidl.to_string(), umid);
    }

    pub fn new_overflow_message(&mut self, uidl: &str, size: Option<u64>) {
        debug!("Deferring uidl {} to overflow", uidl);
        self.raw.overflow_uidls_to_size.insert(uidl.to_string(), size);
    }

    fn cleanup_unseen_synced_messages(&mut self, unseen: BTreeSet<String>) {
        for uidl in unseen {
            if let Some(umid) = self.raw.uidl_to_umid.remove(&uidl) {
                debug!("Uidl {} left the maildrop, forgetting {}", uidl, umid);
                self.umid_name_writes.insert(umid.clone(), None);
                self.umid_location_writes.insert(umid, None);
            }
        }
    }

    /// Start synchronizing up to `count` overflow messages.
    ///
    /// Returns how many were moved.
    pub fn sync_overflow_messages(&mut self, count: usize) -> usize {
        let uidls: Vec<(String, Option<u64>)> = self
            .raw
            .overflow_uidls_to_size
            .iter()
            .take(count)
            .map(|(uidl, size)| (uidl.clone(), *size))
            .collect();
        for (uidl, size) in &uidls {
            self.raw.overflow_uidls_to_size.remove(uidl);
            self.new_message_to_sync(uidl, *size);
        }
        uidls.len()
    }

    /// The user deleted a synchronized message locally.
    pub fn deleting_message(&mut self, uidl: &str) {
        match self.raw.uidl_to_umid.remove(uidl) {
            Some(umid) => {
                debug!("Locally deleting uidl {} ({})", uidl, umid);
                self.raw.deleted_uidls.insert(uidl.to_string());
                self.umid_location_writes.insert(umid, None);
            }
            None => warn!("Deleting unknown uidl {}", uidl),
        }
    }

    pub fn umid_for_uidl(&self, uidl: &str) -> Option<&str> {
        self.raw.uidl_to_umid.get(uidl).map(String::as_str)
    }

    pub fn overflow_count(&self) -> usize {
        self.raw.overflow_uidls_to_size.len()
    }

    pub fn umid_name_writes(&self) -> &UmidNameWrites {
        &self.umid_name_writes
    }

    pub fn umid_location_writes(&self) -> &UmidLocationWrites {
        &self.umid_location_writes
    }
}

impl SyncStateHelper for Pop3SyncStateHelper {
    type RawState = Pop3RawSyncState;
    /// A complete maildrop listing
    type Observation = Vec<Pop3MessageInfo>;

    fn ingest(&mut self, observation: Vec<Pop3MessageInfo>) {
        self.delta_check_uidls(&observation);
    }

    fn finalize(&mut self) {
        info!(
            "POP3 sync pass for account {} finished: {} synced, {} overflow, {} new tasks",
            self.account_id,
            self.raw.uidl_to_umid.len(),
            self.raw.overflow_uidls_to_size.len(),
            self.tasks.len()
        );
    }

    fn tasks_to_schedule(&self) -> Vec<SyncTask> {
        self.tasks.clone()
    }

    fn raw_state(&self) -> &Pop3RawSyncState {
        &self.raw
    }

    fn metrics(&self) -> SyncMetrics {
        self.metrics
    }

    fn into_outcome(self) -> PassOutcome<Pop3RawSyncState> {
        PassOutcome {
            raw_state: self.raw,
            tasks: self.tasks,
            metrics: self.metrics,
        }
    }
}
