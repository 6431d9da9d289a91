//! Per-folder sync state for servers without Gmail extensions.
//!
//! We only track messages newer than the folder's since-date (plus anything
//! backfilled later). Each tracked UID gets a folder-scoped umid so the store
//! can find the message again, and its flags are interned in a
//! [`FlagSlotTable`]. Conversation membership lives in the store, so flag
//! changes and deletions are first resolved from umid to message id and only
//! then grouped into `sync_conv` tasks.

use super::flag_slots::FlagSlotTable;
use super::criteria::meets_horizon;
use super::metrics::SyncMetrics;
use super::task::{
    SyncConvTask, SyncMessageTask, SyncTask, Uid, UmidLocation, UmidLocationWrites, UmidNameWrites,
};
use super::{PassOutcome, SyncMode, SyncStateHelper};
use crate::util::a64;
use crate::util::dates::DateTs;
use crate::util::ids::conv_id_from_message_id;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use tracing::{debug, info, warn};

/// What we remember about a tracked UID
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UidInfo {
    pub umid: String,
    pub flag_slot: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VanillaRawSyncState {
    pub next_umid_suffix: u64,
    /// Start of the active sync range; only consulted when growing
    pub since_date: DateTs,
    pub last_high_uid: Uid,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub modseq: Option<String>,
    pub flag_slots: FlagSlotTable,
    pub uid_info: BTreeMap<Uid, UidInfo>,
}

impl Default for VanillaRawSyncState {
    fn default() -> Self {
        Self {
            next_umid_suffix: 1,
            since_date: 0,
            last_high_uid: 0,
            modseq: None,
            flag_slots: FlagSlotTable::default(),
            uid_info: BTreeMap::new(),
        }
    }
}

/// Input to a vanilla IMAP pass
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum VanillaObservation {
    /// Complete list of tracked UIDs still on the server
    Present { uids: Vec<Uid> },
    /// A message seen by a date search or new-message fetch
    Found {
        uid: Uid,
        date_ts: DateTs,
        #[serde(default)]
        flags: Vec<String>,
    },
    /// Current flags of a tracked message
    Flags { uid: Uid, flags: Vec<String> },
}

pub struct VanillaSyncStateHelper {
    account_id: String,
    folder_id: String,
    mode: SyncMode,
    raw: VanillaRawSyncState,

    umid_deletions: BTreeSet<String>,
    umid_flag_changes: BTreeMap<String, Vec<String>>,
    umid_name_reads: UmidNameWrites,
    umid_location_writes: UmidLocationWrites,

    tasks: Vec<SyncTask>,
    conv_tasks: HashMap<String, usize>,
    metrics: SyncMetrics,
    conv_tasks_generated: bool,
}

impl VanillaSyncStateHelper {
    pub fn new(account_id: &str, folder_id: &str, raw: Option<VanillaRawSyncState>, mode: SyncMode) -> Self {
        let raw = raw.unwrap_or_else(|| {
            debug!("Creating default sync state for folder {}", folder_id);
            VanillaRawSyncState::default()
        });
        Self {
            account_id: account_id.to_string(),
            folder_id: folder_id.to_string(),
            mode,
            raw,
            umid_deletions: BTreeSet::new(),
            umid_flag_changes: BTreeMap::new(),
            umid_name_reads: BTreeMap::new(),
            umid_location_writes: BTreeMap::new(),
            tasks: Vec::new(),
            conv_tasks: HashMap::new(),
            metrics: SyncMetrics::default(),
            conv_tasks_generated: false,
        }
    }

    pub fn folder_id(&self) -> &str {
        &self.folder_id
    }

    pub fn mode(&self) -> SyncMode {
        self.mode
    }

    pub fn last_high_uid(&self) -> Uid {
        self.raw.last_high_uid
    }

    /// Advance the high UID; it never regresses
    pub fn set_last_high_uid(&mut self, uid: Uid) {
        if uid < self.raw.last_high_uid {
            warn!(
                "Ignoring attempt to lower last_high_uid of {} from {} to {}",
                self.folder_id, self.raw.last_high_uid, uid
            );
            return;
        }
        self.raw.last_high_uid = uid;
    }

    pub fn since_date(&self) -> DateTs {
        self.raw.since_date
    }

    pub fn set_since_date(&mut self, since: DateTs) {
        self.raw.since_date = since;
    }

    pub fn modseq(&self) -> Option<&str> {
        self.raw.modseq.as_deref()
    }

    pub fn set_modseq(&mut self, modseq: &str) {
        let current = self.raw.modseq.as_deref().unwrap_or("");
        self.raw.modseq = Some(a64::max_decimal_string(current, modseq).to_string());
    }

    pub fn known_message_count(&self) -> usize {
        self.raw.uid_info.len()
    }

    pub fn is_known_uid(&self, uid: Uid) -> bool {
        self.raw.uid_info.contains_key(&uid)
    }

    pub fn filter_out_known_uids(&self, uids: &[Uid]) -> Vec<Uid> {
        uids.iter().copied().filter(|uid| !self.is_known_uid(*uid)).collect()
    }

    pub fn all_uids(&self) -> Vec<Uid> {
        self.raw.uid_info.keys().copied().collect()
    }

    pub fn umid_for_uid(&self, uid: Uid) -> Option<&str> {
        self.raw.uid_info.get(&uid).map(|info| info.umid.as_str())
    }

    pub fn message_meets_sync_criteria(&self, date: DateTs) -> bool {
        meets_horizon(date, self.raw.since_date)
    }

    fn issue_unique_message_id(&mut self) -> String {
        let umid = format!("{}.{}", self.folder_id, a64::encode_int(self.raw.next_umid_suffix));
        self.raw.next_umid_suffix += 1;
        umid
    }

    /// A date search found this UID and it is not known yet; track it.
    pub fn yay_message_found_by_date(&mut self, uid: Uid, date_ts: DateTs, flags: Vec<String>) {
        if self.is_known_uid(uid) {
            warn!("Uid {} in {} is already tracked", uid, self.folder_id);
            return;
        }
        self.metrics.record_useful();
        let flag_slot = self.raw.flag_slots.find_slot(&flags);
        self.raw.flag_slots.incr(flag_slot);

        let umid = self.issue_unique_message_id();
        debug!("Tracking uid {} in {} as {}", uid, self.folder_id, umid);
        self.umid_location_writes.insert(
            umid.clone(),
            Some(UmidLocation::Imap {
                folder_id: self.folder_id.clone(),
                uid,
            }),
        );
        self.tasks.push(SyncTask::SyncMessage(SyncMessageTask::imap(
            &self.account_id,
            &self.folder_id,
            uid,
            umid.clone(),
            date_ts,
            flags,
        )));
        self.raw.uid_info.insert(uid, UidInfo { umid, flag_slot });
    }

    /// Note a flag change so the conversation can be updated once the umid is
    /// resolved to its message.
    pub fn check_flag_changes(&mut self, uid: Uid, flags: &[String]) {
        let Some(info) = self.raw.uid_info.get(&uid) else {
            warn!("Flags reported for untracked uid {} in {}", uid, self.folder_id);
            return;
        };
        let old_slot = info.flag_slot;
        let umid = info.umid.clone();
        let new_slot = self.raw.flag_slots.find_slot(flags);
        if new_slot == old_slot {
            return;
        }

        self.metrics.record_useful();
        self.raw.flag_slots.decr(old_slot);
        self.raw.flag_slots.incr(new_slot);
        if let Some(info) = self.raw.uid_info.get_mut(&uid) {
            info.flag_slot = new_slot;
        }
        debug!("Flags of {} changed", umid);
        self.umid_flag_changes.insert(umid.clone(), flags.to_vec());
        self.umid_name_reads.insert(umid, None);
    }

    /// Every tracked UID missing from `present_uids` was deleted on the server.
    pub fn infer_deletion_from_existing_uids(&mut self, present_uids: &[Uid]) -> Vec<Uid> {
        let present: BTreeSet<Uid> = present_uids.iter().copied().collect();
        let missing: Vec<Uid> = self
            .raw
            .uid_info
            .keys()
            .filter(|uid| !present.contains(uid))
            .copied()
            .collect();

        for uid in &missing {
            let Some(info) = self.raw.uid_info.remove(uid) else {
                continue;
            };
            debug!("Uid {} in {} is gone, deleting {}", uid, self.folder_id, info.umid);
            self.metrics.record_useful();
            self.raw.flag_slots.decr(info.flag_slot);
            self.umid_deletions.insert(info.umid.clone());
            self.umid_name_reads.insert(info.umid.clone(), None);
            // The umid name is cleared by sync_conv together with the message.
            self.umid_location_writes.insert(info.umid, None);
        }
        missing
    }

    /// The umid -> message id reads the store must satisfy before
    /// [`Self::generate_sync_conv_tasks`].
    pub fn umid_name_reads_mut(&mut self) -> &mut UmidNameWrites {
        &mut self.umid_name_reads
    }

    pub fn umid_name_reads(&self) -> &UmidNameWrites {
        &self.umid_name_reads
    }

    pub fn umid_location_writes(&self) -> &UmidLocationWrites {
        &self.umid_location_writes
    }

    /// Group resolved flag changes and deletions into one task per conversation
    pub fn generate_sync_conv_tasks(&mut self) {
        if self.conv_tasks_generated {
            return;
        }
        self.conv_tasks_generated = true;

        let flag_changes = std::mem::take(&mut self.umid_flag_changes);
        for (umid, flags) in flag_changes {
            let Some(message_id) = self.resolved_message_id(&umid) else {
                continue;
            };
            let idx = self.ensure_conv_task(conv_id_from_message_id(&message_id));
            if let SyncTask::SyncConv(task) = &mut self.tasks[idx] {
                task.modified_umids
                    .get_or_insert_with(BTreeMap::new)
                    .insert(umid, flags);
            }
        }

        let deletions = std::mem::take(&mut self.umid_deletions);
        for umid in deletions {
            let Some(message_id) = self.resolved_message_id(&umid) else {
                continue;
            };
            let idx = self.ensure_conv_task(conv_id_from_message_id(&message_id));
            if let SyncTask::SyncConv(task) = &mut self.tasks[idx] {
                task.removed_umids.get_or_insert_with(BTreeSet::new).insert(umid);
            }
        }
    }

    fn resolved_message_id(&self, umid: &str) -> Option<String> {
        match self.umid_name_reads.get(umid) {
            Some(Some(message_id)) => Some(message_id.clone()),
            _ => {
                warn!("Could not resolve umid {} to a message, skipping", umid);
                None
            }
        }
    }

    fn ensure_conv_task(&mut self, conv_id: &str) -> usize {
        if let Some(&idx) = self.conv_tasks.get(conv_id) {
            return idx;
        }
        self.tasks
            .push(SyncTask::SyncConv(SyncConvTask::new(&self.account_id, conv_id)));
        let idx = self.tasks.len() - 1;
        self.conv_tasks.insert(conv_id.to_string(), idx);
        idx
    }
}

impl SyncStateHelper for VanillaSyncStateHelper {
    type RawState = VanillaRawSyncState;
    type Observation = VanillaObservation;

    fn ingest(&mut self, observation: VanillaObservation) {
        match observation {
            VanillaObservation::Present { uids } => {
                self.infer_deletion_from_existing_uids(&uids);
            }
            VanillaObservation::Found { uid, date_ts, flags } => {
                if self.is_known_uid(uid) {
                    self.check_flag_changes(uid, &flags);
                } else if self.message_meets_sync_criteria(date_ts) {
                    self.yay_message_found_by_date(uid, date_ts, flags);
                } else {
                    self.metrics.record_waste();
                }
            }
            VanillaObservation::Flags { uid, flags } => self.check_flag_changes(uid, &flags),
        }
    }

    fn finalize(&mut self) {
        self.generate_sync_conv_tasks();
        info!(
            "Sync pass for folder {} finished: {} tracked messages, {} tasks",
            self.folder_id,
            self.raw.uid_info.len(),
            self.tasks.len()
        );
    }

    fn tasks_to_schedule(&self) -> Vec<SyncTask> {
        self.tasks.clone()
    }

    fn raw_state(&self) -> &VanillaRawSyncState {
        &self.raw
    }

    fn metrics(&self) -> SyncMetrics {
        self.metrics
    }

    fn into_outcome(self) -> PassOutcome<VanillaRawSyncState> {
        PassOutcome {
            raw_state: self.raw,
            tasks: self.tasks,
            metrics: self.metrics,
        }
    }
}
