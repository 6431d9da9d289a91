//! Gmail sync state
//!
//! Gmail gives us an "All Mail" folder with stable UIDs plus per-message
//! labels and thread ids (X-GM-LABELS, X-GM-THRID). We track every message
//! that belongs to a conversation we care about:
//!
//! - "yay" messages meet our sync criteria themselves (they carry a label
//!   whose since-date they are newer than). A conversation is synchronized
//!   as long as it has at least one yay message.
//! - "meh" messages do not meet the criteria but belong to a conversation
//!   that has a yay message, so we keep them up to date too.
//!
//! Everything else is ignored. Conversation stashes are derived from the two
//! persisted indexes on load and drive the conversation tasks.

use super::criteria::meets_label_criteria;
use super::metrics::SyncMetrics;
use super::task::{MessageState, SyncConvTask, SyncTask, Uid};
use super::{PassOutcome, SyncMode, SyncStateHelper};
use crate::util::dates::DateTs;
use crate::util::ids::make_conv_id;
use crate::util::a64::max_decimal_string;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use tracing::{debug, info, warn};

/// Persisted Gmail state, one per account
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GmailRawSyncState {
    /// uid -> raw conversation id, messages meeting the criteria
    pub yay_uids: BTreeMap<Uid, String>,
    /// uid -> raw conversation id, messages riding along with a yay conv
    pub meh_uids: BTreeMap<Uid, String>,
    /// folder id -> SINCE date for the label
    pub label_since_dates: BTreeMap<String, DateTs>,
    pub last_high_uid: Uid,
    /// Decimal HIGHESTMODSEQ, empty until the first grow
    pub modseq: String,
}

/// Where a conversation stash is in its removal lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StashLifecycle {
    Active,
    /// Lost its last yay message; can still be rescued within this pass
    PendingRemoval,
    Removed,
}

/// Derived per-conversation working set
#[derive(Debug, Clone)]
pub struct ConvStash {
    raw_conv_id: String,
    yay_uids: Vec<Uid>,
    meh_uids: Vec<Uid>,
    most_recent: DateTs,
    task: Option<usize>,
    lifecycle: StashLifecycle,
}

impl ConvStash {
    fn new(raw_conv_id: &str) -> Self {
        Self {
            raw_conv_id: raw_conv_id.to_string(),
            yay_uids: Vec::new(),
            meh_uids: Vec::new(),
            most_recent: 0,
            task: None,
            lifecycle: StashLifecycle::Active,
        }
    }

    pub fn raw_conv_id(&self) -> &str {
        &self.raw_conv_id
    }

    pub fn yay_uids(&self) -> &[Uid] {
        &self.yay_uids
    }

    pub fn meh_uids(&self) -> &[Uid] {
        &self.meh_uids
    }

    pub fn most_recent(&self) -> DateTs {
        self.most_recent
    }

    pub fn lifecycle(&self) -> StashLifecycle {
        self.lifecycle
    }

    fn mark_pending_removal(&mut self) -> bool {
        if self.lifecycle == StashLifecycle::Active {
            self.lifecycle = StashLifecycle::PendingRemoval;
            true
        } else {
            false
        }
    }

    fn rescue(&mut self) -> bool {
        if self.lifecycle == StashLifecycle::PendingRemoval {
            self.lifecycle = StashLifecycle::Active;
            true
        } else {
            false
        }
    }

    fn mark_removed(&mut self) {
        self.lifecycle = StashLifecycle::Removed;
    }
}

/// A message as seen by a FETCH or a SEARCH driven pass
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GmailMessageObservation {
    pub uid: Uid,
    /// X-GM-THRID, already in our encoding
    pub raw_conv_id: String,
    pub date_ts: DateTs,
    /// Folder ids of the labels the message carries
    #[serde(default)]
    pub folder_ids: Vec<String>,
    /// Flags and labels, for existing messages
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub new_state: Option<MessageState>,
}

/// Input to a Gmail pass
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum GmailObservation {
    Message(GmailMessageObservation),
    /// The server reported the UID as expunged
    Vanished { uid: Uid },
}

pub struct GmailSyncStateHelper {
    account_id: String,
    mode: SyncMode,
    raw: GmailRawSyncState,
    stashes: HashMap<String, ConvStash>,
    tasks: Vec<SyncConvTask>,
    metrics: SyncMetrics,
}

impl GmailSyncStateHelper {
    /// Wrap a persisted state, or start fresh when there is none
    pub fn new(account_id: &str, raw: Option<GmailRawSyncState>, mode: SyncMode) -> Self {
        let raw = raw.unwrap_or_default();
        let mut helper = Self {
            account_id: account_id.to_string(),
            mode,
            raw,
            stashes: HashMap::new(),
            tasks: Vec::new(),
            metrics: SyncMetrics::default(),
        };
        helper.derive_stashes();
        helper
    }

    fn derive_stashes(&mut self) {
        for (&uid, raw_conv_id) in &self.raw.yay_uids {
            self.stashes
                .entry(raw_conv_id.clone())
                .or_insert_with(|| ConvStash::new(raw_conv_id))
                .yay_uids
                .push(uid);
        }

        let mut orphans = Vec::new();
        for (&uid, raw_conv_id) in &self.raw.meh_uids {
            match self.stashes.get_mut(raw_conv_id) {
                Some(stash) => stash.meh_uids.push(uid),
                None => orphans.push(uid),
            }
        }
        for uid in orphans {
            warn!("Dropping meh uid {} whose conversation has no yay messages", uid);
            self.raw.meh_uids.remove(&uid);
        }
    }

    pub fn account_id(&self) -> &str {
        &self.account_id
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
                "Ignoring attempt to lower last_high_uid from {} to {}",
                self.raw.last_high_uid, uid
            );
            return;
        }
        self.raw.last_high_uid = uid;
    }

    /// Current modseq, `None` when never initialized
    pub fn modseq(&self) -> Option<&str> {
        (!self.raw.modseq.is_empty()).then_some(self.raw.modseq.as_str())
    }

    /// Advance the modseq; it never regresses
    pub fn set_modseq(&mut self, modseq: &str) {
        self.raw.modseq = max_decimal_string(&self.raw.modseq, modseq).to_string();
    }

    pub fn folder_since_date(&self, folder_id: &str) -> Option<DateTs> {
        self.raw.label_since_dates.get(folder_id).copied()
    }

    pub fn set_folder_since_date(&mut self, folder_id: &str, since: DateTs) {
        self.raw.label_since_dates.insert(folder_id.to_string(), since);
    }

    pub fn is_known_raw_conv_id(&self, raw_conv_id: &str) -> bool {
        self.stashes.contains_key(raw_conv_id)
    }

    pub fn is_yay_uid(&self, uid: Uid) -> bool {
        self.raw.yay_uids.contains_key(&uid)
    }

    pub fn is_meh_uid(&self, uid: Uid) -> bool {
        self.raw.meh_uids.contains_key(&uid)
    }

    pub fn is_known_uid(&self, uid: Uid) -> bool {
        self.is_yay_uid(uid) || self.is_meh_uid(uid)
    }

    pub fn stash(&self, raw_conv_id: &str) -> Option<&ConvStash> {
        self.stashes.get(raw_conv_id)
    }

    pub fn stashes(&self) -> impl Iterator<Item = &ConvStash> {
        self.stashes.values()
    }

    pub fn conv_id_for(&self, raw_conv_id: &str) -> String {
        make_conv_id(&self.account_id, raw_conv_id)
    }

    /// Does a message with this date and these labels meet our criteria?
    pub fn message_meets_sync_criteria<S: AsRef<str>>(&self, date: DateTs, folder_ids: &[S]) -> bool {
        meets_label_criteria(date, folder_ids, &self.raw.label_since_dates)
    }

    // ---- task bookkeeping

    fn make_conv_task(
        tasks: &mut Vec<SyncConvTask>,
        account_id: &str,
        stash: &mut ConvStash,
        new_conv: bool,
    ) -> usize {
        let mut task = SyncConvTask::new(account_id, make_conv_id(account_id, &stash.raw_conv_id));
        task.new_conv = new_conv;
        task.most_recent = stash.most_recent;
        if !new_conv {
            task.remove_conv = stash.lifecycle == StashLifecycle::PendingRemoval;
        }
        tasks.push(task);
        let idx = tasks.len() - 1;
        stash.task = Some(idx);
        idx
    }

    fn task_for_stash(tasks: &mut Vec<SyncConvTask>, account_id: &str, stash: &mut ConvStash) -> usize {
        match stash.task {
            Some(idx) => idx,
            None => Self::make_conv_task(tasks, account_id, stash, false),
        }
    }

    fn update_task_with_new_uid(&mut self, raw_conv_id: &str, uid: Uid, date_ts: Option<DateTs>) {
        // Grow only widens the window; the conversation itself is current.
        if self.mode != SyncMode::Refresh {
            return;
        }
        let Some(stash) = self.stashes.get_mut(raw_conv_id) else {
            warn!("New uid {} for untracked conversation {}", uid, raw_conv_id);
            return;
        };
        if let Some(date_ts) = date_ts {
            stash.most_recent = stash.most_recent.max(date_ts);
        }
        let idx = Self::task_for_stash(&mut self.tasks, &self.account_id, stash);
        let task = &mut self.tasks[idx];
        task.most_recent = task.most_recent.max(stash.most_recent);
        if task.new_conv {
            return;
        }
        task.new_uids.get_or_insert_with(BTreeSet::new).insert(uid);
    }

    fn update_task_with_modified_uid(&mut self, raw_conv_id: &str, uid: Uid, new_state: MessageState) {
        if self.mode == SyncMode::Conv {
            return;
        }
        let Some(stash) = self.stashes.get_mut(raw_conv_id) else {
            warn!("Modified uid {} for untracked conversation {}", uid, raw_conv_id);
            return;
        };
        let idx = Self::task_for_stash(&mut self.tasks, &self.account_id, stash);
        let task = &mut self.tasks[idx];
        if task.new_conv {
            return;
        }
        task.modified_uids
            .get_or_insert_with(BTreeMap::new)
            .insert(uid, new_state);
    }

    fn update_task_with_removed_uid(&mut self, raw_conv_id: &str, uid: Uid) {
        let Some(stash) = self.stashes.get_mut(raw_conv_id) else {
            return;
        };
        let idx = Self::task_for_stash(&mut self.tasks, &self.account_id, stash);
        let task = &mut self.tasks[idx];
        if task.new_conv {
            return;
        }
        task.removed_uids.get_or_insert_with(BTreeSet::new).insert(uid);
    }

    fn mark_conv_for_removal(&mut self, raw_conv_id: &str) {
        let Some(stash) = self.stashes.get_mut(raw_conv_id) else {
            return;
        };
        if !stash.mark_pending_removal() {
            return;
        }
        debug!("Conversation {} lost its last yay message", raw_conv_id);
        let idx = Self::task_for_stash(&mut self.tasks, &self.account_id, stash);
        self.tasks[idx].remove_conv = true;
    }

    fn rescue_conv(&mut self, raw_conv_id: &str) {
        let Some(stash) = self.stashes.get_mut(raw_conv_id) else {
            return;
        };
        if !stash.rescue() {
            return;
        }
        debug!("Conversation {} rescued from removal", raw_conv_id);
        if let Some(idx) = stash.task {
            self.tasks[idx].remove_conv = false;
        }
    }

    // ---- transitions

    /// A message we had never seen starts a conversation we care about
    pub fn new_yay_message_in_new_conv(&mut self, uid: Uid, raw_conv_id: &str, date_ts: DateTs) {
        if self.is_known_raw_conv_id(raw_conv_id) {
            self.new_yay_message_in_existing_conv(uid, raw_conv_id, Some(date_ts));
            return;
        }
        debug!("New yay uid {} starts conversation {}", uid, raw_conv_id);
        self.metrics.record_useful();
        self.raw.yay_uids.insert(uid, raw_conv_id.to_string());

        let mut stash = ConvStash::new(raw_conv_id);
        stash.yay_uids.push(uid);
        stash.most_recent = date_ts;
        if self.mode != SyncMode::Conv {
            Self::make_conv_task(&mut self.tasks, &self.account_id, &mut stash, true);
        }
        self.stashes.insert(raw_conv_id.to_string(), stash);
    }

    pub fn new_yay_message_in_existing_conv(&mut self, uid: Uid, raw_conv_id: &str, date_ts: Option<DateTs>) {
        debug!("New yay uid {} in conversation {}", uid, raw_conv_id);
        self.metrics.record_useful();
        self.raw.yay_uids.insert(uid, raw_conv_id.to_string());

        let Some(stash) = self.stashes.get_mut(raw_conv_id) else {
            warn!("Yay uid {} for untracked conversation {}", uid, raw_conv_id);
            self.raw.yay_uids.remove(&uid);
            return;
        };
        stash.yay_uids.push(uid);
        if stash.yay_uids.len() == 1 {
            self.rescue_conv(raw_conv_id);
        }
        self.update_task_with_new_uid(raw_conv_id, uid, date_ts);
    }

    /// `date_ts` is absent while enrolling a conversation's messages
    pub fn new_meh_message_in_existing_conv(&mut self, uid: Uid, raw_conv_id: &str, date_ts: Option<DateTs>) {
        let Some(stash) = self.stashes.get_mut(raw_conv_id) else {
            warn!("Meh uid {} for untracked conversation {}", uid, raw_conv_id);
            return;
        };
        debug!("New meh uid {} in conversation {}", uid, raw_conv_id);
        self.metrics.record_useful();
        stash.meh_uids.push(uid);
        self.raw.meh_uids.insert(uid, raw_conv_id.to_string());
        if date_ts.is_some() {
            self.update_task_with_new_uid(raw_conv_id, uid, date_ts);
        }
    }

    pub fn new_moot_message(&mut self, uid: Uid) {
        debug!("Ignoring new uid {}", uid);
        self.metrics.record_waste();
    }

    /// A message we had ignored now carries a qualifying label
    pub fn existing_ignored_message_is_now_yay(&mut self, uid: Uid, raw_conv_id: &str, date_ts: DateTs) {
        if self.is_known_raw_conv_id(raw_conv_id) {
            self.new_yay_message_in_existing_conv(uid, raw_conv_id, Some(date_ts));
        } else {
            self.new_yay_message_in_new_conv(uid, raw_conv_id, date_ts);
        }
    }

    pub fn existing_yay_message_is_now_meh(&mut self, uid: Uid, new_state: MessageState) {
        let Some(raw_conv_id) = self.raw.yay_uids.remove(&uid) else {
            return;
        };
        debug!("Yay uid {} demoted to meh", uid);
        self.metrics.record_useful();
        self.raw.meh_uids.insert(uid, raw_conv_id.clone());

        let now_empty = match self.stashes.get_mut(&raw_conv_id) {
            Some(stash) => {
                stash.yay_uids.retain(|&u| u != uid);
                stash.meh_uids.push(uid);
                stash.yay_uids.is_empty()
            }
            None => false,
        };
        self.update_task_with_modified_uid(&raw_conv_id, uid, new_state);
        if now_empty {
            self.mark_conv_for_removal(&raw_conv_id);
        }
    }

    pub fn existing_meh_message_is_now_yay(&mut self, uid: Uid, new_state: Option<MessageState>) {
        let Some(raw_conv_id) = self.raw.meh_uids.remove(&uid) else {
            return;
        };
        debug!("Meh uid {} promoted to yay", uid);
        self.metrics.record_useful();
        self.raw.yay_uids.insert(uid, raw_conv_id.clone());

        let rescued = match self.stashes.get_mut(&raw_conv_id) {
            Some(stash) => {
                stash.meh_uids.retain(|&u| u != uid);
                stash.yay_uids.push(uid);
                stash.yay_uids.len() == 1
            }
            None => false,
        };
        if rescued {
            self.rescue_conv(&raw_conv_id);
        }
        if let Some(new_state) = new_state {
            self.update_task_with_modified_uid(&raw_conv_id, uid, new_state);
        }
    }

    /// Flags or labels changed on a tracked message without changing its class
    pub fn existing_message_updated(&mut self, uid: Uid, new_state: MessageState) {
        let raw_conv_id = match self.raw.yay_uids.get(&uid).or_else(|| self.raw.meh_uids.get(&uid)) {
            Some(raw_conv_id) => raw_conv_id.clone(),
            None => return,
        };
        self.metrics.record_useful();
        self.update_task_with_modified_uid(&raw_conv_id, uid, new_state);
    }

    pub fn existing_moot_message(&mut self, uid: Uid) {
        debug!("Ignoring changes to uid {}", uid);
        self.metrics.record_waste();
    }

    pub fn yay_message_deleted(&mut self, uid: Uid) {
        let Some(raw_conv_id) = self.raw.yay_uids.remove(&uid) else {
            return;
        };
        debug!("Yay uid {} deleted", uid);
        self.metrics.record_useful();
        let now_empty = match self.stashes.get_mut(&raw_conv_id) {
            Some(stash) => {
                stash.yay_uids.retain(|&u| u != uid);
                stash.yay_uids.is_empty()
            }
            None => false,
        };
        self.update_task_with_removed_uid(&raw_conv_id, uid);
        if now_empty {
            self.mark_conv_for_removal(&raw_conv_id);
        }
    }

    pub fn meh_message_deleted(&mut self, uid: Uid) {
        let Some(raw_conv_id) = self.raw.meh_uids.remove(&uid) else {
            return;
        };
        debug!("Meh uid {} deleted", uid);
        self.metrics.record_useful();
        if let Some(stash) = self.stashes.get_mut(&raw_conv_id) {
            stash.meh_uids.retain(|&u| u != uid);
        }
        self.update_task_with_removed_uid(&raw_conv_id, uid);
    }

    /// The server told us a UID no longer exists
    pub fn message_vanished(&mut self, uid: Uid) {
        if self.is_yay_uid(uid) {
            self.yay_message_deleted(uid);
        } else if self.is_meh_uid(uid) {
            self.meh_message_deleted(uid);
        }
    }

    /// Every tracked UID missing from a full enumeration was deleted
    pub fn infer_deletions(&mut self, present_uids: &[Uid]) -> Vec<Uid> {
        let present: BTreeSet<Uid> = present_uids.iter().copied().collect();
        let missing: Vec<Uid> = self
            .raw
            .yay_uids
            .keys()
            .chain(self.raw.meh_uids.keys())
            .filter(|uid| !present.contains(uid))
            .copied()
            .collect();
        for &uid in &missing {
            self.message_vanished(uid);
        }
        missing
    }

    // ---- classification

    fn classify_refresh(&mut self, obs: GmailMessageObservation) {
        let meets = self.message_meets_sync_criteria(obs.date_ts, &obs.folder_ids);
        let tracked = self.is_known_uid(obs.uid);

        if obs.uid > self.raw.last_high_uid && !tracked {
            let conv_known = self.is_known_raw_conv_id(&obs.raw_conv_id);
            match (meets, conv_known) {
                (true, false) => self.new_yay_message_in_new_conv(obs.uid, &obs.raw_conv_id, obs.date_ts),
                (true, true) => {
                    self.new_yay_message_in_existing_conv(obs.uid, &obs.raw_conv_id, Some(obs.date_ts))
                }
                (false, true) => {
                    self.new_meh_message_in_existing_conv(obs.uid, &obs.raw_conv_id, Some(obs.date_ts))
                }
                (false, false) => self.new_moot_message(obs.uid),
            }
            return;
        }

        let new_state = obs.new_state.unwrap_or_default();
        if meets {
            if self.is_yay_uid(obs.uid) {
                self.existing_message_updated(obs.uid, new_state);
            } else if self.is_meh_uid(obs.uid) {
                self.existing_meh_message_is_now_yay(obs.uid, Some(new_state));
            } else {
                self.existing_ignored_message_is_now_yay(obs.uid, &obs.raw_conv_id, obs.date_ts);
            }
        } else if self.is_yay_uid(obs.uid) {
            self.existing_yay_message_is_now_meh(obs.uid, new_state);
        } else if self.is_meh_uid(obs.uid) {
            self.existing_message_updated(obs.uid, new_state);
        } else {
            self.existing_moot_message(obs.uid);
        }
    }

    fn classify_grow(&mut self, obs: GmailMessageObservation) {
        // Everything a grow search returns meets the widened criteria.
        if self.is_yay_uid(obs.uid) {
            return;
        }
        if self.is_meh_uid(obs.uid) {
            self.existing_meh_message_is_now_yay(obs.uid, None);
        } else {
            self.existing_ignored_message_is_now_yay(obs.uid, &obs.raw_conv_id, obs.date_ts);
        }
    }

    fn classify_conv(&mut self, obs: GmailMessageObservation) {
        if self.is_known_uid(obs.uid) {
            return;
        }
        if self.message_meets_sync_criteria(obs.date_ts, &obs.folder_ids) {
            if self.is_known_raw_conv_id(&obs.raw_conv_id) {
                self.new_yay_message_in_existing_conv(obs.uid, &obs.raw_conv_id, None);
            } else {
                self.new_yay_message_in_new_conv(obs.uid, &obs.raw_conv_id, obs.date_ts);
            }
        } else {
            self.new_meh_message_in_existing_conv(obs.uid, &obs.raw_conv_id, None);
        }
    }

    /// Drop every stash still pending removal, purging its meh uids.
    ///
    /// Returns the dropped stashes, now in the `Removed` state.
    pub fn finalize_pending_removals(&mut self) -> Vec<ConvStash> {
        let pending: Vec<String> = self
            .stashes
            .values()
            .filter(|stash| stash.lifecycle == StashLifecycle::PendingRemoval)
            .map(|stash| stash.raw_conv_id.clone())
            .collect();

        let mut removed = Vec::with_capacity(pending.len());
        for raw_conv_id in pending {
            if let Some(mut stash) = self.stashes.remove(&raw_conv_id) {
                for uid in &stash.meh_uids {
                    self.raw.meh_uids.remove(uid);
                }
                stash.mark_removed();
                debug!("Conversation {} removed", raw_conv_id);
                removed.push(stash);
            }
        }
        removed
    }
}

impl SyncStateHelper for GmailSyncStateHelper {
    type RawState = GmailRawSyncState;
    type Observation = GmailObservation;

    fn ingest(&mut self, observation: GmailObservation) {
        match observation {
            GmailObservation::Vanished { uid } => self.message_vanished(uid),
            GmailObservation::Message(obs) => match self.mode {
                SyncMode::Refresh => self.classify_refresh(obs),
                SyncMode::Grow => self.classify_grow(obs),
                SyncMode::Conv => self.classify_conv(obs),
            },
        }
    }

    fn finalize(&mut self) {
        let removed = self.finalize_pending_removals();
        info!(
            "Gmail sync pass for account {} finished: {} conv tasks, {} removed convs, {} useful, {} waste",
            self.account_id,
            self.tasks.len(),
            removed.len(),
            self.metrics.useful,
            self.metrics.waste
        );
    }

    fn tasks_to_schedule(&self) -> Vec<SyncTask> {
        self.tasks.iter().cloned().map(SyncTask::SyncConv).collect()
    }

    fn raw_state(&self) -> &GmailRawSyncState {
        &self.raw
    }

    fn metrics(&self) -> SyncMetrics {
        self.metrics
    }

    fn into_outcome(self) -> PassOutcome<GmailRawSyncState> {
        PassOutcome {
            tasks: self.tasks.into_iter().map(SyncTask::SyncConv).collect(),
            raw_state: self.raw,
            metrics: self.metrics,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const INBOX: &str = "0.1";

    fn message(uid: Uid, conv: &str, date_ts: DateTs, labels: &[&str]) -> GmailObservation {
        GmailObservation::Message(GmailMessageObservation {
            uid,
            raw_conv_id: conv.to_string(),
            date_ts,
            folder_ids: labels.iter().map(|l| l.to_string()).collect(),
            new_state: Some(MessageState {
                raw_msg_id: None,
                flags: vec![],
                labels: labels.iter().map(|l| l.to_string()).collect(),
            }),
        })
    }

    fn base_state() -> GmailRawSyncState {
        let mut state = GmailRawSyncState::default();
        state.label_since_dates.insert(INBOX.to_string(), 1_000);
        state.last_high_uid = 50;
        state.modseq = "900".to_string();
        state
    }

    fn conv_tasks(helper: &GmailSyncStateHelper) -> Vec<SyncConvTask> {
        helper
            .tasks_to_schedule()
            .into_iter()
            .filter_map(|task| task.as_conv().cloned())
            .collect()
    }

    #[test]
    fn test_new_conversation_arrival() {
        let mut helper = GmailSyncStateHelper::new("0", Some(base_state()), SyncMode::Refresh);
        helper.ingest(message(100, "abc", 5_000, &[INBOX]));
        helper.finalize();

        let outcome = helper.into_outcome();
        assert_eq!(outcome.tasks.len(), 1);
        let task = outcome.tasks[0].as_conv().unwrap();
        assert!(task.new_conv);
        assert!(!task.remove_conv);
        assert_eq!(task.conv_id, "0.abc");
        assert_eq!(task.most_recent, 5_000);
        assert!(task.new_uids.is_none());
        assert_eq!(outcome.raw_state.yay_uids.get(&100).map(String::as_str), Some("abc"));
        assert_eq!(outcome.metrics.useful, 1);
    }

    #[test]
    fn test_new_uids_accumulate_on_one_task() {
        let mut state = base_state();
        state.yay_uids.insert(10, "abc".into());
        let mut helper = GmailSyncStateHelper::new("0", Some(state), SyncMode::Refresh);
        helper.ingest(message(101, "abc", 6_000, &[INBOX]));
        helper.ingest(message(102, "abc", 7_000, &["0.9"]));
        helper.ingest(message(103, "zzz", 7_000, &["0.9"]));

        let tasks = conv_tasks(&helper);
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].new_uids, Some([101, 102].into_iter().collect()));
        assert_eq!(tasks[0].most_recent, 7_000);
        assert!(helper.is_meh_uid(102));
        assert!(!helper.is_known_uid(103));
        assert_eq!(helper.metrics().waste, 1);
    }

    #[test]
    fn test_rescue_within_one_pass() {
        let mut state = base_state();
        state.yay_uids.insert(10, "abc".into());
        let mut helper = GmailSyncStateHelper::new("0", Some(state), SyncMode::Refresh);

        helper.ingest(message(10, "abc", 5_000, &["0.9"]));
        assert_eq!(helper.stash("abc").unwrap().lifecycle(), StashLifecycle::PendingRemoval);
        helper.ingest(message(10, "abc", 5_000, &[INBOX]));
        assert_eq!(helper.stash("abc").unwrap().lifecycle(), StashLifecycle::Active);
        helper.finalize();

        let tasks = conv_tasks(&helper);
        assert_eq!(tasks.len(), 1);
        assert!(!tasks[0].remove_conv);
        assert!(helper.is_yay_uid(10));
        assert!(helper.stash("abc").is_some());
    }

    #[test]
    fn test_finalize_reports_removed_stashes() {
        let mut state = base_state();
        state.yay_uids.insert(10, "abc".into());
        state.meh_uids.insert(11, "abc".into());
        state.yay_uids.insert(20, "def".into());
        let mut helper = GmailSyncStateHelper::new("0", Some(state), SyncMode::Refresh);

        helper.ingest(message(10, "abc", 5_000, &["0.9"]));
        let removed = helper.finalize_pending_removals();

        assert_eq!(removed.len(), 1);
        assert_eq!(removed[0].raw_conv_id(), "abc");
        assert_eq!(removed[0].lifecycle(), StashLifecycle::Removed);
        let mut purged = removed[0].meh_uids().to_vec();
        purged.sort_unstable();
        assert_eq!(purged, vec![10, 11]);
        assert!(!helper.is_known_uid(10));
        assert!(!helper.is_known_uid(11));
        assert!(helper.stash("abc").is_none());
        assert_eq!(helper.stash("def").unwrap().lifecycle(), StashLifecycle::Active);
        assert!(helper.finalize_pending_removals().is_empty());
    }

    #[test]
    fn test_removal_purges_meh_uids() {
        let mut state = base_state();
        state.yay_uids.insert(10, "abc".into());
        state.meh_uids.insert(11, "abc".into());
        let mut helper = GmailSyncStateHelper::new("0", Some(state), SyncMode::Refresh);

        helper.ingest(message(10, "abc", 5_000, &["0.9"]));
        helper.finalize();

        let outcome = helper.into_outcome();
        let task = outcome.tasks[0].as_conv().unwrap();
        assert!(task.remove_conv);
        assert!(outcome.raw_state.yay_uids.is_empty());
        assert!(outcome.raw_state.meh_uids.is_empty());
    }

    #[test]
    fn test_every_stash_has_a_yay_after_finalize() {
        let mut state = base_state();
        state.yay_uids.insert(10, "a".into());
        state.yay_uids.insert(20, "b".into());
        state.meh_uids.insert(21, "b".into());
        let mut helper = GmailSyncStateHelper::new("0", Some(state), SyncMode::Refresh);

        helper.ingest(GmailObservation::Vanished { uid: 10 });
        helper.ingest(message(21, "b", 5_000, &[INBOX]));
        helper.ingest(message(20, "b", 5_000, &[]));
        helper.finalize();

        assert!(helper.stashes().all(|stash| !stash.yay_uids().is_empty()));
        assert!(helper.stash("a").is_none());
        assert_eq!(helper.stash("b").unwrap().yay_uids(), &[21]);
    }

    #[test]
    fn test_deletion_completeness() {
        let mut state = base_state();
        state.yay_uids.insert(1, "a".into());
        state.yay_uids.insert(2, "a".into());
        state.yay_uids.insert(3, "c".into());
        let mut helper = GmailSyncStateHelper::new("0", Some(state), SyncMode::Refresh);

        assert_eq!(helper.infer_deletions(&[1, 3]), vec![2]);
        helper.finalize();

        let tasks = conv_tasks(&helper);
        let referencing: Vec<_> = tasks
            .iter()
            .filter(|task| task.removed_uids.as_ref().is_some_and(|uids| uids.contains(&2)))
            .collect();
        assert_eq!(referencing.len(), 1);
        assert!(!helper.is_known_uid(2));
    }

    #[test]
    fn test_round_trip_is_identical() {
        let mut state = base_state();
        state.yay_uids.insert(10, "a".into());
        state.meh_uids.insert(11, "a".into());
        let before = serde_json::to_string(&state).unwrap();

        let parsed: GmailRawSyncState = serde_json::from_str(&before).unwrap();
        let mut helper = GmailSyncStateHelper::new("0", Some(parsed), SyncMode::Refresh);
        helper.finalize();
        let after = serde_json::to_string(helper.raw_state()).unwrap();

        assert_eq!(before, after);
        assert!(helper.tasks_to_schedule().is_empty());
    }

    #[test]
    fn test_orphan_meh_uid_dropped_on_load() {
        let mut state = base_state();
        state.meh_uids.insert(11, "ghost".into());
        let helper = GmailSyncStateHelper::new("0", Some(state), SyncMode::Refresh);
        assert!(!helper.is_meh_uid(11));
        assert!(helper.stash("ghost").is_none());
    }

    #[test]
    fn test_grow_suppresses_existing_conv_tasks() {
        let mut state = base_state();
        state.yay_uids.insert(10, "a".into());
        state.meh_uids.insert(11, "a".into());
        let mut helper = GmailSyncStateHelper::new("0", Some(state), SyncMode::Grow);

        helper.ingest(message(11, "a", 2_000, &[INBOX]));
        helper.ingest(message(5, "a", 2_000, &[INBOX]));
        helper.ingest(message(6, "new", 2_000, &[INBOX]));

        let tasks = conv_tasks(&helper);
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].conv_id, "0.new");
        assert!(tasks[0].new_conv);
        assert!(helper.is_yay_uid(11));
        assert!(helper.is_yay_uid(5));
    }

    #[test]
    fn test_conv_mode_enrolls_without_tasks() {
        let mut state = base_state();
        state.yay_uids.insert(100, "abc".into());
        let mut helper = GmailSyncStateHelper::new("0", Some(state), SyncMode::Conv);

        helper.ingest(message(100, "abc", 5_000, &[INBOX]));
        helper.ingest(message(40, "abc", 900, &[INBOX]));
        helper.ingest(message(41, "abc", 5_000, &["0.9"]));

        assert!(helper.tasks_to_schedule().is_empty());
        assert!(helper.is_yay_uid(40) || helper.is_meh_uid(40));
        assert!(helper.is_meh_uid(41));
        assert_eq!(helper.stash("abc").unwrap().meh_uids().len(), 2);
    }

    #[test]
    fn test_replaying_a_pass_is_idempotent() {
        let observations = vec![
            message(100, "abc", 5_000, &[INBOX]),
            message(101, "abc", 5_100, &["0.9"]),
        ];

        let mut first = GmailSyncStateHelper::new("0", Some(base_state()), SyncMode::Refresh);
        for obs in observations.clone() {
            first.ingest(obs);
        }
        first.finalize();
        let after_first = first.raw_state().clone();

        let mut second = GmailSyncStateHelper::new("0", Some(after_first.clone()), SyncMode::Refresh);
        for obs in observations {
            second.ingest(obs);
        }
        second.finalize();

        assert_eq!(second.raw_state(), &after_first);
        assert!(conv_tasks(&second).iter().all(|task| !task.new_conv && !task.remove_conv));
    }

    #[test]
    fn test_cursors_are_monotonic() {
        let mut helper = GmailSyncStateHelper::new("0", Some(base_state()), SyncMode::Refresh);
        helper.set_last_high_uid(40);
        assert_eq!(helper.last_high_uid(), 50);
        helper.set_last_high_uid(70);
        assert_eq!(helper.last_high_uid(), 70);

        helper.set_modseq("1000");
        helper.set_modseq("999");
        assert_eq!(helper.modseq(), Some("1000"));
    }
}
