//! ICS calendar feed sync state
//!
//! Each calendar UID (a recurring event plus its exceptions) maps to one
//! conversation. The feed is re-read in full every time, so a UID missing
//! from the feed has been deleted.

use super::metrics::SyncMetrics;
use super::task::{CalendarEvent, SyncTask, SyncUidTask};
use super::{PassOutcome, SyncStateHelper};
use crate::config::SyncConfig;
use crate::util::a64;
use crate::util::dates::{make_days_ago, DateTs};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use tracing::{debug, info};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IcalUidInfo {
    pub conv_id: String,
    /// LAST-MODIFIED of the indexed version, 0 when a resync was requested
    pub last_modified_ts: DateTs,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IcalRawSyncState {
    pub next_conv_id: u64,
    pub range_oldest_ts: DateTs,
    pub range_newest_ts: DateTs,
    pub uid_to_conv_id_and_last_modified: BTreeMap<String, IcalUidInfo>,
}

impl IcalRawSyncState {
    /// Fresh state covering the configured range around today
    pub fn with_config(config: &SyncConfig) -> Self {
        Self {
            next_conv_id: 1,
            range_oldest_ts: make_days_ago(config.calendar_past_days),
            range_newest_ts: make_days_ago(-config.calendar_future_days),
            uid_to_conv_id_and_last_modified: BTreeMap::new(),
        }
    }
}

impl Default for IcalRawSyncState {
    fn default() -> Self {
        Self::with_config(&SyncConfig::default())
    }
}

pub struct IcalSyncStateHelper {
    account_id: String,
    raw: IcalRawSyncState,
    unseen_uids: BTreeSet<String>,
    events_by_uid: Vec<(String, Vec<CalendarEvent>)>,
    group_index: HashMap<String, usize>,
    tasks: Vec<SyncTask>,
    metrics: SyncMetrics,
    processed: bool,
}

impl IcalSyncStateHelper {
    pub fn new(account_id: &str, raw: Option<IcalRawSyncState>, config: &SyncConfig) -> Self {
        let raw = raw.unwrap_or_else(|| {
            debug!("Creating default calendar sync state for account {}", account_id);
            IcalRawSyncState::with_config(config)
        });
        let unseen_uids = raw.uid_to_conv_id_and_last_modified.keys().cloned().collect();
        Self {
            account_id: account_id.to_string(),
            raw,
            unseen_uids,
            events_by_uid: Vec::new(),
            group_index: HashMap::new(),
            tasks: Vec::new(),
            metrics: SyncMetrics::default(),
            processed: false,
        }
    }

    pub fn range(&self) -> (DateTs, DateTs) {
        (self.raw.range_oldest_ts, self.raw.range_newest_ts)
    }

    pub fn conv_id_for_uid(&self, uid: &str) -> Option<&str> {
        self.raw
            .uid_to_conv_id_and_last_modified
            .get(uid)
            .map(|info| info.conv_id.as_str())
    }

    /// Collect an event under its calendar UID
    pub fn ingest_event(&mut self, event: CalendarEvent) {
        match self.group_index.get(&event.uid) {
            Some(&idx) => self.events_by_uid[idx].1.push(event),
            None => {
                self.group_index.insert(event.uid.clone(), self.events_by_uid.len());
                self.events_by_uid.push((event.uid.clone(), vec![event]));
            }
        }
    }

    /// Forget every last-modified watermark so the next pass reindexes all
    /// events. Conversation ids are kept.
    pub fn reset_for_full_resync(&mut self) {
        info!("Full calendar resync requested for account {}", self.account_id);
        for info in self.raw.uid_to_conv_id_and_last_modified.values_mut() {
            info.last_modified_ts = 0;
        }
    }

    fn issue_unique_conv_id(&mut self) -> String {
        let conv_id = format!("{}.{}", self.account_id, a64::encode_int(self.raw.next_conv_id));
        self.raw.next_conv_id += 1;
        conv_id
    }

    fn make_uid_task(&mut self, conv_id: String, uid: String, last_modified_ts: DateTs, events: Vec<CalendarEvent>) {
        self.tasks.push(SyncTask::SyncUid(SyncUidTask {
            account_id: self.account_id.clone(),
            conv_id,
            uid,
            last_modified_ts,
            range_oldest_ts: self.raw.range_oldest_ts,
            range_newest_ts: self.raw.range_newest_ts,
            events,
        }));
    }

    /// Decide per UID whether it needs (re)indexing, and delete the UIDs the
    /// feed no longer has.
    pub fn process_events(&mut self) {
        if self.processed {
            return;
        }
        self.processed = true;

        let groups = std::mem::take(&mut self.events_by_uid);
        self.group_index.clear();
        for (uid, mut events) in groups {
            let Some(first) = events.first() else {
                continue;
            };
            let last_modified_ts = first.last_modified_ts;

            let conv_id = match self.raw.uid_to_conv_id_and_last_modified.get(&uid) {
                None => {
                    let conv_id = self.issue_unique_conv_id();
                    debug!("New calendar uid {} as {}", uid, conv_id);
                    self.raw.uid_to_conv_id_and_last_modified.insert(
                        uid.clone(),
                        IcalUidInfo {
                            conv_id: conv_id.clone(),
                            last_modified_ts,
                        },
                    );
                    conv_id
                }
                Some(existing) => {
                    self.unseen_uids.remove(&uid);
                    let known_ts = existing.last_modified_ts;
                    let conv_id = existing.conv_id.clone();
                    if known_ts != 0 && last_modified_ts == known_ts {
                        self.metrics.record_waste();
                        continue;
                    }
                    if known_ts != 0 && last_modified_ts < known_ts {
                        // Any change wins, including a restored older revision.
                        debug!(
                            "Calendar uid {} went back in time ({} < {})",
                            uid, last_modified_ts, known_ts
                        );
                    }
                    if let Some(info) = self.raw.uid_to_conv_id_and_last_modified.get_mut(&uid) {
                        info.last_modified_ts = last_modified_ts;
                    }
                    conv_id
                }
            };

            self.metrics.record_useful();
            // Stable: exceptions keep their feed order behind the master.
            events.sort_by_key(|event| !event.is_master());
            self.make_uid_task(conv_id, uid, last_modified_ts, events);
        }

        let unseen = std::mem::take(&mut self.unseen_uids);
        for uid in unseen {
            if let Some(info) = self.raw.uid_to_conv_id_and_last_modified.remove(&uid) {
                debug!("Calendar uid {} left the feed", uid);
                self.metrics.record_useful();
                self.make_uid_task(info.conv_id, uid, 0, Vec::new());
            }
        }
    }
}

impl SyncStateHelper for IcalSyncStateHelper {
    type RawState = IcalRawSyncState;
    type Observation = CalendarEvent;

    fn ingest(&mut self, observation: CalendarEvent) {
        self.ingest_event(observation);
    }

    fn finalize(&mut self) {
        self.process_events();
        info!(
            "Calendar sync pass for account {} finished: {} tasks",
            self.account_id,
            self.tasks.len()
        );
    }

    fn tasks_to_schedule(&self) -> Vec<SyncTask> {
        self.tasks.clone()
    }

    fn raw_state(&self) -> &IcalRawSyncState {
        &self.raw
    }

    fn metrics(&self) -> SyncMetrics {
        self.metrics
    }

    fn into_outcome(self) -> PassOutcome<IcalRawSyncState> {
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

    fn event(uid: &str, last_modified_ts: DateTs, recurrence_id: Option<&str>) -> CalendarEvent {
        CalendarEvent {
            uid: uid.to_string(),
            last_modified_ts,
            recurrence_id: recurrence_id.map(str::to_string),
            jcal: serde_json::json!(["vevent", [], []]),
        }
    }

    fn uid_tasks(helper: &IcalSyncStateHelper) -> Vec<SyncUidTask> {
        helper
            .tasks_to_schedule()
            .into_iter()
            .filter_map(|task| match task {
                SyncTask::SyncUid(task) => Some(task),
                _ => None,
            })
            .collect()
    }

    fn synced(events: Vec<CalendarEvent>) -> IcalRawSyncState {
        let mut helper = IcalSyncStateHelper::new("2", None, &SyncConfig::default());
        for event in events {
            helper.ingest(event);
        }
        helper.finalize();
        helper.raw_state().clone()
    }

    #[test]
    fn test_new_uids_get_conversations() {
        let mut helper = IcalSyncStateHelper::new("2", None, &SyncConfig::default());
        helper.ingest(event("a", 100, Some("r1")));
        helper.ingest(event("b", 100, None));
        helper.ingest(event("a", 100, None));
        helper.finalize();

        let tasks = uid_tasks(&helper);
        assert_eq!(tasks.len(), 2);
        assert_eq!(tasks[0].uid, "a");
        assert_eq!(tasks[0].conv_id, "2.0");
        assert!(tasks[0].events[0].is_master());
        assert_eq!(tasks[0].events[1].recurrence_id.as_deref(), Some("r1"));
        assert_eq!(tasks[1].conv_id, "2.1");
        assert_eq!(helper.raw_state().next_conv_id, 3);
    }

    #[test]
    fn test_unchanged_uid_emits_nothing() {
        let raw = synced(vec![event("a", 100, None)]);
        let mut helper = IcalSyncStateHelper::new("2", Some(raw.clone()), &SyncConfig::default());
        helper.ingest(event("a", 100, None));
        helper.finalize();
        assert!(uid_tasks(&helper).is_empty());
        assert_eq!(helper.raw_state(), &raw);
    }

    #[test]
    fn test_modified_uid_reindexed() {
        let raw = synced(vec![event("a", 100, None)]);
        let mut helper = IcalSyncStateHelper::new("2", Some(raw), &SyncConfig::default());
        helper.ingest(event("a", 200, None));
        helper.finalize();

        let tasks = uid_tasks(&helper);
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].conv_id, "2.0");
        assert_eq!(tasks[0].last_modified_ts, 200);
    }

    #[test]
    fn test_older_revision_reindexed() {
        let raw = synced(vec![event("a", 200, None)]);
        let mut helper = IcalSyncStateHelper::new("2", Some(raw), &SyncConfig::default());
        helper.ingest(event("a", 100, None));
        helper.finalize();

        let tasks = uid_tasks(&helper);
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].last_modified_ts, 100);
        assert!(!tasks[0].is_deletion());
        assert_eq!(
            helper.raw_state().uid_to_conv_id_and_last_modified["a"].last_modified_ts,
            100
        );
    }

    #[test]
    fn test_missing_uid_deleted() {
        let raw = synced(vec![event("a", 100, None), event("b", 100, None)]);
        let mut helper = IcalSyncStateHelper::new("2", Some(raw), &SyncConfig::default());
        helper.ingest(event("a", 100, None));
        helper.finalize();

        let tasks = uid_tasks(&helper);
        assert_eq!(tasks.len(), 1);
        assert!(tasks[0].is_deletion());
        assert_eq!(tasks[0].uid, "b");
        assert_eq!(tasks[0].last_modified_ts, 0);
        assert!(helper.conv_id_for_uid("b").is_none());
    }

    #[test]
    fn test_full_resync_reemits_with_same_conv() {
        let raw = synced(vec![event("a", 100, None)]);
        let mut helper = IcalSyncStateHelper::new("2", Some(raw), &SyncConfig::default());
        helper.reset_for_full_resync();
        helper.ingest(event("a", 100, None));
        helper.finalize();

        let tasks = uid_tasks(&helper);
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].conv_id, "2.0");
    }

    #[test]
    fn test_default_range_spans_configured_days() {
        let config = SyncConfig::default();
        let helper = IcalSyncStateHelper::new("2", None, &config);
        let (oldest, newest) = helper.range();
        assert_eq!(newest - oldest, 60 * crate::util::dates::DAY_MILLIS);
    }
}
