//! The store contract drivers run against.
//!
//! A driver begins a mutation (locking and loading the sync states it needs),
//! computes a pass, and commits everything it produced in one payload. The
//! store applies the payload atomically or not at all.

use super::protocol::{AccountFolders, FetchedMessage};
use crate::error::SyncResult;
use crate::sync::task::{MessageState, SyncTask, Uid, UmidLocationWrites, UmidNameWrites};
use crate::util::dates::{self, DateTs};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Account-level sync bookkeeping shown in the UI
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncInfo {
    pub last_successful_sync_at: DateTs,
    pub last_attempted_sync_at: DateTs,
    pub failed_syncs_since_last_successful_sync: u32,
}

impl SyncInfo {
    /// A sync that just succeeded
    pub fn success_at(sync_date: DateTs) -> Self {
        Self {
            last_successful_sync_at: sync_date,
            last_attempted_sync_at: sync_date,
            failed_syncs_since_last_successful_sync: 0,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountClobber {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sync_info: Option<SyncInfo>,
}

/// Folder fields overwritten after a grow
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FolderClobber {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fully_synced: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub estimated_unsynced_messages: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub synced_through: Option<DateTs>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sync_info: Option<SyncInfo>,
}

/// Field overwrites applied without a prior read
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AtomicClobbers {
    pub accounts: BTreeMap<String, AccountClobber>,
    pub folders: BTreeMap<String, FolderClobber>,
}

impl AtomicClobbers {
    pub fn is_empty(&self) -> bool {
        self.accounts.is_empty() && self.folders.is_empty()
    }

    pub fn account_sync_success(&mut self, account_id: &str, sync_date: DateTs) {
        self.accounts.entry(account_id.to_string()).or_default().sync_info =
            Some(SyncInfo::success_at(sync_date));
    }

    pub fn folder_sync_success(&mut self, folder_id: &str, sync_date: DateTs) {
        self.folders.entry(folder_id.to_string()).or_default().sync_info =
            Some(SyncInfo::success_at(sync_date));
    }
}

/// What to do with a conversation's stored messages
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum ConvMutation {
    /// Drop the conversation and all its messages
    Delete,
    /// Apply state changes and add freshly fetched messages; the chewing side
    /// rebuilds the conversation summary.
    Update {
        #[serde(default)]
        modified_uids: BTreeMap<Uid, MessageState>,
        #[serde(default)]
        removed_uids: BTreeSet<Uid>,
        #[serde(default)]
        new_messages: Vec<FetchedMessage>,
    },
}

/// Everything one task execution writes
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CommitPayload {
    /// scope id -> raw sync state
    pub sync_states: BTreeMap<String, serde_json::Value>,
    pub umid_locations: UmidLocationWrites,
    pub umid_names: UmidNameWrites,
    pub tasks: Vec<SyncTask>,
    pub atomic_clobbers: AtomicClobbers,
    pub conversations: BTreeMap<String, ConvMutation>,
}

impl CommitPayload {
    /// A payload that only spins off follow-up tasks
    pub fn with_tasks(tasks: Vec<SyncTask>) -> Self {
        Self {
            tasks,
            ..Default::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.sync_states.is_empty()
            && self.umid_locations.is_empty()
            && self.umid_names.is_empty()
            && self.tasks.is_empty()
            && self.atomic_clobbers.is_empty()
            && self.conversations.is_empty()
    }
}

/// Transactional store as seen by a running task
#[async_trait]
pub trait TaskContext: Send + Sync {
    /// Exclusively load the raw sync states for `scope_ids`; absent states
    /// map to `None`.
    async fn begin_mutate(&self, scope_ids: &[String]) -> SyncResult<BTreeMap<String, Option<serde_json::Value>>>;

    /// Resolve every key of `names` from umid to message id, leaving
    /// unresolvable entries as `None`.
    async fn read_umid_names(&self, names: &mut UmidNameWrites) -> SyncResult<()>;

    async fn account_folders(&self, account_id: &str) -> SyncResult<AccountFolders>;

    /// Atomically apply a finished pass
    async fn commit(&self, payload: &CommitPayload) -> SyncResult<()>;

    /// Wall clock used for sync dates
    fn now(&self) -> DateTs {
        dates::now()
    }
}
