//! Task descriptors produced by the sync state helpers.
//!
//! These are opaque to the reconciliation core beyond their construction. The
//! external executor plans, bins, prioritizes and runs them.

use crate::util::dates::DateTs;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// IMAP message UID
pub type Uid = u32;

/// Where the store can find a umid's message on the server
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum UmidLocation {
    Imap { folder_id: String, uid: Uid },
    Pop3 { uidl: String },
}

/// Pending umid location writes; `None` clears the record
pub type UmidLocationWrites = BTreeMap<String, Option<UmidLocation>>;

/// Pending umid -> message id writes; `None` clears the record
pub type UmidNameWrites = BTreeMap<String, Option<String>>;

/// A task the executor should schedule
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SyncTask {
    SyncRefresh(SyncRefreshTask),
    SyncGrow(SyncGrowTask),
    SyncConv(SyncConvTask),
    SyncMessage(SyncMessageTask),
    SyncUid(SyncUidTask),
    SyncBug(SyncBugTask),
}

impl SyncTask {
    /// The task type name as used for binning and logging
    pub fn type_name(&self) -> &'static str {
        match self {
            SyncTask::SyncRefresh(_) => "sync_refresh",
            SyncTask::SyncGrow(_) => "sync_grow",
            SyncTask::SyncConv(_) => "sync_conv",
            SyncTask::SyncMessage(_) => "sync_message",
            SyncTask::SyncUid(_) => "sync_uid",
            SyncTask::SyncBug(_) => "sync_bug",
        }
    }

    pub fn account_id(&self) -> &str {
        match self {
            SyncTask::SyncRefresh(t) => &t.account_id,
            SyncTask::SyncGrow(t) => &t.account_id,
            SyncTask::SyncConv(t) => &t.account_id,
            SyncTask::SyncMessage(t) => &t.account_id,
            SyncTask::SyncUid(t) => &t.account_id,
            SyncTask::SyncBug(t) => &t.account_id,
        }
    }

    /// The conversation this task works on, if it is conversation-scoped
    pub fn conv_id(&self) -> Option<&str> {
        match self {
            SyncTask::SyncConv(t) => Some(&t.conv_id),
            SyncTask::SyncUid(t) => Some(&t.conv_id),
            SyncTask::SyncBug(t) => Some(&t.conv_id),
            _ => None,
        }
    }

    /// Timestamp used to prioritize newer content first
    pub fn most_recent(&self) -> Option<DateTs> {
        let ts = match self {
            SyncTask::SyncConv(t) => t.most_recent,
            SyncTask::SyncMessage(t) => t.date_ts.unwrap_or(0),
            SyncTask::SyncUid(t) => t.last_modified_ts,
            SyncTask::SyncBug(t) => t.most_recent,
            _ => 0,
        };
        (ts > 0).then_some(ts)
    }

    pub fn as_conv(&self) -> Option<&SyncConvTask> {
        match self {
            SyncTask::SyncConv(t) => Some(t),
            _ => None,
        }
    }
}

/// Steady-state sync request for an account or folder
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncRefreshTask {
    pub account_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub folder_id: Option<String>,
}

/// Request to expand a folder's synchronized date range
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncGrowTask {
    pub account_id: String,
    pub folder_id: String,
}

/// Flag/label state of a known message as reported by the server
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageState {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw_msg_id: Option<String>,
    #[serde(default)]
    pub flags: Vec<String>,
    #[serde(default)]
    pub labels: Vec<String>,
}

/// Conversation-level work: fetch a new conversation, apply uid deltas to a
/// known one, or remove it.
///
/// Gmail addresses messages by UID, vanilla IMAP by umid.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SyncConvTask {
    pub account_id: String,
    pub conv_id: String,
    #[serde(default)]
    pub new_conv: bool,
    #[serde(default)]
    pub remove_conv: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub new_uids: Option<BTreeSet<Uid>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub modified_uids: Option<BTreeMap<Uid, MessageState>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub removed_uids: Option<BTreeSet<Uid>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub modified_umids: Option<BTreeMap<String, Vec<String>>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub removed_umids: Option<BTreeSet<String>>,
    #[serde(default)]
    pub most_recent: DateTs,
}

impl SyncConvTask {
    pub fn new(account_id: impl Into<String>, conv_id: impl Into<String>) -> Self {
        Self {
            account_id: account_id.into(),
            conv_id: conv_id.into(),
            ..Default::default()
        }
    }
}

/// Fetch a single newly discovered message.
///
/// IMAP messages are located by folder and UID, POP3 messages by UIDL.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncMessageTask {
    pub account_id: String,
    pub umid: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub folder_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uid: Option<Uid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uidl: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date_ts: Option<DateTs>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub flags: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
}

impl SyncMessageTask {
    pub fn imap(
        account_id: &str,
        folder_id: &str,
        uid: Uid,
        umid: String,
        date_ts: DateTs,
        flags: Vec<String>,
    ) -> Self {
        Self {
            account_id: account_id.to_string(),
            umid,
            folder_id: Some(folder_id.to_string()),
            uid: Some(uid),
            uidl: None,
            date_ts: Some(date_ts),
            flags: Some(flags),
            size: None,
        }
    }

    pub fn pop3(account_id: &str, uidl: &str, umid: String, size: Option<u64>) -> Self {
        Self {
            account_id: account_id.to_string(),
            umid,
            folder_id: None,
            uid: None,
            uidl: Some(uidl.to_string()),
            date_ts: None,
            flags: None,
            size,
        }
    }
}

/// A calendar event as delivered by the feed.
///
/// The iCalendar body is carried as jCal JSON and only interpreted by the
/// chewing side.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalendarEvent {
    pub uid: String,
    pub last_modified_ts: DateTs,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recurrence_id: Option<String>,
    #[serde(default)]
    pub jcal: serde_json::Value,
}

impl CalendarEvent {
    /// The recurring master event, as opposed to a recurrence exception
    pub fn is_master(&self) -> bool {
        self.recurrence_id.is_none()
    }
}

/// (Re)index a calendar UID bundle. An empty event list means deletion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncUidTask {
    pub account_id: String,
    pub conv_id: String,
    pub uid: String,
    pub last_modified_ts: DateTs,
    pub range_oldest_ts: DateTs,
    pub range_newest_ts: DateTs,
    pub events: Vec<CalendarEvent>,
}

impl SyncUidTask {
    pub fn is_deletion(&self) -> bool {
        self.events.is_empty()
    }
}

/// Synchronize a bug that changed or was previously unknown
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncBugTask {
    pub account_id: String,
    pub conv_id: String,
    pub bug_id: u64,
    pub most_recent: DateTs,
}
