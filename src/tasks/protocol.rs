//! Protocol client seams
//!
//! Transport, parsing and connection management live outside this crate.
//! The drivers only need the handful of operations below.

use crate::error::SyncResult;
use crate::sync::bugzilla::BugObservation;
use crate::sync::pop3::Pop3MessageInfo;
use crate::sync::task::{CalendarEvent, Uid};
use crate::util::dates::DateTs;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Normalized folder role
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FolderType {
    Inbox,
    /// Gmail's "All Mail"
    All,
    Sent,
    Drafts,
    Trash,
    Junk,
    Archive,
    Starred,
    Important,
    Normal,
    /// Hierarchy-only containers such as `[Gmail]`
    Nomail,
    /// Local-only folders such as the outbox
    Localdrafts,
    Outbox,
}

/// A folder as known by the local folder list
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FolderInfo {
    pub id: String,
    pub name: String,
    /// IMAP path; `None` for local-only folders and unmapped labels
    #[serde(default)]
    pub server_path: Option<String>,
    #[serde(rename = "type")]
    pub folder_type: FolderType,
    /// Messages stored locally for this folder, maintained by the store
    #[serde(default)]
    pub local_message_count: u32,
}

impl FolderInfo {
    pub fn new(id: &str, name: &str, server_path: Option<&str>, folder_type: FolderType) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            server_path: server_path.map(str::to_string),
            folder_type,
            local_message_count: 0,
        }
    }
}

/// The folder list of one account
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AccountFolders {
    pub account_id: String,
    pub folders: Vec<FolderInfo>,
}

impl AccountFolders {
    pub fn folder_by_id(&self, folder_id: &str) -> Option<&FolderInfo> {
        self.folders.iter().find(|folder| folder.id == folder_id)
    }

    pub fn first_folder_with_type(&self, folder_type: FolderType) -> Option<&FolderInfo> {
        self.folders.iter().find(|folder| folder.folder_type == folder_type)
    }

    pub fn len(&self) -> usize {
        self.folders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.folders.is_empty()
    }
}

/// SELECT/EXAMINE response data we rely on
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MailboxInfo {
    pub exists: u32,
    #[serde(default)]
    pub uid_next: Option<Uid>,
    #[serde(default)]
    pub highest_modseq: Option<String>,
}

/// SEARCH keys, ANDed together
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SearchCriteria {
    pub uids: Option<Vec<Uid>>,
    /// SINCE, day granularity
    pub since: Option<DateTs>,
    /// BEFORE, day granularity
    pub before: Option<DateTs>,
    /// X-GM-LABELS
    pub gmail_label: Option<String>,
    /// X-GM-THRID, decimal
    pub gmail_thread_id: Option<String>,
    pub not_deleted: bool,
}

impl SearchCriteria {
    pub fn uids(uids: Vec<Uid>) -> Self {
        Self {
            uids: Some(uids),
            ..Default::default()
        }
    }

    pub fn date_range(since: DateTs, before: Option<DateTs>) -> Self {
        Self {
            since: Some(since),
            before,
            not_deleted: true,
            ..Default::default()
        }
    }

    pub fn gmail_thread(thread_id: String) -> Self {
        Self {
            gmail_thread_id: Some(thread_id),
            ..Default::default()
        }
    }

    pub fn with_since(mut self, since: DateTs) -> Self {
        self.since = Some(since);
        self
    }

    pub fn with_gmail_label(mut self, label: String) -> Self {
        self.gmail_label = Some(label);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResult {
    pub uids: Vec<Uid>,
    pub mailbox: MailboxInfo,
}

/// Which messages a FETCH addresses
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum MessageSelector {
    Uids(Vec<Uid>),
    /// `first:last`, `last = None` meaning `*`
    UidRange { first: Uid, last: Option<Uid> },
    Sequences(Vec<u32>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FetchField {
    Uid,
    InternalDate,
    Flags,
    GmailThreadId,
    GmailMessageId,
    GmailLabels,
    Envelope,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FetchOptions {
    /// CONDSTORE CHANGEDSINCE
    pub changed_since: Option<String>,
    /// Ask for QRESYNC VANISHED reports alongside CHANGEDSINCE
    pub vanished: bool,
}

/// One FETCH response, already parsed
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FetchedMessage {
    pub seq: u32,
    pub uid: Uid,
    pub internal_date: DateTs,
    #[serde(default)]
    pub flags: Vec<String>,
    #[serde(default)]
    pub gmail_thread_id: Option<String>,
    #[serde(default)]
    pub gmail_msg_id: Option<String>,
    /// Raw X-GM-LABELS values
    #[serde(default)]
    pub labels: Vec<String>,
    #[serde(default)]
    pub modseq: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ListResult {
    pub messages: Vec<FetchedMessage>,
    pub mailbox: MailboxInfo,
    /// UIDs reported as VANISHED
    #[serde(default)]
    pub vanished: Vec<Uid>,
}

#[async_trait]
pub trait ImapProtocol: Send + Sync {
    async fn select_mailbox(&self, folder: &FolderInfo) -> SyncResult<MailboxInfo>;

    async fn search(&self, folder: &FolderInfo, criteria: &SearchCriteria) -> SyncResult<SearchResult>;

    async fn list_messages(
        &self,
        folder: &FolderInfo,
        selector: &MessageSelector,
        fields: &[FetchField],
        options: &FetchOptions,
    ) -> SyncResult<ListResult>;
}

#[async_trait]
pub trait Pop3Maildrop: Send + Sync {
    /// UIDL + LIST of the whole maildrop
    async fn load_message_list(&self) -> SyncResult<Vec<Pop3MessageInfo>>;
}

#[async_trait]
pub trait CalendarFeed: Send + Sync {
    /// Every VEVENT in the feed
    async fn fetch_events(&self) -> SyncResult<Vec<CalendarEvent>>;
}

#[async_trait]
pub trait BugTracker: Send + Sync {
    /// Bugs involving `user_email` that changed at or after `since`
    async fn search_changed_since(&self, user_email: &str, since: DateTs) -> SyncResult<Vec<BugObservation>>;
}
