//! In-memory store and protocol fakes.
//!
//! `MemoryStore` implements the full [`TaskContext`] contract with a mutex
//! around plain maps, which is enough to run the drivers end to end without
//! a database or a server. The fakes answer from scripted mailbox contents.

use super::context::{AccountClobber, CommitPayload, ConvMutation, FolderClobber, TaskContext};
use super::protocol::{
    AccountFolders, BugTracker, CalendarFeed, FetchField, FetchOptions, FetchedMessage, FolderInfo, ImapProtocol,
    ListResult, MailboxInfo, MessageSelector, Pop3Maildrop, SearchCriteria, SearchResult,
};
use crate::error::{SyncError, SyncResult};
use crate::sync::bugzilla::BugObservation;
use crate::sync::pop3::Pop3MessageInfo;
use crate::sync::task::{CalendarEvent, SyncTask, Uid, UmidLocation, UmidNameWrites};
use crate::util::dates::{self, quantize_date, DateTs};
use async_trait::async_trait;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use tokio::sync::Mutex;
use tracing::debug;

/// Everything the store holds
#[derive(Debug, Clone, Default)]
pub struct StoreContents {
    pub folders: BTreeMap<String, AccountFolders>,
    pub sync_states: BTreeMap<String, serde_json::Value>,
    pub umid_locations: BTreeMap<String, UmidLocation>,
    /// umid -> message id
    pub umid_names: BTreeMap<String, String>,
    pub tasks: Vec<SyncTask>,
    pub accounts: BTreeMap<String, AccountClobber>,
    pub folder_status: BTreeMap<String, FolderClobber>,
    /// Last mutation applied per conversation
    pub conversations: BTreeMap<String, ConvMutation>,
    pub commit_count: usize,
}

pub struct MemoryStore {
    contents: Mutex<StoreContents>,
    clock: Option<DateTs>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            contents: Mutex::new(StoreContents::default()),
            clock: None,
        }
    }

    /// A store whose `now()` is frozen at `now`
    pub fn with_clock(now: DateTs) -> Self {
        Self {
            contents: Mutex::new(StoreContents::default()),
            clock: Some(now),
        }
    }

    pub async fn set_folders(&self, folders: AccountFolders) {
        let mut contents = self.contents.lock().await;
        contents.folders.insert(folders.account_id.clone(), folders);
    }

    pub async fn set_sync_state(&self, scope_id: &str, raw: serde_json::Value) {
        let mut contents = self.contents.lock().await;
        contents.sync_states.insert(scope_id.to_string(), raw);
    }

    /// Record that the message stored under `umid` is `message_id`
    pub async fn name_umid(&self, umid: &str, message_id: &str) {
        let mut contents = self.contents.lock().await;
        contents.umid_names.insert(umid.to_string(), message_id.to_string());
    }

    pub async fn sync_state(&self, scope_id: &str) -> Option<serde_json::Value> {
        self.contents.lock().await.sync_states.get(scope_id).cloned()
    }

    pub async fn snapshot(&self) -> StoreContents {
        self.contents.lock().await.clone()
    }
}

fn merge_folder_clobber(target: &mut FolderClobber, update: &FolderClobber) {
    if update.fully_synced.is_some() {
        target.fully_synced = update.fully_synced;
    }
    if update.estimated_unsynced_messages.is_some() {
        target.estimated_unsynced_messages = update.estimated_unsynced_messages;
    }
    if update.synced_through.is_some() {
        target.synced_through = update.synced_through;
    }
    if update.sync_info.is_some() {
        target.sync_info = update.sync_info;
    }
}

#[async_trait]
impl TaskContext for MemoryStore {
    async fn begin_mutate(&self, scope_ids: &[String]) -> SyncResult<BTreeMap<String, Option<serde_json::Value>>> {
        let contents = self.contents.lock().await;
        Ok(scope_ids
            .iter()
            .map(|scope_id| (scope_id.clone(), contents.sync_states.get(scope_id).cloned()))
            .collect())
    }

    async fn read_umid_names(&self, names: &mut UmidNameWrites) -> SyncResult<()> {
        let contents = self.contents.lock().await;
        for (umid, message_id) in names.iter_mut() {
            *message_id = contents.umid_names.get(umid).cloned();
        }
        Ok(())
    }

    async fn account_folders(&self, account_id: &str) -> SyncResult<AccountFolders> {
        let contents = self.contents.lock().await;
        contents
            .folders
            .get(account_id)
            .cloned()
            .ok_or_else(|| SyncError::store(format!("unknown account {}", account_id)))
    }

    async fn commit(&self, payload: &CommitPayload) -> SyncResult<()> {
        let mut contents = self.contents.lock().await;
        for (scope_id, raw) in &payload.sync_states {
            contents.sync_states.insert(scope_id.clone(), raw.clone());
        }
        for (umid, location) in &payload.umid_locations {
            match location {
                Some(location) => contents.umid_locations.insert(umid.clone(), location.clone()),
                None => contents.umid_locations.remove(umid),
            };
        }
        for (umid, name) in &payload.umid_names {
            match name {
                Some(name) => contents.umid_names.insert(umid.clone(), name.clone()),
                None => contents.umid_names.remove(umid),
            };
        }
        contents.tasks.extend(payload.tasks.iter().cloned());
        for (account_id, clobber) in &payload.atomic_clobbers.accounts {
            let target = contents.accounts.entry(account_id.clone()).or_default();
            if clobber.sync_info.is_some() {
                target.sync_info = clobber.sync_info;
            }
        }
        for (folder_id, clobber) in &payload.atomic_clobbers.folders {
            merge_folder_clobber(contents.folder_status.entry(folder_id.clone()).or_default(), clobber);
        }
        for (conv_id, mutation) in &payload.conversations {
            contents.conversations.insert(conv_id.clone(), mutation.clone());
        }
        contents.commit_count += 1;
        debug!("Memory store commit #{}", contents.commit_count);
        Ok(())
    }

    fn now(&self) -> DateTs {
        self.clock.unwrap_or_else(dates::now)
    }
}

/// A scripted message on the fake server
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FakeMessage {
    pub uid: Uid,
    pub date: DateTs,
    pub flags: Vec<String>,
    pub thread_id: Option<String>,
    pub msg_id: Option<String>,
    pub labels: Vec<String>,
    pub modseq: u64,
}

#[derive(Debug, Clone, Default)]
struct FakeMailbox {
    messages: Vec<FakeMessage>,
    /// uid -> modseq of the expunge
    expunged: BTreeMap<Uid, u64>,
    uid_next: Option<Uid>,
    highest_modseq: u64,
}

impl FakeMailbox {
    fn info(&self) -> MailboxInfo {
        MailboxInfo {
            exists: u32::try_from(self.messages.len()).unwrap_or(u32::MAX),
            uid_next: self.uid_next,
            highest_modseq: (self.highest_modseq > 0).then(|| self.highest_modseq.to_string()),
        }
    }

    fn bump_modseq(&mut self) -> u64 {
        self.highest_modseq += 1;
        self.highest_modseq
    }

    fn fetched(&self, idx: usize, fields: &[FetchField]) -> FetchedMessage {
        let msg = &self.messages[idx];
        let wants = |field| fields.contains(&field);
        FetchedMessage {
            seq: u32::try_from(idx + 1).unwrap_or(u32::MAX),
            uid: msg.uid,
            internal_date: msg.date,
            flags: if wants(FetchField::Flags) { msg.flags.clone() } else { Vec::new() },
            gmail_thread_id: msg.thread_id.clone().filter(|_| wants(FetchField::GmailThreadId)),
            gmail_msg_id: msg.msg_id.clone().filter(|_| wants(FetchField::GmailMessageId)),
            labels: if wants(FetchField::GmailLabels) { msg.labels.clone() } else { Vec::new() },
            modseq: Some(msg.modseq.to_string()),
        }
    }
}

/// IMAP server answering from scripted mailboxes, keyed by folder id.
///
/// Every message change bumps the mailbox modseq, so CONDSTORE fetches see
/// exactly what changed since a previous pass.
#[derive(Default)]
pub struct FakeImapServer {
    mailboxes: Mutex<HashMap<String, FakeMailbox>>,
    /// Set while a mailbox withholds UIDNEXT
    no_uid_next: bool,
}

impl FakeImapServer {
    pub fn new() -> Self {
        Self::default()
    }

    /// A server that never reports UIDNEXT
    pub fn without_uid_next() -> Self {
        Self {
            no_uid_next: true,
            ..Self::default()
        }
    }

    pub async fn add_message(&self, folder_id: &str, mut message: FakeMessage) {
        let mut mailboxes = self.mailboxes.lock().await;
        let mailbox = mailboxes.entry(folder_id.to_string()).or_default();
        message.modseq = mailbox.bump_modseq();
        let uid_next = message.uid + 1;
        mailbox.messages.push(message);
        mailbox.messages.sort_by_key(|msg| msg.uid);
        if !self.no_uid_next {
            mailbox.uid_next = Some(mailbox.uid_next.unwrap_or(0).max(uid_next));
        }
    }

    pub async fn set_flags(&self, folder_id: &str, uid: Uid, flags: &[&str]) {
        let mut mailboxes = self.mailboxes.lock().await;
        let Some(mailbox) = mailboxes.get_mut(folder_id) else {
            return;
        };
        let modseq = mailbox.bump_modseq();
        if let Some(msg) = mailbox.messages.iter_mut().find(|msg| msg.uid == uid) {
            msg.flags = flags.iter().map(|flag| flag.to_string()).collect();
            msg.modseq = modseq;
        }
    }

    pub async fn set_labels(&self, folder_id: &str, uid: Uid, labels: &[&str]) {
        let mut mailboxes = self.mailboxes.lock().await;
        let Some(mailbox) = mailboxes.get_mut(folder_id) else {
            return;
        };
        let modseq = mailbox.bump_modseq();
        if let Some(msg) = mailbox.messages.iter_mut().find(|msg| msg.uid == uid) {
            msg.labels = labels.iter().map(|label| label.to_string()).collect();
            msg.modseq = modseq;
        }
    }

    pub async fn expunge(&self, folder_id: &str, uid: Uid) {
        let mut mailboxes = self.mailboxes.lock().await;
        let Some(mailbox) = mailboxes.get_mut(folder_id) else {
            return;
        };
        let modseq = mailbox.bump_modseq();
        mailbox.messages.retain(|msg| msg.uid != uid);
        mailbox.expunged.insert(uid, modseq);
    }
}

fn changed_since(options: &FetchOptions) -> Option<u64> {
    options.changed_since.as_deref().and_then(|modseq| modseq.parse().ok())
}

#[async_trait]
impl ImapProtocol for FakeImapServer {
    async fn select_mailbox(&self, folder: &FolderInfo) -> SyncResult<MailboxInfo> {
        let mailboxes = self.mailboxes.lock().await;
        Ok(mailboxes.get(&folder.id).map(FakeMailbox::info).unwrap_or_default())
    }

    async fn search(&self, folder: &FolderInfo, criteria: &SearchCriteria) -> SyncResult<SearchResult> {
        let mailboxes = self.mailboxes.lock().await;
        let Some(mailbox) = mailboxes.get(&folder.id) else {
            return Ok(SearchResult {
                uids: Vec::new(),
                mailbox: MailboxInfo::default(),
            });
        };
        let wanted: Option<BTreeSet<Uid>> = criteria.uids.as_ref().map(|uids| uids.iter().copied().collect());
        let uids = mailbox
            .messages
            .iter()
            .filter(|msg| wanted.as_ref().map_or(true, |wanted| wanted.contains(&msg.uid)))
            .filter(|msg| criteria.since.map_or(true, |since| msg.date >= quantize_date(since)))
            .filter(|msg| criteria.before.map_or(true, |before| msg.date < quantize_date(before)))
            .filter(|msg| {
                criteria
                    .gmail_label
                    .as_ref()
                    .map_or(true, |label| msg.labels.contains(label))
            })
            .filter(|msg| {
                criteria
                    .gmail_thread_id
                    .as_ref()
                    .map_or(true, |thread| msg.thread_id.as_ref() == Some(thread))
            })
            .filter(|msg| !criteria.not_deleted || !msg.flags.iter().any(|flag| flag == "\\Deleted"))
            .map(|msg| msg.uid)
            .collect();
        Ok(SearchResult {
            uids,
            mailbox: mailbox.info(),
        })
    }

    async fn list_messages(
        &self,
        folder: &FolderInfo,
        selector: &MessageSelector,
        fields: &[FetchField],
        options: &FetchOptions,
    ) -> SyncResult<ListResult> {
        let mailboxes = self.mailboxes.lock().await;
        let Some(mailbox) = mailboxes.get(&folder.id) else {
            return Ok(ListResult::default());
        };

        let mut indexes: Vec<usize> = match selector {
            MessageSelector::Uids(uids) => mailbox
                .messages
                .iter()
                .enumerate()
                .filter(|(_, msg)| uids.contains(&msg.uid))
                .map(|(idx, _)| idx)
                .collect(),
            MessageSelector::UidRange { first, last } => {
                let mut hits: Vec<usize> = mailbox
                    .messages
                    .iter()
                    .enumerate()
                    .filter(|(_, msg)| msg.uid >= *first && last.map_or(true, |last| msg.uid <= last))
                    .map(|(idx, _)| idx)
                    .collect();
                // `n:*` includes the highest message even when it is below n.
                if hits.is_empty() && last.is_none() && !mailbox.messages.is_empty() {
                    hits.push(mailbox.messages.len() - 1);
                }
                hits
            }
            MessageSelector::Sequences(seqs) => seqs
                .iter()
                .filter_map(|&seq| usize::try_from(seq).ok())
                .filter(|&seq| seq >= 1 && seq <= mailbox.messages.len())
                .map(|seq| seq - 1)
                .collect(),
        };

        let since_modseq = changed_since(options);
        if let Some(since) = since_modseq {
            indexes.retain(|&idx| mailbox.messages[idx].modseq > since);
        }
        let vanished = match since_modseq {
            Some(since) if options.vanished => mailbox
                .expunged
                .iter()
                .filter(|(_, &modseq)| modseq > since)
                .map(|(&uid, _)| uid)
                .collect(),
            _ => Vec::new(),
        };

        Ok(ListResult {
            messages: indexes.into_iter().map(|idx| mailbox.fetched(idx, fields)).collect(),
            mailbox: mailbox.info(),
            vanished,
        })
    }
}

/// POP3 maildrop with a scripted listing
#[derive(Default)]
pub struct FakeMaildrop {
    messages: Mutex<Vec<Pop3MessageInfo>>,
}

impl FakeMaildrop {
    pub fn new(uidls: &[&str]) -> Self {
        let messages = uidls
            .iter()
            .map(|uidl| Pop3MessageInfo {
                uidl: uidl.to_string(),
                size: Some(1024),
            })
            .collect();
        Self {
            messages: Mutex::new(messages),
        }
    }

    pub async fn set_uidls(&self, uidls: &[&str]) {
        *self.messages.lock().await = Self::new(uidls).messages.into_inner();
    }
}

#[async_trait]
impl Pop3Maildrop for FakeMaildrop {
    async fn load_message_list(&self) -> SyncResult<Vec<Pop3MessageInfo>> {
        Ok(self.messages.lock().await.clone())
    }
}

/// Calendar feed returning whatever events it was given
#[derive(Default)]
pub struct FakeCalendarFeed {
    events: Mutex<Vec<CalendarEvent>>,
}

impl FakeCalendarFeed {
    pub fn new(events: Vec<CalendarEvent>) -> Self {
        Self {
            events: Mutex::new(events),
        }
    }

    pub async fn set_events(&self, events: Vec<CalendarEvent>) {
        *self.events.lock().await = events;
    }
}

#[async_trait]
impl CalendarFeed for FakeCalendarFeed {
    async fn fetch_events(&self) -> SyncResult<Vec<CalendarEvent>> {
        Ok(self.events.lock().await.clone())
    }
}

/// Bug tracker answering change searches from a fixed bug list
#[derive(Default)]
pub struct FakeBugTracker {
    bugs: Mutex<Vec<BugObservation>>,
    queries: Mutex<Vec<(String, DateTs)>>,
}

impl FakeBugTracker {
    pub fn new(bugs: Vec<BugObservation>) -> Self {
        Self {
            bugs: Mutex::new(bugs),
            queries: Mutex::new(Vec::new()),
        }
    }

    pub async fn set_bugs(&self, bugs: Vec<BugObservation>) {
        *self.bugs.lock().await = bugs;
    }

    /// `(user_email, since)` of every search so far
    pub async fn queries(&self) -> Vec<(String, DateTs)> {
        self.queries.lock().await.clone()
    }
}

#[async_trait]
impl BugTracker for FakeBugTracker {
    async fn search_changed_since(&self, user_email: &str, since: DateTs) -> SyncResult<Vec<BugObservation>> {
        self.queries.lock().await.push((user_email.to_string(), since));
        let bugs = self.bugs.lock().await;
        Ok(bugs.iter().filter(|bug| bug.last_change_ts >= since).copied().collect())
    }
}
