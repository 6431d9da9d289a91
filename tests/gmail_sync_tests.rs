//! Gmail drivers against the in-memory store and a fake server

use comunicado_sync::config::SyncConfig;
use comunicado_sync::sync::{GmailRawSyncState, SyncConvTask, SyncTask};
use comunicado_sync::tasks::gmail::{sync_conv, sync_grow, sync_refresh};
use comunicado_sync::tasks::memory::{FakeImapServer, FakeMessage, MemoryStore};
use comunicado_sync::tasks::{AccountFolders, ConvMutation, FolderInfo, FolderType};
use comunicado_sync::util::dates::DAY_MILLIS;
use comunicado_sync::util::ids::{make_conv_id, parse_gmail_conv_id};
use comunicado_sync::SyncError;
use serde_json::json;

const NOW: i64 = 1_700_000_000_000;
const ACCOUNT: &str = "0";
const INBOX: &str = "0.1";
const ALL_MAIL: &str = "0.3";

fn folders() -> AccountFolders {
    AccountFolders {
        account_id: ACCOUNT.into(),
        folders: vec![
            FolderInfo::new(INBOX, "Inbox", Some("INBOX"), FolderType::Inbox),
            FolderInfo::new("0.2", "[Gmail]", Some("[Gmail]"), FolderType::Nomail),
            FolderInfo::new(ALL_MAIL, "All Mail", Some("[Gmail]/All Mail"), FolderType::All),
            FolderInfo::new("0.4", "Sent Mail", Some("[Gmail]/Sent Mail"), FolderType::Sent),
            FolderInfo::new("0.5", "Work", Some("Work"), FolderType::Normal),
        ],
    }
}

fn gmail_message(uid: u32, thread: &str, labels: &[&str]) -> FakeMessage {
    FakeMessage {
        uid,
        date: NOW - DAY_MILLIS,
        flags: vec![],
        thread_id: Some(thread.to_string()),
        msg_id: Some(format!("{}", 5000 + uid)),
        labels: labels.iter().map(|l| l.to_string()).collect(),
        modseq: 0,
    }
}

fn conv_id(thread: &str) -> String {
    make_conv_id(ACCOUNT, &parse_gmail_conv_id(thread).unwrap())
}

async fn setup() -> (MemoryStore, FakeImapServer) {
    let store = MemoryStore::with_clock(NOW);
    store.set_folders(folders()).await;
    let server = FakeImapServer::new();
    server.add_message(ALL_MAIL, gmail_message(1, "100", &["\\Inbox"])).await;
    server.add_message(ALL_MAIL, gmail_message(2, "100", &[])).await;
    server.add_message(INBOX, gmail_message(1, "100", &["\\Inbox"])).await;
    (store, server)
}

async fn raw_state(store: &MemoryStore) -> GmailRawSyncState {
    serde_json::from_value(store.sync_state(ACCOUNT).await.unwrap()).unwrap()
}

fn conv_task<'a>(tasks: &'a [SyncTask], conv_id: &str) -> &'a SyncConvTask {
    tasks
        .iter()
        .filter_map(SyncTask::as_conv)
        .find(|task| task.conv_id == conv_id)
        .unwrap()
}

/// Grow the inbox so refreshes have something to work against
async fn grown() -> (MemoryStore, FakeImapServer) {
    let (store, server) = setup().await;
    sync_grow(&store, &server, &SyncConfig::default(), ACCOUNT, INBOX)
        .await
        .unwrap();
    (store, server)
}

#[tokio::test]
async fn test_refresh_without_state_spins_off_grow() {
    let (store, server) = setup().await;
    let payload = sync_refresh(&store, &server, ACCOUNT).await.unwrap();

    assert_eq!(payload.tasks.len(), 1);
    match &payload.tasks[0] {
        SyncTask::SyncGrow(task) => assert_eq!(task.folder_id, INBOX),
        other => panic!("unexpected task {:?}", other),
    }
    assert!(payload.sync_states.is_empty());
}

#[tokio::test]
async fn test_first_inbox_grow() {
    let (store, server) = setup().await;
    let config = SyncConfig::default();
    let payload = sync_grow(&store, &server, &config, ACCOUNT, INBOX).await.unwrap();

    let raw = raw_state(&store).await;
    let raw_conv_id = parse_gmail_conv_id("100").unwrap();
    assert_eq!(raw.yay_uids.get(&1), Some(&raw_conv_id));
    assert!(raw.meh_uids.is_empty());
    assert_eq!(raw.label_since_dates.get(INBOX), Some(&config.oldest_sync_ts()));
    assert_eq!(raw.last_high_uid, 2);
    assert_eq!(raw.modseq, "2");

    let task = conv_task(&payload.tasks, &conv_id("100"));
    assert!(task.new_conv);
    assert!(!task.remove_conv);

    let contents = store.snapshot().await;
    let folder = &contents.folder_status[INBOX];
    assert_eq!(folder.fully_synced, Some(true));
    assert_eq!(folder.synced_through, Some(config.oldest_sync_ts()));
    assert!(contents.accounts[ACCOUNT].sync_info.is_some());
}

#[tokio::test]
async fn test_refresh_picks_up_new_messages() {
    let (store, server) = grown().await;
    server.add_message(ALL_MAIL, gmail_message(3, "100", &[])).await;
    server.add_message(ALL_MAIL, gmail_message(4, "200", &["\\Inbox"])).await;

    let payload = sync_refresh(&store, &server, ACCOUNT).await.unwrap();

    let existing = conv_task(&payload.tasks, &conv_id("100"));
    assert!(!existing.new_conv);
    assert_eq!(existing.new_uids.as_ref().unwrap().iter().copied().collect::<Vec<_>>(), vec![3]);

    let fresh = conv_task(&payload.tasks, &conv_id("200"));
    assert!(fresh.new_conv);

    let raw = raw_state(&store).await;
    assert!(raw.meh_uids.contains_key(&3));
    assert!(raw.yay_uids.contains_key(&4));
    assert_eq!(raw.last_high_uid, 4);
    assert_eq!(raw.modseq, "4");
}

#[tokio::test]
async fn test_label_loss_removes_conversation() {
    let (store, server) = grown().await;
    server.set_labels(ALL_MAIL, 1, &[]).await;

    let payload = sync_refresh(&store, &server, ACCOUNT).await.unwrap();
    let task = conv_task(&payload.tasks, &conv_id("100"));
    assert!(task.remove_conv);
    assert!(task.modified_uids.as_ref().unwrap().contains_key(&1));

    let raw = raw_state(&store).await;
    assert!(raw.yay_uids.is_empty());
    assert!(raw.meh_uids.is_empty());
}

#[tokio::test]
async fn test_vanished_message_is_removed() {
    let (store, server) = grown().await;
    server.expunge(ALL_MAIL, 1).await;

    let payload = sync_refresh(&store, &server, ACCOUNT).await.unwrap();
    let task = conv_task(&payload.tasks, &conv_id("100"));
    assert!(task.removed_uids.as_ref().unwrap().contains(&1));
    assert!(task.remove_conv);
    assert!(raw_state(&store).await.yay_uids.is_empty());
}

#[tokio::test]
async fn test_unchanged_refresh_is_quiet() {
    let (store, server) = grown().await;
    let before = raw_state(&store).await;

    let payload = sync_refresh(&store, &server, ACCOUNT).await.unwrap();
    assert!(payload.tasks.is_empty());
    assert_eq!(raw_state(&store).await, before);
}

#[tokio::test]
async fn test_new_conv_enrolls_thread() {
    let (store, server) = grown().await;
    let mut task = SyncConvTask::new(ACCOUNT, conv_id("100"));
    task.new_conv = true;

    let payload = sync_conv(&store, &server, &task).await.unwrap();
    let raw = raw_state(&store).await;
    assert!(raw.yay_uids.contains_key(&1));
    assert!(raw.meh_uids.contains_key(&2));
    assert!(payload.tasks.is_empty());

    match &payload.conversations[&task.conv_id] {
        ConvMutation::Update { new_messages, .. } => {
            let uids: Vec<u32> = new_messages.iter().map(|m| m.uid).collect();
            assert_eq!(uids, vec![1, 2]);
            assert!(new_messages[0].gmail_msg_id.is_some());
        }
        ConvMutation::Delete => panic!("expected an update"),
    }
}

#[tokio::test]
async fn test_remove_conv_deletes() {
    let (store, server) = grown().await;
    let mut task = SyncConvTask::new(ACCOUNT, conv_id("100"));
    task.remove_conv = true;

    let payload = sync_conv(&store, &server, &task).await.unwrap();
    assert_eq!(payload.conversations[&task.conv_id], ConvMutation::Delete);
    assert!(payload.sync_states.is_empty());
}

#[tokio::test]
async fn test_missing_folder_list_is_moot() {
    let store = MemoryStore::with_clock(NOW);
    let mut few = folders();
    few.folders.truncate(3);
    store.set_folders(few).await;
    let server = FakeImapServer::new();

    let err = sync_refresh(&store, &server, ACCOUNT).await.unwrap_err();
    assert!(err.is_moot());
    assert_eq!(store.snapshot().await.commit_count, 0);
}

#[tokio::test]
async fn test_missing_modseq_fails_without_commit() {
    let (store, server) = setup().await;
    store
        .set_sync_state(ACCOUNT, json!({"label_since_dates": {INBOX: 0}, "last_high_uid": 5}))
        .await;

    let err = sync_refresh(&store, &server, ACCOUNT).await.unwrap_err();
    assert!(matches!(err, SyncError::MissingModseq));
    assert!(!err.is_recoverable());
    assert_eq!(store.snapshot().await.commit_count, 0);
}
