//! POP3, calendar feed and bug tracker drivers

use comunicado_sync::config::SyncConfig;
use comunicado_sync::sync::{
    BugObservation, BugzillaRawSyncState, CalendarEvent, IcalRawSyncState, Pop3RawSyncState, SyncTask,
    SyncUidTask,
};
use comunicado_sync::tasks::memory::{FakeBugTracker, FakeCalendarFeed, FakeMaildrop, MemoryStore};
use comunicado_sync::tasks::{bugzilla, calendar, pop3};
use comunicado_sync::util::dates;
use serde_json::json;

const NOW: i64 = 1_700_000_000_000;

fn uid_tasks(tasks: &[SyncTask]) -> Vec<&SyncUidTask> {
    tasks
        .iter()
        .filter_map(|task| match task {
            SyncTask::SyncUid(task) => Some(task),
            _ => None,
        })
        .collect()
}

fn event(uid: &str, last_modified_ts: i64, recurrence_id: Option<&str>) -> CalendarEvent {
    CalendarEvent {
        uid: uid.to_string(),
        last_modified_ts,
        recurrence_id: recurrence_id.map(str::to_string),
        jcal: json!(["vevent", [], []]),
    }
}

#[tokio::test]
async fn test_pop3_budget_overflow_and_drain() {
    let store = MemoryStore::with_clock(NOW);
    let maildrop = FakeMaildrop::new(&["a", "b", "c"]);
    let config = SyncConfig {
        pop3_max_messages_per_sync: 2,
        ..SyncConfig::default()
    };

    let payload = pop3::sync_refresh(&store, &maildrop, &config, "2", "2.1").await.unwrap();
    assert_eq!(payload.tasks.len(), 2);
    let raw: Pop3RawSyncState = serde_json::from_value(store.sync_state("2").await.unwrap()).unwrap();
    assert_eq!(raw.uidl_to_umid.get("a").map(String::as_str), Some("2.0"));
    assert!(raw.overflow_uidls_to_size.contains_key("c"));
    assert!(store.snapshot().await.folder_status["2.1"].sync_info.is_some());

    let payload = pop3::sync_grow(&store, &config, "2", "2.1").await.unwrap();
    match &payload.tasks[..] {
        [SyncTask::SyncMessage(task)] => assert_eq!(task.uidl.as_deref(), Some("c")),
        other => panic!("unexpected tasks {:?}", other),
    }
    let raw: Pop3RawSyncState = serde_json::from_value(store.sync_state("2").await.unwrap()).unwrap();
    assert!(raw.overflow_uidls_to_size.is_empty());
    assert_eq!(raw.uidl_to_umid.len(), 3);
}

#[tokio::test]
async fn test_pop3_message_leaving_maildrop_is_forgotten() {
    let store = MemoryStore::with_clock(NOW);
    let maildrop = FakeMaildrop::new(&["a", "b"]);
    let config = SyncConfig::default();
    pop3::sync_refresh(&store, &maildrop, &config, "2", "2.1").await.unwrap();
    store.name_umid("2.0", "2.x.y").await;

    maildrop.set_uidls(&["b"]).await;
    let payload = pop3::sync_refresh(&store, &maildrop, &config, "2", "2.1").await.unwrap();
    assert!(payload.tasks.is_empty());
    assert_eq!(payload.umid_names.get("2.0"), Some(&None));
    assert_eq!(payload.umid_locations.get("2.0"), Some(&None));

    let contents = store.snapshot().await;
    assert!(!contents.umid_names.contains_key("2.0"));
    assert!(!contents.umid_locations.contains_key("2.0"));
}

#[tokio::test]
async fn test_calendar_refresh_cycle() {
    let store = MemoryStore::with_clock(NOW);
    let config = SyncConfig::default();
    let feed = FakeCalendarFeed::new(vec![
        event("standup", 100, None),
        event("review", 100, Some("20240102T100000Z")),
        event("review", 100, None),
    ]);

    let payload = calendar::sync_refresh(&store, &feed, &config, "3").await.unwrap();
    let tasks = uid_tasks(&payload.tasks);
    assert_eq!(tasks.len(), 2);
    assert_eq!(tasks[0].conv_id, "3.0");
    assert_eq!(tasks[1].conv_id, "3.1");
    assert!(tasks[1].events[0].is_master());
    assert_eq!(tasks[1].events.len(), 2);
    assert!(store.snapshot().await.accounts["3"].sync_info.is_some());

    // Nothing changed
    let payload = calendar::sync_refresh(&store, &feed, &config, "3").await.unwrap();
    assert!(payload.tasks.is_empty());

    feed.set_events(vec![event("review", 200, None)]).await;
    let payload = calendar::sync_refresh(&store, &feed, &config, "3").await.unwrap();
    let tasks = uid_tasks(&payload.tasks);
    assert_eq!(tasks.len(), 2);
    assert_eq!(tasks[0].uid, "review");
    assert_eq!(tasks[0].last_modified_ts, 200);
    assert_eq!(tasks[1].uid, "standup");
    assert!(tasks[1].is_deletion());

    let raw: IcalRawSyncState = serde_json::from_value(store.sync_state("3").await.unwrap()).unwrap();
    assert_eq!(raw.next_conv_id, 3);
    assert!(!raw.uid_to_conv_id_and_last_modified.contains_key("standup"));
}

#[tokio::test]
async fn test_calendar_restored_revision_is_resynced() {
    let store = MemoryStore::with_clock(NOW);
    let config = SyncConfig::default();
    let feed = FakeCalendarFeed::new(vec![event("review", 200, None)]);
    calendar::sync_refresh(&store, &feed, &config, "3").await.unwrap();

    feed.set_events(vec![event("review", 100, None)]).await;
    let payload = calendar::sync_refresh(&store, &feed, &config, "3").await.unwrap();
    let tasks = uid_tasks(&payload.tasks);
    assert_eq!(tasks.len(), 1);
    assert_eq!(tasks[0].conv_id, "3.0");
    assert_eq!(tasks[0].last_modified_ts, 100);

    let raw: IcalRawSyncState = serde_json::from_value(store.sync_state("3").await.unwrap()).unwrap();
    assert_eq!(raw.uid_to_conv_id_and_last_modified["review"].last_modified_ts, 100);
}

#[tokio::test]
async fn test_bug_tracker_watermark_advances() {
    let store = MemoryStore::with_clock(NOW);
    let config = SyncConfig::default();
    let recent = dates::now() - dates::DAY_MILLIS;
    let tracker = FakeBugTracker::new(vec![
        BugObservation {
            bug_id: 7,
            last_change_ts: recent,
        },
        BugObservation {
            bug_id: 9,
            last_change_ts: recent + 1000,
        },
    ]);

    let payload = bugzilla::sync_refresh(&store, &tracker, &config, "4", "me@example.com")
        .await
        .unwrap();
    assert_eq!(payload.tasks.len(), 2);
    assert_eq!(payload.tasks[0].conv_id(), Some("4.7"));

    let raw: BugzillaRawSyncState = serde_json::from_value(store.sync_state("4").await.unwrap()).unwrap();
    assert_eq!(raw.last_change_datestamp, recent + 1000);

    bugzilla::sync_refresh(&store, &tracker, &config, "4", "me@example.com")
        .await
        .unwrap();
    let queries = tracker.queries().await;
    assert_eq!(queries.len(), 2);
    assert!(queries[0].1 < recent);
    assert_eq!(queries[1], ("me@example.com".to_string(), recent + 1000));
}
