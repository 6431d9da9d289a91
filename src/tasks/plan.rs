//! Planning: what a task needs before it can run and how urgent it is.

use crate::sync::task::SyncTask;
use crate::util::dates::{self, DateTs};
use serde::{Deserialize, Serialize};

/// Upper bound of the recency boost, in hours
pub const MAX_PRIORITY_BOOST: i64 = 99_999;

const HOUR_MILLIS: DateTs = 60 * 60 * 1000;

/// A task plus the scheduling metadata the executor needs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlannedTask {
    pub task: SyncTask,
    /// Resources that must be available (e.g. `online`)
    pub resources: Vec<String>,
    /// Resources held exclusively while running
    pub exclusive_resources: Vec<String>,
    pub priority_tags: Vec<String>,
    pub rel_priority: i64,
}

/// Boost newer things: one point per hour younger than the cap
pub fn prioritize_newer(date_ts: DateTs) -> i64 {
    prioritize_newer_at(date_ts, dates::now())
}

pub fn prioritize_newer_at(date_ts: DateTs, now: DateTs) -> i64 {
    let age_hours = (now - date_ts).max(0) / HOUR_MILLIS;
    (MAX_PRIORITY_BOOST - age_hours).clamp(-MAX_PRIORITY_BOOST, MAX_PRIORITY_BOOST)
}

/// Granularity at which an account persists its sync state
///
/// Gmail, POP3, calendar and bug-tracker accounts keep one state per account;
/// vanilla IMAP keeps one per folder. Refresh and grow passes lock the same
/// scope so only one of them mutates a given state at a time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StateScope {
    Account,
    Folder,
}

impl StateScope {
    /// Exclusive `sync:` resource guarding the state a pass mutates
    pub fn sync_lock(self, account_id: &str, folder_id: Option<&str>) -> String {
        match (self, folder_id) {
            (StateScope::Folder, Some(folder_id)) => format!("sync:{}", folder_id),
            _ => format!("sync:{}", account_id),
        }
    }
}

fn network_resources(account_id: &str) -> Vec<String> {
    vec![
        "online".to_string(),
        format!("credentials!{}", account_id),
        format!("happy!{}", account_id),
    ]
}

/// Attach resources, priority tags and relative priority to a task
pub fn plan_task(task: SyncTask, state_scope: StateScope) -> PlannedTask {
    let account_id = task.account_id().to_string();
    let rel_priority = task.most_recent().map(prioritize_newer).unwrap_or(0);

    let (resources, exclusive_resources, priority_tags) = match &task {
        SyncTask::SyncRefresh(t) => {
            let scope = t.folder_id.as_deref().unwrap_or(&account_id);
            (
                network_resources(&account_id),
                vec![state_scope.sync_lock(&account_id, t.folder_id.as_deref())],
                vec![format!("view:folder:{}", scope)],
            )
        }
        SyncTask::SyncGrow(t) => (
            network_resources(&account_id),
            vec![state_scope.sync_lock(&account_id, Some(&t.folder_id))],
            vec![format!("view:folder:{}", t.folder_id)],
        ),
        SyncTask::SyncConv(t) => {
            let mut exclusive = vec![format!("conv:{}", t.conv_id)];
            // New conversations enroll their messages in the account state.
            if t.new_conv {
                exclusive.push(format!("sync:{}", t.account_id));
            }
            (
                network_resources(&account_id),
                exclusive,
                vec![format!("view:conv:{}", t.conv_id)],
            )
        }
        SyncTask::SyncUid(t) => (
            Vec::new(),
            vec![format!("conv:{}", t.conv_id)],
            vec![format!("view:conv:{}", t.conv_id)],
        ),
        SyncTask::SyncBug(t) => (
            network_resources(&account_id),
            vec![format!("conv:{}", t.conv_id)],
            vec![format!("view:conv:{}", t.conv_id)],
        ),
        SyncTask::SyncMessage(t) => {
            let tags = match &t.folder_id {
                Some(folder_id) => vec![format!("view:folder:{}", folder_id)],
                None => Vec::new(),
            };
            (network_resources(&account_id), Vec::new(), tags)
        }
    };

    PlannedTask {
        task,
        resources,
        exclusive_resources,
        priority_tags,
        rel_priority,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::task::{SyncConvTask, SyncGrowTask, SyncRefreshTask, SyncUidTask};

    #[test]
    fn test_prioritize_newer() {
        let now = 1_000 * HOUR_MILLIS;
        assert_eq!(prioritize_newer_at(now, now), MAX_PRIORITY_BOOST);
        assert_eq!(prioritize_newer_at(now - 10 * HOUR_MILLIS, now), MAX_PRIORITY_BOOST - 10);
        assert_eq!(prioritize_newer_at(now + HOUR_MILLIS, now), MAX_PRIORITY_BOOST);
        assert!(prioritize_newer_at(now - 10 * HOUR_MILLIS, now) > prioritize_newer_at(now - 20 * HOUR_MILLIS, now));
    }

    #[test]
    fn test_plan_new_conv_locks_sync_state() {
        let mut task = SyncConvTask::new("0", "0.abc");
        task.new_conv = true;
        let planned = plan_task(SyncTask::SyncConv(task), StateScope::Account);
        assert_eq!(planned.exclusive_resources, vec!["conv:0.abc", "sync:0"]);
        assert_eq!(planned.priority_tags, vec!["view:conv:0.abc"]);
        assert!(planned.resources.contains(&"credentials!0".to_string()));
        assert_eq!(planned.rel_priority, 0);
    }

    #[test]
    fn test_plan_grow() {
        let planned = plan_task(
            SyncTask::SyncGrow(SyncGrowTask {
                account_id: "1".into(),
                folder_id: "1.4".into(),
            }),
            StateScope::Folder,
        );
        assert_eq!(planned.resources, vec!["online", "credentials!1", "happy!1"]);
        assert_eq!(planned.exclusive_resources, vec!["sync:1.4"]);
        assert_eq!(planned.priority_tags, vec!["view:folder:1.4"]);
    }

    fn refresh_and_grow(scope: StateScope) -> (PlannedTask, PlannedTask) {
        let refresh = plan_task(
            SyncTask::SyncRefresh(SyncRefreshTask {
                account_id: "0".into(),
                folder_id: Some("0.1".into()),
            }),
            scope,
        );
        let grow = plan_task(
            SyncTask::SyncGrow(SyncGrowTask {
                account_id: "0".into(),
                folder_id: "0.1".into(),
            }),
            scope,
        );
        (refresh, grow)
    }

    #[test]
    fn test_refresh_and_grow_share_account_lock() {
        let (refresh, grow) = refresh_and_grow(StateScope::Account);
        assert_eq!(refresh.exclusive_resources, vec!["sync:0"]);
        assert_eq!(grow.exclusive_resources, vec!["sync:0"]);

        // A new conversation enrolls into the same account state.
        let mut conv = SyncConvTask::new("0", "0.abc");
        conv.new_conv = true;
        let conv = plan_task(SyncTask::SyncConv(conv), StateScope::Account);
        assert!(conv.exclusive_resources.contains(&refresh.exclusive_resources[0]));
    }

    #[test]
    fn test_refresh_and_grow_share_folder_lock() {
        let (refresh, grow) = refresh_and_grow(StateScope::Folder);
        assert_eq!(refresh.exclusive_resources, vec!["sync:0.1"]);
        assert_eq!(refresh.exclusive_resources, grow.exclusive_resources);

        let other = plan_task(
            SyncTask::SyncGrow(SyncGrowTask {
                account_id: "0".into(),
                folder_id: "0.2".into(),
            }),
            StateScope::Folder,
        );
        assert_ne!(other.exclusive_resources, grow.exclusive_resources);
    }

    #[test]
    fn test_plan_calendar_uid_is_local() {
        let planned = plan_task(
            SyncTask::SyncUid(SyncUidTask {
                account_id: "2".into(),
                conv_id: "2.0".into(),
                uid: "abc".into(),
                last_modified_ts: dates::now(),
                range_oldest_ts: 0,
                range_newest_ts: 0,
                events: vec![],
            }),
            StateScope::Account,
        );
        assert!(planned.resources.is_empty());
        assert_eq!(planned.exclusive_resources, vec!["conv:2.0"]);
        assert!(planned.rel_priority > MAX_PRIORITY_BOOST - 2);
    }
}
