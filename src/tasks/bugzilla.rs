//! Bug tracker refresh

use super::context::{CommitPayload, TaskContext};
use super::protocol::BugTracker;
use super::{begin_scope, commit};
use crate::config::SyncConfig;
use crate::error::SyncResult;
use crate::sync::bugzilla::{BugzillaRawSyncState, BugzillaSyncStateHelper};
use crate::sync::SyncStateHelper;
use tracing::info;

pub async fn sync_refresh(
    ctx: &dyn TaskContext,
    tracker: &dyn BugTracker,
    config: &SyncConfig,
    account_id: &str,
    user_email: &str,
) -> SyncResult<CommitPayload> {
    let raw: Option<BugzillaRawSyncState> = begin_scope(ctx, account_id).await?;
    let mut helper = BugzillaSyncStateHelper::new(account_id, raw, config);
    let sync_date = ctx.now();

    let since = helper.change_start_date();
    let bugs = tracker.search_changed_since(user_email, since).await?;
    info!("{} bugs of {} changed since {}", bugs.len(), user_email, since);
    for bug in bugs {
        helper.ingest(bug);
    }
    helper.finalize();

    let outcome = helper.into_outcome();
    let mut payload = CommitPayload {
        tasks: outcome.tasks.clone(),
        ..Default::default()
    };
    payload
        .sync_states
        .insert(account_id.to_string(), outcome.raw_state_json()?);
    payload.atomic_clobbers.account_sync_success(account_id, sync_date);
    commit(ctx, payload).await
}
