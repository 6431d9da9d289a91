//! ICS feed refresh

use super::context::{CommitPayload, TaskContext};
use super::protocol::CalendarFeed;
use super::{begin_scope, commit};
use crate::config::SyncConfig;
use crate::error::SyncResult;
use crate::sync::ical::{IcalRawSyncState, IcalSyncStateHelper};
use crate::sync::SyncStateHelper;
use tracing::debug;

/// Re-read the whole feed and schedule a `sync_uid` per changed or
/// vanished calendar UID.
pub async fn sync_refresh(
    ctx: &dyn TaskContext,
    feed: &dyn CalendarFeed,
    config: &SyncConfig,
    account_id: &str,
) -> SyncResult<CommitPayload> {
    let raw: Option<IcalRawSyncState> = begin_scope(ctx, account_id).await?;
    let mut helper = IcalSyncStateHelper::new(account_id, raw, config);
    let sync_date = ctx.now();

    let events = feed.fetch_events().await?;
    debug!("Calendar feed of account {} has {} events", account_id, events.len());
    for event in events {
        helper.ingest(event);
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
