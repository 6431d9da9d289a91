//! POP3 drivers
//!
//! The sync state is per account; status goes to the inbox the maildrop
//! feeds.

use super::context::{CommitPayload, TaskContext};
use super::protocol::Pop3Maildrop;
use super::{begin_scope, commit};
use crate::config::SyncConfig;
use crate::error::SyncResult;
use crate::sync::pop3::{Pop3RawSyncState, Pop3SyncStateHelper};
use crate::sync::{SyncMode, SyncStateHelper};
use crate::util::dates::DateTs;
use tracing::info;

fn into_payload(
    helper: Pop3SyncStateHelper,
    account_id: &str,
    folder_id: &str,
    sync_date: DateTs,
) -> SyncResult<CommitPayload> {
    let umid_names = helper.umid_name_writes().clone();
    let umid_locations = helper.umid_location_writes().clone();
    let outcome = helper.into_outcome();
    let mut payload = CommitPayload {
        umid_names,
        umid_locations,
        tasks: outcome.tasks.clone(),
        ..Default::default()
    };
    payload
        .sync_states
        .insert(account_id.to_string(), outcome.raw_state_json()?);
    payload.atomic_clobbers.folder_sync_success(folder_id, sync_date);
    Ok(payload)
}

/// Compare the maildrop listing with what we know and sync new messages,
/// up to the per-pass budget.
pub async fn sync_refresh(
    ctx: &dyn TaskContext,
    maildrop: &dyn Pop3Maildrop,
    config: &SyncConfig,
    account_id: &str,
    folder_id: &str,
) -> SyncResult<CommitPayload> {
    let raw: Option<Pop3RawSyncState> = begin_scope(ctx, account_id).await?;
    let mut helper = Pop3SyncStateHelper::new(account_id, raw, SyncMode::Refresh, config.pop3_max_messages_per_sync);
    let sync_date = ctx.now();

    let messages = maildrop.load_message_list().await?;
    info!("Maildrop of account {} lists {} messages", account_id, messages.len());
    helper.ingest(messages);
    helper.finalize();

    let payload = into_payload(helper, account_id, folder_id, sync_date)?;
    commit(ctx, payload).await
}

/// Start syncing messages that did not fit into earlier refreshes.
pub async fn sync_grow(
    ctx: &dyn TaskContext,
    config: &SyncConfig,
    account_id: &str,
    folder_id: &str,
) -> SyncResult<CommitPayload> {
    let raw: Option<Pop3RawSyncState> = begin_scope(ctx, account_id).await?;
    let mut helper = Pop3SyncStateHelper::new(account_id, raw, SyncMode::Grow, config.pop3_max_messages_per_sync);
    let sync_date = ctx.now();

    let moved = helper.sync_overflow_messages(config.pop3_max_messages_per_sync);
    info!(
        "Draining POP3 overflow of account {}: {} now syncing, {} left",
        account_id,
        moved,
        helper.overflow_count()
    );
    helper.finalize();

    let payload = into_payload(helper, account_id, folder_id, sync_date)?;
    commit(ctx, payload).await
}
