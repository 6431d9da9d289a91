//! Sync task drivers
//!
//! Each driver wraps one sync state helper in a begin-mutate/commit envelope:
//! load the raw state, talk to the server through a protocol client, feed the
//! helper, and commit the finalized pass in a single payload. On error
//! nothing is committed and the helper is dropped.

pub mod bugzilla;
pub mod calendar;
pub mod context;
pub mod gmail;
pub mod gmail_labels;
pub mod memory;
pub mod overlay;
pub mod plan;
pub mod pop3;
pub mod protocol;
pub mod vanilla;

pub use context::{AtomicClobbers, CommitPayload, ConvMutation, FolderClobber, SyncInfo, TaskContext};
pub use plan::{plan_task, prioritize_newer, PlannedTask, StateScope};
pub use protocol::{AccountFolders, FolderInfo, FolderType};

use crate::error::SyncResult;
use crate::sync::load_raw_state;
use crate::sync::task::{SyncGrowTask, SyncTask};
use serde::de::DeserializeOwned;
use tracing::debug;

/// Lock and decode the raw sync state of a single scope
async fn begin_scope<S: DeserializeOwned>(ctx: &dyn TaskContext, scope_id: &str) -> SyncResult<Option<S>> {
    let states = ctx.begin_mutate(&[scope_id.to_string()]).await?;
    load_raw_state(states.get(scope_id).and_then(Option::as_ref))
}

async fn commit(ctx: &dyn TaskContext, payload: CommitPayload) -> SyncResult<CommitPayload> {
    debug!(
        "Committing {} sync states and {} tasks",
        payload.sync_states.len(),
        payload.tasks.len()
    );
    ctx.commit(&payload).await?;
    Ok(payload)
}

/// A refresh with nothing to refresh against schedules a grow instead
async fn spin_off_grow(ctx: &dyn TaskContext, account_id: &str, folder_id: &str) -> SyncResult<CommitPayload> {
    let payload = CommitPayload::with_tasks(vec![SyncTask::SyncGrow(SyncGrowTask {
        account_id: account_id.to_string(),
        folder_id: folder_id.to_string(),
    })]);
    commit(ctx, payload).await
}
