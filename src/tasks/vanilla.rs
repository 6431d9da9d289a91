//! Vanilla IMAP drivers, one sync state per folder.

use super::context::{CommitPayload, FolderClobber, SyncInfo, TaskContext};
use super::protocol::{
    FetchField, FetchOptions, FetchedMessage, FolderInfo, ImapProtocol, MessageSelector, SearchCriteria,
};
use super::{begin_scope, commit, spin_off_grow};
use crate::config::SyncConfig;
use crate::error::{SyncError, SyncResult};
use crate::sync::probe::probe_for_date_using_sequence_numbers;
use crate::sync::task::Uid;
use crate::sync::vanilla::{VanillaObservation, VanillaRawSyncState, VanillaSyncStateHelper};
use crate::sync::{SyncMode, SyncStateHelper};
use crate::util::dates::quantize_date;
use tracing::{debug, info};

/// Below this many messages a folder without UIDNEXT gets a high uid of 1
const TINY_FOLDER_MESSAGES: u32 = 100;

async fn folder_info(ctx: &dyn TaskContext, account_id: &str, folder_id: &str) -> SyncResult<FolderInfo> {
    let folders = ctx.account_folders(account_id).await?;
    folders
        .folder_by_id(folder_id)
        .cloned()
        .ok_or_else(|| SyncError::folder_not_found(folder_id))
}

/// Check known messages for flag changes and deletions and pick up new
/// messages above the high uid.
pub async fn sync_refresh(
    ctx: &dyn TaskContext,
    client: &dyn ImapProtocol,
    account_id: &str,
    folder_id: &str,
) -> SyncResult<CommitPayload> {
    let folder = folder_info(ctx, account_id, folder_id).await?;
    let raw: Option<VanillaRawSyncState> = begin_scope(ctx, folder_id).await?;
    let raw = match raw {
        Some(raw) if raw.last_high_uid > 0 => raw,
        _ => {
            info!("Folder {} has never been grown, growing instead", folder_id);
            return spin_off_grow(ctx, account_id, folder_id).await;
        }
    };

    let mut helper = VanillaSyncStateHelper::new(account_id, folder_id, Some(raw), SyncMode::Refresh);
    let last_high_uid = helper.last_high_uid();
    let known_uids = helper.all_uids();
    let new_message_options = FetchOptions {
        changed_since: helper.modseq().map(str::to_string),
        vanished: false,
    };
    let sync_date = ctx.now();

    let new_selector = MessageSelector::UidRange {
        first: last_high_uid + 1,
        last: None,
    };
    let new_fields = [FetchField::Uid, FetchField::InternalDate, FetchField::Flags];
    let new_messages = client.list_messages(&folder, &new_selector, &new_fields, &new_message_options);
    let known_messages = async {
        if known_uids.is_empty() {
            return Ok::<(Vec<Uid>, Vec<FetchedMessage>), SyncError>((Vec::new(), Vec::new()));
        }
        let search = client.search(&folder, &SearchCriteria::uids(known_uids.clone())).await?;
        if search.uids.is_empty() {
            return Ok((Vec::new(), Vec::new()));
        }
        let flags = client
            .list_messages(
                &folder,
                &MessageSelector::Uids(search.uids.clone()),
                &[FetchField::Uid, FetchField::Flags],
                &FetchOptions::default(),
            )
            .await?;
        Ok((search.uids, flags.messages))
    };
    let (new_result, (present_uids, flagged)) = futures::try_join!(new_messages, known_messages)?;

    // Deletions first so a reused uid cannot be mistaken for a known one.
    helper.ingest(VanillaObservation::Present { uids: present_uids });
    for msg in flagged {
        helper.ingest(VanillaObservation::Flags {
            uid: msg.uid,
            flags: msg.flags,
        });
    }

    let mut highest_uid = last_high_uid;
    for msg in new_result.messages {
        // `n:*` always returns the last message, even below `n`.
        if msg.uid <= last_high_uid || helper.is_known_uid(msg.uid) {
            continue;
        }
        highest_uid = highest_uid.max(msg.uid);
        helper.ingest(VanillaObservation::Found {
            uid: msg.uid,
            date_ts: msg.internal_date,
            flags: msg.flags,
        });
    }
    debug!("Folder {} new high uid {}", folder_id, highest_uid);

    ctx.read_umid_names(helper.umid_name_reads_mut()).await?;
    helper.finalize();
    helper.set_last_high_uid(highest_uid);
    if let Some(modseq) = &new_result.mailbox.highest_modseq {
        helper.set_modseq(modseq);
    }

    let umid_locations = helper.umid_location_writes().clone();
    let outcome = helper.into_outcome();
    let mut payload = CommitPayload {
        umid_locations,
        tasks: outcome.tasks.clone(),
        ..Default::default()
    };
    payload
        .sync_states
        .insert(folder_id.to_string(), outcome.raw_state_json()?);
    payload.atomic_clobbers.folder_sync_success(folder_id, sync_date);
    commit(ctx, payload).await
}

/// Expand the folder's synchronized date range further into the past.
pub async fn sync_grow(
    ctx: &dyn TaskContext,
    client: &dyn ImapProtocol,
    config: &SyncConfig,
    account_id: &str,
    folder_id: &str,
) -> SyncResult<CommitPayload> {
    let folder = folder_info(ctx, account_id, folder_id).await?;
    let raw: Option<VanillaRawSyncState> = begin_scope(ctx, folder_id).await?;
    let mut helper = VanillaSyncStateHelper::new(account_id, folder_id, raw, SyncMode::Grow);

    let mailbox = client.select_mailbox(&folder).await?;
    let known_count = i64::try_from(helper.known_message_count()).unwrap_or(i64::MAX);
    let estimated_unsynced = i64::from(mailbox.exists) - known_count;

    let existing_since = Some(helper.since_date()).filter(|&since| since > 0);
    let whole_folder_threshold = config
        .sync_whole_folder_at_n_messages
        .max(config.growth_message_count_target);
    let new_since = if estimated_unsynced < i64::from(whole_folder_threshold) {
        config.oldest_sync_ts()
    } else {
        let cur_date = existing_since.unwrap_or_else(|| quantize_date(ctx.now()));
        probe_for_date_using_sequence_numbers(client, &folder, estimated_unsynced, cur_date, config).await?
    };
    let sync_date = ctx.now();

    let criteria = SearchCriteria::date_range(new_since, existing_since.map(quantize_date));
    let search = client.search(&folder, &criteria).await?;
    let new_uids = helper.filter_out_known_uids(&search.uids);
    info!(
        "Growing {} back to {}: {} new of {} found",
        folder_id,
        new_since,
        new_uids.len(),
        search.uids.len()
    );

    if !new_uids.is_empty() {
        let result = client
            .list_messages(
                &folder,
                &MessageSelector::Uids(new_uids),
                &[FetchField::Uid, FetchField::InternalDate, FetchField::Flags],
                &FetchOptions::default(),
            )
            .await?;
        for msg in result.messages {
            helper.yay_message_found_by_date(msg.uid, msg.internal_date, msg.flags);
        }
    }

    helper.set_since_date(new_since);
    if helper.last_high_uid() == 0 {
        let bootstrap = if let Some(uid_next) = mailbox.uid_next.filter(|&uid_next| uid_next > 0) {
            Some(uid_next - 1)
        } else if let Some(&max_uid) = search.uids.iter().max() {
            Some(max_uid)
        } else if mailbox.exists > 0 && mailbox.exists < TINY_FOLDER_MESSAGES {
            Some(1)
        } else {
            None
        };
        if let Some(uid) = bootstrap {
            debug!("Folder {} starts refreshing above uid {}", folder_id, uid);
            helper.set_last_high_uid(uid);
        }
    }
    if helper.modseq().is_none() {
        if let Some(modseq) = &mailbox.highest_modseq {
            helper.set_modseq(modseq);
        }
    }
    helper.finalize();

    let umid_locations = helper.umid_location_writes().clone();
    let outcome = helper.into_outcome();
    let mut payload = CommitPayload {
        umid_locations,
        tasks: outcome.tasks.clone(),
        ..Default::default()
    };
    payload
        .sync_states
        .insert(folder_id.to_string(), outcome.raw_state_json()?);
    payload.atomic_clobbers.folders.insert(
        folder_id.to_string(),
        FolderClobber {
            fully_synced: Some(new_since == config.oldest_sync_ts()),
            estimated_unsynced_messages: Some(estimated_unsynced),
            synced_through: Some(new_since),
            sync_info: Some(SyncInfo::success_at(sync_date)),
        },
    );
    commit(ctx, payload).await
}
