//! Gmail drivers: refresh the account, grow a label, sync one conversation.
//!
//! All Gmail state lives in a single per-account sync state; everything is
//! fetched from "All Mail" and attributed to folders through labels.

use super::context::{CommitPayload, ConvMutation, FolderClobber, TaskContext};
use super::gmail_labels::GmailLabelMapper;
use super::protocol::{
    AccountFolders, FetchField, FetchOptions, FetchedMessage, FolderInfo, FolderType, ImapProtocol,
    MessageSelector, SearchCriteria,
};
use super::{begin_scope, commit, spin_off_grow};
use crate::config::SyncConfig;
use crate::error::{SyncError, SyncResult};
use crate::sync::gmail::{GmailMessageObservation, GmailObservation, GmailRawSyncState, GmailSyncStateHelper};
use crate::sync::probe::probe_for_date_using_sequence_numbers;
use crate::sync::task::{MessageState, SyncConvTask};
use crate::sync::{SyncMode, SyncStateHelper};
use crate::util::a64::max_decimal_string;
use crate::util::dates::quantize_date;
use crate::util::ids::{
    conv_specific_id_from_conv_id, gmail_thread_id_from_conv_id, parse_gmail_conv_id, parse_gmail_msg_id,
};
use std::collections::BTreeMap;
use tracing::{debug, info, warn};

const MESSAGE_FIELDS: &[FetchField] = &[
    FetchField::Uid,
    FetchField::InternalDate,
    FetchField::Flags,
    FetchField::GmailThreadId,
    FetchField::GmailMessageId,
    FetchField::GmailLabels,
];

/// A freshly created account only has its local folders; the server folder
/// list has not been synced yet.
const MIN_SYNCED_FOLDER_COUNT: usize = 3;

async fn load_folders(ctx: &dyn TaskContext, account_id: &str) -> SyncResult<AccountFolders> {
    let folders = ctx.account_folders(account_id).await?;
    if folders.len() <= MIN_SYNCED_FOLDER_COUNT {
        return Err(SyncError::moot(format!("folder list of account {} not synced yet", account_id)));
    }
    Ok(folders)
}

fn all_mail(folders: &AccountFolders) -> SyncResult<&FolderInfo> {
    folders
        .first_folder_with_type(FolderType::All)
        .ok_or_else(|| SyncError::moot(format!("account {} has no All Mail folder", folders.account_id)))
}

fn observe(mapper: &GmailLabelMapper, msg: &FetchedMessage, raw_conv_id: String) -> GmailObservation {
    let folder_ids = mapper.labels_to_folder_ids(&msg.labels);
    GmailObservation::Message(GmailMessageObservation {
        uid: msg.uid,
        raw_conv_id,
        date_ts: msg.internal_date,
        new_state: Some(MessageState {
            raw_msg_id: msg.gmail_msg_id.as_deref().and_then(parse_gmail_msg_id),
            flags: msg.flags.clone(),
            labels: folder_ids.clone(),
        }),
        folder_ids,
    })
}

/// Fetch everything that changed since our modseq and reconcile it.
pub async fn sync_refresh(
    ctx: &dyn TaskContext,
    client: &dyn ImapProtocol,
    account_id: &str,
) -> SyncResult<CommitPayload> {
    let folders = load_folders(ctx, account_id).await?;
    let inbox = folders
        .first_folder_with_type(FolderType::Inbox)
        .ok_or_else(|| SyncError::moot(format!("account {} has no inbox", account_id)))?;

    let raw: Option<GmailRawSyncState> = begin_scope(ctx, account_id).await?;
    let Some(raw) = raw else {
        info!("No sync state for account {}, growing the inbox first", account_id);
        return spin_off_grow(ctx, account_id, &inbox.id).await;
    };
    let mut helper = GmailSyncStateHelper::new(account_id, Some(raw), SyncMode::Refresh);
    if helper.folder_since_date(&inbox.id).is_none() {
        info!("Inbox of account {} never grown, growing it first", account_id);
        return spin_off_grow(ctx, account_id, &inbox.id).await;
    }
    let modseq = helper.modseq().map(str::to_string).ok_or(SyncError::MissingModseq)?;

    let all_mail = all_mail(&folders)?;
    let mapper = GmailLabelMapper::new(&folders);
    let sync_date = ctx.now();

    let result = client
        .list_messages(
            all_mail,
            &MessageSelector::UidRange { first: 1, last: None },
            MESSAGE_FIELDS,
            &FetchOptions {
                changed_since: Some(modseq.clone()),
                vanished: true,
            },
        )
        .await?;
    debug!(
        "Account {} refresh: {} changed messages, {} vanished",
        account_id,
        result.messages.len(),
        result.vanished.len()
    );

    let mut highest_modseq = modseq;
    if let Some(mailbox_modseq) = &result.mailbox.highest_modseq {
        highest_modseq = max_decimal_string(&highest_modseq, mailbox_modseq).to_string();
    }

    for &uid in &result.vanished {
        helper.ingest(GmailObservation::Vanished { uid });
    }
    for msg in &result.messages {
        if let Some(msg_modseq) = &msg.modseq {
            highest_modseq = max_decimal_string(&highest_modseq, msg_modseq).to_string();
        }
        let Some(raw_conv_id) = msg.gmail_thread_id.as_deref().and_then(parse_gmail_conv_id) else {
            warn!("Uid {} has no usable thread id, skipping", msg.uid);
            continue;
        };
        helper.ingest(observe(&mapper, msg, raw_conv_id));
    }

    if let Some(uid_next) = result.mailbox.uid_next.filter(|&uid_next| uid_next > 0) {
        helper.set_last_high_uid(uid_next - 1);
    }
    helper.set_modseq(&highest_modseq);
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

/// Expand the date range synchronized for one label.
pub async fn sync_grow(
    ctx: &dyn TaskContext,
    client: &dyn ImapProtocol,
    config: &SyncConfig,
    account_id: &str,
    folder_id: &str,
) -> SyncResult<CommitPayload> {
    let folders = load_folders(ctx, account_id).await?;
    let folder = folders
        .folder_by_id(folder_id)
        .ok_or_else(|| SyncError::folder_not_found(folder_id))?;
    if folder.server_path.is_none() {
        debug!("Folder {} has no server counterpart, nothing to grow", folder_id);
        return commit(ctx, CommitPayload::default()).await;
    }
    let all_mail = all_mail(&folders)?;
    let label = GmailLabelMapper::new(&folders)
        .folder_id_to_label(folder_id)
        .ok_or_else(|| SyncError::folder_not_found(folder_id))?
        .to_string();

    let raw: Option<GmailRawSyncState> = begin_scope(ctx, account_id).await?;
    let mut helper = GmailSyncStateHelper::new(account_id, raw, SyncMode::Grow);

    let mailbox = client.select_mailbox(folder).await?;
    let estimated_unsynced = i64::from(mailbox.exists) - i64::from(folder.local_message_count);

    let existing_since = helper.folder_since_date(folder_id);
    let first_inbox_sync = existing_since.is_none() && folder.folder_type == FolderType::Inbox;

    let whole_folder_threshold = config
        .sync_whole_folder_at_n_messages
        .max(config.growth_message_count_target);
    let new_since = if estimated_unsynced < i64::from(whole_folder_threshold) {
        config.oldest_sync_ts()
    } else {
        let cur_date = existing_since.unwrap_or_else(|| quantize_date(ctx.now()));
        probe_for_date_using_sequence_numbers(client, folder, estimated_unsynced, cur_date, config).await?
    };
    let sync_date = ctx.now();

    let criteria =
        SearchCriteria::date_range(new_since, existing_since.map(quantize_date)).with_gmail_label(label);
    let search = client.search(all_mail, &criteria).await?;
    info!(
        "Growing {} back to {}: {} candidate messages",
        folder_id,
        new_since,
        search.uids.len()
    );

    if !search.uids.is_empty() {
        let result = client
            .list_messages(
                all_mail,
                &MessageSelector::Uids(search.uids.clone()),
                &[FetchField::Uid, FetchField::InternalDate, FetchField::GmailThreadId],
                &FetchOptions::default(),
            )
            .await?;
        for msg in &result.messages {
            let Some(raw_conv_id) = msg.gmail_thread_id.as_deref().and_then(parse_gmail_conv_id) else {
                warn!("Uid {} has no usable thread id, skipping", msg.uid);
                continue;
            };
            helper.ingest(GmailObservation::Message(GmailMessageObservation {
                uid: msg.uid,
                raw_conv_id,
                date_ts: msg.internal_date,
                folder_ids: vec![folder_id.to_string()],
                new_state: None,
            }));
        }
    }

    helper.set_folder_since_date(folder_id, new_since);
    // The first grow of the account establishes the refresh cursors.
    if helper.modseq().is_none() {
        if let Some(modseq) = &search.mailbox.highest_modseq {
            helper.set_modseq(modseq);
        }
        if let Some(uid_next) = search.mailbox.uid_next.filter(|&uid_next| uid_next > 0) {
            helper.set_last_high_uid(uid_next - 1);
        }
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
    if first_inbox_sync {
        payload.atomic_clobbers.account_sync_success(account_id, sync_date);
    }
    payload.atomic_clobbers.folders.insert(
        folder_id.to_string(),
        FolderClobber {
            fully_synced: Some(new_since == config.oldest_sync_ts()),
            estimated_unsynced_messages: Some(estimated_unsynced),
            synced_through: Some(new_since),
            sync_info: None,
        },
    );
    commit(ctx, payload).await
}

/// Apply a conversation task: enroll a new conversation, drop a removed
/// one, or fetch the new messages and forward state changes of a known one.
pub async fn sync_conv(
    ctx: &dyn TaskContext,
    client: &dyn ImapProtocol,
    task: &SyncConvTask,
) -> SyncResult<CommitPayload> {
    let mut payload = CommitPayload::default();

    if task.remove_conv {
        debug!("Removing conversation {}", task.conv_id);
        payload
            .conversations
            .insert(task.conv_id.clone(), ConvMutation::Delete);
        return commit(ctx, payload).await;
    }

    let folders = load_folders(ctx, &task.account_id).await?;
    let all_mail = all_mail(&folders)?;

    if task.new_conv {
        let thread_id = gmail_thread_id_from_conv_id(&task.conv_id)
            .ok_or_else(|| SyncError::protocol(format!("{} is not a Gmail conversation id", task.conv_id)))?;
        let raw_conv_id = conv_specific_id_from_conv_id(&task.conv_id).to_string();

        let raw: Option<GmailRawSyncState> = begin_scope(ctx, &task.account_id).await?;
        let mut helper = GmailSyncStateHelper::new(&task.account_id, raw, SyncMode::Conv);
        let mapper = GmailLabelMapper::new(&folders);

        let search = client
            .search(all_mail, &SearchCriteria::gmail_thread(thread_id))
            .await?;
        let messages = if search.uids.is_empty() {
            Vec::new()
        } else {
            client
                .list_messages(
                    all_mail,
                    &MessageSelector::Uids(search.uids),
                    MESSAGE_FIELDS,
                    &FetchOptions::default(),
                )
                .await?
                .messages
        };
        info!("Enrolling {} messages of conversation {}", messages.len(), task.conv_id);

        for msg in &messages {
            helper.ingest(observe(&mapper, msg, raw_conv_id.clone()));
        }
        helper.finalize();

        let outcome = helper.into_outcome();
        payload
            .sync_states
            .insert(task.account_id.clone(), outcome.raw_state_json()?);
        payload.tasks = outcome.tasks;
        payload.conversations.insert(
            task.conv_id.clone(),
            ConvMutation::Update {
                modified_uids: BTreeMap::new(),
                removed_uids: Default::default(),
                new_messages: messages,
            },
        );
        return commit(ctx, payload).await;
    }

    let new_messages = match task.new_uids.as_ref().filter(|uids| !uids.is_empty()) {
        Some(uids) => {
            client
                .list_messages(
                    all_mail,
                    &MessageSelector::Uids(uids.iter().copied().collect()),
                    MESSAGE_FIELDS,
                    &FetchOptions::default(),
                )
                .await?
                .messages
        }
        None => Vec::new(),
    };
    payload.conversations.insert(
        task.conv_id.clone(),
        ConvMutation::Update {
            modified_uids: task.modified_uids.clone().unwrap_or_default(),
            removed_uids: task.removed_uids.clone().unwrap_or_default(),
            new_messages,
        },
    );
    commit(ctx, payload).await
}
