//! Sync status overlays for folders and accounts.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncStatus {
    Active,
    Pending,
}

/// Why a pending sync cannot run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BlockedReason {
    Offline,
    BadAuth,
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OverlayStatus {
    pub status: SyncStatus,
    pub blocked: Option<BlockedReason>,
}

/// Map the first blocking resource to a user-facing reason
pub fn blocked_reason(blocked_by: &[String]) -> Option<BlockedReason> {
    let first = blocked_by.first()?;
    Some(if first == "online" {
        BlockedReason::Offline
    } else if first.starts_with("credentials!") {
        BlockedReason::BadAuth
    } else {
        BlockedReason::Unknown
    })
}

/// Overlay for a sync task binned by folder or account.
///
/// `None` when the task is neither running nor queued.
pub fn sync_overlay(active: bool, pending_marker: bool, blocked_by: &[String]) -> Option<OverlayStatus> {
    let status = if active {
        SyncStatus::Active
    } else if pending_marker {
        SyncStatus::Pending
    } else {
        return None;
    };
    Some(OverlayStatus {
        status,
        blocked: blocked_reason(blocked_by),
    })
}
