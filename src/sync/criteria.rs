//! Classification primitives.
//!
//! These decide whether a remote item meets our "interest" criteria. They
//! must stay free of side effects because planning may be replayed and the
//! same item classified several times.

use crate::util::dates::DateTs;
use std::collections::BTreeMap;

/// Does a message carrying `folder_ids` meet the criteria of any label we
/// track?
///
/// A label counts only if we have registered a SINCE date for it, and the
/// message date must be at or after that date.
pub fn meets_label_criteria<S: AsRef<str>>(
    date: DateTs,
    folder_ids: &[S],
    label_since_dates: &BTreeMap<String, DateTs>,
) -> bool {
    folder_ids.iter().any(|folder_id| {
        label_since_dates
            .get(folder_id.as_ref())
            .is_some_and(|&since| date >= since)
    })
}

/// Single-timeline form: is the item's date within the horizon?
pub fn meets_horizon(date: DateTs, horizon: DateTs) -> bool {
    date >= horizon
}
