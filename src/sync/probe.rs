//! Date-horizon probe
//!
//! Picks the SINCE date for a grow by sampling INTERNALDATEs at exponentially
//! spaced sequence numbers below the unsynced tail of a folder. Sequence
//! numbers usually correlate with arrival time; when the samples show they do
//! not (messages moved in from elsewhere), we give up and grow by a fixed
//! number of days instead.

use crate::config::SyncConfig;
use crate::error::SyncResult;
use crate::tasks::protocol::{FetchField, FetchOptions, FolderInfo, ImapProtocol, MessageSelector};
use crate::util::dates::{make_days_before, quantize_date, DateTs, DAY_MILLIS};
use tracing::{debug, info};

/// Step growth factor between probes
const PROBE_STEP_SCALE: u32 = 2;

/// One probed message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProbeSample {
    pub seq: u32,
    pub date: DateTs,
}

/// Sequence numbers to probe, newest first
pub fn probe_sequence_numbers(start_seq: i64, growth_target: u32) -> Vec<u32> {
    let mut step = i64::from(growth_target.div_ceil(4).max(1));
    let mut seqs = Vec::new();
    let mut seq = start_seq;
    while seq >= 1 {
        seqs.push(seq as u32);
        seq -= step;
        step *= i64::from(PROBE_STEP_SCALE);
    }
    seqs
}

/// Decide the new SINCE date from the probed samples
pub fn choose_probe_date(mut samples: Vec<ProbeSample>, cur_date: DateTs, config: &SyncConfig) -> DateTs {
    let fallback = make_days_before(cur_date, config.initial_sync_growth_days);
    if samples.is_empty() {
        debug!("Nothing to probe, growing by {} days", config.initial_sync_growth_days);
        return fallback;
    }

    // Walk backwards in sequence, which should be backwards in time.
    samples.sort_by(|a, b| b.seq.cmp(&a.seq));

    // A newer date after an older one is a violation; sum how far off it is.
    let mut violations_delta: DateTs = 0;
    let mut check_date: Option<DateTs> = None;
    for sample in &samples {
        match check_date {
            None => check_date = Some(sample.date),
            Some(check) if sample.date > check => violations_delta += sample.date - check,
            Some(_) => check_date = Some(sample.date),
        }
    }

    if violations_delta > config.probe_violation_tolerance_millis() {
        info!(
            "Date probe bailing: {} days of sequence/date violations",
            violations_delta / DAY_MILLIS
        );
        return fallback;
    }

    let pick = samples[samples.len().saturating_sub(1).min(2)];
    let use_date = quantize_date(pick.date);
    info!(
        "Date probe chose {} ({} days of violations)",
        use_date,
        violations_delta / DAY_MILLIS
    );
    use_date
}

/// Fetch INTERNALDATE for the probe sequence numbers and choose a date
pub async fn probe_for_date_using_sequence_numbers(
    client: &dyn ImapProtocol,
    folder: &FolderInfo,
    start_seq: i64,
    cur_date: DateTs,
    config: &SyncConfig,
) -> SyncResult<DateTs> {
    let seqs = probe_sequence_numbers(start_seq, config.growth_message_count_target);
    if seqs.is_empty() {
        return Ok(choose_probe_date(Vec::new(), cur_date, config));
    }

    debug!("Probing {} sequence numbers in {}", seqs.len(), folder.id);
    let result = client
        .list_messages(
            folder,
            &MessageSelector::Sequences(seqs),
            &[FetchField::InternalDate],
            &FetchOptions::default(),
        )
        .await?;

    let samples = result
        .messages
        .iter()
        .map(|msg| ProbeSample {
            seq: msg.seq,
            date: msg.internal_date,
        })
        .collect();
    Ok(choose_probe_date(samples, cur_date, config))
}
