//! Reference-counted flag-set interning.
//!
//! Most messages in a folder share one of a handful of flag combinations, so
//! instead of persisting flags per UID we persist an index into a table of
//! normalized flag sets. A slot whose count drops to zero is nulled and its
//! index handed to the next new flag set.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use tracing::warn;

/// Persisted layout of the table
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct FlagSlotRepr {
    #[serde(default)]
    flag_sets: Vec<Option<String>>,
    #[serde(default)]
    flag_set_counts: Vec<i64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(from = "FlagSlotRepr", into = "FlagSlotRepr")]
pub struct FlagSlotTable {
    flag_sets: Vec<Option<String>>,
    flag_set_counts: Vec<i64>,
    // Derived on load
    free: BTreeSet<usize>,
    index: HashMap<String, usize>,
}

impl From<FlagSlotRepr> for FlagSlotTable {
    fn from(repr: FlagSlotRepr) -> Self {
        let FlagSlotRepr {
            flag_sets,
            mut flag_set_counts,
        } = repr;
        if flag_set_counts.len() != flag_sets.len() {
            warn!(
                "Flag slot table has {} sets but {} counts",
                flag_sets.len(),
                flag_set_counts.len()
            );
            flag_set_counts.resize(flag_sets.len(), 0);
        }

        let mut free = BTreeSet::new();
        let mut index = HashMap::new();
        for (slot, set) in flag_sets.iter().enumerate() {
            match set {
                Some(norm) => {
                    if index.insert(norm.clone(), slot).is_some() {
                        warn!("Duplicate flag set {} in slot {}", norm, slot);
                    }
                }
                None => {
                    free.insert(slot);
                }
            }
        }

        Self {
            flag_sets,
            flag_set_counts,
            free,
            index,
        }
    }
}

impl From<FlagSlotTable> for FlagSlotRepr {
    fn from(table: FlagSlotTable) -> Self {
        Self {
            flag_sets: table.flag_sets,
            flag_set_counts: table.flag_set_counts,
        }
    }
}

/// Sort the flags and serialize them into the key stored in the table
pub fn normalize_flags(flags: &[String]) -> String {
    let mut sorted: Vec<&str> = flags.iter().map(String::as_str).collect();
    sorted.sort_unstable();
    sorted.dedup();
    serde_json::to_string(&sorted).unwrap_or_default()
}

impl FlagSlotTable {
    /// Find the slot for `flags`, allocating one if needed.
    ///
    /// Never touches the counts; callers pair this with [`Self::incr`].
    pub fn find_slot(&mut self, flags: &[String]) -> usize {
        let norm = normalize_flags(flags);
        if let Some(&slot) = self.index.get(&norm) {
            return slot;
        }
        self.allocate(norm)
    }

    fn allocate(&mut self, norm: String) -> usize {
        let slot = match self.free.pop_first() {
            Some(slot) => {
                self.flag_sets[slot] = Some(norm.clone());
                self.flag_set_counts[slot] = 0;
                slot
            }
            None => {
                self.flag_sets.push(Some(norm.clone()));
                self.flag_set_counts.push(0);
                self.flag_sets.len() - 1
            }
        };
        self.index.insert(norm, slot);
        slot
    }

    pub fn incr(&mut self, slot: usize) {
        match self.flag_set_counts.get_mut(slot) {
            Some(count) => *count += 1,
            None => warn!("Increment of unknown flag slot {}", slot),
        }
    }

    pub fn decr(&mut self, slot: usize) {
        let Some(count) = self.flag_set_counts.get_mut(slot) else {
            warn!("Decrement of unknown flag slot {}", slot);
            return;
        };
        if *count <= 0 {
            warn!("Flag slot {} reference count would go negative", slot);
            return;
        }
        *count -= 1;
        if *count == 0 {
            if let Some(norm) = self.flag_sets[slot].take() {
                self.index.remove(&norm);
            }
            self.free.insert(slot);
        }
    }

    /// Normalized flag set stored in `slot`, `None` if freed
    pub fn slot_key(&self, slot: usize) -> Option<&str> {
        self.flag_sets.get(slot).and_then(|set| set.as_deref())
    }

    pub fn count(&self, slot: usize) -> i64 {
        self.flag_set_counts.get(slot).copied().unwrap_or(0)
    }

    /// Number of slots, including freed ones
    pub fn len(&self) -> usize {
        self.flag_sets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.flag_sets.is_empty()
    }
}
