//! Classify incoming records against the existing-state snapshot.

use std::collections::HashSet;

use crate::migrate::types::Keyed;

/// Result of partitioning one input batch.
#[derive(Debug, Clone, Default)]
pub struct Classified<T> {
    /// Records whose key was absent from the snapshot.
    pub to_insert: Vec<T>,
    /// Records whose key was present. Routed to the update batch
    /// unconditionally: every existing record is re-written on every run
    /// (last write wins), there is no field-level diff.
    pub to_update: Vec<T>,
    /// Records dropped before classification (empty key).
    pub invalid: u64,
}

impl<T> Classified<T> {
    pub fn is_empty(&self) -> bool {
        self.to_insert.is_empty() && self.to_update.is_empty()
    }
}

/// Partition `records` into insert and update batches by key lookup.
///
/// The snapshot is extended in memory as keys are claimed for insertion, so
/// a key that appears twice in the same input produces exactly one insert;
/// later occurrences go to the update batch. Without this the second
/// occurrence would be a duplicate-insert error at persist time.
pub fn classify<T: Keyed>(records: Vec<T>, existing: &HashSet<String>) -> Classified<T> {
    let mut seen: HashSet<String> = existing.clone();
    let mut classified = Classified {
        to_insert: Vec::new(),
        to_update: Vec::new(),
        invalid: 0,
    };

    for record in records {
        let key = record.key().trim();
        if key.is_empty() {
            classified.invalid += 1;
            continue;
        }

        if seen.contains(key) {
            classified.to_update.push(record);
        } else {
            seen.insert(key.to_string());
            classified.to_insert.push(record);
        }
    }

    classified
}
