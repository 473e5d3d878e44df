//! Consumer-side keyed list with the apply rules dashboard pages use.

use std::collections::HashMap;

use crate::reconcile::Delivery;
use crate::record::{merge_present, DomainRecord};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    Inserted,
    Updated,
    Removed,
    /// Delete for a key that was not present
    Ignored,
}

/// Records in insertion order, indexed by primary key.
#[derive(Debug, Clone)]
pub struct LocalCollection<R> {
    records: Vec<R>,
    index: HashMap<i64, usize>,
}

impl<R> Default for LocalCollection<R> {
    fn default() -> Self {
        Self {
            records: Vec::new(),
            index: HashMap::new(),
        }
    }
}

impl<R: DomainRecord> LocalCollection<R> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_records(records: impl IntoIterator<Item = R>) -> Self {
        let mut collection = Self::new();
        collection.replace_all(records);
        collection
    }

    /// Drop local state and load a fresh snapshot.
    pub fn replace_all(&mut self, records: impl IntoIterator<Item = R>) {
        self.records.clear();
        self.index.clear();
        for record in records {
            self.upsert(record);
        }
    }

    /// Insert, or replace in place when the key already exists.
    pub fn upsert(&mut self, record: R) -> ApplyOutcome {
        match self.index.get(&record.key()) {
            Some(&pos) => {
                self.records[pos] = record;
                ApplyOutcome::Updated
            }
            None => {
                self.index.insert(record.key(), self.records.len());
                self.records.push(record);
                ApplyOutcome::Inserted
            }
        }
    }

    pub fn apply(&mut self, delivery: Delivery<R>) -> ApplyOutcome {
        match delivery {
            // A create racing an optimistic local insert updates in place
            Delivery::Created(record) => self.upsert(record),
            Delivery::Updated(update) => {
                let key = update.record.key();
                match self.index.get(&key) {
                    Some(&pos) if update.partial => {
                        self.records[pos] = merge_present(&self.records[pos], &update.record);
                        ApplyOutcome::Updated
                    }
                    _ => self.upsert(update.record),
                }
            }
            Delivery::Deleted(record) => self.remove(record.key()),
        }
    }

    pub fn remove(&mut self, key: i64) -> ApplyOutcome {
        let Some(pos) = self.index.remove(&key) else {
            return ApplyOutcome::Ignored;
        };
        self.records.remove(pos);
        for slot in self.index.values_mut() {
            if *slot > pos {
                *slot -= 1;
            }
        }
        ApplyOutcome::Removed
    }

    pub fn get(&self, key: i64) -> Option<&R> {
        self.index.get(&key).map(|&pos| &self.records[pos])
    }

    pub fn contains(&self, key: i64) -> bool {
        self.index.contains_key(&key)
    }

    pub fn records(&self) -> &[R] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}
