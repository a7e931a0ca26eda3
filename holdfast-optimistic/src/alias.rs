//! Bidirectional temporary-id ↔ server-id table.

use holdfast_types::RecordId;
use std::collections::HashMap;

/// Maps temporary ids to the server ids that replaced them, and back.
///
/// Every id comparison in the manager goes through [`resolve`](Self::resolve)
/// first, so a record is found whether a caller holds its old or new id.
#[derive(Debug, Default, Clone)]
pub struct AliasTable {
    to_real: HashMap<RecordId, RecordId>,
    to_temp: HashMap<RecordId, RecordId>,
}

impl AliasTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records that `temp` is now known as `real`. Chains collapse so a
    /// remapped real id also resolves from the original temporary id, and
    /// the reverse entry then points from `real` to that original id.
    pub fn insert(&mut self, temp: RecordId, real: RecordId) {
        if temp == real {
            return;
        }
        let stale: Vec<RecordId> = self
            .to_real
            .iter()
            .filter(|(_, r)| **r == temp)
            .map(|(t, _)| t.clone())
            .collect();
        for t in stale {
            self.to_real.insert(t, real.clone());
        }
        let origin = self.to_temp.remove(&temp).unwrap_or_else(|| temp.clone());
        self.to_temp.insert(real.clone(), origin);
        self.to_real.insert(temp, real);
    }

    /// Returns the canonical id for `id`.
    pub fn resolve(&self, id: &RecordId) -> RecordId {
        self.to_real.get(id).cloned().unwrap_or_else(|| id.clone())
    }

    /// Returns the temporary id a real id replaced, if any.
    pub fn temporary_for(&self, real: &RecordId) -> Option<&RecordId> {
        self.to_temp.get(real)
    }

    /// Returns true if `a` and `b` name the same record.
    pub fn same(&self, a: &RecordId, b: &RecordId) -> bool {
        self.resolve(a) == self.resolve(b)
    }

    /// Drops every mapping whose real id fails `keep`.
    pub fn retain(&mut self, mut keep: impl FnMut(&RecordId) -> bool) {
        self.to_real.retain(|_, real| keep(real));
        let to_real = &self.to_real;
        self.to_temp.retain(|_, temp| to_real.contains_key(temp));
    }

    pub fn len(&self) -> usize {
        self.to_real.len()
    }

    pub fn is_empty(&self) -> bool {
        self.to_real.is_empty()
    }
}
