//!
//! In-memory hash index: one per ( table, column ), mapping a column
//! value to the byte offsets of pages whose slotted array holds at least
//! one matching record. Built by a full scan on install, refreshed by
//! the storage engine's mutation paths, gone at process exit.

use crate::value::Value;
use rustc_hash::{FxHashMap, FxHashSet};

/// Hash index over one column.
#[derive(Debug, Default)]
pub struct HashIndex {
    /// Canonical value key -> page byte offsets.
    map: FxHashMap<String, FxHashSet<u64>>,
}

impl HashIndex {
    pub fn new() -> HashIndex {
        HashIndex::default()
    }

    /// Note that `page_off` holds a record with this column value.
    pub fn add(&mut self, val: &Value, page_off: u64) {
        self.map.entry(val.key()).or_default().insert(page_off);
    }

    /// Page offsets that may hold `val`, sorted for deterministic scans.
    pub fn pages_for(&self, val: &Value) -> Vec<u64> {
        let mut offs: Vec<u64> = self
            .map
            .get(&val.key())
            .map(|s| s.iter().copied().collect())
            .unwrap_or_default();
        offs.sort_unstable();
        offs
    }

    /// Re-derive every entry for one page from its current column values.
    /// Called after any mutation of that page.
    pub fn refresh_page(&mut self, page_off: u64, values: &[Value]) {
        self.map.retain(|_, offs| {
            offs.remove(&page_off);
            !offs.is_empty()
        });
        for v in values {
            self.add(v, page_off);
        }
    }

    /// Number of distinct values currently indexed.
    pub fn distinct(&self) -> usize {
        self.map.len()
    }

    /// ( key, offsets ) pairs, for consistency checks.
    pub fn entries(&self) -> impl Iterator<Item = (&String, &FxHashSet<u64>)> {
        self.map.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_and_probe() {
        let mut ix = HashIndex::new();
        ix.add(&Value::Int(1), 4096);
        ix.add(&Value::Int(1), 8192);
        ix.add(&Value::Int(2), 8192);
        assert_eq!(ix.pages_for(&Value::Int(1)), vec![4096, 8192]);
        assert_eq!(ix.pages_for(&Value::Int(2)), vec![8192]);
        assert!(ix.pages_for(&Value::Int(3)).is_empty());
        assert_eq!(ix.distinct(), 2);
    }

    #[test]
    fn probe_matches_predicate_equality() {
        let mut ix = HashIndex::new();
        ix.add(&Value::Str("Alice".into()), 4096);
        assert_eq!(ix.pages_for(&Value::Str("ALICE".into())), vec![4096]);
        ix.add(&Value::Float(5.0), 8192);
        assert_eq!(ix.pages_for(&Value::Int(5)), vec![8192]);
    }

    #[test]
    fn refresh_drops_stale_entries() {
        let mut ix = HashIndex::new();
        ix.add(&Value::Int(1), 4096);
        ix.add(&Value::Int(2), 4096);
        ix.refresh_page(4096, &[Value::Int(2), Value::Int(3)]);
        assert!(ix.pages_for(&Value::Int(1)).is_empty());
        assert_eq!(ix.pages_for(&Value::Int(2)), vec![4096]);
        assert_eq!(ix.pages_for(&Value::Int(3)), vec![4096]);
    }
}
