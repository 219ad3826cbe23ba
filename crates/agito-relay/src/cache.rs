//! Profile cache with last-writer-wins reconciliation.
//!
//! At most one record per identity key; it is always the one with the
//! highest `last_updated` seen so far. Ties keep the record seen first.

use std::collections::HashMap;

use agito_shared::{IdentityKey, ProfileRecord};

/// Result of offering a candidate record to the cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reconciled {
    /// First record for this key.
    Inserted,
    /// Replaced an older record.
    Replaced { previous: u64 },
    /// Candidate was not newer than the cached record and was dropped.
    Stale { current: u64 },
}

impl Reconciled {
    pub fn accepted(&self) -> bool {
        !matches!(self, Reconciled::Stale { .. })
    }
}

#[derive(Debug, Default)]
pub struct ProfileCache {
    records: HashMap<IdentityKey, ProfileRecord>,
}

impl ProfileCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `candidate` iff no record exists for its key or it is strictly newer.
    /// An accepted candidate wholly replaces the previous record.
    pub fn reconcile(&mut self, candidate: ProfileRecord) -> Reconciled {
        let current = self
            .records
            .get(&candidate.identity_key)
            .map(|existing| existing.last_updated);

        match current {
            Some(current) if candidate.last_updated <= current => Reconciled::Stale { current },
            Some(previous) => {
                self.records.insert(candidate.identity_key, candidate);
                Reconciled::Replaced { previous }
            }
            None => {
                self.records.insert(candidate.identity_key, candidate);
                Reconciled::Inserted
            }
        }
    }

    pub fn get(&self, key: &IdentityKey) -> Option<&ProfileRecord> {
        self.records.get(key)
    }

    pub fn contains(&self, key: &IdentityKey) -> bool {
        self.records.contains_key(key)
    }

    /// All cached records, in arbitrary order.
    pub fn snapshot(&self) -> Vec<ProfileRecord> {
        self.records.values().cloned().collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ProfileRecord> {
        self.records.values()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use agito_shared::ProfileContent;
    use proptest::prelude::*;

    fn key(n: u8) -> IdentityKey {
        IdentityKey([n; 32])
    }

    fn record(k: u8, ts: u64, name: &str) -> ProfileRecord {
        ProfileRecord::from_content(
            key(k),
            ts,
            ProfileContent {
                name: Some(name.to_string()),
                ..Default::default()
            },
        )
    }

    #[test]
    fn test_older_candidate_dropped() {
        let mut cache = ProfileCache::new();
        assert_eq!(cache.reconcile(record(1, 100, "Ana")), Reconciled::Inserted);
        assert_eq!(
            cache.reconcile(record(1, 95, "Old")),
            Reconciled::Stale { current: 100 }
        );

        let cached = cache.get(&key(1)).unwrap();
        assert_eq!(cached.display_name, "Ana");
        assert_eq!(cached.last_updated, 100);
    }

    #[test]
    fn test_newer_candidate_replaces() {
        let mut cache = ProfileCache::new();
        cache.reconcile(record(1, 100, "Ana"));
        assert_eq!(
            cache.reconcile(record(1, 150, "AnaV2")),
            Reconciled::Replaced { previous: 100 }
        );

        let cached = cache.get(&key(1)).unwrap();
        assert_eq!(cached.display_name, "AnaV2");
        assert_eq!(cached.last_updated, 150);
    }

    #[test]
    fn test_tie_keeps_first_seen() {
        let mut cache = ProfileCache::new();
        cache.reconcile(record(1, 100, "First"));
        let outcome = cache.reconcile(record(1, 100, "Second"));
        assert!(!outcome.accepted());
        assert_eq!(cache.get(&key(1)).unwrap().display_name, "First");
    }

    #[test]
    fn test_replacement_does_not_merge_fields() {
        let mut cache = ProfileCache::new();
        let mut with_bio = record(1, 100, "Ana");
        with_bio.bio = Some("old bio".into());
        cache.reconcile(with_bio);
        cache.reconcile(record(1, 200, "Ana"));
        assert!(cache.get(&key(1)).unwrap().bio.is_none());
    }

    #[test]
    fn test_len_counts_distinct_keys() {
        let mut cache = ProfileCache::new();
        cache.reconcile(record(1, 10, "a"));
        cache.reconcile(record(1, 20, "a2"));
        cache.reconcile(record(2, 5, "b"));
        cache.reconcile(record(2, 5, "b-dup"));
        assert_eq!(cache.len(), 2);
        assert_eq!(cache.snapshot().len(), 2);
        assert!(cache.contains(&key(2)));
        assert!(!cache.contains(&key(3)));
    }

    proptest! {
        #[test]
        fn prop_final_state_is_max_timestamp_regardless_of_order(
            mut timestamps in proptest::collection::vec(0u64..50, 1..40),
            seed in any::<u64>(),
        ) {
            // Duplicate part of the stream, then shuffle deterministically.
            let extra: Vec<u64> = timestamps.iter().step_by(3).copied().collect();
            timestamps.extend(extra);
            let len = timestamps.len();
            let mut state = seed;
            for i in (1..len).rev() {
                state = state.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
                let j = (state >> 33) as usize % (i + 1);
                timestamps.swap(i, j);
            }

            let mut cache = ProfileCache::new();
            for ts in &timestamps {
                cache.reconcile(record(7, *ts, &format!("v{ts}")));
            }

            let max = *timestamps.iter().max().unwrap();
            let cached = cache.get(&key(7)).unwrap();
            prop_assert_eq!(cached.last_updated, max);
            prop_assert_eq!(cached.display_name.clone(), format!("v{max}"));
            prop_assert_eq!(cache.len(), 1);
        }
    }
}
