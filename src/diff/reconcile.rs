//! Reconciliation of raw added/removed records into added, updated and
//! removed buckets.
//!
//! Diff sources never report an update directly: a version bump shows up as
//! one `Added` record for the new version and one `Removed` record for the
//! old one. Records are paired by [`DependencyKey`] (name plus canonical
//! ecosystem). A pair with identical versions is still an update, since the
//! manifest position may have moved.

use std::collections::BTreeMap;
use tracing::debug;

use crate::model::{ChangeDirection, DependencyKey, DependencyRecord};

/// Both sides of an updated dependency.
#[derive(Debug, Clone, PartialEq)]
pub struct UpdatedDependency {
    /// Removed-side record (old version)
    pub previous: DependencyRecord,
    /// Added-side record (new version)
    pub current: DependencyRecord,
}

/// Pairwise-disjoint buckets keyed by dependency identity.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReconciliationResult {
    pub added: BTreeMap<DependencyKey, DependencyRecord>,
    pub updated: BTreeMap<DependencyKey, UpdatedDependency>,
    pub removed: BTreeMap<DependencyKey, DependencyRecord>,
}

impl ReconciliationResult {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.updated.is_empty() && self.removed.is_empty()
    }

    /// Total number of distinct dependencies across all buckets.
    pub fn len(&self) -> usize {
        self.added.len() + self.updated.len() + self.removed.len()
    }

    /// Old-side record of an updated dependency.
    pub fn previous_of(&self, key: &DependencyKey) -> Option<&DependencyRecord> {
        self.updated.get(key).map(|u| &u.previous)
    }
}

/// Partitions raw records into added, updated and removed buckets.
///
/// Duplicate keys within one direction collapse with the last record winning.
pub fn reconcile<I>(records: I) -> ReconciliationResult
where
    I: IntoIterator<Item = DependencyRecord>,
{
    let mut added_candidates = BTreeMap::new();
    let mut removed_candidates = BTreeMap::new();

    for record in records {
        let key = record.key();
        let replaced = match record.change_type {
            ChangeDirection::Added => added_candidates.insert(key.clone(), record),
            ChangeDirection::Removed => removed_candidates.insert(key.clone(), record),
        };
        if replaced.is_some() {
            debug!(dependency = %key, "duplicate record collapsed");
        }
    }

    let mut result = ReconciliationResult::default();
    for (key, current) in added_candidates {
        match removed_candidates.remove(&key) {
            Some(previous) => {
                result
                    .updated
                    .insert(key, UpdatedDependency { previous, current });
            }
            None => {
                result.added.insert(key, current);
            }
        }
    }
    result.removed = removed_candidates;

    debug!(
        added = result.added.len(),
        updated = result.updated.len(),
        removed = result.removed.len(),
        "reconciled dependency diff"
    );
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;

    fn added(name: &str, version: &str) -> DependencyRecord {
        DependencyRecord::new(name, "npm", ChangeDirection::Added).with_version(version)
    }

    fn removed(name: &str, version: &str) -> DependencyRecord {
        DependencyRecord::new(name, "npm", ChangeDirection::Removed).with_version(version)
    }

    #[test]
    fn test_empty_input() {
        let result = reconcile(Vec::new());
        assert!(result.is_empty());
        assert_eq!(result.len(), 0);
    }

    #[test]
    fn test_bump_becomes_single_update() {
        let result = reconcile(vec![added("x", "2.0.0"), removed("x", "1.0.0")]);
        let key = DependencyKey::new("npm", "x");

        assert!(result.added.is_empty());
        assert!(result.removed.is_empty());
        let update = &result.updated[&key];
        assert_eq!(update.current.version.as_deref(), Some("2.0.0"));
        assert_eq!(update.previous.version.as_deref(), Some("1.0.0"));
        assert_eq!(
            result.previous_of(&key).and_then(|r| r.version.as_deref()),
            Some("1.0.0")
        );
    }

    #[test]
    fn test_same_version_pair_is_still_updated() {
        let result = reconcile(vec![
            added("x", "1.0.0").with_manifest_path("web/package.json"),
            removed("x", "1.0.0").with_manifest_path("package.json"),
        ]);
        assert_eq!(result.updated.len(), 1);
        assert!(result.added.is_empty());
        assert!(result.removed.is_empty());
    }

    #[test]
    fn test_pairing_uses_canonical_ecosystem() {
        let result = reconcile(vec![
            DependencyRecord::new("requests", "pip", ChangeDirection::Added).with_version("2.31"),
            DependencyRecord::new("requests", "PYPI", ChangeDirection::Removed)
                .with_version("2.28"),
        ]);
        assert_eq!(result.updated.len(), 1);
    }

    #[test]
    fn test_same_name_different_ecosystem_not_paired() {
        let result = reconcile(vec![
            DependencyRecord::new("yaml", "npm", ChangeDirection::Added),
            DependencyRecord::new("yaml", "pypi", ChangeDirection::Removed),
        ]);
        assert_eq!(result.added.len(), 1);
        assert_eq!(result.removed.len(), 1);
        assert!(result.updated.is_empty());
    }

    #[test]
    fn test_duplicate_direction_last_write_wins() {
        let result = reconcile(vec![added("x", "1.0.0"), added("x", "1.1.0")]);
        assert_eq!(result.added.len(), 1);
        assert_eq!(
            result.added[&DependencyKey::new("npm", "x")].version.as_deref(),
            Some("1.1.0")
        );
    }

    #[test]
    fn test_partition_covers_all_keys_disjointly() {
        let input = vec![
            added("a", "1"),
            removed("a", "0"),
            added("b", "1"),
            removed("c", "1"),
            added("d", "2"),
            added("d", "3"),
            removed("e", "1"),
            removed("e", "1"),
        ];
        let expected: BTreeSet<DependencyKey> = input.iter().map(|r| r.key()).collect();

        let result = reconcile(input);
        let added: BTreeSet<_> = result.added.keys().cloned().collect();
        let updated: BTreeSet<_> = result.updated.keys().cloned().collect();
        let removed: BTreeSet<_> = result.removed.keys().cloned().collect();

        assert!(added.is_disjoint(&updated));
        assert!(added.is_disjoint(&removed));
        assert!(updated.is_disjoint(&removed));

        let union: BTreeSet<_> = added.union(&updated).chain(removed.iter()).cloned().collect();
        assert_eq!(union, expected);
        assert_eq!(result.len(), expected.len());
    }
}
