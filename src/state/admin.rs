//! Diffing of admin tables (accounts, bans).
//!
//! Both tables are nested keyed records: outer key is the account username
//! or banned ip, inner keys are attribute names. The diff is purely
//! functional and polymorphic over the key and value types so accounts and
//! bans share one implementation.

use std::collections::BTreeMap;

/// Nested string table as populated from `useraccount`/`userbanned` rows.
pub type Table = BTreeMap<String, BTreeMap<String, String>>;

/// Result of comparing a new snapshot against the previous one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableDiff<K: Ord, I: Ord, V> {
    /// Keys only in the new snapshot, with their full rows.
    pub added: BTreeMap<K, BTreeMap<I, V>>,
    /// Keys in both, carrying only the inner entries whose values differ
    /// (new values).
    pub changed: BTreeMap<K, BTreeMap<I, V>>,
    /// Keys only in the old snapshot, with their full rows.
    pub removed: BTreeMap<K, BTreeMap<I, V>>,
}

impl<K: Ord, I: Ord, V> TableDiff<K, I, V> {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.changed.is_empty() && self.removed.is_empty()
    }
}

/// Compare `new` against `old`.
pub fn diff<K, I, V>(
    new: &BTreeMap<K, BTreeMap<I, V>>,
    old: &BTreeMap<K, BTreeMap<I, V>>,
) -> TableDiff<K, I, V>
where
    K: Ord + Clone,
    I: Ord + Clone,
    V: Eq + Clone,
{
    let mut added = BTreeMap::new();
    let mut changed = BTreeMap::new();
    let mut removed = BTreeMap::new();

    for (key, row) in new {
        let Some(old_row) = old.get(key) else {
            added.insert(key.clone(), row.clone());
            continue;
        };
        let delta: BTreeMap<I, V> = row
            .iter()
            .filter(|(attr, value)| old_row.get(*attr) != Some(value))
            .map(|(attr, value)| (attr.clone(), value.clone()))
            .collect();
        if !delta.is_empty() {
            changed.insert(key.clone(), delta);
        }
    }
    for (key, row) in old {
        if !new.contains_key(key) {
            removed.insert(key.clone(), row.clone());
        }
    }

    TableDiff {
        added,
        changed,
        removed,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn table(rows: &[(&str, &[(&str, &str)])]) -> Table {
        rows.iter().map(|(k, r)| (k.to_string(), row(r))).collect()
    }

    #[test]
    fn identical_tables_diff_empty() {
        let a = table(&[("alice", &[("password", "x"), ("usertype", "admin")])]);
        let d = diff(&a, &a);
        assert!(d.is_empty());
    }

    #[test]
    fn added_changed_removed_partition() {
        let old = table(&[
            ("a", &[("password", "1")]),
            ("b", &[("password", "2"), ("usertype", "default")]),
        ]);
        let new = table(&[
            ("b", &[("password", "9"), ("usertype", "default")]),
            ("c", &[("password", "3")]),
        ]);
        let d = diff(&new, &old);
        assert_eq!(d.added.keys().collect::<Vec<_>>(), ["c"]);
        assert_eq!(d.removed.keys().collect::<Vec<_>>(), ["a"]);
        assert_eq!(d.changed.keys().collect::<Vec<_>>(), ["b"]);
        assert_eq!(d.changed["b"], row(&[("password", "9")]));
    }

    #[test]
    fn every_key_appears_at_most_once() {
        let old = table(&[("x", &[("v", "1")])]);
        let new = table(&[("x", &[("v", "2")])]);
        let d = diff(&new, &old);
        assert!(d.added.is_empty());
        assert!(d.removed.is_empty());
        assert_eq!(d.changed.len(), 1);
    }

    #[test]
    fn inner_key_appearing_only_in_new_counts_as_changed() {
        let old = table(&[("x", &[("v", "1")])]);
        let new = table(&[("x", &[("v", "1"), ("w", "2")])]);
        let d = diff(&new, &old);
        assert_eq!(d.changed["x"], row(&[("w", "2")]));
    }

    #[test]
    fn works_over_non_string_keys() {
        let mut old: BTreeMap<u32, BTreeMap<u8, u8>> = BTreeMap::new();
        old.insert(1, BTreeMap::from([(1u8, 1u8)]));
        let mut new = old.clone();
        new.insert(2, BTreeMap::from([(1u8, 2u8)]));
        let d = diff(&new, &old);
        assert_eq!(d.added.keys().collect::<Vec<_>>(), [&2]);
    }
}
