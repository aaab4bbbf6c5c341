//! Sorted-set cache seam.
//!
//! The engine only ever touches the cache through the `FeederCache`
//! trait: key enumeration under a namespace, cursor-paginated scans of a
//! per-feeder sorted set, and batched score insertion. The in-memory
//! backend below implements the same semantics the ingestion side relies
//! on (one sorted set per feeder, members unique, re-adding a member
//! updates its score) and doubles as the test double and the snapshot
//! playground for the CLI.

use anyhow::{Context, Result};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::Path;

/// One sorted-set entry: the serialized payload and its epoch-second score.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScoredEntry {
    pub score: i64,
    pub member: String,
}

/// Storage seam for the ephemeral sorted-set cache.
pub trait FeederCache: Send + Sync {
    /// Feeder keys present under a namespace.
    fn keys(&self, namespace: &str) -> Result<Vec<String>>;

    /// One page of a sorted-set scan. `cursor == 0` starts a scan; a
    /// returned cursor of `0` means the scan is complete.
    fn zscan(
        &self,
        namespace: &str,
        key: &str,
        cursor: u64,
        count: usize,
    ) -> Result<(u64, Vec<ScoredEntry>)>;

    /// Insert entries into a feeder's sorted set. Re-adding an existing
    /// member updates its score instead of duplicating. Returns the
    /// number of newly added members.
    fn zadd_batch(&self, namespace: &str, key: &str, entries: &[ScoredEntry]) -> Result<usize>;
}

// ============================================================================
// In-memory backend
// ============================================================================

#[derive(Debug, Default)]
struct SortedSet {
    // Ordered by (score, member); `by_member` enforces member uniqueness.
    ordered: BTreeSet<(i64, String)>,
    by_member: HashMap<String, i64>,
}

impl SortedSet {
    fn add(&mut self, score: i64, member: &str) -> bool {
        match self.by_member.insert(member.to_string(), score) {
            None => {
                self.ordered.insert((score, member.to_string()));
                true
            }
            Some(previous) => {
                if previous != score {
                    self.ordered.remove(&(previous, member.to_string()));
                    self.ordered.insert((score, member.to_string()));
                }
                false
            }
        }
    }
}

/// In-process sorted-set cache backend.
#[derive(Debug, Default)]
pub struct InMemoryFeederCache {
    namespaces: RwLock<HashMap<String, BTreeMap<String, SortedSet>>>,
}

impl InMemoryFeederCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total entry count across all namespaces.
    pub fn len(&self) -> usize {
        self.namespaces
            .read()
            .values()
            .flat_map(|keys| keys.values())
            .map(|set| set.ordered.len())
            .sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Load a JSON snapshot produced by `dump_snapshot` (or by an
    /// operator export) into the cache, merging over existing contents.
    pub fn load_snapshot(&self, path: &Path) -> Result<usize> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read cache snapshot {}", path.display()))?;
        let snapshot: CacheSnapshot = serde_json::from_str(&raw)
            .with_context(|| format!("Failed to parse cache snapshot {}", path.display()))?;

        let mut loaded = 0;
        for (namespace, keys) in &snapshot.namespaces {
            for (key, entries) in keys {
                loaded += self.zadd_batch(namespace, key, entries)?;
            }
        }
        Ok(loaded)
    }

    /// Dump the full cache contents as a JSON snapshot.
    pub fn dump_snapshot(&self, path: &Path) -> Result<()> {
        let snapshot = {
            let namespaces = self.namespaces.read();
            let mut out = CacheSnapshot::default();
            for (namespace, keys) in namespaces.iter() {
                let ns_entry = out.namespaces.entry(namespace.clone()).or_default();
                for (key, set) in keys {
                    ns_entry.insert(
                        key.clone(),
                        set.ordered
                            .iter()
                            .map(|(score, member)| ScoredEntry {
                                score: *score,
                                member: member.clone(),
                            })
                            .collect(),
                    );
                }
            }
            out
        };

        let raw = serde_json::to_string_pretty(&snapshot)?;
        std::fs::write(path, raw)
            .with_context(|| format!("Failed to write cache snapshot {}", path.display()))?;
        Ok(())
    }
}

/// On-disk snapshot shape: namespace -> feeder key -> entries.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct CacheSnapshot {
    pub namespaces: BTreeMap<String, BTreeMap<String, Vec<ScoredEntry>>>,
}

impl FeederCache for InMemoryFeederCache {
    fn keys(&self, namespace: &str) -> Result<Vec<String>> {
        let namespaces = self.namespaces.read();
        Ok(namespaces
            .get(namespace)
            .map(|keys| keys.keys().cloned().collect())
            .unwrap_or_default())
    }

    fn zscan(
        &self,
        namespace: &str,
        key: &str,
        cursor: u64,
        count: usize,
    ) -> Result<(u64, Vec<ScoredEntry>)> {
        let namespaces = self.namespaces.read();
        let Some(set) = namespaces.get(namespace).and_then(|keys| keys.get(key)) else {
            return Ok((0, Vec::new()));
        };

        let offset = cursor as usize;
        let page: Vec<ScoredEntry> = set
            .ordered
            .iter()
            .skip(offset)
            .take(count.max(1))
            .map(|(score, member)| ScoredEntry {
                score: *score,
                member: member.clone(),
            })
            .collect();

        let consumed = offset + page.len();
        let next_cursor = if consumed < set.ordered.len() {
            consumed as u64
        } else {
            0
        };
        Ok((next_cursor, page))
    }

    fn zadd_batch(&self, namespace: &str, key: &str, entries: &[ScoredEntry]) -> Result<usize> {
        let mut namespaces = self.namespaces.write();
        let set = namespaces
            .entry(namespace.to_string())
            .or_default()
            .entry(key.to_string())
            .or_default();

        let mut added = 0;
        for entry in entries {
            if set.add(entry.score, &entry.member) {
                added += 1;
            }
        }
        Ok(added)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(score: i64, member: &str) -> ScoredEntry {
        ScoredEntry {
            score,
            member: member.to_string(),
        }
    }

    #[test]
    fn zadd_deduplicates_members_and_updates_scores() {
        let cache = InMemoryFeederCache::new();

        let added = cache
            .zadd_batch("FPL:feeders:breaker", "42", &[entry(10, "a"), entry(20, "b")])
            .unwrap();
        assert_eq!(added, 2);

        // Same member again at a new score: no new member, score moves.
        let added = cache
            .zadd_batch("FPL:feeders:breaker", "42", &[entry(30, "a")])
            .unwrap();
        assert_eq!(added, 0);
        assert_eq!(cache.len(), 2);

        let (_, page) = cache.zscan("FPL:feeders:breaker", "42", 0, 10).unwrap();
        assert_eq!(page, vec![entry(20, "b"), entry(30, "a")]);
    }

    #[test]
    fn zscan_paginates_until_cursor_returns_zero() {
        let cache = InMemoryFeederCache::new();
        let entries: Vec<ScoredEntry> = (0..25).map(|i| entry(i, &format!("m{i:02}"))).collect();
        cache.zadd_batch("ns", "k", &entries).unwrap();

        let mut cursor = 0;
        let mut collected = Vec::new();
        loop {
            let (next, page) = cache.zscan("ns", "k", cursor, 10).unwrap();
            collected.extend(page);
            if next == 0 {
                break;
            }
            cursor = next;
        }
        assert_eq!(collected, entries);
    }

    #[test]
    fn unknown_namespace_scans_empty() {
        let cache = InMemoryFeederCache::new();
        assert!(cache.keys("nope").unwrap().is_empty());
        let (cursor, page) = cache.zscan("nope", "k", 0, 10).unwrap();
        assert_eq!(cursor, 0);
        assert!(page.is_empty());
    }

    #[test]
    fn snapshot_round_trips() {
        let cache = InMemoryFeederCache::new();
        cache
            .zadd_batch("FPL:feeders:tickets", "7", &[entry(1700000000, "{}")])
            .unwrap();
        cache
            .zadd_batch("FPL:feeders:breaker", "42", &[entry(1704067205, "{}")])
            .unwrap();

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache.json");
        cache.dump_snapshot(&path).unwrap();

        let restored = InMemoryFeederCache::new();
        let loaded = restored.load_snapshot(&path).unwrap();
        assert_eq!(loaded, 2);
        assert_eq!(restored.keys("FPL:feeders:tickets").unwrap(), vec!["7"]);
    }
}
