//! Symmetric difference between the canonicalized store contents.
//!
//! Two strategies:
//!
//! - **Exact-tuple**: canonical records collect into hash sets and the two
//!   one-sided differences fall out of set membership. Used by every
//!   domain whose records are fully hashable.
//! - **Projection-frame**: high-frequency readings carry an `f64` value,
//!   so both collections are sorted by a fixed composite key and swept
//!   pairwise as ordered multisets. Equality is exact on every field,
//!   the float included (bit-level through `total_cmp`); no tolerance is
//!   applied.
//!
//! Both strategies compute the two directions from the same two
//! collections, never re-deriving from raw data, so a record present in
//! both stores can never appear in either direction.

use crate::recon::canonical::HfReading;
use std::cmp::Ordering;
use std::collections::HashSet;
use std::hash::Hash;

/// The two one-sided differences for one domain pass.
#[derive(Debug, Clone, Default)]
pub struct DiffOutcome<T> {
    /// Present in the cache, absent from the durable store.
    pub missing_in_durable: Vec<T>,
    /// Present in the durable store, absent from the cache.
    pub missing_in_cache: Vec<T>,
}

impl<T> DiffOutcome<T> {
    #[inline]
    pub fn is_clean(&self) -> bool {
        self.missing_in_durable.is_empty() && self.missing_in_cache.is_empty()
    }
}

/// Exact-tuple strategy: full-record set membership.
pub fn diff_exact<T>(cache: Vec<T>, durable: Vec<T>) -> DiffOutcome<T>
where
    T: Eq + Hash + Clone,
{
    let cache_set: HashSet<&T> = cache.iter().collect();
    let durable_set: HashSet<&T> = durable.iter().collect();

    // Iterate the source vectors rather than the sets so the output keeps
    // the read order; duplicates within one store collapse as in a set.
    let mut seen_missing_durable: HashSet<&T> = HashSet::new();
    let mut missing_in_durable = Vec::new();
    for record in &cache {
        if !durable_set.contains(record) && seen_missing_durable.insert(record) {
            missing_in_durable.push(record.clone());
        }
    }

    let mut seen_missing_cache: HashSet<&T> = HashSet::new();
    let mut missing_in_cache = Vec::new();
    for record in &durable {
        if !cache_set.contains(record) && seen_missing_cache.insert(record) {
            missing_in_cache.push(record.clone());
        }
    }

    DiffOutcome {
        missing_in_durable,
        missing_in_cache,
    }
}

/// Total order over the projection frame: the fixed composite key first,
/// the float value as the final discriminator.
pub fn frame_cmp(a: &HfReading, b: &HfReading) -> Ordering {
    a.feeder_id
        .cmp(&b.feeder_id)
        .then_with(|| a.timestamp_utc.cmp(&b.timestamp_utc))
        .then_with(|| a.value_string.cmp(&b.value_string))
        .then_with(|| a.status.cmp(&b.status))
        .then_with(|| a.score.cmp(&b.score))
        .then_with(|| a.tenant_id.cmp(&b.tenant_id))
        .then_with(|| a.channel_id.cmp(&b.channel_id))
        .then_with(|| a.value.total_cmp(&b.value))
}

/// Projection-frame strategy: ordered multiset sweep over both frames.
pub fn diff_frames(mut cache: Vec<HfReading>, mut durable: Vec<HfReading>) -> DiffOutcome<HfReading> {
    cache.sort_by(frame_cmp);
    durable.sort_by(frame_cmp);

    let mut missing_in_durable = Vec::new();
    let mut missing_in_cache = Vec::new();

    let (mut i, mut j) = (0, 0);
    while i < cache.len() && j < durable.len() {
        match frame_cmp(&cache[i], &durable[j]) {
            Ordering::Less => {
                missing_in_durable.push(cache[i].clone());
                i += 1;
            }
            Ordering::Greater => {
                missing_in_cache.push(durable[j].clone());
                j += 1;
            }
            Ordering::Equal => {
                i += 1;
                j += 1;
            }
        }
    }
    missing_in_durable.extend(cache[i..].iter().cloned());
    missing_in_cache.extend(durable[j..].iter().cloned());

    DiffOutcome {
        missing_in_durable,
        missing_in_cache,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recon::canonical::BreakerEvent;

    fn breaker(feeder: &str, value: &str, ts: &str, score: i64) -> BreakerEvent {
        BreakerEvent {
            feeder_id: feeder.to_string(),
            value: value.to_string(),
            timestamp_utc: ts.to_string(),
            score,
            tenant_id: 1,
        }
    }

    fn hf(feeder: &str, ts: &str, value: f64, score: i64) -> HfReading {
        HfReading {
            feeder_id: feeder.to_string(),
            channel_id: "CH1".to_string(),
            timestamp_utc: ts.to_string(),
            value,
            value_string: format!("{value}"),
            status: "OK".to_string(),
            score,
            tenant_id: 1,
        }
    }

    #[test]
    fn exact_diff_is_symmetric_and_disjoint() {
        let shared = breaker("42", "OPEN", "2024-01-01 00:00:05", 1704067205);
        let cache_only = breaker("42", "CLOSE", "2024-01-01 00:10:00", 1704067800);
        let durable_only = breaker("7", "OPEN", "2024-01-01 00:20:00", 1704068400);

        let outcome = diff_exact(
            vec![shared.clone(), cache_only.clone()],
            vec![shared.clone(), durable_only.clone()],
        );

        assert_eq!(outcome.missing_in_durable, vec![cache_only]);
        assert_eq!(outcome.missing_in_cache, vec![durable_only]);
        // The shared record appears in neither direction.
        assert!(!outcome.missing_in_durable.contains(&shared));
        assert!(!outcome.missing_in_cache.contains(&shared));
    }

    #[test]
    fn exact_diff_collapses_duplicates_within_one_store() {
        let record = breaker("42", "OPEN", "2024-01-01 00:00:05", 1704067205);
        let outcome = diff_exact(vec![record.clone(), record.clone()], Vec::new());
        assert_eq!(outcome.missing_in_durable.len(), 1);
    }

    #[test]
    fn identical_stores_produce_a_clean_diff() {
        let rows = vec![
            breaker("1", "OPEN", "2024-01-01 00:00:01", 1704067201),
            breaker("2", "CLOSE", "2024-01-01 00:00:02", 1704067202),
        ];
        assert!(diff_exact(rows.clone(), rows).is_clean());
    }

    #[test]
    fn frame_diff_is_order_independent() {
        let a = hf("1", "2024-01-01 00:00:01", 1.0, 1704067201);
        let b = hf("1", "2024-01-01 00:00:02", 2.0, 1704067202);
        let c = hf("2", "2024-01-01 00:00:03", 3.0, 1704067203);

        // Same multiset, different row order on each side.
        let outcome = diff_frames(
            vec![c.clone(), a.clone(), b.clone()],
            vec![b.clone(), c.clone(), a.clone()],
        );
        assert!(outcome.is_clean());
    }

    #[test]
    fn frame_diff_distinguishes_float_values_exactly() {
        let lhs = hf("1", "2024-01-01 00:00:01", 1.0, 1704067201);
        let mut rhs = lhs.clone();
        rhs.value = 1.0 + f64::EPSILON;

        let outcome = diff_frames(vec![lhs.clone()], vec![rhs.clone()]);
        assert_eq!(outcome.missing_in_durable, vec![lhs]);
        assert_eq!(outcome.missing_in_cache, vec![rhs]);
    }

    #[test]
    fn frame_diff_handles_one_sided_tails() {
        let a = hf("1", "2024-01-01 00:00:01", 1.0, 1704067201);
        let b = hf("9", "2024-01-01 00:00:09", 9.0, 1704067209);

        let outcome = diff_frames(vec![a.clone(), b.clone()], vec![a.clone()]);
        assert_eq!(outcome.missing_in_durable, vec![b]);
        assert!(outcome.missing_in_cache.is_empty());
    }
}
