//! Repair execution: directional fill-the-gap writes.
//!
//! Durable-ward repairs map each canonical record 1:1 to a row and lean
//! on the store's natural keys for idempotency. Cache-ward repairs have
//! to rebuild the nested payload shape: records group by the feeder and
//! the original provenance score recovered from the durable row (plus
//! the channel for high-frequency readings, whose payload shape fixes
//! one channel per payload), and the rebuilt payload is filed at that
//! exact score so later windowed reads see it at a stable position.
//! Neither direction ever deletes or overwrites existing data.

use crate::recon::canonical::{
    self, BreakerEvent, HfReading, MeterEvent, OutageTicket,
};
use crate::stores::cache::{FeederCache, ScoredEntry};
use crate::stores::durable::TelemetryDb;
use anyhow::Result;
use std::collections::BTreeMap;
use tracing::debug;

// ============================================================================
// Durable-ward
// ============================================================================

pub fn repair_durable_breaker(db: &TelemetryDb, rows: &[BreakerEvent]) -> Result<usize> {
    if rows.is_empty() {
        return Ok(0);
    }
    debug!(
        "{} breaker events missing in the durable store, inserting",
        rows.len()
    );
    db.insert_breaker_batch(rows)
}

pub fn repair_durable_meter(db: &TelemetryDb, rows: &[MeterEvent]) -> Result<usize> {
    if rows.is_empty() {
        return Ok(0);
    }
    debug!(
        "{} meter events missing in the durable store, inserting",
        rows.len()
    );
    db.insert_meter_batch(rows)
}

pub fn repair_durable_hf(db: &TelemetryDb, rows: &[HfReading]) -> Result<usize> {
    if rows.is_empty() {
        return Ok(0);
    }
    debug!(
        "{} hf readings missing in the durable store, inserting",
        rows.len()
    );
    db.insert_hf_batch(rows)
}

pub fn repair_durable_ticket(db: &TelemetryDb, rows: &[OutageTicket]) -> Result<usize> {
    if rows.is_empty() {
        return Ok(0);
    }
    debug!(
        "{} outage tickets missing in the durable store, inserting",
        rows.len()
    );
    db.insert_ticket_batch(rows)
}

// ============================================================================
// Cache-ward
// ============================================================================

pub fn repair_cache_breaker(
    cache: &dyn FeederCache,
    namespace: &str,
    rows: &[BreakerEvent],
) -> Result<usize> {
    if rows.is_empty() {
        return Ok(0);
    }
    debug!("{} breaker events missing in the cache, inserting", rows.len());

    let mut groups: BTreeMap<(String, i64), Vec<BreakerEvent>> = BTreeMap::new();
    for row in rows {
        groups
            .entry((row.feeder_id.clone(), row.score))
            .or_default()
            .push(row.clone());
    }

    let mut repaired = 0;
    for ((feeder, score), mut group) in groups {
        group.sort_by(|a, b| a.timestamp_utc.cmp(&b.timestamp_utc));
        let member = serde_json::to_string(&canonical::breaker_payload(&group)?)?;
        cache.zadd_batch(namespace, &feeder, &[ScoredEntry { score, member }])?;
        repaired += group.len();
    }
    Ok(repaired)
}

pub fn repair_cache_meter(
    cache: &dyn FeederCache,
    namespace: &str,
    rows: &[MeterEvent],
) -> Result<usize> {
    if rows.is_empty() {
        return Ok(0);
    }
    debug!("{} meter events missing in the cache, inserting", rows.len());

    let mut groups: BTreeMap<(String, i64), Vec<MeterEvent>> = BTreeMap::new();
    for row in rows {
        groups
            .entry((row.feeder_id.clone(), row.score))
            .or_default()
            .push(row.clone());
    }

    let mut repaired = 0;
    for ((feeder, score), mut group) in groups {
        group.sort_by(|a, b| a.timestamp_utc.cmp(&b.timestamp_utc));
        let member = serde_json::to_string(&canonical::meter_payload(&group)?)?;
        cache.zadd_batch(namespace, &feeder, &[ScoredEntry { score, member }])?;
        repaired += group.len();
    }
    Ok(repaired)
}

pub fn repair_cache_hf(
    cache: &dyn FeederCache,
    namespace: &str,
    rows: &[HfReading],
) -> Result<usize> {
    if rows.is_empty() {
        return Ok(0);
    }
    debug!("{} hf readings missing in the cache, inserting", rows.len());

    // One channel per payload, so the channel joins the grouping key.
    let mut groups: BTreeMap<(String, String, i64), Vec<HfReading>> = BTreeMap::new();
    for row in rows {
        groups
            .entry((row.feeder_id.clone(), row.channel_id.clone(), row.score))
            .or_default()
            .push(row.clone());
    }

    let mut repaired = 0;
    for ((feeder, _channel, score), mut group) in groups {
        group.sort_by(|a, b| a.timestamp_utc.cmp(&b.timestamp_utc));
        let member = serde_json::to_string(&canonical::hf_payload(&group)?)?;
        cache.zadd_batch(namespace, &feeder, &[ScoredEntry { score, member }])?;
        repaired += group.len();
    }
    Ok(repaired)
}

pub fn repair_cache_ticket(
    cache: &dyn FeederCache,
    namespace: &str,
    rows: &[OutageTicket],
) -> Result<usize> {
    if rows.is_empty() {
        return Ok(0);
    }
    debug!("{} outage tickets missing in the cache, inserting", rows.len());

    let mut groups: BTreeMap<(String, i64), Vec<OutageTicket>> = BTreeMap::new();
    for row in rows {
        groups
            .entry((row.feeder_id.clone(), row.score))
            .or_default()
            .push(row.clone());
    }

    let mut repaired = 0;
    for ((feeder, score), mut group) in groups {
        group.sort_by(|a, b| {
            a.power_off_utc
                .cmp(&b.power_off_utc)
                .then_with(|| a.warehouse_ticket_id.cmp(&b.warehouse_ticket_id))
        });
        let member = serde_json::to_string(&canonical::ticket_payload(&group)?)?;
        cache.zadd_batch(namespace, &feeder, &[ScoredEntry { score, member }])?;
        repaired += group.len();
    }
    Ok(repaired)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recon::canonical::decode_breaker_member;
    use crate::stores::cache::InMemoryFeederCache;

    fn breaker(feeder: &str, value: &str, ts: &str, score: i64) -> BreakerEvent {
        BreakerEvent {
            feeder_id: feeder.to_string(),
            value: value.to_string(),
            timestamp_utc: ts.to_string(),
            score,
            tenant_id: 1,
        }
    }

    #[test]
    fn cache_repair_groups_by_feeder_and_score() {
        let cache = InMemoryFeederCache::new();
        let rows = vec![
            breaker("42", "OPEN", "2024-01-01 00:00:05", 1704067205),
            breaker("42", "CLOSE", "2024-01-01 00:00:07", 1704067205),
            breaker("42", "OPEN", "2024-01-01 00:10:00", 1704067800),
            breaker("7", "OPEN", "2024-01-01 00:00:05", 1704067205),
        ];

        let repaired = repair_cache_breaker(&cache, "FPL:feeders:breaker", &rows).unwrap();
        assert_eq!(repaired, 4);

        // Feeder 42 gets two payloads (two distinct scores), feeder 7 one.
        let (_, entries) = cache.zscan("FPL:feeders:breaker", "42", 0, 10).unwrap();
        assert_eq!(entries.len(), 2);
        let bundled = decode_breaker_member(&entries[0].member, entries[0].score, 1).unwrap();
        assert_eq!(bundled.len(), 2);
        assert_eq!(entries[0].score, 1704067205);

        let (_, entries) = cache.zscan("FPL:feeders:breaker", "7", 0, 10).unwrap();
        assert_eq!(entries.len(), 1);
    }

    #[test]
    fn cache_repair_preserves_the_original_score() {
        let cache = InMemoryFeederCache::new();
        let rows = vec![breaker("7", "OPEN", "2023-11-14 22:13:20", 1700000000)];

        repair_cache_breaker(&cache, "ns", &rows).unwrap();
        let (_, entries) = cache.zscan("ns", "7", 0, 10).unwrap();
        assert_eq!(entries[0].score, 1700000000);

        // Re-running the same repair does not duplicate the payload.
        repair_cache_breaker(&cache, "ns", &rows).unwrap();
        let (_, entries) = cache.zscan("ns", "7", 0, 10).unwrap();
        assert_eq!(entries.len(), 1);
    }

    #[test]
    fn hf_repair_splits_channels_into_separate_payloads() {
        let cache = InMemoryFeederCache::new();
        let mk = |channel: &str| HfReading {
            feeder_id: "9".to_string(),
            channel_id: channel.to_string(),
            timestamp_utc: "2024-01-01 00:00:01".to_string(),
            value: 1.0,
            value_string: "1".to_string(),
            status: "OK".to_string(),
            score: 1704067201,
            tenant_id: 1,
        };

        repair_cache_hf(&cache, "ns", &[mk("CH1"), mk("CH2")]).unwrap();
        let (_, entries) = cache.zscan("ns", "9", 0, 10).unwrap();
        assert_eq!(entries.len(), 2);
    }

    #[test]
    fn empty_diffs_are_no_ops() {
        let cache = InMemoryFeederCache::new();
        assert_eq!(repair_cache_breaker(&cache, "ns", &[]).unwrap(), 0);
        assert!(cache.is_empty());
    }
}
