//! Per-domain reconciliation strategies.
//!
//! A strategy binds one domain's canonical record type to its payload
//! decoder, its durable reader, its comparison strategy, and its two
//! repair directions. The driver is generic over this trait, so the
//! pipeline is written once and monomorphizes per domain.

use crate::recon::canonical::{
    self, BreakerEvent, HfReading, MeterEvent, OutageTicket,
};
use crate::recon::diff::{diff_exact, diff_frames, DiffOutcome};
use crate::recon::domain::Domain;
use crate::recon::repair;
use crate::recon::window::ReconWindow;
use crate::stores::cache::FeederCache;
use crate::stores::durable::TelemetryDb;
use anyhow::Result;
use tracing::debug;

pub(crate) trait DomainStrategy: 'static {
    type Record: Clone + Send + 'static;

    const DOMAIN: Domain;

    /// Expand one cache payload into canonical records.
    fn decode_member(member: &str, score: i64, tenant_id: i64) -> Result<Vec<Self::Record>>;

    /// Read the domain's durable rows for a window, already canonical.
    fn fetch_durable(
        db: &TelemetryDb,
        window: &ReconWindow,
        tenant_id: i64,
    ) -> Result<Vec<Self::Record>>;

    /// The domain's comparison strategy.
    fn diff(cache: Vec<Self::Record>, durable: Vec<Self::Record>) -> DiffOutcome<Self::Record>;

    fn repair_durable(db: &TelemetryDb, rows: &[Self::Record]) -> Result<usize>;

    fn repair_cache(
        cache: &dyn FeederCache,
        namespace: &str,
        rows: &[Self::Record],
    ) -> Result<usize>;
}

/// Windowed cache read shared by every strategy: enumerate feeder keys,
/// scan each sorted set page by page, keep in-window entries, decode.
/// One undecodable payload is skipped and counted, never fatal.
pub(crate) fn read_cache_window<S: DomainStrategy>(
    cache: &dyn FeederCache,
    namespace: &str,
    window: &ReconWindow,
    page_size: usize,
    tenant_id: i64,
) -> Result<(Vec<S::Record>, usize)> {
    let mut records = Vec::new();
    let mut decode_skips = 0usize;

    for key in cache.keys(namespace)? {
        let mut cursor = 0u64;
        loop {
            let (next, page) = cache.zscan(namespace, &key, cursor, page_size)?;
            for entry in page {
                if !window.contains(entry.score) {
                    continue;
                }
                match S::decode_member(&entry.member, entry.score, tenant_id) {
                    Ok(mut expanded) => records.append(&mut expanded),
                    Err(e) => {
                        decode_skips += 1;
                        debug!(
                            "excluding undecodable payload in {namespace}:{key} at score {}: {e:#}",
                            entry.score
                        );
                    }
                }
            }
            if next == 0 {
                break;
            }
            cursor = next;
        }
    }

    Ok((records, decode_skips))
}

pub(crate) struct BreakerStrategy;

impl DomainStrategy for BreakerStrategy {
    type Record = BreakerEvent;

    const DOMAIN: Domain = Domain::BreakerEvents;

    fn decode_member(member: &str, score: i64, tenant_id: i64) -> Result<Vec<BreakerEvent>> {
        canonical::decode_breaker_member(member, score, tenant_id)
    }

    fn fetch_durable(
        db: &TelemetryDb,
        window: &ReconWindow,
        tenant_id: i64,
    ) -> Result<Vec<BreakerEvent>> {
        db.fetch_breaker_window(window, tenant_id)
    }

    fn diff(cache: Vec<BreakerEvent>, durable: Vec<BreakerEvent>) -> DiffOutcome<BreakerEvent> {
        diff_exact(cache, durable)
    }

    fn repair_durable(db: &TelemetryDb, rows: &[BreakerEvent]) -> Result<usize> {
        repair::repair_durable_breaker(db, rows)
    }

    fn repair_cache(
        cache: &dyn FeederCache,
        namespace: &str,
        rows: &[BreakerEvent],
    ) -> Result<usize> {
        repair::repair_cache_breaker(cache, namespace, rows)
    }
}

pub(crate) struct MeterStrategy;

impl DomainStrategy for MeterStrategy {
    type Record = MeterEvent;

    const DOMAIN: Domain = Domain::MeterEvents;

    fn decode_member(member: &str, score: i64, tenant_id: i64) -> Result<Vec<MeterEvent>> {
        canonical::decode_meter_member(member, score, tenant_id)
    }

    fn fetch_durable(
        db: &TelemetryDb,
        window: &ReconWindow,
        tenant_id: i64,
    ) -> Result<Vec<MeterEvent>> {
        db.fetch_meter_window(window, tenant_id)
    }

    fn diff(cache: Vec<MeterEvent>, durable: Vec<MeterEvent>) -> DiffOutcome<MeterEvent> {
        diff_exact(cache, durable)
    }

    fn repair_durable(db: &TelemetryDb, rows: &[MeterEvent]) -> Result<usize> {
        repair::repair_durable_meter(db, rows)
    }

    fn repair_cache(
        cache: &dyn FeederCache,
        namespace: &str,
        rows: &[MeterEvent],
    ) -> Result<usize> {
        repair::repair_cache_meter(cache, namespace, rows)
    }
}

pub(crate) struct HfStrategy;

impl DomainStrategy for HfStrategy {
    type Record = HfReading;

    const DOMAIN: Domain = Domain::HighFreqReadings;

    fn decode_member(member: &str, score: i64, tenant_id: i64) -> Result<Vec<HfReading>> {
        canonical::decode_hf_member(member, score, tenant_id)
    }

    fn fetch_durable(
        db: &TelemetryDb,
        window: &ReconWindow,
        tenant_id: i64,
    ) -> Result<Vec<HfReading>> {
        db.fetch_hf_window(window, tenant_id)
    }

    fn diff(cache: Vec<HfReading>, durable: Vec<HfReading>) -> DiffOutcome<HfReading> {
        diff_frames(cache, durable)
    }

    fn repair_durable(db: &TelemetryDb, rows: &[HfReading]) -> Result<usize> {
        repair::repair_durable_hf(db, rows)
    }

    fn repair_cache(
        cache: &dyn FeederCache,
        namespace: &str,
        rows: &[HfReading],
    ) -> Result<usize> {
        repair::repair_cache_hf(cache, namespace, rows)
    }
}

pub(crate) struct TicketStrategy;

impl DomainStrategy for TicketStrategy {
    type Record = OutageTicket;

    const DOMAIN: Domain = Domain::OutageTickets;

    fn decode_member(member: &str, score: i64, tenant_id: i64) -> Result<Vec<OutageTicket>> {
        canonical::decode_ticket_member(member, score, tenant_id)
    }

    fn fetch_durable(
        db: &TelemetryDb,
        window: &ReconWindow,
        tenant_id: i64,
    ) -> Result<Vec<OutageTicket>> {
        db.fetch_ticket_window(window, tenant_id)
    }

    fn diff(cache: Vec<OutageTicket>, durable: Vec<OutageTicket>) -> DiffOutcome<OutageTicket> {
        diff_exact(cache, durable)
    }

    fn repair_durable(db: &TelemetryDb, rows: &[OutageTicket]) -> Result<usize> {
        repair::repair_durable_ticket(db, rows)
    }

    fn repair_cache(
        cache: &dyn FeederCache,
        namespace: &str,
        rows: &[OutageTicket],
    ) -> Result<usize> {
        repair::repair_cache_ticket(cache, namespace, rows)
    }
}
