//! Canonicalization layer.
//!
//! The two stores hold structurally different representations of the same
//! readings: the cache stores nested per-feeder JSON payloads bundling
//! 1..N time-series elements under one provenance score, the durable
//! store holds one flat row per reading. This module is the only place
//! those shape differences are resolved. Everything downstream (diffing,
//! repair) works on the canonical record types defined here:
//!
//! - identifiers coerce to `String` whether the origin carried a JSON
//!   number or a string
//! - timestamps parse from either origin format, truncate to whole
//!   seconds, and render through one fixed format
//! - numeric fields coerce to `f64` on both paths
//!
//! For any reading present in both stores with no drift, the canonical
//! record derived from the cache must equal the one derived from the
//! durable row. That equality is the correctness contract of the whole
//! engine and is what the round-trip tests pin down.

use anyhow::{bail, Context, Result};
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::hash::{Hash, Hasher};

/// Timestamp format used inside cache payloads.
pub const CACHE_TS_FORMAT: &str = "%Y-%m-%dT%H:%M:%SZ";
/// Timestamp format used by the durable store and the canonical form.
pub const CANONICAL_TS_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

// Accepted input formats, tried in order. Fractional-second variants are
// accepted and truncated; everything is UTC by ingestion convention.
const ACCEPTED_TS_FORMATS: [&str; 4] = [
    "%Y-%m-%dT%H:%M:%SZ",
    "%Y-%m-%dT%H:%M:%S%.fZ",
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%d %H:%M:%S%.f",
];

/// Normalize a timestamp from either origin into the canonical rendering.
pub fn canonical_timestamp(raw: &str) -> Result<String> {
    for format in ACCEPTED_TS_FORMATS {
        if let Ok(ts) = NaiveDateTime::parse_from_str(raw, format) {
            return Ok(ts.format(CANONICAL_TS_FORMAT).to_string());
        }
    }
    bail!("unparseable timestamp {raw:?}")
}

/// Render a canonical timestamp back into the cache payload format.
pub fn cache_timestamp(canonical: &str) -> Result<String> {
    let ts = NaiveDateTime::parse_from_str(canonical, CANONICAL_TS_FORMAT)
        .with_context(|| format!("non-canonical timestamp {canonical:?}"))?;
    Ok(ts.format(CACHE_TS_FORMAT).to_string())
}

// ============================================================================
// Flexible field decoding
// ============================================================================

/// Ingestion writes identifier and numeric fields as JSON numbers or
/// strings depending on the upstream feed; both must decode.
mod flex {
    use serde::{Deserialize, Deserializer};

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum StringOrNumber {
        Text(String),
        Number(serde_json::Number),
    }

    pub fn id_string<'de, D>(deserializer: D) -> Result<String, D::Error>
    where
        D: Deserializer<'de>,
    {
        match StringOrNumber::deserialize(deserializer)? {
            StringOrNumber::Text(s) => Ok(s),
            StringOrNumber::Number(n) => Ok(n.to_string()),
        }
    }

    pub fn float<'de, D>(deserializer: D) -> Result<f64, D::Error>
    where
        D: Deserializer<'de>,
    {
        match StringOrNumber::deserialize(deserializer)? {
            StringOrNumber::Text(s) => s
                .trim()
                .parse::<f64>()
                .map_err(|e| serde::de::Error::custom(format!("bad float {s:?}: {e}"))),
            StringOrNumber::Number(n) => n
                .as_f64()
                .ok_or_else(|| serde::de::Error::custom(format!("bad float {n}"))),
        }
    }
}

// ============================================================================
// Cache payload shapes
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BreakerPayload {
    #[serde(deserialize_with = "flex::id_string")]
    pub feeder_id: String,
    pub time_series: Vec<BreakerEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BreakerEntry {
    pub timestamp_utc: String,
    #[serde(deserialize_with = "flex::id_string")]
    pub value: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MeterPayload {
    #[serde(deserialize_with = "flex::id_string")]
    pub feeder_id: String,
    pub time_series: Vec<MeterEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MeterEntry {
    pub timestamp_utc: String,
    #[serde(deserialize_with = "flex::id_string")]
    pub meter_id: String,
    #[serde(deserialize_with = "flex::id_string")]
    pub event_id: String,
}

/// High-frequency payloads carry the channel id at the payload level: one
/// payload bundles readings for a single channel of a single feeder.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HfPayload {
    #[serde(deserialize_with = "flex::id_string")]
    pub feeder_id: String,
    #[serde(deserialize_with = "flex::id_string")]
    pub channel_id: String,
    pub time_series: Vec<HfEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HfEntry {
    pub timestamp_utc: String,
    #[serde(deserialize_with = "flex::float")]
    pub value: f64,
    #[serde(deserialize_with = "flex::id_string")]
    pub value_string: String,
    #[serde(deserialize_with = "flex::id_string")]
    pub status: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TicketPayload {
    #[serde(deserialize_with = "flex::id_string")]
    pub feeder_id: String,
    pub time_series: Vec<TicketEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TicketEntry {
    #[serde(deserialize_with = "flex::id_string")]
    pub warehouse_ticket_id: String,
    #[serde(deserialize_with = "flex::id_string")]
    pub trouble_ticket_id: String,
    #[serde(deserialize_with = "flex::id_string")]
    pub interruption_type: String,
    #[serde(deserialize_with = "flex::id_string")]
    pub interruption_cause: String,
    #[serde(deserialize_with = "flex::id_string")]
    pub support_code: String,
    #[serde(deserialize_with = "flex::float")]
    pub customer_minutes: f64,
    pub power_off_utc: String,
    pub power_restore_utc: String,
    #[serde(deserialize_with = "flex::id_string")]
    pub repair_action_type: String,
    #[serde(deserialize_with = "flex::id_string")]
    pub repair_action_description: String,
}

// ============================================================================
// Canonical records
// ============================================================================

/// One breaker/status event in comparable form.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct BreakerEvent {
    pub feeder_id: String,
    pub value: String,
    pub timestamp_utc: String,
    pub score: i64,
    pub tenant_id: i64,
}

/// One meter event in comparable form.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct MeterEvent {
    pub feeder_id: String,
    pub meter_id: String,
    pub event_id: String,
    pub timestamp_utc: String,
    pub score: i64,
    pub tenant_id: i64,
}

/// One high-frequency electrical reading in comparable form.
///
/// Carries a float value, so it is compared through the ordered
/// projection-frame strategy rather than set hashing (`diff.rs`).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HfReading {
    pub feeder_id: String,
    pub channel_id: String,
    pub timestamp_utc: String,
    pub value: f64,
    pub value_string: String,
    pub status: String,
    pub score: i64,
    pub tenant_id: i64,
}

/// One outage ticket in comparable form.
#[derive(Debug, Clone, Serialize)]
pub struct OutageTicket {
    pub feeder_id: String,
    pub warehouse_ticket_id: String,
    pub trouble_ticket_id: String,
    pub interruption_type: String,
    pub interruption_cause: String,
    pub support_code: String,
    pub customer_minutes: f64,
    pub power_off_utc: String,
    pub power_restore_utc: String,
    pub repair_action_type: String,
    pub repair_action_description: String,
    pub score: i64,
    pub tenant_id: i64,
}

// `customer_minutes` compares and hashes by bit pattern: both origins
// decode it through f64 and the repair path round-trips it through
// decimal text, which is exact for f64-formatted values.
impl PartialEq for OutageTicket {
    fn eq(&self, other: &Self) -> bool {
        self.feeder_id == other.feeder_id
            && self.warehouse_ticket_id == other.warehouse_ticket_id
            && self.trouble_ticket_id == other.trouble_ticket_id
            && self.interruption_type == other.interruption_type
            && self.interruption_cause == other.interruption_cause
            && self.support_code == other.support_code
            && self.customer_minutes.to_bits() == other.customer_minutes.to_bits()
            && self.power_off_utc == other.power_off_utc
            && self.power_restore_utc == other.power_restore_utc
            && self.repair_action_type == other.repair_action_type
            && self.repair_action_description == other.repair_action_description
            && self.score == other.score
            && self.tenant_id == other.tenant_id
    }
}

impl Eq for OutageTicket {}

impl Hash for OutageTicket {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.feeder_id.hash(state);
        self.warehouse_ticket_id.hash(state);
        self.trouble_ticket_id.hash(state);
        self.interruption_type.hash(state);
        self.interruption_cause.hash(state);
        self.support_code.hash(state);
        self.customer_minutes.to_bits().hash(state);
        self.power_off_utc.hash(state);
        self.power_restore_utc.hash(state);
        self.repair_action_type.hash(state);
        self.repair_action_description.hash(state);
        self.score.hash(state);
        self.tenant_id.hash(state);
    }
}

// ============================================================================
// Payload -> canonical expansion
// ============================================================================

pub fn decode_breaker_member(member: &str, score: i64, tenant_id: i64) -> Result<Vec<BreakerEvent>> {
    let payload: BreakerPayload =
        serde_json::from_str(member).context("breaker payload decode")?;
    payload
        .time_series
        .iter()
        .map(|entry| {
            Ok(BreakerEvent {
                feeder_id: payload.feeder_id.clone(),
                value: entry.value.clone(),
                timestamp_utc: canonical_timestamp(&entry.timestamp_utc)?,
                score,
                tenant_id,
            })
        })
        .collect()
}

pub fn decode_meter_member(member: &str, score: i64, tenant_id: i64) -> Result<Vec<MeterEvent>> {
    let payload: MeterPayload = serde_json::from_str(member).context("meter payload decode")?;
    payload
        .time_series
        .iter()
        .map(|entry| {
            Ok(MeterEvent {
                feeder_id: payload.feeder_id.clone(),
                meter_id: entry.meter_id.clone(),
                event_id: entry.event_id.clone(),
                timestamp_utc: canonical_timestamp(&entry.timestamp_utc)?,
                score,
                tenant_id,
            })
        })
        .collect()
}

pub fn decode_hf_member(member: &str, score: i64, tenant_id: i64) -> Result<Vec<HfReading>> {
    let payload: HfPayload = serde_json::from_str(member).context("hf payload decode")?;
    payload
        .time_series
        .iter()
        .map(|entry| {
            Ok(HfReading {
                feeder_id: payload.feeder_id.clone(),
                channel_id: payload.channel_id.clone(),
                timestamp_utc: canonical_timestamp(&entry.timestamp_utc)?,
                value: entry.value,
                value_string: entry.value_string.clone(),
                status: entry.status.clone(),
                score,
                tenant_id,
            })
        })
        .collect()
}

pub fn decode_ticket_member(member: &str, score: i64, tenant_id: i64) -> Result<Vec<OutageTicket>> {
    let payload: TicketPayload = serde_json::from_str(member).context("ticket payload decode")?;
    payload
        .time_series
        .iter()
        .map(|entry| {
            Ok(OutageTicket {
                feeder_id: payload.feeder_id.clone(),
                warehouse_ticket_id: entry.warehouse_ticket_id.clone(),
                trouble_ticket_id: entry.trouble_ticket_id.clone(),
                interruption_type: entry.interruption_type.clone(),
                interruption_cause: entry.interruption_cause.clone(),
                support_code: entry.support_code.clone(),
                customer_minutes: entry.customer_minutes,
                power_off_utc: canonical_timestamp(&entry.power_off_utc)?,
                power_restore_utc: canonical_timestamp(&entry.power_restore_utc)?,
                repair_action_type: entry.repair_action_type.clone(),
                repair_action_description: entry.repair_action_description.clone(),
                score,
                tenant_id,
            })
        })
        .collect()
}

// ============================================================================
// Canonical -> payload reconstruction (cache-ward repair)
// ============================================================================

pub fn breaker_payload(rows: &[BreakerEvent]) -> Result<BreakerPayload> {
    let first = rows.first().context("empty breaker repair group")?;
    Ok(BreakerPayload {
        feeder_id: first.feeder_id.clone(),
        time_series: rows
            .iter()
            .map(|row| {
                Ok(BreakerEntry {
                    timestamp_utc: cache_timestamp(&row.timestamp_utc)?,
                    value: row.value.clone(),
                })
            })
            .collect::<Result<_>>()?,
    })
}

pub fn meter_payload(rows: &[MeterEvent]) -> Result<MeterPayload> {
    let first = rows.first().context("empty meter repair group")?;
    Ok(MeterPayload {
        feeder_id: first.feeder_id.clone(),
        time_series: rows
            .iter()
            .map(|row| {
                Ok(MeterEntry {
                    timestamp_utc: cache_timestamp(&row.timestamp_utc)?,
                    meter_id: row.meter_id.clone(),
                    event_id: row.event_id.clone(),
                })
            })
            .collect::<Result<_>>()?,
    })
}

pub fn hf_payload(rows: &[HfReading]) -> Result<HfPayload> {
    let first = rows.first().context("empty hf repair group")?;
    Ok(HfPayload {
        feeder_id: first.feeder_id.clone(),
        channel_id: first.channel_id.clone(),
        time_series: rows
            .iter()
            .map(|row| {
                Ok(HfEntry {
                    timestamp_utc: cache_timestamp(&row.timestamp_utc)?,
                    value: row.value,
                    value_string: row.value_string.clone(),
                    status: row.status.clone(),
                })
            })
            .collect::<Result<_>>()?,
    })
}

pub fn ticket_payload(rows: &[OutageTicket]) -> Result<TicketPayload> {
    let first = rows.first().context("empty ticket repair group")?;
    Ok(TicketPayload {
        feeder_id: first.feeder_id.clone(),
        time_series: rows
            .iter()
            .map(|row| {
                Ok(TicketEntry {
                    warehouse_ticket_id: row.warehouse_ticket_id.clone(),
                    trouble_ticket_id: row.trouble_ticket_id.clone(),
                    interruption_type: row.interruption_type.clone(),
                    interruption_cause: row.interruption_cause.clone(),
                    support_code: row.support_code.clone(),
                    customer_minutes: row.customer_minutes,
                    power_off_utc: cache_timestamp(&row.power_off_utc)?,
                    power_restore_utc: cache_timestamp(&row.power_restore_utc)?,
                    repair_action_type: row.repair_action_type.clone(),
                    repair_action_description: row.repair_action_description.clone(),
                })
            })
            .collect::<Result<_>>()?,
    })
}
