//! Telemetry domains covered by reconciliation.
//!
//! Each domain fixes its cache namespace, its durable table, and which
//! per-domain cache horizon applies. The comparison strategy lives in
//! `strategy.rs`; this enum is what flows through reports and logs.

use crate::models::SyncSettings;
use serde::Serialize;
use std::fmt;

/// Separator between the tenant uid and the domain namespace in cache keys.
pub const NS_SEPARATOR: &str = ":";

/// One of the four telemetry categories kept consistent across the two stores.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Domain {
    BreakerEvents,
    MeterEvents,
    HighFreqReadings,
    OutageTickets,
}

impl Domain {
    /// All domains, in the order passes are reported.
    pub const ALL: [Domain; 4] = [
        Domain::BreakerEvents,
        Domain::MeterEvents,
        Domain::HighFreqReadings,
        Domain::OutageTickets,
    ];

    /// Cache namespace suffix (the tenant uid is prepended at runtime).
    pub fn namespace(self) -> &'static str {
        match self {
            Domain::BreakerEvents => "feeders:breaker",
            Domain::MeterEvents => "feeders:meter",
            Domain::HighFreqReadings => "feeders:hf",
            Domain::OutageTickets => "feeders:tickets",
        }
    }

    /// Durable-store table name.
    pub fn table(self) -> &'static str {
        match self {
            Domain::BreakerEvents => "breaker_events",
            Domain::MeterEvents => "meter_events",
            Domain::HighFreqReadings => "hf_readings",
            Domain::OutageTickets => "outage_tickets",
        }
    }

    /// Fully-qualified cache namespace for a tenant.
    pub fn cache_namespace(self, tenant_uid: &str) -> String {
        format!("{}{}{}", tenant_uid, NS_SEPARATOR, self.namespace())
    }

    /// The per-domain cache retention horizon from settings, in hours.
    pub fn cache_horizon_hours(self, settings: &SyncSettings) -> i64 {
        match self {
            Domain::BreakerEvents => settings.breaker_cache_hours,
            Domain::MeterEvents => settings.meter_cache_hours,
            Domain::HighFreqReadings => settings.hf_cache_hours,
            Domain::OutageTickets => settings.tickets_cache_hours,
        }
    }
}

impl fmt::Display for Domain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Domain::BreakerEvents => "breaker_events",
            Domain::MeterEvents => "meter_events",
            Domain::HighFreqReadings => "hf_readings",
            Domain::OutageTickets => "outage_tickets",
        };
        write!(f, "{name}")
    }
}
