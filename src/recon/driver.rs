//! Reconciliation driver.
//!
//! One invocation runs each telemetry domain through the same pipeline:
//! derive the window, read both stores concurrently, join, diff, then
//! apply the two repair directions. Domains are isolated from each
//! other: a fault marks that domain `Failed` in the run report and the
//! remaining domains still run. Within a domain the two repair
//! directions are isolated the same way.
//!
//! The engine holds no state between invocations; overlapping runs are
//! tolerated because every repair is an additive, idempotent insert.

use crate::models::SyncSettings;
use crate::recon::domain::Domain;
use crate::recon::strategy::{
    read_cache_window, BreakerStrategy, DomainStrategy, HfStrategy, MeterStrategy,
    TicketStrategy,
};
use crate::recon::window::ReconWindow;
use crate::stores::cache::FeederCache;
use crate::stores::durable::TelemetryDb;
use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Which of the two stores a fault came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StoreKind {
    Cache,
    Durable,
}

impl fmt::Display for StoreKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreKind::Cache => write!(f, "cache"),
            StoreKind::Durable => write!(f, "durable store"),
        }
    }
}

/// Faults that end a domain pass (or one repair direction of it).
/// Decode failures are not here: they are skip-counted during the scan.
#[derive(Debug, Error)]
pub enum SyncFault {
    #[error("{store} read failed: {source}")]
    Read {
        store: StoreKind,
        #[source]
        source: anyhow::Error,
    },
    #[error("{store} write failed: {source}")]
    Write {
        store: StoreKind,
        #[source]
        source: anyhow::Error,
    },
    #[error("domain pass exceeded the {0}s deadline")]
    Deadline(u64),
}

/// Outcome of one domain pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", content = "cause", rename_all = "snake_case")]
pub enum DomainStatus {
    Ok,
    Failed(String),
}

#[derive(Debug, Clone, Serialize)]
pub struct DomainReport {
    pub domain: Domain,
    pub cache_records: usize,
    pub durable_rows: usize,
    pub decode_skips: usize,
    pub repaired_into_durable: usize,
    pub repaired_into_cache: usize,
    pub status: DomainStatus,
}

impl DomainReport {
    fn new(domain: Domain) -> Self {
        Self {
            domain,
            cache_records: 0,
            durable_rows: 0,
            decode_skips: 0,
            repaired_into_durable: 0,
            repaired_into_cache: 0,
            status: DomainStatus::Ok,
        }
    }

    fn fail(mut self, fault: SyncFault) -> Self {
        warn!("{}: {fault}", self.domain);
        self.status = DomainStatus::Failed(fault.to_string());
        self
    }

    #[inline]
    pub fn is_ok(&self) -> bool {
        self.status == DomainStatus::Ok
    }
}

/// What one reconciliation invocation did, per domain.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub run_id: Uuid,
    pub tenant_id: i64,
    pub tenant_uid: String,
    pub started_utc: DateTime<Utc>,
    pub finished_utc: DateTime<Utc>,
    pub domains: Vec<DomainReport>,
}

impl RunReport {
    pub fn all_ok(&self) -> bool {
        self.domains.iter().all(DomainReport::is_ok)
    }

    /// Total records repaired across domains and directions.
    pub fn total_repaired(&self) -> usize {
        self.domains
            .iter()
            .map(|d| d.repaired_into_durable + d.repaired_into_cache)
            .sum()
    }
}

/// The reconciliation engine for one tenant.
#[derive(Clone)]
pub struct Reconciler {
    cache: Arc<dyn FeederCache>,
    db: Arc<TelemetryDb>,
    settings: SyncSettings,
    tenant_id: i64,
    tenant_uid: String,
}

impl Reconciler {
    /// Construction resolves the tenant uid (the cache namespace prefix)
    /// from the durable store and fails for an unknown tenant.
    pub fn new(
        cache: Arc<dyn FeederCache>,
        db: Arc<TelemetryDb>,
        settings: SyncSettings,
        tenant_id: i64,
    ) -> Result<Self> {
        let tenant_uid = db
            .tenant_uid(tenant_id)
            .context("Failed to resolve tenant uid")?
            .with_context(|| format!("Unknown tenant id {tenant_id}"))?;

        Ok(Self {
            cache,
            db,
            settings,
            tenant_id,
            tenant_uid,
        })
    }

    pub fn tenant_uid(&self) -> &str {
        &self.tenant_uid
    }

    /// Run a full reconciliation pass over all domains.
    pub async fn reconcile(&self) -> RunReport {
        self.reconcile_at(Utc::now()).await
    }

    /// Same as [`reconcile`](Self::reconcile) with a pinned clock.
    pub async fn reconcile_at(&self, now: DateTime<Utc>) -> RunReport {
        let run_id = Uuid::new_v4();
        let started_utc = Utc::now();
        info!(
            "🔄 Reconciliation run {run_id} starting for tenant {} ({})",
            self.tenant_id, self.tenant_uid
        );

        let workers = self.settings.domain_workers.max(1);
        let mut domains: Vec<DomainReport> = Vec::with_capacity(Domain::ALL.len());
        for wave in Domain::ALL.chunks(workers) {
            let mut tasks = JoinSet::new();
            for &domain in wave {
                let engine = self.clone();
                tasks.spawn(async move { engine.run_domain(domain, now).await });
            }
            while let Some(joined) = tasks.join_next().await {
                match joined {
                    Ok(report) => domains.push(report),
                    Err(e) => error!("domain pass task failed to join: {e}"),
                }
            }
        }
        domains.sort_by_key(|r| Domain::ALL.iter().position(|d| *d == r.domain));

        let report = RunReport {
            run_id,
            tenant_id: self.tenant_id,
            tenant_uid: self.tenant_uid.clone(),
            started_utc,
            finished_utc: Utc::now(),
            domains,
        };
        if report.all_ok() {
            info!(
                "✅ Reconciliation run {run_id} complete, {} records repaired",
                report.total_repaired()
            );
        } else {
            warn!("Reconciliation run {run_id} finished with failed domains");
        }
        report
    }

    /// One domain pass under the configured hard deadline.
    async fn run_domain(&self, domain: Domain, now: DateTime<Utc>) -> DomainReport {
        let deadline = Duration::from_secs(self.settings.domain_deadline_secs);
        let pass = async {
            match domain {
                Domain::BreakerEvents => self.domain_pass::<BreakerStrategy>(now).await,
                Domain::MeterEvents => self.domain_pass::<MeterStrategy>(now).await,
                Domain::HighFreqReadings => self.domain_pass::<HfStrategy>(now).await,
                Domain::OutageTickets => self.domain_pass::<TicketStrategy>(now).await,
            }
        };

        match tokio::time::timeout(deadline, pass).await {
            Ok(report) => report,
            Err(_) => DomainReport::new(domain)
                .fail(SyncFault::Deadline(self.settings.domain_deadline_secs)),
        }
    }

    async fn domain_pass<S: DomainStrategy>(&self, now: DateTime<Utc>) -> DomainReport {
        let domain = S::DOMAIN;
        let mut report = DomainReport::new(domain);

        // WINDOWING
        let window = ReconWindow::for_domain(domain, now, &self.settings);
        debug!(
            "{domain}: reconciling scores [{}, {}]",
            window.start_score, window.end_score
        );
        let namespace = domain.cache_namespace(&self.tenant_uid);

        // READING: both stores concurrently, joined before diffing.
        let cache_read = {
            let cache = Arc::clone(&self.cache);
            let namespace = namespace.clone();
            let page_size = self.settings.scan_page_size;
            let tenant_id = self.tenant_id;
            tokio::task::spawn_blocking(move || {
                read_cache_window::<S>(cache.as_ref(), &namespace, &window, page_size, tenant_id)
            })
        };
        let durable_read = {
            let db = Arc::clone(&self.db);
            let tenant_id = self.tenant_id;
            tokio::task::spawn_blocking(move || S::fetch_durable(&db, &window, tenant_id))
        };
        let (cache_joined, durable_joined) = tokio::join!(cache_read, durable_read);

        let (cache_records, decode_skips) = match flatten(cache_joined) {
            Ok(read) => read,
            Err(e) => {
                return report.fail(SyncFault::Read {
                    store: StoreKind::Cache,
                    source: e,
                })
            }
        };
        let durable_rows = match flatten(durable_joined) {
            Ok(rows) => rows,
            Err(e) => {
                return report.fail(SyncFault::Read {
                    store: StoreKind::Durable,
                    source: e,
                })
            }
        };
        report.cache_records = cache_records.len();
        report.durable_rows = durable_rows.len();
        report.decode_skips = decode_skips;

        // DIFFING
        let outcome = S::diff(cache_records, durable_rows);
        if outcome.is_clean() {
            debug!("{domain}: stores are in sync");
            return report;
        }

        // REPAIRING: the two directions are independent and report
        // independently; a fault in one does not block the other.
        let durable_ward = {
            let db = Arc::clone(&self.db);
            let rows = outcome.missing_in_durable;
            tokio::task::spawn_blocking(move || S::repair_durable(&db, &rows))
        };
        let cache_ward = {
            let cache = Arc::clone(&self.cache);
            let namespace = namespace.clone();
            let rows = outcome.missing_in_cache;
            tokio::task::spawn_blocking(move || S::repair_cache(cache.as_ref(), &namespace, &rows))
        };
        let (durable_joined, cache_joined) = tokio::join!(durable_ward, cache_ward);

        let mut causes = Vec::new();
        match flatten(durable_joined) {
            Ok(repaired) => report.repaired_into_durable = repaired,
            Err(e) => {
                let fault = SyncFault::Write {
                    store: StoreKind::Durable,
                    source: e,
                };
                warn!("{domain}: {fault}");
                causes.push(fault.to_string());
            }
        }
        match flatten(cache_joined) {
            Ok(repaired) => report.repaired_into_cache = repaired,
            Err(e) => {
                let fault = SyncFault::Write {
                    store: StoreKind::Cache,
                    source: e,
                };
                warn!("{domain}: {fault}");
                causes.push(fault.to_string());
            }
        }

        if causes.is_empty() {
            debug!(
                "{domain}: synchronized ({} durable-ward, {} cache-ward)",
                report.repaired_into_durable, report.repaired_into_cache
            );
        } else {
            report.status = DomainStatus::Failed(causes.join("; "));
        }
        report
    }
}

fn flatten<T>(joined: Result<Result<T>, tokio::task::JoinError>) -> Result<T> {
    match joined {
        Ok(inner) => inner,
        Err(e) => Err(anyhow!("blocking task failed: {e}")),
    }
}
