//! One polling cycle, end to end
//!
//! ```text
//! system snapshot ──► audit (host memory, process count)
//!        │
//! container snapshot ──► for each process:
//!                            resolve identity
//!                            classify label
//!                            read counter ──► estimate cpu%
//!                            audit entity
//!                        ──► evaluate all ──► enforce ──► end estimator cycle
//! ```
//!
//! Only snapshot failures abort a cycle. Everything after that degrades per
//! entity.

use std::fmt;
use std::sync::Arc;
use std::time::{Instant, SystemTime, UNIX_EPOCH};

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::audit::AuditSink;
use crate::cgroups::CgroupReader;
use crate::config::MonitorConfig;
use crate::estimator::{CounterReading, ProcFs, UtilizationEstimator};
use crate::identity::IdentityResolver;
use crate::metrics::{
    self, CONTAINER_CPU_PERCENT, CONTAINER_MEM_PERCENT, CYCLES_TOTAL, CYCLE_DURATION,
    ENTITIES_OBSERVED, ENTITIES_RESOLVED, POPULATION,
};
use crate::policy::{Classifier, Decision, Policy, Population, SkipReason};
use crate::runtime::ContainerRuntime;
use crate::snapshot::{SnapshotError, SnapshotReader};

pub use crate::entity::Entity;

/// Error that aborts a single cycle
#[derive(Debug)]
pub enum CycleError {
    Snapshot(SnapshotError),
}

impl fmt::Display for CycleError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CycleError::Snapshot(e) => write!(f, "snapshot unavailable: {}", e),
        }
    }
}

impl std::error::Error for CycleError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            CycleError::Snapshot(e) => Some(e),
        }
    }
}

impl From<SnapshotError> for CycleError {
    fn from(e: SnapshotError) -> Self {
        CycleError::Snapshot(e)
    }
}

/// What happened in one completed cycle, served on `/api/status`
#[derive(Debug, Clone, Default, Serialize)]
pub struct CycleSummary {
    /// Unix seconds at cycle start
    pub started_at: u64,
    pub duration_ms: u64,
    pub mem_total_kb: u64,
    pub mem_used_kb: u64,
    pub host_processes: usize,
    pub observed: usize,
    pub resolved: usize,
    pub breaches: usize,
    pub evicted: Vec<String>,
    pub failed: Vec<String>,
    pub skipped_unresolved: usize,
    pub skipped_exempt: usize,
    pub skipped_floor: usize,
    pub population_before: Population,
    pub population_after: Population,
    pub dry_run: bool,
}

/// Owns every per-daemon component and runs cycles against them
pub struct CycleOrchestrator<R, S> {
    config: Arc<MonitorConfig>,
    snapshots: SnapshotReader,
    procfs: ProcFs,
    cgroups: CgroupReader,
    estimator: UtilizationEstimator,
    classifier: Classifier,
    policy: Policy,
    runtime: R,
    sink: S,
}

impl<R, S> CycleOrchestrator<R, S>
where
    R: ContainerRuntime,
    S: AuditSink,
{
    pub fn new(config: Arc<MonitorConfig>, runtime: R, sink: S) -> Self {
        let snapshots = SnapshotReader::new(
            &config.general.system_snapshot_path,
            &config.general.container_snapshot_path,
        );
        let procfs = ProcFs::new(&config.sampling.proc_root);
        let cgroups = CgroupReader::new(
            &config.sampling.cgroup_root,
            config.sampling.cgroup_templates.clone(),
        );
        let estimator = UtilizationEstimator::new(config.sampling.max_idle_cycles);
        let classifier = Classifier::new(&config.classes);
        let policy = Policy::new(
            config.thresholds.clone(),
            config.floors.clone(),
            &config.classes.exempt_markers,
        );

        Self {
            config,
            snapshots,
            procfs,
            cgroups,
            estimator,
            classifier,
            policy,
            runtime,
            sink,
        }
    }

    /// Log would-be evictions instead of terminating
    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.policy = self.policy.with_dry_run(dry_run);
        self
    }

    pub fn policy(&self) -> &Policy {
        &self.policy
    }

    pub fn runtime(&self) -> &R {
        &self.runtime
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    pub fn estimator(&self) -> &UtilizationEstimator {
        &self.estimator
    }

    /// Run one full cycle
    pub async fn run_once(&self) -> Result<CycleSummary, CycleError> {
        let start = Instant::now();
        let result = self.cycle().await;
        CYCLE_DURATION.observe(start.elapsed().as_secs_f64());

        match result {
            Ok(mut summary) => {
                CYCLES_TOTAL.with_label_values(&["ok"]).inc();
                summary.duration_ms = start.elapsed().as_millis() as u64;
                info!(
                    observed = summary.observed,
                    resolved = summary.resolved,
                    breaches = summary.breaches,
                    evicted = summary.evicted.len(),
                    duration_ms = summary.duration_ms,
                    "cycle complete"
                );
                Ok(summary)
            }
            Err(e) => {
                CYCLES_TOTAL.with_label_values(&["aborted"]).inc();
                Err(e)
            }
        }
    }

    async fn cycle(&self) -> Result<CycleSummary, CycleError> {
        let started_at = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);

        let system = self.snapshots.read_system()?;
        self.sink
            .record_metric(system.mem_total_kb, system.mem_free_kb, system.mem_used_kb);
        self.sink.record_process_count(system.processes.len());

        let containers = self.snapshots.read_containers()?;
        debug!(processes = containers.containers.len(), "read container snapshot");

        let resolver = IdentityResolver::build(
            &self.runtime,
            &self.config.resolver.shim_name,
            self.config.resolver.inspect_concurrency,
        )
        .await;

        let host_ticks = match self.procfs.host_ticks() {
            Ok(ticks) => Some(ticks),
            Err(e) => {
                warn!(error = %e, "cannot read host cpu ticks, unresolved processes read 0%");
                None
            }
        };

        metrics::reset_container_gauges();
        let mut decisions: Vec<Decision> = Vec::with_capacity(containers.containers.len());
        for process in &containers.containers {
            let identity = resolver.resolve(&self.runtime, process).await;
            let entity = Entity::new(process, identity);
            let class = self.classifier.classify(&entity.label);
            let cpu_pct = self.cpu_percent(&entity, host_ticks);

            self.sink.record_entity(
                entity.container_id().unwrap_or(""),
                entity.pid,
                &entity.label,
                cpu_pct,
                entity.mem_pct,
            );

            if let Some(id) = entity.container_id() {
                let labels = [metrics::short_id(id), class.as_str()];
                CONTAINER_CPU_PERCENT.with_label_values(&labels).set(cpu_pct);
                CONTAINER_MEM_PERCENT
                    .with_label_values(&labels)
                    .set(entity.mem_pct);
            }

            debug!(
                pid = entity.pid,
                container = entity.container_id().unwrap_or("-"),
                class = %class,
                cpu = cpu_pct,
                mem = entity.mem_pct,
                "sampled entity"
            );
            decisions.push(self.policy.evaluate(entity, class, cpu_pct));
        }

        let resolved = decisions.iter().filter(|d| d.entity.is_resolved()).count();
        ENTITIES_OBSERVED.set(decisions.len() as f64);
        ENTITIES_RESOLVED.set(resolved as f64);

        let report = self.policy.enforce(&decisions, &self.runtime, &self.sink).await;
        POPULATION
            .with_label_values(&["low"])
            .set(report.population_before.low as f64);
        POPULATION
            .with_label_values(&["high"])
            .set(report.population_before.high as f64);

        let pruned = self.estimator.end_cycle();
        if pruned > 0 {
            debug!(pruned, "dropped idle utilization samples");
        }

        Ok(CycleSummary {
            started_at,
            duration_ms: 0,
            mem_total_kb: system.mem_total_kb,
            mem_used_kb: system.mem_used_kb,
            host_processes: system.processes.len(),
            observed: decisions.len(),
            resolved,
            breaches: decisions.iter().filter(|d| d.exceeds).count(),
            skipped_unresolved: report.skipped_for(SkipReason::Unresolved),
            skipped_exempt: report.skipped_for(SkipReason::Exempt),
            skipped_floor: report.skipped_for(SkipReason::Floor),
            evicted: report.evicted.into_iter().map(|e| e.container_id).collect(),
            failed: report.failed,
            population_before: report.population_before,
            population_after: report.population_after,
            dry_run: self.policy.is_dry_run(),
        })
    }

    /// Cgroup wall-clock for resolved entities, procfs host-relative
    /// otherwise. A failed read yields 0.0 and leaves history untouched.
    fn cpu_percent(&self, entity: &Entity, host_ticks: Option<u64>) -> f64 {
        let now = Instant::now();
        let reading = match entity.container_id() {
            Some(id) => match self.cgroups.cpu_time_ns(id) {
                Ok(cumulative_ns) => CounterReading::WallClock { cumulative_ns },
                Err(e) => {
                    warn!(pid = entity.pid, error = %e, "cgroup counter unavailable");
                    return 0.0;
                }
            },
            None => {
                let Some(host_ticks) = host_ticks else {
                    return 0.0;
                };
                match self.procfs.process_ticks(entity.pid) {
                    Ok(process_ticks) => CounterReading::HostRelative {
                        process_ticks,
                        host_ticks,
                    },
                    Err(e) => {
                        warn!(pid = entity.pid, error = %e, "process counter unavailable");
                        return 0.0;
                    }
                }
            }
        };
        self.estimator.estimate(entity.pid, reading, now)
    }
}
