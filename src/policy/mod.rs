//! Eviction policy
//!
//! Runs in two phases each cycle:
//!
//! 1. [`Policy::evaluate`] turns every entity's utilization into a
//!    [`Decision`] with no side effects.
//! 2. [`Policy::enforce`] walks the breaching decisions in order and applies
//!    the gates below, terminating only what survives all of them.
//!
//! ```text
//! breach ──► resolved? ──► exempt? ──► already gone? ──► above floor? ──► terminate
//!              │ no          │ yes        │ yes              │ no            │
//!              ▼             ▼            ▼                  ▼               ▼
//!             skip          skip         skip               skip      count -= 1 on Ok
//! ```
//!
//! Floor counts are taken from the whole decision set before any action and
//! only decrease on a confirmed termination, so one cycle never removes more
//! than `count - floor` containers of a group.

pub mod classifier;

use std::collections::HashSet;
use std::fmt;

use serde::Serialize;
use tracing::{info, warn};

use crate::audit::AuditSink;
use crate::config::{FloorConfig, ThresholdConfig, ThresholdRule};
use crate::entity::Entity;
use crate::metrics::{EVICTIONS_TOTAL, SKIPS_TOTAL, TERMINATE_FAILURES};
use crate::runtime::{ContainerIdentity, ContainerRuntime};

pub use classifier::{Classifier, FloorGroup, WorkloadClass};

/// Outcome of evaluating one entity this cycle
#[derive(Debug, Clone, PartialEq)]
pub struct Decision {
    pub entity: Entity,
    pub class: WorkloadClass,
    pub cpu_pct: f64,
    pub mem_pct: f64,
    pub exceeds: bool,
    /// Which thresholds were crossed; empty when `exceeds` is false
    pub reason: String,
}

/// Why a breaching entity was left alone
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    Unresolved,
    Exempt,
    AlreadyTerminated,
    Floor,
}

impl SkipReason {
    pub fn as_str(self) -> &'static str {
        match self {
            SkipReason::Unresolved => "unresolved",
            SkipReason::Exempt => "exempt",
            SkipReason::AlreadyTerminated => "already_terminated",
            SkipReason::Floor => "floor",
        }
    }
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Live containers per floor group
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Population {
    pub low: usize,
    pub high: usize,
}

impl Population {
    /// Distinct resolved container ids per group
    pub fn count(decisions: &[Decision]) -> Self {
        let mut low = HashSet::new();
        let mut high = HashSet::new();
        for d in decisions {
            if let Some(id) = d.entity.container_id() {
                match d.class.floor_group() {
                    FloorGroup::Low => low.insert(id),
                    FloorGroup::High => high.insert(id),
                };
            }
        }
        Self {
            low: low.len(),
            high: high.len(),
        }
    }

    pub fn get(&self, group: FloorGroup) -> usize {
        match group {
            FloorGroup::Low => self.low,
            FloorGroup::High => self.high,
        }
    }

    fn decrement(&mut self, group: FloorGroup) {
        let slot = match group {
            FloorGroup::Low => &mut self.low,
            FloorGroup::High => &mut self.high,
        };
        *slot = slot.saturating_sub(1);
    }
}

/// A container the policy terminated
#[derive(Debug, Clone, PartialEq)]
pub struct Eviction {
    pub container_id: String,
    pub pid: u32,
    pub class: WorkloadClass,
    pub reason: String,
}

/// Everything [`Policy::enforce`] did in one cycle
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EnforcementReport {
    pub evicted: Vec<Eviction>,
    /// (pid, why) for every breach that was not acted on
    pub skipped: Vec<(u32, SkipReason)>,
    /// Container ids whose terminate call failed
    pub failed: Vec<String>,
    pub population_before: Population,
    pub population_after: Population,
}

impl EnforcementReport {
    pub fn skipped_for(&self, reason: SkipReason) -> usize {
        self.skipped.iter().filter(|(_, r)| *r == reason).count()
    }
}

/// Thresholds, floors and exemptions, fixed for the daemon's lifetime
#[derive(Debug, Clone)]
pub struct Policy {
    thresholds: ThresholdConfig,
    floors: FloorConfig,
    exempt_markers: Vec<String>,
    dry_run: bool,
}

impl Policy {
    pub fn new(thresholds: ThresholdConfig, floors: FloorConfig, exempt_markers: &[String]) -> Self {
        Self {
            thresholds,
            floors,
            exempt_markers: exempt_markers
                .iter()
                .filter(|m| !m.is_empty())
                .map(|m| m.to_lowercase())
                .collect(),
            dry_run: false,
        }
    }

    /// Log would-be evictions instead of terminating anything
    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub fn is_dry_run(&self) -> bool {
        self.dry_run
    }

    fn floor(&self, group: FloorGroup) -> usize {
        match group {
            FloorGroup::Low => self.floors.min_low,
            FloorGroup::High => self.floors.min_high,
        }
    }

    /// True if name or image carries an exemption marker
    pub fn is_exempt(&self, entity: &Entity) -> bool {
        let mut fields = vec![entity.name.as_str(), entity.label.as_str()];
        if let Some(c) = &entity.identity {
            fields.push(c.name.as_str());
            fields.push(c.image.as_str());
        }
        self.matches_exempt(&fields)
    }

    /// Same check against a bare runtime identity
    pub fn is_exempt_identity(&self, identity: &ContainerIdentity) -> bool {
        self.matches_exempt(&[identity.name.as_str(), identity.image.as_str()])
    }

    fn matches_exempt(&self, fields: &[&str]) -> bool {
        let fields: Vec<String> = fields.iter().map(|f| f.to_lowercase()).collect();
        self.exempt_markers
            .iter()
            .any(|m| fields.iter().any(|f| f.contains(m.as_str())))
    }

    /// Compare one entity's utilization against its class thresholds
    pub fn evaluate(&self, entity: Entity, class: WorkloadClass, cpu_pct: f64) -> Decision {
        let mem_pct = entity.mem_pct;
        let cpu_limit = self.thresholds.cpu_percent;
        let mem_limit = self.thresholds.mem_percent;
        let cpu_over = cpu_pct > cpu_limit;
        let mem_over = mem_pct > mem_limit;

        let (check_cpu, check_mem) = match (self.thresholds.rule, class) {
            (ThresholdRule::AnyMetric, _) => (true, true),
            (ThresholdRule::PerClass, WorkloadClass::HighCpu) => (true, false),
            (ThresholdRule::PerClass, WorkloadClass::HighMemory) => (false, true),
            (ThresholdRule::PerClass, WorkloadClass::Low | WorkloadClass::Unclassified) => {
                (true, true)
            }
        };

        let mut reasons = Vec::new();
        if check_cpu && cpu_over {
            reasons.push(format!("cpu {:.2} > {:.2}", cpu_pct, cpu_limit));
        }
        if check_mem && mem_over {
            reasons.push(format!("mem {:.2} > {:.2}", mem_pct, mem_limit));
        }

        Decision {
            entity,
            class,
            cpu_pct,
            mem_pct,
            exceeds: !reasons.is_empty(),
            reason: reasons.join("; "),
        }
    }

    /// Apply the gates to every breaching decision and terminate survivors
    pub async fn enforce<R, S>(&self, decisions: &[Decision], runtime: &R, sink: &S) -> EnforcementReport
    where
        R: ContainerRuntime,
        S: AuditSink + ?Sized,
    {
        let mut population = Population::count(decisions);
        let mut report = EnforcementReport {
            population_before: population,
            ..EnforcementReport::default()
        };
        let mut terminated: HashSet<String> = HashSet::new();

        for decision in decisions.iter().filter(|d| d.exceeds) {
            let entity = &decision.entity;

            let Some(container_id) = entity.container_id() else {
                info!(pid = entity.pid, reason = %decision.reason, "breach on unresolved process, cannot act");
                skip(&mut report, entity.pid, SkipReason::Unresolved);
                continue;
            };

            if self.is_exempt(entity) {
                info!(container = %container_id, name = %entity.name, "exempt container over threshold, leaving it");
                skip(&mut report, entity.pid, SkipReason::Exempt);
                continue;
            }

            if terminated.contains(container_id) {
                skip(&mut report, entity.pid, SkipReason::AlreadyTerminated);
                continue;
            }

            let group = decision.class.floor_group();
            let floor = self.floor(group);
            let live = population.get(group);
            if live <= floor {
                info!(
                    container = %container_id,
                    group = group.as_str(),
                    live,
                    floor,
                    "would evict but population is at its floor"
                );
                skip(&mut report, entity.pid, SkipReason::Floor);
                continue;
            }

            if self.dry_run {
                info!(
                    container = %container_id,
                    class = %decision.class,
                    reason = %decision.reason,
                    "dry run: would evict container"
                );
            } else {
                info!(
                    container = %container_id,
                    class = %decision.class,
                    cpu = decision.cpu_pct,
                    mem = decision.mem_pct,
                    reason = %decision.reason,
                    "evicting container"
                );
                if let Err(e) = runtime.terminate(container_id).await {
                    warn!(container = %container_id, error = %e, "failed to evict container");
                    TERMINATE_FAILURES.inc();
                    report.failed.push(container_id.to_string());
                    continue;
                }
                sink.record_eviction(container_id, &decision.reason);
                EVICTIONS_TOTAL.with_label_values(&[decision.class.as_str()]).inc();
            }

            population.decrement(group);
            terminated.insert(container_id.to_string());
            report.evicted.push(Eviction {
                container_id: container_id.to_string(),
                pid: entity.pid,
                class: decision.class,
                reason: decision.reason.clone(),
            });
        }

        report.population_after = population;
        report
    }
}

fn skip(report: &mut EnforcementReport, pid: u32, reason: SkipReason) {
    SKIPS_TOTAL.with_label_values(&[reason.as_str()]).inc();
    report.skipped.push((pid, reason));
}
