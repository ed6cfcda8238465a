//! evictd - container eviction daemon driven by kernel process snapshots
//!
//! Every polling cycle reads a kernel-module snapshot of container root
//! processes, maps each process to a container, estimates its CPU use,
//! classifies it by image and terminates containers that breach their
//! thresholds, never shrinking a workload group below its floor.
//!
//! # Modules
//!
//! - `snapshot` - Kernel snapshot ingestion (sanitize + parse)
//! - `runtime` - Container runtime interface and the Docker CLI backend
//! - `identity` - Process → container resolution
//! - `cgroups` - Per-container CPU counters from the cgroup filesystem
//! - `estimator` - Stateful CPU utilization from cumulative counters
//! - `policy` - Classification, thresholds, floors and enforcement
//! - `audit` - SQLite audit trail
//! - `cycle` - One polling cycle end to end
//! - `hooks` - Startup/shutdown commands and workload teardown
//! - `metrics` / `dashboard` - Prometheus collectors and the status server
//!
//! # Quick Start
//!
//! ```ignore
//! use std::sync::Arc;
//! use evictd::{CycleOrchestrator, DockerCli, MonitorConfig, SqliteAudit};
//!
//! let config = Arc::new(MonitorConfig::default());
//! let runtime = DockerCli::new("docker", config.runtime.command_timeout());
//! let audit = SqliteAudit::open(&config.audit.database_path)?;
//! let orchestrator = CycleOrchestrator::new(config, runtime, audit);
//! let summary = orchestrator.run_once().await?;
//! ```

pub mod audit;
pub mod cgroups;
pub mod config;
pub mod cycle;
pub mod dashboard;
pub mod entity;
pub mod estimator;
pub mod hooks;
pub mod identity;
pub mod metrics;
pub mod policy;
pub mod runtime;
pub mod snapshot;
pub mod tracing;

// Re-export commonly used types at crate root for convenience
pub use audit::{AuditSink, SqliteAudit};
pub use config::MonitorConfig;
pub use cycle::{CycleError, CycleOrchestrator, CycleSummary};
pub use policy::{Policy, WorkloadClass};
pub use runtime::{ContainerRuntime, DockerCli};
