//! Per-container CPU accounting from the cgroup filesystem
//!
//! Where a container's accounting lives depends on the host: cgroup v1 hosts
//! expose a single nanosecond counter, cgroup v2 hosts expose a multi-line
//! `cpu.stat`, and the directory layout depends on the cgroup driver.
//!
//! ```text
//! /sys/fs/cgroup/
//! ├── cpuacct/docker/{id}/cpuacct.usage          ← v1: "123456789\n" (ns)
//! ├── system.slice/docker-{id}.scope/cpu.stat    ← v2, systemd driver
//! └── docker/{id}/cpu.stat                       ← v2, cgroupfs driver
//!                                                   "usage_usec 1234\n..."
//! ```
//!
//! [`CgroupReader`] walks an ordered list of path templates and returns the
//! first counter that parses.

use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use tracing::trace;

/// Placeholder for the container id inside a path template
pub const ID_PLACEHOLDER: &str = "{id}";

/// Counters from a unified-hierarchy `cpu.stat`
#[derive(Debug, Default, Clone, PartialEq)]
pub struct CpuStats {
    /// Total CPU time consumed (microseconds)
    pub usage_usec: u64,
    /// Total CPU time consumed (nanoseconds); only some kernels report it
    pub usage_nsec: Option<u64>,
    /// User-mode CPU time (microseconds)
    pub user_usec: u64,
    /// Kernel-mode CPU time (microseconds)
    pub system_usec: u64,
    /// Number of times the cgroup was throttled
    pub nr_throttled: u64,
    /// Total time spent throttled (microseconds)
    pub throttled_usec: u64,
}

impl CpuStats {
    /// Cumulative usage in nanoseconds, preferring the native ns counter
    pub fn usage_ns(&self) -> u64 {
        self.usage_nsec
            .unwrap_or_else(|| self.usage_usec.saturating_mul(1_000))
    }
}

/// Error reading a container's CPU counter
#[derive(Debug)]
pub enum CgroupError {
    /// None of the candidate files existed or parsed
    NoCounter { container_id: String, tried: Vec<PathBuf> },
}

impl fmt::Display for CgroupError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CgroupError::NoCounter { container_id, tried } => write!(
                f,
                "no readable cpu counter for container {} ({} paths tried)",
                container_id,
                tried.len()
            ),
        }
    }
}

impl std::error::Error for CgroupError {}

/// Parse `cpu.stat` (`key value` per line)
pub fn parse_cpu_stat(content: &str) -> CpuStats {
    let mut stats = CpuStats::default();

    for line in content.lines() {
        let parts: Vec<&str> = line.split_whitespace().collect();
        if parts.len() != 2 {
            continue;
        }
        let Ok(value) = parts[1].parse::<u64>() else {
            continue;
        };
        match parts[0] {
            "usage_usec" => stats.usage_usec = value,
            "usage_nsec" => stats.usage_nsec = Some(value),
            "user_usec" => stats.user_usec = value,
            "system_usec" => stats.system_usec = value,
            "nr_throttled" => stats.nr_throttled = value,
            "throttled_usec" => stats.throttled_usec = value,
            _ => {}
        }
    }

    stats
}

/// Cumulative nanoseconds from `cpu.stat`, if it reports usage at all
fn usage_from_cpu_stat(content: &str) -> Option<u64> {
    let reports_usage = content
        .lines()
        .any(|l| l.starts_with("usage_usec ") || l.starts_with("usage_nsec "));
    reports_usage.then(|| parse_cpu_stat(content).usage_ns())
}

/// Single nanosecond value from v1 `cpuacct.usage`
fn usage_from_cpuacct(content: &str) -> Option<u64> {
    content.trim().parse().ok()
}

/// Parse a counter file by its shape: a bare number or `key value` lines
pub fn parse_cpu_counter(content: &str) -> Option<u64> {
    usage_from_cpuacct(content).or_else(|| usage_from_cpu_stat(content))
}

/// Reads cumulative CPU nanoseconds for containers
#[derive(Debug, Clone)]
pub struct CgroupReader {
    /// Usually /sys/fs/cgroup
    root: PathBuf,
    templates: Vec<String>,
}

impl CgroupReader {
    pub fn new(root: impl Into<PathBuf>, templates: Vec<String>) -> Self {
        Self {
            root: root.into(),
            templates,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Candidate files for a container, in probe order
    pub fn candidate_paths(&self, container_id: &str) -> Vec<PathBuf> {
        self.templates
            .iter()
            .map(|t| self.root.join(t.replace(ID_PLACEHOLDER, container_id)))
            .collect()
    }

    /// Cumulative CPU time of a container in nanoseconds
    ///
    /// Unreadable or unparseable candidates are skipped silently; only
    /// exhausting every candidate is an error.
    pub fn cpu_time_ns(&self, container_id: &str) -> Result<u64, CgroupError> {
        let tried = self.candidate_paths(container_id);

        for path in &tried {
            match read_counter(path) {
                Ok(Some(ns)) => return Ok(ns),
                Ok(None) => trace!(path = %path.display(), "counter did not parse"),
                Err(e) => trace!(path = %path.display(), error = %e, "counter unreadable"),
            }
        }

        Err(CgroupError::NoCounter {
            container_id: container_id.to_string(),
            tried,
        })
    }
}

fn read_counter(path: &Path) -> io::Result<Option<u64>> {
    let content = fs::read_to_string(path)?;
    Ok(parse_cpu_counter(&content))
}
