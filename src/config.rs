//! Daemon configuration (TOML)
//!
//! Every section falls back to its defaults, so a config file only needs to
//! name the values it changes:
//!
//! ```toml
//! [thresholds]
//! cpu_percent = 40.0
//!
//! [floors]
//! min_low = 1
//! ```

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Default kernel-module snapshot of the whole host
pub const DEFAULT_SYSTEM_SNAPSHOT: &str = "/proc/sysinfo_so1_202041390";

/// Default kernel-module snapshot of container root processes
pub const DEFAULT_CONTAINER_SNAPSHOT: &str = "/proc/continfo_so1_202041390";

/// Top-level configuration, built once at startup and shared read-only
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    pub general: GeneralConfig,
    pub thresholds: ThresholdConfig,
    pub floors: FloorConfig,
    pub classes: ClassConfig,
    pub resolver: ResolverConfig,
    pub runtime: RuntimeConfig,
    pub sampling: SamplingConfig,
    pub audit: AuditConfig,
    pub hooks: HooksConfig,
    pub telemetry: TelemetryConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Seconds between polling cycles
    pub interval_secs: u64,
    pub system_snapshot_path: PathBuf,
    pub container_snapshot_path: PathBuf,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            interval_secs: 20,
            system_snapshot_path: PathBuf::from(DEFAULT_SYSTEM_SNAPSHOT),
            container_snapshot_path: PathBuf::from(DEFAULT_CONTAINER_SNAPSHOT),
        }
    }
}

/// How class markers map onto threshold checks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThresholdRule {
    /// Low/unclassified: CPU or MEM. High-CPU: CPU only. High-memory: MEM only.
    PerClass,
    /// Every class breaches on CPU or MEM.
    AnyMetric,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ThresholdConfig {
    pub cpu_percent: f64,
    pub mem_percent: f64,
    pub rule: ThresholdRule,
}

impl Default for ThresholdConfig {
    fn default() -> Self {
        Self {
            cpu_percent: 15.0,
            mem_percent: 10.0,
            rule: ThresholdRule::PerClass,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FloorConfig {
    pub min_low: usize,
    pub min_high: usize,
}

impl Default for FloorConfig {
    fn default() -> Self {
        Self {
            min_low: 3,
            min_high: 2,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassConfig {
    pub low_marker: String,
    pub high_cpu_marker: String,
    pub high_mem_marker: String,
    /// Names/images containing any of these are never evicted
    pub exempt_markers: Vec<String>,
}

impl Default for ClassConfig {
    fn default() -> Self {
        Self {
            low_marker: "low_img".to_string(),
            high_cpu_marker: "high_cpu_img".to_string(),
            high_mem_marker: "high_mem_img".to_string(),
            exempt_markers: vec!["grafana".to_string()],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ResolverConfig {
    /// Process name of the intermediary shim (kernel comm, 15 chars max)
    pub shim_name: String,
    /// Maximum in-flight inspect calls while building the PID map
    pub inspect_concurrency: usize,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            shim_name: "containerd-shim".to_string(),
            inspect_concurrency: 4,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    pub docker_bin: String,
    pub command_timeout_secs: u64,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            docker_bin: "docker".to_string(),
            command_timeout_secs: 10,
        }
    }
}

impl RuntimeConfig {
    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SamplingConfig {
    pub proc_root: PathBuf,
    pub cgroup_root: PathBuf,
    /// Candidate cpu accounting files relative to `cgroup_root`, tried in
    /// order. `{id}` is replaced by the full container id.
    pub cgroup_templates: Vec<String>,
    /// Samples untouched for longer than this many cycles are dropped
    pub max_idle_cycles: u64,
}

impl Default for SamplingConfig {
    fn default() -> Self {
        Self {
            proc_root: PathBuf::from("/proc"),
            cgroup_root: PathBuf::from("/sys/fs/cgroup"),
            cgroup_templates: vec![
                "cpuacct/docker/{id}/cpuacct.usage".to_string(),
                "cpu,cpuacct/docker/{id}/cpuacct.usage".to_string(),
                "system.slice/docker-{id}.scope/cpu.stat".to_string(),
                "docker/{id}/cpu.stat".to_string(),
            ],
            max_idle_cycles: 3,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuditConfig {
    pub database_path: PathBuf,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            database_path: PathBuf::from("./data/monitor.db"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HooksConfig {
    /// Commands run once before the first cycle (argv form)
    pub startup: Vec<Vec<String>>,
    /// Commands run once after the loop exits (argv form)
    pub shutdown: Vec<Vec<String>>,
    /// Terminate every non-exempt container when the daemon exits
    pub stop_workloads_on_exit: bool,
}

impl Default for HooksConfig {
    fn default() -> Self {
        Self {
            startup: Vec::new(),
            shutdown: Vec::new(),
            stop_workloads_on_exit: true,
        }
    }
}

impl HooksConfig {
    /// Whether the exit sweep runs; a dry run never terminates anything
    pub fn stops_workloads(&self, dry_run: bool) -> bool {
        self.stop_workloads_on_exit && !dry_run
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetryConfig {
    /// e.g. "127.0.0.1:9184"; the status server is off when unset
    pub metrics_addr: Option<String>,
    pub otlp_endpoint: Option<String>,
    pub json_logs: bool,
}

/// Error loading or validating configuration
#[derive(Debug)]
pub enum ConfigError {
    Io(std::io::Error),
    Parse(toml::de::Error),
    Invalid(String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::Io(e) => write!(f, "failed to read config: {}", e),
            ConfigError::Parse(e) => write!(f, "failed to parse config: {}", e),
            ConfigError::Invalid(msg) => write!(f, "invalid config: {}", msg),
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<std::io::Error> for ConfigError {
    fn from(e: std::io::Error) -> Self {
        ConfigError::Io(e)
    }
}

impl From<toml::de::Error> for ConfigError {
    fn from(e: toml::de::Error) -> Self {
        ConfigError::Parse(e)
    }
}

impl MonitorConfig {
    /// Load and validate a config file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// Load `path` if it exists, otherwise use defaults
    pub fn load_or_default(path: &Path) -> Result<Self, ConfigError> {
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: MonitorConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.general.interval_secs == 0 {
            return Err(ConfigError::Invalid("general.interval_secs must be > 0".into()));
        }
        let valid = |v: f64| v.is_finite() && v >= 0.0;
        if !valid(self.thresholds.cpu_percent) || !valid(self.thresholds.mem_percent) {
            return Err(ConfigError::Invalid("thresholds must be non-negative numbers".into()));
        }
        if self.sampling.cgroup_templates.is_empty() {
            return Err(ConfigError::Invalid("sampling.cgroup_templates is empty".into()));
        }
        if self.resolver.inspect_concurrency == 0 {
            return Err(ConfigError::Invalid("resolver.inspect_concurrency must be > 0".into()));
        }
        Ok(())
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.general.interval_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_daemon_constants() {
        let config = MonitorConfig::default();
        assert_eq!(config.general.interval_secs, 20);
        assert_eq!(config.thresholds.cpu_percent, 15.0);
        assert_eq!(config.thresholds.mem_percent, 10.0);
        assert_eq!(config.floors.min_low, 3);
        assert_eq!(config.floors.min_high, 2);
        assert_eq!(config.thresholds.rule, ThresholdRule::PerClass);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_file_keeps_other_defaults() {
        let config = MonitorConfig::from_toml(
            r#"
            [thresholds]
            cpu_percent = 40.0
            rule = "any_metric"

            [floors]
            min_low = 1
            "#,
        )
        .unwrap();

        assert_eq!(config.thresholds.cpu_percent, 40.0);
        assert_eq!(config.thresholds.mem_percent, 10.0);
        assert_eq!(config.thresholds.rule, ThresholdRule::AnyMetric);
        assert_eq!(config.floors.min_low, 1);
        assert_eq!(config.floors.min_high, 2);
        assert_eq!(config.classes.exempt_markers, vec!["grafana".to_string()]);
    }

    #[test]
    fn test_workloads_stopped_on_exit_by_default() {
        let hooks = MonitorConfig::default().hooks;
        assert!(hooks.stop_workloads_on_exit);
        assert!(hooks.stops_workloads(false));
        assert!(!hooks.stops_workloads(true));

        let config =
            MonitorConfig::from_toml("[hooks]\nstop_workloads_on_exit = false\n").unwrap();
        assert!(!config.hooks.stops_workloads(false));
    }

    #[test]
    fn test_zero_interval_rejected() {
        let err = MonitorConfig::from_toml("[general]\ninterval_secs = 0\n").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn test_negative_threshold_rejected() {
        let err = MonitorConfig::from_toml("[thresholds]\nmem_percent = -1.0\n").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn test_garbage_is_parse_error() {
        let err = MonitorConfig::from_toml("[thresholds\n").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }
}
