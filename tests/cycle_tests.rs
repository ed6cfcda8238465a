//! Integration tests for full polling cycles
//!
//! Each test lays out a fake kernel snapshot, procfs and cgroup tree in a
//! temporary directory and runs the orchestrator against an in-memory
//! runtime.

mod common;

use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use common::{container, FakeRuntime, MemorySink};
use evictd::config::MonitorConfig;
use evictd::cycle::{CycleError, CycleOrchestrator};
use tempfile::TempDir;

struct Fixture {
    dir: TempDir,
}

impl Fixture {
    fn new() -> Self {
        let fixture = Self {
            dir: tempfile::tempdir().unwrap(),
        };
        fs::create_dir_all(fixture.path().join("proc")).unwrap();
        fs::create_dir_all(fixture.path().join("cgroup")).unwrap();
        fixture.write_host_ticks(1000);
        fixture
    }

    fn path(&self) -> &Path {
        self.dir.path()
    }

    fn config(&self) -> MonitorConfig {
        let mut config = MonitorConfig::default();
        config.general.system_snapshot_path = self.path().join("sysinfo");
        config.general.container_snapshot_path = self.path().join("continfo");
        config.sampling.proc_root = self.path().join("proc");
        config.sampling.cgroup_root = self.path().join("cgroup");
        config.thresholds.cpu_percent = 40.0;
        config.thresholds.mem_percent = 40.0;
        config.floors.min_low = 1;
        config.floors.min_high = 1;
        config
    }

    /// Kernel-style output, trailing commas included
    fn write_snapshots(&self, processes: &[(u32, &str, &str, &str)]) {
        let mut records = String::new();
        for (pid, name, cmdline, mem_pct) in processes {
            records.push_str(&format!(
                "    {{ \"pid\": {}, \"name\": \"{}\", \"cmdline\": \"{}\", \"vsz_kb\": 1024, \"rss_kb\": 512, \"mem_pct\": \"{}\" }},\n",
                pid, name, cmdline, mem_pct
            ));
        }
        let system = format!(
            "{{\n  \"mem_total_kb\": 1000,\n  \"mem_free_kb\": 400,\n  \"mem_used_kb\": 600,\n  \"processes\": [\n{}  ],\n}}\n",
            records
        );
        let containers = format!(
            "{{\n  \"mem_total_kb\": 1000,\n  \"mem_free_kb\": 400,\n  \"mem_used_kb\": 600,\n  \"containers\": [\n{}  ],\n}}\n",
            records
        );
        fs::write(self.path().join("sysinfo"), system).unwrap();
        fs::write(self.path().join("continfo"), containers).unwrap();
    }

    fn write_host_ticks(&self, total: u64) {
        // Seven counters, all but one zero, so the sum is `total`
        fs::write(
            self.path().join("proc/stat"),
            format!("cpu  {} 0 0 0 0 0 0 0 0 0\ncpu0 {} 0 0 0 0 0 0 0 0 0\n", total, total),
        )
        .unwrap();
    }

    fn write_process_ticks(&self, pid: u32, utime: u64) {
        let dir = self.path().join(format!("proc/{}", pid));
        fs::create_dir_all(&dir).unwrap();
        fs::write(
            dir.join("stat"),
            format!(
                "{} (stress) R 1 {} {} 0 -1 4194304 0 0 0 0 {} 0 0 0 20 0 1 0 50 1000 10 0\n",
                pid, pid, pid, utime
            ),
        )
        .unwrap();
    }

    fn write_cgroup_usage(&self, id: &str, ns: u64) {
        let dir = self.path().join(format!("cgroup/cpuacct/docker/{}", id));
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join("cpuacct.usage"), format!("{}\n", ns)).unwrap();
    }
}

fn orchestrator(
    config: MonitorConfig,
    runtime: FakeRuntime,
) -> CycleOrchestrator<FakeRuntime, MemorySink> {
    CycleOrchestrator::new(Arc::new(config), runtime, MemorySink::default())
}

/// First cycle: memory breaches act immediately, CPU is cold
#[tokio::test]
async fn test_first_cycle_evicts_on_memory() {
    let fx = Fixture::new();
    fx.write_snapshots(&[
        (100, "sleep", "sleep infinity", "50.00"),
        (200, "sleep", "sleep infinity", "1.00"),
        (300, "stress", "stress --vm 1", "60.00"),
        (
            400,
            "containerd-shim",
            "/usr/bin/containerd-shim-runc-v2 -namespace moby -id ccc -address /run/containerd.sock",
            "0.50",
        ),
    ]);
    fx.write_process_ticks(300, 100);
    let runtime = FakeRuntime::with_containers(vec![
        container("aaa", "low_img:latest", 100),
        container("bbb", "low_img:latest", 200),
        container("ccc", "high_cpu_img:1", 401),
    ]);

    let orch = orchestrator(fx.config(), runtime);
    let summary = orch.run_once().await.unwrap();

    assert_eq!(summary.observed, 4);
    assert_eq!(summary.resolved, 3);
    assert_eq!(summary.host_processes, 4);
    assert_eq!(summary.evicted, vec!["aaa".to_string()]);
    assert_eq!(summary.skipped_unresolved, 1);
    assert_eq!(summary.population_before.low, 2);
    assert_eq!(summary.population_before.high, 1);
    assert_eq!(summary.population_after.low, 1);

    assert_eq!(orch.runtime().terminated(), vec!["aaa".to_string()]);
    let sink = orch.sink();
    assert_eq!(sink.metrics.lock().unwrap().as_slice(), &[(1000, 400, 600)]);
    assert_eq!(sink.process_counts.lock().unwrap().as_slice(), &[4]);
    assert_eq!(sink.evictions(), vec![("aaa".to_string(), "mem 50.00 > 40.00".to_string())]);

    let entities = sink.entities();
    assert_eq!(entities.len(), 4);
    assert!(entities.iter().all(|e| e.3 == 0.0), "cold start reads 0%");
    let unresolved = entities.iter().find(|e| e.1 == 300).unwrap();
    assert_eq!(unresolved.0, "");
    assert_eq!(unresolved.2, "stress --vm 1");
    let shim = entities.iter().find(|e| e.1 == 400).unwrap();
    assert_eq!(shim.0, "ccc");
    assert_eq!(shim.2, "high_cpu_img:1");
}

/// Second cycle: cgroup deltas drive CPU for resolved containers and procfs
/// deltas for unresolved processes
#[tokio::test]
async fn test_second_cycle_measures_cpu() {
    let fx = Fixture::new();
    fx.write_snapshots(&[
        (100, "burn", "burn", "1.00"),
        (300, "stress", "stress --cpu 1", "1.00"),
    ]);
    fx.write_cgroup_usage("hot", 0);
    fx.write_process_ticks(300, 100);
    let mut config = fx.config();
    config.floors.min_high = 0;
    let runtime = FakeRuntime::with_containers(vec![container("hot", "high_cpu_img", 100)]);
    let orch = orchestrator(config, runtime);

    let first = orch.run_once().await.unwrap();
    assert!(first.evicted.is_empty());
    assert_eq!(first.breaches, 0);

    tokio::time::sleep(Duration::from_millis(20)).await;
    // 1000 s of CPU in a few milliseconds of wall time
    fx.write_cgroup_usage("hot", 1_000_000_000_000);
    // 500 of 1000 host ticks
    fx.write_process_ticks(300, 600);
    fx.write_host_ticks(2000);

    let second = orch.run_once().await.unwrap();
    assert_eq!(second.evicted, vec!["hot".to_string()]);
    assert_eq!(second.skipped_unresolved, 1);

    let entities = orch.sink().entities();
    let stress = entities.iter().filter(|e| e.1 == 300).last().unwrap();
    assert!((stress.3 - 50.0).abs() < 1e-9);
}

/// No cgroup counter anywhere: 0% every cycle, history untouched
#[tokio::test]
async fn test_missing_cgroup_reads_zero() {
    let fx = Fixture::new();
    fx.write_snapshots(&[(100, "burn", "burn", "1.00")]);
    let mut config = fx.config();
    config.floors.min_high = 0;
    let runtime = FakeRuntime::with_containers(vec![container("cold", "high_cpu_img", 100)]);
    let orch = orchestrator(config, runtime);

    orch.run_once().await.unwrap();
    orch.run_once().await.unwrap();

    assert!(orch.sink().entities().iter().all(|e| e.3 == 0.0));
    assert!(orch.estimator().sample(100).is_none());
    assert!(orch.runtime().terminated().is_empty());
}

/// Snapshot failure aborts the cycle before the runtime is touched
#[tokio::test]
async fn test_missing_snapshot_aborts_cycle() {
    let fx = Fixture::new();
    let runtime = FakeRuntime::with_containers(vec![container("aaa", "low_img", 100)]);
    let orch = orchestrator(fx.config(), runtime);

    let err = orch.run_once().await.unwrap_err();

    assert!(matches!(err, CycleError::Snapshot(_)));
    assert_eq!(orch.runtime().inspect_calls(), 0);
    assert!(orch.sink().metrics.lock().unwrap().is_empty());
}

/// Runtime unreachable: everything is unresolved and nothing is terminated
#[tokio::test]
async fn test_list_failure_leaves_everything_unresolved() {
    let fx = Fixture::new();
    fx.write_snapshots(&[
        (100, "sleep", "sleep", "90.00"),
        (200, "sleep", "sleep", "90.00"),
    ]);
    let runtime = FakeRuntime {
        fail_list: true,
        ..FakeRuntime::with_containers(vec![
            container("aaa", "low_img", 100),
            container("bbb", "low_img", 200),
        ])
    };
    let mut config = fx.config();
    config.floors.min_low = 0;
    let orch = orchestrator(config, runtime);

    let summary = orch.run_once().await.unwrap();

    assert_eq!(summary.resolved, 0);
    assert_eq!(summary.breaches, 2);
    assert_eq!(summary.skipped_unresolved, 2);
    assert!(orch.runtime().terminated().is_empty());
}

/// Exempt containers are recorded but never evicted
#[tokio::test]
async fn test_exempt_container_survives_cycle() {
    let fx = Fixture::new();
    fx.write_snapshots(&[
        (100, "grafana", "grafana server", "95.00"),
        (200, "sleep", "sleep", "1.00"),
    ]);
    let mut config = fx.config();
    config.floors.min_low = 0;
    let runtime = FakeRuntime::with_containers(vec![
        container("dash", "grafana/grafana:10", 100),
        container("bbb", "low_img", 200),
    ]);
    let orch = orchestrator(config, runtime);

    let summary = orch.run_once().await.unwrap();

    assert_eq!(summary.skipped_exempt, 1);
    assert!(summary.evicted.is_empty());
    assert_eq!(orch.sink().entities().len(), 2);
}

/// Dry run reports the plan without terminating or auditing evictions
#[tokio::test]
async fn test_dry_run_cycle() {
    let fx = Fixture::new();
    fx.write_snapshots(&[
        (100, "sleep", "sleep", "90.00"),
        (200, "sleep", "sleep", "1.00"),
    ]);
    let runtime = FakeRuntime::with_containers(vec![
        container("aaa", "low_img", 100),
        container("bbb", "low_img", 200),
    ]);
    let orch = orchestrator(fx.config(), runtime).with_dry_run(true);

    let summary = orch.run_once().await.unwrap();

    assert!(summary.dry_run);
    assert_eq!(summary.evicted, vec!["aaa".to_string()]);
    assert!(orch.runtime().terminated().is_empty());
    assert!(orch.sink().evictions().is_empty());
}

/// A shim whose container cannot be inspected stays unresolved and inert,
/// while the rest of the cycle resolves normally
#[tokio::test]
async fn test_failed_shim_inspect_is_inert() {
    let fx = Fixture::new();
    fx.write_snapshots(&[
        (100, "sleep", "sleep infinity", "1.00"),
        (400, "containerd-shim", "containerd-shim -namespace moby -id ccc", "90.00"),
    ]);
    let runtime = FakeRuntime {
        fail_inspect: ["ccc".to_string()].into_iter().collect(),
        ..FakeRuntime::with_containers(vec![
            container("aaa", "low_img", 100),
            container("ccc", "high_mem_img", 401),
        ])
    };
    let mut config = fx.config();
    config.floors.min_low = 0;
    config.floors.min_high = 0;
    let orch = orchestrator(config, runtime);

    let summary = orch.run_once().await.unwrap();

    assert_eq!(summary.resolved, 1);
    assert_eq!(summary.breaches, 1);
    assert_eq!(summary.skipped_unresolved, 1);
    assert!(summary.evicted.is_empty());
    assert!(orch.runtime().terminated().is_empty());

    let entities = orch.sink().entities();
    let shim = entities.iter().find(|e| e.1 == 400).unwrap();
    assert_eq!(shim.0, "");
}
