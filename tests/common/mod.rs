//! In-memory fakes shared by the integration tests

#![allow(dead_code)]

use std::collections::HashSet;
use std::sync::Mutex;

use evictd::audit::AuditSink;
use evictd::runtime::{ContainerIdentity, ContainerRuntime, RuntimeError};

/// Runtime backed by a fixed container list
#[derive(Default)]
pub struct FakeRuntime {
    pub containers: Vec<ContainerIdentity>,
    pub fail_list: bool,
    pub fail_inspect: HashSet<String>,
    pub fail_terminate: HashSet<String>,
    pub terminated: Mutex<Vec<String>>,
    pub inspected: Mutex<Vec<String>>,
}

impl FakeRuntime {
    pub fn with_containers(containers: Vec<ContainerIdentity>) -> Self {
        Self {
            containers,
            ..Self::default()
        }
    }

    pub fn terminated(&self) -> Vec<String> {
        self.terminated.lock().unwrap().clone()
    }

    pub fn inspect_calls(&self) -> usize {
        self.inspected.lock().unwrap().len()
    }
}

impl ContainerRuntime for FakeRuntime {
    async fn list_active(&self) -> Result<Vec<String>, RuntimeError> {
        if self.fail_list {
            return Err(RuntimeError::Failed {
                command: "ps".into(),
                stderr: "daemon unreachable".into(),
            });
        }
        Ok(self.containers.iter().map(|c| c.id.clone()).collect())
    }

    async fn inspect(&self, id: &str) -> Result<ContainerIdentity, RuntimeError> {
        self.inspected.lock().unwrap().push(id.to_string());
        if self.fail_inspect.contains(id) {
            return Err(RuntimeError::Timeout {
                command: format!("inspect {}", id),
            });
        }
        self.containers
            .iter()
            .find(|c| c.id == id)
            .cloned()
            .ok_or_else(|| RuntimeError::Failed {
                command: format!("inspect {}", id),
                stderr: "No such object".into(),
            })
    }

    async fn terminate(&self, id: &str) -> Result<(), RuntimeError> {
        if self.fail_terminate.contains(id) {
            return Err(RuntimeError::Failed {
                command: format!("rm -f {}", id),
                stderr: "removal in progress".into(),
            });
        }
        self.terminated.lock().unwrap().push(id.to_string());
        Ok(())
    }
}

/// Audit sink that keeps everything in memory
#[derive(Default)]
pub struct MemorySink {
    pub metrics: Mutex<Vec<(u64, u64, u64)>>,
    pub process_counts: Mutex<Vec<usize>>,
    pub entities: Mutex<Vec<(String, u32, String, f64, f64)>>,
    pub evictions: Mutex<Vec<(String, String)>>,
}

impl MemorySink {
    pub fn evictions(&self) -> Vec<(String, String)> {
        self.evictions.lock().unwrap().clone()
    }

    pub fn entities(&self) -> Vec<(String, u32, String, f64, f64)> {
        self.entities.lock().unwrap().clone()
    }
}

impl AuditSink for MemorySink {
    fn record_metric(&self, total_kb: u64, free_kb: u64, used_kb: u64) {
        self.metrics.lock().unwrap().push((total_kb, free_kb, used_kb));
    }

    fn record_process_count(&self, count: usize) {
        self.process_counts.lock().unwrap().push(count);
    }

    fn record_entity(&self, container_id: &str, pid: u32, image: &str, cpu_pct: f64, mem_pct: f64) {
        self.entities.lock().unwrap().push((
            container_id.to_string(),
            pid,
            image.to_string(),
            cpu_pct,
            mem_pct,
        ));
    }

    fn record_eviction(&self, container_id: &str, reason: &str) {
        self.evictions
            .lock()
            .unwrap()
            .push((container_id.to_string(), reason.to_string()));
    }
}

pub fn container(id: &str, image: &str, pid: u32) -> ContainerIdentity {
    ContainerIdentity {
        id: id.to_string(),
        image: image.to_string(),
        name: format!("{}-svc", id),
        pid,
    }
}
