//! Per-cycle view of one observed workload

use crate::runtime::ContainerIdentity;
use crate::snapshot::ProcessRecord;

/// One workload process observed in the current cycle
#[derive(Debug, Clone, PartialEq)]
pub struct Entity {
    pub pid: u32,
    /// Set only when the runtime could name the container
    pub identity: Option<ContainerIdentity>,
    /// Image when resolved, the process command line otherwise
    pub label: String,
    /// Container name when resolved, the process name otherwise
    pub name: String,
    /// Memory share reported by the kernel snapshot
    pub mem_pct: f64,
}

impl Entity {
    pub fn new(process: &ProcessRecord, identity: Option<ContainerIdentity>) -> Self {
        let (label, name) = match &identity {
            Some(c) => (c.image.clone(), c.name.clone()),
            None => (process.cmdline.clone(), process.name.clone()),
        };
        Self {
            pid: process.pid,
            identity,
            label,
            name,
            mem_pct: process.mem_percent(),
        }
    }

    pub fn container_id(&self) -> Option<&str> {
        self.identity.as_ref().map(|c| c.id.as_str())
    }

    pub fn is_resolved(&self) -> bool {
        self.identity.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record() -> ProcessRecord {
        ProcessRecord {
            pid: 10,
            name: "stress".into(),
            cmdline: "stress --vm 1".into(),
            vsz_kb: 0,
            rss_kb: 0,
            mem_pct: "3.50".into(),
            state: None,
        }
    }

    #[test]
    fn test_unresolved_uses_process_fields() {
        let e = Entity::new(&record(), None);
        assert_eq!(e.label, "stress --vm 1");
        assert_eq!(e.name, "stress");
        assert_eq!(e.mem_pct, 3.5);
        assert_eq!(e.container_id(), None);
    }

    #[test]
    fn test_resolved_uses_identity() {
        let identity = ContainerIdentity {
            id: "abc".into(),
            image: "high_mem_img".into(),
            name: "hungry".into(),
            pid: 10,
        };
        let e = Entity::new(&record(), Some(identity));
        assert_eq!(e.label, "high_mem_img");
        assert_eq!(e.name, "hungry");
        assert_eq!(e.container_id(), Some("abc"));
    }
}
