//! Workload classes from image naming conventions

use std::fmt;

use crate::config::ClassConfig;

/// Coarse workload category
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WorkloadClass {
    Low,
    HighCpu,
    HighMemory,
    Unclassified,
}

/// Which population floor a class is counted against
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FloorGroup {
    Low,
    High,
}

impl WorkloadClass {
    pub fn floor_group(self) -> FloorGroup {
        match self {
            WorkloadClass::HighCpu | WorkloadClass::HighMemory => FloorGroup::High,
            WorkloadClass::Low | WorkloadClass::Unclassified => FloorGroup::Low,
        }
    }

    /// Stable label for logs and metrics
    pub fn as_str(self) -> &'static str {
        match self {
            WorkloadClass::Low => "low",
            WorkloadClass::HighCpu => "high_cpu",
            WorkloadClass::HighMemory => "high_mem",
            WorkloadClass::Unclassified => "unclassified",
        }
    }
}

impl fmt::Display for WorkloadClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FloorGroup {
    pub fn as_str(self) -> &'static str {
        match self {
            FloorGroup::Low => "low",
            FloorGroup::High => "high",
        }
    }
}

/// Case-insensitive substring classifier
#[derive(Debug, Clone)]
pub struct Classifier {
    low: String,
    high_cpu: String,
    high_mem: String,
}

impl Classifier {
    pub fn new(classes: &ClassConfig) -> Self {
        Self {
            low: classes.low_marker.to_lowercase(),
            high_cpu: classes.high_cpu_marker.to_lowercase(),
            high_mem: classes.high_mem_marker.to_lowercase(),
        }
    }

    pub fn classify(&self, label: &str) -> WorkloadClass {
        let label = label.to_lowercase();
        let has = |marker: &str| !marker.is_empty() && label.contains(marker);

        if has(&self.high_cpu) {
            WorkloadClass::HighCpu
        } else if has(&self.high_mem) {
            WorkloadClass::HighMemory
        } else if has(&self.low) {
            WorkloadClass::Low
        } else {
            WorkloadClass::Unclassified
        }
    }
}

impl Default for Classifier {
    fn default() -> Self {
        Self::new(&ClassConfig::default())
    }
}
