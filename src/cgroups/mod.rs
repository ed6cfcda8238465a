//! cgroup CPU accounting
//!
//! Containers are sampled through the runtime's cgroup rather than through
//! a single PID, so the counter covers every process inside the container.
//!
//! # Example Usage
//!
//! ```ignore
//! use evictd::cgroups::CgroupReader;
//!
//! let reader = CgroupReader::new("/sys/fs/cgroup", vec![
//!     "system.slice/docker-{id}.scope/cpu.stat".into(),
//! ]);
//! let ns = reader.cpu_time_ns("3f2a9c...")?;
//! ```

pub mod reader;

pub use reader::{parse_cpu_counter, parse_cpu_stat, CgroupError, CgroupReader, CpuStats};
