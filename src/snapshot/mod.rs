//! Kernel snapshot ingestion
//!
//! The kernel module publishes two JSON-ish files under `/proc`: one for the
//! whole host and one restricted to container root processes. Its output
//! always ends each array element with a comma, so the text is sanitized
//! before structural parsing:
//!
//! ```text
//! {
//!   "mem_total_kb": 16303428,
//!   "mem_free_kb": 8123456,
//!   "mem_used_kb": 8179972,
//!   "containers": [
//!     { "pid": 4242, "name": "stress", "cmdline": "stress --cpu 1", ... },
//!   ]
//! }
//! ```

use std::fmt;
use std::fs::File;
use std::io::{self, Read};
use std::path::{Path, PathBuf};

use lazy_static::lazy_static;
use regex::Regex;
use serde::Deserialize;

/// Upper bound on how much of a snapshot file is read
pub const MAX_SNAPSHOT_BYTES: u64 = 10 << 20;

lazy_static! {
    static ref TRAILING_COMMA: Regex =
        Regex::new(r",\s*([\]\}])").expect("trailing comma pattern is valid");
}

/// One process as reported by the kernel module
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ProcessRecord {
    pub pid: u32,
    pub name: String,
    #[serde(default)]
    pub cmdline: String,
    #[serde(default)]
    pub vsz_kb: u64,
    #[serde(default)]
    pub rss_kb: u64,
    /// Fixed-point text, e.g. "12.34"
    #[serde(default)]
    pub mem_pct: String,
    #[serde(default)]
    pub state: Option<String>,
}

impl ProcessRecord {
    /// Memory share as a float; unparseable values count as 0
    pub fn mem_percent(&self) -> f64 {
        parse_mem_pct(&self.mem_pct).unwrap_or(0.0)
    }
}

/// Host-wide snapshot
#[derive(Debug, Clone, Deserialize)]
pub struct SystemSnapshot {
    pub mem_total_kb: u64,
    pub mem_free_kb: u64,
    pub mem_used_kb: u64,
    #[serde(default)]
    pub processes: Vec<ProcessRecord>,
}

/// Snapshot scoped to container root processes
#[derive(Debug, Clone, Deserialize)]
pub struct ContainerSnapshot {
    pub mem_total_kb: u64,
    pub mem_free_kb: u64,
    pub mem_used_kb: u64,
    #[serde(default)]
    pub containers: Vec<ProcessRecord>,
}

/// Error acquiring or parsing a snapshot
#[derive(Debug)]
pub enum SnapshotError {
    Read { path: PathBuf, source: io::Error },
    Parse { path: PathBuf, source: serde_json::Error },
}

impl fmt::Display for SnapshotError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SnapshotError::Read { path, source } => {
                write!(f, "failed to read {}: {}", path.display(), source)
            }
            SnapshotError::Parse { path, source } => {
                write!(f, "failed to parse {}: {}", path.display(), source)
            }
        }
    }
}

impl std::error::Error for SnapshotError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            SnapshotError::Read { source, .. } => Some(source),
            SnapshotError::Parse { source, .. } => Some(source),
        }
    }
}

/// Remove commas that directly precede a closing `]` or `}`
///
/// Purely textual: a string value containing `,]` or `,}` is rewritten too.
pub fn sanitize_json(raw: &str) -> String {
    TRAILING_COMMA.replace_all(raw, "$1").into_owned()
}

/// Parse the kernel's "X.YY" memory percentage; blank means 0
pub fn parse_mem_pct(s: &str) -> Result<f64, std::num::ParseFloatError> {
    let s = s.trim();
    if s.is_empty() {
        return Ok(0.0);
    }
    s.parse()
}

/// Sanitize then deserialize snapshot text
pub fn parse_snapshot<T: for<'de> Deserialize<'de>>(raw: &str) -> Result<T, serde_json::Error> {
    serde_json::from_str(&sanitize_json(raw))
}

/// Reads both snapshot files from configured paths
#[derive(Debug, Clone)]
pub struct SnapshotReader {
    system_path: PathBuf,
    container_path: PathBuf,
}

impl SnapshotReader {
    pub fn new(system_path: impl Into<PathBuf>, container_path: impl Into<PathBuf>) -> Self {
        Self {
            system_path: system_path.into(),
            container_path: container_path.into(),
        }
    }

    pub fn read_system(&self) -> Result<SystemSnapshot, SnapshotError> {
        read_and_parse(&self.system_path)
    }

    pub fn read_containers(&self) -> Result<ContainerSnapshot, SnapshotError> {
        read_and_parse(&self.container_path)
    }
}

/// Read at most [`MAX_SNAPSHOT_BYTES`]. Command lines are printed raw by the
/// kernel, so invalid UTF-8 is replaced rather than rejected.
fn read_capped(path: &Path) -> io::Result<String> {
    let file = File::open(path)?;
    let mut buf = Vec::new();
    file.take(MAX_SNAPSHOT_BYTES).read_to_end(&mut buf)?;
    Ok(String::from_utf8_lossy(&buf).into_owned())
}

fn read_and_parse<T: for<'de> Deserialize<'de>>(path: &Path) -> Result<T, SnapshotError> {
    let raw = read_capped(path).map_err(|source| SnapshotError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    parse_snapshot(&raw).map_err(|source| SnapshotError::Parse {
        path: path.to_path_buf(),
        source,
    })
}
