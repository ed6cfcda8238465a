//! Host kernel accounting counters from procfs
//!
//! - `/proc/<pid>/stat`: utime + stime in clock ticks for one process
//! - `/proc/stat`: first line sums every scheduler bucket since boot

use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// Error reading a procfs counter
#[derive(Debug)]
pub enum CounterError {
    Io { path: PathBuf, source: io::Error },
    Malformed { path: PathBuf, detail: String },
}

impl fmt::Display for CounterError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CounterError::Io { path, source } => {
                write!(f, "failed to read {}: {}", path.display(), source)
            }
            CounterError::Malformed { path, detail } => {
                write!(f, "malformed {}: {}", path.display(), detail)
            }
        }
    }
}

impl std::error::Error for CounterError {}

/// utime + stime from the text of `/proc/<pid>/stat`
///
/// The command name is parenthesized and may contain spaces, so fields are
/// counted from the last `)`. After it, utime and stime sit at offsets 11 and
/// 12 (fields 14 and 15 of the whole line). If too few fields follow, fall
/// back to a plain whitespace split of the whole line.
pub fn parse_pid_stat(content: &str) -> Result<u64, String> {
    let close = content.rfind(')').ok_or("no closing paren after comm")?;
    let after: Vec<&str> = content[close + 1..].split_whitespace().collect();

    let (utime, stime) = if after.len() > 12 {
        (after[11], after[12])
    } else {
        let parts: Vec<&str> = content.split_whitespace().collect();
        if parts.len() < 15 {
            return Err(format!("only {} fields", parts.len()));
        }
        (parts[13], parts[14])
    };

    let utime: u64 = utime.parse().map_err(|_| format!("bad utime {:?}", utime))?;
    let stime: u64 = stime.parse().map_err(|_| format!("bad stime {:?}", stime))?;
    Ok(utime + stime)
}

/// Sum of all numeric fields after the label on the aggregate `cpu` line
pub fn parse_host_cpu_line(line: &str) -> Result<u64, String> {
    let mut fields = line.split_whitespace();
    let label = fields.next().ok_or("empty line")?;
    if !label.starts_with("cpu") {
        return Err(format!("unexpected label {:?}", label));
    }

    let values: Vec<&str> = fields.collect();
    // user nice system idle iowait irq softirq at minimum
    if values.len() < 7 {
        return Err(format!("only {} counters", values.len()));
    }

    values.iter().try_fold(0u64, |total, v| {
        v.parse::<u64>()
            .map(|n| total.saturating_add(n))
            .map_err(|_| format!("bad counter {:?}", v))
    })
}

/// Reader rooted at a procfs mount (normally `/proc`)
#[derive(Debug, Clone)]
pub struct ProcFs {
    root: PathBuf,
}

impl ProcFs {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Ticks consumed by one process in user + kernel mode
    pub fn process_ticks(&self, pid: u32) -> Result<u64, CounterError> {
        let path = self.root.join(pid.to_string()).join("stat");
        let content = read(&path)?;
        parse_pid_stat(&content).map_err(|detail| CounterError::Malformed { path, detail })
    }

    /// Host-wide ticks since boot across every scheduler bucket
    pub fn host_ticks(&self) -> Result<u64, CounterError> {
        let path = self.root.join("stat");
        let content = read(&path)?;
        let line = content.lines().next().unwrap_or_default();
        parse_host_cpu_line(line).map_err(|detail| CounterError::Malformed { path, detail })
    }
}

impl Default for ProcFs {
    fn default() -> Self {
        Self::new("/proc")
    }
}

fn read(path: &Path) -> Result<String, CounterError> {
    fs::read_to_string(path).map_err(|source| CounterError::Io {
        path: path.to_path_buf(),
        source,
    })
}
