//! Audit trail of samples and evictions
//!
//! The engine only writes here. Every write is fire-and-forget: a failed
//! insert is logged and the cycle carries on.

use std::fmt;
use std::path::Path;
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

use rusqlite::{params, Connection};
use tracing::warn;

/// Write-only sink for cycle records
pub trait AuditSink {
    fn record_metric(&self, total_kb: u64, free_kb: u64, used_kb: u64);
    fn record_process_count(&self, count: usize);
    fn record_entity(&self, container_id: &str, pid: u32, image: &str, cpu_pct: f64, mem_pct: f64);
    fn record_eviction(&self, container_id: &str, reason: &str);
}

/// Error opening the audit database
#[derive(Debug)]
pub enum AuditError {
    Io(std::io::Error),
    Sqlite(rusqlite::Error),
}

impl fmt::Display for AuditError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuditError::Io(e) => write!(f, "audit storage error: {}", e),
            AuditError::Sqlite(e) => write!(f, "audit database error: {}", e),
        }
    }
}

impl std::error::Error for AuditError {}

impl From<std::io::Error> for AuditError {
    fn from(e: std::io::Error) -> Self {
        AuditError::Io(e)
    }
}

impl From<rusqlite::Error> for AuditError {
    fn from(e: rusqlite::Error) -> Self {
        AuditError::Sqlite(e)
    }
}

/// A recorded eviction, as read back by operators
#[derive(Debug, Clone, PartialEq)]
pub struct EvictionRecord {
    pub container_id: String,
    pub reason: String,
    pub ts: i64,
}

/// SQLite-backed audit sink
pub struct SqliteAudit {
    conn: Mutex<Connection>,
}

impl SqliteAudit {
    /// Open (creating parent directories) and apply the schema
    pub fn open(path: &Path) -> Result<Self, AuditError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path)?;
        Self::with_connection(conn)
    }

    pub fn open_in_memory() -> Result<Self, AuditError> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self, AuditError> {
        conn.execute_batch(include_str!("schema.sql"))?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn now() -> i64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs() as i64)
            .unwrap_or(0)
    }

    fn exec(&self, what: &str, sql: &str, params: impl rusqlite::Params) {
        let conn = self.conn.lock().unwrap_or_else(|e| e.into_inner());
        if let Err(e) = conn.execute(sql, params) {
            warn!(record = what, error = %e, "audit write failed");
        }
    }

    /// Most recent evictions, newest first
    pub fn recent_evictions(&self, limit: u32) -> Result<Vec<EvictionRecord>, AuditError> {
        let conn = self.conn.lock().unwrap_or_else(|e| e.into_inner());
        let mut stmt = conn.prepare(
            "SELECT container_id, reason, ts FROM deletions ORDER BY id DESC LIMIT ?1",
        )?;
        let rows = stmt.query_map(params![limit], |row| {
            Ok(EvictionRecord {
                container_id: row.get(0)?,
                reason: row.get(1)?,
                ts: row.get(2)?,
            })
        })?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    /// Row count of one audit table
    pub fn count(&self, table: AuditTable) -> Result<u64, AuditError> {
        let conn = self.conn.lock().unwrap_or_else(|e| e.into_inner());
        let sql = format!("SELECT COUNT(*) FROM {}", table.as_str());
        let n: i64 = conn.query_row(&sql, [], |row| row.get(0))?;
        Ok(n as u64)
    }
}

/// Tables written by [`SqliteAudit`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuditTable {
    SysMetrics,
    ProcessCounts,
    Containers,
    Deletions,
}

impl AuditTable {
    fn as_str(self) -> &'static str {
        match self {
            AuditTable::SysMetrics => "sys_metrics",
            AuditTable::ProcessCounts => "process_counts",
            AuditTable::Containers => "containers",
            AuditTable::Deletions => "deletions",
        }
    }
}

impl AuditSink for SqliteAudit {
    fn record_metric(&self, total_kb: u64, free_kb: u64, used_kb: u64) {
        self.exec(
            "sys_metrics",
            "INSERT INTO sys_metrics (mem_total_kb, mem_free_kb, mem_used_kb, ts) VALUES (?1, ?2, ?3, ?4)",
            params![total_kb as i64, free_kb as i64, used_kb as i64, Self::now()],
        );
    }

    fn record_process_count(&self, count: usize) {
        self.exec(
            "process_counts",
            "INSERT INTO process_counts (count, ts) VALUES (?1, ?2)",
            params![count as i64, Self::now()],
        );
    }

    fn record_entity(&self, container_id: &str, pid: u32, image: &str, cpu_pct: f64, mem_pct: f64) {
        self.exec(
            "containers",
            "INSERT INTO containers (container_id, pid, image, cpu_pct, mem_pct, ts) VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![container_id, pid, image, cpu_pct, mem_pct, Self::now()],
        );
    }

    fn record_eviction(&self, container_id: &str, reason: &str) {
        self.exec(
            "deletions",
            "INSERT INTO deletions (container_id, reason, ts) VALUES (?1, ?2, ?3)",
            params![container_id, reason, Self::now()],
        );
    }
}
