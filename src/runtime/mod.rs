//! Container runtime interface
//!
//! The engine never talks to a runtime directly; it goes through
//! [`ContainerRuntime`] so that the Docker CLI backend can be swapped for a
//! fake in tests.

pub mod docker;

use std::fmt;
use std::future::Future;

pub use docker::DockerCli;

/// Durable identity of a container as reported by `inspect`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerIdentity {
    /// Full container id
    pub id: String,
    pub image: String,
    /// Display name without the leading `/`
    pub name: String,
    /// Root process of the container on the host
    pub pid: u32,
}

/// Error from a runtime call
#[derive(Debug)]
pub enum RuntimeError {
    /// The command could not be started
    Spawn(std::io::Error),
    /// The command ran but exited unsuccessfully
    Failed { command: String, stderr: String },
    /// The command did not finish within the configured timeout
    Timeout { command: String },
    /// The command output could not be understood
    Malformed(String),
}

impl fmt::Display for RuntimeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RuntimeError::Spawn(e) => write!(f, "failed to spawn runtime command: {}", e),
            RuntimeError::Failed { command, stderr } => {
                write!(f, "`{}` failed: {}", command, stderr.trim())
            }
            RuntimeError::Timeout { command } => write!(f, "`{}` timed out", command),
            RuntimeError::Malformed(msg) => write!(f, "unexpected runtime output: {}", msg),
        }
    }
}

impl std::error::Error for RuntimeError {}

impl From<std::io::Error> for RuntimeError {
    fn from(e: std::io::Error) -> Self {
        RuntimeError::Spawn(e)
    }
}

/// Operations the engine needs from a container runtime
pub trait ContainerRuntime {
    /// Ids of all running containers
    fn list_active(&self) -> impl Future<Output = Result<Vec<String>, RuntimeError>>;

    /// Identity of one container by id
    fn inspect(&self, id: &str) -> impl Future<Output = Result<ContainerIdentity, RuntimeError>>;

    /// Force-remove a container. Removing an already-gone container is an
    /// ordinary `Err`, never a panic.
    fn terminate(&self, id: &str) -> impl Future<Output = Result<(), RuntimeError>>;
}

/// Parse one line of `{{.State.Pid}} {{.Id}} {{.Config.Image}} {{.Name}}`
pub fn parse_inspect_line(line: &str) -> Result<ContainerIdentity, RuntimeError> {
    let parts: Vec<&str> = line.split_whitespace().collect();
    if parts.len() < 4 {
        return Err(RuntimeError::Malformed(format!("inspect output: {:?}", line.trim())));
    }

    let pid = parts[0]
        .parse::<u32>()
        .map_err(|_| RuntimeError::Malformed(format!("invalid pid {:?}", parts[0])))?;

    Ok(ContainerIdentity {
        id: parts[1].to_string(),
        image: parts[2].to_string(),
        name: parts[3].trim_start_matches('/').to_string(),
        pid,
    })
}
