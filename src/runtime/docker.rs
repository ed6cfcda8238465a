//! Docker CLI backend
//!
//! Every call is a short-lived `docker` child process bounded by a timeout,
//! so a wedged daemon fails the call instead of stalling the polling loop.

use std::time::Duration;

use tokio::process::Command;
use tracing::debug;

use super::{parse_inspect_line, ContainerIdentity, ContainerRuntime, RuntimeError};

const INSPECT_FORMAT: &str = "{{.State.Pid}} {{.Id}} {{.Config.Image}} {{.Name}}";

/// Runtime backed by the `docker` command line
#[derive(Debug, Clone)]
pub struct DockerCli {
    bin: String,
    timeout: Duration,
}

impl DockerCli {
    pub fn new(bin: impl Into<String>, timeout: Duration) -> Self {
        Self {
            bin: bin.into(),
            timeout,
        }
    }

    /// Run `docker <args>` and return stdout
    async fn run(&self, args: &[&str]) -> Result<String, RuntimeError> {
        let command = format!("{} {}", self.bin, args.join(" "));
        debug!(command = %command, "running runtime command");

        let mut cmd = Command::new(&self.bin);
        cmd.args(args).kill_on_drop(true);

        let output = match tokio::time::timeout(self.timeout, cmd.output()).await {
            Ok(result) => result?,
            Err(_) => return Err(RuntimeError::Timeout { command }),
        };

        if !output.status.success() {
            return Err(RuntimeError::Failed {
                command,
                stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            });
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

impl ContainerRuntime for DockerCli {
    async fn list_active(&self) -> Result<Vec<String>, RuntimeError> {
        let out = self.run(&["ps", "-q"]).await?;
        Ok(out.split_whitespace().map(str::to_string).collect())
    }

    async fn inspect(&self, id: &str) -> Result<ContainerIdentity, RuntimeError> {
        let out = self.run(&["inspect", "--format", INSPECT_FORMAT, id]).await?;
        parse_inspect_line(&out)
    }

    async fn terminate(&self, id: &str) -> Result<(), RuntimeError> {
        self.run(&["rm", "-f", id]).await.map(|_| ())
    }
}
