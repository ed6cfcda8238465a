//! Startup and shutdown actions around the polling loop
//!
//! Typical startup commands bring up the dashboard stack, install the cron
//! job that refreshes snapshots and load the kernel module. Shutdown removes
//! the cron job. Every command is best-effort: a failure is logged and the
//! daemon carries on.

use std::process::Stdio;
use std::time::Duration;

use tokio::process::Command;
use tracing::{info, warn};

use crate::policy::Policy;
use crate::runtime::ContainerRuntime;

/// Result of one hook command
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HookOutcome {
    Succeeded,
    Failed(String),
    TimedOut,
    Skipped,
}

/// Run each argv in order, waiting at most `timeout` for each
pub async fn run_commands(stage: &str, commands: &[Vec<String>], timeout: Duration) -> Vec<HookOutcome> {
    let mut outcomes = Vec::with_capacity(commands.len());
    for argv in commands {
        let outcome = run_command(argv, timeout).await;
        match &outcome {
            HookOutcome::Succeeded => info!(stage, command = ?argv, "hook finished"),
            HookOutcome::Failed(reason) => warn!(stage, command = ?argv, reason = %reason, "hook failed"),
            HookOutcome::TimedOut => warn!(stage, command = ?argv, ?timeout, "hook timed out"),
            HookOutcome::Skipped => warn!(stage, "empty hook command, skipping"),
        }
        outcomes.push(outcome);
    }
    outcomes
}

async fn run_command(argv: &[String], timeout: Duration) -> HookOutcome {
    let Some((program, args)) = argv.split_first() else {
        return HookOutcome::Skipped;
    };

    let mut cmd = Command::new(program);
    cmd.args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let child = match cmd.spawn() {
        Ok(child) => child,
        Err(e) => return HookOutcome::Failed(e.to_string()),
    };

    match tokio::time::timeout(timeout, child.wait_with_output()).await {
        Ok(Ok(output)) if output.status.success() => HookOutcome::Succeeded,
        Ok(Ok(output)) => HookOutcome::Failed(format!(
            "{}: {}",
            output.status,
            String::from_utf8_lossy(&output.stderr).trim()
        )),
        Ok(Err(e)) => HookOutcome::Failed(e.to_string()),
        Err(_) => HookOutcome::TimedOut,
    }
}

/// Terminate every active container the policy does not exempt.
/// Returns the ids that were removed.
pub async fn stop_all_workloads<R: ContainerRuntime>(runtime: &R, policy: &Policy) -> Vec<String> {
    let ids = match runtime.list_active().await {
        Ok(ids) => ids,
        Err(e) => {
            warn!(error = %e, "cannot list containers for shutdown");
            return Vec::new();
        }
    };

    let mut stopped = Vec::new();
    for id in ids {
        let identity = match runtime.inspect(&id).await {
            Ok(identity) => identity,
            Err(e) => {
                warn!(container = %id, error = %e, "inspect failed, leaving container running");
                continue;
            }
        };
        if policy.is_exempt_identity(&identity) {
            info!(container = %id, name = %identity.name, "exempt container left running");
            continue;
        }
        match runtime.terminate(&id).await {
            Ok(()) => {
                info!(container = %id, image = %identity.image, "stopped container on shutdown");
                stopped.push(id);
            }
            Err(e) => warn!(container = %id, error = %e, "failed to stop container"),
        }
    }
    stopped
}
