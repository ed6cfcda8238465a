//! Process → container identity resolution
//!
//! The kernel snapshot only knows PIDs. To act on a workload the engine needs
//! the runtime's container id, so each cycle builds a map of container root
//! PIDs and resolves every observed process against it:
//!
//! ```text
//! pid ──► root-PID map hit? ──yes──► identity
//!            │ no
//!            ▼
//!        name == shim? ──yes──► "-id <cid>" in cmdline? ──yes──► inspect(cid)
//!            │ no                        │ no                         │ err
//!            ▼                           ▼                            ▼
//!        unresolved                  unresolved                   unresolved
//! ```

use std::collections::HashMap;

use futures_util::stream::{self, StreamExt};
use tracing::{debug, warn};

use crate::runtime::{ContainerIdentity, ContainerRuntime};
use crate::snapshot::ProcessRecord;

/// Command-line flag a shim uses to name the container it supervises
const SHIM_ID_FLAG: &str = "-id";

/// Per-cycle resolver. Build a fresh one every cycle.
#[derive(Debug, Default)]
pub struct IdentityResolver {
    by_pid: HashMap<u32, ContainerIdentity>,
    shim_name: String,
}

impl IdentityResolver {
    /// Enumerate active containers and inspect each, at most `concurrency`
    /// inspections in flight. A failed inspection drops that container; a
    /// failed listing yields an empty resolver.
    pub async fn build<R: ContainerRuntime>(
        runtime: &R,
        shim_name: &str,
        concurrency: usize,
    ) -> Self {
        let ids = match runtime.list_active().await {
            Ok(ids) => ids,
            Err(e) => {
                warn!(error = %e, "cannot list containers, resolving nothing this cycle");
                return Self::from_identities(Vec::new(), shim_name);
            }
        };

        let identities: Vec<ContainerIdentity> = stream::iter(ids)
            .map(|id| async move {
                match runtime.inspect(&id).await {
                    Ok(identity) => Some(identity),
                    Err(e) => {
                        warn!(container = %id, error = %e, "inspect failed, skipping container");
                        None
                    }
                }
            })
            .buffer_unordered(concurrency.max(1))
            .filter_map(|identity| async move { identity })
            .collect()
            .await;

        debug!(containers = identities.len(), "built container pid map");
        Self::from_identities(identities, shim_name)
    }

    pub fn from_identities(identities: Vec<ContainerIdentity>, shim_name: &str) -> Self {
        Self {
            by_pid: identities.into_iter().map(|c| (c.pid, c)).collect(),
            shim_name: shim_name.to_string(),
        }
    }

    /// Number of containers in the PID map
    pub fn len(&self) -> usize {
        self.by_pid.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_pid.is_empty()
    }

    /// Exact root-PID lookup only
    pub fn lookup(&self, pid: u32) -> Option<&ContainerIdentity> {
        self.by_pid.get(&pid)
    }

    /// Resolve a process, falling back through its shim command line
    pub async fn resolve<R: ContainerRuntime>(
        &self,
        runtime: &R,
        process: &ProcessRecord,
    ) -> Option<ContainerIdentity> {
        if let Some(identity) = self.lookup(process.pid) {
            return Some(identity.clone());
        }

        if process.name != self.shim_name {
            return None;
        }

        let container_id = extract_container_id(&process.cmdline)?;
        match runtime.inspect(container_id).await {
            Ok(identity) => {
                debug!(pid = process.pid, container = %identity.id, "resolved through shim");
                Some(identity)
            }
            Err(e) => {
                warn!(pid = process.pid, container = %container_id, error = %e, "shim inspect failed");
                None
            }
        }
    }
}

/// Container id following the shim's `-id` flag, if present
pub fn extract_container_id(cmdline: &str) -> Option<&str> {
    let mut tokens = cmdline.split_whitespace();
    tokens.find(|t| *t == SHIM_ID_FLAG)?;
    tokens.next()
}
