//! Keeps the ledger in sync with the agent inventory.
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

use crate::agent::{Agent, AgentListener};
use crate::cloud::CloudSet;
use crate::ledger::Ledger;

/// Releases the reserved capacity of agents that are deleted from the registry.
///
/// Reservations of new agents are confirmed by the provisioner that launched them, so creation and
/// updates are only logged.
pub struct NodeLifecycleReconciler {
    ledger: Arc<Ledger>,
    clouds: CloudSet,
}

impl NodeLifecycleReconciler {
    pub fn new(ledger: Arc<Ledger>, clouds: CloudSet) -> Self {
        Self { ledger, clouds }
    }
}

impl AgentListener for NodeLifecycleReconciler {
    fn on_created(&self, agent: &Agent) -> anyhow::Result<()> {
        log::debug!(
            "Agent {} with {} executor(s) was created",
            agent.name(),
            agent.num_executors()
        );
        Ok(())
    }

    fn on_updated(&self, previous: &Agent, current: &Agent) -> anyhow::Result<()> {
        if previous.num_executors() != current.num_executors() {
            log::debug!(
                "Agent {} changed from {} to {} executor(s)",
                current.name(),
                previous.num_executors(),
                current.num_executors()
            );
        }
        Ok(())
    }

    fn on_deleted(&self, agent: &Agent) -> anyhow::Result<()> {
        // Matching calls into cloud code, which must not break the deletion
        let clouds = self.clouds.snapshot();
        match catch_unwind(AssertUnwindSafe(|| {
            self.ledger.release_for_agent(&clouds, agent)
        })) {
            Ok(true) => log::debug!("Released capacity of deleted agent {}", agent.name()),
            Ok(false) => {}
            Err(_) => log::error!(
                "Releasing capacity of deleted agent {} failed unexpectedly",
                agent.name()
            ),
        }
        Ok(())
    }
}
