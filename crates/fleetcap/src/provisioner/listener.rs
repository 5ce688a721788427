use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Arc, PoisonError, RwLock};

use crate::Label;
use crate::agent::Agent;
use crate::cloud::{Cloud, CloudState};
use crate::provisioner::node_provisioner::PendingLaunchInfo;

/// Observes provisioning decisions and the launches they produce.
///
/// Apart from [`ProvisioningListener::can_provision`], listeners cannot influence provisioning.
/// Errors and panics of the notification methods are logged and otherwise ignored.
pub trait ProvisioningListener: Send + Sync {
    /// Returns the reason why `cloud` must not be asked for `workload` executors, or `None` if
    /// this listener does not object.
    fn can_provision(
        &self,
        _cloud: &dyn Cloud,
        _state: &CloudState,
        _workload: u32,
    ) -> Option<String> {
        None
    }

    /// A cloud has planned new nodes.
    fn on_started(
        &self,
        _cloud: &dyn Cloud,
        _label: Option<&Label>,
        _launches: &[PendingLaunchInfo],
    ) -> anyhow::Result<()> {
        Ok(())
    }

    /// A launch produced an agent, which is about to be added to the registry.
    fn on_complete(&self, _launch: &PendingLaunchInfo, _agent: &Agent) -> anyhow::Result<()> {
        Ok(())
    }

    /// The agent of a launch was added to the registry.
    fn on_commit(&self, _launch: &PendingLaunchInfo, _agent: &Agent) -> anyhow::Result<()> {
        Ok(())
    }

    /// A launch failed before it produced an agent.
    fn on_failure(&self, _launch: &PendingLaunchInfo, _error: &anyhow::Error) -> anyhow::Result<()> {
        Ok(())
    }

    /// The agent of a launch was produced but could not be added.
    fn on_rollback(
        &self,
        _launch: &PendingLaunchInfo,
        _agent: &Agent,
        _error: &anyhow::Error,
    ) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Shared, growable list of provisioning listeners.
#[derive(Clone, Default)]
pub struct ProvisioningListeners {
    listeners: Arc<RwLock<Vec<Arc<dyn ProvisioningListener>>>>,
}

impl ProvisioningListeners {
    pub fn add(&self, listener: Arc<dyn ProvisioningListener>) {
        self.listeners
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(listener);
    }

    pub fn len(&self) -> usize {
        self.snapshot().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// First objection of any listener against provisioning from `cloud`.
    ///
    /// A listener that panics is treated as not objecting.
    pub fn veto(&self, cloud: &dyn Cloud, state: &CloudState, workload: u32) -> Option<String> {
        self.snapshot().into_iter().find_map(|listener| {
            match catch_unwind(AssertUnwindSafe(|| {
                listener.can_provision(cloud, state, workload)
            })) {
                Ok(reason) => reason,
                Err(_) => {
                    log::error!(
                        "Provisioning listener panicked while checking cloud {}",
                        cloud.name()
                    );
                    None
                }
            }
        })
    }

    pub(crate) fn notify<F>(&self, event: &str, f: F)
    where
        F: Fn(&dyn ProvisioningListener) -> anyhow::Result<()>,
    {
        for listener in self.snapshot() {
            match catch_unwind(AssertUnwindSafe(|| f(listener.as_ref()))) {
                Ok(Ok(())) => {}
                Ok(Err(error)) => {
                    log::error!("Provisioning listener failed to handle `{event}` event: {error:?}")
                }
                Err(_) => {
                    log::error!("Provisioning listener panicked while handling `{event}` event")
                }
            }
        }
    }

    fn snapshot(&self) -> Vec<Arc<dyn ProvisioningListener>> {
        self.listeners
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}
