use std::sync::Arc;
use std::time::Instant;

use futures::FutureExt;
use serde::Serialize;
use tokio::task::JoinHandle;

use crate::agent::{Agent, AgentRegistry, Provenance};
use crate::cloud::{CloudRef, CloudSet};
use crate::ledger::{Ledger, Reservation};
use crate::provisioner::listener::ProvisioningListeners;
use crate::provisioner::load::{LoadSource, LoadStatistics};
use crate::provisioner::metrics::ProvisioningMetrics;
use crate::provisioner::strategy::{
    PlannedLaunch, Strategy, StrategyContext, StrategyDecision, StrategyState,
};
use crate::provisioner::tracker::QueueItemTracker;
use crate::reconciler::NodeLifecycleReconciler;
use crate::{Label, TemplateId};

/// Shared handles of the control plane used by every provisioner.
#[derive(Clone)]
pub struct ProvisionerEnv {
    pub clouds: CloudSet,
    pub ledger: Arc<Ledger>,
    pub registry: AgentRegistry,
    pub load: Arc<dyn LoadSource>,
    pub listeners: ProvisioningListeners,
    pub metrics: Arc<ProvisioningMetrics>,
    pub tracker: Arc<QueueItemTracker>,
}

impl ProvisionerEnv {
    /// Connects the ledger with the registry, so that deleted agents give their capacity back.
    pub fn new(
        clouds: CloudSet,
        ledger: Arc<Ledger>,
        registry: AgentRegistry,
        load: Arc<dyn LoadSource>,
    ) -> Self {
        registry.add_listener(Arc::new(NodeLifecycleReconciler::new(
            ledger.clone(),
            clouds.clone(),
        )));
        Self {
            clouds,
            ledger,
            registry,
            load,
            listeners: Default::default(),
            metrics: Default::default(),
            tracker: Default::default(),
        }
    }

    pub fn strategy_context<'a>(&'a self, clouds: &'a [CloudRef]) -> StrategyContext<'a> {
        StrategyContext {
            clouds,
            ledger: &self.ledger,
            listeners: &self.listeners,
            metrics: &self.metrics,
            tracker: &self.tracker,
        }
    }
}

/// Description of a launch that has not finished yet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PendingLaunchInfo {
    pub label: Option<Label>,
    pub display_name: String,
    pub cloud_name: String,
    pub template: Option<TemplateId>,
    pub num_executors: u32,
}

struct PendingLaunch {
    display_name: String,
    num_executors: u32,
    cloud_name: String,
    cloud_id: String,
    template: Option<TemplateId>,
    planned_at: Instant,
    handle: JoinHandle<anyhow::Result<Agent>>,
    reservation: Reservation,
}

/// Provisions agents for a single label.
pub struct NodeProvisioner {
    label: Option<Label>,
    statistics: LoadStatistics,
    pending: Vec<PendingLaunch>,
}

impl NodeProvisioner {
    pub fn new(label: Option<Label>, load_decay: f32) -> Self {
        Self {
            label,
            statistics: LoadStatistics::new(load_decay),
            pending: Vec::new(),
        }
    }

    pub fn label(&self) -> Option<&Label> {
        self.label.as_ref()
    }

    pub fn has_pending_launches(&self) -> bool {
        !self.pending.is_empty()
    }

    pub fn pending_launches(&self) -> Vec<PendingLaunchInfo> {
        self.pending.iter().map(|launch| self.info(launch)).collect()
    }

    /// Runs one evaluation cycle.
    ///
    /// Finished launches are moved into the registry, then the strategies are consulted in order
    /// until one of them declares provisioning as completed. New launches are spawned onto the
    /// current tokio runtime.
    pub fn update(&mut self, env: &ProvisionerEnv, strategies: &[Box<dyn Strategy>]) {
        self.reap_finished(env);

        let planned_capacity = self
            .pending
            .iter()
            .fold(0u32, |acc, launch| acc.saturating_add(launch.num_executors));
        let snapshot = env.load.snapshot(self.label.as_ref());
        self.statistics.record(&snapshot, planned_capacity);

        if snapshot.queue_length <= snapshot.available_executors {
            log::trace!(
                "Queue length {} of label {:?} is covered by {} available executor(s)",
                snapshot.queue_length,
                self.label,
                snapshot.available_executors
            );
            return;
        }

        let clouds = env.clouds.snapshot();
        let mut state = StrategyState::new(
            self.label.clone(),
            snapshot,
            &self.statistics,
            planned_capacity,
            env.strategy_context(&clouds),
        )
        .with_queue_items(env.load.queue_items(self.label.as_ref()));
        for strategy in strategies {
            log::trace!(
                "Consulting {} strategy for label {:?}",
                strategy.name(),
                self.label
            );
            if strategy.apply(&mut state) == StrategyDecision::Completed {
                log::debug!(
                    "Strategy {} completed provisioning for label {:?}",
                    strategy.name(),
                    self.label
                );
                break;
            }
        }
        for launch in state.into_launches() {
            self.spawn_launch(launch);
        }
    }

    /// Cancels all pending launches and releases their reservations.
    pub fn shutdown(&mut self) {
        for launch in self.pending.drain(..) {
            log::debug!("Cancelling launch of {}", launch.display_name);
            launch.handle.abort();
        }
    }

    fn info(&self, launch: &PendingLaunch) -> PendingLaunchInfo {
        PendingLaunchInfo {
            label: self.label.clone(),
            display_name: launch.display_name.clone(),
            cloud_name: launch.cloud_name.clone(),
            template: launch.template.clone(),
            num_executors: launch.num_executors,
        }
    }

    fn spawn_launch(&mut self, launch: PlannedLaunch) {
        let PlannedLaunch {
            node,
            reservation,
            cloud_name,
            cloud_id,
            template,
            planned_at,
        } = launch;
        self.pending.push(PendingLaunch {
            display_name: node.display_name,
            num_executors: node.num_executors,
            cloud_name,
            cloud_id,
            template,
            planned_at,
            handle: tokio::spawn(node.future),
            reservation,
        });
    }

    fn reap_finished(&mut self, env: &ProvisionerEnv) {
        let (finished, pending): (Vec<_>, Vec<_>) = std::mem::take(&mut self.pending)
            .into_iter()
            .partition(|launch| launch.handle.is_finished());
        self.pending = pending;

        for mut launch in finished {
            let result = match (&mut launch.handle).now_or_never() {
                Some(result) => result,
                None => {
                    // Out of cooperative budget, try again in the next cycle
                    self.pending.push(launch);
                    continue;
                }
            };
            let error = match result {
                Ok(Ok(agent)) => {
                    self.commit_launch(env, launch, agent);
                    continue;
                }
                Ok(Err(error)) => {
                    log::warn!(
                        "Provisioning of agent {} from cloud {} failed: {error:?}",
                        launch.display_name,
                        launch.cloud_name
                    );
                    error
                }
                Err(error) if error.is_cancelled() => {
                    log::debug!("Launch of {} was cancelled", launch.display_name);
                    anyhow::Error::new(error)
                }
                Err(error) => {
                    log::error!(
                        "Unexpected failure while provisioning agent {}: {error}",
                        launch.display_name
                    );
                    anyhow::Error::new(error)
                }
            };
            let info = self.info(&launch);
            env.listeners
                .notify("failure", |listener| listener.on_failure(&info, &error));
            env.tracker
                .unlink_node(&launch.cloud_name, &launch.display_name);
        }
    }

    fn commit_launch(&self, env: &ProvisionerEnv, launch: PendingLaunch, mut agent: Agent) {
        let info = self.info(&launch);
        let PendingLaunch {
            display_name,
            cloud_name,
            cloud_id,
            template,
            planned_at,
            mut reservation,
            ..
        } = launch;
        env.tracker.unlink_node(&cloud_name, &display_name);
        env.listeners
            .notify("complete", |listener| listener.on_complete(&info, &agent));

        let executors = agent.num_executors();
        if executors < reservation.executors() {
            drop(reservation.split_off(reservation.executors() - executors));
        } else if executors > reservation.executors() {
            let missing = executors - reservation.executors();
            if let Err(error) =
                reserve_missing(env, &cloud_id, &cloud_name, template.clone(), missing)
                    .map(|extra| reservation.merge(extra))
            {
                log::warn!(
                    "Agent {} has {executors} executor(s), but only {} were reserved for it: \
                     {error}",
                    agent.name(),
                    reservation.executors()
                );
                env.listeners.notify("rollback", |listener| {
                    listener.on_rollback(&info, &agent, &error)
                });
                return;
            }
        }

        agent.set_provenance(Provenance {
            cloud_name: cloud_name.clone(),
            cloud_id,
            template,
        });
        let name = agent.name().to_string();
        match env.registry.add(agent.clone()) {
            Ok(()) => {
                log::info!(
                    "{display_name} provisioning successfully completed, there are now {} agent(s)",
                    env.registry.len()
                );
                reservation.confirm();
                env.metrics
                    .record_node_availability(&cloud_name, executors, planned_at.elapsed());
                env.listeners
                    .notify("commit", |listener| listener.on_commit(&info, &agent));
            }
            Err(error) => {
                log::warn!("Provisioned agent {name} could not be added: {error}");
                let error = anyhow::Error::new(error);
                env.listeners.notify("rollback", |listener| {
                    listener.on_rollback(&info, &agent, &error)
                });
            }
        }
    }
}

/// Reserves executors that an agent has on top of what was reserved for its launch.
fn reserve_missing(
    env: &ProvisionerEnv,
    cloud_id: &str,
    cloud_name: &str,
    template: Option<TemplateId>,
    missing: u32,
) -> anyhow::Result<Reservation> {
    let cloud = env
        .clouds
        .find_by_unique_id(cloud_id)
        .ok_or_else(|| anyhow::anyhow!("cloud {cloud_name} is no longer configured"))?;
    env.ledger
        .reserve(cloud.as_ref(), template, missing)
        .ok_or_else(|| anyhow::anyhow!("limits of cloud {cloud_name} do not allow {missing} more"))
}

impl Drop for NodeProvisioner {
    fn drop(&mut self) {
        self.shutdown();
    }
}
