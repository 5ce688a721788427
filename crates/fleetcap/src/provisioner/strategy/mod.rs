//! Policies that decide how much capacity to request in one evaluation cycle.
mod nodelay;
mod standard;

pub use nodelay::NoDelayStrategy;
pub use standard::StandardStrategy;

use std::sync::Arc;
use std::time::Instant;

use crate::cloud::{CloudRef, CloudState, PlannedNode};
use crate::ledger::{Ledger, Reservation};
use crate::provisioner::config::ProvisionerConfig;
use crate::provisioner::listener::ProvisioningListeners;
use crate::provisioner::load::{LoadSnapshot, LoadStatistics};
use crate::provisioner::metrics::ProvisioningMetrics;
use crate::provisioner::node_provisioner::PendingLaunchInfo;
use crate::provisioner::tracker::{QueueItemId, QueueItemTracker};
use crate::{Label, TemplateId};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StrategyDecision {
    /// No other strategy needs to be consulted in this cycle.
    Completed,
    /// Demand was not (fully) covered, the next strategy should look at it.
    ConsultNext,
}

pub trait Strategy: Send + Sync {
    fn name(&self) -> &'static str;

    fn apply(&self, state: &mut StrategyState<'_>) -> StrategyDecision;
}

/// Strategies in the order in which they are consulted by default.
pub fn default_strategies(config: &ProvisionerConfig) -> Vec<Box<dyn Strategy>> {
    vec![
        Box::new(NoDelayStrategy),
        Box::new(StandardStrategy::new(config.clone())),
    ]
}

/// Planned node together with the reservation that admitted it.
pub struct PlannedLaunch {
    pub node: PlannedNode,
    pub reservation: Reservation,
    pub cloud_name: String,
    pub cloud_id: String,
    pub template: Option<TemplateId>,
    pub planned_at: Instant,
}

impl PlannedLaunch {
    pub fn info(&self, label: Option<&Label>) -> PendingLaunchInfo {
        PendingLaunchInfo {
            label: label.cloned(),
            display_name: self.node.display_name.clone(),
            cloud_name: self.cloud_name.clone(),
            template: self.template.clone(),
            num_executors: self.node.num_executors,
        }
    }
}

/// Services shared by all strategies.
#[derive(Clone, Copy)]
pub struct StrategyContext<'a> {
    pub clouds: &'a [CloudRef],
    pub ledger: &'a Arc<Ledger>,
    pub listeners: &'a ProvisioningListeners,
    pub metrics: &'a ProvisioningMetrics,
    pub tracker: &'a QueueItemTracker,
}

/// Input and output of the strategies for one label in one cycle.
pub struct StrategyState<'a> {
    label: Option<Label>,
    snapshot: LoadSnapshot,
    statistics: &'a LoadStatistics,
    planned_capacity_snapshot: u32,
    additional_planned_capacity: u32,
    context: StrategyContext<'a>,
    queue_items: Vec<QueueItemId>,
    launches: Vec<PlannedLaunch>,
}

impl<'a> StrategyState<'a> {
    pub fn new(
        label: Option<Label>,
        snapshot: LoadSnapshot,
        statistics: &'a LoadStatistics,
        planned_capacity_snapshot: u32,
        context: StrategyContext<'a>,
    ) -> Self {
        Self {
            label,
            snapshot,
            statistics,
            planned_capacity_snapshot,
            additional_planned_capacity: 0,
            context,
            queue_items: Vec::new(),
            launches: Vec::new(),
        }
    }

    /// Queued items that new launches of this cycle are linked to.
    pub fn with_queue_items(mut self, items: Vec<QueueItemId>) -> Self {
        self.queue_items = items;
        self
    }

    pub fn label(&self) -> Option<&Label> {
        self.label.as_ref()
    }

    pub fn snapshot(&self) -> &LoadSnapshot {
        &self.snapshot
    }

    pub fn statistics(&self) -> &'a LoadStatistics {
        self.statistics
    }

    /// Executors of launches that were still pending at the start of the cycle.
    pub fn planned_capacity_snapshot(&self) -> u32 {
        self.planned_capacity_snapshot
    }

    /// Executors planned by strategies earlier in this cycle.
    pub fn additional_planned_capacity(&self) -> u32 {
        self.additional_planned_capacity
    }

    pub fn clouds(&self) -> &'a [CloudRef] {
        self.context.clouds
    }

    pub fn ledger(&self) -> &'a Arc<Ledger> {
        self.context.ledger
    }

    pub fn context(&self) -> StrategyContext<'a> {
        self.context
    }

    pub fn queue_items(&self) -> &[QueueItemId] {
        &self.queue_items
    }

    /// Cloud state that carries the capacity planned so far in this cycle.
    pub fn cloud_state(&self) -> CloudState {
        CloudState::new(self.label.clone(), self.additional_planned_capacity)
    }

    pub fn record_launch(&mut self, launch: PlannedLaunch) {
        self.additional_planned_capacity = self
            .additional_planned_capacity
            .saturating_add(launch.node.num_executors);
        self.launches.push(launch);
    }

    pub fn into_launches(self) -> Vec<PlannedLaunch> {
        self.launches
    }
}

/// Reserves up to `requested` executors of `cloud` and asks the cloud to provision them.
///
/// Listeners may veto the cloud before anything is reserved. The cloud is only called once the
/// reservation was admitted. Every planned node gets its own share of the reservation; a node
/// that is larger than its share has to reserve the difference, otherwise it is dropped before
/// it is launched. The part that the cloud did not plan is released right away, as is the whole
/// reservation if provisioning fails. Returns the number of planned executors.
pub(crate) fn provision_from_cloud(
    state: &mut StrategyState<'_>,
    strategy: &str,
    cloud: &CloudRef,
    cloud_state: &CloudState,
    requested: u32,
) -> u32 {
    let context = state.context();
    let ledger = context.ledger;
    let template = cloud.template_for(cloud_state);
    let count = match ledger.headroom(cloud.as_ref(), template.as_ref()) {
        Some(headroom) => requested.min(headroom),
        None => requested,
    };
    if count == 0 {
        log::debug!(
            "Cloud {} has no capacity left for template {template:?}",
            cloud.name()
        );
        return 0;
    }
    if let Some(reason) = context.listeners.veto(cloud.as_ref(), cloud_state, count) {
        log::debug!("Provisioning from cloud {} was vetoed: {reason}", cloud.name());
        return 0;
    }
    let Some(mut reservation) = ledger.reserve(cloud.as_ref(), template.clone(), count) else {
        log::debug!(
            "Could not reserve {count} executor(s) of cloud {}, skipping it",
            cloud.name()
        );
        return 0;
    };

    let attempt = context
        .metrics
        .start_attempt(cloud.name(), strategy, state.label(), count);
    let nodes = match cloud.provision(cloud_state, count) {
        Ok(nodes) => nodes,
        Err(error) => {
            log::warn!(
                "Cloud {} failed to provision {count} executor(s): {error:?}",
                cloud.name()
            );
            context.metrics.record_failure(attempt, &error.to_string());
            return 0;
        }
    };

    let planned_at = Instant::now();
    let mut launches = Vec::with_capacity(nodes.len());
    for node in nodes {
        let mut share = reservation.split_off(node.num_executors);
        if share.executors() < node.num_executors && cloud.supports_limits() {
            let missing = node.num_executors - share.executors();
            match ledger.reserve(cloud.as_ref(), template.clone(), missing) {
                Some(extra) => share.merge(extra),
                None => {
                    log::warn!(
                        "Cloud {} planned {} with {} executor(s), but only {} fit into its \
                         limits, dropping the node",
                        cloud.name(),
                        node.display_name,
                        node.num_executors,
                        share.executors()
                    );
                    continue;
                }
            }
        }
        log::info!(
            "Started provisioning {} from {} with {} executor(s)",
            node.display_name,
            cloud.name(),
            node.num_executors
        );
        launches.push(PlannedLaunch {
            node,
            reservation: share,
            cloud_name: cloud.name().to_string(),
            cloud_id: cloud.identity().unique_id().to_string(),
            template: template.clone(),
            planned_at,
        });
    }
    if reservation.executors() > 0 {
        log::debug!(
            "Releasing {} executor(s) of cloud {} that were not planned",
            reservation.executors(),
            cloud.name()
        );
    }
    drop(reservation);

    let planned = launches
        .iter()
        .fold(0u32, |acc, launch| acc.saturating_add(launch.node.num_executors));
    context.metrics.record_success(attempt, planned);
    if !launches.is_empty() {
        let infos: Vec<_> = launches
            .iter()
            .map(|launch| launch.info(state.label()))
            .collect();
        context.listeners.notify("started", |listener| {
            listener.on_started(cloud.as_ref(), state.label(), &infos)
        });
        let names: Vec<_> = infos.into_iter().map(|info| info.display_name).collect();
        context
            .tracker
            .link_items_to_nodes(state.queue_items(), cloud.name(), &names);
    }
    for launch in launches {
        state.record_launch(launch);
    }
    planned
}
