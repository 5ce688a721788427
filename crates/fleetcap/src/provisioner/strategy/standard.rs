use crate::cloud::LaunchMode;
use crate::provisioner::config::ProvisionerConfig;
use crate::provisioner::strategy::{
    Strategy, StrategyDecision, StrategyState, provision_from_cloud,
};

/// Conservative strategy that only provisions once the existing capacity is fully used.
///
/// To ignore temporary surges and drops, every input is estimated pessimistically from both the
/// current snapshot and its moving average: the larger value of available and planned capacity,
/// the smaller value of queue length and connecting capacity.
pub struct StandardStrategy {
    config: ProvisionerConfig,
}

impl StandardStrategy {
    pub fn new(config: ProvisionerConfig) -> Self {
        Self { config }
    }
}

impl Strategy for StandardStrategy {
    fn name(&self) -> &'static str {
        "standard"
    }

    fn apply(&self, state: &mut StrategyState<'_>) -> StrategyDecision {
        let snapshot = *state.snapshot();
        let statistics = state.statistics();

        // Waiting for the averages to catch up is pointless if there is nothing at all
        let need_some_when_none_at_all = snapshot.available_executors == 0
            && snapshot.connecting_executors == 0
            && snapshot.online_executors == 0
            && state.planned_capacity_snapshot() == 0
            && state.additional_planned_capacity() == 0
            && snapshot.queue_length > 0;
        let available = (snapshot.available_executors as f32).max(statistics.available_executors());
        if available >= self.config.margin && !need_some_when_none_at_all {
            return StrategyDecision::ConsultNext;
        }

        let queue_length = statistics.queue_length().min(snapshot.queue_length as f32);
        let connecting = statistics
            .connecting_executors()
            .min(snapshot.connecting_executors as f32);
        let planned = statistics
            .planned_capacity()
            .max(state.planned_capacity_snapshot() as f32)
            + state.additional_planned_capacity() as f32;

        let mut excess_workload = queue_length - planned - connecting;
        if need_some_when_none_at_all && excess_workload < 1.0 {
            excess_workload = 1.0;
        }
        let margin = self.config.threshold_margin(snapshot.online_executors);
        if excess_workload <= 1.0 - margin {
            return StrategyDecision::ConsultNext;
        }
        log::debug!(
            "Excess workload {excess_workload:.3} detected for label {:?} (planned={planned:.3}, \
             connecting={connecting:.3}, queue length={queue_length:.3}, available={available:.3}, \
             online={}, margin={margin:.3})",
            state.label(),
            snapshot.online_executors
        );

        for cloud in state.clouds() {
            if excess_workload < 0.0 {
                break;
            }
            let cloud_state = state.cloud_state();
            if !cloud.can_provision(&cloud_state) || !cloud.supports_launch_mode(LaunchMode::Delayed)
            {
                continue;
            }
            // 1.4 executors of excess means one new executor, 0.95 means one as well
            let workload = (excess_workload + margin).floor() as u32;
            if workload == 0 {
                break;
            }
            let planned = provision_from_cloud(state, self.name(), cloud, &cloud_state, workload);
            excess_workload -= planned as f32;
        }

        if excess_workload > 1.0 - margin {
            StrategyDecision::ConsultNext
        } else {
            StrategyDecision::Completed
        }
    }
}
