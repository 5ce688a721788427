use crate::cloud::{CloudState, LaunchMode};
use crate::provisioner::strategy::{
    Strategy, StrategyDecision, StrategyState, provision_from_cloud,
};

/// Requests capacity for all queued work that is not covered yet, without waiting for the load
/// statistics to settle.
pub struct NoDelayStrategy;

impl Strategy for NoDelayStrategy {
    fn name(&self) -> &'static str {
        "no-delay"
    }

    fn apply(&self, state: &mut StrategyState<'_>) -> StrategyDecision {
        let snapshot = *state.snapshot();
        let existing = snapshot
            .available_executors
            .saturating_add(snapshot.connecting_executors)
            .saturating_add(state.planned_capacity_snapshot())
            .saturating_add(state.additional_planned_capacity());
        let demand = snapshot.queue_length;
        log::debug!(
            "Label {:?}: existing capacity={existing}, demand={demand}",
            state.label()
        );
        if existing >= demand {
            return StrategyDecision::Completed;
        }

        let mut remaining = demand - existing;
        // Clouds see no planned capacity here, the demand already accounts for it
        let cloud_state = CloudState::new(state.label().cloned(), 0);
        for cloud in state.clouds() {
            if remaining == 0 {
                break;
            }
            if !cloud.can_provision(&cloud_state)
                || !cloud.supports_launch_mode(LaunchMode::Immediate)
            {
                continue;
            }
            let planned = provision_from_cloud(state, self.name(), cloud, &cloud_state, remaining);
            remaining = remaining.saturating_sub(planned);
        }

        if remaining == 0 {
            log::debug!("Provisioning for label {:?} completed", state.label());
            StrategyDecision::Completed
        } else {
            log::debug!(
                "{remaining} executor(s) for label {:?} are still missing",
                state.label()
            );
            StrategyDecision::ConsultNext
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::NoDelayStrategy;
    use crate::cloud::{CloudRef, LaunchMode, ProvisioningLimits};
    use crate::ledger::Ledger;
    use crate::provisioner::load::{LoadSnapshot, LoadStatistics};
    use crate::provisioner::strategy::{PlannedLaunch, Strategy, StrategyDecision, StrategyState};
    use crate::tests::utils::{TestCloudBuilder, TestServices, init_test_logging};

    fn queued(queue_length: u32, available: u32, connecting: u32) -> LoadSnapshot {
        LoadSnapshot {
            available_executors: available,
            connecting_executors: connecting,
            queue_length,
            ..Default::default()
        }
    }

    fn run(
        clouds: &[CloudRef],
        ledger: &Arc<Ledger>,
        snapshot: LoadSnapshot,
        planned: u32,
    ) -> (StrategyDecision, Vec<PlannedLaunch>) {
        init_test_logging();
        let statistics = LoadStatistics::new(0.9);
        let services = TestServices::default();
        let context = services.context(clouds, ledger);
        let mut state = StrategyState::new(None, snapshot, &statistics, planned, context);
        let decision = NoDelayStrategy.apply(&mut state);
        (decision, state.into_launches())
    }

    #[test]
    fn covered_demand_touches_no_cloud() {
        let ledger = Arc::new(Ledger::new());
        let cloud = TestCloudBuilder::default().name("aws").build();
        let clouds = vec![cloud.clone() as CloudRef];

        let (decision, launches) = run(&clouds, &ledger, queued(4, 1, 1), 2);
        assert_eq!(decision, StrategyDecision::Completed);
        assert!(launches.is_empty());

        let (decision, _) = run(&clouds, &ledger, queued(0, 0, 0), 0);
        assert_eq!(decision, StrategyDecision::Completed);
        assert_eq!(cloud.provision_calls(), 0);
        assert_eq!(ledger.statistics().registration_attempts, 0);
    }

    #[test]
    fn reserves_before_provisioning() {
        let ledger = Arc::new(Ledger::new());
        let cloud = TestCloudBuilder::default()
            .name("aws")
            .limits(ProvisioningLimits::limited(10))
            .observed_ledger(ledger.clone())
            .build();
        let clouds = vec![cloud.clone() as CloudRef];

        let (decision, launches) = run(&clouds, &ledger, queued(2, 0, 0), 0);
        assert_eq!(decision, StrategyDecision::Completed);
        assert_eq!(launches.len(), 2);
        assert_eq!(cloud.requests(), vec![2]);
        // The reservation was already counted when the cloud was called
        assert_eq!(cloud.observed_counts(), vec![2]);
        assert_eq!(ledger.cloud_count("aws"), 2);
    }

    #[test]
    fn rejected_reservation_skips_provisioning() {
        let ledger = Arc::new(Ledger::new());
        let cloud = TestCloudBuilder::default()
            .name("aws")
            .limits(ProvisioningLimits::limited(1))
            .build();
        let clouds = vec![cloud.clone() as CloudRef];
        assert!(ledger.register(cloud.as_ref(), None, 1));

        let (decision, launches) = run(&clouds, &ledger, queued(2, 0, 0), 0);
        assert_eq!(decision, StrategyDecision::ConsultNext);
        assert!(launches.is_empty());
        assert_eq!(cloud.provision_calls(), 0);
        assert_eq!(ledger.cloud_count("aws"), 1);
    }

    #[test]
    fn failed_provision_releases_and_tries_next_cloud() {
        let ledger = Arc::new(Ledger::new());
        let broken = TestCloudBuilder::default()
            .name("broken")
            .fail_provision(true)
            .limits(ProvisioningLimits::limited(10))
            .build();
        let healthy = TestCloudBuilder::default()
            .name("healthy")
            .limits(ProvisioningLimits::limited(10))
            .build();
        let clouds = vec![broken.clone() as CloudRef, healthy.clone() as CloudRef];

        let (decision, launches) = run(&clouds, &ledger, queued(3, 0, 0), 0);
        assert_eq!(decision, StrategyDecision::Completed);
        assert_eq!(broken.provision_calls(), 1);
        assert_eq!(ledger.cloud_count("broken"), 0);
        assert_eq!(ledger.cloud_count("healthy"), 3);
        assert!(launches.iter().all(|l| l.cloud_name == "healthy"));
    }

    #[test]
    fn demand_is_spread_over_saturated_clouds() {
        let ledger = Arc::new(Ledger::new());
        let small = TestCloudBuilder::default()
            .name("small")
            .limits(ProvisioningLimits::limited(2))
            .build();
        let unlimited = TestCloudBuilder::default().name("big").build();
        let clouds = vec![small.clone() as CloudRef, unlimited.clone() as CloudRef];

        let (decision, launches) = run(&clouds, &ledger, queued(5, 0, 0), 0);
        assert_eq!(decision, StrategyDecision::Completed);
        assert_eq!(small.requests(), vec![2]);
        assert_eq!(unlimited.requests(), vec![3]);
        assert_eq!(launches.len(), 5);
        assert_eq!(ledger.cloud_count("small"), 2);
        assert_eq!(ledger.cloud_count("big"), 0);
        // Capacity planned from the first cloud is not announced to the second one
        assert_eq!(small.planned_capacities(), vec![0]);
        assert_eq!(unlimited.planned_capacities(), vec![0]);
    }

    #[test]
    fn unsuitable_clouds_are_skipped() {
        let ledger = Arc::new(Ledger::new());
        let refusing = TestCloudBuilder::default()
            .name("refusing")
            .can_provision(false)
            .build();
        let delayed = TestCloudBuilder::default()
            .name("delayed")
            .launch_modes(vec![LaunchMode::Delayed])
            .build();
        let clouds = vec![refusing.clone() as CloudRef, delayed.clone() as CloudRef];

        let (decision, launches) = run(&clouds, &ledger, queued(1, 0, 0), 0);
        assert_eq!(decision, StrategyDecision::ConsultNext);
        assert!(launches.is_empty());
        assert_eq!(refusing.provision_calls(), 0);
        assert_eq!(delayed.provision_calls(), 0);
    }
}
