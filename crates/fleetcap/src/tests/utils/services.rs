use std::sync::Arc;

use crate::cloud::CloudRef;
use crate::ledger::Ledger;
use crate::provisioner::strategy::StrategyContext;
use crate::provisioner::{ProvisioningListeners, ProvisioningMetrics, QueueItemTracker};

/// Owns the services that strategies borrow through a [`StrategyContext`].
#[derive(Default)]
pub struct TestServices {
    pub listeners: ProvisioningListeners,
    pub metrics: ProvisioningMetrics,
    pub tracker: QueueItemTracker,
}

impl TestServices {
    pub fn context<'a>(
        &'a self,
        clouds: &'a [CloudRef],
        ledger: &'a Arc<Ledger>,
    ) -> StrategyContext<'a> {
        StrategyContext {
            clouds,
            ledger,
            listeners: &self.listeners,
            metrics: &self.metrics,
            tracker: &self.tracker,
        }
    }
}
