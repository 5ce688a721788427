//! Contract between the control plane and elastic compute backends.
mod identity;
mod limits;
mod set;

pub use identity::CloudIdentity;
pub use limits::{Cap, ProvisioningLimits, TemplateCaps};
pub use set::{CloudRef, CloudSet};

use futures::future::BoxFuture;
use std::fmt::{Debug, Formatter};
use std::future::Future;

use crate::agent::Agent;
use crate::{Label, TemplateId};

/// How eagerly a strategy starts new agents.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LaunchMode {
    /// Agents are requested as soon as unmet demand is observed.
    Immediate,
    /// Agents are requested only after the demand has persisted for a while.
    Delayed,
}

/// Parameters passed to a cloud when it is asked whether and how to provision.
#[derive(Debug, Clone, Default)]
pub struct CloudState {
    /// Label under consideration, `None` for work that can run anywhere.
    pub label: Option<Label>,
    /// Capacity already planned for this label by earlier strategies in the current cycle.
    pub additional_planned_capacity: u32,
}

impl CloudState {
    pub fn new(label: Option<Label>, additional_planned_capacity: u32) -> Self {
        Self {
            label,
            additional_planned_capacity,
        }
    }
}

pub type AgentFuture = BoxFuture<'static, anyhow::Result<Agent>>;

/// An agent that has been requested from a cloud but is not online yet.
pub struct PlannedNode {
    pub display_name: String,
    pub num_executors: u32,
    /// Resolves once the agent can be added to the registry.
    pub future: AgentFuture,
}

impl PlannedNode {
    pub fn new<F>(display_name: impl Into<String>, num_executors: u32, future: F) -> Self
    where
        F: Future<Output = anyhow::Result<Agent>> + Send + 'static,
    {
        Self {
            display_name: display_name.into(),
            num_executors,
            future: Box::pin(future),
        }
    }
}

impl Debug for PlannedNode {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlannedNode")
            .field("display_name", &self.display_name)
            .field("num_executors", &self.num_executors)
            .finish_non_exhaustive()
    }
}

/// An elastic compute backend that can start new agents.
///
/// Every method except [`Cloud::provision`] has to be cheap and must not perform I/O, because it
/// is called on the control loop for every evaluation cycle.
pub trait Cloud: Send + Sync {
    fn identity(&self) -> &CloudIdentity;

    fn name(&self) -> &str {
        self.identity().name()
    }

    /// Caps on the executors that may be reserved from this cloud at once.
    fn limits(&self) -> ProvisioningLimits {
        ProvisioningLimits::Unlimited
    }

    fn supports_limits(&self) -> bool {
        self.limits().is_limited()
    }

    /// Pre-filter: can this cloud start agents for the given state at all?
    fn can_provision(&self, state: &CloudState) -> bool;

    fn supports_launch_mode(&self, _mode: LaunchMode) -> bool {
        true
    }

    /// Template that would be used to serve `state`, if the cloud has templates.
    fn template_for(&self, _state: &CloudState) -> Option<TemplateId> {
        None
    }

    /// Starts agents for up to `excess_workload` executors.
    ///
    /// Has to return promptly; the returned futures are awaited outside of the control loop.
    fn provision(
        &self,
        state: &CloudState,
        excess_workload: u32,
    ) -> anyhow::Result<Vec<PlannedNode>>;
}
