use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use derive_builder::Builder;
use tokio::sync::Semaphore;

use crate::agent::Agent;
use crate::cloud::{Cloud, CloudIdentity, CloudState, LaunchMode, PlannedNode, ProvisioningLimits};
use crate::ledger::Ledger;
use crate::TemplateId;

#[derive(Builder)]
#[builder(name = "TestCloudBuilder", pattern = "owned", build_fn(name = "finish"))]
pub struct TestCloudConfig {
    #[builder(setter(into))]
    name: String,
    #[builder(default)]
    limits: ProvisioningLimits,
    #[builder(default, setter(into, strip_option))]
    template: Option<TemplateId>,
    #[builder(default = "true")]
    can_provision: bool,
    #[builder(default = "vec![LaunchMode::Immediate, LaunchMode::Delayed]")]
    launch_modes: Vec<LaunchMode>,
    #[builder(default = "1")]
    executors_per_node: u32,
    #[builder(default)]
    max_nodes: Option<u32>,
    /// Executors of the launched agents, if they differ from the planned ones
    #[builder(default, setter(strip_option))]
    agent_executors: Option<u32>,
    /// `provision` returns an error
    #[builder(default)]
    fail_provision: bool,
    /// `provision` panics
    #[builder(default)]
    panic_provision: bool,
    /// Launch futures resolve to an error
    #[builder(default)]
    fail_launch: bool,
    /// Launch futures wait for a permit of this semaphore
    #[builder(default, setter(strip_option))]
    launch_gate: Option<Arc<Semaphore>>,
    /// Ledger whose count of this cloud is recorded on every `provision` call
    #[builder(default, setter(strip_option))]
    observed_ledger: Option<Arc<Ledger>>,
}

impl TestCloudBuilder {
    pub fn build(self) -> Arc<TestCloud> {
        let config = self.finish().unwrap();
        Arc::new(TestCloud {
            identity: CloudIdentity::new(config.name.clone()),
            config,
            requests: Default::default(),
            planned_capacities: Default::default(),
            observed_counts: Default::default(),
            provision_calls: AtomicUsize::new(0),
            next_instance: AtomicU32::new(1000),
        })
    }
}

pub struct TestCloud {
    identity: CloudIdentity,
    config: TestCloudConfig,
    requests: Mutex<Vec<u32>>,
    planned_capacities: Mutex<Vec<u32>>,
    observed_counts: Mutex<Vec<u32>>,
    provision_calls: AtomicUsize,
    next_instance: AtomicU32,
}

impl TestCloud {
    pub fn provision_calls(&self) -> usize {
        self.provision_calls.load(Ordering::SeqCst)
    }

    /// Excess workloads passed to `provision`, in order.
    pub fn requests(&self) -> Vec<u32> {
        self.requests.lock().unwrap().clone()
    }

    /// `additional_planned_capacity` of the states passed to `provision`, in order.
    pub fn planned_capacities(&self) -> Vec<u32> {
        self.planned_capacities.lock().unwrap().clone()
    }

    /// Counts of this cloud in the observed ledger at the time of each `provision` call.
    pub fn observed_counts(&self) -> Vec<u32> {
        self.observed_counts.lock().unwrap().clone()
    }
}

impl Cloud for TestCloud {
    fn identity(&self) -> &CloudIdentity {
        &self.identity
    }

    fn limits(&self) -> ProvisioningLimits {
        self.config.limits.clone()
    }

    fn can_provision(&self, _state: &CloudState) -> bool {
        self.config.can_provision
    }

    fn supports_launch_mode(&self, mode: LaunchMode) -> bool {
        self.config.launch_modes.contains(&mode)
    }

    fn template_for(&self, _state: &CloudState) -> Option<TemplateId> {
        self.config.template.clone()
    }

    fn provision(
        &self,
        state: &CloudState,
        excess_workload: u32,
    ) -> anyhow::Result<Vec<PlannedNode>> {
        self.provision_calls.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().unwrap().push(excess_workload);
        self.planned_capacities
            .lock()
            .unwrap()
            .push(state.additional_planned_capacity);
        if let Some(ledger) = &self.config.observed_ledger {
            self.observed_counts
                .lock()
                .unwrap()
                .push(ledger.cloud_count(self.name()));
        }
        if self.config.panic_provision {
            panic!("cloud {} is broken", self.name());
        }
        if self.config.fail_provision {
            anyhow::bail!("quota of {} exceeded", self.name());
        }

        let per_node = self.config.executors_per_node;
        let agent_executors = self.config.agent_executors.unwrap_or(per_node);
        let mut count = excess_workload.div_ceil(per_node);
        if let Some(max) = self.config.max_nodes {
            count = count.min(max);
        }
        let template = self
            .config
            .template
            .as_ref()
            .map(|t| t.as_str().to_string())
            .unwrap_or_else(|| "node".to_string());

        let nodes = (0..count)
            .map(|_| {
                let instance = self.next_instance.fetch_add(1, Ordering::SeqCst);
                let name = format!("{}-{template}-{instance}", self.name());
                let labels: Vec<_> = state.label.iter().cloned().collect();
                let gate = self.config.launch_gate.clone();
                let fail = self.config.fail_launch;
                let agent_name = name.clone();
                PlannedNode::new(name, per_node, async move {
                    if let Some(gate) = gate {
                        gate.acquire().await?.forget();
                    }
                    if fail {
                        anyhow::bail!("agent {agent_name} did not come online");
                    }
                    Ok::<_, anyhow::Error>(Agent::new(agent_name, agent_executors).with_labels(labels))
                })
            })
            .collect();
        Ok(nodes)
    }
}
