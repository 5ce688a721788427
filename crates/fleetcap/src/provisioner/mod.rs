//! Control loop that turns unmet demand into planned nodes.
//!
//! Every label with queued work gets its own [`NodeProvisioner`]. On every cycle it collects
//! launches that finished since the last cycle, takes a load snapshot and consults the
//! [strategies](strategy) in order. Strategies reserve capacity in the ledger before they ask a
//! cloud to provision, and the resulting launches carry their reservation until the agent is
//! online or the launch fails.
//!
//! Listeners can veto provisioning from a cloud and observe every launch. Attempts and their
//! outcomes are counted in [`ProvisioningMetrics`], and the [`QueueItemTracker`] links queued items
//! to the nodes launched for them.
mod config;
mod listener;
mod load;
mod metrics;
mod node_provisioner;
mod process;
mod service;
pub mod strategy;
mod tracker;

pub use config::ProvisionerConfig;
pub use listener::{ProvisioningListener, ProvisioningListeners};
pub use load::{LoadSnapshot, LoadSource, LoadStatistics, MovingAverage};
pub use metrics::{AttemptContext, AttemptMetrics, MetricsSummary, ProvisioningMetrics};
pub use node_provisioner::{NodeProvisioner, PendingLaunchInfo, ProvisionerEnv};
pub use process::provisioner_process;
pub use service::{ProvisionerMessage, ProvisionerService, create_provisioner_service};
pub use tracker::{QueueItemId, QueueItemTracker};
