//! Fleet-capacity control plane.
//!
//! Decides, on a recurring cycle, whether more ephemeral agents have to be started from elastic
//! compute backends (clouds), and enforces per-cloud and per-template ceilings on the capacity
//! that may be reserved at the same time.
//!
//! The pieces fit together as follows:
//! - [`ledger::Ledger`] counts reserved executors per cloud and template and admits new
//!   reservations atomically against the caps of the cloud.
//! - [`cloud::Cloud`] is the contract a provisioning backend implements.
//! - [`provisioner`] contains the strategies that compute unmet demand and the control loop that
//!   runs them periodically.
//! - [`reconciler::NodeLifecycleReconciler`] releases capacity of agents that disappear from the
//!   [`agent::AgentRegistry`]. [`provisioner::ProvisionerEnv::new`] attaches it to the registry.
pub mod agent;
pub mod cloud;
pub mod common;
pub mod ledger;
pub mod provisioner;
pub mod reconciler;

#[cfg(test)]
pub(crate) mod tests;

use fxhash::FxBuildHasher;

pub type Map<K, V> = hashbrown::HashMap<K, V, FxBuildHasher>;
pub type Set<T> = hashbrown::HashSet<T, FxBuildHasher>;

pub type Error = crate::common::error::FleetError;
pub type Result<T> = std::result::Result<T, Error>;

pub use common::ids::{Label, TemplateId};
