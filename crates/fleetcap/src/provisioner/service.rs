use std::future::Future;

use crate::common::rpc::{RpcSender, ResponseToken, make_rpc_queue, request};
use crate::provisioner::config::ProvisionerConfig;
use crate::provisioner::node_provisioner::{PendingLaunchInfo, ProvisionerEnv};
use crate::provisioner::process::provisioner_process;
use crate::provisioner::strategy::Strategy;

#[derive(Debug)]
pub enum ProvisionerMessage {
    // Events
    SuggestReview,
    // Requests
    GetPendingLaunches(ResponseToken<Vec<PendingLaunchInfo>>),
    ReinitializeLedger(ResponseToken<()>),
    Quit,
}

/// Handle of a running provisioning loop.
#[derive(Clone)]
pub struct ProvisionerService {
    sender: RpcSender<ProvisionerMessage>,
}

impl ProvisionerService {
    /// Asks for an evaluation cycle right away, e.g. after new work was queued.
    pub fn suggest_review(&self) {
        self.send(ProvisionerMessage::SuggestReview);
    }

    pub async fn get_pending_launches(&self) -> crate::Result<Vec<PendingLaunchInfo>> {
        request(&self.sender, ProvisionerMessage::GetPendingLaunches).await
    }

    /// Rebuilds the ledger from the agents that are currently in the registry.
    pub async fn reinitialize_ledger(&self) -> crate::Result<()> {
        request(&self.sender, ProvisionerMessage::ReinitializeLedger).await
    }

    /// Stops the loop. Pending launches are cancelled and their reservations released.
    pub fn stop(&self) {
        self.send(ProvisionerMessage::Quit);
    }

    fn send(&self, msg: ProvisionerMessage) {
        if self.sender.send(msg).is_err() {
            log::debug!("Provisioner is not running, message dropped");
        }
    }
}

pub fn create_provisioner_service(
    env: ProvisionerEnv,
    config: ProvisionerConfig,
    strategies: Vec<Box<dyn Strategy>>,
) -> (ProvisionerService, impl Future<Output = ()>) {
    let (tx, rx) = make_rpc_queue();
    let process = provisioner_process(env, config, strategies, rx);
    let service = ProvisionerService { sender: tx };
    (service, process)
}
