use tokio::time::{Instant, MissedTickBehavior};

use crate::common::rpc::RpcReceiver;
use crate::provisioner::config::ProvisionerConfig;
use crate::provisioner::node_provisioner::{NodeProvisioner, ProvisionerEnv};
use crate::provisioner::service::ProvisionerMessage;
use crate::provisioner::strategy::Strategy;
use crate::{Label, Map};

struct ProvisionerState {
    env: ProvisionerEnv,
    config: ProvisionerConfig,
    strategies: Vec<Box<dyn Strategy>>,
    provisioners: Map<Option<Label>, NodeProvisioner>,
}

/// Main provisioning loop. Evaluates all labels periodically and whenever a review is suggested,
/// until the service is stopped.
///
/// The ledger is rebuilt from the registry before the first cycle, so agents that existed before
/// the loop started count against the caps.
pub async fn provisioner_process(
    env: ProvisionerEnv,
    config: ProvisionerConfig,
    strategies: Vec<Box<dyn Strategy>>,
    mut receiver: RpcReceiver<ProvisionerMessage>,
) {
    let mut interval =
        tokio::time::interval_at(Instant::now() + config.initial_delay, config.recurrence);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let mut state = ProvisionerState {
        env,
        config,
        strategies,
        provisioners: Default::default(),
    };
    reinitialize_ledger(&state);

    loop {
        tokio::select! {
            _ = interval.tick() => {
                update_all(&mut state);
            }
            msg = receiver.recv() => {
                match msg {
                    None | Some(ProvisionerMessage::Quit) => break,
                    Some(message) => handle_message(&mut state, message),
                }
            }
        }
    }

    log::debug!("Ending provisioner, cancelling pending launches");
    for provisioner in state.provisioners.values_mut() {
        provisioner.shutdown();
    }
}

fn handle_message(state: &mut ProvisionerState, message: ProvisionerMessage) {
    log::debug!("Handling message {message:?}");
    match message {
        ProvisionerMessage::SuggestReview => update_all(state),
        ProvisionerMessage::GetPendingLaunches(response) => {
            let mut launches: Vec<_> = state
                .provisioners
                .values()
                .flat_map(|provisioner| provisioner.pending_launches())
                .collect();
            launches.sort_by(|a, b| a.display_name.cmp(&b.display_name));
            response.respond(launches);
        }
        ProvisionerMessage::ReinitializeLedger(response) => {
            reinitialize_ledger(state);
            response.respond(());
        }
        ProvisionerMessage::Quit => {}
    }
}

fn reinitialize_ledger(state: &ProvisionerState) {
    let clouds = state.env.clouds.snapshot();
    let agents = state.env.registry.agents();
    state.env.ledger.reinitialize(&clouds, &agents);
}

fn update_all(state: &mut ProvisionerState) {
    let labels = state.env.load.labels();
    for label in &labels {
        if !state.provisioners.contains_key(label) {
            log::debug!("Creating provisioner for label {label:?}");
            state.provisioners.insert(
                label.clone(),
                NodeProvisioner::new(label.clone(), state.config.load_decay),
            );
        }
    }

    for provisioner in state.provisioners.values_mut() {
        provisioner.update(&state.env, &state.strategies);
    }

    // Provisioners of labels that disappeared are kept until their launches finish
    state.provisioners.retain(|label, provisioner| {
        let keep = labels.contains(label) || provisioner.has_pending_launches();
        if !keep {
            log::debug!("Removing provisioner for label {:?}", provisioner.label());
        }
        keep
    });
}
