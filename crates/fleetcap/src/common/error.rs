use thiserror::Error;

#[derive(Debug, Error)]
pub enum FleetError {
    #[error("Agent {0} already exists")]
    DuplicateAgent(String),
    #[error("Agent {0} not found")]
    AgentNotFound(String),
    #[error("Provisioner service is not running")]
    ServiceStopped,
}
