use thiserror::Error;

#[derive(Debug, Error)]
pub enum HealthError {
    #[error("instance not found: {0}")]
    NotFound(String),

    #[error("no driver loaded for provider kind '{0}'")]
    NoDriver(String),

    #[error("recovery attempts exhausted for instance {0}")]
    RecoveryExhausted(String),

    #[error(transparent)]
    Registry(#[from] swarmctl_registry::RegistryError),
}
