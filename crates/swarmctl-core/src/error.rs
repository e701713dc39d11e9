use thiserror::Error;

#[derive(Debug, Error)]
pub enum ControllerError {
    #[error("swarm controller not initialized")]
    NotInitialized,

    #[error("instance not found: {0}")]
    NotFound(String),

    #[error("no driver loaded for provider kind '{0}'")]
    ProviderUnavailable(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error(transparent)]
    Driver(#[from] swarmctl_driver::DriverError),

    #[error(transparent)]
    Registry(#[from] swarmctl_registry::RegistryError),

    #[error(transparent)]
    Health(#[from] swarmctl_health::HealthError),

    #[error(transparent)]
    Migration(#[from] swarmctl_migration::MigrationError),
}
