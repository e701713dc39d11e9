use thiserror::Error;

#[derive(Debug, Error)]
pub enum MigrationError {
    #[error("migration plan not found: {0}")]
    NotFound(String),

    #[error("no driver loaded for provider kind '{0}'")]
    NoDriver(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error(transparent)]
    Driver(#[from] swarmctl_driver::DriverError),

    #[error(transparent)]
    Registry(#[from] swarmctl_registry::RegistryError),
}
