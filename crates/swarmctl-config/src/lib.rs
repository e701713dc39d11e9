pub mod driver_config;
pub mod error;
pub mod loader;
pub mod swarm_config;

pub use driver_config::{CloudDriverConfig, ContainerDriverConfig, DriverConfig, ProviderEntry};
pub use error::ConfigError;
pub use loader::load_swarm_config;
pub use swarm_config::SwarmConfig;
