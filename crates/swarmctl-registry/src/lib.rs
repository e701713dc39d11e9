pub mod codec;
pub mod error;
pub mod instance_registry;

pub use error::RegistryError;
pub use instance_registry::InstanceRegistry;
