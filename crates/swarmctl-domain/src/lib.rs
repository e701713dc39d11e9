pub mod capabilities;
pub mod error;
pub mod filter;
pub mod health;
pub mod ids;
pub mod instance;
pub mod migration;

pub use capabilities::ProviderCapabilities;
pub use error::{ErrorEnvelope, SwarmError};
pub use filter::InstanceFilter;
pub use health::{HealthDetails, HealthSnapshot, HealthStatus, InstanceHealth};
pub use ids::{InstanceId, MigrationPlanId, ProviderKind};
pub use instance::{
    AuthConfig, AuthMode, CpuRequest, Instance, InstanceSpec, InstanceStatus, MemoryRequest, NetworkFacts,
    NetworkRequest, PortMapping, ResourceRequest, ResourceUsage, StorageRequest,
};
pub use migration::{
    MigrationOptions, MigrationPlan, MigrationPlanStatus, MigrationStep, MigrationStepKind, MigrationStrategy,
    StepStatus,
};
