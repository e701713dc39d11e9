use serde::{Deserialize, Serialize};

/// Static facts about what a driver can and cannot do (§3). Pure and
/// immutable; a driver's `capabilities()` never suspends.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProviderCapabilities {
    pub supports_live_resize: bool,
    pub supports_snapshotting: bool,
    pub supports_multi_region: bool,
    #[serde(default)]
    pub regions: Vec<String>,
    pub max_instances_per_caller: u32,
    pub max_cpu_cores_per_instance: f64,
    pub max_memory_mib_per_instance: u64,
}
