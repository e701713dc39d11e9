use serde::{Deserialize, Serialize};

use crate::driver_config::ProviderEntry;

/// Top-level configuration for the swarm controller and its components
/// (§4.C, §4.D, §4.E). Typed, built directly by a caller or loaded from a
/// YAML file via [`crate::loader::load_swarm_config`]; there is no
/// environment-variable loading path (out of scope, §1).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SwarmConfig {
    pub state_dir: std::path::PathBuf,
    #[serde(default = "default_true")]
    pub load_state_on_startup: bool,
    /// Background re-flush period for the instance registry; 0 disables it.
    #[serde(default)]
    pub flush_interval_secs: u64,

    #[serde(default = "default_check_interval_secs")]
    pub check_interval_secs: u64,
    #[serde(default = "default_history_size")]
    pub history_size: usize,
    #[serde(default)]
    pub auto_recover: bool,
    #[serde(default = "default_max_recovery_attempts")]
    pub max_recovery_attempts: u32,

    #[serde(default = "default_true")]
    pub migration_enabled: bool,

    #[serde(default)]
    pub providers: Vec<ProviderEntry>,
}

fn default_true() -> bool {
    true
}

fn default_check_interval_secs() -> u64 {
    30
}

fn default_history_size() -> usize {
    20
}

fn default_max_recovery_attempts() -> u32 {
    3
}

impl Default for SwarmConfig {
    fn default() -> Self {
        SwarmConfig {
            state_dir: std::path::PathBuf::from("./swarmctl-state"),
            load_state_on_startup: true,
            flush_interval_secs: 0,
            check_interval_secs: default_check_interval_secs(),
            history_size: default_history_size(),
            auto_recover: false,
            max_recovery_attempts: default_max_recovery_attempts(),
            migration_enabled: true,
            providers: Vec::new(),
        }
    }
}
