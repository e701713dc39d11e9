use serde::{Deserialize, Serialize};

/// Configuration for the container driver (§6.1): a local container CLI
/// invoked as a subprocess.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContainerDriverConfig {
    /// Path or bare name of the CLI binary, e.g. `"docker"` or `"podman"`.
    #[serde(default = "default_binary")]
    pub binary: String,
    /// Shared private network created lazily by `initialize()`.
    #[serde(default = "default_network_name")]
    pub network_name: String,
    /// Hard per-invocation timeout.
    #[serde(default = "default_command_timeout_secs")]
    pub command_timeout_secs: u64,
}

fn default_binary() -> String {
    "docker".to_string()
}

fn default_network_name() -> String {
    "swarmctl".to_string()
}

fn default_command_timeout_secs() -> u64 {
    30
}

impl Default for ContainerDriverConfig {
    fn default() -> Self {
        ContainerDriverConfig {
            binary: default_binary(),
            network_name: default_network_name(),
            command_timeout_secs: default_command_timeout_secs(),
        }
    }
}

/// Configuration for the cloud driver (§6.2): a token-authenticated HTTPS
/// client against a micro-VM platform.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CloudDriverConfig {
    pub api_base: String,
    pub auth_token: String,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

fn default_request_timeout_secs() -> u64 {
    30
}

fn default_initial_backoff_ms() -> u64 {
    250
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

fn default_max_backoff_ms() -> u64 {
    10_000
}

fn default_max_retries() -> u32 {
    6
}

impl Default for CloudDriverConfig {
    fn default() -> Self {
        CloudDriverConfig {
            api_base: String::new(),
            auth_token: String::new(),
            request_timeout_secs: default_request_timeout_secs(),
            initial_backoff_ms: default_initial_backoff_ms(),
            backoff_multiplier: default_backoff_multiplier(),
            max_backoff_ms: default_max_backoff_ms(),
            max_retries: default_max_retries(),
        }
    }
}

/// The configuration handed to the provider registry/factory (§4.B) for
/// one provider kind at startup.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DriverConfig {
    Container(ContainerDriverConfig),
    Cloud(CloudDriverConfig),
}

/// One entry in the swarm's provider table: a kind tag, whether it is
/// enabled, and its driver config. Disabled entries are skipped during
/// `SwarmController::initialize()` (§4.F) but remain visible to
/// `status()`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderEntry {
    pub kind: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    pub config: DriverConfig,
}

fn default_enabled() -> bool {
    true
}
