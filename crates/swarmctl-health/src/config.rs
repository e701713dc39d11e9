use std::time::Duration;

/// Constructor-level settings for the health monitor (§4.D), built by
/// whatever wires `swarmctl-core` together from the broader `SwarmConfig`.
#[derive(Debug, Clone)]
pub struct HealthMonitorConfig {
    pub check_interval: Duration,
    pub history_size: usize,
    pub auto_recover: bool,
    pub max_recovery_attempts: u32,
    /// The no-op probe command run via `Driver::exec`, e.g. `["echo", "ok"]`.
    pub probe_command: Vec<String>,
}

impl Default for HealthMonitorConfig {
    fn default() -> Self {
        HealthMonitorConfig {
            check_interval: Duration::from_secs(30),
            history_size: 20,
            auto_recover: false,
            max_recovery_attempts: 3,
            probe_command: vec!["echo".to_string(), "swarmctl-probe".to_string()],
        }
    }
}
