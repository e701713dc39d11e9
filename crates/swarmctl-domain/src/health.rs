use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    Healthy,
    Unhealthy,
    /// Reserved for future partial-failure signals; not produced by the
    /// required core checks.
    Degraded,
    Recovering,
    Unknown,
}

impl std::fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HealthStatus::Healthy => write!(f, "healthy"),
            HealthStatus::Unhealthy => write!(f, "unhealthy"),
            HealthStatus::Degraded => write!(f, "degraded"),
            HealthStatus::Recovering => write!(f, "recovering"),
            HealthStatus::Unknown => write!(f, "unknown"),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HealthDetails {
    pub message: String,
    pub error: Option<String>,
    pub response_time_ms: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthSnapshot {
    pub status: HealthStatus,
    pub checked_at: DateTime<Utc>,
    pub details: HealthDetails,
}

/// Health record for one instance. `history` is newest-first and capped at
/// `history_size` (§4.D, §8 invariant 7).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstanceHealth {
    pub status: HealthStatus,
    pub last_checked: DateTime<Utc>,
    pub details: HealthDetails,
    pub history: Vec<HealthSnapshot>,
    #[serde(flatten, default)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl InstanceHealth {
    pub fn unknown() -> Self {
        let now = Utc::now();
        InstanceHealth {
            status: HealthStatus::Unknown,
            last_checked: now,
            details: HealthDetails::default(),
            history: Vec::new(),
            extra: serde_json::Map::new(),
        }
    }

    /// Records a new check outcome at the front of `history`, discarding
    /// anything past `history_size`.
    pub fn record(&mut self, status: HealthStatus, details: HealthDetails, history_size: usize) {
        let now = Utc::now();
        self.status = status;
        self.last_checked = now;
        self.details = details.clone();
        self.history.insert(
            0,
            HealthSnapshot {
                status,
                checked_at: now,
                details,
            },
        );
        self.history.truncate(history_size);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn history_length_never_exceeds_cap() {
        let mut health = InstanceHealth::unknown();
        for i in 0..10 {
            health.record(
                HealthStatus::Healthy,
                HealthDetails {
                    message: format!("check {i}"),
                    ..Default::default()
                },
                3,
            );
        }
        assert_eq!(health.history.len(), 3);
        assert_eq!(health.history[0].details.message, "check 9");
    }
}
