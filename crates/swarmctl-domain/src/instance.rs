use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::{InstanceId, ProviderKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstanceStatus {
    Creating,
    Running,
    Stopped,
    Failed,
    Deleted,
}

impl InstanceStatus {
    /// `Deleted` is terminal: no successor operation may move away from it.
    pub fn is_terminal(&self) -> bool {
        matches!(self, InstanceStatus::Deleted)
    }
}

impl std::fmt::Display for InstanceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            InstanceStatus::Creating => write!(f, "creating"),
            InstanceStatus::Running => write!(f, "running"),
            InstanceStatus::Stopped => write!(f, "stopped"),
            InstanceStatus::Failed => write!(f, "failed"),
            InstanceStatus::Deleted => write!(f, "deleted"),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CpuRequest {
    pub cores: f64,
    /// `true` requests a dedicated core rather than a shared/burstable one.
    #[serde(default)]
    pub dedicated: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MemoryRequest {
    pub min_mib: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StorageRequest {
    pub size_gib: u64,
    #[serde(default)]
    pub persistent: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourceRequest {
    pub cpu: CpuRequest,
    pub memory: MemoryRequest,
    pub storage: Option<StorageRequest>,
    pub region: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NetworkRequest {
    pub port: u16,
    #[serde(default)]
    pub internal_only: bool,
    /// Provider-specific knobs (e.g. `"volume_id"`, Fly `"service_protocol"`)
    /// that have no neutral representation.
    #[serde(default)]
    pub extra: HashMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthMode {
    None,
    Token,
    Mtls,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthConfig {
    pub mode: AuthMode,
    pub token: Option<String>,
}

/// The instance-creation request: the immutable part of an `Instance`,
/// replaced wholesale (never field-merged by a caller) on `update`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InstanceSpec {
    pub image: String,
    pub workspace_path: String,
    #[serde(default)]
    pub env: HashMap<String, String>,
    pub resources: ResourceRequest,
    pub network: NetworkRequest,
    pub auth: Option<AuthConfig>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourceUsage {
    pub cpu_percent: f64,
    pub memory_mib: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortMapping {
    pub internal: u16,
    pub external: u16,
    pub protocol: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NetworkFacts {
    pub internal_ip: Option<String>,
    pub external_ip: Option<String>,
    #[serde(default)]
    pub ports: Vec<PortMapping>,
    #[serde(default)]
    pub urls: Vec<String>,
}

/// One remote development-environment instance: the aggregate root of the
/// whole data model (§3).
///
/// `extra` carries any field a future on-disk format adds that this binary
/// does not know about yet; it is preserved verbatim on every
/// deserialize/serialize round trip (§6, §8 invariant 4).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Instance {
    pub id: InstanceId,
    pub provider_instance_id: Option<String>,
    pub provider_kind: ProviderKind,
    pub name: String,
    pub status: InstanceStatus,
    pub spec: InstanceSpec,
    #[serde(default)]
    pub usage: ResourceUsage,
    #[serde(default)]
    pub network: NetworkFacts,
    /// Provider-private keys (e.g. the backend's own container id) plus
    /// any free-form tags a caller attaches. Opaque to every component
    /// except the driver that wrote it.
    #[serde(default)]
    pub metadata: HashMap<String, String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(flatten, default)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl Instance {
    pub fn new(id: InstanceId, provider_kind: ProviderKind, name: impl Into<String>, spec: InstanceSpec) -> Self {
        let now = Utc::now();
        Instance {
            id,
            provider_instance_id: None,
            provider_kind,
            name: name.into(),
            status: InstanceStatus::Creating,
            spec,
            usage: ResourceUsage::default(),
            network: NetworkFacts::default(),
            metadata: HashMap::new(),
            created_at: now,
            updated_at: now,
            extra: serde_json::Map::new(),
        }
    }

    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Instance {
        let mut spec = InstanceSpec::default();
        spec.image = "editor:1".into();
        spec.workspace_path = "/w".into();
        spec.network.port = 8080;
        Instance::new(InstanceId::new("abc"), ProviderKind::new("container"), "ws-1", spec)
    }

    #[test]
    fn deleted_status_is_terminal() {
        assert!(InstanceStatus::Deleted.is_terminal());
        assert!(!InstanceStatus::Running.is_terminal());
    }

    #[test]
    fn round_trip_preserves_unknown_fields() {
        let inst = sample();
        let mut value = serde_json::to_value(&inst).unwrap();
        value
            .as_object_mut()
            .unwrap()
            .insert("future_field".into(), serde_json::json!("surprise"));
        let reloaded: Instance = serde_json::from_value(value.clone()).unwrap();
        assert_eq!(reloaded.extra.get("future_field").unwrap(), "surprise");
        let roundtripped = serde_json::to_value(&reloaded).unwrap();
        assert_eq!(roundtripped, value);
    }

    #[test]
    fn round_trip_preserves_timestamps_to_iso8601_precision() {
        let inst = sample();
        let json = serde_json::to_string(&inst).unwrap();
        let back: Instance = serde_json::from_str(&json).unwrap();
        assert_eq!(inst.created_at, back.created_at);
        assert_eq!(inst.updated_at, back.updated_at);
    }
}
