use serde::{Deserialize, Serialize};

// ── Identifiers ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct InstanceId(pub String);

impl InstanceId {
    pub fn new(s: impl Into<String>) -> Self {
        InstanceId(s.into())
    }

    /// Generates a fresh, URL-safe id.
    pub fn generate() -> Self {
        InstanceId(uuid::Uuid::new_v4().simple().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for InstanceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MigrationPlanId(pub String);

impl MigrationPlanId {
    pub fn new(s: impl Into<String>) -> Self {
        MigrationPlanId(s.into())
    }

    pub fn generate() -> Self {
        MigrationPlanId(uuid::Uuid::new_v4().simple().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for MigrationPlanId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A provider-kind tag (`"container"`, `"cloud"`, ...). Kept as a newtype
/// rather than an enum: the registry (§4.B) is keyed dynamically at
/// startup by whatever kinds are configured, so the core data model must
/// not hard-code the set of providers that exist.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ProviderKind(pub String);

impl ProviderKind {
    pub fn new(s: impl Into<String>) -> Self {
        ProviderKind(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for ProviderKind {
    fn from(s: &str) -> Self {
        ProviderKind(s.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn instance_id_generate_is_url_safe() {
        let id = InstanceId::generate();
        assert!(id.as_str().chars().all(|c| c.is_ascii_alphanumeric()));
    }

    #[test]
    fn provider_kind_from_str() {
        let k: ProviderKind = "container".into();
        assert_eq!(k.as_str(), "container");
    }
}
