use async_trait::async_trait;
use chrono::{DateTime, Utc};
use swarmctl_domain::{Instance, InstanceFilter, InstanceId, InstanceSpec, ProviderCapabilities};

use crate::error::DriverError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

#[derive(Debug, Clone)]
pub struct LogEntry {
    pub timestamp: DateTime<Utc>,
    pub level: LogLevel,
    pub message: String,
    pub source: String,
}

#[derive(Debug, Clone, Default)]
pub struct LogOptions {
    pub lines: Option<usize>,
    pub since: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
    pub grep: Option<String>,
}

#[derive(Debug, Clone)]
pub struct LogBatch {
    pub entries: Vec<LogEntry>,
}

#[derive(Debug, Clone)]
pub struct ExecResult {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

/// Partial update applied by `update()` (§4.A): any field present replaces
/// the corresponding field of the existing spec; absent fields are kept.
#[derive(Debug, Clone, Default)]
pub struct PartialInstanceSpec {
    pub image: Option<String>,
    pub workspace_path: Option<String>,
    pub env: Option<std::collections::HashMap<String, String>>,
    pub resources: Option<swarmctl_domain::ResourceRequest>,
    pub network: Option<swarmctl_domain::NetworkRequest>,
    pub auth: Option<swarmctl_domain::AuthConfig>,
}

impl PartialInstanceSpec {
    pub fn apply(&self, base: &InstanceSpec) -> InstanceSpec {
        let mut merged = base.clone();
        if let Some(image) = &self.image {
            merged.image = image.clone();
        }
        if let Some(workspace_path) = &self.workspace_path {
            merged.workspace_path = workspace_path.clone();
        }
        if let Some(env) = &self.env {
            merged.env = env.clone();
        }
        if let Some(resources) = &self.resources {
            merged.resources = resources.clone();
        }
        if let Some(network) = &self.network {
            merged.network = network.clone();
        }
        if let Some(auth) = &self.auth {
            merged.auth = Some(auth.clone());
        }
        merged
    }
}

/// A provider driver: translates neutral instance operations into one
/// specific backend's API (§4.A). Every operation is asynchronous and
/// cancellable (dropping the future aborts it; no operation leaves the
/// backend in a half-committed unrecoverable state by design, though
/// `create` is the only one that promises best-effort cleanup on failure).
///
/// A driver never writes to the instance registry directly, and persists
/// nothing of its own — everything durable belongs to the registry or to
/// the backend itself.
#[async_trait]
pub trait Driver: Send + Sync + 'static {
    fn kind(&self) -> &str;

    /// Verifies backend reachability and creates any shared artifacts
    /// (e.g. a shared private network). Fails with `Unavailable` if the
    /// backend cannot be reached.
    async fn initialize(&self) -> Result<(), DriverError>;

    /// Pure and static; never suspends.
    fn capabilities(&self) -> ProviderCapabilities;

    /// Transactional from the caller's viewpoint: on success the backend
    /// holds every dependent artifact; on failure the driver has
    /// best-effort deleted anything it already created.
    async fn create(&self, spec: &InstanceSpec, name: &str) -> Result<Instance, DriverError>;

    /// Returns the latest observed state, refreshing live facts (status,
    /// network, resource usage) from the backend. `Ok(None)` means the
    /// backend has no record of this id.
    async fn get(&self, id: &InstanceId) -> Result<Option<Instance>, DriverError>;

    /// May be computed by enumerating the driver's own records or by
    /// querying the backend; filter semantics are §6's.
    async fn list(&self, filter: Option<&InstanceFilter>) -> Result<Vec<Instance>, DriverError>;

    async fn start(&self, id: &InstanceId) -> Result<Instance, DriverError>;

    async fn stop(&self, id: &InstanceId, force: bool) -> Result<Instance, DriverError>;

    async fn delete(&self, id: &InstanceId) -> Result<bool, DriverError>;

    /// Implemented as recreate: stop if running, destroy the backend
    /// object, re-create with the merged spec, then start iff the
    /// instance was running before. The returned instance preserves `id`.
    async fn update(&self, id: &InstanceId, partial: &PartialInstanceSpec) -> Result<Instance, DriverError>;

    async fn logs(&self, id: &InstanceId, opts: &LogOptions) -> Result<LogBatch, DriverError>;

    async fn exec(&self, id: &InstanceId, cmd: &[String]) -> Result<ExecResult, DriverError>;
}
