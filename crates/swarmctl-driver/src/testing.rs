use std::collections::HashMap;
use std::sync::Arc;

use swarmctl_domain::{
    Instance, InstanceFilter, InstanceId, InstanceSpec, InstanceStatus, ProviderCapabilities, ProviderKind,
};
use tokio::sync::RwLock;

use crate::driver::{Driver, ExecResult, LogBatch, LogOptions, PartialInstanceSpec};
use crate::error::DriverError;

#[derive(Debug, Default)]
struct Inner {
    instances: HashMap<InstanceId, Instance>,
    /// When set, every operation below fails with this error instead of
    /// touching `instances` — lets tests exercise the caller's error path.
    fail_with: Option<String>,
}

/// In-memory [`Driver`] double shared by the registry/health/migration/core
/// test suites. Never reaches a network or subprocess; good enough to drive
/// the orchestration logic those crates actually own.
#[derive(Debug, Clone, Default)]
pub struct StubDriver {
    inner: Arc<RwLock<Inner>>,
}

impl StubDriver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every subsequent call fail with `Internal(reason)` until cleared.
    pub async fn fail_with(&self, reason: impl Into<String>) {
        self.inner.write().await.fail_with = Some(reason.into());
    }

    pub async fn clear_failure(&self) {
        self.inner.write().await.fail_with = None;
    }

    /// Directly seeds an instance, bypassing `create()` — useful for tests
    /// that need to start from a specific status.
    pub async fn seed(&self, instance: Instance) {
        self.inner.write().await.instances.insert(instance.id.clone(), instance);
    }

    async fn check_failure(&self) -> Result<(), DriverError> {
        if let Some(reason) = &self.inner.read().await.fail_with {
            return Err(DriverError::Internal(reason.clone()));
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl Driver for StubDriver {
    fn kind(&self) -> &str {
        "stub"
    }

    async fn initialize(&self) -> Result<(), DriverError> {
        self.check_failure().await
    }

    fn capabilities(&self) -> ProviderCapabilities {
        ProviderCapabilities {
            supports_live_resize: true,
            supports_snapshotting: false,
            supports_multi_region: false,
            regions: vec!["local".to_string()],
            max_instances_per_caller: 1000,
            max_cpu_cores_per_instance: 64.0,
            max_memory_mib_per_instance: 262_144,
        }
    }

    async fn create(&self, spec: &InstanceSpec, name: &str) -> Result<Instance, DriverError> {
        self.check_failure().await?;
        let id = InstanceId::generate();
        let mut instance = Instance::new(id.clone(), ProviderKind::new(self.kind()), name, spec.clone());
        instance.status = InstanceStatus::Running;
        self.inner.write().await.instances.insert(id, instance.clone());
        Ok(instance)
    }

    async fn get(&self, id: &InstanceId) -> Result<Option<Instance>, DriverError> {
        self.check_failure().await?;
        Ok(self.inner.read().await.instances.get(id).cloned())
    }

    async fn list(&self, filter: Option<&InstanceFilter>) -> Result<Vec<Instance>, DriverError> {
        self.check_failure().await?;
        let guard = self.inner.read().await;
        Ok(guard
            .instances
            .values()
            .filter(|i| filter.map(|f| f.matches(i, None)).unwrap_or(true))
            .cloned()
            .collect())
    }

    async fn start(&self, id: &InstanceId) -> Result<Instance, DriverError> {
        self.check_failure().await?;
        let mut guard = self.inner.write().await;
        let instance = guard
            .instances
            .get_mut(id)
            .ok_or_else(|| DriverError::NotFound(format!("instance {id} not found")))?;
        instance.status = InstanceStatus::Running;
        instance.touch();
        Ok(instance.clone())
    }

    async fn stop(&self, id: &InstanceId, _force: bool) -> Result<Instance, DriverError> {
        self.check_failure().await?;
        let mut guard = self.inner.write().await;
        let instance = guard
            .instances
            .get_mut(id)
            .ok_or_else(|| DriverError::NotFound(format!("instance {id} not found")))?;
        instance.status = InstanceStatus::Stopped;
        instance.touch();
        Ok(instance.clone())
    }

    async fn delete(&self, id: &InstanceId) -> Result<bool, DriverError> {
        self.check_failure().await?;
        Ok(self.inner.write().await.instances.remove(id).is_some())
    }

    async fn update(&self, id: &InstanceId, partial: &PartialInstanceSpec) -> Result<Instance, DriverError> {
        self.check_failure().await?;
        let mut guard = self.inner.write().await;
        let instance = guard
            .instances
            .get_mut(id)
            .ok_or_else(|| DriverError::NotFound(format!("instance {id} not found")))?;
        instance.spec = partial.apply(&instance.spec);
        instance.touch();
        Ok(instance.clone())
    }

    async fn logs(&self, id: &InstanceId, _opts: &LogOptions) -> Result<LogBatch, DriverError> {
        self.check_failure().await?;
        if !self.inner.read().await.instances.contains_key(id) {
            return Err(DriverError::NotFound(format!("instance {id} not found")));
        }
        Ok(LogBatch { entries: Vec::new() })
    }

    async fn exec(&self, id: &InstanceId, _cmd: &[String]) -> Result<ExecResult, DriverError> {
        self.check_failure().await?;
        if !self.inner.read().await.instances.contains_key(id) {
            return Err(DriverError::NotFound(format!("instance {id} not found")));
        }
        Ok(ExecResult {
            exit_code: 0,
            stdout: String::new(),
            stderr: String::new(),
        })
    }
}
