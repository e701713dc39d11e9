use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use swarmctl_config::SwarmConfig;
use swarmctl_domain::{
    Instance, InstanceFilter, InstanceId, InstanceSpec, MigrationOptions, MigrationPlan, MigrationPlanId,
    ProviderCapabilities, ProviderKind,
};
use swarmctl_driver::{Driver, DriverRegistry, ExecResult, LogBatch, LogOptions, PartialInstanceSpec};
use swarmctl_health::{HealthMonitor, HealthMonitorConfig};
use swarmctl_migration::MigrationEngine;
use swarmctl_registry::InstanceRegistry;
use tokio::sync::RwLock;
use tracing::{info, warn};

use crate::error::ControllerError;

#[derive(Clone)]
struct Initialized {
    drivers: HashMap<ProviderKind, Arc<dyn Driver>>,
    provider_enabled: HashMap<ProviderKind, bool>,
    instance_registry: Arc<InstanceRegistry>,
    health_monitor: Arc<HealthMonitor>,
    migration_engine: Option<Arc<MigrationEngine>>,
}

/// Top-level facade that owns the lifecycle of the provider registry, the
/// instance registry, the health monitor, and the migration engine (§4.F).
/// The one surface a northbound RPC layer would sit behind.
pub struct SwarmController {
    config: SwarmConfig,
    driver_registry: DriverRegistry,
    state: RwLock<Option<Initialized>>,
}

impl SwarmController {
    pub fn new(config: SwarmConfig) -> Self {
        SwarmController {
            config,
            driver_registry: DriverRegistry::with_builtins(),
            state: RwLock::new(None),
        }
    }

    /// Builds every enabled driver, then brings up the instance registry,
    /// health monitor, and migration engine in that order. Must be called
    /// exactly once. A driver that fails to construct or initialize is
    /// logged and dropped; it never aborts startup of the rest.
    pub async fn initialize(self: &Arc<Self>) -> Result<(), ControllerError> {
        let mut drivers: HashMap<ProviderKind, Arc<dyn Driver>> = HashMap::new();
        let mut provider_enabled: HashMap<ProviderKind, bool> = HashMap::new();

        for entry in &self.config.providers {
            let kind = ProviderKind::new(entry.kind.clone());
            provider_enabled.insert(kind.clone(), entry.enabled);
            if !entry.enabled {
                continue;
            }
            match self.driver_registry.create_and_init(&kind, &entry.config).await {
                Ok(driver) => {
                    drivers.insert(kind, driver);
                }
                Err(e) => {
                    warn!(provider_kind = %kind, error = %e, "driver failed to initialize, skipping");
                }
            }
        }

        let instance_registry = Arc::new(
            InstanceRegistry::new(self.config.state_dir.clone(), self.config.load_state_on_startup).await?,
        );
        instance_registry
            .start_flush_timer(Duration::from_secs(self.config.flush_interval_secs))
            .await;

        let health_config = HealthMonitorConfig {
            check_interval: Duration::from_secs(self.config.check_interval_secs),
            history_size: self.config.history_size,
            auto_recover: self.config.auto_recover,
            max_recovery_attempts: self.config.max_recovery_attempts,
            ..Default::default()
        };
        let health_monitor = Arc::new(
            HealthMonitor::new(instance_registry.clone(), drivers.clone(), self.config.state_dir.clone(), health_config)
                .await?,
        );
        health_monitor.initialize().await;

        let migration_engine = if self.config.migration_enabled {
            let engine = Arc::new(
                MigrationEngine::new(drivers.clone(), instance_registry.clone(), self.config.state_dir.clone()).await?,
            );
            engine.initialize().await;
            Some(engine)
        } else {
            None
        };

        *self.state.write().await = Some(Initialized {
            drivers,
            provider_enabled,
            instance_registry,
            health_monitor,
            migration_engine,
        });
        info!("swarm controller initialized");
        Ok(())
    }

    /// Disposes the migration engine, the health monitor, and the instance
    /// registry, in that order, swallowing component-level errors.
    pub async fn dispose(&self) {
        let Some(inner) = self.state.read().await.clone() else { return };
        if let Some(engine) = &inner.migration_engine {
            engine.dispose().await;
        }
        inner.health_monitor.dispose().await;
        inner.instance_registry.dispose().await;
        *self.state.write().await = None;
    }

    async fn inner(&self) -> Result<Initialized, ControllerError> {
        self.state.read().await.clone().ok_or(ControllerError::NotInitialized)
    }

    fn driver_for<'a>(
        drivers: &'a HashMap<ProviderKind, Arc<dyn Driver>>,
        kind: &ProviderKind,
    ) -> Result<&'a Arc<dyn Driver>, ControllerError> {
        drivers.get(kind).ok_or_else(|| ControllerError::ProviderUnavailable(kind.to_string()))
    }

    // ── Instance operations ──────────────────────────────────────────────

    /// Creates an instance on `kind`, or on the sole loaded driver if `kind`
    /// is omitted. Ambiguous with more than one loaded driver.
    pub async fn create_instance(&self, spec: InstanceSpec, name: &str, kind: Option<ProviderKind>) -> Result<Instance, ControllerError> {
        let inner = self.inner().await?;
        let kind = match kind {
            Some(k) => k,
            None => {
                let mut kinds = inner.drivers.keys();
                let first = kinds.next().cloned().ok_or_else(|| ControllerError::InvalidArgument("no driver loaded".into()))?;
                if kinds.next().is_some() {
                    return Err(ControllerError::InvalidArgument("provider kind is ambiguous: more than one driver loaded".into()));
                }
                first
            }
        };
        let driver = Self::driver_for(&inner.drivers, &kind)?;
        let instance = driver.create(&spec, name).await?;
        inner.instance_registry.register(instance.clone()).await?;
        Ok(instance)
    }

    /// Refreshes live facts from the backend driver when one is loaded for
    /// the instance's provider kind; falls back to the last registry
    /// snapshot only when no driver is loaded (§4.A, §4.F dispatch).
    pub async fn get(&self, id: &InstanceId) -> Result<Option<Instance>, ControllerError> {
        let inner = self.inner().await?;
        let Some(cached) = inner.instance_registry.get(id).await else {
            return Ok(None);
        };
        let Some(driver) = inner.drivers.get(&cached.provider_kind) else {
            return Ok(Some(cached));
        };
        match driver.get(id).await? {
            Some(live) => {
                inner.instance_registry.register(live.clone()).await?;
                Ok(Some(live))
            }
            None => Ok(Some(cached)),
        }
    }

    /// Like `get`, refreshes each instance from its loaded driver where one
    /// exists; instances whose driver is not loaded keep their registry
    /// snapshot.
    pub async fn list(&self, filter: Option<&InstanceFilter>) -> Result<Vec<Instance>, ControllerError> {
        let inner = self.inner().await?;
        let cached = inner.instance_registry.list(filter).await;

        if inner.drivers.is_empty() {
            return Ok(cached);
        }

        let mut refreshed = Vec::with_capacity(cached.len());
        for instance in cached {
            match inner.drivers.get(&instance.provider_kind) {
                Some(driver) => match driver.get(&instance.id).await? {
                    Some(live) => {
                        inner.instance_registry.register(live.clone()).await?;
                        refreshed.push(live);
                    }
                    None => refreshed.push(instance),
                },
                None => refreshed.push(instance),
            }
        }
        Ok(refreshed)
    }

    /// `Deleted` is terminal (§8 invariant 1): every mutating operation
    /// below rejects it with `Conflict` before reaching the driver.
    fn reject_deleted(instance: &Instance) -> Result<(), ControllerError> {
        if instance.status.is_terminal() {
            return Err(ControllerError::Conflict(format!("instance {} is deleted", instance.id)));
        }
        Ok(())
    }

    pub async fn start(&self, id: &InstanceId) -> Result<Instance, ControllerError> {
        let inner = self.inner().await?;
        let instance = inner.instance_registry.get(id).await.ok_or_else(|| ControllerError::NotFound(id.to_string()))?;
        Self::reject_deleted(&instance)?;
        let driver = Self::driver_for(&inner.drivers, &instance.provider_kind)?;
        let started = driver.start(id).await?;
        inner.instance_registry.register(started.clone()).await?;
        Ok(started)
    }

    pub async fn stop(&self, id: &InstanceId, force: bool) -> Result<Instance, ControllerError> {
        let inner = self.inner().await?;
        let instance = inner.instance_registry.get(id).await.ok_or_else(|| ControllerError::NotFound(id.to_string()))?;
        Self::reject_deleted(&instance)?;
        let driver = Self::driver_for(&inner.drivers, &instance.provider_kind)?;
        let stopped = driver.stop(id, force).await?;
        inner.instance_registry.register(stopped.clone()).await?;
        Ok(stopped)
    }

    pub async fn delete(&self, id: &InstanceId) -> Result<bool, ControllerError> {
        let inner = self.inner().await?;
        let instance = inner.instance_registry.get(id).await.ok_or_else(|| ControllerError::NotFound(id.to_string()))?;
        Self::reject_deleted(&instance)?;
        let driver = Self::driver_for(&inner.drivers, &instance.provider_kind)?;
        let deleted = driver.delete(id).await?;
        inner.instance_registry.remove(id).await?;
        Ok(deleted)
    }

    pub async fn update(&self, id: &InstanceId, partial: &PartialInstanceSpec) -> Result<Instance, ControllerError> {
        let inner = self.inner().await?;
        let instance = inner.instance_registry.get(id).await.ok_or_else(|| ControllerError::NotFound(id.to_string()))?;
        Self::reject_deleted(&instance)?;
        let driver = Self::driver_for(&inner.drivers, &instance.provider_kind)?;
        let updated = driver.update(id, partial).await?;
        inner.instance_registry.register(updated.clone()).await?;
        Ok(updated)
    }

    pub async fn logs(&self, id: &InstanceId, opts: &LogOptions) -> Result<LogBatch, ControllerError> {
        let inner = self.inner().await?;
        let instance = inner.instance_registry.get(id).await.ok_or_else(|| ControllerError::NotFound(id.to_string()))?;
        let driver = Self::driver_for(&inner.drivers, &instance.provider_kind)?;
        Ok(driver.logs(id, opts).await?)
    }

    pub async fn exec(&self, id: &InstanceId, cmd: &[String]) -> Result<ExecResult, ControllerError> {
        let inner = self.inner().await?;
        let instance = inner.instance_registry.get(id).await.ok_or_else(|| ControllerError::NotFound(id.to_string()))?;
        if instance.status != swarmctl_domain::InstanceStatus::Running {
            return Err(ControllerError::Conflict(format!("instance {} is not running", instance.id)));
        }
        let driver = Self::driver_for(&inner.drivers, &instance.provider_kind)?;
        Ok(driver.exec(id, cmd).await?)
    }

    // ── Health operations ────────────────────────────────────────────────

    pub async fn check_health(&self, id: &InstanceId) -> Result<swarmctl_domain::InstanceHealth, ControllerError> {
        let inner = self.inner().await?;
        Ok(inner.health_monitor.check_instance(id).await)
    }

    pub async fn recover(&self, id: &InstanceId) -> Result<(), ControllerError> {
        let inner = self.inner().await?;
        Ok(inner.health_monitor.recover(id).await?)
    }

    // ── Migration operations ─────────────────────────────────────────────

    pub async fn create_migration_plan(
        &self,
        source_id: &InstanceId,
        target_kind: ProviderKind,
        opts: MigrationOptions,
    ) -> Result<MigrationPlan, ControllerError> {
        let inner = self.inner().await?;
        let engine = inner.migration_engine.as_ref().ok_or_else(|| ControllerError::InvalidArgument("migration is disabled".into()))?;
        Ok(engine.create_plan(source_id, target_kind, opts).await?)
    }

    pub async fn start_migration(self: &Arc<Self>, plan_id: &MigrationPlanId) -> Result<(), ControllerError> {
        let inner = self.inner().await?;
        let engine = inner.migration_engine.as_ref().ok_or_else(|| ControllerError::InvalidArgument("migration is disabled".into()))?;
        Ok(engine.start(plan_id).await?)
    }

    pub async fn cancel_migration(&self, plan_id: &MigrationPlanId) -> Result<(), ControllerError> {
        let inner = self.inner().await?;
        let engine = inner.migration_engine.as_ref().ok_or_else(|| ControllerError::InvalidArgument("migration is disabled".into()))?;
        Ok(engine.cancel(plan_id).await?)
    }

    pub async fn get_migration_plan(&self, plan_id: &MigrationPlanId) -> Result<Option<MigrationPlan>, ControllerError> {
        let inner = self.inner().await?;
        let Some(engine) = &inner.migration_engine else { return Ok(None) };
        Ok(engine.get_plan(plan_id).await)
    }

    pub async fn list_migration_plans(&self) -> Result<Vec<MigrationPlan>, ControllerError> {
        let inner = self.inner().await?;
        let Some(engine) = &inner.migration_engine else { return Ok(Vec::new()) };
        Ok(engine.list_plans().await)
    }

    // ── Provider & status ────────────────────────────────────────────────

    pub async fn provider_capabilities(&self, kind: &ProviderKind) -> Result<ProviderCapabilities, ControllerError> {
        let inner = self.inner().await?;
        let driver = Self::driver_for(&inner.drivers, kind)?;
        Ok(driver.capabilities())
    }

    pub async fn status(&self) -> ControllerStatus {
        let guard = self.state.read().await;
        let Some(inner) = guard.as_ref() else {
            return ControllerStatus {
                initialized: false,
                providers: HashMap::new(),
                instance_count: 0,
                health_monitor_enabled: false,
                migration_enabled: false,
            };
        };

        let mut providers = HashMap::new();
        for (kind, enabled) in &inner.provider_enabled {
            let instance_count = inner.instance_registry.count_by_kind(kind).await;
            providers.insert(kind.clone(), ProviderStatus { enabled: *enabled, instance_count });
        }

        ControllerStatus {
            initialized: true,
            providers,
            instance_count: inner.instance_registry.total_count().await,
            health_monitor_enabled: true,
            migration_enabled: inner.migration_engine.is_some(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderStatus {
    pub enabled: bool,
    pub instance_count: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControllerStatus {
    pub initialized: bool,
    pub providers: HashMap<ProviderKind, ProviderStatus>,
    pub instance_count: usize,
    pub health_monitor_enabled: bool,
    pub migration_enabled: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use swarmctl_config::{DriverConfig, ProviderEntry};

    fn config_with_stub(dir: &std::path::Path) -> SwarmConfig {
        SwarmConfig {
            state_dir: dir.to_path_buf(),
            providers: vec![ProviderEntry {
                kind: "container".to_string(),
                enabled: true,
                config: DriverConfig::Container(Default::default()),
            }],
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn uninitialized_controller_rejects_operations() {
        let dir = tempfile::tempdir().unwrap();
        let controller = SwarmController::new(config_with_stub(dir.path()));
        let err = controller.get(&InstanceId::generate()).await.unwrap_err();
        assert!(matches!(err, ControllerError::NotInitialized));
    }

    #[tokio::test]
    async fn create_start_stop_delete_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let controller = Arc::new(SwarmController::new(config_with_stub(dir.path())));
        controller.initialize().await.unwrap();

        let mut spec = InstanceSpec::default();
        spec.image = "editor:1".into();
        spec.workspace_path = "/w".into();

        let created = controller.create_instance(spec, "ws-1", None).await.unwrap();
        assert_eq!(created.status, swarmctl_domain::InstanceStatus::Running);

        let stopped = controller.stop(&created.id, false).await.unwrap();
        assert_eq!(stopped.status, swarmctl_domain::InstanceStatus::Stopped);

        let started = controller.start(&created.id).await.unwrap();
        assert_eq!(started.status, swarmctl_domain::InstanceStatus::Running);

        assert!(controller.delete(&created.id).await.unwrap());
        assert!(controller.get(&created.id).await.unwrap().is_none());

        controller.dispose().await;
    }

    #[tokio::test]
    async fn status_reports_instance_counts_per_kind() {
        let dir = tempfile::tempdir().unwrap();
        let controller = Arc::new(SwarmController::new(config_with_stub(dir.path())));
        controller.initialize().await.unwrap();

        let mut spec = InstanceSpec::default();
        spec.image = "editor:1".into();
        spec.workspace_path = "/w".into();
        controller.create_instance(spec, "ws-1", None).await.unwrap();

        let status = controller.status().await;
        assert!(status.initialized);
        assert_eq!(status.instance_count, 1);
        assert!(status.migration_enabled);
        let provider = status.providers.get(&ProviderKind::new("container")).unwrap();
        assert_eq!(provider.instance_count, 1);

        controller.dispose().await;
    }

    #[tokio::test]
    async fn operation_on_instance_with_unloaded_driver_is_provider_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = config_with_stub(dir.path());
        config.providers[0].enabled = false;
        let controller = Arc::new(SwarmController::new(config));
        controller.initialize().await.unwrap();

        let instance = Instance::new(
            InstanceId::generate(),
            ProviderKind::new("container"),
            "ws-orphan",
            InstanceSpec::default(),
        );
        {
            let inner = controller.inner().await.unwrap();
            inner.instance_registry.register(instance.clone()).await.unwrap();
        }

        let got = controller.get(&instance.id).await.unwrap();
        assert!(got.is_some());

        let err = controller.start(&instance.id).await.unwrap_err();
        assert!(matches!(err, ControllerError::ProviderUnavailable(_)));

        controller.dispose().await;
    }
}
