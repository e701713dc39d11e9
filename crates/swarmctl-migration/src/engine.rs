use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;

use chrono::Utc;
use swarmctl_domain::{
    InstanceId, MigrationOptions, MigrationPlan, MigrationPlanId, MigrationPlanStatus, MigrationStepKind, ProviderKind,
    StepStatus,
};
use swarmctl_driver::Driver;
use swarmctl_registry::{codec, InstanceRegistry};
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::error::MigrationError;

const MIGRATIONS_SUBDIR: &str = "migrations";

/// Durable step-by-step engine that moves one instance from a source
/// driver to a target driver (§4.E). Multiple plans execute concurrently;
/// each plan's own steps run strictly sequentially.
pub struct MigrationEngine {
    state_dir: PathBuf,
    drivers: HashMap<ProviderKind, Arc<dyn Driver>>,
    instance_registry: Arc<InstanceRegistry>,
    plans: RwLock<HashMap<MigrationPlanId, MigrationPlan>>,
    executors: Mutex<HashMap<MigrationPlanId, JoinHandle<()>>>,
    cancelled: Mutex<HashSet<MigrationPlanId>>,
}

impl MigrationEngine {
    pub async fn new(
        drivers: HashMap<ProviderKind, Arc<dyn Driver>>,
        instance_registry: Arc<InstanceRegistry>,
        state_dir: impl Into<PathBuf>,
    ) -> Result<Self, MigrationError> {
        let state_dir = state_dir.into();
        let loaded: Vec<MigrationPlan> = codec::load_all(&state_dir.join(MIGRATIONS_SUBDIR)).await?;

        let mut plans = HashMap::new();
        let now = Utc::now();
        for mut plan in loaded {
            if plan.status == MigrationPlanStatus::InProgress && plan.is_expired(now) {
                warn!(plan_id = %plan.id, "migration plan expired while engine was down");
                plan.status = MigrationPlanStatus::TimedOut;
            }
            plans.insert(plan.id.clone(), plan);
        }

        let engine = MigrationEngine {
            state_dir,
            drivers,
            instance_registry,
            plans: RwLock::new(plans),
            executors: Mutex::new(HashMap::new()),
            cancelled: Mutex::new(HashSet::new()),
        };

        for plan in engine.plans.read().await.values() {
            if plan.status == MigrationPlanStatus::TimedOut {
                engine.persist(plan).await?;
            }
        }

        Ok(engine)
    }

    fn migrations_dir(&self) -> PathBuf {
        self.state_dir.join(MIGRATIONS_SUBDIR)
    }

    /// Resumes any plan left `InProgress` across a restart, from
    /// `current_step_index` (§4.E "Durability").
    pub async fn initialize(self: &Arc<Self>) {
        let resumable: Vec<MigrationPlanId> = self
            .plans
            .read()
            .await
            .values()
            .filter(|p| p.status == MigrationPlanStatus::InProgress)
            .map(|p| p.id.clone())
            .collect();
        for id in resumable {
            info!(plan_id = %id, "resuming in-progress migration plan");
            self.spawn_executor(id).await;
        }
    }

    /// Aborts any still-running executor tasks. The step each was mid-way
    /// through is left exactly as last persisted; no rollback.
    pub async fn dispose(&self) {
        let mut executors = self.executors.lock().await;
        for (_, handle) in executors.drain() {
            handle.abort();
        }
    }

    pub async fn get_plan(&self, id: &MigrationPlanId) -> Option<MigrationPlan> {
        self.plans.read().await.get(id).cloned()
    }

    pub async fn list_plans(&self) -> Vec<MigrationPlan> {
        self.plans.read().await.values().cloned().collect()
    }

    pub async fn create_plan(
        &self,
        source_id: &InstanceId,
        target_kind: ProviderKind,
        opts: MigrationOptions,
    ) -> Result<MigrationPlan, MigrationError> {
        let source = self
            .instance_registry
            .get(source_id)
            .await
            .ok_or_else(|| MigrationError::NotFound(source_id.to_string()))?;
        if !self.drivers.contains_key(&target_kind) {
            return Err(MigrationError::NoDriver(target_kind.to_string()));
        }

        let id = MigrationPlanId::generate();
        let plan = MigrationPlan::new(id.clone(), source_id.clone(), source.provider_kind.clone(), target_kind, opts);
        self.plans.write().await.insert(id, plan.clone());
        self.persist(&plan).await?;
        Ok(plan)
    }

    pub async fn start(self: &Arc<Self>, plan_id: &MigrationPlanId) -> Result<(), MigrationError> {
        let snapshot = {
            let mut guard = self.plans.write().await;
            let plan = guard.get_mut(plan_id).ok_or_else(|| MigrationError::NotFound(plan_id.to_string()))?;
            if plan.status != MigrationPlanStatus::Pending {
                return Err(MigrationError::InvalidArgument(format!("plan {plan_id} is not pending")));
            }
            plan.status = MigrationPlanStatus::InProgress;
            plan.clone()
        };
        self.persist(&snapshot).await?;
        self.spawn_executor(plan_id.clone()).await;
        Ok(())
    }

    /// `Cancelled` iff the plan is `Pending` or `InProgress` (§4.E). A plan
    /// already terminal is left untouched. An in-flight step is allowed to
    /// finish; the executor notices the cancellation between steps.
    pub async fn cancel(&self, plan_id: &MigrationPlanId) -> Result<(), MigrationError> {
        let pending_cancel = {
            let mut guard = self.plans.write().await;
            let plan = guard.get_mut(plan_id).ok_or_else(|| MigrationError::NotFound(plan_id.to_string()))?;
            match plan.status {
                MigrationPlanStatus::Pending => {
                    plan.status = MigrationPlanStatus::Cancelled;
                    Some(plan.clone())
                }
                MigrationPlanStatus::InProgress => None,
                _ => return Ok(()),
            }
        };
        match pending_cancel {
            Some(snapshot) => self.persist(&snapshot).await,
            None => {
                self.cancelled.lock().await.insert(plan_id.clone());
                Ok(())
            }
        }
    }

    async fn spawn_executor(self: &Arc<Self>, plan_id: MigrationPlanId) {
        let engine = Arc::clone(self);
        let id_for_task = plan_id.clone();
        let handle = tokio::spawn(async move { engine.run_executor(id_for_task).await });
        // Re-entrant starts are blocked by the `status != Pending` check in
        // `start()`; this just keeps the handle so `dispose()` can abort it.
        self.executors.lock().await.insert(plan_id, handle);
    }

    async fn run_executor(self: Arc<Self>, plan_id: MigrationPlanId) {
        let expires_at = match self.plans.read().await.get(&plan_id) {
            Some(p) => p.expires_at,
            None => return,
        };
        let remaining = (expires_at - Utc::now()).to_std().unwrap_or(std::time::Duration::ZERO);

        let timed_out = tokio::time::timeout(remaining, self.execute_steps(&plan_id)).await.is_err();
        if timed_out {
            self.mark_timed_out(&plan_id).await;
        }
        self.executors.lock().await.remove(&plan_id);
    }

    async fn mark_timed_out(&self, plan_id: &MigrationPlanId) {
        let snapshot = {
            let mut guard = self.plans.write().await;
            match guard.get_mut(plan_id) {
                Some(plan) if !plan.status.is_terminal() => {
                    warn!(plan_id = %plan_id, "migration plan exceeded its deadline");
                    plan.status = MigrationPlanStatus::TimedOut;
                    Some(plan.clone())
                }
                _ => None,
            }
        };
        if let Some(plan) = snapshot {
            if let Err(e) = self.persist(&plan).await {
                warn!(plan_id = %plan_id, error = %e, "failed to persist timed-out plan");
            }
        }
    }

    async fn execute_steps(&self, plan_id: &MigrationPlanId) {
        loop {
            if self.cancelled.lock().await.remove(plan_id) {
                let snapshot = {
                    let mut guard = self.plans.write().await;
                    let Some(plan) = guard.get_mut(plan_id) else { return };
                    plan.status = MigrationPlanStatus::Cancelled;
                    plan.clone()
                };
                let _ = self.persist(&snapshot).await;
                return;
            }

            let Some((index, kind)) = self.next_pending_step(plan_id).await else { return };

            if let Err(e) = self.mark_step_in_progress(plan_id, index).await {
                warn!(plan_id = %plan_id, error = %e, "failed to persist in-progress step");
                return;
            }

            match self.execute_step(plan_id, kind).await {
                Ok(()) => {
                    if self.mark_step_completed(plan_id, index).await.is_none() {
                        return;
                    }
                }
                Err(message) => {
                    warn!(plan_id = %plan_id, step = %kind, error = %message, "migration step failed");
                    let _ = self.mark_plan_failed(plan_id, index, message).await;
                    return;
                }
            }
        }
    }

    async fn next_pending_step(&self, plan_id: &MigrationPlanId) -> Option<(usize, MigrationStepKind)> {
        let guard = self.plans.read().await;
        let plan = guard.get(plan_id)?;
        if plan.current_step_index >= plan.steps.len() {
            return None;
        }
        Some((plan.current_step_index, plan.steps[plan.current_step_index].kind))
    }

    async fn mark_step_in_progress(&self, plan_id: &MigrationPlanId, index: usize) -> Result<(), MigrationError> {
        let snapshot = {
            let mut guard = self.plans.write().await;
            let plan = guard.get_mut(plan_id).ok_or_else(|| MigrationError::NotFound(plan_id.to_string()))?;
            plan.steps[index].status = StepStatus::InProgress;
            plan.steps[index].started_at = Some(Utc::now());
            plan.clone()
        };
        self.persist(&snapshot).await
    }

    async fn mark_step_completed(&self, plan_id: &MigrationPlanId, index: usize) -> Option<()> {
        let snapshot = {
            let mut guard = self.plans.write().await;
            let plan = guard.get_mut(plan_id)?;
            plan.steps[index].status = StepStatus::Completed;
            plan.steps[index].completed_at = Some(Utc::now());
            plan.current_step_index = index + 1;
            if plan.current_step_index == plan.steps.len() {
                plan.status = MigrationPlanStatus::Completed;
                plan.completed_at = Some(Utc::now());
            }
            plan.clone()
        };
        if let Err(e) = self.persist(&snapshot).await {
            warn!(plan_id = %plan_id, error = %e, "failed to persist completed step");
        }
        Some(())
    }

    async fn mark_plan_failed(&self, plan_id: &MigrationPlanId, index: usize, message: String) -> Result<(), MigrationError> {
        let snapshot = {
            let mut guard = self.plans.write().await;
            let plan = guard.get_mut(plan_id).ok_or_else(|| MigrationError::NotFound(plan_id.to_string()))?;
            plan.steps[index].status = StepStatus::Failed;
            plan.steps[index].completed_at = Some(Utc::now());
            plan.steps[index].error = Some(message.clone());
            plan.status = MigrationPlanStatus::Failed;
            plan.error = Some(message);
            plan.clone()
        };
        self.persist(&snapshot).await
    }

    fn driver_for(&self, kind: &ProviderKind) -> Result<&Arc<dyn Driver>, String> {
        self.drivers.get(kind).ok_or_else(|| format!("no driver loaded for kind '{kind}'"))
    }

    /// Runs exactly one step (§4.E "Step semantics"). `Err` carries a
    /// human message; the caller records it on the step and the plan.
    async fn execute_step(&self, plan_id: &MigrationPlanId, kind: MigrationStepKind) -> Result<(), String> {
        let plan = self.plans.read().await.get(plan_id).cloned().ok_or("plan vanished mid-execution")?;

        match kind {
            MigrationStepKind::Prepare => Ok(()),

            MigrationStepKind::ValidateSource => {
                let driver = self.driver_for(&plan.source_kind)?;
                match driver.get(&plan.source_instance_id).await {
                    Ok(Some(_)) => Ok(()),
                    Ok(None) => Err("source instance not found".to_string()),
                    Err(e) => Err(e.to_string()),
                }
            }

            MigrationStepKind::ValidateTargetProvider => {
                let driver = self.driver_for(&plan.target_kind)?;
                if driver.capabilities().max_instances_per_caller > 0 {
                    Ok(())
                } else {
                    Err(format!("target kind '{}' accepts no instances", plan.target_kind))
                }
            }

            MigrationStepKind::StopSource => {
                let driver = self.driver_for(&plan.source_kind)?;
                match driver.get(&plan.source_instance_id).await {
                    Ok(Some(instance)) if instance.status == swarmctl_domain::InstanceStatus::Running => {
                        driver.stop(&plan.source_instance_id, false).await.map(|_| ()).map_err(|e| e.to_string())
                    }
                    Ok(_) => Ok(()),
                    Err(e) => Err(e.to_string()),
                }
            }

            // The config snapshot is taken at `create_target` time so it
            // reflects any spec drift up to the moment of creation.
            MigrationStepKind::ExportSourceConfig => Ok(()),

            MigrationStepKind::CreateTarget => {
                let source = self
                    .instance_registry
                    .get(&plan.source_instance_id)
                    .await
                    .ok_or("source instance vanished before create_target")?;
                let target_driver = self.driver_for(&plan.target_kind)?;
                let name = format!("{}-migrated", source.name);
                let created = target_driver.create(&source.spec, &name).await.map_err(|e| e.to_string())?;

                self.apply(plan_id, |p| p.target_instance_id = Some(created.id.clone())).await?;
                self.instance_registry.register(created).await.map_err(|e| e.to_string())?;
                Ok(())
            }

            MigrationStepKind::StartTarget => {
                if !plan.start_target {
                    return Ok(());
                }
                let target_id = plan.target_instance_id.clone().ok_or("no target instance recorded")?;
                let driver = self.driver_for(&plan.target_kind)?;
                let target = driver.get(&target_id).await.map_err(|e| e.to_string())?.ok_or("target instance not found")?;
                if target.status != swarmctl_domain::InstanceStatus::Running {
                    let started = driver.start(&target_id).await.map_err(|e| e.to_string())?;
                    self.instance_registry.register(started).await.map_err(|e| e.to_string())?;
                }
                Ok(())
            }

            MigrationStepKind::VerifyTarget => {
                let target_id = plan.target_instance_id.clone().ok_or("no target instance recorded")?;
                let driver = self.driver_for(&plan.target_kind)?;
                let target = driver.get(&target_id).await.map_err(|e| e.to_string())?.ok_or("target instance not found")?;
                if plan.start_target && target.status != swarmctl_domain::InstanceStatus::Running {
                    return Err("target not running after start".to_string());
                }
                Ok(())
            }

            MigrationStepKind::CleanupSource => {
                if plan.keep_source {
                    return Ok(());
                }
                let driver = self.driver_for(&plan.source_kind)?;
                driver.delete(&plan.source_instance_id).await.map_err(|e| e.to_string())?;
                self.instance_registry.remove(&plan.source_instance_id).await.map_err(|e| e.to_string())?;
                Ok(())
            }

            MigrationStepKind::Complete => Ok(()),
        }
    }

    async fn apply(&self, plan_id: &MigrationPlanId, f: impl FnOnce(&mut MigrationPlan)) -> Result<(), String> {
        let snapshot = {
            let mut guard = self.plans.write().await;
            let plan = guard.get_mut(plan_id).ok_or("plan vanished mid-execution")?;
            f(plan);
            plan.clone()
        };
        self.persist(&snapshot).await.map_err(|e| e.to_string())
    }

    async fn persist(&self, plan: &MigrationPlan) -> Result<(), MigrationError> {
        codec::write_record(&self.migrations_dir(), plan.id.as_str(), plan).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use swarmctl_domain::{Instance, InstanceFilter, InstanceSpec, InstanceStatus, MigrationStrategy, ProviderCapabilities};
    use swarmctl_driver::testing::StubDriver;
    use swarmctl_driver::{DriverError, ExecResult, LogBatch, LogOptions, PartialInstanceSpec};
    use tokio::sync::Notify;

    fn spec() -> InstanceSpec {
        let mut s = InstanceSpec::default();
        s.image = "editor:1".into();
        s.workspace_path = "/w".into();
        s
    }

    fn opts(strategy: MigrationStrategy) -> MigrationOptions {
        MigrationOptions { strategy, keep_source: false, start_target: true, timeout_secs: 30 }
    }

    async fn wait_terminal(engine: &MigrationEngine, plan_id: &MigrationPlanId) -> MigrationPlan {
        for _ in 0..200 {
            if let Some(plan) = engine.get_plan(plan_id).await {
                if plan.status.is_terminal() {
                    return plan;
                }
            }
            tokio::task::yield_now().await;
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
        panic!("plan never reached a terminal status");
    }

    async fn setup(
        source_kind: &str,
        target_kind: &str,
    ) -> (tempfile::TempDir, Arc<MigrationEngine>, Arc<InstanceRegistry>, StubDriver, Instance) {
        let state_dir = tempfile::tempdir().unwrap();
        let registry = Arc::new(InstanceRegistry::new(state_dir.path(), false).await.unwrap());

        let source_driver = StubDriver::new();
        let created = source_driver.create(&spec(), "ws-1").await.unwrap();
        registry.register(created.clone()).await.unwrap();

        let mut drivers: HashMap<ProviderKind, Arc<dyn Driver>> = HashMap::new();
        drivers.insert(ProviderKind::new(source_kind), Arc::new(source_driver.clone()));
        drivers.insert(ProviderKind::new(target_kind), Arc::new(StubDriver::new()));

        let engine = Arc::new(MigrationEngine::new(drivers, registry.clone(), state_dir.path()).await.unwrap());
        (state_dir, engine, registry, source_driver, created)
    }

    #[tokio::test]
    async fn full_migration_completes_and_removes_source() {
        let (_guard, engine, registry, _source_driver, source) = setup("container", "cloud").await;

        let plan = engine
            .create_plan(&source.id, ProviderKind::new("cloud"), opts(MigrationStrategy::StopAndRecreate))
            .await
            .unwrap();
        engine.start(&plan.id).await.unwrap();

        let finished = wait_terminal(&engine, &plan.id).await;
        assert_eq!(finished.status, MigrationPlanStatus::Completed);
        assert!(finished.target_instance_id.is_some());
        assert!(finished.completed_at.is_some());
        assert!(registry.get(&source.id).await.is_none());

        let target = registry.get(finished.target_instance_id.as_ref().unwrap()).await.unwrap();
        assert_eq!(target.status, InstanceStatus::Running);
        assert!(target.name.ends_with("-migrated"));
    }

    #[tokio::test]
    async fn create_plan_fails_for_unknown_source() {
        let (_guard, engine, _registry, _source_driver, _source) = setup("container", "cloud").await;
        let err = engine
            .create_plan(&InstanceId::generate(), ProviderKind::new("cloud"), opts(MigrationStrategy::StopAndRecreate))
            .await
            .unwrap_err();
        assert!(matches!(err, MigrationError::NotFound(_)));
    }

    #[tokio::test]
    async fn create_plan_fails_for_unregistered_target_kind() {
        let (_guard, engine, _registry, _source_driver, source) = setup("container", "cloud").await;
        let err = engine
            .create_plan(&source.id, ProviderKind::new("nonexistent"), opts(MigrationStrategy::StopAndRecreate))
            .await
            .unwrap_err();
        assert!(matches!(err, MigrationError::NoDriver(_)));
    }

    #[tokio::test]
    async fn cancel_on_pending_plan_is_immediate() {
        let (_guard, engine, _registry, _source_driver, source) = setup("container", "cloud").await;
        let plan = engine
            .create_plan(&source.id, ProviderKind::new("cloud"), opts(MigrationStrategy::StopAndRecreate))
            .await
            .unwrap();

        engine.cancel(&plan.id).await.unwrap();
        let reloaded = engine.get_plan(&plan.id).await.unwrap();
        assert_eq!(reloaded.status, MigrationPlanStatus::Cancelled);
    }

    #[tokio::test]
    async fn cancel_during_create_target_stops_before_next_step() {
        let state_dir = tempfile::tempdir().unwrap();
        let registry = Arc::new(InstanceRegistry::new(state_dir.path(), false).await.unwrap());
        let source_driver = StubDriver::new();
        let created = source_driver.create(&spec(), "ws-1").await.unwrap();
        registry.register(created.clone()).await.unwrap();

        let gate = Arc::new(Notify::new());
        let target_driver = GatedCreateDriver { inner: StubDriver::new(), gate: gate.clone() };

        let mut drivers: HashMap<ProviderKind, Arc<dyn Driver>> = HashMap::new();
        drivers.insert(ProviderKind::new("container"), Arc::new(source_driver));
        drivers.insert(ProviderKind::new("cloud"), Arc::new(target_driver));

        let engine = Arc::new(MigrationEngine::new(drivers, registry.clone(), state_dir.path()).await.unwrap());
        let plan = engine
            .create_plan(&created.id, ProviderKind::new("cloud"), opts(MigrationStrategy::StopAndRecreate))
            .await
            .unwrap();
        engine.start(&plan.id).await.unwrap();

        // Let the executor reach create_target and block on the gate.
        for _ in 0..50 {
            tokio::task::yield_now().await;
        }
        engine.cancel(&plan.id).await.unwrap();
        gate.notify_waiters();

        let finished = wait_terminal(&engine, &plan.id).await;
        assert_eq!(finished.status, MigrationPlanStatus::Cancelled);
        let create_target_idx = finished
            .steps
            .iter()
            .position(|s| s.kind == MigrationStepKind::CreateTarget)
            .unwrap();
        assert_eq!(finished.current_step_index, create_target_idx);
    }

    #[tokio::test]
    async fn deadline_exceeded_marks_plan_timed_out_without_touching_in_flight_step() {
        let state_dir = tempfile::tempdir().unwrap();
        let registry = Arc::new(InstanceRegistry::new(state_dir.path(), false).await.unwrap());
        let source_driver = StubDriver::new();
        let created = source_driver.create(&spec(), "ws-1").await.unwrap();
        registry.register(created.clone()).await.unwrap();

        let target_driver = SlowGetDriver { inner: StubDriver::new(), delay: Duration::from_millis(500) };

        let mut drivers: HashMap<ProviderKind, Arc<dyn Driver>> = HashMap::new();
        drivers.insert(ProviderKind::new("container"), Arc::new(source_driver));
        drivers.insert(ProviderKind::new("cloud"), Arc::new(target_driver));

        let engine = Arc::new(MigrationEngine::new(drivers, registry.clone(), state_dir.path()).await.unwrap());
        let mut options = opts(MigrationStrategy::StopAndRecreate);
        options.timeout_secs = 0;
        let plan = engine.create_plan(&created.id, ProviderKind::new("cloud"), options).await.unwrap();
        engine.start(&plan.id).await.unwrap();

        let finished = wait_terminal(&engine, &plan.id).await;
        assert_eq!(finished.status, MigrationPlanStatus::TimedOut);
        assert!(finished.completed_at.is_none());
    }

    /// Delegates every call to `inner` except `get`, which sleeps `delay`
    /// first — used to simulate a backend that exceeds the plan deadline.
    struct SlowGetDriver {
        inner: StubDriver,
        delay: Duration,
    }

    #[async_trait::async_trait]
    impl Driver for SlowGetDriver {
        fn kind(&self) -> &str {
            "slow"
        }
        async fn initialize(&self) -> Result<(), DriverError> {
            self.inner.initialize().await
        }
        fn capabilities(&self) -> ProviderCapabilities {
            self.inner.capabilities()
        }
        async fn create(&self, spec: &InstanceSpec, name: &str) -> Result<Instance, DriverError> {
            tokio::time::sleep(self.delay).await;
            self.inner.create(spec, name).await
        }
        async fn get(&self, id: &InstanceId) -> Result<Option<Instance>, DriverError> {
            tokio::time::sleep(self.delay).await;
            self.inner.get(id).await
        }
        async fn list(&self, filter: Option<&InstanceFilter>) -> Result<Vec<Instance>, DriverError> {
            self.inner.list(filter).await
        }
        async fn start(&self, id: &InstanceId) -> Result<Instance, DriverError> {
            self.inner.start(id).await
        }
        async fn stop(&self, id: &InstanceId, force: bool) -> Result<Instance, DriverError> {
            self.inner.stop(id, force).await
        }
        async fn delete(&self, id: &InstanceId) -> Result<bool, DriverError> {
            self.inner.delete(id).await
        }
        async fn update(&self, id: &InstanceId, partial: &PartialInstanceSpec) -> Result<Instance, DriverError> {
            self.inner.update(id, partial).await
        }
        async fn logs(&self, id: &InstanceId, opts: &LogOptions) -> Result<LogBatch, DriverError> {
            self.inner.logs(id, opts).await
        }
        async fn exec(&self, id: &InstanceId, cmd: &[String]) -> Result<ExecResult, DriverError> {
            self.inner.exec(id, cmd).await
        }
    }

    /// Delegates every call to `inner` except `create`, which waits on
    /// `gate` before proceeding — used to simulate a slow create_target
    /// step that a concurrent `cancel()` races against.
    struct GatedCreateDriver {
        inner: StubDriver,
        gate: Arc<Notify>,
    }

    #[async_trait::async_trait]
    impl Driver for GatedCreateDriver {
        fn kind(&self) -> &str {
            "gated"
        }
        async fn initialize(&self) -> Result<(), DriverError> {
            self.inner.initialize().await
        }
        fn capabilities(&self) -> ProviderCapabilities {
            self.inner.capabilities()
        }
        async fn create(&self, spec: &InstanceSpec, name: &str) -> Result<Instance, DriverError> {
            self.gate.notified().await;
            self.inner.create(spec, name).await
        }
        async fn get(&self, id: &InstanceId) -> Result<Option<Instance>, DriverError> {
            self.inner.get(id).await
        }
        async fn list(&self, filter: Option<&InstanceFilter>) -> Result<Vec<Instance>, DriverError> {
            self.inner.list(filter).await
        }
        async fn start(&self, id: &InstanceId) -> Result<Instance, DriverError> {
            self.inner.start(id).await
        }
        async fn stop(&self, id: &InstanceId, force: bool) -> Result<Instance, DriverError> {
            self.inner.stop(id, force).await
        }
        async fn delete(&self, id: &InstanceId) -> Result<bool, DriverError> {
            self.inner.delete(id).await
        }
        async fn update(&self, id: &InstanceId, partial: &PartialInstanceSpec) -> Result<Instance, DriverError> {
            self.inner.update(id, partial).await
        }
        async fn logs(&self, id: &InstanceId, opts: &LogOptions) -> Result<LogBatch, DriverError> {
            self.inner.logs(id, opts).await
        }
        async fn exec(&self, id: &InstanceId, cmd: &[String]) -> Result<ExecResult, DriverError> {
            self.inner.exec(id, cmd).await
        }
    }
}
