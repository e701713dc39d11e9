use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use swarmctl_domain::{HealthDetails, HealthStatus, InstanceFilter, InstanceHealth, InstanceId, InstanceStatus, ProviderKind};
use swarmctl_driver::Driver;
use swarmctl_registry::{codec, InstanceRegistry};
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::HealthMonitorConfig;
use crate::error::HealthError;

const HEALTH_SUBDIR: &str = "health";

struct State {
    health: HashMap<InstanceId, InstanceHealth>,
    recovery_attempts: HashMap<InstanceId, u32>,
}

/// Periodic per-instance liveness checker with ring-buffer history and
/// optional stop-then-start auto-recovery (§4.D).
pub struct HealthMonitor {
    registry: Arc<InstanceRegistry>,
    drivers: HashMap<ProviderKind, Arc<dyn Driver>>,
    config: HealthMonitorConfig,
    state_dir: PathBuf,
    state: RwLock<State>,
    in_flight: Mutex<HashSet<InstanceId>>,
    loop_handle: Mutex<Option<JoinHandle<()>>>,
}

impl HealthMonitor {
    pub async fn new(
        registry: Arc<InstanceRegistry>,
        drivers: HashMap<ProviderKind, Arc<dyn Driver>>,
        state_dir: impl Into<PathBuf>,
        config: HealthMonitorConfig,
    ) -> Result<Self, HealthError> {
        let state_dir = state_dir.into();
        let health = load_health_records(&state_dir.join(HEALTH_SUBDIR)).await?;
        Ok(HealthMonitor {
            registry,
            drivers,
            config,
            state_dir,
            state: RwLock::new(State {
                health,
                recovery_attempts: HashMap::new(),
            }),
            in_flight: Mutex::new(HashSet::new()),
            loop_handle: Mutex::new(None),
        })
    }

    fn health_dir(&self) -> PathBuf {
        self.state_dir.join(HEALTH_SUBDIR)
    }

    pub async fn get_health(&self, id: &InstanceId) -> InstanceHealth {
        self.state
            .read()
            .await
            .health
            .get(id)
            .cloned()
            .unwrap_or_else(InstanceHealth::unknown)
    }

    /// Starts the periodic check loop. Idempotent: calling this twice
    /// replaces the previous loop handle, aborting it first.
    pub async fn initialize(self: &Arc<Self>) {
        let monitor = Arc::clone(self);
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(monitor.config.check_interval);
            loop {
                ticker.tick().await;
                monitor.run_once().await;
            }
        });
        let mut guard = self.loop_handle.lock().await;
        if let Some(previous) = guard.take() {
            previous.abort();
        }
        *guard = Some(handle);
    }

    /// Stops the periodic loop cleanly; in-flight checks are allowed to
    /// complete (§5 "Cancellation & timeouts").
    pub async fn dispose(&self) {
        if let Some(handle) = self.loop_handle.lock().await.take() {
            handle.abort();
        }
    }

    /// Enumerates every `Running` registry instance and issues one check
    /// each, concurrently, never starting a second check for an instance
    /// whose prior check has not completed.
    pub async fn run_once(self: &Arc<Self>) {
        let filter = InstanceFilter {
            status: Some(vec![InstanceStatus::Running]),
            ..Default::default()
        };
        let running = self.registry.list(Some(&filter)).await;

        let mut to_check = Vec::new();
        {
            let mut in_flight = self.in_flight.lock().await;
            for instance in running {
                if in_flight.insert(instance.id.clone()) {
                    to_check.push(instance.id);
                }
            }
        }

        let mut handles = Vec::with_capacity(to_check.len());
        for id in to_check {
            let monitor = Arc::clone(self);
            handles.push(tokio::spawn(async move { monitor.check_and_release(id).await }));
        }
        for handle in handles {
            let _ = handle.await;
        }
    }

    async fn check_and_release(&self, id: InstanceId) {
        let _ = self.check_instance(&id).await;
        self.in_flight.lock().await.remove(&id);
    }

    /// Runs one check (§4.D "Per-instance check"), appends the outcome to
    /// history, persists the record, and triggers auto-recovery if enabled.
    pub async fn check_instance(&self, id: &InstanceId) -> InstanceHealth {
        let outcome = self.probe(id).await;
        let (status, details) = outcome;

        let mut health = self.get_health(id).await;
        health.record(status, details.clone(), self.config.history_size);
        self.persist(id, &health).await;

        if status == HealthStatus::Unhealthy && self.config.auto_recover {
            if let Err(e) = self.recover(id).await {
                warn!(instance_id = %id, error = %e, "auto-recovery failed");
            }
        } else if status == HealthStatus::Healthy {
            self.state.write().await.recovery_attempts.remove(id);
        }

        health
    }

    async fn probe(&self, id: &InstanceId) -> (HealthStatus, HealthDetails) {
        let instance = match self.registry.get(id).await {
            Some(i) => i,
            None => {
                return (
                    HealthStatus::Unhealthy,
                    HealthDetails { message: "instance not in registry".into(), ..Default::default() },
                )
            }
        };
        let driver = match self.drivers.get(&instance.provider_kind) {
            Some(d) => d,
            None => {
                return (
                    HealthStatus::Unknown,
                    HealthDetails {
                        message: format!("no driver loaded for kind '{}'", instance.provider_kind),
                        ..Default::default()
                    },
                )
            }
        };

        let observed = match driver.get(id).await {
            Ok(Some(observed)) => observed,
            Ok(None) => {
                return (
                    HealthStatus::Unhealthy,
                    HealthDetails { message: "not found in provider".into(), ..Default::default() },
                )
            }
            Err(e) => {
                return (
                    HealthStatus::Unhealthy,
                    HealthDetails { message: "driver error".into(), error: Some(e.to_string()), ..Default::default() },
                )
            }
        };

        if observed.status != InstanceStatus::Running {
            return (
                HealthStatus::Unhealthy,
                HealthDetails {
                    message: format!("driver reports status {}", observed.status),
                    ..Default::default()
                },
            );
        }

        let start = Instant::now();
        match driver.exec(id, &self.config.probe_command).await {
            Ok(result) if result.exit_code == 0 => (
                HealthStatus::Healthy,
                HealthDetails {
                    message: "probe succeeded".into(),
                    response_time_ms: Some(start.elapsed().as_millis() as u64),
                    ..Default::default()
                },
            ),
            Ok(result) => (
                HealthStatus::Unhealthy,
                HealthDetails {
                    message: "probe exited non-zero".into(),
                    error: Some(result.stderr),
                    response_time_ms: Some(start.elapsed().as_millis() as u64),
                },
            ),
            Err(e) => (
                HealthStatus::Unhealthy,
                HealthDetails { message: "probe failed".into(), error: Some(e.to_string()), ..Default::default() },
            ),
        }
    }

    /// Stop-then-start recovery, bounded by `max_recovery_attempts`. Once
    /// exceeded, the instance is left `Unhealthy` until the next successful
    /// check resets the counter (§4.D "Auto-recovery").
    pub async fn recover(&self, id: &InstanceId) -> Result<(), HealthError> {
        {
            let mut state = self.state.write().await;
            let attempts = state.recovery_attempts.entry(id.clone()).or_insert(0);
            if *attempts >= self.config.max_recovery_attempts {
                return Err(HealthError::RecoveryExhausted(id.to_string()));
            }
            *attempts += 1;
        }

        let mut health = self.get_health(id).await;
        health.record(
            HealthStatus::Recovering,
            HealthDetails { message: "recovery attempt started".into(), ..Default::default() },
            self.config.history_size,
        );
        self.persist(id, &health).await;

        let instance = self.registry.get(id).await.ok_or_else(|| HealthError::NotFound(id.to_string()))?;
        let driver = self
            .drivers
            .get(&instance.provider_kind)
            .ok_or_else(|| HealthError::NoDriver(instance.provider_kind.to_string()))?;

        info!(instance_id = %id, "attempting recovery: stop then start");
        driver.stop(id, false).await.map_err(|e| {
            warn!(instance_id = %id, error = %e, "recovery stop failed");
            HealthError::NotFound(format!("{id}: stop failed: {e}"))
        })?;
        let restarted = driver.start(id).await.map_err(|e| {
            warn!(instance_id = %id, error = %e, "recovery start failed");
            HealthError::NotFound(format!("{id}: start failed: {e}"))
        })?;
        self.registry.register(restarted).await?;
        Ok(())
    }

    async fn persist(&self, id: &InstanceId, health: &InstanceHealth) {
        if let Err(e) = codec::write_record(&self.health_dir(), id.as_str(), health).await {
            warn!(instance_id = %id, error = %e, "failed to persist health record");
        }
        self.state.write().await.health.insert(id.clone(), health.clone());
    }
}

async fn load_health_records(dir: &std::path::Path) -> Result<HashMap<InstanceId, InstanceHealth>, HealthError> {
    let mut entries = match tokio::fs::read_dir(dir).await {
        Ok(e) => e,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(HashMap::new()),
        Err(e) => return Err(HealthError::Registry(swarmctl_registry::RegistryError::Io {
            path: dir.display().to_string(),
            source: e,
        })),
    };

    let mut out = HashMap::new();
    while let Some(entry) = entries.next_entry().await.ok().flatten() {
        let path = entry.path();
        let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else { continue };
        if path.extension().and_then(|e| e.to_str()) != Some(codec::RECORD_SUFFIX) {
            continue;
        }
        match codec::read_record::<InstanceHealth>(dir, stem).await {
            Ok(Some(health)) => {
                out.insert(InstanceId::new(stem), health);
            }
            Ok(None) => {}
            Err(e) => {
                warn!(path = %path.display(), error = %e, "corrupt health record, skipping");
            }
        }
    }
    debug!(count = out.len(), "loaded health records");
    Ok(out)
}
