use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use regex::RegexBuilder;
use swarmctl_domain::{Instance, InstanceFilter, InstanceId, ProviderKind};
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::codec;
use crate::error::RegistryError;

const INSTANCES_SUBDIR: &str = "instances";

#[derive(Debug, Default)]
struct Inner {
    by_id: HashMap<InstanceId, Instance>,
    by_kind: HashMap<ProviderKind, HashSet<InstanceId>>,
}

impl Inner {
    fn index(&mut self, instance: &Instance) {
        self.by_kind.entry(instance.provider_kind.clone()).or_default().insert(instance.id.clone());
    }

    fn deindex(&mut self, id: &InstanceId, kind: &ProviderKind) {
        if let Some(set) = self.by_kind.get_mut(kind) {
            set.remove(id);
            if set.is_empty() {
                self.by_kind.remove(kind);
            }
        }
    }
}

/// The single source of truth for which instances exist and what is
/// believed about them (§4.C). Holds an in-memory index plus one durable
/// JSON record per instance under `<state_dir>/instances/`.
pub struct InstanceRegistry {
    state_dir: PathBuf,
    inner: Arc<RwLock<Inner>>,
    flush_handle: Mutex<Option<JoinHandle<()>>>,
}

impl InstanceRegistry {
    /// Loads every well-formed record under `<state_dir>/instances/` if
    /// `load_state_on_startup` is true; a corrupt record is logged and
    /// skipped, never aborting startup.
    pub async fn new(state_dir: impl Into<PathBuf>, load_state_on_startup: bool) -> Result<Self, RegistryError> {
        let state_dir = state_dir.into();
        let mut inner = Inner::default();

        if load_state_on_startup {
            let dir = state_dir.join(INSTANCES_SUBDIR);
            let records: Vec<Instance> = codec::load_all(&dir).await?;
            for instance in records {
                inner.index(&instance);
                inner.by_id.insert(instance.id.clone(), instance);
            }
            info!(count = inner.by_id.len(), "loaded instance registry state");
        }

        Ok(InstanceRegistry {
            state_dir,
            inner: Arc::new(RwLock::new(inner)),
            flush_handle: Mutex::new(None),
        })
    }

    fn instances_dir(&self) -> PathBuf {
        self.state_dir.join(INSTANCES_SUBDIR)
    }

    /// Mutates the in-memory index and writes the durable record inside the
    /// same critical section (§4.C "Writes", "Concurrency").
    pub async fn register(&self, instance: Instance) -> Result<(), RegistryError> {
        let mut guard = self.inner.write().await;
        codec::write_record(&self.instances_dir(), instance.id.as_str(), &instance).await?;
        if let Some(previous) = guard.by_id.get(&instance.id) {
            if previous.provider_kind != instance.provider_kind {
                let prev_kind = previous.provider_kind.clone();
                guard.deindex(&instance.id, &prev_kind);
            }
        }
        guard.index(&instance);
        guard.by_id.insert(instance.id.clone(), instance);
        Ok(())
    }

    pub async fn get(&self, id: &InstanceId) -> Option<Instance> {
        self.inner.read().await.by_id.get(id).cloned()
    }

    /// Deletes the in-memory entry and the on-disk file; the file delete is
    /// best-effort per §4.C "Removal".
    pub async fn remove(&self, id: &InstanceId) -> Result<bool, RegistryError> {
        let mut guard = self.inner.write().await;
        let removed = guard.by_id.remove(id);
        if let Some(instance) = &removed {
            guard.deindex(id, &instance.provider_kind);
        }
        codec::remove_record(&self.instances_dir(), id.as_str()).await;
        Ok(removed.is_some())
    }

    pub async fn list(&self, filter: Option<&InstanceFilter>) -> Vec<Instance> {
        let guard = self.inner.read().await;
        let name_re = filter
            .and_then(|f| f.name_pattern.as_deref())
            .and_then(|pat| RegexBuilder::new(pat).case_insensitive(true).build().ok());

        let mut matched: Vec<Instance> = guard
            .by_id
            .values()
            .filter(|i| filter.map(|f| f.matches(i, name_re.as_ref())).unwrap_or(true))
            .cloned()
            .collect();
        matched.sort_by(|a, b| a.created_at.cmp(&b.created_at));

        let offset = filter.and_then(|f| f.offset).unwrap_or(0);
        let matched: Vec<Instance> = matched.into_iter().skip(offset).collect();
        match filter.and_then(|f| f.limit) {
            Some(limit) => matched.into_iter().take(limit).collect(),
            None => matched,
        }
    }

    pub async fn count_by_kind(&self, kind: &ProviderKind) -> usize {
        self.inner.read().await.by_kind.get(kind).map(HashSet::len).unwrap_or(0)
    }

    pub async fn total_count(&self) -> usize {
        self.inner.read().await.by_id.len()
    }

    /// Starts an optional background task that re-serializes every record
    /// every `interval`. A belt-and-suspenders durability measure, not the
    /// primary write path (§4.C "Writes"). A zero interval is a no-op.
    pub async fn start_flush_timer(self: &Arc<Self>, interval: Duration) {
        if interval.is_zero() {
            return;
        }
        let registry = Arc::clone(self);
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                registry.flush_all().await;
            }
        });
        *self.flush_handle.lock().await = Some(handle);
    }

    async fn flush_all(&self) {
        let snapshot: Vec<Instance> = self.inner.read().await.by_id.values().cloned().collect();
        for instance in snapshot {
            if let Err(e) = codec::write_record(&self.instances_dir(), instance.id.as_str(), &instance).await {
                warn!(instance_id = %instance.id, error = %e, "background flush failed for instance");
            }
        }
        debug!("background flush completed");
    }

    pub async fn dispose(&self) {
        if let Some(handle) = self.flush_handle.lock().await.take() {
            handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use swarmctl_domain::{InstanceSpec, InstanceStatus};

    fn sample(name: &str, kind: &str) -> Instance {
        Instance::new(InstanceId::generate(), ProviderKind::new(kind), name, InstanceSpec::default())
    }

    #[tokio::test]
    async fn register_then_get_round_trips_and_persists() {
        let dir = tempfile::tempdir().unwrap();
        let registry = InstanceRegistry::new(dir.path(), false).await.unwrap();
        let instance = sample("ws-1", "container");
        registry.register(instance.clone()).await.unwrap();

        let fetched = registry.get(&instance.id).await.unwrap();
        assert_eq!(fetched, instance);
        assert!(dir.path().join("instances").join(format!("{}.json", instance.id.as_str())).exists());
    }

    #[tokio::test]
    async fn remove_clears_memory_and_disk() {
        let dir = tempfile::tempdir().unwrap();
        let registry = InstanceRegistry::new(dir.path(), false).await.unwrap();
        let instance = sample("ws-1", "container");
        registry.register(instance.clone()).await.unwrap();

        assert!(registry.remove(&instance.id).await.unwrap());
        assert!(registry.get(&instance.id).await.is_none());
        assert!(!dir.path().join("instances").join(format!("{}.json", instance.id.as_str())).exists());
    }

    #[tokio::test]
    async fn restart_reloads_state_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let registry = InstanceRegistry::new(dir.path(), false).await.unwrap();
        let a = sample("ws-a", "container");
        let b = sample("ws-b", "cloud");
        registry.register(a.clone()).await.unwrap();
        registry.register(b.clone()).await.unwrap();
        drop(registry);

        let reloaded = InstanceRegistry::new(dir.path(), true).await.unwrap();
        assert_eq!(reloaded.total_count().await, 2);
        assert_eq!(reloaded.get(&a.id).await.unwrap().name, "ws-a");
        assert_eq!(reloaded.count_by_kind(&ProviderKind::new("cloud")).await, 1);
    }

    #[tokio::test]
    async fn count_by_kind_tracks_registrations_and_removals() {
        let dir = tempfile::tempdir().unwrap();
        let registry = InstanceRegistry::new(dir.path(), false).await.unwrap();
        let a = sample("ws-a", "container");
        let b = sample("ws-b", "container");
        registry.register(a.clone()).await.unwrap();
        registry.register(b.clone()).await.unwrap();
        assert_eq!(registry.count_by_kind(&ProviderKind::new("container")).await, 2);

        registry.remove(&a.id).await.unwrap();
        assert_eq!(registry.count_by_kind(&ProviderKind::new("container")).await, 1);
    }

    #[tokio::test]
    async fn list_applies_status_filter_and_limit() {
        let dir = tempfile::tempdir().unwrap();
        let registry = InstanceRegistry::new(dir.path(), false).await.unwrap();
        for i in 0..3 {
            let mut inst = sample(&format!("ws-{i}"), "container");
            inst.status = if i == 0 { InstanceStatus::Stopped } else { InstanceStatus::Running };
            registry.register(inst).await.unwrap();
        }

        let filter = InstanceFilter {
            status: Some(vec![InstanceStatus::Running]),
            limit: Some(1),
            ..Default::default()
        };
        let results = registry.list(Some(&filter)).await;
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].status, InstanceStatus::Running);
    }
}
