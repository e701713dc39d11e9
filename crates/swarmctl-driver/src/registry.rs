use std::collections::HashMap;
use std::sync::Arc;

use swarmctl_config::DriverConfig;
use swarmctl_domain::ProviderKind;

use crate::cloud::CloudDriver;
use crate::container::ContainerDriver;
use crate::driver::Driver;
use crate::error::DriverError;

type Constructor = Box<dyn Fn(&DriverConfig) -> Result<Arc<dyn Driver>, DriverError> + Send + Sync>;

/// Process-wide map from provider-kind tag to a driver constructor (§4.B).
/// Registration happens once at startup, before any component is using the
/// map — there is no implicit registration via module load, unlike the
/// source system's global factory.
pub struct DriverRegistry {
    constructors: HashMap<String, Constructor>,
}

impl Default for DriverRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl DriverRegistry {
    pub fn new() -> Self {
        DriverRegistry {
            constructors: HashMap::new(),
        }
    }

    /// A registry pre-populated with the two shipped bindings (§6):
    /// `"container"` and `"cloud"`.
    pub fn with_builtins() -> Self {
        let mut reg = Self::new();
        reg.register("container", |cfg| match cfg {
            DriverConfig::Container(c) => Ok(Arc::new(ContainerDriver::new(c.clone())) as Arc<dyn Driver>),
            _ => Err(DriverError::InvalidArgument("container driver requires a Container config".into())),
        });
        reg.register("cloud", |cfg| match cfg {
            DriverConfig::Cloud(c) => Ok(Arc::new(CloudDriver::new(c.clone())?) as Arc<dyn Driver>),
            _ => Err(DriverError::InvalidArgument("cloud driver requires a Cloud config".into())),
        });
        reg
    }

    pub fn register<F>(&mut self, kind: impl Into<String>, ctor: F) -> &mut Self
    where
        F: Fn(&DriverConfig) -> Result<Arc<dyn Driver>, DriverError> + Send + Sync + 'static,
    {
        self.constructors.insert(kind.into(), Box::new(ctor));
        self
    }

    /// Returns an uninitialized driver for `kind`. `NotFound` if `kind` was
    /// never registered.
    pub fn create(&self, kind: &ProviderKind, cfg: &DriverConfig) -> Result<Arc<dyn Driver>, DriverError> {
        let ctor = self
            .constructors
            .get(kind.as_str())
            .ok_or_else(|| DriverError::NotFound(format!("no driver registered for kind '{kind}'")))?;
        ctor(cfg)
    }

    /// Builds a driver and awaits `initialize()` before returning it.
    pub async fn create_and_init(&self, kind: &ProviderKind, cfg: &DriverConfig) -> Result<Arc<dyn Driver>, DriverError> {
        let driver = self.create(kind, cfg)?;
        driver.initialize().await?;
        Ok(driver)
    }

    pub fn registered_kinds(&self) -> Vec<String> {
        self.constructors.keys().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn unregistered_kind_fails_not_found() {
        let registry = DriverRegistry::new();
        let err = registry
            .create(&ProviderKind::new("nope"), &DriverConfig::Container(Default::default()))
            .unwrap_err();
        assert!(matches!(err, DriverError::NotFound(_)));
    }

    #[tokio::test]
    async fn builtins_resolve_container_and_cloud() {
        let registry = DriverRegistry::with_builtins();
        assert!(registry.registered_kinds().contains(&"container".to_string()));
        assert!(registry.registered_kinds().contains(&"cloud".to_string()));
        let driver = registry
            .create(&ProviderKind::new("container"), &DriverConfig::Container(Default::default()))
            .unwrap();
        assert_eq!(driver.kind(), "container");
    }

    #[tokio::test]
    async fn mismatched_config_kind_is_invalid_argument() {
        let registry = DriverRegistry::with_builtins();
        let err = registry
            .create(
                &ProviderKind::new("container"),
                &DriverConfig::Cloud(swarmctl_config::CloudDriverConfig::default()),
            )
            .unwrap_err();
        assert!(matches!(err, DriverError::InvalidArgument(_)));
    }
}
