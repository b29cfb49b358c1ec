//! Explicit process context (§9 design note): replaces the source's
//! constructor-time singletons (Registry, HandleTable, Settings) with one
//! value owned by `main`, constructed once and passed down. The
//! `__attribute__((constructor))` extension-registration idiom becomes an
//! explicit phase between [`Daemon::new`] and [`Daemon::init_catalogue`].

use crate::catalogue::{self, CatalogueError};
use crate::config::DaemonConfig;
use crate::persisted_state;
use crate::registry::{ApplyCallback, ApplyKind, RegistryError, ResourceRegistry, TearKind};
use crate::request::RequestLifecycleManager;
use crate::resource_id::ResourceId;
use crate::target::{self, TargetConfigError, TargetRegistry};
use crate::worker_pool::WorkerPool;
use std::path::Path;
use std::sync::{Arc, RwLock};

const DEFAULT_CATALOGUE_PATH: &str = "/etc/resource-tuner/resources.yaml";
const DEFAULT_TARGET_PATH: &str = "/etc/resource-tuner/target.yaml";

#[derive(Debug)]
pub enum DaemonError {
    Catalogue(CatalogueError),
    Target(TargetConfigError),
}

impl std::fmt::Display for DaemonError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Catalogue(e) => write!(f, "{e}"),
            Self::Target(e) => write!(f, "{e}"),
        }
    }
}

impl std::error::Error for DaemonError {}

impl From<CatalogueError> for DaemonError {
    fn from(e: CatalogueError) -> Self {
        Self::Catalogue(e)
    }
}

impl From<TargetConfigError> for DaemonError {
    fn from(e: TargetConfigError) -> Self {
        Self::Target(e)
    }
}

pub struct Daemon {
    pub registry: Arc<ResourceRegistry>,
    pub lifecycle: Arc<RequestLifecycleManager>,
    pub target: RwLock<TargetRegistry>,
    config: DaemonConfig,
}

impl Daemon {
    #[must_use]
    pub fn new(config: DaemonConfig) -> Self {
        let registry = Arc::new(ResourceRegistry::new());
        let apply_pool = Arc::new(WorkerPool::new(
            "apply",
            config.apply_pool_desired,
            config.apply_pool_max,
            config.apply_pool_max_queue,
        ));
        let timer_pool = Arc::new(WorkerPool::new_timer_pool(
            "timer",
            config.timer_pool_desired,
            config.timer_pool_max,
            config.timer_pool_max_queue,
        ));
        let lifecycle = Arc::new(RequestLifecycleManager::new(
            registry.clone(),
            apply_pool,
            timer_pool,
        ));
        Self {
            registry,
            lifecycle,
            target: RwLock::new(TargetRegistry::default()),
            config,
        }
    }

    /// Registration phase (§6 "Extension registration", §9): must be
    /// called after `new` and before `init_catalogue`, which freezes the
    /// registry.
    pub fn register_apply(&self, id: ResourceId, cb: ApplyCallback) -> Result<(), RegistryError> {
        self.registry.set_callback(id, ApplyKind, cb)
    }

    pub fn register_tear(&self, id: ResourceId, cb: ApplyCallback) -> Result<(), RegistryError> {
        self.registry.set_callback(id, TearKind, cb)
    }

    /// Loads the resource and target catalogues and freezes the registry.
    /// Replays `resource_original_values.txt` first (§11 "Persisted
    /// state"), before the catalogue's own per-entry sysfs reads, so a
    /// crash-recovered baseline is in place before `init` samples it.
    pub fn init_catalogue(
        &self,
        resource_config_path: Option<&Path>,
        target_config_path: Option<&Path>,
    ) -> Result<(), DaemonError> {
        persisted_state::replay(&self.config.persisted_state_path);

        let custom_catalogue = resource_config_path.is_some();
        let resource_path = resource_config_path.unwrap_or(Path::new(DEFAULT_CATALOGUE_PATH));
        for descriptor in catalogue::parse_file(resource_path)? {
            self.registry.register(descriptor);
        }
        self.registry.init(custom_catalogue);

        let target_path = target_config_path.unwrap_or(Path::new(DEFAULT_TARGET_PATH));
        if target_path.exists() {
            *self.target.write().unwrap() = target::parse_file(target_path)?;
        }
        Ok(())
    }
}
