//! Resource Registry (§4.1): owns the immutable catalogue and the mutable
//! per-resource arbitration state, and is the single point of mutual
//! exclusion per resource (`with_state`).

pub mod descriptor;
pub mod state;

pub use descriptor::{
    ApplyCallback, ApplyContext, ApplyType, DescriptorBuilder, ModeSet, Permission, Policy,
    ResourceDescriptor,
};
pub use state::{Holder, PerResourceState, Priority, ScopeKey};

use crate::resource_id::ResourceId;
use log::{error, warn};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Mutex, RwLock};

#[derive(Debug)]
pub enum RegistryError {
    UnknownResource(ResourceId),
    RegistryFrozen,
}

impl fmt::Display for RegistryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnknownResource(id) => write!(f, "unknown resource {id}"),
            Self::RegistryFrozen => write!(f, "registry already frozen by init()"),
        }
    }
}

impl std::error::Error for RegistryError {}

enum CallbackKind {
    Apply,
    Tear,
}

pub use CallbackKind::{Apply as ApplyKind, Tear as TearKind};

/// One resource's arbitration state, keyed by scope for
/// `PerCore`/`PerCluster` resources (§3).
struct ResourceEntry {
    descriptor: ResourceDescriptor,
    states: Mutex<HashMap<ScopeKey, PerResourceState>>,
}

/// Owns the frozen catalogue plus mutable per-resource state. Modelled as an
/// explicit value owned by the `Daemon` context (§9 design note), not a
/// process-wide singleton: tests construct a fresh one per case.
pub struct ResourceRegistry {
    entries: RwLock<HashMap<ResourceId, ResourceEntry>>,
    frozen: std::sync::atomic::AtomicBool,
}

impl Default for ResourceRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ResourceRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            frozen: std::sync::atomic::AtomicBool::new(false),
        }
    }

    /// Registers a descriptor parsed from the catalogue, before `init` has
    /// frozen the registry. Malformed entries are filtered out by the
    /// catalogue parser before reaching here (§4.1).
    pub(crate) fn register(&self, descriptor: ResourceDescriptor) {
        let mut entries = self.entries.write().unwrap();
        entries.insert(
            descriptor.id,
            ResourceEntry {
                descriptor,
                states: Mutex::new(HashMap::new()),
            },
        );
    }

    /// Freeze the catalogue: read each sysfs default, dropping (with a
    /// warning, never aborting) any entry whose sysfs read fails (§4.1).
    pub fn init(&self, _custom_file_present: bool) {
        let entries = self.entries.read().unwrap();
        for entry in entries.values() {
            if !entry.descriptor.supported {
                continue;
            }
            if let Some(path) = &entry.descriptor.sysfs_node {
                match std::fs::read_to_string(path) {
                    Ok(contents) => match contents.trim().parse::<i32>() {
                        Ok(value) => entry.descriptor.set_default_value(value),
                        Err(e) => {
                            warn!(
                                "resource {} ({}): sysfs default at {:?} is not an integer: {e}",
                                entry.descriptor.id, entry.descriptor.name, path
                            );
                        }
                    },
                    Err(e) => {
                        warn!(
                            "resource {} ({}): failed to read sysfs default at {:?}: {e}",
                            entry.descriptor.id, entry.descriptor.name, path
                        );
                    }
                }
            }
        }
        self.frozen
            .store(true, std::sync::atomic::Ordering::Release);
    }

    #[must_use]
    pub fn is_frozen(&self) -> bool {
        self.frozen.load(std::sync::atomic::Ordering::Acquire)
    }

    /// Run `f` with shared read access to a resource's descriptor.
    pub fn with_descriptor<R>(
        &self,
        id: ResourceId,
        f: impl FnOnce(&ResourceDescriptor) -> R,
    ) -> Result<R, RegistryError> {
        let entries = self.entries.read().unwrap();
        let entry = entries
            .get(&id)
            .ok_or(RegistryError::UnknownResource(id))?;
        Ok(f(&entry.descriptor))
    }

    /// The single point of mutual exclusion per resource (§4.1): gives the
    /// arbiter exclusive access to the `PerResourceState` for one
    /// `(id, scope)` for the duration of `f`.
    pub fn with_state<R>(
        &self,
        id: ResourceId,
        scope: ScopeKey,
        f: impl FnOnce(&ResourceDescriptor, &mut PerResourceState) -> R,
    ) -> Result<R, RegistryError> {
        let entries = self.entries.read().unwrap();
        let entry = entries
            .get(&id)
            .ok_or(RegistryError::UnknownResource(id))?;
        let mut states = match entry.states.lock() {
            Ok(g) => g,
            Err(poisoned) => {
                warn!("per-resource lock poisoned for {id}, recovering");
                poisoned.into_inner()
            }
        };
        let state = states.entry(scope).or_default();
        Ok(f(&entry.descriptor, state))
    }

    /// Registers an apply/tear callback for `id`. Only valid before `init`
    /// (§4.1, §6 "Extension registration").
    pub fn set_callback(
        &self,
        id: ResourceId,
        kind: CallbackKind,
        cb: ApplyCallback,
    ) -> Result<(), RegistryError> {
        if self.is_frozen() {
            return Err(RegistryError::RegistryFrozen);
        }
        let mut entries = self.entries.write().unwrap();
        let entry = entries
            .get_mut(&id)
            .ok_or(RegistryError::UnknownResource(id))?;
        match kind {
            CallbackKind::Apply => entry.descriptor.apply_cb = Some(cb),
            CallbackKind::Tear => entry.descriptor.tear_cb = Some(cb),
        }
        Ok(())
    }

    pub fn lookup(&self, id: ResourceId) -> Result<(), RegistryError> {
        let entries = self.entries.read().unwrap();
        if entries.contains_key(&id) {
            Ok(())
        } else {
            error!("lookup failed for unknown resource {id}");
            Err(RegistryError::UnknownResource(id))
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.read().unwrap().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
