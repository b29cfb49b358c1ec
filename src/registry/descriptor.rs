//! Immutable per-resource catalogue entry (§3 `ResourceDescriptor`).

use crate::resource_id::ResourceId;
use std::path::PathBuf;
use std::sync::atomic::{AtomicI32, Ordering};

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Permission {
    System,
    ThirdParty,
}

impl Permission {
    /// `""` defaults to `ThirdParty` (§6 catalogue schema).
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "System" => Some(Self::System),
            "ThirdParty" | "" => Some(Self::ThirdParty),
            _ => None,
        }
    }
}

/// Global device mode gate. Kept as a bitset so a resource can be honoured in
/// more than one mode (§3 `modes: bitset of {DisplayOn, Doze, ...}`).
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct ModeSet(u8);

impl ModeSet {
    pub const DISPLAY_ON: Self = Self(1 << 0);
    pub const DOZE: Self = Self(1 << 1);
    pub const DOZE_LIGHT: Self = Self(1 << 2);
    pub const SUSPEND: Self = Self(1 << 3);

    #[must_use]
    pub const fn empty() -> Self {
        Self(0)
    }

    #[must_use]
    pub const fn contains(self, mode: Self) -> bool {
        self.0 & mode.0 != 0
    }

    #[must_use]
    pub const fn union(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_ascii_uppercase().as_str() {
            "DISPLAYON" | "DISPLAY_ON" => Some(Self::DISPLAY_ON),
            "DOZE" => Some(Self::DOZE),
            "DOZELIGHT" | "DOZE_LIGHT" => Some(Self::DOZE_LIGHT),
            "SUSPEND" => Some(Self::SUSPEND),
            _ => None,
        }
    }

    #[must_use]
    pub const fn bits(self) -> u8 {
        self.0
    }

    #[must_use]
    pub const fn from_bits(bits: u8) -> Self {
        Self(bits)
    }
}

impl Default for ModeSet {
    fn default() -> Self {
        Self::DISPLAY_ON
    }
}

/// Conflict-resolution policy applied to the holders of one resource (§4.3).
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Policy {
    HigherBetter,
    LowerBetter,
    Instant,
}

impl Policy {
    /// `LazyApply` is the YAML default when `Policy` is unspecified and is
    /// treated as an alias for `HigherBetter` (spec.md §6, DESIGN.md Open
    /// Question (a)).
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "HigherBetter" => Some(Self::HigherBetter),
            "LowerBetter" => Some(Self::LowerBetter),
            "Instant" => Some(Self::Instant),
            "LazyApply" | "" => Some(Self::HigherBetter),
            _ => None,
        }
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum ApplyType {
    Global,
    PerCluster,
    PerCore,
    PerCGroup,
}

impl ApplyType {
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "Global" | "" => Some(Self::Global),
            "PerCluster" => Some(Self::PerCluster),
            "PerCore" => Some(Self::PerCore),
            "PerCGroup" => Some(Self::PerCGroup),
            _ => None,
        }
    }
}

/// A type-erased callback context, handed to an extension's apply/tear
/// function instead of the built-in (§4.3). The context carries everything
/// the extension needs and nothing it could use to reach back into the
/// arbiter's internals.
pub struct ApplyContext {
    pub resource_id: ResourceId,
    pub scope: super::state::ScopeKey,
    /// Every value of the winning holder (§3: a multi-valued resource
    /// applies each value atomically). A single-valued resource's context
    /// always carries a one-element vector.
    pub values: Vec<i32>,
    pub handle: u64,
}

pub type ApplyCallback = Box<dyn Fn(&ApplyContext) -> Result<(), String> + Send + Sync>;

/// Catalogue entry. Immutable after [`super::ResourceRegistry::init`] freezes
/// the registry (§3, §4.1).
pub struct ResourceDescriptor {
    pub id: ResourceId,
    pub name: String,
    pub sysfs_node: Option<PathBuf>,
    pub supported: bool,
    /// Read from the sysfs node at catalogue load; swapped in after `init`
    /// reads it, hence the interior mutability.
    default_value: AtomicI32,
    pub high_threshold: i32,
    pub low_threshold: i32,
    pub permission: Permission,
    pub modes: ModeSet,
    pub policy: Policy,
    pub apply_type: ApplyType,
    pub core_level_conflict: bool,
    pub apply_cb: Option<ApplyCallback>,
    pub tear_cb: Option<ApplyCallback>,
}

impl ResourceDescriptor {
    #[must_use]
    pub fn default_value(&self) -> i32 {
        self.default_value.load(Ordering::Acquire)
    }

    pub(crate) fn set_default_value(&self, value: i32) {
        self.default_value.store(value, Ordering::Release);
    }

    #[must_use]
    pub fn clamp(&self, value: i32) -> i32 {
        value.clamp(self.low_threshold, self.high_threshold)
    }

    #[must_use]
    pub fn in_range(&self, value: i32) -> bool {
        value >= self.low_threshold && value <= self.high_threshold
    }

    /// Scoping rule from §4.3 #3: per-core/per-cluster resources, or any
    /// resource explicitly flagged `core_level_conflict`, arbitrate per
    /// `(core, cluster)`; everything else shares one global scope.
    #[must_use]
    pub fn is_scoped(&self) -> bool {
        self.core_level_conflict
            || matches!(self.apply_type, ApplyType::PerCluster | ApplyType::PerCore)
    }
}

pub(crate) struct DescriptorBuilder {
    pub id: ResourceId,
    pub name: String,
    pub sysfs_node: Option<PathBuf>,
    pub supported: bool,
    pub default_value: i32,
    pub high_threshold: i32,
    pub low_threshold: i32,
    pub permission: Permission,
    pub modes: ModeSet,
    pub policy: Policy,
    pub apply_type: ApplyType,
    pub core_level_conflict: bool,
}

impl DescriptorBuilder {
    pub fn build(self) -> ResourceDescriptor {
        ResourceDescriptor {
            id: self.id,
            name: self.name,
            sysfs_node: self.sysfs_node,
            supported: self.supported,
            default_value: AtomicI32::new(self.default_value),
            high_threshold: self.high_threshold,
            low_threshold: self.low_threshold,
            permission: self.permission,
            modes: self.modes,
            policy: self.policy,
            apply_type: self.apply_type,
            core_level_conflict: self.core_level_conflict,
            apply_cb: None,
            tear_cb: None,
        }
    }
}
