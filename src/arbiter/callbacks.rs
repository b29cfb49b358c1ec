//! Built-in apply/tear side-effects, used when a resource has no
//! extension-registered callback (§4.3).

use crate::registry::{ApplyType, ResourceDescriptor, ScopeKey};
use std::path::PathBuf;

/// Cgroup hierarchy root. `PerCGroup` resources write under
/// `{CGROUP_ROOT}/{name}/{node}` (§4.3 "CGroup variants write to a path
/// under the resource's cgroup root").
pub const CGROUP_ROOT: &str = "/sys/fs/cgroup";

fn node_or_missing(descriptor: &ResourceDescriptor) -> Result<&std::path::Path, String> {
    descriptor
        .sysfs_node
        .as_deref()
        .ok_or_else(|| format!("resource {} has no sysfs node configured", descriptor.id))
}

/// Resolves the path the built-in apply/tear should write to for this
/// descriptor and scope (§4.3: global path, per-cluster/per-core templated
/// path, or cgroup-rooted path).
pub fn resolve_path(descriptor: &ResourceDescriptor, scope: ScopeKey) -> Result<PathBuf, String> {
    let node = node_or_missing(descriptor)?;
    match (descriptor.apply_type, scope) {
        (ApplyType::Global, _) => Ok(node.to_path_buf()),
        (ApplyType::PerCluster, ScopeKey::CoreCluster { cluster, .. }) => {
            Ok(templated_path(node, "cluster", cluster))
        }
        (ApplyType::PerCore, ScopeKey::CoreCluster { core, .. }) => {
            Ok(templated_path(node, "core", core))
        }
        (ApplyType::PerCluster | ApplyType::PerCore, ScopeKey::Global) => Err(format!(
            "resource {} requires a core/cluster scope but none was supplied",
            descriptor.id
        )),
        (ApplyType::PerCGroup, _) => {
            Ok(PathBuf::from(CGROUP_ROOT).join(&descriptor.name).join(node))
        }
    }
}

fn templated_path(node: &std::path::Path, dim: &str, index: u8) -> PathBuf {
    let mut path = node.to_path_buf();
    path.push(format!("{dim}{index}"));
    path
}

/// Writes `values` to the sysfs node for `descriptor`/`scope`, space-joined
/// in one write so a multi-valued resource's values land in a single
/// syscall instead of racing with another apply between writes (§3 "a
/// multi-valued resource applies each value atomically"). Failure is logged
/// by the caller, never surfaced on the wire, and never rolls back
/// arbitration state (§4.3, §7 `SysfsWriteFailed`).
pub fn builtin_apply(descriptor: &ResourceDescriptor, scope: ScopeKey, values: &[i32]) -> Result<(), String> {
    let path = resolve_path(descriptor, scope)?;
    let payload = values
        .iter()
        .map(i32::to_string)
        .collect::<Vec<_>>()
        .join(" ");
    std::fs::write(&path, payload)
        .map_err(|e| format!("write {values:?} to {path:?} failed: {e}"))
}

/// Built-in tear is the same write path as apply: the arbiter already
/// computed the values to restore (default, or the new winner) before
/// calling this.
pub fn builtin_tear(descriptor: &ResourceDescriptor, scope: ScopeKey, values: &[i32]) -> Result<(), String> {
    builtin_apply(descriptor, scope, values)
}
