//! Arbiter (§4.3): conflict resolution and apply/tear side-effects. For each
//! `(resource_id, scope)` touched by the current apply or tear, locks the
//! `PerResourceState` via `ResourceRegistry::with_state`, mutates `holders`,
//! recomputes the winner, and invokes the apply callback only if the winner
//! differs from `current_value`.

pub mod callbacks;

use crate::registry::{
    ApplyContext, Holder, Permission, Priority, ResourceDescriptor, ResourceRegistry, ScopeKey,
};
use crate::request::{Request, ResourceInstance};
use log::error;
use std::sync::Arc;

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
enum CallbackDirection {
    Apply,
    Tear,
}

pub struct Arbiter {
    registry: Arc<ResourceRegistry>,
}

impl Arbiter {
    #[must_use]
    pub fn new(registry: Arc<ResourceRegistry>) -> Self {
        Self { registry }
    }

    #[must_use]
    pub fn scope_for(descriptor: &ResourceDescriptor, instance: &ResourceInstance) -> ScopeKey {
        if descriptor.is_scoped() {
            ScopeKey::CoreCluster {
                core: instance.info.core,
                cluster: instance.info.cluster,
            }
        } else {
            ScopeKey::Global
        }
    }

    /// Tune apply path (§4.3 #1): insert a holder per resource in `request`
    /// and re-arbitrate. Resources already filtered out by the lifecycle
    /// manager (unsupported, out-of-range, permission, mode) never reach
    /// here — every resource in `request.resources` is applied.
    pub fn apply(&self, request: &Request) {
        for instance in &request.resources {
            let Ok(scope) = self
                .registry
                .with_descriptor(instance.id, |d| Self::scope_for(d, instance))
            else {
                continue;
            };
            let _ = self.registry.with_state(instance.id, scope, |descriptor, state| {
                let values: Vec<i32> = instance
                    .values
                    .values()
                    .iter()
                    .map(|v| descriptor.clamp(*v))
                    .collect();
                state.insert(Holder {
                    handle: request.handle,
                    values,
                    priority: request.priority,
                    permission: request.permission_tag,
                    start_time_ms: request.start_time_ms(),
                    scope,
                });
                self.apply_winner(descriptor, scope, state, request.handle);
            });
        }
    }

    /// Untune / expire tear path (§4.3 #2): remove the holder for
    /// `request.handle`; restore the default if no holders remain,
    /// otherwise re-arbitrate among the survivors.
    pub fn tear(&self, request: &Request) {
        for instance in &request.resources {
            let Ok(scope) = self
                .registry
                .with_descriptor(instance.id, |d| Self::scope_for(d, instance))
            else {
                continue;
            };
            let _ = self.registry.with_state(instance.id, scope, |descriptor, state| {
                state.remove(request.handle);
                if state.is_empty() {
                    // The catalogue default is read as a single sysfs scalar
                    // (§4.1 `init`), so tear-to-default always restores a
                    // one-element vector even for a resource whose holders
                    // carried several values.
                    let default = vec![descriptor.default_value()];
                    if state.current_value != Some(default.clone()) {
                        if self
                            .invoke(descriptor, scope, &default, request.handle, CallbackDirection::Tear)
                            .is_ok()
                        {
                            state.current_value = Some(default);
                        }
                    }
                } else {
                    self.apply_winner(descriptor, scope, state, request.handle);
                }
            });
        }
    }

    fn apply_winner(
        &self,
        descriptor: &ResourceDescriptor,
        scope: ScopeKey,
        state: &mut crate::registry::PerResourceState,
        handle: u64,
    ) {
        let Some(winner) = state.winner(descriptor.policy, |v| descriptor.clamp(v)) else {
            return;
        };
        if state.current_value == Some(winner.clone()) {
            return;
        }
        if self
            .invoke(descriptor, scope, &winner, handle, CallbackDirection::Apply)
            .is_ok()
        {
            state.current_value = Some(winner);
        }
        // On failure current_value is left unchanged (§4.3 Failure semantics):
        // a transient sysfs write failure must not permanently drop the holder.
    }

    fn invoke(
        &self,
        descriptor: &ResourceDescriptor,
        scope: ScopeKey,
        values: &[i32],
        handle: u64,
        direction: CallbackDirection,
    ) -> Result<(), String> {
        let ctx = ApplyContext {
            resource_id: descriptor.id,
            scope,
            values: values.to_vec(),
            handle,
        };
        let result = match direction {
            CallbackDirection::Apply => match &descriptor.apply_cb {
                Some(cb) => cb(&ctx),
                None => callbacks::builtin_apply(descriptor, scope, values),
            },
            CallbackDirection::Tear => match &descriptor.tear_cb {
                Some(cb) => cb(&ctx),
                None => callbacks::builtin_tear(descriptor, scope, values),
            },
        };
        if let Err(e) = &result {
            error!(
                "SysfsWriteFailed: resource {} scope {:?} values {values:?}: {e}",
                descriptor.id, scope
            );
        }
        result
    }
}
