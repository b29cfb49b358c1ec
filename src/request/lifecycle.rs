//! Request Lifecycle Manager (§4.2): assigns handles, validates inbound
//! requests, dispatches to the arbiter, tracks expiry.

use crate::arbiter::Arbiter;
use crate::registry::{ModeSet, Permission, Priority, ResourceRegistry};
use crate::request::{HandleTable, Request, RequestKind, RequestState, ResourceInstance};
use crate::worker_pool::WorkerPool;
use log::{debug, trace, warn};
use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock before the epoch")
        .as_millis() as i64
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TuneError {
    /// `duration_ms == 0` (§4.2: "duration ≠ 0").
    InvalidDuration,
    /// A `System`-permission resource was requested by a `ThirdParty`
    /// caller. Fatal for the whole request, unlike the other per-resource
    /// filters, which only drop the offending resource.
    PermissionDenied,
    /// Every resource was dropped by filtering (unsupported, out of range,
    /// mode-suppressed, or unknown); nothing left to apply.
    NoViableResources,
    HandleExhausted,
    Overloaded,
}

impl fmt::Display for TuneError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidDuration => write!(f, "duration_ms must not be 0"),
            Self::PermissionDenied => write!(f, "caller lacks permission for a System resource"),
            Self::NoViableResources => write!(f, "no resources survived validation"),
            Self::HandleExhausted => write!(f, "monotonic handle counter exhausted"),
            Self::Overloaded => write!(f, "apply worker pool queue is full"),
        }
    }
}

impl std::error::Error for TuneError {}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UntuneError {
    Overloaded,
}

impl fmt::Display for UntuneError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Overloaded => write!(f, "apply worker pool queue is full"),
        }
    }
}

impl std::error::Error for UntuneError {}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetuneError {
    HandleNotFound,
    /// `new_duration_ms < remaining_ms(handle)`; retune only extends (§4.2,
    /// §8 property 4).
    RetuneNotExtending,
    Overloaded,
}

impl fmt::Display for RetuneError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::HandleNotFound => write!(f, "no live request for that handle"),
            Self::RetuneNotExtending => write!(f, "retune must not shorten the remaining duration"),
            Self::Overloaded => write!(f, "timer worker pool queue is full"),
        }
    }
}

impl std::error::Error for RetuneError {}

/// The inbound shape of a `submit_tune` call, pre-handle (§3 `Request`
/// fields the caller supplies; `handle` and `state` are minted here).
pub struct TuneRequest {
    pub duration_ms: i64,
    pub priority: Priority,
    pub background: bool,
    pub client_pid: i32,
    pub client_tid: i32,
    pub permission_tag: Permission,
    pub resources: Vec<ResourceInstance>,
}

pub struct RequestLifecycleManager {
    registry: Arc<ResourceRegistry>,
    arbiter: Arc<Arbiter>,
    handles: Arc<HandleTable>,
    apply_pool: Arc<WorkerPool>,
    timer_pool: Arc<WorkerPool>,
    current_mode: AtomicU8,
}

impl RequestLifecycleManager {
    #[must_use]
    pub fn new(
        registry: Arc<ResourceRegistry>,
        apply_pool: Arc<WorkerPool>,
        timer_pool: Arc<WorkerPool>,
    ) -> Self {
        let arbiter = Arc::new(Arbiter::new(registry.clone()));
        Self {
            registry,
            arbiter,
            handles: Arc::new(HandleTable::new()),
            apply_pool,
            timer_pool,
            current_mode: AtomicU8::new(ModeSet::default().bits()),
        }
    }

    #[must_use]
    pub fn handles(&self) -> &HandleTable {
        &self.handles
    }

    pub fn set_current_mode(&self, mode: ModeSet) {
        self.current_mode.store(mode.bits(), Ordering::Release);
    }

    #[must_use]
    pub fn current_mode(&self) -> ModeSet {
        ModeSet::from_bits(self.current_mode.load(Ordering::Acquire))
    }

    /// §4.2 `submit_tune`. Filters `req.resources` per-resource (unknown,
    /// unsupported, out-of-range, mode-suppressed resources are dropped
    /// silently); a `System` resource requested by a `ThirdParty` caller
    /// aborts the whole request with `PermissionDenied`. An empty surviving
    /// set returns `NoViableResources` with no handle allocated.
    pub fn submit_tune(&self, req: TuneRequest) -> Result<u64, TuneError> {
        if req.duration_ms == 0 {
            return Err(TuneError::InvalidDuration);
        }

        let mut viable = Vec::with_capacity(req.resources.len());
        for instance in req.resources {
            match self.filter_resource(&instance, req.permission_tag, req.background) {
                FilterOutcome::Keep => viable.push(instance),
                FilterOutcome::Drop => {}
                FilterOutcome::PermissionDenied => return Err(TuneError::PermissionDenied),
            }
        }
        if viable.is_empty() {
            return Err(TuneError::NoViableResources);
        }

        let handle = self
            .handles
            .allocate()
            .map_err(|_| TuneError::HandleExhausted)?;
        let start_time_ms = now_ms();
        let request = Arc::new(Request::new(
            handle,
            RequestKind::Tune,
            req.duration_ms,
            start_time_ms,
            req.priority,
            req.background,
            req.client_pid,
            req.client_tid,
            req.permission_tag,
            viable,
        ));

        self.dispatch(request)
    }

    /// Shared tail of `submit_tune` and the signal-expanded variants:
    /// enqueue the apply job, only inserting into the handle table once the
    /// enqueue has actually been accepted, so a `QueueFull` never leaves an
    /// orphaned handle behind. The expiry timer is armed from inside the
    /// apply job itself, after it marks the request `Applied` (§5: apply is
    /// strictly ordered before the timer is armed) — arming it here in
    /// `dispatch` instead would race the apply job on a separate pool and
    /// could let the timer fire, see a still-`Queued` request, and silently
    /// drop the expiry while apply goes on to insert a holder that nothing
    /// ever tears down.
    fn dispatch(&self, request: Arc<Request>) -> Result<u64, TuneError> {
        let handle = request.handle;
        let apply_job = {
            let request = request.clone();
            let arbiter = self.arbiter.clone();
            let handles = self.handles.clone();
            let timer_pool = self.timer_pool.clone();
            move || {
                if request.state() == RequestState::Rejected {
                    trace!("request {} cancelled before apply ran", request.handle);
                    return;
                }
                arbiter.apply(&request);
                request.set_state(RequestState::Applied);
                Self::arm_expiry_with(&handles, &arbiter, &timer_pool, request);
            }
        };
        if self.apply_pool.enqueue(apply_job).is_err() {
            return Err(TuneError::Overloaded);
        }

        self.handles.insert(request);
        Ok(handle)
    }

    /// (Re-)arms the per-request timer on the current window. A no-op if
    /// the request has no expiry (`duration_ms == -1`). Only valid to call
    /// once the request is already `Applied` (§5 ordering).
    fn arm_expiry(&self, request: Arc<Request>) {
        Self::arm_expiry_with(&self.handles, &self.arbiter, &self.timer_pool, request);
    }

    fn arm_expiry_with(
        handles: &Arc<HandleTable>,
        arbiter: &Arc<Arbiter>,
        timer_pool: &Arc<WorkerPool>,
        request: Arc<Request>,
    ) {
        if !request.has_expiry() {
            return;
        }
        let duration_ms = request.duration_ms();
        let handles = handles.clone();
        let arbiter = arbiter.clone();
        let fire_request = request.clone();
        let armed = request.timer.start(duration_ms, false, timer_pool, move || {
            if fire_request.state() != RequestState::Applied {
                return;
            }
            arbiter.tear(&fire_request);
            fire_request.set_state(RequestState::Expired);
            handles.remove(fire_request.handle);
        });
        if !armed {
            warn!(
                "failed to arm expiry timer for request {}: timer pool overloaded",
                request.handle
            );
        }
    }

    /// §4.2 `submit_untune`. Idempotent: an unknown or already-terminal
    /// handle is a no-op. A still-`Queued` request is marked `Rejected`
    /// immediately, which the apply worker observes and no-ops on (§5
    /// cancellation).
    pub fn submit_untune(&self, handle: u64) -> Result<(), UntuneError> {
        let Some(request) = self.handles.get(handle) else {
            return Ok(());
        };

        match request.state() {
            RequestState::Rejected | RequestState::Expired | RequestState::Untuned => Ok(()),
            RequestState::Queued => {
                request.set_state(RequestState::Rejected);
                self.handles.remove(handle);
                Ok(())
            }
            RequestState::Applied => {
                request.timer.kill();
                let tear_job = {
                    let request = request.clone();
                    let arbiter = self.arbiter.clone();
                    let handles = self.handles.clone();
                    move || {
                        arbiter.tear(&request);
                        request.set_state(RequestState::Untuned);
                        handles.remove(request.handle);
                    }
                };
                self.apply_pool.enqueue(tear_job).map_err(|_| {
                    debug!("untune of {handle} could not be enqueued, pool overloaded");
                    UntuneError::Overloaded
                })
            }
        }
    }

    /// §4.2 `submit_retune`. Only extends: rejects with
    /// `RetuneNotExtending` if `new_duration_ms` would shorten the
    /// remaining window, otherwise kills the current timer and arms a new
    /// one from `now`. Never re-runs the apply path (§8 property 4).
    pub fn submit_retune(&self, handle: u64, new_duration_ms: i64) -> Result<(), RetuneError> {
        let request = self
            .handles
            .get(handle)
            .filter(|r| r.state() == RequestState::Applied || r.state() == RequestState::Queued)
            .ok_or(RetuneError::HandleNotFound)?;

        let now = now_ms();
        let remaining = request.remaining_ms(now);
        let extends = new_duration_ms == -1 || (remaining != i64::MAX && new_duration_ms >= remaining);
        if !extends {
            return Err(RetuneError::RetuneNotExtending);
        }

        // A still-`Queued` request has no timer armed yet — apply hasn't run
        // (§5 ordering), so there's nothing to kill, and re-arming here
        // would race the apply job's own arm once it marks the request
        // `Applied`. Rearming the window is enough: the apply job reads it
        // fresh and arms from there.
        if request.state() == RequestState::Applied {
            request.timer.kill();
            request.rearm_window(now, new_duration_ms);
            self.arm_expiry(request);
        } else {
            request.rearm_window(now, new_duration_ms);
        }
        Ok(())
    }

    /// §4.2 `submit_signal_tune`: a signal expands into one synthetic tune
    /// request, indistinguishable from a normal one from here on. Signals
    /// originate inside the daemon, so they carry `System` permission and
    /// run as background work (exempt from the mode gate).
    pub fn submit_signal_tune(
        &self,
        resources: Vec<ResourceInstance>,
        duration_ms: i64,
        priority: Priority,
    ) -> Result<u64, TuneError> {
        self.submit_tune(TuneRequest {
            duration_ms,
            priority,
            background: true,
            client_pid: 0,
            client_tid: 0,
            permission_tag: Permission::System,
            resources,
        })
    }

    /// §4.2 `submit_signal_untune`: same idempotent semantics as
    /// `submit_untune`, since a signal-originated request is a normal
    /// request by the time a handle exists for it.
    pub fn submit_signal_untune(&self, handle: u64) -> Result<(), UntuneError> {
        self.submit_untune(handle)
    }

    fn filter_resource(
        &self,
        instance: &ResourceInstance,
        caller_permission: Permission,
        background: bool,
    ) -> FilterOutcome {
        let current_mode = self.current_mode();
        let checked = self.registry.with_descriptor(instance.id, |descriptor| {
            if !descriptor.supported {
                return FilterOutcome::Drop;
            }
            if descriptor.permission == Permission::System && caller_permission == Permission::ThirdParty {
                return FilterOutcome::PermissionDenied;
            }
            if !descriptor.in_range(instance.primary_value()) {
                return FilterOutcome::Drop;
            }
            if !background && !descriptor.modes.contains(current_mode) {
                return FilterOutcome::Drop;
            }
            FilterOutcome::Keep
        });
        checked.unwrap_or(FilterOutcome::Drop)
    }
}

enum FilterOutcome {
    Keep,
    Drop,
    PermissionDenied,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{ApplyType, DescriptorBuilder, Policy};
    use crate::resource_id::{ResourceId, ResourceInfo};
    use crate::request::ResourceValue;
    use std::sync::Mutex;

    fn manager_with(
        id: ResourceId,
        default_value: i32,
        permission: Permission,
    ) -> (RequestLifecycleManager, Arc<Mutex<Vec<i32>>>) {
        let reg = ResourceRegistry::new();
        reg.register(
            DescriptorBuilder {
                id,
                name: "r".into(),
                sysfs_node: None,
                supported: true,
                default_value,
                high_threshold: 1024,
                low_threshold: 0,
                permission,
                modes: ModeSet::default(),
                policy: Policy::HigherBetter,
                apply_type: ApplyType::Global,
                core_level_conflict: false,
            }
            .build(),
        );
        let writes = Arc::new(Mutex::new(Vec::new()));
        let writes2 = writes.clone();
        reg.set_callback(
            id,
            crate::registry::ApplyKind,
            Box::new(move |ctx| {
                writes2.lock().unwrap().push(ctx.values[0]);
                Ok(())
            }),
        )
        .unwrap();
        reg.init(false);
        let reg = Arc::new(reg);
        let apply_pool = Arc::new(WorkerPool::new("apply", 2, 4, 32));
        let timer_pool = Arc::new(WorkerPool::new_timer_pool("timer", 2, 4, 32));
        (
            RequestLifecycleManager::new(reg, apply_pool, timer_pool),
            writes,
        )
    }

    fn instance(id: ResourceId, value: i32) -> ResourceInstance {
        ResourceInstance {
            id,
            info: ResourceInfo { core: 0, cluster: 0 },
            optional_info: None,
            values: ResourceValue::OneValue(value),
        }
    }

    #[test]
    fn tune_allocates_monotone_handles_and_applies() {
        let id = ResourceId::new(0, 10, false);
        let (mgr, writes) = manager_with(id, 300, Permission::ThirdParty);

        let h1 = mgr
            .submit_tune(TuneRequest {
                duration_ms: -1,
                priority: Priority::High,
                background: true,
                client_pid: 1,
                client_tid: 1,
                permission_tag: Permission::ThirdParty,
                resources: vec![instance(id, 500)],
            })
            .unwrap();
        let h2 = mgr
            .submit_tune(TuneRequest {
                duration_ms: -1,
                priority: Priority::High,
                background: true,
                client_pid: 1,
                client_tid: 1,
                permission_tag: Permission::ThirdParty,
                resources: vec![instance(id, 800)],
            })
            .unwrap();
        assert!(h2 > h1);

        mgr.apply_pool.join();
        assert_eq!(*writes.lock().unwrap(), vec![500, 800]);
    }

    #[test]
    fn out_of_range_resource_is_dropped_not_fatal() {
        let id_ok = ResourceId::new(0, 11, false);
        let (mgr, _writes) = manager_with(id_ok, 300, Permission::ThirdParty);
        let id_bad = ResourceId::new(0, 12, false);

        let handle = mgr
            .submit_tune(TuneRequest {
                duration_ms: -1,
                priority: Priority::Low,
                background: true,
                client_pid: 1,
                client_tid: 1,
                permission_tag: Permission::ThirdParty,
                resources: vec![instance(id_ok, 500), instance(id_bad, 1)],
            })
            .unwrap();
        let request = mgr.handles().get(handle).unwrap();
        assert_eq!(request.resources.len(), 1);
        assert_eq!(request.resources[0].id, id_ok);
    }

    #[test]
    fn no_viable_resources_returns_error_without_handle() {
        let id = ResourceId::new(0, 13, false);
        let (mgr, _writes) = manager_with(id, 300, Permission::ThirdParty);

        let result = mgr.submit_tune(TuneRequest {
            duration_ms: -1,
            priority: Priority::Low,
            background: true,
            client_pid: 1,
            client_tid: 1,
            permission_tag: Permission::ThirdParty,
            resources: vec![instance(id, 9999)],
        });
        assert_eq!(result, Err(TuneError::NoViableResources));
        assert!(mgr.handles().is_empty());
    }

    #[test]
    fn third_party_caller_denied_for_system_resource() {
        let id = ResourceId::new(0, 14, false);
        let (mgr, _writes) = manager_with(id, 300, Permission::System);

        let result = mgr.submit_tune(TuneRequest {
            duration_ms: -1,
            priority: Priority::Low,
            background: true,
            client_pid: 1,
            client_tid: 1,
            permission_tag: Permission::ThirdParty,
            resources: vec![instance(id, 500)],
        });
        assert_eq!(result, Err(TuneError::PermissionDenied));
        assert!(mgr.handles().is_empty());
    }

    #[test]
    fn untune_is_idempotent_for_unknown_handle() {
        let id = ResourceId::new(0, 15, false);
        let (mgr, _writes) = manager_with(id, 300, Permission::ThirdParty);
        assert_eq!(mgr.submit_untune(999), Ok(()));
    }

    #[test]
    fn untune_tears_applied_request_back_to_default() {
        let id = ResourceId::new(0, 16, false);
        let (mgr, writes) = manager_with(id, 300, Permission::ThirdParty);
        let handle = mgr
            .submit_tune(TuneRequest {
                duration_ms: -1,
                priority: Priority::High,
                background: true,
                client_pid: 1,
                client_tid: 1,
                permission_tag: Permission::ThirdParty,
                resources: vec![instance(id, 700)],
            })
            .unwrap();
        mgr.apply_pool.join();

        mgr.submit_untune(handle).unwrap();
        mgr.apply_pool.join();

        assert_eq!(*writes.lock().unwrap(), vec![700, 300]);
        assert!(mgr.handles().get(handle).is_none());
    }

    #[test]
    fn untune_of_still_queued_request_marks_rejected_and_apply_is_a_no_op() {
        let id = ResourceId::new(0, 17, false);
        let (mgr, writes) = manager_with(id, 300, Permission::ThirdParty);
        let handle = mgr
            .submit_tune(TuneRequest {
                duration_ms: -1,
                priority: Priority::High,
                background: true,
                client_pid: 1,
                client_tid: 1,
                permission_tag: Permission::ThirdParty,
                resources: vec![instance(id, 700)],
            })
            .unwrap();
        // Race the untune against the apply worker by issuing it immediately;
        // either the handle is already gone (apply ran first and untune
        // proceeded normally) or it was still Queued and got Rejected.
        mgr.submit_untune(handle).unwrap();
        mgr.apply_pool.join();
        assert!(mgr.handles().get(handle).is_none());
        // No matter which interleaving won, the net sysfs trace never shows
        // the resource left at 700.
        assert_ne!(writes.lock().unwrap().last(), Some(&700));
    }

    #[test]
    fn retune_shortening_is_rejected() {
        let id = ResourceId::new(0, 18, false);
        let (mgr, _writes) = manager_with(id, 300, Permission::ThirdParty);
        let handle = mgr
            .submit_tune(TuneRequest {
                duration_ms: 10_000,
                priority: Priority::High,
                background: true,
                client_pid: 1,
                client_tid: 1,
                permission_tag: Permission::ThirdParty,
                resources: vec![instance(id, 700)],
            })
            .unwrap();
        assert_eq!(
            mgr.submit_retune(handle, 10),
            Err(RetuneError::RetuneNotExtending)
        );
    }

    #[test]
    fn retune_unknown_handle_is_not_found() {
        let id = ResourceId::new(0, 19, false);
        let (mgr, _writes) = manager_with(id, 300, Permission::ThirdParty);
        assert_eq!(mgr.submit_retune(123, 500), Err(RetuneError::HandleNotFound));
    }

    #[test]
    fn many_values_resource_applies_every_value_atomically() {
        let id = ResourceId::new(0, 21, false);
        let reg = ResourceRegistry::new();
        reg.register(
            DescriptorBuilder {
                id,
                name: "r".into(),
                sysfs_node: None,
                supported: true,
                default_value: 0,
                high_threshold: 1024,
                low_threshold: 0,
                permission: Permission::ThirdParty,
                modes: ModeSet::default(),
                policy: Policy::HigherBetter,
                apply_type: ApplyType::Global,
                core_level_conflict: false,
            }
            .build(),
        );
        let writes: Arc<Mutex<Vec<Vec<i32>>>> = Arc::new(Mutex::new(Vec::new()));
        let writes2 = writes.clone();
        reg.set_callback(
            id,
            crate::registry::ApplyKind,
            Box::new(move |ctx| {
                writes2.lock().unwrap().push(ctx.values.clone());
                Ok(())
            }),
        )
        .unwrap();
        reg.init(false);
        let reg = Arc::new(reg);
        let apply_pool = Arc::new(WorkerPool::new("apply", 2, 4, 32));
        let timer_pool = Arc::new(WorkerPool::new_timer_pool("timer", 2, 4, 32));
        let mgr = RequestLifecycleManager::new(reg, apply_pool, timer_pool);

        mgr.submit_tune(TuneRequest {
            duration_ms: -1,
            priority: Priority::High,
            background: true,
            client_pid: 1,
            client_tid: 1,
            permission_tag: Permission::ThirdParty,
            resources: vec![ResourceInstance {
                id,
                info: ResourceInfo { core: 0, cluster: 0 },
                optional_info: None,
                values: ResourceValue::ManyValues(vec![10, 20, 30].into_boxed_slice()),
            }],
        })
        .unwrap();
        mgr.apply_pool.join();

        assert_eq!(*writes.lock().unwrap(), vec![vec![10, 20, 30]]);
    }

    #[test]
    fn retune_extending_rearms_the_window() {
        let id = ResourceId::new(0, 20, false);
        let (mgr, _writes) = manager_with(id, 300, Permission::ThirdParty);
        let handle = mgr
            .submit_tune(TuneRequest {
                duration_ms: 1_000,
                priority: Priority::High,
                background: true,
                client_pid: 1,
                client_tid: 1,
                permission_tag: Permission::ThirdParty,
                resources: vec![instance(id, 700)],
            })
            .unwrap();
        mgr.submit_retune(handle, 5_000).unwrap();
        let request = mgr.handles().get(handle).unwrap();
        assert_eq!(request.duration_ms(), 5_000);
    }
}
