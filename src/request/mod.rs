//! Request data model (§3 `Request`, `Resource (instance)`) and the lifecycle
//! manager that drives it (§4.2).

pub mod handle_table;
pub mod lifecycle;

pub use handle_table::HandleTable;
pub use lifecycle::{RequestLifecycleManager, RetuneError, TuneError, UntuneError};

use crate::registry::{Permission, Priority};
use crate::resource_id::{ResourceId, ResourceInfo};
use crate::timer::Timer;
use std::fmt;
use std::sync::RwLock;

/// Handle reserved to mean "invalid" (§4.2).
pub const INVALID_HANDLE: u64 = u64::MAX;

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum RequestKind {
    Tune,
    Untune,
    Retune,
    SignalTune,
    SignalUntune,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum RequestState {
    Queued,
    Applied,
    Expired,
    Untuned,
    Rejected,
}

/// Tagged variant replacing the source's typed-union `Resource.value`
/// (§9 design note): a single int, or a boxed slice applied atomically.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ResourceValue {
    OneValue(i32),
    ManyValues(Box<[i32]>),
}

impl ResourceValue {
    #[must_use]
    pub fn values(&self) -> &[i32] {
        match self {
            Self::OneValue(v) => std::slice::from_ref(v),
            Self::ManyValues(v) => v,
        }
    }
}

/// One resource targeted by a request (§3 `Resource (instance)`).
#[derive(Clone, Debug)]
pub struct ResourceInstance {
    pub id: ResourceId,
    pub info: ResourceInfo,
    pub optional_info: Option<i32>,
    pub values: ResourceValue,
}

impl ResourceInstance {
    /// The value arbitration ranks holders on (§4.3 #1/#2 policy
    /// comparisons) and range-checks against the descriptor's thresholds —
    /// for `ManyValues` this is the first element. It is not the only value
    /// applied: `Arbiter::apply` builds a `Holder` from every element of
    /// `self.values.values()`, so a multi-valued resource's winner is written
    /// whole (§3 "a multi-valued resource applies each value atomically").
    #[must_use]
    pub fn primary_value(&self) -> i32 {
        self.values.values()[0]
    }
}

/// `duration_ms`/`start_time_ms` move together on retune (§4.2
/// `submit_retune`), so they're guarded by one lock rather than two.
struct TimerWindow {
    start_time_ms: i64,
    duration_ms: i64,
}

pub struct Request {
    pub handle: u64,
    pub kind: RequestKind,
    pub priority: Priority,
    pub background: bool,
    pub client_pid: i32,
    pub client_tid: i32,
    pub permission_tag: Permission,
    pub resources: Vec<ResourceInstance>,
    pub state: RwLock<RequestState>,
    /// Owns this request's wakeup row in the timer worker pool (§3 `Timer`).
    pub timer: Timer,
    window: RwLock<TimerWindow>,
}

impl Request {
    #[must_use]
    pub fn new(
        handle: u64,
        kind: RequestKind,
        duration_ms: i64,
        start_time_ms: i64,
        priority: Priority,
        background: bool,
        client_pid: i32,
        client_tid: i32,
        permission_tag: Permission,
        resources: Vec<ResourceInstance>,
    ) -> Self {
        Self {
            handle,
            kind,
            priority,
            background,
            client_pid,
            client_tid,
            permission_tag,
            resources,
            state: RwLock::new(RequestState::Queued),
            timer: Timer::new(),
            window: RwLock::new(TimerWindow {
                start_time_ms,
                duration_ms,
            }),
        }
    }

    #[must_use]
    pub fn state(&self) -> RequestState {
        *self.state.read().unwrap()
    }

    pub fn set_state(&self, state: RequestState) {
        *self.state.write().unwrap() = state;
    }

    #[must_use]
    pub fn duration_ms(&self) -> i64 {
        self.window.read().unwrap().duration_ms
    }

    #[must_use]
    pub fn start_time_ms(&self) -> i64 {
        self.window.read().unwrap().start_time_ms
    }

    #[must_use]
    pub fn has_expiry(&self) -> bool {
        self.duration_ms() != -1
    }

    /// Milliseconds left until expiry, or `i64::MAX` for a request with no
    /// expiry (§4.2 `submit_retune`'s `remaining(h)`).
    #[must_use]
    pub fn remaining_ms(&self, now_ms: i64) -> i64 {
        let window = self.window.read().unwrap();
        if window.duration_ms == -1 {
            return i64::MAX;
        }
        (window.start_time_ms + window.duration_ms - now_ms).max(0)
    }

    /// Rearms the window to `now_ms + new_duration_ms` (or to "no expiry" if
    /// `new_duration_ms == -1`). Caller (the lifecycle manager) is
    /// responsible for having already validated that this extends.
    pub(crate) fn rearm_window(&self, now_ms: i64, new_duration_ms: i64) {
        let mut window = self.window.write().unwrap();
        window.start_time_ms = now_ms;
        window.duration_ms = new_duration_ms;
    }
}

impl fmt::Display for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Request{{handle={}, kind={:?}, duration_ms={}, priority={:?}, pid={}, tid={}, background={}, resources={}}}",
            self.handle,
            self.kind,
            self.duration_ms(),
            self.priority,
            self.client_pid,
            self.client_tid,
            self.background,
            self.resources.len(),
        )
    }
}
