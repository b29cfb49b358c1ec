//! Mutable per-resource arbitration state (§3 `PerResourceState`).

use crate::registry::descriptor::Policy;

#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug, Default)]
pub enum Priority {
    #[default]
    Low,
    High,
}

/// Scoping key a resource's holders are partitioned by (§4.3 #3).
/// `Global` for anything that isn't core/cluster scoped.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum ScopeKey {
    Global,
    CoreCluster { core: u8, cluster: u8 },
}

/// One active contribution to a resource's arbitrated value (§3 `holders`).
/// `values` holds every element of the request's `ResourceValue` (one for
/// `OneValue`, all of them for `ManyValues`) so a multi-valued resource's
/// winner can be applied whole (§3 "a multi-valued resource applies each
/// value atomically").
#[derive(Clone, Debug)]
pub struct Holder {
    pub handle: u64,
    pub values: Vec<i32>,
    pub priority: Priority,
    pub permission: crate::registry::descriptor::Permission,
    pub start_time_ms: i64,
    pub scope: ScopeKey,
}

impl Holder {
    /// The value arbitration itself compares on: policies rank holders along
    /// one dimension, so a `ManyValues` holder is ranked by its first value
    /// while every value still travels together to apply time.
    fn primary(&self) -> i32 {
        self.values[0]
    }

    /// Tie-break order from §4.3 #1: higher priority first, then earlier
    /// `start_time_ms`, then smaller handle. Returns the ordering such that
    /// `tie_break_key` sorts the *best* tie-break candidate as the maximum,
    /// matching how `Policy::Instant`'s "most-recently-inserted" and the
    /// shared tie-break are both expressed as comparisons.
    fn tie_break_key(&self) -> (Priority, std::cmp::Reverse<i64>, std::cmp::Reverse<u64>) {
        (
            self.priority,
            std::cmp::Reverse(self.start_time_ms),
            std::cmp::Reverse(self.handle),
        )
    }
}

/// Holders for one `(resource, scope)` pair, plus the values actually written
/// (§3 `current_value`). A single-valued resource's `current_value` is
/// always a one-element vector.
#[derive(Default)]
pub struct PerResourceState {
    holders: Vec<Holder>,
    /// Insertion order for `Policy::Instant`'s last-writer-wins semantics;
    /// holds handles in the order they were added, most recent last.
    insertion_order: Vec<u64>,
    pub current_value: Option<Vec<i32>>,
}

impl PerResourceState {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.holders.is_empty()
    }

    #[must_use]
    pub fn holders(&self) -> &[Holder] {
        &self.holders
    }

    pub fn insert(&mut self, holder: Holder) {
        self.insertion_order.push(holder.handle);
        self.holders.push(holder);
    }

    /// Remove the holder for `handle`, if present. Returns it so the caller
    /// can use its value (e.g. `Instant` tear restoring the prior writer).
    pub fn remove(&mut self, handle: u64) -> Option<Holder> {
        let idx = self.holders.iter().position(|h| h.handle == handle)?;
        let removed = self.holders.remove(idx);
        self.insertion_order.retain(|h| *h != handle);
        Some(removed)
    }

    pub fn contains(&self, handle: u64) -> bool {
        self.holders.iter().any(|h| h.handle == handle)
    }

    /// Winner selection per §4.3 #1/#2, ranked by `Holder::primary` and
    /// clamped element-wise via `clamp`. Returns every value of the winning
    /// holder, not just the one arbitration ranked on, so a `ManyValues`
    /// winner applies whole.
    #[must_use]
    pub fn winner(&self, policy: Policy, clamp: impl Fn(i32) -> i32) -> Option<Vec<i32>> {
        if self.holders.is_empty() {
            return None;
        }
        let winner = match policy {
            Policy::HigherBetter => self.holders.iter().max_by(|a, b| {
                a.primary()
                    .cmp(&b.primary())
                    .then_with(|| a.tie_break_key().cmp(&b.tie_break_key()))
            })?,
            Policy::LowerBetter => self.holders.iter().min_by(|a, b| {
                a.primary()
                    .cmp(&b.primary())
                    .then_with(|| b.tie_break_key().cmp(&a.tie_break_key()))
            })?,
            Policy::Instant => {
                let last_handle = *self.insertion_order.last()?;
                self.holders.iter().find(|h| h.handle == last_handle)?
            }
        };
        Some(winner.values.iter().map(|v| clamp(*v)).collect())
    }

    /// `Instant`'s tear-time "restore the previous most-recent holder"
    /// (§4.3 #1). Only meaningful right after a `remove` leaves other
    /// holders behind.
    #[must_use]
    pub fn most_recent(&self) -> Option<&Holder> {
        let last_handle = *self.insertion_order.last()?;
        self.holders.iter().find(|h| h.handle == last_handle)
    }
}
