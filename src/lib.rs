//! Resource arbitration daemon core (§1 PURPOSE & SCOPE): turns a stream of
//! tune/untune/retune/signal requests over a fixed catalogue of resources
//! into a correct sequence of apply/tear side-effects, with timer-driven
//! expiry, per-resource conflict resolution, and single-writer semantics.
//!
//! The Unix-socket listener, YAML config *loading* machinery beyond the
//! schema itself, the extension plugin loader, and signal→resource
//! expansion are external collaborators (§1); this crate implements the
//! Resource Registry, Request Lifecycle Manager, Arbiter, Timer/Expiry
//! engine, and Worker Pool those collaborators sit around.

pub mod arbiter;
pub mod catalogue;
pub mod cli;
pub mod config;
pub mod daemon;
pub mod logging;
pub mod persisted_state;
pub mod registry;
pub mod request;
pub mod resource_id;
pub mod target;
pub mod timer;
pub mod wire;
pub mod worker_pool;
