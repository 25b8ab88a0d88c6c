//! Per-diagram synchronization sessions.
//!
//! A session owns every piece of mutable sync state for one diagram: the
//! local model, per-entity states and baselines, the debounce scheduler,
//! the offline queue and the reconnect locks. Nothing here is process-wide;
//! two open diagrams never share bookkeeping.

mod orchestrator;
mod session;
mod state;

pub(crate) use orchestrator::SyncOrchestrator;
pub use session::Session;
pub use state::{EntityKey, EntityKind, EntityState, SessionId};
