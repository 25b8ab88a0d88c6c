//! # Toposync
//!
//! Toposync is an embeddable synchronization core for interactive topology
//! editors. It sits between a diagram UI and a remote persistence API,
//! absorbing unreliable connectivity without ever blocking the user.
//!
//! ## Core Features
//!
//! - **Optimistic Mutations**: local graph state is updated immediately;
//!   failed persistence rolls back exactly the affected entity
//! - **Keyed Debouncing**: rapid repeats of the same gesture coalesce into a
//!   single persistence attempt per quiescence window
//! - **Offline Replay**: writes that fail on connectivity are queued as pure
//!   data and replayed in order once the link returns
//! - **Deterministic Port Allocation**: edge endpoints receive bounded, named
//!   connection ports chosen from geometry and occupancy
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use toposync::{DiagramModel, EngineBuilder, Position};
//!
//! let engine = EngineBuilder::new().build()?;
//! engine.launch();
//!
//! let diagram = DiagramModel::from_json(json_str)?;
//! let session = engine.open_session(diagram)?;
//! session.move_node("n1", Position { x: 120.0, y: 80.0 })?;
//! ```

mod allocator;
mod builder;
mod common;
mod config;
mod engine;
mod error;
mod events;
mod model;
mod optimistic;
mod queue;
mod remote;
mod retry;
mod scheduler;
mod session;
mod utils;

use std::sync::{Arc, RwLock};

pub use allocator::HandleAllocator;
pub use builder::EngineBuilder;
pub use config::{Config, DebounceConfig, PortCapacity, QueueConfig, RemoteConfig, RetryConfig};
pub use engine::SyncEngine;
pub use error::ToposyncError;
pub use events::{Event, Notification, SessionEvents, SessionMessage, SubscribeOptions};
pub use model::*;
pub use optimistic::{Identified, OptimisticStore, Snapshot};
pub use queue::{FileQueueStore, HandlerRegistry, MemQueueStore, OfflineQueue, OperationHandler, OperationKind, PendingOperation, QueueStore};
pub use remote::{EdgeEndpoints, HttpRemoteApi, LabelPositionsPatch, RemoteApi, RemoteError, RemoteResult, TooltipPatch};
pub use retry::{RetryPolicy, with_retry};
pub use scheduler::MutationScheduler;
pub use session::{EntityKey, EntityKind, EntityState, Session, SessionId};

/// Result type alias for Toposync operations.
pub type Result<T> = std::result::Result<T, ToposyncError>;

/// Thread-safe shared lock wrapper using Arc<RwLock<T>>.
pub(crate) type ShareLock<T> = Arc<RwLock<T>>;
