//! Core domain logic for code harvest.
//!
//! This crate contains the fundamental types and logic for:
//! - Session lifecycle: turning editor events into coding sessions
//! - Aggregation: reducing sessions into day/week/month/year summaries
//! - Metadata: resolving which repository a file belongs to

pub mod aggregate;
pub mod clock;
pub mod engine;
pub mod event;
pub mod metadata;
pub mod session;
pub mod store;
pub mod types;

pub use aggregate::{AggregatedSession, Period, aggregate_day, aggregate_higher, summarize};
pub use clock::{Clock, ManualClock, SystemClock};
pub use engine::{
    Ack, DEFAULT_HEARTBEAT_TTL_MS, EngineConfig, EngineError, EngineSnapshot, LifecycleEngine,
    SessionSnapshot, ShutdownPolicy,
};
pub use event::Event;
pub use metadata::{FileMetadata, GitMetadataResolver, MetadataError, MetadataResolver};
pub use session::{File, Session};
pub use store::{SessionStore, StoreError};
pub use types::{ClientId, ValidationError};
