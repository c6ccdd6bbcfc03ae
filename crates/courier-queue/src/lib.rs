//! Job claiming for Courier.
//!
//! Hands pending jobs to consumers oldest-first, one claimant per job.
//! Claims are serialised per subscription through a lock table; the store
//! underneath makes each claim atomic, so PostgreSQL deployments stay
//! correct across instances via `SKIP LOCKED`.

pub mod engine;
pub mod locks;
pub mod memory;
pub mod reaper;

pub use engine::{ClaimEngine, EngineConfig};
pub use locks::LockTable;
pub use memory::MemoryJobStore;
pub use reaper::Reaper;
