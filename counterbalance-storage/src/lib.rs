//! Counterbalance Storage - Store Traits and In-Memory Implementation
//!
//! Defines the storage abstraction the allocation, completion and reaper
//! services run against. The Postgres implementation lives in
//! counterbalance-api next to its connection pool.

pub mod gate;
pub mod memory;
pub mod store;

pub use gate::{LockGate, LockGuard};
pub use memory::InMemoryAssignmentStore;
pub use store::{AllocationTx, AssignmentStore, StoreSession};
