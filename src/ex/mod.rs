//! Executive support routines (ex)
//!
//! Synchronization and allocation primitives the object manager builds on:
//!
//! - **Push lock**: compact reader/writer lock for directory protection
//! - **Resource**: waitable exclusive lock with recursion, used for the
//!   type-wide serialization mutex
//! - **Lookaside lists**: two-tier per-processor free lists with a
//!   general-pool fallback for fixed-size transient allocations

pub mod lookaside;
pub mod pushlock;
pub mod resource;

pub use lookaside::{
    AllocationSource, AllocatorExhausted, HeapPool, LookasideBlock, LookasideClass,
    LookasideList, LookasideStatsSnapshot, PoolAllocator, PpLookasideBank,
};
pub use pushlock::PushLock;
pub use resource::EResource;
