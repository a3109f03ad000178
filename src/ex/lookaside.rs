//! Lookaside List Implementation
//!
//! Lookaside lists are high-performance fixed-size allocators for the
//! transient records the object manager churns through during lookup and
//! creation (captured create information, name buffers).
//!
//! # NT Semantics
//!
//! - Two tiers per allocation class: a per-processor (P) list that is
//!   uncontended in the common case, and a shared (L) list behind it
//! - Allocation tries P, then L, then the general pool; each tier counts
//!   its misses for the balancer
//! - Free returns a block to P only while P is below its depth, then to L
//!   under the same check, then to the general pool, bounding both tiers
//! - Blocks are opaque fixed-size buffers; the lists never inspect their
//!   contents
//!
//! # Usage
//! ```
//! use objmgr::ex::{LookasideClass, PpLookasideBank};
//!
//! let bank = PpLookasideBank::new(4);
//! let block = bank.allocate(0, LookasideClass::NameBuffer).unwrap();
//! bank.free(0, block);
//! ```

use core::fmt;
use core::sync::atomic::{AtomicU32, Ordering};

/// Default depth of a per-processor list.
const PP_LIST_DEPTH: u32 = 16;

/// Default depth of a shared list.
const SHARED_LIST_DEPTH: u32 = 128;

/// The general pool could not satisfy an allocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AllocatorExhausted;

impl fmt::Display for AllocatorExhausted {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "general pool allocation failed")
    }
}

/// General-purpose pool backing the lookaside tiers.
///
/// Only reached on pool-miss paths; its failure propagates to the caller
/// of `allocate` untouched.
pub trait PoolAllocator: Send + Sync {
    /// Allocate a tagged buffer of the given size.
    fn allocate(&self, size: usize, tag: u32) -> Result<Box<[u8]>, AllocatorExhausted>;

    /// Return a buffer to the pool.
    fn free(&self, block: Box<[u8]>, tag: u32);
}

/// Default heap-backed pool.
pub struct HeapPool;

impl PoolAllocator for HeapPool {
    fn allocate(&self, size: usize, _tag: u32) -> Result<Box<[u8]>, AllocatorExhausted> {
        Ok(vec![0u8; size].into_boxed_slice())
    }

    fn free(&self, block: Box<[u8]>, _tag: u32) {
        drop(block);
    }
}

/// Interlocked singly-linked free list with a lock-free depth counter.
///
/// Depth queries never take the lock, matching the depth checks the free
/// path performs against a possibly stale value.
struct SList {
    entries: spin::Mutex<Vec<Box<[u8]>>>,
    depth: AtomicU32,
}

impl SList {
    const fn new() -> Self {
        Self {
            entries: spin::Mutex::new(Vec::new()),
            depth: AtomicU32::new(0),
        }
    }

    fn push(&self, block: Box<[u8]>) {
        self.entries.lock().push(block);
        self.depth.fetch_add(1, Ordering::Release);
    }

    fn pop(&self) -> Option<Box<[u8]>> {
        let block = self.entries.lock().pop();
        if block.is_some() {
            self.depth.fetch_sub(1, Ordering::Release);
        }
        block
    }

    fn depth(&self) -> u32 {
        self.depth.load(Ordering::Acquire)
    }
}

/// Allocation classes served by the per-processor bank.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LookasideClass {
    /// Captured object-creation records
    CreateInfo,
    /// Object name buffers
    NameBuffer,
}

impl LookasideClass {
    pub(crate) const COUNT: usize = 2;

    #[inline]
    fn index(self) -> usize {
        match self {
            LookasideClass::CreateInfo => 0,
            LookasideClass::NameBuffer => 1,
        }
    }

    /// Fixed block size for this class.
    pub fn block_size(self) -> usize {
        match self {
            LookasideClass::CreateInfo => 192,
            LookasideClass::NameBuffer => 248,
        }
    }

    fn tag(self) -> u32 {
        let tag: &[u8; 4] = match self {
            LookasideClass::CreateInfo => b"ObCi",
            LookasideClass::NameBuffer => b"ObNb",
        };
        u32::from_le_bytes(*tag)
    }
}

/// Which tier satisfied an allocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AllocationSource {
    /// Per-processor list hit
    PerProcessor,
    /// Shared list hit
    Shared,
    /// Fell through to the general pool
    Pool,
}

/// A fixed-size buffer drawn from the bank.
///
/// Contents are unspecified on allocation; the class tag routes the block
/// back to the right lists on free.
pub struct LookasideBlock {
    class: LookasideClass,
    source: AllocationSource,
    data: Box<[u8]>,
}

impl LookasideBlock {
    /// The allocation class this block belongs to.
    #[inline]
    pub fn class(&self) -> LookasideClass {
        self.class
    }

    /// The tier that satisfied this allocation.
    #[inline]
    pub fn source(&self) -> AllocationSource {
        self.source
    }

    /// Buffer contents.
    #[inline]
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Mutable buffer contents.
    #[inline]
    pub fn data_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }
}

/// Hit/miss counters for one list.
#[derive(Debug, Default)]
struct LookasideStats {
    total_allocates: AtomicU32,
    allocate_misses: AtomicU32,
    total_frees: AtomicU32,
    free_misses: AtomicU32,
}

/// Point-in-time copy of a list's counters.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct LookasideStatsSnapshot {
    /// Allocation attempts against this list
    pub total_allocates: u32,
    /// Allocation attempts that found the list empty
    pub allocate_misses: u32,
    /// Free attempts against this list
    pub total_frees: u32,
    /// Free attempts that found the list at depth
    pub free_misses: u32,
}

/// One fixed-size free list with bounded depth.
pub struct LookasideList {
    list: SList,
    depth: AtomicU32,
    block_size: usize,
    tag: u32,
    stats: LookasideStats,
}

impl LookasideList {
    /// Create a list for `block_size` buffers, capped at `depth` entries.
    pub fn new(block_size: usize, tag: u32, depth: u32) -> Self {
        Self {
            list: SList::new(),
            depth: AtomicU32::new(depth),
            block_size,
            tag,
            stats: LookasideStats::default(),
        }
    }

    /// Pop a cached block, counting the attempt and any miss.
    fn try_allocate(&self) -> Option<Box<[u8]>> {
        self.stats.total_allocates.fetch_add(1, Ordering::Relaxed);
        let block = self.list.pop();
        if block.is_none() {
            self.stats.allocate_misses.fetch_add(1, Ordering::Relaxed);
        }
        block
    }

    /// Push a block if the list is below depth; hands it back on a miss.
    fn try_free(&self, block: Box<[u8]>) -> Option<Box<[u8]>> {
        self.stats.total_frees.fetch_add(1, Ordering::Relaxed);
        if self.list.depth() < self.depth.load(Ordering::Relaxed) {
            self.list.push(block);
            None
        } else {
            self.stats.free_misses.fetch_add(1, Ordering::Relaxed);
            Some(block)
        }
    }

    /// Current number of cached blocks.
    pub fn cached(&self) -> u32 {
        self.list.depth()
    }

    /// Fixed block size served by this list.
    pub fn block_size(&self) -> usize {
        self.block_size
    }

    /// Pool tag for this list's blocks.
    pub fn tag(&self) -> u32 {
        self.tag
    }

    /// Adjust the maximum cached depth.
    pub fn set_depth(&self, depth: u32) {
        self.depth.store(depth, Ordering::Relaxed);
    }

    /// Snapshot the hit/miss counters.
    pub fn stats(&self) -> LookasideStatsSnapshot {
        LookasideStatsSnapshot {
            total_allocates: self.stats.total_allocates.load(Ordering::Relaxed),
            allocate_misses: self.stats.allocate_misses.load(Ordering::Relaxed),
            total_frees: self.stats.total_frees.load(Ordering::Relaxed),
            free_misses: self.stats.free_misses.load(Ordering::Relaxed),
        }
    }

    fn drain_to(&self, pool: &dyn PoolAllocator) {
        while let Some(block) = self.list.pop() {
            pool.free(block, self.tag);
        }
    }
}

/// Two-tier per-processor lookaside bank.
///
/// An explicit, injectable bank: one P list per logical processor per
/// class, one shared L list per class, and a general pool behind both.
/// Callers address their own processor slot; nothing here is ambient
/// state, so a bank of any shape can be built for a test.
pub struct PpLookasideBank {
    per_processor: Vec<[LookasideList; LookasideClass::COUNT]>,
    shared: [LookasideList; LookasideClass::COUNT],
    pool: Box<dyn PoolAllocator>,
}

impl PpLookasideBank {
    /// Create a bank for `processors` logical processors over the default
    /// heap pool.
    pub fn new(processors: usize) -> Self {
        Self::with_pool(processors, Box::new(HeapPool))
    }

    /// Create a bank over a caller-supplied general pool.
    pub fn with_pool(processors: usize, pool: Box<dyn PoolAllocator>) -> Self {
        assert!(processors > 0, "lookaside bank needs at least one processor");
        let per_processor = (0..processors)
            .map(|_| Self::class_lists(PP_LIST_DEPTH))
            .collect();
        Self {
            per_processor,
            shared: Self::class_lists(SHARED_LIST_DEPTH),
            pool,
        }
    }

    fn class_lists(depth: u32) -> [LookasideList; LookasideClass::COUNT] {
        [
            Self::class_list(LookasideClass::CreateInfo, depth),
            Self::class_list(LookasideClass::NameBuffer, depth),
        ]
    }

    fn class_list(class: LookasideClass, depth: u32) -> LookasideList {
        LookasideList::new(class.block_size(), class.tag(), depth)
    }

    /// Number of per-processor slots in the bank.
    pub fn processors(&self) -> usize {
        self.per_processor.len()
    }

    /// Map a caller-supplied processor id onto a valid slot.
    ///
    /// An out-of-range id is logged and wrapped rather than faulting; a
    /// mis-wired caller loses the per-processor affinity but still gets a
    /// correct allocation.
    fn processor_slot(&self, processor: usize) -> usize {
        if processor < self.per_processor.len() {
            return processor;
        }
        log::error!(
            "ex: lookaside processor id {} out of range for {} slots, wrapping",
            processor,
            self.per_processor.len()
        );
        processor % self.per_processor.len()
    }

    /// Allocate a block of the given class on behalf of `processor`.
    ///
    /// Tries the processor's P list, then the shared L list, then the
    /// general pool. Pool failure surfaces as [`AllocatorExhausted`].
    pub fn allocate(
        &self,
        processor: usize,
        class: LookasideClass,
    ) -> Result<LookasideBlock, AllocatorExhausted> {
        let p_list = &self.per_processor[self.processor_slot(processor)][class.index()];
        if let Some(data) = p_list.try_allocate() {
            return Ok(LookasideBlock {
                class,
                source: AllocationSource::PerProcessor,
                data,
            });
        }

        let l_list = &self.shared[class.index()];
        if let Some(data) = l_list.try_allocate() {
            return Ok(LookasideBlock {
                class,
                source: AllocationSource::Shared,
                data,
            });
        }

        log::debug!(
            "ex: lookaside miss on both tiers for {:?}, falling through to pool",
            class
        );
        let data = self.pool.allocate(class.block_size(), class.tag())?;
        Ok(LookasideBlock {
            class,
            source: AllocationSource::Pool,
            data,
        })
    }

    /// Return a block to the bank on behalf of `processor`.
    ///
    /// The block lands on the P list while it is below depth, then the L
    /// list under the same check, and otherwise goes back to the pool.
    pub fn free(&self, processor: usize, block: LookasideBlock) {
        let class = block.class;
        let p_list = &self.per_processor[self.processor_slot(processor)][class.index()];
        let data = match p_list.try_free(block.data) {
            None => return,
            Some(data) => data,
        };

        let l_list = &self.shared[class.index()];
        if let Some(data) = l_list.try_free(data) {
            self.pool.free(data, class.tag());
        }
    }

    /// Snapshot a processor's P-list counters for a class.
    pub fn processor_stats(
        &self,
        processor: usize,
        class: LookasideClass,
    ) -> LookasideStatsSnapshot {
        self.per_processor[self.processor_slot(processor)][class.index()].stats()
    }

    /// Snapshot the shared L-list counters for a class.
    pub fn shared_stats(&self, class: LookasideClass) -> LookasideStatsSnapshot {
        self.shared[class.index()].stats()
    }

    /// Number of blocks currently cached across both tiers for a class.
    pub fn cached(&self, class: LookasideClass) -> u32 {
        let per_processor: u32 = self
            .per_processor
            .iter()
            .map(|lists| lists[class.index()].cached())
            .sum();
        per_processor + self.shared[class.index()].cached()
    }
}

impl Drop for PpLookasideBank {
    fn drop(&mut self) {
        for lists in &self.per_processor {
            for list in lists {
                list.drain_to(self.pool.as_ref());
            }
        }
        for list in &self.shared {
            list.drain_to(self.pool.as_ref());
        }
    }
}
