//! A slab allocator yielding fixed-size, naturally block-size-aligned
//! memory blocks. Every other heap-touching subsystem in this crate (pages,
//! queue pages, bucket tables) allocates exclusively through a `BlockPool`;
//! nothing else in the crate calls the global allocator directly.

use std::{
    alloc::{alloc, dealloc, Layout},
    ptr::NonNull,
    sync::Mutex,
};

use crate::error::{Error, Result};

pub const DEFAULT_BLOCK_SIZE: usize = 16 * 1024;
pub const DEFAULT_CHUNK_BLOCKS: usize = 16;

struct PoolState {
    free: Vec<NonNull<u8>>,
    regions: Vec<(NonNull<u8>, Layout)>,
}

/// A block size-aligned slab pool. `acquire`/`release` lock an internal
/// mutex around the free list and the region registry, so a single pool may
/// be shared across threads without external synchronization.
pub struct BlockPool {
    block_size: usize,
    chunk_blocks: usize,
    expand: bool,
    state: Mutex<PoolState>,
}

// SAFETY: every field behind `state` is only ever touched under the mutex;
// `block_size`/`chunk_blocks`/`expand` are immutable after construction.
unsafe impl Send for BlockPool {}
unsafe impl Sync for BlockPool {}

impl BlockPool {
    /// `block_size` must be a power of two; blocks are aligned to it so that
    /// `ptr & !(block_size - 1)` recovers the owning block's base from any
    /// interior pointer.
    pub fn new(block_size: usize, expand: bool) -> Self {
        assert!(
            block_size.is_power_of_two(),
            "block size must be a power of two, got {block_size}"
        );
        Self {
            block_size,
            chunk_blocks: DEFAULT_CHUNK_BLOCKS,
            expand,
            state: Mutex::new(PoolState {
                free: Vec::new(),
                regions: Vec::new(),
            }),
        }
    }

    pub fn with_chunk_blocks(mut self, chunk_blocks: usize) -> Self {
        assert!(chunk_blocks > 0, "chunk_blocks must be nonzero");
        self.chunk_blocks = chunk_blocks;
        self
    }

    /// A pool pre-seeded with exactly `blocks` blocks and expansion disabled:
    /// capacity is fixed at construction, and `acquire` reports
    /// [`Error::OutOfMemory`] once they're all checked out and none have been
    /// `release`d back. Matches the "non-expanding pool with N blocks" setup
    /// used to exercise the allocator's OOM/retry contract end to end.
    pub fn with_fixed_capacity(block_size: usize, blocks: usize) -> Self {
        assert!(blocks > 0, "a fixed-capacity pool needs at least one block");
        let pool = Self::new(block_size, false);
        let mut state = pool.state.lock().unwrap();
        pool.carve_region(&mut state, blocks)
            .expect("initial seeding of a fixed-capacity pool should not fail");
        drop(state);
        pool
    }

    pub fn block_size(&self) -> usize {
        self.block_size
    }

    /// Returns a zeroed-address-identified block, expanding the pool first
    /// if the free list is empty and expansion is enabled. Returns
    /// [`Error::OutOfMemory`] if the free list is empty and either expansion
    /// is disabled or the global allocator itself failed.
    pub fn acquire(&self) -> Result<NonNull<u8>> {
        let mut state = self.state.lock().unwrap();

        if let Some(block) = state.free.pop() {
            return Ok(block);
        }

        if !self.expand {
            log::debug!("block pool exhausted with expansion disabled");
            return Err(Error::OutOfMemory);
        }

        self.carve_region(&mut state, self.chunk_blocks)?;
        Ok(state
            .free
            .pop()
            .expect("a freshly carved region always yields at least one block"))
    }

    /// Pushes `block` back onto the free list. The caller gives up any
    /// pointers derived from the block's contents; the pool makes no effort
    /// to zero it before handing it out again.
    pub fn release(&self, block: NonNull<u8>) {
        let mut state = self.state.lock().unwrap();
        state.free.push(block);
    }

    /// Carves `count` aligned blocks out of a `count + 1` block region and
    /// pushes all of them onto the free list: no matter where the global
    /// allocator places the region, at least one block_size-aligned boundary
    /// falls inside it, leaving `count` full blocks after that boundary.
    fn carve_region(&self, state: &mut PoolState, count: usize) -> Result<()> {
        let region_blocks = count + 1;
        let region_size = region_blocks
            .checked_mul(self.block_size)
            .ok_or(Error::OutOfMemory)?;
        let layout = Layout::from_size_align(region_size, 1).map_err(|_| Error::OutOfMemory)?;

        let base = unsafe { alloc(layout) };
        let Some(base) = NonNull::new(base) else {
            return Err(Error::OutOfMemory);
        };

        let base_addr = base.as_ptr() as usize;
        let mask = self.block_size - 1;
        let aligned_addr = (base_addr + mask) & !mask;

        log::trace!(
            "block pool expanded by {} blocks of {} bytes",
            count,
            self.block_size
        );

        state.regions.push((base, layout));

        for i in 0..count {
            let block_addr = aligned_addr + i * self.block_size;
            debug_assert!(block_addr + self.block_size <= base_addr + region_size);
            // SAFETY: block_addr is nonzero (derived from a successful allocation)
            // and lies within the region just registered above.
            let block = unsafe { NonNull::new_unchecked(block_addr as *mut u8) };
            state.free.push(block);
        }

        Ok(())
    }
}

impl Drop for BlockPool {
    fn drop(&mut self) {
        let state = self.state.get_mut().unwrap();
        for (base, layout) in state.regions.drain(..) {
            // SAFETY: `base`/`layout` are exactly the pair passed to `alloc`
            // in `expand_locked`; no other code frees region base pointers.
            unsafe { dealloc(base.as_ptr(), layout) };
        }
    }
}
