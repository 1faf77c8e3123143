//! Open-addressed, fingerprint-accelerated hash bucket: key → `(page, slot)`.
//!
//! The bucket never stores a full key — only its 8-bit fingerprint — so
//! every lookup that survives the fingerprint compare must still confirm
//! the match by reading the real key back out of the page the slot points
//! at. Every bucket method therefore takes a `resolve` callback that does
//! that read; `World` supplies one backed by its page arena.
//!
//! Capacity is fixed at construction to the largest power of two that fits
//! the three parallel arrays (page id, slot index, fingerprint) within one
//! pool block's byte budget, matching the numeric-constants section's
//! bucket-capacity formula. The arrays themselves are ordinary `Vec`s
//! rather than bytes carved out of an acquired block: `PageId<C>` wraps a
//! generational arena handle, which (unlike a raw pointer) has no public
//! byte representation to place at a fixed block offset, so giving buckets
//! their own block would just waste it. See `DESIGN.md` for the tradeoff.

use derive_where::derive_where;

use crate::{component::ComponentSet, key::Key, location::PageId};

fn floor_pow2(n: usize) -> usize {
    if n == 0 {
        0
    } else {
        1usize << (usize::BITS - 1 - n.leading_zeros())
    }
}

/// `floor_pow2((BLOCK_SIZE - header) / (sizeof(ptr) + sizeof(slot-index) + 1))`,
/// with `header = 0` since this port keeps no in-block header for buckets.
pub fn bucket_capacity(block_size: usize) -> usize {
    floor_pow2(block_size / (4 + 4 + 1)).max(1)
}

#[derive_where(Clone; )]
struct Slot<C: ComponentSet> {
    page: PageId<C>,
    slot: usize,
    fingerprint: u8,
}

pub struct Bucket<C: ComponentSet> {
    capacity: usize,
    slots: Vec<Option<Slot<C>>>,
    len: usize,
    pub local_depth: u32,
}

impl<C: ComponentSet> Bucket<C> {
    pub fn new(block_size: usize, local_depth: u32) -> Self {
        let capacity = bucket_capacity(block_size);
        Self {
            capacity,
            slots: vec![None; capacity],
            len: 0,
            local_depth,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// `9 * len > 8 * capacity`, i.e. load exceeds ~88%.
    pub fn should_split(&self) -> bool {
        9 * self.len > 8 * self.capacity
    }

    /// `9 * len < capacity`, i.e. load is below ~11%.
    pub fn is_mergeable(&self) -> bool {
        9 * self.len < self.capacity
    }

    fn ideal_index(&self, key: Key) -> usize {
        (key.bucket_seed_bits() as usize) & (self.capacity - 1)
    }

    fn find_index(&self, key: Key, resolve: &impl Fn(PageId<C>, usize) -> Key) -> Option<usize> {
        let mask = self.capacity - 1;
        let mut idx = self.ideal_index(key);

        for _ in 0..self.capacity {
            match &self.slots[idx] {
                None => return None,
                Some(entry) => {
                    if entry.fingerprint == key.fingerprint()
                        && resolve(entry.page, entry.slot) == key
                    {
                        return Some(idx);
                    }
                }
            }
            idx = (idx + 1) & mask;
        }

        None
    }

    pub fn get(
        &self,
        key: Key,
        resolve: impl Fn(PageId<C>, usize) -> Key,
    ) -> Option<(PageId<C>, usize)> {
        let idx = self.find_index(key, &resolve)?;
        let entry = self.slots[idx].as_ref().unwrap();
        Some((entry.page, entry.slot))
    }

    /// Inserts unless `key` is already present. Asserts the bucket isn't
    /// full; callers (the directory's `ensure`) must split before this.
    pub fn insert(
        &mut self,
        key: Key,
        page: PageId<C>,
        slot: usize,
        resolve: impl Fn(PageId<C>, usize) -> Key,
    ) -> bool {
        debug_assert!(self.len < self.capacity, "bucket insert called while full");
        let mask = self.capacity - 1;
        let mut idx = self.ideal_index(key);

        for _ in 0..self.capacity {
            match &self.slots[idx] {
                None => {
                    self.slots[idx] = Some(Slot {
                        page,
                        slot,
                        fingerprint: key.fingerprint(),
                    });
                    self.len += 1;
                    return true;
                }
                Some(entry) => {
                    if entry.fingerprint == key.fingerprint() && resolve(entry.page, entry.slot) == key {
                        return false;
                    }
                }
            }
            idx = (idx + 1) & mask;
        }

        false
    }

    /// Replaces the location of an already-present key.
    pub fn update(
        &mut self,
        key: Key,
        page: PageId<C>,
        slot: usize,
        resolve: impl Fn(PageId<C>, usize) -> Key,
    ) -> bool {
        let Some(idx) = self.find_index(key, &resolve) else {
            return false;
        };
        self.slots[idx] = Some(Slot {
            page,
            slot,
            fingerprint: key.fingerprint(),
        });
        true
    }

    /// Standard robin-hood back-shift delete: the gap left by the removed
    /// entry is filled by walking forward and pulling back any entry that
    /// isn't already sitting at its own ideal index, until an empty slot or
    /// an entry at its ideal index is reached.
    pub fn remove(&mut self, key: Key, resolve: impl Fn(PageId<C>, usize) -> Key) -> bool {
        let Some(found) = self.find_index(key, &resolve) else {
            return false;
        };

        let mask = self.capacity - 1;
        let mut gap = found;

        loop {
            let next = (gap + 1) & mask;
            let Some(entry) = self.slots[next].clone() else {
                break;
            };

            let entry_key = resolve(entry.page, entry.slot);
            let ideal = self.ideal_index(entry_key);
            if ideal == next {
                // Already at its own ideal slot; no probe distance to close.
                break;
            }

            self.slots[gap] = Some(entry);
            self.slots[next] = None;
            gap = next;
        }

        self.slots[gap] = None;
        self.len -= 1;
        true
    }

    pub fn iter_entries(&self) -> impl Iterator<Item = (PageId<C>, usize, u8)> + '_ {
        self.slots.iter().filter_map(|slot| {
            slot.as_ref()
                .map(|entry| (entry.page, entry.slot, entry.fingerprint))
        })
    }
}
