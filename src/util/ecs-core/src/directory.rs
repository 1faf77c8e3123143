//! Extendible-hash directory: an array of bucket handles indexed by the
//! low `depth` bits of a key, doubling when a full-depth bucket must split
//! and halving when every sibling pair collapses into one bucket.

use ecs_util::slab::{Arena, Handle};

use crate::{bucket::Bucket, component::ComponentSet, key::Key, location::PageId};

pub struct Directory<C: ComponentSet> {
    block_size: usize,
    buckets: Arena<Bucket<C>>,
    dir: Vec<Handle<Bucket<C>>>,
}

impl<C: ComponentSet> Directory<C> {
    pub fn new(block_size: usize) -> Self {
        Self {
            block_size,
            buckets: Arena::new(),
            dir: Vec::new(),
        }
    }

    /// Directory length is always `2^depth`; depth is 0 both before the
    /// first bucket exists and immediately after it's created.
    pub fn depth(&self) -> u32 {
        if self.dir.is_empty() {
            0
        } else {
            self.dir.len().trailing_zeros()
        }
    }

    fn slot_for(&self, key: Key) -> usize {
        key.directory_slot(self.depth())
    }

    pub fn get(
        &self,
        key: Key,
        resolve: impl Fn(PageId<C>, usize) -> Key,
    ) -> Option<(PageId<C>, usize)> {
        if self.dir.is_empty() {
            return None;
        }
        let handle = self.dir[self.slot_for(key)];
        self.buckets[handle].get(key, resolve)
    }

    /// Creates the first bucket if none exists, then splits the bucket
    /// `key` would land in until it's under the split threshold.
    pub fn ensure(&mut self, key: Key, resolve: impl Fn(PageId<C>, usize) -> Key + Copy) {
        if self.dir.is_empty() {
            let handle = self.buckets.insert(Bucket::new(self.block_size, 0));
            self.dir.push(handle);
        }

        loop {
            let handle = self.dir[self.slot_for(key)];
            if !self.buckets[handle].should_split() {
                break;
            }
            self.split_bucket(handle, resolve);
        }
    }

    fn split_bucket(&mut self, handle: Handle<Bucket<C>>, resolve: impl Fn(PageId<C>, usize) -> Key + Copy) {
        let local_depth = self.buckets[handle].local_depth;
        let global_depth = self.depth();

        if local_depth == global_depth {
            self.dir.extend_from_within(..);
            log::debug!("directory doubled to depth {}", global_depth + 1);
        }

        let new_depth = local_depth + 1;
        let bit = 1usize << local_depth;

        let mut bucket_lo = Bucket::new(self.block_size, new_depth);
        let mut bucket_hi = Bucket::new(self.block_size, new_depth);

        for (page, slot, _fingerprint) in self.buckets[handle].iter_entries().collect::<Vec<_>>() {
            let key = resolve(page, slot);
            if key.directory_slot(new_depth) & bit != 0 {
                bucket_hi.insert(key, page, slot, resolve);
            } else {
                bucket_lo.insert(key, page, slot, resolve);
            }
        }

        self.buckets.remove(handle);
        let handle_lo = self.buckets.insert(bucket_lo);
        let handle_hi = self.buckets.insert(bucket_hi);

        // Repoint every directory slot that pointed at the old bucket,
        // based on whether its own index has the new split bit set.
        for (dir_index, dir_slot) in self.dir.iter_mut().enumerate() {
            if *dir_slot == handle {
                *dir_slot = if dir_index & bit != 0 { handle_hi } else { handle_lo };
            }
        }

        log::trace!("bucket split at local depth {local_depth} -> {new_depth}");
    }

    pub fn insert(
        &mut self,
        key: Key,
        page: PageId<C>,
        slot: usize,
        resolve: impl Fn(PageId<C>, usize) -> Key + Copy,
    ) -> bool {
        self.ensure(key, resolve);
        let handle = self.dir[self.slot_for(key)];
        self.buckets[handle].insert(key, page, slot, resolve)
    }

    pub fn update(
        &mut self,
        key: Key,
        page: PageId<C>,
        slot: usize,
        resolve: impl Fn(PageId<C>, usize) -> Key,
    ) -> bool {
        if self.dir.is_empty() {
            return false;
        }
        let handle = self.dir[self.slot_for(key)];
        self.buckets[handle].update(key, page, slot, resolve)
    }

    pub fn remove(&mut self, key: Key, resolve: impl Fn(PageId<C>, usize) -> Key) -> bool {
        if self.dir.is_empty() {
            return false;
        }
        let handle = self.dir[self.slot_for(key)];
        self.buckets[handle].remove(key, resolve)
    }

    /// Merges sibling bucket pairs that are both below the merge threshold,
    /// contracting the directory by half whenever every pair collapses;
    /// drops the sole remaining bucket once it's empty.
    pub fn compact(&mut self, resolve: impl Fn(PageId<C>, usize) -> Key + Copy) {
        while self.dir.len() > 1 {
            let half = self.dir.len() / 2;
            let mut all_collapsed = true;

            for i in 0..half {
                let a = self.dir[i];
                let b = self.dir[i + half];

                if a == b {
                    continue;
                }

                if self.buckets[a].is_mergeable() && self.buckets[b].is_mergeable() {
                    self.merge_pair(i, half, resolve);
                } else {
                    all_collapsed = false;
                }
            }

            if !all_collapsed {
                break;
            }

            self.dir.truncate(half);
            log::debug!("directory contracted to depth {}", self.depth());
        }

        if self.dir.len() == 1 {
            let handle = self.dir[0];
            if self.buckets[handle].is_empty() {
                self.buckets.remove(handle);
                self.dir.clear();
                log::trace!("dropped sole empty bucket");
            }
        }
    }

    fn merge_pair(&mut self, i: usize, half: usize, resolve: impl Fn(PageId<C>, usize) -> Key + Copy) {
        let a = self.dir[i];
        let b = self.dir[i + half];

        let new_depth = self.buckets[a].local_depth.saturating_sub(1);
        let mut merged = Bucket::new(self.block_size, new_depth);

        let entries: Vec<_> = self.buckets[a]
            .iter_entries()
            .chain(self.buckets[b].iter_entries())
            .collect();

        for (page, slot, _fingerprint) in entries {
            let key = resolve(page, slot);
            merged.insert(key, page, slot, resolve);
        }

        self.buckets.remove(a);
        self.buckets.remove(b);
        let handle = self.buckets.insert(merged);

        for dir_slot in self.dir.iter_mut() {
            if *dir_slot == a || *dir_slot == b {
                *dir_slot = handle;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{block_pool::BlockPool, component::Archetype, define_components, page::ArchetypePage};
    use std::{num::NonZeroU64, sync::Arc};

    define_components! {
        pub enum Demo { X: u32 }
    }

    fn key(v: u64) -> Key {
        Key::from_nonzero(NonZeroU64::new(v).unwrap())
    }

    #[test]
    fn insert_get_remove_with_growth() {
        let pool = Arc::new(BlockPool::new(256, true));
        let mut pages: Arena<ArchetypePage<Demo>> = Arena::new();
        let page = pages.insert(ArchetypePage::create(pool, Archetype::new()).unwrap());

        let mut directory = Directory::<Demo>::new(512);
        let resolve = |p: PageId<Demo>, _s: usize| {
            let _ = &pages;
            let _ = p;
            key(0) // placeholder overridden per-test via a side table below
        };
        let _ = resolve;

        // Real resolution: every key in this test is also its own slot
        // index interpreted back through a side table, since the bucket
        // never stores the key directly.
        let mut table = std::collections::HashMap::new();
        for i in 1u64..=200 {
            table.insert((page, i as usize), key(i));
            let resolve = |p: PageId<Demo>, s: usize| table[&(p, s)];
            assert!(directory.insert(key(i), page, i as usize, resolve));
        }

        let resolve = |p: PageId<Demo>, s: usize| table[&(p, s)];
        for i in 1u64..=200 {
            assert_eq!(directory.get(key(i), resolve), Some((page, i as usize)));
        }

        assert!(directory.depth() > 0);

        for i in 1u64..=100 {
            assert!(directory.remove(key(i), resolve));
        }
        directory.compact(resolve);

        for i in 1u64..=100 {
            assert_eq!(directory.get(key(i), resolve), None);
        }
        for i in 101u64..=200 {
            assert_eq!(directory.get(key(i), resolve), Some((page, i as usize)));
        }
    }
}
