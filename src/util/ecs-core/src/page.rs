//! The archetype page: a single pool block holding a key column plus one
//! column per component present in its archetype, laid out once at page
//! creation.

use std::{marker::PhantomData, ptr::NonNull, sync::Arc};

use crate::{
    block_pool::BlockPool,
    component::{Archetype, ComponentMember, ComponentSet},
    error::Result,
    key::Key,
};

fn align_up(offset: usize, align: usize) -> usize {
    (offset + align - 1) & !(align - 1)
}

/// The result of `PageLayout::compute`: where the key column starts, where
/// each present component's column starts (0 for absent components), and
/// the capacity every column was sized for.
#[derive(Debug, Clone)]
pub struct PageLayout {
    pub capacity: usize,
    pub key_offset: usize,
    pub component_offsets: Vec<usize>,
}

impl PageLayout {
    /// Iterative-reduction layout: start from a naive capacity estimate
    /// (ignoring alignment padding), then lay out the key column followed
    /// by every present component column in ascending index order; if the
    /// running offset overflows the block, decrement the candidate
    /// capacity and retry. Terminates at capacity 0 in the pathological
    /// case where even a single row doesn't fit.
    pub fn compute<C: ComponentSet>(archetype: &Archetype, block_size: usize) -> Self {
        let present: Vec<usize> = archetype.iter_ones().filter(|&i| i < C::COUNT).collect();
        let key_layout = std::alloc::Layout::new::<Key>();

        let per_row: usize = key_layout.size()
            + present
                .iter()
                .map(|&index| C::layout(index).size())
                .sum::<usize>();

        let mut capacity = if per_row == 0 { 0 } else { block_size / per_row };

        loop {
            if capacity == 0 {
                return Self {
                    capacity: 0,
                    key_offset: 0,
                    component_offsets: vec![0; C::COUNT],
                };
            }

            if let Some(layout) = Self::try_layout::<C>(&present, key_layout, capacity, block_size)
            {
                return layout;
            }

            capacity -= 1;
        }
    }

    fn try_layout<C: ComponentSet>(
        present: &[usize],
        key_layout: std::alloc::Layout,
        capacity: usize,
        block_size: usize,
    ) -> Option<Self> {
        let mut offset = align_up(0, key_layout.align());
        let key_offset = offset;
        offset = offset.checked_add(key_layout.size().checked_mul(capacity)?)?;

        let mut component_offsets = vec![0usize; C::COUNT];
        for &index in present {
            let layout = C::layout(index);
            offset = align_up(offset, layout.align());
            component_offsets[index] = offset;
            offset = offset.checked_add(layout.size().checked_mul(capacity)?)?;
        }

        (offset <= block_size).then_some(Self {
            capacity,
            key_offset,
            component_offsets,
        })
    }
}

/// A single block holding entity keys and components for exactly one
/// archetype. Mutated only under single-writer discipline: the world's
/// resolve step is the only code that calls `append`/`erase`.
pub struct ArchetypePage<C: ComponentSet> {
    pool: Arc<BlockPool>,
    block: NonNull<u8>,
    archetype: Archetype,
    layout: PageLayout,
    len: usize,
    _marker: PhantomData<C>,
}

// SAFETY: the page owns its block exclusively; access is only ever made
// through `&`/`&mut self`, so sharing the handle across threads is as safe
// as sharing any other `Send + Sync` aggregate of `C`'s component values.
unsafe impl<C: ComponentSet> Send for ArchetypePage<C> {}
unsafe impl<C: ComponentSet> Sync for ArchetypePage<C> {}

impl<C: ComponentSet> ArchetypePage<C> {
    pub fn create(pool: Arc<BlockPool>, archetype: Archetype) -> Result<Self> {
        let layout = PageLayout::compute::<C>(&archetype, pool.block_size());
        let block = pool.acquire()?;

        Ok(Self {
            pool,
            block,
            archetype,
            layout,
            len: 0,
            _marker: PhantomData,
        })
    }

    pub fn archetype(&self) -> &Archetype {
        &self.archetype
    }

    pub fn capacity(&self) -> usize {
        self.layout.capacity
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn is_full(&self) -> bool {
        self.len >= self.layout.capacity
    }

    pub fn has_component(&self, index: usize) -> bool {
        self.archetype.get(index)
    }

    fn key_ptr(&self) -> *mut Key {
        unsafe { self.block.as_ptr().add(self.layout.key_offset) as *mut Key }
    }

    pub fn key_at(&self, slot: usize) -> Key {
        debug_assert!(slot < self.len);
        unsafe { *self.key_ptr().add(slot) }
    }

    pub fn keys(&self) -> &[Key] {
        unsafe { std::slice::from_raw_parts(self.key_ptr(), self.len) }
    }

    fn component_base(&self, index: usize) -> *mut u8 {
        debug_assert!(self.archetype.get(index), "component {index} absent from this page");
        unsafe { self.block.as_ptr().add(self.layout.component_offsets[index]) }
    }

    fn component_ptr(&self, index: usize, slot: usize) -> *mut u8 {
        let size = C::layout(index).size();
        unsafe { self.component_base(index).add(slot * size) }
    }

    /// Appends a new row. Panics if the page is full; the caller
    /// (`World::resolve`) must check `is_full`/allocate a fresh page first.
    /// Every component present in this page's archetype must be set on
    /// `template`; `debug_assert!`s the rest.
    pub fn append(&mut self, key: Key, mut template: crate::component::Template<C>) -> usize {
        assert!(!self.is_full(), "append called on a full page");

        let slot = self.len;
        unsafe { self.key_ptr().add(slot).write(key) };

        for index in self.archetype.iter_ones() {
            let value = template
                .take_erased(index)
                .unwrap_or_else(|| panic!("template missing required component {index}"));
            unsafe { C::write_erased(index, self.component_ptr(index, slot), value) };
        }

        self.len += 1;
        slot
    }

    /// Swap-erases `slot`. When `drop_values` is set, every present
    /// component's current value at `slot` is dropped first (the "real
    /// destroy" path); when clear, the caller has already moved every
    /// value out via `read_erased` (the archetype-migration path) and
    /// dropping here would double-free.
    ///
    /// Returns the key that moved into `slot` (so the directory can be
    /// patched), or `None` if `slot` was the last occupied row.
    pub fn erase(&mut self, slot: usize, drop_values: bool) -> Option<Key> {
        debug_assert!(slot < self.len);
        let last = self.len - 1;

        if drop_values {
            for index in self.archetype.iter_ones() {
                unsafe { C::drop_erased(index, self.component_ptr(index, slot)) };
            }
        }

        if slot != last {
            unsafe {
                let key_ptr = self.key_ptr();
                *key_ptr.add(slot) = *key_ptr.add(last);
            }

            for index in self.archetype.iter_ones() {
                let size = C::layout(index).size();
                let base = self.component_base(index);
                unsafe {
                    std::ptr::copy_nonoverlapping(base.add(last * size), base.add(slot * size), size);
                }
            }

            self.len -= 1;
            Some(self.key_at(slot))
        } else {
            self.len -= 1;
            None
        }
    }

    /// Moves the current value of a present component at `slot` out,
    /// leaving the slot's bytes logically uninitialized (the caller must
    /// either overwrite them or erase the row without dropping again).
    pub fn take_component(&self, index: usize, slot: usize) -> Box<dyn std::any::Any + Send + Sync> {
        debug_assert!(self.archetype.get(index));
        unsafe { C::read_erased(index, self.component_ptr(index, slot)) }
    }

    pub fn get<M: ComponentMember<C>>(&self, slot: usize) -> &M::Value {
        debug_assert!(self.archetype.get(M::INDEX), "component {} absent", M::NAME);
        unsafe { &*(self.component_ptr(M::INDEX, slot) as *const M::Value) }
    }

    pub fn get_mut<M: ComponentMember<C>>(&mut self, slot: usize) -> &mut M::Value {
        debug_assert!(self.archetype.get(M::INDEX), "component {} absent", M::NAME);
        unsafe { &mut *(self.component_ptr(M::INDEX, slot) as *mut M::Value) }
    }

    pub fn get_optional<M: ComponentMember<C>>(&self, slot: usize) -> Option<&M::Value> {
        self.archetype.get(M::INDEX).then(|| self.get::<M>(slot))
    }

    pub fn get_optional_mut<M: ComponentMember<C>>(&mut self, slot: usize) -> Option<&mut M::Value> {
        if self.archetype.get(M::INDEX) {
            Some(self.get_mut::<M>(slot))
        } else {
            None
        }
    }

    /// Raw pointer to component `M`'s value at `slot`. Unlike
    /// [`get_mut`](Self::get_mut), this only needs `&self`: the block
    /// backing a page is already addressed through raw pointers, so the
    /// aliasing discipline for concurrent writers comes from the caller
    /// (views with disjoint writable-component sets), not from the borrow
    /// checker. [`EntityView::get_mut`] is built on this.
    pub fn get_ptr<M: ComponentMember<C>>(&self, slot: usize) -> *mut M::Value {
        debug_assert!(self.archetype.get(M::INDEX), "component {} absent", M::NAME);
        self.component_ptr(M::INDEX, slot) as *mut M::Value
    }
}

impl<C: ComponentSet> Drop for ArchetypePage<C> {
    fn drop(&mut self) {
        for slot in 0..self.len {
            for index in self.archetype.iter_ones() {
                unsafe { C::drop_erased(index, self.component_ptr(index, slot)) };
            }
        }
        self.pool.release(self.block);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::define_components;

    define_components! {
        pub enum Demo {
            X: u32,
            Y: f64,
        }
    }

    #[test]
    fn layout_packs_present_columns_only() {
        let archetype: Archetype = [X::INDEX].into_iter().collect();
        let layout = PageLayout::compute::<Demo>(&archetype, 256);
        assert!(layout.capacity > 0);
        assert_eq!(layout.component_offsets[Y::INDEX], 0);
        assert_ne!(layout.component_offsets[X::INDEX], 0);
    }

    #[test]
    fn append_get_erase_roundtrip() {
        use crate::component::Template;

        let pool = Arc::new(BlockPool::new(256, true));
        let archetype: Archetype = [X::INDEX, Y::INDEX].into_iter().collect();
        let mut page = ArchetypePage::<Demo>::create(pool, archetype).unwrap();

        let k1 = Key::from_nonzero(std::num::NonZeroU64::new(1).unwrap());
        let k2 = Key::from_nonzero(std::num::NonZeroU64::new(2).unwrap());

        let t1 = Template::<Demo>::new().with::<X>(10).with::<Y>(1.5);
        let t2 = Template::<Demo>::new().with::<X>(20).with::<Y>(2.5);

        page.append(k1, t1);
        page.append(k2, t2);

        assert_eq!(*page.get::<X>(0), 10);
        assert_eq!(*page.get::<Y>(1), 2.5);

        let relocated = page.erase(0, true);
        assert_eq!(relocated, Some(k2));
        assert_eq!(page.len(), 1);
        assert_eq!(page.key_at(0), k2);
        assert_eq!(*page.get::<X>(0), 20);
    }

    #[test]
    fn erase_last_row_returns_none() {
        use crate::component::Template;

        let pool = Arc::new(BlockPool::new(256, true));
        let archetype: Archetype = [X::INDEX].into_iter().collect();
        let mut page = ArchetypePage::<Demo>::create(pool, archetype).unwrap();

        let key = Key::from_nonzero(std::num::NonZeroU64::new(1).unwrap());
        page.append(key, Template::<Demo>::new().with::<X>(1));
        assert_eq!(page.erase(0, true), None);
        assert_eq!(page.len(), 0);
    }
}
