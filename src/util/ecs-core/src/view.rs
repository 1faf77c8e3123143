//! Capability-scoped handles into a [`World`]: a [`ViewCaps`] is a
//! construction-time declaration of which components, queues, and resources
//! a system may touch; a [`View`] pairs that declaration with a `&World`
//! and debug-asserts every accessor against it.

use std::marker::PhantomData;

use ecs_util::bitset::BitSet;

use crate::{
    component::{Archetype, ComponentMember, ComponentSet},
    error::Result,
    key::Key,
    query::{EntityView, MatchedPage, Query},
    queue_set::{downcast_queue_value, QueueMember, QueueSet},
    resource::{ResourceMember, ResourceSet},
    world::World,
};

/// A view's declared capabilities, built once via the `read`/`write`/
/// `queue_push`/`queue_drain`/`resource` builder methods and then handed to
/// [`World::eval`]. Mirrors [`Query`](crate::query::Query)'s bitset shape:
/// component sets are `Archetype`s, queue/resource sets are plain `BitSet`s
/// indexed by `Q`'s/`R`'s declaration order.
pub struct ViewCaps<C: ComponentSet, Q: QueueSet, R: ResourceSet> {
    component_read: Archetype,
    component_read_write: Archetype,
    queue_write: BitSet,
    queue_read_write: BitSet,
    resource: BitSet,
    _marker: PhantomData<fn() -> (C, Q, R)>,
}

impl<C: ComponentSet, Q: QueueSet, R: ResourceSet> Default for ViewCaps<C, Q, R> {
    fn default() -> Self {
        Self {
            component_read: Archetype::new(),
            component_read_write: Archetype::new(),
            queue_write: BitSet::new(),
            queue_read_write: BitSet::new(),
            resource: BitSet::new(),
            _marker: PhantomData,
        }
    }
}

impl<C: ComponentSet, Q: QueueSet, R: ResourceSet> ViewCaps<C, Q, R> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn read<M: ComponentMember<C>>(mut self) -> Self {
        self.component_read.set(M::INDEX);
        self
    }

    pub fn write<M: ComponentMember<C>>(mut self) -> Self {
        self.component_read_write.set(M::INDEX);
        self
    }

    pub fn queue_push<M: QueueMember<Q>>(mut self) -> Self {
        self.queue_write.set(M::INDEX);
        self
    }

    pub fn queue_drain<M: QueueMember<Q>>(mut self) -> Self {
        self.queue_read_write.set(M::INDEX);
        self
    }

    pub fn resource<M: ResourceMember<R>>(mut self) -> Self {
        self.resource.set(M::INDEX);
        self
    }

    fn component_read_union(&self) -> Archetype {
        self.component_read.union(&self.component_read_write)
    }
}

/// A capability-checked handle to a [`World`], valid for the lifetime of one
/// `eval` call. Every accessor debug-asserts the relevant clause of this
/// view's [`ViewCaps`] before touching the world; a release build
/// skips the check (the underlying access stays memory-safe regardless,
/// since the aliasing discipline is the caller's contract, not the type
/// system's).
pub struct View<'w, C: ComponentSet, Q: QueueSet, R: ResourceSet> {
    world: &'w World<C, Q, R>,
    caps: ViewCaps<C, Q, R>,
}

impl<'w, C: ComponentSet, Q: QueueSet, R: ResourceSet> View<'w, C, Q, R> {
    pub(crate) fn new(world: &'w World<C, Q, R>, caps: ViewCaps<C, Q, R>) -> Self {
        Self { world, caps }
    }

    // === Deferred entity mutation === //

    pub fn queue_create(&self, template: crate::component::Template<C>) -> Result<Key> {
        self.world.queue_create(template)
    }

    pub fn queue_destroy(&self, key: Key) -> Result<()> {
        self.world.queue_destroy(key)
    }

    pub fn queue_insert<M: ComponentMember<C>>(&self, key: Key, value: M::Value) -> Result<()> {
        debug_assert!(
            self.caps.component_read_write.get(M::INDEX),
            "component {} not writable by this view",
            M::NAME
        );
        self.world.queue_insert::<M>(key, value)
    }

    pub fn queue_remove<M: ComponentMember<C>>(&self, key: Key) -> Result<()> {
        debug_assert!(
            self.caps.component_read_write.get(M::INDEX),
            "component {} not writable by this view",
            M::NAME
        );
        self.world.queue_remove::<M>(key)
    }

    // === Query === //

    pub fn entity(&self, key: Key) -> Option<EntityView<'w, C>> {
        self.world.entity(key)
    }

    pub fn page_iterator(&self, query: &Query<C>) -> impl Iterator<Item = MatchedPage<'w, C>> + 'w {
        debug_assert!(
            query.validate_against(&self.caps.component_read, &self.caps.component_read_write),
            "query requests capabilities this view was not declared with"
        );
        self.world.page_iterator(query)
    }

    // === Queue API === //

    fn check_queue_push<M: QueueMember<Q>>(&self) {
        debug_assert!(
            self.caps.queue_write.get(M::INDEX) || self.caps.queue_read_write.get(M::INDEX),
            "queue {} not pushable by this view",
            M::NAME
        );
    }

    fn check_queue_drain<M: QueueMember<Q>>(&self) {
        debug_assert!(
            self.caps.queue_read_write.get(M::INDEX),
            "queue {} not drainable by this view",
            M::NAME
        );
    }

    pub fn push<M: QueueMember<Q>>(&self, value: M::Value) -> Result<()> {
        self.check_queue_push::<M>();
        // SAFETY: `check_queue_push` establishes this view holds at least
        // `queue_write` for `M`; `push` itself locks the queue's own writer
        // mutex, so concurrent pushes from other views are already safe.
        unsafe { self.world.queue_cell(M::INDEX) }.push(Box::new(value))
    }

    pub fn ensure_capacity<M: QueueMember<Q>>(&self, n: usize) -> Result<()> {
        self.check_queue_push::<M>();
        unsafe { self.world.queue_cell(M::INDEX) }.ensure_capacity(n)
    }

    pub fn push_assume_capacity<M: QueueMember<Q>>(&self, value: M::Value) {
        self.check_queue_push::<M>();
        unsafe { self.world.queue_cell(M::INDEX) }.push_assume_capacity(Box::new(value))
    }

    /// # Safety (upheld by this method, not the caller)
    /// Requires `queue_read_write`: drain must be single-threaded,
    /// and the borrow checker can't see across the `SyncUnsafeCell` that
    /// backs `World`'s queues, so this debug assertion is the only guard
    /// against two views draining the same queue concurrently.
    pub fn pop<M: QueueMember<Q>>(&self) -> Option<M::Value> {
        self.check_queue_drain::<M>();
        unsafe { self.world.queue_cell_mut(M::INDEX) }
            .pop()
            .map(downcast_queue_value)
    }

    pub fn peek<M: QueueMember<Q>>(&self) -> bool {
        self.check_queue_drain::<M>();
        unsafe { self.world.queue_cell(M::INDEX) }.peek().is_some()
    }

    pub fn reset<M: QueueMember<Q>>(&self) {
        self.check_queue_drain::<M>();
        unsafe { self.world.queue_cell_mut(M::INDEX) }.reset()
    }

    pub fn count<M: QueueMember<Q>>(&self) -> usize {
        self.check_queue_drain::<M>();
        unsafe { self.world.queue_cell(M::INDEX) }.count()
    }

    // === Resources === //

    pub fn resource<M: ResourceMember<R>>(&self) -> &M::Value {
        debug_assert!(
            self.caps.resource.get(M::INDEX),
            "resource {} not declared by this view",
            M::NAME
        );
        // SAFETY: `resource` capability at view-construction time is the
        // caller's guarantee (the view aliasing rule) that no other live
        // view holds this resource index writable.
        unsafe { self.world.resource_cell(M::INDEX) }
            .downcast_ref()
            .expect("resource value type mismatch")
    }

    pub fn resource_mut<M: ResourceMember<R>>(&self) -> &mut M::Value {
        debug_assert!(
            self.caps.resource.get(M::INDEX),
            "resource {} not declared by this view",
            M::NAME
        );
        unsafe { self.world.resource_cell(M::INDEX) }
            .downcast_mut()
            .expect("resource value type mismatch")
    }
}
