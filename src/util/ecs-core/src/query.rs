//! Query predicates over archetypes, and the capability-checked view types
//! ([`EntityView`], [`EntityTemplate`]) a page iterator yields.
//!
//! A [`Query`] names five component sets (`include_read`,
//! `include_read_write`, `optional_read`, `optional_read_write`, `exclude`);
//! [`Query::validate_against`] implements the view/query legality contract, and the
//! four `can_*` checks on [`QueryCaps`] implement its four accessor
//! contracts. Both are plain bitset arithmetic since capability sets are
//! represented the same way archetypes are (`component.rs`'s doc comment
//! calls this out explicitly).

use std::marker::PhantomData;

use derive_where::derive_where;

use crate::{
    component::{Archetype, ComponentMember, ComponentSet},
    page::ArchetypePage,
};

/// A query against the world's pages: which components must be present
/// (readably or writably), which may be present (optionally, readably or
/// writably), and which must be absent.
#[derive_where(Clone, Default; )]
pub struct Query<C: ComponentSet> {
    include_read: Archetype,
    include_read_write: Archetype,
    optional_read: Archetype,
    optional_read_write: Archetype,
    exclude: Archetype,
    _marker: PhantomData<fn() -> C>,
}

impl<C: ComponentSet> Query<C> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn include<M: ComponentMember<C>>(mut self) -> Self {
        self.include_read.set(M::INDEX);
        self
    }

    pub fn include_mut<M: ComponentMember<C>>(mut self) -> Self {
        self.include_read_write.set(M::INDEX);
        self
    }

    pub fn optional<M: ComponentMember<C>>(mut self) -> Self {
        self.optional_read.set(M::INDEX);
        self
    }

    pub fn optional_mut<M: ComponentMember<C>>(mut self) -> Self {
        self.optional_read_write.set(M::INDEX);
        self
    }

    pub fn exclude<M: ComponentMember<C>>(mut self) -> Self {
        self.exclude.set(M::INDEX);
        self
    }

    /// The archetype every matching page's archetype must be a superset of.
    fn required(&self) -> Archetype {
        self.include_read.union(&self.include_read_write)
    }

    pub fn matches(&self, archetype: &Archetype) -> bool {
        archetype.is_superset_of(&self.required()) && archetype.is_disjoint(&self.exclude)
    }

    /// The validation contract: every read/write name the query touches
    /// must be within the view's declared capability, and the five query
    /// sets must be pairwise disjoint (a component can't simultaneously be
    /// e.g. `include_read` and `optional_read_write`).
    pub fn validate_against(&self, component_read: &Archetype, component_read_write: &Archetype) -> bool {
        let read_all = self.include_read.union(&self.optional_read);
        let write_all = self.include_read_write.union(&self.optional_read_write);
        let view_read_union = component_read.union(component_read_write);

        if !view_read_union.is_superset_of(&read_all) {
            return false;
        }
        if !component_read_write.is_superset_of(&write_all) {
            return false;
        }

        let sets = [
            &self.include_read,
            &self.include_read_write,
            &self.optional_read,
            &self.optional_read_write,
            &self.exclude,
        ];
        for i in 0..sets.len() {
            for j in (i + 1)..sets.len() {
                if !sets[i].is_disjoint(sets[j]) {
                    return false;
                }
            }
        }
        true
    }

    pub(crate) fn caps(&self) -> QueryCaps {
        QueryCaps {
            include_read: self.include_read.clone(),
            include_read_write: self.include_read_write.clone(),
            optional_read: self.optional_read.clone(),
            optional_read_write: self.optional_read_write.clone(),
        }
    }
}

/// The subset of a [`Query`] an [`EntityView`] needs to enforce the
/// accessor contracts: `exclude` is dropped since a matched page can never
/// contain an excluded component anyway.
#[derive_where(Clone)]
pub(crate) struct QueryCaps {
    include_read: Archetype,
    include_read_write: Archetype,
    optional_read: Archetype,
    optional_read_write: Archetype,
}

impl QueryCaps {
    /// Unrestricted read access to every component present in `archetype`,
    /// no write access. Backs `World::entity`, a
    /// read-only operation with no associated query/view to validate
    /// against.
    pub(crate) fn full_read(archetype: &Archetype) -> Self {
        Self {
            include_read: archetype.clone(),
            include_read_write: Archetype::new(),
            optional_read: Archetype::new(),
            optional_read_write: Archetype::new(),
        }
    }

    fn can_get(&self, index: usize) -> bool {
        self.include_read.get(index) || self.include_read_write.get(index)
    }

    fn can_get_mut(&self, index: usize) -> bool {
        self.include_read_write.get(index)
    }

    fn can_get_optional(&self, index: usize) -> bool {
        self.include_read.get(index)
            || self.include_read_write.get(index)
            || self.optional_read.get(index)
            || self.optional_read_write.get(index)
    }

    fn can_get_optional_mut(&self, index: usize) -> bool {
        self.include_read_write.get(index) || self.optional_read_write.get(index)
    }
}

/// A page whose archetype matched a [`Query`]; `.entities()` walks its rows
/// in ascending slot order.
pub struct MatchedPage<'w, C: ComponentSet> {
    page: &'w ArchetypePage<C>,
    caps: QueryCaps,
}

impl<'w, C: ComponentSet> MatchedPage<'w, C> {
    pub(crate) fn new(page: &'w ArchetypePage<C>, caps: QueryCaps) -> Self {
        Self { page, caps }
    }

    pub fn len(&self) -> usize {
        self.page.len()
    }

    pub fn is_empty(&self) -> bool {
        self.page.is_empty()
    }

    pub fn archetype(&self) -> &Archetype {
        self.page.archetype()
    }

    pub fn entities(&self) -> EntityIterator<'w, C> {
        EntityIterator {
            page: self.page,
            caps: self.caps.clone(),
            next_slot: 0,
        }
    }
}

/// Yields [`EntityView`]s for `[0, page.len())` in ascending slot order.
/// It is invalidated by any structural change to its page; since
/// structural changes only ever happen in `World::resolve`, and `resolve`
/// takes `&mut World` while this iterator borrows the page immutably, the
/// borrow checker rejects exactly the unsound case.
pub struct EntityIterator<'w, C: ComponentSet> {
    page: &'w ArchetypePage<C>,
    caps: QueryCaps,
    next_slot: usize,
}

impl<'w, C: ComponentSet> Iterator for EntityIterator<'w, C> {
    type Item = EntityView<'w, C>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.next_slot >= self.page.len() {
            return None;
        }
        let slot = self.next_slot;
        self.next_slot += 1;
        Some(EntityView {
            page: self.page,
            slot,
            caps: self.caps.clone(),
        })
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.page.len() - self.next_slot;
        (remaining, Some(remaining))
    }
}

/// A capability-checked handle to one entity's row within a matched page.
/// Each accessor debug-asserts the corresponding clause of the view's accessor
/// contracts before touching the page; a release build skips the check (and
/// the underlying page access is still memory-safe, since the archetype
/// itself guarantees the component's presence for `get`/`get_mut`).
pub struct EntityView<'w, C: ComponentSet> {
    page: &'w ArchetypePage<C>,
    slot: usize,
    caps: QueryCaps,
}

impl<'w, C: ComponentSet> EntityView<'w, C> {
    pub(crate) fn new(page: &'w ArchetypePage<C>, slot: usize, caps: QueryCaps) -> Self {
        Self { page, slot, caps }
    }

    pub fn key(&self) -> crate::key::Key {
        self.page.key_at(self.slot)
    }

    pub fn get<M: ComponentMember<C>>(&self) -> &'w M::Value {
        debug_assert!(
            self.caps.can_get(M::INDEX),
            "component {} not readable by this query",
            M::NAME
        );
        self.page.get::<M>(self.slot)
    }

    /// Requires `M::INDEX` to be in the query's `include_read_write` set.
    /// Two concurrently live views must have disjoint writable-component
    /// sets (the view aliasing rule); that disjointness is the caller's
    /// responsibility to uphold — only presence-in-this-query is checked
    /// here; runtime enforcement of that rule is optional.
    pub fn get_mut<M: ComponentMember<C>>(&self) -> &'w mut M::Value {
        debug_assert!(
            self.caps.can_get_mut(M::INDEX),
            "component {} not read-write in this query",
            M::NAME
        );
        unsafe { &mut *self.page.get_ptr::<M>(self.slot) }
    }

    pub fn get_optional<M: ComponentMember<C>>(&self) -> Option<&'w M::Value> {
        debug_assert!(
            self.caps.can_get_optional(M::INDEX),
            "component {} not declared by this query",
            M::NAME
        );
        self.page.get_optional::<M>(self.slot)
    }

    pub fn get_optional_mut<M: ComponentMember<C>>(&self) -> Option<&'w mut M::Value> {
        debug_assert!(
            self.caps.can_get_optional_mut(M::INDEX),
            "component {} not writable by this query",
            M::NAME
        );
        self.page
            .has_component(M::INDEX)
            .then(|| unsafe { &mut *self.page.get_ptr::<M>(self.slot) })
    }

    /// An ungated, whole-row read-only view, for code that wants to inspect
    /// every present component without per-field capability bookkeeping
    /// (e.g. a debug dump, or the scenario tests in `tests/scenarios.rs`).
    pub fn template(&self) -> EntityTemplate<'w, C> {
        EntityTemplate {
            page: self.page,
            slot: self.slot,
        }
    }
}

/// A read-only, zero-copy view of one row's present components, returned
/// by [`EntityView::template`].
pub struct EntityTemplate<'w, C: ComponentSet> {
    page: &'w ArchetypePage<C>,
    slot: usize,
}

impl<'w, C: ComponentSet> EntityTemplate<'w, C> {
    pub fn contains<M: ComponentMember<C>>(&self) -> bool {
        self.page.has_component(M::INDEX)
    }

    pub fn get<M: ComponentMember<C>>(&self) -> Option<&'w M::Value> {
        self.page.get_optional::<M>(self.slot)
    }
}
