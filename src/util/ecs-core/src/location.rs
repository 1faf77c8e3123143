//! The `(page, slot)` coordinate a directory entry resolves a key to.
//!
//! Pages live in a generational arena ([`ecs_util::slab::Arena`]) rather
//! than a plain `Vec`, so a page's identity survives every *other* page
//! being reclaimed by `resolve`: removing an empty page never requires
//! patching every directory entry that points at some unrelated page, the
//! way a `Vec::swap_remove`-based page list would.

use derive_where::derive_where;
use ecs_util::slab::Handle;

use crate::{component::ComponentSet, page::ArchetypePage};

pub type PageId<C> = Handle<ArchetypePage<C>>;

#[derive_where(Debug, Copy, Clone, Eq, PartialEq; )]
pub struct Location<C: ComponentSet> {
    pub page: PageId<C>,
    pub slot: usize,
}
