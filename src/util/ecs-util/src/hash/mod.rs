//! Fast, non-cryptographic hashing primitives.

mod xorshift;

pub use xorshift::{xorshift64, xorshift64_raw};

use std::{
    hash::{self, BuildHasher, Hasher},
    marker::PhantomData,
};

use derive_where::derive_where;

pub use rustc_hash::FxHasher;

// === Aliases === //

pub type FxBuildHasher = ConstBuildHasherDefault<FxHasher>;
pub type FxHashMap<K, V> = hashbrown::HashMap<K, V, FxBuildHasher>;
pub type FxHashSet<T> = hashbrown::HashSet<T, FxBuildHasher>;

pub type NopBuildHasher = ConstBuildHasherDefault<NopHasher>;
pub type NopHashMap<K, V> = hashbrown::HashMap<K, V, NopBuildHasher>;

pub fn new_fx_hash_map<K, V>() -> FxHashMap<K, V> {
    FxHashMap::with_hasher(FxBuildHasher::new())
}

pub fn new_fx_hash_set<T>() -> FxHashSet<T> {
    FxHashSet::with_hasher(FxBuildHasher::new())
}

// === Hashers === //

#[derive_where(Debug, Copy, Clone, Default)]
pub struct ConstBuildHasherDefault<T> {
    _ty: PhantomData<fn() -> T>,
}

impl<T> ConstBuildHasherDefault<T> {
    pub const fn new() -> Self {
        Self { _ty: PhantomData }
    }
}

impl<T: Default + hash::Hasher> hash::BuildHasher for ConstBuildHasherDefault<T> {
    type Hasher = T;

    fn build_hasher(&self) -> Self::Hasher {
        T::default()
    }
}

/// A hasher for keys that are already well-distributed 64-bit integers (e.g.
/// entity keys produced by [`xorshift64`]); it just forwards the input.
#[derive(Debug, Default)]
pub struct NopHasher(u64);

impl hash::Hasher for NopHasher {
    fn write(&mut self, _bytes: &[u8]) {
        unimplemented!("`NopHasher` only supports `write_u64`");
    }

    fn write_u64(&mut self, v: u64) {
        self.0 = v;
    }

    fn finish(&self) -> u64 {
        self.0
    }
}

pub fn fx_hash_one(value: impl hash::Hash) -> u64 {
    FxBuildHasher::new().hash_one(value)
}
