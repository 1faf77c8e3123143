//! An owned, growable bitset used to represent archetypes and view
//! capability sets: both are "a subset of a small, runtime-known universe of
//! labels" and need cheap union/subset/disjoint tests plus stable hashing.

use smallvec::SmallVec;
use std::hash::{Hash, Hasher};

const BITS_PER_WORD: usize = u64::BITS as usize;

/// A bitset over `0..capacity`. Inline-stores up to two words (128 bits)
/// before spilling to the heap, since most component/queue/resource
/// enumerations in a single context are small.
#[derive(Debug, Clone, Default, Eq)]
pub struct BitSet {
    words: SmallVec<[u64; 2]>,
}

impl BitSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(bits: usize) -> Self {
        let mut set = Self::new();
        set.ensure_words(bits);
        set
    }

    fn ensure_words(&mut self, bits: usize) {
        let words_needed = bits.div_ceil(BITS_PER_WORD).max(1);
        if self.words.len() < words_needed {
            self.words.resize(words_needed, 0);
        }
    }

    pub fn set(&mut self, index: usize) {
        self.ensure_words(index + 1);
        self.words[index / BITS_PER_WORD] |= 1u64 << (index % BITS_PER_WORD);
    }

    pub fn unset(&mut self, index: usize) {
        if let Some(word) = self.words.get_mut(index / BITS_PER_WORD) {
            *word &= !(1u64 << (index % BITS_PER_WORD));
        }
    }

    pub fn get(&self, index: usize) -> bool {
        self.words
            .get(index / BITS_PER_WORD)
            .is_some_and(|word| word & (1u64 << (index % BITS_PER_WORD)) != 0)
    }

    pub fn is_empty(&self) -> bool {
        self.words.iter().all(|&w| w == 0)
    }

    pub fn len(&self) -> usize {
        self.words.iter().map(|w| w.count_ones() as usize).sum()
    }

    /// `self` contains every bit set in `other`.
    pub fn is_superset_of(&self, other: &BitSet) -> bool {
        let n = self.words.len().max(other.words.len());
        (0..n).all(|i| {
            let a = self.words.get(i).copied().unwrap_or(0);
            let b = other.words.get(i).copied().unwrap_or(0);
            a & b == b
        })
    }

    pub fn is_disjoint(&self, other: &BitSet) -> bool {
        self.words
            .iter()
            .zip(other.words.iter())
            .all(|(a, b)| a & b == 0)
    }

    pub fn union(&self, other: &BitSet) -> BitSet {
        let n = self.words.len().max(other.words.len());
        let mut words = SmallVec::with_capacity(n);
        for i in 0..n {
            let a = self.words.get(i).copied().unwrap_or(0);
            let b = other.words.get(i).copied().unwrap_or(0);
            words.push(a | b);
        }
        BitSet { words }
    }

    pub fn union_with(&mut self, other: &BitSet) {
        self.ensure_words(other.words.len() * BITS_PER_WORD);
        for (i, &w) in other.words.iter().enumerate() {
            self.words[i] |= w;
        }
    }

    pub fn remove_all(&mut self, other: &BitSet) {
        for (a, &b) in self.words.iter_mut().zip(other.words.iter()) {
            *a &= !b;
        }
    }

    pub fn iter_ones(&self) -> impl Iterator<Item = usize> + '_ {
        self.words.iter().enumerate().flat_map(|(word_idx, &word)| {
            (0..BITS_PER_WORD).filter_map(move |bit| {
                (word & (1u64 << bit) != 0).then_some(word_idx * BITS_PER_WORD + bit)
            })
        })
    }
}

impl PartialEq for BitSet {
    fn eq(&self, other: &Self) -> bool {
        let n = self.words.len().max(other.words.len());
        (0..n).all(|i| {
            self.words.get(i).copied().unwrap_or(0) == other.words.get(i).copied().unwrap_or(0)
        })
    }
}

impl Hash for BitSet {
    fn hash<H: Hasher>(&self, state: &mut H) {
        // Trailing all-zero words must not affect equality, so trim before hashing.
        let trimmed = self
            .words
            .iter()
            .rposition(|&w| w != 0)
            .map(|last| &self.words[..=last])
            .unwrap_or(&[]);
        trimmed.hash(state);
    }
}

impl FromIterator<usize> for BitSet {
    fn from_iter<I: IntoIterator<Item = usize>>(iter: I) -> Self {
        let mut set = Self::new();
        for bit in iter {
            set.set(bit);
        }
        set
    }
}
