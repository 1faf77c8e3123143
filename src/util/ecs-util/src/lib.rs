//! Small, domain-agnostic primitives shared by `ecs-core`.
//!
//! This crate plays the same role for `ecs-core` that `crucible-utils` plays
//! for `crude`: a grab-bag of hashing, bit-set, arena, and cell helpers that
//! have nothing to do with entities or archetypes in particular.

pub mod bitset;
pub mod guard;
pub mod hash;
pub mod index;
pub mod slab;
pub mod unsafe_cell;
