//! The only error a caller ever has to handle is [`Error::OutOfMemory`].
//! Everything else listed in the crate's failure semantics (duplicate
//! insert into a bucket, access outside a view's declared capability) is a
//! corrupted invariant, not a recoverable condition, and is raised with
//! `debug_assert!`/`unreachable!` at the call site instead of a `Result`
//! variant here.

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The block pool could not satisfy an allocation and is configured not
    /// to expand (or the global allocator itself failed). The world is left
    /// exactly as it was before the call that returned this: queue draining
    /// is peek-then-pop, so nothing is removed from a queue until the
    /// effect of popping it has been fully applied.
    #[error("out of memory: block pool exhausted")]
    OutOfMemory,
}

pub type Result<T> = std::result::Result<T, Error>;
