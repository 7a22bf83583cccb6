//! Raw memory underneath the cache.
//!
//! Heap chunks and descriptor pages come from here, never from the cache
//! itself. That way getting a descriptor never needs cache memory,
//! which would need a descriptor.

use {
    crate::{Error, Result},
    std::mem::size_of,
};

/// Allocator for heap chunks and descriptor pages.
///
/// Running out of memory is reported as [`Error::OutOfMemory`]
/// rather than aborting the process.
/// In debug builds the number of live bytes is tracked,
/// so teardown can check that everything was given back.
#[derive(Default)]
pub struct RawHeap
{
    #[cfg(debug_assertions)]
    allocated: usize,

    /// Fail every allocation, as if the system were out of memory.
    #[cfg(test)]
    pub (crate) exhausted: bool,
}

impl RawHeap
{
    pub fn new() -> Self
    {
        Self::default()
    }

    /// Allocate `len` elements, each initialized to `fill`.
    ///
    /// `what` names the allocation in log messages.
    pub fn allocate<T>(&mut self, len: usize, fill: T, what: &str)
        -> Result<Box<[T]>>
        where T: Clone
    {
        #[cfg(test)]
        if self.exhausted {
            log::warn!("cannot allocate {} elements for {}", len, what);
            return Err(Error::OutOfMemory);
        }

        let mut vec = Vec::new();
        if vec.try_reserve_exact(len).is_err() {
            log::warn!("cannot allocate {} elements for {}", len, what);
            return Err(Error::OutOfMemory);
        }
        vec.resize(len, fill);

        #[cfg(debug_assertions)]
        { self.allocated += len * size_of::<T>(); }

        log::trace!("allocated {} bytes for {}", len * size_of::<T>(), what);
        Ok(vec.into_boxed_slice())
    }

    /// Give back memory obtained from [`allocate`][`Self::allocate`].
    pub fn free<T>(&mut self, block: Box<[T]>)
    {
        #[cfg(debug_assertions)]
        { self.allocated -= block.len() * size_of::<T>(); }

        drop(block);
    }

    /// Number of live bytes, if tracked.
    pub fn allocated(&self) -> Option<usize>
    {
        #[cfg(debug_assertions)]
        { Some(self.allocated) }

        #[cfg(not(debug_assertions))]
        { None }
    }
}
