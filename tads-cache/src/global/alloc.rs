use {
    super::{Descriptor, GlobalContext, List, ObjFlags},
    crate::{
        Error,
        OBJNUM_INVALID,
        ObjNum,
        Result,
        chunk::{BlockPtr, Chunk, HEADER_SIZE, block_size},
    },
    scope_exit::ScopeGuard,
};

impl GlobalContext
{
    /// Allocate an object of at least `size` bytes.
    ///
    /// The object is returned present, locked once, and with undefined
    /// contents. If no free block fits, the heap is grown;
    /// failing that, the heap is compacted and unlocked objects are evicted,
    /// least recently used first, until the allocation succeeds.
    pub fn alloc(&mut self, size: usize) -> Result<ObjNum>
    {
        let block = block_size(size)
            .filter(|&block| block <= self.max_object_size())
            .ok_or(Error::ObjectTooBig(size))?;

        if let Some(objnum) = self.alloc_direct(block) {
            return Ok(objnum);
        }

        self.compact();
        if let Some(objnum) = self.alloc_direct(block) {
            return Ok(objnum);
        }

        while self.make_room(block)? {
            self.compact();
            if let Some(objnum) = self.alloc_direct(block) {
                return Ok(objnum);
            }
        }

        log::debug!("out of memory allocating {} bytes", size);
        Err(Error::OutOfMemory)
    }

    /// Allocate from the free list, growing the heap if nothing fits.
    ///
    /// `size` must already be a block size.
    pub (super) fn alloc_direct(&mut self, size: usize) -> Option<ObjNum>
    {
        let objnum = match self.find_free_block(size) {
            Some(objnum) => objnum,
            None if self.grow_heap() => self.find_free_block(size)?,
            None => return None,
        };

        self.unlink(objnum, List::Free);
        self.split(objnum, size);

        let desc = self.desc_mut(objnum);
        desc.flags = ObjFlags::PRESENT | ObjFlags::LOCKED | ObjFlags::NODISC;
        desc.locks = 1;
        desc.swap = None;
        desc.load = None;
        Some(objnum)
    }

    /// Best-fitting free block of at least `size` bytes.
    ///
    /// A block of exactly `size` bytes ends the search early.
    pub (super) fn find_free_block(&self, size: usize) -> Option<ObjNum>
    {
        let mut best: Option<(ObjNum, usize)> = None;
        let mut objnum = self.free_head;
        while objnum != OBJNUM_INVALID {
            let desc = self.desc(objnum);
            if desc.size == size {
                return Some(objnum);
            }
            if desc.size > size && best.map_or(true, |(_, best)| desc.size < best) {
                best = Some((objnum, desc.size));
            }
            objnum = desc.next;
        }
        best.map(|(objnum, _)| objnum)
    }

    /// Shrink a block to `size` bytes and free the rest.
    ///
    /// Nothing happens if the rest would be smaller than the split
    /// threshold, or if there is no descriptor left to describe it.
    pub (super) fn split(&mut self, objnum: ObjNum, size: usize)
    {
        let Descriptor{size: current, ptr, ..} = *self.desc(objnum);
        let Some(ptr) = ptr else { return };

        if current < size || current - size < self.config.split_threshold {
            return;
        }

        let rest = match self.get_unused() {
            Ok(rest) => rest,
            Err(err) => {
                log::warn!("not splitting object {}: {}", objnum, err);
                return;
            },
        };

        let rest_ptr = BlockPtr{chunk: ptr.chunk, offset: ptr.offset + size + HEADER_SIZE};
        let rest_size = current - size - HEADER_SIZE;
        *self.desc_mut(rest) = Descriptor::free_block(rest_size, rest_ptr);
        self.place(rest, rest_ptr);
        self.link_free(rest);
        self.desc_mut(objnum).size = size;

        log::trace!("split object {} at {} bytes, leaving free block {} of {} bytes",
                    objnum, size, rest, rest_size);
    }

    /// Add a chunk to the heap as one big free block.
    ///
    /// Returns false if the byte budget is used up,
    /// or if there is no memory or descriptor for the new chunk.
    pub (super) fn grow_heap(&mut self) -> bool
    {
        let chunk_size = self.config.chunk_size;
        if self.budget < chunk_size {
            return false;
        }

        let objnum = match self.get_unused() {
            Ok(objnum) => objnum,
            Err(err) => {
                log::warn!("cannot describe a new heap chunk: {}", err);
                return false;
            },
        };

        // Give the descriptor back if the chunk cannot be had.
        let mut this = ScopeGuard::new(&mut *self, |this| this.put_unused(objnum));
        let mem = match this.heap.allocate(chunk_size, 0u8, "heap chunk") {
            Ok(mem) => mem,
            Err(_) => return false,
        };
        let this = ScopeGuard::into_inner(this);

        let mut chunk = Chunk{mem, start: 0};
        chunk.terminate();
        let index = this.chunks.len();
        this.chunks.push(chunk);
        this.budget -= chunk_size;

        let ptr = BlockPtr{chunk: index, offset: HEADER_SIZE};
        *this.desc_mut(objnum) = Descriptor::free_block(chunk_size - 2 * HEADER_SIZE, ptr);
        this.place(objnum, ptr);
        this.link_free(objnum);

        log::debug!("grew heap to {} chunks, {} bytes of budget left",
                    this.chunks.len(), this.budget);
        true
    }
}
