use {
    super::{Descriptor, GlobalContext, List, LoadHandle, ObjFlags},
    crate::{
        Error,
        OBJNUM_INVALID,
        ObjNum,
        Result,
        SwapHandle,
        chunk::{BlockPtr, HEADER_SIZE, block_size},
    },
    scope_exit::ScopeGuard,
    std::io,
};

/// Reads an object's original bytes, given its load handle.
pub type LoadFn<'a> = &'a mut dyn FnMut(LoadHandle, &mut [u8]) -> io::Result<()>;

impl GlobalContext
{
    /// Create an object that is not in memory yet.
    ///
    /// Its bytes are read through the load callback when it is first locked.
    pub fn reserve(&mut self, size: usize, load: LoadHandle) -> Result<ObjNum>
    {
        let block = block_size(size)
            .filter(|&block| block <= self.max_object_size())
            .ok_or(Error::ObjectTooBig(size))?;
        let objnum = self.get_unused()?;
        *self.desc_mut(objnum) = Descriptor{
            flags: ObjFlags::empty(),
            size: block,
            load: Some(load),
            ..Descriptor::UNUSED
        };
        Ok(objnum)
    }

    /// Lock an object, which must already be in memory or in swap.
    pub fn lock(&mut self, objnum: ObjNum) -> Result<()>
    {
        self.lock_with(objnum, None).map(drop)
    }

    /// Lock an object, loading it if necessary.
    ///
    /// Objects that were never swapped out are loaded with `load`.
    /// Returns true if a revert was requested while the object was out of
    /// memory; the caller must revert the object now.
    pub fn lock_with(&mut self, objnum: ObjNum, load: Option<LoadFn<'_>>) -> Result<bool>
    {
        let desc = *self.object(objnum)?;

        if desc.flags.contains(ObjFlags::PRESENT) {
            if desc.flags.contains(ObjFlags::LRU) {
                self.unlink(objnum, List::Lru);
            }
            let desc = self.desc_mut(objnum);
            desc.flags.insert(ObjFlags::LOCKED);
            desc.locks += 1;
            return Ok(false);
        }

        self.load(objnum, load)?;

        let desc = self.desc_mut(objnum);
        let revert = desc.flags.contains(ObjFlags::REVERT);
        desc.flags.remove(ObjFlags::REVERT);
        Ok(revert)
    }

    /// Bring an absent object into memory, locked.
    fn load(&mut self, objnum: ObjNum, load: Option<LoadFn<'_>>) -> Result<()>
    {
        let Descriptor{flags, size, swap, load: handle, ..} = *self.desc(objnum);

        // Objects that have been to swap can only come back from swap.
        let source = if flags.contains(ObjFlags::NODISC) {
            swap.map(Source::Swap)
        } else {
            handle.zip(load).map(|(handle, load)| Source::Load(handle, load))
        };
        let source = source.ok_or(Error::LoadSourceMissing(objnum))?;

        let temp = self.alloc(size)?;
        let mut this = ScopeGuard::new(&mut *self, |this| this.release_temporary(temp));
        this.fill_block(objnum, temp, size, source)?;
        let this = ScopeGuard::into_inner(this);

        let from_swap = flags.contains(ObjFlags::NODISC);
        let Descriptor{size: block, ptr, ..} = *this.desc(temp);
        this.put_unused(temp);

        let desc = this.desc_mut(objnum);
        desc.size = block;
        desc.flags.insert(ObjFlags::PRESENT | ObjFlags::LOCKED);
        desc.flags.remove(ObjFlags::DIRTY);
        if from_swap {
            desc.flags.insert(ObjFlags::NODISC);
        }
        desc.locks = 1;
        if let Some(ptr) = ptr {
            this.place(objnum, ptr);
        }

        log::trace!("loaded object {} from {}", objnum,
                    if from_swap { "swap" } else { "its load source" });
        Ok(())
    }

    /// Read `size` bytes of `objnum` into the block of `temp`.
    fn fill_block(&mut self, objnum: ObjNum, temp: ObjNum, size: usize, source: Source)
        -> Result<()>
    {
        let Some(ptr) = self.desc(temp).ptr else { return Err(Error::InvalidObject(temp)) };
        let dest = self.chunks[ptr.chunk].data_mut(ptr, size);
        match source {
            Source::Swap(handle) =>
                self.swap.swap_in(handle, dest)?,
            Source::Load(handle, load) =>
                load(handle, dest).map_err(|err| Error::Load(objnum, err))?,
        }
        Ok(())
    }

    /// Free the block of a locked temporary object.
    fn release_temporary(&mut self, temp: ObjNum)
    {
        let desc = self.desc_mut(temp);
        desc.locks = 0;
        desc.flags.remove(ObjFlags::LOCKED);
        self.make_free(temp);
    }

    /// Turn the descriptor of a present, unlisted object into a free block.
    fn make_free(&mut self, objnum: ObjNum)
    {
        let desc = self.desc_mut(objnum);
        desc.flags = ObjFlags::FREE;
        desc.swap = None;
        desc.load = None;
        desc.locks = 0;
        self.link_free(objnum);
    }

    /// Add a lock holder to an object that is already locked.
    pub (crate) fn relock(&mut self, objnum: ObjNum)
    {
        let desc = self.desc_mut(objnum);
        debug_assert!(desc.locks > 0, "relocking unlocked object {}", objnum);
        desc.locks += 1;
    }

    /// Give up one lock on an object.
    ///
    /// When the last lock is released, the object becomes the most recently
    /// used object, and may be moved or evicted from then on.
    pub fn unlock(&mut self, objnum: ObjNum) -> Result<()>
    {
        let desc = *self.object(objnum)?;
        if desc.locks == 0 {
            return Err(Error::NotLocked(objnum));
        }

        let desc = self.desc_mut(objnum);
        desc.locks -= 1;
        if desc.locks == 0 {
            desc.flags.remove(ObjFlags::LOCKED);
            self.link_mru(objnum);
        }
        Ok(())
    }

    /// Mark an unlocked object as most recently used.
    pub fn use_object(&mut self, objnum: ObjNum) -> Result<()>
    {
        let desc = *self.object(objnum)?;
        if desc.flags.contains(ObjFlags::LRU) {
            self.unlink(objnum, List::Lru);
            self.link_mru(objnum);
        }
        Ok(())
    }

    /// Mark an object as modified.
    ///
    /// It will be written to swap rather than dropped when evicted.
    pub fn touch(&mut self, objnum: ObjNum) -> Result<()>
    {
        self.object(objnum)?;
        self.desc_mut(objnum).flags.insert(ObjFlags::DIRTY);
        Ok(())
    }

    /// Delete an unlocked object.
    ///
    /// Its block, if any, becomes a free block, and its copy in swap,
    /// if any, is released.
    pub fn free(&mut self, objnum: ObjNum) -> Result<()>
    {
        let desc = *self.object(objnum)?;
        if desc.flags.contains(ObjFlags::LOCKED) {
            return Err(Error::LockedObjectFreed(objnum));
        }

        if let Some(handle) = desc.swap {
            self.swap.release(handle);
        }

        if desc.flags.contains(ObjFlags::PRESENT) {
            if desc.flags.contains(ObjFlags::LRU) {
                self.unlink(objnum, List::Lru);
            }
            self.make_free(objnum);
        } else {
            self.put_unused(objnum);
        }
        Ok(())
    }

    /// Change the size of a locked object, keeping its number and contents.
    ///
    /// Shrinking splits the block. Growing first tries to annex a free
    /// block right after the object; failing that, the object is moved,
    /// which is refused while anybody else holds a lock on it.
    pub fn realloc(&mut self, objnum: ObjNum, size: usize) -> Result<()>
    {
        let block = block_size(size)
            .filter(|&block| block <= self.max_object_size())
            .ok_or(Error::ObjectTooBig(size))?;

        let desc = *self.object(objnum)?;
        let Some(ptr) = desc.ptr.filter(|_| desc.locks > 0)
            else { return Err(Error::NotLocked(objnum)) };

        self.desc_mut(objnum).flags.insert(ObjFlags::DIRTY);

        if block <= desc.size {
            self.split(objnum, block);
            return Ok(());
        }

        let next = self.chunks[ptr.chunk].header(ptr.offset + desc.size);
        if next != OBJNUM_INVALID {
            let Descriptor{flags, size: next_size, ..} = *self.desc(next);
            let combined = desc.size + HEADER_SIZE + next_size;
            if flags.contains(ObjFlags::FREE) && combined >= block {
                self.unlink(next, List::Free);
                self.put_unused(next);
                self.desc_mut(objnum).size = combined;
                self.split(objnum, block);
                log::trace!("object {} annexed free block {}", objnum, next);
                return Ok(());
            }
        }

        if desc.locks > 1 {
            return Err(Error::ReallocMultipleLocks(objnum));
        }

        // The object is locked, so allocating cannot move it.
        let temp = self.alloc(block)?;
        let Descriptor{size: temp_size, ptr: temp_ptr, ..} = *self.desc(temp);
        let Some(temp_ptr) = temp_ptr else { return Err(Error::InvalidObject(temp)) };
        self.copy_block(ptr, temp_ptr, desc.size);

        self.desc_mut(objnum).size = temp_size;
        self.place(objnum, temp_ptr);
        self.desc_mut(temp).size = desc.size;
        self.place(temp, ptr);
        self.release_temporary(temp);

        log::trace!("moved object {} to grow it to {} bytes", objnum, block);
        Ok(())
    }

    fn copy_block(&mut self, from: BlockPtr, to: BlockPtr, len: usize)
    {
        if from.chunk == to.chunk {
            let mem = &mut self.chunks[from.chunk].mem;
            mem.copy_within(from.offset .. from.offset + len, to.offset);
        } else {
            let split = from.chunk.max(to.chunk);
            let (low, high) = self.chunks.split_at_mut(split);
            let (src, dst) = if from.chunk < to.chunk {
                (&low[from.chunk], &mut high[0])
            } else {
                (&high[0], &mut low[to.chunk])
            };
            dst.data_mut(to, len).copy_from_slice(src.data(from, len));
        }
    }

    /// The bytes of a locked object.
    pub fn bytes(&self, objnum: ObjNum) -> Result<&[u8]>
    {
        let desc = self.object(objnum)?;
        match desc.ptr {
            Some(ptr) if desc.locks > 0 => Ok(self.chunks[ptr.chunk].data(ptr, desc.size)),
            _ => Err(Error::NotLocked(objnum)),
        }
    }

    /// The bytes of a locked object, which is marked as modified.
    pub fn bytes_mut(&mut self, objnum: ObjNum) -> Result<&mut [u8]>
    {
        let desc = *self.object(objnum)?;
        match desc.ptr {
            Some(ptr) if desc.locks > 0 => {
                self.desc_mut(objnum).flags.insert(ObjFlags::DIRTY);
                Ok(self.chunks[ptr.chunk].data_mut(ptr, desc.size))
            },
            _ => Err(Error::NotLocked(objnum)),
        }
    }

    /// The bytes of an object if it is in memory, without locking it.
    ///
    /// The returned slice borrows the context,
    /// so the object cannot move while it is alive.
    pub fn peek(&self, objnum: ObjNum) -> Result<Option<&[u8]>>
    {
        let desc = self.object(objnum)?;
        Ok(desc.ptr.map(|ptr| self.chunks[ptr.chunk].data(ptr, desc.size)))
    }

    /// Size of an object's block.
    pub fn object_size(&self, objnum: ObjNum) -> Result<usize>
    {
        Ok(self.object(objnum)?.size)
    }

    /// Whether an object has been modified or has ever been in swap.
    pub fn is_dirty(&self, objnum: ObjNum) -> Result<bool>
    {
        Ok(self.object(objnum)?.needs_swap())
    }

    /// Whether an object's bytes are in memory.
    pub fn is_present(&self, objnum: ObjNum) -> Result<bool>
    {
        Ok(self.object(objnum)?.flags.contains(ObjFlags::PRESENT))
    }

    /// State flags of an object.
    pub fn flags(&self, objnum: ObjNum) -> Result<ObjFlags>
    {
        Ok(self.object(objnum)?.flags)
    }

    /// Copy of an object's descriptor.
    pub fn descriptor(&self, objnum: ObjNum) -> Result<Descriptor>
    {
        self.object(objnum).copied()
    }

    /// Pin an object in memory, or unpin it.
    pub fn set_no_swap(&mut self, objnum: ObjNum, no_swap: bool) -> Result<()>
    {
        self.object(objnum)?;
        self.desc_mut(objnum).flags.set(ObjFlags::NOSWAP, no_swap);
        Ok(())
    }

    /// Ask for an object to be returned to its pristine state.
    ///
    /// Returns true if the object is in memory and must be reverted now.
    /// An object in swap is flagged, and [`lock_with`][`Self::lock_with`]
    /// reports the request when it is loaded again. A discarded object
    /// needs nothing: it will be reloaded from its load source.
    pub fn request_revert(&mut self, objnum: ObjNum) -> Result<bool>
    {
        let flags = self.object(objnum)?.flags;
        if flags.contains(ObjFlags::PRESENT) {
            return Ok(true);
        }
        if flags.contains(ObjFlags::NODISC) {
            self.desc_mut(objnum).flags.insert(ObjFlags::REVERT);
        }
        Ok(false)
    }
}

/// Where an absent object's bytes come from.
enum Source<'a>
{
    Swap(SwapHandle),
    Load(LoadHandle, LoadFn<'a>),
}

#[cfg(test)]
mod tests
{
    use {
        super::*,
        crate::global::tests::{context, fill, small_config},
        std::cell::Cell,
    };

    #[test]
    fn dirty_object_survives_swap()
    {
        let mut cache = context(small_config());
        let objnum = cache.alloc(300).unwrap();
        for (i, byte) in cache.bytes_mut(objnum).unwrap().iter_mut().enumerate() {
            *byte = i as u8;
        }
        let expected = cache.bytes(objnum).unwrap().to_vec();
        cache.unlock(objnum).unwrap();

        assert!(cache.make_room(1).unwrap());
        assert!(!cache.is_present(objnum).unwrap());
        assert_eq!(cache.swap().stats().writes, 1);

        cache.lock(objnum).unwrap();
        assert_eq!(cache.bytes(objnum).unwrap(), &expected[..]);
        assert!(cache.flags(objnum).unwrap().contains(ObjFlags::NODISC));
        assert!(!cache.flags(objnum).unwrap().contains(ObjFlags::DIRTY));
        cache.check_consistency();
    }

    #[test]
    fn clean_reloadable_object_is_reloaded_not_swapped()
    {
        let mut cache = context(small_config());
        let objnum = cache.reserve(64, LoadHandle(9)).unwrap();
        assert!(!cache.is_present(objnum).unwrap());

        let calls = Cell::new(0);
        let mut load = |handle: LoadHandle, bytes: &mut [u8]| -> io::Result<()> {
            assert_eq!(handle, LoadHandle(9));
            calls.set(calls.get() + 1);
            bytes.fill(0x99);
            Ok(())
        };

        cache.lock_with(objnum, Some(&mut load)).unwrap();
        assert!(!cache.flags(objnum).unwrap().contains(ObjFlags::NODISC));
        cache.unlock(objnum).unwrap();
        assert!(cache.make_room(1).unwrap());
        assert_eq!(cache.swap().stats().writes, 0);

        cache.lock_with(objnum, Some(&mut load)).unwrap();
        assert_eq!(calls.get(), 2);
        assert_eq!(cache.swap().stats().reads, 0);
        assert!(cache.bytes(objnum).unwrap().iter().all(|&x| x == 0x99));
        assert!(!cache.flags(objnum).unwrap().contains(ObjFlags::NODISC));
        cache.check_consistency();
    }

    #[test]
    fn touched_reloadable_object_goes_to_swap_for_good()
    {
        let mut cache = context(small_config());
        let objnum = cache.reserve(64, LoadHandle(1)).unwrap();
        let mut load = |_: LoadHandle, bytes: &mut [u8]| -> io::Result<()> {
            bytes.fill(0);
            Ok(())
        };

        cache.lock_with(objnum, Some(&mut load)).unwrap();
        cache.bytes_mut(objnum).unwrap()[0] = 7;
        cache.unlock(objnum).unwrap();
        assert!(!cache.flags(objnum).unwrap().contains(ObjFlags::NODISC));

        assert!(cache.make_room(1).unwrap());
        assert!(cache.flags(objnum).unwrap().contains(ObjFlags::NODISC));

        // Swap is the only source now; the load callback is not needed.
        cache.lock(objnum).unwrap();
        assert_eq!(cache.bytes(objnum).unwrap()[0], 7);

        // Evicting the unmodified copy again writes nothing.
        cache.unlock(objnum).unwrap();
        assert!(cache.make_room(1).unwrap());
        assert_eq!(cache.swap().stats().writes, 1);
        assert!(cache.flags(objnum).unwrap().contains(ObjFlags::NODISC));
    }

    #[test]
    fn failed_load_leaves_no_trace()
    {
        let mut cache = context(small_config());
        let objnum = cache.reserve(64, LoadHandle(1)).unwrap();
        let before = cache.stats();

        let mut load = |_: LoadHandle, _: &mut [u8]| -> io::Result<()> {
            Err(io::Error::new(io::ErrorKind::NotFound, "gone"))
        };
        let result = cache.lock_with(objnum, Some(&mut load));
        assert!(matches!(result, Err(Error::Load(n, _)) if n == objnum));
        assert!(matches!(cache.lock(objnum), Err(Error::LoadSourceMissing(_))));

        assert!(!cache.is_present(objnum).unwrap());
        assert_eq!(cache.stats().locked_objects, before.locked_objects);
        cache.compact();
        assert_eq!(cache.stats().free_bytes, before.free_bytes);
        cache.check_consistency();
    }

    #[test]
    fn locked_objects_cannot_be_freed()
    {
        let mut cache = context(small_config());
        let objnum = cache.alloc(10).unwrap();
        assert!(matches!(cache.free(objnum), Err(Error::LockedObjectFreed(_))));
        cache.unlock(objnum).unwrap();
        assert!(matches!(cache.unlock(objnum), Err(Error::NotLocked(_))));
        cache.free(objnum).unwrap();
        assert!(matches!(cache.lock(objnum), Err(Error::InvalidObject(_))));
        assert!(matches!(cache.lock(0), Err(Error::InvalidObject(0))));
        cache.check_consistency();
    }

    #[test]
    fn freeing_swapped_object_releases_its_segment()
    {
        let mut cache = context(small_config());
        let objnum = cache.alloc(100).unwrap();
        cache.unlock(objnum).unwrap();
        cache.make_room(1).unwrap();
        assert_eq!(cache.swap().stats().segments_in_use, 1);
        cache.free(objnum).unwrap();
        assert_eq!(cache.swap().stats().segments_in_use, 0);
        cache.check_consistency();
    }

    #[test]
    fn realloc_shrinks_in_place()
    {
        let mut cache = context(small_config());
        let objnum = cache.alloc(1000).unwrap();
        let ptr = cache.block_ptr(objnum);
        cache.realloc(objnum, 100).unwrap();
        assert_eq!(cache.object_size(objnum).unwrap(), 100);
        assert_eq!(cache.block_ptr(objnum), ptr);
        cache.check_consistency();
    }

    #[test]
    fn realloc_annexes_following_free_block()
    {
        let mut cache = context(small_config());
        let objnum = cache.alloc(100).unwrap();
        fill(&mut cache, objnum, 3);
        let ptr = cache.block_ptr(objnum);

        cache.realloc(objnum, 500).unwrap();
        assert_eq!(cache.block_ptr(objnum), ptr);
        assert_eq!(cache.object_size(objnum).unwrap(), 500);
        assert!(cache.bytes(objnum).unwrap()[.. 100].iter().all(|&x| x == 3));
        cache.check_consistency();
    }

    #[test]
    fn realloc_moves_when_boxed_in()
    {
        let mut cache = context(small_config());
        let objnum = cache.alloc(100).unwrap();
        let _wall = cache.alloc(10).unwrap();
        fill(&mut cache, objnum, 4);
        let ptr = cache.block_ptr(objnum);

        cache.lock(objnum).unwrap();
        assert!(matches!(cache.realloc(objnum, 500),
                         Err(Error::ReallocMultipleLocks(_))));
        cache.unlock(objnum).unwrap();

        cache.realloc(objnum, 500).unwrap();
        assert_ne!(cache.block_ptr(objnum), ptr);
        assert_eq!(cache.object_size(objnum).unwrap(), 500);
        assert!(cache.bytes(objnum).unwrap()[.. 100].iter().all(|&x| x == 4));
        cache.check_consistency();
    }

    #[test]
    fn realloc_can_move_to_another_chunk()
    {
        let mut cache = context(small_config());
        let objnum = cache.alloc(100).unwrap();
        let _wall = cache.alloc(10).unwrap();
        fill(&mut cache, objnum, 6);

        let max = cache.max_object_size();
        cache.realloc(objnum, max).unwrap();
        assert_eq!(cache.block_ptr(objnum).map(|ptr| ptr.chunk), Some(1));
        assert!(cache.bytes(objnum).unwrap()[.. 100].iter().all(|&x| x == 6));
        cache.check_consistency();
    }

    #[test]
    fn revert_requests()
    {
        let mut cache = context(small_config());
        let objnum = cache.alloc(10).unwrap();
        assert!(cache.request_revert(objnum).unwrap());

        cache.unlock(objnum).unwrap();
        cache.make_room(1).unwrap();
        assert!(!cache.request_revert(objnum).unwrap());
        assert!(cache.lock_with(objnum, None).unwrap());
        cache.unlock(objnum).unwrap();
        assert!(!cache.lock_with(objnum, None).unwrap());
    }
}
