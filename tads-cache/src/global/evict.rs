use {
    super::{Descriptor, GlobalContext, List, ObjFlags},
    crate::{OBJNUM_INVALID, ObjNum, Result, SwapError},
};

impl GlobalContext
{
    /// Evict unlocked objects until `target` bytes have been freed.
    ///
    /// The LRU list is searched from its least recently used end, first for
    /// a single object of at least `target` bytes, then for any objects at
    /// all. Returns whether anything was evicted.
    pub fn make_room(&mut self, target: usize) -> Result<bool>
    {
        let mut objnum = self.lru_head;
        while objnum != OBJNUM_INVALID {
            let Descriptor{next, size, ..} = *self.desc(objnum);
            if size >= target && self.evictable(objnum) && self.toss(objnum)? {
                log::debug!("evicted object {} ({} bytes)", objnum, size);
                return Ok(true);
            }
            objnum = next;
        }

        let mut freed = 0;
        let mut evicted = 0;
        let mut objnum = self.lru_head;
        while objnum != OBJNUM_INVALID && freed < target {
            let Descriptor{next, size, ..} = *self.desc(objnum);
            if self.evictable(objnum) && self.toss(objnum)? {
                freed += size;
                evicted += 1;
            }
            objnum = next;
        }

        log::debug!("evicted {} objects ({} bytes) for {} bytes",
                    evicted, freed, target);
        Ok(evicted > 0)
    }

    fn evictable(&self, objnum: ObjNum) -> bool
    {
        let desc = self.desc(objnum);
        let pinned = ObjFlags::LOCKED | ObjFlags::NOSWAP | ObjFlags::PAGE;
        desc.flags.contains(ObjFlags::PRESENT)
            && !desc.flags.intersects(pinned)
            && (desc.needs_swap() || desc.load.is_some())
    }

    /// Remove an unlocked object from memory.
    ///
    /// Objects that cannot be reloaded from their load source are written
    /// to swap first. Returns false if that is not possible right now.
    fn toss(&mut self, objnum: ObjNum) -> Result<bool>
    {
        let desc = *self.desc(objnum);
        let Some(ptr) = desc.ptr else { return Ok(false) };

        let free = self.get_unused()?;

        if desc.needs_swap() {
            let data = self.chunks[ptr.chunk].data(ptr, desc.size);
            let dirty = desc.flags.contains(ObjFlags::DIRTY);
            match self.swap.swap_out(objnum, data, desc.swap, dirty) {
                Ok(handle) => {
                    let desc = self.desc_mut(objnum);
                    desc.swap = Some(handle);
                    desc.flags.remove(ObjFlags::DIRTY);
                    desc.flags.insert(ObjFlags::NODISC);
                },
                Err(SwapError::Disabled | SwapError::Full) => {
                    self.put_unused(free);
                    return Ok(false);
                },
                Err(err) => {
                    self.put_unused(free);
                    return Err(err.into());
                },
            }
        }

        self.unlink(objnum, List::Lru);
        let tossed = self.desc_mut(objnum);
        tossed.flags.remove(ObjFlags::PRESENT);
        tossed.ptr = None;

        *self.desc_mut(free) = Descriptor::free_block(desc.size, ptr);
        self.place(free, ptr);
        self.link_free(free);

        log::trace!("tossed object {}, leaving free block {}", objnum, free);
        Ok(true)
    }
}

#[cfg(test)]
mod tests
{
    use {
        crate::{
            GlobalContext, LoadHandle, MemorySwap, SwapManager,
            global::tests::{context, fill, small_config},
        },
        std::io,
    };

    #[test]
    fn evicts_least_recently_used_first()
    {
        let mut cache = context(small_config());
        let a = cache.alloc(100).unwrap();
        let b = cache.alloc(100).unwrap();
        let c = cache.alloc(100).unwrap();
        for objnum in [a, b, c] {
            cache.unlock(objnum).unwrap();
        }
        assert_eq!(cache.lru_order(), [a, b, c]);

        for expected in [a, b, c] {
            assert!(cache.make_room(10).unwrap());
            assert!(!cache.is_present(expected).unwrap());
        }
        assert!(!cache.make_room(10).unwrap());
        cache.check_consistency();
    }

    #[test]
    fn use_moves_object_to_most_recent()
    {
        let mut cache = context(small_config());
        let a = cache.alloc(10).unwrap();
        let b = cache.alloc(10).unwrap();
        let c = cache.alloc(10).unwrap();
        for objnum in [a, b, c] {
            cache.unlock(objnum).unwrap();
        }
        cache.use_object(a).unwrap();
        assert_eq!(cache.lru_order(), [b, c, a]);

        assert!(cache.make_room(10).unwrap());
        assert!(!cache.is_present(b).unwrap());
        assert!(cache.is_present(a).unwrap());
    }

    #[test]
    fn prefers_a_single_object_big_enough()
    {
        let mut cache = context(small_config());
        let small = cache.alloc(10).unwrap();
        let big = cache.alloc(500).unwrap();
        cache.unlock(small).unwrap();
        cache.unlock(big).unwrap();

        assert!(cache.make_room(400).unwrap());
        assert!(cache.is_present(small).unwrap());
        assert!(!cache.is_present(big).unwrap());
    }

    #[test]
    fn pinned_objects_are_never_evicted()
    {
        let mut cache = context(small_config());
        let locked = cache.alloc(100).unwrap();
        let pinned = cache.alloc(100).unwrap();
        fill(&mut cache, locked, 0x5A);
        cache.set_no_swap(pinned, true).unwrap();
        cache.unlock(pinned).unwrap();

        let ptr = cache.block_ptr(locked);
        assert!(!cache.make_room(10).unwrap());
        cache.compact();

        assert_eq!(cache.block_ptr(locked), ptr);
        assert!(cache.bytes(locked).unwrap().iter().all(|&x| x == 0x5A));
        assert!(cache.is_present(pinned).unwrap());
        assert_eq!(cache.swap().stats().writes, 0);
        cache.check_consistency();
    }

    #[test]
    fn full_swap_makes_objects_ineligible()
    {
        let config = small_config();
        let swap = SwapManager::new(Box::new(MemorySwap::new()), Some(150));
        let mut cache = GlobalContext::new(config, swap).unwrap();
        let a = cache.alloc(100).unwrap();
        let b = cache.alloc(100).unwrap();
        cache.unlock(a).unwrap();
        cache.unlock(b).unwrap();

        assert!(cache.make_room(10).unwrap());
        assert!(!cache.is_present(a).unwrap());
        assert!(!cache.make_room(10).unwrap());
        assert!(cache.is_present(b).unwrap());
        cache.check_consistency();
    }

    #[test]
    fn grown_object_that_does_not_fit_keeps_its_swap_copy()
    {
        let mut config = small_config();
        config.swap_budget = Some(150);
        let mut cache = context(config);

        let a = cache.alloc(100).unwrap();
        fill(&mut cache, a, 0xA1);
        cache.unlock(a).unwrap();
        assert!(cache.make_room(1).unwrap());
        assert!(!cache.is_present(a).unwrap());

        // Grown past what the swap store can take.
        cache.lock(a).unwrap();
        cache.realloc(a, 200).unwrap();
        cache.unlock(a).unwrap();
        assert!(!cache.make_room(1).unwrap());
        assert!(cache.is_present(a).unwrap());
        assert!(cache.swap().holds(a));

        cache.lock(a).unwrap();
        let b = cache.alloc(50).unwrap();
        fill(&mut cache, b, 0xB2);
        cache.unlock(b).unwrap();
        assert!(cache.make_room(1).unwrap());
        assert!(!cache.is_present(b).unwrap());

        cache.unlock(a).unwrap();
        cache.free(a).unwrap();
        cache.lock(b).unwrap();
        assert!(cache.bytes(b).unwrap().iter().all(|&x| x == 0xB2));
        cache.check_consistency();
    }

    #[test]
    fn without_swap_only_reloadable_objects_go()
    {
        let mut cache = GlobalContext::new(small_config(), SwapManager::disabled()).unwrap();
        let made = cache.alloc(100).unwrap();
        cache.unlock(made).unwrap();
        assert!(!cache.make_room(10).unwrap());

        let loaded = cache.reserve(100, LoadHandle(1)).unwrap();
        let mut load = |_: LoadHandle, bytes: &mut [u8]| -> io::Result<()> {
            bytes.fill(1);
            Ok(())
        };
        cache.lock_with(loaded, Some(&mut load)).unwrap();
        cache.unlock(loaded).unwrap();
        assert!(cache.make_room(10).unwrap());
        assert!(!cache.is_present(loaded).unwrap());
        assert!(cache.is_present(made).unwrap());
    }
}
