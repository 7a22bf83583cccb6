//! The global cache context.
//!
//! # Descriptors
//!
//! Every object number has a [descriptor][`Descriptor`].
//! Descriptors live in pages of [`PAGE_SIZE`] entries,
//! which are allocated as object numbers are consumed.
//! A descriptor is always in exactly one of these states:
//!
//!  - _Unused_: describes nothing; on the unused list.
//!  - _Free_: describes a free block; on the free list.
//!  - _Present and unlocked_: object bytes in memory; on the LRU list.
//!  - _Present and locked_: object bytes in memory; on no list.
//!  - _Absent_: object bytes swapped out, discarded, or not yet loaded.
//!
//! All three lists thread through the `next` and `prev` fields
//! of the descriptors, so a descriptor is on at most one list.
//!
//! # Memory
//!
//! Memory comes in fixed-size chunks, laid out as described in
//! [`crate::chunk`]. The first chunk begins with the context's
//! bookkeeping and descriptor page 0, which is object 0.
//! The rest of the first chunk starts out as free block 1.
//!
//! Allocation takes the best-fitting free block and splits off what it
//! does not need. When no block fits, a chunk is added, as long as the byte
//! budget allows. After that, the [compactor][`GlobalContext::compact`]
//! and the [evictor][`GlobalContext::make_room`] take turns
//! until the allocation succeeds or neither can do anything more.

pub use self::{descriptor::*, object::LoadFn};

use {
    crate::{
        Config,
        Error,
        OBJNUM_INVALID,
        ObjNum,
        PAGE_SIZE,
        Result,
        SwapManager,
        SwapStats,
        chunk::{
            BlockPtr, Chunk, HEADER_SIZE, PAGE_BYTES,
            bootstrap_overhead, max_block_size,
        },
        heap::RawHeap,
        objnum::page_index,
    },
};

mod alloc;
mod compact;
mod descriptor;
mod evict;
mod object;

/// Snapshot of cache occupancy.
#[allow(missing_docs)]
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct Stats
{
    pub chunks: usize,
    pub free_blocks: usize,
    pub free_bytes: usize,
    pub lru_objects: usize,
    pub locked_objects: usize,
    pub absent_objects: usize,
    pub budget_left: usize,
    pub swap: SwapStats,
}

/// Lists threaded through descriptors.
#[derive(Clone, Copy, Eq, PartialEq)]
enum List
{
    Free,
    Lru,
}

/// Owner of all cache memory and all object descriptors.
pub struct GlobalContext
{
    config: Config,
    heap: RawHeap,

    /// The heap chain. Chunks are only ever appended.
    chunks: Vec<Chunk>,

    /// Descriptor pages; object number `n` lives in `pages[n >> PAGE_SHIFT]`.
    pages: Vec<Box<[Descriptor]>>,

    free_head: ObjNum,

    /// Least recently used end of the LRU list, where eviction starts.
    lru_head: ObjNum,

    /// Most recently used end of the LRU list.
    mru_head: ObjNum,

    unused_head: ObjNum,

    /// Bytes of chunks that may still be allocated.
    budget: usize,

    swap: SwapManager,
}

impl GlobalContext
{
    /// Set up a context with one chunk.
    ///
    /// The chunk counts against `config.max_bytes`,
    /// which is raised to one chunk if it is smaller.
    pub fn new(config: Config, swap: SwapManager) -> Result<Self>
    {
        config.validate()?;

        let chunk_size = config.chunk_size;
        let max_bytes = config.max_bytes.max(chunk_size);

        let mut heap = RawHeap::new();
        let mem = heap.allocate(chunk_size, 0u8, "first heap chunk")?;
        let page = match heap.allocate(PAGE_SIZE, Descriptor::UNUSED, "descriptor page") {
            Ok(page) => page,
            Err(err) => { heap.free(mem); return Err(err); },
        };

        let start = bootstrap_overhead(config.max_pages);
        let mut chunk = Chunk{mem, start};
        chunk.terminate();

        let mut this = Self{
            config,
            heap,
            chunks: vec![chunk],
            pages: vec![page],
            free_head: OBJNUM_INVALID,
            lru_head: OBJNUM_INVALID,
            mru_head: OBJNUM_INVALID,
            unused_head: OBJNUM_INVALID,
            budget: max_bytes - chunk_size,
            swap,
        };

        // Object 0 is the block holding descriptor page 0.
        // It never moves and never leaves memory.
        let page_ptr = BlockPtr{chunk: 0, offset: start + HEADER_SIZE};
        this.chunks[0].set_header(page_ptr.header(), 0);
        *this.desc_mut(0) = Descriptor{
            flags: ObjFlags::PAGE | ObjFlags::NOSWAP | ObjFlags::NODISC
                 | ObjFlags::PRESENT | ObjFlags::LOCKED,
            size: PAGE_BYTES,
            ptr: Some(page_ptr),
            locks: 1,
            ..Descriptor::UNUSED
        };

        // Object 1 is the rest of the chunk.
        let rest_ptr = BlockPtr{chunk: 0, offset: page_ptr.offset + PAGE_BYTES + HEADER_SIZE};
        let rest_size = chunk_size - rest_ptr.offset - HEADER_SIZE;
        this.chunks[0].set_header(rest_ptr.header(), 1);
        *this.desc_mut(1) = Descriptor::free_block(rest_size, rest_ptr);
        this.link_free(1);

        for objnum in (2 .. PAGE_SIZE).rev() {
            this.put_unused(objnum as ObjNum);
        }

        log::debug!("cache initialized: {} byte chunks, {} bytes of budget left",
                    chunk_size, this.budget);

        Ok(this)
    }

    /// The configuration the context was created with.
    pub fn config(&self) -> &Config
    {
        &self.config
    }

    /// The swap manager.
    pub fn swap(&self) -> &SwapManager
    {
        &self.swap
    }

    /// Largest object that can be allocated.
    pub fn max_object_size(&self) -> usize
    {
        max_block_size(self.config.chunk_size)
    }

    /// Snapshot of cache occupancy.
    pub fn stats(&self) -> Stats
    {
        let mut stats = Stats{
            chunks: self.chunks.len(),
            budget_left: self.budget,
            swap: self.swap.stats(),
            ..Stats::default()
        };
        for desc in self.pages.iter().flat_map(|page| page.iter()) {
            let flags = desc.flags;
            if flags.contains(ObjFlags::FREE) {
                stats.free_blocks += 1;
                stats.free_bytes += desc.size;
            } else if flags.contains(ObjFlags::UNUSED) {
                // Nothing to count.
            } else if !flags.contains(ObjFlags::PRESENT) {
                stats.absent_objects += 1;
            } else if flags.contains(ObjFlags::LOCKED) {
                stats.locked_objects += 1;
            } else {
                stats.lru_objects += 1;
            }
        }
        stats
    }

    /// Objects on the LRU list, least recently used first.
    pub fn lru_order(&self) -> Vec<ObjNum>
    {
        let mut order = Vec::new();
        let mut objnum = self.lru_head;
        while objnum != OBJNUM_INVALID {
            order.push(objnum);
            objnum = self.desc(objnum).next;
        }
        order
    }

    /// Free blocks with their sizes, in free list order.
    pub fn free_blocks(&self) -> Vec<(ObjNum, usize)>
    {
        let mut blocks = Vec::new();
        let mut objnum = self.free_head;
        while objnum != OBJNUM_INVALID {
            let desc = self.desc(objnum);
            blocks.push((objnum, desc.size));
            objnum = desc.next;
        }
        blocks
    }

    /* ---------------------------------------------------------------------- */
    /*                               Descriptors                              */
    /* ---------------------------------------------------------------------- */

    /// Descriptor of an object number that is known to exist.
    fn desc(&self, objnum: ObjNum) -> &Descriptor
    {
        let (page, index) = page_index(objnum);
        &self.pages[page][index]
    }

    fn desc_mut(&mut self, objnum: ObjNum) -> &mut Descriptor
    {
        let (page, index) = page_index(objnum);
        &mut self.pages[page][index]
    }

    /// Descriptor of an object supplied by a caller.
    ///
    /// Fails unless the number names an allocated or reserved object.
    fn object(&self, objnum: ObjNum) -> Result<&Descriptor>
    {
        let (page, index) = page_index(objnum);
        self.pages.get(page)
            .map(|page| &page[index])
            .filter(|desc| !desc.flags.intersects(ObjFlags::FREE | ObjFlags::UNUSED | ObjFlags::PAGE))
            .ok_or(Error::InvalidObject(objnum))
    }

    /// Take a descriptor from the unused list.
    ///
    /// A new descriptor page is allocated if the list is empty.
    /// The descriptor is returned still flagged unused;
    /// the caller overwrites it.
    fn get_unused(&mut self) -> Result<ObjNum>
    {
        if self.unused_head == OBJNUM_INVALID {
            self.add_page()?;
        }
        let objnum = self.unused_head;
        self.unused_head = self.desc(objnum).next;
        self.desc_mut(objnum).next = OBJNUM_INVALID;
        Ok(objnum)
    }

    /// Return a descriptor to the unused list.
    fn put_unused(&mut self, objnum: ObjNum)
    {
        let next = self.unused_head;
        *self.desc_mut(objnum) = Descriptor{next, ..Descriptor::UNUSED};
        self.unused_head = objnum;
    }

    /// Allocate another descriptor page.
    ///
    /// Pages come from the raw heap rather than the cache,
    /// because cache allocation may itself need a descriptor.
    fn add_page(&mut self) -> Result<()>
    {
        if self.pages.len() >= self.config.max_pages {
            return Err(Error::NoMoreHeaders);
        }

        let page = self.heap.allocate(PAGE_SIZE, Descriptor::UNUSED, "descriptor page")?;
        let base = self.pages.len() * PAGE_SIZE;
        self.pages.push(page);
        for objnum in (base .. base + PAGE_SIZE).rev() {
            self.put_unused(objnum as ObjNum);
        }

        log::debug!("added descriptor page {}", self.pages.len() - 1);
        Ok(())
    }

    /* ---------------------------------------------------------------------- */
    /*                                  Lists                                 */
    /* ---------------------------------------------------------------------- */

    /// Push a free block onto the free list.
    fn link_free(&mut self, objnum: ObjNum)
    {
        let next = self.free_head;
        if next != OBJNUM_INVALID {
            self.desc_mut(next).prev = objnum;
        }
        let desc = self.desc_mut(objnum);
        desc.next = next;
        desc.prev = OBJNUM_INVALID;
        self.free_head = objnum;
    }

    /// Append an unlocked object at the most recently used end.
    fn link_mru(&mut self, objnum: ObjNum)
    {
        let prev = self.mru_head;
        if prev == OBJNUM_INVALID {
            self.lru_head = objnum;
        } else {
            self.desc_mut(prev).next = objnum;
        }
        let desc = self.desc_mut(objnum);
        desc.prev = prev;
        desc.next = OBJNUM_INVALID;
        desc.flags.insert(ObjFlags::LRU);
        self.mru_head = objnum;
    }

    fn unlink(&mut self, objnum: ObjNum, list: List)
    {
        let Descriptor{next, prev, ..} = *self.desc(objnum);

        if prev == OBJNUM_INVALID {
            match list {
                List::Free => self.free_head = next,
                List::Lru  => self.lru_head = next,
            }
        } else {
            self.desc_mut(prev).next = next;
        }

        if next == OBJNUM_INVALID {
            if list == List::Lru {
                self.mru_head = prev;
            }
        } else {
            self.desc_mut(next).prev = prev;
        }

        let desc = self.desc_mut(objnum);
        desc.next = OBJNUM_INVALID;
        desc.prev = OBJNUM_INVALID;
        if list == List::Lru {
            desc.flags.remove(ObjFlags::LRU);
        }
    }

    /* ---------------------------------------------------------------------- */
    /*                                 Blocks                                 */
    /* ---------------------------------------------------------------------- */

    /// Header offset of the block after the one whose header is at `at`.
    fn block_end(&self, chunk: usize, at: usize) -> usize
    {
        let objnum = self.chunks[chunk].header(at);
        at + HEADER_SIZE + self.desc(objnum).size
    }

    /// Point a descriptor at a block and the block's header at the descriptor.
    fn place(&mut self, objnum: ObjNum, ptr: BlockPtr)
    {
        self.chunks[ptr.chunk].set_header(ptr.header(), objnum);
        self.desc_mut(objnum).ptr = Some(ptr);
    }

    /// Location of an object's block, for tests.
    #[cfg(test)]
    fn block_ptr(&self, objnum: ObjNum) -> Option<BlockPtr>
    {
        self.desc(objnum).ptr
    }

    /// Walk every chunk and list, and check that they agree.
    #[cfg(test)]
    fn check_consistency(&self)
    {
        use std::collections::HashSet;

        let mut seen_free = HashSet::new();
        let mut seen_lru = HashSet::new();

        for (index, chunk) in self.chunks.iter().enumerate() {
            let mut at = chunk.start;
            loop {
                let objnum = chunk.header(at);
                if objnum == OBJNUM_INVALID {
                    assert_eq!(at, chunk.mem.len() - HEADER_SIZE,
                               "end marker in the middle of chunk {index}");
                    break;
                }
                let desc = self.desc(objnum);
                let ptr = BlockPtr{chunk: index, offset: at + HEADER_SIZE};
                assert_eq!(desc.ptr, Some(ptr), "object {objnum} misplaced");
                assert!(desc.flags.contains(ObjFlags::FREE)
                        || desc.flags.contains(ObjFlags::PRESENT),
                        "block {objnum} is neither free nor present");
                if desc.flags.contains(ObjFlags::FREE) {
                    seen_free.insert(objnum);
                } else if !desc.flags.contains(ObjFlags::LOCKED) {
                    seen_lru.insert(objnum);
                } else {
                    assert!(desc.locks > 0);
                }
                at += HEADER_SIZE + desc.size;
            }
        }

        let free: HashSet<_> = self.free_blocks().into_iter().map(|(n, _)| n).collect();
        assert_eq!(free, seen_free, "free list disagrees with chunks");

        let lru = self.lru_order();
        for &objnum in &lru {
            assert!(self.desc(objnum).flags.contains(ObjFlags::LRU));
        }
        let lru: HashSet<_> = lru.into_iter().collect();
        assert_eq!(lru, seen_lru, "LRU list disagrees with chunks");
    }
}

impl Drop for GlobalContext
{
    fn drop(&mut self)
    {
        for chunk in self.chunks.drain(..) {
            self.heap.free(chunk.mem);
        }
        for page in self.pages.drain(..) {
            self.heap.free(page);
        }
        debug_assert!(matches!(self.heap.allocated(), None | Some(0)),
                      "raw heap leaked");
    }
}

#[cfg(test)]
pub (crate) mod tests;
