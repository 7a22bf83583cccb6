use {
    super::{GlobalContext, List, ObjFlags},
    crate::{
        OBJNUM_INVALID,
        ObjNum,
        chunk::{BlockPtr, HEADER_SIZE},
    },
};

impl GlobalContext
{
    /// Merge free space in every chunk.
    ///
    /// Unlocked objects are slid towards the start of their chunk,
    /// past free blocks, so that adjacent free blocks can be merged.
    /// Locked objects never move; they split a chunk into stretches
    /// that are compacted independently.
    pub fn compact(&mut self)
    {
        let before = self.free_blocks_count();
        for chunk in 0 .. self.chunks.len() {
            self.compact_chunk(chunk);
        }
        log::debug!("compacted heap from {} to {} free blocks",
                    before, self.free_blocks_count());
    }

    fn compact_chunk(&mut self, chunk: usize)
    {
        let start = self.chunks[chunk].start;
        let Some(mut anchor) = self.next_free_from(chunk, start) else { return };
        let mut at = self.block_end(chunk, anchor);

        loop {
            let objnum = self.chunks[chunk].header(at);
            if objnum == OBJNUM_INVALID {
                break;
            }

            let flags = self.desc(objnum).flags;
            if flags.contains(ObjFlags::LOCKED) {
                let past = self.block_end(chunk, at);
                let Some(next) = self.next_free_from(chunk, past) else { break };
                anchor = next;
                at = self.block_end(chunk, anchor);
            } else if flags.contains(ObjFlags::FREE) {
                anchor = self.slide_free(chunk, anchor, at);
                let anchor_objnum = self.chunks[chunk].header(anchor);
                self.consolidate(anchor_objnum, objnum);
                at = self.block_end(chunk, anchor);
            } else {
                at = self.block_end(chunk, at);
            }
        }
    }

    /// Header offset of the first free block at or after `at`.
    fn next_free_from(&self, chunk: usize, mut at: usize) -> Option<usize>
    {
        loop {
            let objnum = self.chunks[chunk].header(at);
            if objnum == OBJNUM_INVALID {
                return None;
            }
            if self.desc(objnum).flags.contains(ObjFlags::FREE) {
                return Some(at);
            }
            at = self.block_end(chunk, at);
        }
    }

    /// Move the blocks between the free block at `free` and offset `until`
    /// down over the free block, so that it ends at `until`.
    ///
    /// Returns the new header offset of the free block.
    fn slide_free(&mut self, chunk: usize, free: usize, until: usize) -> usize
    {
        let free_objnum = self.chunks[chunk].header(free);
        let moved_from = self.block_end(chunk, free);
        if moved_from == until {
            return free;
        }

        self.chunks[chunk].mem.copy_within(moved_from .. until, free);
        let new_free = free + (until - moved_from);

        let mut at = free;
        while at < new_free {
            let objnum = self.chunks[chunk].header(at);
            let ptr = BlockPtr{chunk, offset: at + HEADER_SIZE};
            self.desc_mut(objnum).ptr = Some(ptr);
            log::trace!("moved object {} to chunk {} offset {}", objnum, chunk, ptr.offset);
            at += HEADER_SIZE + self.desc(objnum).size;
        }

        self.place(free_objnum, BlockPtr{chunk, offset: new_free + HEADER_SIZE});
        new_free
    }

    /// Absorb free block `second` into the free block `first` right before it.
    fn consolidate(&mut self, first: ObjNum, second: ObjNum)
    {
        let absorbed = self.desc(second).size + HEADER_SIZE;
        self.unlink(second, List::Free);
        self.put_unused(second);
        self.desc_mut(first).size += absorbed;
    }

    fn free_blocks_count(&self) -> usize
    {
        let mut count = 0;
        let mut objnum = self.free_head;
        while objnum != OBJNUM_INVALID {
            count += 1;
            objnum = self.desc(objnum).next;
        }
        count
    }
}
