use {
    crate::{OBJNUM_INVALID, ObjNum, SwapHandle, chunk::BlockPtr},
    bitflags::bitflags,
};

bitflags!
{
    /// State of an object descriptor.
    pub struct ObjFlags: u16
    {
        /// Modified since it was last loaded or swapped out.
        const DIRTY   = 1 << 0;

        /// The bytes can no longer be recovered from the load source,
        /// so the object must be swapped rather than discarded.
        const NODISC  = 1 << 1;

        /// The bytes are in memory.
        const PRESENT = 1 << 2;

        /// At least one lock is held.
        const LOCKED  = 1 << 3;

        /// On the LRU list.
        const LRU     = 1 << 4;

        /// Holds a descriptor page.
        const PAGE    = 1 << 5;

        /// Must never be evicted.
        const NOSWAP  = 1 << 6;

        /// Describes a free block.
        const FREE    = 1 << 7;

        /// The client asked to revert the object to its load source.
        const REVERT  = 1 << 8;

        /// Describes nothing.
        const UNUSED  = 1 << 9;
    }
}

/// Opaque token a client uses to find an object's original bytes.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub struct LoadHandle(pub u64);

/// Everything the cache knows about one object number.
#[allow(missing_docs)]
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Descriptor
{
    pub flags: ObjFlags,

    /// Usable bytes in the block, or the object size if absent.
    pub size: usize,

    pub (crate) ptr: Option<BlockPtr>,
    pub swap: Option<SwapHandle>,
    pub load: Option<LoadHandle>,
    pub locks: u16,

    /// List links. Meaningful only while on a list.
    pub (crate) next: ObjNum,
    pub (crate) prev: ObjNum,
}

impl Descriptor
{
    /// Descriptor that describes nothing.
    pub const UNUSED: Self = Self{
        flags: ObjFlags::UNUSED,
        size: 0,
        ptr: None,
        swap: None,
        load: None,
        locks: 0,
        next: OBJNUM_INVALID,
        prev: OBJNUM_INVALID,
    };

    /// Descriptor of a free block, not yet on the free list.
    pub (crate) fn free_block(size: usize, ptr: BlockPtr) -> Self
    {
        Self{flags: ObjFlags::FREE, size, ptr: Some(ptr), ..Self::UNUSED}
    }

    /// Whether the object's bytes must be preserved on eviction.
    pub fn needs_swap(&self) -> bool
    {
        self.flags.intersects(ObjFlags::DIRTY | ObjFlags::NODISC)
    }
}
