//! Layout of heap chunks.
//!
//! A chunk is a fixed-size byte region cut into a chain of blocks.
//! Each block is an object number header followed by the block's data.
//! The chunk ends with a header holding [`OBJNUM_INVALID`].
//!
//! ```text
//! | start | hdr | data ......... | hdr | data ... | hdr | data ..... | INVALID |
//! ```
//!
//! The header lets code that walks a chunk find the descriptor of each block.
//! The descriptor in turn records where the data starts and how long it is,
//! so the next header is found by skipping over the data.
//! Nothing else about blocks is stored inside the chunk.

use {
    crate::{ObjNum, OBJNUM_INVALID, PAGE_SIZE},
    std::mem::size_of,
};

/// Number of bytes taken by a block header.
pub const HEADER_SIZE: usize = size_of::<ObjNum>();

/// Block sizes are multiples of this, so headers stay aligned.
pub const OBJECT_ALIGN: usize = 2;

/// Bytes accounted for one object descriptor.
///
/// Page 0 of the descriptor table is carved from the first chunk,
/// and this is how much room each of its descriptors takes there.
pub const DESCRIPTOR_BYTES: usize = 16;

/// Size of the block that holds descriptor page 0.
pub const PAGE_BYTES: usize = PAGE_SIZE * DESCRIPTOR_BYTES;

// Bookkeeping at the start of the first chunk, before any block.
const CONTEXT_BYTES:      usize = 64;
const PAGE_POINTER_BYTES: usize = size_of::<usize>();
const HEAP_LINK_BYTES:    usize = size_of::<usize>();

/// Location of a block's data.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct BlockPtr
{
    /// Index of the chunk in the heap chain.
    pub chunk: usize,

    /// Offset of the first data byte within the chunk.
    /// The block header lives right before it.
    pub offset: usize,
}

impl BlockPtr
{
    /// Offset of the block header within the chunk.
    pub fn header(self) -> usize
    {
        self.offset - HEADER_SIZE
    }
}

/// Heap chunk.
pub struct Chunk
{
    pub mem: Box<[u8]>,

    /// Offset of the first block header.
    ///
    /// Non-zero only for the first chunk,
    /// which begins with the context's own bookkeeping.
    pub start: usize,
}

impl Chunk
{
    /// Read the block header at `at`.
    pub fn header(&self, at: usize) -> ObjNum
    {
        ObjNum::from_le_bytes([self.mem[at], self.mem[at + 1]])
    }

    /// Write the block header at `at`.
    pub fn set_header(&mut self, at: usize, objnum: ObjNum)
    {
        self.mem[at .. at + HEADER_SIZE].copy_from_slice(&objnum.to_le_bytes());
    }

    /// Write the end-of-chunk marker.
    pub fn terminate(&mut self)
    {
        let at = self.mem.len() - HEADER_SIZE;
        self.set_header(at, OBJNUM_INVALID);
    }

    /// The data bytes of a block in this chunk.
    pub fn data(&self, ptr: BlockPtr, len: usize) -> &[u8]
    {
        &self.mem[ptr.offset .. ptr.offset + len]
    }

    /// The data bytes of a block in this chunk.
    pub fn data_mut(&mut self, ptr: BlockPtr, len: usize) -> &mut [u8]
    {
        &mut self.mem[ptr.offset .. ptr.offset + len]
    }
}

/// Round a requested object size up to a block size.
///
/// Zero-sized objects still get a block of [`OBJECT_ALIGN`] bytes.
pub fn block_size(size: usize) -> Option<usize>
{
    let size = size.max(1).checked_add(OBJECT_ALIGN - 1)?;
    Some(size & !(OBJECT_ALIGN - 1))
}

/// Largest block a chunk of `chunk_size` bytes can hold.
pub fn max_block_size(chunk_size: usize) -> usize
{
    chunk_size - 2 * HEADER_SIZE
}

/// Bytes at the start of the first chunk taken by the context itself:
/// the context record, the page pointer table, and the heap chain head.
pub fn bootstrap_overhead(max_pages: usize) -> usize
{
    let bytes = CONTEXT_BYTES + max_pages * PAGE_POINTER_BYTES + HEAP_LINK_BYTES;
    next_multiple_of_power_of_two(bytes, OBJECT_ALIGN)
}

/// Round up `lhs` to the next multiple of `rhs`, which must be a power of two.
pub fn next_multiple_of_power_of_two(lhs: usize, rhs: usize) -> usize
{
    (lhs + rhs - 1) & !(rhs - 1)
}
