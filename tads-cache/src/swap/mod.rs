//! Swap manager.
//!
//! Objects evicted from memory that cannot simply be dropped are written to
//! a swap store. The store is a sequence of segments, one per swapped object.
//! A [`SwapHandle`] names a segment by its index in the segment table,
//! so segments can move within the store without invalidating handles.
//!
//! A segment stays assigned to its object after the object is swapped back in.
//! If the object is evicted again without having been modified,
//! the copy in the store is still good and nothing needs to be written.

pub use self::store::*;

use {crate::ObjNum, std::io, thiserror::Error};

mod store;

/// Names a segment of the swap store.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub struct SwapHandle(u32);

/// Returned when swapping fails.
#[allow(missing_docs)]
#[derive(Debug, Error)]
pub enum SwapError
{
    #[error("Swapping is disabled")]
    Disabled,

    #[error("Swap file is full")]
    Full,

    #[error("Invalid swap handle")]
    BadHandle,

    #[error("{0}")]
    Io(#[from] io::Error),
}

/// Counters describing swap activity.
#[allow(missing_docs)]
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct SwapStats
{
    pub writes: u64,
    pub reads: u64,
    pub segments_in_use: usize,
    pub file_size: u64,
}

struct Segment
{
    offset: u64,

    /// Room in the store; at least the size of what was written.
    capacity: usize,

    owner: ObjNum,
    in_use: bool,
}

/// Keeps evicted objects in a swap store.
pub struct SwapManager
{
    store: Option<Box<dyn SwapStore>>,
    segments: Vec<Segment>,

    /// End of the last segment; the logical size of the store.
    end: u64,

    budget: u64,
    stats: SwapStats,
}

impl SwapManager
{
    /// Swap manager that refuses to swap.
    ///
    /// Only objects that can be reloaded from their original source
    /// can then be evicted.
    pub fn disabled() -> Self
    {
        Self{
            store: None,
            segments: Vec::new(),
            end: 0,
            budget: 0,
            stats: SwapStats::default(),
        }
    }

    /// Swap manager that keeps at most `budget` bytes in `store`.
    pub fn new(store: Box<dyn SwapStore>, budget: Option<u64>) -> Self
    {
        Self{
            store: Some(store),
            budget: budget.unwrap_or(u64::MAX),
            ..Self::disabled()
        }
    }

    /// Whether there is a store to swap to.
    pub fn is_enabled(&self) -> bool
    {
        self.store.is_some()
    }

    /// Counters describing swap activity so far.
    pub fn stats(&self) -> SwapStats
    {
        SwapStats{
            segments_in_use: self.segments.iter().filter(|s| s.in_use).count(),
            file_size: self.end,
            ..self.stats
        }
    }

    /// Whether a segment currently belongs to the given object.
    pub fn holds(&self, objnum: ObjNum) -> bool
    {
        self.segments.iter().any(|s| s.in_use && s.owner == objnum)
    }

    /// Write an object's bytes to the store.
    ///
    /// `previous` is the object's handle from an earlier swap-out, if any.
    /// Its segment is reused when it is big enough;
    /// if in addition the object is not `dirty`, the store already holds
    /// these exact bytes and nothing is written.
    pub fn swap_out(
        &mut self,
        objnum:   ObjNum,
        data:     &[u8],
        previous: Option<SwapHandle>,
        dirty:    bool,
    ) -> Result<SwapHandle, SwapError>
    {
        if self.store.is_none() {
            return Err(SwapError::Disabled);
        }

        if let Some(handle) = previous {
            let segment = self.segment(handle)?;
            if segment.owner == objnum && segment.capacity >= data.len() {
                if dirty {
                    let offset = segment.offset;
                    self.write(offset, data)?;
                }
                log::trace!("swapped out object {} into its old segment", objnum);
                return Ok(handle);
            }
        }

        // The previous segment stays assigned until the new one is written,
        // so on failure the caller's handle is still good.
        let index = match self.find_released(data.len()) {
            Some(index) => index,
            None => self.append(data.len())?,
        };

        let offset = self.segments[index].offset;
        self.write(offset, data)?;
        let segment = &mut self.segments[index];
        segment.owner = objnum;
        segment.in_use = true;

        if let Some(handle) = previous {
            self.release(handle);
        }

        log::trace!("swapped out object {} ({} bytes) at {}",
                    objnum, data.len(), offset);

        let index = u32::try_from(index).map_err(|_| SwapError::Full)?;
        Ok(SwapHandle(index))
    }

    /// Read an object's bytes back from the store.
    pub fn swap_in(&mut self, handle: SwapHandle, dest: &mut [u8])
        -> Result<(), SwapError>
    {
        let segment = self.segment(handle)?;
        if dest.len() > segment.capacity {
            return Err(SwapError::BadHandle);
        }
        let offset = segment.offset;

        let store = self.store.as_mut().ok_or(SwapError::Disabled)?;
        store.read_at(offset, dest)?;
        self.stats.reads += 1;
        Ok(())
    }

    /// Give up a segment; its object no longer needs it.
    pub fn release(&mut self, handle: SwapHandle)
    {
        if let Some(segment) = self.segments.get_mut(handle.0 as usize) {
            segment.in_use = false;
        }
    }

    /// Move all segments in use to the start of the store,
    /// and shrink the store to fit.
    pub fn compact(&mut self) -> Result<(), SwapError>
    {
        let Some(store) = self.store.as_mut() else { return Ok(()) };

        let mut order: Vec<usize> =
            (0 .. self.segments.len())
            .filter(|&i| self.segments[i].in_use)
            .collect();
        order.sort_by_key(|&i| self.segments[i].offset);

        let mut end = 0;
        let mut buf = Vec::new();
        for i in order {
            let segment = &mut self.segments[i];
            if segment.offset != end {
                buf.resize(segment.capacity, 0);
                store.read_at(segment.offset, &mut buf)?;
                store.write_at(end, &buf)?;
                segment.offset = end;
            }
            end += segment.capacity as u64;
        }

        // Released segments keep their table slots but lose their room.
        for segment in self.segments.iter_mut().filter(|s| !s.in_use) {
            segment.offset = end;
            segment.capacity = 0;
        }

        log::debug!("compacted swap file from {} to {} bytes", self.end, end);

        store.set_len(end)?;
        self.end = end;
        Ok(())
    }

    fn segment(&self, handle: SwapHandle) -> Result<&Segment, SwapError>
    {
        self.segments.get(handle.0 as usize)
            .filter(|s| s.in_use)
            .ok_or(SwapError::BadHandle)
    }

    /// Best-fitting released segment with room for `len` bytes.
    fn find_released(&self, len: usize) -> Option<usize>
    {
        self.segments.iter()
            .enumerate()
            .filter(|(_, s)| !s.in_use && s.capacity >= len)
            .min_by_key(|(_, s)| s.capacity)
            .map(|(i, _)| i)
    }

    /// Make a new segment at the end of the store.
    fn append(&mut self, len: usize) -> Result<usize, SwapError>
    {
        if self.end + len as u64 > self.budget {
            self.compact()?;
            if self.end + len as u64 > self.budget {
                return Err(SwapError::Full);
            }
        }

        let segment = Segment{
            offset: self.end,
            capacity: len,
            owner: 0,
            in_use: false,
        };
        self.end += len as u64;

        // Reuse a table slot that lost its room to compaction.
        let slot = self.segments.iter()
            .position(|s| !s.in_use && s.capacity == 0);
        match slot {
            Some(i) => { self.segments[i] = segment; Ok(i) },
            None    => { self.segments.push(segment); Ok(self.segments.len() - 1) },
        }
    }

    fn write(&mut self, offset: u64, data: &[u8]) -> Result<(), SwapError>
    {
        let store = self.store.as_mut().ok_or(SwapError::Disabled)?;
        store.write_at(offset, data)?;
        self.stats.writes += 1;
        Ok(())
    }
}
