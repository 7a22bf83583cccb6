use {
    os_ext::{O_CREAT, O_RDWR, O_TRUNC, ftruncate, mkstemp, off_t, open, pread, pwrite, unlink},
    std::{
        io::{self, ErrorKind::{InvalidInput, UnexpectedEof}},
        os::unix::io::{AsFd, OwnedFd},
        path::{Path, PathBuf},
    },
};

/// Byte storage behind a swap manager.
///
/// Reads and writes transfer whole buffers or fail.
pub trait SwapStore
{
    /// Fill `buf` with the bytes at `offset`.
    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> io::Result<()>;

    /// Write all of `buf` at `offset`, extending the store if needed.
    fn write_at(&mut self, offset: u64, buf: &[u8]) -> io::Result<()>;

    /// Truncate or extend the store to `len` bytes.
    fn set_len(&mut self, len: u64) -> io::Result<()>;
}

/// Swap store backed by a file.
///
/// The file is removed when the swap file is dropped;
/// its contents are meaningless outside the process that wrote them.
pub struct SwapFile
{
    fd: OwnedFd,
    path: PathBuf,
}

impl SwapFile
{
    /// Create the swap file at the given path, truncating it if it exists.
    pub fn create(path: &Path) -> io::Result<Self>
    {
        let fd = open(path, O_CREAT | O_RDWR | O_TRUNC, 0o600)?;
        Ok(Self{fd, path: path.to_owned()})
    }

    /// Create a swap file with a fresh name in the given directory.
    pub fn temporary(dir: &Path) -> io::Result<Self>
    {
        let (fd, path) = mkstemp(&dir.join("tads-swap-XXXXXX"))?;
        Ok(Self{fd, path})
    }

    /// Where the swap file lives.
    pub fn path(&self) -> &Path
    {
        &self.path
    }
}

impl SwapStore for SwapFile
{
    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> io::Result<()>
    {
        pread(self.fd.as_fd(), buf, to_off_t(offset)?)
    }

    fn write_at(&mut self, offset: u64, buf: &[u8]) -> io::Result<()>
    {
        pwrite(self.fd.as_fd(), buf, to_off_t(offset)?)
    }

    fn set_len(&mut self, len: u64) -> io::Result<()>
    {
        ftruncate(self.fd.as_fd(), to_off_t(len)?)
    }
}

impl Drop for SwapFile
{
    fn drop(&mut self)
    {
        if let Err(err) = unlink(&self.path) {
            log::warn!("cannot remove swap file {}: {}", self.path.display(), err);
        }
    }
}

fn to_off_t(offset: u64) -> io::Result<off_t>
{
    off_t::try_from(offset).map_err(|_| io::Error::from(InvalidInput))
}

/// Swap store backed by memory.
///
/// Useful where a real file is not wanted,
/// and for inspecting what the cache swaps.
#[derive(Debug, Default)]
pub struct MemorySwap
{
    bytes: Vec<u8>,
}

impl MemorySwap
{
    /// Create an empty store.
    pub fn new() -> Self
    {
        Self::default()
    }
}

impl SwapStore for MemorySwap
{
    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> io::Result<()>
    {
        let start = usize::try_from(offset).map_err(|_| UnexpectedEof)?;
        let source = start.checked_add(buf.len())
            .and_then(|end| self.bytes.get(start .. end))
            .ok_or(UnexpectedEof)?;
        buf.copy_from_slice(source);
        Ok(())
    }

    fn write_at(&mut self, offset: u64, buf: &[u8]) -> io::Result<()>
    {
        let start = usize::try_from(offset).map_err(|_| InvalidInput)?;
        let end = start.checked_add(buf.len()).ok_or(InvalidInput)?;
        if self.bytes.len() < end {
            self.bytes.resize(end, 0);
        }
        self.bytes[start .. end].copy_from_slice(buf);
        Ok(())
    }

    fn set_len(&mut self, len: u64) -> io::Result<()>
    {
        let len = usize::try_from(len).map_err(|_| InvalidInput)?;
        self.bytes.resize(len, 0);
        Ok(())
    }
}
