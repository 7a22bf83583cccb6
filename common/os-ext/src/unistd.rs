use {
    crate::{cstr::IntoCStr, retry_on_eintr},
    std::{
        io::{self, ErrorKind::{UnexpectedEof, WriteZero}},
        os::unix::io::{AsRawFd, BorrowedFd},
    },
};

/// Call pread(2) until `buf` is filled.
pub fn pread(fd: BorrowedFd, mut buf: &mut [u8], mut offset: libc::off_t)
    -> io::Result<()>
{
    while !buf.is_empty() {
        let n = retry_on_eintr(|| {
            // SAFETY: buf is valid for writes of buf.len() bytes.
            let n = unsafe {
                libc::pread(
                    fd.as_raw_fd(),
                    buf.as_mut_ptr().cast(),
                    buf.len(),
                    offset,
                )
            };

            if n == -1 {
                return Err(io::Error::last_os_error());
            }

            Ok(n as usize)
        })?;

        if n == 0 {
            return Err(io::Error::from(UnexpectedEof));
        }

        let rest = buf;
        buf = &mut rest[n ..];
        offset += n as libc::off_t;
    }

    Ok(())
}

/// Call pwrite(2) until all of `buf` is written.
pub fn pwrite(fd: BorrowedFd, mut buf: &[u8], mut offset: libc::off_t)
    -> io::Result<()>
{
    while !buf.is_empty() {
        let n = retry_on_eintr(|| {
            // SAFETY: buf is valid for reads of buf.len() bytes.
            let n = unsafe {
                libc::pwrite(
                    fd.as_raw_fd(),
                    buf.as_ptr().cast(),
                    buf.len(),
                    offset,
                )
            };

            if n == -1 {
                return Err(io::Error::last_os_error());
            }

            Ok(n as usize)
        })?;

        if n == 0 {
            return Err(io::Error::from(WriteZero));
        }

        buf = &buf[n ..];
        offset += n as libc::off_t;
    }

    Ok(())
}

/// Call ftruncate(2) with the given arguments.
pub fn ftruncate(fd: BorrowedFd, length: libc::off_t) -> io::Result<()>
{
    retry_on_eintr(|| {
        // SAFETY: This is always safe.
        let result = unsafe { libc::ftruncate(fd.as_raw_fd(), length) };

        if result == -1 {
            return Err(io::Error::last_os_error());
        }

        Ok(())
    })
}

/// Call unlink(2) with the given arguments.
pub fn unlink<'a>(pathname: impl IntoCStr<'a>) -> io::Result<()>
{
    let pathname = pathname.into_cstr()?;

    // SAFETY: pathname is NUL-terminated.
    let result = unsafe { libc::unlink(pathname.as_ptr()) };

    if result == -1 {
        return Err(io::Error::last_os_error());
    }

    Ok(())
}
