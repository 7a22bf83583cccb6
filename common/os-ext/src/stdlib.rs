use {
    crate::cstr::IntoCStr,
    std::{
        ffi::{CString, OsString},
        io,
        os::unix::{ffi::OsStringExt, io::{FromRawFd, OwnedFd}},
        path::PathBuf,
    },
};

/// Call mkostemp(3) with the given template and `O_CLOEXEC`.
///
/// Returns the open file together with the path that was created.
/// The template must end in `XXXXXX`.
pub fn mkstemp<'a>(template: impl IntoCStr<'a>)
    -> io::Result<(OwnedFd, PathBuf)>
{
    #[inline(never)]
    fn monomorphic(template: CString) -> io::Result<(OwnedFd, PathBuf)>
    {
        // CString::as_mut_ptr does not exist.
        let mut template = template.into_bytes_with_nul();

        // SAFETY: template is NUL-terminated.
        let fd = unsafe {
            libc::mkostemp(
                template.as_mut_ptr() as *mut libc::c_char,
                libc::O_CLOEXEC,
            )
        };

        if fd == -1 {
            return Err(io::Error::last_os_error());
        }

        // SAFETY: fd is a new, open file descriptor.
        let fd = unsafe { OwnedFd::from_raw_fd(fd) };

        // Remove NUL.
        template.pop();

        Ok((fd, PathBuf::from(OsString::from_vec(template))))
    }

    let template = template.into_cstr()?;
    monomorphic(template.into_owned())
}
