//! Client contexts.
//!
//! Subsystems that share a global context each get their own dense range
//! of object numbers through a client context. A client object number
//! indexes a sparse table of pages, each mapping [`PAGE_SIZE`] client
//! numbers to global numbers. Pages are allocated as numbers are used.

pub use self::guard::*;

use {
    crate::{
        Error,
        GlobalContext,
        LoadHandle,
        OBJNUM_INVALID,
        ObjNum,
        PAGE_SIZE,
        Result,
        objnum::page_index,
    },
    std::{cell::RefCell, io},
};

mod guard;

/// Source of the original bytes of reserved objects.
pub trait ObjectLoader
{
    /// Read the original bytes of the object with the given load handle.
    fn load(&self, handle: LoadHandle, dest: &mut [u8]) -> io::Result<()>;

    /// Return an object to its original state.
    ///
    /// Called with no borrow of the global context outstanding,
    /// so the implementation may lock the object through `client`.
    fn revert(&self, client: &ClientContext<'_>, clinum: ObjNum) -> Result<()>
    {
        let _ = (client, clinum);
        Ok(())
    }
}

impl<T> ObjectLoader for &T
    where T: ObjectLoader + ?Sized
{
    fn load(&self, handle: LoadHandle, dest: &mut [u8]) -> io::Result<()>
    {
        (**self).load(handle, dest)
    }

    fn revert(&self, client: &ClientContext<'_>, clinum: ObjNum) -> Result<()>
    {
        (**self).revert(client, clinum)
    }
}

/// Per-subsystem view of a global context.
///
/// Dropping a client context does not free the objects it allocated.
pub struct ClientContext<'g>
{
    global: &'g RefCell<GlobalContext>,
    loader: Option<Box<dyn ObjectLoader + 'g>>,

    /// Translation pages; unused entries hold [`OBJNUM_INVALID`].
    map: RefCell<Vec<Option<Box<[ObjNum]>>>>,

    max_pages: usize,
}

impl<'g> ClientContext<'g>
{
    /// Create a client context on top of a global context.
    ///
    /// Without a loader, only objects created by allocation can be used.
    pub fn new(
        global: &'g RefCell<GlobalContext>,
        loader: Option<Box<dyn ObjectLoader + 'g>>,
    ) -> Self
    {
        let max_pages = global.borrow().config().client_pages;
        Self{global, loader, map: RefCell::new(Vec::new()), max_pages}
    }

    /// The global context this client is layered on.
    pub fn global(&self) -> &'g RefCell<GlobalContext>
    {
        self.global
    }

    /// Allocate an object with the lowest free client number.
    ///
    /// The object is returned locked;
    /// [`ObjectGuard::clinum`] tells which number it got.
    pub fn alloc(&self, size: usize) -> Result<ObjectGuard<'_>>
    {
        let clinum = self.free_number()?;
        self.alloc_at(size, clinum)
    }

    /// Allocate an object with the given client number.
    pub fn alloc_at(&self, size: usize, clinum: ObjNum) -> Result<ObjectGuard<'_>>
    {
        self.check_free(clinum)?;
        let objnum = self.global.borrow_mut().alloc(size)?;
        self.bind(clinum, objnum);
        Ok(ObjectGuard::new(self, clinum, objnum))
    }

    /// Allocate a locked object that has no client number.
    ///
    /// Returns the global number;
    /// the object must be unlocked and freed through the global context.
    pub fn alloc_scratch(&self, size: usize) -> Result<ObjNum>
    {
        self.global.borrow_mut().alloc(size)
    }

    /// Create an object with the given client number
    /// that will be read through the loader when first locked.
    pub fn reserve(&self, size: usize, clinum: ObjNum, load: LoadHandle) -> Result<()>
    {
        self.check_free(clinum)?;
        let objnum = self.global.borrow_mut().reserve(size, load)?;
        self.bind(clinum, objnum);
        Ok(())
    }

    /// Lock an object, loading it if necessary.
    ///
    /// If a revert was requested while the object was out of memory,
    /// the loader reverts it before this returns.
    pub fn lock(&self, clinum: ObjNum) -> Result<ObjectGuard<'_>>
    {
        let objnum = self.global_number(clinum)?;

        let revert = {
            let mut global = self.global.borrow_mut();
            match &self.loader {
                Some(loader) => {
                    let mut load = |handle: LoadHandle, dest: &mut [u8]| {
                        loader.load(handle, dest)
                    };
                    global.lock_with(objnum, Some(&mut load))?
                },
                None => global.lock_with(objnum, None)?,
            }
        };

        let guard = ObjectGuard::new(self, clinum, objnum);
        if revert {
            self.call_revert(clinum)?;
        }
        Ok(guard)
    }

    /// Delete an unlocked object and release its client number.
    pub fn free(&self, clinum: ObjNum) -> Result<()>
    {
        let objnum = self.global_number(clinum)?;
        self.global.borrow_mut().free(objnum)?;
        self.bind(clinum, OBJNUM_INVALID);
        Ok(())
    }

    /// Mark an object as modified.
    pub fn touch(&self, clinum: ObjNum) -> Result<()>
    {
        let objnum = self.global_number(clinum)?;
        self.global.borrow_mut().touch(objnum)
    }

    /// Whether an object has been modified or has ever been in swap.
    pub fn is_dirty(&self, clinum: ObjNum) -> Result<bool>
    {
        let objnum = self.global_number(clinum)?;
        self.global.borrow().is_dirty(objnum)
    }

    /// Whether an object's bytes are in memory.
    pub fn is_present(&self, clinum: ObjNum) -> Result<bool>
    {
        let objnum = self.global_number(clinum)?;
        self.global.borrow().is_present(objnum)
    }

    /// Size of an object's block.
    pub fn object_size(&self, clinum: ObjNum) -> Result<usize>
    {
        let objnum = self.global_number(clinum)?;
        self.global.borrow().object_size(objnum)
    }

    /// Pin an object in memory, or unpin it.
    pub fn set_no_swap(&self, clinum: ObjNum, no_swap: bool) -> Result<()>
    {
        let objnum = self.global_number(clinum)?;
        self.global.borrow_mut().set_no_swap(objnum, no_swap)
    }

    /// Return an object to its original state.
    ///
    /// An object in memory is reverted by the loader right away.
    /// An object in swap is reverted the next time it is locked.
    pub fn revert(&self, clinum: ObjNum) -> Result<()>
    {
        let objnum = self.global_number(clinum)?;
        let now = self.global.borrow_mut().request_revert(objnum)?;
        if now {
            self.call_revert(clinum)?;
        }
        Ok(())
    }

    /// Translate a client number to a global number.
    pub fn global_number(&self, clinum: ObjNum) -> Result<ObjNum>
    {
        let (page, index) = page_index(clinum);
        self.map.borrow()
            .get(page)
            .and_then(Option::as_ref)
            .map(|page| page[index])
            .filter(|&objnum| objnum != OBJNUM_INVALID)
            .ok_or(Error::InvalidObject(clinum))
    }

    fn call_revert(&self, clinum: ObjNum) -> Result<()>
    {
        match &self.loader {
            Some(loader) => loader.revert(self, clinum),
            None => Ok(()),
        }
    }

    /// Lowest client number that is not in use.
    ///
    /// Pages that already exist are searched before a new one is opened.
    fn free_number(&self) -> Result<ObjNum>
    {
        let map = self.map.borrow();

        for (page_no, page) in map.iter().enumerate() {
            let Some(page) = page else { continue };
            if let Some(index) = page.iter().position(|&n| n == OBJNUM_INVALID) {
                return Ok((page_no * PAGE_SIZE + index) as ObjNum);
            }
        }

        let page_no = map.iter().position(Option::is_none).unwrap_or(map.len());
        if page_no >= self.max_pages {
            return Err(Error::ClientTableFull);
        }
        Ok((page_no * PAGE_SIZE) as ObjNum)
    }

    fn check_free(&self, clinum: ObjNum) -> Result<()>
    {
        let (page, _) = page_index(clinum);
        if page >= self.max_pages {
            return Err(Error::ClientTableFull);
        }
        if self.global_number(clinum).is_ok() {
            return Err(Error::ClientNumberInUse(clinum));
        }
        Ok(())
    }

    /// Set the translation of a client number, creating its page if needed.
    fn bind(&self, clinum: ObjNum, objnum: ObjNum)
    {
        let (page, index) = page_index(clinum);
        let mut map = self.map.borrow_mut();
        if map.len() <= page {
            map.resize_with(page + 1, || None);
        }
        let page = map[page].get_or_insert_with(|| {
            log::debug!("added client translation page {}", page);
            vec![OBJNUM_INVALID; PAGE_SIZE].into_boxed_slice()
        });
        page[index] = objnum;
    }
}
