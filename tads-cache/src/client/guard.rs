use {
    super::ClientContext,
    crate::{Error, ObjNum, Result},
    std::{cell::{Ref, RefMut}, mem::ManuallyDrop},
};

/// Lock on a client object.
///
/// The object stays in memory and does not move while any guard for it
/// is alive. Dropping the guard releases the lock; cloning it adds one.
///
/// The byte accessors borrow the global context,
/// so release them before calling into the cache again.
pub struct ObjectGuard<'c>
{
    client: &'c ClientContext<'c>,
    clinum: ObjNum,
    objnum: ObjNum,
}

impl<'c> ObjectGuard<'c>
{
    /// The object must already be locked on behalf of the new guard.
    pub (super) fn new(client: &'c ClientContext<'c>, clinum: ObjNum, objnum: ObjNum)
        -> Self
    {
        Self{client, clinum, objnum}
    }

    /// Client number of the object.
    pub fn clinum(&self) -> ObjNum
    {
        self.clinum
    }

    /// Global number of the object.
    pub fn objnum(&self) -> ObjNum
    {
        self.objnum
    }

    /// The object's bytes.
    pub fn bytes(&self) -> Result<Ref<'_, [u8]>>
    {
        let objnum = self.objnum;
        Ref::filter_map(self.client.global.borrow(), |g| g.bytes(objnum).ok())
            .map_err(|_| Error::NotLocked(objnum))
    }

    /// The object's bytes, for modification.
    ///
    /// The object is marked as modified.
    pub fn bytes_mut(&mut self) -> Result<RefMut<'_, [u8]>>
    {
        let objnum = self.objnum;
        RefMut::filter_map(self.client.global.borrow_mut(), |g| g.bytes_mut(objnum).ok())
            .map_err(|_| Error::NotLocked(objnum))
    }

    /// Size of the object's block.
    pub fn size(&self) -> Result<usize>
    {
        self.client.global.borrow().object_size(self.objnum)
    }

    /// Mark the object as modified.
    pub fn touch(&self) -> Result<()>
    {
        self.client.global.borrow_mut().touch(self.objnum)
    }

    /// Change the size of the object.
    ///
    /// Fails with [`Error::ReallocMultipleLocks`] if the object has to move
    /// and other guards for it exist.
    pub fn resize(&mut self, size: usize) -> Result<()>
    {
        self.client.global.borrow_mut().realloc(self.objnum, size)
    }

    /// Release the lock and delete the object.
    ///
    /// Fails with [`Error::LockedObjectFreed`] if other guards for the
    /// object exist; the lock of this guard is released either way.
    pub fn free(self) -> Result<()>
    {
        let this = ManuallyDrop::new(self);
        this.client.global.borrow_mut().unlock(this.objnum)?;
        this.client.free(this.clinum)
    }
}

impl Clone for ObjectGuard<'_>
{
    fn clone(&self) -> Self
    {
        self.client.global.borrow_mut().relock(self.objnum);
        Self{client: self.client, clinum: self.clinum, objnum: self.objnum}
    }
}

impl Drop for ObjectGuard<'_>
{
    fn drop(&mut self)
    {
        if let Err(err) = self.client.global.borrow_mut().unlock(self.objnum) {
            log::warn!("cannot unlock object {}: {}", self.objnum, err);
        }
    }
}
