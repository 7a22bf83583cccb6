//! Ad-hoc scope guards.
//!
//! [`scope_exit!`] runs code unconditionally when the scope ends.
//! [`ScopeGuard`] owns a value, gives access to it through [`Deref`],
//! and runs cleanup on it unless the guard is dismissed with
//! [`ScopeGuard::into_inner`]. The latter expresses "undo this
//! unless we get to the end" without borrowing the value twice.

#![warn(missing_docs)]

use std::{mem::ManuallyDrop, ops::{Deref, DerefMut}, ptr};

#[doc(hidden)]
pub struct ScopeExit<F>
    where F: FnOnce()
{
    f: ManuallyDrop<F>,
}

impl<F> ScopeExit<F>
    where F: FnOnce()
{
    pub fn new(f: F) -> Self
    {
        Self{f: ManuallyDrop::new(f)}
    }
}

impl<F> Drop for ScopeExit<F>
    where F: FnOnce()
{
    fn drop(&mut self)
    {
        // SAFETY: self.f will not be used anymore.
        let f = unsafe { ManuallyDrop::take(&mut self.f) };
        f();
    }
}

/// Define an ad-hoc scope guard.
///
/// The code passed to this macro is performed at the end of the scope.
/// It is performed when the scope ends or when a panic passes through.
///
/// # Examples
///
/// ```
/// # use scope_exit::scope_exit;
/// use std::cell::Cell;
/// let x = Cell::new(0);
/// {
///     scope_exit! { x.set(1); }
///     x.set(2);
/// }
/// assert_eq!(x.get(), 1);
/// ```
#[macro_export]
macro_rules! scope_exit
{
    { $($tt:tt)* } => {
        let __scope_exit = $crate::ScopeExit::new(|| { $($tt)* });
    };
}

/// Value with a pending cleanup action.
///
/// The cleanup receives the value when the guard is dropped.
/// Calling [`into_inner`][`Self::into_inner`] cancels the cleanup.
///
/// # Examples
///
/// ```
/// # use scope_exit::ScopeGuard;
/// let mut log = Vec::new();
/// {
///     let mut log = ScopeGuard::new(&mut log, |log| log.push("undone"));
///     log.push("started");
/// }
/// assert_eq!(log, ["started", "undone"]);
///
/// let mut log = Vec::new();
/// {
///     let mut guard = ScopeGuard::new(&mut log, |log| log.push("undone"));
///     guard.push("finished");
///     ScopeGuard::into_inner(guard);
/// }
/// assert_eq!(log, ["finished"]);
/// ```
pub struct ScopeGuard<T, F>
    where F: FnOnce(T)
{
    value: ManuallyDrop<T>,
    cleanup: ManuallyDrop<F>,
}

impl<T, F> ScopeGuard<T, F>
    where F: FnOnce(T)
{
    /// Guard `value` with `cleanup`.
    pub fn new(value: T, cleanup: F) -> Self
    {
        Self{value: ManuallyDrop::new(value), cleanup: ManuallyDrop::new(cleanup)}
    }

    /// Dismiss the guard and return the value without cleaning up.
    ///
    /// This is an associated function so that it does not
    /// shadow methods of `T` reached through [`Deref`].
    pub fn into_inner(this: Self) -> T
    {
        let mut this = ManuallyDrop::new(this);
        // SAFETY: this is never dropped, so both fields are taken once.
        unsafe {
            ManuallyDrop::drop(&mut this.cleanup);
            ptr::read(&*this.value)
        }
    }
}

impl<T, F> Deref for ScopeGuard<T, F>
    where F: FnOnce(T)
{
    type Target = T;

    fn deref(&self) -> &T
    {
        &self.value
    }
}

impl<T, F> DerefMut for ScopeGuard<T, F>
    where F: FnOnce(T)
{
    fn deref_mut(&mut self) -> &mut T
    {
        &mut self.value
    }
}

impl<T, F> Drop for ScopeGuard<T, F>
    where F: FnOnce(T)
{
    fn drop(&mut self)
    {
        // SAFETY: Neither field will be used anymore.
        let (value, cleanup) = unsafe {
            (ManuallyDrop::take(&mut self.value),
             ManuallyDrop::take(&mut self.cleanup))
        };
        cleanup(value);
    }
}

#[cfg(test)]
mod tests
{
    use {super::*, std::cell::Cell};

    #[test]
    fn scope_exit_runs_on_panic()
    {
        let ran = Cell::new(false);
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            scope_exit! { ran.set(true); }
            panic!("unwinding");
        }));
        assert!(result.is_err());
        assert!(ran.get());
    }

    #[test]
    fn guard_cleans_up_on_early_return()
    {
        fn fallible(counter: &mut u32, fail: bool) -> Result<(), ()>
        {
            let mut counter = ScopeGuard::new(counter, |c| *c -= 1);
            **counter += 1;
            if fail {
                return Err(());
            }
            ScopeGuard::into_inner(counter);
            Ok(())
        }

        let mut counter = 0;
        fallible(&mut counter, false).unwrap();
        assert_eq!(counter, 1);
        fallible(&mut counter, true).unwrap_err();
        assert_eq!(counter, 1);
    }
}
