//! Scope guard that runs only when a panic passes through.
//!
//! Allocation code uses it to free storage if an initializer panics.
//! Once initialization succeeded, the guard is dismissed.

#![warn(missing_docs)]

use std::{mem::ManuallyDrop, thread};

/// Guard that calls a closure only when dropped during a panic.
///
/// When the guard goes out of scope normally,
/// the closure is dropped without being called.
pub struct OnUnwind<F>
    where F: FnOnce()
{
    f: ManuallyDrop<F>,
}

impl<F> OnUnwind<F>
    where F: FnOnce()
{
    /// Create a guard that calls `f` if dropped while panicking.
    pub fn new(f: F) -> Self
    {
        Self{f: ManuallyDrop::new(f)}
    }

    /// Drop the guard without calling the closure, even when panicking.
    pub fn dismiss(self)
    {
        let mut this = ManuallyDrop::new(self);
        // SAFETY: this.f is not used again and this is never dropped.
        unsafe { ManuallyDrop::drop(&mut this.f); }
    }
}

impl<F> Drop for OnUnwind<F>
    where F: FnOnce()
{
    fn drop(&mut self)
    {
        // SAFETY: self.f will not be used anymore.
        let f = unsafe { ManuallyDrop::take(&mut self.f) };
        if thread::panicking() {
            f();
        }
    }
}

#[cfg(test)]
mod tests
{
    use {super::*, std::{cell::Cell, panic::{AssertUnwindSafe, catch_unwind}}};

    #[test]
    fn on_unwind_runs_only_when_panicking()
    {
        let x = Cell::new(0);
        drop(OnUnwind::new(|| x.set(1)));
        assert_eq!(x.get(), 0);

        let result = catch_unwind(AssertUnwindSafe(|| {
            let _guard = OnUnwind::new(|| x.set(2));
            panic!("unwinding");
        }));
        assert!(result.is_err());
        assert_eq!(x.get(), 2);
    }

    #[test]
    fn dismissed_on_unwind_does_not_run_when_panicking()
    {
        let x = Cell::new(0);
        let result = catch_unwind(AssertUnwindSafe(|| {
            let guard = OnUnwind::new(|| x.set(1));
            guard.dismiss();
            panic!("unwinding");
        }));
        assert!(result.is_err());
        assert_eq!(x.get(), 0);
    }
}
