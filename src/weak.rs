//! `WeakPtr<T>` observes an object owned by [`SharedPtr`]s without keeping it
//! alive.
//!
//! A weak pointer keeps the control block allocated, so it can always tell
//! whether its object is still around, and try to become an owner again with
//! [`WeakPtr::lock`] or [`SharedPtr::from_weak`].
//!
//! ```
//! use duorc::{SharedPtr, WeakPtr};
//!
//! let strong = SharedPtr::new(5);
//! let weak = WeakPtr::from(&strong);
//! assert_eq!(*weak.lock(), 5);
//!
//! drop(strong);
//! assert!(weak.expired());
//! assert!(SharedPtr::is_null(&weak.lock()));
//! assert!(SharedPtr::from_weak(&weak).is_err());
//! ```
use core::{fmt, mem, ptr::NonNull};

use crate::{
    block::ControlBlock,
    shared::{addr, SharedPtr},
};

/// Non-owning pointer to an object managed by [`SharedPtr`].
pub struct WeakPtr<T: ?Sized> {
    pub(crate) ptr: Option<NonNull<T>>,
    pub(crate) block: Option<NonNull<ControlBlock>>,
}

impl<T: ?Sized> WeakPtr<T> {
    /// An empty weak pointer, which is always expired.
    pub const fn new() -> Self {
        WeakPtr {
            ptr: None,
            block: None,
        }
    }

    /// Wraps parts whose weak count has already been taken by the caller.
    pub(crate) unsafe fn from_parts(ptr: Option<NonNull<T>>, block: Option<NonNull<ControlBlock>>) -> Self {
        WeakPtr { ptr, block }
    }

    fn block(&self) -> Option<&ControlBlock> {
        // Safety: a weak pointer keeps its block allocated.
        self.block.map(|b| unsafe { &*b.as_ptr() })
    }

    /// Returns a [`SharedPtr`] to the object if it is still alive, and an empty
    /// one otherwise.
    pub fn lock(&self) -> SharedPtr<T> {
        match self.block() {
            Some(block) if block.try_increment_strong() => unsafe { SharedPtr::from_parts(self.ptr, self.block) },
            _ => SharedPtr::null(),
        }
    }

    /// Returns true once the object has been destroyed, or if there never was
    /// one.
    pub fn expired(&self) -> bool {
        self.use_count() == 0
    }

    /// Number of [`SharedPtr`]s owning the object.
    pub fn use_count(&self) -> usize {
        self.block().map_or(0, |b| b.get_count())
    }

    /// Number of `WeakPtr`s observing the object, this one included.
    pub fn weak_count(&self) -> usize {
        self.block().map_or(0, |b| b.weak_count())
    }

    /// Returns a weak pointer to some part of the object, see
    /// [`SharedPtr::project`]. If the object is already gone there is nothing
    /// to project, and the result is empty.
    pub fn project<U, F>(&self, f: F) -> WeakPtr<U>
    where
        T: 'static,
        U: ?Sized,
        F: FnOnce(&T) -> &U,
    {
        let strong = self.lock();
        if SharedPtr::is_null(&strong) {
            return WeakPtr::new();
        }
        SharedPtr::downgrade(&SharedPtr::project(strong, f))
    }

    /// Stops observing, leaving `self` empty.
    pub fn reset(&mut self) {
        drop(self.take());
    }

    /// Exchanges the contents of two pointers.
    pub fn swap(&mut self, other: &mut Self) {
        mem::swap(self, other);
    }

    /// Moves the contents out of `self`, leaving it empty. Counts are
    /// unchanged.
    pub fn take(&mut self) -> Self {
        mem::take(self)
    }

    /// Returns true if both observe the same address.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        addr(self.ptr) == addr(other.ptr)
    }
}

impl<T: ?Sized> From<&SharedPtr<T>> for WeakPtr<T> {
    fn from(strong: &SharedPtr<T>) -> Self {
        SharedPtr::downgrade(strong)
    }
}

impl<T: ?Sized> Clone for WeakPtr<T> {
    fn clone(&self) -> Self {
        if let Some(block) = self.block() {
            block.increment_weak();
        }
        WeakPtr {
            ptr: self.ptr,
            block: self.block,
        }
    }

    fn clone_from(&mut self, source: &Self) {
        if self.ptr_eq(source) && self.block == source.block {
            return;
        }
        *self = source.clone();
    }
}

impl<T: ?Sized> Drop for WeakPtr<T> {
    fn drop(&mut self) {
        if let Some(block) = self.block {
            unsafe { ControlBlock::decrement_weak(block) };
        }
    }
}

impl<T: ?Sized> Default for WeakPtr<T> {
    fn default() -> Self {
        WeakPtr::new()
    }
}

impl<T: ?Sized> fmt::Debug for WeakPtr<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "(Weak)")
    }
}
