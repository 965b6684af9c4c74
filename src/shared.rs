//! `SharedPtr<T>` is a refcounted pointer like `std::rc::Rc<T>`, with the
//! counts in a separate control block, much like C++'s `shared_ptr`.
//!
//! The pointer tracks an object address and a control block independently.
//! Usually the address is the object owned by the block, but it doesn't have
//! to be: [`SharedPtr::alias`] and [`SharedPtr::project`] produce pointers to
//! some part of the owned object (a field, a slice element, a `dyn` view)
//! which keep the whole object alive.
//!
//! ```
//! use duorc::SharedPtr;
//!
//! struct Pair {
//!     left: String,
//!     right: String,
//! }
//!
//! let pair = SharedPtr::new(Pair { left: "l".into(), right: "r".into() });
//! let right: SharedPtr<String> = SharedPtr::alias(&pair, |p| &p.right);
//! drop(pair);
//!
//! // `right` keeps the whole pair alive
//! assert_eq!(*right, "r");
//! assert_eq!(SharedPtr::use_count(&right), 1);
//! ```
//!
//! Every operation is an associated function (`SharedPtr::use_count(&p)`
//! rather than `p.use_count()`), so none of them shadow methods of `T`.
use alloc::boxed::Box;
use core::{
    fmt, hash,
    marker::PhantomData,
    mem,
    ops::Deref,
    ptr::{self, NonNull},
};

use crate::{
    block::{ControlBlock, InlineBlock, PtrBlock},
    error::BadWeakPtr,
    weak::WeakPtr,
};

/// Owning pointer sharing a control block with every copy of itself.
///
/// Dereferencing an empty pointer panics; use [`SharedPtr::get`] to check.
pub struct SharedPtr<T: ?Sized> {
    pub(crate) ptr: Option<NonNull<T>>,
    pub(crate) block: Option<NonNull<ControlBlock>>,
    phantom: PhantomData<T>,
}

/// Allocates `value` together with its control block.
pub fn make_shared<T>(value: T) -> SharedPtr<T> {
    SharedPtr::new(value)
}

/// Like [`make_shared`], with the value produced by `f`.
pub fn make_shared_with<T, F: FnOnce() -> T>(f: F) -> SharedPtr<T> {
    SharedPtr::new(f())
}

impl<T> SharedPtr<T> {
    /// Allocates `value` together with its control block, in a single
    /// allocation.
    pub fn new(value: T) -> Self {
        let (block, ptr) = InlineBlock::allocate(value);
        // Safety: fresh block, strong count 1 is ours.
        unsafe { SharedPtr::from_parts(Some(ptr), Some(block)) }
    }

    /// Constructs a new `SharedPtr<T>` while giving you a `WeakPtr<T>` to the
    /// allocation, to allow you to construct a `T` which holds a weak pointer
    /// to itself.
    ///
    /// The weak pointer cannot be promoted until `data_fn` has returned.
    pub fn new_cyclic<F>(data_fn: F) -> Self
    where
        F: FnOnce(&WeakPtr<T>) -> T,
    {
        // The block starts without owners and with a single weak count, held
        // by `weak`. If `data_fn` panics, dropping `weak` frees the block
        // without touching the missing value.
        let (block, ptr) = InlineBlock::<T>::allocate_uninit();
        let weak = unsafe { WeakPtr::from_parts(Some(ptr), Some(block)) };

        // Safety: we just allocated with the value uninitialized.
        unsafe { ptr.as_ptr().write(data_fn(&weak)) };

        unsafe {
            InlineBlock::<T>::mark_initialized(block);
            SharedPtr::from_parts(Some(ptr), Some(block))
        }
    }
}

impl<T: ?Sized> SharedPtr<T> {
    /// An empty pointer, with no object and no control block.
    pub const fn null() -> Self {
        SharedPtr {
            ptr: None,
            block: None,
            phantom: PhantomData,
        }
    }

    /// Takes ownership of a boxed object. Unlike [`SharedPtr::new`], the box
    /// is kept as-is and the counts go in a separate allocation.
    pub fn from_box(object: Box<T>) -> Self {
        let (block, ptr) = PtrBlock::allocate(object);
        // Safety: fresh block, strong count 1 is ours.
        unsafe { SharedPtr::from_parts(Some(ptr), Some(block)) }
    }

    /// Takes ownership of an object allocated with `Box`. A null `ptr` gives
    /// an empty pointer.
    ///
    /// # Safety
    ///
    /// `ptr` must be null or come from `Box::into_raw`, and must not be owned
    /// by anything else. In particular, wrapping the same pointer twice frees
    /// it twice.
    pub unsafe fn from_raw(ptr: *mut T) -> Self {
        if ptr.is_null() {
            return SharedPtr::null();
        }
        SharedPtr::from_box(unsafe { Box::from_raw(ptr) })
    }

    /// Wraps parts whose strong count has already been taken by the caller.
    pub(crate) unsafe fn from_parts(ptr: Option<NonNull<T>>, block: Option<NonNull<ControlBlock>>) -> Self {
        SharedPtr {
            ptr,
            block,
            phantom: PhantomData,
        }
    }

    /// Promotes `weak`, failing if its object is already destroyed (or it never
    /// had one). Nothing is modified on failure.
    ///
    /// See [`WeakPtr::lock`] for a version returning an empty pointer instead.
    pub fn from_weak(weak: &WeakPtr<T>) -> Result<Self, BadWeakPtr> {
        match weak.block {
            // Safety: a weak pointer keeps its block allocated.
            Some(block) if unsafe { block.as_ref() }.try_increment_strong() => {
                Ok(unsafe { SharedPtr::from_parts(weak.ptr, Some(block)) })
            }
            block => {
                log::debug!("promotion of weak pointer to expired block {:?} failed", block);
                Err(BadWeakPtr)
            }
        }
    }

    /// Returns a pointer to `f(&*other)` sharing `other`'s control block, and
    /// thus keeping `other`'s object alive.
    ///
    /// If `other` tracks no object, `f` is not called and the result tracks
    /// nothing either. It still shares `other`'s block, if any.
    pub fn alias<U, F>(other: &SharedPtr<U>, f: F) -> Self
    where
        U: ?Sized + 'static,
        F: FnOnce(&U) -> &T,
    {
        let ptr = SharedPtr::get(other).map(|u| NonNull::from(f(u)));
        if let Some(block) = other.block {
            unsafe { block.as_ref() }.increment_strong();
        }
        unsafe { SharedPtr::from_parts(ptr, other.block) }
    }

    /// Returns a pointer to `ptr` sharing `other`'s control block. `ptr` may be
    /// anything, including null: the result then keeps `other`'s object alive
    /// while tracking nothing.
    ///
    /// # Safety
    ///
    /// `ptr` must be null or stay valid for as long as `other`'s object lives.
    pub unsafe fn alias_raw<U: ?Sized>(other: &SharedPtr<U>, ptr: *const T) -> Self {
        if let Some(block) = other.block {
            unsafe { block.as_ref() }.increment_strong();
        }
        unsafe { SharedPtr::from_parts(NonNull::new(ptr as *mut T), other.block) }
    }

    /// Return a `SharedPtr<U>` for any type U contained within T, e.g. an
    /// element of a slice, or &dyn view of an object. `this` is consumed, so
    /// the counts are unchanged.
    pub fn project<U, F>(this: Self, f: F) -> SharedPtr<U>
    where
        T: 'static,
        U: ?Sized,
        F: FnOnce(&T) -> &U,
    {
        let ptr = SharedPtr::get(&this).map(|x| NonNull::from(f(x)));
        SharedPtr::projected(this, ptr)
    }

    /// Fallible version of `project()`. On `None`, `this` is dropped.
    pub fn try_project<U, F>(this: Self, f: F) -> Option<SharedPtr<U>>
    where
        T: 'static,
        U: ?Sized,
        F: FnOnce(&T) -> Option<&U>,
    {
        match SharedPtr::get(&this).map(f) {
            Some(None) => None,
            Some(Some(u)) => {
                let ptr = NonNull::from(u);
                Some(SharedPtr::projected(this, Some(ptr)))
            }
            None => Some(SharedPtr::projected(this, None)),
        }
    }

    /// Convert `SharedPtr<T>` to `SharedPtr<U>`, as long as &T converts to &U.
    pub fn cast<U>(this: Self) -> SharedPtr<U>
    where
        T: 'static,
        U: ?Sized,
        for<'u> &'u U: From<&'u T>,
    {
        SharedPtr::project(this, |x| From::from(x))
    }

    fn projected<U: ?Sized>(this: Self, ptr: Option<NonNull<U>>) -> SharedPtr<U> {
        let block = this.block;
        // Forget `this` so it doesn't adjust the refcount, since we moved it
        // into the result.
        mem::forget(this);
        unsafe { SharedPtr::from_parts(ptr, block) }
    }

    /// Return a [`WeakPtr`] observing this object.
    pub fn downgrade(this: &Self) -> WeakPtr<T> {
        if let Some(block) = this.block {
            unsafe { block.as_ref() }.increment_weak();
        }
        unsafe { WeakPtr::from_parts(this.ptr, this.block) }
    }

    /// Releases ownership, leaving `this` empty.
    pub fn reset(this: &mut Self) {
        drop(SharedPtr::take(this));
    }

    /// Releases ownership and takes over `object` instead.
    pub fn reset_box(this: &mut Self, object: Box<T>) {
        *this = SharedPtr::from_box(object);
    }

    /// Releases ownership and takes over `ptr` instead. Nothing happens if
    /// `ptr` is the object already tracked.
    ///
    /// # Safety
    ///
    /// Same as [`SharedPtr::from_raw`].
    pub unsafe fn reset_raw(this: &mut Self, ptr: *mut T) {
        let current = this.ptr.map_or(ptr::null_mut(), |p| p.as_ptr() as *mut u8);
        if ptr::eq(current, ptr as *mut u8) {
            return;
        }
        *this = unsafe { SharedPtr::from_raw(ptr) };
    }

    /// Exchanges the contents of two pointers.
    pub fn swap(this: &mut Self, other: &mut Self) {
        mem::swap(this, other);
    }

    /// Moves the contents out of `this`, leaving it empty. Counts are
    /// unchanged.
    pub fn take(this: &mut Self) -> Self {
        mem::take(this)
    }

    /// The tracked object, if any.
    pub fn get(this: &Self) -> Option<&T> {
        // Safety: the tracked object lives at least as long as the owned one,
        // which our strong count keeps alive.
        this.ptr.map(|p| unsafe { &*p.as_ptr() })
    }

    pub fn as_ptr(this: &Self) -> Option<NonNull<T>> {
        this.ptr
    }

    /// Returns true if no object is tracked. The pointer may still own one,
    /// see [`SharedPtr::alias_raw`].
    pub fn is_null(this: &Self) -> bool {
        this.ptr.is_none()
    }

    /// Number of `SharedPtr`s sharing this control block, 0 if there is none.
    pub fn use_count(this: &Self) -> usize {
        this.block.map_or(0, |b| unsafe { b.as_ref() }.get_count())
    }

    /// Number of [`WeakPtr`]s sharing this control block.
    pub fn weak_count(this: &Self) -> usize {
        this.block.map_or(0, |b| unsafe { b.as_ref() }.weak_count())
    }

    /// Returns a mutable reference to the object if no other `SharedPtr` or
    /// [`WeakPtr`] shares its control block.
    ///
    /// An aliasing pointer only gets one when it tracks a part of the owned
    /// object; anything else it tracks may be reachable from elsewhere.
    ///
    /// ```
    /// use duorc::SharedPtr;
    ///
    /// static ANSWER: i32 = 42;
    ///
    /// let mut pair = SharedPtr::new((1, 2));
    /// *SharedPtr::get_mut(&mut pair).unwrap() = (3, 4);
    ///
    /// let mut second: SharedPtr<i32> = SharedPtr::alias(&pair, |p| &p.1);
    /// drop(pair);
    /// *SharedPtr::get_mut(&mut second).unwrap() += 1;
    /// assert_eq!(*second, 5);
    ///
    /// let mut elsewhere: SharedPtr<i32> = SharedPtr::alias(&second, |_| &ANSWER);
    /// drop(second);
    /// assert!(SharedPtr::get_mut(&mut elsewhere).is_none());
    /// ```
    pub fn get_mut(this: &mut Self) -> Option<&mut T> {
        let block = this.block?;
        let mut p = this.ptr?;
        let header = unsafe { block.as_ref() };
        if header.get_count() != 1 || header.weak_count() != 0 {
            return None;
        }
        // Safety: our strong count keeps the owned object alive.
        let len = mem::size_of_val(unsafe { p.as_ref() });
        if !unsafe { ControlBlock::owns(block, p.as_ptr() as *const u8, len) } {
            return None;
        }
        Some(unsafe { p.as_mut() })
    }

    /// Returns true if both track the same object. They may still belong to
    /// different control blocks, e.g. after [`SharedPtr::alias_raw`].
    pub fn ptr_eq(this: &Self, other: &Self) -> bool {
        addr(this.ptr) == addr(other.ptr)
    }

    /// Returns true if both share the same control block, i.e. own the same
    /// object. They may track different parts of it.
    pub fn root_ptr_eq(this: &Self, other: &Self) -> bool {
        this.block == other.block
    }
}

pub(crate) fn addr<T: ?Sized>(p: Option<NonNull<T>>) -> *const u8 {
    p.map_or(ptr::null(), |p| p.as_ptr() as *const u8)
}

impl<T: ?Sized> TryFrom<&WeakPtr<T>> for SharedPtr<T> {
    type Error = BadWeakPtr;

    fn try_from(weak: &WeakPtr<T>) -> Result<Self, BadWeakPtr> {
        SharedPtr::from_weak(weak)
    }
}

impl<T: ?Sized> From<Box<T>> for SharedPtr<T> {
    fn from(object: Box<T>) -> Self {
        SharedPtr::from_box(object)
    }
}

impl<T: ?Sized> Clone for SharedPtr<T> {
    fn clone(&self) -> Self {
        if let Some(block) = self.block {
            unsafe { block.as_ref() }.increment_strong();
        }
        unsafe { SharedPtr::from_parts(self.ptr, self.block) }
    }

    fn clone_from(&mut self, source: &Self) {
        if SharedPtr::ptr_eq(self, source) && SharedPtr::root_ptr_eq(self, source) {
            return;
        }
        *self = source.clone();
    }
}

impl<T: ?Sized> Drop for SharedPtr<T> {
    fn drop(&mut self) {
        if let Some(block) = self.block {
            unsafe { ControlBlock::decrement_strong(block) };
        }
    }
}

impl<T: ?Sized> Default for SharedPtr<T> {
    fn default() -> Self {
        SharedPtr::null()
    }
}

impl<T: ?Sized> Deref for SharedPtr<T> {
    type Target = T;

    fn deref(&self) -> &T {
        match SharedPtr::get(self) {
            Some(x) => x,
            None => null_deref(),
        }
    }
}

#[cold]
#[track_caller]
fn null_deref() -> ! {
    panic!("dereferenced an empty SharedPtr")
}

impl<T: ?Sized> AsRef<T> for SharedPtr<T> {
    fn as_ref(&self) -> &T {
        self
    }
}

/// Pointers are equal when they track the same address, whatever their
/// control blocks.
impl<T: ?Sized, U: ?Sized> PartialEq<SharedPtr<U>> for SharedPtr<T> {
    fn eq(&self, other: &SharedPtr<U>) -> bool {
        addr(self.ptr) == addr(other.ptr)
    }
}

impl<T: ?Sized> Eq for SharedPtr<T> {}

impl<T: ?Sized> hash::Hash for SharedPtr<T> {
    fn hash<H: hash::Hasher>(&self, state: &mut H) {
        addr(self.ptr).hash(state)
    }
}

impl<T: ?Sized + fmt::Display> fmt::Display for SharedPtr<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match SharedPtr::get(self) {
            Some(x) => fmt::Display::fmt(x, f),
            None => f.write_str("(null)"),
        }
    }
}

impl<T: ?Sized + fmt::Debug> fmt::Debug for SharedPtr<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match SharedPtr::get(self) {
            Some(x) => fmt::Debug::fmt(x, f),
            None => f.write_str("(null)"),
        }
    }
}

impl<T: ?Sized> fmt::Pointer for SharedPtr<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Pointer::fmt(&addr(self.ptr), f)
    }
}
