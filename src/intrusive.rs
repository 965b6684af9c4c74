//! `IntrusivePtr<T>` is a refcounted pointer whose count lives inside `T`
//! itself, rather than in a separate header.
//!
//! The pointed-to type opts in by embedding a [`Counter`] and implementing
//! [`RefCounted`]. Since there is no header, there are no weak pointers
//! either: once the count reaches zero the object is handed to its
//! [`Deleter`] and is gone.
//!
//! ```
//! use duorc::{make_intrusive, DefaultDelete, IntrusivePtr, RefCounted, SimpleCounter};
//!
//! struct Node {
//!     value: i32,
//!     counter: SimpleCounter,
//! }
//!
//! unsafe impl RefCounted for Node {
//!     type Counter = SimpleCounter;
//!     type Deleter = DefaultDelete;
//!
//!     fn counter(&self) -> &SimpleCounter {
//!         &self.counter
//!     }
//! }
//!
//! let a = make_intrusive(Node { value: 3, counter: SimpleCounter::new() });
//! let b = a.clone();
//! assert_eq!(IntrusivePtr::use_count(&b), 2);
//! assert_eq!(b.value, 3);
//! ```
use alloc::boxed::Box;
use core::{
    fmt, hash,
    marker::PhantomData,
    mem,
    ops::Deref,
    ptr::{self, NonNull},
};

use crate::counter::Counter;

/// How an intrusively counted object is destroyed once its count drops to
/// zero.
pub trait Deleter {
    /// Destroys `object`.
    ///
    /// # Safety
    ///
    /// `object` is valid, unreferenced, and is never used again.
    unsafe fn destroy<T: ?Sized>(object: NonNull<T>);
}

/// Frees an object allocated through `Box`. This is what
/// [`IntrusivePtr::new`] allocates with.
#[derive(Clone, Copy, Debug, Default)]
pub struct DefaultDelete;

impl Deleter for DefaultDelete {
    unsafe fn destroy<T: ?Sized>(object: NonNull<T>) {
        drop(unsafe { Box::from_raw(object.as_ptr()) });
    }
}

/// Runs the object's destructor without freeing its memory, for objects whose
/// storage is owned elsewhere (an arena, a pool, a foreign buffer).
///
/// Objects put in a `Box` (e.g. through [`IntrusivePtr::new`]) with this
/// strategy leak their allocation.
#[derive(Clone, Copy, Debug, Default)]
pub struct DropInPlace;

impl Deleter for DropInPlace {
    unsafe fn destroy<T: ?Sized>(object: NonNull<T>) {
        unsafe { ptr::drop_in_place(object.as_ptr()) };
    }
}

/// A type carrying its own reference count.
///
/// # Safety
///
/// `counter` must always return the same counter, embedded in `self`, and
/// nothing but [`IntrusivePtr`] may modify it while pointers to the object
/// exist. `Deleter` must be able to destroy every object handed to an
/// `IntrusivePtr`.
pub unsafe trait RefCounted {
    type Counter: Counter;
    type Deleter: Deleter;

    /// The embedded counter.
    fn counter(&self) -> &Self::Counter;

    /// Adds a reference, returning the new count.
    fn inc_ref(&self) -> usize {
        self.counter().inc_ref()
    }

    /// Gives up a reference, returning the remaining count. This only counts:
    /// an object cannot free itself through `&self`, so destroying it at zero
    /// is left to [`release`].
    ///
    /// # Safety
    ///
    /// The caller holds one of the counted references and gives it up. If the
    /// result is zero, the caller must destroy the object with
    /// `Self::Deleter`.
    unsafe fn dec_ref(&self) -> usize {
        unsafe { self.counter().dec_ref() }
    }

    /// Current number of [`IntrusivePtr`]s to this object.
    fn ref_count(&self) -> usize {
        self.counter().ref_count()
    }
}

/// Gives up a reference to `object`, destroying it with `T::Deleter` once the
/// last one is gone. Returns the remaining count.
///
/// This is how [`IntrusivePtr`] drops its object.
///
/// # Safety
///
/// `object` points to a live object on which the caller holds a reference,
/// with the provenance `T::Deleter` needs (e.g. from `Box::into_raw` for
/// [`DefaultDelete`]). If this returns zero, `object` is dangling.
pub unsafe fn release<T: ?Sized + RefCounted>(object: NonNull<T>) -> usize {
    let n = unsafe { object.as_ref().dec_ref() };
    if n == 0 {
        log::trace!("intrusive object {:p}: last reference gone, destroying", object);
        unsafe { <T::Deleter as Deleter>::destroy(object) };
    }
    n
}

/// Owning pointer to an object counting its own references.
///
/// Dereferencing an empty pointer panics; use [`IntrusivePtr::get`] to check.
pub struct IntrusivePtr<T: ?Sized + RefCounted> {
    ptr: Option<NonNull<T>>,
    phantom: PhantomData<T>,
}

/// Allocates `value` and returns the first pointer to it.
pub fn make_intrusive<T: RefCounted>(value: T) -> IntrusivePtr<T> {
    IntrusivePtr::new(value)
}

impl<T: RefCounted> IntrusivePtr<T> {
    /// Allocates `value` in a `Box` and returns the first pointer to it.
    pub fn new(value: T) -> Self {
        IntrusivePtr::from_box(Box::new(value))
    }
}

impl<T: ?Sized + RefCounted> IntrusivePtr<T> {
    /// An empty pointer.
    pub const fn null() -> Self {
        IntrusivePtr {
            ptr: None,
            phantom: PhantomData,
        }
    }

    /// Takes a boxed object and adds a reference to it.
    pub fn from_box(object: Box<T>) -> Self {
        // Safety: a fresh box is valid, and only reachable from here.
        unsafe { IntrusivePtr::from_raw(Box::into_raw(object)) }
    }

    /// Adds a reference to the object at `ptr`. A null `ptr` gives an empty
    /// pointer.
    ///
    /// The object may already be referenced by other `IntrusivePtr`s, its
    /// count is simply incremented.
    ///
    /// # Safety
    ///
    /// `ptr` must be null or point to a valid object that `T::Deleter` can
    /// destroy, and that stays valid for as long as its count is positive.
    pub unsafe fn from_raw(ptr: *mut T) -> Self {
        let ptr = NonNull::new(ptr);
        if let Some(p) = ptr {
            unsafe { p.as_ref() }.inc_ref();
        }
        IntrusivePtr {
            ptr,
            phantom: PhantomData,
        }
    }

    /// Converts to a pointer to another view of the same object, typically an
    /// unsizing one such as `|x| x as &dyn Trait`. The count is untouched.
    ///
    /// The view must count and destroy the object the same way, so its
    /// `Counter` and `Deleter` are those of `T`:
    ///
    /// ```compile_fail
    /// use duorc::{DefaultDelete, DropInPlace, IntrusivePtr, RefCounted, SimpleCounter};
    ///
    /// struct Node(SimpleCounter);
    /// unsafe impl RefCounted for Node {
    ///     type Counter = SimpleCounter;
    ///     type Deleter = DefaultDelete;
    ///     fn counter(&self) -> &SimpleCounter { &self.0 }
    /// }
    ///
    /// // a view that would only drop the boxed node in place
    /// trait Leaky: RefCounted<Counter = SimpleCounter, Deleter = DropInPlace> {}
    /// fn as_leaky(_: &Node) -> &(dyn Leaky + 'static) { unimplemented!() }
    ///
    /// let p = IntrusivePtr::new(Node(SimpleCounter::new()));
    /// let _ = unsafe { IntrusivePtr::cast(p, as_leaky) };
    /// ```
    ///
    /// # Safety
    ///
    /// `f` must return `this`'s own object under a different type, sharing its
    /// counter, not some other object it contains or refers to. `U`'s
    /// `Deleter` then destroys the storage `T`'s was given.
    pub unsafe fn cast<U, F>(this: Self, f: F) -> IntrusivePtr<U>
    where
        U: ?Sized + RefCounted<Counter = T::Counter, Deleter = T::Deleter>,
        F: FnOnce(&T) -> &U,
    {
        let ptr = this.ptr.map(|p| {
            let u = NonNull::from(f(unsafe { p.as_ref() }));
            debug_assert!(ptr::eq(u.as_ptr() as *const u8, p.as_ptr() as *const u8));
            u
        });
        // Forget `this` so it doesn't decrement the count, it moved into the
        // new pointer.
        mem::forget(this);
        IntrusivePtr {
            ptr,
            phantom: PhantomData,
        }
    }

    /// Releases the object, leaving `this` empty.
    pub fn reset(this: &mut Self) {
        drop(IntrusivePtr::take(this));
    }

    /// Points `this` at `ptr` instead, adding a reference to it. Nothing
    /// happens if `ptr` is the object already pointed to.
    ///
    /// # Safety
    ///
    /// Same as [`IntrusivePtr::from_raw`].
    pub unsafe fn reset_raw(this: &mut Self, ptr: *mut T) {
        if this.ptr.map_or(ptr.is_null(), |p| ptr::eq(p.as_ptr(), ptr)) {
            return;
        }
        // Acquire first: `ptr` may only be kept alive by the old object.
        *this = unsafe { IntrusivePtr::from_raw(ptr) };
    }

    /// Exchanges the objects of two pointers.
    pub fn swap(this: &mut Self, other: &mut Self) {
        mem::swap(this, other);
    }

    /// Moves the object out of `this`, leaving it empty. Counts are unchanged.
    pub fn take(this: &mut Self) -> Self {
        mem::take(this)
    }

    /// The object, if any.
    pub fn get(this: &Self) -> Option<&T> {
        // Safety: the object is alive while we hold a count on it.
        this.ptr.map(|p| unsafe { &*p.as_ptr() })
    }

    pub fn as_ptr(this: &Self) -> Option<NonNull<T>> {
        this.ptr
    }

    pub fn is_null(this: &Self) -> bool {
        this.ptr.is_none()
    }

    /// The object's reference count, 0 for an empty pointer.
    pub fn use_count(this: &Self) -> usize {
        IntrusivePtr::get(this).map_or(0, |x| x.ref_count())
    }

    /// Returns true if both point to the same object, or are both empty.
    pub fn ptr_eq(this: &Self, other: &Self) -> bool {
        addr(this.ptr) == addr(other.ptr)
    }
}

fn addr<T: ?Sized>(p: Option<NonNull<T>>) -> *const u8 {
    p.map_or(ptr::null(), |p| p.as_ptr() as *const u8)
}

impl<T: ?Sized + RefCounted> Clone for IntrusivePtr<T> {
    fn clone(&self) -> Self {
        if let Some(x) = IntrusivePtr::get(self) {
            x.inc_ref();
        }
        IntrusivePtr {
            ptr: self.ptr,
            phantom: PhantomData,
        }
    }

    fn clone_from(&mut self, source: &Self) {
        if !IntrusivePtr::ptr_eq(self, source) {
            *self = source.clone();
        }
    }
}

impl<T: ?Sized + RefCounted> Drop for IntrusivePtr<T> {
    fn drop(&mut self) {
        if let Some(p) = self.ptr {
            unsafe { release(p) };
        }
    }
}

impl<T: ?Sized + RefCounted> Default for IntrusivePtr<T> {
    fn default() -> Self {
        IntrusivePtr::null()
    }
}

impl<T: ?Sized + RefCounted> Deref for IntrusivePtr<T> {
    type Target = T;

    fn deref(&self) -> &T {
        match IntrusivePtr::get(self) {
            Some(x) => x,
            None => null_deref(),
        }
    }
}

#[cold]
#[track_caller]
fn null_deref() -> ! {
    panic!("dereferenced an empty IntrusivePtr")
}

impl<T: ?Sized + RefCounted, U: ?Sized + RefCounted> PartialEq<IntrusivePtr<U>> for IntrusivePtr<T> {
    fn eq(&self, other: &IntrusivePtr<U>) -> bool {
        addr(self.ptr) == addr(other.ptr)
    }
}

impl<T: ?Sized + RefCounted> Eq for IntrusivePtr<T> {}

impl<T: ?Sized + RefCounted> hash::Hash for IntrusivePtr<T> {
    fn hash<H: hash::Hasher>(&self, state: &mut H) {
        addr(self.ptr).hash(state)
    }
}

impl<T: ?Sized + RefCounted + fmt::Debug> fmt::Debug for IntrusivePtr<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match IntrusivePtr::get(self) {
            Some(x) => fmt::Debug::fmt(x, f),
            None => f.write_str("(null)"),
        }
    }
}

impl<T: ?Sized + RefCounted> fmt::Pointer for IntrusivePtr<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Pointer::fmt(&addr(self.ptr), f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::counter::SimpleCounter;
    use std::{cell::Cell, rc::Rc};

    #[derive(Debug)]
    struct Node {
        value: i32,
        drops: Rc<Cell<usize>>,
        counter: SimpleCounter,
    }

    impl Node {
        fn new(value: i32, drops: &Rc<Cell<usize>>) -> Node {
            Node {
                value,
                drops: drops.clone(),
                counter: SimpleCounter::new(),
            }
        }
    }

    impl Drop for Node {
        fn drop(&mut self) {
            self.drops.set(self.drops.get() + 1);
        }
    }

    unsafe impl RefCounted for Node {
        type Counter = SimpleCounter;
        type Deleter = DefaultDelete;

        fn counter(&self) -> &SimpleCounter {
            &self.counter
        }
    }

    trait Valued: RefCounted<Counter = SimpleCounter, Deleter = DefaultDelete> {
        fn value(&self) -> i32;
    }

    impl Valued for Node {
        fn value(&self) -> i32 {
            self.value
        }
    }

    fn as_valued(x: &Node) -> &(dyn Valued + 'static) {
        x
    }

    #[test]
    fn test_counts() {
        let n = Rc::new(Cell::new(0));
        let a = IntrusivePtr::new(Node::new(1, &n));
        assert_eq!(IntrusivePtr::use_count(&a), 1);
        let copies: Vec<_> = (0..4).map(|_| a.clone()).collect();
        assert_eq!(IntrusivePtr::use_count(&a), 5);
        drop(copies);
        assert_eq!(IntrusivePtr::use_count(&a), 1);
        assert_eq!(n.get(), 0);
        drop(a);
        assert_eq!(n.get(), 1);
    }

    #[test]
    fn test_null() {
        let p: IntrusivePtr<Node> = IntrusivePtr::null();
        assert!(IntrusivePtr::is_null(&p));
        assert_eq!(IntrusivePtr::use_count(&p), 0);
        let q = unsafe { IntrusivePtr::<Node>::from_raw(ptr::null_mut()) };
        assert!(IntrusivePtr::get(&q).is_none());
        assert!(p == q);
        assert_eq!(format!("{:?}", p), "(null)");
    }

    #[test]
    #[should_panic(expected = "empty IntrusivePtr")]
    fn test_null_deref() {
        let p: IntrusivePtr<Node> = IntrusivePtr::default();
        assert_eq!(p.value, 0);
    }

    #[test]
    fn test_take_keeps_count() {
        let n = Rc::new(Cell::new(0));
        let mut a = IntrusivePtr::new(Node::new(1, &n));
        let b = IntrusivePtr::take(&mut a);
        assert!(IntrusivePtr::is_null(&a));
        assert_eq!(IntrusivePtr::use_count(&b), 1);
        assert_eq!(n.get(), 0);
    }

    #[test]
    fn test_from_raw_shares_count() {
        let n = Rc::new(Cell::new(0));
        let a = IntrusivePtr::new(Node::new(1, &n));
        let raw = IntrusivePtr::as_ptr(&a).map_or(ptr::null_mut(), |p| p.as_ptr());
        let b = unsafe { IntrusivePtr::from_raw(raw) };
        assert_eq!(IntrusivePtr::use_count(&a), 2);
        assert!(a == b);
        drop(a);
        assert_eq!(n.get(), 0);
        drop(b);
        assert_eq!(n.get(), 1);
    }

    #[test]
    fn test_reset_raw() {
        let n = Rc::new(Cell::new(0));
        let mut a = IntrusivePtr::new(Node::new(1, &n));
        let b = IntrusivePtr::new(Node::new(2, &n));

        // same object: nothing happens
        let same = IntrusivePtr::as_ptr(&a).map_or(ptr::null_mut(), |p| p.as_ptr());
        unsafe { IntrusivePtr::reset_raw(&mut a, same) };
        assert_eq!(IntrusivePtr::use_count(&a), 1);
        assert_eq!(n.get(), 0);

        let other = IntrusivePtr::as_ptr(&b).map_or(ptr::null_mut(), |p| p.as_ptr());
        unsafe { IntrusivePtr::reset_raw(&mut a, other) };
        assert_eq!(n.get(), 1);
        assert_eq!(a.value, 2);
        assert_eq!(IntrusivePtr::use_count(&b), 2);

        IntrusivePtr::reset(&mut a);
        assert!(IntrusivePtr::is_null(&a));
        assert_eq!(IntrusivePtr::use_count(&b), 1);
    }

    #[test]
    fn test_clone_from() {
        let n = Rc::new(Cell::new(0));
        let a = IntrusivePtr::new(Node::new(1, &n));
        let mut b = a.clone();
        b.clone_from(&a);
        assert_eq!(IntrusivePtr::use_count(&a), 2);

        let c = IntrusivePtr::new(Node::new(3, &n));
        b.clone_from(&c);
        assert_eq!(IntrusivePtr::use_count(&a), 1);
        assert_eq!(IntrusivePtr::use_count(&c), 2);
        assert_eq!(b.value, 3);
    }

    #[test]
    fn test_swap() {
        let n = Rc::new(Cell::new(0));
        let mut a = IntrusivePtr::new(Node::new(1, &n));
        let mut b = IntrusivePtr::null();
        IntrusivePtr::swap(&mut a, &mut b);
        assert!(IntrusivePtr::is_null(&a));
        assert_eq!(b.value, 1);
        assert_eq!(IntrusivePtr::use_count(&b), 1);
    }

    #[test]
    fn test_cast_to_trait_object() {
        let n = Rc::new(Cell::new(0));
        let a = IntrusivePtr::new(Node::new(7, &n));
        let v: IntrusivePtr<dyn Valued> = unsafe { IntrusivePtr::cast(a.clone(), as_valued) };
        assert_eq!(v.value(), 7);
        assert_eq!(IntrusivePtr::use_count(&v), 2);
        assert!(v == a);
        drop(a);
        assert_eq!(IntrusivePtr::use_count(&v), 1);
        drop(v);
        assert_eq!(n.get(), 1);
    }

    #[test]
    fn test_manual_counting() {
        let n = Rc::new(Cell::new(0));
        let a = IntrusivePtr::new(Node::new(1, &n));
        let raw = IntrusivePtr::as_ptr(&a).unwrap();

        // a reference held outside of any pointer
        assert_eq!(a.inc_ref(), 2);
        drop(a);
        assert_eq!(n.get(), 0);
        assert_eq!(unsafe { raw.as_ref() }.ref_count(), 1);

        let b = unsafe { IntrusivePtr::from_raw(raw.as_ptr()) };
        assert_eq!(unsafe { release(raw) }, 1);
        assert_eq!(n.get(), 0);
        drop(b);
        assert_eq!(n.get(), 1);
    }

    #[test]
    fn test_release_destroys_at_zero() {
        let n = Rc::new(Cell::new(0));
        let raw = NonNull::from(Box::leak(Box::new(Node::new(1, &n))));
        assert_eq!(unsafe { raw.as_ref() }.inc_ref(), 1);
        assert_eq!(unsafe { raw.as_ref() }.inc_ref(), 2);
        assert_eq!(unsafe { raw.as_ref().dec_ref() }, 1);
        assert_eq!(n.get(), 0);
        assert_eq!(unsafe { release(raw) }, 0);
        assert_eq!(n.get(), 1);
    }

    #[test]
    fn test_drop_in_place() {
        struct Slot {
            drops: Rc<Cell<usize>>,
            counter: SimpleCounter,
        }
        impl Drop for Slot {
            fn drop(&mut self) {
                self.drops.set(self.drops.get() + 1);
            }
        }
        unsafe impl RefCounted for Slot {
            type Counter = SimpleCounter;
            type Deleter = DropInPlace;

            fn counter(&self) -> &SimpleCounter {
                &self.counter
            }
        }

        let n = Rc::new(Cell::new(0));
        // storage owned by the caller, not by the pointers
        let mut storage = core::mem::MaybeUninit::new(Slot {
            drops: n.clone(),
            counter: SimpleCounter::new(),
        });
        let a = unsafe { IntrusivePtr::from_raw(storage.as_mut_ptr()) };
        let b = a.clone();
        drop(a);
        assert_eq!(n.get(), 0);
        drop(b);
        assert_eq!(n.get(), 1);
    }
}
