//! Control blocks: the strong/weak counts shared by every
//! [`SharedPtr`][crate::SharedPtr] and [`WeakPtr`][crate::WeakPtr] to one
//! object, plus how to destroy that object.
//!
//! There are two kinds of block. [`PtrBlock`] owns a separately boxed object
//! and frees the box when the strong count drops to zero. [`InlineBlock`]
//! stores the object inline, in the same allocation as the counts, and only
//! drops it in place; its storage goes away together with the block.
//!
//! All the counting is done on the common [`ControlBlock`] header. The only
//! per-kind behaviour is behind the two function pointers it carries, picked
//! when the block is allocated.
use alloc::boxed::Box;
use core::{
    mem::{self, MaybeUninit},
    ptr::{self, NonNull},
};

use crate::counter::{Counter, SimpleCounter};

/// Counts and destructors for one managed object. Always the first field of
/// a `#[repr(C)]` block, so a pointer to the block is a pointer to the header.
pub(crate) struct ControlBlock {
    strong: SimpleCounter,
    // Weak pointers only; strong owners do not add to it.
    weak: SimpleCounter,
    drop_payload: unsafe fn(NonNull<ControlBlock>),
    release: unsafe fn(NonNull<ControlBlock>),
    object_span: unsafe fn(NonNull<ControlBlock>) -> (*const u8, usize),
}

/// The per-kind half of a block.
///
/// # Safety
///
/// Implementors must be `#[repr(C)]` with a `ControlBlock` as first field.
unsafe trait Payload: Sized {
    /// Destroys the managed object, leaving the block allocation alone.
    ///
    /// # Safety
    ///
    /// `this` points to a live block whose object has not been destroyed yet.
    /// Only raw pointers may be used, weak pointers owned by the object will
    /// touch the header while it is being dropped.
    unsafe fn drop_payload(this: *mut Self);

    /// Address and size of the managed object.
    ///
    /// # Safety
    ///
    /// `this` points to a live block whose object has not been destroyed yet.
    unsafe fn object_span(this: *const Self) -> (*const u8, usize);
}

impl ControlBlock {
    fn new<B: Payload>(strong: usize, weak: usize) -> ControlBlock {
        ControlBlock {
            strong: SimpleCounter::with_count(strong),
            weak: SimpleCounter::with_count(weak),
            drop_payload: drop_payload::<B>,
            release: release::<B>,
            object_span: object_span::<B>,
        }
    }

    /// Number of owning pointers.
    #[inline]
    pub(crate) fn get_count(&self) -> usize {
        self.strong.ref_count()
    }

    /// Number of observing pointers.
    #[inline]
    pub(crate) fn weak_count(&self) -> usize {
        self.weak.ref_count()
    }

    #[inline]
    pub(crate) fn increment_strong(&self) {
        self.strong.inc_ref();
    }

    /// Adds an owner only if the object is still alive. This is the promotion
    /// step behind `WeakPtr::lock` and `SharedPtr::from_weak`.
    #[inline]
    pub(crate) fn try_increment_strong(&self) -> bool {
        if self.strong.ref_count() == 0 {
            false
        } else {
            self.strong.inc_ref();
            true
        }
    }

    #[inline]
    pub(crate) fn increment_weak(&self) {
        self.weak.inc_ref();
    }

    /// Returns true if the `len` bytes at `start` lie within the object this
    /// block owns. Aliasing pointers may track memory that is not.
    ///
    /// # Safety
    ///
    /// `this` is a live block whose object has not been destroyed yet.
    pub(crate) unsafe fn owns(this: NonNull<ControlBlock>, start: *const u8, len: usize) -> bool {
        let object_span = unsafe { this.as_ref() }.object_span;
        let (root, root_len) = unsafe { object_span(this) };
        let (start, root) = (start as usize, root as usize);
        match start.checked_add(len) {
            Some(end) => start >= root && end <= root + root_len,
            None => false,
        }
    }

    /// Drops one owner. The last one destroys the object, and releases the
    /// block too if nothing observes it.
    ///
    /// # Safety
    ///
    /// The caller gives up one strong count on a live block.
    pub(crate) unsafe fn decrement_strong(this: NonNull<ControlBlock>) {
        let block = unsafe { this.as_ref() };
        if unsafe { block.strong.dec_ref() } != 0 {
            return;
        }
        log::trace!("control block {:p}: last owner gone, destroying object", this);

        // Hold the block open while the object is dropped: it may own weak
        // pointers to itself, and the last of those must not free the header.
        block.weak.inc_ref();
        let drop_payload = block.drop_payload;
        unsafe {
            drop_payload(this);
            ControlBlock::decrement_weak(this);
        }
    }

    /// Drops one observer. Releases the block if it was the last one and the
    /// object is already gone.
    ///
    /// # Safety
    ///
    /// The caller gives up one weak count on a live block.
    pub(crate) unsafe fn decrement_weak(this: NonNull<ControlBlock>) {
        let block = unsafe { this.as_ref() };
        if unsafe { block.weak.dec_ref() } != 0 || block.strong.ref_count() != 0 {
            return;
        }
        log::trace!("control block {:p}: released", this);
        let release = block.release;
        unsafe { release(this) };
    }
}

unsafe fn drop_payload<B: Payload>(this: NonNull<ControlBlock>) {
    unsafe { B::drop_payload(this.cast::<B>().as_ptr()) }
}

unsafe fn release<B: Payload>(this: NonNull<ControlBlock>) {
    drop(unsafe { Box::from_raw(this.cast::<B>().as_ptr()) });
}

unsafe fn object_span<B: Payload>(this: NonNull<ControlBlock>) -> (*const u8, usize) {
    unsafe { B::object_span(this.cast::<B>().as_ptr()) }
}

/// Block for an object allocated on its own, e.g. a `Box<T>` handed over by
/// the caller.
#[repr(C)]
pub(crate) struct PtrBlock<T: ?Sized> {
    header: ControlBlock,
    object: NonNull<T>,
}

impl<T: ?Sized> PtrBlock<T> {
    /// Takes ownership of `object`, returning the new block (strong count 1)
    /// and the object's address.
    pub(crate) fn allocate(object: Box<T>) -> (NonNull<ControlBlock>, NonNull<T>) {
        let object = NonNull::from(Box::leak(object));
        let b = Box::into_raw(Box::new(PtrBlock {
            header: ControlBlock::new::<PtrBlock<T>>(1, 0),
            object,
        }));
        // Safety: `Box::into_raw` never returns null.
        let header = unsafe { NonNull::new_unchecked(b as *mut ControlBlock) };
        (header, object)
    }
}

unsafe impl<T: ?Sized> Payload for PtrBlock<T> {
    unsafe fn drop_payload(this: *mut Self) {
        let object = unsafe { ptr::addr_of!((*this).object).read() };
        drop(unsafe { Box::from_raw(object.as_ptr()) });
    }

    unsafe fn object_span(this: *const Self) -> (*const u8, usize) {
        let object = unsafe { ptr::addr_of!((*this).object).read() };
        (object.as_ptr() as *const u8, mem::size_of_val(unsafe { object.as_ref() }))
    }
}

/// Block with the object stored inline, one allocation for both.
#[repr(C)]
pub(crate) struct InlineBlock<T> {
    header: ControlBlock,
    value: MaybeUninit<T>,
}

impl<T> InlineBlock<T> {
    /// Allocates a block around `value`, with a strong count of 1.
    pub(crate) fn allocate(value: T) -> (NonNull<ControlBlock>, NonNull<T>) {
        let b = Box::into_raw(Box::new(InlineBlock {
            header: ControlBlock::new::<InlineBlock<T>>(1, 0),
            value: MaybeUninit::new(value),
        }));
        unsafe { InlineBlock::parts(b) }
    }

    /// Allocates a block with no value yet. It starts with no owners and a
    /// single weak count held by the caller, so nothing can reach the value
    /// before it is written.
    pub(crate) fn allocate_uninit() -> (NonNull<ControlBlock>, NonNull<T>) {
        let b = Box::into_raw(Box::new(InlineBlock {
            header: ControlBlock::new::<InlineBlock<T>>(0, 1),
            value: MaybeUninit::<T>::uninit(),
        }));
        unsafe { InlineBlock::parts(b) }
    }

    /// Marks the value of a block from `allocate_uninit` as initialized,
    /// giving the caller its first strong count.
    ///
    /// # Safety
    ///
    /// The value must have been written, and the strong count still be zero.
    pub(crate) unsafe fn mark_initialized(header: NonNull<ControlBlock>) {
        let block = unsafe { header.as_ref() };
        debug_assert_eq!(block.get_count(), 0, "no owner may exist before initialization");
        block.increment_strong();
    }

    unsafe fn parts(b: *mut InlineBlock<T>) -> (NonNull<ControlBlock>, NonNull<T>) {
        unsafe {
            let value = ptr::addr_of_mut!((*b).value) as *mut T;
            (
                NonNull::new_unchecked(b as *mut ControlBlock),
                NonNull::new_unchecked(value),
            )
        }
    }
}

unsafe impl<T> Payload for InlineBlock<T> {
    unsafe fn drop_payload(this: *mut Self) {
        unsafe { ptr::drop_in_place(ptr::addr_of_mut!((*this).value) as *mut T) };
    }

    unsafe fn object_span(this: *const Self) -> (*const u8, usize) {
        (unsafe { ptr::addr_of!((*this).value) } as *const u8, mem::size_of::<T>())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::{cell::Cell, rc::Rc};

    struct DropCounter(Rc<Cell<usize>>);
    impl Drop for DropCounter {
        fn drop(&mut self) {
            self.0.set(self.0.get() + 1);
        }
    }

    fn counts(b: NonNull<ControlBlock>) -> (usize, usize) {
        let b = unsafe { b.as_ref() };
        (b.get_count(), b.weak_count())
    }

    #[test]
    fn test_inline_strong_only() {
        let n = Rc::new(Cell::new(0));
        let (b, v) = InlineBlock::allocate(DropCounter(n.clone()));
        assert!(Rc::ptr_eq(unsafe { &v.as_ref().0 }, &n));
        assert_eq!(counts(b), (1, 0));
        unsafe { b.as_ref() }.increment_strong();
        unsafe { ControlBlock::decrement_strong(b) };
        assert_eq!(n.get(), 0);
        unsafe { ControlBlock::decrement_strong(b) };
        assert_eq!(n.get(), 1);
    }

    #[test]
    fn test_ptr_block_outlived_by_weak() {
        let n = Rc::new(Cell::new(0));
        let (b, _) = PtrBlock::allocate(Box::new(DropCounter(n.clone())));
        unsafe { b.as_ref() }.increment_weak();
        unsafe { ControlBlock::decrement_strong(b) };
        // object gone, block still readable through the weak count
        assert_eq!(n.get(), 1);
        assert_eq!(counts(b), (0, 1));
        assert!(!unsafe { b.as_ref() }.try_increment_strong());
        assert_eq!(counts(b), (0, 1));
        unsafe { ControlBlock::decrement_weak(b) };
        assert_eq!(n.get(), 1);
    }

    #[test]
    fn test_try_increment_alive() {
        let (b, _) = InlineBlock::allocate(5u32);
        assert!(unsafe { b.as_ref() }.try_increment_strong());
        assert_eq!(counts(b), (2, 0));
        unsafe {
            ControlBlock::decrement_strong(b);
            ControlBlock::decrement_strong(b);
        }
    }

    #[test]
    fn test_unsized_ptr_block() {
        let (b, p) = PtrBlock::<[u8]>::allocate(vec![1u8, 2, 3].into_boxed_slice());
        assert_eq!(unsafe { p.as_ref() }, &[1, 2, 3]);
        unsafe { ControlBlock::decrement_strong(b) };
    }

    #[test]
    fn test_owns_object_span() {
        let (b, v) = InlineBlock::allocate([0u32; 4]);
        let start = v.as_ptr() as *const u8;
        unsafe {
            assert!(ControlBlock::owns(b, start, 16));
            assert!(ControlBlock::owns(b, start.add(4), 4));
            assert!(!ControlBlock::owns(b, start.add(4), 16));
            assert!(!ControlBlock::owns(b, &0u32 as *const u32 as *const u8, 4));
            ControlBlock::decrement_strong(b);
        }

        let (b, v) = PtrBlock::<[u8]>::allocate(vec![1u8, 2, 3].into_boxed_slice());
        let start = v.as_ptr() as *const u8;
        unsafe {
            assert!(ControlBlock::owns(b, start, 3));
            assert!(!ControlBlock::owns(b, start, 4));
            ControlBlock::decrement_strong(b);
        }
    }

    #[test]
    fn test_uninit_never_drops_value() {
        let n = Rc::new(Cell::new(0));
        let (b, _) = InlineBlock::<DropCounter>::allocate_uninit();
        assert_eq!(counts(b), (0, 1));
        // abandoned before the value was written
        unsafe { ControlBlock::decrement_weak(b) };
        assert_eq!(n.get(), 0);
    }
}
