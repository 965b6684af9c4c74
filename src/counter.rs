//! Reference counters that live inside the counted object.
//!
//! A [`Counter`] is the piece an intrusively counted type embeds in itself; the
//! [`IntrusivePtr`][crate::IntrusivePtr] only ever talks to the object through
//! it. [`SimpleCounter`] is the default, non-atomic implementation.
//!
//! The same counter type also backs the strong and weak counts of the shared
//! pointer control blocks.
use core::{cell::Cell, fmt};

/// A reference count embeddable in an object.
///
/// # Safety
///
/// Implementations must count faithfully: `inc_ref` adds exactly one (or
/// panics, never wrapping around), `dec_ref` removes exactly one (and never
/// goes below zero), and `ref_count` reports the current value. The pointers
/// built on top free memory based on these numbers.
pub unsafe trait Counter {
    /// Increments the count, returning the new value.
    fn inc_ref(&self) -> usize;

    /// Decrements the count, returning the new value.
    ///
    /// Decrementing a count that is already zero leaves it at zero.
    ///
    /// # Safety
    ///
    /// The caller gives up one of the references being counted. Dropping a
    /// count nobody held lets the object be freed under its remaining owners.
    unsafe fn dec_ref(&self) -> usize;

    /// Returns the current value.
    fn ref_count(&self) -> usize;
}

/// Non-atomic counter, starts at zero.
#[derive(Default)]
pub struct SimpleCounter {
    count: Cell<usize>,
}

impl SimpleCounter {
    /// A counter starting at zero.
    pub const fn new() -> Self {
        SimpleCounter::with_count(0)
    }

    pub(crate) const fn with_count(count: usize) -> Self {
        SimpleCounter {
            count: Cell::new(count),
        }
    }
}

unsafe impl Counter for SimpleCounter {
    #[inline]
    fn inc_ref(&self) -> usize {
        let Some(n) = self.count.get().checked_add(1) else {
            overflow();
        };
        self.count.set(n);
        n
    }

    #[inline]
    unsafe fn dec_ref(&self) -> usize {
        let n = self.count.get().saturating_sub(1);
        self.count.set(n);
        n
    }

    #[inline]
    fn ref_count(&self) -> usize {
        self.count.get()
    }
}

// There is no `abort()` without std, and wrapping back to zero would free the
// object under its owners.
#[cold]
#[inline(never)]
fn overflow() -> ! {
    panic!("reference count overflow")
}

/// Cloning the object that embeds a counter produces a new, unowned object, so
/// the clone starts back at zero.
impl Clone for SimpleCounter {
    fn clone(&self) -> Self {
        SimpleCounter::new()
    }
}

impl fmt::Debug for SimpleCounter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("SimpleCounter").field(&self.count.get()).finish()
    }
}
