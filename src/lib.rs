/*!
This crate provides two families of reference-counted pointers, in the spirit
of C++'s [`shared_ptr`](https://en.cppreference.com/w/cpp/memory/shared_ptr)
and [`boost::intrusive_ptr`](https://www.boost.org/doc/libs/release/libs/smart_ptr/doc/html/smart_ptr.html#intrusive_ptr):

- [`SharedPtr<T>`] and [`WeakPtr<T>`], which keep their counts in a separate
  *control block* shared by every pointer to the same object.
- [`IntrusivePtr<T>`], which keeps its count inside `T` itself.

```rust
    use duorc::{make_shared, SharedPtr, WeakPtr};

    let a = make_shared(String::from("hello"));
    let b = a.clone();
    let w: WeakPtr<String> = SharedPtr::downgrade(&a);
    assert_eq!(SharedPtr::use_count(&a), 2);

    drop(a);
    drop(b);
    // the string is gone, the weak pointer knows it
    assert!(w.expired());
    assert!(SharedPtr::from_weak(&w).is_err());
```

# Control blocks

A control block holds a strong count (the number of `SharedPtr`s) and a weak
count (the number of `WeakPtr`s). When the strong count drops to zero the
object is destroyed, right away, however many weak pointers remain. The block
itself is freed once both counts are zero.

There are two kinds of block, picked when the first `SharedPtr` is created:

- [`SharedPtr::new`] (or [`make_shared`]) puts the object inside the block, one
  allocation for both. Destroying the object drops it in place; its storage goes
  away with the block.
- [`SharedPtr::from_box`] (or the unsafe [`SharedPtr::from_raw`]) keeps the
  caller's allocation and puts only the counts in a new block. Destroying the
  object frees the box.

Nothing else differs, so every other operation behaves the same for both.

# Aliasing

A `SharedPtr` tracks an address and a block separately. The address can be any
part of the owned object, and the pointer keeps the whole object alive:

```rust
    use duorc::SharedPtr;

    let a: SharedPtr<[i32; 3]> = SharedPtr::new([1, 2, 3]);

    // convert the sized array into a slice
    let b: SharedPtr<[i32]> = SharedPtr::project(a, |x| &x[..]);

    // get a pointer to one element of the array, sharing b's block
    let c: SharedPtr<i32> = SharedPtr::alias(&b, |x| &x[1]);
    drop(b);

    assert_eq!(*c, 2);
```

Since the tracked address is what you see, equality is identity of tracked
addresses: two pointers to different fields of one object are different, and
[`SharedPtr::root_ptr_eq`] tells whether they share a block.

# Weak pointers

[`WeakPtr::lock`] returns an owner if the object still exists, or an empty
`SharedPtr` otherwise. [`SharedPtr::from_weak`] (also available as `TryFrom`)
does the same check but fails with [`BadWeakPtr`] instead.

Objects that need a pointer to themselves can either be built with
[`SharedPtr::new_cyclic`], or embed a [`WeakSelf`] and implement
[`EnableSharedFromThis`].

# Intrusive pointers

An intrusively counted type embeds a [`Counter`] (usually [`SimpleCounter`])
and implements [`RefCounted`], which also picks the [`Deleter`] used once the
count reaches zero: [`DefaultDelete`] frees a `Box`, [`DropInPlace`] only runs
the destructor. There are no weak intrusive pointers, since nothing outlives
the object to observe it.

# Differences from `std::rc::Rc`

Pointers may be empty, like C++ pointers. [`Deref`][core::ops::Deref] on an
empty pointer panics; use `get()` to check first.

`SharedPtr::ptr_eq(a, b)` compares tracked addresses, which is not the same as
asking whether two pointers share an allocation; see `root_ptr_eq`.

`SharedPtr::from_box` does not copy the object from the original box. Instead
it takes ownership of the box as-is, with the counts in a separate allocation.

Counts are plain `Cell`s: none of the pointers are `Send` or `Sync`.

Implicit conversion from `SharedPtr<T>` to `SharedPtr<dyn Trait>` is not
supported, because that requires some unstable traits. However you can do the
conversion explicitly with `SharedPtr::project`.

If you leak so many pointers that a count overflows, the std pointers will
abort. There is no `abort()` in `no_std`, so here the increment panics
instead, leaving the count at its maximum.
*/
#![cfg_attr(not(test), no_std)]

extern crate alloc;

mod block;
pub mod counter;
pub mod error;
pub mod from_this;
pub mod intrusive;
pub mod shared;
pub mod weak;

pub use self::counter::{Counter, SimpleCounter};
pub use self::error::BadWeakPtr;
pub use self::from_this::{make_shared_enabled, EnableSharedFromThis, WeakSelf};
pub use self::intrusive::{make_intrusive, DefaultDelete, Deleter, DropInPlace, IntrusivePtr, RefCounted};
pub use self::shared::{make_shared, make_shared_with, SharedPtr};
pub use self::weak::WeakPtr;
