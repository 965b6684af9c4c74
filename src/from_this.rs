//! Objects that can hand out [`SharedPtr`]s to themselves.
//!
//! The object embeds a [`WeakSelf`] and implements [`EnableSharedFromThis`].
//! The back-reference is filled in when the object is first put under shared
//! ownership through [`make_shared_enabled`] or
//! [`SharedPtr::enable_shared_from_this`]; until then (and once the last owner
//! is gone) `shared_from_this` fails with [`BadWeakPtr`].
//!
//! ```
//! use duorc::{make_shared_enabled, EnableSharedFromThis, SharedPtr, WeakSelf};
//!
//! struct Session {
//!     id: u32,
//!     this: WeakSelf<Session>,
//! }
//!
//! impl EnableSharedFromThis for Session {
//!     fn weak_self(&self) -> &WeakSelf<Session> {
//!         &self.this
//!     }
//! }
//!
//! let s = make_shared_enabled(Session { id: 7, this: WeakSelf::new() });
//! let again = s.shared_from_this().unwrap();
//! assert_eq!(again.id, 7);
//! assert_eq!(SharedPtr::use_count(&s), 2);
//! ```
//!
//! For objects that need the weak pointer while being built, see
//! [`SharedPtr::new_cyclic`].
use core::{cell::RefCell, fmt};

use crate::{error::BadWeakPtr, shared::SharedPtr, weak::WeakPtr};

/// Weak back-reference an object keeps to itself.
pub struct WeakSelf<T: ?Sized> {
    weak: RefCell<WeakPtr<T>>,
}

impl<T: ?Sized> WeakSelf<T> {
    /// A back-reference not attached to any owner yet.
    pub const fn new() -> Self {
        WeakSelf {
            weak: RefCell::new(WeakPtr::new()),
        }
    }

    fn get(&self) -> WeakPtr<T> {
        self.weak.borrow().clone()
    }

    /// Points the back-reference at `owner`, unless it already observes a live
    /// owner.
    fn attach(&self, owner: &SharedPtr<T>) {
        let mut weak = self.weak.borrow_mut();
        if weak.expired() {
            *weak = SharedPtr::downgrade(owner);
        }
    }
}

impl<T: ?Sized> Default for WeakSelf<T> {
    fn default() -> Self {
        WeakSelf::new()
    }
}

/// Copies are separate objects, not owned by anyone yet.
impl<T: ?Sized> Clone for WeakSelf<T> {
    fn clone(&self) -> Self {
        WeakSelf::new()
    }
}

impl<T: ?Sized> fmt::Debug for WeakSelf<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "(WeakSelf)")
    }
}

/// Gives an object access to the [`SharedPtr`]s owning it.
pub trait EnableSharedFromThis {
    /// The embedded back-reference.
    fn weak_self(&self) -> &WeakSelf<Self>;

    /// A new owner of `self`. Fails if `self` is not owned by a `SharedPtr`
    /// with the back-reference attached.
    fn shared_from_this(&self) -> Result<SharedPtr<Self>, BadWeakPtr> {
        SharedPtr::from_weak(&self.weak_self().get())
    }

    /// A new observer of `self`, empty if `self` is not owned by a `SharedPtr`.
    fn weak_from_this(&self) -> WeakPtr<Self> {
        self.weak_self().get()
    }
}

/// [`make_shared`][crate::make_shared], then attaches the back-reference of
/// the new object.
pub fn make_shared_enabled<T: EnableSharedFromThis>(value: T) -> SharedPtr<T> {
    let this = SharedPtr::new(value);
    SharedPtr::enable_shared_from_this(&this);
    this
}

impl<T: ?Sized + EnableSharedFromThis> SharedPtr<T> {
    /// Attaches the back-reference of the tracked object to `this`, so it can
    /// later call `shared_from_this`. An object that is already attached to a
    /// live owner is left alone.
    pub fn enable_shared_from_this(this: &Self) {
        if let Some(x) = SharedPtr::get(this) {
            x.weak_self().attach(this);
        }
    }
}
