//! Errors from the library.

/// Returned when promoting a [`WeakPtr`][crate::WeakPtr] whose object has
/// already been destroyed, or that was never attached to one.
///
/// [`WeakPtr::lock`][crate::WeakPtr::lock] is the non-failing counterpart, it
/// yields an empty [`SharedPtr`][crate::SharedPtr] instead.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, thiserror::Error)]
#[error("bad weak pointer: object already destroyed")]
pub struct BadWeakPtr;
