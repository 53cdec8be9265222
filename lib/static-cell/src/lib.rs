// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! A single-borrower cell for statics.
//!
//! The trace buffers in this workspace live in `static`s and are written from
//! driver code that runs on one thread of control. `StaticCell` gives that
//! code `&mut` access without `static mut`, and turns an accidental second
//! borrow (say, a trace entry recorded from an interrupt handler while the
//! main loop is mid-entry) into a panic instead of aliasing.

#![cfg_attr(not(test), no_std)]

use core::cell::UnsafeCell;
use core::sync::atomic::{AtomicBool, Ordering};

/// A RefCell-style container that can be used in a static for cases where only
/// a single borrow needs to happen at any given time.
///
/// This only provides `mut` access. It does _not_ provide the many-reader
/// one-writer behavior of `RefCell`, only the one-writer part.
pub struct StaticCell<T> {
    borrowed: AtomicBool,
    cell: UnsafeCell<T>,
}

impl<T> StaticCell<T> {
    /// Creates a `StaticCell` containing `contents`.
    pub const fn new(contents: T) -> Self {
        Self {
            borrowed: AtomicBool::new(false),
            cell: UnsafeCell::new(contents),
        }
    }

    /// Gets mutable access to the contents of `self`.
    ///
    /// If a `StaticRef` for `self` still exists anywhere in the program, this
    /// will panic.
    pub fn borrow_mut(&self) -> StaticRef<'_, T> {
        if self.borrowed.swap(true, Ordering::Acquire) {
            panic!();
        }
        // Safety: the check above ensures that we are not producing an aliasing
        // &mut to our contents.
        unsafe {
            StaticRef {
                contents: &mut *self.cell.get(),
                borrow: &self.borrowed,
            }
        }
    }
}

unsafe impl<T> Sync for StaticCell<T> where for<'a> &'a mut T: Send {}

pub struct StaticRef<'a, T> {
    contents: &'a mut T,
    borrow: &'a AtomicBool,
}

impl<T> Drop for StaticRef<'_, T> {
    fn drop(&mut self) {
        self.borrow.store(false, Ordering::Release);
    }
}

impl<T> core::ops::Deref for StaticRef<'_, T> {
    type Target = T;

    fn deref(&self) -> &Self::Target {
        &*self.contents
    }
}

impl<T> core::ops::DerefMut for StaticRef<'_, T> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.contents
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn borrow_is_released_on_drop() {
        let cell = StaticCell::new(3u32);
        *cell.borrow_mut() += 1;
        *cell.borrow_mut() += 1;
        assert_eq!(*cell.borrow_mut(), 5);
    }

    #[test]
    #[should_panic]
    fn second_borrow_panics() {
        let cell = StaticCell::new(0u8);
        let _first = cell.borrow_mut();
        let _second = cell.borrow_mut();
    }
}
