// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Static trace ring buffers for drivers
//!
//! Bring-up code that talks to analog blocks tends to fail in ways that are
//! only visible after the fact: a lane that never reached stopstate, a PLL that
//! never locked, a test register that was written with the wrong port
//! selected.  The ring buffers in this crate record those events in RAM so
//! they can be read back with a debugger once the failure has happened.
//!
//! ## Constraints
//!
//! The type in the ring buffer must implement both `Copy` and `PartialEq`.
//!
//! If you use the variants of the `ringbuf!` macro that leave the name of the
//! data structure implicit, you can only have one per module. (You can lift
//! this constraint by providing a name.)
//!
//! ## Creating a ring buffer
//!
//! Ring buffers are instantiated with the [`ringbuf!`] macro, to which one
//! must provide the type of per-entry payload, the number of entries, and a
//! static initializer:
//!
//! ```ignore
//! #[derive(Copy, Clone, PartialEq)]
//! enum Trace {
//!     None,
//!     Stopstate { observed: u32, polls: u32 },
//! }
//! ringbuf!(Trace, 16, Trace::None);
//! ```
//!
//! Entries are recorded with [`ringbuf_entry!`]:
//!
//! ```ignore
//! ringbuf_entry!(Trace::Stopstate { observed, polls });
//! ```
//!
//! A name can be given to distinguish buffers within one module:
//!
//! ```ignore
//! ringbuf!(TCI_RINGBUF, (u16, u8), 32, (0, 0));
//! ringbuf_entry!(TCI_RINGBUF, (addr, data));
//! ```
//!
//! ## Inspecting a ring buffer
//!
//! Each buffer is a `#[used]` static, so it survives linking even if nothing
//! reads it.  With symbols loaded, GDB can print it directly:
//!
//! ```console
//! (gdb) set print pretty on
//! (gdb) print drv_mipi_dphy::bringup::__RINGBUF
//! ```
//!
//! Each entry carries the source line that recorded it, a generation number
//! that increments each time the slot is reused, and a count of identical
//! back-to-back entries.

#![cfg_attr(not(test), no_std)]

/// Re-export the bits we use from `static_cell` so that code generated by the
/// macros is guaranteed to be able to find them.
pub use static_cell::StaticCell;

/// Declares a ringbuffer in the current module or context.
///
/// `ringbuf!(NAME, Type, N, expr)` makes a ringbuffer named `NAME`,
/// containing entries of type `Type`, with room for `N` such entries, all of
/// which are initialized to `expr`.
///
/// The resulting ringbuffer will be static, so `NAME` should be uppercase.
///
/// The actual type of `name` will be `StaticCell<Ringbuf<T, N>>`.
///
/// To support the common case of having one quickly-installed ringbuffer per
/// module, if you omit the name, it will default to `__RINGBUF`.
#[cfg(not(feature = "disabled"))]
#[macro_export]
macro_rules! ringbuf {
    ($name:ident, $t:ty, $n:expr, $init:expr) => {
        #[used]
        static $name: $crate::StaticCell<$crate::Ringbuf<$t, $n>> =
            $crate::StaticCell::new($crate::Ringbuf {
                last: None,
                buffer: [$crate::RingbufEntry {
                    line: 0,
                    generation: 0,
                    count: 0,
                    payload: $init,
                }; $n],
            });
    };
    ($t:ty, $n:expr, $init:expr) => {
        $crate::ringbuf!(__RINGBUF, $t, $n, $init);
    };
}

#[cfg(feature = "disabled")]
#[macro_export]
macro_rules! ringbuf {
    ($name:ident, $t:ty, $n:expr, $init:expr) => {
        #[allow(dead_code)]
        const _: $t = $init;
    };
    ($t:ty, $n:expr, $init:expr) => {
        #[allow(dead_code)]
        const _: $t = $init;
    };
}

/// Inserts data into a named ringbuffer (which should have been declared with
/// the `ringbuf!` macro).
///
/// `ringbuf_entry!(NAME, expr)` will insert `expr` into the ringbuffer called
/// `NAME`.
///
/// If you declared your ringbuffer without a name, you can also use this
/// without a name, and it will default to `__RINGBUF`.
#[cfg(not(feature = "disabled"))]
#[macro_export]
macro_rules! ringbuf_entry {
    ($buf:expr, $payload:expr) => {{
        // Evaluate both buf and payload, without letting them access each
        // other, by evaluating them in a tuple where each cannot
        // accidentally use the other's binding.
        let (p, buf) = ($payload, &$buf);
        // Invoke these functions using slightly weird syntax to avoid
        // accidentally calling a _different_ routine called borrow_mut or
        // entry.
        $crate::Ringbuf::entry(
            &mut *$crate::StaticCell::borrow_mut(buf),
            line!() as u16,
            p,
        );
    }};
    ($payload:expr) => {
        $crate::ringbuf_entry!(__RINGBUF, $payload)
    };
}

#[cfg(feature = "disabled")]
#[macro_export]
macro_rules! ringbuf_entry {
    ($buf:expr, $payload:expr) => {{
        let _ = &$payload;
    }};
    ($payload:expr) => {{
        let _ = &$payload;
    }};
}

///
/// The structure of a single [`Ringbuf`] entry, carrying a payload of arbitrary
/// type.  When a ring buffer entry is generated with an identical payload to
/// the most recent entry (in terms of both `line` and `payload`), `count` will
/// be incremented rather than generating a new entry.
///
#[derive(Debug, Copy, Clone)]
pub struct RingbufEntry<T: Copy + PartialEq> {
    pub line: u16,
    pub generation: u16,
    pub count: u32,
    pub payload: T,
}

///
/// A ring buffer of parametrized type and size.  In practice, instantiating
/// this directly is strange -- see the [`ringbuf!`] macro.
///
#[derive(Debug)]
pub struct Ringbuf<T: Copy + PartialEq, const N: usize> {
    pub last: Option<usize>,
    pub buffer: [RingbufEntry<T>; N],
}

impl<T: Copy + PartialEq, const N: usize> Ringbuf<T, { N }> {
    pub fn entry(&mut self, line: u16, payload: T) {
        // None is treated as an out-of-range index, so the first entry lands
        // in slot 0 and never bumps the count of a stale slot.
        let last = self.last.unwrap_or(usize::MAX);

        // get_mut also covers a corrupted `last`: we just start over at 0
        // rather than taking a bounds-check panic.
        if let Some(ent) = self.buffer.get_mut(last) {
            if ent.line == line && ent.payload == payload {
                // Only reuse this entry if we don't overflow the
                // count.
                if let Some(new_count) = ent.count.checked_add(1) {
                    ent.count = new_count;
                    return;
                }
            }
        }

        // Not a remainder: most of our targets have no hardware divide, and
        // this also turns usize::MAX into 0 for the starting condition.
        let ndx = {
            let last_plus_1 = last.wrapping_add(1);
            if last_plus_1 >= self.buffer.len() {
                0
            } else {
                last_plus_1
            }
        };

        let ent = &mut self.buffer[ndx];
        *ent = RingbufEntry {
            line,
            payload,
            count: 1,
            generation: ent.generation.wrapping_add(1),
        };

        self.last = Some(ndx);
    }
}
