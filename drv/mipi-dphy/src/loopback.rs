// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! TX-to-RX loopback.
//!
//! With a DSI transmitter wired back into a CSI-2 receiver, the receiver
//! can only find stopstate once the transmitter is driving the lanes, so
//! the two have to come up in that order.

use embedded_hal::blocking::delay::DelayUs;
use ringbuf::{ringbuf, ringbuf_entry};

use crate::bringup::{Dphy, PeripheralClocks};
use crate::{DphyError, RegisterRw, Role};

#[derive(Copy, Clone, PartialEq)]
enum Trace {
    None,
    TxUp,
    TxFailed(DphyError),
    RxFailed(DphyError),
    Up,
}

ringbuf!(Trace, 8, Trace::None);

/// Brings up `tx` and then `rx` on the same link settings.
///
/// If `rx` fails, `tx` is left running (tearing it down is up to the
/// caller) and the receiver's error is returned.  Both must have the roles
/// their names suggest, or this returns `NotInitialized` without touching
/// either.
pub fn bring_up<TR, TC, TD, RR, RC, RD>(
    tx: &mut Dphy<TR, TC, TD>,
    rx: &mut Dphy<RR, RC, RD>,
    link_frequency_hz: u32,
    n_lanes: u8,
) -> Result<(), DphyError>
where
    TR: RegisterRw,
    TC: PeripheralClocks,
    TD: DelayUs<u32>,
    RR: RegisterRw,
    RC: PeripheralClocks,
    RD: DelayUs<u32>,
{
    if tx.role() != Role::Transmitter || rx.role() != Role::Receiver {
        return Err(DphyError::NotInitialized);
    }

    if let Err(e) = tx.initialize(link_frequency_hz, n_lanes) {
        ringbuf_entry!(Trace::TxFailed(e));
        return Err(e);
    }
    ringbuf_entry!(Trace::TxUp);

    if let Err(e) = rx.initialize(link_frequency_hz, n_lanes) {
        ringbuf_entry!(Trace::RxFailed(e));
        return Err(e);
    }
    ringbuf_entry!(Trace::Up);
    Ok(())
}
