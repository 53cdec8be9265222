// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Bring-up engine for MIPI D-PHYs sitting behind a CSI-2 host (receive) or
//! a DSI controller (transmit).
//!
//! The PHY itself is an opaque analog block.  Almost everything interesting
//! about it is configured through a bit-banged test port (see [`tci`]), and
//! the handful of things that aren't are plain fields in the wrapper's
//! register block (see [`regs`]).  On top of that this crate provides:
//!
//! - the lookup tables that turn a lane bit rate into PHY range codes
//!   ([`freq`]) and PLL divider settings ([`pll`]);
//! - the lane bring-up sequence and the per-instance lifecycle ([`Dphy`]);
//! - the IPI timing/line-buffer budget for the CSI-2 host ([`ipi`]);
//! - the TX-then-RX ordering needed for loopback testing ([`loopback`]).
//!
//! Hardware is reached only through traits: [`RegisterRw`] for registers,
//! [`PeripheralClocks`] for the clock gate, and `embedded_hal`'s `DelayUs`
//! for microsecond waits.  Callers must serialize access to a given PHY; the
//! API does this by requiring `&mut Dphy` for anything that touches it.

#![cfg_attr(not(test), no_std)]

use bitflags::bitflags;
use num_derive::FromPrimitive;
use static_assertions::const_assert;

mod bringup;
pub mod freq;
pub mod ipi;
pub mod loopback;
pub mod pll;
pub mod regs;
pub mod tci;

#[cfg(test)]
mod fake;

pub use bringup::{
    BringUpStage, Dphy, LinkFault, LinkParams, LinkState, PeripheralClocks,
};
pub use ipi::{
    ipi_configure, ControllerTiming, Csi2Host, DataType, IpiColorMode,
    IpiConfigRequest, IpiMode, IpiTimingBudget,
};
pub use regs::{Mmio, RegisterRw};
pub use tci::{MemTestPort, Port, Tci, TestCode, TestPort};

/// Errors returned by the bring-up engine.
///
/// These are `repr(u32)` and start at 1 so that they can be passed over IPC
/// as a response code.
#[derive(Copy, Clone, Debug, Eq, PartialEq, FromPrimitive)]
#[repr(u32)]
pub enum DphyError {
    /// Lane bit rate outside of [80, 2500] Mbps, or a PLL configuration
    /// whose input divider puts the PLL reference outside of 8-24 MHz.
    InvalidFrequency = 1,
    /// The stopstate mask never matched within the poll budget.
    LaneSyncTimeout,
    /// The IPI line buffer is too shallow for the requested geometry.
    InsufficientBuffer,
    /// The operation needs a lane-synced receive PHY.
    NotInitialized,
    /// Only one or two data lanes are supported.
    InvalidLaneCount,
    /// The TX PLL never reported lock within the poll budget.
    PllLockTimeout,
    /// Zero-width frame, or timing that doesn't fit the IPI registers.
    InvalidGeometry,
}

impl From<DphyError> for u32 {
    fn from(e: DphyError) -> Self {
        e as u32
    }
}

/// Which side of the link a PHY instance drives.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Role {
    /// Camera side: the PHY feeds a CSI-2 host.
    Receiver,
    /// Display side: the PHY is fed by a DSI controller, and owns the PLL.
    Transmitter,
}

impl Role {
    /// The test port holding this role's analog configuration.
    pub fn test_port(self) -> Port {
        match self {
            Role::Receiver => Port::Rx,
            Role::Transmitter => Port::Tx,
        }
    }
}

/// Most data lanes the PHY wrapper brings out.
pub const MAX_DATA_LANES: u8 = 2;

bitflags! {
    /// Lanes of the PHY, in the bit layout shared by the stopstate status
    /// register and the `basedir`/`forcerxmode` fields.
    #[derive(Copy, Clone, Debug, Eq, PartialEq)]
    pub struct LaneMask: u32 {
        const LANE0 = 1 << 0;
        const LANE1 = 1 << 1;
        const CLOCK = 1 << 2;
    }
}

impl LaneMask {
    /// The clock lane plus `n_lanes` data lanes, or `None` if the PHY doesn't
    /// have that many.
    pub fn for_lanes(n_lanes: u8) -> Option<Self> {
        match n_lanes {
            1 => Some(Self::CLOCK | Self::LANE0),
            2 => Some(Self::CLOCK | Self::LANE0 | Self::LANE1),
            _ => None,
        }
    }

    /// Number of data lanes set.
    pub fn data_lanes(self) -> u8 {
        self.difference(Self::CLOCK).bits().count_ones() as u8
    }
}

/// Board- and datasheet-derived constants used by the bring-up sequence.
///
/// `DEFAULT` matches the reference design; most boards should use it as-is.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct DphyConfig {
    /// PLL reference clock, in kHz.
    pub ref_clk_khz: u32,
    /// PLL input divider.  `ref_clk_khz / pll_n` must land in 8-24 MHz.
    pub pll_n: u8,
    /// Configuration clock feeding `cfgclkfreqrange`, in MHz.
    pub cfg_clk_mhz: u32,
    /// Settle time after toggling `testclr` and after releasing shutdown.
    pub settle_us: u32,
    /// Polls allowed for stopstate (and PLL lock), one per `poll_interval_us`.
    pub poll_limit: u32,
    pub poll_interval_us: u32,
}

impl DphyConfig {
    pub const DEFAULT: Self = Self {
        ref_clk_khz: 38_400,
        pll_n: 3,
        cfg_clk_mhz: 25,
        settle_us: 1,
        // About a second at one poll per microsecond.
        poll_limit: 1_000_000,
        poll_interval_us: 1,
    };
}

impl Default for DphyConfig {
    fn default() -> Self {
        Self::DEFAULT
    }
}

const_assert!(pll::input_divider_ok(
    DphyConfig::DEFAULT.ref_clk_khz,
    DphyConfig::DEFAULT.pll_n
));
