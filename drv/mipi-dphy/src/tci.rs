// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Test Control Interface (TCI) access to the PHY's internal registers.
//!
//! The PHY's analog configuration lives in a private space of 8-bit
//! registers with 16-bit addresses.  The only way in is a two-wire protocol
//! (`testclk` plus `testen`, with an 8-bit `testdin`/`testdout` pair) that we
//! bit-bang through `TEST_CTRL0` and `TEST_CTRL1`.  The PHY has two such
//! ports, one for its RX half and one for its TX half, sharing one set of
//! control registers behind `TEST_PORT_SEL`.
//!
//! Nothing here reports errors: the protocol has no acknowledge, so a bad
//! transaction is only visible as a bad value.

use embedded_hal::blocking::delay::DelayUs;
use heapless::FnvIndexMap;
use ringbuf::{ringbuf, ringbuf_entry};

use crate::regs::{test_ctrl0, test_ctrl1, test_port_sel, Register};
use crate::RegisterRw;

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Port {
    Rx,
    Tx,
}

impl Port {
    fn select_bits(self) -> u32 {
        match self {
            Port::Rx => 0,
            Port::Tx => test_port_sel::TX,
        }
    }
}

/// Test register addresses we program.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[allow(non_camel_case_types)]
#[repr(u16)]
pub enum TestCode {
    /// RX system control; needs an override in the 80 Mbps band.
    DIG_RDWR_RX_SYS_1 = 0x0001,
    /// Bias block reference trim.
    DIG_RDWR_CB_0 = 0x0004,
    /// PLL charge-pump bias trim.
    DIG_RDWR_CB_1 = 0x0005,
    /// RX startup oscillator target, bits 7:0.
    DIG_RDWR_RX_STARTUP_OVR_2 = 0x00e2,
    /// RX startup oscillator target, bits 11:8.
    DIG_RDWR_RX_STARTUP_OVR_3 = 0x00e3,
    /// RX startup oscillator override enable.
    DIG_RDWR_RX_STARTUP_OVR_4 = 0x00e4,
    /// TX PLL output enables, bits 7:6.
    DIG_RDWR_TX_PLL_17 = 0x016d,
    /// TX slew-rate calibration oscillator target, bits 7:0.
    DIG_RDWR_TX_SLEW_5 = 0x0270,
    /// TX slew-rate calibration oscillator target, bits 11:8.
    DIG_RDWR_TX_SLEW_6 = 0x0271,
    /// TX slew-rate calibration override enable.
    DIG_RDWR_TX_SLEW_7 = 0x0272,
}

impl From<TestCode> for u16 {
    fn from(c: TestCode) -> Self {
        c as u16
    }
}

/// Access to one test port's register space.
pub trait TestPort {
    fn read(&mut self, addr: u16) -> u8;
    fn write(&mut self, addr: u16, data: u8);

    fn modify<F: FnOnce(&mut u8)>(&mut self, addr: u16, f: F) {
        let mut v = self.read(addr);
        f(&mut v);
        self.write(addr, v);
    }
}

#[derive(Copy, Clone, PartialEq)]
enum Trace {
    None,
    Select(Port),
    Clear(Port),
    Read { port: Port, addr: u16, data: u8 },
    Write { port: Port, addr: u16, data: u8 },
}

ringbuf!(Trace, 32, Trace::None);

/// A test port of a PHY reached through its wrapper registers.
///
/// Constructing one selects the port, so a `Tci` must not outlive a
/// transaction on the other port of the same PHY.  Holding it by `&mut` in
/// the bring-up code is what keeps that true.
pub struct Tci<'a, R: RegisterRw> {
    rw: &'a R,
    port: Port,
}

impl<'a, R: RegisterRw> Tci<'a, R> {
    pub fn select(rw: &'a R, port: Port) -> Self {
        rw.write(Register::TEST_PORT_SEL, port.select_bits());
        ringbuf_entry!(Trace::Select(port));
        Self { rw, port }
    }

    /// Pulses `testclr`, which resets the port's state machine and its
    /// registers to their power-on values.
    pub fn clear(&mut self, delay: &mut impl DelayUs<u32>, settle_us: u32) {
        ringbuf_entry!(Trace::Clear(self.port));
        self.rw
            .modify(Register::TEST_CTRL0, |r| *r |= test_ctrl0::TESTCLR);
        delay.delay_us(settle_us);
        self.rw
            .modify(Register::TEST_CTRL0, |r| *r &= !test_ctrl0::TESTCLR);
    }

    fn strobe(&self) {
        self.rw.write(Register::TEST_CTRL0, test_ctrl0::TESTCLK);
        self.rw.write(Register::TEST_CTRL0, 0);
    }

    /// Leaves the port addressing `addr`, with `testen` high.
    fn address(&self, addr: u16) {
        let [hi, lo] = addr.to_be_bytes();

        self.rw.write(Register::TEST_CTRL0, 0);
        self.rw.write(Register::TEST_CTRL1, 0);

        // A zero command byte selects 16-bit addressing.
        self.rw.write(Register::TEST_CTRL1, test_ctrl1::TESTEN);
        self.strobe();

        // The high byte latches on the rising edge with testen low...
        self.rw.write(Register::TEST_CTRL1, test_ctrl1::din(hi));
        self.strobe();

        // ...and the low byte on the falling edge with testen high.
        self.rw.write(
            Register::TEST_CTRL1,
            test_ctrl1::TESTEN | test_ctrl1::din(lo),
        );
        self.strobe();
    }
}

impl<R: RegisterRw> TestPort for Tci<'_, R> {
    fn read(&mut self, addr: u16) -> u8 {
        self.address(addr);
        let data = test_ctrl1::dout(self.rw.read(Register::TEST_CTRL1));
        self.rw.write(Register::TEST_CTRL1, 0);

        ringbuf_entry!(Trace::Read {
            port: self.port,
            addr,
            data
        });
        data
    }

    fn write(&mut self, addr: u16, data: u8) {
        self.address(addr);
        self.rw
            .write(Register::TEST_CTRL1, test_ctrl1::din(data));
        self.strobe();

        ringbuf_entry!(Trace::Write {
            port: self.port,
            addr,
            data
        });
    }
}

/// A test port backed by memory, for working out programming sequences
/// without a PHY attached.
///
/// Unwritten registers read as zero.  Holds at most `N` distinct addresses
/// (`N` must be a power of two); writes to further addresses are dropped and
/// noted in [`MemTestPort::overflowed`].
pub struct MemTestPort<const N: usize> {
    regs: FnvIndexMap<u16, u8, N>,
    writes: usize,
    overflowed: bool,
}

impl<const N: usize> MemTestPort<N> {
    pub fn new() -> Self {
        Self {
            regs: FnvIndexMap::new(),
            writes: 0,
            overflowed: false,
        }
    }

    /// The value at `addr`, if it has ever been written.
    pub fn get(&self, addr: u16) -> Option<u8> {
        self.regs.get(&addr).copied()
    }

    pub fn writes(&self) -> usize {
        self.writes
    }

    pub fn overflowed(&self) -> bool {
        self.overflowed
    }
}

impl<const N: usize> Default for MemTestPort<N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const N: usize> TestPort for MemTestPort<N> {
    fn read(&mut self, addr: u16) -> u8 {
        self.get(addr).unwrap_or(0)
    }

    fn write(&mut self, addr: u16, data: u8) {
        self.writes += 1;
        if self.regs.insert(addr, data).is_err() {
            self.overflowed = true;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fake::{FakeDphy, SimClock};

    #[test]
    fn write_then_read_on_each_port() {
        let fake = FakeDphy::new();

        Tci::select(&fake, Port::Tx).write(0x016d, 0x3c);
        Tci::select(&fake, Port::Rx).write(0x016d, 0xa5);

        assert_eq!(fake.test_reg(Port::Tx, 0x016d), Some(0x3c));
        assert_eq!(fake.test_reg(Port::Rx, 0x016d), Some(0xa5));

        assert_eq!(Tci::select(&fake, Port::Tx).read(0x016d), 0x3c);
        assert_eq!(Tci::select(&fake, Port::Rx).read(0x016d), 0xa5);
        assert_eq!(Tci::select(&fake, Port::Rx).read(0x0270), 0);
    }

    #[test]
    fn addresses_with_zero_bytes() {
        let fake = FakeDphy::new();
        let mut tci = Tci::select(&fake, Port::Rx);
        for addr in [0x0000, 0x0100, 0x00ff, 0xff00, 0xffff] {
            tci.write(addr, addr as u8 ^ 0x5a);
        }
        for addr in [0x0000, 0x0100, 0x00ff, 0xff00, 0xffff] {
            assert_eq!(tci.read(addr), addr as u8 ^ 0x5a);
        }
    }

    #[test]
    fn modify_sets_bits_without_clobbering() {
        let fake = FakeDphy::new();
        let mut tci = Tci::select(&fake, Port::Tx);
        tci.write(TestCode::DIG_RDWR_TX_PLL_17.into(), 0x05);
        tci.modify(TestCode::DIG_RDWR_TX_PLL_17.into(), |v| *v |= 0xc0);
        assert_eq!(fake.test_reg(Port::Tx, 0x016d), Some(0xc5));

        // One write for the setup, one for the modify.
        let writes: Vec<_> = fake.test_writes();
        assert_eq!(
            writes,
            vec![(Port::Tx, 0x016d, 0x05), (Port::Tx, 0x016d, 0xc5)]
        );
    }

    #[test]
    fn read_leaves_testen_low() {
        let fake = FakeDphy::new();
        Tci::select(&fake, Port::Rx).read(0x00e2);
        assert_eq!(fake.read(Register::TEST_CTRL1), 0);
        assert_eq!(fake.read(Register::TEST_CTRL0), 0);
    }

    #[test]
    fn clear_pulses_testclr_on_selected_port() {
        let fake = FakeDphy::new();
        let mut clock = SimClock::default();

        Tci::select(&fake, Port::Tx).write(0x0004, 0x11);
        Tci::select(&fake, Port::Tx).clear(&mut clock, 1);
        Tci::select(&fake, Port::Rx).clear(&mut clock, 1);

        assert_eq!(fake.clears(), vec![Port::Tx, Port::Rx]);
        assert_eq!(fake.read(Register::TEST_CTRL0) & test_ctrl0::TESTCLR, 0);
        assert_eq!(clock.elapsed_us(), 2);
        assert_eq!(fake.test_reg(Port::Tx, 0x0004), None);
    }

    #[test]
    fn mem_test_port() {
        let mut port = MemTestPort::<4>::new();
        assert_eq!(port.read(0x1234), 0);
        port.write(0x1234, 7);
        port.modify(0x1234, |v| *v += 1);
        assert_eq!(port.get(0x1234), Some(8));
        assert_eq!(port.writes(), 2);
        assert!(!port.overflowed());

        for addr in 0..4 {
            port.write(addr, 1);
        }
        assert!(port.overflowed());
        assert_eq!(port.get(3), None);
    }
}
