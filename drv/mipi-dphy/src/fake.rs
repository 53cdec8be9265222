// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Simulated PHY wrapper for host tests.
//!
//! `FakeDphy` behaves like the wrapper's register block: it decodes the
//! bit-banged test port protocol into two virtual test register spaces,
//! reports stopstate and PLL lock after a configurable number of polls, and
//! keeps a log of every register write and every test register write.

use std::cell::{Cell, RefCell};
use std::collections::BTreeMap;

use embedded_hal::blocking::delay::DelayUs;
use num_traits::FromPrimitive;

use crate::bringup::PeripheralClocks;
use crate::regs::{
    pll_status, test_ctrl0, test_ctrl1, test_port_sel, HostRegister, Register,
};
use crate::tci::Port;
use crate::{LaneMask, RegisterRw};

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Event {
    Reg(Register, u32),
    Test(Port, u16, u8),
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
enum Phase {
    Idle,
    AwaitHigh,
    AwaitLow,
    Addressed,
}

struct State {
    regs: [u32; 16],
    events: Vec<Event>,
    test_regs: [BTreeMap<u16, u8>; 2],
    clears: Vec<Port>,

    phase: Phase,
    addr_hi: u8,
    addr: u16,

    stopstate_reads: u32,
    stopstate_after: Option<u32>,
    stopstate_mask: LaneMask,
    pll_reads: u32,
    pll_lock_after: Option<u32>,
}

impl State {
    fn port(&self) -> Port {
        if self.regs[Register::TEST_PORT_SEL as usize / 4] & test_port_sel::TX
            != 0
        {
            Port::Tx
        } else {
            Port::Rx
        }
    }

    fn space(&mut self) -> &mut BTreeMap<u16, u8> {
        match self.port() {
            Port::Rx => &mut self.test_regs[0],
            Port::Tx => &mut self.test_regs[1],
        }
    }

    fn ctrl1(&self) -> u32 {
        self.regs[Register::TEST_CTRL1 as usize / 4]
    }

    fn test_ctrl0(&mut self, old: u32, new: u32) {
        if new & test_ctrl0::TESTCLR != 0 && old & test_ctrl0::TESTCLR == 0 {
            let port = self.port();
            self.clears.push(port);
            self.space().clear();
            self.phase = Phase::Idle;
        }

        let ctrl1 = self.ctrl1();
        let en = ctrl1 & test_ctrl1::TESTEN != 0;
        let din = (ctrl1 & test_ctrl1::TESTDIN_MASK) as u8;
        let rising =
            new & test_ctrl0::TESTCLK != 0 && old & test_ctrl0::TESTCLK == 0;
        let falling =
            new & test_ctrl0::TESTCLK == 0 && old & test_ctrl0::TESTCLK != 0;

        if rising && !en {
            match self.phase {
                Phase::AwaitHigh => {
                    self.addr_hi = din;
                    self.phase = Phase::AwaitLow;
                }
                Phase::Addressed => {
                    let (port, addr) = (self.port(), self.addr);
                    self.space().insert(addr, din);
                    self.events.push(Event::Test(port, addr, din));
                }
                _ => (),
            }
        } else if falling && en {
            if self.phase == Phase::AwaitLow {
                self.addr = u16::from_be_bytes([self.addr_hi, din]);
                self.phase = Phase::Addressed;
            } else if din == 0 {
                self.phase = Phase::AwaitHigh;
            }
        }
    }
}

pub struct FakeDphy {
    state: RefCell<State>,
}

impl FakeDphy {
    /// A wrapper whose lanes all report stopstate, and whose PLL reports
    /// lock, on the first poll.
    pub fn new() -> Self {
        Self {
            state: RefCell::new(State {
                regs: [0; 16],
                events: vec![],
                test_regs: Default::default(),
                clears: vec![],
                phase: Phase::Idle,
                addr_hi: 0,
                addr: 0,
                stopstate_reads: 0,
                stopstate_after: Some(0),
                stopstate_mask: LaneMask::all(),
                pll_reads: 0,
                pll_lock_after: Some(0),
            }),
        }
    }

    /// Report `mask` in stopstate once `polls` reads have come back empty;
    /// `None` means never.
    pub fn stopstate_after(&self, polls: Option<u32>, mask: LaneMask) {
        let mut s = self.state.borrow_mut();
        s.stopstate_after = polls;
        s.stopstate_mask = mask;
        s.stopstate_reads = 0;
    }

    pub fn pll_lock_after(&self, polls: Option<u32>) {
        let mut s = self.state.borrow_mut();
        s.pll_lock_after = polls;
        s.pll_reads = 0;
    }

    pub fn stopstate_reads(&self) -> u32 {
        self.state.borrow().stopstate_reads
    }

    pub fn pll_reads(&self) -> u32 {
        self.state.borrow().pll_reads
    }

    pub fn events(&self) -> Vec<Event> {
        self.state.borrow().events.clone()
    }

    /// Number of wrapper register writes, including the ones that drive the
    /// test port.
    pub fn write_count(&self) -> usize {
        self.state
            .borrow()
            .events
            .iter()
            .filter(|e| matches!(e, Event::Reg(..)))
            .count()
    }

    /// Every value written to `reg`, in order.
    pub fn writes_to(&self, reg: Register) -> Vec<u32> {
        self.state
            .borrow()
            .events
            .iter()
            .filter_map(|e| match e {
                Event::Reg(r, v) if *r == reg => Some(*v),
                _ => None,
            })
            .collect()
    }

    pub fn test_writes(&self) -> Vec<(Port, u16, u8)> {
        self.state
            .borrow()
            .events
            .iter()
            .filter_map(|e| match e {
                Event::Test(p, a, d) => Some((*p, *a, *d)),
                _ => None,
            })
            .collect()
    }

    pub fn test_reg(&self, port: Port, addr: u16) -> Option<u8> {
        let s = self.state.borrow();
        let space = match port {
            Port::Rx => &s.test_regs[0],
            Port::Tx => &s.test_regs[1],
        };
        space.get(&addr).copied()
    }

    pub fn clears(&self) -> Vec<Port> {
        self.state.borrow().clears.clone()
    }
}

impl RegisterRw for FakeDphy {
    fn read_raw(&self, offset: u32) -> u32 {
        let mut s = self.state.borrow_mut();
        match Register::from_u32(offset) {
            Some(Register::STOPSTATE) => {
                s.stopstate_reads += 1;
                match s.stopstate_after {
                    Some(k) if s.stopstate_reads > k => s.stopstate_mask.bits(),
                    _ => 0,
                }
            }
            Some(Register::PLL_STATUS) => {
                s.pll_reads += 1;
                match s.pll_lock_after {
                    Some(k) if s.pll_reads > k => pll_status::LOCK,
                    _ => 0,
                }
            }
            Some(Register::TEST_CTRL1) if s.phase == Phase::Addressed => {
                let addr = s.addr;
                let data = s.space().get(&addr).copied().unwrap_or(0);
                s.ctrl1() | (u32::from(data) << test_ctrl1::TESTDOUT_SHIFT)
            }
            Some(r) => s.regs[r as usize / 4],
            None => panic!("read from unmapped offset {offset:#x}"),
        }
    }

    fn write_raw(&self, offset: u32, value: u32) {
        let mut s = self.state.borrow_mut();
        let Some(reg) = Register::from_u32(offset) else {
            panic!("write to unmapped offset {offset:#x}");
        };
        s.events.push(Event::Reg(reg, value));
        let old = s.regs[reg as usize / 4];
        s.regs[reg as usize / 4] = value;
        if reg == Register::TEST_CTRL0 {
            s.test_ctrl0(old, value);
        }
    }
}

/// CSI-2 host register block that just remembers writes.
#[derive(Default)]
pub struct FakeHost {
    writes: RefCell<Vec<(HostRegister, u32)>>,
}

impl FakeHost {
    pub fn writes(&self) -> Vec<(HostRegister, u32)> {
        self.writes.borrow().clone()
    }

    /// The last value written to `reg`.
    pub fn last(&self, reg: HostRegister) -> Option<u32> {
        self.writes
            .borrow()
            .iter()
            .rev()
            .find(|(r, _)| *r == reg)
            .map(|(_, v)| *v)
    }
}

impl RegisterRw for FakeHost {
    fn read_raw(&self, offset: u32) -> u32 {
        let reg = HostRegister::from_u32(offset);
        self.writes
            .borrow()
            .iter()
            .rev()
            .find(|(r, _)| Some(*r) == reg)
            .map(|(_, v)| *v)
            .unwrap_or(0)
    }

    fn write_raw(&self, offset: u32, value: u32) {
        let Some(reg) = HostRegister::from_u32(offset) else {
            panic!("write to unmapped host offset {offset:#x}");
        };
        self.writes.borrow_mut().push((reg, value));
    }
}

#[derive(Default)]
pub struct FakeClocks {
    enables: Cell<u32>,
    disables: Cell<u32>,
}

impl FakeClocks {
    pub fn enables(&self) -> u32 {
        self.enables.get()
    }

    pub fn disables(&self) -> u32 {
        self.disables.get()
    }

    pub fn calls(&self) -> u32 {
        self.enables() + self.disables()
    }
}

impl PeripheralClocks for &FakeClocks {
    fn enable(&mut self) {
        self.enables.set(self.enables.get() + 1);
    }

    fn disable(&mut self) {
        self.disables.set(self.disables.get() + 1);
    }
}

/// A microsecond clock that only moves when someone delays on it.
#[derive(Default)]
pub struct SimClock {
    elapsed_us: Cell<u64>,
}

impl SimClock {
    pub fn elapsed_us(&self) -> u64 {
        self.elapsed_us.get()
    }
}

impl DelayUs<u32> for SimClock {
    fn delay_us(&mut self, us: u32) {
        self.elapsed_us.set(self.elapsed_us.get() + u64::from(us));
    }
}

impl DelayUs<u32> for &SimClock {
    fn delay_us(&mut self, us: u32) {
        self.elapsed_us.set(self.elapsed_us.get() + u64::from(us));
    }
}
