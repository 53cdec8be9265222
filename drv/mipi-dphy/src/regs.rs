// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Register maps for the PHY wrapper and the CSI-2 host's IPI block, and the
//! [`RegisterRw`] trait through which both are reached.

use num_derive::FromPrimitive;

/// 32-bit register access by byte offset from the start of a block.
///
/// Implementations only have to provide the raw accessors; the typed helpers
/// take anything that converts to an offset (e.g. [`Register`]).
pub trait RegisterRw {
    fn read_raw(&self, offset: u32) -> u32;
    fn write_raw(&self, offset: u32, value: u32);

    fn read<R: Into<u32>>(&self, reg: R) -> u32 {
        self.read_raw(reg.into())
    }

    fn write<R: Into<u32>>(&self, reg: R, value: u32) {
        self.write_raw(reg.into(), value)
    }

    /// Read-modify-write of a single register.
    fn modify<R: Into<u32>, F: FnOnce(&mut u32)>(&self, reg: R, f: F) {
        let offset = reg.into();
        let mut v = self.read_raw(offset);
        f(&mut v);
        self.write_raw(offset, v);
    }
}

impl<T: RegisterRw + ?Sized> RegisterRw for &T {
    fn read_raw(&self, offset: u32) -> u32 {
        (**self).read_raw(offset)
    }

    fn write_raw(&self, offset: u32, value: u32) {
        (**self).write_raw(offset, value)
    }
}

/// Volatile access to a memory-mapped register block.
pub struct Mmio {
    base: *mut u32,
}

impl Mmio {
    /// # Safety
    ///
    /// `base` must be the address of a register block that stays mapped for
    /// the life of the returned value, and nothing else may be accessing it.
    pub unsafe fn new(base: usize) -> Self {
        Self {
            base: base as *mut u32,
        }
    }
}

impl RegisterRw for Mmio {
    fn read_raw(&self, offset: u32) -> u32 {
        // Safety: the constructor's contract covers the whole block, and
        // every offset we use is word-aligned.
        unsafe { self.base.add(offset as usize / 4).read_volatile() }
    }

    fn write_raw(&self, offset: u32, value: u32) {
        // Safety: as above.
        unsafe { self.base.add(offset as usize / 4).write_volatile(value) }
    }
}

/// PHY wrapper registers.
#[derive(Copy, Clone, Debug, Eq, PartialEq, FromPrimitive)]
#[allow(non_camel_case_types)]
pub enum Register {
    /// PHY reset, active low: bit 0 set means "run".
    RSTZ = 0x00,
    /// PHY shutdown, active low.
    SHUTDOWNZ = 0x04,
    /// Test port `testclr` and `testclk`.
    TEST_CTRL0 = 0x08,
    /// Test port `testdin`, `testdout` and `testen`.
    TEST_CTRL1 = 0x0C,
    /// Which test port `TEST_CTRL*` drives.
    TEST_PORT_SEL = 0x10,
    /// `hsfreqrange` and `cfgclkfreqrange`.
    FREQ_RANGE = 0x14,
    /// Per-lane `basedir` and `forcerxmode`.
    LANE_CTRL = 0x18,
    /// PLL `m`, `n` and `vco_ctrl`.
    PLL_CTRL0 = 0x1C,
    /// PLL loop-filter constants.
    PLL_CTRL1 = 0x20,
    /// Strobe that loads `PLL_CTRL*` into the PLL.
    PLL_UPDATE = 0x24,
    /// High-speed clock lane enable (TX).
    CLK_CTRL = 0x28,
    /// Per-lane stopstate, read-only, in [`crate::LaneMask`] layout.
    STOPSTATE = 0x2C,
    /// PLL lock, read-only.
    PLL_STATUS = 0x30,
}

impl From<Register> for u32 {
    fn from(r: Register) -> Self {
        r as u32
    }
}

pub mod rstz {
    pub const RUN: u32 = 1 << 0;
}

pub mod shutdownz {
    pub const ENABLE: u32 = 1 << 0;
}

pub mod test_ctrl0 {
    pub const TESTCLR: u32 = 1 << 0;
    pub const TESTCLK: u32 = 1 << 1;
}

pub mod test_ctrl1 {
    pub const TESTDIN_MASK: u32 = 0xff;
    pub const TESTDOUT_SHIFT: u32 = 8;
    pub const TESTEN: u32 = 1 << 16;

    pub fn din(byte: u8) -> u32 {
        u32::from(byte) & TESTDIN_MASK
    }

    pub fn dout(reg: u32) -> u8 {
        (reg >> TESTDOUT_SHIFT) as u8
    }
}

pub mod test_port_sel {
    pub const TX: u32 = 1 << 0;
}

pub mod freq_range {
    pub const HSFREQRANGE_MASK: u32 = 0x7f;
    pub const CFGCLKFREQRANGE_SHIFT: u32 = 8;
    pub const CFGCLKFREQRANGE_MASK: u32 = 0x3f;

    pub fn encode(hsfreqrange: u8, cfgclkfreqrange: u8) -> u32 {
        (u32::from(hsfreqrange) & HSFREQRANGE_MASK)
            | ((u32::from(cfgclkfreqrange) & CFGCLKFREQRANGE_MASK)
                << CFGCLKFREQRANGE_SHIFT)
    }
}

pub mod lane_ctrl {
    use crate::LaneMask;

    pub const BASEDIR_SHIFT: u32 = 0;
    pub const FORCERXMODE_SHIFT: u32 = 8;
    pub const FIELD_MASK: u32 = 0x7;

    pub fn encode(basedir: LaneMask, forcerxmode: LaneMask) -> u32 {
        (basedir.bits() << BASEDIR_SHIFT)
            | (forcerxmode.bits() << FORCERXMODE_SHIFT)
    }

    pub fn forcerxmode(reg: u32) -> LaneMask {
        LaneMask::from_bits_truncate((reg >> FORCERXMODE_SHIFT) & FIELD_MASK)
    }
}

pub mod pll_ctrl0 {
    pub const M_MASK: u32 = 0x3ff;
    pub const N_SHIFT: u32 = 12;
    pub const N_MASK: u32 = 0xf;
    pub const VCO_SHIFT: u32 = 16;
    pub const VCO_MASK: u32 = 0x3f;

    /// `n` is stored minus one.
    pub fn encode(m: u16, n: u8, vco_ctrl: u8) -> u32 {
        (u32::from(m) & M_MASK)
            | ((u32::from(n.saturating_sub(1)) & N_MASK) << N_SHIFT)
            | ((u32::from(vco_ctrl) & VCO_MASK) << VCO_SHIFT)
    }
}

pub mod pll_ctrl1 {
    pub fn encode(gmp: u8, cpbias: u8, int: u8, prop: u8) -> u32 {
        (u32::from(gmp) & 0x3)
            | ((u32::from(cpbias) & 0x7f) << 8)
            | ((u32::from(int) & 0x3f) << 16)
            | ((u32::from(prop) & 0x3f) << 24)
    }
}

pub mod pll_update {
    pub const UPDATEPLL: u32 = 1 << 0;
}

pub mod clk_ctrl {
    pub const ENABLECLK: u32 = 1 << 0;
}

pub mod pll_status {
    pub const LOCK: u32 = 1 << 0;
}

/// CSI-2 host registers used to bring up the Image Pixel Interface.
#[derive(Copy, Clone, Debug, Eq, PartialEq, FromPrimitive)]
#[allow(non_camel_case_types)]
pub enum HostRegister {
    /// Active data lanes, minus one.
    N_LANES = 0x04,
    CSI2_RESETN = 0x08,
    IPI_MODE = 0x80,
    IPI_VCID = 0x84,
    IPI_DATA_TYPE = 0x88,
    IPI_MEM_FLUSH = 0x8C,
    IPI_HSA_TIME = 0x90,
    IPI_HBP_TIME = 0x94,
    IPI_HSD_TIME = 0x98,
    IPI_HLINE_TIME = 0x9C,
    IPI_SOFTRSTN = 0xA0,
    IPI_VSA_LINES = 0xB0,
    IPI_VBP_LINES = 0xB4,
    IPI_VFP_LINES = 0xB8,
    IPI_VACTIVE_LINES = 0xBC,
}

impl From<HostRegister> for u32 {
    fn from(r: HostRegister) -> Self {
        r as u32
    }
}

pub mod ipi_mode {
    /// Timing comes from the host's own registers rather than the sensor.
    pub const CONTROLLER_TIMING: u32 = 1 << 0;
    /// 16-bit IPI data path; clear for 48-bit.
    pub const COLOR_16BIT: u32 = 1 << 8;
    pub const ENABLE: u32 = 1 << 24;
}

pub mod ipi_mem_flush {
    pub const FLUSH: u32 = 1 << 0;
    /// Flush automatically at the start of every frame.
    pub const AUTO: u32 = 1 << 8;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::LaneMask;
    use core::cell::Cell;

    struct Block([Cell<u32>; 4]);

    impl RegisterRw for Block {
        fn read_raw(&self, offset: u32) -> u32 {
            self.0[offset as usize / 4].get()
        }
        fn write_raw(&self, offset: u32, value: u32) {
            self.0[offset as usize / 4].set(value)
        }
    }

    #[test]
    fn modify_preserves_other_bits() {
        let b = Block(Default::default());
        b.write(Register::SHUTDOWNZ, 0xf0);
        b.modify(Register::SHUTDOWNZ, |v| *v |= shutdownz::ENABLE);
        assert_eq!(b.read(Register::SHUTDOWNZ), 0xf1);

        // And through a reference.
        let r = &b;
        r.modify(Register::SHUTDOWNZ, |v| *v &= !0xf0);
        assert_eq!(b.read(Register::SHUTDOWNZ), 0x01);
    }

    #[test]
    fn mmio_is_word_indexed() {
        let mut words = [0u32; 4];
        let mmio = unsafe { Mmio::new(words.as_mut_ptr() as usize) };
        mmio.write(Register::TEST_CTRL1, 0x1234);
        assert_eq!(mmio.read_raw(0x0C), 0x1234);
        drop(mmio);
        assert_eq!(words, [0, 0, 0, 0x1234]);
    }

    #[test]
    fn field_encodings() {
        assert_eq!(freq_range::encode(0x3c, 32), 0x203c);
        assert_eq!(pll_ctrl0::encode(500, 3, 0x11), 0x0011_21f4);

        let mask = LaneMask::for_lanes(2).unwrap();
        let lc = lane_ctrl::encode(mask, mask);
        assert_eq!(lc, 0x0707);
        assert_eq!(lane_ctrl::forcerxmode(lc), mask);

        assert_eq!(test_ctrl1::dout(0x0001_a500), 0xa5);
        assert_eq!(test_ctrl1::din(0x5a), 0x5a);
    }
}
