// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! TX PLL configuration.
//!
//! The PLL runs a VCO in the 2-4 GHz range and divides it down by `p` to the
//! link clock:
//!
//! ```text
//! f_out = f_clkin * m / (n * p * 2)
//! ```
//!
//! `n` is fixed by the board (it has to bring the reference into 8-24 MHz),
//! `p` and the VCO range come from the tables below, and `m` is whatever is
//! left over.  All arithmetic is in integer kHz; the `f32` thresholds are
//! only ever compared against.

use crate::freq::floor;
use crate::DphyError;

/// A row of a descending threshold table: applies to frequencies at or
/// above `frequency_mhz`, down to the next row.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct ThresholdEntry {
    pub frequency_mhz: f32,
    pub code: u8,
}

pub type VcoRangeEntry = ThresholdEntry;
pub type OutputDivisionEntry = ThresholdEntry;

const fn row(frequency_mhz: f32, code: u8) -> ThresholdEntry {
    ThresholdEntry {
        frequency_mhz,
        code,
    }
}

/// Output division factor `p` by output frequency.
pub static OUTPUT_DIVISION: [OutputDivisionEntry; 6] = [
    row(1000.0, 2),
    row(500.0, 4),
    row(250.0, 8),
    row(125.0, 16),
    row(62.5, 32),
    row(40.0, 64),
];

/// `vco_cntrl` by output frequency, from the databook.  Its ranges overlap;
/// each row here takes over where the next faster one's range ends.
pub static VCO_RANGES: [VcoRangeEntry; 10] = [
    row(1150.0, 0x01),
    row(660.0, 0x03),
    row(440.0, 0x07),
    row(330.0, 0x0f),
    row(220.0, 0x17),
    row(165.0, 0x1f),
    row(110.0, 0x27),
    row(82.5, 0x2f),
    row(55.0, 0x37),
    row(40.0, 0x3f),
];

pub const GMP_CTRL: u8 = 0x01;
pub const CPBIAS_CTRL: u8 = 0x10;
pub const INT_CTRL: u8 = 0x00;
pub const PROP_CTRL: u8 = 0x0c;

/// Bounds on `f_clkin / n`, in kHz.
pub const INPUT_MIN_KHZ: u32 = 8_000;
pub const INPUT_MAX_KHZ: u32 = 24_000;

/// `m` is a 10-bit field.
pub const M_MAX: u16 = 0x3ff;

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct PllConfig {
    pub gmp_ctrl: u8,
    pub cpbias_ctrl: u8,
    pub int_ctrl: u8,
    pub prop_ctrl: u8,
    pub m: u16,
    pub n: u8,
    pub p: u8,
    pub vco_ctrl: u8,
}

/// Checks that dividing `ref_clk_khz` by `n` lands inside the PLL's input
/// range.
pub const fn input_divider_ok(ref_clk_khz: u32, n: u8) -> bool {
    let n = n as u32;
    n != 0
        && ref_clk_khz >= INPUT_MIN_KHZ * n
        && ref_clk_khz <= INPUT_MAX_KHZ * n
}

/// Works out the PLL settings for an output of `frequency_khz` from a
/// reference of `ref_clk_khz` divided by `n`.
pub fn compute(
    frequency_khz: u32,
    ref_clk_khz: u32,
    n: u8,
) -> Result<PllConfig, DphyError> {
    if !input_divider_ok(ref_clk_khz, n) {
        return Err(DphyError::InvalidFrequency);
    }

    let mhz = frequency_khz as f32 / 1000.0;
    let p = floor(&OUTPUT_DIVISION, mhz, |e| e.frequency_mhz)
        .ok_or(DphyError::InvalidFrequency)?
        .code;
    let vco_ctrl = floor(&VCO_RANGES, mhz, |e| e.frequency_mhz)
        .ok_or(DphyError::InvalidFrequency)?
        .code;

    // m = round(f * n * p * 2 / f_clkin)
    let num = u64::from(frequency_khz) * u64::from(n) * u64::from(p) * 2;
    let den = u64::from(ref_clk_khz);
    let m = (num + den / 2) / den;
    let m = u16::try_from(m)
        .ok()
        .filter(|&m| m != 0 && m <= M_MAX)
        .ok_or(DphyError::InvalidFrequency)?;

    Ok(PllConfig {
        gmp_ctrl: GMP_CTRL,
        cpbias_ctrl: CPBIAS_CTRL,
        int_ctrl: INT_CTRL,
        prop_ctrl: PROP_CTRL,
        m,
        n,
        p,
        vco_ctrl,
    })
}

impl PllConfig {
    /// The frequency these settings actually produce, in kHz.
    pub fn output_khz(&self, ref_clk_khz: u32) -> u32 {
        let num = u64::from(ref_clk_khz) * u64::from(self.m);
        let den = u64::from(self.n) * u64::from(self.p) * 2;
        (num / den.max(1)) as u32
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::DphyConfig;
    use proptest::prelude::*;

    const REF: u32 = DphyConfig::DEFAULT.ref_clk_khz;

    #[test]
    fn tables_are_descending() {
        for t in [&OUTPUT_DIVISION[..], &VCO_RANGES[..]] {
            assert!(t
                .windows(2)
                .all(|w| w[0].frequency_mhz > w[1].frequency_mhz));
        }
        // Both tables bottom out at the slowest link clock we accept.
        assert_eq!(OUTPUT_DIVISION[5].frequency_mhz, 40.0);
        assert_eq!(VCO_RANGES[9].frequency_mhz, 40.0);
    }

    #[test]
    fn vco_range_select_falls_with_frequency() {
        // Bits 5:3 pick the range and only ever grow as the output slows.
        let mut last = 0;
        for khz in (40_000..=1_250_000).rev().step_by(7_919) {
            let sel = compute(khz, REF, 3).unwrap().vco_ctrl >> 3;
            assert!(sel >= last, "{khz} kHz");
            last = sel;
        }
        assert!(VCO_RANGES.windows(2).all(|w| w[0].code < w[1].code));
    }

    #[test]
    fn known_settings() {
        let cfg = compute(400_000, REF, 3).unwrap();
        assert_eq!((cfg.m, cfg.n, cfg.p, cfg.vco_ctrl), (500, 3, 8, 0x0f));
        assert_eq!(cfg.output_khz(REF), 400_000);

        // Thresholds are inclusive.
        let cfg = compute(1_000_000, REF, 3).unwrap();
        assert_eq!((cfg.p, cfg.vco_ctrl), (2, 0x03));
        let cfg = compute(1_150_000, REF, 3).unwrap();
        assert_eq!((cfg.p, cfg.vco_ctrl), (2, 0x01));
        let cfg = compute(62_500, REF, 3).unwrap();
        assert_eq!((cfg.p, cfg.vco_ctrl), (32, 0x37));
        let cfg = compute(40_000, REF, 3).unwrap();
        assert_eq!((cfg.p, cfg.vco_ctrl), (64, 0x3f));
    }

    #[test]
    fn default_divider_satisfies_input_guard() {
        assert!(input_divider_ok(REF, DphyConfig::DEFAULT.pll_n));
        // 38.4 MHz / 3 = 12.8 MHz
        assert!(compute(400_000, REF, 3).is_ok());
    }

    #[test]
    fn dividers_outside_input_range_are_rejected() {
        // 38.4 MHz and 19.2 MHz pass through n = 1 and 2; 9.6 MHz at 4 is
        // still fine; 7.68 MHz at 5 is too slow.
        assert_eq!(compute(400_000, REF, 0), Err(DphyError::InvalidFrequency));
        assert_eq!(compute(400_000, REF, 1), Err(DphyError::InvalidFrequency));
        assert!(compute(400_000, REF, 2).is_ok());
        assert!(compute(400_000, REF, 4).is_ok());
        assert_eq!(compute(400_000, REF, 5), Err(DphyError::InvalidFrequency));
    }

    #[test]
    fn below_table_is_rejected() {
        assert_eq!(compute(39_999, REF, 3), Err(DphyError::InvalidFrequency));
    }

    proptest! {
        #[test]
        fn m_is_deterministic_and_close(khz in 40_000u32..=1_250_000) {
            let a = compute(khz, REF, 3).unwrap();
            let b = compute(khz, REF, 3).unwrap();
            prop_assert_eq!(a, b);

            // Rounding m is worth at most half a step of f_clkin / (2np).
            let step = REF / (2 * 3 * u32::from(a.p));
            let out = a.output_khz(REF);
            prop_assert!(out.abs_diff(khz) <= step / 2 + 1);
        }
    }
}
