// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Lane bit rate to PHY frequency range.
//!
//! The PHY's receivers and its TX slew-rate calibration are tuned per band of
//! lane bit rate.  Each band is identified by its upper edge; a rate uses the
//! first band whose edge is at or above it.

use crate::DphyError;

/// Slowest lane bit rate the PHY supports, in Mbps.
pub const MIN_BITRATE_MBPS: u16 = 80;

/// Fastest lane bit rate the PHY supports, in Mbps.
pub const MAX_BITRATE_MBPS: u16 = 2500;

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct FrequencyRangeEntry {
    /// Upper edge of the band, in Mbps.
    pub bitrate_mbps: u16,
    /// `hsfreqrange` for this band.  Below 0x40, bits 3:0 pick a coarse
    /// band and bits 5:4 a step within it; from 0x40 up the code simply
    /// counts.
    pub freq_select_code: u8,
    /// 12-bit startup/calibration oscillator target for this band.
    pub osc_freq_target: u16,
}

const fn entry(
    bitrate_mbps: u16,
    freq_select_code: u8,
    osc_freq_target: u16,
) -> FrequencyRangeEntry {
    FrequencyRangeEntry {
        bitrate_mbps,
        freq_select_code,
        osc_freq_target,
    }
}

/// Frequency bands, ascending by `bitrate_mbps`, with the databook's
/// `hsfreqrange` and oscillator target for each.  Steps are 10 Mbps up to
/// 190, 15 up to 250, 25 up to 350 and 50 above that.
pub static FREQ_RANGES: [FrequencyRangeEntry; 63] = [
    entry(80, 0x00, 460),
    entry(90, 0x10, 460),
    entry(100, 0x20, 460),
    entry(110, 0x30, 460),
    entry(120, 0x01, 460),
    entry(130, 0x11, 460),
    entry(140, 0x21, 460),
    entry(150, 0x31, 460),
    entry(160, 0x02, 460),
    entry(170, 0x12, 460),
    entry(180, 0x22, 460),
    entry(190, 0x32, 460),
    entry(205, 0x03, 460),
    entry(220, 0x13, 460),
    entry(235, 0x23, 460),
    entry(250, 0x33, 460),
    entry(275, 0x04, 460),
    entry(300, 0x14, 460),
    entry(325, 0x25, 460),
    entry(350, 0x35, 460),
    entry(400, 0x05, 460),
    entry(450, 0x16, 460),
    entry(500, 0x26, 460),
    entry(550, 0x37, 460),
    entry(600, 0x07, 460),
    entry(650, 0x18, 460),
    entry(700, 0x28, 460),
    entry(750, 0x39, 460),
    entry(800, 0x09, 460),
    entry(850, 0x19, 460),
    entry(900, 0x29, 460),
    entry(950, 0x3a, 460),
    entry(1000, 0x0a, 460),
    entry(1050, 0x1a, 460),
    entry(1100, 0x2a, 460),
    entry(1150, 0x3b, 460),
    entry(1200, 0x0b, 460),
    entry(1250, 0x1b, 460),
    entry(1300, 0x2b, 460),
    entry(1350, 0x3c, 460),
    entry(1400, 0x0c, 460),
    entry(1450, 0x1c, 460),
    entry(1500, 0x2c, 460),
    entry(1550, 0x3d, 285),
    entry(1600, 0x0d, 295),
    entry(1650, 0x1d, 304),
    entry(1700, 0x2e, 313),
    entry(1750, 0x3e, 322),
    entry(1800, 0x0e, 331),
    entry(1850, 0x1e, 341),
    entry(1900, 0x2f, 350),
    entry(1950, 0x3f, 359),
    entry(2000, 0x0f, 368),
    entry(2050, 0x40, 377),
    entry(2100, 0x41, 387),
    entry(2150, 0x42, 396),
    entry(2200, 0x43, 405),
    entry(2250, 0x44, 414),
    entry(2300, 0x45, 423),
    entry(2350, 0x46, 432),
    entry(2400, 0x47, 441),
    entry(2450, 0x48, 450),
    entry(2500, 0x49, 460),
];

/// Returns the first entry of `table` whose key is at or above `target`.
///
/// `table` must be sorted ascending by `key`.
pub fn ceiling<T, K: PartialOrd>(
    table: &[T],
    target: K,
    key: impl Fn(&T) -> K,
) -> Option<&T> {
    let ndx = table.partition_point(|e| key(e) < target);
    table.get(ndx)
}

/// Returns the first entry of `table` whose key is at or below `target`.
///
/// `table` must be sorted descending by `key`.
pub fn floor<T, K: PartialOrd>(
    table: &[T],
    target: K,
    key: impl Fn(&T) -> K,
) -> Option<&T> {
    let ndx = table.partition_point(|e| key(e) > target);
    table.get(ndx)
}

/// Finds the frequency band for a lane bit rate.
pub fn lookup(
    bitrate_mbps: u16,
) -> Result<&'static FrequencyRangeEntry, DphyError> {
    if !(MIN_BITRATE_MBPS..=MAX_BITRATE_MBPS).contains(&bitrate_mbps) {
        return Err(DphyError::InvalidFrequency);
    }
    ceiling(&FREQ_RANGES, bitrate_mbps, |e| e.bitrate_mbps)
        .ok_or(DphyError::InvalidFrequency)
}

/// Lane bit rate, rounded up to whole Mbps, for a DDR link clock of
/// `link_frequency_hz`.
pub fn lane_bitrate_mbps(link_frequency_hz: u32) -> Result<u16, DphyError> {
    let bps = u64::from(link_frequency_hz) * 2;
    let min = u64::from(MIN_BITRATE_MBPS) * 1_000_000;
    let max = u64::from(MAX_BITRATE_MBPS) * 1_000_000;
    if !(min..=max).contains(&bps) {
        return Err(DphyError::InvalidFrequency);
    }
    u16::try_from(bps.div_ceil(1_000_000))
        .map_err(|_| DphyError::InvalidFrequency)
}

/// `cfgclkfreqrange` for a configuration clock of `cfg_clk_mhz`.
pub const fn cfgclkfreqrange(cfg_clk_mhz: u32) -> u8 {
    (cfg_clk_mhz.saturating_sub(17) * 4) as u8
}
