// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Image Pixel Interface (IPI) timing for the CSI-2 host.
//!
//! The host unpacks CSI-2 long packets into a line buffer and replays them
//! on the IPI as pixels with horizontal sync, back porch and sync delay
//! inserted.  We run the IPI pixel clock 20% faster than the link can
//! deliver pixels, so the buffer only has to absorb what arrives before the
//! IPI starts draining it, i.e. during HSA + HBP + HSD.  The horizontal
//! timing below is the smallest that keeps the IPI from overtaking the link
//! within a line.
//!
//! All of the arithmetic is done on exact rationals (scaled to integers), so
//! the "ceil" steps round the way the timing inequalities need them to.

use embedded_hal::blocking::delay::DelayUs;
use num_derive::FromPrimitive;
use ringbuf::{ringbuf, ringbuf_entry};

use crate::bringup::{Dphy, LinkState, PeripheralClocks};
use crate::regs::{ipi_mem_flush, ipi_mode, HostRegister};
use crate::{freq, DphyError, LaneMask, RegisterRw, Role};

/// CSI-2 short packet, in bytes.
pub const SHORT_PKT_BYTES: u64 = 4;
/// CSI-2 long packet header plus footer, in bytes.
pub const LONG_PKT_OVERHEAD_BYTES: u64 = 6;

/// VSYNC has to lead HSYNC by at least two IPI clocks; one more for margin.
pub const HSA_TIME: u16 = 2 + 1;
pub const HBP_TIME_MIN: u16 = 10;
pub const HSD_TIME_MIN: u16 = 1;

/// Smallest buffer reservation the host accepts, in bytes.
pub const MIN_MEM_BYTES: u64 = 32;

/// Line buffer capacity, in IPI words.
pub const IPI_FIFO_DEPTH_WORDS: u32 = 1024;

/// CSI-2 data types the host can put on the IPI.
#[derive(Copy, Clone, Debug, Eq, PartialEq, FromPrimitive)]
#[repr(u8)]
pub enum DataType {
    Yuv420_8 = 0x18,
    Yuv420_10 = 0x19,
    Yuv420_8Legacy = 0x1a,
    Yuv422_8 = 0x1e,
    Yuv422_10 = 0x1f,
    Rgb444 = 0x20,
    Rgb555 = 0x21,
    Rgb565 = 0x22,
    Rgb666 = 0x23,
    Rgb888 = 0x24,
    Raw6 = 0x28,
    Raw7 = 0x29,
    Raw8 = 0x2a,
    Raw10 = 0x2b,
    Raw12 = 0x2c,
    Raw14 = 0x2d,
}

impl DataType {
    /// Average bits per pixel on the wire.
    pub fn bits_per_pixel(self) -> u32 {
        match self {
            DataType::Yuv420_8 | DataType::Yuv420_8Legacy => 12,
            DataType::Yuv420_10 => 15,
            DataType::Yuv422_8 => 16,
            DataType::Yuv422_10 => 20,
            DataType::Rgb444 | DataType::Rgb555 | DataType::Rgb565 => 16,
            DataType::Rgb666 => 18,
            DataType::Rgb888 => 24,
            DataType::Raw6 => 6,
            DataType::Raw7 => 7,
            DataType::Raw8 => 8,
            DataType::Raw10 => 10,
            DataType::Raw12 => 12,
            DataType::Raw14 => 14,
        }
    }

    /// Raw formats go out on the narrow IPI, everything else on the wide one.
    pub fn color_mode(self) -> IpiColorMode {
        match self {
            DataType::Raw6
            | DataType::Raw7
            | DataType::Raw8
            | DataType::Raw10
            | DataType::Raw12
            | DataType::Raw14 => IpiColorMode::Bits16,
            _ => IpiColorMode::Bits48,
        }
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum IpiColorMode {
    Bits48,
    Bits16,
}

impl IpiColorMode {
    pub fn data_width_bits(self) -> u64 {
        match self {
            IpiColorMode::Bits48 => 48,
            IpiColorMode::Bits16 => 16,
        }
    }
}

/// Frame timing supplied by the caller in controller-timing mode.  Used as
/// given.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Default)]
pub struct ControllerTiming {
    pub hactive_time: u16,
    pub vsa_line: u16,
    pub vbp_line: u16,
    pub vfp_line: u16,
    pub vactive_line: u16,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum IpiMode {
    /// The sensor's own frame timing drives the IPI.
    Camera,
    /// The host generates frame timing from these values.
    Controller(ControllerTiming),
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct IpiConfigRequest {
    pub data_type: DataType,
    pub frame_width_px: u16,
    pub n_lanes: u8,
    /// DDR link clock, as passed to [`Dphy::initialize`].
    pub link_frequency_hz: u32,
    /// Gap between packets on the link; zero if line sync packets are off.
    pub packet_to_packet_time_ns: u32,
    pub virtual_channel: u8,
    pub mode: IpiMode,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct IpiTimingBudget {
    pub hsa_time: u16,
    pub hbp_time: u16,
    pub hsd_time: u16,
    pub hactive_time: u16,
    pub vsa_line: u16,
    pub vbp_line: u16,
    pub vfp_line: u16,
    pub vactive_line: u16,
    pub required_fifo_depth_words: u32,
    /// Data lanes the budget was sized for.
    pub n_lanes: u8,
    /// DDR link clock the budget was sized for.
    pub link_frequency_hz: u32,
    pub mode: IpiMode,
    pub color_mode: IpiColorMode,
    pub virtual_channel: u8,
    pub data_type: DataType,
}

impl IpiTimingBudget {
    /// Total line time, in IPI clocks.
    pub fn hline_time(&self) -> u32 {
        u32::from(self.hsa_time)
            + u32::from(self.hbp_time)
            + u32::from(self.hsd_time)
            + u32::from(self.hactive_time)
    }
}

#[derive(Copy, Clone, PartialEq)]
enum Trace {
    None,
    Budget {
        hbp: u16,
        hsd: u16,
        depth_words: u32,
    },
    Rejected(DphyError),
    Programmed {
        virtual_channel: u8,
        data_type: DataType,
    },
}

ringbuf!(Trace, 16, Trace::None);

/// The rates that everything below is measured against.
///
/// With `f` the DDR link clock and `n` lanes, one HS byte takes
/// `t_ppi = 4 / f` on each lane, and the IPI clock runs at
/// `f * n * 2 * 1.2 / bpp`, so `t_ipi = 5 * bpp / (12 * f * n)`.
struct Rates {
    link_hz: u128,
    n_lanes: u128,
    bpp: u128,
}

impl Rates {
    /// IPI clocks needed to cover `pkt2pkt_ns` plus `lane_bytes / n_lanes`
    /// HS byte times, rounded up.
    fn ipi_cycles(&self, pkt2pkt_ns: u32, lane_bytes: u64) -> u64 {
        // pkt2pkt / t_ipi + (lane_bytes / n) * t_ppi / t_ipi, over a common
        // denominator of 5 * bpp * 1e9.
        let num = u128::from(pkt2pkt_ns) * 12 * self.link_hz * self.n_lanes
            + u128::from(lane_bytes) * 48 * 1_000_000_000;
        let den = 5 * self.bpp * 1_000_000_000;
        num.div_ceil(den).min(u128::from(u64::MAX)) as u64
    }

    /// Bytes the link delivers (across all lanes) during `cycles` IPI
    /// clocks, rounded up.
    fn bytes_during(&self, cycles: u64) -> u64 {
        // cycles * t_ipi / t_ppi * n = cycles * 5 * bpp / 48
        (u128::from(cycles) * 5 * self.bpp).div_ceil(48) as u64
    }
}

fn validate(req: &IpiConfigRequest) -> Result<(), DphyError> {
    LaneMask::for_lanes(req.n_lanes).ok_or(DphyError::InvalidLaneCount)?;
    freq::lane_bitrate_mbps(req.link_frequency_hz)?;
    if req.frame_width_px == 0 {
        return Err(DphyError::InvalidGeometry);
    }
    Ok(())
}

/// Works out IPI timing, and the line buffer depth it needs, for a stream.
///
/// Fails with `InsufficientBuffer` if the host's line buffer is too shallow
/// for this geometry.  Touches no hardware.
pub fn ipi_configure(
    req: &IpiConfigRequest,
) -> Result<IpiTimingBudget, DphyError> {
    let r = compute(req);
    match r {
        Ok(b) => {
            ringbuf_entry!(Trace::Budget {
                hbp: b.hbp_time,
                hsd: b.hsd_time,
                depth_words: b.required_fifo_depth_words,
            });
        }
        Err(e) => {
            ringbuf_entry!(Trace::Rejected(e));
        }
    }
    r
}

fn compute(req: &IpiConfigRequest) -> Result<IpiTimingBudget, DphyError> {
    validate(req)?;

    let bpp = req.data_type.bits_per_pixel();
    let color_mode = req.data_type.color_mode();
    let rates = Rates {
        link_hz: u128::from(req.link_frequency_hz),
        n_lanes: u128::from(req.n_lanes),
        bpp: u128::from(bpp),
    };
    let width = i64::from(req.frame_width_px);
    let line_bytes =
        (u64::from(req.frame_width_px) * u64::from(bpp)).div_ceil(8);
    let pkt2pkt = req.packet_to_packet_time_ns;

    // Back porch has to outlast the packet gap plus two short packets (and
    // two more byte times).
    let hsa = i64::from(HSA_TIME);
    let hbp_lane_bytes = 2 * SHORT_PKT_BYTES + 2 * u64::from(req.n_lanes);
    let hbp = i64::try_from(rates.ipi_cycles(pkt2pkt, hbp_lane_bytes))
        .map_err(|_| DphyError::InvalidGeometry)?
        - hsa
        + 1;
    let hbp = hbp.max(i64::from(HBP_TIME_MIN));

    // Sync delay has to hold the IPI back until the long packet header and
    // the whole line could have arrived.
    let hsd_lane_bytes = LONG_PKT_OVERHEAD_BYTES + line_bytes;
    let hsd = i64::try_from(rates.ipi_cycles(pkt2pkt, hsd_lane_bytes))
        .map_err(|_| DphyError::InvalidGeometry)?
        - (hsa + hbp + width)
        + 1;
    let hsd = hsd.max(i64::from(HSD_TIME_MIN));

    let hbp_time =
        u16::try_from(hbp).map_err(|_| DphyError::InvalidGeometry)?;
    let hsd_time =
        u16::try_from(hsd).map_err(|_| DphyError::InvalidGeometry)?;

    // Bytes buffered before the IPI starts on a line: one bound over sync
    // and back porch, one over the whole lead-in, which can never be more
    // than the packet itself.
    let lead_in = u64::from(HSA_TIME) + u64::from(hbp_time);
    let mem_req_1 = rates.bytes_during(lead_in);
    let mem_req_2 = rates
        .bytes_during(lead_in + u64::from(hsd_time))
        .min(line_bytes + LONG_PKT_OVERHEAD_BYTES);
    let mem_bytes = mem_req_1.max(mem_req_2).max(MIN_MEM_BYTES);
    let depth = (mem_bytes * 8).div_ceil(color_mode.data_width_bits());
    let required_fifo_depth_words = u32::try_from(depth).unwrap_or(u32::MAX);

    if required_fifo_depth_words > IPI_FIFO_DEPTH_WORDS {
        return Err(DphyError::InsufficientBuffer);
    }

    let timing = match req.mode {
        IpiMode::Camera => ControllerTiming::default(),
        IpiMode::Controller(t) => t,
    };

    Ok(IpiTimingBudget {
        hsa_time: HSA_TIME,
        hbp_time,
        hsd_time,
        hactive_time: timing.hactive_time,
        vsa_line: timing.vsa_line,
        vbp_line: timing.vbp_line,
        vfp_line: timing.vfp_line,
        vactive_line: timing.vactive_line,
        required_fifo_depth_words,
        n_lanes: req.n_lanes,
        link_frequency_hz: req.link_frequency_hz,
        mode: req.mode,
        color_mode,
        virtual_channel: req.virtual_channel,
        data_type: req.data_type,
    })
}

/// The CSI-2 host controller's register block.
pub struct Csi2Host<H> {
    rw: H,
}

impl<H: RegisterRw> Csi2Host<H> {
    pub fn new(rw: H) -> Self {
        Self { rw }
    }

    /// Loads `budget` into the IPI and enables it.
    ///
    /// `phy` must be the receive PHY feeding this host, and must be up on
    /// the lanes and link clock `budget` was worked out for; otherwise this
    /// fails with `InvalidGeometry` before writing anything.
    pub fn program_ipi<R, C, D>(
        &self,
        phy: &Dphy<R, C, D>,
        budget: &IpiTimingBudget,
    ) -> Result<(), DphyError>
    where
        R: RegisterRw,
        C: PeripheralClocks,
        D: DelayUs<u32>,
    {
        let link = match (phy.role(), phy.state(), phy.link()) {
            (Role::Receiver, LinkState::LaneSynced, Some(link)) => link,
            _ => {
                ringbuf_entry!(Trace::Rejected(DphyError::NotInitialized));
                return Err(DphyError::NotInitialized);
            }
        };
        if budget.n_lanes != link.n_lanes()
            || budget.link_frequency_hz != link.link_frequency_hz
        {
            ringbuf_entry!(Trace::Rejected(DphyError::InvalidGeometry));
            return Err(DphyError::InvalidGeometry);
        }
        if budget.required_fifo_depth_words > IPI_FIFO_DEPTH_WORDS {
            ringbuf_entry!(Trace::Rejected(DphyError::InsufficientBuffer));
            return Err(DphyError::InsufficientBuffer);
        }

        let mut mode = 0;
        if matches!(budget.mode, IpiMode::Controller(_)) {
            mode |= ipi_mode::CONTROLLER_TIMING;
        }
        if budget.color_mode == IpiColorMode::Bits16 {
            mode |= ipi_mode::COLOR_16BIT;
        }

        use HostRegister::*;
        self.rw.write(IPI_SOFTRSTN, 0);
        self.rw.write(CSI2_RESETN, 0);
        self.rw
            .write(N_LANES, u32::from(budget.n_lanes.saturating_sub(1)));
        self.rw.write(CSI2_RESETN, 1);

        self.rw.write(IPI_MODE, mode);
        self.rw.write(IPI_VCID, u32::from(budget.virtual_channel));
        self.rw.write(IPI_DATA_TYPE, budget.data_type as u32);
        self.rw.write(IPI_HSA_TIME, u32::from(budget.hsa_time));
        self.rw.write(IPI_HBP_TIME, u32::from(budget.hbp_time));
        self.rw.write(IPI_HSD_TIME, u32::from(budget.hsd_time));
        self.rw.write(IPI_HLINE_TIME, budget.hline_time());
        self.rw.write(IPI_VSA_LINES, u32::from(budget.vsa_line));
        self.rw.write(IPI_VBP_LINES, u32::from(budget.vbp_line));
        self.rw.write(IPI_VFP_LINES, u32::from(budget.vfp_line));
        self.rw.write(IPI_VACTIVE_LINES, u32::from(budget.vactive_line));
        self.rw
            .write(IPI_MEM_FLUSH, ipi_mem_flush::AUTO | ipi_mem_flush::FLUSH);

        self.rw.write(IPI_SOFTRSTN, 1);
        self.rw.write(IPI_MODE, mode | ipi_mode::ENABLE);

        ringbuf_entry!(Trace::Programmed {
            virtual_channel: budget.virtual_channel,
            data_type: budget.data_type,
        });
        Ok(())
    }
}
