// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Lane bring-up and the PHY lifecycle.
//!
//! Bring-up walks the PHY from power-down to a link whose lanes all sit in
//! LP-11 (stopstate), which is what the far end needs to see before it can
//! start high-speed transmission:
//!
//! 1. clocks on, PHY held in reset and shutdown;
//! 2. both test ports cleared;
//! 3. frequency band, oscillator target and lane directions programmed;
//! 4. (TX only) PLL programmed and its outputs enabled;
//! 5. shutdown and reset released, then stopstate polled.
//!
//! The order within each step matters to the PHY, so it's spelled out here
//! rather than left to callers.

use embedded_hal::blocking::delay::DelayUs;
use ringbuf::{ringbuf, ringbuf_entry};

use crate::freq::{self, FrequencyRangeEntry};
use crate::pll::{self, PllConfig};
use crate::regs::{
    clk_ctrl, freq_range, lane_ctrl, pll_ctrl0, pll_ctrl1, pll_status,
    pll_update, rstz, shutdownz, Register,
};
use crate::tci::{Port, Tci, TestCode, TestPort};
use crate::{DphyConfig, DphyError, LaneMask, RegisterRw, Role};

/// Bias block reference trim.
const CB_0_BIAS_TRIM: u8 = 0x24;
/// Charge-pump bias trim.
const CB_1_CP_TRIM: u8 = 0x0a;
/// Enables the oscillator target override (RX startup and TX slew alike).
const OSC_OVERRIDE_EN: u8 = 1 << 0;
/// RX system register setting for the lowest frequency band.
const RX_SYS_1_LOW_BAND: u8 = 0x20;
/// PLL output enables in `DIG_RDWR_TX_PLL_17`.
const TX_PLL_17_OUTPUT_EN: u8 = 0b1100_0000;

/// The clock gate for a PHY instance.
pub trait PeripheralClocks {
    fn enable(&mut self);
    fn disable(&mut self);
}

/// The last step of a bring-up attempt that has finished.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum BringUpStage {
    Reset,
    TestPortCleared,
    FrequencyProgrammed,
    /// TX only.
    ClockEnabled,
    AwaitingStopstate,
}

/// Why a bring-up attempt failed after it started touching hardware.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum LinkFault {
    LaneSyncTimeout,
    PllLockTimeout,
}

impl From<LinkFault> for DphyError {
    fn from(f: LinkFault) -> Self {
        match f {
            LinkFault::LaneSyncTimeout => DphyError::LaneSyncTimeout,
            LinkFault::PllLockTimeout => DphyError::PllLockTimeout,
        }
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum LinkState {
    /// Never initialized.
    Uninitialized,
    PoweredDown,
    BringingUp(BringUpStage),
    LaneSynced,
    /// A bring-up attempt failed; only `uninitialize` gets out of here.
    Error(LinkFault),
}

/// What a link was brought up with.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct LinkParams {
    pub link_frequency_hz: u32,
    pub bitrate_mbps: u16,
    pub lanes: LaneMask,
    pub range: FrequencyRangeEntry,
    /// TX only.
    pub pll: Option<PllConfig>,
}

impl LinkParams {
    pub fn n_lanes(&self) -> u8 {
        self.lanes.data_lanes()
    }
}

#[derive(Copy, Clone, PartialEq)]
enum Trace {
    None,
    Initialize {
        role: Role,
        bitrate_mbps: u16,
        n_lanes: u8,
    },
    Rejected(Role, DphyError),
    AlreadySynced(Role),
    Faulted(Role, LinkFault),
    Stage(Role, BringUpStage),
    FrequencyRange {
        code: u8,
        osc: u16,
    },
    Pll {
        m: u16,
        n: u8,
        p: u8,
        vco: u8,
    },
    PllLocked {
        polls: u32,
    },
    Stopstate {
        expected: u32,
        observed: u32,
        polls: u32,
    },
    Timeout(Role, LinkFault),
    Synced(Role),
    Uninitialize(Role),
    AlreadyDown(Role),
}

ringbuf!(Trace, 64, Trace::None);

/// Calls `done` until it returns `true`, at most `limit` times, sleeping for
/// `interval_us` after every miss.  Returns the number of misses.
fn poll_until(
    delay: &mut impl DelayUs<u32>,
    limit: u32,
    interval_us: u32,
    mut done: impl FnMut() -> bool,
) -> Option<u32> {
    for misses in 0..limit {
        if done() {
            return Some(misses);
        }
        delay.delay_us(interval_us);
    }
    None
}

/// One D-PHY instance.
///
/// `R` is the PHY wrapper's register block, `C` its clock gate and `D` the
/// microsecond delay used for settle times and polling.
pub struct Dphy<R, C, D> {
    role: Role,
    rw: R,
    clocks: C,
    delay: D,
    config: DphyConfig,
    state: LinkState,
    link: Option<LinkParams>,
}

impl<R, C, D> Dphy<R, C, D>
where
    R: RegisterRw,
    C: PeripheralClocks,
    D: DelayUs<u32>,
{
    pub fn new(
        role: Role,
        rw: R,
        clocks: C,
        delay: D,
        config: DphyConfig,
    ) -> Self {
        Self {
            role,
            rw,
            clocks,
            delay,
            config,
            state: LinkState::Uninitialized,
            link: None,
        }
    }

    /// A receive PHY feeding a CSI-2 host, with the default configuration.
    pub fn csi2_rx(rw: R, clocks: C, delay: D) -> Self {
        Self::new(Role::Receiver, rw, clocks, delay, DphyConfig::DEFAULT)
    }

    /// A transmit PHY fed by a DSI controller, with the default
    /// configuration.
    pub fn dsi_tx(rw: R, clocks: C, delay: D) -> Self {
        Self::new(Role::Transmitter, rw, clocks, delay, DphyConfig::DEFAULT)
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn state(&self) -> LinkState {
        self.state
    }

    /// Parameters of the current link, if it's up.
    pub fn link(&self) -> Option<&LinkParams> {
        self.link.as_ref()
    }

    /// Reads the lanes currently in stopstate.
    ///
    /// The wrapper is only clocked between a bring-up attempt and the next
    /// `uninitialize`; outside of that this returns `NotInitialized`.
    pub fn stopstate(&self) -> Result<LaneMask, DphyError> {
        match self.state {
            LinkState::Uninitialized | LinkState::PoweredDown => {
                Err(DphyError::NotInitialized)
            }
            _ => Ok(LaneMask::from_bits_truncate(
                self.rw.read(Register::STOPSTATE),
            )),
        }
    }

    /// Brings the link up at `link_frequency_hz` (the DDR clock, so half the
    /// lane bit rate) on `n_lanes` data lanes.
    ///
    /// This is a no-op if the link is already up.  Arguments are checked
    /// before anything is written.  If an earlier attempt failed, the PHY
    /// must be uninitialized first; until then this returns the earlier
    /// failure.
    pub fn initialize(
        &mut self,
        link_frequency_hz: u32,
        n_lanes: u8,
    ) -> Result<(), DphyError> {
        match self.state {
            LinkState::LaneSynced => {
                ringbuf_entry!(Trace::AlreadySynced(self.role));
                return Ok(());
            }
            LinkState::Error(fault) => {
                ringbuf_entry!(Trace::Faulted(self.role, fault));
                return Err(fault.into());
            }
            LinkState::Uninitialized
            | LinkState::PoweredDown
            | LinkState::BringingUp(_) => (),
        }

        let link = match self.plan(link_frequency_hz, n_lanes) {
            Ok(link) => link,
            Err(e) => {
                ringbuf_entry!(Trace::Rejected(self.role, e));
                return Err(e);
            }
        };
        ringbuf_entry!(Trace::Initialize {
            role: self.role,
            bitrate_mbps: link.bitrate_mbps,
            n_lanes,
        });

        match self.bring_up(&link) {
            Ok(()) => {
                ringbuf_entry!(Trace::Synced(self.role));
                self.state = LinkState::LaneSynced;
                self.link = Some(link);
                Ok(())
            }
            Err(fault) => {
                ringbuf_entry!(Trace::Timeout(self.role, fault));
                self.state = LinkState::Error(fault);
                Err(fault.into())
            }
        }
    }

    /// Puts the PHY back in reset and shutdown and gates its clocks.
    ///
    /// Always succeeds, and does nothing at all if the PHY is already down.
    pub fn uninitialize(&mut self) -> Result<(), DphyError> {
        if matches!(
            self.state,
            LinkState::Uninitialized | LinkState::PoweredDown
        ) {
            ringbuf_entry!(Trace::AlreadyDown(self.role));
            return Ok(());
        }

        ringbuf_entry!(Trace::Uninitialize(self.role));
        self.rw.write(Register::RSTZ, 0);
        self.rw.write(Register::SHUTDOWNZ, 0);
        self.clocks.disable();
        self.state = LinkState::PoweredDown;
        self.link = None;
        Ok(())
    }

    /// Checks the request and works out everything bring-up will need,
    /// without touching hardware.
    fn plan(
        &self,
        link_frequency_hz: u32,
        n_lanes: u8,
    ) -> Result<LinkParams, DphyError> {
        let lanes =
            LaneMask::for_lanes(n_lanes).ok_or(DphyError::InvalidLaneCount)?;
        let bitrate_mbps = freq::lane_bitrate_mbps(link_frequency_hz)?;
        let range = *freq::lookup(bitrate_mbps)?;
        let pll = match self.role {
            Role::Receiver => None,
            Role::Transmitter => Some(pll::compute(
                link_frequency_hz.div_ceil(1000),
                self.config.ref_clk_khz,
                self.config.pll_n,
            )?),
        };

        Ok(LinkParams {
            link_frequency_hz,
            bitrate_mbps,
            lanes,
            range,
            pll,
        })
    }

    /// Runs one step of bring-up, and records `stage` once it's done.
    fn step(
        &mut self,
        stage: BringUpStage,
        f: impl FnOnce(&mut Self) -> Result<(), LinkFault>,
    ) -> Result<(), LinkFault> {
        f(self)?;
        ringbuf_entry!(Trace::Stage(self.role, stage));
        self.state = LinkState::BringingUp(stage);
        Ok(())
    }

    fn bring_up(&mut self, link: &LinkParams) -> Result<(), LinkFault> {
        self.step(BringUpStage::Reset, |phy| {
            phy.clocks.enable();
            phy.rw.write(Register::RSTZ, 0);
            phy.rw.write(Register::SHUTDOWNZ, 0);
            Ok(())
        })?;

        self.step(BringUpStage::TestPortCleared, |phy| {
            for port in [Port::Tx, Port::Rx] {
                Tci::select(&phy.rw, port)
                    .clear(&mut phy.delay, phy.config.settle_us);
            }
            Ok(())
        })?;

        self.step(BringUpStage::FrequencyProgrammed, |phy| {
            phy.program_frequency(link);
            Ok(())
        })?;

        if let Some(pll) = &link.pll {
            self.step(BringUpStage::ClockEnabled, |phy| {
                phy.program_pll(pll);
                Ok(())
            })?;
        }

        self.step(BringUpStage::AwaitingStopstate, |phy| {
            phy.rw.write(Register::SHUTDOWNZ, shutdownz::ENABLE);
            phy.delay.delay_us(phy.config.settle_us);
            phy.rw.write(Register::RSTZ, rstz::RUN);
            Ok(())
        })?;

        if self.role == Role::Transmitter {
            let polls = self
                .poll(|rw| {
                    rw.read(Register::PLL_STATUS) & pll_status::LOCK != 0
                })
                .ok_or(LinkFault::PllLockTimeout)?;
            ringbuf_entry!(Trace::PllLocked { polls });
        }

        let expected = link.lanes;
        let mut observed = LaneMask::empty();
        let polls = self.poll(|rw| {
            observed =
                LaneMask::from_bits_truncate(rw.read(Register::STOPSTATE));
            observed.contains(expected)
        });
        ringbuf_entry!(Trace::Stopstate {
            expected: expected.bits(),
            observed: observed.bits(),
            polls: polls.unwrap_or(self.config.poll_limit),
        });
        polls.ok_or(LinkFault::LaneSyncTimeout)?;

        match self.role {
            Role::Receiver => self.rw.modify(Register::LANE_CTRL, |r| {
                *r &= !(lane_ctrl::FIELD_MASK << lane_ctrl::FORCERXMODE_SHIFT)
            }),
            Role::Transmitter => {
                self.rw.write(Register::CLK_CTRL, clk_ctrl::ENABLECLK)
            }
        }
        Ok(())
    }

    fn poll(&mut self, mut done: impl FnMut(&R) -> bool) -> Option<u32> {
        let rw = &self.rw;
        poll_until(
            &mut self.delay,
            self.config.poll_limit,
            self.config.poll_interval_us,
            || done(rw),
        )
    }

    fn program_frequency(&mut self, link: &LinkParams) {
        let range = &link.range;
        ringbuf_entry!(Trace::FrequencyRange {
            code: range.freq_select_code,
            osc: range.osc_freq_target,
        });

        self.rw.write(
            Register::FREQ_RANGE,
            freq_range::encode(
                range.freq_select_code,
                freq::cfgclkfreqrange(self.config.cfg_clk_mhz),
            ),
        );

        let mut tci = Tci::select(&self.rw, self.role.test_port());
        tci.write(TestCode::DIG_RDWR_CB_0.into(), CB_0_BIAS_TRIM);
        tci.write(TestCode::DIG_RDWR_CB_1.into(), CB_1_CP_TRIM);

        let (lo, hi, en) = match self.role {
            Role::Receiver => (
                TestCode::DIG_RDWR_RX_STARTUP_OVR_2,
                TestCode::DIG_RDWR_RX_STARTUP_OVR_3,
                TestCode::DIG_RDWR_RX_STARTUP_OVR_4,
            ),
            Role::Transmitter => (
                TestCode::DIG_RDWR_TX_SLEW_5,
                TestCode::DIG_RDWR_TX_SLEW_6,
                TestCode::DIG_RDWR_TX_SLEW_7,
            ),
        };
        let [osc_hi, osc_lo] = range.osc_freq_target.to_be_bytes();
        tci.write(lo.into(), osc_lo);
        tci.write(hi.into(), osc_hi & 0x0f);
        tci.write(en.into(), OSC_OVERRIDE_EN);

        if self.role == Role::Receiver
            && range.bitrate_mbps == freq::MIN_BITRATE_MBPS
        {
            tci.write(TestCode::DIG_RDWR_RX_SYS_1.into(), RX_SYS_1_LOW_BAND);
        }

        // RX lanes point inward and are held in receive until they sync;
        // TX lanes are all zero.
        let lanes = match self.role {
            Role::Receiver => lane_ctrl::encode(link.lanes, link.lanes),
            Role::Transmitter => 0,
        };
        self.rw.write(Register::LANE_CTRL, lanes);
    }

    fn program_pll(&mut self, pll: &PllConfig) {
        ringbuf_entry!(Trace::Pll {
            m: pll.m,
            n: pll.n,
            p: pll.p,
            vco: pll.vco_ctrl,
        });

        self.rw.write(
            Register::PLL_CTRL0,
            pll_ctrl0::encode(pll.m, pll.n, pll.vco_ctrl),
        );
        self.rw.write(
            Register::PLL_CTRL1,
            pll_ctrl1::encode(
                pll.gmp_ctrl,
                pll.cpbias_ctrl,
                pll.int_ctrl,
                pll.prop_ctrl,
            ),
        );
        self.rw.write(Register::PLL_UPDATE, pll_update::UPDATEPLL);
        self.rw.write(Register::PLL_UPDATE, 0);

        // Outputs stay gated until the new settings have been loaded.
        Tci::select(&self.rw, Port::Tx)
            .modify(TestCode::DIG_RDWR_TX_PLL_17.into(), |v| {
                *v |= TX_PLL_17_OUTPUT_EN
            });
    }
}
