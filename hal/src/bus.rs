//! The trait boundary between the protocol engine and the IP-core.
//!
//! Everything behind this trait — register-level MMIO, DMA into the frame
//! RAM, the PHY, CYC_CLK/CON_CLK/DIV_CLK timer hardware, the watchdog poke —
//! is explicitly out of scope for this crate (§1); it is named here only as
//! an interface so the master can be driven cycle-by-cycle against either a
//! real IP-core or a software simulator (see `bin/sercos-sim`).

use crate::error::BusError;
use crate::telegram::Port;

/// Interfaces consumed, not implemented, by `sercos-master`.
pub mod interface {
    use super::*;

    /// Register-level access to one IP-core's shadow register file, matching
    /// the `ReadShort`/`WriteShort` pair named in §6.
    pub trait IpCoreBus {
        /// Read one 16-bit register/frame-RAM word at `offset`.
        fn read_short(&self, offset: u16) -> Result<u16, BusError>;

        /// Write one 16-bit register/frame-RAM word at `offset`.
        fn write_short(&mut self, offset: u16, value: u16) -> Result<(), BusError>;

        /// Bulk-read a run of consecutive words, e.g. an SVC buffer window.
        fn read_block(&self, offset: u16, buf: &mut [u16]) -> Result<(), BusError> {
            for (i, slot) in buf.iter_mut().enumerate() {
                *slot = self.read_short(offset + i as u16)?;
            }
            Ok(())
        }

        /// Bulk-write a run of consecutive words.
        fn write_block(&mut self, offset: u16, data: &[u16]) -> Result<(), BusError> {
            for (i, word) in data.iter().enumerate() {
                self.write_short(offset + i as u16, *word)?;
            }
            Ok(())
        }

        /// Host byte order of this bus's caller. The SVC atomic engine
        /// consults this to decide whether to swap operand words (§4.A).
        fn is_big_endian(&self) -> bool {
            cfg!(target_endian = "big")
        }
    }

    /// CYC_CLK/CON_CLK/DIV_CLK timer-event configuration named in §6.
    /// Implementations own the actual hardware counters; the master only
    /// asks for event scheduling and reads back counter snapshots.
    pub trait TimingEvents {
        fn prepare_cyc_clk(&mut self, period_ns: u32) -> Result<(), BusError>;
        fn prepare_cyc_clk_secondary(&mut self, period_ns: u32) -> Result<(), BusError>;
        fn enable_cyc_clk_input(&mut self) -> Result<(), BusError>;
        fn set_con_clk(&mut self, compare_ns: u32) -> Result<(), BusError>;
        fn config_div_clk(&mut self, divider: u16) -> Result<(), BusError>;
        fn event_control(&mut self, event: TimingEvent, enable: bool) -> Result<(), BusError>;
        fn get_event_time(&self, event: TimingEvent) -> Result<u32, BusError>;
        fn int_control(&mut self, enable: bool) -> Result<(), BusError>;
        fn get_tcnt(&self) -> Result<u32, BusError>;
        fn get_tcnt_relative(&self) -> Result<u32, BusError>;
        fn get_tsref(&self) -> Result<u32, BusError>;
    }

    /// Two-way ring-delay measurement primitive (`S-0-1015`), consumed by
    /// `master::timing::measure_ring_delay`. The actual timestamp capture is
    /// IP-core silicon; this trait exposes just the round-trip result.
    pub trait RingDelayProbe {
        fn measure_round_trip(&mut self, port: Port) -> Result<u32, BusError>;
    }

    /// Optional watchdog surface (§6). A master that has no watchdog
    /// configured never calls these.
    pub trait Watchdog {
        fn trigger(&mut self) -> Result<(), BusError>;
        fn control(&mut self, enable: bool) -> Result<(), BusError>;
        fn configure(&mut self, timeout_cycles: u32) -> Result<(), BusError>;
        fn status(&self) -> Result<WatchdogStatus, BusError>;
    }
}

/// Named timer events the phase sequencer and SVC engine schedule against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimingEvent {
    At0Start,
    CommandValid,
    SyncReference,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct WatchdogStatus {
    pub enabled: bool,
    pub tripped: bool,
}
