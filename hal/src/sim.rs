//! A software stand-in for the IP-core (§6, §9.A), driving the protocol
//! engine against a virtual fleet instead of real silicon. Built only with
//! the `simulation` feature — a real master never links this in, and it is
//! the backend `bin/sercos-sim` and `bin/sercos-probe` drive against.
//!
//! [`SimulatedBus`] is a flat word-addressable memory, the same shape the
//! real register/frame-RAM boundary has (§1): every trait method in
//! [`crate::bus::interface`] just reads or writes that memory. What makes it
//! useful as a fixture rather than inert storage is the SVC loopback
//! responder installed per slave: on every control-word write whose MHS bit
//! has flipped, it answers in the same cycle with a matching `AHS`, `VALID`
//! set and the write buffer mirrored back into the read buffer. That is
//! enough to carry the atomic/macro engines (`svc::atomic`, `svc::macro_engine`)
//! to completion without modelling any particular slave device's firmware.

use std::collections::HashMap;

use tock_registers::interfaces::{Readable, Writeable};

use crate::bus::interface::{IpCoreBus, RingDelayProbe, TimingEvents, Watchdog};
use crate::bus::{TimingEvent, WatchdogStatus};
use crate::error::BusError;
use crate::telegram::Port;
use crate::words::{CDev, SDev, SvcControl, SvcStatus, Word};

/// Offsets of one slave's SVC channel within the simulated bus's flat
/// address space, mirroring [`crate::words`]'s layout but owned here so the
/// responder can be registered without reaching into `sercos-master`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VirtualSvcChannel {
    pub control_word_offset: u16,
    pub status_word_offset: u16,
    pub write_buffer_offset: u16,
    pub read_buffer_offset: u16,
    pub buffer_len: u16,
}

impl VirtualSvcChannel {
    pub fn new(
        control_word_offset: u16,
        status_word_offset: u16,
        write_buffer_offset: u16,
        read_buffer_offset: u16,
        buffer_len: u16,
    ) -> Self {
        Self {
            control_word_offset,
            status_word_offset,
            write_buffer_offset,
            read_buffer_offset,
            buffer_len,
        }
    }
}

/// Device control/status word pair (C-DEV/S-DEV, §3) for one slave's
/// cyclic telegram slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VirtualDevWords {
    pub cdev_offset: u16,
    pub sdev_offset: u16,
}

#[derive(Debug, Default)]
struct ChannelState {
    last_mhs: Option<bool>,
}

/// A software IP-core: flat word memory plus the handful of responders that
/// make the simulated fleet answer convincingly.
pub struct SimulatedBus {
    memory: HashMap<u16, u16>,
    svc_channels: Vec<VirtualSvcChannel>,
    channel_state: Vec<ChannelState>,
    dev_words: Vec<VirtualDevWords>,
    ring_delay_ns: u32,
    tcnt: u32,
    tsref: u32,
    big_endian: bool,
    watchdog: WatchdogStatus,
}

impl SimulatedBus {
    pub fn new() -> Self {
        Self {
            memory: HashMap::new(),
            svc_channels: Vec::new(),
            channel_state: Vec::new(),
            dev_words: Vec::new(),
            ring_delay_ns: 2_000,
            tcnt: 0,
            tsref: 0,
            big_endian: cfg!(target_endian = "big"),
            watchdog: WatchdogStatus::default(),
        }
    }

    /// Registers a slave's SVC channel so writes to its control word get an
    /// automatic loopback answer. Order is not significant; channels are
    /// matched by offset, not by slave index.
    pub fn register_svc_channel(&mut self, channel: VirtualSvcChannel) {
        self.svc_channels.push(channel);
        self.channel_state.push(ChannelState::default());
    }

    /// Registers a slave's C-DEV/S-DEV pair so writing `MASTER_VALID` into
    /// C-DEV is echoed back as `SLAVE_VALID` in S-DEV, topology mirrored.
    pub fn register_dev_words(&mut self, words: VirtualDevWords) {
        self.dev_words.push(words);
    }

    /// Fixes the round-trip time [`RingDelayProbe::measure_round_trip`]
    /// reports, for scenarios that want a specific `S-0-1015` value.
    pub fn set_ring_delay_ns(&mut self, ns: u32) {
        self.ring_delay_ns = ns;
    }

    fn raw_read(&self, offset: u16) -> u16 {
        *self.memory.get(&offset).unwrap_or(&0)
    }

    fn raw_write(&mut self, offset: u16, value: u16) {
        self.memory.insert(offset, value);
    }

    fn respond_to_svc_write(&mut self, offset: u16, value: u16) {
        let Some(idx) = self
            .svc_channels
            .iter()
            .position(|c| c.control_word_offset == offset)
        else {
            return;
        };
        let channel = self.svc_channels[idx];

        let control: Word<SvcControl::Register> = Word::new(value);
        let mhs = control.is_set(SvcControl::MHS);
        if self.channel_state[idx].last_mhs == Some(mhs) {
            return;
        }
        self.channel_state[idx].last_mhs = Some(mhs);

        let status: Word<SvcStatus::Register> = Word::new(0);
        let mut field = SvcStatus::VALID::SET;
        if mhs {
            field = field + SvcStatus::AHS::SET;
        }
        status.write(field);
        self.raw_write(channel.status_word_offset, status.get());

        for i in 0..channel.buffer_len {
            let v = self.raw_read(channel.write_buffer_offset + i);
            self.raw_write(channel.read_buffer_offset + i, v);
        }
    }

    fn respond_to_dev_write(&mut self, offset: u16, value: u16) {
        let Some(words) = self.dev_words.iter().find(|w| w.cdev_offset == offset) else {
            return;
        };
        let sdev_offset = words.sdev_offset;

        let cdev: Word<CDev::Register> = Word::new(value);
        let sdev: Word<SDev::Register> = Word::new(0);
        let mut field = SDev::INACTIVE::PTelegram;
        if cdev.is_set(CDev::MASTER_VALID) {
            field = field + SDev::SLAVE_VALID::SET;
        }
        if cdev.is_set(CDev::TOPOLOGY_HS) {
            field = field + SDev::TOPOLOGY_HS::SET;
        }
        sdev.write(field);
        self.raw_write(sdev_offset, sdev.get());
    }
}

impl Default for SimulatedBus {
    fn default() -> Self {
        Self::new()
    }
}

impl IpCoreBus for SimulatedBus {
    fn read_short(&self, offset: u16) -> Result<u16, BusError> {
        Ok(self.raw_read(offset))
    }

    fn write_short(&mut self, offset: u16, value: u16) -> Result<(), BusError> {
        self.raw_write(offset, value);
        self.respond_to_svc_write(offset, value);
        self.respond_to_dev_write(offset, value);
        Ok(())
    }

    fn is_big_endian(&self) -> bool {
        self.big_endian
    }
}

impl TimingEvents for SimulatedBus {
    fn prepare_cyc_clk(&mut self, _period_ns: u32) -> Result<(), BusError> {
        Ok(())
    }

    fn prepare_cyc_clk_secondary(&mut self, _period_ns: u32) -> Result<(), BusError> {
        Ok(())
    }

    fn enable_cyc_clk_input(&mut self) -> Result<(), BusError> {
        Ok(())
    }

    fn set_con_clk(&mut self, _compare_ns: u32) -> Result<(), BusError> {
        Ok(())
    }

    fn config_div_clk(&mut self, _divider: u16) -> Result<(), BusError> {
        Ok(())
    }

    fn event_control(&mut self, _event: TimingEvent, _enable: bool) -> Result<(), BusError> {
        Ok(())
    }

    fn get_event_time(&self, _event: TimingEvent) -> Result<u32, BusError> {
        Ok(self.tcnt)
    }

    fn int_control(&mut self, _enable: bool) -> Result<(), BusError> {
        Ok(())
    }

    fn get_tcnt(&self) -> Result<u32, BusError> {
        Ok(self.tcnt)
    }

    fn get_tcnt_relative(&self) -> Result<u32, BusError> {
        Ok(self.tcnt)
    }

    fn get_tsref(&self) -> Result<u32, BusError> {
        Ok(self.tsref)
    }
}

impl RingDelayProbe for SimulatedBus {
    fn measure_round_trip(&mut self, _port: Port) -> Result<u32, BusError> {
        Ok(self.ring_delay_ns)
    }
}

impl Watchdog for SimulatedBus {
    fn trigger(&mut self) -> Result<(), BusError> {
        self.watchdog.tripped = false;
        Ok(())
    }

    fn control(&mut self, enable: bool) -> Result<(), BusError> {
        self.watchdog.enabled = enable;
        Ok(())
    }

    fn configure(&mut self, _timeout_cycles: u32) -> Result<(), BusError> {
        Ok(())
    }

    fn status(&self) -> Result<WatchdogStatus, BusError> {
        Ok(self.watchdog)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_then_read_short_round_trips() {
        let mut bus = SimulatedBus::new();
        bus.write_short(5, 0xBEEF).unwrap();
        assert_eq!(bus.read_short(5).unwrap(), 0xBEEF);
    }

    #[test]
    fn unregistered_control_write_does_not_panic_or_respond() {
        let mut bus = SimulatedBus::new();
        let control: Word<SvcControl::Register> = Word::new(0);
        control.write(SvcControl::MHS::SET);
        bus.write_short(0, control.get()).unwrap();
        assert_eq!(bus.read_short(1).unwrap(), 0);
    }

    #[test]
    fn svc_channel_answers_on_mhs_toggle_and_mirrors_buffer() {
        let mut bus = SimulatedBus::new();
        bus.register_svc_channel(VirtualSvcChannel::new(0, 1, 2, 18, 4));
        bus.write_block(2, &[11, 22, 33, 44]).unwrap();

        let control: Word<SvcControl::Register> = Word::new(0);
        control.write(SvcControl::MHS::SET + SvcControl::M_BUSY::SET);
        bus.write_short(0, control.get()).unwrap();

        let status: Word<SvcStatus::Register> = Word::new(bus.read_short(1).unwrap());
        assert!(status.is_set(SvcStatus::VALID));
        assert!(status.is_set(SvcStatus::AHS));

        let mut read_back = [0u16; 4];
        bus.read_block(18, &mut read_back).unwrap();
        assert_eq!(read_back, [11, 22, 33, 44]);
    }

    #[test]
    fn svc_channel_does_not_re_answer_without_an_mhs_toggle() {
        let mut bus = SimulatedBus::new();
        bus.register_svc_channel(VirtualSvcChannel::new(0, 1, 2, 18, 1));

        let control: Word<SvcControl::Register> = Word::new(0);
        control.write(SvcControl::MHS::SET);
        bus.write_short(0, control.get()).unwrap();
        bus.raw_write(1, 0);
        bus.write_short(0, control.get()).unwrap();
        assert_eq!(bus.read_short(1).unwrap(), 0);
    }

    #[test]
    fn dev_words_mirror_master_valid_into_slave_valid() {
        let mut bus = SimulatedBus::new();
        bus.register_dev_words(VirtualDevWords {
            cdev_offset: 100,
            sdev_offset: 101,
        });

        let cdev: Word<CDev::Register> = Word::new(0);
        cdev.write(CDev::MASTER_VALID::SET);
        bus.write_short(100, cdev.get()).unwrap();

        let sdev: Word<SDev::Register> = Word::new(bus.read_short(101).unwrap());
        assert!(sdev.is_set(SDev::SLAVE_VALID));
    }

    #[test]
    fn ring_delay_is_configurable() {
        let mut bus = SimulatedBus::new();
        bus.set_ring_delay_ns(5_500);
        assert_eq!(bus.measure_round_trip(Port::P).unwrap(), 5_500);
    }
}
