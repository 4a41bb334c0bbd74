//! The SVC Atomic Engine (§4.A): one element-level read or write on one
//! slave's service channel, advanced one Sercos cycle at a time.

use sercos_hal::bus::interface::IpCoreBus;
use sercos_hal::idn::{Element, Idn};
use sercos_hal::words::{SvcControl, SvcStatus};

use crate::error::MasterError;
use crate::model::slave::SlaveIdx;
use crate::model::svc_container::{SvcContainer, SC_WRBUF_LENGTH};
use crate::progress::Progress;

/// §4.A state set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AtomicState {
    InitRequest,
    RequestInProgress,
    LastStep,
    FinishedRequest,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AtomicOp {
    Read,
    Write,
}

/// Host-observed outcome of a finished atomic transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AtomicDone {
    pub words_transferred: u16,
}

/// One element-level read or write, advanced by repeated calls to
/// [`AtomicRequest::advance`] — one call per Sercos cycle.
#[derive(Debug, Clone)]
pub struct AtomicRequest {
    pub slave: SlaveIdx,
    /// The IDN this transfer is bound to (§4.B `Open`); carried here purely
    /// so a slave-error encountered mid-transfer (`check_slave_error`) names
    /// the right parameter rather than a fixed placeholder.
    pub idn: Idn,
    pub element: Element,
    pub op: AtomicOp,
    pub state: AtomicState,
    /// Set by the caller to cancel; observed at the next `advance`.
    pub cancel_act_trans: bool,

    /// Segmentation cursor: words already consumed.
    pub act_position: u16,
    /// Words still to transfer.
    pub num_words: u16,
    /// `SC_WRBUF_LENGTH`-sized window capacity, in words.
    pub buffer_capacity: u16,

    /// For writes: the full source payload. For reads: filled in as the
    /// transfer progresses.
    pub payload: Vec<u16>,

    /// Swap pairs of 16-bit words (4-byte) / 4-tuples (8-byte) on
    /// big-endian hosts; untouched for byte-variable lists (§4.A
    /// "Endianness").
    pub swap_on_big_endian: bool,
    pub operand_width_words: u8,

    busy_timeout_budget: u32,
    handshake_timeout_budget: u32,
}

impl AtomicRequest {
    pub fn new(
        slave: SlaveIdx,
        idn: Idn,
        element: Element,
        op: AtomicOp,
        payload: Vec<u16>,
    ) -> Self {
        let num_words = payload.len() as u16;
        Self {
            slave,
            idn,
            element,
            op,
            state: AtomicState::InitRequest,
            cancel_act_trans: false,
            act_position: 0,
            num_words,
            buffer_capacity: SC_WRBUF_LENGTH as u16,
            payload,
            swap_on_big_endian: !element.is_always_list(),
            operand_width_words: 2,
            busy_timeout_budget: DEFAULT_BUSY_TIMEOUT_CYCLES,
            handshake_timeout_budget: DEFAULT_HANDSHAKE_TIMEOUT_CYCLES,
        }
    }

    /// §4.A "A request is in its last step iff remaining words ≤ buffer
    /// capacity."
    fn is_last_step(&self) -> bool {
        self.remaining_words() <= self.buffer_capacity
    }

    fn remaining_words(&self) -> u16 {
        self.num_words.saturating_sub(self.act_position)
    }

    /// Advance the state machine by one cycle.
    pub fn advance(
        &mut self,
        container: &mut SvcContainer,
        bus: &mut dyn IpCoreBus,
    ) -> Progress<AtomicDone> {
        if self.cancel_act_trans {
            self.state = AtomicState::FinishedRequest;
            return Progress::Canceled;
        }

        match self.state {
            AtomicState::InitRequest => self.step_init(container, bus),
            AtomicState::RequestInProgress => self.step_in_progress(container, bus),
            AtomicState::LastStep => self.step_last(container, bus),
            AtomicState::FinishedRequest => Progress::Done(AtomicDone {
                words_transferred: self.act_position,
            }),
        }
    }

    fn step_init(
        &mut self,
        container: &mut SvcContainer,
        bus: &mut dyn IpCoreBus,
    ) -> Progress<AtomicDone> {
        refresh_status(container, bus);

        if !container.m_busy_set() {
            self.busy_timeout_budget = self.busy_timeout_budget.saturating_sub(1);
            if self.busy_timeout_budget == 0 {
                return Progress::Failed(MasterError::BusyTimeout { slave: self.slave });
            }
            return Progress::InProgress(0);
        }

        self.act_position = 0;
        if self.is_last_step() {
            self.state = AtomicState::LastStep;
            self.step_last(container, bus)
        } else {
            self.state = AtomicState::RequestInProgress;
            self.transfer_chunk(container, bus, false)
        }
    }

    fn step_in_progress(
        &mut self,
        container: &mut SvcContainer,
        bus: &mut dyn IpCoreBus,
    ) -> Progress<AtomicDone> {
        refresh_status(container, bus);

        if let Some(err) = self.check_slave_error(container, bus) {
            return Progress::Failed(err);
        }

        if !container.handshake_acknowledged() {
            self.handshake_timeout_budget = self.handshake_timeout_budget.saturating_sub(1);
            if self.handshake_timeout_budget == 0 {
                return Progress::Failed(MasterError::HandshakeTimeout { slave: self.slave });
            }
            return Progress::InProgress(0);
        }
        self.handshake_timeout_budget = DEFAULT_HANDSHAKE_TIMEOUT_CYCLES;

        if self.is_last_step() {
            self.state = AtomicState::LastStep;
            self.step_last(container, bus)
        } else {
            self.transfer_chunk(container, bus, false)
        }
    }

    fn step_last(
        &mut self,
        container: &mut SvcContainer,
        bus: &mut dyn IpCoreBus,
    ) -> Progress<AtomicDone> {
        refresh_status(container, bus);

        if let Some(err) = self.check_slave_error(container, bus) {
            return Progress::Failed(err);
        }

        if container.last_mhs || self.act_position != 0 {
            // A chunk has already been issued; wait for this one's
            // acknowledge before declaring finished.
            if !container.handshake_acknowledged() {
                self.handshake_timeout_budget = self.handshake_timeout_budget.saturating_sub(1);
                if self.handshake_timeout_budget == 0 {
                    return Progress::Failed(MasterError::HandshakeTimeout { slave: self.slave });
                }
                return Progress::InProgress(0);
            }
        }

        self.transfer_chunk(container, bus, true)
    }

    fn check_slave_error(
        &mut self,
        container: &mut SvcContainer,
        bus: &mut dyn IpCoreBus,
    ) -> Option<MasterError> {
        if container.slave_error() {
            let code = bus
                .read_short(container.layout.status_word_offset.wrapping_add(1))
                .unwrap_or(0xFFFF);
            self.state = AtomicState::FinishedRequest;
            return Some(MasterError::SvcErrorMessage {
                slave: self.slave,
                idn: self.idn,
                code,
            });
        }
        None
    }

    /// Write (for `Write` ops) or read (for `Read` ops) one buffer window,
    /// asserting `SETEND` when `last` is true, and toggle `MHS` to hand the
    /// step to the slave.
    fn transfer_chunk(
        &mut self,
        container: &mut SvcContainer,
        bus: &mut dyn IpCoreBus,
        last: bool,
    ) -> Progress<AtomicDone> {
        use tock_registers::interfaces::{Readable, Writeable};

        let remaining = self.remaining_words();
        let chunk_len = remaining.min(self.buffer_capacity);

        match self.op {
            AtomicOp::Write => {
                let start = self.act_position as usize;
                let end = start + chunk_len as usize;
                let mut chunk: Vec<u16> = self.payload[start..end].to_vec();
                if self.swap_on_big_endian && bus.is_big_endian() {
                    swap_operand_words(&mut chunk, self.operand_width_words);
                }
                if bus
                    .write_block(container.layout.write_buffer_offset, &chunk)
                    .is_err()
                {
                    return Progress::Failed(MasterError::ProtocolError { slave: self.slave });
                }
            }
            AtomicOp::Read => {
                let mut chunk = vec![0u16; chunk_len as usize];
                if bus
                    .read_block(container.layout.read_buffer_offset, &mut chunk)
                    .is_err()
                {
                    return Progress::Failed(MasterError::ProtocolError { slave: self.slave });
                }
                if self.swap_on_big_endian && bus.is_big_endian() {
                    swap_operand_words(&mut chunk, self.operand_width_words);
                }
                if self.payload.len() < self.act_position as usize + chunk.len() {
                    self.payload
                        .resize(self.act_position as usize + chunk.len(), 0);
                }
                let start = self.act_position as usize;
                self.payload[start..start + chunk.len()].copy_from_slice(&chunk);
            }
        }

        self.act_position += chunk_len;
        self.num_words = self.num_words.max(self.act_position);

        let new_mhs = !container.last_mhs;
        container.last_mhs = new_mhs;

        let mut field = sercos_hal::words::element_field(self.element)
            + SvcControl::M_BUSY::SET;
        if matches!(self.op, AtomicOp::Write) {
            field = field + SvcControl::WRITE::SET;
        }
        if last {
            field = field + SvcControl::SETEND::SET;
        }
        if new_mhs {
            field = field + SvcControl::MHS::SET;
        }
        container.control.write(field);
        let _ = bus.write_short(container.layout.control_word_offset, container.control.get());

        if last {
            self.state = AtomicState::FinishedRequest;
            Progress::Done(AtomicDone {
                words_transferred: self.act_position,
            })
        } else {
            self.state = AtomicState::RequestInProgress;
            Progress::InProgress(0)
        }
    }
}

fn refresh_status(container: &mut SvcContainer, bus: &mut dyn IpCoreBus) {
    use tock_registers::interfaces::Writeable;
    if let Ok(raw) = bus.read_short(container.layout.status_word_offset) {
        container.status.set(raw);
    }
}

/// Swap pairs (4-byte operands) or 4-tuples (8-byte operands) of 16-bit
/// words in place. Byte-variable lists pass `operand_width_words == 0` or
/// call with `swap_on_big_endian == false` and never reach here.
fn swap_operand_words(words: &mut [u16], operand_width_words: u8) {
    let width = operand_width_words.max(1) as usize;
    for chunk in words.chunks_mut(width) {
        chunk.reverse();
    }
}

const DEFAULT_BUSY_TIMEOUT_CYCLES: u32 = 1000;
const DEFAULT_HANDSHAKE_TIMEOUT_CYCLES: u32 = 1000;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::svc_container::SvcContainerLayout;

    struct FakeBus {
        status: u16,
        control: u16,
        read_buf: Vec<u16>,
        write_buf: Vec<u16>,
        big_endian: bool,
    }

    impl IpCoreBus for FakeBus {
        fn read_short(&self, offset: u16) -> Result<u16, sercos_hal::error::BusError> {
            Ok(if offset == 0 { self.status } else { self.status })
        }
        fn write_short(&mut self, offset: u16, value: u16) -> Result<(), sercos_hal::error::BusError> {
            if offset == 0 {
                self.control = value;
            }
            Ok(())
        }
        fn read_block(&self, _offset: u16, buf: &mut [u16]) -> Result<(), sercos_hal::error::BusError> {
            for (i, slot) in buf.iter_mut().enumerate() {
                *slot = *self.read_buf.get(i).unwrap_or(&0);
            }
            Ok(())
        }
        fn write_block(&mut self, _offset: u16, data: &[u16]) -> Result<(), sercos_hal::error::BusError> {
            self.write_buf = data.to_vec();
            Ok(())
        }
        fn is_big_endian(&self) -> bool {
            self.big_endian
        }
    }

    fn layout() -> SvcContainerLayout {
        SvcContainerLayout {
            control_word_offset: 0,
            write_buffer_offset: 10,
            status_word_offset: 0,
            read_buffer_offset: 10,
        }
    }

    #[test]
    fn short_write_completes_in_one_chunk_once_m_busy_is_set() {
        use tock_registers::interfaces::Writeable;
        let mut container = SvcContainer::new(layout());
        let mut bus = FakeBus {
            status: 0,
            control: 0,
            read_buf: vec![],
            write_buf: vec![],
            big_endian: false,
        };
        // M_BUSY lives in the control word on the master's own shadow; the
        // slave signals readiness to accept a new step by the same bit in
        // hardware. Simulate it being set before the first advance.
        container.control.write(SvcControl::M_BUSY::SET);

        let mut req = AtomicRequest::new(
            SlaveIdx::new(0),
            sercos_hal::idn::well_known::S_0_1013,
            Element::Data,
            AtomicOp::Write,
            vec![0xAAAA, 0xBBBB],
        );
        let outcome = req.advance(&mut container, &mut bus);
        assert!(matches!(outcome, Progress::Done(_)));
        assert_eq!(bus.write_buf, vec![0xAAAA, 0xBBBB]);
    }

    #[test]
    fn cancel_transitions_directly_to_finished() {
        let mut container = SvcContainer::new(layout());
        let mut bus = FakeBus {
            status: 0,
            control: 0,
            read_buf: vec![],
            write_buf: vec![],
            big_endian: false,
        };
        let mut req = AtomicRequest::new(
            SlaveIdx::new(0),
            sercos_hal::idn::well_known::S_0_1013,
            Element::Data,
            AtomicOp::Read,
            vec![],
        );
        req.cancel_act_trans = true;
        let outcome = req.advance(&mut container, &mut bus);
        assert_eq!(outcome, Progress::Canceled);
        assert_eq!(req.state, AtomicState::FinishedRequest);
    }

    #[test]
    fn segmentation_splits_long_list_over_several_chunks() {
        use tock_registers::interfaces::Writeable;
        let mut container = SvcContainer::new(layout());
        container.control.write(SvcControl::M_BUSY::SET);
        let mut bus = FakeBus {
            status: 0,
            control: 0,
            read_buf: vec![],
            write_buf: vec![],
            big_endian: false,
        };
        let payload: Vec<u16> = (0..40u16).collect();
        let mut req = AtomicRequest::new(
            SlaveIdx::new(0),
            sercos_hal::idn::well_known::S_0_1013,
            Element::Name,
            AtomicOp::Write,
            payload,
        );
        // 40 words over a 16-word window => first two chunks not last.
        let first = req.advance(&mut container, &mut bus);
        assert!(first.is_in_progress());
        assert_eq!(req.act_position, 16);
    }

    #[test]
    fn swap_operand_words_reverses_pairs() {
        let mut words = vec![1u16, 2, 3, 4];
        swap_operand_words(&mut words, 2);
        assert_eq!(words, vec![2, 1, 4, 3]);
    }
}
