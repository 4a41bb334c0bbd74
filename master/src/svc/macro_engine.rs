//! The SVC Macro Engine (§4.B): binds a sequence of atomic transfers to a
//! full parameter access, guaranteeing at most one active transaction per
//! slave.

use sercos_hal::attribute::AttributeWord;
use sercos_hal::bus::interface::IpCoreBus;
use sercos_hal::idn::{Element, Idn};

use crate::error::MasterError;
use crate::model::slave::SlaveIdx;
use crate::model::svc_container::{SvcContainer, SC_WRBUF_LENGTH};
use crate::progress::Progress;
use crate::svc::atomic::{AtomicDone, AtomicOp, AtomicRequest};

/// §4.B macro state set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MacroState {
    StartRequest,
    RequestInProgress,
    DataValid,
    AttributeValid,
    CmdActive,
    CmdCleared,
    CmdStatusValid,
    RequestError,
}

/// Procedure-command status word values (§4.B `SetCommand`/`ReadCmdStatus`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandStatus {
    Ready,
    Running,
    Finished,
    Interrupted,
    Error,
}

impl CommandStatus {
    pub fn from_word(word: u16) -> Self {
        match word & 0x7 {
            0x3 => CommandStatus::Finished,
            0x5 => CommandStatus::Interrupted,
            0x7 => CommandStatus::Running,
            0xF => CommandStatus::Error,
            _ => CommandStatus::Ready,
        }
    }
}

/// The macro-level operation currently bound to a request.
#[derive(Debug, Clone)]
pub enum MacroOp {
    Open(Idn),
    ReadAttribute,
    ReadName,
    ReadUnit,
    ReadMin,
    ReadMax,
    ReadData { is_list: bool, length_words: u16 },
    WriteData { payload: Vec<u16>, is_list: bool },
    SetCommand,
    ClearCommand,
    ReadCmdStatus,
    GetListLength,
}

/// One in-flight per-slave macro transaction (§3 `SvcMacroRequest`).
pub struct SvcMacroRequest {
    pub slave: SlaveIdx,
    pub idn: Idn,
    pub state: MacroState,
    pub op: Option<MacroOp>,
    atomic: Option<AtomicRequest>,

    /// Segmented transfer cursor, shared across list reads that span
    /// multiple macro `advance` calls (distinct from the atomic engine's
    /// own per-chunk cursor, which resets every element).
    pub current_position_words: u16,
    pub remaining_words: u16,
    pub set_end: bool,

    pub error_code: Option<u16>,
    pub priority: u8,
    /// §4.B concurrency contract: set while an internally-issued operation
    /// (e.g. the attribute read `ReadName` performs before the bulk list
    /// read) is in progress.
    pub internal_req_pending: bool,
    pub cancel_act_trans: bool,

    /// Set by `read_data(0, is_list)` when the caller has not supplied a
    /// length: an internal `ReadAttribute` runs first and, once valid, this
    /// queued `ReadData` is started with the length it discovered (§4.B
    /// "The macro engine decides whether to first execute an attribute
    /// read... based on whether the caller has supplied length and
    /// isList").
    queued_op: Option<MacroOp>,

    /// Set by fan-out callers (`crate::phase::fanout`) that want `Open`
    /// immediately followed by a read or write on the same macro request,
    /// preserving the at-most-one-active-transaction contract across both
    /// steps.
    pub pending_chain: Option<ChainedOp>,

    attribute: Option<AttributeWord>,
    result: Vec<u16>,
}

/// An operation queued to start as soon as the current one reaches
/// `DataValid`/`AttributeValid` (see `pending_chain`).
#[derive(Debug, Clone)]
pub enum ChainedOp {
    WriteData { payload: Vec<u16>, is_list: bool },
    ReadData { length_words: u16, is_list: bool },
}

impl SvcMacroRequest {
    pub fn new(slave: SlaveIdx) -> Self {
        Self {
            slave,
            idn: Idn::s(0),
            state: MacroState::StartRequest,
            op: None,
            atomic: None,
            current_position_words: 0,
            remaining_words: 0,
            set_end: false,
            error_code: None,
            priority: 0,
            internal_req_pending: false,
            cancel_act_trans: false,
            queued_op: None,
            pending_chain: None,
            attribute: None,
            result: Vec::new(),
        }
    }

    /// §4.B `Open(idn)`: binds the logical session for subsequent element
    /// access and writes element 1.
    pub fn open(&mut self, idn: Idn) -> Result<(), MasterError> {
        self.begin(MacroOp::Open(idn))
    }

    pub fn read_attribute(&mut self) -> Result<(), MasterError> {
        self.begin(MacroOp::ReadAttribute)
    }

    pub fn read_name(&mut self) -> Result<(), MasterError> {
        self.begin(MacroOp::ReadName)
    }

    pub fn read_unit(&mut self) -> Result<(), MasterError> {
        self.begin(MacroOp::ReadUnit)
    }

    pub fn read_min(&mut self) -> Result<(), MasterError> {
        self.begin(MacroOp::ReadMin)
    }

    pub fn read_max(&mut self) -> Result<(), MasterError> {
        self.begin(MacroOp::ReadMax)
    }

    /// §4.B `ReadData()`. If `length_words` is `0`, the engine first
    /// performs an internal `ReadAttribute` to discover length/list-ness,
    /// matching "the macro engine decides whether to first execute an
    /// attribute read ... based on whether the caller has supplied length
    /// and isList".
    pub fn read_data(&mut self, length_words: u16, is_list: bool) -> Result<(), MasterError> {
        if length_words == 0 {
            self.queued_op = Some(MacroOp::ReadData {
                is_list,
                length_words: 0,
            });
            self.internal_req_pending = true;
            self.begin(MacroOp::ReadAttribute)
        } else {
            self.begin(MacroOp::ReadData {
                is_list,
                length_words,
            })
        }
    }

    pub fn write_data(&mut self, payload: Vec<u16>, is_list: bool) -> Result<(), MasterError> {
        self.begin(MacroOp::WriteData { payload, is_list })
    }

    pub fn set_command(&mut self) -> Result<(), MasterError> {
        self.begin(MacroOp::SetCommand)
    }

    pub fn clear_command(&mut self) -> Result<(), MasterError> {
        self.begin(MacroOp::ClearCommand)
    }

    pub fn read_cmd_status(&mut self) -> Result<(), MasterError> {
        self.begin(MacroOp::ReadCmdStatus)
    }

    pub fn get_list_length(&mut self) -> Result<(), MasterError> {
        self.begin(MacroOp::GetListLength)
    }

    /// §4.B `ResetSVCH()`: force-cancels a stuck transaction.
    pub fn reset_svch(&mut self) {
        self.atomic = None;
        self.op = None;
        self.state = MacroState::StartRequest;
        self.error_code = None;
        self.internal_req_pending = false;
        self.cancel_act_trans = false;
    }

    pub fn result_words(&self) -> &[u16] {
        &self.result
    }

    pub fn attribute(&self) -> Option<AttributeWord> {
        self.attribute
    }

    fn begin(&mut self, op: MacroOp) -> Result<(), MasterError> {
        if matches!(
            self.state,
            MacroState::RequestInProgress | MacroState::CmdActive
        ) && self.internal_req_pending
        {
            // §4.B concurrency contract: a competing external caller must
            // observe the transaction is in use rather than clobber it.
            return Err(MasterError::ProtocolError { slave: self.slave });
        }
        self.op = Some(op);
        self.state = MacroState::StartRequest;
        self.atomic = None;
        self.result.clear();
        self.error_code = None;
        Ok(())
    }

    /// Advance the bound macro operation by one cycle.
    pub fn advance(
        &mut self,
        container: &mut SvcContainer,
        bus: &mut dyn IpCoreBus,
    ) -> Progress<MacroState> {
        if self.cancel_act_trans {
            self.reset_svch();
            return Progress::Canceled;
        }

        let Some(op) = self.op.clone() else {
            return Progress::Done(self.state);
        };

        match self.state {
            MacroState::StartRequest => self.start(container, bus, &op),
            MacroState::RequestInProgress => self.poll(container, bus, &op),
            terminal => Progress::Done(terminal),
        }
    }

    fn start(
        &mut self,
        container: &mut SvcContainer,
        bus: &mut dyn IpCoreBus,
        op: &MacroOp,
    ) -> Progress<MacroState> {
        let (element, atomic_op, payload) = match op {
            MacroOp::Open(idn) => {
                self.idn = *idn;
                (Element::Idn, AtomicOp::Write, vec![
                    (idn.to_u32() & 0xFFFF) as u16,
                    (idn.to_u32() >> 16) as u16,
                ])
            }
            MacroOp::ReadAttribute => (Element::Attribute, AtomicOp::Read, vec![0u16; 2]),
            MacroOp::ReadName => (Element::Name, AtomicOp::Read, vec![0u16; SC_WRBUF_LENGTH]),
            MacroOp::ReadUnit => (Element::Unit, AtomicOp::Read, vec![0u16; SC_WRBUF_LENGTH]),
            MacroOp::ReadMin => (Element::Min, AtomicOp::Read, vec![0u16; 4]),
            MacroOp::ReadMax => (Element::Max, AtomicOp::Read, vec![0u16; 4]),
            MacroOp::ReadData {
                is_list,
                length_words,
            } => {
                let len = if *is_list {
                    *length_words + 2
                } else {
                    (*length_words).max(1)
                };
                (Element::Data, AtomicOp::Read, vec![0u16; len as usize])
            }
            MacroOp::WriteData { payload, .. } => (Element::Data, AtomicOp::Write, payload.clone()),
            MacroOp::SetCommand => (Element::Data, AtomicOp::Write, vec![0x0007]),
            MacroOp::ClearCommand => (Element::Data, AtomicOp::Write, vec![0x0000]),
            MacroOp::ReadCmdStatus => (Element::Data, AtomicOp::Read, vec![0u16; 1]),
            MacroOp::GetListLength => (Element::Data, AtomicOp::Read, vec![0u16; 2]),
        };

        let mut atomic = AtomicRequest::new(self.slave, self.idn, element, atomic_op, payload);
        let outcome = atomic.advance(container, bus);
        self.atomic = Some(atomic);
        self.state = MacroState::RequestInProgress;
        self.apply_atomic_outcome(outcome, op)
    }

    fn poll(
        &mut self,
        container: &mut SvcContainer,
        bus: &mut dyn IpCoreBus,
        op: &MacroOp,
    ) -> Progress<MacroState> {
        let Some(mut atomic) = self.atomic.take() else {
            self.state = MacroState::RequestError;
            return Progress::Failed(MasterError::IllegalCase);
        };
        let outcome = atomic.advance(container, bus);
        self.atomic = Some(atomic);
        self.apply_atomic_outcome(outcome, op)
    }

    fn apply_atomic_outcome(
        &mut self,
        outcome: Progress<AtomicDone>,
        op: &MacroOp,
    ) -> Progress<MacroState> {
        match outcome {
            Progress::InProgress(t) => Progress::InProgress(t),
            Progress::Canceled => {
                self.reset_svch();
                Progress::Canceled
            }
            Progress::Failed(e) => {
                self.state = MacroState::RequestError;
                if let MasterError::SvcErrorMessage { code, .. } = e {
                    self.error_code = Some(code);
                }
                Progress::Failed(e)
            }
            Progress::Done(done) => {
                let atomic = self.atomic.take();
                if let Some(atomic) = atomic {
                    self.result = atomic.payload;
                }
                self.state = self.finish_state(op);
                self.current_position_words = done.words_transferred;
                self.set_end = true;

                if matches!(op, MacroOp::ReadAttribute) {
                    if let Some(MacroOp::ReadData { is_list, .. }) = self.queued_op.take() {
                        let discovered_words = self
                            .attribute
                            .map(|a| (a.fixed_length_bytes() as u16 + 1) / 2)
                            .unwrap_or(1);
                        self.internal_req_pending = false;
                        let _ = self.begin(MacroOp::ReadData {
                            is_list,
                            length_words: discovered_words,
                        });
                        return Progress::InProgress(0);
                    }
                }

                if matches!(op, MacroOp::Open(_)) {
                    if let Some(chained) = self.pending_chain.take() {
                        match chained {
                            ChainedOp::WriteData { payload, is_list } => {
                                let _ = self.begin(MacroOp::WriteData { payload, is_list });
                            }
                            ChainedOp::ReadData {
                                length_words,
                                is_list,
                            } => {
                                let _ = self.read_data(length_words, is_list);
                            }
                        }
                        return Progress::InProgress(0);
                    }
                }

                Progress::Done(self.state)
            }
        }
    }

    fn finish_state(&mut self, op: &MacroOp) -> MacroState {
        match op {
            MacroOp::ReadAttribute => {
                if self.result.len() >= 2 {
                    let word = (self.result[0] as u32) | ((self.result[1] as u32) << 16);
                    self.attribute = Some(AttributeWord::from_wire(word));
                }
                MacroState::AttributeValid
            }
            MacroOp::SetCommand => MacroState::CmdActive,
            MacroOp::ClearCommand => MacroState::CmdCleared,
            MacroOp::ReadCmdStatus => MacroState::CmdStatusValid,
            _ => MacroState::DataValid,
        }
    }

    /// Status word read by `ReadCmdStatus`, decoded once `DataValid`.
    pub fn command_status(&self) -> Option<CommandStatus> {
        self.result.first().map(|w| CommandStatus::from_word(*w))
    }

    /// Current/max length header prepended by `GetListLength` /
    /// `ReadName`/`ReadUnit` (§4.B).
    pub fn list_length_header(&self) -> Option<(u16, u16)> {
        if self.result.len() >= 2 {
            Some((self.result[0], self.result[1]))
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::svc_container::SvcContainerLayout;
    use sercos_hal::idn::well_known;

    struct FakeBus {
        status: u16,
    }
    impl IpCoreBus for FakeBus {
        fn read_short(&self, _offset: u16) -> Result<u16, sercos_hal::error::BusError> {
            Ok(self.status)
        }
        fn write_short(&mut self, _offset: u16, _value: u16) -> Result<(), sercos_hal::error::BusError> {
            Ok(())
        }
        fn read_block(&self, _offset: u16, buf: &mut [u16]) -> Result<(), sercos_hal::error::BusError> {
            buf.fill(0);
            Ok(())
        }
        fn write_block(&mut self, _offset: u16, _data: &[u16]) -> Result<(), sercos_hal::error::BusError> {
            Ok(())
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
    fn open_then_read_attribute_reaches_attribute_valid() {
        use tock_registers::interfaces::Writeable;
        let mut container = SvcContainer::new(layout());
        container
            .control
            .write(sercos_hal::words::SvcControl::M_BUSY::SET);
        let mut bus = FakeBus { status: 0 };

        let mut req = SvcMacroRequest::new(SlaveIdx::new(0));
        req.open(well_known::S_0_1000).unwrap();
        let outcome = req.advance(&mut container, &mut bus);
        assert!(matches!(outcome, Progress::Done(MacroState::DataValid)));

        req.read_attribute().unwrap();
        container
            .control
            .write(sercos_hal::words::SvcControl::M_BUSY::SET);
        let outcome = req.advance(&mut container, &mut bus);
        assert!(matches!(outcome, Progress::Done(MacroState::AttributeValid)));
    }

    #[test]
    fn reset_svch_returns_to_start_request() {
        let mut req = SvcMacroRequest::new(SlaveIdx::new(0));
        req.state = MacroState::RequestError;
        req.reset_svch();
        assert_eq!(req.state, MacroState::StartRequest);
    }

    #[test]
    fn command_status_decodes_running_and_finished_codes() {
        assert_eq!(CommandStatus::from_word(0x7), CommandStatus::Running);
        assert_eq!(CommandStatus::from_word(0x3), CommandStatus::Finished);
        assert_eq!(CommandStatus::from_word(0xF), CommandStatus::Error);
    }
}
