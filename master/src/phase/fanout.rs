//! The fan-out driver underlying every Phase Sequencer outer step (§4.C
//! "Why this shape"): each projected slave gets its own
//! [`SvcMacroRequest`], advanced independently; the batch step completes
//! only when every participating slave has reached a terminal state
//! (`DataValid` or `RequestError`), continuing past individual failures
//! (§4.C "Fairness and error accumulation").

use sercos_hal::bus::interface::IpCoreBus;
use sercos_hal::idn::Idn;

use crate::diagnostics::ExtendedDiagnostic;
use crate::model::slave::SlaveIdx;
use crate::model::svc_container::SvcContainer;
use crate::progress::Progress;
use crate::svc::macro_engine::{MacroState, SvcMacroRequest};
use crate::svc::procedure_command::ProcedureCommand;

/// One slave's action for a fan-out batch: either nothing (the slave does
/// not participate in this step, e.g. it lacks the relevant SCP class) or a
/// macro-level read/write bound to an IDN.
pub enum SlaveAction {
    Skip,
    WriteData { idn: Idn, payload: Vec<u16>, is_list: bool },
    ReadData { idn: Idn, length_words: u16, is_list: bool },
}

enum SlotState {
    Skipped,
    Pending(SvcMacroRequest),
    Done(SvcMacroRequest),
    Failed,
}

/// Drives one fan-out step to completion across the fleet.
pub struct FanoutBatch {
    slots: Vec<SlotState>,
}

impl FanoutBatch {
    /// `actions[i]` is slave `i`'s participation in this step.
    pub fn new(actions: Vec<(SlaveIdx, SlaveAction)>) -> Self {
        let slots = actions
            .into_iter()
            .map(|(slave, action)| match action {
                SlaveAction::Skip => SlotState::Skipped,
                SlaveAction::WriteData {
                    idn,
                    payload,
                    is_list,
                } => {
                    let mut req = SvcMacroRequest::new(slave);
                    let _ = req.open(idn);
                    SlotState::Pending(OpenThenWrite::schedule(req, payload, is_list))
                }
                SlaveAction::ReadData {
                    idn,
                    length_words,
                    is_list,
                } => {
                    let mut req = SvcMacroRequest::new(slave);
                    let _ = req.open(idn);
                    SlotState::Pending(OpenThenRead::schedule(req, length_words, is_list))
                }
            })
            .collect();
        Self { slots }
    }

    /// Advance every non-terminal slot by one cycle. Returns `Done(())`
    /// once every slot has reached `Done`/`Failed`/`Skipped`; per-slave
    /// errors are recorded into `diag` rather than aborting the batch.
    pub fn advance(
        &mut self,
        containers: &mut [SvcContainer],
        bus: &mut dyn IpCoreBus,
        diag: &mut ExtendedDiagnostic,
    ) -> Progress<()> {
        let mut any_pending = false;
        for slot in &mut self.slots {
            if let SlotState::Pending(req) = slot {
                let slave = req.slave;
                let container = &mut containers[slave.get()];
                let idn = req.idn;
                match req.advance(container, bus) {
                    Progress::InProgress(_) => any_pending = true,
                    Progress::Failed(e) => {
                        diag.record(slave, e, idn);
                        *slot = SlotState::Failed;
                    }
                    Progress::Done(MacroState::RequestError) => {
                        if let Some(code) = req.error_code {
                            diag.record(
                                slave,
                                crate::error::MasterError::SvcErrorMessage { slave, idn, code },
                                idn,
                            );
                        }
                        *slot = SlotState::Failed;
                    }
                    Progress::Canceled => {
                        *slot = SlotState::Failed;
                    }
                    Progress::Done(_) => {
                        let taken = std::mem::replace(req, SvcMacroRequest::new(slave));
                        *slot = SlotState::Done(taken);
                    }
                }
            }
        }

        if any_pending {
            Progress::InProgress(0)
        } else {
            Progress::Done(())
        }
    }

    pub fn succeeded_slaves(&self) -> Vec<SlaveIdx> {
        self.slots
            .iter()
            .filter_map(|s| match s {
                SlotState::Done(req) => Some(req.slave),
                _ => None,
            })
            .collect()
    }

    /// The words read back by every slave whose `ReadData` action finished
    /// (empty for slaves that were writing, skipped, or failed). Consumed
    /// by callers that need the actual payload, e.g. the SCP Class Reasoner
    /// adopting `S-0-1000` (§4.D steps 1-2).
    pub fn read_results(&self) -> Vec<(SlaveIdx, &[u16])> {
        self.slots
            .iter()
            .filter_map(|s| match s {
                SlotState::Done(req) => Some((req.slave, req.result_words())),
                _ => None,
            })
            .collect()
    }
}

/// Tiny two-phase micro-sequencer: open the IDN, then issue the write.
/// `SvcMacroRequest::open` already starts the atomic write of element 1;
/// once that completes this drives the follow-up `write_data` call on the
/// *same* macro request object so at-most-one-active-transaction (§4.B)
/// holds across both steps.
struct OpenThenWrite;

impl OpenThenWrite {
    fn schedule(req: SvcMacroRequest, payload: Vec<u16>, is_list: bool) -> SvcMacroRequest {
        let mut req = req;
        req.pending_chain = Some(crate::svc::macro_engine::ChainedOp::WriteData { payload, is_list });
        req
    }
}

struct OpenThenRead;

impl OpenThenRead {
    fn schedule(req: SvcMacroRequest, length_words: u16, is_list: bool) -> SvcMacroRequest {
        let mut req = req;
        req.pending_chain = Some(crate::svc::macro_engine::ChainedOp::ReadData {
            length_words,
            is_list,
        });
        req
    }
}

enum ProcedureSlotState {
    Skipped,
    Pending(ProcedureCommand),
    Done,
    Failed,
}

/// Fan-out driver for a batch of procedure commands (§9 Design Notes
/// "Procedure-command pattern", §4.C step 5's "activate network settings",
/// §4.E condensed push's `S-0-1024`/`S-0-0127`/`S-0-0128` sequence): the
/// same fairness/error-accumulation discipline as [`FanoutBatch`], but each
/// slot drives a [`ProcedureCommand`] instead of a bare macro request.
pub struct ProcedureFanout {
    slots: Vec<ProcedureSlotState>,
}

impl ProcedureFanout {
    /// `targets[i] == Some(idn)` means slave `i` runs `idn` as a procedure
    /// command this batch; `None` means the slave is skipped (does not
    /// carry the relevant SCP class).
    pub fn new(targets: Vec<(SlaveIdx, Option<Idn>)>) -> Self {
        let slots = targets
            .into_iter()
            .map(|(slave, idn)| match idn {
                Some(idn) => ProcedureSlotState::Pending(ProcedureCommand::new(slave, idn)),
                None => ProcedureSlotState::Skipped,
            })
            .collect();
        Self { slots }
    }

    pub fn advance(
        &mut self,
        containers: &mut [SvcContainer],
        slaves_by_slot: &[SlaveIdx],
        bus: &mut dyn IpCoreBus,
        diag: &mut ExtendedDiagnostic,
    ) -> Progress<()> {
        let mut any_pending = false;
        for (i, slot) in self.slots.iter_mut().enumerate() {
            if let ProcedureSlotState::Pending(cmd) = slot {
                let slave = slaves_by_slot[i];
                let container = &mut containers[slave.get()];
                match cmd.advance(container, bus) {
                    Progress::InProgress(_) => any_pending = true,
                    Progress::Done(()) => *slot = ProcedureSlotState::Done,
                    Progress::Canceled => *slot = ProcedureSlotState::Failed,
                    Progress::Failed(e) => {
                        let idn = cmd.idn();
                        diag.record(slave, e, idn);
                        *slot = ProcedureSlotState::Failed;
                    }
                }
            }
        }

        if any_pending {
            Progress::InProgress(0)
        } else {
            Progress::Done(())
        }
    }
}
