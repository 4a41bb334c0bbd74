//! The procedure-command combinator (§9 Design Notes, §4.C step 5, §4.E
//! condensed push): every procedure command (`S-0-0127`, `S-0-0128`,
//! `S-0-1024`, the Hot-Plug "activate network settings" command) follows
//! the same Clear→Set→PollStatus→Clear sequence; this factors it once.

use sercos_hal::bus::interface::IpCoreBus;
use sercos_hal::idn::Idn;

use crate::error::MasterError;
use crate::model::slave::SlaveIdx;
use crate::model::svc_container::SvcContainer;
use crate::progress::Progress;
use crate::svc::macro_engine::{CommandStatus, MacroState, SvcMacroRequest};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Step {
    OpenAndClear,
    AwaitClear,
    Set,
    AwaitSet,
    Poll,
    AwaitPoll,
    FinalClear,
    AwaitFinalClear,
}

/// Drives one procedure-command IDN through Clear→Set→Poll→Clear on one
/// slave.
pub struct ProcedureCommand {
    slave: SlaveIdx,
    idn: Idn,
    step: Step,
    request: SvcMacroRequest,
    poll_budget: u32,
}

impl ProcedureCommand {
    pub fn new(slave: SlaveIdx, idn: Idn) -> Self {
        Self {
            slave,
            idn,
            step: Step::OpenAndClear,
            request: SvcMacroRequest::new(slave),
            poll_budget: DEFAULT_POLL_BUDGET,
        }
    }

    /// The procedure-command IDN this instance drives — e.g. `S-0-1024`,
    /// `S-0-0127`, `S-0-0128` — so a fan-out driver can record a failure
    /// against the right IDN instead of a fixed placeholder.
    pub fn idn(&self) -> Idn {
        self.idn
    }

    pub fn advance(
        &mut self,
        container: &mut SvcContainer,
        bus: &mut dyn IpCoreBus,
    ) -> Progress<()> {
        loop {
            match self.step {
                Step::OpenAndClear => {
                    let _ = self.request.open(self.idn);
                    let _ = self.request.clear_command();
                    self.step = Step::AwaitClear;
                }
                Step::AwaitClear => match self.request.advance(container, bus) {
                    Progress::Done(_) => {
                        self.step = Step::Set;
                        continue;
                    }
                    other => return other.map(|_| ()),
                },
                Step::Set => {
                    let _ = self.request.set_command();
                    self.step = Step::AwaitSet;
                }
                Step::AwaitSet => match self.request.advance(container, bus) {
                    Progress::Done(_) => {
                        self.step = Step::Poll;
                        continue;
                    }
                    other => return other.map(|_| ()),
                },
                Step::Poll => {
                    let _ = self.request.read_cmd_status();
                    self.step = Step::AwaitPoll;
                }
                Step::AwaitPoll => match self.request.advance(container, bus) {
                    Progress::Done(MacroState::DataValid) => {
                        match self.request.command_status() {
                            Some(CommandStatus::Finished) => {
                                self.step = Step::FinalClear;
                                continue;
                            }
                            Some(CommandStatus::Error) => {
                                self.step = Step::FinalClear;
                                return Progress::Failed(MasterError::S00CmdError {
                                    slave: self.slave,
                                    idn: self.idn,
                                });
                            }
                            _ => {
                                self.poll_budget = self.poll_budget.saturating_sub(1);
                                if self.poll_budget == 0 {
                                    return Progress::Failed(MasterError::S00CmdTimeoutError {
                                        slave: self.slave,
                                        idn: self.idn,
                                    });
                                }
                                self.step = Step::Poll;
                                return Progress::InProgress(0);
                            }
                        }
                    }
                    Progress::Done(_) => {
                        self.step = Step::Poll;
                        return Progress::InProgress(0);
                    }
                    other => return other.map(|_| ()),
                },
                Step::FinalClear => {
                    let _ = self.request.clear_command();
                    self.step = Step::AwaitFinalClear;
                }
                Step::AwaitFinalClear => match self.request.advance(container, bus) {
                    Progress::Done(_) => return Progress::Done(()),
                    other => return other.map(|_| ()),
                },
            }
        }
    }
}

const DEFAULT_POLL_BUDGET: u32 = 2000;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::svc_container::SvcContainerLayout;
    use sercos_hal::idn::well_known;

    struct FakeBus;
    impl IpCoreBus for FakeBus {
        fn read_short(&self, _offset: u16) -> Result<u16, sercos_hal::error::BusError> {
            Ok(0)
        }
        fn write_short(&mut self, _offset: u16, _value: u16) -> Result<(), sercos_hal::error::BusError> {
            Ok(())
        }
        fn read_block(&self, _offset: u16, buf: &mut [u16]) -> Result<(), sercos_hal::error::BusError> {
            // Pretend the command is immediately "finished" (status 0x3).
            buf.fill(0x3);
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
    fn finished_status_drives_combinator_to_completion() {
        use tock_registers::interfaces::Writeable;
        let mut container = SvcContainer::new(layout());
        container
            .control
            .write(sercos_hal::words::SvcControl::M_BUSY::SET);
        let mut bus = FakeBus;
        let mut cmd = ProcedureCommand::new(SlaveIdx::new(0), well_known::S_0_1024);

        let mut guard = 0;
        let result = loop {
            guard += 1;
            assert!(guard < 1000, "combinator did not converge");
            container
                .control
                .write(sercos_hal::words::SvcControl::M_BUSY::SET);
            match cmd.advance(&mut container, &mut bus) {
                Progress::InProgress(_) => continue,
                other => break other,
            }
        };
        assert_eq!(result, Progress::Done(()));
    }
}
