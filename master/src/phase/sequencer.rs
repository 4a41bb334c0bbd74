//! The Phase Sequencer (§4.C): carries every projected slave through
//! CP0→CP4 by issuing coordinated batches of SVC writes/reads and
//! commands. Each of the four named entry points (`CheckVersion`,
//! `GetTimingData`, `TransmitTiming`, `ReadConfig`, §6 API surface) is an
//! outer FSM whose every step fans out across the fleet via
//! [`crate::phase::fanout::FanoutBatch`]/[`crate::phase::fanout::ProcedureFanout`]
//! and completes only when every participating slave has converged (§4.C).

use sercos_hal::bus::interface::{IpCoreBus, RingDelayProbe};
use sercos_hal::idn::{well_known, Idn};
use sercos_hal::telegram::SvcOffsets;

use crate::diagnostics::ExtendedDiagnostic;
use crate::error::MasterError;
use crate::instance::Instance;
use crate::model::scp::ClassMask;
use crate::model::slave::SlaveIdx;
use crate::model::timing::MAX_MTU_BYTES;
use crate::phase::fanout::{FanoutBatch, ProcedureFanout, SlaveAction};
use crate::phase::scp;
use crate::progress::Progress;

/// CP0..CP4 (GLOSSARY): CP0 = topology discovery, CP4 = full cyclic
/// operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommunicationPhase {
    Cp0,
    Cp1,
    Cp2,
    Cp3,
    Cp4,
}

impl CommunicationPhase {
    pub fn next(self) -> Option<Self> {
        match self {
            CommunicationPhase::Cp0 => Some(CommunicationPhase::Cp1),
            CommunicationPhase::Cp1 => Some(CommunicationPhase::Cp2),
            CommunicationPhase::Cp2 => Some(CommunicationPhase::Cp3),
            CommunicationPhase::Cp3 => Some(CommunicationPhase::Cp4),
            CommunicationPhase::Cp4 => None,
        }
    }
}

/// The Phase Sequencer owns at most one in-flight transition at a time; the
/// caller drives whichever entry point matches `instance.phase` once per
/// cycle until it returns `Progress::Done`.
#[derive(Default)]
pub struct PhaseSequencer {
    check_version: Option<CheckVersionTransition>,
    timing_data: Option<GetTimingDataTransition>,
    transmit_timing: Option<TransmitTimingTransition>,
    read_config: Option<ReadConfigTransition>,
}

impl PhaseSequencer {
    pub fn new() -> Self {
        Self::default()
    }

    /// §6 `CheckVersion`: CP0→CP1. Reads `S-0-1000`/`S-0-1000.0.1` off every
    /// slave and runs the SCP Class Reasoner (§4.D) over the result.
    pub fn check_version(
        &mut self,
        instance: &mut Instance,
        bus: &mut dyn IpCoreBus,
    ) -> Progress<()> {
        if instance.phase != CommunicationPhase::Cp0 {
            return Progress::Failed(MasterError::WrongPhase);
        }
        let transition = self
            .check_version
            .get_or_insert_with(|| CheckVersionTransition::new(instance));
        match transition.advance(instance, bus) {
            Progress::Done(()) => {
                self.check_version = None;
                instance.phase = CommunicationPhase::Cp1;
                Progress::Done(())
            }
            other => other,
        }
    }

    /// §6 `GetTimingData`: CP1→CP2. Measures ring delay and derives the
    /// dependent timing fields (§9.B ring-delay supplement).
    pub fn get_timing_data(
        &mut self,
        instance: &mut Instance,
        probe: &mut dyn RingDelayProbe,
    ) -> Progress<()> {
        if instance.phase != CommunicationPhase::Cp1 {
            return Progress::Failed(MasterError::WrongPhase);
        }
        let transition = self
            .timing_data
            .get_or_insert_with(GetTimingDataTransition::new);
        match transition.advance(instance, probe) {
            Progress::Done(()) => {
                self.timing_data = None;
                instance.phase = CommunicationPhase::Cp2;
                Progress::Done(())
            }
            other => other,
        }
    }

    /// §6 `TransmitTiming`: CP2→CP3. The seven outer steps of §4.C.
    pub fn transmit_timing(
        &mut self,
        instance: &mut Instance,
        bus: &mut dyn IpCoreBus,
    ) -> Progress<()> {
        if instance.phase != CommunicationPhase::Cp2 {
            return Progress::Failed(MasterError::WrongPhase);
        }
        let transition = self
            .transmit_timing
            .get_or_insert_with(TransmitTimingTransition::new);
        match transition.advance(instance, bus) {
            Progress::Done(()) => {
                self.transmit_timing = None;
                instance.phase = CommunicationPhase::Cp3;
                Progress::Done(())
            }
            other => other,
        }
    }

    /// §6 `ReadConfig`: CP3→CP4. Verifies `S-0-1051` connection limits and
    /// waits for `S-DEV.Slave_valid` on every active slave.
    pub fn read_config(
        &mut self,
        instance: &mut Instance,
        bus: &mut dyn IpCoreBus,
    ) -> Progress<()> {
        if instance.phase != CommunicationPhase::Cp3 {
            return Progress::Failed(MasterError::WrongPhase);
        }
        let transition = self
            .read_config
            .get_or_insert_with(ReadConfigTransition::new);
        match transition.advance(instance, bus) {
            Progress::Done(()) => {
                self.read_config = None;
                instance.phase = CommunicationPhase::Cp4;
                Progress::Done(())
            }
            other => other,
        }
    }
}

/// Runs a [`FanoutBatch`] to completion against `instance`'s slaves/SVC
/// containers, recording per-slave faults into `instance.diagnostics` and
/// returning the first error only once the whole batch has converged (§4.C
/// "Fairness and error accumulation", §7 "Propagation").
pub(crate) fn drive_fanout(
    batch: &mut FanoutBatch,
    instance: &mut Instance,
    bus: &mut dyn IpCoreBus,
) -> Progress<Vec<(SlaveIdx, Vec<u16>)>> {
    let mut diag = ExtendedDiagnostic::new();
    let outcome = batch.advance(&mut instance.svc_containers, bus, &mut diag);
    for fault in diag.faults() {
        instance
            .diagnostics
            .record(fault.slave, fault.error, fault.idn);
    }
    match outcome {
        Progress::Done(()) => Progress::Done(
            batch
                .read_results()
                .into_iter()
                .map(|(slave, words)| (slave, words.to_vec()))
                .collect(),
        ),
        Progress::InProgress(t) => Progress::InProgress(t),
        Progress::Canceled => Progress::Canceled,
        Progress::Failed(e) => Progress::Failed(e),
    }
}

// ---------------------------------------------------------------------
// CheckVersion (§4.D)
// ---------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CheckVersionStep {
    ReadSupportedClasses,
    ProbeActiveClassSelection,
    WriteBackActiveClasses,
    ProbeInterFrameGap,
    Done,
}

struct CheckVersionTransition {
    step: CheckVersionStep,
    batch: Option<FanoutBatch>,
}

impl CheckVersionTransition {
    fn new(instance: &Instance) -> Self {
        let actions = instance
            .slave_indices()
            .map(|slave| {
                (
                    slave,
                    SlaveAction::ReadData {
                        idn: well_known::S_0_1000,
                        length_words: scp::MAX_SCP_CLASS_ENTRIES as u16,
                        is_list: true,
                    },
                )
            })
            .collect();
        Self {
            step: CheckVersionStep::ReadSupportedClasses,
            batch: Some(FanoutBatch::new(actions)),
        }
    }

    fn advance(&mut self, instance: &mut Instance, bus: &mut dyn IpCoreBus) -> Progress<()> {
        loop {
            let batch = self.batch.as_mut().expect("step always holds a batch");
            let results = match drive_fanout(batch, instance, bus) {
                Progress::InProgress(t) => return Progress::InProgress(t),
                Progress::Canceled => return Progress::Canceled,
                Progress::Failed(e) => return Progress::Failed(e),
                Progress::Done(results) => results,
            };

            match self.step {
                CheckVersionStep::ReadSupportedClasses => {
                    // §4.D steps 1-2: adopt each slave's S-0-1000 list from
                    // the words its ReadData action just brought back.
                    for (slave, words) in results {
                        if let Err(e) =
                            scp::adopt_supported_classes(instance.slave_mut(slave), &words)
                        {
                            instance
                                .diagnostics
                                .record(slave, e, well_known::S_0_1000);
                        }
                    }
                    self.step = CheckVersionStep::ProbeActiveClassSelection;
                    let actions = instance
                        .slave_indices()
                        .map(|slave| {
                            (
                                slave,
                                SlaveAction::ReadData {
                                    idn: well_known::S_0_1000_0_1,
                                    length_words: 4,
                                    is_list: false,
                                },
                            )
                        })
                        .collect();
                    self.batch = Some(FanoutBatch::new(actions));
                    continue;
                }
                CheckVersionStep::ProbeActiveClassSelection => {
                    // §4.D step 3: "not there" is informational, not a hard
                    // failure; only slaves whose attribute read *succeeded*
                    // (i.e. appear among this step's read results) support
                    // the writeback.
                    let succeeded: std::collections::HashSet<usize> =
                        results.iter().map(|(slave, _)| slave.get()).collect();
                    for slave in instance.slave_indices().collect::<Vec<_>>() {
                        let supports = succeeded.contains(&slave.get());
                        instance.slave_mut(slave).supports_active_class_selection = supports;
                        if let Err(e) = scp::reconcile(instance.slave_mut(slave)) {
                            instance
                                .diagnostics
                                .record(slave, e, well_known::S_0_1000);
                        }
                        scp::note_active_class_writeback(instance.slave(slave));
                    }

                    self.step = CheckVersionStep::WriteBackActiveClasses;
                    let actions = instance
                        .slave_indices()
                        .map(|slave| {
                            let s = instance.slave(slave);
                            if s.supports_active_class_selection && !s.active_classes.is_empty() {
                                let payload = s
                                    .active_classes
                                    .iter()
                                    .map(|scv| scv.to_wire())
                                    .collect();
                                (
                                    slave,
                                    SlaveAction::WriteData {
                                        idn: well_known::S_0_1000_0_1,
                                        payload,
                                        is_list: true,
                                    },
                                )
                            } else {
                                (slave, SlaveAction::Skip)
                            }
                        })
                        .collect();
                    self.batch = Some(FanoutBatch::new(actions));
                    continue;
                }
                CheckVersionStep::WriteBackActiveClasses => {
                    // §4.D step 9: probe S-0-1036 ("Inter Frame Gap") on
                    // every SCP_Sync slave; a read failure is informational
                    // (downgrades the flag) rather than a hard error, same
                    // treatment as step 3's S-0-1000.0.1 probe.
                    self.step = CheckVersionStep::ProbeInterFrameGap;
                    let actions = instance
                        .slave_indices()
                        .map(|slave| {
                            if instance
                                .slave(slave)
                                .class_mask
                                .contains(ClassMask::SYNC)
                            {
                                (
                                    slave,
                                    SlaveAction::ReadData {
                                        idn: well_known::S_0_1036,
                                        length_words: 1,
                                        is_list: false,
                                    },
                                )
                            } else {
                                (slave, SlaveAction::Skip)
                            }
                        })
                        .collect();
                    self.batch = Some(FanoutBatch::new(actions));
                    continue;
                }
                CheckVersionStep::ProbeInterFrameGap => {
                    let probed: std::collections::HashSet<usize> =
                        results.iter().map(|(slave, _)| slave.get()).collect();
                    for slave in instance.slave_indices().collect::<Vec<_>>() {
                        let probe_found_it = probed.contains(&slave.get());
                        let supported = scp::slave_supports_inter_frame_gap(
                            instance.slave(slave),
                            probe_found_it,
                        );
                        instance.slave_mut(slave).inter_frame_gap_supported = supported;
                    }
                    self.step = CheckVersionStep::Done;
                    return Progress::Done(());
                }
                CheckVersionStep::Done => return Progress::Done(()),
            }
        }
    }
}

// ---------------------------------------------------------------------
// GetTimingData (§4.C step 3 source, §9.B ring-delay supplement)
// ---------------------------------------------------------------------

struct GetTimingDataTransition {
    measured: bool,
}

impl GetTimingDataTransition {
    fn new() -> Self {
        Self { measured: false }
    }

    fn advance(&mut self, instance: &mut Instance, probe: &mut dyn RingDelayProbe) -> Progress<()> {
        if !self.measured {
            if let Err(e) = crate::timing::measure_ring_delay(&mut instance.timing, probe) {
                return Progress::Failed(e);
            }
            self.measured = true;
        }
        Progress::Done(())
    }
}

// ---------------------------------------------------------------------
// TransmitTiming (§4.C, the seven outer steps)
// ---------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TransmitStep {
    Step1CommBasic,
    Step2VarCfgConnectionNumber,
    Step3SyncAt0Start,
    Step4ProducerCycleTime,
    Step5Nrt,
    Step6Rtb,
    Step7ReadBackMtu,
    Step7CheckMtu,
    Done,
}

struct TransmitTimingTransition {
    step: TransmitStep,
    batch: Option<FanoutBatch>,
    procedure: Option<ProcedureFanout>,
    procedure_slaves: Vec<SlaveIdx>,
}

impl TransmitTimingTransition {
    fn new() -> Self {
        Self {
            step: TransmitStep::Step1CommBasic,
            batch: None,
            procedure: None,
            procedure_slaves: Vec::new(),
        }
    }

    fn advance(&mut self, instance: &mut Instance, bus: &mut dyn IpCoreBus) -> Progress<()> {
        loop {
            if let Some(batch) = self.batch.as_mut() {
                match drive_fanout(batch, instance, bus) {
                    Progress::InProgress(t) => return Progress::InProgress(t),
                    Progress::Canceled => return Progress::Canceled,
                    Progress::Failed(e) => return Progress::Failed(e),
                    Progress::Done(results) => {
                        self.batch = None;
                        if self.step == TransmitStep::Step7CheckMtu {
                            // §4.C step 7: compare the `S-0-1061` readback
                            // against what was requested. A mismatch
                            // against a request for the platform maximum is
                            // only a warning; a mismatch against a tighter,
                            // explicitly-requested value is a hard error.
                            let requested = instance.timing.requested_mtu_bytes;
                            for (slave, words) in results {
                                let Some(&effective) = words.first() else {
                                    continue;
                                };
                                if effective != requested {
                                    if requested == MAX_MTU_BYTES {
                                        instance.diagnostics.record(
                                            slave,
                                            MasterError::InvalidMtu { slave },
                                            well_known::S_0_1061,
                                        );
                                    } else {
                                        return Progress::Failed(MasterError::InvalidMtu {
                                            slave,
                                        });
                                    }
                                }
                            }
                            self.step = TransmitStep::Done;
                        }
                    }
                }
            }
            if let Some(proc_batch) = self.procedure.as_mut() {
                let mut diag = ExtendedDiagnostic::new();
                match proc_batch.advance(
                    &mut instance.svc_containers,
                    &self.procedure_slaves,
                    bus,
                    &mut diag,
                ) {
                    Progress::InProgress(t) => return Progress::InProgress(t),
                    Progress::Canceled => return Progress::Canceled,
                    Progress::Failed(e) => return Progress::Failed(e),
                    Progress::Done(()) => {
                        for fault in diag.faults() {
                            instance
                                .diagnostics
                                .record(fault.slave, fault.error, fault.idn);
                        }
                        self.procedure = None;
                    }
                }
            }

            match self.step {
                TransmitStep::Step1CommBasic => {
                    // §4.C step 1: communication parameters for every
                    // SCP_Basic slave (present regardless of basic family):
                    // tScyc's SVC offsets in MDT/AT (S-0-1013/S-0-1014),
                    // negotiated here and latched onto the slave so later
                    // cycles address the right container.
                    for slave in instance.slave_indices().collect::<Vec<_>>() {
                        let offsets = SvcOffsets {
                            mdt_offset: slave.get() as u16 * SVC_CONTAINER_STRIDE_WORDS,
                            at_offset: slave.get() as u16 * SVC_CONTAINER_STRIDE_WORDS,
                        };
                        instance.set_svc_offsets(slave, offsets);
                    }
                    let actions = instance
                        .slave_indices()
                        .map(|slave| {
                            let offsets = instance.slave(slave).svc;
                            (
                                slave,
                                SlaveAction::WriteData {
                                    idn: well_known::S_0_1013,
                                    payload: vec![offsets.mdt_offset],
                                    is_list: false,
                                },
                            )
                        })
                        .collect();
                    self.batch = Some(FanoutBatch::new(actions));
                    self.step = TransmitStep::Step2VarCfgConnectionNumber;
                }
                TransmitStep::Step2VarCfgConnectionNumber => {
                    // §4.C step 2: connection number per connection, for
                    // SCP_VarCFG slaves only.
                    let actions = instance
                        .slave_indices()
                        .map(|slave| {
                            if instance.slave(slave).class_mask.contains(ClassMask::VAR_CFG) {
                                let conn_numbers: Vec<u16> = instance
                                    .slave(slave)
                                    .connection_indices
                                    .iter()
                                    .map(|&ci| instance.connections[ci].connection_number)
                                    .collect();
                                (
                                    slave,
                                    SlaveAction::WriteData {
                                        idn: well_known::s_0_1050(0, 2),
                                        payload: conn_numbers,
                                        is_list: true,
                                    },
                                )
                            } else {
                                (slave, SlaveAction::Skip)
                            }
                        })
                        .collect();
                    self.batch = Some(FanoutBatch::new(actions));
                    self.step = TransmitStep::Step3SyncAt0Start;
                }
                TransmitStep::Step3SyncAt0Start => {
                    // §4.C step 3: AT0 start time for SCP_Sync/SCP_Cyc;
                    // SCP_Sync additionally gets tSync/t3/comm-control/ring
                    // delay/jitter.
                    let t1 = instance.timing.t1_ns;
                    let actions = instance
                        .slave_indices()
                        .map(|slave| {
                            let mask = instance.slave(slave).class_mask;
                            if mask.intersects(ClassMask::SYNC | ClassMask::CYC) {
                                (
                                    slave,
                                    SlaveAction::WriteData {
                                        idn: well_known::S_0_1006,
                                        payload: vec![(t1 & 0xFFFF) as u16, (t1 >> 16) as u16],
                                        is_list: false,
                                    },
                                )
                            } else {
                                (slave, SlaveAction::Skip)
                            }
                        })
                        .collect();
                    self.batch = Some(FanoutBatch::new(actions));
                    self.step = TransmitStep::Step4ProducerCycleTime;
                }
                TransmitStep::Step4ProducerCycleTime => {
                    // §4.C step 4: producer cycle time for
                    // SCP_Sync/SCP_WD/SCP_WDCon slaves, inter-frame gap for
                    // SCP_Sync.
                    let inter_frame_gap = instance.timing.inter_frame_gap_ns;
                    let actions = instance
                        .slave_indices()
                        .map(|slave| {
                            let mask = instance.slave(slave).class_mask;
                            if mask.intersects(ClassMask::SYNC | ClassMask::WD | ClassMask::WD_CON)
                            {
                                (
                                    slave,
                                    SlaveAction::WriteData {
                                        idn: well_known::S_0_1036,
                                        payload: vec![(inter_frame_gap & 0xFFFF) as u16],
                                        is_list: false,
                                    },
                                )
                            } else {
                                (slave, SlaveAction::Skip)
                            }
                        })
                        .collect();
                    self.batch = Some(FanoutBatch::new(actions));
                    self.step = TransmitStep::Step5Nrt;
                }
                TransmitStep::Step5Nrt => {
                    // §4.C step 5: UC transmission window for
                    // SCP_NRT/SCP_NRTPC; SCP_NRTPC only also runs "activate
                    // network settings" as a procedure command.
                    let uc_begin = instance.timing.uc_begin_ns;
                    let actions = instance
                        .slave_indices()
                        .map(|slave| {
                            let mask = instance.slave(slave).class_mask;
                            if mask.intersects(ClassMask::NRT | ClassMask::NRT_PC) {
                                (
                                    slave,
                                    SlaveAction::WriteData {
                                        idn: well_known::S_0_1032,
                                        payload: vec![(uc_begin & 0xFFFF) as u16],
                                        is_list: false,
                                    },
                                )
                            } else {
                                (slave, SlaveAction::Skip)
                            }
                        })
                        .collect();
                    self.batch = Some(FanoutBatch::new(actions));

                    self.procedure_slaves = instance.slave_indices().collect();
                    let targets = self
                        .procedure_slaves
                        .iter()
                        .map(|&slave| {
                            let idn = if instance
                                .slave(slave)
                                .class_mask
                                .contains(ClassMask::NRT_PC)
                            {
                                Some(activate_network_settings_idn())
                            } else {
                                None
                            };
                            (slave, idn)
                        })
                        .collect();
                    self.procedure = Some(ProcedureFanout::new(targets));
                    self.step = TransmitStep::Step6Rtb;
                }
                TransmitStep::Step6Rtb => {
                    // §4.C step 6: real-time-bit IDN/bit allocation for
                    // SCP_RTB slaves.
                    let actions = instance
                        .slave_indices()
                        .map(|slave| {
                            if instance.slave(slave).class_mask.contains(ClassMask::RTB) {
                                let rtb: Vec<u16> = instance
                                    .slave(slave)
                                    .connection_indices
                                    .iter()
                                    .flat_map(|&ci| {
                                        instance.connections[ci]
                                            .real_time_bit_allocation
                                            .iter()
                                            .map(|idn| (idn.to_u32() & 0xFFFF) as u16)
                                    })
                                    .collect();
                                (
                                    slave,
                                    SlaveAction::WriteData {
                                        idn: well_known::s_0_1060_7(0),
                                        payload: rtb,
                                        is_list: true,
                                    },
                                )
                            } else {
                                (slave, SlaveAction::Skip)
                            }
                        })
                        .collect();
                    self.batch = Some(FanoutBatch::new(actions));
                    self.step = TransmitStep::Step7ReadBackMtu;
                }
                TransmitStep::Step7ReadBackMtu => {
                    // §4.C step 7: read back effective MTU for
                    // SCP_NRT/SCP_NRTPC; the readback is checked against
                    // `instance.timing.requested_mtu_bytes` once this batch
                    // completes (`Step7CheckMtu`, above).
                    let actions = instance
                        .slave_indices()
                        .map(|slave| {
                            let mask = instance.slave(slave).class_mask;
                            if mask.intersects(ClassMask::NRT | ClassMask::NRT_PC) {
                                (
                                    slave,
                                    SlaveAction::ReadData {
                                        idn: well_known::S_0_1061,
                                        length_words: 1,
                                        is_list: false,
                                    },
                                )
                            } else {
                                (slave, SlaveAction::Skip)
                            }
                        })
                        .collect();
                    self.batch = Some(FanoutBatch::new(actions));
                    self.step = TransmitStep::Step7CheckMtu;
                }
                // The MTU readback batch is checked and cleared by the
                // generic batch-completion branch above, which also
                // advances `self.step` to `Done` once it's satisfied; the
                // loop never re-enters the match with `Step7CheckMtu`
                // still set and `self.batch` empty.
                TransmitStep::Step7CheckMtu => unreachable!(),
                TransmitStep::Done => return Progress::Done(()),
            }
        }
    }
}

/// `S-0-1024` reused as the "activate network settings" procedure command
/// (§4.C step 5): the combinator factors Clear→Set→Poll→Clear once, and the
/// same IDN constant is also the `S-0-1024` step of the Hot-Plug condensed
/// push (§4.E) — the original C duplicates the sequence per call site, this
/// rewrite shares both the combinator and the constant.
pub(crate) fn activate_network_settings_idn() -> Idn {
    well_known::S_0_1024
}

// ---------------------------------------------------------------------
// ReadConfig (CP3→CP4)
// ---------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ReadConfigStep {
    ReadConnectionLimit,
    AwaitSlaveValid,
    Done,
}

struct ReadConfigTransition {
    step: ReadConfigStep,
    batch: Option<FanoutBatch>,
    wait_budget: u32,
}

impl ReadConfigTransition {
    fn new() -> Self {
        Self {
            step: ReadConfigStep::ReadConnectionLimit,
            batch: None,
            wait_budget: DEFAULT_SLAVE_VALID_WAIT_CYCLES,
        }
    }

    fn advance(&mut self, instance: &mut Instance, bus: &mut dyn IpCoreBus) -> Progress<()> {
        loop {
            if let Some(batch) = self.batch.as_mut() {
                match drive_fanout(batch, instance, bus) {
                    Progress::InProgress(t) => return Progress::InProgress(t),
                    Progress::Canceled => return Progress::Canceled,
                    Progress::Failed(e) => return Progress::Failed(e),
                    Progress::Done(_) => self.batch = None,
                }
            }

            match self.step {
                ReadConfigStep::ReadConnectionLimit => {
                    let actions = instance
                        .slave_indices()
                        .map(|slave| {
                            (
                                slave,
                                SlaveAction::ReadData {
                                    idn: well_known::S_0_1051,
                                    length_words: 2,
                                    is_list: false,
                                },
                            )
                        })
                        .collect();
                    self.batch = Some(FanoutBatch::new(actions));
                    self.step = ReadConfigStep::AwaitSlaveValid;
                }
                ReadConfigStep::AwaitSlaveValid => {
                    instance.refresh_slave_validity();
                    let all_valid = instance
                        .slaves
                        .iter()
                        .all(|s| matches!(s.activity, crate::model::slave::Activity::Active));
                    if all_valid {
                        self.step = ReadConfigStep::Done;
                        continue;
                    }
                    self.wait_budget = self.wait_budget.saturating_sub(1);
                    if self.wait_budget == 0 {
                        return Progress::Failed(MasterError::SystemError {
                            detail: "not all slaves reported S-DEV.Slave_valid within budget",
                        });
                    }
                    return Progress::InProgress(0);
                }
                ReadConfigStep::Done => return Progress::Done(()),
            }
        }
    }
}

const DEFAULT_SLAVE_VALID_WAIT_CYCLES: u32 = 5000;

/// Words reserved per slave's SVC container in the shared frame RAM for the
/// purpose of deriving a default, non-overlapping `S-0-1013`/`S-0-1014`
/// offset per slave (§4.C step 1). The IP-core's actual frame-RAM layout
/// (out of scope, §1) may pack containers differently; this is the value
/// the master itself negotiates and writes back to each slave.
pub(crate) const SVC_CONTAINER_STRIDE_WORDS: u16 = 32;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{HotPlugConfig, MasterConfig, MasterKindConfig, SlaveConfig};
    use crate::model::scp::{ScpClass, ScpClassVersion};
    use sercos_hal::error::BusError;
    use sercos_hal::telegram::Port;

    struct FakeBus;
    impl IpCoreBus for FakeBus {
        fn read_short(&self, _offset: u16) -> Result<u16, BusError> {
            Ok(0)
        }
        fn write_short(&mut self, _offset: u16, _value: u16) -> Result<(), BusError> {
            Ok(())
        }
        fn read_block(&self, _offset: u16, buf: &mut [u16]) -> Result<(), BusError> {
            buf.fill(0);
            Ok(())
        }
        fn write_block(&mut self, _offset: u16, _data: &[u16]) -> Result<(), BusError> {
            Ok(())
        }
    }

    struct FakeRingDelay;
    impl RingDelayProbe for FakeRingDelay {
        fn measure_round_trip(&mut self, _port: Port) -> Result<u32, BusError> {
            Ok(100)
        }
    }

    fn test_instance(n: usize) -> Instance {
        Instance::new(MasterConfig {
            slaves: (0..n)
                .map(|i| SlaveConfig {
                    address: i as u16 + 1,
                    active_classes: Vec::new(),
                })
                .collect(),
            t_scyc_ns: 1_000_000,
            master_kind: MasterKindConfig::Hard,
            hotplug: HotPlugConfig::default(),
            max_scp_class_entries: 16,
        })
    }

    fn set_m_busy(instance: &mut Instance) {
        use tock_registers::interfaces::Writeable;
        for c in &mut instance.svc_containers {
            c.control.write(sercos_hal::words::SvcControl::M_BUSY::SET);
        }
    }

    #[test]
    fn communication_phase_progresses_linearly() {
        assert_eq!(CommunicationPhase::Cp0.next(), Some(CommunicationPhase::Cp1));
        assert_eq!(CommunicationPhase::Cp4.next(), None);
    }

    #[test]
    fn check_version_rejects_wrong_phase() {
        let mut instance = test_instance(1);
        instance.phase = CommunicationPhase::Cp4;
        let mut seq = PhaseSequencer::new();
        let mut bus = FakeBus;
        assert!(matches!(
            seq.check_version(&mut instance, &mut bus),
            Progress::Failed(MasterError::WrongPhase)
        ));
    }

    #[test]
    fn get_timing_data_measures_ring_delay_and_advances_phase() {
        let mut instance = test_instance(2);
        instance.phase = CommunicationPhase::Cp1;
        let mut seq = PhaseSequencer::new();
        let mut probe = FakeRingDelay;
        let outcome = seq.get_timing_data(&mut instance, &mut probe);
        assert_eq!(outcome, Progress::Done(()));
        assert_eq!(instance.phase, CommunicationPhase::Cp2);
        assert_eq!(instance.timing.ring_delay(Port::P), 100);
    }

    #[test]
    fn check_version_eventually_completes_and_advances_to_cp1() {
        let mut instance = test_instance(2);
        set_m_busy(&mut instance);
        let mut seq = PhaseSequencer::new();
        let mut bus = FakeBus;

        let mut guard = 0;
        loop {
            guard += 1;
            assert!(guard < 10_000, "check_version did not converge");
            set_m_busy(&mut instance);
            match seq.check_version(&mut instance, &mut bus) {
                Progress::InProgress(_) => continue,
                Progress::Done(()) => break,
                other => panic!("unexpected outcome: {other:?}"),
            }
        }
        assert_eq!(instance.phase, CommunicationPhase::Cp1);
    }

    /// Every read this bus answers carries `S-0-1000`'s wire encoding for
    /// `SCP_Sync v1` (§4.D), so every slave's `S-0-1000` list (and its
    /// `S-0-1036` probe) reports the same class — enough to drive
    /// `class_mask` to contain `ClassMask::SYNC` without a full SVC
    /// container simulation.
    struct FakeSyncBus;
    impl IpCoreBus for FakeSyncBus {
        fn read_short(&self, _offset: u16) -> Result<u16, BusError> {
            Ok(0)
        }
        fn write_short(&mut self, _offset: u16, _value: u16) -> Result<(), BusError> {
            Ok(())
        }
        fn read_block(&self, _offset: u16, buf: &mut [u16]) -> Result<(), BusError> {
            buf.fill(ScpClassVersion::new(ScpClass::Sync, 1).to_wire());
            Ok(())
        }
        fn write_block(&mut self, _offset: u16, _data: &[u16]) -> Result<(), BusError> {
            Ok(())
        }
    }

    #[test]
    fn check_version_probes_inter_frame_gap_for_sync_slaves() {
        let mut instance = test_instance(1);
        let mut seq = PhaseSequencer::new();
        let mut bus = FakeSyncBus;

        let mut guard = 0;
        loop {
            guard += 1;
            assert!(guard < 10_000, "check_version did not converge");
            set_m_busy(&mut instance);
            match seq.check_version(&mut instance, &mut bus) {
                Progress::InProgress(_) => continue,
                Progress::Done(()) => break,
                other => panic!("unexpected outcome: {other:?}"),
            }
        }
        let slave = instance.slave(SlaveIdx::new(0));
        assert!(slave.class_mask.contains(ClassMask::SYNC));
        assert!(slave.inter_frame_gap_supported);
    }
}
