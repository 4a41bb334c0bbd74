//! [`Instance`] (§3): the single owning aggregate that parks every
//! sub-state — the projected fleet, connections, SVC containers, timing
//! singleton, phase FSM and Hot-Plug context (§9 "Global mutable state": "Do
//! not use process-wide state").

use sercos_hal::telegram::SvcOffsets;

use crate::config::MasterConfig;
use crate::diagnostics::ExtendedDiagnostic;
use crate::model::connection::Connection;
use crate::model::hotplug_context::HotPlugContext;
use crate::model::scp::ScpClassVersion;
use crate::model::slave::{ProjectedSlave, SlaveIdx};
use crate::model::svc_container::{SvcContainer, SvcContainerLayout, SC_WRBUF_LENGTH};
use crate::model::timing::ConfigurationTiming;
use crate::phase::sequencer::CommunicationPhase;

/// Word span reserved per slave's default SVC container placement: control
/// + status + write buffer + read buffer, rounded up for headroom.
const SVC_CONTAINER_WORD_SPAN: u16 = 2 + 2 * SC_WRBUF_LENGTH as u16;

/// Everything a running Sercos III master owns, addressed by the index
/// newtypes defined alongside each model type (§9 "Pointer-heavy graphs").
pub struct Instance {
    pub slaves: Vec<ProjectedSlave>,
    pub connections: Vec<Connection>,
    pub svc_containers: Vec<SvcContainer>,
    pub timing: ConfigurationTiming,
    pub phase: CommunicationPhase,
    pub hotplug: Option<HotPlugContext>,
    pub diagnostics: ExtendedDiagnostic,
    pub config: MasterConfig,
}

impl Instance {
    /// Builds the fleet from `config`, one [`ProjectedSlave`]/[`SvcContainer`]
    /// per configured slave, all `Inactive`, in `CP0`. No wire I/O happens
    /// here (§6 "Persisted state: none" — everything is reinitialised at
    /// start-up, in memory).
    pub fn new(config: MasterConfig) -> Self {
        let master_kind = config.master_kind.into();
        let mut timing = ConfigurationTiming::new(master_kind);
        timing.t_scyc_ns = config.t_scyc_ns;

        let mut slaves = Vec::with_capacity(config.slaves.len());
        let mut svc_containers = Vec::with_capacity(config.slaves.len());
        for (index, slave_cfg) in config.slaves.iter().enumerate() {
            let mut slave = ProjectedSlave::new(index, slave_cfg.address);
            slave.active_classes = slave_cfg
                .active_classes
                .iter()
                .filter_map(|c| c.to_scp_class_version())
                .collect::<Vec<ScpClassVersion>>();
            slaves.push(slave);

            // Not-yet-negotiated SVC container placement: each slave gets a
            // non-overlapping slot below its own `S-0-1013`/`S-0-1014`
            // placement so CP0/CP1 fan-out (§4.D) can address every slave's
            // channel independently before the Phase Sequencer's
            // `TransmitTiming` step renegotiates `ProjectedSlave::svc`
            // (§4.C step 1).
            let base = index as u16 * SVC_CONTAINER_WORD_SPAN;
            svc_containers.push(SvcContainer::new(SvcContainerLayout {
                control_word_offset: base,
                status_word_offset: base + 1,
                write_buffer_offset: base + 2,
                read_buffer_offset: base + 2 + SC_WRBUF_LENGTH as u16,
            }));
        }

        tracing::info!(slave_count = slaves.len(), "sercos master instance created");

        Self {
            slaves,
            connections: Vec::new(),
            svc_containers,
            timing,
            phase: CommunicationPhase::Cp0,
            hotplug: None,
            diagnostics: ExtendedDiagnostic::new(),
            config,
        }
    }

    pub fn slave(&self, idx: SlaveIdx) -> &ProjectedSlave {
        &self.slaves[idx.get()]
    }

    pub fn slave_mut(&mut self, idx: SlaveIdx) -> &mut ProjectedSlave {
        &mut self.slaves[idx.get()]
    }

    pub fn slave_indices(&self) -> impl Iterator<Item = SlaveIdx> + '_ {
        (0..self.slaves.len()).map(SlaveIdx::new)
    }

    /// §3 invariant: a slave is `activity=Active` iff `S-DEV.Slave_valid` has
    /// been observed in the current phase entry. Called once per cycle by
    /// the caller after the bus has been polled for the latest `S-DEV`
    /// words (out of scope here — the hardware boundary, §1).
    pub fn refresh_slave_validity(&mut self) {
        for slave in &mut self.slaves {
            slave.observes_slave_valid();
        }
    }

    pub fn active_slave_count(&self) -> usize {
        self.slaves
            .iter()
            .filter(|s| matches!(s.activity, crate::model::slave::Activity::Active))
            .count()
    }

    /// Records a newly negotiated SVC container placement for `slave`
    /// (`S-0-1013`/`S-0-1014`, §4.C step 1 / §4.E HP1 parameter dispatch).
    pub fn set_svc_offsets(&mut self, slave: SlaveIdx, offsets: SvcOffsets) {
        self.slave_mut(slave).svc = offsets;
    }

    /// §9 Design Notes "Hot-Plug concurrency with phase progression":
    /// Hot-Plug operations require proof of `Phase == CP4`, encoded
    /// statically here rather than merely checked ad hoc at each call site.
    pub fn require_cp4(&self) -> Result<(), crate::error::MasterError> {
        if self.phase == CommunicationPhase::Cp4 {
            Ok(())
        } else {
            Err(crate::error::MasterError::WrongPhase)
        }
    }

    /// §6 `IdentifySlave`: raise or lower `C-DEV.Identification` for one
    /// projected slave.
    pub fn identify_slave(&mut self, slave: SlaveIdx, on: bool) {
        self.slave_mut(slave).set_identification(on);
    }

    /// §6 `GetTopology`: requested/reported topology of every projected
    /// slave.
    pub fn get_topology(&self) -> Vec<crate::diagnostics::SlaveTopology> {
        crate::diagnostics::get_topology(self)
    }

    /// §6 `GetCommCounter`: cycles this slave has been observed
    /// `Slave_valid` since instance creation (or the last phase restart).
    pub fn get_comm_counter(&self, slave: SlaveIdx) -> u32 {
        self.slave(slave).comm_cycle_count
    }

    /// §6 `ResetSercosErrorCounter`: drop the fault history recorded
    /// against one slave.
    pub fn reset_sercos_error_counter(&mut self, slave: SlaveIdx) {
        self.diagnostics.reset_error_counter(slave);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{HotPlugConfig, MasterConfig, MasterKindConfig, SlaveConfig};

    fn test_config(n: usize) -> MasterConfig {
        MasterConfig {
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
        }
    }

    #[test]
    fn new_instance_starts_in_cp0_with_all_slaves_inactive() {
        let instance = Instance::new(test_config(4));
        assert_eq!(instance.phase, CommunicationPhase::Cp0);
        assert_eq!(instance.slaves.len(), 4);
        assert_eq!(instance.svc_containers.len(), 4);
        assert_eq!(instance.active_slave_count(), 0);
    }

    #[test]
    fn require_cp4_fails_outside_cp4() {
        let instance = Instance::new(test_config(1));
        assert!(instance.require_cp4().is_err());
    }

    #[test]
    fn identify_slave_sets_and_clears_the_cdev_bit() {
        let mut instance = Instance::new(test_config(1));
        let slave = SlaveIdx::new(0);
        assert!(!instance.slave(slave).is_identification_requested());
        instance.identify_slave(slave, true);
        assert!(instance.slave(slave).is_identification_requested());
        instance.identify_slave(slave, false);
        assert!(!instance.slave(slave).is_identification_requested());
    }

    #[test]
    fn comm_counter_tracks_cycles_observed_slave_valid() {
        use sercos_hal::words::SDev;
        use tock_registers::interfaces::Writeable;

        let mut instance = Instance::new(test_config(1));
        let slave = SlaveIdx::new(0);
        assert_eq!(instance.get_comm_counter(slave), 0);

        instance.slave_mut(slave).dev_status.write(SDev::SLAVE_VALID::SET);
        instance.refresh_slave_validity();
        instance.refresh_slave_validity();
        assert_eq!(instance.get_comm_counter(slave), 2);
    }

    #[test]
    fn reset_sercos_error_counter_drops_only_that_slaves_faults() {
        use sercos_hal::idn::well_known;
        use crate::error::MasterError;

        let mut instance = Instance::new(test_config(2));
        let a = SlaveIdx::new(0);
        let b = SlaveIdx::new(1);
        instance.diagnostics.record(a, MasterError::WrongPhase, well_known::S_0_1000);
        instance.diagnostics.record(b, MasterError::WrongPhase, well_known::S_0_1000);

        instance.reset_sercos_error_counter(a);
        assert_eq!(instance.diagnostics.error_count(a), 0);
        assert_eq!(instance.diagnostics.error_count(b), 1);
    }
}
