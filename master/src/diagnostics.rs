//! Extended-diagnostic aggregation (§7 "Propagation") and the fleet summary
//! report supplemented from `CSMD_DIAG.c` (§9.B) — the *data collection*
//! half of diagnostics; rendering is the caller's job (`bin/sercos-probe`).

use sercos_hal::idn::Idn;
use sercos_hal::words::{CDev, SDev};

use crate::error::MasterError;
use crate::model::scp::ClassMask;
use crate::model::slave::{Activity, SlaveIdx};

/// One recorded per-slave failure during a batch operation.
#[derive(Debug, Clone, Copy)]
pub struct SlaveFault {
    pub slave: SlaveIdx,
    pub error: MasterError,
    pub idn: Idn,
}

/// `(count, [(slave_idx, code, idn)...])` (§3 `Invariants`, §7
/// "Propagation"): per-slave errors accumulate here and never abort the
/// batch; the caller sees the first entry only after the whole batch
/// finishes.
#[derive(Debug, Clone, Default)]
pub struct ExtendedDiagnostic {
    faults: Vec<SlaveFault>,
}

impl ExtendedDiagnostic {
    pub fn new() -> Self {
        Self { faults: Vec::new() }
    }

    pub fn record(&mut self, slave: SlaveIdx, error: MasterError, idn: Idn) {
        tracing::warn!(slave_idx = slave.get(), idn = %idn, error = %error, "slave reported a fault");
        self.faults.push(SlaveFault { slave, error, idn });
    }

    pub fn count(&self) -> usize {
        self.faults.len()
    }

    pub fn is_empty(&self) -> bool {
        self.faults.is_empty()
    }

    pub fn faults(&self) -> &[SlaveFault] {
        &self.faults
    }

    /// §7 "A returning failure means at least one slave failed and the
    /// extended diagnostic holds the detail": the first recorded fault,
    /// surfaced to the caller once the batch completes.
    pub fn first_error(&self) -> Option<MasterError> {
        self.faults.first().map(|f| f.error)
    }

    pub fn clear(&mut self) {
        self.faults.clear();
    }

    /// §6 `GetCommCounter`'s counterpart on the error side: how many faults
    /// are currently recorded against one slave.
    pub fn error_count(&self, slave: SlaveIdx) -> usize {
        self.faults.iter().filter(|f| f.slave == slave).count()
    }

    /// §6 `ResetSercosErrorCounter`: drop every fault recorded against one
    /// slave, leaving the rest of the fleet's history untouched.
    pub fn reset_error_counter(&mut self, slave: SlaveIdx) {
        self.faults.retain(|f| f.slave != slave);
    }
}

/// One row of the fleet summary supplemented from `CSMD_DIAG.c` (§9.B):
/// address, active phase (as a plain label, since the phase enum lives in
/// `crate::phase`), class mask, last error.
#[derive(Debug, Clone)]
pub struct SlaveDiagnosticRow {
    pub slave: SlaveIdx,
    pub address: u16,
    pub activity: Activity,
    pub class_mask: ClassMask,
    pub last_error: Option<MasterError>,
}

/// Fleet-wide diagnostic snapshot, consumed by `sercos-probe`.
#[derive(Debug, Clone, Default)]
pub struct FleetReport {
    pub rows: Vec<SlaveDiagnosticRow>,
}

impl FleetReport {
    pub fn new() -> Self {
        Self { rows: Vec::new() }
    }

    /// Builds a snapshot row per projected slave, pairing each with the most
    /// recent fault `diagnostics` recorded against it, if any. Consumed by
    /// `sercos-probe` to render the fleet table.
    pub fn collect(instance: &crate::instance::Instance) -> Self {
        let rows = instance
            .slaves
            .iter()
            .enumerate()
            .map(|(index, slave)| {
                let slave_idx = SlaveIdx::new(index);
                let last_error = instance
                    .diagnostics
                    .faults()
                    .iter()
                    .rev()
                    .find(|f| f.slave == slave_idx)
                    .map(|f| f.error);
                SlaveDiagnosticRow {
                    slave: slave_idx,
                    address: slave.address,
                    activity: slave.activity,
                    class_mask: slave.class_mask,
                    last_error,
                }
            })
            .collect();
        Self { rows }
    }
}

/// One slave's `C-DEV.Topology` request against its reported
/// `S-DEV.Topology_status` (§6 `GetTopology`). `None` means the word held an
/// out-of-range value (should not happen — the field is 2 bits wide and
/// every combination is a named variant — but `read_as_enum` is fallible).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlaveTopology {
    pub slave: SlaveIdx,
    pub requested: Option<CDev::TOPOLOGY::Value>,
    pub reported: Option<SDev::TOPOLOGY_STATUS::Value>,
}

/// §6 `GetTopology`: the requested/reported topology of every projected
/// slave, read off the in-memory `C-DEV`/`S-DEV` shadow words.
pub fn get_topology(instance: &crate::instance::Instance) -> Vec<SlaveTopology> {
    use tock_registers::interfaces::Readable;
    instance
        .slaves
        .iter()
        .enumerate()
        .map(|(index, slave)| SlaveTopology {
            slave: SlaveIdx::new(index),
            requested: slave.dev_control.read_as_enum(CDev::TOPOLOGY),
            reported: slave.dev_status.read_as_enum(SDev::TOPOLOGY_STATUS),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use sercos_hal::idn::well_known;

    #[test]
    fn first_error_is_the_first_recorded_fault_not_the_last() {
        let mut diag = ExtendedDiagnostic::new();
        diag.record(
            SlaveIdx::new(0),
            MasterError::BusyTimeout {
                slave: SlaveIdx::new(0),
            },
            well_known::S_0_1000,
        );
        diag.record(
            SlaveIdx::new(1),
            MasterError::WrongPhase,
            well_known::S_0_1000,
        );
        assert_eq!(diag.count(), 2);
        assert!(matches!(
            diag.first_error(),
            Some(MasterError::BusyTimeout { .. })
        ));
    }

    #[test]
    fn collect_pairs_each_slave_with_its_most_recent_fault() {
        use crate::config::{HotPlugConfig, MasterConfig, MasterKindConfig, SlaveConfig};
        use crate::instance::Instance;

        let mut instance = Instance::new(MasterConfig {
            slaves: (0..2)
                .map(|i| SlaveConfig {
                    address: i as u16 + 1,
                    active_classes: Vec::new(),
                })
                .collect(),
            t_scyc_ns: 1_000_000,
            master_kind: MasterKindConfig::Hard,
            hotplug: HotPlugConfig::default(),
            max_scp_class_entries: 16,
        });
        instance.diagnostics.record(
            SlaveIdx::new(1),
            MasterError::WrongPhase,
            well_known::S_0_1000,
        );

        let report = FleetReport::collect(&instance);
        assert_eq!(report.rows.len(), 2);
        assert!(report.rows[0].last_error.is_none());
        assert!(matches!(report.rows[1].last_error, Some(MasterError::WrongPhase)));
    }

    #[test]
    fn get_topology_defaults_to_fast_forward_both_ways() {
        use crate::config::{HotPlugConfig, MasterConfig, MasterKindConfig, SlaveConfig};
        use crate::instance::Instance;

        let instance = Instance::new(MasterConfig {
            slaves: vec![SlaveConfig {
                address: 1,
                active_classes: Vec::new(),
            }],
            t_scyc_ns: 1_000_000,
            master_kind: MasterKindConfig::Hard,
            hotplug: HotPlugConfig::default(),
            max_scp_class_entries: 16,
        });

        let topology = get_topology(&instance);
        assert_eq!(topology.len(), 1);
        assert_eq!(
            topology[0].requested,
            Some(CDev::TOPOLOGY::Value::FastForwardBoth)
        );
        assert_eq!(
            topology[0].reported,
            Some(SDev::TOPOLOGY_STATUS::Value::FastForwardBoth)
        );
    }

    #[test]
    fn error_count_and_reset_are_scoped_per_slave() {
        let mut diag = ExtendedDiagnostic::new();
        diag.record(SlaveIdx::new(0), MasterError::WrongPhase, well_known::S_0_1000);
        diag.record(SlaveIdx::new(0), MasterError::WrongPhase, well_known::S_0_1000);
        diag.record(SlaveIdx::new(1), MasterError::WrongPhase, well_known::S_0_1000);
        assert_eq!(diag.error_count(SlaveIdx::new(0)), 2);

        diag.reset_error_counter(SlaveIdx::new(0));
        assert_eq!(diag.error_count(SlaveIdx::new(0)), 0);
        assert_eq!(diag.error_count(SlaveIdx::new(1)), 1);
    }
}
