//! [`ProjectedSlave`] (§3): one entry per configured address, indexed
//! `0..N-1`. Owned exclusively by [`crate::instance::Instance`]; this module
//! defines only the value type and its index newtype.

use sercos_hal::words::{CDev, SDev, Word};

use crate::model::scp::{ClassMask, ScpClassVersion};

/// Index of a [`ProjectedSlave`] within `Instance::slaves`. Replaces the
/// original's bare slave-index integers threaded through every call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SlaveIdx(pub usize);

impl SlaveIdx {
    pub const fn new(index: usize) -> Self {
        Self(index)
    }

    pub const fn get(self) -> usize {
        self.0
    }
}

/// §3 `activity`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Activity {
    Inactive,
    Active,
    HotPlugInProgress,
}

/// One configured Sercos slave, whether or not it has yet appeared on the
/// wire.
#[derive(Debug, Clone)]
pub struct ProjectedSlave {
    /// Sercos wire address, 1..=511.
    pub address: u16,
    /// Configuration position, 0..N-1; identical to this slave's `SlaveIdx`
    /// but carried as plain data for diagnostics/serialisation.
    pub slave_index: usize,

    pub activity: Activity,

    pub supported_classes: Vec<ScpClassVersion>,
    pub active_classes: Vec<ScpClassVersion>,
    pub class_mask: ClassMask,
    /// Whether this slave exposes the writable active-class list,
    /// `S-0-1000.0.1` (§4.D step 3/6).
    pub supports_active_class_selection: bool,

    pub max_connections: u8,
    /// Indices into `Instance::connections` for this slave's connections,
    /// in configuration order.
    pub connection_indices: Vec<usize>,

    /// SVC container location for this slave in the shared frame RAM.
    pub svc: sercos_hal::telegram::SvcOffsets,
    /// Per-connection jitter budget, microseconds.
    pub jitter_us: u32,

    pub dev_control: Word<CDev::Register>,
    pub dev_status: Word<SDev::Register>,

    /// Count of cycles this slave has been observed `Slave_valid` (§6
    /// `GetCommCounter`), incremented by `observes_slave_valid`.
    pub comm_cycle_count: u32,

    /// §4.D step 9: whether this slave supports `S-0-1036` ("Inter Frame
    /// Gap"). Only meaningful for `SCP_Sync` slaves; starts `true` and is
    /// downgraded once `CheckVersion` probes `S-0-1036` and finds it
    /// missing (`crate::phase::scp::slave_supports_inter_frame_gap`).
    pub inter_frame_gap_supported: bool,
}

impl ProjectedSlave {
    pub fn new(slave_index: usize, address: u16) -> Self {
        Self {
            address,
            slave_index,
            activity: Activity::Inactive,
            supported_classes: Vec::new(),
            active_classes: Vec::new(),
            class_mask: ClassMask::empty(),
            supports_active_class_selection: false,
            max_connections: 0,
            connection_indices: Vec::new(),
            svc: sercos_hal::telegram::SvcOffsets::default(),
            jitter_us: 0,
            dev_control: Word::new(0),
            dev_status: Word::new(0),
            comm_cycle_count: 0,
            inter_frame_gap_supported: true,
        }
    }

    /// §3 global invariant: active iff `S-DEV.Slave_valid` has been
    /// observed in the current phase entry.
    pub fn observes_slave_valid(&mut self) {
        use tock_registers::interfaces::Readable;
        if self.dev_status.is_set(SDev::SLAVE_VALID) {
            self.activity = Activity::Active;
            self.comm_cycle_count += 1;
        }
    }

    pub fn is_slave_valid(&self) -> bool {
        use tock_registers::interfaces::Readable;
        self.dev_status.is_set(SDev::SLAVE_VALID)
    }

    pub fn set_master_valid(&mut self, valid: bool) {
        use tock_registers::interfaces::{ReadWriteable, Writeable};
        if valid {
            self.dev_control.modify(CDev::MASTER_VALID::SET);
        } else {
            self.dev_control.modify(CDev::MASTER_VALID::CLEAR);
        }
    }

    /// §6 `IdentifySlave`: raises or lowers `C-DEV.Identification` so the
    /// slave can flag itself (e.g. blink an LED); the hardware-side
    /// response is outside this crate's boundary (§1).
    pub fn set_identification(&mut self, on: bool) {
        use tock_registers::interfaces::ReadWriteable;
        if on {
            self.dev_control.modify(CDev::IDENTIFICATION::SET);
        } else {
            self.dev_control.modify(CDev::IDENTIFICATION::CLEAR);
        }
    }

    pub fn is_identification_requested(&self) -> bool {
        use tock_registers::interfaces::Readable;
        self.dev_control.is_set(CDev::IDENTIFICATION)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_slave_is_inactive_and_has_no_classes() {
        let slave = ProjectedSlave::new(0, 1);
        assert_eq!(slave.activity, Activity::Inactive);
        assert!(slave.supported_classes.is_empty());
    }

    #[test]
    fn observes_slave_valid_flips_activity_once_set() {
        use tock_registers::interfaces::Writeable;
        let mut slave = ProjectedSlave::new(0, 1);
        assert!(!slave.is_slave_valid());
        slave.dev_status.write(SDev::SLAVE_VALID::SET);
        slave.observes_slave_valid();
        assert_eq!(slave.activity, Activity::Active);
    }
}
