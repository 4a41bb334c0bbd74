//! [`ConfigurationTiming`] (§3): the singleton timing configuration inside
//! `Instance`.

use sercos_hal::telegram::{Port, TelegramLengths};

/// Whether this node generates the synchronisation reference (hard master)
/// or derives it from an upstream source (soft master). Fixed at
/// `Instance` construction (§9 Open Questions resolution, see DESIGN.md).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimingMasterKind {
    Hard,
    Soft,
}

/// Standard Ethernet MTU (§4.C step 7, "if requested MTU was max"): the
/// ceiling a plain Ethernet segment permits. A step-7 readback mismatch
/// against this value is a warning; a mismatch against any tighter,
/// explicitly-configured value is a hard error.
pub const MAX_MTU_BYTES: u16 = 1500;

#[derive(Debug, Clone)]
pub struct ConfigurationTiming {
    /// `tScyc`: communication cycle time, nanoseconds.
    pub t_scyc_ns: u32,
    /// AT0 transmission start, `t1`, nanoseconds from cycle start.
    pub t1_ns: u32,
    /// Synchronisation time, `tSync`, nanoseconds.
    pub t_sync_ns: u32,
    /// Command-valid time, `t3`, nanoseconds.
    pub t3_ns: u32,
    /// Measured round-trip ring delay, per port, nanoseconds.
    pub ring_delay_ns: [u32; 2],
    /// Allowed synchronisation jitter, nanoseconds.
    pub sync_jitter_ns: u32,
    pub mdt_lengths: TelegramLengths,
    pub at_lengths: TelegramLengths,
    /// UC (non-real-time) channel window, nanoseconds from cycle start.
    pub uc_begin_ns: u32,
    pub uc_end_ns: u32,
    /// Max TSref counter wraparound (`SCP_Sync_v3`).
    pub max_tsref_counter: u16,
    pub inter_frame_gap_ns: u32,
    pub master_kind: TimingMasterKind,
    /// `S-0-1061` target (§4.C step 5's `RequestedMtu` broadcast, step 7's
    /// readback check). Defaults to [`MAX_MTU_BYTES`] ("request the
    /// platform maximum").
    pub requested_mtu_bytes: u16,
}

impl ConfigurationTiming {
    pub fn new(master_kind: TimingMasterKind) -> Self {
        Self {
            t_scyc_ns: 1_000_000,
            t1_ns: 0,
            t_sync_ns: 0,
            t3_ns: 0,
            ring_delay_ns: [0, 0],
            sync_jitter_ns: 0,
            mdt_lengths: [0; 4],
            at_lengths: [0; 4],
            uc_begin_ns: 0,
            uc_end_ns: 0,
            max_tsref_counter: 0,
            inter_frame_gap_ns: 0,
            master_kind,
            requested_mtu_bytes: MAX_MTU_BYTES,
        }
    }

    pub fn ring_delay(&self, port: Port) -> u32 {
        match port {
            Port::P => self.ring_delay_ns[0],
            Port::S => self.ring_delay_ns[1],
        }
    }

    pub fn set_ring_delay(&mut self, port: Port, value_ns: u32) {
        match port {
            Port::P => self.ring_delay_ns[0] = value_ns,
            Port::S => self.ring_delay_ns[1] = value_ns,
        }
    }

    /// `CommunicationControl`'s soft-master jitter bit (§9 Open Questions):
    /// set only for a statically-configured soft master, never toggled at
    /// runtime.
    pub fn soft_master_jitter_bit(&self) -> bool {
        matches!(self.master_kind, TimingMasterKind::Soft)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn soft_master_jitter_bit_follows_master_kind() {
        assert!(ConfigurationTiming::new(TimingMasterKind::Soft).soft_master_jitter_bit());
        assert!(!ConfigurationTiming::new(TimingMasterKind::Hard).soft_master_jitter_bit());
    }

    #[test]
    fn requested_mtu_defaults_to_max() {
        assert_eq!(
            ConfigurationTiming::new(TimingMasterKind::Hard).requested_mtu_bytes,
            MAX_MTU_BYTES
        );
    }

    #[test]
    fn ring_delay_round_trips_per_port() {
        let mut t = ConfigurationTiming::new(TimingMasterKind::Hard);
        t.set_ring_delay(Port::P, 1234);
        t.set_ring_delay(Port::S, 5678);
        assert_eq!(t.ring_delay(Port::P), 1234);
        assert_eq!(t.ring_delay(Port::S), 5678);
    }
}
