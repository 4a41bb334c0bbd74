//! Shape of the telegrams exchanged on the wire each Sercos cycle.
//!
//! A cycle produces one MST, up to four MDTs and up to four ATs per port
//! (§6). This module models only the parts the master reasons about
//! directly: per-telegram length/offset bookkeeping, the HP side-channel
//! carried in MDT0, and the per-slave SVC field locations within MDT/AT.
//! Byte-level (de)serialisation of the rest of the cyclic data (real-time
//! bit lists, connection payloads) is the IP-core's job, reached through
//! [`crate::bus`].

use crate::words;

/// Sercos defines four telegram slots per direction, numbered 0..3.
pub const NUM_TELEGRAMS: usize = 4;

/// One slave's SVC container location inside the shared MDT/AT frame RAM,
/// i.e. the live values of S-0-1013 (MDT) / S-0-1014 (AT).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SvcOffsets {
    pub mdt_offset: u16,
    pub at_offset: u16,
}

/// Per-telegram-number length configuration, one entry per `0..NUM_TELEGRAMS`.
pub type TelegramLengths = [u16; NUM_TELEGRAMS];

/// Logical port identifier. Sercos III rings have exactly two physical
/// ports per node; "P" feeds forward, "S" feeds backward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Port {
    P,
    S,
}

impl Port {
    pub const fn other(self) -> Self {
        match self {
            Port::P => Port::S,
            Port::S => Port::P,
        }
    }
}

/// A Sercos address: 1..=511 on the wire; 0 and values above 511 are
/// reserved/illegal. `NOT_EXIST` (used by the HP1 scan to signal "no more
/// slaves") is kept separate rather than folded into this type.
pub type SercosAddress = u16;

/// HP1 scan sentinel meaning "no further slave answered at this Slave_idx".
pub const HP_ADDRESS_NOT_EXIST: SercosAddress = 0xFFFF;

/// The broadcast selector used by HP0 parameter broadcast (every attached,
/// not-yet-addressed slave accepts it).
pub const HP_SELECTION_BROADCAST: u16 = 0xFFFF;

/// `MDT0.HP.Selection` is either a scan cursor (`Slave_idx`, used during HP1
/// slave scan before an address is known) or a Sercos address (once a slave
/// has identified itself, or during HP0 broadcast/HP1 dispatch).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HpSelection {
    SlaveIndex(u16),
    Address(SercosAddress),
    Broadcast,
}

impl HpSelection {
    pub const fn encode(self) -> u16 {
        match self {
            HpSelection::SlaveIndex(idx) => idx,
            HpSelection::Address(addr) => addr,
            HpSelection::Broadcast => HP_SELECTION_BROADCAST,
        }
    }
}

/// The HP field carried at a fixed offset inside MDT0 (master→slave) and
/// mirrored in AT0 (slave→master), per §6.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct HpField {
    pub control: u16,
    pub selection: u16,
    pub info: u32,
}

impl HpField {
    pub fn control_reg(&self) -> words::Word<words::HpControl::Register> {
        use tock_registers::interfaces::Writeable;
        let reg = words::Word::new(0);
        reg.set(self.control);
        reg
    }
}

/// HP0 parameter rotation codes carried in `HpControl::CODE`, transmitted in
/// this fixed order, each repeated for a configurable repeat count (§4.E).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum Hp0ParameterCode {
    TScyc = 0,
    MdtLengths = 1,
    AtLengths = 2,
    UcT6 = 3,
    UcT7 = 4,
    RequestedMtu = 5,
    CommunicationVersion = 6,
}

impl Hp0ParameterCode {
    /// Fixed transmission order of the HP0 rotation.
    pub const ROTATION: [Hp0ParameterCode; 7] = [
        Hp0ParameterCode::TScyc,
        Hp0ParameterCode::MdtLengths,
        Hp0ParameterCode::AtLengths,
        Hp0ParameterCode::UcT6,
        Hp0ParameterCode::UcT7,
        Hp0ParameterCode::RequestedMtu,
        Hp0ParameterCode::CommunicationVersion,
    ];
}

/// HP1 per-slave parameter dispatch codes (§4.E).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Hp1ParameterCode {
    SvcOffsetMdt = 0,
    SvcOffsetAt = 1,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn port_other_is_an_involution() {
        assert_eq!(Port::P.other(), Port::S);
        assert_eq!(Port::S.other().other(), Port::S);
    }

    #[test]
    fn hp_selection_encodes_broadcast_as_all_ones() {
        assert_eq!(HpSelection::Broadcast.encode(), HP_SELECTION_BROADCAST);
    }

    #[test]
    fn hp0_rotation_is_seven_entries_starting_with_tscyc() {
        assert_eq!(Hp0ParameterCode::ROTATION.len(), 7);
        assert_eq!(Hp0ParameterCode::ROTATION[0], Hp0ParameterCode::TScyc);
    }
}
