//! Bit layout of the control/status words exchanged every Sercos cycle.
//!
//! Modelled with `tock_registers::register_bitfields!` over plain `u16`
//! values rather than MMIO — there is no physical register behind these,
//! only the shadow copy the master keeps per slave, but the named-bitfield
//! technique is the same one the teacher uses for its mailbox `STATUS`
//! register.

use tock_registers::fields::FieldValue;
use tock_registers::register_bitfields;
use tock_registers::registers::InMemoryRegister;

register_bitfields! [
    u16,

    /// SVC control word (master → slave), first word of the SVC container.
    pub SvcControl [
        /// Bit 14: end of read buffer reached (informational, slave-set mirror).
        INT_END_RDBUF OFFSET(14) NUMBITS(1) [],
        /// Bit 13: end of write buffer reached (informational, slave-set mirror).
        INT_END_WRBUF OFFSET(13) NUMBITS(1) [],
        /// Bit 12: slave reports error (informational, slave-set mirror).
        INT_ERR OFFSET(12) NUMBITS(1) [],
        /// Bit 7: M_BUSY — master may now advance the handshake.
        M_BUSY OFFSET(7) NUMBITS(1) [],
        /// Bit 6: SETEND — this is the last step of the element transfer.
        SETEND OFFSET(6) NUMBITS(1) [],
        /// Bits 5-3: data block element number (1..7).
        ELEMENT OFFSET(3) NUMBITS(3) [],
        /// Bit 2: LASTTRANS — end of element transmission.
        LASTTRANS OFFSET(2) NUMBITS(1) [],
        /// Bit 1: WRITE(1) / READ(0) of SVC INFO.
        WRITE OFFSET(1) NUMBITS(1) [],
        /// Bit 0: MHS — master handshake toggle bit.
        MHS OFFSET(0) NUMBITS(1) []
    ],

    /// SVC status word (slave → master), second word of the SVC container.
    pub SvcStatus [
        /// Bit 3: SVC valid — the slave is processing this SVC.
        VALID OFFSET(3) NUMBITS(1) [],
        /// Bit 2: SVC error — error code available in SVC info.
        ERROR OFFSET(2) NUMBITS(1) [],
        /// Bit 1: busy — step in process, no new step allowed yet.
        BUSY OFFSET(1) NUMBITS(1) [],
        /// Bit 0: AHS — slave handshake toggle bit.
        AHS OFFSET(0) NUMBITS(1) []
    ],

    /// C-DEV, the device control word the master writes every cycle.
    pub CDev [
        /// Bit 15: identification request.
        IDENTIFICATION OFFSET(15) NUMBITS(1) [],
        /// Bit 14: topology handshake toggle.
        TOPOLOGY_HS OFFSET(14) NUMBITS(1) [],
        /// Bits 13-12: requested per-port topology.
        TOPOLOGY OFFSET(12) NUMBITS(2) [
            FastForwardBoth = 0b00,
            LoopbackFwP = 0b01,
            LoopbackFwS = 0b10
        ],
        /// Bit 11: master controls physical topology for this slave.
        CONTROL_PHYSICAL_TOPOLOGY OFFSET(11) NUMBITS(1) [],
        /// Bit 8: master valid.
        MASTER_VALID OFFSET(8) NUMBITS(1) []
    ],

    /// S-DEV, the device status word the slave reports every cycle.
    pub SDev [
        /// Bit 15: slave valid.
        SLAVE_VALID OFFSET(15) NUMBITS(1) [],
        /// Bit 14: topology handshake toggle.
        TOPOLOGY_HS OFFSET(14) NUMBITS(1) [],
        /// Bits 13-12: reported topology status, mirrors C-DEV.TOPOLOGY once applied.
        TOPOLOGY_STATUS OFFSET(12) NUMBITS(2) [
            FastForwardBoth = 0b00,
            LoopbackFwP = 0b01,
            LoopbackFwS = 0b10
        ],
        /// Bits 1-0: inactive-port link status.
        INACTIVE OFFSET(0) NUMBITS(2) [
            NoLink = 0b00,
            LinkNoSercos = 0b01,
            PTelegram = 0b10,
            STelegram = 0b11
        ]
    ],

    /// HP Control field at MDT0.HP.
    pub HpControl [
        SUPPORTED OFFSET(0) NUMBITS(1) [],
        ENABLED OFFSET(1) NUMBITS(1) [],
        SVC_ACTIVE OFFSET(2) NUMBITS(1) [],
        CODE OFFSET(4) NUMBITS(8) []
    ]
];

/// A read/modify/write shadow of a control or status word.
pub type Word<R> = InMemoryRegister<u16, R>;

/// Build a `FieldValue` setting `ELEMENT` to the numeric value of a
/// [`crate::idn::Element`].
pub fn element_field(element: crate::idn::Element) -> FieldValue<u16, SvcControl::Register> {
    SvcControl::ELEMENT.val(element as u16)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tock_registers::interfaces::{Readable, Writeable};

    #[test]
    fn svc_control_round_trips_element_and_flags() {
        let word: Word<SvcControl::Register> = InMemoryRegister::new(0);
        word.write(
            SvcControl::M_BUSY::SET
                + SvcControl::MHS::SET
                + SvcControl::WRITE::SET
                + element_field(crate::idn::Element::Data),
        );
        assert_eq!(word.read(SvcControl::ELEMENT), 7);
        assert!(word.is_set(SvcControl::M_BUSY));
        assert!(word.is_set(SvcControl::MHS));
        assert!(word.is_set(SvcControl::WRITE));
        assert!(!word.is_set(SvcControl::SETEND));
    }

    #[test]
    fn svc_status_valid_error_busy_are_independent_bits() {
        let word: Word<SvcStatus::Register> = InMemoryRegister::new(0);
        word.write(SvcStatus::VALID::SET + SvcStatus::AHS::SET);
        assert!(word.is_set(SvcStatus::VALID));
        assert!(!word.is_set(SvcStatus::ERROR));
        assert!(!word.is_set(SvcStatus::BUSY));
        assert!(word.is_set(SvcStatus::AHS));
    }

    #[test]
    fn cdev_topology_field_enumerates_three_values() {
        let word: Word<CDev::Register> = InMemoryRegister::new(0);
        word.write(CDev::TOPOLOGY::LoopbackFwP);
        assert_eq!(
            word.read_as_enum(CDev::TOPOLOGY),
            Some(CDev::TOPOLOGY::Value::LoopbackFwP)
        );
    }
}
