//! [`SvcContainer`] (§3): one per slave, realised in shared frame RAM and
//! shadowed here so the atomic engine can reason about it without touching
//! the bus on every field access.

use sercos_hal::words::{SvcControl, SvcStatus, Word};
use static_assertions::assert_eq_size;

/// Words per SVC read/write buffer window (§4.A segmentation rules). Fixed
/// by the IP-core's SVC RAM layout; matches `CSMD_PRIV_SVC.h`'s
/// `SC_WRBUF_LENGTH`.
pub const SC_WRBUF_LENGTH: usize = 16;

// The control/status shadow words are plain `u16` wrappers with no extra
// bookkeeping; a container's on-wire footprint depends on that holding.
assert_eq_size!(Word<SvcControl::Register>, u16);
assert_eq_size!(Word<SvcStatus::Register>, u16);

/// Offsets (in 16-bit words) of the control/status words and buffers within
/// one slave's SVC container, relative to `SvcOffsets::{mdt,at}_offset`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SvcContainerLayout {
    pub control_word_offset: u16,
    pub write_buffer_offset: u16,
    pub status_word_offset: u16,
    pub read_buffer_offset: u16,
}

/// Atomic access discipline (§3): only one party — master or slave — may
/// advance the handshake at a time. This shadow copy is the master's side
/// of that discipline; the bus is the single source of truth for what the
/// slave half currently reads.
#[derive(Debug, Clone)]
pub struct SvcContainer {
    pub layout: SvcContainerLayout,
    pub control: Word<SvcControl::Register>,
    pub status: Word<SvcStatus::Register>,
    pub write_buffer: [u16; SC_WRBUF_LENGTH],
    pub read_buffer: [u16; SC_WRBUF_LENGTH],
    /// Last master handshake bit (MHS) value written, to detect our own
    /// un-acknowledged toggle versus a genuine slave AHS flip.
    pub last_mhs: bool,
}

impl SvcContainer {
    pub fn new(layout: SvcContainerLayout) -> Self {
        use tock_registers::interfaces::Writeable;

        // A container starts idle, not mid-transaction, so the master may
        // act on it immediately; nothing else would ever set this bit,
        // since the bus never reports M_BUSY back to us (§4.A).
        let control = Word::new(0);
        control.write(SvcControl::M_BUSY::SET);

        Self {
            layout,
            control,
            status: Word::new(0),
            write_buffer: [0; SC_WRBUF_LENGTH],
            read_buffer: [0; SC_WRBUF_LENGTH],
            last_mhs: false,
        }
    }

    /// M_BUSY gate (§4.A `InitRequest`): "master may now act".
    pub fn m_busy_set(&self) -> bool {
        use tock_registers::interfaces::Readable;
        self.control.is_set(SvcControl::M_BUSY)
    }

    /// AHS: slave's handshake toggle bit, mirrored in the status word.
    pub fn ahs(&self) -> bool {
        use tock_registers::interfaces::Readable;
        self.status.is_set(SvcStatus::AHS)
    }

    /// §3 invariant: handshake bits advance strictly in alternation. A
    /// genuine acknowledge is observed when AHS has flipped to match the
    /// MHS value we last wrote.
    pub fn handshake_acknowledged(&self) -> bool {
        self.ahs() == self.last_mhs
    }

    pub fn slave_error(&self) -> bool {
        use tock_registers::interfaces::Readable;
        self.status.is_set(SvcStatus::ERROR)
    }

    pub fn slave_valid(&self) -> bool {
        use tock_registers::interfaces::Readable;
        self.status.is_set(SvcStatus::VALID)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn layout() -> SvcContainerLayout {
        SvcContainerLayout {
            control_word_offset: 0,
            write_buffer_offset: 1,
            status_word_offset: 0,
            read_buffer_offset: 1,
        }
    }

    #[test]
    fn fresh_container_has_no_acknowledged_handshake_mismatch() {
        let c = SvcContainer::new(layout());
        // last_mhs=false, ahs=false => considered "acknowledged" (both at rest).
        assert!(c.handshake_acknowledged());
    }

    #[test]
    fn fresh_container_starts_idle_so_master_may_act() {
        let c = SvcContainer::new(layout());
        assert!(c.m_busy_set());
    }

    #[test]
    fn m_busy_reflects_control_word() {
        use tock_registers::interfaces::Writeable;
        let mut c = SvcContainer::new(layout());
        c.control.set(0);
        assert!(!c.m_busy_set());
        c.control.write(SvcControl::M_BUSY::SET);
        assert!(c.m_busy_set());
    }
}
