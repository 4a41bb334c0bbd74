//! [`Connection`] (§3): one per active producer/consumer relationship.

use crate::model::slave::SlaveIdx;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ConnIdx(pub usize);

/// Direction of a connection relative to the master.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Master produces, slave consumes (carried in an MDT).
    MasterProduces,
    /// Slave produces, master consumes (carried in an AT).
    SlaveProduces,
}

#[derive(Debug, Clone)]
pub struct Connection {
    pub owner: SlaveIdx,
    /// `S-0-1050.<n>` configuration index.
    pub configuration_index: u8,
    /// Application-assigned connection number (`S-0-1050.x.2`).
    pub connection_number: u16,
    pub direction: Direction,
    pub length_bytes: u16,
    /// Producer cycle time, in multiples of `tScyc` (`S-0-1050.x.10/11`).
    pub producer_cycle_time_us: u32,
    /// Which of the four telegram numbers (0..3) carries this connection.
    pub telegram_assignment: u8,
    pub allowed_data_losses: u8,
    /// Real-time-bit allocation, one allocated IDN per configured bit
    /// (`S-0-1060.x.7`), empty when the slave has no RTB class.
    pub real_time_bit_allocation: Vec<sercos_hal::idn::Idn>,
}

impl Connection {
    /// §3 invariant: a slave's `maxNbrOfConnections` never exceeds the
    /// slave-reported `S-0-1051` list length. Checked by the caller
    /// (`SCP Class Reasoner` / `Phase Sequencer`) against
    /// `ProjectedSlave::max_connections` and the `s_0_1051_length` read back
    /// from the slave; kept here as a pure predicate so both call sites
    /// share the exact same rule.
    pub fn within_limit(connection_count: usize, s_0_1051_length: usize) -> bool {
        connection_count <= s_0_1051_length
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn within_limit_is_inclusive() {
        assert!(Connection::within_limit(2, 2));
        assert!(!Connection::within_limit(3, 2));
    }
}
