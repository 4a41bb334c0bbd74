//! [`HotPlugContext`] (§3): state carried across HP0/HP1/SVC-activation/
//! condensed-push entries of [`crate::hotplug`].

use sercos_hal::telegram::{HP_ADDRESS_NOT_EXIST, Port, SercosAddress};

use crate::model::slave::SlaveIdx;

/// Maximum slaves one Hot-Plug scan can accumulate (§3, §4.E).
pub const MAX_SCANNED_SLAVES: usize = 16;

/// Backup of the last slave's loopback topology, restored on Hot-Plug
/// rollback (§4.E "Condensed CP parameter push", "Failure semantics").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LastSlaveTopologyBackup {
    pub slave: SlaveIdx,
    pub loopback_p: bool,
    pub loopback_s: bool,
}

#[derive(Debug, Clone)]
pub struct HotPlugContext {
    pub active_port: Port,
    pub timeout_counter: u32,
    /// HP1 scan cursor (`Slave_idx`), incremented from 0.
    pub scan_cursor: u16,
    pub hp0_parameter_index: usize,
    pub repeat_counter: u32,
    pub scanned_addresses: Vec<SercosAddress>,
    /// Index of the slave at the dark end of the line, or `None` if the
    /// dark end is the master's own previously-unused port.
    pub last_slave_in_line: Option<SlaveIdx>,
    pub function_return_code: Option<crate::error::MasterError>,
    pub last_slave_backup: Option<LastSlaveTopologyBackup>,
}

impl HotPlugContext {
    pub fn new(active_port: Port, last_slave_in_line: Option<SlaveIdx>) -> Self {
        Self {
            active_port,
            timeout_counter: 0,
            scan_cursor: 0,
            hp0_parameter_index: 0,
            repeat_counter: 0,
            scanned_addresses: Vec::new(),
            last_slave_in_line,
            function_return_code: None,
            last_slave_backup: None,
        }
    }

    pub fn reset_scan(&mut self) {
        self.scan_cursor = 0;
        self.scanned_addresses.clear();
    }

    pub fn record_scanned(&mut self, address: SercosAddress) -> bool {
        if self.scanned_addresses.len() >= MAX_SCANNED_SLAVES {
            return false;
        }
        self.scanned_addresses.push(address);
        true
    }

    pub fn scan_finished(address: SercosAddress) -> bool {
        address == HP_ADDRESS_NOT_EXIST
    }

    /// Increments `timeout_counter` and reports whether `budget` cycles have
    /// now elapsed without the caller resetting it.
    pub fn tick_timeout(&mut self, budget: u32) -> bool {
        self.timeout_counter += 1;
        self.timeout_counter >= budget
    }

    pub fn reset_timeout(&mut self) {
        self.timeout_counter = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_scanned_rejects_past_the_cap() {
        let mut ctx = HotPlugContext::new(Port::P, None);
        for addr in 0..MAX_SCANNED_SLAVES as u16 {
            assert!(ctx.record_scanned(addr));
        }
        assert!(!ctx.record_scanned(0xAA));
        assert_eq!(ctx.scanned_addresses.len(), MAX_SCANNED_SLAVES);
    }

    #[test]
    fn scan_finished_matches_not_exist_sentinel() {
        assert!(HotPlugContext::scan_finished(HP_ADDRESS_NOT_EXIST));
        assert!(!HotPlugContext::scan_finished(0x11));
    }

    #[test]
    fn tick_timeout_trips_at_budget_and_reset_clears_it() {
        let mut ctx = HotPlugContext::new(Port::P, None);
        for _ in 0..4 {
            assert!(!ctx.tick_timeout(5));
        }
        assert!(ctx.tick_timeout(5));
        ctx.reset_timeout();
        assert_eq!(ctx.timeout_counter, 0);
    }
}
