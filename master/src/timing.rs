//! Timing/sync (§4.C step 3, §6 "Timing/sync", §9.B ring-delay supplement).
//!
//! `model::timing::ConfigurationTiming` is the pure data singleton; this
//! module is the small amount of *behaviour* around it: ring-delay
//! measurement (`measure_ring_delay`, supplemented from `CSMD_GET_TIME.c`
//! per §9.B) and thin pass-through wrappers over
//! [`sercos_hal::bus::interface::TimingEvents`] for the API surface named in
//! §6 (`PrepareCYCCLK(_2)`, `EnableCYCCLKInput`, `SetCONCLK`, `ConfigDIVCLK`,
//! `EventControl`, `GetEventTime`, `IntControl`, `GetTCNT(_Relative)`,
//! `GetTSref`). The actual counters are IP-core silicon (§1 "Deliberately
//! out of scope"); this module only sequences the calls the Phase Sequencer
//! needs and converts the hardware error type into [`MasterError`].

use sercos_hal::bus::interface::{RingDelayProbe, TimingEvent, TimingEvents};
use sercos_hal::telegram::Port;

use crate::error::MasterError;
use crate::model::timing::ConfigurationTiming;

fn map_bus_err(_e: sercos_hal::error::BusError) -> MasterError {
    MasterError::SystemError {
        detail: "timing/event configuration call to the IP-core failed",
    }
}

/// §4.E / §6 "GetTimingData": measure the round-trip ring delay on both
/// ports and store the result in `timing.ring_delay_ns`. The original
/// (`CSMD_GET_TIME.c`) runs this as an `S-0-1015` timestamp round trip per
/// port; the actual capture is IP-core silicon reached through
/// [`RingDelayProbe`], so this function is pure sequencing.
pub fn measure_ring_delay(
    timing: &mut ConfigurationTiming,
    probe: &mut dyn RingDelayProbe,
) -> Result<(), MasterError> {
    for port in [Port::P, Port::S] {
        let round_trip_ns = probe.measure_round_trip(port).map_err(map_bus_err)?;
        timing.set_ring_delay(port, round_trip_ns);
    }
    Ok(())
}

/// Configures the primary cyclic timer for `timing.t_scyc_ns`.
pub fn prepare_cyc_clk(
    timing: &ConfigurationTiming,
    events: &mut dyn TimingEvents,
) -> Result<(), MasterError> {
    events
        .prepare_cyc_clk(timing.t_scyc_ns)
        .map_err(map_bus_err)
}

/// Configures the secondary (redundant) cyclic timer, used when the
/// hardware carries a backup synchronisation source.
pub fn prepare_cyc_clk_secondary(
    timing: &ConfigurationTiming,
    events: &mut dyn TimingEvents,
) -> Result<(), MasterError> {
    events
        .prepare_cyc_clk_secondary(timing.t_scyc_ns)
        .map_err(map_bus_err)
}

pub fn enable_cyc_clk_input(events: &mut dyn TimingEvents) -> Result<(), MasterError> {
    events.enable_cyc_clk_input().map_err(map_bus_err)
}

/// Arms `CON_CLK` (command-valid, `t3`) against the current timing config.
pub fn set_con_clk(
    timing: &ConfigurationTiming,
    events: &mut dyn TimingEvents,
) -> Result<(), MasterError> {
    events.set_con_clk(timing.t3_ns).map_err(map_bus_err)
}

pub fn config_div_clk(divider: u16, events: &mut dyn TimingEvents) -> Result<(), MasterError> {
    events.config_div_clk(divider).map_err(map_bus_err)
}

pub fn event_control(
    event: TimingEvent,
    enable: bool,
    events: &mut dyn TimingEvents,
) -> Result<(), MasterError> {
    events.event_control(event, enable).map_err(map_bus_err)
}

pub fn get_event_time(
    event: TimingEvent,
    events: &dyn TimingEvents,
) -> Result<u32, MasterError> {
    events.get_event_time(event).map_err(map_bus_err)
}

pub fn int_control(enable: bool, events: &mut dyn TimingEvents) -> Result<(), MasterError> {
    events.int_control(enable).map_err(map_bus_err)
}

pub fn get_tcnt(events: &dyn TimingEvents) -> Result<u32, MasterError> {
    events.get_tcnt().map_err(map_bus_err)
}

pub fn get_tcnt_relative(events: &dyn TimingEvents) -> Result<u32, MasterError> {
    events.get_tcnt_relative().map_err(map_bus_err)
}

/// `GetTSref` (§6): the synchronisation reference time derived from ring
/// delay (GLOSSARY "TSref").
pub fn get_tsref(events: &dyn TimingEvents) -> Result<u32, MasterError> {
    events.get_tsref().map_err(map_bus_err)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::timing::TimingMasterKind;
    use sercos_hal::error::BusError;

    struct FakeEvents {
        tsref: u32,
    }

    impl TimingEvents for FakeEvents {
        fn prepare_cyc_clk(&mut self, _period_ns: u32) -> Result<(), BusError> {
            Ok(())
        }
        fn prepare_cyc_clk_secondary(&mut self, _period_ns: u32) -> Result<(), BusError> {
            Ok(())
        }
        fn enable_cyc_clk_input(&mut self) -> Result<(), BusError> {
            Ok(())
        }
        fn set_con_clk(&mut self, _compare_ns: u32) -> Result<(), BusError> {
            Ok(())
        }
        fn config_div_clk(&mut self, _divider: u16) -> Result<(), BusError> {
            Ok(())
        }
        fn event_control(&mut self, _event: TimingEvent, _enable: bool) -> Result<(), BusError> {
            Ok(())
        }
        fn get_event_time(&self, _event: TimingEvent) -> Result<u32, BusError> {
            Ok(0)
        }
        fn int_control(&mut self, _enable: bool) -> Result<(), BusError> {
            Ok(())
        }
        fn get_tcnt(&self) -> Result<u32, BusError> {
            Ok(0)
        }
        fn get_tcnt_relative(&self) -> Result<u32, BusError> {
            Ok(0)
        }
        fn get_tsref(&self) -> Result<u32, BusError> {
            Ok(self.tsref)
        }
    }

    struct FakeRingDelay {
        p_ns: u32,
        s_ns: u32,
    }

    impl RingDelayProbe for FakeRingDelay {
        fn measure_round_trip(&mut self, port: Port) -> Result<u32, BusError> {
            Ok(match port {
                Port::P => self.p_ns,
                Port::S => self.s_ns,
            })
        }
    }

    #[test]
    fn measure_ring_delay_stores_both_ports() {
        let mut timing = ConfigurationTiming::new(TimingMasterKind::Hard);
        let mut probe = FakeRingDelay {
            p_ns: 111,
            s_ns: 222,
        };
        measure_ring_delay(&mut timing, &mut probe).unwrap();
        assert_eq!(timing.ring_delay(Port::P), 111);
        assert_eq!(timing.ring_delay(Port::S), 222);
    }

    #[test]
    fn get_tsref_passes_through() {
        let events = FakeEvents { tsref: 4242 };
        assert_eq!(get_tsref(&events).unwrap(), 4242);
    }
}
