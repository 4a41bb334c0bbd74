//! Drives a simulated Sercos III fleet through `CP0..CP4` against
//! [`sercos_hal::sim::SimulatedBus`] — the "zero to aha" proof that the
//! phase sequencer, SVC engine and diagnostics in `sercos-master` actually
//! converge a fleet, without any real IP-core attached.
//!
//! The simulated bus's SVC loopback responder (hal/src/sim.rs) mirrors
//! whatever the master writes back into the read buffer rather than
//! emulating a real slave's `S-0-1000` content, so the fleet this tool
//! drives reports no supported SCP classes by default; that is a deliberate
//! simplification (DESIGN.md), not a bug — device-profile semantics of
//! parameter payloads are out of scope for this master (§1 Non-goals). What
//! this tool demonstrates is the *mechanics*: cyclic, non-blocking FSM
//! progression and per-slave error accumulation (§4.C "Fairness and error
//! accumulation").

use anyhow::{bail, Result};
use clap::Parser;

use sercos_hal::bus::interface::IpCoreBus;
use sercos_hal::sim::{SimulatedBus, VirtualDevWords, VirtualSvcChannel};
use sercos_master::config::{HotPlugConfig, MasterConfig, MasterKindConfig, SlaveConfig};
use sercos_master::model::svc_container::SC_WRBUF_LENGTH;
use sercos_master::{CommunicationPhase, Instance, PhaseSequencer, Progress};

#[derive(Parser)]
#[command(
    name = "sercos-sim",
    about = "Drive a simulated Sercos III fleet through CP0..CP4"
)]
struct Args {
    /// Number of slaves to project.
    #[arg(short = 'n', long, default_value_t = 4)]
    slaves: usize,

    /// Communication cycle time, nanoseconds.
    #[arg(long, default_value_t = 1_000_000)]
    t_scyc_ns: u32,

    /// Give up if CP4 has not been reached within this many cycles.
    #[arg(long, default_value_t = 10_000)]
    max_cycles: u32,
}

/// Word span reserved per slave's SVC container in the simulated bus's flat
/// address space: control + status + write buffer + read buffer.
const SVC_CONTAINER_WORD_SPAN: u16 = 2 + 2 * SC_WRBUF_LENGTH as u16;

fn main() -> Result<()> {
    tracing_subscriber::fmt::init();
    let args = Args::parse();

    let config = MasterConfig {
        slaves: (0..args.slaves)
            .map(|i| SlaveConfig {
                address: i as u16 + 1,
                active_classes: Vec::new(),
            })
            .collect(),
        t_scyc_ns: args.t_scyc_ns,
        master_kind: MasterKindConfig::Hard,
        hotplug: HotPlugConfig::default(),
        max_scp_class_entries: 16,
    };
    let mut instance = Instance::new(config);

    let mut bus = SimulatedBus::new();
    // C-DEV/S-DEV pairs live past every slave's SVC container so the two
    // address ranges never overlap.
    let dev_base = args.slaves as u16 * SVC_CONTAINER_WORD_SPAN;
    for (i, container) in instance.svc_containers.iter().enumerate() {
        bus.register_svc_channel(VirtualSvcChannel::new(
            container.layout.control_word_offset,
            container.layout.status_word_offset,
            container.layout.write_buffer_offset,
            container.layout.read_buffer_offset,
            SC_WRBUF_LENGTH as u16,
        ));
        bus.register_dev_words(VirtualDevWords {
            cdev_offset: dev_base + i as u16 * 2,
            sdev_offset: dev_base + i as u16 * 2 + 1,
        });
    }

    let mut sequencer = PhaseSequencer::new();
    let mut cycle = 0u32;
    loop {
        cycle += 1;
        if cycle > args.max_cycles {
            bail!(
                "fleet did not reach CP4 within {} cycles (stuck in {:?})",
                args.max_cycles,
                instance.phase
            );
        }

        // Mirror every slave's C-DEV/S-DEV pair through the simulated bus
        // each cycle, same as a real master would each time it services the
        // cyclic frame (§1 "the hardware boundary" — this crate owns only
        // the in-memory shadow words, not the wire transfer).
        for (i, slave) in instance.slaves.iter_mut().enumerate() {
            let cdev_offset = dev_base + i as u16 * 2;
            let sdev_offset = cdev_offset + 1;
            bus.write_short(cdev_offset, slave.dev_control.get())?;
            slave.dev_status.set(bus.read_short(sdev_offset)?);
        }
        instance.refresh_slave_validity();

        if instance.phase == CommunicationPhase::Cp4 {
            println!("reached CP4 after {cycle} cycles");
            break;
        }

        let outcome = match instance.phase {
            CommunicationPhase::Cp0 => sequencer.check_version(&mut instance, &mut bus),
            CommunicationPhase::Cp1 => {
                sequencer.get_timing_data(&mut instance, &mut bus)
            }
            CommunicationPhase::Cp2 => {
                // §4.C step 1 writes S-0-1013; `ReadConfig`'s AwaitSlaveValid
                // step (CP3) only ever sees Slave_valid once Master_valid has
                // been asserted on the wire, so raise it before entering CP3.
                for slave in &mut instance.slaves {
                    slave.set_master_valid(true);
                }
                sequencer.transmit_timing(&mut instance, &mut bus)
            }
            CommunicationPhase::Cp3 => sequencer.read_config(&mut instance, &mut bus),
            CommunicationPhase::Cp4 => unreachable!("handled above"),
        };

        match outcome {
            Progress::InProgress(_) => continue,
            Progress::Done(()) => {
                tracing::info!(phase = ?instance.phase, cycle, "phase transition complete");
            }
            Progress::Canceled => bail!("phase transition canceled"),
            Progress::Failed(e) => bail!("phase transition failed: {e}"),
        }
    }

    let report = sercos_master::FleetReport::collect(&instance);
    println!("{:>4}  {:>7}  {:<18}  {}", "idx", "addr", "activity", "last error");
    for row in &report.rows {
        let activity = format!("{:?}", row.activity);
        let error = row
            .last_error
            .map(|e| e.to_string())
            .unwrap_or_else(|| "-".to_string());
        println!(
            "{:>4}  {:>#7x}  {:<18}  {}",
            row.slave.get(),
            row.address,
            activity,
            error
        );
    }

    if !instance.diagnostics.is_empty() {
        println!(
            "\n{} diagnostic fault(s) recorded during start-up (batch still converged, §4.C):",
            instance.diagnostics.count()
        );
        for fault in instance.diagnostics.faults() {
            println!("  slave {:?}: {} ({})", fault.slave, fault.error, fault.idn);
        }
    }

    Ok(())
}
