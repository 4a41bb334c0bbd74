//! Drives a simulated fleet the same way `bin/sercos-sim` does, then
//! renders the resulting [`sercos_master::FleetReport`] as a table —
//! the rendering half of the diagnostics surface supplemented from
//! `CSMD_DIAG.c` (§9.B); the *data collection* lives in
//! `sercos_master::diagnostics`, not here.

use anyhow::Result;
use clap::Parser;
use colored::Colorize;
use prettytable::{row, Table};

use sercos_hal::bus::interface::IpCoreBus;
use sercos_hal::sim::{SimulatedBus, VirtualDevWords, VirtualSvcChannel};
use sercos_master::config::{HotPlugConfig, MasterConfig, MasterKindConfig, SlaveConfig};
use sercos_master::model::slave::Activity;
use sercos_master::model::svc_container::SC_WRBUF_LENGTH;
use sercos_master::{CommunicationPhase, FleetReport, Instance, PhaseSequencer, Progress};

#[derive(Parser)]
#[command(
    name = "sercos-probe",
    about = "Drive a simulated Sercos III fleet and report its phase/diagnostic state"
)]
struct Args {
    /// Number of slaves to project.
    #[arg(short = 'n', long, default_value_t = 4)]
    slaves: usize,

    /// Give up driving further once this many cycles have elapsed; whatever
    /// state was reached is still reported.
    #[arg(long, default_value_t = 10_000)]
    max_cycles: u32,
}

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
        t_scyc_ns: 1_000_000,
        master_kind: MasterKindConfig::Hard,
        hotplug: HotPlugConfig::default(),
        max_scp_class_entries: 16,
    };
    let mut instance = Instance::new(config);

    let mut bus = SimulatedBus::new();
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
    let mut halted: Option<String> = None;

    while cycle < args.max_cycles {
        cycle += 1;

        for (i, slave) in instance.slaves.iter_mut().enumerate() {
            let cdev_offset = dev_base + i as u16 * 2;
            let sdev_offset = cdev_offset + 1;
            bus.write_short(cdev_offset, slave.dev_control.get())?;
            slave.dev_status.set(bus.read_short(sdev_offset)?);
        }
        instance.refresh_slave_validity();

        if instance.phase == CommunicationPhase::Cp4 {
            break;
        }

        let outcome = match instance.phase {
            CommunicationPhase::Cp0 => sequencer.check_version(&mut instance, &mut bus),
            CommunicationPhase::Cp1 => sequencer.get_timing_data(&mut instance, &mut bus),
            CommunicationPhase::Cp2 => {
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
            Progress::Done(()) => {}
            Progress::Canceled => {
                halted = Some("phase transition canceled".to_string());
                break;
            }
            Progress::Failed(e) => {
                halted = Some(e.to_string());
                break;
            }
        }
    }

    print_report(instance.phase, &FleetReport::collect(&instance), cycle);

    if let Some(reason) = halted {
        println!("\n{} {reason}", "halted:".red().bold());
    }
    if !instance.diagnostics.is_empty() {
        println!(
            "\n{} {} slave fault(s) recorded:",
            "diagnostics:".yellow().bold(),
            instance.diagnostics.count()
        );
        for fault in instance.diagnostics.faults() {
            println!(
                "  slave {} — {} ({})",
                fault.slave.get(),
                fault.error.to_string().yellow(),
                fault.idn
            );
        }
    }

    Ok(())
}

fn print_report(phase: CommunicationPhase, report: &FleetReport, cycles: u32) {
    println!(
        "{} {:?} after {} cycle(s), {} slave(s) projected\n",
        "phase:".bold(),
        phase,
        cycles,
        report.rows.len()
    );

    let mut table = Table::new();
    table.add_row(row![b => "idx", "address", "activity", "class mask", "last error"]);
    for r in &report.rows {
        let activity = match r.activity {
            Activity::Active => "Active".green().to_string(),
            Activity::Inactive => "Inactive".normal().to_string(),
            Activity::HotPlugInProgress => "HotPlugInProgress".cyan().to_string(),
        };
        let error = r
            .last_error
            .map(|e| e.to_string().red().to_string())
            .unwrap_or_else(|| "-".to_string());
        table.add_row(row![
            r.slave.get(),
            format!("{:#05x}", r.address),
            activity,
            format!("{:#06x}", r.class_mask.bits()),
            error
        ]);
    }
    table.printstd();
}
