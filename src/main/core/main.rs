use std::ffi::OsString;

use anyhow::{self, Context};
use clap::Parser;

use crate::core::configuration::{CliOptions, ConfigFileOptions, ConfigOptions};
use crate::core::logger::{self, SimLogger};
use crate::core::sim::Simulation;
use crate::core::sim_config::SimConfig;
use crate::core::support::emulated_time::EmulatedTime;
use crate::core::transfer::BulkTransfer;

/// Main entry point for the simulator.
pub fn run_simulation(args: Vec<OsString>) -> anyhow::Result<()> {
    // parse the options from the command line
    let options = match CliOptions::try_parse_from(args.clone()) {
        Ok(x) => x,
        Err(e) => {
            // will print to either stdout or stderr with formatting
            let _ = e.print();
            if e.use_stderr() {
                // the `clap::Error` has the wrong exit code, so use our own
                std::process::exit(1);
            } else {
                std::process::exit(0);
            }
        }
    };

    // load the configuration yaml, from stdin if the filename is '-'
    let config_file: ConfigFileOptions = match options.config.as_str() {
        "-" => serde_yaml::from_reader(std::io::stdin())
            .context("Could not parse the configuration from stdin")?,
        filename => {
            let file = std::fs::File::open(filename)
                .with_context(|| format!("Could not open config file {filename:?}"))?;
            serde_yaml::from_reader(file)
                .with_context(|| format!("Could not parse configuration file {filename:?}"))?
        }
    };

    // generate the final configuration from the config file and cli options
    let config = ConfigOptions::new(config_file, options.clone());

    if options.show_config {
        print!(
            "{}",
            serde_yaml::to_string(&config).context("Could not serialize the configuration")?
        );
        return Ok(());
    }

    let sim_config = SimConfig::new(&config).context("Invalid configuration")?;

    // disable log buffering during startup so that we see every message immediately in the terminal
    SimLogger::init(config.log_level()).context("Could not initialize the logger")?;
    logger::set_buffering_enabled(false);

    // check if some log levels have been compiled out
    let log_level = config.log_level();
    if log_level > log::STATIC_MAX_LEVEL {
        log::warn!(
            "Log level set to {log_level}, but messages higher than {} have been compiled out",
            log::STATIC_MAX_LEVEL,
        );
    }

    log_args(&args);
    let stop_time = EmulatedTime::SIMULATION_START + sim_config.stop_time;

    let mut sim = Simulation::new(sim_config.latency);
    let mut names = Vec::with_capacity(sim_config.hosts.len());
    for params in sim_config.hosts {
        names.push(params.name.clone());
        sim.add_host(params).context("Could not add host")?;
    }

    let transfers: Vec<_> = sim_config
        .transfers
        .into_iter()
        .map(BulkTransfer::new)
        .collect();
    for transfer in &transfers {
        transfer.start(&mut sim)?;
    }

    log::info!("Starting the simulation with {} hosts", names.len());

    // buffer log messages while the simulation runs
    logger::set_buffering_enabled(true);
    sim.run_until(stop_time);
    logger::set_buffering_enabled(false);

    log::info!("Finished the simulation at {}", sim_config.stop_time);
    log::logger().flush();

    print_summary(&sim, &names, &transfers);

    let failed = transfers.iter().filter(|x| !x.report().is_complete()).count();
    if failed > 0 {
        anyhow::bail!("{failed} of {} transfers did not complete", transfers.len());
    }

    Ok(())
}

fn print_summary(sim: &Simulation, names: &[String], transfers: &[BulkTransfer]) {
    let name = |id: crate::host::host::HostId| {
        names
            .get(u32::from(id) as usize)
            .map(String::as_str)
            .unwrap_or("?")
    };

    for host in sim.hosts() {
        let stats = host.stats();
        println!(
            "host {}: sent {} packets ({} bytes), received {} packets ({} bytes), dropped {} packets",
            host.name(),
            stats.packets_sent,
            stats.bytes_sent,
            stats.packets_received,
            stats.bytes_received,
            stats.packets_dropped,
        );
    }

    let net = sim.stats();
    println!(
        "network: routed {} packets, dropped {} packets",
        net.packets_routed, net.packets_dropped
    );

    for transfer in transfers {
        let info = transfer.info();
        let report = transfer.report();

        let outcome = match (&report.error, report.completed_at) {
            (Some(e), _) => format!("failed: {e}"),
            (None, Some(t)) => match t.checked_duration_since(&EmulatedTime::SIMULATION_START) {
                Some(t) => format!("completed at {t}"),
                None => "completed".to_string(),
            },
            (None, None) => "did not complete".to_string(),
        };

        println!(
            "transfer {} -> {} ({}): {} of {} bytes received, {outcome}",
            name(info.client),
            name(info.server),
            info.server_addr,
            report.bytes_received,
            info.size,
        );
    }
}

fn log_args(args: &[OsString]) {
    for arg in args {
        log::info!("arg: {}", arg.to_string_lossy());
    }
}
