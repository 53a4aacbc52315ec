//! Run a simulation of two senders, one switch and two receivers.

use clap::{value_parser, Arg, ArgAction, Command};
use commonware_runtime::{deterministic, tokio, Clock, Metrics, Runner, Spawner};
use netsim::{Config, Simulation, Summary};
use rand::Rng;
use std::{process, str::FromStr, time::Duration};
use tracing::{error, info, Level};

fn main() {
    let matches = Command::new("netsim")
        .about("Simulate a small packet-switched network of cooperating tasks")
        .version(env!("CARGO_PKG_VERSION"))
        .arg(
            Arg::new("packet-size")
                .long("packet-size")
                .value_parser(value_parser!(usize))
                .help("Serialized size of every packet (bytes)"),
        )
        .arg(
            Arg::new("sender-period")
                .long("sender-period")
                .value_parser(value_parser!(u64))
                .help("Period between two packets of the same sender (ms)"),
        )
        .arg(
            Arg::new("forward-delay")
                .long("forward-delay")
                .value_parser(value_parser!(u64))
                .help("Delay applied by the switch to every forwarded packet (ms)"),
        )
        .arg(
            Arg::new("drop-probability")
                .long("drop-probability")
                .value_parser(value_parser!(f64))
                .help("Probability that the switch drops a packet (in [0, 1])"),
        )
        .arg(
            Arg::new("sender-capacity")
                .long("sender-capacity")
                .value_parser(value_parser!(usize))
                .help("Capacity of each sender to switch channel"),
        )
        .arg(
            Arg::new("receiver-capacity")
                .long("receiver-capacity")
                .value_parser(value_parser!(usize))
                .help("Capacity of each switch to receiver channel"),
        )
        .arg(
            Arg::new("stop-threshold")
                .long("stop-threshold")
                .value_parser(value_parser!(u32))
                .help("Packets each receiver counts before finishing"),
        )
        .arg(
            Arg::new("enqueue-timeout")
                .long("enqueue-timeout")
                .value_parser(value_parser!(u64))
                .help("Destroy a packet if its sender channel stays full this long (ms)"),
        )
        .arg(
            Arg::new("seed")
                .long("seed")
                .value_parser(value_parser!(u64))
                .help("Replay a run: seed every random decision and use the deterministic runtime (virtual time)"),
        )
        .arg(
            Arg::new("log-level")
                .long("log-level")
                .default_value("info")
                .value_parser(value_parser!(String))
                .help("Maximum level of logged events"),
        )
        .arg(
            Arg::new("metrics")
                .long("metrics")
                .action(ArgAction::SetTrue)
                .help("Print all metrics once the run completes"),
        )
        .get_matches();

    // Initialize logging
    let level = matches.get_one::<String>("log-level").unwrap();
    let level = match Level::from_str(level) {
        Ok(level) => level,
        Err(err) => {
            eprintln!("invalid log level {level}: {err}");
            process::exit(1);
        }
    };
    tracing_subscriber::fmt().with_max_level(level).init();

    // Override defaults with any provided arguments
    let mut cfg = Config::default();
    if let Some(packet_size) = matches.get_one::<usize>("packet-size") {
        cfg.packet_size = *packet_size;
    }
    if let Some(period) = matches.get_one::<u64>("sender-period") {
        cfg.sender_period = Duration::from_millis(*period);
    }
    if let Some(delay) = matches.get_one::<u64>("forward-delay") {
        cfg.forward_delay = Duration::from_millis(*delay);
    }
    if let Some(probability) = matches.get_one::<f64>("drop-probability") {
        cfg.drop_probability = *probability;
    }
    if let Some(capacity) = matches.get_one::<usize>("sender-capacity") {
        cfg.sender_capacity = *capacity;
    }
    if let Some(capacity) = matches.get_one::<usize>("receiver-capacity") {
        cfg.receiver_capacity = *capacity;
    }
    if let Some(threshold) = matches.get_one::<u32>("stop-threshold") {
        cfg.stop_threshold = *threshold;
    }
    if let Some(timeout) = matches.get_one::<u64>("enqueue-timeout") {
        cfg.enqueue_timeout = Some(Duration::from_millis(*timeout));
    }
    let print_metrics = matches.get_flag("metrics");

    // Run the simulation (without a seed, one is drawn and logged at startup)
    let summary = match matches.get_one::<u64>("seed") {
        Some(seed) => {
            cfg.seed = Some(*seed);
            deterministic::Runner::seeded(*seed).start(|context| run(context, cfg, print_metrics))
        }
        None => tokio::Runner::default().start(|context| run(context, cfg, print_metrics)),
    };
    let Some(summary) = summary else {
        process::exit(1);
    };
    for report in summary.reports {
        println!(
            "receiver {}: received {}, lost {}",
            report.receiver, report.received, report.lost
        );
    }
}

async fn run<E: Spawner + Clock + Rng + Metrics>(
    context: E,
    cfg: Config,
    print_metrics: bool,
) -> Option<Summary> {
    let simulation = match Simulation::new(context.with_label("simulation"), cfg) {
        Ok(simulation) => simulation,
        Err(err) => {
            error!(?err, "invalid configuration");
            return None;
        }
    };
    info!(seed = simulation.seed(), "random seed");
    let (handle, _) = simulation.start();
    let summary = match handle.await {
        Ok(summary) => summary,
        Err(err) => {
            error!(?err, "simulation failed");
            return None;
        }
    };
    if print_metrics {
        println!("{}", context.encode());
    }
    Some(summary)
}
