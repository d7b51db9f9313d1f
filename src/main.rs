//! Atlas scheduler CLI
//!
//! Runs scheduling scenarios against the deterministic simulator, or the
//! producer/consumer workload on real threads.
//!
//! # Output Format
//!
//! Human-readable summaries go to stdout. With `--json` the full outcome
//! (threads, snapshots, errors, counters and trace) is printed as one JSON
//! document instead. Logging goes to stderr, filtered by `RUST_LOG`.
//!
//! # Exit Codes
//!
//! - `0`: Success
//! - `1`: Simulation failure (hang, timeout, invariant violation)
//! - `2`: Invalid arguments, configuration or scenario

use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use anyhow::{anyhow, Context};
use clap::{Parser, Subcommand};

use atlas_sched::demo::{DemoReport, ProducerConsumer};
use atlas_sched::sim::{scenarios, simulate, Scenario, SimOutcome};
use atlas_sched::{Scheduler, SchedulerConfig, SimError};

#[derive(Parser, Debug)]
#[command(name = "atlas-sched", version, about = "Single-core EDF scheduler toolkit")]
struct Cli {
    /// Scheduler configuration file (TOML).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Print machine-readable JSON instead of a summary.
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List built-in scenarios.
    List,
    /// Run a built-in scenario.
    Run {
        name: String,
        /// Include the scheduling trace in the summary.
        #[arg(long)]
        trace: bool,
    },
    /// Run a scenario file.
    Scenario {
        path: PathBuf,
        #[arg(long)]
        trace: bool,
    },
    /// Run a real-thread workload.
    #[command(subcommand)]
    Demo(Demo),
}

#[derive(Subcommand, Debug)]
enum Demo {
    /// Producers submit to consumers fetching with `next()`.
    ProducerConsumer {
        #[arg(long, default_value_t = 3)]
        consumers: usize,
        #[arg(long, default_value_t = 10)]
        producers: usize,
        #[arg(long, default_value_t = 20)]
        samples: usize,
        /// Busy work per job, in microseconds.
        #[arg(long, default_value_t = 500)]
        work_us: u64,
        /// Outstanding jobs allowed per consumer.
        #[arg(long, default_value_t = 16)]
        window: u32,
    },
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();
    let cli = Cli::parse();
    match run(cli) {
        Ok(code) => code,
        Err(err) => {
            eprintln!("error: {err:#}");
            ExitCode::from(2)
        }
    }
}

fn run(cli: Cli) -> anyhow::Result<ExitCode> {
    let config = match &cli.config {
        Some(path) => SchedulerConfig::load(path)?,
        None => SchedulerConfig::default(),
    };

    match cli.command {
        Command::List => {
            for s in scenarios::builtin() {
                println!("{:<20} {}", s.name, s.description);
            }
            Ok(ExitCode::SUCCESS)
        }
        Command::Run { name, trace } => {
            let scenario =
                scenarios::find(&name).ok_or_else(|| anyhow!("unknown scenario {name:?}"))?;
            report_sim(scenario, &config, cli.json, trace)
        }
        Command::Scenario { path, trace } => {
            let scenario = Scenario::load(&path)
                .with_context(|| format!("loading scenario {}", path.display()))?;
            report_sim(scenario, &config, cli.json, trace)
        }
        Command::Demo(Demo::ProducerConsumer {
            consumers,
            producers,
            samples,
            work_us,
            window,
        }) => {
            if consumers == 0 || producers == 0 || window == 0 {
                return Err(anyhow!("consumers, producers and window must be >= 1"));
            }
            let plan = ProducerConsumer {
                consumers,
                producers,
                samples,
                work: Duration::from_micros(work_us),
                window,
                ..ProducerConsumer::default()
            };
            let sched = Scheduler::new(config)?;
            let report = plan.run(&sched).context("producer/consumer demo")?;
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                print_demo(&report);
            }
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn report_sim(
    scenario: Scenario,
    config: &SchedulerConfig,
    json: bool,
    trace: bool,
) -> anyhow::Result<ExitCode> {
    match simulate(scenario, config) {
        Ok(outcome) => {
            if json {
                println!("{}", serde_json::to_string_pretty(&outcome)?);
            } else {
                print_outcome(&outcome, trace);
            }
            Ok(ExitCode::SUCCESS)
        }
        Err(err @ SimError::BadScenario { .. }) => Err(err.into()),
        Err(err) => {
            eprintln!("simulation failed: {err}");
            Ok(ExitCode::from(1))
        }
    }
}

fn print_outcome(outcome: &SimOutcome, trace: bool) {
    println!(
        "{}: finished after {:.1}ms",
        outcome.scenario,
        outcome.elapsed_us as f64 / 1000.0
    );
    for t in &outcome.threads {
        let jobs: Vec<String> = t.jobs.iter().map(|j| j.0.to_string()).collect();
        println!(
            "  {:<12} {}  cpu={:.1}ms jobs=[{}]",
            t.name,
            t.tid,
            t.cpu_us as f64 / 1000.0,
            jobs.join(",")
        );
    }
    for p in &outcome.snapshots {
        println!(
            "  snapshot {:<12} {:<12} at {:>8.1}ms class={} consumed={:.1}ms credit={:.1}ms",
            p.thread,
            p.label,
            p.at_us as f64 / 1000.0,
            p.class,
            p.consumed_us as f64 / 1000.0,
            p.block_credit_us as f64 / 1000.0
        );
    }
    for e in &outcome.op_errors {
        println!("  error {} at {}us: {}", e.thread, e.at_us, e.error);
    }
    let s = &outcome.stats;
    println!(
        "  submitted={} dispatched={} completed={} missed={} expired={} cancelled={} blocks={} class_changes={}",
        s.submitted, s.dispatched, s.completed, s.missed, s.expired, s.cancelled, s.blocks, s.class_changes
    );
    if trace {
        for ev in &outcome.trace {
            match serde_json::to_string(ev) {
                Ok(line) => println!("  {line}"),
                Err(e) => log::warn!("unprintable trace event: {e}"),
            }
        }
    }
}

fn print_demo(report: &DemoReport) {
    println!(
        "producer/consumer: {} jobs in {}ms, per consumer {:?}",
        report.jobs, report.elapsed_ms, report.per_consumer
    );
    let s = &report.stats;
    println!(
        "  completed={} missed={} expired={} cancelled={}",
        s.completed, s.missed, s.expired, s.cancelled
    );
}
