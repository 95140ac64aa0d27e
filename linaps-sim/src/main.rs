//! linaps Deterministic Simulator CLI.
//!
//! Runs two protection engines back to back under generated defects, commands
//! and PDU loss:
//! - Fuzzing: Run many simulations with randomized configurations.
//! - Replay: Re-run a simulation from a seed printed by a fuzzing run.
//! - Stress: One long run with moderate loss, until done or interrupted.
//! - Scenario: A scripted working-failure and restoration walk, printed step by step.

use std::fs::File;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use clap::Parser;
use linaps::{Mode, PortRole};
use linaps_sim::error_analyzer::{ErrorAnalysis, ErrorAnalyzer, ErrorSummary};
use linaps_sim::{ApsSimulator, Side, SimConfig, SimError, SimEvent};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, fmt};

const MODES: [Mode; 3] = [
    Mode::OneForOne,
    Mode::OnePlusOneUnidirectional,
    Mode::OnePlusOneBidirectional,
];

#[derive(Parser, Debug)]
#[command(author, version, about = "linaps Deterministic Simulator", long_about = None)]
struct CliArgs {
    /// Run mode: fuzz, replay, stress, or scenario.
    #[arg(value_enum)]
    mode: RunMode,

    /// Seed for the simulation. Required for 'replay', used as master seed for 'fuzz' if provided.
    #[arg(short, long)]
    seed: Option<u64>,

    /// Number of iterations (distinct SimConfig seeds) for 'fuzz' mode.
    #[arg(short = 'i', long, default_value_t = 1000)]
    iterations: usize,

    /// Number of events to generate per simulation run.
    #[arg(short = 'e', long, default_value_t = 200)]
    events: usize,

    /// Maximum PDU loss probability (0.0 to 1.0) for fuzz mode.
    #[arg(long, default_value_t = 0.1)]
    max_loss: f64,

    /// Skip checking that both ends select the same path once each run has settled.
    #[arg(long)]
    no_check_agreement: bool,

    /// Output file for logging failures.
    #[arg(short = 'o', long, default_value = "linaps_sim_failures.log")]
    output_file: PathBuf,

    /// Number of parallel workers for fuzzing. Defaults to number of logical CPUs.
    #[arg(short = 'w', long, default_value_t = num_cpus::get())]
    workers: usize,
}

#[derive(clap::ValueEnum, Clone, Debug)]
enum RunMode {
    /// Fuzz with many random configurations.
    Fuzz,
    /// Replay a simulation with a specific seed.
    Replay,
    /// Long-running stress test.
    Stress,
    /// Scripted working failure, restoration and wait-to-restore.
    Scenario,
}

fn main() {
    let args = CliArgs::parse();
    init_tracing(match args.mode {
        RunMode::Replay | RunMode::Scenario => "info",
        _ => "warn",
    });

    let code = match args.mode {
        RunMode::Fuzz => run_fuzz_mode(&args),
        RunMode::Replay => run_replay_mode(&args),
        RunMode::Stress => run_stress_mode(&args),
        RunMode::Scenario => run_scenario_mode(&args),
    };
    std::process::exit(code);
}

fn init_tracing(default_filter: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr))
        .try_init();
}

/// Generates a randomized `SimConfig` for a fuzzing iteration.
///
/// # Parameters
/// - `iteration_seed`: Random seed for deterministic configuration generation
/// - `num_events`: Number of events to generate in this simulation run
/// - `max_loss`: Maximum PDU loss probability (0.0 to 1.0) to randomly select from
///
/// # Returns
/// A `SimConfig` whose instance configuration always passes validation
///
/// # Configuration Randomization
/// - **Mode**: Uniform over 1:1, 1+1 unidirectional and 1+1 bidirectional
/// - **WTR**: 1 to 60 seconds, kept short so runs see restorations
/// - **Hold-off**: 50% chance of 0, otherwise 100 ms steps up to 2 s
/// - **PDU loss**: 70% chance of 0.0, otherwise up to `max_loss`
fn generate_fuzz_config(
    iteration_seed: u64,
    num_events: usize,
    max_loss: f64,
    check_agreement: bool,
) -> SimConfig {
    let mut rng = StdRng::seed_from_u64(iteration_seed);

    SimConfig {
        seed: rng.random(),
        num_events,
        mode: MODES[rng.random_range(0..MODES.len())],
        revertive: rng.random_bool(0.7),
        wtr_secs: rng.random_range(1..=60),
        hold_off_msecs: if rng.random_bool(0.5) {
            0
        } else {
            rng.random_range(1..=20u16) * 100
        },
        pdu_loss_probability: if rng.random_bool(0.7) {
            0.0
        } else {
            rng.random_range(0.0..=max_loss.clamp(0.0, 1.0))
        },
        command_probability: rng.random_range(0.05..=0.4),
        check_agreement,
    }
}

fn run_config(config: SimConfig) -> Result<(), SimError> {
    ApsSimulator::new(config)?.run().map(|_| ())
}

fn failure_record(seed: u64, error: &SimError, analysis: &ErrorAnalysis, config: &SimConfig) -> String {
    format!(
        "[{}] {:?} ({:.0}%): {} - Seed {}: {}\nConfig: {:#?}\n\n",
        chrono::Local::now().format("%Y-%m-%d %H:%M:%S"),
        analysis.category,
        analysis.confidence * 100.0,
        analysis.reason,
        seed,
        error,
        config
    )
}

/// Runs many randomized configurations in parallel and logs the failures.
///
/// # Returns
/// The process exit code: 1 if any failure is not explained by PDU loss,
/// 0 otherwise.
fn run_fuzz_mode(args: &CliArgs) -> i32 {
    println!(
        "Starting Fuzz mode: {} iterations, {} events/iter, up to {}% loss, {} workers.",
        args.iterations,
        args.events,
        (args.max_loss * 100.0) as u32,
        args.workers
    );
    let start = Instant::now();

    let output = match File::create(&args.output_file) {
        Ok(file) => Mutex::new(file),
        Err(e) => {
            eprintln!("Failed to create output file {:?}: {}", args.output_file, e);
            return 2;
        }
    };

    let running = Arc::new(AtomicBool::new(true));
    let running_ctrlc = running.clone();
    if let Err(e) = ctrlc::set_handler(move || {
        println!("\nCtrl+C detected. Signalling workers to stop...");
        running_ctrlc.store(false, Ordering::SeqCst);
    }) {
        eprintln!("Error setting Ctrl-C handler: {e}");
    }

    let master_seed = args.seed.unwrap_or_else(rand::random);
    println!("Master seed for generating SimConfig seeds: {}", master_seed);
    let mut seed_rng = StdRng::seed_from_u64(master_seed);
    let seeds: Vec<u64> = (0..args.iterations).map(|_| seed_rng.random()).collect();

    let pool = match rayon::ThreadPoolBuilder::new()
        .num_threads(args.workers.max(1))
        .build()
    {
        Ok(pool) => pool,
        Err(e) => {
            eprintln!("Failed to build worker pool: {e}");
            return 2;
        }
    };

    let completed = AtomicUsize::new(0);
    let summary = pool.install(|| {
        seeds
            .par_iter()
            .map(|&seed| {
                let mut verdicts = ErrorSummary::default();
                if !running.load(Ordering::Relaxed) {
                    return verdicts;
                }
                let config = generate_fuzz_config(
                    seed,
                    args.events,
                    args.max_loss,
                    !args.no_check_agreement,
                );
                if let Err(error) = run_config(config.clone()) {
                    let analysis = ErrorAnalyzer::analyze_error(&error, &config);
                    verdicts.record(&analysis);
                    if analysis.should_log() {
                        let record = failure_record(seed, &error, &analysis, &config);
                        eprint!("{}", record);
                        if let Ok(mut file) = output.lock() {
                            let _ = file.write_all(record.as_bytes());
                            let _ = file.flush();
                        }
                    }
                }

                let done = completed.fetch_add(1, Ordering::Relaxed) + 1;
                if done % 500 == 0 || done == args.iterations {
                    println!("Progress: {}/{} iterations completed", done, args.iterations);
                }
                verdicts
            })
            .reduce(ErrorSummary::default, ErrorSummary::merge)
    });

    println!("\n--- Fuzzing Run Summary ---");
    println!(
        "Total iterations attempted/completed: {} / {}",
        args.iterations,
        completed.into_inner()
    );
    println!("Duration: {:.2?}", start.elapsed());
    println!(
        "Critical Failures: {} ({} implementation bugs, {} high confidence; {} for review)",
        summary.critical(),
        summary.implementation_bugs,
        summary.confident_bugs,
        summary.requires_review
    );
    println!(
        "Tolerated Errors: {} link-induced, {} operator-induced",
        summary.link_induced, summary.operator_induced
    );
    if summary.total() > 0 {
        println!("Bug rate among failures: {:.1}%", summary.bug_rate() * 100.0);
    }
    if !running.load(Ordering::SeqCst) {
        println!("Fuzzing was gracefully interrupted.");
    }
    if summary.critical() > 0 {
        println!(
            "FAIL: Critical failures found. Check '{}'.",
            args.output_file.display()
        );
        1
    } else {
        println!("PASS: No critical failures detected.");
        0
    }
}

/// Re-runs a single fuzzing iteration from its seed.
fn run_replay_mode(args: &CliArgs) -> i32 {
    let Some(seed) = args.seed else {
        eprintln!("Seed (--seed <VALUE>) is required for replay mode.");
        return 2;
    };
    println!("Replaying simulation with SimConfig seed: {}", seed);

    let config = generate_fuzz_config(seed, args.events, args.max_loss, !args.no_check_agreement);
    println!("Replaying with Config: {:#?}", config);

    match run_config(config) {
        Ok(()) => {
            println!("SUCCESS: Replay of seed {} completed without errors.", seed);
            0
        }
        Err(e) => {
            eprintln!("FAILURE: Replay of seed {} resulted in error: {}", seed, e);
            1
        }
    }
}

/// Runs one long simulation with moderate loss on a 1:1 revertive span.
fn run_stress_mode(args: &CliArgs) -> i32 {
    let seed = args.seed.unwrap_or_else(rand::random);
    let config = SimConfig {
        seed,
        num_events: args.events.max(1_000_000),
        pdu_loss_probability: 0.01,
        check_agreement: !args.no_check_agreement,
        ..Default::default()
    };
    println!(
        "Stress Test Mode: {} events, seed {} (interrupt with Ctrl+C)",
        config.num_events, seed
    );

    let start = Instant::now();
    let result = ApsSimulator::new(config).and_then(|mut sim| sim.run());
    match result {
        Ok(report) => {
            println!(
                "Stress test completed in {:.2?}: {} events, {} PDUs delivered, {} lost, {} selector changes",
                start.elapsed(),
                report.events,
                report.frames_delivered,
                report.frames_lost,
                report.selector_changes
            );
            0
        }
        Err(e) => {
            eprintln!("Stress test failed after {:.2?}: {}", start.elapsed(), e);
            1
        }
    }
}

/// Walks a revertive 1:1 span through a working failure at end A, its
/// repair and the wait-to-restore period, printing both ends after each step.
fn run_scenario_mode(args: &CliArgs) -> i32 {
    let config = SimConfig {
        seed: args.seed.unwrap_or_default(),
        wtr_secs: 10,
        ..Default::default()
    };
    let working_sf = |sf| SimEvent::Defect {
        side: Side::A,
        role: PortRole::Working,
        sf,
        sd: false,
    };
    let steps = [
        ("working SF raised at A", working_sf(true)),
        ("working SF cleared at A", working_sf(false)),
        (
            "wait-to-restore elapsed",
            SimEvent::Wait(Duration::from_secs(u64::from(config.wtr_secs) + 1)),
        ),
    ];

    let mut simulator = match ApsSimulator::new(config) {
        Ok(simulator) => simulator,
        Err(e) => {
            eprintln!("FAILURE: scenario setup: {e}");
            return 1;
        }
    };
    for (label, event) in steps {
        if let Err(e) = simulator.run_script(&[event]) {
            eprintln!("FAILURE: {label}: {e}");
            return 1;
        }
        println!("{label}:");
        for side in Side::BOTH {
            match simulator.status(side) {
                Ok(status) => println!(
                    "  end {side}: state {:<7} selector {:?} tx {:?}",
                    status.state.to_string(),
                    status.selector,
                    status.tx_aps
                ),
                Err(e) => {
                    eprintln!("FAILURE: end {side} status: {e}");
                    return 1;
                }
            }
        }
    }

    match simulator.check_agreement() {
        Ok(()) => {
            println!("SUCCESS: both ends restored to working.");
            0
        }
        Err(e) => {
            eprintln!("FAILURE: {e}");
            1
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fuzz_configs_are_valid_and_reproducible() {
        for seed in 0..200 {
            let config = generate_fuzz_config(seed, 50, 0.3, false);
            assert!(config.instance_config().validate().is_ok(), "seed {seed}: {config:?}");
            assert!(config.pdu_loss_probability <= 0.3);

            let again = generate_fuzz_config(seed, 50, 0.3, false);
            assert_eq!(config.seed, again.seed);
            assert_eq!(config.mode, again.mode);
            assert_eq!(config.wtr_secs, again.wtr_secs);
        }
    }
}
