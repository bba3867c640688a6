//! fleet-exec - Concurrent Fleet Command Dispatcher
//!
//! Entry point for the CLI application.

use anyhow::{bail, Context, Result};
use clap::Parser;
use console::{style, Term};
use fleet_exec::config::{CliArgs, DispatchConfig};
use fleet_exec::dispatch::{elevate, DispatchReport, FleetDispatcher, Strategy};
use fleet_exec::fleet::{discover, filter_by_index};
use fleet_exec::pretty;
use fleet_exec::progress::now_millis;
use fleet_exec::transport::SshTransport;
use std::process::ExitCode;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

fn main() -> ExitCode {
    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{:#}", e);
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

fn run() -> Result<()> {
    // Parse CLI arguments
    let args = CliArgs::parse();

    // Setup logging
    setup_logging(args.verbose)?;

    // Validate and create config
    let config = DispatchConfig::from_args(&args).context("Invalid configuration")?;

    // Resolve the fleet
    let source = config.worker_source();
    let fleet = discover(source.as_ref()).context("Failed to resolve workers")?;

    print_inventory(&fleet);

    let fleet = filter_by_index(fleet, &config.worker_filter)
        .context("Invalid worker filter")?;
    if fleet.is_empty() {
        bail!("Worker filter matched no workers");
    }

    // Rewritten once here, never per worker
    let mut command = config.command.clone();
    if config.sudo {
        let password = read_sudo_password().context("Failed to read sudo password")?;
        command = elevate(&command, &password);
    }

    print_header(&config, fleet.len());

    let transport = SshTransport::new()
        .username(config.user.clone())
        .key_file(config.key.clone())
        .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
        .check_exit_status(config.check_exit_status);

    let dispatcher = FleetDispatcher::new(Arc::new(transport), fleet)
        .verbose(config.verbose)
        .quiet(config.quiet)
        .pool_size(config.pool_size)
        .tasks_per_print(config.tasks_per_print)
        .millis_per_print(config.millis_per_print);

    // Setup signal handler for graceful shutdown
    let shutdown_flag = dispatcher.shutdown_flag();
    ctrlc::set_handler(move || {
        eprintln!("\nInterrupt received, shutting down...");
        shutdown_flag.store(true, Ordering::SeqCst);
    })
    .context("Failed to set signal handler")?;

    // Echo the command as given, without any sudo rewrite
    println!("Commanding workers:\n{}\n", config.command);

    let start = now_millis();
    let report = match config.strategy {
        // Control comes back at submission; dropping the job performs the
        // shutdown wait, so the process still drains the fleet before exit
        Strategy::NoWait if !config.verbose => {
            let job = dispatcher
                .run_detached(&command)
                .context("Dispatch failed")?;
            drop(job);
            None
        }
        strategy => Some(
            dispatcher
                .run(&command, strategy)
                .context("Dispatch failed")?,
        ),
    };
    let taken = now_millis() - start;

    if let Some(report) = report {
        print_summary(&report, taken);

        if report.failed > 0 {
            info!(failed = report.failed, "Dispatch completed with failures");
        }
    }

    Ok(())
}

/// Print the resolved fleet before any filtering, so index filters can be
/// cross-checked against it.
fn print_inventory(fleet: &[fleet_exec::Worker]) {
    for worker in fleet {
        println!("# {}\t{}", worker.index, worker.host);
    }
    println!();
}

fn print_header(config: &DispatchConfig, workers: usize) {
    println!();
    println!(
        "{} {}",
        style("fleet-exec").cyan().bold(),
        env!("CARGO_PKG_VERSION")
    );
    println!("{}", style("─".repeat(50)).dim());
    println!("  {} {}", style("Workers:").bold(), workers);
    println!("  {} {}", style("Strategy:").bold(), strategy_name(config.strategy));
    println!();
}

fn print_summary(report: &DispatchReport, taken_millis: i64) {
    println!();
    println!("{}", style("Dispatch Complete").green().bold());
    println!("{}", style("─".repeat(50)).dim());
    println!(
        "  {} {}",
        style("Completed:").bold(),
        pretty::comma(report.completed)
    );
    if report.failed > 0 {
        println!(
            "  {} {}",
            style("Exceptions:").yellow().bold(),
            pretty::comma(report.failed)
        );
    }
    println!(
        "  {} {}",
        style("Duration:").bold(),
        pretty::time(taken_millis)
    );
    println!();
}

fn read_sudo_password() -> Result<String> {
    let term = Term::stderr();
    term.write_str("sudo password: ")?;
    let password = term.read_secure_line()?;
    Ok(password)
}

fn setup_logging(verbose: bool) -> Result<()> {
    let filter = if verbose {
        EnvFilter::new("fleet_exec=debug,warn")
    } else {
        EnvFilter::new("fleet_exec=info,warn")
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .init();

    Ok(())
}

fn strategy_name(strategy: Strategy) -> &'static str {
    match strategy {
        Strategy::Serial => "serial",
        Strategy::Ordered => "concurrent, fleet order",
        Strategy::NoWait => "concurrent, completion order",
    }
}
