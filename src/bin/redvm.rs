// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright 2026 Tobias Sarnowski

//! Command-line driver for the graph-reduction machine.

use std::io::Read as _;
use std::path::PathBuf;

use clap::Parser;
use redvm::machine::{MachineConfig, Outcome};
use redvm::platform::StdPlatform;
use redvm::{Machine, Report};

/// Run a compiled template program to normal form.
#[derive(Parser, Debug)]
#[command(version = redvm::VERSION, about)]
struct Cli {
    /// Template source file, or `-` to read from standard input.
    source: PathBuf,

    /// Print the execution report (ticks, PRS rate, GC count) instead of
    /// the bare result.
    #[arg(short, long)]
    verbose: bool,

    /// Trace `ld32`/`st32` primitive calls to standard error.
    #[arg(short, long)]
    trace: bool,

    #[arg(long, default_value_t = MachineConfig::default().max_heap_apps)]
    max_heap_apps: usize,

    #[arg(long, default_value_t = MachineConfig::default().max_stack)]
    max_stack: usize,

    #[arg(long, default_value_t = MachineConfig::default().max_templates)]
    max_templates: usize,
}

fn read_source(path: &PathBuf) -> anyhow::Result<String> {
    if path.as_os_str() == "-" {
        let mut buf = String::new();
        std::io::stdin().read_to_string(&mut buf)?;
        Ok(buf)
    } else {
        Ok(std::fs::read_to_string(path)?)
    }
}

#[expect(
    clippy::cast_precision_loss,
    reason = "percentage display of tick counters, not an exact quantity"
)]
fn print_report(report: &Report) {
    let c = &report.counters;
    let ticks = c.ticks().max(1);
    let pct = |n: u64| 100.0 * n as f64 / ticks as f64;
    println!("EXECUTION REPORT");
    match report.outcome {
        Outcome::Result(n) => println!("Result:   {n}"),
        Outcome::Halted => println!("Result:   (halted by ld32)"),
    }
    println!("Ticks:    {ticks}");
    println!("Swap:     {:.2}%", pct(c.swap));
    println!("Prim:     {:.2}%", pct(c.prim));
    println!("Unwind:   {:.2}%", pct(c.unwind));
    println!("Update:   {:.2}%", pct(c.update));
    println!("Apply:    {:.2}%", pct(c.apply));
    println!(
        "PRS Success: {:.2}%",
        100.0 * c.prs_success as f64 / (1 + c.prs_candidate) as f64
    );
    println!("#GCs:     {}", report.gc_count);
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let src = read_source(&cli.source)?;
    let code = redvm::template::parse(&src)?;
    if code.is_empty() {
        anyhow::bail!("program contains no templates");
    }
    tracing::debug!(templates = code.len(), "parsed program");

    let config = MachineConfig {
        max_heap_apps: cli.max_heap_apps,
        max_stack: cli.max_stack,
        max_templates: cli.max_templates,
        ..MachineConfig::default()
    };

    let mut platform = StdPlatform;
    let mut machine = Machine::new(code, config, &mut platform, cli.trace)?;
    let report = machine.run()?;

    if cli.verbose {
        print_report(&report);
    } else if let Outcome::Result(n) = report.outcome {
        println!("{n}");
    }

    Ok(())
}
