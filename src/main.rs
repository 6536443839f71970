use std::io::Read;

use anyhow::{bail, Result};
use clap::{Parser, ValueEnum};
use colorized::{Color, Colors};
use tracing_subscriber::EnvFilter;

use mad::{
    options::{Autoscaling, Options},
    runtime::{
        report::{Csv, Log},
        Time,
    },
    Context,
};

#[derive(Clone, Copy, Debug, ValueEnum)]
enum Format {
    /// One `time,agent,metric,value` line per metric
    Csv,
    /// One aligned line per agent and period
    Log,
}

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Model file, or pass "-" to read from stdin
    #[clap(short, long, value_parser)]
    file: clio::Input,

    /// Report file, or pass "-" to write to stdout
    #[clap(short, long, value_parser, default_value = "-")]
    output: clio::Output,

    /// Virtual time at which the simulation stops
    #[clap(short, long, default_value_t = 1000)]
    until: Time,

    /// Ticks between two reports
    #[clap(short, long, default_value_t = 10)]
    period: Time,

    /// Initial number of processing units of every service
    #[clap(long, default_value_t = 1)]
    units: usize,

    /// Controller adjustments per tick
    #[clap(long, default_value_t = 0.1)]
    control_rate: f64,

    /// Scale services on utilisation, given as MIN,MAX,STEP
    #[clap(long, value_parser = parse_autoscaling)]
    autoscale: Option<Autoscaling>,

    /// Report format
    #[clap(long, value_enum, default_value_t = Format::Csv)]
    format: Format,

    /// Trace every event
    #[clap(long)]
    trace: bool,
}

fn parse_autoscaling(value: &str) -> Result<Autoscaling> {
    let parts = value
        .split(',')
        .map(|part| part.trim().parse::<f64>())
        .collect::<Result<Vec<_>, _>>()?;
    let &[min, max, step] = parts.as_slice() else {
        bail!("expected MIN,MAX,STEP but got `{}`", value);
    };
    if min > max {
        bail!("minimum utilisation {} exceeds maximum {}", min, max);
    }
    Ok(Autoscaling { min, max, step })
}

fn run(mut args: Cli) -> Result<()> {
    let filter = if args.trace {
        EnvFilter::new("mad=trace")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let mut model = String::new();
    args.file.read_to_string(&mut model)?;
    let filename = args.file.path().to_string_lossy().to_string();

    let options = Options {
        end_time: args.until,
        report_period: args.period,
        units: args.units,
        control_rate: args.control_rate,
        autoscaling: args.autoscale,
    };
    let context = Context::new()
        .set_options(options)
        .add_file(&filename, &model)?;

    match args.format {
        Format::Csv => context.simulate(&mut Csv::new(args.output)),
        Format::Log => context.simulate(&mut Log::new(args.output)),
    }
}

fn main() {
    if let Err(e) = run(Cli::parse()) {
        eprintln!("{}: {}", "error".color(Colors::RedFg), e);
        std::process::exit(1);
    }
}
