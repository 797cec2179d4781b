//! `kinfit` command-line interface.
//!
//! ```bash
//! kinfit run --events events.json --config cuts.toml --output candidates.json
//! kinfit cuts --config cuts.toml --finders k0s,d0
//! ```

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use kinfit::{
    cut_table,
    io::{read_events, write_json, ConfigTable},
    Analysis, EventCandidates, MassHistograms, Observer, RunReport,
};

const ALL_FINDERS: &str = "k0s,lambda,d0,dstar,conversion";

/// Reconstruct K0s, Lambda, D0 and D* decays and photon conversions with constrained kinematic
/// fits.
#[derive(Parser, Debug)]
#[command(name = "kinfit", version, about)]
struct Cli {
    /// Log level (trace, debug, info, warn, error).
    #[arg(long, global = true, default_value = "warn")]
    log_level: tracing::Level,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the finders over a JSON file of events.
    Run(RunArgs),
    /// Print every registered cut and its current value as TOML.
    Cuts {
        /// TOML file with one table per finder.
        #[arg(short, long, value_name = "FILE")]
        config: Option<String>,

        /// Comma-separated list of finders.
        #[arg(long, value_delimiter = ',', default_value = ALL_FINDERS)]
        finders: Vec<String>,
    },
}

#[derive(Args, Debug)]
struct RunArgs {
    /// JSON array of events.
    #[arg(short, long, value_name = "FILE")]
    events: String,

    /// TOML file with one table per finder.
    #[arg(short, long, value_name = "FILE")]
    config: Option<String>,

    /// Where to write the candidates and summaries (stdout if omitted).
    #[arg(short, long, value_name = "FILE")]
    output: Option<String>,

    /// Also write signal/background mass histograms to this file.
    #[arg(long, value_name = "FILE")]
    histograms: Option<String>,

    /// Number of bins of each mass histogram.
    #[arg(long, default_value_t = 100)]
    bins: usize,

    /// Worker threads (1 processes events serially).
    #[arg(long, default_value_t = num_cpus::get())]
    threads: usize,

    /// Comma-separated list of finders.
    #[arg(long, value_delimiter = ',', default_value = ALL_FINDERS)]
    finders: Vec<String>,
}

fn build_analysis(finders: &[String], config: Option<&str>) -> anyhow::Result<Analysis> {
    let mut analysis = Analysis::from_names(finders)?;
    if let Some(path) = config {
        let table = ConfigTable::read(path).with_context(|| format!("reading configuration {path}"))?;
        analysis.configure(&table)?;
        tracing::info!(path, "configuration applied");
    }
    Ok(analysis)
}

fn process(
    analysis: &mut Analysis,
    events: &[kinfit::Event],
    observer: &mut dyn Observer,
    threads: usize,
) -> anyhow::Result<Vec<EventCandidates>> {
    if threads > 1 {
        #[cfg(feature = "rayon")]
        {
            rayon::ThreadPoolBuilder::new()
                .num_threads(threads)
                .build_global()
                .map_err(kinfit::KinFitError::from)?;
            return Ok(analysis.par_process(events, observer)?);
        }
        #[cfg(not(feature = "rayon"))]
        tracing::warn!(threads, "built without rayon, processing serially");
    }
    Ok(analysis.process(events, observer)?)
}

fn run(args: RunArgs) -> anyhow::Result<()> {
    let mut analysis = build_analysis(&args.finders, args.config.as_deref())?;
    let events = read_events(&args.events).with_context(|| format!("reading events {}", args.events))?;
    let mut histograms = MassHistograms::new(args.bins);
    analysis.book(&mut histograms);
    tracing::info!(n_events = events.len(), threads = args.threads, "processing");
    let candidates = process(&mut analysis, &events, &mut histograms, args.threads)?;
    let summaries = analysis.terminate(&mut histograms);
    let report = RunReport::new(&events, candidates, summaries);
    match &args.output {
        Some(path) => {
            write_json(path, &report)?;
            tracing::info!(path = %path, events = report.events.len(), "wrote candidates");
        }
        None => println!("{}", serde_json::to_string_pretty(&report)?),
    }
    if let Some(path) = &args.histograms {
        write_json(path, &histograms)?;
    }
    eprint!("{}", report.summary_table());
    Ok(())
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    tracing_subscriber::fmt()
        .with_max_level(cli.log_level)
        .with_target(false)
        .init();
    match cli.command {
        Command::Run(args) => run(args),
        Command::Cuts { config, finders } => {
            let analysis = build_analysis(&finders, config.as_deref())?;
            print!("{}", cut_table(&analysis));
            Ok(())
        }
    }
}
