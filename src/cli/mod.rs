use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use log::{info, warn};
use std::path::{Path, PathBuf};

use psrio::convert::{self, BatchReport};
use psrio::{RawCopier, SplitOptions, Splitter, codec_for, copy::DEFAULT_BUFFER_BYTES, detect};

mod config;

use config::Config;

/// Read, convert and split pulsar observation files
#[derive(Parser)]
#[command(name = "psrio")]
#[command(author, version, about, long_about = None, disable_version_flag = true)]
pub struct Cli {
    /// Print version
    #[arg(short = 'v', long = "version", action = clap::ArgAction::Version)]
    _version: Option<bool>,

    /// More output, repeat for more (--verbose for info, twice for debug)
    #[arg(long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Settings file, overridden by flags
    #[arg(long, value_name = "FILE", global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Split an observation into power of two length sections
    Split {
        /// Requested section length in minutes [default: 30]
        #[arg(short = 't', long = "time", value_name = "MINUTES")]
        minutes: Option<f64>,

        /// Directory for the sections [default: current directory]
        #[arg(short = 'o', long = "output-dir", value_name = "DIR")]
        output_dir: Option<PathBuf>,

        /// Put between the file stem and the section number [default: t]
        #[arg(long)]
        infix: Option<String>,

        /// Samples moved per read [default: 65536]
        #[arg(long, value_name = "N")]
        block_samples: Option<u64>,

        #[arg(value_name = "FILE")]
        input: PathBuf,
    },

    /// Convert SIGPROC .tim time series to PRESTO .dat and .inf
    Tim2dat {
        #[arg(value_name = "FILE", required = true)]
        inputs: Vec<PathBuf>,
    },

    /// Convert PRESTO .dat time series to SIGPROC .tim
    Dat2tim {
        #[arg(value_name = "FILE", required = true)]
        inputs: Vec<PathBuf>,
    },

    /// Append PSRFITS files, in order, into one filterbank file
    Fits2fil {
        /// Output file [default: first input with a .fil extension]
        #[arg(short = 'o', long = "output", value_name = "OUT")]
        output: Option<PathBuf>,

        #[arg(value_name = "FILE", required = true)]
        inputs: Vec<PathBuf>,
    },

    /// Print the metadata of observation files
    Meta {
        #[arg(value_name = "FILE", required = true)]
        inputs: Vec<PathBuf>,
    },
}

/// Ctrl-C asks the running operation to stop after its current block, so the files it has
/// open are flushed and closed. A second Ctrl-C changes nothing.
pub fn install_interrupt_handler() -> Result<()> {
    ctrlc::set_handler(on_interrupt).context("Failed to install interrupt handler")
}

fn on_interrupt() {
    if !psrio::session::abort_requested() {
        warn!("Interrupted, stopping after the current block");
    }
    psrio::session::request_abort();
}

pub fn run(cli: Cli) -> Result<()> {
    let config = match &cli.config {
        Some(path) => Config::from_file(path)?,
        None => Config::default(),
    };
    let buffer_bytes = config.copy.buffer_bytes.unwrap_or(DEFAULT_BUFFER_BYTES);

    match cli.command {
        Commands::Split {
            minutes,
            output_dir,
            infix,
            block_samples,
            input,
        } => {
            let defaults = SplitOptions::default();
            let options = SplitOptions {
                minutes: minutes.or(config.split.minutes).unwrap_or(defaults.minutes),
                block_samples: block_samples
                    .or(config.split.block_samples)
                    .unwrap_or(defaults.block_samples),
                infix: infix.or(config.split.infix).unwrap_or(defaults.infix),
                output_dir: output_dir.or(config.split.output_dir),
            };
            run_split(&input, options)
        }
        Commands::Tim2dat { inputs } => {
            let mut copier = RawCopier::new(buffer_bytes)?;
            let report = convert::for_each_file(&inputs, |input| {
                convert::tim_to_dat(input, &mut copier).map(|_| ())
            });
            finish_batch("tim2dat", &inputs, report)
        }
        Commands::Dat2tim { inputs } => {
            let mut copier = RawCopier::new(buffer_bytes)?;
            let report = convert::for_each_file(&inputs, |input| {
                convert::dat_to_tim(input, &mut copier).map(|_| ())
            });
            finish_batch("dat2tim", &inputs, report)
        }
        Commands::Fits2fil { output, inputs } => {
            let output = match output {
                Some(output) => output,
                None => inputs
                    .first()
                    .map(|input| input.with_extension("fil"))
                    .context("No input files")?,
            };
            run_fits2fil(&inputs, &output)
        }
        Commands::Meta { inputs } => {
            let report = convert::for_each_file(&inputs, |input| {
                let format = detect(input)?;
                let meta = codec_for(format).read(input)?;
                println!("{} ({format})", input.display());
                println!("{meta}");
                println!();
                Ok(())
            });
            finish_batch("meta", &inputs, report)
        }
    }
}

fn run_split(input: &Path, options: SplitOptions) -> Result<()> {
    let splitter = Splitter::new(options)?;
    let report = splitter
        .split(input)
        .with_context(|| format!("Failed to split {}", input.display()))?;
    for section in &report.sections {
        println!(
            "{}: {} samples from MJD {:.10}",
            section.path.display(),
            section.samples_written,
            section.start_mjd
        );
    }
    if report.rewound && report.plan.overlap_samples() > 0 {
        println!(
            "Final section overlaps the previous one by {} samples",
            report.plan.overlap_samples()
        );
    }
    Ok(())
}

fn run_fits2fil(inputs: &[PathBuf], output: &Path) -> Result<()> {
    let report = convert::fits_to_fil(inputs, output)
        .with_context(|| format!("Failed to write {}", output.display()))?;
    info!(
        "{} samples from {} files",
        report.time_samples,
        report.converted.len()
    );
    println!("{}", report.output.display());
    if !report.skipped.is_empty() {
        bail!(
            "{} of {} inputs were skipped",
            report.skipped.len(),
            inputs.len()
        );
    }
    Ok(())
}

fn finish_batch(command: &str, inputs: &[PathBuf], report: BatchReport) -> Result<()> {
    info!("{command}: {} of {} files done", report.succeeded, inputs.len());
    if report.interrupted() {
        bail!("{command} interrupted");
    }
    if !report.failed.is_empty() {
        bail!("{} of {} files failed", report.failed.len(), inputs.len());
    }
    Ok(())
}
