//! # psrio
//!
//! Command line front end of the psrio library.
//!
//! ```bash
//! # Split into sections of at least 10 minutes
//! psrio split -t 10 -o sections/ B0329+54.tim
//!
//! # Time series conversions, any number of files
//! psrio tim2dat *.tim
//! psrio dat2tim *.dat
//!
//! # Join PSRFITS search mode files into one filterbank file
//! psrio fits2fil -o obs.fil obs_0001.fits obs_0002.fits
//!
//! # Show what a file holds
//! psrio meta obs.fil
//! ```

use clap::Parser;

mod cli;

fn main() -> anyhow::Result<()> {
    let cli = cli::Cli::parse();

    let log_level = match cli.verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(log_level)).init();
    cli::install_interrupt_handler()?;

    cli::run(cli)
}
