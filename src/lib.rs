//! # psrio
//! This library reads, converts and splits the files single-dish pulsar observations are
//! recorded in: SIGPROC filterbank (`.fil`) and time series (`.tim`), PRESTO time series
//! (`.dat` with its `.inf`), and PSRFITS search mode data.
//!
//! Every format is read into the same [`ObservationMetadata`], and written back out from it,
//! through the [`MetadataCodec`] of its [`Format`]. Samples are never interpreted, only moved:
//! through a [`BlockStreamer`] when they need re-blocking or byte swapping, or byte for byte
//! with a [`RawCopier`] when the two formats store them identically.
//!
//! ## Splitting
//!
//! Search codes that FFT the whole time series want power of two lengths. [`Splitter`] cuts an
//! observation into sections of the power of two number of samples nearest above a requested
//! duration. Each section is a standalone file with its own header and start time. When the
//! observation is not a whole number of sections the final one overlaps the one before it, so
//! that it is still full length.
//!
//! ```no_run
//! use psrio::{SplitOptions, Splitter};
//!
//! let splitter = Splitter::new(SplitOptions {
//!     minutes: 10.0,
//!     ..Default::default()
//! })?;
//! let report = splitter.split("B0329+54.tim".as_ref())?;
//! for section in &report.sections {
//!     println!("{} starts at MJD {}", section.path.display(), section.start_mjd);
//! }
//! # Ok::<(), psrio::Error>(())
//! ```
//!
//! ## Converting
//!
//! ```no_run
//! use psrio::{RawCopier, convert};
//!
//! let mut copier = RawCopier::new(1 << 20)?;
//! let dat = convert::tim_to_dat("B0329+54.tim".as_ref(), &mut copier)?;
//! # Ok::<(), psrio::Error>(())
//! ```
//!
//! ## Interruption
//!
//! Long running operations check [`session::request_abort`] between blocks. A program that
//! wants Ctrl-C to leave well formed files behind calls it from its signal handler; the
//! operation then returns [`Error::Interrupted`] after closing its outputs.
//!
pub mod codec;
pub mod convert;
pub mod copy;
pub mod error;
pub mod format;
pub mod metadata;
pub mod mjd;
pub mod presto;
pub mod psrfits;
pub mod session;
pub mod sigproc;
pub mod split;
pub mod stream;

pub use codec::{MetadataCodec, PayloadMode, codec_for};
pub use copy::RawCopier;
pub use error::{Error, Result};
pub use format::{Format, detect};
pub use metadata::{Band, BoundedName, ObservationMetadata, SampleDepth};
pub use split::{SplitOptions, SplitPlan, SplitReport, Splitter};
pub use stream::BlockStreamer;
