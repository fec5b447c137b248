//! Conversions between formats, and the policy for commands that take many files.

use log::{error, info, warn};
use std::{
    fs::File,
    io::{BufReader, BufWriter, SeekFrom, Write},
    path::{Path, PathBuf},
};

use crate::codec::{MetadataCodec, codec_for};
use crate::copy::RawCopier;
use crate::error::{Error, Result};
use crate::format::{self, Format};
use crate::metadata::{ObservationMetadata, SampleDepth};
use crate::presto::PrestoDatCodec;
use crate::psrfits::{PsrFitsCodec, PsrFitsLayout};
use crate::session::Session;
use crate::sigproc::SigprocCodec;
use crate::stream::{BlockStreamer, Endian, ReadSeek};

/// Outcome of running one operation over several files.
#[derive(Debug, Default)]
pub struct BatchReport {
    pub succeeded: usize,
    pub failed: Vec<(PathBuf, Error)>,
}

impl BatchReport {
    pub fn interrupted(&self) -> bool {
        self.failed
            .iter()
            .any(|(_, e)| matches!(e, Error::Interrupted))
    }
}

/// Runs `op` on every input in turn. A failure only ends the run when it is an interruption.
pub fn for_each_file<F>(inputs: &[PathBuf], mut op: F) -> BatchReport
where
    F: FnMut(&Path) -> Result<()>,
{
    let mut report = BatchReport::default();
    for input in inputs {
        match op(input) {
            Ok(()) => report.succeeded += 1,
            Err(Error::Interrupted) => {
                warn!("Interrupted while processing {}", input.display());
                report.failed.push((input.clone(), Error::Interrupted));
                break;
            }
            Err(e) => {
                error!("{}: {e}", input.display());
                report.failed.push((input.clone(), e));
            }
        }
    }
    report
}

fn expect_format(path: &Path, expected: Format) -> Result<()> {
    let found = format::detect(path)?;
    if found != expected {
        return Err(Error::InvalidArgument(format!(
            "{}: expected a {expected} file, found {found}",
            path.display()
        )));
    }
    Ok(())
}

fn copy_payload(
    copier: &mut RawCopier,
    input: &Path,
    meta: &ObservationMetadata,
    codec: &dyn MetadataCodec,
    output: &Path,
) -> Result<()> {
    codec.write(output, meta)?;
    let mut payload = BufWriter::new(codec.open_payload(output)?);
    copier.copy(input, meta.header_len, &mut payload)?;
    payload.flush().map_err(Error::Write)
}

/// SIGPROC `.tim` to PRESTO `.dat` and `.inf`, next to the input. Returns the `.dat` path.
pub fn tim_to_dat(input: &Path, copier: &mut RawCopier) -> Result<PathBuf> {
    expect_format(input, Format::PrestoTim)?;
    let meta = codec_for(Format::PrestoTim).read(input)?;
    if meta.num_channels != 1 || meta.depth != SampleDepth::Bits32 {
        return Err(Error::InvalidArgument(format!(
            "{}: {} channels of {} bits, PRESTO needs one channel of 32-bit floats",
            input.display(),
            meta.num_channels,
            meta.num_bits()
        )));
    }
    let output = input.with_extension(Format::PrestoDat.extension());
    copy_payload(copier, input, &meta, &PrestoDatCodec, &output)?;
    info!("{} -> {}", input.display(), output.display());
    Ok(output)
}

/// PRESTO `.dat` (or its `.inf`) to SIGPROC `.tim`, next to the input. Returns the `.tim` path.
pub fn dat_to_tim(input: &Path, copier: &mut RawCopier) -> Result<PathBuf> {
    let input = PrestoDatCodec.payload_path(input);
    expect_format(&input, Format::PrestoDat)?;
    let meta = PrestoDatCodec.read(&input)?;
    let output = input.with_extension(Format::PrestoTim.extension());
    copy_payload(
        copier,
        &input,
        &meta,
        &SigprocCodec::new(Format::PrestoTim),
        &output,
    )?;
    info!("{} -> {}", input.display(), output.display());
    Ok(output)
}

#[derive(Debug)]
pub struct FitsToFilReport {
    pub output: PathBuf,
    pub converted: Vec<PathBuf>,
    /// Inputs that failed before anything was written
    pub skipped: Vec<(PathBuf, Error)>,
    pub time_samples: u64,
}

/// Everything after the first input must match it in these.
#[derive(PartialEq, Debug)]
struct Shape {
    depth: SampleDepth,
    nchans: u32,
    nsblk: u32,
    sampling_interval_ms: f64,
}

impl Shape {
    fn of(meta: &ObservationMetadata, layout: &PsrFitsLayout) -> Self {
        Shape {
            depth: layout.depth,
            nchans: layout.nchans,
            nsblk: layout.nsblk,
            sampling_interval_ms: meta.sampling_interval_ms,
        }
    }
}

/// State of a PSRFITS to filterbank run once the output header exists.
struct FilOutput {
    session: Session,
    shape: Shape,
}

/// Appends the samples of every PSRFITS input, in order, to one filterbank file.
///
/// The filterbank header comes from the first input that can be read. Inputs that fail
/// before then are skipped. Once the header is written any failure ends the run, since the
/// output would otherwise have a gap.
pub fn fits_to_fil(inputs: &[PathBuf], output: &Path) -> Result<FitsToFilReport> {
    let reader = PsrFitsCodec::default();
    let mut report = FitsToFilReport {
        output: output.to_path_buf(),
        converted: Vec::new(),
        skipped: Vec::new(),
        time_samples: 0,
    };
    let mut fil: Option<FilOutput> = None;

    for input in inputs {
        let opened = expect_format(input, Format::PsrFits)
            .and_then(|()| reader.read_layout(input));
        let (meta, layout) = match (opened, &fil) {
            (Ok(read), _) => read,
            (Err(e), None) => {
                warn!("Skipping {}: {e}", input.display());
                report.skipped.push((input.clone(), e));
                continue;
            }
            (Err(e), Some(_)) => return Err(e),
        };

        let out = match fil {
            Some(ref mut out) => {
                let shape = Shape::of(&meta, &layout);
                if shape != out.shape {
                    return Err(Error::InvalidArgument(format!(
                        "{}: {:?} does not match the first input's {:?}",
                        input.display(),
                        shape,
                        out.shape
                    )));
                }
                out
            }
            None => fil.insert(open_fil(output, &meta, &layout)?),
        };

        let mut source = BufReader::new(File::open(input).map_err(Error::Read)?);
        append_rows(&mut out.session, &mut source, &layout)?;
        report.time_samples += layout.time_samples();
        report.converted.push(input.clone());
        info!(
            "{}: appended {} samples",
            input.display(),
            layout.time_samples()
        );
    }

    match fil {
        Some(mut out) => {
            out.session.close_output()?;
            Ok(report)
        }
        None => Err(Error::InvalidArgument(
            "none of the inputs could be read".into(),
        )),
    }
}

fn open_fil(
    output: &Path,
    meta: &ObservationMetadata,
    layout: &PsrFitsLayout,
) -> Result<FilOutput> {
    let codec = codec_for(Format::Filterbank);
    codec.write(output, meta)?;
    let file = codec.open_payload(output)?;
    let streamer = BlockStreamer::new(layout.depth, layout.nchans, layout.nsblk as u64)?;
    let mut session = Session::new(streamer).with_reencoding(Endian::Big, Endian::Little);
    session.open_output(output, file)?;
    Ok(FilOutput {
        session,
        shape: Shape::of(meta, layout),
    })
}

/// Copies the DATA cell of every SUBINT row, skipping the other columns.
fn append_rows(
    session: &mut Session,
    source: &mut dyn ReadSeek,
    layout: &PsrFitsLayout,
) -> Result<()> {
    for row in 0..layout.rows {
        source
            .seek(SeekFrom::Start(layout.data_start(row)))
            .map_err(Error::Read)?;
        session.transfer_exact(source, layout.nsblk as u64)?;
    }
    Ok(())
}
