//! Splitting one observation into sections of a fixed power of two number of samples.
//!
//! The requested section length is rounded up to a power of two samples, as FFT based
//! search codes want. Every section is a complete file of the input's format, with its own
//! header and start time. When the observation is not a whole number of sections long the
//! final section is still made full length, by starting it exactly one section before the
//! end of the input. It then repeats samples already written to the section before it.

use log::{debug, info};
use std::{
    fs::File,
    io::{self, BufReader, Seek, SeekFrom},
    path::{Path, PathBuf},
};

use crate::codec::{MetadataCodec, codec_for};
use crate::error::{Error, Result};
use crate::format::{self, Format};
use crate::metadata::ObservationMetadata;
use crate::mjd::offset_mjd;
use crate::session::Session;
use crate::stream::BlockStreamer;

pub const DEFAULT_MINUTES: f64 = 30.0;
pub const DEFAULT_BLOCK_SAMPLES: u64 = 65536;
pub const DEFAULT_INFIX: &str = "t";

/// Least power of two not below `x`. Zero has none, nor has anything above 2^31.
pub fn next_power_of_two(x: u32) -> Result<u32> {
    if x == 0 {
        return Err(Error::InvalidArgument(
            "a section must hold at least one sample".into(),
        ));
    }
    x.checked_next_power_of_two().ok_or_else(|| {
        Error::InvalidArgument(format!("no power of two sample count holds {x} samples"))
    })
}

/// The arithmetic of one split, fixed before any data moves.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub struct SplitPlan {
    pub total_samples: u64,
    pub section_samples: u64,
    pub block_samples: u64,
    pub num_sections: u64,
    pub num_reads: u64,
    pub blocks_per_section: u64,
}

impl SplitPlan {
    pub fn new(
        total_samples: u64,
        minutes: f64,
        sampling_interval_ms: f64,
        block_samples: u64,
    ) -> Result<Self> {
        if !(minutes.is_finite() && minutes > 0.0) {
            return Err(Error::InvalidArgument(format!(
                "section length of {minutes} minutes"
            )));
        }
        if !(sampling_interval_ms.is_finite() && sampling_interval_ms > 0.0) {
            return Err(Error::InvalidArgument(format!(
                "sampling interval of {sampling_interval_ms} ms"
            )));
        }
        if block_samples == 0 {
            return Err(Error::InvalidArgument("block size of zero samples".into()));
        }
        if total_samples == 0 {
            return Err(Error::InvalidArgument("observation has no samples".into()));
        }

        let requested = (minutes * 60000.0 / sampling_interval_ms).round();
        if requested > u32::MAX as f64 {
            return Err(Error::InvalidArgument(format!(
                "{requested} samples per section is too many"
            )));
        }
        let section_samples = next_power_of_two(requested as u32)? as u64;

        Ok(SplitPlan {
            total_samples,
            section_samples,
            block_samples,
            num_sections: total_samples.div_ceil(section_samples),
            num_reads: total_samples.div_ceil(block_samples),
            blocks_per_section: section_samples.div_ceil(block_samples),
        })
    }

    /// Samples in every section. A lone section holds the whole observation.
    pub fn section_len(&self) -> u64 {
        if self.num_sections == 1 {
            self.total_samples
        } else {
            self.section_samples
        }
    }

    pub fn final_section(&self) -> u64 {
        self.num_sections - 1
    }

    /// True when the final section is read from one section before the end of the input.
    pub fn rewinds(&self) -> bool {
        self.num_sections >= 2
    }

    /// Samples the final section repeats from the one before it.
    pub fn overlap_samples(&self) -> u64 {
        if self.rewinds() {
            self.num_sections * self.section_samples - self.total_samples
        } else {
            0
        }
    }
}

/// Where a split is. Each transition is a method so it can be driven and tested without
/// files.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum SplitState {
    Initializing,
    Streaming { section: u64, written: u64 },
    SectionBoundary { next: u64 },
    /// About to start the final section, the source has to be repositioned first
    Rewinding { section: u64 },
    LastBlock { section: u64, written: u64 },
    Closed,
}

impl SplitState {
    /// State for the start of section `index`.
    pub fn enter(plan: &SplitPlan, index: u64) -> SplitState {
        if plan.rewinds() && index == plan.final_section() {
            SplitState::Rewinding { section: index }
        } else {
            SplitState::Streaming {
                section: index,
                written: 0,
            }
        }
    }

    /// Samples to ask for next. Never more than a block, never past the end of the section.
    pub fn request(&self, plan: &SplitPlan) -> u64 {
        match *self {
            SplitState::Streaming { section, written } => plan
                .block_samples
                .min(plan.section_len() - written),
            _ => 0,
        }
    }

    /// Transition after a block of `read` samples was appended to the current section.
    pub fn after_block(self, plan: &SplitPlan, read: u64) -> SplitState {
        let SplitState::Streaming { section, written } = self else {
            return self;
        };
        let requested = self.request(plan);
        let written = written + read;
        let full = written == plan.section_len();
        if read < requested || (full && section == plan.final_section()) {
            SplitState::LastBlock { section, written }
        } else if full {
            SplitState::SectionBoundary { next: section + 1 }
        } else {
            SplitState::Streaming { section, written }
        }
    }

    /// Transition once the source sits one section before its end.
    pub fn after_rewind(self) -> SplitState {
        match self {
            SplitState::Rewinding { section } => SplitState::Streaming {
                section,
                written: 0,
            },
            other => other,
        }
    }
}

#[derive(Clone, PartialEq, Debug)]
pub struct SplitOptions {
    pub minutes: f64,
    pub block_samples: u64,
    /// Put between the input's stem and the section number
    pub infix: String,
    /// Defaults to the current directory
    pub output_dir: Option<PathBuf>,
}

impl Default for SplitOptions {
    fn default() -> Self {
        SplitOptions {
            minutes: DEFAULT_MINUTES,
            block_samples: DEFAULT_BLOCK_SAMPLES,
            infix: DEFAULT_INFIX.to_string(),
            output_dir: None,
        }
    }
}

#[derive(Clone, PartialEq, Debug)]
pub struct SectionReport {
    pub path: PathBuf,
    pub samples_written: u64,
    pub start_mjd: f64,
}

#[derive(Clone, PartialEq, Debug)]
pub struct SplitReport {
    pub plan: SplitPlan,
    pub sections: Vec<SectionReport>,
    pub rewound: bool,
}

impl SplitReport {
    pub fn samples_written(&self) -> u64 {
        self.sections.iter().map(|s| s.samples_written).sum()
    }
}

/// `<stem>.<infix><index>.<ext>` in `output_dir`.
pub fn section_path(
    input: &Path,
    output_dir: Option<&Path>,
    infix: &str,
    index: u64,
) -> Result<PathBuf> {
    let stem = input
        .file_stem()
        .ok_or_else(|| Error::InvalidArgument(format!("{} has no file name", input.display())))?;
    let mut name = stem.to_os_string();
    name.push(format!(".{infix}{index}"));
    if let Some(ext) = input.extension() {
        name.push(".");
        name.push(ext);
    }
    Ok(match output_dir {
        Some(dir) => dir.join(name),
        None => PathBuf::from(name),
    })
}

pub struct Splitter {
    options: SplitOptions,
}

impl Splitter {
    pub fn new(options: SplitOptions) -> Result<Self> {
        if options.infix.contains(std::path::is_separator) {
            return Err(Error::InvalidArgument(format!(
                "infix {:?} contains a path separator",
                options.infix
            )));
        }
        Ok(Splitter { options })
    }

    pub fn plan(&self, meta: &ObservationMetadata) -> Result<SplitPlan> {
        SplitPlan::new(
            meta.time_samples,
            self.options.minutes,
            meta.sampling_interval_ms,
            self.options.block_samples,
        )
    }

    pub fn split(&self, input: &Path) -> Result<SplitReport> {
        let format = format::detect(input)?;
        if !matches!(
            format,
            Format::Filterbank | Format::PrestoTim | Format::PrestoDat
        ) {
            return Err(Error::InvalidArgument(format!(
                "{}: {format} files cannot be split, convert to filterbank first",
                input.display()
            )));
        }
        let codec = codec_for(format);
        let meta = codec.read(input)?;
        let plan = self.plan(&meta)?;
        info!(
            "{}: {} samples into {} sections of {} samples",
            input.display(),
            plan.total_samples,
            plan.num_sections,
            plan.section_samples
        );

        let streamer = BlockStreamer::new(
            meta.depth,
            meta.num_channels,
            plan.block_samples.min(plan.section_samples),
        )?;
        let mut session = Session::new(streamer);
        let mut source = BufReader::new(File::open(input).map_err(Error::Read)?);
        source
            .seek(SeekFrom::Start(meta.header_len))
            .map_err(Error::Read)?;
        let payload_end = meta.header_len + meta.data_size_bytes;

        let mut report = SplitReport {
            plan,
            sections: Vec::with_capacity(plan.num_sections as usize),
            rewound: false,
        };
        let mut state = SplitState::Initializing;
        loop {
            state = match state {
                SplitState::Initializing => SplitState::enter(&plan, 0),
                SplitState::Rewinding { .. } => {
                    let target = payload_end - session.streamer().bytes_for(plan.section_samples)?;
                    let cursor = source.stream_position().map_err(Error::Read)?;
                    if target < cursor {
                        info!(
                            "Final section repeats the last {} samples of the one before",
                            plan.overlap_samples()
                        );
                    }
                    source.seek(SeekFrom::Start(target)).map_err(Error::Read)?;
                    report.rewound = true;
                    state.after_rewind()
                }
                SplitState::Streaming { section, written } => {
                    if written == 0 {
                        let opened = self.open_section(
                            input,
                            codec.as_ref(),
                            &meta,
                            &plan,
                            section,
                            &mut session,
                        )?;
                        report.sections.push(opened);
                    }
                    let read = session.transfer(&mut source, state.request(&plan))?;
                    if let Some(current) = report.sections.last_mut() {
                        current.samples_written += read;
                    }
                    state.after_block(&plan, read)
                }
                SplitState::SectionBoundary { next } => {
                    session.close_output()?;
                    SplitState::enter(&plan, next)
                }
                SplitState::LastBlock { section, written } => {
                    session.close_output()?;
                    let expected = plan.section_len();
                    if section != plan.final_section() || written != expected {
                        return Err(Error::Read(io::Error::new(
                            io::ErrorKind::UnexpectedEof,
                            format!(
                                "{} ended in section {section} after {written} of {expected} samples",
                                input.display()
                            ),
                        )));
                    }
                    SplitState::Closed
                }
                SplitState::Closed => break,
            };
        }
        Ok(report)
    }

    /// Writes the header of section `index` and makes its payload the session's output.
    fn open_section(
        &self,
        input: &Path,
        codec: &dyn MetadataCodec,
        meta: &ObservationMetadata,
        plan: &SplitPlan,
        index: u64,
        session: &mut Session,
    ) -> Result<SectionReport> {
        let path = section_path(
            input,
            self.options.output_dir.as_deref(),
            &self.options.infix,
            index,
        )?;
        let start_mjd = offset_mjd(
            meta.start_mjd,
            index * plan.section_samples,
            meta.sampling_interval_ms,
        );
        let section = meta
            .for_section(plan.section_len(), start_mjd)
            .map_err(|e| Error::from_metadata(&path, e))?;
        codec.write(&path, &section)?;
        let file = codec.open_payload(&path)?;
        session.open_output(&path, file)?;
        debug!("Section {index} starts at MJD {start_mjd:.10}");
        Ok(SectionReport {
            path,
            samples_written: 0,
            start_mjd,
        })
    }
}
