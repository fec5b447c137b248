use std::fmt;
use thiserror::Error;

/// Longest site or source name any of the supported headers can carry.
pub const MAX_NAME_LEN: usize = 64;

#[derive(Error, Debug, PartialEq)]
pub enum MetadataError {
    #[error("Missing field {0} in header")]
    MissingField(&'static str),
    #[error("Field {0} was present in header, but was of unexpected type")]
    WrongTypeField(&'static str),
    #[error("{0} bits per sample represents no supported sample depth")]
    WrongSampleDepth(i64),
    #[error("Name {0:?} is longer than {MAX_NAME_LEN} bytes")]
    NameTooLong(String),
    #[error("{0}")]
    Invariant(String),
}

/// Number of bits each stored sample occupies.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum SampleDepth {
    /// Two samples packed into every byte
    Bits4,
    Bits8,
    Bits16,
    /// Stored as IEEE 754 single precision by SIGPROC and PRESTO
    Bits32,
}

impl SampleDepth {
    pub fn from_bits(bits: i64) -> Result<Self, MetadataError> {
        Ok(match bits {
            4 => Self::Bits4,
            8 => Self::Bits8,
            16 => Self::Bits16,
            32 => Self::Bits32,
            _ => return Err(MetadataError::WrongSampleDepth(bits)),
        })
    }

    pub fn bits(&self) -> u32 {
        match *self {
            SampleDepth::Bits4 => 4,
            SampleDepth::Bits8 => 8,
            SampleDepth::Bits16 => 16,
            SampleDepth::Bits32 => 32,
        }
    }

    /// Bytes per sample, fractional for packed depths.
    pub fn sample_byte_size(&self) -> f32 {
        self.bits() as f32 / 8.0
    }

    /// Number of time samples of `channels` channels held in `payload_bytes`, if whole.
    pub fn samples_in(&self, payload_bytes: u64, channels: u32) -> Option<u64> {
        let per_sample = channels as u64 * self.bits() as u64;
        let bits = payload_bytes.checked_mul(8)?;
        (per_sample != 0 && bits % per_sample == 0).then(|| bits / per_sample)
    }

    /// Exact payload length of `samples` time samples, if it is a whole number of bytes.
    pub fn payload_bytes(&self, samples: u64, channels: u32) -> Option<u64> {
        let bits = samples
            .checked_mul(channels as u64)?
            .checked_mul(self.bits() as u64)?;
        (bits % 8 == 0).then_some(bits / 8)
    }
}

/// Site or source name, bounded so that every header format can hold it.
#[derive(Clone, PartialEq, Eq, Debug, Default)]
pub struct BoundedName(String);

impl BoundedName {
    pub fn new(name: impl Into<String>) -> Result<Self, MetadataError> {
        let name = name.into();
        if name.len() > MAX_NAME_LEN {
            return Err(MetadataError::NameTooLong(name));
        }
        Ok(BoundedName(name))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for BoundedName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Frequency coverage of the observation. Frequencies are the centres of the edge channels, in MHz.
#[derive(Copy, Clone, PartialEq, Debug)]
pub struct Band {
    pub centre_mhz: f32,
    /// Always `num_channels * channel_bandwidth_mhz`
    pub bandwidth_mhz: f32,
    /// Absolute channel width
    pub channel_bandwidth_mhz: f32,
    pub min_mhz: f32,
    pub max_mhz: f32,
    /// True when the first stored channel is the highest frequency
    pub flipped: bool,
}

impl Band {
    /// SIGPROC convention: frequency of the first stored channel and signed channel offset.
    /// A negative offset means the band is stored highest frequency first.
    pub fn from_first_channel(fch1: f64, foff: f64, num_channels: u32) -> Band {
        let channel_bandwidth_mhz = foff.abs() as f32;
        let fch1 = fch1 as f32;
        let span = num_channels.saturating_sub(1) as f32 * channel_bandwidth_mhz;
        let flipped = foff < 0.0;
        let (min_mhz, max_mhz) = if flipped {
            (fch1 - span, fch1)
        } else {
            (fch1, fch1 + span)
        };
        Band {
            centre_mhz: min_mhz + (max_mhz - min_mhz) / 2.0,
            bandwidth_mhz: num_channels as f32 * channel_bandwidth_mhz,
            channel_bandwidth_mhz,
            min_mhz,
            max_mhz,
            flipped,
        }
    }

    /// PSRFITS convention: centre frequency, channel width and an explicit orientation.
    pub fn from_centre(centre_mhz: f32, channel_bw: f32, num_channels: u32, flipped: bool) -> Band {
        let channel_bandwidth_mhz = channel_bw.abs();
        let half_span = num_channels.saturating_sub(1) as f32 * channel_bandwidth_mhz / 2.0;
        Band {
            centre_mhz,
            bandwidth_mhz: num_channels as f32 * channel_bandwidth_mhz,
            channel_bandwidth_mhz,
            min_mhz: centre_mhz - half_span,
            max_mhz: centre_mhz + half_span,
            flipped,
        }
    }

    /// Inverse of [`Band::from_first_channel`]: `(fch1, foff)`.
    pub fn first_channel(&self) -> (f64, f64) {
        if self.flipped {
            (self.max_mhz as f64, -(self.channel_bandwidth_mhz as f64))
        } else {
            (self.min_mhz as f64, self.channel_bandwidth_mhz as f64)
        }
    }

    /// Channel width with the sign PSRFITS and SIGPROC use to encode orientation.
    pub fn signed_channel_bandwidth(&self) -> f32 {
        if self.flipped {
            -self.channel_bandwidth_mhz
        } else {
            self.channel_bandwidth_mhz
        }
    }
}

/// Beam switching schedule. All zero when the observation did not switch beams.
#[derive(Copy, Clone, PartialEq, Debug, Default)]
pub struct BeamFlip {
    pub interval_s: f64,
    pub sections: u32,
    pub next_s: f64,
}

/// Format independent description of one observation file.
#[derive(Clone, PartialEq, Debug)]
pub struct ObservationMetadata {
    pub site: BoundedName,
    pub source_name: BoundedName,
    /// MJD of the first sample
    pub start_mjd: f64,
    pub sampling_interval_ms: f64,
    pub band: Band,
    pub num_channels: u32,
    pub num_good_channels: u32,
    pub num_ifs: u32,
    pub depth: SampleDepth,
    pub time_samples: u64,
    /// Length of the sample payload in bytes
    pub data_size_bytes: u64,
    /// Offset of the first payload byte in the file holding the payload
    pub header_len: u64,
    pub beam_flip: BeamFlip,
    pub num_bad_times: u32,
}

impl ObservationMetadata {
    pub fn num_bits(&self) -> u32 {
        self.depth.bits()
    }

    pub fn sample_byte_size(&self) -> f32 {
        self.depth.sample_byte_size()
    }

    pub fn duration_s(&self) -> f64 {
        self.time_samples as f64 * self.sampling_interval_ms / 1e3
    }

    pub fn validate(&self) -> Result<(), MetadataError> {
        if self.num_channels == 0 {
            return Err(MetadataError::Invariant("number of channels is zero".into()));
        }
        if !(self.sampling_interval_ms.is_finite() && self.sampling_interval_ms > 0.0) {
            return Err(MetadataError::Invariant(format!(
                "sampling interval {} ms is not positive",
                self.sampling_interval_ms
            )));
        }
        if self.num_good_channels > self.num_channels {
            return Err(MetadataError::Invariant(format!(
                "{} good channels out of {}",
                self.num_good_channels, self.num_channels
            )));
        }
        if !(self.band.min_mhz <= self.band.max_mhz) {
            return Err(MetadataError::Invariant(format!(
                "lowest frequency {} MHz above highest {} MHz",
                self.band.min_mhz, self.band.max_mhz
            )));
        }
        let expected = self
            .depth
            .payload_bytes(self.time_samples, self.num_channels);
        if expected != Some(self.data_size_bytes) {
            return Err(MetadataError::Invariant(format!(
                "{} samples of {} channels at {} bits do not fill {} payload bytes",
                self.time_samples,
                self.num_channels,
                self.num_bits(),
                self.data_size_bytes
            )));
        }
        Ok(())
    }

    /// Copy describing one section of this observation: only the sample count,
    /// payload size and start time change.
    pub fn for_section(&self, time_samples: u64, start_mjd: f64) -> Result<Self, MetadataError> {
        let data_size_bytes = self
            .depth
            .payload_bytes(time_samples, self.num_channels)
            .ok_or_else(|| {
                MetadataError::Invariant(format!("{time_samples} samples do not fill whole bytes"))
            })?;
        Ok(ObservationMetadata {
            time_samples,
            data_size_bytes,
            start_mjd,
            ..self.clone()
        })
    }
}

impl fmt::Display for ObservationMetadata {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Observing site                    : {}", self.site)?;
        writeln!(f, "Field name                        : {}", self.source_name)?;
        writeln!(f, "Start time                        : {:.10} MJD", self.start_mjd)?;
        writeln!(f, "Centre frequency                  : {} MHz", self.band.centre_mhz)?;
        writeln!(f, "Bandwidth                         : {} MHz", self.band.bandwidth_mhz)?;
        writeln!(f, "Sampling interval                 : {} ms", self.sampling_interval_ms)?;
        writeln!(f, "Number of channels                : {}", self.num_channels)?;
        writeln!(f, "Number of good channels           : {}", self.num_good_channels)?;
        writeln!(
            f,
            "Channel bandwidth                 : {} MHz",
            self.band.channel_bandwidth_mhz
        )?;
        writeln!(f, "Lowest frequency                  : {} MHz", self.band.min_mhz)?;
        writeln!(f, "Highest frequency                 : {} MHz", self.band.max_mhz)?;
        if self.band.flipped {
            writeln!(f, "                                    Flipped band")?;
        }
        if self.beam_flip.sections != 0 {
            writeln!(f, "First beam-flip time              : {} s", self.beam_flip.next_s)?;
            writeln!(f, "Beam-flip interval                : {} s", self.beam_flip.interval_s)?;
            writeln!(f, "Number of beam-flip time sections : {}", self.beam_flip.sections)?;
        }
        writeln!(f, "Number of bad time sections       : {}", self.num_bad_times)?;
        writeln!(f, "Number of bits per sample         : {}", self.num_bits())?;
        writeln!(f, "Bytes per sample                  : {}", self.sample_byte_size())?;
        if self.num_ifs != 0 {
            writeln!(f, "Number of IFs                     : {}", self.num_ifs)?;
        }
        writeln!(f, "Duration of data in")?;
        writeln!(
            f,
            "    Bytes                         : {}",
            self.data_size_bytes / self.num_channels.max(1) as u64
        )?;
        writeln!(f, "    Time samples                  : {}", self.time_samples)?;
        writeln!(f, "    Time                          : {} s", self.duration_s())?;
        write!(f, "Length of header                  : {}", self.header_len)
    }
}
