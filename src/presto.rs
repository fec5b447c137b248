//! PRESTO time series: a `.dat` file of native 32-bit floats and a `.inf` text file next to it
//! describing the observation, one `label = value` pair per line.

use log::debug;
use std::{
    fs::{self, File},
    io::Write,
    path::{Path, PathBuf},
    str::FromStr,
};

use crate::codec::MetadataCodec;
use crate::error::{Error, Result};
use crate::format::Format;
use crate::metadata::{
    Band, BeamFlip, BoundedName, MetadataError, ObservationMetadata, SampleDepth,
};
use crate::mjd::{interval_ms, interval_s};

const LABEL_FILE: &str = "Data file name without suffix";
const LABEL_TELESCOPE: &str = "Telescope used";
const LABEL_INSTRUMENT: &str = "Instrument used";
const LABEL_OBJECT: &str = "Object being observed";
const LABEL_RA: &str = "J2000 Right Ascension (hh:mm:ss.ssss)";
const LABEL_DEC: &str = "J2000 Declination     (dd:mm:ss.ssss)";
const LABEL_EPOCH: &str = "Epoch of observation (MJD)";
const LABEL_BARY: &str = "Barycentered?           (1=yes, 0=no)";
const LABEL_BINS: &str = "Number of bins in the time series";
const LABEL_BIN_WIDTH: &str = "Width of each time series bin (sec)";
const LABEL_BREAKS: &str = "Any breaks in the data? (1=yes, 0=no)";
const LABEL_BAND: &str = "Type of observation (EM band)";
const LABEL_DM: &str = "Dispersion measure (cm-3 pc)";
const LABEL_LOW_FREQ: &str = "Central freq of low channel (Mhz)";
const LABEL_TOTAL_BW: &str = "Total bandwidth (Mhz)";
const LABEL_CHANNELS: &str = "Number of channels";
const LABEL_CHANNEL_BW: &str = "Channel bandwidth (Mhz)";

/// The `.inf` file describing the `.dat` file at `dat_path`.
pub fn inf_path(dat_path: &Path) -> PathBuf {
    dat_path.with_extension("inf")
}

/// Label to value, as read from a `.inf` file.
struct Inf {
    entries: Vec<(String, String)>,
}

impl Inf {
    fn parse(text: &str) -> Inf {
        let entries = text
            .lines()
            .filter_map(|line| line.split_once('='))
            .map(|(label, value)| (label.trim().to_string(), value.trim().to_string()))
            .collect();
        Inf { entries }
    }

    fn get(&self, label: &'static str) -> Result<&str, MetadataError> {
        self.entries
            .iter()
            .find(|(l, _)| l == label)
            .map(|(_, v)| v.as_str())
            .ok_or(MetadataError::MissingField(label))
    }

    fn get_num<T: FromStr>(&self, label: &'static str) -> Result<T, MetadataError> {
        self.get(label)?
            .parse()
            .map_err(|_| MetadataError::WrongTypeField(label))
    }

    /// `time_samples` comes from the header; the payload must agree with it.
    fn to_metadata(&self, payload_len: u64) -> Result<ObservationMetadata, MetadataError> {
        let time_samples: u64 = self.get_num(LABEL_BINS)?;
        let channels: u32 = self.get_num(LABEL_CHANNELS)?;
        if channels == 0 {
            return Err(MetadataError::Invariant("number of channels is zero".into()));
        }
        let low: f64 = self.get_num(LABEL_LOW_FREQ)?;
        let channel_bw: f64 = self.get_num(LABEL_CHANNEL_BW)?;

        // The series is one channel regardless of how many were dedispersed into it
        let band = if channels == 1 {
            Band::from_first_channel(low, channel_bw, 1)
        } else {
            debug!("Collapsing {channels} source channels into one");
            let total = channels as f64 * channel_bw;
            let centre = low + (channels - 1) as f64 * channel_bw / 2.0;
            Band::from_centre(centre as f32, total as f32, 1, false)
        };

        let data_size_bytes = SampleDepth::Bits32
            .payload_bytes(time_samples, 1)
            .ok_or_else(|| MetadataError::Invariant(format!("{time_samples} bins overflow")))?;
        if data_size_bytes != payload_len {
            return Err(MetadataError::Invariant(format!(
                "{time_samples} bins need {data_size_bytes} bytes, payload has {payload_len}"
            )));
        }

        Ok(ObservationMetadata {
            site: BoundedName::new(self.get(LABEL_TELESCOPE)?)?,
            source_name: BoundedName::new(self.get(LABEL_OBJECT)?)?,
            start_mjd: self.get_num(LABEL_EPOCH)?,
            sampling_interval_ms: interval_ms(self.get_num(LABEL_BIN_WIDTH)?),
            band,
            num_channels: 1,
            num_good_channels: 1,
            num_ifs: 1,
            depth: SampleDepth::Bits32,
            time_samples,
            data_size_bytes,
            header_len: 0,
            beam_flip: BeamFlip::default(),
            num_bad_times: 0,
        })
    }
}

fn line(out: &mut String, label: &str, value: impl std::fmt::Display) {
    out.push_str(&format!(" {label:<39}=  {value}\n"));
}

fn encode(dat_path: &Path, meta: &ObservationMetadata) -> String {
    let stem = dat_path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let mut out = String::with_capacity(1024);
    line(&mut out, LABEL_FILE, stem);
    line(&mut out, LABEL_TELESCOPE, &meta.site);
    line(&mut out, LABEL_INSTRUMENT, "Unknown");
    line(&mut out, LABEL_OBJECT, &meta.source_name);
    line(&mut out, LABEL_RA, "00:00:00.0000");
    line(&mut out, LABEL_DEC, "00:00:00.0000");
    line(&mut out, LABEL_EPOCH, meta.start_mjd);
    line(&mut out, LABEL_BARY, 0);
    line(&mut out, LABEL_BINS, meta.time_samples);
    line(&mut out, LABEL_BIN_WIDTH, interval_s(meta.sampling_interval_ms));
    line(&mut out, LABEL_BREAKS, 0);
    line(&mut out, LABEL_BAND, "Radio");
    line(&mut out, LABEL_DM, 0);
    line(&mut out, LABEL_LOW_FREQ, meta.band.min_mhz);
    line(&mut out, LABEL_TOTAL_BW, meta.band.bandwidth_mhz);
    line(&mut out, LABEL_CHANNELS, meta.num_channels);
    line(&mut out, LABEL_CHANNEL_BW, meta.band.channel_bandwidth_mhz);
    out.push_str(" Any additional notes:\n    Written by psrio\n");
    out
}

/// Codec for PRESTO `.dat` files. Reads and writes the `.inf` next to the given path.
pub struct PrestoDatCodec;

impl MetadataCodec for PrestoDatCodec {
    fn format(&self) -> Format {
        Format::PrestoDat
    }

    fn payload_path(&self, header_path: &Path) -> PathBuf {
        match header_path.extension() {
            Some(ext) if ext == "inf" => header_path.with_extension("dat"),
            _ => header_path.to_path_buf(),
        }
    }

    fn read(&self, path: &Path) -> Result<ObservationMetadata> {
        let inf = inf_path(path);
        let text = fs::read_to_string(&inf).map_err(Error::Read)?;
        let payload_len = fs::metadata(path).map_err(Error::Read)?.len();
        let meta = Inf::parse(&text)
            .to_metadata(payload_len)
            .map_err(|e| Error::from_metadata(&inf, e))?;
        meta.validate().map_err(|e| Error::from_metadata(&inf, e))?;
        Ok(meta)
    }

    fn write(&self, path: &Path, meta: &ObservationMetadata) -> Result<u64> {
        if meta.num_channels != 1 || meta.depth != SampleDepth::Bits32 {
            return Err(Error::InvalidArgument(format!(
                "a PRESTO time series holds one 32-bit channel, not {} of {} bits",
                meta.num_channels,
                meta.num_bits()
            )));
        }
        let text = encode(path, meta);
        let mut file = File::create(inf_path(path)).map_err(Error::Write)?;
        file.write_all(text.as_bytes()).map_err(Error::Write)?;
        Ok(0)
    }
}

#[cfg(test)]
mod presto_tests {
    use super::*;
    use crate::metadata::metadata_tests::time_series;

    const REAL_INF: &str = " Data file name without suffix          =  B1937+21_DM71.02
 Telescope used                         =  Arecibo
 Instrument used                        =  PUPPI
 Object being observed                  =  B1937+21
 J2000 Right Ascension (hh:mm:ss.ssss)  =  19:39:38.5612
 J2000 Declination     (dd:mm:ss.ssss)  =  21:34:59.1260
 Data observed by                       =  Unknown
 Epoch of observation (MJD)             =  56000.123456789012
 Barycentered?           (1=yes, 0=no)  =  0
 Number of bins in the time series      =  16
 Width of each time series bin (sec)    =  8.192e-05
 Any breaks in the data? (1=yes, 0=no)  =  0
 Type of observation (EM band)          =  Radio
 Beam diameter (arcsec)                 =  3600
 Dispersion measure (cm-3 pc)           =  71.02
 Central freq of low channel (Mhz)      =  1150.0
 Total bandwidth (Mhz)                  =  800
 Number of channels                     =  2048
 Channel bandwidth (Mhz)                =  0.390625
 Data analyzed by                       =  Unknown
 Any additional notes:
    Input filterbank samples have 8 bits.
";

    #[test]
    fn parse_real_inf() {
        let meta = Inf::parse(REAL_INF).to_metadata(64).unwrap();
        assert_eq!(meta.site.as_str(), "Arecibo");
        assert_eq!(meta.source_name.as_str(), "B1937+21");
        assert_eq!(meta.time_samples, 16);
        assert_eq!(meta.num_channels, 1);
        assert!((meta.sampling_interval_ms - 0.08192).abs() < 1e-12);
        assert_eq!(meta.band.bandwidth_mhz, 800.0);
        assert!((meta.band.centre_mhz - 1549.8047).abs() < 1e-3);
        assert!(meta.validate().is_ok());
    }

    #[test]
    fn payload_must_match_bins() {
        let err = Inf::parse(REAL_INF).to_metadata(60).unwrap_err();
        assert!(matches!(err, MetadataError::Invariant(_)));
    }

    #[test]
    fn missing_epoch() {
        let text = REAL_INF.replace("Epoch of observation (MJD)", "Epoch");
        assert_eq!(
            Inf::parse(&text).to_metadata(64).unwrap_err(),
            MetadataError::MissingField(LABEL_EPOCH)
        );
    }

    #[test]
    fn malformed_number() {
        let text = REAL_INF.replace("=  16", "=  sixteen");
        assert_eq!(
            Inf::parse(&text).to_metadata(64).unwrap_err(),
            MetadataError::WrongTypeField(LABEL_BINS)
        );
    }

    #[test]
    fn round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("obs.dat");
        let meta = time_series(250);
        std::fs::write(&path, vec![0u8; 1000]).unwrap();

        assert_eq!(PrestoDatCodec.write(&path, &meta).unwrap(), 0);
        assert!(inf_path(&path).is_file());
        assert_eq!(PrestoDatCodec.read(&path).unwrap(), meta);
    }

    #[test]
    fn lines_line_up_like_presto() {
        let text = encode(Path::new("/data/obs.dat"), &time_series(10));
        assert_eq!(
            text.lines().next(),
            Some(" Data file name without suffix          =  obs")
        );
        let inf = Inf::parse(&text);
        assert_eq!(inf.get(LABEL_BIN_WIDTH).unwrap(), "0.001");
        assert_eq!(inf.get(LABEL_BINS).unwrap(), "10");
        assert!(text.ends_with("Written by psrio\n"));
    }

    #[test]
    fn write_rejects_filterbank_shape() {
        let dir = tempfile::tempdir().unwrap();
        let meta = ObservationMetadata {
            depth: SampleDepth::Bits8,
            data_size_bytes: 10,
            ..time_series(10)
        };
        let err = PrestoDatCodec
            .write(&dir.path().join("x.dat"), &meta)
            .unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));
    }
}
