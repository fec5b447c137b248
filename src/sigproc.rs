//! A SIGPROC header parser, for filterbank (`.fil`) and dedispersed time series (`.tim`) files.
//! A header is a run of keywords between `HEADER_START` and `HEADER_END`. Every keyword is a
//! little-endian `i32` length followed by its name, and is followed by a value whose type is
//! fixed by the keyword.

use byteorder::{ByteOrder, LittleEndian, ReadBytesExt, WriteBytesExt};
use log::{debug, warn};
use std::{
    collections::HashMap,
    fs::File,
    io::{self, BufReader, Read, Write},
    path::Path,
};
use thiserror::Error;

use crate::codec::MetadataCodec;
use crate::error::{Error, Result};
use crate::format::Format;
use crate::metadata::{
    Band, BeamFlip, BoundedName, MetadataError, ObservationMetadata, SampleDepth,
};
use crate::mjd::{interval_ms, interval_s};

pub const HEADER_START: &str = "HEADER_START";
pub const HEADER_END: &str = "HEADER_END";
/// Longest keyword or string value we accept before calling the header corrupt
const MAX_STRING_LEN: i32 = 80;

/// SIGPROC `data_type` values
const DATA_TYPE_FILTERBANK: i32 = 1;
const DATA_TYPE_TIME_SERIES: i32 = 2;

type KeywordToValue = HashMap<String, Value>;

#[derive(PartialEq, Debug, Clone)]
pub enum Value {
    Int(i32),
    Double(f64),
    Str(String),
}

impl Value {
    pub fn get_i32(&self) -> Option<i32> {
        match *self {
            Value::Int(v) => Some(v),
            _ => None,
        }
    }

    pub fn get_f64(&self) -> Option<f64> {
        match *self {
            Value::Double(v) => Some(v),
            _ => None,
        }
    }

    pub fn get_str(&self) -> Option<&str> {
        match self {
            Value::Str(v) => Some(v),
            _ => None,
        }
    }

    fn encoded_len(&self) -> u64 {
        match self {
            Value::Int(_) => 4,
            Value::Double(_) => 8,
            Value::Str(s) => 4 + s.len() as u64,
        }
    }
}

#[derive(Error, Debug)]
pub enum ParseError {
    #[error("Header does not begin with HEADER_START")]
    MissingStart(),
    #[error("String length {0} is out of range, likely corrupt file")]
    BadLength(i32),
    #[error("Unknown keyword {0}")]
    UnknownKeyword(String),
    #[error("Reader I/O error while parsing")]
    IoError(#[from] io::Error),
    #[error("String was not UTF-8 encoded, likely corrupt file")]
    Utf8Error(#[from] std::string::FromUtf8Error),
}

enum Kind {
    Int,
    Double,
    Str,
}

fn kind_of(keyword: &str) -> Option<Kind> {
    Some(match keyword {
        "telescope_id" | "machine_id" | "data_type" | "barycentric" | "pulsarcentric"
        | "nbits" | "nsamples" | "nchans" | "nifs" | "nbeams" | "ibeam" => Kind::Int,
        "tstart" | "tsamp" | "fch1" | "foff" | "refdm" | "az_start" | "za_start" | "src_raj"
        | "src_dej" | "period" => Kind::Double,
        "source_name" | "rawdatafile" => Kind::Str,
        _ => return None,
    })
}

/// Telescope ids as assigned by SIGPROC.
const TELESCOPES: [(i32, &str); 13] = [
    (0, "Fake"),
    (1, "Arecibo"),
    (2, "Ooty"),
    (3, "Nancay"),
    (4, "Parkes"),
    (5, "Jodrell"),
    (6, "GBT"),
    (7, "GMRT"),
    (8, "Effelsberg"),
    (9, "ATA"),
    (10, "UTR-2"),
    (11, "LOFAR"),
    (64, "MeerKAT"),
];

pub fn telescope_name(id: i32) -> Option<&'static str> {
    TELESCOPES
        .iter()
        .find(|(tid, _)| *tid == id)
        .map(|(_, name)| *name)
}

pub fn telescope_id(name: &str) -> Option<i32> {
    TELESCOPES
        .iter()
        .find(|(_, tname)| tname.eq_ignore_ascii_case(name.trim()))
        .map(|(tid, _)| *tid)
}

/// True if `probe` starts with a length-prefixed `HEADER_START`.
pub fn is_sigproc(probe: &[u8]) -> bool {
    probe.len() >= 4 + HEADER_START.len()
        && LittleEndian::read_i32(probe) == HEADER_START.len() as i32
        && &probe[4..4 + HEADER_START.len()] == HEADER_START.as_bytes()
}

fn parse_string<T: Read>(reader: &mut T, min_len: i32) -> Result<String, ParseError> {
    let len = reader.read_i32::<LittleEndian>()?;
    if !(min_len..=MAX_STRING_LEN).contains(&len) {
        return Err(ParseError::BadLength(len));
    }
    let mut bytes = vec![0u8; len as usize];
    reader.read_exact(&mut bytes)?;
    Ok(String::from_utf8(bytes)?)
}

fn parse_value<T: Read>(reader: &mut T, kind: Kind) -> Result<Value, ParseError> {
    Ok(match kind {
        Kind::Int => Value::Int(reader.read_i32::<LittleEndian>()?),
        Kind::Double => Value::Double(reader.read_f64::<LittleEndian>()?),
        Kind::Str => Value::Str(parse_string(reader, 0)?),
    })
}

/// Keywords of one header and the number of bytes it occupied.
#[derive(Debug)]
pub struct Header {
    pub fields: KeywordToValue,
    pub len: u64,
}

/// The reader must be positioned at the start of the file
pub fn parse<T: Read>(reader: &mut T) -> Result<Header, ParseError> {
    let start = parse_string(reader, 1)?;
    if start != HEADER_START {
        return Err(ParseError::MissingStart());
    }
    let mut len = 4 + start.len() as u64;
    let mut fields = HashMap::new();

    loop {
        let keyword = parse_string(reader, 1)?;
        len += 4 + keyword.len() as u64;
        if keyword == HEADER_END {
            break;
        }
        let kind = kind_of(&keyword).ok_or_else(|| ParseError::UnknownKeyword(keyword.clone()))?;
        let value = parse_value(reader, kind)?;
        len += value.encoded_len();
        fields.insert(keyword, value);
    }

    Ok(Header { fields, len })
}

fn put_string<W: Write>(writer: &mut W, s: &str) -> io::Result<()> {
    writer.write_i32::<LittleEndian>(s.len() as i32)?;
    writer.write_all(s.as_bytes())
}

/// Serializes keywords between `HEADER_START` and `HEADER_END`.
pub struct HeaderWriter {
    buf: Vec<u8>,
}

impl HeaderWriter {
    pub fn new() -> io::Result<Self> {
        let mut buf = Vec::with_capacity(256);
        put_string(&mut buf, HEADER_START)?;
        Ok(HeaderWriter { buf })
    }

    pub fn int(&mut self, keyword: &str, value: i32) -> io::Result<()> {
        put_string(&mut self.buf, keyword)?;
        self.buf.write_i32::<LittleEndian>(value)
    }

    pub fn double(&mut self, keyword: &str, value: f64) -> io::Result<()> {
        put_string(&mut self.buf, keyword)?;
        self.buf.write_f64::<LittleEndian>(value)
    }

    pub fn string(&mut self, keyword: &str, value: &str) -> io::Result<()> {
        put_string(&mut self.buf, keyword)?;
        put_string(&mut self.buf, value)
    }

    pub fn finish(mut self) -> io::Result<Vec<u8>> {
        put_string(&mut self.buf, HEADER_END)?;
        Ok(self.buf)
    }
}

impl Header {
    fn get(&self, keyword: &'static str) -> Result<&Value, MetadataError> {
        self.fields
            .get(keyword)
            .ok_or(MetadataError::MissingField(keyword))
    }

    fn get_i32(&self, keyword: &'static str) -> Result<i32, MetadataError> {
        self.get(keyword)?
            .get_i32()
            .ok_or(MetadataError::WrongTypeField(keyword))
    }

    fn get_f64(&self, keyword: &'static str) -> Result<f64, MetadataError> {
        self.get(keyword)?
            .get_f64()
            .ok_or(MetadataError::WrongTypeField(keyword))
    }

    /// Builds the model for a file of `file_len` bytes that starts with this header.
    pub fn to_metadata(&self, file_len: u64) -> Result<ObservationMetadata, MetadataError> {
        let telescope = self.get_i32("telescope_id")?;
        let site = match telescope_name(telescope) {
            Some(name) => BoundedName::new(name)?,
            None => BoundedName::new(format!("telescope {telescope}"))?,
        };

        let source_name = BoundedName::new(
            self.get("source_name")?
                .get_str()
                .ok_or(MetadataError::WrongTypeField("source_name"))?,
        )?;

        let nchans = self.get_i32("nchans")?;
        if nchans < 1 {
            return Err(MetadataError::Invariant(format!("nchans is {nchans}")));
        }
        let num_channels = nchans as u32;

        // nifs is the one keyword SIGPROC itself treats as optional
        let num_ifs = match self.fields.get("nifs") {
            None => 1,
            Some(v) => v.get_i32().ok_or(MetadataError::WrongTypeField("nifs"))?,
        };
        if num_ifs != 1 {
            return Err(MetadataError::Invariant(format!(
                "{num_ifs} IFs, only single IF data is supported"
            )));
        }

        let depth = SampleDepth::from_bits(self.get_i32("nbits")? as i64)?;
        let band =
            Band::from_first_channel(self.get_f64("fch1")?, self.get_f64("foff")?, num_channels);

        if file_len < self.len {
            return Err(MetadataError::Invariant(format!(
                "file is {file_len} bytes, shorter than its {} byte header",
                self.len
            )));
        }
        let data_size_bytes = file_len - self.len;
        let time_samples = depth
            .samples_in(data_size_bytes, num_channels)
            .ok_or_else(|| {
                MetadataError::Invariant(format!(
                    "{data_size_bytes} payload bytes are not a whole number of samples"
                ))
            })?;
        if let Some(Value::Int(nsamples)) = self.fields.get("nsamples") {
            debug!("Header claims {nsamples} samples, payload holds {time_samples}");
        }

        Ok(ObservationMetadata {
            site,
            source_name,
            start_mjd: self.get_f64("tstart")?,
            sampling_interval_ms: interval_ms(self.get_f64("tsamp")?),
            band,
            num_channels,
            num_good_channels: num_channels,
            num_ifs: num_ifs as u32,
            depth,
            time_samples,
            data_size_bytes,
            header_len: self.len,
            beam_flip: BeamFlip::default(),
            num_bad_times: 0,
        })
    }
}

/// Codec for both SIGPROC variants. They share the header layout and differ in `data_type`.
pub struct SigprocCodec {
    format: Format,
}

impl SigprocCodec {
    pub fn new(format: Format) -> Self {
        debug_assert!(matches!(format, Format::Filterbank | Format::PrestoTim));
        SigprocCodec { format }
    }

    fn encode(&self, meta: &ObservationMetadata) -> io::Result<Vec<u8>> {
        let telescope = telescope_id(meta.site.as_str()).unwrap_or_else(|| {
            warn!(
                "Site {} has no SIGPROC telescope id, writing {}",
                meta.site,
                telescope_name(0).unwrap_or_default()
            );
            0
        });
        let data_type = match self.format {
            Format::PrestoTim => DATA_TYPE_TIME_SERIES,
            _ => DATA_TYPE_FILTERBANK,
        };
        let (fch1, foff) = meta.band.first_channel();

        let mut header = HeaderWriter::new()?;
        header.int("telescope_id", telescope)?;
        header.int("machine_id", 0)?;
        header.int("data_type", data_type)?;
        header.string("source_name", meta.source_name.as_str())?;
        header.double("tstart", meta.start_mjd)?;
        header.double("tsamp", interval_s(meta.sampling_interval_ms))?;
        header.int("nbits", meta.num_bits() as i32)?;
        header.int("nchans", meta.num_channels as i32)?;
        header.int("nifs", meta.num_ifs as i32)?;
        header.double("fch1", fch1)?;
        header.double("foff", foff)?;
        header.finish()
    }
}

impl MetadataCodec for SigprocCodec {
    fn format(&self) -> Format {
        self.format
    }

    fn read(&self, path: &Path) -> Result<ObservationMetadata> {
        let file = File::open(path).map_err(Error::Read)?;
        let file_len = file.metadata().map_err(Error::Read)?.len();
        let mut reader = BufReader::new(file);
        let header = parse(&mut reader).map_err(|e| Error::from_sigproc(path, e))?;
        let meta = header
            .to_metadata(file_len)
            .map_err(|e| Error::from_metadata(path, e))?;
        meta.validate().map_err(|e| Error::from_metadata(path, e))?;
        Ok(meta)
    }

    fn write(&self, path: &Path, meta: &ObservationMetadata) -> Result<u64> {
        if self.format == Format::PrestoTim && meta.num_channels != 1 {
            return Err(Error::InvalidArgument(format!(
                "a time series has one channel, not {}",
                meta.num_channels
            )));
        }
        let bytes = self.encode(meta).map_err(Error::Write)?;
        let mut file = File::create(path).map_err(Error::Write)?;
        file.write_all(&bytes).map_err(Error::Write)?;
        Ok(bytes.len() as u64)
    }
}
