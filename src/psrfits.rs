//! PSRFITS search mode files.
//!
//! A FITS file is a sequence of header data units (HDUs). Every header is a run of 80 byte
//! ASCII cards, `KEYWORD = value / comment`, terminated by an `END` card and padded to a
//! multiple of 2880 bytes, as is the data following it. Search mode PSRFITS keeps the
//! observation description in the primary header and the samples in the `DATA` column of the
//! `SUBINT` binary table, one row per sub-integration of `NSBLK` samples. Samples wider than a
//! byte are big-endian.
//!
//! Only what is needed to locate and describe the samples is interpreted. Other columns
//! (weights, scales, offsets) are skipped when reading and not produced when writing.

use log::{debug, warn};
use std::{
    collections::HashMap,
    fs::File,
    io::{self, BufReader, Read, Seek, SeekFrom, Write},
    path::Path,
};
use thiserror::Error;

use crate::codec::MetadataCodec;
use crate::error::{Error, Result};
use crate::format::Format;
use crate::metadata::{
    Band, BeamFlip, BoundedName, MetadataError, ObservationMetadata, SampleDepth,
};
use crate::mjd::{MjdParts, interval_ms, interval_s};

pub const BLOCK_LEN: u64 = 2880;
pub const CARD_LEN: usize = 80;
const SIGNATURE: &[u8] = b"SIMPLE  =";
const SUBINT: &str = "SUBINT";
const DATA_COLUMN: &str = "DATA";

/// Rows of the SUBINT table hold this many samples unless configured otherwise
pub const DEFAULT_NSBLK: u32 = 2048;

#[derive(Error, Debug)]
pub enum FitsError {
    #[error("File does not begin with a SIMPLE card")]
    NotFits(),
    #[error("No SUBINT binary table found")]
    MissingSubint(),
    #[error("Missing keyword {0}")]
    MissingKeyword(String),
    #[error("Keyword {0} was present, but of unexpected type")]
    WrongTypeKeyword(String),
    #[error("Keyword {0} has an unusable value")]
    BadValue(String),
    #[error("Column format {0:?} is not understood")]
    BadColumnFormat(String),
    #[error("SUBINT table has no DATA column")]
    MissingDataColumn(),
    #[error("Columns add up to {columns} bytes but rows are {naxis1} bytes")]
    RowWidthMismatch { columns: u64, naxis1: u64 },
    #[error("DATA column is {column} bytes, {expected} expected from NSBLK, NCHAN and NBITS")]
    DataWidthMismatch { column: u64, expected: u64 },
    #[error("Unsupported data: {0}")]
    Unsupported(String),
    #[error(transparent)]
    Metadata(#[from] MetadataError),
    #[error("Reader I/O error while parsing")]
    IoError(#[from] io::Error),
}

/// True if `probe` starts with the mandatory first card of a FITS file.
pub fn is_fits(probe: &[u8]) -> bool {
    probe.starts_with(SIGNATURE)
}

/// Bytes of padding that bring `len` up to a whole number of FITS blocks.
pub fn padding(len: u64) -> u64 {
    (BLOCK_LEN - len % BLOCK_LEN) % BLOCK_LEN
}

#[derive(Clone, Debug, PartialEq)]
enum CardValue {
    Str(String),
    /// Logical, integer or floating point, kept as written
    Literal(String),
}

/// Splits a card into keyword and value. Cards without a value indicator (COMMENT,
/// HISTORY, END, blank) yield `None` for the value.
fn parse_card(card: &[u8]) -> (String, Option<CardValue>) {
    let keyword = String::from_utf8_lossy(&card[..8.min(card.len())])
        .trim_end()
        .to_string();
    if card.len() < 10 || &card[8..10] != b"= " {
        return (keyword, None);
    }
    let text = String::from_utf8_lossy(&card[10..]);
    let text = text.trim_start();

    let value = if let Some(quoted) = text.strip_prefix('\'') {
        // A doubled quote inside a string stands for one quote
        let mut s = String::new();
        let mut chars = quoted.chars().peekable();
        while let Some(c) = chars.next() {
            if c == '\'' {
                if chars.peek() == Some(&'\'') {
                    chars.next();
                    s.push('\'');
                    continue;
                }
                break;
            }
            s.push(c);
        }
        CardValue::Str(s.trim_end().to_string())
    } else {
        let literal = text.split('/').next().unwrap_or_default().trim();
        CardValue::Literal(literal.to_string())
    };
    (keyword, Some(value))
}

/// One parsed header and where its data starts.
#[derive(Debug)]
struct Hdu {
    cards: HashMap<String, CardValue>,
    data_start: u64,
}

impl Hdu {
    /// Reads cards from the block boundary at `start` up to and including the END block.
    fn read<R: Read>(reader: &mut R, start: u64) -> Result<Hdu, FitsError> {
        let mut cards = HashMap::new();
        let mut block = [0u8; BLOCK_LEN as usize];
        let mut offset = start;
        loop {
            reader.read_exact(&mut block)?;
            offset += BLOCK_LEN;
            for card in block.chunks_exact(CARD_LEN) {
                let (keyword, value) = parse_card(card);
                if keyword == "END" {
                    return Ok(Hdu {
                        cards,
                        data_start: offset,
                    });
                }
                if let Some(value) = value {
                    // The first occurrence wins, as it does for most FITS readers
                    cards.entry(keyword).or_insert(value);
                }
            }
        }
    }

    fn get(&self, keyword: &str) -> Result<&CardValue, FitsError> {
        self.cards
            .get(keyword)
            .ok_or_else(|| FitsError::MissingKeyword(keyword.to_string()))
    }

    fn get_str(&self, keyword: &str) -> Result<&str, FitsError> {
        match self.get(keyword)? {
            CardValue::Str(s) => Ok(s),
            CardValue::Literal(_) => Err(FitsError::WrongTypeKeyword(keyword.to_string())),
        }
    }

    fn get_int(&self, keyword: &str) -> Result<i64, FitsError> {
        match self.get(keyword)? {
            CardValue::Literal(s) => s
                .parse()
                .map_err(|_| FitsError::WrongTypeKeyword(keyword.to_string())),
            CardValue::Str(_) => Err(FitsError::WrongTypeKeyword(keyword.to_string())),
        }
    }

    fn get_float(&self, keyword: &str) -> Result<f64, FitsError> {
        match self.get(keyword)? {
            // Fortran style exponents are legal in FITS
            CardValue::Literal(s) => s
                .replace(['D', 'd'], "E")
                .parse()
                .map_err(|_| FitsError::WrongTypeKeyword(keyword.to_string())),
            CardValue::Str(_) => Err(FitsError::WrongTypeKeyword(keyword.to_string())),
        }
    }

    /// An integer keyword that must be non-negative and fit `T`.
    fn get_count<T: TryFrom<i64>>(&self, keyword: &str) -> Result<T, FitsError> {
        let value = self.get_int(keyword)?;
        if value < 0 {
            return Err(FitsError::BadValue(keyword.to_string()));
        }
        T::try_from(value).map_err(|_| FitsError::BadValue(keyword.to_string()))
    }

    fn get_int_or(&self, keyword: &str, default: i64) -> Result<i64, FitsError> {
        if self.cards.contains_key(keyword) {
            self.get_int(keyword)
        } else {
            Ok(default)
        }
    }

    /// Size of the data following this header, before padding.
    fn data_len(&self) -> Result<u64, FitsError> {
        let bitpix = self.get_int("BITPIX")?;
        let naxis = self.get_int("NAXIS")?;
        if naxis == 0 {
            return Ok(0);
        }
        let mut elements: u64 = 1;
        for n in 1..=naxis {
            let axis: u64 = self.get_count(&format!("NAXIS{n}"))?;
            elements = elements
                .checked_mul(axis)
                .ok_or_else(|| FitsError::BadValue(format!("NAXIS{n}")))?;
        }
        let pcount = u64::try_from(self.get_int_or("PCOUNT", 0)?)
            .map_err(|_| FitsError::BadValue("PCOUNT".into()))?;
        let gcount = u64::try_from(self.get_int_or("GCOUNT", 1)?)
            .map_err(|_| FitsError::BadValue("GCOUNT".into()))?;
        elements
            .checked_add(pcount)
            .and_then(|e| e.checked_mul(gcount))
            .and_then(|e| e.checked_mul(bitpix.unsigned_abs() / 8))
            .ok_or_else(|| FitsError::BadValue("NAXIS".into()))
    }

    /// Offset of the HDU after this one.
    fn next_start(&self) -> Result<u64, FitsError> {
        let len = self.data_len()?;
        self.data_start
            .checked_add(len + padding(len))
            .ok_or_else(|| FitsError::BadValue("NAXIS".into()))
    }
}

/// Width in bytes of one cell of a binary table column with format `tform`.
fn column_width(tform: &str) -> Result<u64, FitsError> {
    let tform = tform.trim();
    let digits = tform.chars().take_while(|c| c.is_ascii_digit()).count();
    let repeat: u64 = match digits {
        0 => 1,
        _ => tform[..digits]
            .parse()
            .map_err(|_| FitsError::BadColumnFormat(tform.to_string()))?,
    };
    let code = tform[digits..]
        .chars()
        .next()
        .ok_or_else(|| FitsError::BadColumnFormat(tform.to_string()))?;
    let size = match code {
        'X' => return Ok(repeat.div_ceil(8)),
        'L' | 'B' | 'A' => 1,
        'I' => 2,
        'J' | 'E' => 4,
        'K' | 'D' | 'C' | 'P' => 8,
        'M' | 'Q' => 16,
        _ => return Err(FitsError::BadColumnFormat(tform.to_string())),
    };
    Ok(repeat * size)
}

/// Where the samples of a PSRFITS file live.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub struct PsrFitsLayout {
    /// Offset of the first SUBINT row
    pub header_len: u64,
    pub row_bytes: u64,
    pub rows: u64,
    /// Time samples per row
    pub nsblk: u32,
    /// Offset of the DATA cell within a row
    pub data_offset: u64,
    /// Width of the DATA cell
    pub data_bytes: u64,
    pub depth: SampleDepth,
    pub nchans: u32,
}

impl PsrFitsLayout {
    fn from_subint(subint: &Hdu) -> Result<Self, FitsError> {
        let row_bytes: u64 = subint.get_count("NAXIS1")?;
        let rows: u64 = subint.get_count("NAXIS2")?;
        let fields: u32 = subint.get_count("TFIELDS")?;

        let mut offset = 0u64;
        let mut data = None;
        for n in 1..=fields {
            let width = column_width(subint.get_str(&format!("TFORM{n}"))?)?;
            let name = subint.get_str(&format!("TTYPE{n}"))?;
            if name == DATA_COLUMN {
                data = Some((offset, width));
            }
            offset += width;
        }
        if offset != row_bytes {
            return Err(FitsError::RowWidthMismatch {
                columns: offset,
                naxis1: row_bytes,
            });
        }
        let (data_offset, data_bytes) = data.ok_or(FitsError::MissingDataColumn())?;

        let npol: i64 = subint.get_int("NPOL")?;
        if npol != 1 {
            return Err(FitsError::Unsupported(format!(
                "{npol} polarisations, only total intensity is supported"
            )));
        }
        let nsblk: u32 = subint.get_count("NSBLK")?;
        let nchans: u32 = subint.get_count("NCHAN")?;
        if nchans == 0 {
            return Err(FitsError::BadValue("NCHAN".into()));
        }
        let depth = SampleDepth::from_bits(subint.get_int("NBITS")?)?;

        let expected = depth
            .payload_bytes(nsblk as u64, nchans)
            .ok_or_else(|| FitsError::BadValue("NSBLK".into()))?;
        if expected != data_bytes {
            return Err(FitsError::DataWidthMismatch {
                column: data_bytes,
                expected,
            });
        }

        Ok(PsrFitsLayout {
            header_len: subint.data_start,
            row_bytes,
            rows,
            nsblk,
            data_offset,
            data_bytes,
            depth,
            nchans,
        })
    }

    /// File offset of the DATA cell of `row`.
    pub fn data_start(&self, row: u64) -> u64 {
        self.header_len + row * self.row_bytes + self.data_offset
    }

    pub fn time_samples(&self) -> u64 {
        self.rows * self.nsblk as u64
    }
}

fn scan<R: Read + Seek>(reader: &mut R, file_len: u64) -> Result<(Hdu, Hdu), FitsError> {
    let mut probe = [0u8; SIGNATURE.len()];
    reader.read_exact(&mut probe)?;
    if !is_fits(&probe) {
        return Err(FitsError::NotFits());
    }
    reader.seek(SeekFrom::Start(0))?;
    let primary = Hdu::read(reader, 0)?;

    let mut next = primary.next_start()?;
    while next < file_len {
        reader.seek(SeekFrom::Start(next))?;
        let hdu = Hdu::read(reader, next)?;
        if matches!(hdu.get_str("EXTNAME"), Ok(SUBINT)) {
            return Ok((primary, hdu));
        }
        debug!("Skipping HDU at offset {next}");
        next = hdu.next_start()?;
    }
    Err(FitsError::MissingSubint())
}

fn to_metadata(
    primary: &Hdu,
    subint: &Hdu,
    layout: &PsrFitsLayout,
    file_len: u64,
) -> Result<ObservationMetadata, FitsError> {
    let table_end = layout
        .rows
        .checked_mul(layout.row_bytes)
        .and_then(|t| t.checked_add(layout.header_len))
        .ok_or_else(|| FitsError::BadValue("NAXIS2".into()))?;
    if table_end > file_len {
        return Err(FitsError::Metadata(MetadataError::Invariant(format!(
            "SUBINT table ends at byte {table_end}, file has {file_len}"
        ))));
    }

    let start = MjdParts {
        day: primary.get_int("STT_IMJD")?,
        sec: primary.get_int("STT_SMJD")?,
        frac: primary.get_float("STT_OFFS")?,
    };
    let channel_bw = subint.get_float("CHAN_BW")?;
    let band = Band::from_centre(
        primary.get_float("OBSFREQ")? as f32,
        channel_bw as f32,
        layout.nchans,
        channel_bw < 0.0,
    );
    if let Ok(obsnchan) = primary.get_int("OBSNCHAN") {
        if obsnchan != layout.nchans as i64 {
            debug!("OBSNCHAN is {obsnchan}, SUBINT holds {} channels", layout.nchans);
        }
    }

    let time_samples = layout.time_samples();
    let data_size_bytes = layout
        .depth
        .payload_bytes(time_samples, layout.nchans)
        .ok_or_else(|| FitsError::BadValue("NSBLK".into()))?;

    Ok(ObservationMetadata {
        site: BoundedName::new(primary.get_str("TELESCOP")?)?,
        source_name: BoundedName::new(primary.get_str("SRC_NAME")?)?,
        start_mjd: start.to_mjd(),
        sampling_interval_ms: interval_ms(subint.get_float("TBIN")?),
        band,
        num_channels: layout.nchans,
        num_good_channels: layout.nchans,
        num_ifs: 1,
        depth: layout.depth,
        time_samples,
        data_size_bytes,
        header_len: layout.header_len,
        beam_flip: BeamFlip::default(),
        num_bad_times: 0,
    })
}

/// Builds header blocks card by card.
struct CardWriter {
    buf: Vec<u8>,
}

impl CardWriter {
    fn new() -> Self {
        CardWriter {
            buf: Vec::with_capacity(BLOCK_LEN as usize),
        }
    }

    fn raw(&mut self, text: &str) {
        let mut card = text.as_bytes().to_vec();
        card.truncate(CARD_LEN);
        card.resize(CARD_LEN, b' ');
        self.buf.extend_from_slice(&card);
    }

    fn literal(&mut self, keyword: &str, value: &str) {
        self.raw(&format!("{keyword:<8}= {value:>20}"));
    }

    fn logical(&mut self, keyword: &str, value: bool) {
        self.literal(keyword, if value { "T" } else { "F" });
    }

    fn int(&mut self, keyword: &str, value: i64) {
        self.literal(keyword, &value.to_string());
    }

    fn float(&mut self, keyword: &str, value: f64) {
        // Debug formatting always keeps a decimal point or exponent, and round trips
        self.literal(keyword, &format!("{value:?}").to_uppercase());
    }

    fn string(&mut self, keyword: &str, value: &str) {
        let quoted = format!("'{:<8}'", value.replace('\'', "''"));
        self.raw(&format!("{keyword:<8}= {quoted:<20}"));
    }

    fn finish(mut self) -> Vec<u8> {
        self.raw("END");
        let pad = padding(self.buf.len() as u64) as usize;
        self.buf.resize(self.buf.len() + pad, b' ');
        self.buf
    }
}

/// Codec for PSRFITS search mode files.
///
/// Writing produces the primary header and the SUBINT table header with a single `DATA`
/// column. The caller appends `ceil(time_samples / nsblk)` rows of big-endian samples.
pub struct PsrFitsCodec {
    nsblk: u32,
}

impl Default for PsrFitsCodec {
    fn default() -> Self {
        PsrFitsCodec {
            nsblk: DEFAULT_NSBLK,
        }
    }
}

impl PsrFitsCodec {
    pub fn with_nsblk(nsblk: u32) -> Self {
        PsrFitsCodec { nsblk }
    }

    /// Reads the metadata along with the location of every row's samples.
    pub fn read_layout(&self, path: &Path) -> Result<(ObservationMetadata, PsrFitsLayout)> {
        let file = File::open(path).map_err(Error::Read)?;
        let file_len = file.metadata().map_err(Error::Read)?.len();
        let mut reader = BufReader::new(file);
        let (meta, layout) = scan(&mut reader, file_len)
            .and_then(|(primary, subint)| {
                let layout = PsrFitsLayout::from_subint(&subint)?;
                Ok((to_metadata(&primary, &subint, &layout, file_len)?, layout))
            })
            .map_err(|e| Error::from_fits(path, e))?;
        meta.validate().map_err(|e| Error::from_metadata(path, e))?;
        debug!(
            "{}: {} rows of {} samples, DATA at +{} in {} byte rows",
            path.display(),
            layout.rows,
            layout.nsblk,
            layout.data_offset,
            layout.row_bytes
        );
        Ok((meta, layout))
    }

    fn encode(&self, meta: &ObservationMetadata) -> Result<Vec<u8>> {
        if self.nsblk == 0 {
            return Err(Error::InvalidArgument("NSBLK must be positive".into()));
        }
        let row_bytes = meta
            .depth
            .payload_bytes(self.nsblk as u64, meta.num_channels)
            .ok_or_else(|| {
                Error::InvalidArgument(format!(
                    "{} samples of {} {}-bit channels do not fill whole bytes",
                    self.nsblk,
                    meta.num_channels,
                    meta.num_bits()
                ))
            })?;
        if meta.time_samples % self.nsblk as u64 != 0 {
            warn!(
                "{} samples are not a whole number of {}-sample rows, the last row is padded",
                meta.time_samples, self.nsblk
            );
        }
        let rows = meta.time_samples.div_ceil(self.nsblk as u64);
        let start = MjdParts::from_mjd(meta.start_mjd);

        let mut primary = CardWriter::new();
        primary.logical("SIMPLE", true);
        primary.int("BITPIX", 8);
        primary.int("NAXIS", 0);
        primary.logical("EXTEND", true);
        primary.string("FITSTYPE", "PSRFITS");
        primary.string("OBS_MODE", "SEARCH");
        primary.string("TELESCOP", meta.site.as_str());
        primary.string("SRC_NAME", meta.source_name.as_str());
        primary.float("OBSFREQ", meta.band.centre_mhz as f64);
        primary.float(
            "OBSBW",
            meta.band.signed_channel_bandwidth() as f64 * meta.num_channels as f64,
        );
        primary.int("OBSNCHAN", meta.num_channels as i64);
        primary.int("STT_IMJD", start.day);
        primary.int("STT_SMJD", start.sec);
        primary.float("STT_OFFS", start.frac);
        let mut bytes = primary.finish();

        let mut subint = CardWriter::new();
        subint.string("XTENSION", "BINTABLE");
        subint.int("BITPIX", 8);
        subint.int("NAXIS", 2);
        subint.int("NAXIS1", row_bytes as i64);
        subint.int("NAXIS2", rows as i64);
        subint.int("PCOUNT", 0);
        subint.int("GCOUNT", 1);
        subint.int("TFIELDS", 1);
        subint.string("TTYPE1", DATA_COLUMN);
        subint.string("TFORM1", &format!("{row_bytes}B"));
        subint.string("EXTNAME", SUBINT);
        subint.int("NPOL", 1);
        subint.int("NCHAN", meta.num_channels as i64);
        subint.int("NBITS", meta.num_bits() as i64);
        subint.int("NSBLK", self.nsblk as i64);
        subint.float("TBIN", interval_s(meta.sampling_interval_ms));
        subint.float("CHAN_BW", meta.band.signed_channel_bandwidth() as f64);
        bytes.extend(subint.finish());
        Ok(bytes)
    }
}

impl MetadataCodec for PsrFitsCodec {
    fn format(&self) -> Format {
        Format::PsrFits
    }

    fn read(&self, path: &Path) -> Result<ObservationMetadata> {
        self.read_layout(path).map(|(meta, _)| meta)
    }

    fn write(&self, path: &Path, meta: &ObservationMetadata) -> Result<u64> {
        let bytes = self.encode(meta)?;
        let mut file = File::create(path).map_err(Error::Write)?;
        file.write_all(&bytes).map_err(Error::Write)?;
        Ok(bytes.len() as u64)
    }
}
