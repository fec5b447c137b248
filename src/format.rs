use std::{
    fmt,
    fs::File,
    io::{Read, Seek, SeekFrom},
    path::Path,
};

use crate::error::{Error, Result};
use crate::{presto, psrfits, sigproc};

/// The observation file formats understood by the crate.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum Format {
    /// SIGPROC filterbank: keyword header followed by the channelised sample stream
    Filterbank,
    /// SIGPROC dedispersed time series: same header layout, single 32-bit channel
    PrestoTim,
    /// PRESTO time series: headerless 32-bit floats with a `.inf` text sidecar
    PrestoDat,
    /// PSRFITS search mode data
    PsrFits,
}

impl Format {
    pub fn extension(&self) -> &'static str {
        match *self {
            Format::Filterbank => "fil",
            Format::PrestoTim => "tim",
            Format::PrestoDat => "dat",
            Format::PsrFits => "fits",
        }
    }

    /// True when header and payload share one file.
    pub fn has_inline_header(&self) -> bool {
        *self != Format::PrestoDat
    }
}

impl fmt::Display for Format {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match *self {
            Format::Filterbank => "SIGPROC filterbank",
            Format::PrestoTim => "SIGPROC time series",
            Format::PrestoDat => "PRESTO time series",
            Format::PsrFits => "PSRFITS",
        };
        f.write_str(name)
    }
}

/// Bytes read from the start of a file to recognise it.
const PROBE_LEN: usize = 80;

/// Classifies the file at `path`. The file is closed again before returning.
pub fn detect(path: &Path) -> Result<Format> {
    let mut file = File::open(path).map_err(Error::Read)?;
    detect_reader(&mut file, path)
}

/// Classifies an open file. `path` is only consulted for its extension and sidecars.
/// The reader is left at offset 0 on success.
pub fn detect_reader<R: Read + Seek>(reader: &mut R, path: &Path) -> Result<Format> {
    reader.seek(SeekFrom::Start(0)).map_err(Error::Read)?;
    let mut probe = Vec::with_capacity(PROBE_LEN);
    reader
        .by_ref()
        .take(PROBE_LEN as u64)
        .read_to_end(&mut probe)
        .map_err(Error::Read)?;
    reader.seek(SeekFrom::Start(0)).map_err(Error::Read)?;

    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase());

    if sigproc::is_sigproc(&probe) {
        return Ok(match extension.as_deref() {
            Some("tim") => Format::PrestoTim,
            _ => Format::Filterbank,
        });
    }
    if psrfits::is_fits(&probe) {
        return Ok(Format::PsrFits);
    }
    if extension.as_deref() == Some("dat") && presto::inf_path(path).is_file() {
        return Ok(Format::PrestoDat);
    }
    Err(Error::UnknownFormat(path.to_path_buf()))
}
