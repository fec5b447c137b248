use std::{
    fs::{File, OpenOptions},
    path::{Path, PathBuf},
};

use crate::error::{Error, Result};
use crate::format::Format;
use crate::metadata::ObservationMetadata;
use crate::presto::PrestoDatCodec;
use crate::psrfits::PsrFitsCodec;
use crate::sigproc::SigprocCodec;

/// How the payload file is opened once the header has been written.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum PayloadMode {
    /// The header was written to the same file, samples go after it
    Append,
    /// The header lives elsewhere, the payload file starts empty
    Truncate,
}

/// Translates between a format's native header and [`ObservationMetadata`].
///
/// `path` is always the file holding the samples. Formats with a sidecar header
/// (PRESTO `.dat`) locate it from there.
pub trait MetadataCodec {
    fn format(&self) -> Format;

    /// Reads and validates the header of `path`.
    fn read(&self, path: &Path) -> Result<ObservationMetadata>;

    /// Creates the header for `meta`, replacing any existing file. Returns the number
    /// of header bytes that precede the payload in the payload file.
    fn write(&self, path: &Path, meta: &ObservationMetadata) -> Result<u64>;

    /// The file holding the samples that the header at `header_path` describes.
    fn payload_path(&self, header_path: &Path) -> PathBuf {
        header_path.to_path_buf()
    }

    fn payload_mode(&self) -> PayloadMode {
        if self.format().has_inline_header() {
            PayloadMode::Append
        } else {
            PayloadMode::Truncate
        }
    }

    /// Opens the payload file of `path` after [`MetadataCodec::write`] has run.
    fn open_payload(&self, path: &Path) -> Result<File> {
        let mut options = OpenOptions::new();
        match self.payload_mode() {
            PayloadMode::Append => options.append(true),
            PayloadMode::Truncate => options.write(true).create(true).truncate(true),
        };
        options.open(path).map_err(Error::Write)
    }
}

pub fn codec_for(format: Format) -> Box<dyn MetadataCodec> {
    match format {
        Format::Filterbank | Format::PrestoTim => Box::new(SigprocCodec::new(format)),
        Format::PrestoDat => Box::new(PrestoDatCodec),
        Format::PsrFits => Box::new(PsrFitsCodec::default()),
    }
}
