use log::debug;
use std::{
    fs::File,
    io::{self, BufReader, Read, Seek, SeekFrom, Write},
    path::Path,
};

use crate::error::{Error, Result};
use crate::session;

pub const DEFAULT_BUFFER_BYTES: usize = 1 << 20;

/// Byte for byte payload copy between formats that store samples identically.
pub struct RawCopier {
    buf: Vec<u8>,
}

impl RawCopier {
    pub fn new(buffer_bytes: usize) -> Result<Self> {
        if buffer_bytes == 0 {
            return Err(Error::InvalidArgument("copy buffer of zero bytes".into()));
        }
        let mut buf = Vec::new();
        buf.try_reserve_exact(buffer_bytes)
            .map_err(|_| Error::AllocationFailure(buffer_bytes))?;
        buf.resize(buffer_bytes, 0);
        Ok(RawCopier { buf })
    }

    /// Copies everything after the first `header_len` bytes of `src` to `dst`. Returns the
    /// number of bytes copied, which is checked against the size of `src`.
    pub fn copy<W: Write>(&mut self, src: &Path, header_len: u64, dst: &mut W) -> Result<u64> {
        let mut file = File::open(src).map_err(Error::Read)?;
        let file_len = file.metadata().map_err(Error::Read)?.len();
        let expected = file_len.checked_sub(header_len).ok_or_else(|| {
            Error::corrupt(
                src,
                format!("{header_len} byte header in a {file_len} byte file"),
            )
        })?;
        file.seek(SeekFrom::Start(header_len))
            .map_err(Error::Read)?;
        debug!("Copying {expected} bytes from {}", src.display());
        self.copy_reader(&mut BufReader::new(file), expected, dst)
    }

    /// Copies `reader` to its end, which must come after exactly `expected` bytes.
    pub fn copy_reader<R: Read, W: Write>(
        &mut self,
        reader: &mut R,
        expected: u64,
        dst: &mut W,
    ) -> Result<u64> {
        let mut copied = 0u64;
        loop {
            session::check_abort()?;
            let n = match reader.read(&mut self.buf) {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(Error::Read(e)),
            };
            dst.write_all(&self.buf[..n]).map_err(Error::Write)?;
            copied += n as u64;
        }
        if copied != expected {
            return Err(Error::IncompleteCopy { copied, expected });
        }
        Ok(copied)
    }
}

#[cfg(test)]
mod copy_tests {
    use super::*;
    use proptest::prelude::*;
    use std::io::Cursor;

    proptest! {
        #[test]
        fn copies_every_payload_byte(
            header_len in 0u64..64,
            payload in proptest::collection::vec(any::<u8>(), 0..5000),
            buffer in 1usize..700,
        ) {
            let dir = tempfile::tempdir().unwrap();
            let src = dir.path().join("src.tim");
            let mut bytes = vec![0xffu8; header_len as usize];
            bytes.extend_from_slice(&payload);
            std::fs::write(&src, &bytes).unwrap();

            let mut out = Vec::new();
            let copied = RawCopier::new(buffer).unwrap().copy(&src, header_len, &mut out).unwrap();
            prop_assert_eq!(copied, payload.len() as u64);
            prop_assert_eq!(out, payload);
        }
    }

    #[test]
    fn short_source_is_incomplete() {
        let mut copier = RawCopier::new(16).unwrap();
        let mut out = Vec::new();
        let err = copier
            .copy_reader(&mut Cursor::new(vec![0u8; 40]), 50, &mut out)
            .unwrap_err();
        assert!(matches!(
            err,
            Error::IncompleteCopy {
                copied: 40,
                expected: 50
            }
        ));
    }

    #[test]
    fn header_longer_than_file() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("tiny.tim");
        std::fs::write(&src, [0u8; 10]).unwrap();
        let err = RawCopier::new(4)
            .unwrap()
            .copy(&src, 11, &mut Vec::new())
            .unwrap_err();
        assert!(matches!(err, Error::CorruptHeader { .. }));
    }

    #[test]
    fn failing_destination_is_write_error() {
        struct Full;
        impl Write for Full {
            fn write(&mut self, _: &[u8]) -> io::Result<usize> {
                Err(io::Error::new(io::ErrorKind::StorageFull, "disk full"))
            }
            fn flush(&mut self) -> io::Result<()> {
                Ok(())
            }
        }
        let mut copier = RawCopier::new(8).unwrap();
        let err = copier
            .copy_reader(&mut Cursor::new(vec![1u8; 8]), 8, &mut Full)
            .unwrap_err();
        assert!(matches!(err, Error::Write(_)));
    }

    #[test]
    fn zero_sized_buffer() {
        assert!(matches!(
            RawCopier::new(0),
            Err(Error::InvalidArgument(_))
        ));
    }
}
