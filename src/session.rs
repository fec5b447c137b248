//! Resources owned by one running operation, and the process wide abort request.
//!
//! A [`Session`] owns the transfer buffer and whichever output file is open. Dropping it
//! flushes and closes the output, so an operation that fails or is interrupted still leaves
//! complete files behind up to the last block written. The binary requests an abort from its
//! interrupt handler with [`request_abort`]; streaming loops poll the flag between blocks and
//! unwind with [`Error::Interrupted`], which runs the same release path.

use log::{debug, warn};
use std::{
    fs::File,
    io::{BufWriter, Read, Write},
    path::{Path, PathBuf},
    sync::atomic::{AtomicBool, Ordering},
};

use crate::error::{Error, Result};
use crate::stream::{BlockStreamer, Endian};

/// A one way flag: set by an interrupt handler, polled by the streaming loops.
pub struct AbortFlag(AtomicBool);

impl AbortFlag {
    pub const fn new() -> Self {
        AbortFlag(AtomicBool::new(false))
    }

    /// Safe to call any number of times, from any thread.
    pub fn request(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_requested(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    pub fn check(&self) -> Result<()> {
        if self.is_requested() {
            Err(Error::Interrupted)
        } else {
            Ok(())
        }
    }

    pub fn reset(&self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

impl Default for AbortFlag {
    fn default() -> Self {
        Self::new()
    }
}

static ABORT: AbortFlag = AbortFlag::new();

pub fn request_abort() {
    ABORT.request();
}

pub fn abort_requested() -> bool {
    ABORT.is_requested()
}

pub fn check_abort() -> Result<()> {
    ABORT.check()
}

pub fn reset_abort() {
    ABORT.reset();
}

pub struct Session {
    streamer: BlockStreamer,
    output: Option<(PathBuf, BufWriter<File>)>,
    reencode: Option<(Endian, Endian)>,
    abort: &'static AbortFlag,
}

impl Session {
    pub fn new(streamer: BlockStreamer) -> Self {
        Session {
            streamer,
            output: None,
            reencode: None,
            abort: &ABORT,
        }
    }

    /// Every block transferred is converted from `from` to `to` byte order on the way.
    pub fn with_reencoding(mut self, from: Endian, to: Endian) -> Self {
        self.reencode = Some((from, to));
        self
    }

    /// Polls `abort` instead of the process wide flag.
    pub fn with_abort_flag(mut self, abort: &'static AbortFlag) -> Self {
        self.abort = abort;
        self
    }

    pub fn streamer(&self) -> &BlockStreamer {
        &self.streamer
    }

    /// Makes `file` the destination of transfers, closing the previous one first.
    pub fn open_output(&mut self, path: &Path, file: File) -> Result<()> {
        self.close_output()?;
        debug!("Writing {}", path.display());
        self.output = Some((path.to_path_buf(), BufWriter::new(file)));
        Ok(())
    }

    /// Moves up to `samples` time samples from `reader` to the open output. Returns the
    /// number moved, zero at the end of the stream.
    pub fn transfer<R: Read + ?Sized>(
        &mut self,
        reader: &mut R,
        samples: u64,
    ) -> Result<u64> {
        self.abort.check()?;
        let read = self.streamer.read_block(reader, samples)?;
        self.write_last_block()?;
        Ok(read)
    }

    /// Like [`Session::transfer`], but the stream must hold all `samples`.
    pub fn transfer_exact<R: Read + ?Sized>(
        &mut self,
        reader: &mut R,
        samples: u64,
    ) -> Result<()> {
        self.abort.check()?;
        self.streamer.read_exact_block(reader, samples)?;
        self.write_last_block()
    }

    fn write_last_block(&mut self) -> Result<()> {
        if let Some((from, to)) = self.reencode {
            self.streamer.reencode(from, to);
        }
        let (_, writer) = self.output.as_mut().ok_or_else(|| {
            Error::InvalidArgument("no output is open to transfer into".into())
        })?;
        self.streamer.write_block(writer)
    }

    /// Flushes and closes the open output, returning its path.
    pub fn close_output(&mut self) -> Result<Option<PathBuf>> {
        match self.output.take() {
            Some((path, mut writer)) => {
                writer.flush().map_err(Error::Write)?;
                Ok(Some(path))
            }
            None => Ok(None),
        }
    }

    /// Closes whatever is still open. Failures are logged, not returned, as this also runs
    /// while unwinding from another error. Calling it again does nothing.
    pub fn release(&mut self) {
        if let Some((path, mut writer)) = self.output.take() {
            if let Err(e) = writer.flush() {
                warn!("Could not flush {}: {e}", path.display());
            }
            debug!("Released {}", path.display());
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.release();
    }
}

#[cfg(test)]
mod session_tests {
    use super::*;
    use crate::metadata::SampleDepth;
    use std::io::Cursor;

    fn session(max_samples: u64) -> Session {
        Session::new(BlockStreamer::new(SampleDepth::Bits32, 1, max_samples).unwrap())
    }

    #[test]
    fn transfer_into_output() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.dat");
        let mut session = session(4);
        session
            .open_output(&path, File::create(&path).unwrap())
            .unwrap();

        let mut reader = Cursor::new(vec![1u8; 24]);
        assert_eq!(session.transfer(&mut reader, 4).unwrap(), 4);
        assert_eq!(session.transfer(&mut reader, 4).unwrap(), 2);
        assert_eq!(session.transfer(&mut reader, 4).unwrap(), 0);
        assert_eq!(session.close_output().unwrap(), Some(path.clone()));
        assert_eq!(std::fs::read(&path).unwrap(), vec![1u8; 24]);
    }

    #[test]
    fn transfer_without_output() {
        let mut session = session(4);
        let mut reader = Cursor::new(vec![0u8; 16]);
        assert!(matches!(
            session.transfer(&mut reader, 4),
            Err(Error::InvalidArgument(_))
        ));
    }

    #[test]
    fn reencoding_session() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.fil");
        let mut session = session(2).with_reencoding(Endian::Big, Endian::Little);
        session
            .open_output(&path, File::create(&path).unwrap())
            .unwrap();
        let mut input = 2.5f32.to_be_bytes().to_vec();
        input.extend_from_slice(&(-1.0f32).to_be_bytes());
        session.transfer_exact(&mut Cursor::new(input), 2).unwrap();
        drop(session);

        let mut expected = 2.5f32.to_le_bytes().to_vec();
        expected.extend_from_slice(&(-1.0f32).to_le_bytes());
        assert_eq!(std::fs::read(&path).unwrap(), expected);
    }

    #[test]
    fn drop_flushes_output() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.tim");
        {
            let mut session = session(8);
            session
                .open_output(&path, File::create(&path).unwrap())
                .unwrap();
            session
                .transfer(&mut Cursor::new(vec![3u8; 32]), 8)
                .unwrap();
        }
        assert_eq!(std::fs::metadata(&path).unwrap().len(), 32);
    }

    #[test]
    fn release_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.tim");
        let mut session = session(1);
        session
            .open_output(&path, File::create(&path).unwrap())
            .unwrap();
        session.release();
        session.release();
        assert_eq!(session.close_output().unwrap(), None);
    }

    #[test]
    fn abort_stops_transfer() {
        static FLAG: AbortFlag = AbortFlag::new();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.dat");
        let mut session = session(1).with_abort_flag(&FLAG);
        session
            .open_output(&path, File::create(&path).unwrap())
            .unwrap();
        let mut reader = Cursor::new(vec![0u8; 8]);

        assert_eq!(session.transfer(&mut reader, 1).unwrap(), 1);
        FLAG.request();
        FLAG.request();
        assert!(matches!(
            session.transfer(&mut reader, 1),
            Err(Error::Interrupted)
        ));
        FLAG.reset();
        assert_eq!(session.transfer(&mut reader, 1).unwrap(), 1);
    }
}
