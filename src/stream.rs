use byteorder::{BigEndian, ByteOrder, LittleEndian};
use log::debug;
use std::io::{self, Read, Seek, Write};

use crate::error::{Error, Result};
use crate::metadata::SampleDepth;

pub trait ReadSeek: Read + Seek {}

impl<T: Read + Seek> ReadSeek for T {}

#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum Endian {
    Big,
    Little,
}

impl Endian {
    fn read_u16(self, buf: &[u8]) -> u16 {
        match self {
            Endian::Big => BigEndian::read_u16(buf),
            Endian::Little => LittleEndian::read_u16(buf),
        }
    }

    fn write_u16(self, buf: &mut [u8], v: u16) {
        match self {
            Endian::Big => BigEndian::write_u16(buf, v),
            Endian::Little => LittleEndian::write_u16(buf, v),
        }
    }

    fn read_u32(self, buf: &[u8]) -> u32 {
        match self {
            Endian::Big => BigEndian::read_u32(buf),
            Endian::Little => LittleEndian::read_u32(buf),
        }
    }

    fn write_u32(self, buf: &mut [u8], v: u32) {
        match self {
            Endian::Big => BigEndian::write_u32(buf, v),
            Endian::Little => LittleEndian::write_u32(buf, v),
        }
    }
}

/// Moves payload between files a block of time samples at a time, through one buffer
/// allocated up front.
///
/// Counts are in time samples, each one being a sample of every channel. The buffer holds
/// at most `max_samples` of them.
#[derive(Debug)]
pub struct BlockStreamer {
    depth: SampleDepth,
    channels: u32,
    max_samples: u64,
    buf: Vec<u8>,
    filled: usize,
}

impl BlockStreamer {
    pub fn new(depth: SampleDepth, channels: u32, max_samples: u64) -> Result<Self> {
        if channels == 0 || max_samples == 0 {
            return Err(Error::InvalidArgument(format!(
                "cannot stream blocks of {max_samples} samples of {channels} channels"
            )));
        }
        let capacity = Self::block_len(depth, channels, max_samples)?;
        let capacity =
            usize::try_from(capacity).map_err(|_| Error::AllocationFailure(usize::MAX))?;
        let mut buf = Vec::new();
        buf.try_reserve_exact(capacity)
            .map_err(|_| Error::AllocationFailure(capacity))?;
        buf.resize(capacity, 0);
        debug!("Allocated a {capacity} byte block for {max_samples} samples");
        Ok(BlockStreamer {
            depth,
            channels,
            max_samples,
            buf,
            filled: 0,
        })
    }

    fn block_len(depth: SampleDepth, channels: u32, samples: u64) -> Result<u64> {
        depth.payload_bytes(samples, channels).ok_or_else(|| {
            Error::InvalidArgument(format!(
                "{samples} samples of {channels} {}-bit channels are not a whole number of bytes",
                depth.bits()
            ))
        })
    }

    /// Payload bytes taken by `samples` time samples.
    pub fn bytes_for(&self, samples: u64) -> Result<u64> {
        Self::block_len(self.depth, self.channels, samples)
    }

    /// Reads up to `samples` time samples, fewer only when the stream ends. A stream that
    /// ends inside a sample is a read error.
    pub fn read_block<R: Read + ?Sized>(
        &mut self,
        reader: &mut R,
        samples: u64,
    ) -> Result<u64> {
        if samples > self.max_samples {
            return Err(Error::InvalidArgument(format!(
                "block of {samples} samples exceeds the {} sample buffer",
                self.max_samples
            )));
        }
        // Bounded by the buffer length, which already fits in memory
        let want = self.bytes_for(samples)? as usize;
        self.filled = 0;
        while self.filled < want {
            match reader.read(&mut self.buf[self.filled..want]) {
                Ok(0) => break,
                Ok(n) => self.filled += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(Error::Read(e)),
            }
        }
        self.depth
            .samples_in(self.filled as u64, self.channels)
            .ok_or_else(|| {
                Error::Read(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    format!("stream ended inside a sample after {} bytes", self.filled),
                ))
            })
    }

    /// Like [`BlockStreamer::read_block`], but anything short of `samples` is a read error.
    pub fn read_exact_block<R: Read + ?Sized>(
        &mut self,
        reader: &mut R,
        samples: u64,
    ) -> Result<()> {
        let read = self.read_block(reader, samples)?;
        if read != samples {
            return Err(Error::Read(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!("expected {samples} samples, stream ended after {read}"),
            )));
        }
        Ok(())
    }

    /// The bytes of the last block read.
    pub fn block(&self) -> &[u8] {
        &self.buf[..self.filled]
    }

    /// Converts the byte order of the last block in place. Samples of a byte or less are
    /// left alone.
    pub fn reencode(&mut self, from: Endian, to: Endian) {
        if from == to {
            return;
        }
        let block = &mut self.buf[..self.filled];
        match self.depth {
            SampleDepth::Bits4 | SampleDepth::Bits8 => {}
            SampleDepth::Bits16 => {
                for sample in block.chunks_exact_mut(2) {
                    let v = from.read_u16(sample);
                    to.write_u16(sample, v);
                }
            }
            SampleDepth::Bits32 => {
                for sample in block.chunks_exact_mut(4) {
                    let v = from.read_u32(sample);
                    to.write_u32(sample, v);
                }
            }
        }
    }

    /// Writes the whole of the last block read.
    pub fn write_block<W: Write>(&self, writer: &mut W) -> Result<()> {
        writer.write_all(self.block()).map_err(Error::Write)
    }
}
