//! Bounded little/big-endian reads over a byte source.

use super::model_trait::ByteSource;
use std::io::{self, Read, SeekFrom};

const SHORT_SKIP: u64 = 4096;

/// Length of the source, leaving the read position where it was.
pub fn source_len(src: &mut dyn ByteSource) -> io::Result<u64> {
    let pos = src.stream_position()?;
    let end = src.seek(SeekFrom::End(0))?;
    src.seek(SeekFrom::Start(pos))?;
    Ok(end)
}

fn eof(what: &str) -> io::Error {
    io::Error::new(io::ErrorKind::UnexpectedEof, what.to_string())
}

/// Cursor-like reader that knows the total length of its source, so a
/// corrupt length field is rejected before anything is allocated.
pub struct Reader<'a> {
    src: &'a mut dyn ByteSource,
    len: u64,
    pos: u64,
    big_endian: bool,
}

impl<'a> Reader<'a> {
    pub fn new(src: &'a mut dyn ByteSource) -> io::Result<Self> {
        let len = source_len(src)?;
        let pos = src.stream_position()?;
        Ok(Self {
            src,
            len,
            pos,
            big_endian: false,
        })
    }

    pub fn set_big_endian(&mut self, big_endian: bool) {
        self.big_endian = big_endian;
    }

    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn position(&self) -> u64 {
        self.pos
    }

    pub fn remaining(&self) -> u64 {
        self.len.saturating_sub(self.pos)
    }

    fn fill<const N: usize>(&mut self) -> io::Result<[u8; N]> {
        let mut buf = [0u8; N];
        self.src.read_exact(&mut buf)?;
        self.pos += N as u64;
        Ok(buf)
    }

    pub fn read_u8(&mut self) -> io::Result<u8> {
        Ok(self.fill::<1>()?[0])
    }

    pub fn read_u16(&mut self) -> io::Result<u16> {
        let b = self.fill::<2>()?;
        Ok(if self.big_endian { u16::from_be_bytes(b) } else { u16::from_le_bytes(b) })
    }

    pub fn read_u32(&mut self) -> io::Result<u32> {
        let b = self.fill::<4>()?;
        Ok(if self.big_endian { u32::from_be_bytes(b) } else { u32::from_le_bytes(b) })
    }

    pub fn read_u64(&mut self) -> io::Result<u64> {
        let b = self.fill::<8>()?;
        Ok(if self.big_endian { u64::from_be_bytes(b) } else { u64::from_le_bytes(b) })
    }

    pub fn read_i8(&mut self) -> io::Result<i8> {
        Ok(self.read_u8()? as i8)
    }

    pub fn read_i16(&mut self) -> io::Result<i16> {
        Ok(self.read_u16()? as i16)
    }

    pub fn read_i32(&mut self) -> io::Result<i32> {
        Ok(self.read_u32()? as i32)
    }

    pub fn read_i64(&mut self) -> io::Result<i64> {
        Ok(self.read_u64()? as i64)
    }

    pub fn read_f32(&mut self) -> io::Result<f32> {
        Ok(f32::from_bits(self.read_u32()?))
    }

    pub fn read_f64(&mut self) -> io::Result<f64> {
        Ok(f64::from_bits(self.read_u64()?))
    }

    /// Reads `n` bytes, failing with `UnexpectedEof` if fewer remain.
    pub fn read_bytes(&mut self, n: u64) -> io::Result<Vec<u8>> {
        if n > self.remaining() {
            return Err(eof("length runs past end of input"));
        }
        let mut buf = vec![0u8; n as usize];
        self.src.read_exact(&mut buf)?;
        self.pos += n;
        Ok(buf)
    }

    /// Moves forward `n` bytes. Short skips are read and discarded so a
    /// buffered source keeps its buffer.
    pub fn skip(&mut self, n: u64) -> io::Result<()> {
        if n > self.remaining() {
            return Err(eof("skip runs past end of input"));
        }
        if n <= SHORT_SKIP {
            let copied = io::copy(&mut (&mut *self.src).take(n), &mut io::sink())?;
            if copied < n {
                return Err(eof("source ended during skip"));
            }
            self.pos += n;
        } else {
            self.pos = self.src.seek(SeekFrom::Current(n as i64))?;
        }
        Ok(())
    }

    /// Seeks to the last byte and reads it, confirming the whole source is
    /// reachable. Leaves the position at the end.
    pub fn touch_end(&mut self) -> io::Result<()> {
        if self.len == 0 {
            return Ok(());
        }
        self.pos = self.src.seek(SeekFrom::Start(self.len - 1))?;
        self.read_u8()?;
        Ok(())
    }
}
