//! Positional little-endian reads over a seekable input.

use crate::error::LoadErrorKind;

use byteorder::{LittleEndian, ReadBytesExt};

use std::io::{self, Read, Seek, SeekFrom};

/// A thin reader giving the loader little-endian primitives,
/// length-prefixed strings and seek/tell. Every primitive read either
/// returns a value or fails the load; short reads near EOF are never
/// zero-extended.
#[derive(Debug)]
pub struct BinaryReader<R> {
    input: R,
}

impl<R: Read + Seek> BinaryReader<R> {
    /// Wrap an input stream positioned at the start of a module.
    pub fn new(input: R) -> Self {
        BinaryReader { input }
    }

    fn wrap(&mut self, err: io::Error) -> LoadErrorKind {
        if err.kind() == io::ErrorKind::UnexpectedEof {
            LoadErrorKind::Truncated { offset: self.tell() }
        } else {
            LoadErrorKind::Io(err)
        }
    }

    /// Read one byte.
    pub fn read_u8(&mut self) -> Result<u8, LoadErrorKind> {
        self.input.read_u8().map_err(|e| self.wrap(e))
    }

    /// Read a little-endian 16-bit integer.
    pub fn read_u16(&mut self) -> Result<u16, LoadErrorKind> {
        self.input.read_u16::<LittleEndian>().map_err(|e| self.wrap(e))
    }

    /// Read a little-endian 32-bit integer.
    pub fn read_u32(&mut self) -> Result<u32, LoadErrorKind> {
        self.input.read_u32::<LittleEndian>().map_err(|e| self.wrap(e))
    }

    /// Read a little-endian 64-bit integer.
    pub fn read_u64(&mut self) -> Result<u64, LoadErrorKind> {
        self.input.read_u64::<LittleEndian>().map_err(|e| self.wrap(e))
    }

    /// Read `buf.len()` raw bytes.
    pub fn read_exact(&mut self, buf: &mut [u8]) -> Result<(), LoadErrorKind> {
        self.input.read_exact(buf).map_err(|e| self.wrap(e))
    }

    /// Read a string prefixed with its 16-bit byte length.
    pub fn read_len_string(&mut self) -> Result<String, LoadErrorKind> {
        let start = self.tell();
        let len = self.read_u16()? as usize;

        let mut bytes = vec![0u8; len];
        self.read_exact(&mut bytes)?;

        String::from_utf8(bytes).map_err(|_| LoadErrorKind::BadString { offset: start })
    }

    /// Current file offset.
    pub fn tell(&mut self) -> u64 {
        // A stream that can't report its position can't have been seekable
        // enough to get here.
        self.input.stream_position().unwrap_or(u64::MAX)
    }

    /// Seek to an absolute offset.
    pub fn seek_set(&mut self, offset: u64) -> Result<(), LoadErrorKind> {
        self.input
            .seek(SeekFrom::Start(offset))
            .map(|_| ())
            .map_err(|e| self.wrap(e))
    }

    /// Seek relative to the current offset.
    pub fn seek_cur(&mut self, delta: i64) -> Result<(), LoadErrorKind> {
        self.input
            .seek(SeekFrom::Current(delta))
            .map(|_| ())
            .map_err(|e| self.wrap(e))
    }

    /// Whether the input is exactly at end of file.
    pub fn is_at_eof(&mut self) -> Result<bool, LoadErrorKind> {
        let mut probe = [0u8; 1];
        match self.input.read(&mut probe) {
            Ok(0) => Ok(true),
            Ok(_) => {
                self.seek_cur(-1)?;
                Ok(false)
            }
            Err(e) => Err(self.wrap(e)),
        }
    }
}
