//! Byte-stream primitives: little-endian scalars, base-128 varints and
//! length-prefixed UTF-8 strings.
//!
//! The writer and reader are deliberately non-generic (they wrap trait
//! objects) so the type registry can hold plain `fn` pointers to write and
//! read delegates instead of monomorphizing the whole archive per stream
//! type.

use std::io::{Read, Seek, SeekFrom, Write};

use bytemuck::Pod;
use tidepool_core::Pooled;

use super::error::{ArchiveError, FormatError};

/// Strings at most this long are decoded through a stack buffer; longer
/// ones go through the session's pooled heap buffer.
const STACK_STRING_LIMIT: usize = 128;

/// Combined `Write + Seek` bound for archive output streams. Seeking is
/// needed to patch the bookkeeping slot at the start of a finished archive.
pub trait WriteSeek: Write + Seek {}

impl<T: Write + Seek + ?Sized> WriteSeek for T {}

/// Binary writer over an output stream.
///
/// All multi-byte scalars are little-endian. Lengths and counts use the
/// variable-length `u32` encoding ([`write_var_u32`](Self::write_var_u32)).
pub struct ArchiveWriter<'a> {
    stream: &'a mut dyn WriteSeek,
}

impl<'a> ArchiveWriter<'a> {
    pub fn new(stream: &'a mut dyn WriteSeek) -> Self {
        Self { stream }
    }

    pub fn position(&mut self) -> Result<u64, ArchiveError> {
        Ok(self.stream.stream_position()?)
    }

    pub fn seek_to(&mut self, position: u64) -> Result<(), ArchiveError> {
        self.stream.seek(SeekFrom::Start(position))?;
        Ok(())
    }

    pub fn write_bytes(&mut self, bytes: &[u8]) -> Result<(), ArchiveError> {
        self.stream.write_all(bytes)?;
        Ok(())
    }

    pub fn write_u8(&mut self, value: u8) -> Result<(), ArchiveError> {
        self.write_bytes(&[value])
    }

    pub fn write_u16(&mut self, value: u16) -> Result<(), ArchiveError> {
        self.write_bytes(&value.to_le_bytes())
    }

    pub fn write_u32(&mut self, value: u32) -> Result<(), ArchiveError> {
        self.write_bytes(&value.to_le_bytes())
    }

    pub fn write_u64(&mut self, value: u64) -> Result<(), ArchiveError> {
        self.write_bytes(&value.to_le_bytes())
    }

    pub fn write_i32(&mut self, value: i32) -> Result<(), ArchiveError> {
        self.write_bytes(&value.to_le_bytes())
    }

    pub fn write_i64(&mut self, value: i64) -> Result<(), ArchiveError> {
        self.write_bytes(&value.to_le_bytes())
    }

    pub fn write_f32(&mut self, value: f32) -> Result<(), ArchiveError> {
        self.write_bytes(&value.to_le_bytes())
    }

    pub fn write_f64(&mut self, value: f64) -> Result<(), ArchiveError> {
        self.write_bytes(&value.to_le_bytes())
    }

    pub fn write_bool(&mut self, value: bool) -> Result<(), ArchiveError> {
        self.write_u8(value as u8)
    }

    /// Writes `value` in base-128 encoding, 7 bits per byte, least
    /// significant group first, high bit as the continuation flag.
    /// Takes 1 to 5 bytes.
    pub fn write_var_u32(&mut self, mut value: u32) -> Result<(), ArchiveError> {
        loop {
            let mut byte = (value & 0x7F) as u8;
            value >>= 7;
            if value != 0 {
                byte |= 0x80;
            }
            self.write_u8(byte)?;
            if value == 0 {
                return Ok(());
            }
        }
    }

    /// Writes a varint byte length followed by the UTF-8 bytes.
    pub fn write_string(&mut self, value: &str) -> Result<(), ArchiveError> {
        let len = u32::try_from(value.len())
            .map_err(|_| ArchiveError::Protocol("string longer than u32::MAX bytes".into()))?;
        self.write_var_u32(len)?;
        self.write_bytes(value.as_bytes())
    }

    /// Writes any plain-old-data value as its raw little-endian bytes.
    /// Only meaningful for `#[repr(C)]` types with a stable layout.
    pub fn write_pod<T: Pod>(&mut self, value: &T) -> Result<(), ArchiveError> {
        self.write_bytes(bytemuck::bytes_of(value))
    }
}

/// Binary reader over an input stream.
///
/// Every decoding method treats a short read as [`FormatError::UnexpectedEof`].
pub struct ArchiveReader<'a> {
    stream: &'a mut dyn Read,
    // Reused heap buffer for strings longer than the stack limit. Held
    // pooled between uses so one allocation serves the whole session.
    scratch: Pooled<Vec<u8>>,
}

impl<'a> ArchiveReader<'a> {
    pub fn new(stream: &'a mut dyn Read) -> Self {
        Self {
            stream,
            scratch: Pooled::default(),
        }
    }

    pub fn read_bytes(&mut self, buf: &mut [u8]) -> Result<(), ArchiveError> {
        self.stream
            .read_exact(buf)
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::UnexpectedEof => FormatError::UnexpectedEof.into(),
                _ => ArchiveError::Io(e),
            })
    }

    pub fn read_u8(&mut self) -> Result<u8, ArchiveError> {
        let mut buf = [0u8; 1];
        self.read_bytes(&mut buf)?;
        Ok(buf[0])
    }

    pub fn read_u16(&mut self) -> Result<u16, ArchiveError> {
        let mut buf = [0u8; 2];
        self.read_bytes(&mut buf)?;
        Ok(u16::from_le_bytes(buf))
    }

    pub fn read_u32(&mut self) -> Result<u32, ArchiveError> {
        let mut buf = [0u8; 4];
        self.read_bytes(&mut buf)?;
        Ok(u32::from_le_bytes(buf))
    }

    pub fn read_u64(&mut self) -> Result<u64, ArchiveError> {
        let mut buf = [0u8; 8];
        self.read_bytes(&mut buf)?;
        Ok(u64::from_le_bytes(buf))
    }

    pub fn read_i32(&mut self) -> Result<i32, ArchiveError> {
        let mut buf = [0u8; 4];
        self.read_bytes(&mut buf)?;
        Ok(i32::from_le_bytes(buf))
    }

    pub fn read_i64(&mut self) -> Result<i64, ArchiveError> {
        let mut buf = [0u8; 8];
        self.read_bytes(&mut buf)?;
        Ok(i64::from_le_bytes(buf))
    }

    pub fn read_f32(&mut self) -> Result<f32, ArchiveError> {
        let mut buf = [0u8; 4];
        self.read_bytes(&mut buf)?;
        Ok(f32::from_le_bytes(buf))
    }

    pub fn read_f64(&mut self) -> Result<f64, ArchiveError> {
        let mut buf = [0u8; 8];
        self.read_bytes(&mut buf)?;
        Ok(f64::from_le_bytes(buf))
    }

    pub fn read_bool(&mut self) -> Result<bool, ArchiveError> {
        match self.read_u8()? {
            0 => Ok(false),
            1 => Ok(true),
            _ => Err(FormatError::Malformed("boolean byte").into()),
        }
    }

    /// Reads a base-128 varint. At most 5 bytes; a continuation flag on the
    /// fifth byte or a value overflowing 32 bits is a format error.
    pub fn read_var_u32(&mut self) -> Result<u32, ArchiveError> {
        let mut result: u32 = 0;
        let mut shift = 0;
        for index in 0..5 {
            let byte = self.read_u8()?;
            let group = (byte & 0x7F) as u32;
            if index == 4 && (byte & 0x80 != 0 || group > 0x0F) {
                return Err(FormatError::VarIntTooLong.into());
            }
            result |= group << shift;
            if byte & 0x80 == 0 {
                return Ok(result);
            }
            shift += 7;
        }
        // The fifth iteration always returns or errors.
        Err(FormatError::VarIntTooLong.into())
    }

    /// Reads a varint byte length followed by that many UTF-8 bytes.
    pub fn read_string(&mut self) -> Result<String, ArchiveError> {
        let len = self.read_var_u32()? as usize;
        if len == 0 {
            return Ok(String::new());
        }
        if len <= STACK_STRING_LIMIT {
            let mut buf = [0u8; STACK_STRING_LIMIT];
            self.read_bytes(&mut buf[..len])?;
            let text =
                std::str::from_utf8(&buf[..len]).map_err(|_| FormatError::InvalidUtf8)?;
            return Ok(text.to_owned());
        }
        let buf = self.scratch.activate();
        buf.resize(len, 0);
        let result = self
            .stream
            .read_exact(buf)
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::UnexpectedEof => ArchiveError::from(FormatError::UnexpectedEof),
                _ => ArchiveError::Io(e),
            })
            .and_then(|_| {
                std::str::from_utf8(buf)
                    .map(str::to_owned)
                    .map_err(|_| FormatError::InvalidUtf8.into())
            });
        self.scratch.release();
        result
    }

    /// Reads a plain-old-data value from its raw little-endian bytes.
    pub fn read_pod<T: Pod>(&mut self) -> Result<T, ArchiveError> {
        let mut value = T::zeroed();
        self.read_bytes(bytemuck::bytes_of_mut(&mut value))?;
        Ok(value)
    }
}
