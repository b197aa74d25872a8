//! Packed little-endian CDR reader/writer
//!
//! Every payload starts with the 4-byte CDR-LE encapsulation header, followed
//! by the fields in declaration order with no alignment padding. Sequences are
//! prefixed with a `u32` element count, strings with a `u32` byte length that
//! includes the trailing NUL.

use crate::{Error, Result};

/// CDR little-endian encapsulation header
pub const CDR_LE_HEADER: [u8; 4] = [0x00, 0x01, 0x00, 0x00];

/// Byte sink for message encoding
#[derive(Debug, Default)]
pub struct CdrWriter {
    buf: Vec<u8>,
}

impl CdrWriter {
    /// Create a writer with the encapsulation header already written
    pub fn new() -> Self {
        Self::with_capacity(64)
    }

    /// Create a writer with room for `capacity` body bytes
    pub fn with_capacity(capacity: usize) -> Self {
        let mut buf = Vec::with_capacity(CDR_LE_HEADER.len() + capacity);
        buf.extend_from_slice(&CDR_LE_HEADER);
        Self { buf }
    }

    /// Current write offset (header included)
    #[inline]
    pub fn position(&self) -> usize {
        self.buf.len()
    }

    /// Bytes written from `start` to the current position
    #[inline]
    pub fn written_since(&self, start: usize) -> &[u8] {
        &self.buf[start.min(self.buf.len())..]
    }

    #[inline]
    pub fn write_u8(&mut self, v: u8) {
        self.buf.push(v);
    }

    #[inline]
    pub fn write_bool(&mut self, v: bool) {
        self.buf.push(v as u8);
    }

    #[inline]
    pub fn write_u16(&mut self, v: u16) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    #[inline]
    pub fn write_u32(&mut self, v: u32) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    #[inline]
    pub fn write_f32(&mut self, v: f32) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    /// Write a fixed-size float array (no length prefix)
    pub fn write_f32_array(&mut self, values: &[f32]) {
        for &v in values {
            self.write_f32(v);
        }
    }

    /// Write a sequence length prefix after checking it against `expected`
    pub fn write_seq_len(&mut self, field: &str, len: usize, expected: usize) -> Result<()> {
        if len != expected {
            return Err(Error::Serialization(format!(
                "{field}: expected {expected} entries, got {len}"
            )));
        }
        let len = u32::try_from(len)
            .map_err(|_| Error::Serialization(format!("{field}: sequence too long")))?;
        self.write_u32(len);
        Ok(())
    }

    /// Write a float sequence that must have exactly `expected` entries
    pub fn write_f32_seq(&mut self, field: &str, values: &[f32], expected: usize) -> Result<()> {
        self.write_seq_len(field, values.len(), expected)?;
        self.write_f32_array(values);
        Ok(())
    }

    /// Write a NUL-terminated string
    pub fn write_string(&mut self, s: &str) -> Result<()> {
        if s.as_bytes().contains(&0) {
            return Err(Error::Serialization("string contains NUL byte".into()));
        }
        let len = u32::try_from(s.len() + 1)
            .map_err(|_| Error::Serialization("string too long".into()))?;
        self.write_u32(len);
        self.buf.extend_from_slice(s.as_bytes());
        self.buf.push(0);
        Ok(())
    }

    /// Finish encoding and return the wire bytes
    pub fn finish(self) -> Vec<u8> {
        self.buf
    }
}

/// Bounds-checked cursor over received bytes
#[derive(Debug)]
pub struct CdrReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> CdrReader<'a> {
    /// Validate the encapsulation header and position after it
    pub fn new(data: &'a [u8]) -> Result<Self> {
        if data.len() < CDR_LE_HEADER.len() {
            return Err(Error::Deserialization(format!(
                "payload too short for CDR header ({} bytes)",
                data.len()
            )));
        }
        if data[..2] != CDR_LE_HEADER[..2] {
            return Err(Error::Deserialization(format!(
                "unsupported encapsulation {:02x}{:02x}",
                data[0], data[1]
            )));
        }
        Ok(Self {
            data,
            pos: CDR_LE_HEADER.len(),
        })
    }

    /// Current read offset (header included)
    #[inline]
    pub fn position(&self) -> usize {
        self.pos
    }

    /// Bytes consumed from `start` to the current position
    #[inline]
    pub fn consumed_since(&self, start: usize) -> &'a [u8] {
        &self.data[start.min(self.pos)..self.pos]
    }

    /// Bytes not yet consumed
    #[inline]
    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        if self.remaining() < n {
            return Err(Error::Deserialization(format!(
                "truncated payload: need {n} bytes at offset {}, have {}",
                self.pos,
                self.remaining()
            )));
        }
        let slice = &self.data[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    fn take_array<const N: usize>(&mut self) -> Result<[u8; N]> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    #[inline]
    pub fn read_u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    pub fn read_bool(&mut self) -> Result<bool> {
        match self.read_u8()? {
            0 => Ok(false),
            1 => Ok(true),
            v => Err(Error::Deserialization(format!("invalid bool byte {v}"))),
        }
    }

    #[inline]
    pub fn read_u16(&mut self) -> Result<u16> {
        Ok(u16::from_le_bytes(self.take_array()?))
    }

    #[inline]
    pub fn read_u32(&mut self) -> Result<u32> {
        Ok(u32::from_le_bytes(self.take_array()?))
    }

    #[inline]
    pub fn read_f32(&mut self) -> Result<f32> {
        Ok(f32::from_le_bytes(self.take_array()?))
    }

    /// Read a fixed-size float array (no length prefix)
    pub fn read_f32_array<const N: usize>(&mut self) -> Result<[f32; N]> {
        let mut out = [0f32; N];
        for v in &mut out {
            *v = self.read_f32()?;
        }
        Ok(out)
    }

    /// Read a sequence length prefix and check it against `expected`
    pub fn read_seq_len(&mut self, field: &str, expected: usize) -> Result<usize> {
        let len = self.read_u32()? as usize;
        if len != expected {
            return Err(Error::Deserialization(format!(
                "{field}: expected {expected} entries, got {len}"
            )));
        }
        Ok(len)
    }

    /// Read a float sequence of exactly `expected` entries
    pub fn read_f32_seq(&mut self, field: &str, expected: usize) -> Result<Vec<f32>> {
        let len = self.read_seq_len(field, expected)?;
        // Length was validated, so the allocation is bounded by the layout.
        let mut out = Vec::with_capacity(len);
        for _ in 0..len {
            out.push(self.read_f32()?);
        }
        Ok(out)
    }

    /// Read a NUL-terminated string
    pub fn read_string(&mut self) -> Result<String> {
        let len = self.read_u32()? as usize;
        if len == 0 {
            return Err(Error::Deserialization("string length 0 (missing NUL)".into()));
        }
        let bytes = self.take(len)?;
        let (body, nul) = bytes.split_at(len - 1);
        if nul != [0] {
            return Err(Error::Deserialization("string not NUL-terminated".into()));
        }
        String::from_utf8(body.to_vec())
            .map_err(|e| Error::Deserialization(format!("string is not UTF-8: {e}")))
    }

    /// Fail if bytes remain after the message body
    pub fn finish(self) -> Result<()> {
        if self.remaining() != 0 {
            return Err(Error::Deserialization(format!(
                "{} trailing bytes after message",
                self.remaining()
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_written() {
        let w = CdrWriter::new();
        assert_eq!(w.finish(), CDR_LE_HEADER.to_vec());
    }

    #[test]
    fn test_scalars_little_endian() {
        let mut w = CdrWriter::new();
        w.write_u16(0x1234);
        w.write_u32(0xDEADBEEF);
        let bytes = w.finish();
        assert_eq!(&bytes[4..6], &[0x34, 0x12]);
        assert_eq!(&bytes[6..10], &[0xEF, 0xBE, 0xAD, 0xDE]);

        let mut r = CdrReader::new(&bytes).unwrap();
        assert_eq!(r.read_u16().unwrap(), 0x1234);
        assert_eq!(r.read_u32().unwrap(), 0xDEADBEEF);
        r.finish().unwrap();
    }

    #[test]
    fn test_string_layout() {
        let mut w = CdrWriter::new();
        w.write_string("ok").unwrap();
        let bytes = w.finish();
        assert_eq!(&bytes[4..], &[3, 0, 0, 0, b'o', b'k', 0]);

        let mut r = CdrReader::new(&bytes).unwrap();
        assert_eq!(r.read_string().unwrap(), "ok");
    }

    #[test]
    fn test_string_rejects_interior_nul() {
        let mut w = CdrWriter::new();
        assert!(matches!(
            w.write_string("a\0b"),
            Err(Error::Serialization(_))
        ));
    }

    #[test]
    fn test_seq_length_mismatch() {
        let mut w = CdrWriter::new();
        let err = w.write_f32_seq("position", &[0.0; 3], 31).unwrap_err();
        assert!(matches!(err, Error::Serialization(_)));

        let mut w = CdrWriter::new();
        w.write_f32_seq("position", &[1.0, 2.0], 2).unwrap();
        let bytes = w.finish();
        let mut r = CdrReader::new(&bytes).unwrap();
        assert!(matches!(
            r.read_f32_seq("position", 3),
            Err(Error::Deserialization(_))
        ));
    }

    #[test]
    fn test_truncated() {
        let bytes = [0x00, 0x01, 0x00, 0x00, 0x01, 0x02];
        let mut r = CdrReader::new(&bytes).unwrap();
        assert!(matches!(r.read_u32(), Err(Error::Deserialization(_))));
    }

    #[test]
    fn test_bad_header() {
        assert!(CdrReader::new(&[0x00, 0x00, 0x00, 0x00]).is_err());
        assert!(CdrReader::new(&[0x00]).is_err());
    }

    #[test]
    fn test_trailing_bytes() {
        let bytes = [0x00, 0x01, 0x00, 0x00, 0xFF];
        let r = CdrReader::new(&bytes).unwrap();
        assert!(r.finish().is_err());
    }
}
