use crate::error::{BinaryError, Result};
use bytes::{Buf, BufMut, Bytes};

/// Checks if the buffer has enough remaining bytes and returns an error if not.
macro_rules! check_remaining {
    ($buf:expr, $len:expr) => {
        let needed = $len;
        let remaining = $buf.remaining();
        if remaining < needed {
            return Err(BinaryError::UnexpectedEof { needed, remaining });
        }
    };
}

/// Extension trait for `bytes::Buf` providing checked reads of the wire
/// primitives used by the vigil protocol.
pub trait ByteReader: Buf {
    #[inline]
    fn read_u8(&mut self) -> Result<u8> {
        check_remaining!(self, 1);
        Ok(self.get_u8())
    }

    /// Reads a single byte as a boolean (`0x00` is false, anything else is true).
    #[inline]
    fn read_bool(&mut self) -> Result<bool> {
        check_remaining!(self, 1);
        Ok(self.get_u8() != 0)
    }

    #[inline]
    fn read_u16_be(&mut self) -> Result<u16> {
        check_remaining!(self, 2);
        Ok(self.get_u16())
    }

    #[inline]
    fn read_u32_be(&mut self) -> Result<u32> {
        check_remaining!(self, 4);
        Ok(self.get_u32())
    }

    #[inline]
    fn read_u64_be(&mut self) -> Result<u64> {
        check_remaining!(self, 8);
        Ok(self.get_u64())
    }

    #[inline]
    fn read_f32_be(&mut self) -> Result<f32> {
        check_remaining!(self, 4);
        Ok(self.get_f32())
    }

    /// Reads exactly `len` raw bytes.
    #[inline]
    fn read_bytes(&mut self, len: usize) -> Result<Bytes> {
        check_remaining!(self, len);
        Ok(self.copy_to_bytes(len))
    }

    /// Reads a UTF-8 string with a u32 big-endian length prefix.
    fn read_string_u32(&mut self) -> Result<String> {
        let len = self.read_u32_be()? as usize;
        let bytes = self.read_bytes(len)?;
        Ok(String::from_utf8(bytes.to_vec())?)
    }

    /// Reads a fixed-width ASCII field and strips the trailing space padding.
    fn read_fixed_str(&mut self, width: usize) -> Result<String> {
        let bytes = self.read_bytes(width)?;
        let s = String::from_utf8(bytes.to_vec())?;
        Ok(s.trim_end().to_string())
    }
}

impl<B: Buf> ByteReader for B {}

/// Extension trait for `bytes::BufMut` mirroring [`ByteReader`].
pub trait ByteWriter: BufMut {
    #[inline]
    fn write_u8(&mut self, value: u8) -> Result<()> {
        self.put_u8(value);
        Ok(())
    }

    #[inline]
    fn write_bool(&mut self, value: bool) -> Result<()> {
        self.put_u8(if value { 1 } else { 0 });
        Ok(())
    }

    #[inline]
    fn write_u16_be(&mut self, value: u16) -> Result<()> {
        self.put_u16(value);
        Ok(())
    }

    #[inline]
    fn write_u32_be(&mut self, value: u32) -> Result<()> {
        self.put_u32(value);
        Ok(())
    }

    #[inline]
    fn write_u64_be(&mut self, value: u64) -> Result<()> {
        self.put_u64(value);
        Ok(())
    }

    #[inline]
    fn write_f32_be(&mut self, value: f32) -> Result<()> {
        self.put_f32(value);
        Ok(())
    }

    #[inline]
    fn write_bytes(&mut self, bytes: &[u8]) -> Result<()> {
        self.put_slice(bytes);
        Ok(())
    }

    /// Writes a UTF-8 string with a u32 big-endian length prefix.
    fn write_string_u32(&mut self, value: &str) -> Result<()> {
        let bytes = value.as_bytes();
        let len: u32 = bytes
            .len()
            .try_into()
            .map_err(|_| BinaryError::InvalidData("string exceeds u32 length".to_string()))?;
        self.put_u32(len);
        self.put_slice(bytes);
        Ok(())
    }

    /// Writes an ASCII field right-padded with spaces to `width` bytes.
    /// Errors when the value is longer than the field.
    fn write_fixed_str(&mut self, value: &str, width: usize) -> Result<()> {
        let bytes = value.as_bytes();
        if bytes.len() > width {
            return Err(BinaryError::InvalidData(format!(
                "value '{}' does not fit in a {}-byte field",
                value, width
            )));
        }
        self.put_slice(bytes);
        for _ in bytes.len()..width {
            self.put_u8(b' ');
        }
        Ok(())
    }
}

impl<B: BufMut> ByteWriter for B {}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::BytesMut;

    #[test]
    fn primitive_round_trip() {
        let mut buf = BytesMut::new();
        buf.write_u8(7).unwrap();
        buf.write_bool(true).unwrap();
        buf.write_u32_be(0xDEAD_BEEF).unwrap();
        buf.write_u64_be(1_700_000_000).unwrap();
        buf.write_f32_be(1.25).unwrap();

        let mut reader = buf.freeze();
        assert_eq!(reader.read_u8().unwrap(), 7);
        assert!(reader.read_bool().unwrap());
        assert_eq!(reader.read_u32_be().unwrap(), 0xDEAD_BEEF);
        assert_eq!(reader.read_u64_be().unwrap(), 1_700_000_000);
        assert_eq!(reader.read_f32_be().unwrap(), 1.25);
        assert!(!reader.has_remaining());
    }

    #[test]
    fn string_u32_round_trip() {
        let mut buf = BytesMut::new();
        buf.write_string_u32("iperf").unwrap();
        let mut reader = buf.freeze();
        assert_eq!(reader.read_string_u32().unwrap(), "iperf");
    }

    #[test]
    fn fixed_str_pads_and_trims() {
        let mut buf = BytesMut::new();
        buf.write_fixed_str("AG1", 5).unwrap();
        let frozen = buf.freeze();
        assert_eq!(&frozen[..], b"AG1  ");

        let mut reader = frozen;
        assert_eq!(reader.read_fixed_str(5).unwrap(), "AG1");
    }

    #[test]
    fn fixed_str_rejects_oversized() {
        let mut buf = BytesMut::new();
        assert!(matches!(
            buf.write_fixed_str("TOOLONG", 5),
            Err(BinaryError::InvalidData(_))
        ));
    }

    #[test]
    fn truncated_read_reports_eof() {
        let mut reader = Bytes::from_static(&[0x01, 0x02]);
        match reader.read_u32_be() {
            Err(BinaryError::UnexpectedEof { needed, remaining }) => {
                assert_eq!(needed, 4);
                assert_eq!(remaining, 2);
            }
            other => panic!("expected eof, got {:?}", other),
        }
    }
}
