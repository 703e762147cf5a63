//! Byte Codec for On-Disk Structures
//!
//! All persisted structures (block headers, column headers, stream tags,
//! data blocks) are built from four primitives:
//!
//! - **Fixed-width integers**: big-endian `u8`/`u16`/`u32`/`u64`/`i64`/`u128`
//! - **Varints**: LEB128 unsigned varints, 7 data bits per byte with a
//!   continuation flag in the high bit
//! - **ZigZag varints**: signed integers mapped to unsigned first
//!   (0 → 0, -1 → 1, 1 → 2, ...) so small negative deltas stay short
//! - **Byte strings**: a varint length followed by the raw bytes
//!
//! ## Encoding
//!
//! Encoders append to any [`BufMut`] (usually a `Vec<u8>`), mirroring the
//! "append to dst" style used by every `marshal` method in the workspace.
//!
//! ## Decoding
//!
//! Decoders take a cursor `&mut &[u8]` and advance it only on success. A
//! decoder never panics on short or malformed input; it returns
//! [`Error::UnexpectedEof`] or [`Error::Decode`] instead.
//!
//! ```ignore
//! let mut buf = Vec::new();
//! marshal_var_u64(&mut buf, 300);
//! marshal_bytes(&mut buf, b"foo");
//!
//! let mut src = buf.as_slice();
//! assert_eq!(unmarshal_var_u64(&mut src)?, 300);
//! assert_eq!(unmarshal_bytes(&mut src)?, b"foo");
//! ```

use crate::error::{Error, Result};
use bytes::{Buf, BufMut};

/// Maximum number of bytes in a LEB128-encoded u64.
pub const MAX_VARINT_LEN: usize = 10;

/// Encode an unsigned integer as a varint
pub fn marshal_var_u64(dst: &mut impl BufMut, mut value: u64) {
    loop {
        let mut byte = (value & 0x7F) as u8;
        value >>= 7;
        if value != 0 {
            byte |= 0x80;
        }
        dst.put_u8(byte);
        if value == 0 {
            break;
        }
    }
}

/// Encode a signed integer as a ZigZag varint
pub fn marshal_var_i64(dst: &mut impl BufMut, value: i64) {
    let unsigned = ((value << 1) ^ (value >> 63)) as u64;
    marshal_var_u64(dst, unsigned);
}

/// Encode a length-prefixed byte string
pub fn marshal_bytes(dst: &mut impl BufMut, data: &[u8]) {
    marshal_var_u64(dst, data.len() as u64);
    dst.put_slice(data);
}

/// Returns the number of bytes `marshal_var_u64(value)` occupies.
pub fn var_u64_len(mut value: u64) -> usize {
    let mut n = 1;
    while value >= 0x80 {
        value >>= 7;
        n += 1;
    }
    n
}

/// Decode a varint, advancing `src` past it.
pub fn unmarshal_var_u64(src: &mut &[u8]) -> Result<u64> {
    let data: &[u8] = *src;
    let mut value: u64 = 0;
    let mut shift = 0u32;
    for (i, &byte) in data.iter().enumerate() {
        if i >= MAX_VARINT_LEN || (i == MAX_VARINT_LEN - 1 && byte > 1) {
            return Err(Error::decode("varint overflows u64"));
        }
        value |= u64::from(byte & 0x7F) << shift;
        if byte & 0x80 == 0 {
            *src = &data[i + 1..];
            return Ok(value);
        }
        shift += 7;
    }
    Err(Error::UnexpectedEof {
        what: "varint",
        need: data.len() + 1,
        have: data.len(),
    })
}

/// Decode a ZigZag varint, advancing `src` past it.
pub fn unmarshal_var_i64(src: &mut &[u8]) -> Result<i64> {
    let unsigned = unmarshal_var_u64(src)?;
    let value = (unsigned >> 1) as i64;
    if unsigned & 1 != 0 {
        Ok(!value)
    } else {
        Ok(value)
    }
}

/// Decode a length-prefixed byte string, borrowing it from `src`.
pub fn unmarshal_bytes<'a>(src: &mut &'a [u8]) -> Result<&'a [u8]> {
    let mut cursor = *src;
    let len = unmarshal_var_u64(&mut cursor)?;
    if (cursor.len() as u64) < len {
        return Err(Error::UnexpectedEof {
            what: "length-prefixed bytes",
            need: len as usize,
            have: cursor.len(),
        });
    }
    let (data, tail) = cursor.split_at(len as usize);
    *src = tail;
    Ok(data)
}

/// Decode a length-prefixed utf-8 string.
pub fn unmarshal_string(src: &mut &[u8]) -> Result<String> {
    let mut cursor = *src;
    let data = unmarshal_bytes(&mut cursor)?;
    let s = std::str::from_utf8(data)
        .map_err(|err| Error::decode(format!("invalid utf-8 in string: {err}")))?;
    *src = cursor;
    Ok(s.to_string())
}

fn ensure_len(src: &[u8], need: usize, what: &'static str) -> Result<()> {
    if src.len() < need {
        return Err(Error::UnexpectedEof {
            what,
            need,
            have: src.len(),
        });
    }
    Ok(())
}

pub fn unmarshal_u8(src: &mut &[u8]) -> Result<u8> {
    ensure_len(src, 1, "u8")?;
    Ok(src.get_u8())
}

pub fn unmarshal_u16(src: &mut &[u8]) -> Result<u16> {
    ensure_len(src, 2, "u16")?;
    Ok(src.get_u16())
}

pub fn unmarshal_u32(src: &mut &[u8]) -> Result<u32> {
    ensure_len(src, 4, "u32")?;
    Ok(src.get_u32())
}

pub fn unmarshal_u64(src: &mut &[u8]) -> Result<u64> {
    ensure_len(src, 8, "u64")?;
    Ok(src.get_u64())
}

pub fn unmarshal_i64(src: &mut &[u8]) -> Result<i64> {
    ensure_len(src, 8, "i64")?;
    Ok(src.get_i64())
}

pub fn unmarshal_u128(src: &mut &[u8]) -> Result<u128> {
    ensure_len(src, 16, "u128")?;
    Ok(src.get_u128())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_var_u64_small() {
        let mut buf = Vec::new();
        marshal_var_u64(&mut buf, 5);
        assert_eq!(buf, vec![5]);

        let mut src = buf.as_slice();
        assert_eq!(unmarshal_var_u64(&mut src).unwrap(), 5);
        assert!(src.is_empty());
    }

    #[test]
    fn test_var_u64_multi_byte() {
        let mut buf = Vec::new();
        marshal_var_u64(&mut buf, 300);
        assert_eq!(buf, vec![0xAC, 0x02]);
        assert_eq!(var_u64_len(300), 2);

        let mut src = buf.as_slice();
        assert_eq!(unmarshal_var_u64(&mut src).unwrap(), 300);
    }

    #[test]
    fn test_var_u64_max() {
        let mut buf = Vec::new();
        marshal_var_u64(&mut buf, u64::MAX);
        assert_eq!(buf.len(), MAX_VARINT_LEN);
        assert_eq!(var_u64_len(u64::MAX), MAX_VARINT_LEN);

        let mut src = buf.as_slice();
        assert_eq!(unmarshal_var_u64(&mut src).unwrap(), u64::MAX);
    }

    #[test]
    fn test_var_u64_truncated_keeps_cursor() {
        let data = [0x80u8, 0x80];
        let mut src = &data[..];
        assert!(matches!(
            unmarshal_var_u64(&mut src),
            Err(Error::UnexpectedEof { .. })
        ));
        assert_eq!(src.len(), 2);
    }

    #[test]
    fn test_var_u64_overflow() {
        let data = [0xFFu8; 11];
        let mut src = &data[..];
        assert!(matches!(unmarshal_var_u64(&mut src), Err(Error::Decode(_))));
    }

    #[test]
    fn test_var_i64_negative() {
        for v in [0i64, -1, 1, -64, 64, i64::MIN, i64::MAX] {
            let mut buf = Vec::new();
            marshal_var_i64(&mut buf, v);
            let mut src = buf.as_slice();
            assert_eq!(unmarshal_var_i64(&mut src).unwrap(), v);
        }

        let mut buf = Vec::new();
        marshal_var_i64(&mut buf, -1);
        assert_eq!(buf, vec![1]);
    }

    #[test]
    fn test_bytes() {
        let mut buf = Vec::new();
        marshal_bytes(&mut buf, b"hello");
        marshal_bytes(&mut buf, b"");

        let mut src = buf.as_slice();
        assert_eq!(unmarshal_bytes(&mut src).unwrap(), b"hello");
        assert_eq!(unmarshal_bytes(&mut src).unwrap(), b"");
        assert!(src.is_empty());
    }

    #[test]
    fn test_bytes_truncated() {
        let mut buf = Vec::new();
        marshal_bytes(&mut buf, b"hello");
        buf.truncate(4);

        let mut src = buf.as_slice();
        assert!(unmarshal_bytes(&mut src).is_err());
        assert_eq!(src.len(), 4);
    }

    #[test]
    fn test_string_invalid_utf8() {
        let mut buf = Vec::new();
        marshal_bytes(&mut buf, &[0xFF, 0xFE]);
        let mut src = buf.as_slice();
        assert!(matches!(unmarshal_string(&mut src), Err(Error::Decode(_))));
    }

    #[test]
    fn test_fixed_width_big_endian() {
        let mut buf = Vec::new();
        buf.put_u16(0x0102);
        buf.put_u32(0x03040506);
        buf.put_u64(7);
        buf.put_i64(-2);
        buf.put_u128(1u128 << 100);
        assert_eq!(&buf[..2], &[1, 2]);

        let mut src = buf.as_slice();
        assert_eq!(unmarshal_u16(&mut src).unwrap(), 0x0102);
        assert_eq!(unmarshal_u32(&mut src).unwrap(), 0x03040506);
        assert_eq!(unmarshal_u64(&mut src).unwrap(), 7);
        assert_eq!(unmarshal_i64(&mut src).unwrap(), -2);
        assert_eq!(unmarshal_u128(&mut src).unwrap(), 1u128 << 100);
        assert!(unmarshal_u8(&mut src).is_err());
    }
}
