//! Compressed Blocks of Values
//!
//! Column values are written as a *strings block*: the lengths of all values
//! followed by their concatenated bytes. Both halves are written as a *bytes
//! block*:
//!
//! ```text
//! bytes block:
//!   0x00 u8(len) data           -- plain, for data shorter than 128 bytes
//!   0x01 varint(len) lz4(data)  -- lz4 with the decompressed size prepended
//!
//! strings block:
//!   bytes_block(varint(len_0) varint(len_1) ...)
//!   bytes_block(value_0 value_1 ...)
//! ```
//!
//! Short blocks skip compression since lz4 cannot shrink them below the
//! framing overhead.

use crate::error::{Result, StorageError};
use logstore_core::encoding::{marshal_var_u64, unmarshal_u8, unmarshal_var_u64};

const BYTES_BLOCK_PLAIN: u8 = 0;
const BYTES_BLOCK_LZ4: u8 = 1;
const MAX_PLAIN_BLOCK_SIZE: usize = 128;

/// Appends a bytes block holding `data` to `dst`.
pub fn marshal_bytes_block(dst: &mut Vec<u8>, data: &[u8]) {
    if data.len() < MAX_PLAIN_BLOCK_SIZE {
        dst.push(BYTES_BLOCK_PLAIN);
        dst.push(data.len() as u8);
        dst.extend_from_slice(data);
        return;
    }
    let compressed = lz4_flex::compress_prepend_size(data);
    dst.push(BYTES_BLOCK_LZ4);
    marshal_var_u64(dst, compressed.len() as u64);
    dst.extend_from_slice(&compressed);
}

/// Reads a bytes block from `src`. Blocks decompressing to more than `max_size` are rejected.
pub fn unmarshal_bytes_block(src: &mut &[u8], max_size: u64) -> Result<Vec<u8>> {
    let mut cursor = *src;
    let block_type = unmarshal_u8(&mut cursor)?;
    let data = match block_type {
        BYTES_BLOCK_PLAIN => {
            let len = unmarshal_u8(&mut cursor)? as usize;
            if cursor.len() < len {
                return Err(StorageError::Compression(format!(
                    "cannot read plain block of {len} bytes from {} bytes",
                    cursor.len()
                )));
            }
            let (data, tail) = cursor.split_at(len);
            cursor = tail;
            data.to_vec()
        }
        BYTES_BLOCK_LZ4 => {
            let len = unmarshal_var_u64(&mut cursor)?;
            if (cursor.len() as u64) < len {
                return Err(StorageError::Compression(format!(
                    "cannot read compressed block of {len} bytes from {} bytes",
                    cursor.len()
                )));
            }
            let (compressed, tail) = cursor.split_at(len as usize);
            cursor = tail;
            if compressed.len() < 4 {
                return Err(StorageError::Compression(
                    "compressed block is missing its size prefix".to_string(),
                ));
            }
            let size = u32::from_le_bytes([compressed[0], compressed[1], compressed[2], compressed[3]]);
            if u64::from(size) > max_size {
                return Err(StorageError::Compression(format!(
                    "too big decompressed block size: {size} bytes; mustn't exceed {max_size} bytes"
                )));
            }
            lz4_flex::decompress_size_prepended(compressed)
                .map_err(|err| StorageError::Compression(format!("cannot decompress block: {err}")))?
        }
        other => {
            return Err(StorageError::Compression(format!(
                "unexpected bytes block type: {other}"
            )))
        }
    };
    *src = cursor;
    Ok(data)
}

/// Appends a strings block holding `values` to `dst`.
pub fn marshal_strings_block<'a>(dst: &mut Vec<u8>, values: impl IntoIterator<Item = &'a [u8]>) {
    let mut lens = Vec::new();
    let mut data = Vec::new();
    for v in values {
        marshal_var_u64(&mut lens, v.len() as u64);
        data.extend_from_slice(v);
    }
    marshal_bytes_block(dst, &lens);
    marshal_bytes_block(dst, &data);
}

/// Reads exactly `items_count` values from a strings block.
pub fn unmarshal_strings_block(
    src: &mut &[u8],
    items_count: usize,
    max_size: u64,
) -> Result<Vec<Vec<u8>>> {
    let mut cursor = *src;
    let lens = unmarshal_bytes_block(&mut cursor, max_size)?;
    let data = unmarshal_bytes_block(&mut cursor, max_size)?;

    if items_count > lens.len() {
        return Err(StorageError::Compression(format!(
            "lengths block holds {} bytes; cannot contain {items_count} lengths",
            lens.len()
        )));
    }
    let mut lens_src = lens.as_slice();
    let mut data_src = data.as_slice();
    let mut values = Vec::with_capacity(items_count);
    for i in 0..items_count {
        let len = unmarshal_var_u64(&mut lens_src).map_err(|err| {
            StorageError::Compression(format!("cannot read length of value #{i}: {err}"))
        })?;
        if (data_src.len() as u64) < len {
            return Err(StorageError::Compression(format!(
                "value #{i} needs {len} bytes; only {} bytes left",
                data_src.len()
            )));
        }
        let (v, tail) = data_src.split_at(len as usize);
        values.push(v.to_vec());
        data_src = tail;
    }
    if !lens_src.is_empty() || !data_src.is_empty() {
        return Err(StorageError::Compression(format!(
            "unexpected tail after {items_count} values: {} length bytes and {} data bytes",
            lens_src.len(),
            data_src.len()
        )));
    }
    *src = cursor;
    Ok(values)
}

#[cfg(test)]
mod tests {
    use super::*;

    const MAX: u64 = 1 << 20;

    #[test]
    fn test_small_block_is_plain() {
        let mut buf = Vec::new();
        marshal_bytes_block(&mut buf, b"hello");
        assert_eq!(buf, [&[0u8, 5][..], b"hello"].concat());

        let mut src = buf.as_slice();
        assert_eq!(unmarshal_bytes_block(&mut src, MAX).unwrap(), b"hello");
        assert!(src.is_empty());
    }

    #[test]
    fn test_big_block_is_compressed() {
        let data = b"abcdefgh".repeat(100);
        let mut buf = Vec::new();
        marshal_bytes_block(&mut buf, &data);
        assert_eq!(buf[0], BYTES_BLOCK_LZ4);
        assert!(buf.len() < data.len());

        let mut src = buf.as_slice();
        assert_eq!(unmarshal_bytes_block(&mut src, MAX).unwrap(), data);
        assert!(unmarshal_bytes_block(&mut buf.as_slice(), 16).is_err());
    }

    #[test]
    fn test_strings_block() {
        let values: Vec<Vec<u8>> = (0..500).map(|i| format!("value-{i}").into_bytes()).collect();
        let mut buf = Vec::new();
        marshal_strings_block(&mut buf, values.iter().map(|v| v.as_slice()));

        let mut src = buf.as_slice();
        assert_eq!(unmarshal_strings_block(&mut src, 500, MAX).unwrap(), values);
        assert!(src.is_empty());

        assert!(unmarshal_strings_block(&mut buf.as_slice(), 499, MAX).is_err());
        assert!(unmarshal_strings_block(&mut buf.as_slice(), 501, MAX).is_err());
    }

    #[test]
    fn test_truncated() {
        let mut buf = Vec::new();
        marshal_strings_block(&mut buf, [&b"a"[..], b"bb"]);
        for n in 0..buf.len() {
            let mut src = &buf[..n];
            assert!(unmarshal_strings_block(&mut src, 2, MAX).is_err(), "n={n}");
            assert_eq!(src.len(), n);
        }
    }
}
