//! Typed Column Values
//!
//! Every column of a block is stored in the narrowest encoding that fits all
//! of its values. [`ValuesEncoder::encode`] tries the candidates in order and
//! keeps the first one that accepts every value:
//!
//! 1. **Dict**: at most [`MAX_DICT_LEN`] distinct values; every row is one byte
//! 2. **Uint8/16/32/64**: decimal unsigned integers, width chosen from the max value
//! 3. **Int64**: decimal integers with negative values
//! 4. **Float64**: decimal floats without exponent
//! 5. **IPv4**: dotted-quad addresses
//! 6. **TimestampISO8601**: `YYYY-MM-DDThh:mm:ss.sssZ`
//! 7. **String**: values stored as is
//!
//! A candidate is accepted only if formatting the parsed value reproduces the
//! original text byte for byte, so decoding always returns the exact strings
//! that were ingested.
//!
//! [`EncodedValues`] is the decoded-but-typed form shared by the storage layer
//! and the query engine: numeric filters and stats work on the typed vectors
//! directly and only format strings when a value must be displayed.

use crate::consts::{MAX_DICT_LEN, MAX_DICT_SIZE_BYTES};
use crate::error::{Result, StorageError};
use logstore_core::encoding::{marshal_bytes, unmarshal_bytes};
use logstore_core::values::{
    marshal_float64_string, marshal_ipv4_string, marshal_timestamp_iso8601_string,
    try_parse_float64, try_parse_int64, try_parse_ipv4, try_parse_timestamp_iso8601,
    try_parse_uint64,
};
use std::fmt;

/// Encoding of a column in a block.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u8)]
pub enum ValueType {
    #[default]
    Unknown = 0,
    String = 1,
    Dict = 2,
    Uint8 = 3,
    Uint16 = 4,
    Uint32 = 5,
    Uint64 = 6,
    Float64 = 7,
    IPv4 = 8,
    TimestampIso8601 = 9,
    Int64 = 10,
}

impl ValueType {
    pub fn from_u8(b: u8) -> Option<Self> {
        Some(match b {
            0 => ValueType::Unknown,
            1 => ValueType::String,
            2 => ValueType::Dict,
            3 => ValueType::Uint8,
            4 => ValueType::Uint16,
            5 => ValueType::Uint32,
            6 => ValueType::Uint64,
            7 => ValueType::Float64,
            8 => ValueType::IPv4,
            9 => ValueType::TimestampIso8601,
            10 => ValueType::Int64,
            _ => return None,
        })
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ValueType::Unknown => "unknown",
            ValueType::String => "string",
            ValueType::Dict => "dict",
            ValueType::Uint8 => "uint8",
            ValueType::Uint16 => "uint16",
            ValueType::Uint32 => "uint32",
            ValueType::Uint64 => "uint64",
            ValueType::Float64 => "float64",
            ValueType::IPv4 => "ipv4",
            ValueType::TimestampIso8601 => "iso8601",
            ValueType::Int64 => "int64",
        }
    }

    /// Returns true for types whose `min_value`/`max_value` bounds are meaningful.
    pub fn has_min_max(&self) -> bool {
        !matches!(
            self,
            ValueType::Unknown | ValueType::String | ValueType::Dict
        )
    }

    /// Returns true if `min <= max` under the natural ordering of the type.
    pub fn is_valid_min_max(&self, min_value: u64, max_value: u64) -> bool {
        match self {
            ValueType::Int64 | ValueType::TimestampIso8601 => {
                (min_value as i64) <= (max_value as i64)
            }
            ValueType::Float64 => f64::from_bits(min_value) <= f64::from_bits(max_value),
            _ => min_value <= max_value,
        }
    }
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Small dictionary of the distinct values of a dict-encoded column.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValuesDict {
    pub values: Vec<String>,
}

impl ValuesDict {
    pub fn reset(&mut self) {
        self.values.clear();
    }

    /// Returns the index of `k`, adding it if the dict still has room.
    pub fn get_or_add(&mut self, k: &str) -> Option<u8> {
        if k.len() > MAX_DICT_SIZE_BYTES {
            return None;
        }
        let mut size = 0;
        for (i, v) in self.values.iter().enumerate() {
            if v == k {
                return Some(i as u8);
            }
            size += v.len();
        }
        if self.values.len() >= MAX_DICT_LEN || size + k.len() > MAX_DICT_SIZE_BYTES {
            return None;
        }
        self.values.push(k.to_string());
        Some((self.values.len() - 1) as u8)
    }

    pub fn marshal(&self, dst: &mut Vec<u8>) {
        if self.values.len() > MAX_DICT_LEN {
            panic!(
                "BUG: valuesDict may contain max {} items; got {} items",
                MAX_DICT_LEN,
                self.values.len()
            );
        }
        dst.push(self.values.len() as u8);
        for v in &self.values {
            marshal_bytes(dst, v.as_bytes());
        }
    }

    pub fn unmarshal(src: &mut &[u8]) -> Result<Self> {
        let mut cursor = *src;
        let Some((&dict_len, tail)) = cursor.split_first() else {
            return Err(StorageError::ColumnsHeader(
                "cannot unmarshal dict len from 0 bytes; need at least 1 byte".to_string(),
            ));
        };
        cursor = tail;
        let mut values = Vec::with_capacity(dict_len as usize);
        for i in 0..dict_len {
            let data = unmarshal_bytes(&mut cursor).map_err(|err| {
                StorageError::ColumnsHeader(format!(
                    "cannot unmarshal value {i} out of {dict_len} from dict: {err}"
                ))
            })?;
            values.push(String::from_utf8_lossy(data).into_owned());
        }
        *src = cursor;
        Ok(Self { values })
    }
}

/// Column values in their typed form.
#[derive(Debug, Clone, PartialEq)]
pub enum EncodedValues {
    Strings(Vec<String>),
    Dict { dict: ValuesDict, indexes: Vec<u8> },
    Uint8(Vec<u8>),
    Uint16(Vec<u16>),
    Uint32(Vec<u32>),
    Uint64(Vec<u64>),
    Int64(Vec<i64>),
    Float64(Vec<f64>),
    IPv4(Vec<u32>),
    TimestampIso8601(Vec<i64>),
}

impl EncodedValues {
    pub fn value_type(&self) -> ValueType {
        match self {
            EncodedValues::Strings(_) => ValueType::String,
            EncodedValues::Dict { .. } => ValueType::Dict,
            EncodedValues::Uint8(_) => ValueType::Uint8,
            EncodedValues::Uint16(_) => ValueType::Uint16,
            EncodedValues::Uint32(_) => ValueType::Uint32,
            EncodedValues::Uint64(_) => ValueType::Uint64,
            EncodedValues::Int64(_) => ValueType::Int64,
            EncodedValues::Float64(_) => ValueType::Float64,
            EncodedValues::IPv4(_) => ValueType::IPv4,
            EncodedValues::TimestampIso8601(_) => ValueType::TimestampIso8601,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            EncodedValues::Strings(a) => a.len(),
            EncodedValues::Dict { indexes, .. } => indexes.len(),
            EncodedValues::Uint8(a) => a.len(),
            EncodedValues::Uint16(a) => a.len(),
            EncodedValues::Uint32(a) | EncodedValues::IPv4(a) => a.len(),
            EncodedValues::Uint64(a) => a.len(),
            EncodedValues::Int64(a) | EncodedValues::TimestampIso8601(a) => a.len(),
            EncodedValues::Float64(a) => a.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Appends the display form of row `i` to `dst`.
    pub fn append_value(&self, i: usize, dst: &mut String) {
        use std::fmt::Write;

        match self {
            EncodedValues::Strings(a) => dst.push_str(&a[i]),
            EncodedValues::Dict { dict, indexes } => {
                dst.push_str(&dict.values[indexes[i] as usize]);
            }
            EncodedValues::Uint8(a) => {
                let _ = write!(dst, "{}", a[i]);
            }
            EncodedValues::Uint16(a) => {
                let _ = write!(dst, "{}", a[i]);
            }
            EncodedValues::Uint32(a) => {
                let _ = write!(dst, "{}", a[i]);
            }
            EncodedValues::Uint64(a) => {
                let _ = write!(dst, "{}", a[i]);
            }
            EncodedValues::Int64(a) => {
                let _ = write!(dst, "{}", a[i]);
            }
            EncodedValues::Float64(a) => marshal_float64_string(dst, a[i]),
            EncodedValues::IPv4(a) => marshal_ipv4_string(dst, a[i]),
            EncodedValues::TimestampIso8601(a) => marshal_timestamp_iso8601_string(dst, a[i]),
        }
    }

    pub fn value_string(&self, i: usize) -> String {
        let mut s = String::new();
        self.append_value(i, &mut s);
        s
    }

    /// Formats all the values.
    ///
    /// Adjacent rows with byte-identical encoded values share one formatting pass.
    pub fn to_strings(&self) -> Vec<String> {
        if let EncodedValues::Strings(a) = self {
            return a.clone();
        }
        let mut out: Vec<String> = Vec::with_capacity(self.len());
        for i in 0..self.len() {
            if i > 0 && self.raw_eq(i - 1, i) {
                let prev = out[i - 1].clone();
                out.push(prev);
            } else {
                out.push(self.value_string(i));
            }
        }
        out
    }

    fn raw_eq(&self, i: usize, j: usize) -> bool {
        match self {
            EncodedValues::Strings(a) => a[i] == a[j],
            EncodedValues::Dict { indexes, .. } => indexes[i] == indexes[j],
            EncodedValues::Uint8(a) => a[i] == a[j],
            EncodedValues::Uint16(a) => a[i] == a[j],
            EncodedValues::Uint32(a) | EncodedValues::IPv4(a) => a[i] == a[j],
            EncodedValues::Uint64(a) => a[i] == a[j],
            EncodedValues::Int64(a) | EncodedValues::TimestampIso8601(a) => a[i] == a[j],
            EncodedValues::Float64(a) => a[i].to_bits() == a[j].to_bits(),
        }
    }

    /// Appends the raw on-disk bytes of row `i` to `dst`.
    pub fn append_raw(&self, i: usize, dst: &mut Vec<u8>) {
        match self {
            EncodedValues::Strings(a) => dst.extend_from_slice(a[i].as_bytes()),
            EncodedValues::Dict { indexes, .. } => dst.push(indexes[i]),
            EncodedValues::Uint8(a) => dst.push(a[i]),
            EncodedValues::Uint16(a) => dst.extend_from_slice(&a[i].to_be_bytes()),
            EncodedValues::Uint32(a) | EncodedValues::IPv4(a) => {
                dst.extend_from_slice(&a[i].to_be_bytes())
            }
            EncodedValues::Uint64(a) => dst.extend_from_slice(&a[i].to_be_bytes()),
            EncodedValues::Int64(a) | EncodedValues::TimestampIso8601(a) => {
                dst.extend_from_slice(&a[i].to_be_bytes())
            }
            EncodedValues::Float64(a) => dst.extend_from_slice(&a[i].to_bits().to_be_bytes()),
        }
    }

    /// Decodes values of the given type from their raw per-row bytes.
    pub fn from_raw(value_type: ValueType, dict: &ValuesDict, raw: &[Vec<u8>]) -> Result<Self> {
        fn fixed<const N: usize>(raw: &[Vec<u8>], vt: ValueType) -> Result<Vec<[u8; N]>> {
            raw.iter()
                .enumerate()
                .map(|(i, v)| {
                    <[u8; N]>::try_from(v.as_slice()).map_err(|_| {
                        StorageError::Core(logstore_core::Error::decode(format!(
                            "unexpected length for value #{i} of {vt} column; got {} bytes; want {N} bytes",
                            v.len()
                        )))
                    })
                })
                .collect()
        }

        Ok(match value_type {
            ValueType::String => EncodedValues::Strings(
                raw.iter()
                    .map(|v| String::from_utf8_lossy(v).into_owned())
                    .collect(),
            ),
            ValueType::Dict => {
                let indexes: Vec<u8> = fixed::<1>(raw, value_type)?.into_iter().map(|b| b[0]).collect();
                if let Some(&bad) = indexes.iter().find(|&&idx| idx as usize >= dict.values.len()) {
                    return Err(StorageError::Core(logstore_core::Error::decode(format!(
                        "unexpected dict index {bad}; dict contains {} values",
                        dict.values.len()
                    ))));
                }
                EncodedValues::Dict {
                    dict: dict.clone(),
                    indexes,
                }
            }
            ValueType::Uint8 => {
                EncodedValues::Uint8(fixed::<1>(raw, value_type)?.into_iter().map(|b| b[0]).collect())
            }
            ValueType::Uint16 => EncodedValues::Uint16(
                fixed::<2>(raw, value_type)?.into_iter().map(u16::from_be_bytes).collect(),
            ),
            ValueType::Uint32 => EncodedValues::Uint32(
                fixed::<4>(raw, value_type)?.into_iter().map(u32::from_be_bytes).collect(),
            ),
            ValueType::Uint64 => EncodedValues::Uint64(
                fixed::<8>(raw, value_type)?.into_iter().map(u64::from_be_bytes).collect(),
            ),
            ValueType::Int64 => EncodedValues::Int64(
                fixed::<8>(raw, value_type)?.into_iter().map(i64::from_be_bytes).collect(),
            ),
            ValueType::Float64 => EncodedValues::Float64(
                fixed::<8>(raw, value_type)?
                    .into_iter()
                    .map(|b| f64::from_bits(u64::from_be_bytes(b)))
                    .collect(),
            ),
            ValueType::IPv4 => EncodedValues::IPv4(
                fixed::<4>(raw, value_type)?.into_iter().map(u32::from_be_bytes).collect(),
            ),
            ValueType::TimestampIso8601 => EncodedValues::TimestampIso8601(
                fixed::<8>(raw, value_type)?.into_iter().map(i64::from_be_bytes).collect(),
            ),
            ValueType::Unknown => {
                return Err(StorageError::Core(logstore_core::Error::decode(
                    "cannot decode values of unknown type",
                )))
            }
        })
    }

    /// Returns the values at the given rows, in order.
    pub fn select(&self, rows: &[usize]) -> Self {
        fn pick<T: Clone>(a: &[T], rows: &[usize]) -> Vec<T> {
            rows.iter().map(|&i| a[i].clone()).collect()
        }
        match self {
            EncodedValues::Strings(a) => EncodedValues::Strings(pick(a, rows)),
            EncodedValues::Dict { dict, indexes } => EncodedValues::Dict {
                dict: dict.clone(),
                indexes: pick(indexes, rows),
            },
            EncodedValues::Uint8(a) => EncodedValues::Uint8(pick(a, rows)),
            EncodedValues::Uint16(a) => EncodedValues::Uint16(pick(a, rows)),
            EncodedValues::Uint32(a) => EncodedValues::Uint32(pick(a, rows)),
            EncodedValues::Uint64(a) => EncodedValues::Uint64(pick(a, rows)),
            EncodedValues::Int64(a) => EncodedValues::Int64(pick(a, rows)),
            EncodedValues::Float64(a) => EncodedValues::Float64(pick(a, rows)),
            EncodedValues::IPv4(a) => EncodedValues::IPv4(pick(a, rows)),
            EncodedValues::TimestampIso8601(a) => EncodedValues::TimestampIso8601(pick(a, rows)),
        }
    }

    /// Returns the values in `start..end`.
    pub fn slice(&self, start: usize, end: usize) -> Self {
        let rows: Vec<usize> = (start..end).collect();
        self.select(&rows)
    }

    /// Returns the numeric value of row `i` for numeric types.
    pub fn numeric_value(&self, i: usize) -> Option<f64> {
        match self {
            EncodedValues::Uint8(a) => Some(a[i] as f64),
            EncodedValues::Uint16(a) => Some(a[i] as f64),
            EncodedValues::Uint32(a) => Some(a[i] as f64),
            EncodedValues::Uint64(a) => Some(a[i] as f64),
            EncodedValues::Int64(a) => Some(a[i] as f64),
            EncodedValues::Float64(a) => Some(a[i]),
            _ => None,
        }
    }
}

/// Result of encoding a column.
#[derive(Debug, Clone, PartialEq)]
pub struct EncodedColumn {
    pub values: EncodedValues,
    pub min_value: u64,
    pub max_value: u64,
}

impl EncodedColumn {
    pub fn value_type(&self) -> ValueType {
        self.values.value_type()
    }

    /// Returns the raw per-row bytes written to the values block.
    pub fn raw_values(&self) -> Vec<Vec<u8>> {
        (0..self.values.len())
            .map(|i| {
                let mut buf = Vec::new();
                self.values.append_raw(i, &mut buf);
                buf
            })
            .collect()
    }

    pub fn dict(&self) -> Option<&ValuesDict> {
        match &self.values {
            EncodedValues::Dict { dict, .. } => Some(dict),
            _ => None,
        }
    }
}

/// Picks the narrowest encoding for a column.
#[derive(Debug, Default)]
pub struct ValuesEncoder;

impl ValuesEncoder {
    pub fn encode(values: &[String]) -> EncodedColumn {
        if values.is_empty() {
            return EncodedColumn {
                values: EncodedValues::Strings(Vec::new()),
                min_value: 0,
                max_value: 0,
            };
        }
        try_dict_encoding(values)
            .or_else(|| try_uint_encoding(values))
            .or_else(|| try_int64_encoding(values))
            .or_else(|| try_float64_encoding(values))
            .or_else(|| try_ipv4_encoding(values))
            .or_else(|| try_timestamp_iso8601_encoding(values))
            .unwrap_or_else(|| EncodedColumn {
                values: EncodedValues::Strings(values.to_vec()),
                min_value: 0,
                max_value: 0,
            })
    }
}

fn try_dict_encoding(values: &[String]) -> Option<EncodedColumn> {
    let mut dict = ValuesDict::default();
    let mut indexes = Vec::with_capacity(values.len());
    for v in values {
        indexes.push(dict.get_or_add(v)?);
    }
    Some(EncodedColumn {
        values: EncodedValues::Dict { dict, indexes },
        min_value: 0,
        max_value: 0,
    })
}

fn parse_all<T: Copy>(
    values: &[String],
    parse: impl Fn(&str) -> Option<T>,
    format: impl Fn(T) -> String,
) -> Option<Vec<T>> {
    values
        .iter()
        .map(|v| {
            let n = parse(v.as_str())?;
            (format(n) == v.as_str()).then_some(n)
        })
        .collect()
}

fn try_uint_encoding(values: &[String]) -> Option<EncodedColumn> {
    let a = parse_all(values, try_parse_uint64, |n| n.to_string())?;
    let min_value = *a.iter().min()?;
    let max_value = *a.iter().max()?;
    let encoded = if max_value <= u8::MAX as u64 {
        EncodedValues::Uint8(a.iter().map(|&n| n as u8).collect())
    } else if max_value <= u16::MAX as u64 {
        EncodedValues::Uint16(a.iter().map(|&n| n as u16).collect())
    } else if max_value <= u32::MAX as u64 {
        EncodedValues::Uint32(a.iter().map(|&n| n as u32).collect())
    } else {
        EncodedValues::Uint64(a)
    };
    Some(EncodedColumn {
        values: encoded,
        min_value,
        max_value,
    })
}

fn try_int64_encoding(values: &[String]) -> Option<EncodedColumn> {
    let a = parse_all(values, try_parse_int64, |n| n.to_string())?;
    let min_value = *a.iter().min()?;
    let max_value = *a.iter().max()?;
    Some(EncodedColumn {
        values: EncodedValues::Int64(a),
        min_value: min_value as u64,
        max_value: max_value as u64,
    })
}

fn try_float64_encoding(values: &[String]) -> Option<EncodedColumn> {
    let a = parse_all(values, try_parse_float64, logstore_core::values::float64_string)?;
    let mut min_value = a[0];
    let mut max_value = a[0];
    for &f in &a[1..] {
        if f < min_value {
            min_value = f;
        }
        if f > max_value {
            max_value = f;
        }
    }
    Some(EncodedColumn {
        values: EncodedValues::Float64(a),
        min_value: min_value.to_bits(),
        max_value: max_value.to_bits(),
    })
}

fn try_ipv4_encoding(values: &[String]) -> Option<EncodedColumn> {
    let a = parse_all(values, try_parse_ipv4, logstore_core::values::ipv4_string)?;
    let min_value = *a.iter().min()?;
    let max_value = *a.iter().max()?;
    Some(EncodedColumn {
        values: EncodedValues::IPv4(a),
        min_value: min_value as u64,
        max_value: max_value as u64,
    })
}

fn try_timestamp_iso8601_encoding(values: &[String]) -> Option<EncodedColumn> {
    let a = parse_all(
        values,
        try_parse_timestamp_iso8601,
        logstore_core::values::timestamp_iso8601_string,
    )?;
    let min_value = *a.iter().min()?;
    let max_value = *a.iter().max()?;
    Some(EncodedColumn {
        values: EncodedValues::TimestampIso8601(a),
        min_value: min_value as u64,
        max_value: max_value as u64,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strings(values: &[&str]) -> Vec<String> {
        values.iter().map(|s| s.to_string()).collect()
    }

    fn check(values: &[&str], want: ValueType) -> EncodedColumn {
        let values = strings(values);
        let ec = ValuesEncoder::encode(&values);
        assert_eq!(ec.value_type(), want, "values: {values:?}");
        assert_eq!(ec.values.to_strings(), values);

        let raw = ec.raw_values();
        let dict = ec.dict().cloned().unwrap_or_default();
        let decoded = EncodedValues::from_raw(ec.value_type(), &dict, &raw).unwrap();
        assert_eq!(decoded.to_strings(), values);
        ec
    }

    fn many(f: impl Fn(usize) -> String) -> Vec<String> {
        (0..20).map(f).collect()
    }

    #[test]
    fn test_dict_encoding() {
        let ec = check(&["info", "warn", "info", "error"], ValueType::Dict);
        assert_eq!(ec.dict().unwrap().values, strings(&["info", "warn", "error"]));
    }

    #[test]
    fn test_uint_widths() {
        let a = many(|i| (i * 10).to_string());
        let ec = ValuesEncoder::encode(&a);
        assert_eq!(ec.value_type(), ValueType::Uint8);
        assert_eq!((ec.min_value, ec.max_value), (0, 190));

        let a = many(|i| (i * 1000).to_string());
        assert_eq!(ValuesEncoder::encode(&a).value_type(), ValueType::Uint16);
        let a = many(|i| (i * 100_000).to_string());
        assert_eq!(ValuesEncoder::encode(&a).value_type(), ValueType::Uint32);
        let a = many(|i| (i as u64 * 10_000_000_000).to_string());
        assert_eq!(ValuesEncoder::encode(&a).value_type(), ValueType::Uint64);
    }

    #[test]
    fn test_int64_and_float() {
        let a = many(|i| (i as i64 - 10).to_string());
        let ec = ValuesEncoder::encode(&a);
        assert_eq!(ec.value_type(), ValueType::Int64);
        assert_eq!(ec.min_value as i64, -10);
        assert_eq!(ec.values.to_strings(), a);

        let a = many(|i| format!("{}.5", i));
        let ec = ValuesEncoder::encode(&a);
        assert_eq!(ec.value_type(), ValueType::Float64);
        assert_eq!(f64::from_bits(ec.max_value), 19.5);
    }

    #[test]
    fn test_non_canonical_numbers_stay_strings() {
        let mut a = many(|i| i.to_string());
        a.push("007".to_string());
        assert_eq!(ValuesEncoder::encode(&a).value_type(), ValueType::String);

        let mut a = many(|i| format!("{i}.5"));
        a.push("1.50".to_string());
        assert_eq!(ValuesEncoder::encode(&a).value_type(), ValueType::String);
    }

    #[test]
    fn test_ipv4_and_timestamps() {
        let a = many(|i| format!("10.0.0.{i}"));
        let ec = ValuesEncoder::encode(&a);
        assert_eq!(ec.value_type(), ValueType::IPv4);
        assert_eq!(ec.values.to_strings(), a);

        let a = many(|i| format!("2024-01-01T00:00:{i:02}.000Z"));
        let ec = ValuesEncoder::encode(&a);
        assert_eq!(ec.value_type(), ValueType::TimestampIso8601);
        assert_eq!(ec.values.to_strings(), a);
    }

    #[test]
    fn test_roundtrip_through_raw() {
        check(
            &["a", "b", "c", "d", "e", "f", "g", "h", "i", "j"],
            ValueType::String,
        );
    }

    #[test]
    fn test_dict_index_out_of_range() {
        let dict = ValuesDict {
            values: strings(&["a"]),
        };
        assert!(EncodedValues::from_raw(ValueType::Dict, &dict, &[vec![1]]).is_err());
        assert!(EncodedValues::from_raw(ValueType::Uint16, &dict, &[vec![1]]).is_err());
    }

    #[test]
    fn test_min_max_validation() {
        assert!(ValueType::Float64.is_valid_min_max((-0.0f64).to_bits(), 0.0f64.to_bits()));
        assert!(!ValueType::Float64.is_valid_min_max(1.0f64.to_bits(), (-1.0f64).to_bits()));
        assert!(ValueType::Int64.is_valid_min_max((-5i64) as u64, 3));
        assert!(!ValueType::Uint64.is_valid_min_max(5, 3));
    }

    #[test]
    fn test_dict_limits() {
        let mut dict = ValuesDict::default();
        for i in 0..MAX_DICT_LEN {
            assert_eq!(dict.get_or_add(&i.to_string()), Some(i as u8));
        }
        assert_eq!(dict.get_or_add("overflow"), None);
        assert_eq!(dict.get_or_add("3"), Some(3));

        let mut dict = ValuesDict::default();
        assert_eq!(dict.get_or_add(&"x".repeat(MAX_DICT_SIZE_BYTES + 1)), None);
    }

    #[test]
    fn test_dict_marshal() {
        let dict = ValuesDict {
            values: strings(&["a", "bc"]),
        };
        let mut buf = Vec::new();
        dict.marshal(&mut buf);
        let mut src = buf.as_slice();
        assert_eq!(ValuesDict::unmarshal(&mut src).unwrap(), dict);
        assert!(src.is_empty());

        let mut src = &buf[..buf.len() - 1];
        assert!(ValuesDict::unmarshal(&mut src).is_err());
        assert_eq!(src.len(), buf.len() - 1);
    }
}
