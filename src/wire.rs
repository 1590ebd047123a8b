//! Varint and bitset framing shared by the encoder and iterator.
//!
//! Varints are standard unsigned LEB128, byte-aligned within the bit stream
//! only in the sense that each varint byte is written as a whole byte; the
//! stream itself need not be aligned. The bitset is written as
//! `varint(max_tag)` followed by `max_tag` bits where bit `i` (0-indexed)
//! marks the presence of field tag `i + 1`.

use std::io::Read;

use prost::encoding::{decode_varint, encode_varint};

use crate::bitstream::{BitReader, BitWriter};
use crate::Result;

/// Longest LEB128 encoding of a `u64`.
const MAX_VARINT_LEN: usize = 10;

/// Encodes `value` into `scratch` and appends it to the stream.
pub(crate) fn write_varint(stream: &mut BitWriter, scratch: &mut Vec<u8>, value: u64) {
    scratch.clear();
    encode_varint(value, scratch);
    stream.write_bytes(scratch);
}

/// Reads one varint, buffering its bytes through `scratch`.
pub(crate) fn read_varint<R: Read>(stream: &mut BitReader<R>, scratch: &mut Vec<u8>) -> Result<u64> {
    scratch.clear();
    loop {
        let byte = stream.read_byte()?;
        scratch.push(byte);
        if byte >> 7 == 0 || scratch.len() == MAX_VARINT_LEN {
            break;
        }
    }
    let mut buf = scratch.as_slice();
    Ok(decode_varint(&mut buf)?)
}

/// Writes the field tags in `values` (all >= 1) as a defaults bitset.
pub(crate) fn write_bitset(stream: &mut BitWriter, scratch: &mut Vec<u8>, values: &[u32]) {
    let max = values.iter().copied().max().unwrap_or(0);
    write_varint(stream, scratch, u64::from(max));
    for tag in 1..=max {
        stream.write_bit(values.contains(&tag));
    }
}

/// Reads a defaults bitset into `values` as 1-indexed field tags.
pub(crate) fn read_bitset<R: Read>(
    stream: &mut BitReader<R>,
    scratch: &mut Vec<u8>,
    values: &mut Vec<u32>,
) -> Result<()> {
    values.clear();
    let num_bits = read_varint(stream, scratch)?;
    for i in 0..num_bits {
        if stream.read_bit()? {
            // Tags are 1-indexed on the wire, bit positions 0-indexed.
            values.push(i as u32 + 1);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    fn varint_roundtrip(value: u64) -> u64 {
        let mut writer = BitWriter::new();
        let mut scratch = Vec::new();
        write_varint(&mut writer, &mut scratch, value);
        let mut reader = BitReader::new(writer.raw_bytes());
        read_varint(&mut reader, &mut scratch).unwrap()
    }

    fn bitset_roundtrip(values: &[u32]) -> Vec<u32> {
        let mut writer = BitWriter::new();
        let mut scratch = Vec::new();
        write_bitset(&mut writer, &mut scratch, values);
        let mut reader = BitReader::new(writer.raw_bytes());
        let mut out = Vec::new();
        read_bitset(&mut reader, &mut scratch, &mut out).unwrap();
        out
    }

    #[test]
    fn test_varint_roundtrip() {
        for value in [0u64, 1, 127, 128, 300, 16_383, 16_384, u64::MAX] {
            assert_eq!(varint_roundtrip(value), value);
        }
    }

    #[test]
    fn test_varint_unaligned() {
        let mut writer = BitWriter::new();
        let mut scratch = Vec::new();
        writer.write_bits(0b101, 3);
        write_varint(&mut writer, &mut scratch, 300);
        let mut reader = BitReader::new(writer.raw_bytes());
        assert_eq!(reader.read_bits(3).unwrap(), 0b101);
        assert_eq!(read_varint(&mut reader, &mut scratch).unwrap(), 300);
    }

    #[test]
    fn test_varint_truncated() {
        let mut reader = BitReader::new([0x80u8].as_slice());
        let mut scratch = Vec::new();
        assert!(read_varint(&mut reader, &mut scratch).is_err());
    }

    #[test]
    fn test_bitset_single_tag() {
        assert_eq!(bitset_roundtrip(&[1]), vec![1]);
        assert_eq!(bitset_roundtrip(&[7]), vec![7]);
    }

    #[test]
    fn test_bitset_multiple_tags() {
        assert_eq!(bitset_roundtrip(&[1, 3, 10]), vec![1, 3, 10]);
        assert_eq!(bitset_roundtrip(&[2, 4, 6, 8]), vec![2, 4, 6, 8]);
    }

    #[test]
    fn test_bitset_length_matches_max_tag() {
        let mut writer = BitWriter::new();
        let mut scratch = Vec::new();
        write_bitset(&mut writer, &mut scratch, &[3]);
        // varint(3) is one byte, then exactly 3 bitset bits.
        assert_eq!(writer.len_bits(), 8 + 3);
    }

    proptest! {
        #[test]
        fn prop_bitset_roundtrip(tags in prop::collection::btree_set(1u32..=10_000, 1..64)) {
            let values: Vec<u32> = tags.into_iter().collect();
            prop_assert_eq!(bitset_roundtrip(&values), values);
        }
    }
}
