// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Append-only MessagePack encoder.
//!
//! Each primitive is encoded with the narrowest type prefix the value fits
//! in, followed by its payload in big-endian byte order. This is the exact
//! subset of MessagePack the agent's trace endpoints consume; decoding is the
//! agent's job.

use dd_tracing::{Error, Result};

const U32_MAX: u64 = u32::MAX as u64;

// Type prefix bytes used by this encoder.
const FIX_MAP: u8 = 0x80;
const FIX_ARRAY: u8 = 0x90;
const FIX_STR: u8 = 0xA0;
const NIL: u8 = 0xC0;
const FALSE: u8 = 0xC2;
const TRUE: u8 = 0xC3;
const BIN8: u8 = 0xC4;
const BIN16: u8 = 0xC5;
const BIN32: u8 = 0xC6;
const DOUBLE: u8 = 0xCB;
const UINT8: u8 = 0xCC;
const UINT16: u8 = 0xCD;
const UINT32: u8 = 0xCE;
const UINT64: u8 = 0xCF;
const INT8: u8 = 0xD0;
const INT16: u8 = 0xD1;
const INT32: u8 = 0xD2;
const INT64: u8 = 0xD3;
const STR8: u8 = 0xD9;
const STR16: u8 = 0xDA;
const STR32: u8 = 0xDB;
const ARRAY16: u8 = 0xDC;
const ARRAY32: u8 = 0xDD;
const MAP16: u8 = 0xDE;
const MAP32: u8 = 0xDF;
const NEGATIVE_FIXNUM: u8 = 0xE0;

pub fn pack_nil(buffer: &mut Vec<u8>) {
    buffer.push(NIL);
}

pub fn pack_bool(buffer: &mut Vec<u8>, value: bool) {
    buffer.push(if value { TRUE } else { FALSE });
}

pub fn pack_integer(buffer: &mut Vec<u8>, value: i64) {
    if value < 0 {
        pack_negative(buffer, value);
    } else {
        pack_unsigned(buffer, value as u64);
    }
}

fn pack_negative(buffer: &mut Vec<u8>, value: i64) {
    if value >= -32 {
        buffer.push(NEGATIVE_FIXNUM | ((value + 32) as u8));
    } else if value >= i8::MIN as i64 {
        buffer.push(INT8);
        buffer.push(value as i8 as u8);
    } else if value >= i16::MIN as i64 {
        buffer.push(INT16);
        buffer.extend_from_slice(&(value as i16).to_be_bytes());
    } else if value >= i32::MIN as i64 {
        buffer.push(INT32);
        buffer.extend_from_slice(&(value as i32).to_be_bytes());
    } else {
        buffer.push(INT64);
        buffer.extend_from_slice(&value.to_be_bytes());
    }
}

pub fn pack_unsigned(buffer: &mut Vec<u8>, value: u64) {
    if value <= 0x7F {
        // POSITIVE_FIXNUM is the raw byte
        buffer.push(value as u8);
    } else if value <= u8::MAX as u64 {
        buffer.push(UINT8);
        buffer.push(value as u8);
    } else if value <= u16::MAX as u64 {
        buffer.push(UINT16);
        buffer.extend_from_slice(&(value as u16).to_be_bytes());
    } else if value <= u32::MAX as u64 {
        buffer.push(UINT32);
        buffer.extend_from_slice(&(value as u32).to_be_bytes());
    } else {
        buffer.push(UINT64);
        buffer.extend_from_slice(&value.to_be_bytes());
    }
}

pub fn pack_double(buffer: &mut Vec<u8>, value: f64) {
    buffer.push(DOUBLE);
    buffer.extend_from_slice(&value.to_bits().to_be_bytes());
}

pub fn pack_str(buffer: &mut Vec<u8>, value: &str) -> Result<()> {
    let bytes = value.as_bytes();
    let size = bytes.len() as u64;
    if size < 32 {
        buffer.push(FIX_STR | (size as u8));
    } else if size <= u8::MAX as u64 {
        buffer.push(STR8);
        buffer.push(size as u8);
    } else if size <= u16::MAX as u64 {
        buffer.push(STR16);
        buffer.extend_from_slice(&(size as u16).to_be_bytes());
    } else if size <= U32_MAX {
        buffer.push(STR32);
        buffer.extend_from_slice(&(size as u32).to_be_bytes());
    } else {
        return Err(overflow("string", size));
    }
    buffer.extend_from_slice(bytes);
    Ok(())
}

pub fn pack_bin(buffer: &mut Vec<u8>, value: &[u8]) -> Result<()> {
    let size = value.len() as u64;
    if size <= u8::MAX as u64 {
        buffer.push(BIN8);
        buffer.push(size as u8);
    } else if size <= u16::MAX as u64 {
        buffer.push(BIN16);
        buffer.extend_from_slice(&(size as u16).to_be_bytes());
    } else if size <= U32_MAX {
        buffer.push(BIN32);
        buffer.extend_from_slice(&(size as u32).to_be_bytes());
    } else {
        return Err(overflow("binary", size));
    }
    buffer.extend_from_slice(value);
    Ok(())
}

pub fn pack_array(buffer: &mut Vec<u8>, size: usize) -> Result<()> {
    let size = size as u64;
    if size <= 15 {
        buffer.push(FIX_ARRAY | (size as u8));
    } else if size <= u16::MAX as u64 {
        buffer.push(ARRAY16);
        buffer.extend_from_slice(&(size as u16).to_be_bytes());
    } else if size <= U32_MAX {
        buffer.push(ARRAY32);
        buffer.extend_from_slice(&(size as u32).to_be_bytes());
    } else {
        return Err(overflow("array", size));
    }
    Ok(())
}

pub fn pack_map(buffer: &mut Vec<u8>, size: usize) -> Result<()> {
    let size = size as u64;
    if size <= 15 {
        buffer.push(FIX_MAP | (size as u8));
    } else if size <= u16::MAX as u64 {
        buffer.push(MAP16);
        buffer.extend_from_slice(&(size as u16).to_be_bytes());
    } else if size <= U32_MAX {
        buffer.push(MAP32);
        buffer.extend_from_slice(&(size as u32).to_be_bytes());
    } else {
        return Err(overflow("map", size));
    }
    Ok(())
}

fn overflow(kind: &'static str, actual: u64) -> Error {
    Error::MsgpackOverflow {
        kind,
        actual,
        max: u32::MAX as u64,
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn packed_integer(value: i64) -> Vec<u8> {
        let mut buffer = Vec::new();
        pack_integer(&mut buffer, value);
        buffer
    }

    #[test]
    fn test_pack_nil_and_bool() {
        let mut buffer = Vec::new();
        pack_nil(&mut buffer);
        pack_bool(&mut buffer, false);
        pack_bool(&mut buffer, true);
        assert_eq!(buffer, vec![0xC0, 0xC2, 0xC3]);
    }

    #[test]
    fn test_pack_integer_prefix_selection() {
        // positive fixnum is the raw byte
        assert_eq!(packed_integer(0), vec![0x00]);
        assert_eq!(packed_integer(0x7F), vec![0x7F]);

        assert_eq!(packed_integer(128), vec![0xCC, 0x80]);
        assert_eq!(packed_integer(0xFF), vec![0xCC, 0xFF]);
        assert_eq!(packed_integer(0x100), vec![0xCD, 0x01, 0x00]);
        assert_eq!(packed_integer(0xFFFF), vec![0xCD, 0xFF, 0xFF]);
        assert_eq!(packed_integer(0x1_0000), vec![0xCE, 0x00, 0x01, 0x00, 0x00]);
        assert_eq!(
            packed_integer(0x1_0000_0000),
            vec![0xCF, 0x00, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00, 0x00]
        );

        // negative fixnum covers [-32, -1]
        assert_eq!(packed_integer(-1), vec![0xFF]);
        assert_eq!(packed_integer(-32), vec![0xE0]);
        assert_eq!(packed_integer(-33), vec![0xD0, 0xDF]);
        assert_eq!(packed_integer(-128), vec![0xD0, 0x80]);
        assert_eq!(packed_integer(-129), vec![0xD1, 0xFF, 0x7F]);
        assert_eq!(
            packed_integer(-40_000),
            vec![0xD2, 0xFF, 0xFF, 0x63, 0xC0]
        );
        assert_eq!(
            packed_integer(i64::MIN),
            vec![0xD3, 0x80, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00]
        );
    }

    #[test]
    fn test_pack_unsigned_u64_max() {
        let mut buffer = Vec::new();
        pack_unsigned(&mut buffer, u64::MAX);
        assert_eq!(
            buffer,
            vec![0xCF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF]
        );
    }

    #[test]
    fn test_pack_double_big_endian_bits() {
        let mut buffer = Vec::new();
        pack_double(&mut buffer, 1.0);
        assert_eq!(
            buffer,
            vec![0xCB, 0x3F, 0xF0, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00]
        );
    }

    #[test]
    fn test_pack_str_prefixes() {
        let mut buffer = Vec::new();
        pack_str(&mut buffer, "abc").unwrap();
        assert_eq!(buffer, vec![0xA3, b'a', b'b', b'c']);

        let mut buffer = Vec::new();
        pack_str(&mut buffer, &"x".repeat(31)).unwrap();
        assert_eq!(buffer[0], 0xA0 | 31);

        let mut buffer = Vec::new();
        pack_str(&mut buffer, &"x".repeat(32)).unwrap();
        assert_eq!(&buffer[..2], &[0xD9, 32]);

        let mut buffer = Vec::new();
        pack_str(&mut buffer, &"x".repeat(256)).unwrap();
        assert_eq!(&buffer[..3], &[0xDA, 0x01, 0x00]);

        let mut buffer = Vec::new();
        pack_str(&mut buffer, &"x".repeat(65_536)).unwrap();
        assert_eq!(&buffer[..5], &[0xDB, 0x00, 0x01, 0x00, 0x00]);
    }

    #[test]
    fn test_pack_bin_prefixes() {
        let mut buffer = Vec::new();
        pack_bin(&mut buffer, &[1, 2, 3]).unwrap();
        assert_eq!(buffer, vec![0xC4, 3, 1, 2, 3]);

        let mut buffer = Vec::new();
        pack_bin(&mut buffer, &[0u8; 256]).unwrap();
        assert_eq!(&buffer[..3], &[0xC5, 0x01, 0x00]);

        let mut buffer = Vec::new();
        pack_bin(&mut buffer, &[0u8; 65_536]).unwrap();
        assert_eq!(&buffer[..5], &[0xC6, 0x00, 0x01, 0x00, 0x00]);
    }

    #[test]
    fn test_pack_array_and_map_headers() {
        let mut buffer = Vec::new();
        pack_array(&mut buffer, 2).unwrap();
        assert_eq!(buffer, vec![0x92]);

        let mut buffer = Vec::new();
        pack_array(&mut buffer, 15).unwrap();
        assert_eq!(buffer, vec![0x9F]);

        let mut buffer = Vec::new();
        pack_array(&mut buffer, 16).unwrap();
        assert_eq!(buffer, vec![0xDC, 0x00, 0x10]);

        let mut buffer = Vec::new();
        pack_array(&mut buffer, 65_536).unwrap();
        assert_eq!(buffer, vec![0xDD, 0x00, 0x01, 0x00, 0x00]);

        let mut buffer = Vec::new();
        pack_map(&mut buffer, 12).unwrap();
        assert_eq!(buffer, vec![0x8C]);

        let mut buffer = Vec::new();
        pack_map(&mut buffer, 16).unwrap();
        assert_eq!(buffer, vec![0xDE, 0x00, 0x10]);

        let mut buffer = Vec::new();
        pack_map(&mut buffer, 65_536).unwrap();
        assert_eq!(buffer, vec![0xDF, 0x00, 0x01, 0x00, 0x00]);
    }

    #[test]
    fn test_overflow_is_reported_at_the_threshold() {
        let mut buffer = Vec::new();

        assert!(pack_array(&mut buffer, u32::MAX as usize).is_ok());
        let result = pack_array(&mut buffer, u32::MAX as usize + 1);
        match result {
            Err(Error::MsgpackOverflow { kind, actual, max }) => {
                assert_eq!(kind, "array");
                assert_eq!(actual, u32::MAX as u64 + 1);
                assert_eq!(max, u32::MAX as u64);
            }
            other => panic!("expected overflow error, got {other:?}"),
        }

        assert!(pack_map(&mut buffer, u32::MAX as usize + 1).is_err());
    }
}
