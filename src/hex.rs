use std::io;

use serde::Serialize;
use thiserror::Error;

/// Byte count, two address bytes, record type and checksum.
pub const HEADER_BYTES: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordKind {
    Data,
    EndOfFile,
    ExtSegmentAddr,
    StartSegmentAddr,
    ExtLinearAddr,
    StartLinearAddr,
}

impl RecordKind {
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0x00 => Some(RecordKind::Data),
            0x01 => Some(RecordKind::EndOfFile),
            0x02 => Some(RecordKind::ExtSegmentAddr),
            0x03 => Some(RecordKind::StartSegmentAddr),
            0x04 => Some(RecordKind::ExtLinearAddr),
            0x05 => Some(RecordKind::StartLinearAddr),
            _ => None,
        }
    }

    pub fn code(self) -> u8 {
        match self {
            RecordKind::Data => 0x00,
            RecordKind::EndOfFile => 0x01,
            RecordKind::ExtSegmentAddr => 0x02,
            RecordKind::StartSegmentAddr => 0x03,
            RecordKind::ExtLinearAddr => 0x04,
            RecordKind::StartLinearAddr => 0x05,
        }
    }

    /// Payload length a record of this kind must carry, if it is fixed.
    fn required_payload_len(self) -> Option<usize> {
        match self {
            RecordKind::ExtSegmentAddr | RecordKind::ExtLinearAddr => Some(2),
            RecordKind::StartLinearAddr => Some(4),
            _ => None,
        }
    }
}

/// One decoded line of an Intel HEX file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    pub byte_count: u8,
    /// Record-local address, before any extension is applied.
    pub address: u16,
    pub kind: RecordKind,
    pub payload: Vec<u8>,
    pub checksum: u8,
    pub line_no: usize,
}

#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("io: {0}")]
    Io(io::Error),

    #[error(
        "input is not a text Intel HEX file (invalid UTF-8 at line {line_no}); did you pass a binary?"
    )]
    NotText { line_no: usize },

    #[error("invalid hex line {line_no}: missing ':' prefix")]
    MissingStartCode { line_no: usize },

    #[error("invalid hex line {line_no}: invalid character {found:?} at column {column}")]
    InvalidCharacter {
        line_no: usize,
        column: usize,
        found: char,
    },

    #[error("invalid hex line {line_no}: record too short ({digits} hex digits)")]
    TooShort { line_no: usize, digits: usize },

    #[error("invalid hex line {line_no}: declared {declared} data bytes but only {present} present")]
    Truncated {
        line_no: usize,
        declared: usize,
        present: usize,
    },

    #[error("invalid hex line {line_no}: {extra} unexpected hex digits after checksum")]
    TrailingData { line_no: usize, extra: usize },

    #[error("invalid hex line {line_no}: unknown record type 0x{code:02X}")]
    UnknownRecordType { line_no: usize, code: u8 },

    #[error("invalid checksum at line {line_no} (expected 0x{expected:02X}, found 0x{found:02X})")]
    Checksum {
        line_no: usize,
        expected: u8,
        found: u8,
    },

    #[error("invalid hex line {line_no}: {kind:?} record needs {expected} data bytes, got {found}")]
    InvalidPayloadLength {
        line_no: usize,
        kind: RecordKind,
        expected: usize,
        found: usize,
    },

    #[error("address overflow at line {line_no}")]
    AddressOverflow { line_no: usize },
}

impl DecodeError {
    /// Line the error was detected on, when it is tied to one.
    pub fn line_no(&self) -> Option<usize> {
        match self {
            DecodeError::Io(_) => None,
            DecodeError::NotText { line_no }
            | DecodeError::MissingStartCode { line_no }
            | DecodeError::InvalidCharacter { line_no, .. }
            | DecodeError::TooShort { line_no, .. }
            | DecodeError::Truncated { line_no, .. }
            | DecodeError::TrailingData { line_no, .. }
            | DecodeError::UnknownRecordType { line_no, .. }
            | DecodeError::Checksum { line_no, .. }
            | DecodeError::InvalidPayloadLength { line_no, .. }
            | DecodeError::AddressOverflow { line_no } => Some(*line_no),
        }
    }
}

/// Decode a single record line. The line must already be trimmed.
pub fn decode_line(line: &str, line_no: usize) -> Result<Record, DecodeError> {
    let Some(digits) = line.strip_prefix(':') else {
        return Err(DecodeError::MissingStartCode { line_no });
    };

    if let Some((i, c)) = digits.char_indices().find(|(_, c)| !c.is_ascii_hexdigit()) {
        return Err(DecodeError::InvalidCharacter {
            line_no,
            // 1-based, counting the ':' prefix.
            column: i + 2,
            found: c,
        });
    }

    if digits.len() < 2 * HEADER_BYTES {
        return Err(DecodeError::TooShort {
            line_no,
            digits: digits.len(),
        });
    }

    let digits = digits.as_bytes();
    let byte_count = hex_pair(digits, 0);
    let declared = byte_count as usize;
    let needed = 2 * (HEADER_BYTES + declared);
    if digits.len() < needed {
        return Err(DecodeError::Truncated {
            line_no,
            declared,
            present: digits.len() / 2 - HEADER_BYTES,
        });
    }
    if digits.len() > needed {
        return Err(DecodeError::TrailingData {
            line_no,
            extra: digits.len() - needed,
        });
    }

    let bytes: Vec<u8> = (0..HEADER_BYTES + declared)
        .map(|i| hex_pair(digits, i))
        .collect();

    let address = u16::from_be_bytes([bytes[1], bytes[2]]);
    let code = bytes[3];
    let kind = RecordKind::from_code(code).ok_or(DecodeError::UnknownRecordType { line_no, code })?;

    let payload = bytes[4..4 + declared].to_vec();
    let found = bytes[4 + declared];
    let expected = checksum_ihex(&bytes[..4 + declared]);
    if found != expected {
        return Err(DecodeError::Checksum {
            line_no,
            expected,
            found,
        });
    }

    if let Some(required) = kind.required_payload_len() {
        if payload.len() != required {
            return Err(DecodeError::InvalidPayloadLength {
                line_no,
                kind,
                expected: required,
                found: payload.len(),
            });
        }
    }

    Ok(Record {
        byte_count,
        address,
        kind,
        payload,
        checksum: found,
        line_no,
    })
}

/// Two's complement of the byte sum, as stored in the last byte of a record.
pub fn checksum_ihex(bytes: &[u8]) -> u8 {
    let sum: u8 = bytes.iter().fold(0u8, |acc, b| acc.wrapping_add(*b));
    (!sum).wrapping_add(1)
}

// Callers have already checked that every digit is a hex digit.
fn hex_pair(digits: &[u8], index: usize) -> u8 {
    let hi = from_hex_digit(digits[2 * index]).unwrap_or(0);
    let lo = from_hex_digit(digits[2 * index + 1]).unwrap_or(0);
    (hi << 4) | lo
}

pub(crate) fn from_hex_digit(c: u8) -> Option<u8> {
    match c {
        b'0'..=b'9' => Some(c - b'0'),
        b'a'..=b'f' => Some(c - b'a' + 10),
        b'A'..=b'F' => Some(c - b'A' + 10),
        _ => None,
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn ihex_record(addr: u16, rec_type: u8, payload: &[u8]) -> String {
        let mut bytes: Vec<u8> = Vec::new();
        bytes.push(payload.len() as u8);
        bytes.extend_from_slice(&addr.to_be_bytes());
        bytes.push(rec_type);
        bytes.extend_from_slice(payload);
        let cksum = checksum_ihex(&bytes);
        bytes.push(cksum);

        let mut s = String::from(":");
        for b in bytes {
            s.push_str(&format!("{b:02X}"));
        }
        s
    }

    #[test]
    fn test_decode_data_record_round_trips_fields() {
        let line = ihex_record(0x1234, 0x00, &[0xDE, 0xAD, 0xBE, 0xEF]);
        let rec = decode_line(&line, 7).unwrap();
        assert_eq!(rec.byte_count, 4);
        assert_eq!(rec.address, 0x1234);
        assert_eq!(rec.kind, RecordKind::Data);
        assert_eq!(rec.payload, vec![0xDE, 0xAD, 0xBE, 0xEF]);
        assert_eq!(rec.line_no, 7);
    }

    #[test]
    fn test_decode_is_case_insensitive() {
        let upper = ":10000000214601360121470136007EFE09D2194002";
        let rec = decode_line(&upper.to_lowercase(), 1).unwrap();
        assert_eq!(rec.payload[10], 0x7E);
        assert_eq!(rec.checksum, 0x02);
    }

    #[test]
    fn test_flipped_payload_bit_fails_checksum() {
        let line = ihex_record(0x0000, 0x00, &[0x10, 0x20, 0x30]);
        // Payload starts after ":LLAAAATT"; 0x10 -> 0x11.
        let mut bad = line.clone();
        bad.replace_range(9..11, "11");

        let err = decode_line(&bad, 3).unwrap_err();
        match err {
            DecodeError::Checksum {
                line_no,
                expected,
                found,
            } => {
                assert_eq!(line_no, 3);
                assert_eq!(found, decode_line(&line, 3).unwrap().checksum);
                assert_eq!(expected, found.wrapping_sub(1));
            }
            _ => panic!("expected Checksum, got {err:?}"),
        }
    }

    #[test]
    fn test_every_payload_bit_flip_fails_checksum() {
        let records = [
            ihex_record(0x0000, 0x00, &[0x00, 0xFF, 0x5A, 0xA5, 0x01, 0x80]),
            ihex_record(0x00F0, 0x00, &[0x12, 0x34, 0x56, 0x78]),
            ihex_record(0xFFFF, 0x00, &[0xC3]),
            ihex_record(0x0000, 0x02, &[0x12, 0x00]),
            ihex_record(0x0000, 0x03, &[0x00, 0x00, 0x38, 0x00]),
            ihex_record(0x0000, 0x04, &[0x00, 0x01]),
            ihex_record(0x0000, 0x05, &[0x00, 0x00, 0x01, 0x00]),
        ];

        for line in &records {
            let original = decode_line(line, 1).unwrap();
            for (i, byte) in original.payload.iter().enumerate() {
                let pos = 9 + 2 * i;
                for bit in 0..8 {
                    let mut bad = line.clone();
                    bad.replace_range(pos..pos + 2, &format!("{:02X}", byte ^ (1 << bit)));

                    match decode_line(&bad, 4) {
                        Err(DecodeError::Checksum {
                            line_no,
                            expected,
                            found,
                        }) => {
                            assert_eq!(line_no, 4);
                            assert_eq!(found, original.checksum);
                            assert_ne!(expected, found);
                        }
                        other => panic!("{bad}: expected Checksum, got {other:?}"),
                    }
                }
            }
        }
    }

    #[test]
    fn test_structural_errors_are_distinct() {
        assert!(matches!(
            decode_line("00000001FF", 1),
            Err(DecodeError::MissingStartCode { line_no: 1 })
        ));
        assert!(matches!(
            decode_line(":0000000G01FF", 2),
            Err(DecodeError::InvalidCharacter {
                line_no: 2,
                column: 9,
                found: 'G'
            })
        ));
        assert!(matches!(
            decode_line(":000000", 3),
            Err(DecodeError::TooShort { line_no: 3, digits: 6 })
        ));
        assert!(matches!(
            decode_line(":0400000001FF", 4),
            Err(DecodeError::Truncated {
                line_no: 4,
                declared: 4,
                present: 1
            })
        ));
        assert!(matches!(
            decode_line(":00000001FF00", 5),
            Err(DecodeError::TrailingData { line_no: 5, extra: 2 })
        ));
    }

    #[test]
    fn test_unknown_record_type() {
        let line = ihex_record(0x0000, 0x06, &[]);
        assert!(matches!(
            decode_line(&line, 1),
            Err(DecodeError::UnknownRecordType { code: 0x06, .. })
        ));
    }

    #[test]
    fn test_extension_records_need_fixed_payload() {
        let line = ihex_record(0x0000, 0x04, &[0x10]);
        let err = decode_line(&line, 9).unwrap_err();
        assert!(matches!(
            err,
            DecodeError::InvalidPayloadLength {
                kind: RecordKind::ExtLinearAddr,
                expected: 2,
                found: 1,
                ..
            }
        ));
        assert_eq!(err.line_no(), Some(9));

        let line = ihex_record(0x0000, 0x05, &[0x00, 0x00, 0x01]);
        assert!(matches!(
            decode_line(&line, 1),
            Err(DecodeError::InvalidPayloadLength { expected: 4, .. })
        ));
    }

    #[test]
    fn test_checksum_ihex() {
        assert_eq!(checksum_ihex(&[0x00, 0x00, 0x00, 0x01]), 0xFF);
        assert_eq!(checksum_ihex(&[0x02, 0x00, 0x00, 0x04, 0x00, 0x00]), 0xFA);
    }
}
