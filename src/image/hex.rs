//! Intel HEX section scanner.
//!
//! Records are validated line by line (framing, byte count, checksum) and then
//! folded into the list of contiguous [`Section`]s they cover. Payload bytes are
//! not kept: the burner consumes the hex file itself, only the layout is needed
//! for sizing and progress.
//!
//! Sections come out in record order. A run that ends where the next one starts
//! is merged, but records that jump backwards are not reordered.

use std::path::Path;

use ihex::Record;
use log::{debug, warn};
use tokio::fs;

use super::types::Section;
use crate::error::{HexError, Result};

const RECORD_DATA: u8 = 0x00;
const RECORD_EOF: u8 = 0x01;
const RECORD_EXTENDED_SEGMENT: u8 = 0x02;
const RECORD_START_SEGMENT: u8 = 0x03;
const RECORD_EXTENDED_LINEAR: u8 = 0x04;
const RECORD_START_LINEAR: u8 = 0x05;

// count + address (2) + type + checksum
const RECORD_OVERHEAD: usize = 5;

#[derive(Default)]
struct HexCursor {
    extended: u32,
    address: u32,
    size: u32,
}

impl HexCursor {
    fn end(&self) -> u32 {
        self.address.wrapping_add(self.size)
    }

    fn flush(&mut self, sections: &mut Vec<Section>) {
        if self.size == 0 {
            return;
        }

        match sections.last_mut() {
            Some(last) if last.address.wrapping_add(last.size) == self.address => {
                last.size += self.size;
            }
            _ => sections.push(Section {
                address: self.address,
                size: self.size,
            }),
        }
        self.size = 0;
    }

    fn restart(&mut self, address: u32, sections: &mut Vec<Section>) {
        self.flush(sections);
        self.address = address;
        self.size = 0;
    }

    fn rebase(&mut self, base: u32, sections: &mut Vec<Section>) {
        if self.end() != base {
            self.restart(base, sections);
        }
        self.extended = base;
    }
}

pub async fn read_sections(path: impl AsRef<Path>) -> Result<Vec<Section>> {
    let content = fs::read_to_string(path.as_ref()).await?;
    let sections = parse_sections(&content)?;
    debug!(
        "{}: {} section(s)",
        path.as_ref().display(),
        sections.len()
    );
    Ok(sections)
}

pub fn parse_sections(text: &str) -> std::result::Result<Vec<Section>, HexError> {
    let mut sections = Vec::new();
    let mut cursor = HexCursor::default();

    for (index, raw) in text.lines().enumerate() {
        let line = index + 1;
        let record_line = raw.trim();
        if record_line.is_empty() {
            continue;
        }

        let bytes = decode_record(record_line, line)?;
        match bytes[3] {
            RECORD_DATA | RECORD_EOF => {}
            RECORD_EXTENDED_SEGMENT | RECORD_EXTENDED_LINEAR => {
                if bytes[0] != 2 {
                    return Err(HexError::LengthMismatch { line });
                }
            }
            RECORD_START_SEGMENT | RECORD_START_LINEAR => continue,
            other => {
                warn!("line {}: ignoring unknown record type {:#04x}", line, other);
                continue;
            }
        }

        let record = Record::from_record_string(record_line)
            .map_err(|source| HexError::Record { line, source })?;

        match record {
            Record::Data { offset, value } => {
                let address = cursor.extended.wrapping_add(offset as u32);
                if cursor.end() != address {
                    cursor.restart(address, &mut sections);
                }
                cursor.size += value.len() as u32;
            }
            Record::ExtendedSegmentAddress(segment) => {
                cursor.rebase((segment as u32) << 4, &mut sections);
            }
            Record::ExtendedLinearAddress(segment) => {
                cursor.rebase((segment as u32) << 16, &mut sections);
            }
            Record::EndOfFile => break,
            _ => {}
        }
    }

    cursor.flush(&mut sections);
    Ok(sections)
}

/// Checks framing, byte count and checksum, returning the raw record bytes.
fn decode_record(record: &str, line: usize) -> std::result::Result<Vec<u8>, HexError> {
    let digits = record
        .strip_prefix(':')
        .ok_or(HexError::MalformedLine { line })?;

    if record.len() % 2 == 0 || !digits.bytes().all(|b| b.is_ascii_hexdigit()) {
        return Err(HexError::MalformedLine { line });
    }

    let bytes: Vec<u8> = digits
        .as_bytes()
        .chunks_exact(2)
        .map(|pair| (hex_value(pair[0]) << 4) | hex_value(pair[1]))
        .collect();

    if bytes.len() < RECORD_OVERHEAD || bytes[0] as usize + RECORD_OVERHEAD != bytes.len() {
        return Err(HexError::LengthMismatch { line });
    }

    if bytes.iter().fold(0u8, |sum, b| sum.wrapping_add(*b)) != 0 {
        return Err(HexError::ChecksumMismatch { line });
    }

    Ok(bytes)
}

fn hex_value(digit: u8) -> u8 {
    match digit {
        b'0'..=b'9' => digit - b'0',
        b'a'..=b'f' => digit - b'a' + 10,
        b'A'..=b'F' => digit - b'A' + 10,
        _ => 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(kind: u8, address: u16, data: &[u8]) -> String {
        let mut bytes = vec![data.len() as u8, (address >> 8) as u8, address as u8, kind];
        bytes.extend_from_slice(data);
        let checksum = bytes
            .iter()
            .fold(0u8, |sum, b| sum.wrapping_add(*b))
            .wrapping_neg();
        bytes.push(checksum);

        let mut line = String::from(":");
        for b in bytes {
            line.push_str(&format!("{:02X}", b));
        }
        line
    }

    fn eof() -> String {
        record(RECORD_EOF, 0, &[])
    }

    fn assert_canonical(sections: &[Section]) {
        for pair in sections.windows(2) {
            assert!(pair[0].address <= pair[1].address);
            assert_ne!(pair[0].address + pair[0].size, pair[1].address);
        }
    }

    #[test]
    fn test_empty_input() {
        assert!(parse_sections("").unwrap().is_empty());
        assert!(parse_sections("\n\r\n  \n").unwrap().is_empty());
    }

    #[test]
    fn test_contiguous_records_merge() {
        let mut text = String::new();
        for i in 0..4u16 {
            text.push_str(&record(RECORD_DATA, 0x0100 + i * 16, &[0xAA; 16]));
            text.push('\n');
        }
        text.push_str(&eof());

        let sections = parse_sections(&text).unwrap();
        assert_eq!(sections, vec![Section { address: 0x100, size: 64 }]);
    }

    #[test]
    fn test_gap_starts_new_section() {
        let text = [
            record(RECORD_DATA, 0x0000, &[0; 8]),
            record(RECORD_DATA, 0x0010, &[0; 4]),
            eof(),
        ]
        .join("\n");

        let sections = parse_sections(&text).unwrap();
        assert_eq!(
            sections,
            vec![
                Section { address: 0x00, size: 8 },
                Section { address: 0x10, size: 4 },
            ]
        );
        assert_canonical(&sections);
    }

    #[test]
    fn test_extended_linear_address_discontinuity() {
        let text = [
            record(RECORD_DATA, 0x0000, &[0; 16]),
            record(RECORD_EXTENDED_LINEAR, 0, &[0x00, 0x01]),
            record(RECORD_DATA, 0x0000, &[0; 16]),
            record(RECORD_DATA, 0x0010, &[0; 16]),
            eof(),
        ]
        .join("\n");

        let sections = parse_sections(&text).unwrap();
        assert_eq!(
            sections,
            vec![
                Section { address: 0x0, size: 16 },
                Section { address: 0x10000, size: 32 },
            ]
        );
    }

    #[test]
    fn test_extended_segment_address_contiguous() {
        let text = [
            record(RECORD_DATA, 0x0000, &[0; 16]),
            record(RECORD_EXTENDED_SEGMENT, 0, &[0x00, 0x01]),
            record(RECORD_DATA, 0x0000, &[0; 16]),
            eof(),
        ]
        .join("\n");

        let sections = parse_sections(&text).unwrap();
        assert_eq!(sections, vec![Section { address: 0, size: 32 }]);
    }

    #[test]
    fn test_rebase_back_onto_previous_run_is_merged() {
        // The base jump flushes the run, but the following data record lands
        // exactly where the flushed run ended.
        let text = [
            record(RECORD_DATA, 0x0010, &[0; 16]),
            record(RECORD_EXTENDED_SEGMENT, 0, &[0x00, 0x00]),
            record(RECORD_DATA, 0x0020, &[0; 16]),
            eof(),
        ]
        .join("\n");

        let sections = parse_sections(&text).unwrap();
        assert_eq!(sections, vec![Section { address: 0x10, size: 32 }]);
        assert_canonical(&sections);
    }

    #[test]
    fn test_backwards_records_keep_file_order() {
        let text = [
            record(RECORD_DATA, 0x0100, &[0; 16]),
            record(RECORD_DATA, 0x0000, &[0; 0x10]),
            record(RECORD_DATA, 0x0010, &[0; 0xF0]),
            eof(),
        ]
        .join("\n");

        // Sections follow record order; only forward contiguity merges.
        let sections = parse_sections(&text).unwrap();
        assert_eq!(
            sections,
            vec![
                Section { address: 0x100, size: 16 },
                Section { address: 0x0, size: 0x100 },
            ]
        );
    }

    #[test]
    fn test_missing_eof_still_flushes() {
        let text = record(RECORD_DATA, 0x2000, &[1, 2, 3]);
        let sections = parse_sections(&text).unwrap();
        assert_eq!(sections, vec![Section { address: 0x2000, size: 3 }]);
    }

    #[test]
    fn test_lines_after_eof_are_ignored() {
        let text = [
            record(RECORD_DATA, 0x0000, &[0; 4]),
            eof(),
            "garbage".to_string(),
        ]
        .join("\n");

        let sections = parse_sections(&text).unwrap();
        assert_eq!(sections, vec![Section { address: 0, size: 4 }]);
    }

    #[test]
    fn test_start_and_unknown_records_are_ignored() {
        let text = [
            record(RECORD_DATA, 0x0000, &[0; 4]),
            record(RECORD_START_SEGMENT, 0, &[0, 0, 0x12, 0x34]),
            record(RECORD_START_LINEAR, 0, &[0, 0, 0x12, 0x34]),
            record(0x06, 0, &[0xFF]),
            record(RECORD_DATA, 0x0004, &[0; 4]),
            eof(),
        ]
        .join("\r\n");

        let sections = parse_sections(&text).unwrap();
        assert_eq!(sections, vec![Section { address: 0, size: 8 }]);
    }

    #[test]
    fn test_flipped_checksum_bit_is_detected() {
        let line = record(RECORD_DATA, 0x1234, &[0xDE, 0xAD, 0xBE, 0xEF]);
        let (body, checksum) = line.split_at(line.len() - 2);
        let checksum = u8::from_str_radix(checksum, 16).unwrap();

        for bit in 0..8 {
            let corrupted = format!("{}{:02X}", body, checksum ^ (1 << bit));
            assert!(matches!(
                parse_sections(&corrupted),
                Err(HexError::ChecksumMismatch { line: 1 })
            ));
        }
    }

    #[test]
    fn test_altered_byte_count_is_length_mismatch() {
        let line = record(RECORD_DATA, 0x0000, &[0; 4]);
        for count in ["00", "03", "05", "FF"] {
            let altered = format!(":{}{}", count, &line[3..]);
            assert!(matches!(
                parse_sections(&altered),
                Err(HexError::LengthMismatch { line: 1 })
            ));
        }
    }

    #[test]
    fn test_malformed_lines() {
        for text in ["0000000001FF", ":00000001FG", ":00000001F", "  :0000 0001FF"] {
            assert!(
                matches!(parse_sections(text), Err(HexError::MalformedLine { line: 1 })),
                "{text}"
            );
        }

        let text = format!("{}\nnot a record", record(RECORD_DATA, 0, &[0]));
        assert!(matches!(
            parse_sections(&text),
            Err(HexError::MalformedLine { line: 2 })
        ));
    }

    #[test]
    fn test_extended_address_needs_two_bytes() {
        let text = record(RECORD_EXTENDED_LINEAR, 0, &[0x00, 0x01, 0x02]);
        assert!(matches!(
            parse_sections(&text),
            Err(HexError::LengthMismatch { line: 1 })
        ));
    }

    #[test]
    fn test_worked_example_declares_wrong_byte_count() {
        // Byte count 3 but four payload bytes follow the record type.
        let text = ":0300000002000003FA\n:00000001FF";
        assert!(matches!(
            parse_sections(text),
            Err(HexError::LengthMismatch { line: 1 })
        ));
    }

    #[test]
    fn test_lowercase_digits() {
        let text = record(RECORD_DATA, 0x00AB, &[0xCD]).to_lowercase();
        let sections = parse_sections(&text).unwrap();
        assert_eq!(sections, vec![Section { address: 0xAB, size: 1 }]);
    }

    #[tokio::test]
    async fn test_read_sections_from_file() {
        let path = std::env::temp_dir().join(format!("fwflash-{}.hex", std::process::id()));
        let text = [record(RECORD_DATA, 0x0000, &[0; 32]), eof()].join("\n");
        tokio::fs::write(&path, text).await.unwrap();

        let sections = read_sections(&path).await.unwrap();
        assert_eq!(sections, vec![Section { address: 0, size: 32 }]);

        tokio::fs::remove_file(&path).await.unwrap();
    }
}
